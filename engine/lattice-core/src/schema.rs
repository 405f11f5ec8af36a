/// Declares a typed view of a native struct from a list of fields.
///
/// Each field names a getter, a setter and a [`NativeValue`] type. The layout is
/// computed from the field types in declaration order the first time it's
/// needed, and shared by every instance afterwards. The generated type wraps a
/// [`StructHandle`] and implements [`NativeStruct`].
///
/// ```
/// use lattice_core::{MemoryStack, NativeStruct, native_struct};
///
/// native_struct! {
///     pub struct Extent2d {
///         width / set_width: u32,
///         height / set_height: u32,
///     }
/// }
///
/// let stack = MemoryStack::new(1024);
/// let frame = stack.push_frame();
/// let extent = Extent2d::calloc_in(&frame).unwrap();
/// extent.set_width(640).set_height(480);
/// assert_eq!(extent.width(), 640);
/// assert_eq!(Extent2d::layout().size(), 8);
/// ```
///
/// # Panics
///
/// Using the type panics if the field list has no valid layout.
///
/// [`NativeValue`]: crate::NativeValue
/// [`StructHandle`]: crate::StructHandle
/// [`NativeStruct`]: crate::NativeStruct
#[macro_export]
macro_rules! native_struct {
    (
        $(#[$attr:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_attr:meta])*
                $getter:ident / $setter:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$attr])*
        #[derive(Clone, Copy)]
        $vis struct $name<'a>($crate::StructHandle<'a>);

        const _: () = {
            #[allow(non_camel_case_types)]
            enum Field {
                $($getter),*
            }

            impl<'a> $crate::NativeStruct<'a> for $name<'a> {
                fn layout() -> &'static $crate::StructLayout {
                    static LAYOUT: std::sync::OnceLock<$crate::StructLayout> =
                        std::sync::OnceLock::new();
                    LAYOUT.get_or_init(|| {
                        match $crate::compute_layout(&[
                            $(<$ty as $crate::NativeValue>::FIELD),*
                        ]) {
                            Ok(layout) => layout,
                            Err(err) => panic!("invalid layout for {}: {err}", stringify!($name)),
                        }
                    })
                }

                fn wrap(handle: $crate::StructHandle<'a>) -> Self {
                    assert!(
                        handle.len() >= <Self as $crate::NativeStruct<'a>>::layout().size(),
                        "handle too small for {}",
                        stringify!($name)
                    );
                    Self(handle)
                }

                #[inline(always)]
                fn handle(&self) -> &$crate::StructHandle<'a> {
                    &self.0
                }
            }

            #[allow(dead_code)]
            impl<'a> $name<'a> {
                $(
                    $(#[$field_attr])*
                    #[inline]
                    pub fn $getter(&self) -> $ty {
                        let layout = <Self as $crate::NativeStruct<'a>>::layout();
                        self.0.get::<$ty>(layout.offset_of(Field::$getter as usize))
                    }

                    #[inline]
                    pub fn $setter(&self, value: $ty) -> &Self {
                        let layout = <Self as $crate::NativeStruct<'a>>::layout();
                        self.0.set::<$ty>(layout.offset_of(Field::$getter as usize), value);
                        self
                    }
                )*
            }

            impl std::fmt::Debug for $name<'_> {
                fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                    f.debug_struct(stringify!($name))
                        $(.field(stringify!($getter), &self.$getter()))*
                        .finish()
                }
            }
        };
    };
}
