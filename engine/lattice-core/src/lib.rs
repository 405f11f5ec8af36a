mod access;
mod buffer;
mod config;
mod error;
mod handle;
mod layout;
mod schema;
mod stack;
mod thread_token;

pub use access::{
    NativeValue, POINTER_SIZE, read_bool32, read_f32, read_f64, read_i8, read_i16, read_i32,
    read_i64, read_pointer, read_u8, read_u16, read_u32, read_u64, write_bool32, write_f32,
    write_f64, write_i8, write_i16, write_i32, write_i64, write_pointer, write_u8, write_u16,
    write_u32, write_u64,
};
pub use buffer::{BufferView, HeapBuffer, StructBuffer};
pub use config::StackConfig;
pub use error::{Error, LayoutFault, Result};
pub use handle::{HeapStruct, NativeStruct, StructHandle};
pub use layout::{FieldSpec, LayoutCache, StructLayout, compute_layout, compute_layout_for_target};
pub use stack::{MemoryStack, ScratchAllocator, StackFrame};
pub use thread_token::{PerThreadStacks, ThreadToken};

#[macro_export]
macro_rules! static_assert {
    ($cond:expr) => {
        $crate::static_assert!($cond, concat!("assertion failed: ", stringify!($cond)));
    };
    ($cond:expr, $($t:tt)+) => {
        const _: () = {
            if !$cond {
                core::panic!($($t)+)
            }
        };
    };
}

/// Negative traits aren't stable yet, so use a dummy PhantomData marker to implement !Send
pub type PhantomUnsend = std::marker::PhantomData<*mut ()>;

#[inline(never)]
#[cold]
pub fn oom() -> ! {
    panic!("out of memory")
}

/// Rounds `x` up to a multiple of `align`, or `None` if that overflows.
#[inline(always)]
pub(crate) fn checked_align_up(x: usize, align: usize) -> Option<usize> {
    debug_assert!(align.is_power_of_two());
    let mask = align - 1;
    x.checked_add(mask).map(|x| x & !mask)
}

/// # Safety
///
/// `size` and `align` must satisfy the requirements of [`std::alloc::Layout`].
#[inline(always)]
pub(crate) unsafe fn layout_from_size_align(size: usize, align: usize) -> std::alloc::Layout {
    unsafe {
        if cfg!(debug_assertions) {
            std::alloc::Layout::from_size_align(size, align).unwrap()
        } else {
            std::alloc::Layout::from_size_align_unchecked(size, align)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::checked_align_up;

    #[test]
    fn align_up() {
        assert_eq!(checked_align_up(0, 8), Some(0));
        assert_eq!(checked_align_up(1, 8), Some(8));
        assert_eq!(checked_align_up(8, 8), Some(8));
        assert_eq!(checked_align_up(13, 4), Some(16));
        assert_eq!(checked_align_up(13, 1), Some(13));
        assert_eq!(checked_align_up(usize::MAX - 2, 4), None);
        assert_eq!(checked_align_up(usize::MAX, 1), Some(usize::MAX));
    }
}
