//! Unchecked reads and writes of native values at raw addresses.
//!
//! Nothing here checks bounds. Callers establish them from a [`StructLayout`]
//! and the allocation the address came from. Values are stored in native
//! byte order, and addresses need not be aligned.
//!
//! [`StructLayout`]: crate::StructLayout

use std::ffi::c_void;

use crate::FieldSpec;

/// Width in bytes of a native pointer on this target.
pub const POINTER_SIZE: usize = std::mem::size_of::<*const c_void>();

crate::static_assert!(POINTER_SIZE == 4 || POINTER_SIZE == 8);

macro_rules! impl_access {
    ($($read:ident, $write:ident: $t:ty;)*) => {
        $(
            /// # Safety
            ///
            /// `ptr` must be valid for reads of `size_of` bytes.
            #[inline(always)]
            pub unsafe fn $read(ptr: *const u8) -> $t {
                unsafe { std::ptr::read_unaligned(ptr as *const $t) }
            }

            /// # Safety
            ///
            /// `ptr` must be valid for writes of `size_of` bytes.
            #[inline(always)]
            pub unsafe fn $write(ptr: *mut u8, value: $t) {
                unsafe { std::ptr::write_unaligned(ptr as *mut $t, value) }
            }
        )*
    };
}

impl_access! {
    read_i8, write_i8: i8;
    read_u8, write_u8: u8;
    read_i16, write_i16: i16;
    read_u16, write_u16: u16;
    read_i32, write_i32: i32;
    read_u32, write_u32: u32;
    read_i64, write_i64: i64;
    read_u64, write_u64: u64;
    read_f32, write_f32: f32;
    read_f64, write_f64: f64;
    read_pointer, write_pointer: usize;
}

/// Reads a 32 bit boolean, where any nonzero value is true.
///
/// # Safety
///
/// `ptr` must be valid for reads of 4 bytes.
#[inline(always)]
pub unsafe fn read_bool32(ptr: *const u8) -> bool {
    unsafe { read_u32(ptr) != 0 }
}

/// Writes a 32 bit boolean as 1 or 0.
///
/// # Safety
///
/// `ptr` must be valid for writes of 4 bytes.
#[inline(always)]
pub unsafe fn write_bool32(ptr: *mut u8, value: bool) {
    unsafe { write_u32(ptr, value as u32) }
}

/// A Rust type with a fixed native representation that can be stored in a
/// struct field.
///
/// Primitives take the host C ABI's alignment, so 64 bit values may be 4 byte
/// aligned on some 32 bit targets.
///
/// `bool` is stored as a 32 bit boolean, following the Vulkan `VkBool32`
/// convention. Raw pointers are stored at the target's pointer width.
pub trait NativeValue: Copy {
    const FIELD: FieldSpec;
    /// Number of bytes occupied by the value in native memory.
    const SIZE: usize;

    /// # Safety
    ///
    /// `ptr` must be valid for reads of `Self::SIZE` bytes.
    unsafe fn read_native(ptr: *const u8) -> Self;

    /// # Safety
    ///
    /// `ptr` must be valid for writes of `Self::SIZE` bytes.
    unsafe fn write_native(ptr: *mut u8, value: Self);
}

macro_rules! impl_native_value {
    ($($t:ty => $read:ident, $write:ident;)*) => {
        $(
            impl NativeValue for $t {
                const FIELD: FieldSpec =
                    FieldSpec::new(std::mem::size_of::<$t>(), std::mem::align_of::<$t>());
                const SIZE: usize = std::mem::size_of::<$t>();

                #[inline(always)]
                unsafe fn read_native(ptr: *const u8) -> Self {
                    unsafe { $read(ptr) }
                }

                #[inline(always)]
                unsafe fn write_native(ptr: *mut u8, value: Self) {
                    unsafe { $write(ptr, value) }
                }
            }
        )*
    };
}

impl_native_value! {
    i8 => read_i8, write_i8;
    u8 => read_u8, write_u8;
    i16 => read_i16, write_i16;
    u16 => read_u16, write_u16;
    i32 => read_i32, write_i32;
    u32 => read_u32, write_u32;
    i64 => read_i64, write_i64;
    u64 => read_u64, write_u64;
    f32 => read_f32, write_f32;
    f64 => read_f64, write_f64;
}

impl NativeValue for bool {
    const FIELD: FieldSpec = FieldSpec::primitive(4);
    const SIZE: usize = 4;

    #[inline(always)]
    unsafe fn read_native(ptr: *const u8) -> Self {
        unsafe { read_bool32(ptr) }
    }

    #[inline(always)]
    unsafe fn write_native(ptr: *mut u8, value: Self) {
        unsafe { write_bool32(ptr, value) }
    }
}

impl NativeValue for *mut c_void {
    const FIELD: FieldSpec = FieldSpec::pointer();
    const SIZE: usize = POINTER_SIZE;

    #[inline(always)]
    unsafe fn read_native(ptr: *const u8) -> Self {
        unsafe { read_pointer(ptr) as *mut c_void }
    }

    #[inline(always)]
    unsafe fn write_native(ptr: *mut u8, value: Self) {
        unsafe { write_pointer(ptr, value as usize) }
    }
}

impl NativeValue for *const c_void {
    const FIELD: FieldSpec = FieldSpec::pointer();
    const SIZE: usize = POINTER_SIZE;

    #[inline(always)]
    unsafe fn read_native(ptr: *const u8) -> Self {
        unsafe { read_pointer(ptr) as *const c_void }
    }

    #[inline(always)]
    unsafe fn write_native(ptr: *mut u8, value: Self) {
        unsafe { write_pointer(ptr, value as usize) }
    }
}
