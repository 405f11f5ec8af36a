use std::{alloc::Layout, cell::Cell, marker::PhantomData, ptr::NonNull};

use crate::{Error, NativeValue, Result, ScratchAllocator, StructLayout, oom};

/// A view of a native struct's memory.
///
/// The handle never owns memory, it borrows from a memory stack frame, a
/// [`HeapStruct`], a buffer element or a caller supplied container, and
/// cannot outlive it. Field accesses are bounds checked against the handle's
/// length.
///
/// Like a [`Cell`], the memory may be written through a shared handle, so
/// handles cannot be shared between threads.
#[derive(Clone, Copy)]
pub struct StructHandle<'a> {
    ptr: NonNull<u8>,
    len: usize,
    phantom: PhantomData<&'a [Cell<u8>]>,
}

impl<'a> StructHandle<'a> {
    /// Wraps `len` bytes at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes for `'a`, and no
    /// Rust references to that memory may be live while the handle is used.
    #[inline(always)]
    pub unsafe fn from_raw(ptr: NonNull<u8>, len: usize) -> StructHandle<'a> {
        StructHandle {
            ptr,
            len,
            phantom: PhantomData,
        }
    }

    /// As [`StructHandle::from_raw`], but returns `None` for a null address.
    ///
    /// # Safety
    ///
    /// See [`StructHandle::from_raw`].
    #[inline(always)]
    pub unsafe fn from_raw_nullable(ptr: *mut u8, len: usize) -> Option<StructHandle<'a>> {
        NonNull::new(ptr).map(|ptr| unsafe { StructHandle::from_raw(ptr, len) })
    }

    /// Places a struct of `layout` at the start of `container`.
    ///
    /// The container's alignment isn't checked. Field accesses don't need it,
    /// but native code handed [`StructHandle::as_ptr`] may, so containers passed
    /// across an FFI boundary should be aligned to `layout.align()`.
    pub fn from_container(container: &'a mut [u8], layout: &StructLayout) -> Result<Self> {
        if container.len() < layout.size() {
            return Err(Error::ContainerTooSmall {
                len: container.len(),
                required: layout.size(),
            });
        }

        // SAFETY: The container is exclusively borrowed for 'a and large enough.
        let ptr = unsafe { NonNull::new_unchecked(container.as_mut_ptr()) };
        Ok(unsafe { StructHandle::from_raw(ptr, layout.size()) })
    }

    #[inline(always)]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline(always)]
    fn check(&self, offset: usize, size: usize) {
        assert!(
            offset.checked_add(size).is_some_and(|end| end <= self.len),
            "access of {size} bytes at offset {offset} is outside struct of {} bytes",
            self.len
        );
    }

    /// Reads the value stored at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the value doesn't lie entirely within the handle.
    #[inline(always)]
    pub fn get<T: NativeValue>(&self, offset: usize) -> T {
        self.check(offset, T::SIZE);
        // SAFETY: Bounds checked above.
        unsafe { T::read_native(self.ptr.as_ptr().add(offset)) }
    }

    /// Writes `value` at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the value doesn't lie entirely within the handle.
    #[inline(always)]
    pub fn set<T: NativeValue>(&self, offset: usize, value: T) -> &Self {
        self.check(offset, T::SIZE);
        // SAFETY: Bounds checked above.
        unsafe { T::write_native(self.ptr.as_ptr().add(offset), value) }
        self
    }

    /// A handle to the struct embedded at `offset`.
    pub fn nested(&self, offset: usize, layout: &StructLayout) -> StructHandle<'a> {
        self.check(offset, layout.size());
        // SAFETY: Bounds checked above, and the nested handle borrows for the same
        // lifetime.
        unsafe {
            StructHandle::from_raw(
                NonNull::new_unchecked(self.ptr.as_ptr().add(offset)),
                layout.size(),
            )
        }
    }

    /// Copies the whole of `src` over this struct.
    ///
    /// # Panics
    ///
    /// Panics if the handles differ in length.
    pub fn copy_from(&self, src: &StructHandle<'_>) {
        assert_eq!(self.len, src.len, "struct size mismatch");
        // SAFETY: Both handles are valid for `len` bytes. They may alias.
        unsafe { std::ptr::copy(src.ptr.as_ptr(), self.ptr.as_ptr(), self.len) }
    }

    pub fn zero(&self) {
        // SAFETY: The handle is valid for `len` bytes.
        unsafe { self.ptr.as_ptr().write_bytes(0, self.len) }
    }

    /// Copies the struct's bytes out.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0; self.len];
        // SAFETY: The handle is valid for `len` bytes, and `bytes` is a fresh
        // allocation so they can't overlap.
        unsafe { std::ptr::copy_nonoverlapping(self.ptr.as_ptr(), bytes.as_mut_ptr(), self.len) }
        bytes
    }
}

impl std::fmt::Debug for StructHandle<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StructHandle")
            .field("ptr", &self.ptr)
            .field("len", &self.len)
            .finish()
    }
}

/// A native struct allocated with the global allocator, freed on drop.
pub struct HeapStruct {
    ptr: NonNull<u8>,
    layout: Layout,
}

// SAFETY: The allocation is exclusively owned. Handles borrow it, so it can't
// move threads while a handle is live.
unsafe impl Send for HeapStruct {}

impl HeapStruct {
    /// Allocates a zeroed struct.
    pub fn calloc(layout: &StructLayout) -> HeapStruct {
        let layout = layout.alloc_layout();
        // SAFETY: Struct layouts are never zero sized.
        let ptr = NonNull::new(unsafe { std::alloc::alloc_zeroed(layout) }).unwrap_or_else(|| oom());
        HeapStruct { ptr, layout }
    }

    /// Allocates a struct without initializing it.
    ///
    /// # Safety
    ///
    /// Every byte must be written before it is read.
    pub unsafe fn malloc(layout: &StructLayout) -> HeapStruct {
        let layout = layout.alloc_layout();
        // SAFETY: Struct layouts are never zero sized.
        let ptr = NonNull::new(unsafe { std::alloc::alloc(layout) }).unwrap_or_else(|| oom());
        HeapStruct { ptr, layout }
    }

    #[inline(always)]
    pub fn handle(&self) -> StructHandle<'_> {
        // SAFETY: We own `layout.size()` bytes at `ptr` for as long as we're borrowed.
        unsafe { StructHandle::from_raw(self.ptr, self.layout.size()) }
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for HeapStruct {
    fn drop(&mut self) {
        unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) }
    }
}

/// A typed view of a native struct with a layout fixed at compile time.
///
/// Usually implemented with [`native_struct!`](crate::native_struct).
pub trait NativeStruct<'a>: Sized {
    fn layout() -> &'static StructLayout;

    /// Wraps a handle to memory holding this struct.
    ///
    /// # Panics
    ///
    /// Panics if the handle is smaller than the struct.
    fn wrap(handle: StructHandle<'a>) -> Self;

    fn handle(&self) -> &StructHandle<'a>;

    /// Allocates a zeroed struct from a memory stack or frame.
    fn calloc_in<A: ScratchAllocator + ?Sized>(alloc: &'a A) -> Result<Self> {
        Ok(Self::wrap(alloc.calloc_struct(Self::layout())?))
    }

    /// # Safety
    ///
    /// The struct's memory is uninitialized. Every field must be written before
    /// it is read.
    unsafe fn malloc_in<A: ScratchAllocator + ?Sized>(alloc: &'a A) -> Result<Self> {
        Ok(Self::wrap(unsafe { alloc.malloc_struct(Self::layout())? }))
    }

    fn from_container(container: &'a mut [u8]) -> Result<Self> {
        Ok(Self::wrap(StructHandle::from_container(
            container,
            Self::layout(),
        )?))
    }

    fn calloc_heap() -> HeapStruct {
        HeapStruct::calloc(Self::layout())
    }

    /// Copies every field of `src` into this struct.
    fn copy_from(&self, src: &Self) {
        self.handle().copy_from(src.handle())
    }

    /// Address of the struct, for handing to native code.
    ///
    /// Only aligned to `layout().align()` if the backing memory is. Stack and
    /// heap allocations always are, caller supplied containers may not be.
    #[inline(always)]
    fn address(&self) -> *mut u8 {
        self.handle().as_ptr()
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::c_void;

    use super::{HeapStruct, StructHandle};
    use crate::{Error, FieldSpec, compute_layout};

    #[test]
    fn heap_struct_is_zeroed() {
        let layout = compute_layout(&[FieldSpec::primitive(4), FieldSpec::pointer()]).unwrap();
        let heap = HeapStruct::calloc(&layout);
        let handle = heap.handle();
        assert_eq!(handle.len(), layout.size());
        assert_eq!(handle.get::<i32>(layout.offset_of(0)), 0);
        assert!(handle.get::<*mut c_void>(layout.offset_of(1)).is_null());
        assert!(handle.to_bytes().iter().all(|&b| b == 0));
    }

    #[test]
    fn container_backed() {
        let layout = compute_layout(&[FieldSpec::primitive(4), FieldSpec::primitive(4)]).unwrap();

        let mut small = [0u8; 4];
        assert_eq!(
            StructHandle::from_container(&mut small, &layout).unwrap_err(),
            Error::ContainerTooSmall {
                len: 4,
                required: 8
            }
        );

        let mut bytes = [0u8; 12];
        {
            let handle = StructHandle::from_container(&mut bytes, &layout).unwrap();
            assert_eq!(handle.len(), 8);
            handle
                .set(layout.offset_of(0), 1_u32)
                .set(layout.offset_of(1), true);
        }
        assert_eq!(&bytes[0..4], &1_u32.to_ne_bytes());
        assert_eq!(&bytes[4..8], &1_u32.to_ne_bytes());
    }

    #[test]
    fn misaligned_container() {
        let layout = compute_layout(&[FieldSpec::primitive(4), FieldSpec::primitive(8)]).unwrap();
        let mut words = [0_u64; 3];
        let bytes = unsafe {
            std::slice::from_raw_parts_mut(words.as_mut_ptr().cast::<u8>().add(3), 21)
        };
        let handle = StructHandle::from_container(bytes, &layout).unwrap();
        assert_ne!(handle.as_ptr() as usize % layout.align(), 0);

        handle
            .set(layout.offset_of(0), 0x0102_0304_u32)
            .set(layout.offset_of(1), -2.0_f64);
        assert_eq!(handle.get::<u32>(layout.offset_of(0)), 0x0102_0304);
        assert_eq!(handle.get::<f64>(layout.offset_of(1)), -2.0);
        assert_eq!(
            &handle.to_bytes()[..4],
            &0x0102_0304_u32.to_ne_bytes()
        );
    }

    #[test]
    fn nullable_address() {
        assert!(unsafe { StructHandle::from_raw_nullable(std::ptr::null_mut(), 8) }.is_none());
        let mut bytes = [0u8; 8];
        assert!(unsafe { StructHandle::from_raw_nullable(bytes.as_mut_ptr(), 8) }.is_some());
    }

    #[test]
    fn copy_and_zero() {
        let layout = compute_layout(&[FieldSpec::primitive(8), FieldSpec::primitive(2)]).unwrap();
        let a = HeapStruct::calloc(&layout);
        let b = HeapStruct::calloc(&layout);
        a.handle()
            .set(layout.offset_of(0), -3.5_f64)
            .set(layout.offset_of(1), 0x1234_u16);
        b.handle().copy_from(&a.handle());
        assert_eq!(b.handle().get::<f64>(layout.offset_of(0)), -3.5);
        assert_eq!(b.handle().get::<u16>(layout.offset_of(1)), 0x1234);
        b.handle().zero();
        assert_eq!(b.handle().get::<u16>(layout.offset_of(1)), 0);
        assert_eq!(a.handle().get::<u16>(layout.offset_of(1)), 0x1234);
    }

    #[test]
    fn nested_struct() {
        let inner = compute_layout(&[FieldSpec::primitive(4).array(3)]).unwrap();
        let outer = compute_layout(&[FieldSpec::primitive(8), FieldSpec::nested(&inner)]).unwrap();
        let heap = HeapStruct::calloc(&outer);
        let nested = heap.handle().nested(outer.offset_of(1), &inner);
        nested.set(8, 9_u32);
        assert_eq!(heap.handle().get::<u32>(outer.offset_of(1) + 8), 9);
    }

    #[test]
    #[should_panic(expected = "outside struct")]
    fn out_of_bounds_field() {
        let layout = compute_layout(&[FieldSpec::primitive(4)]).unwrap();
        let heap = HeapStruct::calloc(&layout);
        heap.handle().get::<u64>(0);
    }
}
