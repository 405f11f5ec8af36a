use std::{alloc::Layout, cell::Cell, marker::PhantomData, ptr::NonNull};

use crate::{
    Error, NativeStruct, Result, ScratchAllocator, StructHandle, StructLayout,
    layout_from_size_align, oom,
};

/// A view of `count` contiguous structs sharing one layout.
///
/// Never owns memory, it borrows from a memory stack frame, a [`HeapBuffer`] or
/// a caller supplied container.
#[derive(Clone, Copy)]
pub struct BufferView<'a> {
    ptr: NonNull<u8>,
    stride: usize,
    count: usize,
    phantom: PhantomData<&'a [Cell<u8>]>,
}

impl<'a> BufferView<'a> {
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `stride * count` bytes for
    /// `'a`, and no Rust references to that memory may be live while the view
    /// is used.
    #[inline(always)]
    pub unsafe fn from_raw(ptr: NonNull<u8>, stride: usize, count: usize) -> BufferView<'a> {
        debug_assert!(stride.checked_mul(count).is_some());
        BufferView {
            ptr,
            stride,
            count,
            phantom: PhantomData,
        }
    }

    /// Views as many whole elements of `layout` as fit in `container`.
    ///
    /// The container's alignment isn't checked. Field accesses don't need it,
    /// but native code handed [`BufferView::as_ptr`] may, so containers passed
    /// across an FFI boundary should be aligned to `layout.align()`.
    pub fn from_container(container: &'a mut [u8], layout: &StructLayout) -> BufferView<'a> {
        let count = container.len() / layout.size();
        // SAFETY: The container is exclusively borrowed for 'a, and `count` elements
        // fit inside it.
        unsafe {
            BufferView::from_raw(
                NonNull::new_unchecked(container.as_mut_ptr()),
                layout.size(),
                count,
            )
        }
    }

    #[inline(always)]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Distance in bytes between consecutive elements.
    #[inline(always)]
    pub fn stride(&self) -> usize {
        self.stride
    }

    #[inline(always)]
    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    /// Returns a handle to the element at `index`.
    pub fn at(&self, index: usize) -> Result<StructHandle<'a>> {
        if index >= self.count {
            return Err(Error::IndexOutOfRange {
                index,
                count: self.count,
            });
        }

        // SAFETY: `index < count`, so the element lies within the view.
        unsafe {
            let ptr = NonNull::new_unchecked(self.ptr.as_ptr().add(index * self.stride));
            Ok(StructHandle::from_raw(ptr, self.stride))
        }
    }

    /// Returns a view of the elements in `start..end`, without copying.
    ///
    /// Fails with [`Error::IndexOutOfRange`] naming the offending bound if `end`
    /// is past the last element or `start` is past `end`.
    pub fn slice(&self, start: usize, end: usize) -> Result<BufferView<'a>> {
        if end > self.count {
            return Err(Error::IndexOutOfRange {
                index: end,
                count: self.count,
            });
        }

        if start > end {
            return Err(Error::IndexOutOfRange {
                index: start,
                count: self.count,
            });
        }

        // SAFETY: `start <= end <= count`, so the range lies within the view.
        unsafe {
            let ptr = NonNull::new_unchecked(self.ptr.as_ptr().add(start * self.stride));
            Ok(BufferView::from_raw(ptr, self.stride, end - start))
        }
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = StructHandle<'a>> + use<'a> {
        let view = *self;
        (0..view.count).map(move |i| unsafe {
            // SAFETY: `i < count`, so the element lies within the view.
            StructHandle::from_raw(
                NonNull::new_unchecked(view.ptr.as_ptr().add(i * view.stride)),
                view.stride,
            )
        })
    }
}

impl std::fmt::Debug for BufferView<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BufferView")
            .field("ptr", &self.ptr)
            .field("stride", &self.stride)
            .field("count", &self.count)
            .finish()
    }
}

/// An array of native structs allocated with the global allocator, freed on
/// drop.
pub struct HeapBuffer {
    ptr: NonNull<u8>,
    stride: usize,
    count: usize,
    layout: Layout,
}

// SAFETY: The allocation is exclusively owned. Views borrow it, so it can't move
// threads while a view is live.
unsafe impl Send for HeapBuffer {}

impl HeapBuffer {
    /// Allocates `count` zeroed elements of `layout`.
    pub fn calloc(layout: &StructLayout, count: usize) -> Result<HeapBuffer> {
        // SAFETY: Zeroed memory is initialized.
        unsafe { HeapBuffer::allocate(layout, count, true) }
    }

    /// Allocates `count` elements of `layout` without initializing them.
    ///
    /// # Safety
    ///
    /// Every byte must be written before it is read.
    pub unsafe fn malloc(layout: &StructLayout, count: usize) -> Result<HeapBuffer> {
        unsafe { HeapBuffer::allocate(layout, count, false) }
    }

    unsafe fn allocate(layout: &StructLayout, count: usize, zeroed: bool) -> Result<HeapBuffer> {
        let size = layout.array_size(count)?;
        // SAFETY: `array_size` checked the size against `isize::MAX`, and layout
        // alignments are powers of two.
        let alloc_layout = unsafe { layout_from_size_align(size, layout.align()) };

        let ptr = if size == 0 {
            NonNull::dangling()
        } else {
            let ptr = unsafe {
                if zeroed {
                    std::alloc::alloc_zeroed(alloc_layout)
                } else {
                    std::alloc::alloc(alloc_layout)
                }
            };
            NonNull::new(ptr).unwrap_or_else(|| oom())
        };

        Ok(HeapBuffer {
            ptr,
            stride: layout.size(),
            count,
            layout: alloc_layout,
        })
    }

    #[inline(always)]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline(always)]
    pub fn view(&self) -> BufferView<'_> {
        // SAFETY: We own `stride * count` bytes at `ptr` for as long as we're
        // borrowed.
        unsafe { BufferView::from_raw(self.ptr, self.stride, self.count) }
    }
}

impl Drop for HeapBuffer {
    fn drop(&mut self) {
        if self.layout.size() != 0 {
            unsafe { std::alloc::dealloc(self.ptr.as_ptr(), self.layout) }
        }
    }
}

/// A [`BufferView`] whose elements are a typed [`NativeStruct`].
pub struct StructBuffer<'a, T> {
    view: BufferView<'a>,
    phantom: PhantomData<fn() -> T>,
}

impl<T> Clone for StructBuffer<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for StructBuffer<'_, T> {}

impl<'a, T: NativeStruct<'a>> StructBuffer<'a, T> {
    /// # Panics
    ///
    /// Panics if the view's stride doesn't match the size of `T`.
    pub fn new(view: BufferView<'a>) -> Self {
        assert_eq!(
            view.stride(),
            T::layout().size(),
            "buffer stride doesn't match struct size"
        );
        Self {
            view,
            phantom: PhantomData,
        }
    }

    /// Allocates `count` zeroed elements from a memory stack or frame.
    pub fn calloc_in<A: ScratchAllocator + ?Sized>(alloc: &'a A, count: usize) -> Result<Self> {
        Ok(Self::new(alloc.calloc_buffer(T::layout(), count)?))
    }

    pub fn from_container(container: &'a mut [u8]) -> Self {
        Self::new(BufferView::from_container(container, T::layout()))
    }

    #[inline(always)]
    pub fn count(&self) -> usize {
        self.view.count()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    #[inline(always)]
    pub fn view(&self) -> BufferView<'a> {
        self.view
    }

    pub fn at(&self, index: usize) -> Result<T> {
        self.view.at(index).map(T::wrap)
    }

    pub fn slice(&self, start: usize, end: usize) -> Result<Self> {
        self.view.slice(start, end).map(Self::new)
    }

    pub fn iter(&self) -> impl ExactSizeIterator<Item = T> + use<'a, T> {
        self.view.iter().map(T::wrap)
    }
}
