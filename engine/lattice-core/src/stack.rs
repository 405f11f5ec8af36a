use std::{
    cell::{Cell, RefCell},
    ptr::NonNull,
};

use crate::{
    BufferView, Error, Result, StackConfig, StructHandle, StructLayout, checked_align_up,
    layout_from_size_align, oom,
};

/// Alignment of the stack's backing allocation.
const STACK_ALIGN: usize = 16;

/// Something that hands out scratch memory released in bulk, rather than per
/// allocation.
pub trait ScratchAllocator {
    /// Bump allocates `size` bytes aligned to `align`.
    ///
    /// The returned memory is uninitialized.
    ///
    /// # Panics
    ///
    /// Panics if `align` is not a power of two.
    fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>>;

    /// As [`ScratchAllocator::allocate`], but the memory is zeroed.
    fn allocate_zeroed(&self, size: usize, align: usize) -> Result<NonNull<u8>> {
        let ptr = self.allocate(size, align)?;
        // SAFETY: We just allocated `size` bytes at `ptr`.
        unsafe { ptr.as_ptr().write_bytes(0, size) };
        Ok(ptr)
    }

    fn calloc_struct(&self, layout: &StructLayout) -> Result<StructHandle<'_>> {
        let ptr = self.allocate_zeroed(layout.size(), layout.align())?;
        // SAFETY: The allocation is `layout.size()` bytes, initialized, and lives as
        // long as the borrow of the allocator.
        Ok(unsafe { StructHandle::from_raw(ptr, layout.size()) })
    }

    /// # Safety
    ///
    /// The struct's memory is uninitialized. Every byte must be written before it
    /// is read.
    unsafe fn malloc_struct(&self, layout: &StructLayout) -> Result<StructHandle<'_>> {
        let ptr = self.allocate(layout.size(), layout.align())?;
        Ok(unsafe { StructHandle::from_raw(ptr, layout.size()) })
    }

    fn calloc_buffer(&self, layout: &StructLayout, count: usize) -> Result<BufferView<'_>> {
        let size = layout.array_size(count)?;
        let ptr = self.allocate_zeroed(size, layout.align())?;
        // SAFETY: The allocation holds `count` initialized elements of `layout`.
        Ok(unsafe { BufferView::from_raw(ptr, layout.size(), count) })
    }

    /// # Safety
    ///
    /// The buffer's memory is uninitialized. Every byte must be written before it
    /// is read.
    unsafe fn malloc_buffer(&self, layout: &StructLayout, count: usize) -> Result<BufferView<'_>> {
        let size = layout.array_size(count)?;
        let ptr = self.allocate(size, layout.align())?;
        Ok(unsafe { BufferView::from_raw(ptr, layout.size(), count) })
    }
}

/// A fixed capacity bump allocator with nested frames.
///
/// Memory is only ever released by popping a frame, which rewinds the stack to
/// where it was when the frame was pushed, or by [`MemoryStack::reset`]. The
/// stack never grows, so addresses stay valid until their frame is popped.
///
/// Allocating from the stack itself is only possible while no frames are
/// pushed. Once a frame is pushed, only the innermost frame may allocate or be
/// popped, violating that is a bug in the caller and panics.
///
/// A memory stack belongs to a single thread, it can be moved between
/// threads but not shared.
pub struct MemoryStack {
    base: NonNull<u8>,
    capacity: usize,
    offset: Cell<usize>,
    /// Offsets saved by each pushed frame, innermost last.
    frames: RefCell<Vec<usize>>,
}

// SAFETY: The stack exclusively owns its backing memory. It is `!Sync` via
// `Cell`, so it can only be used from one thread at a time.
unsafe impl Send for MemoryStack {}

impl MemoryStack {
    /// # Panics
    ///
    /// Panics if `capacity` exceeds `isize::MAX` once rounded to the stack
    /// alignment, and on allocation failure.
    pub fn new(capacity: usize) -> MemoryStack {
        assert!(
            capacity <= isize::MAX as usize - STACK_ALIGN,
            "memory stack capacity too large"
        );

        // SAFETY: Checked above, and `STACK_ALIGN` is a power of two.
        let layout = unsafe { layout_from_size_align(capacity.max(1), STACK_ALIGN) };
        // SAFETY: `layout` is never zero sized.
        let base = NonNull::new(unsafe { std::alloc::alloc(layout) }).unwrap_or_else(|| oom());

        log::debug!("created memory stack with capacity {capacity}");

        MemoryStack {
            base,
            capacity,
            offset: Cell::new(0),
            frames: RefCell::new(Vec::new()),
        }
    }

    pub fn with_config(config: &StackConfig) -> MemoryStack {
        MemoryStack::new(config.capacity)
    }

    #[inline(always)]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Current allocation offset from the start of the stack, in bytes.
    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.offset.get()
    }

    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.capacity - self.offset.get()
    }

    /// Number of frames currently pushed.
    #[inline(always)]
    pub fn frame_depth(&self) -> usize {
        self.frames.borrow().len()
    }

    /// Push a new innermost frame, saving the current offset.
    ///
    /// The frame rewinds the stack when dropped.
    pub fn push_frame(&self) -> StackFrame<'_> {
        let mut frames = self.frames.borrow_mut();
        frames.push(self.offset.get());
        StackFrame {
            stack: self,
            depth: frames.len(),
        }
    }

    /// Runs `f` inside a new frame, which is popped on all exit paths.
    pub fn with_frame<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&StackFrame<'_>) -> R,
    {
        let frame = self.push_frame();
        f(&frame)
    }

    /// Rewind the stack to empty.
    ///
    /// Requires exclusive access, so there can be no outstanding frames or
    /// allocations.
    pub fn reset(&mut self) {
        self.frames.get_mut().clear();
        self.offset.set(0);
    }

    /// As [`MemoryStack::reset`], for owners that can prove no frames or
    /// allocations are borrowed without holding the stack mutably.
    pub(crate) fn rewind(&self) {
        self.frames.borrow_mut().clear();
        self.offset.set(0);
    }

    fn pop_frame(&self, depth: usize) {
        let mut frames = self.frames.borrow_mut();
        assert_eq!(
            frames.len(),
            depth,
            "memory stack frames must be popped innermost first"
        );
        if let Some(offset) = frames.pop() {
            self.offset.set(offset);
        }
    }

    fn allocate_at_depth(&self, depth: usize, size: usize, align: usize) -> Result<NonNull<u8>> {
        assert!(align.is_power_of_two(), "alignment must be a power of two");
        assert_eq!(
            self.frame_depth(),
            depth,
            "memory stack allocations must come from the innermost frame"
        );

        let offset = self.offset.get();

        // Align the address rather than the offset, so alignments larger than the
        // base alignment are honored too.
        let base = self.base.as_ptr() as usize;
        let start = checked_align_up(base + offset, align).map(|addr| addr - base);

        match start.and_then(|start| Some((start, start.checked_add(size)?))) {
            Some((start, end)) if end <= self.capacity => {
                self.offset.set(end);
                // SAFETY: `start <= end <= capacity`, so we're within the allocation.
                Ok(unsafe { NonNull::new_unchecked(self.base.as_ptr().add(start)) })
            }
            _ => {
                log::debug!(
                    "memory stack exhausted: requested {size} bytes aligned to {align} at offset {offset} of {}",
                    self.capacity
                );
                Err(Error::OutOfArenaMemory {
                    requested: size,
                    align,
                    available: self.capacity - offset,
                })
            }
        }
    }
}

impl ScratchAllocator for MemoryStack {
    #[inline]
    fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>> {
        self.allocate_at_depth(0, size, align)
    }
}

impl Drop for MemoryStack {
    fn drop(&mut self) {
        unsafe {
            let layout = layout_from_size_align(self.capacity.max(1), STACK_ALIGN);
            std::alloc::dealloc(self.base.as_ptr(), layout);
        }
    }
}

/// A scope on a [`MemoryStack`].
///
/// Everything allocated through the frame is released when it's popped or
/// dropped. Allocations borrow the frame, so they cannot outlive it.
pub struct StackFrame<'a> {
    stack: &'a MemoryStack,
    depth: usize,
}

impl StackFrame<'_> {
    /// Push a nested frame. The nested frame must be popped before this frame
    /// can allocate again.
    pub fn push_frame(&self) -> StackFrame<'_> {
        self.stack.push_frame()
    }

    pub fn with_frame<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&StackFrame<'_>) -> R,
    {
        let frame = self.push_frame();
        f(&frame)
    }

    /// Nesting depth of this frame, starting at 1 for the outermost frame.
    #[inline(always)]
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Pop the frame, rewinding the stack to the offset saved when it was pushed.
    pub fn pop(self) {}
}

impl ScratchAllocator for StackFrame<'_> {
    #[inline]
    fn allocate(&self, size: usize, align: usize) -> Result<NonNull<u8>> {
        self.stack.allocate_at_depth(self.depth, size, align)
    }
}

impl Drop for StackFrame<'_> {
    fn drop(&mut self) {
        self.stack.pop_frame(self.depth)
    }
}
