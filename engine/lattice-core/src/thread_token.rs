use std::{cell::OnceCell, sync::Mutex};

use crate::{MemoryStack, PhantomUnsend, StackConfig};

/// A thread's claim on one slot of a [`PerThreadStacks`] registry.
///
/// Tokens can't be cloned, sent or shared between threads, so a slot is only
/// ever used from the thread holding its token. Dropping the token rewinds the
/// slot's stack and returns the slot to the registry.
pub struct ThreadToken<'a> {
    registry: &'a PerThreadStacks,
    index: usize,
    phantom: PhantomUnsend,
}

impl ThreadToken<'_> {
    #[inline(always)]
    pub fn index(&self) -> usize {
        self.index
    }
}

impl Drop for ThreadToken<'_> {
    fn drop(&mut self) {
        self.registry.release(self.index)
    }
}

/// One [`MemoryStack`] per thread, created the first time a thread asks for it.
///
/// The registry is an ordinary value to be passed to whatever needs scratch
/// memory, rather than hidden global state. Threads [`register`] for a slot and
/// give it back when their token drops, so `max_threads` bounds the number of
/// threads holding a token at once, not the number of threads ever seen.
/// Stacks are kept for reuse by later threads and released when the registry
/// is dropped.
///
/// [`register`]: PerThreadStacks::register
pub struct PerThreadStacks {
    config: StackConfig,
    slots: Box<[OnceCell<MemoryStack>]>,
    /// Unclaimed slot indices, lowest last.
    free: Mutex<Vec<usize>>,
}

// SAFETY: A slot is only touched through the `ThreadToken` that claimed it, and
// tokens never leave the thread that created them. Slots change hands through
// the `free` mutex, which orders the old owner's accesses before the new one's.
unsafe impl Sync for PerThreadStacks {}

impl PerThreadStacks {
    pub fn new(config: StackConfig) -> Self {
        Self {
            config,
            slots: (0..config.max_threads).map(|_| OnceCell::new()).collect(),
            free: Mutex::new((0..config.max_threads).rev().collect()),
        }
    }

    #[inline(always)]
    pub fn config(&self) -> &StackConfig {
        &self.config
    }

    /// Claims a free slot for the calling thread.
    ///
    /// # Panics
    ///
    /// Panics if `max_threads` tokens are already live.
    pub fn register(&self) -> ThreadToken<'_> {
        let index = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .pop();
        let Some(index) = index else {
            panic!("number of tokens exceeds max concurrency")
        };
        ThreadToken {
            registry: self,
            index,
            phantom: PhantomUnsend {},
        }
    }

    fn release(&self, index: usize) {
        if let Some(stack) = self.slots[index].get() {
            // No borrows of the stack can outlive the token.
            stack.rewind();
        }
        self.free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(index);
    }

    fn slot(&self, thread_token: &ThreadToken<'_>) -> &OnceCell<MemoryStack> {
        assert!(
            std::ptr::eq(thread_token.registry, self),
            "thread token belongs to another registry"
        );
        &self.slots[thread_token.index]
    }

    /// Returns the calling thread's stack, creating it on first use.
    ///
    /// # Panics
    ///
    /// Panics if the token was registered with a different registry.
    pub fn get<'a>(&'a self, thread_token: &'a ThreadToken<'_>) -> &'a MemoryStack {
        self.slot(thread_token).get_or_init(|| {
            log::debug!("creating memory stack for thread slot {}", thread_token.index);
            MemoryStack::with_config(&self.config)
        })
    }

    pub fn is_initialized(&self, thread_token: &ThreadToken<'_>) -> bool {
        self.slot(thread_token).get().is_some()
    }

    /// Number of slots currently claimed by a token.
    pub fn live_tokens(&self) -> usize {
        let free = self
            .free
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len();
        self.slots.len() - free
    }

    /// Resets every stack that has been created.
    pub fn reset_all(&mut self) {
        for stack in self.slots.iter_mut().filter_map(OnceCell::get_mut) {
            stack.reset();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use super::PerThreadStacks;
    use crate::{MemoryStack, ScratchAllocator, StackConfig};

    fn config(max_threads: usize) -> StackConfig {
        StackConfig {
            capacity: 1024,
            max_threads,
        }
    }

    #[test]
    fn lazily_created() {
        let stacks = PerThreadStacks::new(config(4));
        let token = stacks.register();
        assert!(!stacks.is_initialized(&token));

        let stack = stacks.get(&token);
        assert_eq!(stack.capacity(), 1024);
        assert!(stacks.is_initialized(&token));
        assert!(std::ptr::eq(stack, stacks.get(&token)));
    }

    #[test]
    fn one_stack_per_thread() {
        let stacks = PerThreadStacks::new(config(4));
        let barrier = Barrier::new(4);

        let addresses = std::thread::scope(|scope| {
            let handles = (0..4)
                .map(|_| {
                    scope.spawn(|| {
                        let token = stacks.register();
                        let stack = stacks.get(&token);
                        stack.with_frame(|frame| frame.allocate(64, 8).unwrap());
                        assert_eq!(stack.offset(), 0);
                        // Hold every token at once so no slot is reused.
                        barrier.wait();
                        stack as *const MemoryStack as usize
                    })
                })
                .collect::<Vec<_>>();
            handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect::<Vec<_>>()
        });

        for (i, a) in addresses.iter().enumerate() {
            for b in &addresses[i + 1..] {
                assert_ne!(a, b);
            }
        }
        assert_eq!(stacks.live_tokens(), 0);
    }

    #[test]
    fn slots_reused_after_threads_exit() {
        let stacks = PerThreadStacks::new(config(2));

        for _ in 0..16 {
            std::thread::scope(|scope| {
                scope.spawn(|| {
                    let token = stacks.register();
                    stacks.get(&token).allocate(100, 4).unwrap();
                });
            });
        }

        for _ in 0..16 {
            let token = stacks.register();
            stacks.get(&token).allocate(8, 8).unwrap();
        }

        assert_eq!(stacks.live_tokens(), 0);
        let a = stacks.register();
        let b = stacks.register();
        assert_ne!(a.index(), b.index());
        assert_eq!(stacks.live_tokens(), 2);
    }

    #[test]
    fn dropping_token_rewinds_stack() {
        let stacks = PerThreadStacks::new(config(1));

        let token = stacks.register();
        let stack = stacks.get(&token);
        stack.allocate(100, 4).unwrap();
        std::mem::forget(stack.push_frame());
        let index = token.index();
        drop(token);

        let token = stacks.register();
        assert_eq!(token.index(), index);
        assert!(stacks.is_initialized(&token));
        let stack = stacks.get(&token);
        assert_eq!(stack.offset(), 0);
        assert_eq!(stack.frame_depth(), 0);
    }

    #[test]
    fn reset_all() {
        let mut stacks = PerThreadStacks::new(config(4));
        {
            let token = stacks.register();
            let stack = stacks.get(&token);
            stack.push_frame().allocate(16, 4).unwrap();
            std::mem::forget(stack.push_frame());
            assert_eq!(stack.frame_depth(), 1);
        }
        stacks.reset_all();
        let token = stacks.register();
        assert_eq!(stacks.get(&token).frame_depth(), 0);
    }

    #[test]
    #[should_panic(expected = "max concurrency")]
    fn too_many_tokens() {
        let stacks = PerThreadStacks::new(config(1));
        let _token = stacks.register();
        stacks.register();
    }

    #[test]
    #[should_panic(expected = "another registry")]
    fn token_from_other_registry() {
        let a = PerThreadStacks::new(config(1));
        let b = PerThreadStacks::new(config(1));
        let token = a.register();
        b.get(&token);
    }
}
