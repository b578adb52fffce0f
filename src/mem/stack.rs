//! Thread stacks.
//!
//! Stacks come from the global allocator. The lowest word of each stack
//! holds a canary that the reaper checks when the thread's storage is
//! released, so an overflow at least shows up in the log.

use alloc::alloc::{alloc, dealloc, Layout};
use core::ptr::NonNull;

/// SPARC requires doubleword-aligned stack frames.
const STACK_ALIGN: usize = 8;

const CANARY: u64 = 0x5AFE_57AC_C0DE_D00D;

/// An owned stack region.
pub struct Stack {
    /// Lowest address of the region.
    memory: NonNull<u8>,
    size: usize,
}

impl Stack {
    /// Allocate a stack of `size` bytes, rounded up to the alignment.
    ///
    /// Returns `None` when the allocator is exhausted.
    pub fn allocate(size: usize) -> Option<Stack> {
        let size = size.checked_add(STACK_ALIGN - 1)? & !(STACK_ALIGN - 1);
        let layout = Layout::from_size_align(size, STACK_ALIGN).ok()?;
        if layout.size() < core::mem::size_of::<u64>() {
            return None;
        }
        // SAFETY: the layout has a non-zero size.
        let memory = NonNull::new(unsafe { alloc(layout) })?;
        let stack = Stack { memory, size };
        stack.install_canary();
        Some(stack)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Lowest usable address.
    pub fn limit(&self) -> *const u8 {
        self.memory.as_ptr()
    }

    /// Initial stack pointer: one past the highest address, aligned down.
    pub fn base(&self) -> *mut u8 {
        // SAFETY: one-past-the-end of the allocation is a valid pointer.
        let end = unsafe { self.memory.as_ptr().add(self.size) } as usize;
        (end & !(STACK_ALIGN - 1)) as *mut u8
    }

    fn install_canary(&self) {
        // SAFETY: the region is at least 8 bytes and 8-byte aligned.
        unsafe { (self.memory.as_ptr() as *mut u64).write(CANARY) }
    }

    /// Whether the guard word at the stack limit is untouched.
    pub fn canary_intact(&self) -> bool {
        // SAFETY: see `install_canary`.
        unsafe { (self.memory.as_ptr() as *const u64).read() == CANARY }
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        if let Ok(layout) = Layout::from_size_align(self.size, STACK_ALIGN) {
            // SAFETY: allocated in `allocate` with this exact layout.
            unsafe { dealloc(self.memory.as_ptr(), layout) }
        }
    }
}

// SAFETY: a Stack is plain owned memory.
unsafe impl Send for Stack {}
unsafe impl Sync for Stack {}

impl core::fmt::Debug for Stack {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Stack")
            .field("limit", &self.limit())
            .field("size", &self.size)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allocation_is_aligned_and_guarded() {
        let stack = Stack::allocate(12 * 1024 + 3).unwrap();
        assert_eq!(stack.size() % STACK_ALIGN, 0);
        assert_eq!(stack.base() as usize % STACK_ALIGN, 0);
        assert!(stack.base() as usize > stack.limit() as usize);
        assert!(stack.canary_intact());
    }

    #[test]
    fn tiny_stacks_are_refused() {
        assert!(Stack::allocate(0).is_none());
    }

    #[test]
    fn writing_below_the_frames_breaks_the_canary() {
        let stack = Stack::allocate(1024).unwrap();
        // SAFETY: inside the allocation.
        unsafe { (stack.limit() as *mut u8).add(3).write(0xFF) };
        assert!(!stack.canary_intact());
    }
}
