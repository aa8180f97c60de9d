//! Fiber stack allocation
//!
//! Each fiber owns one mapping: a PROT_NONE guard page at the low end
//! followed by the usable stack. Stacks grow down, so an overflow runs
//! into the guard and faults instead of corrupting a neighbour.

cfg_if::cfg_if! {
    if #[cfg(unix)] {
        mod unix;
        pub use unix::page_size;
    } else {
        compile_error!("fiber stacks need mmap");
    }
}

use std::ptr::NonNull;

/// An owned, guard-protected fiber stack
pub struct Stack {
    /// Start of the mapping (guard page)
    base: NonNull<u8>,
    /// Mapping length including the guard
    len: usize,
    /// Usable bytes above the guard
    usable: usize,
}

// The mapping is plain memory owned by this value.
unsafe impl Send for Stack {}
unsafe impl Sync for Stack {}

impl Stack {
    /// Highest address of the stack; initial stack pointer is derived from it
    #[inline]
    pub fn top(&self) -> *mut u8 {
        // base + len is one past the mapping, which is what the ABI wants
        unsafe { self.base.as_ptr().add(self.len) }
    }

    /// Lowest usable address (just above the guard)
    #[inline]
    pub fn bottom(&self) -> *mut u8 {
        unsafe { self.base.as_ptr().add(self.len - self.usable) }
    }

    /// Usable size in bytes (page-rounded request)
    #[inline]
    pub fn size(&self) -> usize {
        self.usable
    }
}

impl std::fmt::Debug for Stack {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stack")
            .field("bottom", &self.bottom())
            .field("top", &self.top())
            .field("size", &self.usable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stack_geometry() {
        let page = page_size();
        let stack = Stack::new(64 * 1024 + 1).unwrap();
        assert_eq!(stack.size() % page, 0);
        assert!(stack.size() >= 64 * 1024 + 1);
        assert_eq!(stack.top() as usize - stack.bottom() as usize, stack.size());
        assert_eq!(stack.top() as usize % page, 0);
    }

    #[test]
    fn test_stack_is_writable() {
        let stack = Stack::new(16 * 1024).unwrap();
        unsafe {
            // Touch the first and last usable bytes
            stack.bottom().write(0xAB);
            stack.top().sub(1).write(0xCD);
            assert_eq!(stack.bottom().read(), 0xAB);
            assert_eq!(stack.top().sub(1).read(), 0xCD);
        }
    }
}
