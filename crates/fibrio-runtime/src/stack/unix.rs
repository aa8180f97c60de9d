//! Unix stack implementation using mmap

use std::io;
use std::ptr::{self, NonNull};
use std::sync::OnceLock;

use fibrio_core::{kerror, SchedError, SchedResult};

use super::Stack;

/// System page size, cached
pub fn page_size() -> usize {
    static PAGE: OnceLock<usize> = OnceLock::new();
    *PAGE.get_or_init(|| {
        let v = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if v > 0 {
            v as usize
        } else {
            4096
        }
    })
}

#[cfg(target_os = "linux")]
const STACK_FLAGS: libc::c_int =
    libc::MAP_PRIVATE | libc::MAP_ANONYMOUS | libc::MAP_NORESERVE | libc::MAP_STACK;

#[cfg(not(target_os = "linux"))]
const STACK_FLAGS: libc::c_int = libc::MAP_PRIVATE | libc::MAP_ANON;

impl Stack {
    /// Map a stack of at least `size` usable bytes plus one guard page
    pub fn new(size: usize) -> SchedResult<Stack> {
        let page = page_size();
        let usable = size
            .max(page)
            .checked_next_multiple_of(page)
            .ok_or_else(|| alloc_error(size, io::Error::from_raw_os_error(libc::ENOMEM)))?;
        let len = usable
            .checked_add(page)
            .ok_or_else(|| alloc_error(size, io::Error::from_raw_os_error(libc::ENOMEM)))?;

        let base = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                STACK_FLAGS,
                -1,
                0,
            )
        };
        if base == libc::MAP_FAILED {
            return Err(alloc_error(size, io::Error::last_os_error()));
        }

        // Guard page at the low end stays inaccessible
        let ret = unsafe { libc::mprotect(base, page, libc::PROT_NONE) };
        if ret != 0 {
            let err = io::Error::last_os_error();
            unsafe {
                libc::munmap(base, len);
            }
            return Err(alloc_error(size, err));
        }

        let base = NonNull::new(base as *mut u8)
            .ok_or_else(|| alloc_error(size, io::Error::from_raw_os_error(libc::ENOMEM)))?;
        Ok(Stack { base, len, usable })
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        let ret = unsafe { libc::munmap(self.base.as_ptr() as *mut libc::c_void, self.len) };
        if ret != 0 {
            kerror!(
                "munmap of fiber stack {:p} failed: {}",
                self.base.as_ptr(),
                io::Error::last_os_error()
            );
        }
    }
}

fn alloc_error(size: usize, source: io::Error) -> SchedError {
    kerror!("fiber stack allocation of {} bytes failed: {}", size, source);
    SchedError::StackAlloc { size, source }
}
