use std::error::Error;
use std::fmt::{self, Display};
use std::ptr::{self, NonNull};

/// Default coroutine stack size: 1 MiB.
pub const DEFAULT_STACK_SIZE: usize = 1024 * 1024;

/// Stack memory could not be allocated.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct StackAllocError;

impl Error for StackAllocError {}

impl Display for StackAllocError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "coroutine stack allocation failed")
    }
}

/// Provides and reclaims coroutine stacks.
///
/// The allocator travels with the stack it produced: it is moved into the
/// coroutine's cleanup arguments and invoked on the destination stack once
/// the coroutine has terminated, which is the only point at which freeing
/// the coroutine's own stack is possible.
pub trait StackAllocator {
    /// Allocates `size` bytes aligned to at least 16.
    fn allocate(&self, size: usize) -> Result<NonNull<u8>, StackAllocError>;

    /// Releases a block previously returned by [`allocate`][Self::allocate]
    /// with the same `size`.
    ///
    /// Must not panic: this runs during coroutine teardown, after the stack
    /// being freed has already been abandoned.
    ///
    /// # Safety
    ///
    /// `base` must come from `self.allocate(size)` and must not be used
    /// afterwards; nothing may be executing on the contained stack.
    unsafe fn deallocate(&self, base: NonNull<u8>, size: usize);
}

/// The stock allocator: `posix_memalign` / `free`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultStackAllocator;

impl StackAllocator for DefaultStackAllocator {
    fn allocate(&self, size: usize) -> Result<NonNull<u8>, StackAllocError> {
        let mut base = ptr::null_mut::<libc::c_void>();

        // SAFETY: Plain libc call with a valid out-pointer; alignment is a
        // power of two and a multiple of the pointer size.
        let rc = unsafe { libc::posix_memalign(&raw mut base, 16, size) };

        if rc == 0 {
            NonNull::new(base.cast::<u8>()).ok_or(StackAllocError)
        } else {
            Err(StackAllocError)
        }
    }

    unsafe fn deallocate(&self, base: NonNull<u8>, _size: usize) {
        // SAFETY: The pointer came from posix_memalign per the contract.
        unsafe {
            libc::free(base.as_ptr().cast::<libc::c_void>());
        }
    }
}
