//! The functions that run on a coroutine's stack at its birth and death.
//!
//! The startup trampoline is the first and outermost frame of every
//! coroutine; the cleanup trampoline is executed - via one more stack
//! switch - on the coroutine's *exit destination*, because a stack cannot
//! free itself while executing on itself. Panics never cross the assembly
//! leaf: the startup trampoline converts recognized unwind tokens into the
//! in-band termination protocol and aborts on anything else.

use std::any::Any;
use std::io::Write;
use std::mem::ManuallyDrop;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::process::abort;
use std::ptr::NonNull;

use crate::continuation::{Continuation, ExitContinuation};
use crate::stack::{StackAllocError, StackAllocator};
use crate::switch::{
    SwitchPair, raw_execute_into, stack_bottom,
};
use crate::transfer::ExitUnwind;

/// Frees a coroutine stack. Runs on the destination stack and must not
/// unwind.
struct StackDeleter<S>
where
    S: StackAllocator,
{
    alloc: S,
    base: NonNull<u8>,
    size: usize,
}

impl<S> StackDeleter<S>
where
    S: StackAllocator,
{
    fn release(self) {
        // SAFETY: `base` came from `alloc.allocate(size)` and the stack has
        // been abandoned - the cleanup trampoline only runs once the
        // coroutine can never be resumed again.
        unsafe {
            self.alloc.deallocate(self.base, self.size);
        }
    }
}

/// What the dying coroutine hands to the cleanup trampoline.
struct CleanupArgs<S>
where
    S: StackAllocator,
{
    deleter: StackDeleter<S>,
    /// Panic payload to surface on the resumer, for abnormal exits.
    payload: Option<Box<dyn Any + Send>>,
}

/// What the creator hands to the startup trampoline. Lives on the creator's
/// frame only until the trampoline has moved both fields out, which happens
/// before the first switch back.
struct StartupArgs<F, S>
where
    S: StackAllocator,
{
    functor: ManuallyDrop<F>,
    cleanup: ManuallyDrop<CleanupArgs<S>>,
}

/// Allocates a stack and starts `f` on it, eagerly, until its first switch
/// back to the creator.
pub(crate) fn run_startup<A, R, F, S>(
    f: F,
    stack_size: usize,
    alloc: S,
) -> Result<Continuation<A, R>, StackAllocError>
where
    F: FnOnce(Continuation<R, A>) -> ExitContinuation,
    S: StackAllocator,
{
    let base = alloc.allocate(stack_size)?;
    let bottom = stack_bottom(base, stack_size);

    let mut args = StartupArgs {
        functor: ManuallyDrop::new(f),
        cleanup: ManuallyDrop::new(CleanupArgs {
            deleter: StackDeleter {
                alloc,
                base,
                size: stack_size,
            },
            payload: None,
        }),
    };

    // SAFETY: `bottom` is the prepared bottom of a stack we just allocated;
    // the trampoline moves `args` out before the first switch back, so the
    // record's lifetime (this frame) covers every access.
    let pair = unsafe {
        raw_execute_into(
            (&raw mut args).cast(),
            bottom,
            startup_trampoline::<A, R, F, S>,
        )
    };

    Ok(Continuation::from_incoming(pair))
}

/// First frame of every coroutine. Runs the user functor, sorts out how it
/// ended, and executes the cleanup trampoline on the exit destination.
unsafe extern "C" fn startup_trampoline<A, R, F, S>(
    parm: *mut (),
    from: *mut (),
) -> SwitchPair
where
    F: FnOnce(Continuation<R, A>) -> ExitContinuation,
    S: StackAllocator,
{
    let args = parm.cast::<StartupArgs<F, S>>();

    // Move everything off the creator's frame first: the creator resumes
    // (and its frame goes back into use) at the functor's first yield.
    // SAFETY: The creator keeps the record alive and untouched until we
    // switch back, and each field is taken exactly once.
    let functor = unsafe { ManuallyDrop::take(&mut (*args).functor) };
    // SAFETY: As above.
    let mut cleanup = unsafe { ManuallyDrop::take(&mut (*args).cleanup) };

    let caller = Continuation::<R, A>::from_incoming(SwitchPair {
        sp: from,
        parm: std::ptr::null_mut(),
    });

    let exit_to =
        match catch_unwind(AssertUnwindSafe(move || functor(caller))) {
            Ok(mut exit) => exit.pilfer().sp,
            Err(panic_payload) => {
                match panic_payload.downcast::<ExitUnwind>() {
                    Ok(token) => {
                        cleanup.payload = token.payload;
                        token.exit_to
                    }
                    Err(_) => {
                        // A foreign panic escaped the coroutine body: there
                        // is no destination to run cleanup on. Route panics
                        // through `with_escape` instead.
                        let _ = std::io::stderr().write_all(
                            b"fatal: unroutable panic escaped a coroutine \
                              body; aborting\n",
                        );
                        abort();
                    }
                }
            }
        };

    assert!(!exit_to.is_null(), "coroutine exited to a dead destination");

    let mut cleanup = ManuallyDrop::new(cleanup);

    // SAFETY: `exit_to` is a live suspended switch point; the cleanup
    // record lives on this (still allocated) stack and is moved out by the
    // cleanup trampoline before the stack is freed.
    unsafe {
        raw_execute_into(
            (&raw mut cleanup).cast(),
            exit_to,
            cleanup_trampoline::<S>,
        )
    }
    // Never reached: the stack is gone and nothing can resume it.
}

/// Last rites, performed on the destination stack: free the coroutine's
/// stack and deliver the termination pair to whoever is suspended here.
unsafe extern "C" fn cleanup_trampoline<S>(
    parm: *mut (),
    _abandoned: *mut (),
) -> SwitchPair
where
    S: StackAllocator,
{
    // SAFETY: The record lives on the dying stack, which stays allocated
    // until `release` below; reading it moves it onto this stack.
    let CleanupArgs { deleter, payload } =
        unsafe { parm.cast::<CleanupArgs<S>>().read() };

    // Must not unwind: the allocator contract forbids panicking here.
    deleter.release();

    let parm = match payload {
        Some(payload) => {
            Box::into_raw(Box::new(payload)).cast::<()>()
        }
        None => std::ptr::null_mut(),
    };

    SwitchPair::terminal(parm)
}
