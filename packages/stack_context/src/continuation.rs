use std::any::Any;
use std::marker::PhantomData;
use std::mem;
use std::panic::resume_unwind;
use std::ptr;

use crate::switch::{SwitchPair, raw_stack_switch};
use crate::transfer::{
    DataTransfer, ExitRequest, ExitUnwind, TransferKind, kind_of,
};

/// A suspended execution on its own stack, resumable with typed arguments.
///
/// `A` is what a resume carries *into* the continuation (use a tuple for
/// several arguments, `()` for none); `R` is what comes back. Inside the
/// coroutine the roles are mirrored: the body receives the caller as a
/// `Continuation<R, A>`.
///
/// The wrapper is move-only and single-threaded: it may only be resumed from
/// the thread that currently holds it. Dropping a live continuation is a
/// contract violation (checked in debug builds) - drive it to termination
/// first, typically with [`signal_exit`][crate::signal_exit].
#[derive(Debug)]
pub struct Continuation<A, R> {
    pair: SwitchPair,
    _signature: PhantomData<fn(A) -> R>,
}

impl<A, R> Continuation<A, R> {
    /// Adopts an incoming switch pair, resolving the in-band protocol.
    ///
    /// * A terminated peer carrying a panic payload re-raises it here, on
    ///   the resumer, now that the peer's stack has been freed.
    /// * An exit request re-raises as an [`ExitUnwind`] panic: we are inside
    ///   the coroutine being told to die, and the panic runs its destructors
    ///   on the way down to the startup trampoline.
    /// * Anything else is stored for [`take_result`][Self::take_result].
    pub(crate) fn from_incoming(pair: SwitchPair) -> Self {
        if pair.sp.is_null() {
            if !pair.parm.is_null() {
                // SAFETY: A terminal pair's parameter is always the boxed
                // payload produced by the cleanup trampoline.
                let payload = unsafe {
                    Box::from_raw(
                        pair.parm.cast::<Box<dyn Any + Send>>(),
                    )
                };
                resume_unwind(*payload);
            }

            return Self {
                pair: SwitchPair::empty(),
                _signature: PhantomData,
            };
        }

        // SAFETY: A live non-null parameter points at a transfer record in
        // the (suspended, live) sender's frame.
        if !pair.parm.is_null()
            && unsafe { kind_of(pair.parm) } == TransferKind::ExitRequest
        {
            // SAFETY: Just checked the kind.
            let payload = unsafe { ExitRequest::take_payload(pair.parm) };
            // resume_unwind rather than panic_any: this is protocol, not a
            // failure, and must not trip the panic hook.
            resume_unwind(Box::new(ExitUnwind {
                exit_to: pair.sp,
                payload,
            }));
        }

        Self {
            pair,
            _signature: PhantomData,
        }
    }

    /// Wraps a raw switch pair.
    ///
    /// # Safety
    ///
    /// `pair` must have been produced by [`pilfer`][Self::pilfer] on a
    /// continuation of the same `A`/`R` signature (or be a terminal pair),
    /// and must not have been resumed since.
    #[must_use]
    pub unsafe fn from_raw(pair: SwitchPair) -> Self {
        Self {
            pair,
            _signature: PhantomData,
        }
    }

    /// Resumes the continuation, passing `args` across the switch.
    ///
    /// Returns once the continuation suspends again (check
    /// [`has_data`][Self::has_data]) or terminates (check
    /// [`is_terminated`][Self::is_terminated]). If it terminated by panic,
    /// the payload is re-raised here after its stack has been freed.
    ///
    /// A pending result that was never [taken][Self::take_result] is dropped
    /// before the switch. Conversely, if the peer terminates without
    /// consuming `args`, the argument value leaks (its drop never runs) -
    /// exit before resuming coroutines that hold resources, not the other
    /// way around.
    ///
    /// # Panics
    ///
    /// Panics if the continuation has terminated.
    pub fn resume(&mut self, args: A) -> &mut Self {
        assert!(
            !self.is_terminated(),
            "resumed a terminated continuation"
        );

        let target = mem::replace(&mut self.pair, SwitchPair::empty());

        if !target.parm.is_null() {
            // SAFETY: Pending incoming data is always a live, untaken
            // `DataTransfer<R>` in the peer's suspended frame.
            unsafe {
                DataTransfer::<R>::drop_untaken(target.parm);
            }
        }

        let mut transfer = DataTransfer::new(args);

        // SAFETY: The handle owns this suspended switch point; the transfer
        // record lives in our frame, which stays alive (suspended inside
        // this very call) until the peer disposes of it.
        let pair =
            unsafe { raw_stack_switch(target.sp, transfer.as_parm()) };

        *self = Self::from_incoming(pair);
        self
    }

    /// Moves out the result delivered by the last switch.
    ///
    /// The three marshalling shapes all go through here: a single value
    /// moves out, a reference (`R = &T`) copies the reference, and a tuple
    /// moves as a whole.
    ///
    /// # Panics
    ///
    /// Panics if there is no pending result (see [`has_data`][Self::has_data]);
    /// each delivery can be taken at most once.
    pub fn take_result(&mut self) -> R {
        assert!(self.has_data(), "no pending result to take");

        let parm = mem::replace(&mut self.pair.parm, ptr::null_mut());

        // SAFETY: A stored pending parameter is a live, untaken
        // `DataTransfer<R>`; nulling it above makes this the only take.
        unsafe { DataTransfer::take(parm) }
    }

    /// Whether the last switch delivered a result that has not been taken.
    #[must_use]
    pub fn has_data(&self) -> bool {
        !self.pair.parm.is_null()
    }

    /// Whether the continuation has run to termination.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.pair.sp.is_null()
    }

    /// Moves out the raw switch pair, leaving the continuation terminated.
    #[must_use]
    pub fn pilfer(&mut self) -> SwitchPair {
        mem::replace(&mut self.pair, SwitchPair::empty())
    }
}

impl<A, R> Drop for Continuation<A, R> {
    fn drop(&mut self) {
        debug_assert!(
            self.is_terminated(),
            "dropped a live continuation; signal exit and resume it to \
             termination first"
        );
    }
}

/// Type-erased destination for a finishing coroutine.
///
/// A coroutine body returns one of these - usually converted from the last
/// caller continuation it held - naming the stack on which the cleanup
/// trampoline will run.
#[derive(Debug)]
pub struct ExitContinuation {
    pair: SwitchPair,
}

impl ExitContinuation {
    /// Whether the destination has already been consumed.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.pair.sp.is_null()
    }

    /// Moves out the raw switch pair, leaving this handle terminated.
    #[must_use]
    pub(crate) fn pilfer(&mut self) -> SwitchPair {
        mem::replace(&mut self.pair, SwitchPair::empty())
    }
}

impl<A, R> From<Continuation<A, R>> for ExitContinuation {
    fn from(mut continuation: Continuation<A, R>) -> Self {
        Self {
            pair: continuation.pilfer(),
        }
    }
}

impl Drop for ExitContinuation {
    fn drop(&mut self) {
        debug_assert!(
            self.is_terminated(),
            "dropped an unconsumed exit destination"
        );
    }
}
