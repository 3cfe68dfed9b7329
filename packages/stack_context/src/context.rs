//! Public entry points: creating coroutines, splicing work onto them and
//! signaling exits.

use std::mem::{ManuallyDrop, MaybeUninit};
use std::panic::{AssertUnwindSafe, catch_unwind, resume_unwind};
use std::ptr;

use crate::continuation::{Continuation, ExitContinuation};
use crate::stack::{
    DEFAULT_STACK_SIZE, DefaultStackAllocator, StackAllocError, StackAllocator,
};
use crate::switch::{SwitchPair, raw_execute_into, raw_stack_switch};
use crate::trampoline::run_startup;
use crate::transfer::{DataTransfer, ExitRequest, ExitUnwind};

/// Creates a coroutine with the default stack (1 MiB, [`DefaultStackAllocator`]).
///
/// `f` receives the creator as a continuation with the mirrored signature
/// and runs eagerly, on its own stack, until it first resumes the creator.
/// It must return the continuation to exit through - ordinarily the last
/// caller continuation it holds, converted via `into()`.
///
/// # Errors
///
/// Returns [`StackAllocError`] if the stack cannot be allocated.
pub fn create_context<A, R, F>(
    f: F,
) -> Result<Continuation<A, R>, StackAllocError>
where
    F: FnOnce(Continuation<R, A>) -> ExitContinuation + 'static,
{
    create_context_in(f, DEFAULT_STACK_SIZE, DefaultStackAllocator)
}

/// Creates a coroutine on a stack of `stack_size` bytes from `alloc`.
///
/// See [`create_context`].
///
/// # Errors
///
/// Returns [`StackAllocError`] if the stack cannot be allocated.
pub fn create_context_in<A, R, F, S>(
    f: F,
    stack_size: usize,
    alloc: S,
) -> Result<Continuation<A, R>, StackAllocError>
where
    F: FnOnce(Continuation<R, A>) -> ExitContinuation + 'static,
    S: StackAllocator,
{
    run_startup(f, stack_size, alloc)
}

/// Drives a live continuation to termination.
///
/// Delivers an exit request at the coroutine's suspension point; the
/// coroutine unwinds itself (running its destructors), its stack is freed on
/// this stack, and the call returns once termination is observed. A pending
/// untaken result is dropped first.
///
/// # Panics
///
/// Panics if `continuation` has already terminated.
pub fn signal_exit<A, R>(mut continuation: Continuation<A, R>) {
    assert!(
        !continuation.is_terminated(),
        "signaled exit on a terminated continuation"
    );

    let target = continuation.pilfer();

    if !target.parm.is_null() {
        // SAFETY: Pending incoming data on a `Continuation<A, R>` is a
        // live, untaken `DataTransfer<R>`.
        unsafe {
            DataTransfer::<R>::drop_untaken(target.parm);
        }
    }

    let mut request = ExitRequest::new(None);

    // SAFETY: The pilfered pair holds a live suspended switch point; the
    // request record lives in this frame, which stays alive (suspended in
    // this call) while the coroutine reads it.
    let pair = unsafe { raw_stack_switch(target.sp, request.as_parm()) };

    // Termination comes back as a terminal pair; adopting it re-raises any
    // payload produced while the coroutine unwound.
    let terminated = Continuation::<A, R>::from_incoming(pair);
    debug_assert!(
        terminated.is_terminated(),
        "coroutine suspended instead of honoring the exit request"
    );
}

/// Runs `f`, converting any panic into a clean coroutine exit through
/// `continuation`.
///
/// Call this from *inside* a coroutine body, handing it the current caller
/// continuation. On a panic in `f`, the coroutine unwinds to the startup
/// trampoline, its stack is freed, and the payload is re-raised on the
/// resumer - the mandatory error path for abnormal exits.
pub fn with_escape<A, R, T, F>(
    continuation: &mut Continuation<A, R>,
    f: F,
) -> T
where
    F: FnOnce(&mut Continuation<A, R>) -> T,
{
    match catch_unwind(AssertUnwindSafe(|| f(&mut *continuation))) {
        Ok(value) => value,
        Err(payload) => {
            let pair = continuation.pilfer();

            if pair.sp.is_null() {
                // Nothing to escape through; let the payload keep going.
                resume_unwind(payload);
            }

            if !pair.parm.is_null() {
                // SAFETY: Pending incoming data is a live, untaken
                // `DataTransfer<R>`.
                unsafe {
                    DataTransfer::<R>::drop_untaken(pair.parm);
                }
            }

            // resume_unwind rather than panic_any: the payload already went
            // through the hook when `f` panicked; re-raising is protocol.
            resume_unwind(Box::new(ExitUnwind {
                exit_to: pair.sp,
                payload: Some(payload),
            }))
        }
    }
}

/// Either shape a splice trampoline writes into the caller-frame slot.
#[repr(C)]
union SpliceSlot<A> {
    data: ManuallyDrop<DataTransfer<A>>,
    exit: ManuallyDrop<ExitRequest>,
}

struct SpliceArgs<A, F> {
    functor: ManuallyDrop<F>,
    slot: *mut SpliceSlot<A>,
}

/// Runs `f` on top of `continuation`'s stack and resumes the continuation
/// with `f`'s result as its arguments.
///
/// Returns the continuation's new state once it switches back. If `f`
/// panics, the coroutine is unwound and freed and the payload is re-raised
/// here, exactly as for an abnormal exit.
///
/// # Panics
///
/// Panics if `continuation` has terminated, or re-raises `f`'s panic as
/// described above.
pub fn splice<A, R, F>(
    mut continuation: Continuation<A, R>,
    f: F,
) -> Continuation<A, R>
where
    F: FnOnce() -> A,
{
    assert!(
        !continuation.is_terminated(),
        "spliced onto a terminated continuation"
    );

    let target = continuation.pilfer();

    if !target.parm.is_null() {
        // SAFETY: Pending incoming data is a live, untaken
        // `DataTransfer<R>`.
        unsafe {
            DataTransfer::<R>::drop_untaken(target.parm);
        }
    }

    let mut slot = MaybeUninit::<SpliceSlot<A>>::uninit();
    let mut args = SpliceArgs {
        functor: ManuallyDrop::new(f),
        slot: slot.as_mut_ptr(),
    };

    // SAFETY: The pilfered pair holds a live suspended switch point; the
    // args and the result slot live in this frame, which stays suspended
    // (alive) until the coroutine has consumed or dropped what the
    // trampoline wrote.
    let pair = unsafe {
        raw_execute_into(
            (&raw mut args).cast(),
            target.sp,
            splice_trampoline::<A, F>,
        )
    };

    Continuation::from_incoming(pair)
}

/// Runs on top of the spliced coroutine's stack.
unsafe extern "C" fn splice_trampoline<A, F>(
    parm: *mut (),
    from: *mut (),
) -> SwitchPair
where
    F: FnOnce() -> A,
{
    let args = parm.cast::<SpliceArgs<A, F>>();

    // SAFETY: The args record is alive in the splicer's suspended frame;
    // the functor is taken exactly once.
    let functor = unsafe { ManuallyDrop::take(&mut (*args).functor) };
    // SAFETY: As above.
    let slot = unsafe { (*args).slot };

    // Returning this pair resumes the coroutine beneath us: it receives the
    // record we park in the splicer's slot, while our own (dead) frame is
    // simply left behind above its stack pointer.
    match catch_unwind(AssertUnwindSafe(functor)) {
        Ok(value) => {
            // SAFETY: The slot is reserved for us in the splicer's live
            // frame.
            unsafe {
                slot.write(SpliceSlot {
                    data: ManuallyDrop::new(DataTransfer::new(value)),
                });
            }

            SwitchPair {
                sp: from,
                parm: slot.cast(),
            }
        }
        Err(payload) => abort_into_slot(slot.cast(), from, payload),
    }
}

/// Converts a caught panic into an exit request for the coroutine whose
/// stack the trampoline ran on, honoring an [`ExitUnwind`] token's own
/// destination if that is what was caught.
fn abort_into_slot(
    slot: *mut SpliceSlot<()>,
    from: *mut (),
    payload: Box<dyn std::any::Any + Send>,
) -> SwitchPair {
    let (exit_to, payload) = match payload.downcast::<ExitUnwind>() {
        Ok(token) => (token.exit_to, token.payload),
        Err(other) => (from, Some(other)),
    };

    // SAFETY: The slot is reserved for us in the splicer's live frame; the
    // exit variant ignores the slot's `A` parameter entirely.
    unsafe {
        (*slot).exit = ManuallyDrop::new(ExitRequest::new(payload));
    }

    SwitchPair {
        sp: exit_to,
        parm: slot.cast(),
    }
}

struct SpliceccArgs<F> {
    functor: ManuallyDrop<F>,
    slot: *mut SpliceSlot<()>,
}

/// Runs `f` on top of `continuation`'s stack, handing it the *current*
/// continuation; whatever `f` returns becomes the coroutine's next peer.
///
/// The free type parameters allow the returned continuation - and the one
/// `f` receives - to carry a different signature than the original, which is
/// how a coroutine's protocol is re-typed mid-flight.
///
/// # Panics
///
/// Panics if `continuation` has terminated, or re-raises `f`'s panic after
/// the coroutine has been unwound and freed.
pub fn splicecc<A, R, NA, NR, F>(
    mut continuation: Continuation<A, R>,
    f: F,
) -> Continuation<NA, NR>
where
    F: FnOnce(Continuation<NR, NA>) -> Continuation<R, A>,
{
    assert!(
        !continuation.is_terminated(),
        "spliced onto a terminated continuation"
    );

    let target = continuation.pilfer();

    if !target.parm.is_null() {
        // SAFETY: Pending incoming data is a live, untaken
        // `DataTransfer<R>`.
        unsafe {
            DataTransfer::<R>::drop_untaken(target.parm);
        }
    }

    let mut slot = MaybeUninit::<SpliceSlot<()>>::uninit();
    let mut args = SpliceccArgs {
        functor: ManuallyDrop::new(f),
        slot: slot.as_mut_ptr(),
    };

    // SAFETY: As in `splice`: the switch point is live and every record the
    // trampoline touches lives in this suspended frame.
    let pair = unsafe {
        raw_execute_into(
            (&raw mut args).cast(),
            target.sp,
            splicecc_trampoline::<A, R, NA, NR, F>,
        )
    };

    Continuation::from_incoming(pair)
}

/// Runs on top of the spliced coroutine's stack.
unsafe extern "C" fn splicecc_trampoline<A, R, NA, NR, F>(
    parm: *mut (),
    from: *mut (),
) -> SwitchPair
where
    F: FnOnce(Continuation<NR, NA>) -> Continuation<R, A>,
{
    let args = parm.cast::<SpliceccArgs<F>>();

    // SAFETY: The args record is alive in the splicer's suspended frame;
    // the functor is taken exactly once.
    let functor = unsafe { ManuallyDrop::take(&mut (*args).functor) };
    // SAFETY: As above.
    let slot = unsafe { (*args).slot };

    let current = Continuation::<NR, NA>::from_incoming(SwitchPair {
        sp: from,
        parm: ptr::null_mut(),
    });

    match catch_unwind(AssertUnwindSafe(move || functor(current))) {
        Ok(mut next) => next.pilfer(),
        Err(payload) => abort_into_slot(slot, from, payload),
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    /// Counts allocation balance for the freed-exactly-once assertions.
    #[derive(Debug, Clone)]
    struct CountingAllocator {
        allocated: &'static AtomicUsize,
        released: &'static AtomicUsize,
    }

    impl CountingAllocator {
        fn new() -> Self {
            Self {
                allocated: Box::leak(Box::new(AtomicUsize::new(0))),
                released: Box::leak(Box::new(AtomicUsize::new(0))),
            }
        }

        fn released(&self) -> usize {
            self.released.load(Ordering::SeqCst)
        }
    }

    impl StackAllocator for CountingAllocator {
        fn allocate(
            &self,
            size: usize,
        ) -> Result<std::ptr::NonNull<u8>, StackAllocError> {
            self.allocated.fetch_add(1, Ordering::SeqCst);
            DefaultStackAllocator.allocate(size)
        }

        unsafe fn deallocate(&self, base: std::ptr::NonNull<u8>, size: usize) {
            self.released.fetch_add(1, Ordering::SeqCst);
            // SAFETY: Forwarded contract.
            unsafe {
                DefaultStackAllocator.deallocate(base, size);
            }
        }
    }

    const TEST_STACK: usize = 256 * 1024;

    #[test]
    fn coroutine_yields_a_sequence_then_terminates() {
        let alloc = CountingAllocator::new();

        let mut numbers = create_context_in(
            |mut caller: Continuation<u32, ()>| {
                for n in 1..=3 {
                    caller.resume(n);
                }
                caller.into()
            },
            TEST_STACK,
            alloc.clone(),
        )
        .expect("stack allocation succeeds");

        assert!(numbers.has_data());
        assert_eq!(numbers.take_result(), 1);

        assert_eq!(numbers.resume(()).take_result(), 2);
        assert_eq!(numbers.resume(()).take_result(), 3);

        numbers.resume(());
        assert!(numbers.is_terminated());
        assert!(!numbers.has_data());

        assert_eq!(alloc.allocated.load(Ordering::SeqCst), 1);
        assert_eq!(alloc.released(), 1);
    }

    #[test]
    fn arguments_round_trip_through_the_switch() {
        let mut doubler = create_context(
            |mut caller: Continuation<u32, u32>| {
                // Prime the pump; the first switch back carries no
                // meaningful result.
                let mut n = caller.resume(0).take_result();
                while n != 0 {
                    n = caller.resume(n * 2).take_result();
                }
                caller.into()
            },
        )
        .expect("stack allocation succeeds");

        // Discard the priming value.
        assert!(doubler.has_data());
        let _ = doubler.take_result();

        assert_eq!(doubler.resume(21).take_result(), 42);
        assert_eq!(doubler.resume(5).take_result(), 10);

        doubler.resume(0);
        assert!(doubler.is_terminated());
    }

    #[test]
    fn tuple_results_move_as_a_whole() {
        let mut pairs = create_context(
            |mut caller: Continuation<(u32, String), ()>| {
                caller.resume((7, "seven".to_string()));
                caller.into()
            },
        )
        .expect("stack allocation succeeds");

        let (n, name) = pairs.take_result();
        assert_eq!((n, name.as_str()), (7, "seven"));

        pairs.resume(());
        assert!(pairs.is_terminated());
    }

    #[test]
    fn signal_exit_runs_destructors_and_frees_the_stack() {
        struct SetOnDrop(Rc<Cell<bool>>);

        impl Drop for SetOnDrop {
            fn drop(&mut self) {
                self.0.set(true);
            }
        }

        let dropped = Rc::new(Cell::new(false));
        let observer = Rc::clone(&dropped);
        let alloc = CountingAllocator::new();

        let sleeper = create_context_in(
            move |mut caller: Continuation<(), ()>| {
                let _guard = SetOnDrop(observer);
                loop {
                    caller.resume(());
                }
            },
            TEST_STACK,
            alloc.clone(),
        )
        .expect("stack allocation succeeds");

        assert!(!dropped.get());

        signal_exit(sleeper);

        assert!(dropped.get(), "the coroutine's locals must be dropped");
        assert_eq!(alloc.released(), 1);
    }

    #[test]
    fn escaped_panic_surfaces_on_the_resumer_after_cleanup() {
        let alloc = CountingAllocator::new();

        let mut faulty = create_context_in(
            |mut caller: Continuation<u32, ()>| {
                caller.resume(1);
                with_escape(&mut caller, |_| panic!("boom"));
                caller.into()
            },
            TEST_STACK,
            alloc.clone(),
        )
        .expect("stack allocation succeeds");

        assert_eq!(faulty.take_result(), 1);

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            faulty.resume(());
        }));

        let payload = outcome.expect_err("the panic must cross over");
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"boom"));

        assert!(faulty.is_terminated());
        assert_eq!(
            alloc.released(),
            1,
            "the stack must be freed before the panic resurfaces"
        );
    }

    #[test]
    fn splice_computes_arguments_on_the_target_stack() {
        let adder = create_context(
            |mut caller: Continuation<u32, (u32, u32)>| {
                caller.resume(0);
                loop {
                    let (a, b) = caller.take_result();
                    if a == 0 && b == 0 {
                        break;
                    }
                    caller.resume(a + b);
                }
                caller.into()
            },
        )
        .expect("stack allocation succeeds");

        // splice drops the priming value for us.
        let mut adder = splice(adder, || (2, 3));
        assert_eq!(adder.take_result(), 5);

        let mut adder = splice(adder, || (10, 20));
        assert_eq!(adder.take_result(), 30);

        adder.resume((0, 0));
        assert!(adder.is_terminated());
    }

    #[test]
    fn splice_panic_unwinds_the_coroutine_to_the_splicer() {
        let alloc = CountingAllocator::new();

        let victim = create_context_in(
            |mut caller: Continuation<(), u32>| {
                // Wait for input that will never arrive.
                caller.resume(());
                let _ = caller.take_result();
                caller.into()
            },
            TEST_STACK,
            alloc.clone(),
        )
        .expect("stack allocation succeeds");

        let outcome = catch_unwind(AssertUnwindSafe(|| {
            splice(victim, || -> u32 { panic!("spliced") })
        }));

        let payload = outcome.expect_err("the panic must cross over");
        assert_eq!(payload.downcast_ref::<&str>(), Some(&"spliced"));
        assert_eq!(
            alloc.released(),
            1,
            "the spliced coroutine's stack must be freed"
        );
    }

    #[test]
    fn splicecc_hands_the_splicer_to_the_closure() {
        let ticker = create_context(
            |mut caller: Continuation<(), ()>| {
                loop {
                    caller.resume(());
                }
            },
        )
        .expect("stack allocation succeeds");

        let ran = Cell::new(false);

        // The closure runs on the ticker's stack, receives the splicer as a
        // live continuation and chooses it as the ticker's next peer.
        let ticker: Continuation<(), ()> =
            splicecc(ticker, |current: Continuation<(), ()>| {
                ran.set(true);
                assert!(!current.is_terminated());
                current
            });

        assert!(ran.get());
        assert!(ticker.has_data(), "the ticker yielded to us again");

        signal_exit(ticker);
    }

    #[test]
    fn coroutines_can_nest() {
        let mut outer = create_context(
            |mut caller: Continuation<u32, ()>| {
                let mut inner = create_context(
                    |mut caller: Continuation<u32, ()>| {
                        caller.resume(10);
                        caller.resume(20);
                        caller.into()
                    },
                )
                .expect("stack allocation succeeds");

                let first = inner.take_result();
                caller.resume(first);

                let second = inner.resume(()).take_result();
                caller.resume(second);

                inner.resume(());
                assert!(inner.is_terminated());

                caller.into()
            },
        )
        .expect("stack allocation succeeds");

        assert_eq!(outer.take_result(), 10);
        assert_eq!(outer.resume(()).take_result(), 20);
        outer.resume(());
        assert!(outer.is_terminated());
    }

    #[test]
    fn unconsumed_results_are_dropped_not_leaked() {
        let observed: &'static Mutex<Vec<u32>> =
            Box::leak(Box::new(Mutex::new(Vec::new())));

        struct Logged(&'static Mutex<Vec<u32>>, u32);

        impl Drop for Logged {
            fn drop(&mut self) {
                self.0.lock().unwrap().push(self.1);
            }
        }

        let mut source = create_context(
            move |mut caller: Continuation<Logged, ()>| {
                caller.resume(Logged(observed, 1));
                caller.resume(Logged(observed, 2));
                caller.into()
            },
        )
        .expect("stack allocation succeeds");

        // Never take the first result; resuming must drop it.
        assert!(source.has_data());
        source.resume(());
        assert_eq!(observed.lock().unwrap().as_slice(), &[1]);

        // The second pending result is dropped by signal_exit.
        signal_exit(source);
        assert_eq!(observed.lock().unwrap().as_slice(), &[1, 2]);
    }

    #[test]
    fn allocation_failure_is_reported() {
        #[derive(Debug)]
        struct BrokeAllocator;

        impl StackAllocator for BrokeAllocator {
            fn allocate(
                &self,
                _size: usize,
            ) -> Result<std::ptr::NonNull<u8>, StackAllocError> {
                Err(StackAllocError)
            }

            unsafe fn deallocate(
                &self,
                _base: std::ptr::NonNull<u8>,
                _size: usize,
            ) {
                unreachable!("nothing was ever allocated");
            }
        }

        let result = create_context_in(
            |caller: Continuation<(), ()>| caller.into(),
            DEFAULT_STACK_SIZE,
            BrokeAllocator,
        );

        assert_eq!(result.err(), Some(StackAllocError));
    }
}
