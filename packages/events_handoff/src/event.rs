use std::mem::ManuallyDrop;
use std::ops::Deref;
use std::ptr::{self, NonNull};
use std::sync::atomic::{AtomicPtr, Ordering};

use crate::waiter::{FORGET_WAITER, WaiterSlot};

/// Distinguished address marking the signaled state.
///
/// Any live registration points at a consumer-owned slot, so the address of
/// this private static can never collide with one. It is never dispatched.
static SIGNALED_SLOT: WaiterSlot<'static> = WaiterSlot::new(&FORGET_WAITER);

fn signaled() -> *mut () {
    (&raw const SIGNALED_SLOT).cast_mut().cast()
}

/// Single-shot rendezvous between one producer and one consumer.
///
/// The event is a single atomic word with three logical states:
///
/// * empty - neither party has acted (a null pointer);
/// * waited - a consumer has registered a [`WaiterSlot`] (the slot address);
/// * signaled - the producer has signaled (a distinguished sentinel address).
///
/// The legal transitions are empty -> waited, empty -> signaled,
/// waited -> signaled and waited -> empty (dismissal). Signaled is terminal.
///
/// `signal` is one atomic exchange and `try_wait`/`dismiss_wait` are one
/// strong compare-exchange each, so every operation is wait-free and there
/// are no spurious wakeups. The event itself never blocks and never
/// allocates; blocking is the business of whatever waiter the consumer
/// registers (typically a [`CountdownLatch`][crate::CountdownLatch]).
///
/// At most one thread may act as the producer and at most one thread at a
/// time may perform consumer operations; producer and consumer may act
/// concurrently on the same event - that is the entire point.
///
/// Ownership of the event transfers into the waiter's callback at the moment
/// of delivery; see [`EventPtr`].
#[derive(Debug)]
pub struct Event {
    /// Null = empty, [`SIGNALED_SLOT`] = signaled, anything else = a
    /// registered [`WaiterSlot`].
    state: AtomicPtr<()>,
}

impl Event {
    /// Creates an event, pre-signaled or empty.
    ///
    /// A pre-signaled event delivers synchronously to any waiter that
    /// registers later (see [`Event::wait`]).
    #[must_use]
    pub fn new(pre_signaled: bool) -> Self {
        Self {
            state: AtomicPtr::new(if pre_signaled {
                signaled()
            } else {
                ptr::null_mut()
            }),
        }
    }

    /// Whether the producer has signaled.
    ///
    /// Inspection only; the result may be stale by the time the caller acts
    /// on it. The load is acquiring, so a `true` result synchronizes with
    /// everything the producer published before signaling.
    #[must_use]
    pub fn is_signaled(&self) -> bool {
        self.state.load(Ordering::Acquire) == signaled()
    }

    /// Puts the event in the signaled state. If a waiter was registered,
    /// delivers ownership of the event into its callback.
    ///
    /// Returns `true` if a waiter consumed the event. On `false` the caller
    /// retains ownership (the event is merely signaled).
    ///
    /// The exchange is acquire-release: everything the producer wrote before
    /// this call is visible to the waiter (and to a consumer observing the
    /// signaled state), and the registered slot's contents are visible here.
    ///
    /// # Safety
    ///
    /// The caller must own the event. If `true` is returned, ownership has
    /// transferred into the waiter and the caller must no longer touch the
    /// event in any way. The event must not already be signaled (at most one
    /// producer, at most one signal).
    pub unsafe fn signal(&self) -> bool {
        let previous = self.state.swap(signaled(), Ordering::AcqRel);

        debug_assert!(previous != signaled(), "event signaled twice");

        let Some(slot) = NonNull::new(previous) else {
            return false;
        };

        // SAFETY: We own the event per this function's contract, and the
        // exchange above made this delivery the exclusive one.
        let handle = unsafe { EventPtr::from_raw(NonNull::from(self)) };

        // SAFETY: A non-null, non-sentinel state is a slot address installed
        // by `try_wait`, and the registration contract keeps the slot alive
        // and in place until delivery or dismissal.
        unsafe {
            WaiterSlot::dispatch(slot, handle);
        }

        true
    }

    /// Registers `slot` if the event has not been signaled yet.
    ///
    /// Returns `true` and transitions empty -> waited on success. Returns
    /// `false`, leaving the state untouched, if the event is already
    /// signaled; the compare-exchange failure load is acquiring, so the
    /// producer's published state is visible on that path.
    ///
    /// # Panics
    ///
    /// Panics if a waiter is already registered (one consumer, one
    /// registration between resets).
    ///
    /// # Safety
    ///
    /// On `true`, the caller guarantees that `slot` stays alive and does not
    /// move until the waiter has fired or `dismiss_wait` has returned `true`.
    #[must_use]
    pub unsafe fn try_wait(&self, slot: &WaiterSlot<'_>) -> bool {
        match self.state.compare_exchange(
            ptr::null_mut(),
            slot.as_ptr(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(current) => {
                assert!(
                    current == signaled(),
                    "event already has a registered waiter"
                );
                false
            }
        }
    }

    /// Registers `slot`, or delivers synchronously if already signaled.
    ///
    /// The synchronous path invokes the waiter on the calling thread with
    /// ownership of the event, exactly as a producer-side delivery would.
    ///
    /// # Safety
    ///
    /// As [`Event::try_wait`]; additionally the caller must own the event,
    /// since the synchronous path transfers that ownership into the waiter.
    pub unsafe fn wait(&self, slot: &WaiterSlot<'_>) {
        // SAFETY: Forwarded from the caller.
        if !unsafe { self.try_wait(slot) } {
            // SAFETY: The caller owns the event and hands it over.
            slot.deliver(unsafe { EventPtr::from_raw(NonNull::from(self)) });
        }
    }

    /// Withdraws a registration, racing against the producer's signal.
    ///
    /// Returns `true` if the waiter is guaranteed not to fire (the event is
    /// back to - or still in - the empty state). Returns `false` if the
    /// producer has already signaled: the waiter has either fired or is about
    /// to, and ownership of the event has transferred to it.
    ///
    /// # Safety
    ///
    /// Only the consumer that registered `slot` may dismiss it, and `slot`
    /// must be the registered slot (checked in debug builds).
    #[must_use]
    pub unsafe fn dismiss_wait(&self, slot: &WaiterSlot<'_>) -> bool {
        let current = self.state.load(Ordering::Acquire);

        if current.is_null() {
            return true;
        }

        if current == signaled() {
            return false;
        }

        debug_assert!(
            current == slot.as_ptr(),
            "dismissing a waiter that is not registered"
        );

        // The producer is racing us to the signaled state; whoever wins the
        // cell owns the outcome. Acquire on failure pairs with the producer's
        // release half of the exchange.
        self.state
            .compare_exchange(
                current,
                ptr::null_mut(),
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }
}

impl Drop for Event {
    fn drop(&mut self) {
        let state = *self.state.get_mut();
        debug_assert!(
            state.is_null() || state == signaled(),
            "event dropped while a waiter is registered"
        );
    }
}

/// Owned handle to an [`Event`].
///
/// This is the value a [`Waiter`][crate::Waiter] receives at signal time:
/// holding an `EventPtr` means holding the event. Dropping the handle drops
/// and frees the event as a heap allocation; [`EventPtr::into_raw`] releases
/// it untouched for events that live inside larger structures.
#[derive(Debug)]
pub struct EventPtr {
    event: NonNull<Event>,
}

impl EventPtr {
    /// Heap-allocates a fresh event and returns the owning handle.
    #[must_use]
    pub fn new(pre_signaled: bool) -> Self {
        Self {
            event: NonNull::from(Box::leak(Box::new(Event::new(pre_signaled)))),
        }
    }

    /// Wraps a raw event address in an owning handle.
    ///
    /// # Safety
    ///
    /// The caller must logically own the event, and either the pointer came
    /// from a `Box<Event>`-compatible heap allocation or the handle must
    /// never be dropped (released via [`EventPtr::into_raw`] instead, as
    /// [`ForgetWaiter`][crate::ForgetWaiter] does).
    #[must_use]
    pub unsafe fn from_raw(event: NonNull<Event>) -> Self {
        Self { event }
    }

    /// Releases the event without dropping it, returning the raw address.
    #[must_use]
    pub fn into_raw(self) -> NonNull<Event> {
        ManuallyDrop::new(self).event
    }

    /// Signals the event, transferring ownership into the registered waiter
    /// if there is one.
    ///
    /// Returns the handle back when no waiter was registered: the event is
    /// now signaled and the producer still owns it. Returns `None` when a
    /// waiter consumed it.
    #[must_use]
    pub fn signal(self) -> Option<Self> {
        let event = self.into_raw();

        // SAFETY: The handle proves ownership; on delivery we forget it.
        if unsafe { event.as_ref().signal() } {
            None
        } else {
            // SAFETY: No waiter took it; ownership stays with us.
            Some(unsafe { Self::from_raw(event) })
        }
    }
}

impl Deref for EventPtr {
    type Target = Event;

    fn deref(&self) -> &Event {
        // SAFETY: The handle owns the event, which is alive until released.
        unsafe { self.event.as_ref() }
    }
}

impl Drop for EventPtr {
    fn drop(&mut self) {
        // SAFETY: Per the construction contract, a dropped handle refers to
        // a heap-allocated event that we own exclusively.
        drop(unsafe { Box::from_raw(self.event.as_ptr()) });
    }
}

// SAFETY: Owning an event is no more than owning the atomic word inside it,
// which any thread may hold.
unsafe impl Send for EventPtr {}
