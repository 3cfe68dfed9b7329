use std::cell::{Cell, UnsafeCell};
use std::error::Error;
use std::fmt::{self, Display};
use std::marker::PhantomData;
use std::ptr::NonNull;

use crate::{Event, Latch, Waitable, wait};

/// Indicates that a promise was dropped without supplying a value.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Disconnected;

impl Error for Disconnected {}

impl Display for Disconnected {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "promise was dropped without supplying a value")
    }
}

/// Heap cell connecting a [`Promise`] to a [`Future`].
///
/// The event is the first field: an [`EventPtr`][crate::EventPtr] delivered
/// to a waiter is therefore also the address of the whole state, which is
/// what the shared-future multiplexer relies on to recover the value.
#[repr(C)]
pub(crate) struct SharedState<T> {
    pub(crate) event: Event,

    /// Written by the producer before the signal, read by the consumer after
    /// observing it; the event's release/acquire edge is the synchronization.
    /// `None` at signal time means the promise broke.
    pub(crate) value: UnsafeCell<Option<T>>,
}

// SAFETY: The value slot is accessed exclusively by the producer before the
// signal and exclusively by the consumer after acquiring it; the event cell
// synchronizes the handover.
unsafe impl<T: Send> Sync for SharedState<T> {}

/// Producer endpoint: supplies the value and signals the paired [`Future`].
#[derive(Debug)]
pub struct Promise<T> {
    state: Option<NonNull<SharedState<T>>>,

    // A single producer; concurrent use from several threads is not
    // supported.
    _not_sync: PhantomData<Cell<()>>,
}

/// Consumer endpoint: waits for and extracts the promised value.
///
/// Dropping a future before its promise resolves leaks the shared state (the
/// single-shot protocol has no third party to adjudicate the race); prefer
/// driving it to completion with [`Future::get`].
#[derive(Debug)]
pub struct Future<T> {
    state: Option<NonNull<SharedState<T>>>,

    // A single consumer; concurrent use from several threads is not
    // supported.
    _not_sync: PhantomData<Cell<()>>,
}

// SAFETY: The endpoints are handles to a Sync shared state; moving one to
// another thread moves the respective role with it.
unsafe impl<T: Send> Send for Promise<T> {}
// SAFETY: As above.
unsafe impl<T: Send> Send for Future<T> {}

impl<T> Promise<T> {
    /// Creates a connected promise/future pair.
    #[must_use]
    pub fn pair() -> (Promise<T>, Future<T>) {
        let state = NonNull::from(Box::leak(Box::new(SharedState {
            event: Event::new(false),
            value: UnsafeCell::new(None),
        })));

        (
            Promise {
                state: Some(state),
                _not_sync: PhantomData,
            },
            Future {
                state: Some(state),
                _not_sync: PhantomData,
            },
        )
    }

    /// Supplies the value and signals the future.
    pub fn set(mut self, value: T) {
        let state = self.state.take().expect("unset promise holds its state");

        // SAFETY: Until the signal below, the producer has exclusive access
        // to the value slot.
        unsafe {
            *state.as_ref().value.get() = Some(value);
        }

        signal_state(state);
    }
}

impl<T> Drop for Promise<T> {
    fn drop(&mut self) {
        // A broken promise still signals, so a waiting consumer observes
        // `Disconnected` instead of blocking forever.
        if let Some(state) = self.state.take() {
            signal_state(state);
        }
    }
}

fn signal_state<T>(state: NonNull<SharedState<T>>) {
    // SAFETY: We are the sole producer. Waiters registered on this event
    // (the consumer's latch or a multiplexer) release the handle rather
    // than dropping it, so signaling cannot free the state out from under
    // the consumer; on `false` the consumer simply observes the signaled
    // state later.
    let _ = unsafe { state.as_ref().event.signal() };
}

impl<T> Future<T> {
    fn state(&self) -> &SharedState<T> {
        let state = self
            .state
            .as_ref()
            .expect("unconsumed future holds its state");

        // SAFETY: The state is alive for as long as the future holds it.
        unsafe { state.as_ref() }
    }

    /// Whether the value (or a broken-promise signal) has arrived.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state().event.is_signaled()
    }

    /// Blocks on `latch` until the promise resolves.
    pub fn wait<L>(&self, latch: &mut L)
    where
        L: Latch,
    {
        wait(latch, self);
    }

    /// Waits for the promise to resolve and extracts the value.
    ///
    /// Returns [`Disconnected`] if the promise was dropped unset.
    pub fn get<L>(mut self, latch: &mut L) -> Result<T, Disconnected>
    where
        L: Latch,
    {
        self.wait(latch);

        let state = self.state.take().expect("unconsumed future holds its state");

        // SAFETY: The signal has been observed, so the producer is done
        // with the state; the consumer is its exclusive owner and the
        // allocation came from `Promise::pair`.
        let state = unsafe { Box::from_raw(state.as_ptr()) };

        state.value.into_inner().ok_or(Disconnected)
    }

    /// Hands the state over to another owner (the multiplexer).
    pub(crate) fn into_state(mut self) -> NonNull<SharedState<T>> {
        self.state.take().expect("unconsumed future holds its state")
    }
}

impl<T> Waitable for Future<T> {
    fn get_event(&self) -> Option<&Event> {
        Some(&self.state().event)
    }
}

impl<T> Drop for Future<T> {
    fn drop(&mut self) {
        if let Some(state) = self.state.take() {
            // SAFETY: The state is alive; we only inspect the event.
            if unsafe { state.as_ref() }.event.is_signaled() {
                // The producer is done; we are the last owner.
                // SAFETY: Exclusive ownership, allocated in `Promise::pair`.
                drop(unsafe { Box::from_raw(state.as_ptr()) });
            }
            // Not signaled: the promise may still be written to; the state
            // is leaked (see the type-level docs).
        }
    }
}
