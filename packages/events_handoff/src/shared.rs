use std::cell::UnsafeCell;
use std::mem;
use std::ptr::NonNull;
use std::sync::Arc;

use parking_lot::{Condvar, Mutex};

use crate::future::SharedState;
use crate::{
    Disconnected, Event, EventPtr, Future, Latch, Promise, Waitable, Waiter,
    WaiterSlot,
};

struct MuxState<T> {
    /// Set exactly once, by the source event's delivery.
    result: Option<Result<T, Disconnected>>,
    /// Listeners queued before the source resolved.
    listeners: Vec<Promise<bool>>,
}

/// Fans one source event out to any number of listeners.
///
/// The multiplexer owns the source shared state, registers itself as the
/// source event's waiter and, when signaled, stores the result and fulfills
/// every queued per-listener promise. Listeners arriving after the fact are
/// fulfilled immediately.
struct Multiplexer<T>
where
    T: Send,
{
    state: Mutex<MuxState<T>>,

    /// Signaled by the delivery callback once `state.result` is set; teardown
    /// uses it to wait out an in-flight delivery.
    fulfilled: Condvar,

    /// The source promise/future state. Freed exactly once, in `drop` -
    /// never by the delivery callback, so the registration can always be
    /// resolved against a live event.
    source: NonNull<SharedState<T>>,

    /// The registration record the source event points at. Written once
    /// during construction (before any other thread can observe the
    /// multiplexer), immutable afterwards; it must live inside this pinned
    /// allocation because the event cell stores its address.
    slot: UnsafeCell<Option<WaiterSlot<'static>>>,
}

// SAFETY: The value slot of `source` is only touched through the event
// handover protocol, the slot cell is written once before sharing, and
// everything else synchronizes through the mutex.
unsafe impl<T: Send> Send for Multiplexer<T> {}
// SAFETY: As above.
unsafe impl<T: Send> Sync for Multiplexer<T> {}

impl<T> Multiplexer<T>
where
    T: Send,
{
    fn source_event(&self) -> &Event {
        // SAFETY: `source` is freed only in `drop`, so it is alive whenever
        // a method can run.
        &unsafe { self.source.as_ref() }.event
    }

    fn add_listener(&self) -> Future<bool> {
        let (promise, future) = Promise::pair();

        let mut state = self.state.lock();
        if state.result.is_some() {
            drop(state);
            promise.set(true);
        } else {
            state.listeners.push(promise);
        }

        future
    }
}

impl<T> Waiter for Multiplexer<T>
where
    T: Send,
{
    fn signal(&self, event: EventPtr) {
        let event = event.into_raw();
        debug_assert_eq!(
            event.as_ptr(),
            std::ptr::from_ref(self.source_event()).cast_mut(),
            "multiplexer signaled with a foreign event"
        );

        // SAFETY: The signal happened-before this callback, so the producer
        // is done with the value slot and we are its exclusive reader.
        let value = unsafe { (*self.source.as_ref().value.get()).take() };

        let listeners = {
            let mut state = self.state.lock();
            state.result = Some(value.ok_or(Disconnected));
            // Notify while still holding the lock: publishing the result
            // licenses teardown to free the multiplexer, so the unlock at
            // the end of this scope must be our last touch of `self`.
            self.fulfilled.notify_all();
            mem::take(&mut state.listeners)
        };

        for listener in listeners {
            listener.set(true);
        }
    }
}

impl<T> Drop for Multiplexer<T>
where
    T: Send,
{
    fn drop(&mut self) {
        // The producer's delivery callback may be running concurrently right
        // up to the moment `result` is published, so even here the mutex is
        // required.
        let fulfilled = self.state.lock().result.is_some();

        if !fulfilled {
            // SAFETY: The slot was installed during construction and the
            // registering consumer (the multiplexer) is resolving it.
            let slot = unsafe { (*self.slot.get()).as_ref() }
                .expect("multiplexer is always registered");

            // SAFETY: Same consumer that registered; the event is alive
            // because only we free the source state.
            if unsafe { self.source_event().dismiss_wait(slot) } {
                // The waiter will never fire, but the source promise may
                // still signal the event later: the state must outlive us.
                return;
            }

            // Delivery is in flight; wait for the callback to publish.
            let mut state = self.state.lock();
            while state.result.is_none() {
                self.fulfilled.wait(&mut state);
            }
        }

        // The callback has completed and nobody else can reach the source.
        // SAFETY: Exclusive ownership; allocated in `Promise::pair`.
        drop(unsafe { Box::from_raw(self.source.as_ptr()) });
    }
}

/// A future that can be waited on - and resolved - by many parties.
///
/// Built by multiplexing a single [`Future`]'s event out to per-listener
/// events: every clone holds its own listener and can block, poll and `get`
/// independently. The value is handed out by clone, hence `T: Clone` on
/// [`SharedFuture::get`].
pub struct SharedFuture<T>
where
    T: Send,
{
    mux: Arc<Multiplexer<T>>,
    listener: Future<bool>,
}

impl<T> SharedFuture<T>
where
    T: Send,
{
    /// Takes over `future` and makes it sharable.
    #[must_use]
    pub fn new(future: Future<T>) -> Self {
        let source = future.into_state();

        let mux = Arc::new(Multiplexer {
            state: Mutex::new(MuxState {
                result: None,
                listeners: Vec::new(),
            }),
            fulfilled: Condvar::new(),
            source,
            slot: UnsafeCell::new(None),
        });

        let waiter: &dyn Waiter = &*mux;
        // SAFETY: Lifetime erasure only. The registration is resolved in
        // `Multiplexer::drop` (dismissed or drained) before the referent
        // goes away, and the Arc pins its address.
        let waiter: &'static dyn Waiter = unsafe { mem::transmute(waiter) };

        // SAFETY: Nobody else can observe the multiplexer yet; the cell is
        // written exactly once, before registration.
        unsafe {
            *mux.slot.get() = Some(WaiterSlot::new(waiter));
        }

        {
            // SAFETY: Written just above.
            let slot = unsafe { (*mux.slot.get()).as_ref() }
                .expect("slot was just installed");

            // SAFETY: The slot is pinned inside the Arc allocation for the
            // registration's whole lifetime; we own the source state, so the
            // synchronous-delivery path is entitled to hand it over.
            unsafe {
                mux.source_event().wait(slot);
            }
        }

        let listener = mux.add_listener();

        Self { mux, listener }
    }

    /// Whether the source has resolved.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.listener.is_ready()
    }

    /// Blocks on `latch` until the source resolves.
    pub fn wait<L>(&self, latch: &mut L)
    where
        L: Latch,
    {
        self.listener.wait(latch);
    }

    /// Waits for the source to resolve and returns a copy of the value.
    ///
    /// Returns [`Disconnected`] if the source promise was dropped unset.
    pub fn get<L>(&self, latch: &mut L) -> Result<T, Disconnected>
    where
        T: Clone,
        L: Latch,
    {
        self.listener.wait(latch);

        let state = self.mux.state.lock();
        state
            .result
            .clone()
            .expect("listener resolved after the source published")
    }
}

impl<T> Clone for SharedFuture<T>
where
    T: Send,
{
    fn clone(&self) -> Self {
        Self {
            mux: Arc::clone(&self.mux),
            listener: self.mux.add_listener(),
        }
    }
}

impl<T> Waitable for SharedFuture<T>
where
    T: Send,
{
    fn get_event(&self) -> Option<&Event> {
        self.listener.get_event()
    }
}

impl<T> std::fmt::Debug for SharedFuture<T>
where
    T: Send,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedFuture")
            .field("ready", &self.is_ready())
            .finish_non_exhaustive()
    }
}
