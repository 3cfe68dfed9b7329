use std::fmt;
use std::ptr::NonNull;

use crate::EventPtr;

/// Consumer-side callback invoked when a producer signals an event.
///
/// The waiter receives ownership of the event and is responsible for releasing
/// or recycling it. `Sync` is required because the producer may invoke the
/// callback from its own thread while the consumer still holds a reference.
///
/// Implementations must not panic: the callback runs on the producer's stack
/// and a panic there is a producer-side failure.
pub trait Waiter: Sync {
    /// Delivers the signaled event, transferring ownership to the waiter.
    ///
    /// The waiter itself may be destroyed by other threads as soon as this
    /// method has returned (and, if it unblocks a consumer, even while it is
    /// still returning) - implementations must not touch `self` after their
    /// last synchronizing action.
    fn signal(&self, event: EventPtr);
}

/// Registration record connecting an [`Event`][crate::Event] to a [`Waiter`].
///
/// The event's state cell is a single machine word, so it cannot hold a wide
/// `&dyn Waiter` directly. Instead the consumer keeps the wide reference in a
/// slot and registers the slot's (thin) address.
///
/// A slot registered via [`Event::try_wait`][crate::Event::try_wait] must not
/// move or be dropped until the waiter has fired or the registration has been
/// dismissed; the raw wait operations are `unsafe` for exactly this reason.
/// One slot may be registered with many events at once (that is how the
/// composite waits share a single latch).
pub struct WaiterSlot<'a> {
    waiter: &'a dyn Waiter,
}

impl<'a> WaiterSlot<'a> {
    /// Creates a slot delivering to `waiter`.
    #[must_use]
    pub const fn new(waiter: &'a dyn Waiter) -> Self {
        Self { waiter }
    }

    /// The address registered in the event cell.
    pub(crate) fn as_ptr(&self) -> *mut () {
        std::ptr::from_ref(self).cast_mut().cast()
    }

    /// Invokes the slot's waiter directly, consuming `event`.
    pub(crate) fn deliver(&self, event: EventPtr) {
        self.waiter.signal(event);
    }

    /// Dispatches to the slot a previously registered address points at.
    ///
    /// # Safety
    ///
    /// `slot` must be an address obtained from [`WaiterSlot::as_ptr`] whose
    /// slot is still alive and has not moved since registration.
    pub(crate) unsafe fn dispatch(slot: NonNull<()>, event: EventPtr) {
        // SAFETY: The caller guarantees the address points at a live slot.
        let slot = unsafe { slot.cast::<WaiterSlot<'_>>().as_ref() };
        slot.deliver(event);
    }
}

impl fmt::Debug for WaiterSlot<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WaiterSlot")
            .field("waiter", &std::ptr::from_ref(self.waiter))
            .finish()
    }
}

/// Drops the delivered event, releasing its heap allocation.
///
/// Only valid for events created through [`EventPtr::new`][EventPtr::new] (or
/// otherwise heap-allocated); see [`EventPtr`].
#[derive(Debug, Default)]
pub struct DropWaiter;

impl Waiter for DropWaiter {
    fn signal(&self, event: EventPtr) {
        drop(event);
    }
}

/// Releases the delivered event without running any destructor.
///
/// Used when the event is embedded in a larger structure whose cleanup is
/// managed separately.
#[derive(Debug, Default)]
pub struct ForgetWaiter;

impl Waiter for ForgetWaiter {
    fn signal(&self, event: EventPtr) {
        let _ = event.into_raw();
    }
}

/// Process-wide [`DropWaiter`] instance.
pub static DROP_WAITER: DropWaiter = DropWaiter;

/// Process-wide [`ForgetWaiter`] instance.
pub static FORGET_WAITER: ForgetWaiter = ForgetWaiter;
