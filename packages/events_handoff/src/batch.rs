use crate::{Event, WaiterSlot};

/// Anything that can expose an [`Event`] to the composite wait operations.
///
/// Returning `None` means "nothing to wait on here"; such entries are skipped
/// by the batched operations and by the wait entry points, mirroring the
/// treatment of null entries in a raw pointer range.
pub trait Waitable {
    /// The event to register against, if any.
    ///
    /// The result borrows from `self`; only wait-side operations may be
    /// performed on it, as `self` retains ownership of the event.
    fn get_event(&self) -> Option<&Event>;
}

impl Waitable for Event {
    fn get_event(&self) -> Option<&Event> {
        Some(self)
    }
}

impl<W> Waitable for &W
where
    W: Waitable + ?Sized,
{
    fn get_event(&self) -> Option<&Event> {
        (**self).get_event()
    }
}

impl<W> Waitable for Option<W>
where
    W: Waitable,
{
    fn get_event(&self) -> Option<&Event> {
        self.as_ref().and_then(Waitable::get_event)
    }
}

/// Outcome of [`wait_many`]: how each live entry responded to registration.
///
/// `signaled + waited` equals the number of entries that exposed an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitCounts {
    /// Entries that were already signaled (no registration took place).
    pub signaled: usize,
    /// Entries on which `slot` is now registered.
    pub waited: usize,
}

/// Registers one slot against every event in `waitables`.
///
/// Calls [`Event::try_wait`] on each entry that exposes an event and tallies
/// the outcomes. Ordering across the range is unspecified; each individual
/// registration has the usual single-event semantics.
///
/// # Safety
///
/// As [`Event::try_wait`], for every registration counted in `waited`: the
/// slot must stay alive and in place until each of those waiters has fired
/// or been dismissed.
pub unsafe fn wait_many<I>(slot: &WaiterSlot<'_>, waitables: I) -> WaitCounts
where
    I: IntoIterator,
    I::Item: Waitable,
{
    let mut counts = WaitCounts {
        signaled: 0,
        waited: 0,
    };

    for waitable in waitables {
        if let Some(event) = waitable.get_event() {
            // SAFETY: Forwarded from the caller.
            if unsafe { event.try_wait(slot) } {
                counts.waited += 1;
            } else {
                counts.signaled += 1;
            }
        }
    }

    counts
}

/// Withdraws one slot's registrations from every event in `waitables`.
///
/// Calls [`Event::dismiss_wait`] on each entry that exposes an event and
/// returns the number of successful dismissals. Entries whose producer
/// already signaled are not dismissable and do not count.
///
/// # Safety
///
/// As [`Event::dismiss_wait`]: only the consumer that registered `slot` may
/// call this.
pub unsafe fn dismiss_wait_many<I>(slot: &WaiterSlot<'_>, waitables: I) -> usize
where
    I: IntoIterator,
    I::Item: Waitable,
{
    let mut dismissed = 0;

    for waitable in waitables {
        if let Some(event) = waitable.get_event() {
            // SAFETY: Forwarded from the caller.
            if unsafe { event.dismiss_wait(slot) } {
                dismissed += 1;
            }
        }
    }

    dismissed
}
