//! Blocking wait entry points.
//!
//! These wrap the raw registration primitives with a [`Latch`] and own the
//! [`WaiterSlot`] for the duration of the call, which is what discharges the
//! raw layer's registration contract and makes them safe: every registration
//! is either dismissed or delivered and drained before the function returns.

use crate::{Latch, WaiterSlot, Waitable, dismiss_wait_many, wait_many};

/// Blocks until `waitable`'s event has been signaled.
///
/// Returns immediately if it already was, or if `waitable` exposes no event.
pub fn wait<L, W>(latch: &mut L, waitable: &W)
where
    L: Latch,
    W: Waitable + ?Sized,
{
    latch.reset();

    let Some(event) = waitable.get_event() else {
        return;
    };

    let slot = WaiterSlot::new(&*latch);

    // SAFETY: The slot is a local that stays in place; if the registration
    // succeeds we block right here until the waiter has fired.
    if unsafe { event.try_wait(&slot) } {
        latch.wait(1);
    }
}

/// Blocks until every event in `waitables` has been signaled.
pub fn wait_all<L, I>(latch: &mut L, waitables: I)
where
    L: Latch,
    I: IntoIterator,
    I::Item: Waitable,
{
    latch.reset();

    let slot = WaiterSlot::new(&*latch);

    // SAFETY: The slot is a local that stays in place; we block below until
    // every registered waiter has fired.
    let counts = unsafe { wait_many(&slot, waitables) };

    if counts.waited > 0 {
        latch.wait(counts.waited);
    }
}

/// Blocks until at least one event in `waitables` has been signaled.
///
/// On return, exactly one completion has been consumed on the caller's
/// behalf and no registration is left behind: the remaining entries have
/// either been dismissed or their already-inevitable deliveries have been
/// drained through the latch. No wakeup is lost and none leaks into a later
/// use of the latch.
pub fn wait_any<L, I>(latch: &mut L, waitables: I)
where
    L: Latch,
    I: IntoIterator + Clone,
    I::Item: Waitable,
{
    latch.reset();

    let slot = WaiterSlot::new(&*latch);

    // SAFETY: The slot is a local that stays in place; every registration is
    // dismissed or drained before this function returns.
    let counts = unsafe { wait_many(&slot, waitables.clone()) };

    if counts.signaled == 0 {
        if counts.waited == 0 {
            // Nothing to wait on at all.
            return;
        }

        latch.wait(1);
    }

    // SAFETY: Same consumer, same slot as the registration above.
    let dismissed = unsafe { dismiss_wait_many(&slot, waitables) };
    debug_assert!(dismissed <= counts.waited);

    // Registrations that were neither dismissed nor counted as signaled are
    // deliveries already made or imminent; they must be drained so the slot
    // can be retired and the latch left clean.
    let mut pending = counts.waited - dismissed;

    if counts.signaled == 0 {
        debug_assert!(pending >= 1);
        // One of them is the wake signal consumed by the blocking wait.
        pending -= 1;
    }

    if pending > 0 {
        latch.wait(pending);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Barrier;
    use std::thread;

    use super::*;
    use crate::{CountdownLatch, Event};

    #[test]
    fn wait_returns_immediately_when_signaled() {
        let mut latch = CountdownLatch::new();
        let event = Event::new(true);

        wait(&mut latch, &event);
    }

    #[test]
    fn wait_blocks_for_the_producer() {
        let mut latch = CountdownLatch::new();
        let event = Event::new(false);
        let start = Barrier::new(2);

        thread::scope(|s| {
            s.spawn(|| {
                start.wait();
                // SAFETY: Sole producer; the latch releases the event.
                unsafe { event.signal() };
            });

            start.wait();
            wait(&mut latch, &event);
        });

        assert!(event.is_signaled());
    }

    #[test]
    fn wait_all_collects_every_signal() {
        let mut latch = CountdownLatch::new();
        let events = [Event::new(false), Event::new(true), Event::new(false)];

        thread::scope(|s| {
            s.spawn(|| {
                // SAFETY: Sole producer per event; the latch releases them.
                unsafe {
                    events[0].signal();
                    events[2].signal();
                }
            });

            wait_all(&mut latch, &events);
        });

        assert!(events.iter().all(Event::is_signaled));
    }

    #[test]
    fn wait_any_detects_a_pre_signaled_entry_without_blocking() {
        let mut latch = CountdownLatch::new();
        let events = [Event::new(false), Event::new(true), Event::new(false)];

        wait_any(&mut latch, &events);

        // The two empty entries were dismissed, not delivered.
        assert!(!events[0].is_signaled());
        assert!(!events[2].is_signaled());

        // Dismissed entries are reusable: a later signal simply parks the
        // event in the signaled state.
        // SAFETY: Sole producer; no waiter is registered anymore.
        unsafe {
            events[0].signal();
        }
        assert!(events[0].is_signaled());
    }

    #[test]
    fn wait_any_blocks_for_the_first_producer() {
        let mut latch = CountdownLatch::new();
        let events = [Event::new(false), Event::new(false)];
        let start = Barrier::new(2);

        thread::scope(|s| {
            s.spawn(|| {
                start.wait();
                // SAFETY: Sole producer; the latch releases the event.
                unsafe { events[1].signal() };
            });

            start.wait();
            wait_any(&mut latch, &events);
        });

        assert!(events[1].is_signaled());
    }

    #[test]
    fn wait_any_drains_simultaneous_completions() {
        // Both producers fire; wait_any must consume one completion and
        // drain the other so the latch is clean for reuse.
        for _ in 0..200 {
            let mut latch = CountdownLatch::new();
            let events = [Event::new(false), Event::new(false)];
            let start = Barrier::new(3);

            thread::scope(|s| {
                let start = &start;

                for event in &events {
                    s.spawn(move || {
                        start.wait();
                        // SAFETY: Sole producer per event.
                        unsafe { event.signal() };
                    });
                }

                start.wait();
                wait_any(&mut latch, &events);
            });

            // Every registration was consumed: the events may be dropped
            // right here, which debug-asserts that no waiter is left behind.
            assert!(events.iter().all(Event::is_signaled));
        }
    }

    #[test]
    fn wait_any_of_nothing_returns() {
        let mut latch = CountdownLatch::new();
        let events: [Event; 0] = [];

        wait_any(&mut latch, &events);
    }
}
