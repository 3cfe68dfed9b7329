use parking_lot::{Condvar, Mutex};

use crate::{EventPtr, Waiter};

/// Counter-based blocking strategy consumed by the wait entry points.
///
/// A latch counts signal deliveries since the last reset; [`Latch::wait`]
/// blocks until the count reaches a target and then consumes that many
/// deliveries. It is the bridge between the non-blocking event layer and
/// blocking callers.
pub trait Latch: Waiter {
    /// Resets the count to zero.
    ///
    /// Takes `&mut self`: the caller must ensure no signal or wait is in
    /// flight, and exclusive access is exactly that guarantee.
    fn reset(&mut self);

    /// Blocks until the count reaches `target`, then subtracts `target`.
    ///
    /// May be called concurrently with `signal`s, but not with another
    /// `wait` on the same latch.
    fn wait(&self, target: usize);
}

/// The default [`Latch`]: a counter guarded by a mutex and condition
/// variable.
///
/// As a [`Waiter`] it releases the delivered event untouched - the event's
/// owner keeps it - and counts the delivery.
#[derive(Debug, Default)]
pub struct CountdownLatch {
    count: Mutex<usize>,
    reached: Condvar,
}

impl CountdownLatch {
    /// Creates a latch with a zero count.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Waiter for CountdownLatch {
    fn signal(&self, event: EventPtr) {
        let _ = event.into_raw();

        let mut count = self.count.lock();
        *count += 1;
        // One concurrent waiter per the latch contract.
        self.reached.notify_one();
    }
}

impl Latch for CountdownLatch {
    fn reset(&mut self) {
        *self.count.get_mut() = 0;
    }

    fn wait(&self, target: usize) {
        if target == 0 {
            return;
        }

        let mut count = self.count.lock();
        while *count < target {
            self.reached.wait(&mut count);
        }
        *count -= target;
    }
}

#[cfg(test)]
mod tests {
    use std::ptr::NonNull;
    use std::thread;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::Event;

    assert_impl_all!(CountdownLatch: Send, Sync);

    /// Hands out an owned view of a borrowed event; the latch releases it.
    fn token(event: &Event) -> EventPtr {
        // SAFETY: The latch releases the handle without dropping it, so the
        // stack-embedded event is never treated as a heap allocation.
        unsafe { EventPtr::from_raw(NonNull::from(event)) }
    }

    #[test]
    fn wait_consumes_the_target() {
        let event = Event::new(true);
        let latch = CountdownLatch::new();

        latch.signal(token(&event));
        latch.signal(token(&event));
        latch.wait(2);

        // Both deliveries were consumed; a third suffices for a new wait.
        latch.signal(token(&event));
        latch.wait(1);
    }

    #[test]
    fn wait_blocks_until_signaled() {
        let event = Event::new(true);
        let latch = CountdownLatch::new();

        thread::scope(|s| {
            s.spawn(|| {
                latch.signal(token(&event));
            });

            latch.wait(1);
        });
    }

    #[test]
    fn reset_discards_pending_signals() {
        let event = Event::new(true);
        let mut latch = CountdownLatch::new();

        latch.signal(token(&event));
        latch.reset();

        latch.signal(token(&event));
        latch.wait(1);
    }
}
