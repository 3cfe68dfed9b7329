//! Lock-free single-shot events with ownership handoff to the waiter.
//!
//! An [`Event`] is a one-word rendezvous cell between one producer and one
//! consumer. The consumer registers a [`Waiter`] through a [`WaiterSlot`];
//! the producer's [`signal`][Event::signal] delivers ownership of the event
//! straight into the waiter's callback - at most once, wait-free, and with
//! no spurious wakeups. [`dismiss_wait`][Event::dismiss_wait] is the
//! cancellation primitive, race-resolving against the signal.
//!
//! Events never block. Blocking belongs to the [`Latch`] a consumer brings
//! along; [`CountdownLatch`] is the stock implementation and the composite
//! operations - [`wait`], [`wait_all`], [`wait_any`] - drive it against any
//! number of [`Waitable`]s at once.
//!
//! On top of the event sit a one-shot [`Promise`]/[`Future`] pair and a
//! [`SharedFuture`] that multiplexes one resolution out to many listeners.
//!
//! # Example
//!
//! ```rust
//! use events_handoff::{CountdownLatch, Promise, wait_any};
//!
//! let mut latch = CountdownLatch::new();
//! let (promise, future) = Promise::<u32>::pair();
//! let (_slow_promise, slow_future) = Promise::<u32>::pair();
//!
//! promise.set(42);
//!
//! // Returns as soon as any entry has resolved.
//! wait_any(&mut latch, [&future, &slow_future]);
//!
//! assert_eq!(future.get(&mut latch), Ok(42));
//! ```

mod batch;
mod event;
mod future;
mod latch;
mod shared;
mod wait;
mod waiter;

pub use batch::*;
pub use event::*;
pub use future::{Disconnected, Future, Promise};
pub use latch::*;
pub use shared::*;
pub use wait::*;
pub use waiter::*;
