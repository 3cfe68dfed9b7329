//! Symmetric stack-switched continuations.
//!
//! A [`Continuation`] is a suspended execution on its own call stack,
//! resumable with typed arguments and yielding typed results. Control moves
//! with a single register save/restore ([`create_context`] allocates the
//! stack; the platform leaf does the switching); there is no scheduler and
//! no hidden state machine - the coroutine and its resumer simply trade the
//! processor back and forth.
//!
//! Each coroutine's stack is allocated exactly once at creation and freed
//! exactly once by a cleanup step that runs *on the destination stack* -
//! a stack cannot free itself while executing on itself. Abnormal
//! termination rides the same rails: a panic routed through
//! [`with_escape`] unwinds the coroutine (running its destructors), frees
//! its stack, and re-raises on the resumer. [`signal_exit`] drives a live
//! coroutine to termination from outside; [`splice`] and [`splicecc`] run
//! closures on top of an existing coroutine's stack.
//!
//! # Example
//!
//! ```rust
//! use stack_context::{Continuation, create_context};
//!
//! let mut numbers = create_context(|mut caller: Continuation<u32, ()>| {
//!     for n in 1..=3 {
//!         caller.resume(n);
//!     }
//!     caller.into()
//! })
//! .expect("stack allocation failed");
//!
//! assert_eq!(numbers.take_result(), 1);
//! assert_eq!(numbers.resume(()).take_result(), 2);
//! assert_eq!(numbers.resume(()).take_result(), 3);
//!
//! numbers.resume(());
//! assert!(numbers.is_terminated());
//! ```

mod context;
mod continuation;
mod stack;
mod switch;
mod trampoline;
mod transfer;

pub use context::*;
pub use continuation::*;
pub use stack::*;
pub use switch::SwitchPair;
