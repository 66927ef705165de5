//! Deferred values that settle exactly once.
//!
//! A [`Promise`] starts out pending and is settled by the first call to one
//! of the two capabilities handed to its setup routine. Observers registered
//! with [`Promise::then`] and friends are notified on a [`MicrotaskQueue`],
//! exactly once each and in registration order, whether they were registered
//! before or after settlement.
//!
//! ```
//! use thenable::{Error, MicrotaskQueue, Promise, State};
//!
//! let queue = MicrotaskQueue::new();
//! let first = Promise::<i32, Error>::new(&queue, |resolve, _reject| {
//!     resolve.resolve(1);
//!     Ok(())
//! });
//! let last = first.map(|v| Ok(v + 1)).map(|v| Ok(v * 10));
//!
//! queue.run_until_idle();
//! assert_eq!(last.state(), State::Fulfilled);
//! assert_eq!(last.outcome(), Some(Ok(20)));
//! ```
use std::fmt;

mod capability;
mod promise;
mod queue;
mod thenable;

pub use capability::{Reject, Resolve};
pub use promise::{Promise, Waiter};
pub use queue::MicrotaskQueue;
pub use thenable::{Resolution, Thenable};

/// Faults the library itself rejects promises with.
///
/// Reason types opt in by implementing `From<Error>`.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("promise was resolved with itself")]
    CyclicResolution,
    #[error("every settlement capability was dropped before the promise settled")]
    Abandoned,
}

/// Where a promise is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    Pending,
    Fulfilled,
    Rejected,
}

impl State {
    pub fn is_settled(self) -> bool {
        self != State::Pending
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            State::Pending => "PENDING",
            State::Fulfilled => "FULFILLED",
            State::Rejected => "REJECTED",
        })
    }
}
