//! Request pacing: a priority-aware throttled task queue.
//!
//! One [`ThrottleQueue`] is meant to be shared by every caller that talks to
//! the same rate-limited host. Callers enqueue asynchronous operations and
//! await the returned [`Settlement`]; the queue decides when each runs.

mod error;
mod priority;
mod queue;

pub use error::TaskError;
pub use priority::{DEFAULT_PRIORITY, Priority};
pub use queue::{DEFAULT_TICK, Settlement, ThrottleConfig, ThrottleQueue};
