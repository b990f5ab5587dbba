//! Optimistic, durable queue for user-initiated mutations

mod executor;
mod queue;

pub use executor::{ApiActionExecutor, RemoteActionExecutor};
pub use queue::{ActionQueue, ProcessSummary};
