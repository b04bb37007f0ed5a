//! Result sources: where submitted tasks go and where results come from.
//!
//! The server depends only on [`ResultSource`]. [`WireSource`] speaks the
//! length-prefixed frame protocol to a real worker pool;
//! [`SimulatedWorkers`] answers from a deterministic [`EventQueue`](crate::EventQueue).

use async_trait::async_trait;

use crate::bridge::protocol::{SubmitBatch, TaskResult};
use crate::error::Result;

mod simulated;
mod wire;

pub use simulated::{Simulation, SimulatedWorkers};
pub use wire::WireSource;

/// Capability the event loop drives: submit batches, receive results.
///
/// Futures are not `Send`; the event loop runs on a single thread.
#[async_trait(?Send)]
pub trait ResultSource {
    /// Hand one batch (possibly empty) to the workers.
    async fn submit(&mut self, batch: SubmitBatch) -> Result<()>;

    /// Next finished task, or `None` once no more results will ever arrive.
    async fn receive(&mut self) -> Result<Option<TaskResult>>;

    /// Send the final close signal. Called once when the loop stops.
    async fn close(&mut self) -> Result<()>;
}
