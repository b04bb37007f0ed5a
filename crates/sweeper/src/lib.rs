//! sweeper: coordinator for parameter-sweep experiments.
//!
//! User code creates tasks and runs in a [`WorkTable`], awaits their
//! completion from cooperative flows, and a [`Server`] event loop feeds
//! them to a worker pool through a [`ResultSource`].

mod completion;
mod config;
mod engine;
mod error;
mod event_queue;
mod parameter_set;
mod runtime;
mod server;
mod table;
mod task;
mod waiters;

pub mod bridge;
pub mod logging;
pub mod transport;

pub use completion::Completion;
pub use config::ServerConfig;
pub use engine::Engine;
pub use error::{Result, SweepError};
pub use event_queue::{Completed, EventQueue, Tick};
pub use parameter_set::{ParameterSet, ParameterSetView};
pub use runtime::{FlowHandle, FlowId};
pub use server::{EndReason, RunReport, Server};
pub use table::{CommandBuilder, WorkTable};
pub use task::{Outcome, Param, ParameterSetId, Params, Task, TaskId, TaskKind};
pub use transport::{ResultSource, SimulatedWorkers, Simulation, WireSource};
