//! Error taxonomy for the sweep engine.
//!
//! Business failures of a run (non-zero return code) are data and never show
//! up here. Everything below is either a caller mistake or a protocol
//! violation that must stop the event loop.

use thiserror::Error;

use crate::task::{ParameterSetId, TaskId};

#[derive(Debug, Error)]
pub enum SweepError {
    #[error("{what} id {id} out of range (table holds {len})")]
    OutOfRange {
        what: &'static str,
        id: usize,
        len: usize,
    },

    /// A second result arrived for a task. The worker side is out of sync.
    #[error("task {id} received a second result")]
    DuplicateResult { id: TaskId },

    #[error("result frame references unknown task {id}")]
    UnknownTaskId { id: TaskId },

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    /// One parameter tuple resolved to two parameter sets. Only reachable
    /// through a corrupted snapshot.
    #[error("parameters {params} map to parameter sets {first} and {second}")]
    DeduplicationConflict {
        params: String,
        first: ParameterSetId,
        second: ParameterSetId,
    },

    #[error("no command builder registered, cannot build the command of run {id}")]
    CommandBuilderMissing { id: TaskId },

    #[error(
        "runs of parameter set {parameter_set_id} disagree on output length ({expected} vs {found})"
    )]
    OutputLengthMismatch {
        parameter_set_id: ParameterSetId,
        expected: usize,
        found: usize,
    },

    #[error("inconsistent snapshot: {0}")]
    InconsistentSnapshot(String),

    #[error("snapshot encoding failed: {0}")]
    Snapshot(#[from] serde_json::Error),

    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error("event loop stalled: {flows} flow(s) suspended with no work in flight")]
    Stalled { flows: usize },

    #[error("flow failed: {0:#}")]
    Flow(anyhow::Error),
}

impl SweepError {
    pub(crate) fn task_out_of_range(id: TaskId, len: usize) -> Self {
        Self::OutOfRange {
            what: "task",
            id,
            len,
        }
    }

    pub(crate) fn parameter_set_out_of_range(id: ParameterSetId, len: usize) -> Self {
        Self::OutOfRange {
            what: "parameter set",
            id,
            len,
        }
    }

    /// Protocol violations desynchronize the table from the workers.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateResult { .. } | Self::UnknownTaskId { .. } | Self::MalformedFrame(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SweepError>;
