use std::fmt;

use serde::Serialize;
use sluice_core::SluiceError;
use thiserror::Error;

/// Why a checkpoint attempt was aborted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CheckpointFailureReason {
    /// A task that must take part is not RUNNING, has no attempt, or has
    /// finished while checkpoints after finished tasks are disabled.
    NotAllRequiredTasksRunning,
    /// The requested scope names vertices or groups the job does not have.
    InvalidScope,
    /// The control executor went away before the plan was computed.
    CoordinatorShutdown,
    /// The topology contradicted itself while planning.
    TopologyInconsistent,
}

impl fmt::Display for CheckpointFailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            CheckpointFailureReason::NotAllRequiredTasksRunning => {
                "Not all required tasks are currently running"
            }
            CheckpointFailureReason::InvalidScope => "The checkpoint scope is invalid",
            CheckpointFailureReason::CoordinatorShutdown => "The checkpoint coordinator is shut down",
            CheckpointFailureReason::TopologyInconsistent => "The execution topology is inconsistent",
        };
        f.write_str(text)
    }
}

/// A checkpoint attempt that could not be planned.
#[derive(Debug, Clone, Error)]
#[error("{reason}: {message}")]
pub struct CheckpointError {
    pub reason: CheckpointFailureReason,
    pub message: String,
}

impl CheckpointError {
    pub fn new(reason: CheckpointFailureReason, message: impl Into<String>) -> Self {
        Self {
            reason,
            message: message.into(),
        }
    }

    pub(crate) fn not_all_running(message: impl Into<String>) -> Self {
        Self::new(CheckpointFailureReason::NotAllRequiredTasksRunning, message)
    }
}

impl From<SluiceError> for CheckpointError {
    fn from(err: SluiceError) -> Self {
        Self::new(CheckpointFailureReason::TopologyInconsistent, err.to_string())
    }
}
