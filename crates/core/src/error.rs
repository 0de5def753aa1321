use thiserror::Error;

use crate::ids::{ExecutionVertexId, JobVertexId, ResultPartitionId};

#[derive(Error, Debug)]
pub enum SluiceError {
    #[error("Invalid id: {0}")]
    InvalidId(String),

    #[error("Unknown execution vertex: {0}")]
    UnknownVertex(ExecutionVertexId),

    #[error("Unknown job vertex: {0}")]
    UnknownJobVertex(JobVertexId),

    #[error("Unknown result partition: {0}")]
    UnknownPartition(ResultPartitionId),

    #[error("Execution vertex {0} has no execution attempt")]
    NoExecutionAttempt(ExecutionVertexId),

    #[error("Invalid job graph: {0}")]
    InvalidJobGraph(String),

    #[error("Co-located tasks must be in the same pipelined region: {0}")]
    CoLocationViolation(String),

    #[error("Unsupported rescale: {0}")]
    UnsupportedRescale(String),

    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Config error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl SluiceError {
    /// Unknown-id lookups indicate a broken internal invariant rather than bad input.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(
            self,
            SluiceError::UnknownVertex(_)
                | SluiceError::UnknownJobVertex(_)
                | SluiceError::UnknownPartition(_)
        )
    }
}
