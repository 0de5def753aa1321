use std::fmt;

use sluice_core::JobVertexId;

/// The part of the job a checkpoint plan covers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PlanScope {
    /// Every task of the job.
    #[default]
    Job,
    /// Members of a snapshot group and everything downstream of them.
    SnapshotGroup(String),
    /// The rescaled vertex and its downstream; the blocked vertices receive
    /// the barrier.
    Rescale {
        rescaled: JobVertexId,
        blocked: Vec<JobVertexId>,
    },
}

impl fmt::Display for PlanScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanScope::Job => write!(f, "job"),
            PlanScope::SnapshotGroup(group) => write!(f, "snapshot group '{group}'"),
            PlanScope::Rescale { rescaled, blocked } => {
                write!(f, "rescale of {rescaled} ({} blocked)", blocked.len())
            }
        }
    }
}
