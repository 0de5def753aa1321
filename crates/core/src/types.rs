use serde::{Deserialize, Serialize};

/// Lifecycle state of one execution attempt of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionState {
    Created,
    Scheduled,
    Deploying,
    Initializing,
    Running,
    Finished,
    Canceling,
    Canceled,
    Failed,
}

impl ExecutionState {
    /// Terminal states never transition again within the same attempt.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExecutionState::Finished | ExecutionState::Canceled | ExecutionState::Failed
        )
    }
}

impl std::fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionState::Created => write!(f, "CREATED"),
            ExecutionState::Scheduled => write!(f, "SCHEDULED"),
            ExecutionState::Deploying => write!(f, "DEPLOYING"),
            ExecutionState::Initializing => write!(f, "INITIALIZING"),
            ExecutionState::Running => write!(f, "RUNNING"),
            ExecutionState::Finished => write!(f, "FINISHED"),
            ExecutionState::Canceling => write!(f, "CANCELING"),
            ExecutionState::Canceled => write!(f, "CANCELED"),
            ExecutionState::Failed => write!(f, "FAILED"),
        }
    }
}

/// How a produced partition hands data to its consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ResultPartitionType {
    /// Streams records while the producer is still running.
    Pipelined,
    /// Buffers the complete result before consumers may read it.
    Blocking,
}

impl ResultPartitionType {
    pub fn is_blocking(self) -> bool {
        self == ResultPartitionType::Blocking
    }

    pub fn is_pipelined(self) -> bool {
        self == ResultPartitionType::Pipelined
    }
}

impl std::fmt::Display for ResultPartitionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResultPartitionType::Pipelined => write!(f, "PIPELINED"),
            ResultPartitionType::Blocking => write!(f, "BLOCKING"),
        }
    }
}

/// Wiring between producer and consumer subtasks of one job edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DistributionPattern {
    /// Fixed index-to-index (or index-range) wiring.
    Pointwise,
    /// Every producer subtask connects to every consumer subtask.
    AllToAll,
}

impl std::fmt::Display for DistributionPattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DistributionPattern::Pointwise => write!(f, "POINTWISE"),
            DistributionPattern::AllToAll => write!(f, "ALL_TO_ALL"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(ExecutionState::Finished.is_terminal());
        assert!(ExecutionState::Canceled.is_terminal());
        assert!(ExecutionState::Failed.is_terminal());
        assert!(!ExecutionState::Running.is_terminal());
        assert!(!ExecutionState::Canceling.is_terminal());
        assert!(!ExecutionState::Created.is_terminal());
    }

    #[test]
    fn serde_uses_screaming_case() {
        let json = serde_json::to_string(&DistributionPattern::AllToAll).unwrap();
        assert_eq!(json, "\"ALL_TO_ALL\"");
        let state: ExecutionState = serde_json::from_str("\"INITIALIZING\"").unwrap();
        assert_eq!(state, ExecutionState::Initializing);
    }
}
