use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::SluiceError;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }

            /// Lowercase hex form without dashes, as used in rescale requests.
            pub fn to_hex(&self) -> String {
                self.0.simple().to_string()
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0.simple())
            }
        }

        impl FromStr for $name {
            type Err = SluiceError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| SluiceError::InvalidId(format!("{s}: {e}")))
            }
        }
    };
}

uuid_id!(
    /// Identity of a logical operator in the job graph.
    JobVertexId
);

uuid_id!(
    /// Identity of the dataset a job vertex produces.
    IntermediateDataSetId
);

/// Identity of one parallel task: the job vertex plus the subtask index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ExecutionVertexId {
    pub job_vertex_id: JobVertexId,
    pub subtask_index: u32,
}

impl ExecutionVertexId {
    pub fn new(job_vertex_id: JobVertexId, subtask_index: u32) -> Self {
        Self {
            job_vertex_id,
            subtask_index,
        }
    }
}

impl fmt::Display for ExecutionVertexId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.job_vertex_id, self.subtask_index)
    }
}

/// Identity of one partition of an intermediate dataset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ResultPartitionId {
    pub dataset_id: IntermediateDataSetId,
    pub partition_num: u32,
}

impl ResultPartitionId {
    pub fn new(dataset_id: IntermediateDataSetId, partition_num: u32) -> Self {
        Self {
            dataset_id,
            partition_num,
        }
    }
}

impl fmt::Display for ResultPartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.dataset_id, self.partition_num)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_form_parses_back() {
        let id = JobVertexId::new();
        let parsed: JobVertexId = id.to_hex().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn garbage_is_rejected() {
        let err = "not-a-vertex".parse::<JobVertexId>().unwrap_err();
        assert!(matches!(err, SluiceError::InvalidId(_)));
    }

    #[test]
    fn execution_vertex_display_includes_subtask() {
        let jv = JobVertexId::new();
        let id = ExecutionVertexId::new(jv, 3);
        assert!(id.to_string().ends_with("_3"));
        assert!(id.to_string().starts_with(&jv.to_hex()));
    }
}
