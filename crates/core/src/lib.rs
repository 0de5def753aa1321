pub mod config;
pub mod error;
pub mod ids;
pub mod types;

pub use config::{Config, FailoverStrategyKind, PartitionReleaseKind};
pub use error::*;
pub use ids::*;
pub use types::*;
