//! Counters for the control plane of one job.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::checkpoint::CheckpointFailureReason;

/// Serializable snapshot of control-plane activity.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ControlMetrics {
    pub plans_computed: u64,
    pub plans_aborted: HashMap<CheckpointFailureReason, u64>,
    pub failovers_handled: u64,
    pub tasks_restarted: u64,
    pub partition_groups_released: u64,
    pub last_plan_at: Option<DateTime<Utc>>,
}

impl ControlMetrics {
    pub fn record_plan(&mut self) {
        self.plans_computed += 1;
        self.last_plan_at = Some(Utc::now());
    }

    pub fn record_plan_aborted(&mut self, reason: CheckpointFailureReason) {
        *self.plans_aborted.entry(reason).or_default() += 1;
    }

    pub fn record_failover(&mut self, restarted: usize) {
        self.failovers_handled += 1;
        self.tasks_restarted += restarted as u64;
    }

    pub fn record_released(&mut self, groups: usize) {
        self.partition_groups_released += groups as u64;
    }

    /// Total aborted plans across all reasons.
    pub fn plans_aborted_total(&self) -> u64 {
        self.plans_aborted.values().sum()
    }
}
