use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Inspect the scheduling control plane of a job definition.
///
/// Job files are TOML: vertices, edges and an optional `[states]` table
/// giving the current state of each task.
#[derive(Parser, Debug)]
#[command(name = "sluice", version, about = "Scheduling control plane inspector")]
pub struct CliArgs {
    /// Print machine-readable JSON instead of the text report
    #[arg(long, global = true)]
    pub json: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List the pipelined regions of a job
    Regions {
        /// Path to the job definition
        job: PathBuf,
    },

    /// Compute the checkpoint plan for the task states in the job file
    Plan {
        /// Path to the job definition
        job: PathBuf,

        /// Restrict the plan to one snapshot group
        #[arg(long)]
        scope_group: Option<String>,
    },

    /// Compute the tasks to restart after a task fails
    Failover {
        /// Path to the job definition
        job: PathBuf,

        /// Failed task as NAME:INDEX
        #[arg(long)]
        vertex: String,

        /// Partition the failed task could not read, as PRODUCER:SUBTASK[:OUTPUT]
        #[arg(long)]
        lost_partition: Option<String>,
    },
}
