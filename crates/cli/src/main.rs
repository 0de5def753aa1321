mod cli;
mod commands;
mod report;

use anyhow::{Context, Result};
use clap::Parser;
use sluice_core::config::{load_dotenv, Config};

use crate::cli::{CliArgs, Command};

#[tokio::main]
async fn main() -> Result<()> {
    load_dotenv();
    let config = Config::from_env().context("failed to load configuration")?;

    // Logs go to stderr so JSON on stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log.filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
    config.log_summary();

    let args = CliArgs::parse();
    match args.command {
        Command::Regions { job } => {
            let report = commands::regions(&job)?;
            report::print(&report, args.json)
        }
        Command::Plan { job, scope_group } => {
            let report = commands::plan(&job, scope_group, &config).await?;
            report::print(&report, args.json)
        }
        Command::Failover {
            job,
            vertex,
            lost_partition,
        } => {
            let report =
                commands::failover(&job, &vertex, lost_partition.as_deref(), &config).await?;
            report::print(&report, args.json)
        }
    }
}
