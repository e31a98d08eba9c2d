//! Replica Predictor CLI
//!
//! A command-line tool for reading predictions, the scaling signal and
//! service health, and for browsing metric history in the metrics store.

mod client;
mod commands;
mod output;

use anyhow::Result;
use clap::{Parser, Subcommand};
use commands::{history, prediction};
use predictor_lib::collector::RetryPolicy;
use predictor_lib::models::{RawMetric, WorkloadTarget};
use std::time::Duration;

/// Replica Predictor CLI
#[derive(Parser)]
#[command(name = "rpp")]
#[command(author, version, about = "CLI for the Replica Predictor", long_about = None)]
pub struct Cli {
    /// API endpoint URL (can also be set via RPP_API_URL env var)
    #[arg(long, env = "RPP_API_URL", default_value = "http://localhost:8000")]
    pub api_url: String,

    /// Output format
    #[arg(long, short, default_value = "table")]
    pub format: output::OutputFormat,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Show the latest replica prediction
    Predict,

    /// Show the value served to the external autoscaler
    Signal,

    /// Show a fresh snapshot of the workload metrics
    Snapshot,

    /// Show service health
    Health,

    /// Show the recent history of one metric from Prometheus
    History {
        /// Metric name (cpu_usage, memory_usage, request_rate, queue_length,
        /// response_time, active_connections)
        metric: RawMetric,

        /// Time window to look back over (e.g. 30m, 6h, 7d)
        #[arg(long, default_value = "1h")]
        since: String,

        /// Resolution of the returned series
        #[arg(long, default_value = "5m")]
        step: String,

        /// Prometheus base URL
        #[arg(
            long,
            env = "PROMETHEUS_URL",
            default_value = "http://localhost:9090"
        )]
        prometheus_url: String,

        /// Namespace of the target workload
        #[arg(long, short, env = "TARGET_NAMESPACE", default_value = "hamzadevops")]
        namespace: String,

        /// Deployment name of the target workload
        #[arg(long, short, env = "TARGET_DEPLOYMENT", default_value = "eventmanagement")]
        deployment: String,

        /// Query attempts before giving up
        #[arg(long, env = "RETRY_COUNT", default_value_t = 3)]
        retries: u32,

        /// Seconds between attempts
        #[arg(long, env = "RETRY_DELAY_SECS", default_value_t = 5)]
        retry_delay: u64,

        /// Per-query timeout in seconds
        #[arg(long, env = "QUERY_TIMEOUT_SECS", default_value_t = 10)]
        timeout: u64,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    // Initialize client
    let client = client::ApiClient::new(&cli.api_url)?;

    // Execute command
    match cli.command {
        Commands::Predict => prediction::show_prediction(&client, cli.format).await?,
        Commands::Signal => prediction::show_signal(&client, cli.format).await?,
        Commands::Snapshot => prediction::show_snapshot(&client, cli.format).await?,
        Commands::Health => prediction::show_health(&client, cli.format).await?,
        Commands::History {
            metric,
            since,
            step,
            prometheus_url,
            namespace,
            deployment,
            retries,
            retry_delay,
            timeout,
        } => {
            let options = history::HistoryOptions {
                prometheus_url,
                target: WorkloadTarget::new(namespace, deployment),
                timeout: Duration::from_secs(timeout.max(1)),
                retry: RetryPolicy {
                    attempts: retries.max(1),
                    delay: Duration::from_secs(retry_delay),
                },
            };
            history::show_history(&options, metric, &since, &step, cli.format).await?;
        }
    }

    Ok(())
}
