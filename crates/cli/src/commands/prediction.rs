//! Commands that read from the running predictor service

use anyhow::Result;
use colored::Colorize;
use predictor_lib::models::{RawMetric, WorkloadSnapshot};
use serde::Serialize;
use tabled::Tabled;

use crate::client::ApiClient;
use crate::output::{
    color_confidence, color_status, format_timestamp, format_value, print_info, print_json,
    print_success, print_table, print_warning, OutputFormat,
};

/// Row for the metrics table
#[derive(Tabled, Serialize)]
struct MetricRow {
    #[tabled(rename = "Metric")]
    metric: String,
    #[tabled(rename = "Value")]
    value: String,
    #[tabled(rename = "Status")]
    status: String,
}

fn metric_rows(snapshot: &WorkloadSnapshot, failed: &[String]) -> Vec<MetricRow> {
    RawMetric::ALL
        .iter()
        .map(|metric| {
            let failed = failed.iter().any(|f| f == metric.name());
            MetricRow {
                metric: metric.name().to_string(),
                value: format_value(snapshot.get(*metric)),
                status: if failed {
                    color_status("failed")
                } else {
                    color_status("ok")
                },
            }
        })
        .collect()
}

/// Show the latest prediction
pub async fn show_prediction(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let result = client.prediction().await?;

    match format {
        OutputFormat::Json => print_json(&result),
        OutputFormat::Table => {
            println!("{}", "Replica Prediction".bold());
            println!("{}", "=".repeat(50));
            println!(
                "Predicted replicas:     {}",
                result.replica_count.to_string().cyan().bold()
            );
            println!(
                "Confidence:             {}",
                color_confidence(result.confidence)
            );
            println!("Model version:          {}", result.model_version);
            println!(
                "Timestamp:              {}",
                format_timestamp(&result.timestamp)
            );
            println!();

            println!("{}", "Metrics Used".bold());
            print_table(&metric_rows(&result.snapshot, &[]), format);

            if result.confidence < 0.7 {
                println!();
                print_warning("Low confidence prediction");
            }
        }
    }

    Ok(())
}

/// Show the value handed to the external autoscaler
pub async fn show_signal(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let signal = client.signal().await?;

    match format {
        OutputFormat::Json => print_json(&signal),
        OutputFormat::Table => {
            println!(
                "Scaling signal:         {}",
                signal.metric_value.to_string().cyan().bold()
            );
            println!(
                "Timestamp:              {}",
                format_timestamp(&signal.timestamp)
            );
        }
    }

    Ok(())
}

/// Show a fresh metrics snapshot as seen by the service
pub async fn show_snapshot(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let current = client.current_metrics().await?;

    match format {
        OutputFormat::Json => print_json(&current),
        OutputFormat::Table => {
            println!(
                "{} ({})",
                "Current Metrics".bold(),
                format_timestamp(&current.timestamp)
            );
            print_table(
                &metric_rows(&current.metrics, &current.failed_metrics),
                format,
            );

            if !current.failed_metrics.is_empty() {
                println!();
                print_warning(&format!(
                    "{} metric(s) could not be acquired and read as zero",
                    current.failed_metrics.len()
                ));
            }
        }
    }

    Ok(())
}

/// Show service health
pub async fn show_health(client: &ApiClient, format: OutputFormat) -> Result<()> {
    let (status_code, report) = client.health().await?;

    match format {
        OutputFormat::Json => print_json(&report),
        OutputFormat::Table => {
            println!("{}", "Service Health".bold());
            println!("{}", "=".repeat(50));
            println!("Status:                 {}", color_status(&report.status));
            println!(
                "Model:                  {}",
                color_status(if report.model_loaded { "loaded" } else { "missing" })
            );
            println!(
                "Prometheus:             {}",
                color_status(if report.prometheus_connected {
                    "connected"
                } else {
                    "unreachable"
                })
            );
            match report.expected_features {
                Some(n) => println!("Expected features:      {}", n),
                None => println!("Expected features:      {}", "unknown".dimmed()),
            }
            println!(
                "Checked at:             {}",
                format_timestamp(&report.timestamp)
            );

            println!();
            if status_code == 200 {
                print_success("Model loaded and Prometheus reachable");
            } else {
                print_info("The scaling signal falls back to 1 replica while unhealthy");
            }
        }
    }

    Ok(())
}
