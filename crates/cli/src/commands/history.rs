//! Historical metric queries straight against the metrics store

use anyhow::{bail, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use colored::Colorize;
use predictor_lib::collector::{
    PrometheusStore, QueryData, QueryRequest, RetryPolicy, TimeRange,
};
use predictor_lib::models::{RawMetric, WorkloadTarget};
use serde::Serialize;
use std::time::Duration;
use tabled::Tabled;

use crate::output::{format_timestamp, format_value, print_json, print_table, OutputFormat};

/// Where and how to query the metrics store
pub struct HistoryOptions {
    pub prometheus_url: String,
    pub target: WorkloadTarget,
    pub timeout: Duration,
    pub retry: RetryPolicy,
}

/// Row for history table
#[derive(Tabled, Serialize)]
struct HistoryRow {
    #[tabled(rename = "Timestamp")]
    timestamp: String,
    #[tabled(rename = "Value")]
    value: String,
}

#[derive(Serialize)]
struct HistorySummary {
    metric: String,
    points: usize,
    min: Option<f64>,
    max: Option<f64>,
    mean: Option<f64>,
    samples: Vec<(DateTime<Utc>, f64)>,
}

/// Parse a duration such as `90s`, `15m`, `6h` or `7d`
pub fn parse_duration(input: &str) -> Result<Duration> {
    let input = input.trim();
    let (number, unit) = match input.char_indices().last() {
        Some((idx, unit)) if idx > 0 => (&input[..idx], unit),
        _ => bail!("invalid duration '{}': expected e.g. 30m, 6h, 7d", input),
    };
    let amount: u64 = number
        .parse()
        .with_context(|| format!("invalid duration '{}'", input))?;
    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86400,
        _ => bail!("invalid duration unit '{}': use s, m, h or d", unit),
    };
    let secs = amount
        .checked_mul(multiplier)
        .with_context(|| format!("duration '{}' is too large", input))?;
    if secs == 0 {
        bail!("duration must be positive");
    }
    Ok(Duration::from_secs(secs))
}

fn summarize(metric: RawMetric, data: &QueryData) -> HistorySummary {
    let points: Vec<(f64, f64)> = match data {
        QueryData::Matrix(series) => series
            .first()
            .map(|s| s.points.clone())
            .unwrap_or_default(),
        QueryData::Vector(samples) => samples
            .first()
            .map(|s| vec![(s.timestamp, s.value)])
            .unwrap_or_default(),
        QueryData::Scalar { timestamp, value } => vec![(*timestamp, *value)],
        QueryData::String { .. } => Vec::new(),
    };

    let samples: Vec<(DateTime<Utc>, f64)> = points
        .iter()
        .filter(|(_, v)| v.is_finite())
        .filter_map(|(ts, v)| {
            Utc.timestamp_opt(*ts as i64, 0)
                .single()
                .map(|ts| (ts, *v))
        })
        .collect();

    let values = samples.iter().map(|(_, v)| *v);
    let min = values.clone().reduce(f64::min);
    let max = values.clone().reduce(f64::max);
    let mean = if samples.is_empty() {
        None
    } else {
        Some(values.sum::<f64>() / samples.len() as f64)
    };

    HistorySummary {
        metric: metric.name().to_string(),
        points: samples.len(),
        min,
        max,
        mean,
        samples,
    }
}

/// Show the recent history of one workload metric
pub async fn show_history(
    options: &HistoryOptions,
    metric: RawMetric,
    since: &str,
    step: &str,
    format: OutputFormat,
) -> Result<()> {
    let since = parse_duration(since)?;
    let step = parse_duration(step)?;

    let end = Utc::now();
    let start = chrono::Duration::from_std(since)
        .ok()
        .and_then(|window| end.checked_sub_signed(window))
        .context("Duration out of range")?;

    let store = PrometheusStore::new(&options.prometheus_url, options.timeout)?;
    let expr = options
        .target
        .default_queries(options.timeout)
        .into_iter()
        .find(|q| q.metric == metric)
        .map(|q| q.expr)
        .context("No query defined for metric")?;

    let data = store
        .query_with_retry(
            &QueryRequest::range(expr, TimeRange { start, end }, step),
            options.retry,
        )
        .await
        .with_context(|| format!("Failed to query {}", store.base_url()))?;

    let summary = summarize(metric, &data);

    match format {
        OutputFormat::Json => print_json(&summary),
        OutputFormat::Table => {
            println!(
                "{} {}/{}",
                format!("History of {}", summary.metric).bold(),
                options.target.namespace.cyan(),
                options.target.deployment.cyan()
            );
            let rows: Vec<HistoryRow> = summary
                .samples
                .iter()
                .map(|(ts, v)| HistoryRow {
                    timestamp: format_timestamp(ts),
                    value: format_value(*v),
                })
                .collect();
            print_table(&rows, format);

            if let (Some(min), Some(max), Some(mean)) = (summary.min, summary.max, summary.mean) {
                println!();
                println!("{}", "Summary".bold());
                println!("{}", "-".repeat(50));
                println!("Points:                 {}", summary.points);
                println!("Min:                    {}", format_value(min));
                println!("Max:                    {}", format_value(max));
                println!("Mean:                   {}", format_value(mean));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use predictor_lib::collector::Series;
    use std::collections::HashMap;

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("90s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_duration("15m").unwrap(), Duration::from_secs(900));
        assert_eq!(parse_duration("6h").unwrap(), Duration::from_secs(21600));
        assert_eq!(parse_duration("7d").unwrap(), Duration::from_secs(604800));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("h").is_err());
        assert!(parse_duration("10w").is_err());
        assert!(parse_duration("abcm").is_err());
        assert!(parse_duration("0m").is_err());
    }

    #[test]
    fn test_parse_duration_multibyte_unit() {
        let err = parse_duration("5µ").unwrap_err();
        assert!(err.to_string().contains("unit"));
        assert!(parse_duration("µ").is_err());
    }

    #[test]
    fn test_parse_duration_overflow() {
        let err = parse_duration(&format!("{}d", u64::MAX / 2)).unwrap_err();
        assert!(err.to_string().contains("too large"));
    }

    #[test]
    fn test_summarize_matrix() {
        let data = QueryData::Matrix(vec![Series {
            labels: HashMap::new(),
            points: vec![(1_700_000_000.0, 2.0), (1_700_000_060.0, 4.0), (1_700_000_120.0, f64::NAN)],
        }]);
        let summary = summarize(RawMetric::RequestRate, &data);

        assert_eq!(summary.points, 2);
        assert_eq!(summary.min, Some(2.0));
        assert_eq!(summary.max, Some(4.0));
        assert_eq!(summary.mean, Some(3.0));
    }

    #[test]
    fn test_summarize_empty_result() {
        let summary = summarize(RawMetric::CpuUsage, &QueryData::Matrix(vec![]));
        assert_eq!(summary.points, 0);
        assert!(summary.mean.is_none());
    }

    #[tokio::test]
    async fn test_show_history_queries_range_endpoint() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/api/v1/query_range")
            .match_query(mockito::Matcher::AllOf(vec![
                mockito::Matcher::UrlEncoded("step".into(), "300".into()),
                mockito::Matcher::Regex("query=".into()),
            ]))
            .with_status(200)
            .with_body(
                r#"{"status":"success","data":{"resultType":"matrix","result":[
                {"metric":{},"values":[[1700000000,"1.5"],[1700000300,"2.5"]]}]}}"#,
            )
            .create_async()
            .await;

        let options = HistoryOptions {
            prometheus_url: server.url(),
            target: WorkloadTarget::new("shop", "checkout"),
            timeout: Duration::from_secs(5),
            retry: RetryPolicy {
                attempts: 1,
                delay: Duration::from_millis(1),
            },
        };

        show_history(&options, RawMetric::RequestRate, "1h", "5m", OutputFormat::Json)
            .await
            .unwrap();
        mock.assert_async().await;
    }
}
