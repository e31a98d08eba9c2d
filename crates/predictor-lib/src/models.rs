//! Core data models for the replica predictor

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// The six workload readings acquired from the metrics store each cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RawMetric {
    CpuUsage,
    MemoryUsage,
    RequestRate,
    QueueLength,
    ResponseTime,
    ActiveConnections,
}

impl RawMetric {
    pub const ALL: [RawMetric; 6] = [
        RawMetric::CpuUsage,
        RawMetric::MemoryUsage,
        RawMetric::RequestRate,
        RawMetric::QueueLength,
        RawMetric::ResponseTime,
        RawMetric::ActiveConnections,
    ];

    /// Canonical feature name, as it appears in trained-model metadata
    pub fn name(&self) -> &'static str {
        match self {
            RawMetric::CpuUsage => "cpu_usage",
            RawMetric::MemoryUsage => "memory_usage",
            RawMetric::RequestRate => "request_rate",
            RawMetric::QueueLength => "queue_length",
            RawMetric::ResponseTime => "response_time",
            RawMetric::ActiveConnections => "active_connections",
        }
    }
}

impl fmt::Display for RawMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for RawMetric {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RawMetric::ALL
            .iter()
            .copied()
            .find(|m| m.name() == s)
            .ok_or_else(|| format!("unknown metric '{}'", s))
    }
}

/// A single named query issued against the metrics store
#[derive(Debug, Clone)]
pub struct MetricQuerySpec {
    pub metric: RawMetric,
    pub expr: String,
    pub timeout: Duration,
}

/// Workload identity used to scope the default queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkloadTarget {
    pub namespace: String,
    pub deployment: String,
}

impl WorkloadTarget {
    pub fn new(namespace: impl Into<String>, deployment: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            deployment: deployment.into(),
        }
    }

    /// Build the query set for the six raw metrics, each with the same timeout
    pub fn default_queries(&self, timeout: Duration) -> Vec<MetricQuerySpec> {
        RawMetric::ALL
            .iter()
            .map(|&metric| MetricQuerySpec {
                metric,
                expr: self.query_expr(metric),
                timeout,
            })
            .collect()
    }

    fn query_expr(&self, metric: RawMetric) -> String {
        let ns = &self.namespace;
        let dep = &self.deployment;
        match metric {
            RawMetric::CpuUsage => format!(
                r#"avg(rate(container_cpu_usage_seconds_total{{namespace="{ns}", pod=~"{dep}.*"}}[5m])) * 100"#
            ),
            RawMetric::MemoryUsage => format!(
                r#"avg(container_memory_working_set_bytes{{namespace="{ns}", pod=~"{dep}.*"}}) / 1024 / 1024"#
            ),
            RawMetric::RequestRate => format!(
                r#"sum(rate(http_requests_total{{namespace="{ns}", pod=~"{dep}.*"}}[5m]))"#
            ),
            RawMetric::QueueLength => {
                format!(r#"avg(queue_size{{namespace="{ns}", job="{dep}"}})"#)
            }
            RawMetric::ResponseTime => format!(
                r#"avg(http_request_duration_seconds{{namespace="{ns}", pod=~"{dep}.*"}})"#
            ),
            RawMetric::ActiveConnections => format!(
                r#"sum(active_connections{{namespace="{ns}", pod=~"{dep}.*"}})"#
            ),
        }
    }
}

/// Point-in-time workload readings. Every field is always populated;
/// a metric that could not be acquired reads as zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkloadSnapshot {
    pub cpu_usage: f64,
    pub memory_usage: f64,
    pub request_rate: f64,
    pub queue_length: f64,
    pub response_time: f64,
    pub active_connections: f64,
}

impl WorkloadSnapshot {
    pub fn get(&self, metric: RawMetric) -> f64 {
        match metric {
            RawMetric::CpuUsage => self.cpu_usage,
            RawMetric::MemoryUsage => self.memory_usage,
            RawMetric::RequestRate => self.request_rate,
            RawMetric::QueueLength => self.queue_length,
            RawMetric::ResponseTime => self.response_time,
            RawMetric::ActiveConnections => self.active_connections,
        }
    }

    /// Build a snapshot from per-metric readings; anything missing reads as zero
    pub fn from_readings(readings: impl IntoIterator<Item = (RawMetric, f64)>) -> Self {
        let mut snapshot = Self::default();
        for (metric, value) in readings {
            let slot = match metric {
                RawMetric::CpuUsage => &mut snapshot.cpu_usage,
                RawMetric::MemoryUsage => &mut snapshot.memory_usage,
                RawMetric::RequestRate => &mut snapshot.request_rate,
                RawMetric::QueueLength => &mut snapshot.queue_length,
                RawMetric::ResponseTime => &mut snapshot.response_time,
                RawMetric::ActiveConnections => &mut snapshot.active_connections,
            };
            *slot = value;
        }
        snapshot
    }
}

/// Model input, aligned 1:1 with the feature schema
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureVector(Vec<f32>);

impl FeatureVector {
    pub fn new(values: Vec<f32>) -> Self {
        Self(values)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

/// Latest replica prediction, as served to synchronous callers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionResult {
    #[serde(rename = "predicted_pod_count")]
    pub replica_count: u32,
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
    #[serde(rename = "metrics_used")]
    pub snapshot: WorkloadSnapshot,
    pub model_version: String,
}

/// Value handed to the external scaling controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalScalingSignal {
    pub metric_value: u32,
    pub timestamp: DateTime<Utc>,
}
