//! Metrics acquisition from the time-series store
//!
//! This module defines the query/response contract the predictor depends on,
//! a Prometheus HTTP implementation of it, and the per-cycle acquisition that
//! fans the six workload queries out concurrently and degrades failures to
//! zero one metric at a time.

mod acquisition;
mod prometheus;

pub use acquisition::{AcquisitionOutcome, MetricsAcquisition};
pub use prometheus::{PrometheusStore, RetryPolicy};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;

pub use async_trait::async_trait;

/// Failures talking to the metrics store
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("request to metrics store failed: {0}")]
    Transport(String),

    #[error("metrics store returned HTTP {0}")]
    Status(u16),

    #[error("malformed response: {0}")]
    Decode(String),

    #[error("query rejected ({error_type}): {message}")]
    Query { error_type: String, message: String },

    #[error("query timed out after {0:?}")]
    Timeout(Duration),
}

/// Time window for range queries
#[derive(Debug, Clone, Copy)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

/// A query against the metrics store. Without a range it is an instant query.
#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub expr: String,
    pub range: Option<TimeRange>,
    pub step: Option<Duration>,
}

impl QueryRequest {
    pub fn instant(expr: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            range: None,
            step: None,
        }
    }

    pub fn range(expr: impl Into<String>, range: TimeRange, step: Duration) -> Self {
        Self {
            expr: expr.into(),
            range: Some(range),
            step: Some(step),
        }
    }
}

/// A single labeled point
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub labels: HashMap<String, String>,
    pub timestamp: f64,
    pub value: f64,
}

/// A labeled series of points
#[derive(Debug, Clone, PartialEq)]
pub struct Series {
    pub labels: HashMap<String, String>,
    pub points: Vec<(f64, f64)>,
}

/// Successful query payload
#[derive(Debug, Clone, PartialEq)]
pub enum QueryData {
    Vector(Vec<Sample>),
    Matrix(Vec<Series>),
    Scalar { timestamp: f64, value: f64 },
    String { timestamp: f64, value: String },
}

impl QueryData {
    /// Value of the first sample, if the result carries a number.
    /// `None` means the store answered with an empty result set.
    pub fn first_value(&self) -> Option<f64> {
        match self {
            QueryData::Vector(samples) => samples.first().map(|s| s.value),
            QueryData::Matrix(series) => series
                .first()
                .and_then(|s| s.points.last())
                .map(|(_, v)| *v),
            QueryData::Scalar { value, .. } => Some(*value),
            QueryData::String { .. } => None,
        }
    }
}

/// Query/response contract of the metrics store
#[async_trait]
pub trait MetricsStore: Send + Sync {
    /// Execute one query. An `Err` covers unreachable store, HTTP failure,
    /// `status: error` payloads and undecodable bodies alike.
    async fn query(&self, request: &QueryRequest) -> Result<QueryData, StoreError>;

    /// Check that the store answers queries at all
    async fn probe(&self) -> Result<(), StoreError> {
        self.query(&QueryRequest::instant("up")).await.map(|_| ())
    }
}
