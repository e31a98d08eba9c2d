//! Prometheus HTTP API client
//!
//! Implements [`MetricsStore`] against `/api/v1/query` and
//! `/api/v1/query_range`.

use super::{MetricsStore, QueryData, QueryRequest, Sample, Series, StoreError};
use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};
use url::Url;

/// Retry settings for range queries. Instant queries on the prediction
/// path never retry; the next cycle is the retry.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub delay: Duration,
}

/// Metrics store client speaking the Prometheus HTTP API
pub struct PrometheusStore {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl PrometheusStore {
    /// Create a client for the given base URL (e.g. `http://prometheus:9090`
    /// or a path-prefixed `https://host/prometheus`)
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let mut base_url = Url::parse(base_url).context("Invalid metrics store URL")?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self {
            client,
            base_url,
            timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        self.base_url.as_str()
    }

    /// Run a query, retrying failures according to `policy`
    pub async fn query_with_retry(
        &self,
        request: &QueryRequest,
        policy: RetryPolicy,
    ) -> Result<QueryData, StoreError> {
        let attempts = policy.attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.query(request).await {
                Ok(data) => return Ok(data),
                Err(e) if attempt < attempts => {
                    warn!(
                        attempt = attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Metrics store query failed, retrying"
                    );
                    tokio::time::sleep(policy.delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn endpoint(&self, request: &QueryRequest) -> Result<(Url, Vec<(&'static str, String)>), StoreError> {
        let mut params = vec![("query", request.expr.clone())];
        let path = match request.range {
            Some(range) => {
                params.push(("start", range.start.timestamp().to_string()));
                params.push(("end", range.end.timestamp().to_string()));
                let step = request.step.unwrap_or(Duration::from_secs(60));
                params.push(("step", step.as_secs_f64().to_string()));
                "api/v1/query_range"
            }
            None => "api/v1/query",
        };
        let url = self
            .base_url
            .join(path)
            .map_err(|e| StoreError::Transport(e.to_string()))?;
        Ok((url, params))
    }
}

#[async_trait]
impl MetricsStore for PrometheusStore {
    async fn query(&self, request: &QueryRequest) -> Result<QueryData, StoreError> {
        let (url, params) = self.endpoint(request)?;

        let response = self
            .client
            .get(url)
            .query(&params)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    StoreError::Timeout(self.timeout)
                } else {
                    StoreError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|e| StoreError::Transport(e.to_string()))?;

        let parsed: ApiResponse = match serde_json::from_slice(&body) {
            Ok(parsed) => parsed,
            Err(_) if !status.is_success() => return Err(StoreError::Status(status.as_u16())),
            Err(e) => return Err(StoreError::Decode(e.to_string())),
        };

        if parsed.status != "success" {
            return Err(StoreError::Query {
                error_type: parsed.error_type.unwrap_or_else(|| "unknown".to_string()),
                message: parsed.error.unwrap_or_default(),
            });
        }
        if !status.is_success() {
            return Err(StoreError::Status(status.as_u16()));
        }

        let data = parsed
            .data
            .ok_or_else(|| StoreError::Decode("response has no data".to_string()))?;
        debug!(query = %request.expr, "Metrics store query succeeded");
        data.into_query_data()
    }
}

#[derive(Debug, Deserialize)]
struct ApiResponse {
    status: String,
    #[serde(default)]
    data: Option<ApiData>,
    #[serde(rename = "errorType", default)]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "resultType", content = "result", rename_all = "lowercase")]
enum ApiData {
    Vector(Vec<ApiSample>),
    Matrix(Vec<ApiSeries>),
    Scalar((f64, String)),
    String((f64, String)),
}

#[derive(Debug, Deserialize)]
struct ApiSample {
    #[serde(default)]
    metric: HashMap<String, String>,
    value: (f64, String),
}

#[derive(Debug, Deserialize)]
struct ApiSeries {
    #[serde(default)]
    metric: HashMap<String, String>,
    values: Vec<(f64, String)>,
}

impl ApiData {
    fn into_query_data(self) -> Result<QueryData, StoreError> {
        Ok(match self {
            ApiData::Vector(samples) => QueryData::Vector(
                samples
                    .into_iter()
                    .map(|s| -> Result<Sample, StoreError> {
                        Ok(Sample {
                            labels: s.metric,
                            timestamp: s.value.0,
                            value: parse_value(&s.value.1)?,
                        })
                    })
                    .collect::<Result<_, StoreError>>()?,
            ),
            ApiData::Matrix(series) => QueryData::Matrix(
                series
                    .into_iter()
                    .map(|s| -> Result<Series, StoreError> {
                        let points = s
                            .values
                            .iter()
                            .map(|(ts, v)| parse_value(v).map(|value| (*ts, value)))
                            .collect::<Result<_, StoreError>>()?;
                        Ok(Series {
                            labels: s.metric,
                            points,
                        })
                    })
                    .collect::<Result<_, StoreError>>()?,
            ),
            ApiData::Scalar((timestamp, value)) => QueryData::Scalar {
                timestamp,
                value: parse_value(&value)?,
            },
            ApiData::String((timestamp, value)) => QueryData::String { timestamp, value },
        })
    }
}

/// Prometheus encodes sample values as strings, including `NaN` and `+Inf`
fn parse_value(raw: &str) -> Result<f64, StoreError> {
    raw.parse::<f64>()
        .map_err(|_| StoreError::Decode(format!("non-numeric sample value '{}'", raw)))
}
