//! API client for communicating with the replica predictor service

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use predictor_lib::models::{ExternalScalingSignal, PredictionResult, WorkloadSnapshot};
use reqwest::Client;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Failures talking to the predictor service
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to reach API: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid path: {0}")]
    Url(#[from] url::ParseError),

    #[error("API error ({status}): {detail}")]
    Status { status: u16, detail: String },
}

/// Fresh metrics as reported by `/current-metrics`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrentMetrics {
    pub metrics: WorkloadSnapshot,
    #[serde(default)]
    pub failed_metrics: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Combined report from `/health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub model_loaded: bool,
    pub prometheus_connected: bool,
    pub expected_features: Option<usize>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Deserialize)]
struct ErrorBody {
    detail: String,
}

/// API client for the predictor service
pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let mut base_url = Url::parse(base_url).context("Invalid API URL")?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        Ok(Self { client, base_url })
    }

    /// GET `path`, accepting the given non-2xx statuses as normal answers
    async fn get_with_status<T: DeserializeOwned>(
        &self,
        path: &str,
        accepted: &[u16],
    ) -> Result<(u16, T), ApiError> {
        let url = self.base_url.join(path)?;
        let response = self.client.get(url).send().await?;
        let status = response.status();

        if !status.is_success() && !accepted.contains(&status.as_u16()) {
            let body = response.text().await.unwrap_or_default();
            let detail = serde_json::from_str::<ErrorBody>(&body)
                .map(|e| e.detail)
                .unwrap_or(body);
            return Err(ApiError::Status {
                status: status.as_u16(),
                detail,
            });
        }

        Ok((status.as_u16(), response.json().await?))
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.get_with_status(path, &[]).await.map(|(_, body)| body)
    }

    pub async fn prediction(&self) -> Result<PredictionResult, ApiError> {
        self.get("predict-from-prometheus").await
    }

    pub async fn signal(&self) -> Result<ExternalScalingSignal, ApiError> {
        self.get("keda-metric").await
    }

    pub async fn current_metrics(&self) -> Result<CurrentMetrics, ApiError> {
        self.get("current-metrics").await
    }

    /// The service answers 503 with a full report when unhealthy
    pub async fn health(&self) -> Result<(u16, HealthReport), ApiError> {
        self.get_with_status("health", &[503]).await
    }
}
