//! Service configuration

use anyhow::{Context, Result};
use predictor_lib::collector::RetryPolicy;
use predictor_lib::models::WorkloadTarget;
use predictor_lib::predictor::ModelConfig;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;

/// Service configuration, read from unprefixed environment variables
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Base URL of the Prometheus-compatible metrics store
    #[serde(default = "default_prometheus_url")]
    pub prometheus_url: String,

    #[serde(default = "default_target_namespace")]
    pub target_namespace: String,

    #[serde(default = "default_target_deployment")]
    pub target_deployment: String,

    #[serde(default = "default_model_path")]
    pub model_path: PathBuf,

    #[serde(default = "default_model_metadata_path")]
    pub model_metadata_path: PathBuf,

    /// Expected SHA256 of the model artifact; unchecked when unset
    #[serde(default)]
    pub model_sha256: Option<String>,

    /// HTTP API port
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_prediction_interval")]
    pub prediction_interval_secs: u64,

    /// Per-query timeout for metrics acquisition
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    /// Retry attempts for the startup connectivity check
    #[serde(default = "default_retry_count")]
    pub retry_count: u32,

    #[serde(default = "default_retry_delay")]
    pub retry_delay_secs: u64,
}

fn default_prometheus_url() -> String {
    "http://monitoring-kube-prometheus-prometheus.monitoring.svc.cluster.local:9090".to_string()
}

fn default_target_namespace() -> String {
    "hamzadevops".to_string()
}

fn default_target_deployment() -> String {
    "eventmanagement".to_string()
}

fn default_model_path() -> PathBuf {
    PathBuf::from("/app/model/pod_predictor.onnx")
}

fn default_model_metadata_path() -> PathBuf {
    PathBuf::from("/app/model/metadata.json")
}

fn default_port() -> u16 {
    8000
}

fn default_prediction_interval() -> u64 {
    30
}

fn default_query_timeout() -> u64 {
    10
}

fn default_retry_count() -> u32 {
    3
}

fn default_retry_delay() -> u64 {
    5
}

impl ServiceConfig {
    /// Load configuration from the process environment
    pub fn load() -> Result<Self> {
        Self::from_environment(config::Environment::default())
    }

    fn from_environment(environment: config::Environment) -> Result<Self> {
        config::Config::builder()
            .add_source(environment.try_parsing(true))
            .build()
            .context("Failed to read configuration")?
            .try_deserialize()
            .context("Invalid configuration")
    }

    pub fn target(&self) -> WorkloadTarget {
        WorkloadTarget::new(&self.target_namespace, &self.target_deployment)
    }

    pub fn model_config(&self) -> ModelConfig {
        ModelConfig {
            model_path: self.model_path.clone(),
            metadata_path: self.model_metadata_path.clone(),
            model_sha256: self.model_sha256.clone().filter(|s| !s.trim().is_empty()),
        }
    }

    pub fn prediction_interval(&self) -> Duration {
        Duration::from_secs(self.prediction_interval_secs.max(1))
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs.max(1))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.retry_count.max(1),
            delay: Duration::from_secs(self.retry_delay_secs),
        }
    }
}
