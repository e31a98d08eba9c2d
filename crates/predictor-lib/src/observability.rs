//! Observability infrastructure for the replica predictor
//!
//! Provides:
//! - Prometheus metrics (prediction requests, predicted pod count, confidence,
//!   cycle latency and failures) in a registry owned by the service
//! - Structured JSON logging with tracing

use crate::models::{PredictionResult, RawMetric, WorkloadTarget};
use prometheus::{
    Encoder, Gauge, GaugeVec, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, Opts,
    Registry, TextEncoder,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Histogram buckets for cycle latency (in seconds)
const CYCLE_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Content type of the Prometheus text exposition format
pub const TEXT_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

struct PredictorMetricsInner {
    registry: Registry,
    prediction_requests: IntCounter,
    predicted_pod_count: IntGauge,
    model_confidence: Gauge,
    cycle_duration_seconds: Histogram,
    cycle_failures: IntCounter,
    acquisition_failures: IntCounterVec,
    model_info: GaugeVec,
}

/// Predictor metrics for Prometheus exposition
///
/// Clones share the same registry and instruments.
#[derive(Clone)]
pub struct PredictorMetrics {
    inner: Arc<PredictorMetricsInner>,
}

impl PredictorMetrics {
    /// Create the instruments and register them in a fresh registry
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let prediction_requests = IntCounter::new(
            "prediction_requests_total",
            "Total prediction requests",
        )?;
        let predicted_pod_count = IntGauge::new("predicted_pod_count", "Predicted number of pods")?;
        let model_confidence = Gauge::new("model_confidence", "Model prediction confidence")?;
        let cycle_duration_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "predictor_cycle_duration_seconds",
                "Time spent acquiring metrics and running inference",
            )
            .buckets(CYCLE_BUCKETS.to_vec()),
        )?;
        let cycle_failures = IntCounter::new(
            "predictor_cycle_failures_total",
            "Prediction cycles that ended without publishing a result",
        )?;
        let acquisition_failures = IntCounterVec::new(
            Opts::new(
                "predictor_acquisition_failures_total",
                "Metric queries that failed and were substituted with zero",
            ),
            &["metric"],
        )?;
        let model_info = GaugeVec::new(
            Opts::new("predictor_model_info", "Information about the loaded model"),
            &["version", "schema"],
        )?;

        registry.register(Box::new(prediction_requests.clone()))?;
        registry.register(Box::new(predicted_pod_count.clone()))?;
        registry.register(Box::new(model_confidence.clone()))?;
        registry.register(Box::new(cycle_duration_seconds.clone()))?;
        registry.register(Box::new(cycle_failures.clone()))?;
        registry.register(Box::new(acquisition_failures.clone()))?;
        registry.register(Box::new(model_info.clone()))?;

        Ok(Self {
            inner: Arc::new(PredictorMetricsInner {
                registry,
                prediction_requests,
                predicted_pod_count,
                model_confidence,
                cycle_duration_seconds,
                cycle_failures,
                acquisition_failures,
                model_info,
            }),
        })
    }

    /// Record a published prediction
    pub fn record_prediction(&self, replica_count: u32, confidence: f64) {
        self.inner.prediction_requests.inc();
        self.inner.predicted_pod_count.set(i64::from(replica_count));
        self.inner.model_confidence.set(confidence);
    }

    pub fn observe_cycle_duration(&self, duration_secs: f64) {
        self.inner.cycle_duration_seconds.observe(duration_secs);
    }

    pub fn inc_cycle_failures(&self) {
        self.inner.cycle_failures.inc();
    }

    pub fn inc_acquisition_failure(&self, metric: RawMetric) {
        self.inner
            .acquisition_failures
            .with_label_values(&[metric.name()])
            .inc();
    }

    /// Update model info; the previous label set is dropped
    pub fn set_model_info(&self, version: &str, schema: &str) {
        self.inner.model_info.reset();
        self.inner
            .model_info
            .with_label_values(&[version, schema])
            .set(1.0);
    }

    pub fn prediction_requests(&self) -> u64 {
        self.inner.prediction_requests.get()
    }

    pub fn predicted_pod_count(&self) -> i64 {
        self.inner.predicted_pod_count.get()
    }

    pub fn model_confidence(&self) -> f64 {
        self.inner.model_confidence.get()
    }

    pub fn cycle_failures(&self) -> u64 {
        self.inner.cycle_failures.get()
    }

    /// Render every registered family in the text exposition format
    pub fn render(&self) -> prometheus::Result<String> {
        let families = self.inner.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&families, &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

/// Structured logger for predictor events
///
/// Provides consistent JSON-formatted logging for predictions, skipped
/// cycles and lifecycle events of one target workload.
#[derive(Clone)]
pub struct StructuredLogger {
    namespace: String,
    deployment: String,
}

impl StructuredLogger {
    pub fn new(target: &WorkloadTarget) -> Self {
        Self {
            namespace: target.namespace.clone(),
            deployment: target.deployment.clone(),
        }
    }

    /// Log a prediction generation event
    pub fn log_prediction(&self, result: &PredictionResult, failed_metrics: usize) {
        info!(
            event = "prediction_generated",
            namespace = %self.namespace,
            deployment = %self.deployment,
            replica_count = result.replica_count,
            confidence = result.confidence,
            model_version = %result.model_version,
            failed_metrics = failed_metrics,
            "Generated replica prediction"
        );
    }

    /// Log a cycle that ended without a prediction
    pub fn log_cycle_skipped(&self, reason: &str) {
        warn!(
            event = "cycle_skipped",
            namespace = %self.namespace,
            deployment = %self.deployment,
            reason = %reason,
            "Prediction cycle skipped, keeping previous prediction"
        );
    }

    /// Log a low-confidence prediction
    pub fn log_low_confidence(&self, confidence: f64) {
        warn!(
            event = "low_confidence",
            namespace = %self.namespace,
            deployment = %self.deployment,
            confidence = confidence,
            "Prediction confidence below threshold"
        );
    }

    /// Log the resolved feature schema
    pub fn log_schema_loaded(&self, features: usize, fidelity: &str, unavailable: &[String]) {
        info!(
            event = "schema_loaded",
            features = features,
            fidelity = %fidelity,
            unavailable = ?unavailable,
            "Feature schema loaded"
        );
    }

    /// Log service startup
    pub fn log_startup(&self, version: &str, model_version: Option<&str>) {
        info!(
            event = "service_started",
            namespace = %self.namespace,
            deployment = %self.deployment,
            service_version = %version,
            model_version = %model_version.unwrap_or("none"),
            "Replica predictor started"
        );
    }

    /// Log service shutdown
    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "service_shutdown",
            namespace = %self.namespace,
            deployment = %self.deployment,
            reason = %reason,
            "Replica predictor shutting down"
        );
    }
}
