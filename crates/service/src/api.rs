//! HTTP API: predictions, scaling signal, metrics scrape and health probes

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use chrono::{DateTime, Utc};
use predictor_lib::{
    collector::MetricsAcquisition,
    health::{components, HealthRegistry},
    models::WorkloadTarget,
    observability::{PredictorMetrics, TEXT_CONTENT_TYPE},
    predictor::{PredictionPipeline, SchemaFidelity},
    PredictorError, ScalingBridge,
};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};

/// Static description of the running service
#[derive(Debug, Clone, Serialize)]
pub struct ServiceInfo {
    pub version: String,
    pub prometheus_url: String,
    pub target: WorkloadTarget,
    pub model_version: Option<String>,
    pub expected_features: Option<usize>,
    pub schema_fidelity: Option<SchemaFidelity>,
    pub unavailable_features: Vec<String>,
}

impl ServiceInfo {
    pub fn new(
        version: impl Into<String>,
        prometheus_url: impl Into<String>,
        target: WorkloadTarget,
        pipeline: Option<&PredictionPipeline>,
    ) -> Self {
        let context = pipeline.map(|p| p.context());
        Self {
            version: version.into(),
            prometheus_url: prometheus_url.into(),
            target,
            model_version: context.map(|c| c.model_version().to_string()),
            expected_features: context.map(|c| c.schema().len()),
            schema_fidelity: context.map(|c| c.schema().fidelity()),
            unavailable_features: context
                .map(|c| c.aligner().unavailable_features().to_vec())
                .unwrap_or_default(),
        }
    }
}

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub health_registry: HealthRegistry,
    pub metrics: PredictorMetrics,
    pub acquisition: Arc<MetricsAcquisition>,
    /// `None` when the model or its schema failed to load
    pub pipeline: Option<Arc<PredictionPipeline>>,
    pub bridge: ScalingBridge,
    pub info: ServiceInfo,
}

impl AppState {
    pub fn new(
        health_registry: HealthRegistry,
        metrics: PredictorMetrics,
        acquisition: Arc<MetricsAcquisition>,
        pipeline: Option<Arc<PredictionPipeline>>,
        info: ServiceInfo,
    ) -> Self {
        Self {
            health_registry,
            metrics,
            acquisition,
            bridge: ScalingBridge::new(pipeline.clone()),
            pipeline,
            info,
        }
    }
}

fn error_response(status: StatusCode, detail: impl Into<String>) -> Response {
    (status, Json(json!({ "detail": detail.into() }))).into_response()
}

/// Service description and endpoint index
async fn root(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let info = &state.info;
    Json(json!({
        "message": "Replica Prediction Service",
        "version": info.version,
        "prometheus_url": info.prometheus_url,
        "target_namespace": info.target.namespace,
        "target_deployment": info.target.deployment,
        "model_loaded": state.pipeline.is_some(),
        "model_version": info.model_version,
        "expected_features": info.expected_features,
        "schema_fidelity": info.schema_fidelity,
        "unavailable_features": info.unavailable_features,
        "endpoints": {
            "predict": "/predict-from-prometheus",
            "keda_metric": "/keda-metric",
            "current_metrics": "/current-metrics",
            "prometheus_metrics": "/prometheus-metrics",
            "health": "/health",
        },
    }))
}

/// Latest prediction, computed on demand when none exists yet
async fn predict(State(state): State<Arc<AppState>>) -> Response {
    let Some(pipeline) = &state.pipeline else {
        return error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            PredictorError::ModelNotLoaded.to_string(),
        );
    };

    match pipeline.latest_or_refresh().await {
        Ok(result) => (StatusCode::OK, Json(result.as_ref().clone())).into_response(),
        Err(e) => {
            error!(error = %e, "On-demand prediction failed");
            error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("Prediction failed: {}", e),
            )
        }
    }
}

/// Scaling signal for the external autoscaler; always 200
async fn keda_metric(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.bridge.signal().await)
}

/// Fresh snapshot straight from the metrics store
async fn current_metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let outcome = state.acquisition.acquire().await;
    let failed: Vec<&str> = outcome
        .failed_metrics()
        .iter()
        .map(|metric| metric.name())
        .collect();

    Json(json!({
        "metrics": outcome.snapshot,
        "failed_metrics": failed,
        "timestamp": Utc::now(),
    }))
}

/// Prometheus metrics endpoint
async fn metrics(State(state): State<Arc<AppState>>) -> Response {
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, TEXT_CONTENT_TYPE)],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to encode metrics");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthReport {
    status: &'static str,
    model_loaded: bool,
    prometheus_connected: bool,
    expected_features: Option<usize>,
    timestamp: DateTime<Utc>,
}

/// Combined report: model loaded and metrics store reachable
async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let prometheus_connected = state.acquisition.store_reachable().await;
    if prometheus_connected {
        state
            .health_registry
            .set_healthy(components::METRICS_STORE)
            .await;
    } else {
        state
            .health_registry
            .set_degraded(components::METRICS_STORE, "metrics store unreachable")
            .await;
    }

    let model_loaded = state.pipeline.is_some();
    let healthy = model_loaded && prometheus_connected;
    let report = HealthReport {
        status: if healthy { "healthy" } else { "unhealthy" },
        model_loaded,
        prometheus_connected,
        expected_features: state.info.expected_features,
        timestamp: Utc::now(),
    };

    let status_code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (status_code, Json(report))
}

/// Component health - returns 200 if operational, 503 if unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = if health.status.is_operational() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(health))
}

/// Readiness check response - returns 200 if ready, 503 if not ready
async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

/// Create the API router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(root))
        .route("/predict-from-prometheus", get(predict))
        .route("/keda-metric", get(keda_metric))
        .route("/current-metrics", get(current_metrics))
        .route("/prometheus-metrics", get(metrics))
        .route("/metrics", get(metrics))
        .route("/health", get(health))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(state)
}

/// Start the API server
pub async fn serve(port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
