//! Integration tests for the predictor API endpoints

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use predictor_lib::{
    collector::{async_trait, MetricsAcquisition, MetricsStore, QueryData, QueryRequest, Sample, StoreError},
    health::{components, HealthRegistry},
    models::WorkloadTarget,
    observability::{PredictorMetrics, StructuredLogger},
    predictor::{FeatureSchema, LinearModel, Model, PredictionPipeline, ServiceContext, SystemClock},
};
use replica_predictor::api::{create_router, AppState, ServiceInfo};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

/// Store returning one fixed value per metric, or failing everything
struct FixedStore {
    values: Option<HashMap<String, f64>>,
    calls: AtomicUsize,
}

impl FixedStore {
    fn healthy(target: &WorkloadTarget) -> Self {
        let values = target
            .default_queries(Duration::from_secs(1))
            .into_iter()
            .map(|spec| {
                let value = match spec.metric.name() {
                    "cpu_usage" => 40.0,
                    "memory_usage" => 512.0,
                    "request_rate" => 12.0,
                    _ => 1.0,
                };
                (spec.expr, value)
            })
            .chain(std::iter::once(("up".to_string(), 1.0)))
            .collect();
        Self {
            values: Some(values),
            calls: AtomicUsize::new(0),
        }
    }

    fn unreachable() -> Self {
        Self {
            values: None,
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl MetricsStore for FixedStore {
    async fn query(&self, request: &QueryRequest) -> Result<QueryData, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let values = self
            .values
            .as_ref()
            .ok_or_else(|| StoreError::Transport("connection refused".to_string()))?;
        Ok(QueryData::Vector(
            values
                .get(&request.expr)
                .map(|value| Sample {
                    labels: HashMap::new(),
                    timestamp: 0.0,
                    value: *value,
                })
                .into_iter()
                .collect(),
        ))
    }
}

struct TestApp {
    router: Router,
    store: Arc<FixedStore>,
    metrics: PredictorMetrics,
}

/// Model whose every prediction panics
struct CrashingModel;

impl Model for CrashingModel {
    fn expected_features(&self) -> Option<usize> {
        Some(3)
    }

    fn predict(&self, _features: &[f32]) -> predictor_lib::Result<f64> {
        panic!("tensor buffer overrun");
    }
}

/// `model`: `(intercept, coefficients)` of a linear model over
/// `[cpu_usage, unknown_feat, memory_usage]`, or `None` for no model
async fn setup_test_app(store: FixedStore, model: Option<(f64, Vec<f64>)>) -> TestApp {
    let model = model.map(|(intercept, coefficients)| -> Box<dyn Model> {
        Box::new(LinearModel {
            intercept,
            coefficients,
            version: None,
        })
    });
    setup_app_with_model(store, model).await
}

async fn setup_app_with_model(store: FixedStore, model: Option<Box<dyn Model>>) -> TestApp {
    let target = WorkloadTarget::new("default", "web");
    let store = Arc::new(store);
    let metrics = PredictorMetrics::new().unwrap();
    let health_registry = HealthRegistry::new();
    health_registry.register(components::MODEL).await;
    health_registry.register(components::METRICS_STORE).await;

    let acquisition = Arc::new(MetricsAcquisition::new(
        store.clone(),
        target.default_queries(Duration::from_secs(1)),
    ));

    let pipeline = match model {
        Some(model) => {
            let context = ServiceContext::new(
                model,
                FeatureSchema::from_names(["cpu_usage", "unknown_feat", "memory_usage"]),
                "1.1.0",
            );
            Some(Arc::new(PredictionPipeline::new(
                Arc::new(context),
                acquisition.clone(),
                metrics.clone(),
                StructuredLogger::new(&target),
                Arc::new(SystemClock),
            )))
        }
        None => {
            health_registry
                .set_unhealthy(components::MODEL, "model file missing")
                .await;
            None
        }
    };

    let info = ServiceInfo::new("1.1.0", "http://prometheus:9090", target, pipeline.as_deref());
    let state = Arc::new(AppState::new(
        health_registry.clone(),
        metrics.clone(),
        acquisition,
        pipeline,
        info,
    ));
    health_registry.set_ready(true).await;

    TestApp {
        router: create_router(state),
        store,
        metrics,
    }
}

async fn get(router: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let response = router
        .clone()
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, body.to_vec())
}

async fn get_json(router: &Router, uri: &str) -> (StatusCode, Value) {
    let (status, body) = get(router, uri).await;
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_root_describes_service() {
    let app = setup_test_app(FixedStore::healthy(&WorkloadTarget::new("default", "web")), Some((0.0, vec![0.1, 0.0, 0.0]))).await;

    let (status, json) = get_json(&app.router, "/").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["model_loaded"], true);
    assert_eq!(json["expected_features"], 3);
    assert_eq!(json["schema_fidelity"], "metadata");
    assert_eq!(json["unavailable_features"][0], "unknown_feat");
    assert_eq!(json["target_deployment"], "web");
}

#[tokio::test]
async fn test_predict_returns_prediction() {
    let target = WorkloadTarget::new("default", "web");
    // 0.05 * 40 + 0.002 * 512 = 3.024 -> 3 replicas
    let app = setup_test_app(FixedStore::healthy(&target), Some((0.0, vec![0.05, 7.0, 0.002]))).await;

    let (status, json) = get_json(&app.router, "/predict-from-prometheus").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["predicted_pod_count"], 3);
    assert_eq!(json["confidence"], 0.95);
    assert_eq!(json["model_version"], "1.1.0");
    assert_eq!(json["metrics_used"]["cpu_usage"], 40.0);
    assert_eq!(json["metrics_used"]["memory_usage"], 512.0);
}

#[tokio::test]
async fn test_repeated_predictions_use_cache() {
    let target = WorkloadTarget::new("default", "web");
    let app = setup_test_app(FixedStore::healthy(&target), Some((2.0, vec![0.0, 0.0, 0.0]))).await;

    let (_, first) = get_json(&app.router, "/predict-from-prometheus").await;
    let (_, second) = get_json(&app.router, "/predict-from-prometheus").await;

    assert_eq!(first, second);
    assert_eq!(app.metrics.prediction_requests(), 1);
    assert_eq!(app.store.calls.load(Ordering::SeqCst), 6);
}

#[tokio::test]
async fn test_predict_without_model_is_unavailable() {
    let app = setup_test_app(FixedStore::unreachable(), None).await;

    let (status, json) = get_json(&app.router, "/predict-from-prometheus").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(json["detail"].as_str().unwrap().contains("not loaded"));
}

#[tokio::test]
async fn test_predict_feature_mismatch_is_server_error() {
    let target = WorkloadTarget::new("default", "web");
    let app = setup_test_app(FixedStore::healthy(&target), Some((1.0, vec![1.0; 5]))).await;

    let (status, json) = get_json(&app.router, "/predict-from-prometheus").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["detail"].as_str().unwrap().contains("expects 5 features, got 3"));
}

#[tokio::test]
async fn test_predict_panicking_model_is_server_error() {
    let target = WorkloadTarget::new("default", "web");
    let app = setup_app_with_model(FixedStore::healthy(&target), Some(Box::new(CrashingModel))).await;

    let (status, json) = get_json(&app.router, "/predict-from-prometheus").await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(json["detail"].as_str().unwrap().contains("tensor buffer overrun"));

    // The service keeps answering afterwards
    let (status, json) = get_json(&app.router, "/keda-metric").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["metric_value"], 1);
}

#[tokio::test]
async fn test_keda_metric_without_model_is_floor() {
    let app = setup_test_app(FixedStore::unreachable(), None).await;

    let (status, json) = get_json(&app.router, "/keda-metric").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["metric_value"], 1);
    assert!(json["timestamp"].is_string());
}

#[tokio::test]
async fn test_keda_metric_forwards_prediction() {
    let target = WorkloadTarget::new("default", "web");
    let app = setup_test_app(FixedStore::healthy(&target), Some((0.0, vec![0.2, 0.0, 0.0]))).await;

    let (status, json) = get_json(&app.router, "/keda-metric").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["metric_value"], 8);
}

#[tokio::test]
async fn test_keda_metric_on_mismatch_is_floor() {
    let target = WorkloadTarget::new("default", "web");
    let app = setup_test_app(FixedStore::healthy(&target), Some((6.0, vec![1.0; 5]))).await;

    let (status, json) = get_json(&app.router, "/keda-metric").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["metric_value"], 1);
}

#[tokio::test]
async fn test_all_queries_failing_still_predicts() {
    let app = setup_test_app(FixedStore::unreachable(), Some((2.6, vec![1.0, 1.0, 1.0]))).await;

    let (status, json) = get_json(&app.router, "/predict-from-prometheus").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["predicted_pod_count"], 3);
    assert_eq!(json["metrics_used"]["cpu_usage"], 0.0);
}

#[tokio::test]
async fn test_current_metrics_does_not_predict() {
    let target = WorkloadTarget::new("default", "web");
    let app = setup_test_app(FixedStore::healthy(&target), Some((1.0, vec![0.0; 3]))).await;

    let (status, json) = get_json(&app.router, "/current-metrics").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["metrics"]["cpu_usage"], 40.0);
    assert_eq!(json["metrics"]["request_rate"], 12.0);
    assert_eq!(json["failed_metrics"].as_array().unwrap().len(), 0);
    assert_eq!(app.metrics.prediction_requests(), 0);
}

#[tokio::test]
async fn test_metrics_endpoints_expose_prediction_gauges() {
    let target = WorkloadTarget::new("default", "web");
    let app = setup_test_app(FixedStore::healthy(&target), Some((4.0, vec![0.0; 3]))).await;
    get(&app.router, "/predict-from-prometheus").await;

    for uri in ["/metrics", "/prometheus-metrics"] {
        let (status, body) = get(&app.router, uri).await;
        let text = String::from_utf8(body).unwrap();

        assert_eq!(status, StatusCode::OK);
        assert!(text.contains("prediction_requests_total 1"));
        assert!(text.contains("predicted_pod_count 4"));
        assert!(text.contains("model_confidence 0.95"));
    }
}

#[tokio::test]
async fn test_health_reports_components() {
    let target = WorkloadTarget::new("default", "web");
    let app = setup_test_app(FixedStore::healthy(&target), Some((1.0, vec![0.0; 3]))).await;

    let (status, json) = get_json(&app.router, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");
    assert_eq!(json["model_loaded"], true);
    assert_eq!(json["prometheus_connected"], true);
    assert_eq!(json["expected_features"], 3);
}

#[tokio::test]
async fn test_health_unhealthy_without_model_or_store() {
    let app = setup_test_app(FixedStore::unreachable(), None).await;

    let (status, json) = get_json(&app.router, "/health").await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["status"], "unhealthy");
    assert_eq!(json["model_loaded"], false);
    assert_eq!(json["prometheus_connected"], false);
    assert!(json["expected_features"].is_null());
}

#[tokio::test]
async fn test_probes_with_model() {
    let target = WorkloadTarget::new("default", "web");
    let app = setup_test_app(FixedStore::healthy(&target), Some((1.0, vec![0.0; 3]))).await;

    let (status, json) = get_json(&app.router, "/healthz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "healthy");

    let (status, json) = get_json(&app.router, "/readyz").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["ready"], true);
}

#[tokio::test]
async fn test_probes_without_model() {
    let app = setup_test_app(FixedStore::unreachable(), None).await;

    let (status, json) = get_json(&app.router, "/healthz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["components"]["model"]["status"], "unhealthy");

    let (status, json) = get_json(&app.router, "/readyz").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(json["ready"], false);
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let app = setup_test_app(FixedStore::unreachable(), None).await;

    let (status, _) = get(&app.router, "/nonexistent").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
