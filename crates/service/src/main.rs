//! Replica Predictor - workload replica prediction service
//!
//! Polls live workload metrics, predicts the replica count with a trained
//! model on a fixed interval, and serves the result to callers and to an
//! external autoscaler.

use anyhow::{Context, Result};
use predictor_lib::{
    collector::{MetricsAcquisition, PrometheusStore, QueryRequest, RetryPolicy},
    health::{components, HealthRegistry},
    observability::{PredictorMetrics, StructuredLogger},
    predictor::{
        Clock, PredictionPipeline, PredictionScheduler, SchedulerConfig, ServiceContext,
        SystemClock,
    },
};
use replica_predictor::{
    api::{self, AppState, ServiceInfo},
    config::ServiceConfig,
};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing with JSON output and env filter
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting replica-predictor");

    let config = ServiceConfig::load()?;
    let target = config.target();
    info!(
        prometheus_url = %config.prometheus_url,
        namespace = %target.namespace,
        deployment = %target.deployment,
        "Predictor configured"
    );

    let health_registry = HealthRegistry::new();
    health_registry.register(components::MODEL).await;
    health_registry.register(components::METRICS_STORE).await;
    health_registry.register(components::SCHEDULER).await;

    let metrics = PredictorMetrics::new().context("Failed to register metrics")?;
    let logger = StructuredLogger::new(&target);
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let store = Arc::new(PrometheusStore::new(
        &config.prometheus_url,
        config.query_timeout(),
    )?);
    let acquisition = Arc::new(MetricsAcquisition::new(
        store.clone(),
        target.default_queries(config.query_timeout()),
    ));

    let pipeline = match ServiceContext::load(&config.model_config()) {
        Ok(context) => {
            logger.log_schema_loaded(
                context.schema().len(),
                context.schema().fidelity().as_str(),
                context.aligner().unavailable_features(),
            );
            Some(Arc::new(PredictionPipeline::new(
                Arc::new(context),
                acquisition.clone(),
                metrics.clone(),
                logger.clone(),
                clock.clone(),
            )))
        }
        Err(e) => {
            error!(
                error = %e,
                model_path = %config.model_path.display(),
                "Predictor unavailable, serving fallback signal only"
            );
            health_registry
                .set_unhealthy(components::MODEL, e.to_string())
                .await;
            health_registry
                .set_unhealthy(components::SCHEDULER, "no model loaded")
                .await;
            None
        }
    };

    logger.log_startup(
        SERVICE_VERSION,
        pipeline.as_ref().map(|p| p.context().model_version()),
    );

    let scheduler = pipeline.as_ref().map(|pipeline| {
        Arc::new(
            PredictionScheduler::new(
                pipeline.clone(),
                clock.clone(),
                SchedulerConfig {
                    prediction_interval: config.prediction_interval(),
                },
            )
            .with_health(health_registry.clone()),
        )
        .spawn()
    });

    tokio::spawn(check_store_connectivity(
        store,
        config.retry_policy(),
        health_registry.clone(),
    ));

    let info = ServiceInfo::new(
        SERVICE_VERSION,
        config.prometheus_url.clone(),
        target,
        pipeline.as_deref(),
    );
    let app_state = Arc::new(AppState::new(
        health_registry.clone(),
        metrics,
        acquisition,
        pipeline,
        info,
    ));

    health_registry.set_ready(true).await;

    let server = tokio::spawn(api::serve(config.port, app_state));

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            logger.log_shutdown("SIGINT received");
        }
        result = server => {
            let reason = match result {
                Ok(Ok(())) => "API server stopped".to_string(),
                Ok(Err(e)) => format!("API server failed: {}", e),
                Err(e) => format!("API server task failed: {}", e),
            };
            error!(reason = %reason, "Shutting down");
            logger.log_shutdown(&reason);
        }
    }

    if let Some(handle) = scheduler {
        handle.stop().await;
    }
    info!("Shutdown complete");

    Ok(())
}

/// Startup reachability check against the metrics store, with retries.
/// Prediction proceeds either way; failed queries read as zero.
async fn check_store_connectivity(
    store: Arc<PrometheusStore>,
    policy: RetryPolicy,
    health: HealthRegistry,
) {
    match store
        .query_with_retry(&QueryRequest::instant("up"), policy)
        .await
    {
        Ok(_) => {
            info!(url = %store.base_url(), "Metrics store reachable");
            health.set_healthy(components::METRICS_STORE).await;
        }
        Err(e) => {
            warn!(url = %store.base_url(), error = %e, "Metrics store unreachable, predictions will use zero-filled metrics");
            health
                .set_degraded(components::METRICS_STORE, e.to_string())
                .await;
        }
    }
}
