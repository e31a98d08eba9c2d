//! One prediction cycle: acquire, align, infer, publish
//!
//! The pipeline is the only writer of the [`PredictionCache`]. Scheduled and
//! on-demand cycles are serialized through one async mutex so two cycles
//! never publish out of order. A panic anywhere in a cycle is caught and
//! reported as an inference error, so callers always get a `Result`.

use super::cache::PredictionCache;
use super::context::ServiceContext;
use super::scheduler::Clock;
use crate::collector::MetricsAcquisition;
use crate::error::{PredictorError, Result};
use crate::models::PredictionResult;
use crate::observability::{PredictorMetrics, StructuredLogger};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use tracing::debug;

pub struct PredictionPipeline {
    context: Arc<ServiceContext>,
    acquisition: Arc<MetricsAcquisition>,
    cache: PredictionCache,
    metrics: PredictorMetrics,
    logger: StructuredLogger,
    clock: Arc<dyn Clock>,
    writer: Mutex<()>,
}

impl PredictionPipeline {
    pub fn new(
        context: Arc<ServiceContext>,
        acquisition: Arc<MetricsAcquisition>,
        metrics: PredictorMetrics,
        logger: StructuredLogger,
        clock: Arc<dyn Clock>,
    ) -> Self {
        metrics.set_model_info(context.model_version(), context.schema().fidelity().as_str());
        Self {
            context,
            acquisition,
            cache: PredictionCache::new(),
            metrics,
            logger,
            clock,
            writer: Mutex::new(()),
        }
    }

    pub fn context(&self) -> &ServiceContext {
        &self.context
    }

    pub fn metrics(&self) -> &PredictorMetrics {
        &self.metrics
    }

    pub fn logger(&self) -> &StructuredLogger {
        &self.logger
    }

    /// Latest published prediction without triggering a cycle
    pub fn cached(&self) -> Option<Arc<PredictionResult>> {
        self.cache.load()
    }

    /// Run one full cycle and publish its result.
    ///
    /// On error nothing is published and the previous prediction stays.
    pub async fn run_cycle(&self) -> Result<Arc<PredictionResult>> {
        let _guard = self.writer.lock().await;
        self.execute_contained().await
    }

    /// Cached prediction, or a fresh on-demand cycle when none exists yet
    pub async fn latest_or_refresh(&self) -> Result<Arc<PredictionResult>> {
        if let Some(latest) = self.cache.load() {
            return Ok(latest);
        }

        let _guard = self.writer.lock().await;
        // A scheduled cycle may have published while we waited
        if let Some(latest) = self.cache.load() {
            return Ok(latest);
        }
        debug!("No cached prediction, running on demand");
        self.execute_contained().await
    }

    async fn execute_contained(&self) -> Result<Arc<PredictionResult>> {
        match AssertUnwindSafe(self.execute()).catch_unwind().await {
            Ok(result) => result,
            Err(payload) => Err(PredictorError::Inference(format!(
                "prediction cycle panicked: {}",
                panic_message(payload.as_ref())
            ))),
        }
    }

    async fn execute(&self) -> Result<Arc<PredictionResult>> {
        let start = Instant::now();

        let outcome = self.acquisition.acquire().await;
        for metric in outcome.failed_metrics() {
            self.metrics.inc_acquisition_failure(metric);
        }

        let features = self.context.aligner().align(&outcome.snapshot);
        let inference = self.context.engine().infer(&features)?;

        let result = self.cache.publish(PredictionResult {
            replica_count: inference.replica_count,
            confidence: inference.confidence,
            timestamp: self.clock.now(),
            snapshot: outcome.snapshot,
            model_version: self.context.model_version().to_string(),
        });

        self.metrics
            .record_prediction(result.replica_count, result.confidence);
        self.metrics
            .observe_cycle_duration(start.elapsed().as_secs_f64());
        self.logger.log_prediction(&result, outcome.failures.len());
        if self
            .context
            .engine()
            .output_formatter()
            .is_low_confidence(result.confidence)
        {
            self.logger.log_low_confidence(result.confidence);
        }

        Ok(result)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "unknown panic"
    }
}
