//! Scaling signal for the external event-driven autoscaler
//!
//! The autoscaler polls this value as its target replica count. Whatever
//! goes wrong upstream, including a panicking model, the answer is a valid
//! positive count: the last good prediction, a fresh one, or the floor.

use crate::error::PredictorError;
use crate::models::{ExternalScalingSignal, PredictionResult};
use crate::predictor::{PredictionPipeline, MIN_REPLICAS};
use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::error;

#[derive(Clone)]
pub struct ScalingBridge {
    pipeline: Option<Arc<PredictionPipeline>>,
}

impl ScalingBridge {
    /// `None` when no model could be loaded; every signal is then the floor
    pub fn new(pipeline: Option<Arc<PredictionPipeline>>) -> Self {
        Self { pipeline }
    }

    /// Current scaling signal. Never fails.
    pub async fn signal(&self) -> ExternalScalingSignal {
        let resolved = AssertUnwindSafe(self.resolve()).catch_unwind().await;

        match resolved {
            Ok(Ok(result)) => ExternalScalingSignal {
                metric_value: result.replica_count.max(MIN_REPLICAS),
                timestamp: result.timestamp,
            },
            Ok(Err(e)) => {
                error!(error = %e, fallback = MIN_REPLICAS, "Scaling signal unavailable");
                Self::floor()
            }
            Err(_) => {
                error!(fallback = MIN_REPLICAS, "Scaling signal computation panicked");
                Self::floor()
            }
        }
    }

    async fn resolve(&self) -> Result<Arc<PredictionResult>, PredictorError> {
        let pipeline = self
            .pipeline
            .as_ref()
            .ok_or(PredictorError::ModelNotLoaded)?;
        pipeline.latest_or_refresh().await
    }

    fn floor() -> ExternalScalingSignal {
        ExternalScalingSignal {
            metric_value: MIN_REPLICAS,
            timestamp: Utc::now(),
        }
    }
}
