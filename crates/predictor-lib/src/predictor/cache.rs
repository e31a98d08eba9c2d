//! Latest-prediction cache
//!
//! Single writer (the pipeline), many readers (HTTP handlers, the scaling
//! bridge). Readers never block and always observe a whole result.

use crate::models::PredictionResult;
use arc_swap::ArcSwapOption;
use std::sync::Arc;

#[derive(Default)]
pub struct PredictionCache {
    latest: ArcSwapOption<PredictionResult>,
}

impl PredictionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent published prediction, if any cycle has succeeded yet
    pub fn load(&self) -> Option<Arc<PredictionResult>> {
        self.latest.load_full()
    }

    /// Replace the cached prediction atomically
    pub fn publish(&self, result: PredictionResult) -> Arc<PredictionResult> {
        let result = Arc::new(result);
        self.latest.store(Some(result.clone()));
        result
    }

    pub fn is_empty(&self) -> bool {
        self.latest.load().is_none()
    }
}
