//! Error types for the prediction path

use crate::models::RawMetric;
use thiserror::Error;

/// Errors raised between acquisition and publication of a prediction
#[derive(Debug, Error)]
pub enum PredictorError {
    /// A single metric query failed; contained inside acquisition
    #[error("acquisition of {metric} failed: {reason}")]
    Acquisition { metric: RawMetric, reason: String },

    /// Neither metadata nor the model itself describe the input layout
    #[error("feature schema unavailable: {0}")]
    SchemaUnavailable(String),

    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// Schema drift between training and serving
    #[error("feature mismatch: model expects {expected} features, got {actual}")]
    FeatureMismatch { expected: usize, actual: usize },

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("model not loaded or feature names unavailable")]
    ModelNotLoaded,
}

pub type Result<T> = std::result::Result<T, PredictorError>;
