//! Replica prediction engine

mod cache;
mod context;
mod features;
mod inference;
mod output;
mod pipeline;
mod scheduler;
mod schema;

pub use cache::PredictionCache;
pub use context::{ModelConfig, ServiceContext, DEFAULT_MODEL_VERSION};
pub use features::{DerivedFeature, FeatureAligner, FeatureSource, RATIO_EPSILON};
pub use inference::{
    compute_checksum, load_model, Inference, InferenceEngine, InferenceStats, LinearModel, Model,
    OnnxModel,
};
pub use output::{OutputConfig, OutputFormatter, DEFAULT_CONFIDENCE, MIN_REPLICAS};
pub use pipeline::PredictionPipeline;
pub use scheduler::{
    Clock, PredictionScheduler, SchedulerConfig, SchedulerHandle, SchedulerStats, SystemClock,
    DEFAULT_PREDICTION_INTERVAL,
};
pub use schema::{FeatureSchema, ModelMetadata, SchemaFidelity};
