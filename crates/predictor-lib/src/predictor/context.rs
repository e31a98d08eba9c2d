//! Immutable serving context
//!
//! Built once at startup: the loaded model, its feature schema and the
//! alignment plan derived from it. Shared read-only afterwards.

use super::features::FeatureAligner;
use super::inference::{load_model, InferenceEngine, Model};
use super::schema::{FeatureSchema, ModelMetadata};
use crate::error::Result;
use std::path::PathBuf;
use tracing::info;

/// Version reported when neither metadata nor the artifact name one
pub const DEFAULT_MODEL_VERSION: &str = "1.1.0";

/// Where the model artifacts live
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub model_path: PathBuf,
    pub metadata_path: PathBuf,
    /// Expected hex SHA256 of the model artifact
    pub model_sha256: Option<String>,
}

pub struct ServiceContext {
    engine: InferenceEngine,
    schema: FeatureSchema,
    aligner: FeatureAligner,
    model_version: String,
}

impl ServiceContext {
    /// Load metadata and model, then resolve the schema.
    ///
    /// Fails when the model cannot be loaded or no schema can be determined;
    /// the service then runs without a predictor.
    pub fn load(config: &ModelConfig) -> Result<Self> {
        let metadata = ModelMetadata::load(&config.metadata_path);
        let metadata_width = metadata
            .as_ref()
            .and_then(ModelMetadata::feature_names)
            .map(|names| names.len());

        let model = load_model(
            &config.model_path,
            config.model_sha256.as_deref(),
            metadata_width,
        )?;
        let schema = FeatureSchema::resolve(metadata.as_ref(), model.expected_features())?;

        let version = metadata
            .as_ref()
            .and_then(|m| m.model_version.clone())
            .or_else(|| model.version().map(str::to_string))
            .unwrap_or_else(|| DEFAULT_MODEL_VERSION.to_string());

        Ok(Self::new(model, schema, version))
    }

    pub fn new(model: Box<dyn Model>, schema: FeatureSchema, model_version: impl Into<String>) -> Self {
        let aligner = FeatureAligner::new(&schema);
        let model_version = model_version.into();

        info!(
            features = schema.len(),
            fidelity = schema.fidelity().as_str(),
            unavailable = aligner.unavailable_features().len(),
            model_version = %model_version,
            "Feature schema resolved"
        );

        Self {
            engine: InferenceEngine::new(model),
            schema,
            aligner,
            model_version,
        }
    }

    pub fn engine(&self) -> &InferenceEngine {
        &self.engine
    }

    pub fn schema(&self) -> &FeatureSchema {
        &self.schema
    }

    pub fn aligner(&self) -> &FeatureAligner {
        &self.aligner
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }
}
