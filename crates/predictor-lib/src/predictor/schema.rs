//! Feature schema discovery
//!
//! The schema is the ordered list of input names the trained model expects.
//! It comes from the training metadata file when available, otherwise from
//! the model's own input width as positional placeholders.

use crate::error::{PredictorError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, warn};

/// Where the feature names came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaFidelity {
    /// Names read from training metadata
    Metadata,
    /// Positional `f_{i}` placeholders; order may not match training
    Synthetic,
}

impl SchemaFidelity {
    pub fn as_str(&self) -> &'static str {
        match self {
            SchemaFidelity::Metadata => "metadata",
            SchemaFidelity::Synthetic => "synthetic",
        }
    }
}

/// Ordered feature names expected by the model. Names may repeat.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSchema {
    names: Vec<String>,
    fidelity: SchemaFidelity,
}

impl FeatureSchema {
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
            fidelity: SchemaFidelity::Metadata,
        }
    }

    /// Placeholder schema `f_0 .. f_{n-1}` for a model of known width
    pub fn synthetic(width: usize) -> Self {
        Self {
            names: (0..width).map(|i| format!("f_{}", i)).collect(),
            fidelity: SchemaFidelity::Synthetic,
        }
    }

    /// Pick metadata names first, then the model's introspected width
    pub fn resolve(metadata: Option<&ModelMetadata>, model_width: Option<usize>) -> Result<Self> {
        if let Some(names) = metadata.and_then(ModelMetadata::feature_names) {
            return Ok(Self::from_names(names.iter().cloned()));
        }

        match model_width {
            Some(width) if width > 0 => {
                warn!(
                    features = width,
                    "Using synthetic feature names - order may be incorrect"
                );
                Ok(Self::synthetic(width))
            }
            _ => Err(PredictorError::SchemaUnavailable(
                "no feature names in metadata and model input width is unknown".to_string(),
            )),
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn fidelity(&self) -> SchemaFidelity {
        self.fidelity
    }

    pub fn is_synthetic(&self) -> bool {
        self.fidelity == SchemaFidelity::Synthetic
    }
}

/// Companion metadata written by the training pipeline
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModelMetadata {
    #[serde(default)]
    pub selected_features: Vec<String>,
    #[serde(default)]
    pub feature_names: Vec<String>,
    #[serde(default)]
    pub model_version: Option<String>,
}

impl ModelMetadata {
    /// Read metadata from disk. A missing or unreadable file yields `None`;
    /// the caller falls back to introspection.
    pub fn load(path: &Path) -> Option<Self> {
        if !path.is_file() {
            debug!(path = %path.display(), "No model metadata file");
            return None;
        }

        let parsed = std::fs::read_to_string(path)
            .map_err(|e| e.to_string())
            .and_then(|content| serde_json::from_str(&content).map_err(|e| e.to_string()));

        match parsed {
            Ok(meta) => Some(meta),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "Could not read metadata file");
                None
            }
        }
    }

    /// `selected_features` wins over `feature_names`; empty lists count as absent
    pub fn feature_names(&self) -> Option<&[String]> {
        if !self.selected_features.is_empty() {
            Some(&self.selected_features)
        } else if !self.feature_names.is_empty() {
            Some(&self.feature_names)
        } else {
            None
        }
    }
}
