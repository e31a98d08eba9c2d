//! Prediction output post-processing
//!
//! Converts raw regressor output into a replica count and normalizes the
//! confidence score reported alongside it.

/// Replica floor; a prediction never asks for fewer pods
pub const MIN_REPLICAS: u32 = 1;

/// Confidence reported when the model has no probability output
pub const DEFAULT_CONFIDENCE: f64 = 0.95;

/// Configuration for output formatting
#[derive(Debug, Clone)]
pub struct OutputConfig {
    /// Confidence used when the model cannot supply one
    pub default_confidence: f64,
    /// Predictions below this confidence are flagged
    pub low_confidence_threshold: f64,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            default_confidence: DEFAULT_CONFIDENCE,
            low_confidence_threshold: 0.7,
        }
    }
}

/// Formats raw model outputs into replica counts and confidence scores
#[derive(Debug, Clone)]
pub struct OutputFormatter {
    config: OutputConfig,
}

impl OutputFormatter {
    pub fn new() -> Self {
        Self {
            config: OutputConfig::default(),
        }
    }

    /// Round to the nearest integer with a floor of [`MIN_REPLICAS`].
    ///
    /// Non-finite output is not a usable scale decision and maps to the floor.
    pub fn replica_count(&self, raw: f64) -> u32 {
        if !raw.is_finite() {
            return MIN_REPLICAS;
        }
        let rounded = raw.round();
        if rounded >= u32::MAX as f64 {
            u32::MAX
        } else {
            (rounded.max(0.0) as u32).max(MIN_REPLICAS)
        }
    }

    /// Clamp a model-supplied confidence to [0, 1], or use the default
    pub fn confidence(&self, raw: Option<f64>) -> f64 {
        match raw {
            Some(value) if value.is_finite() => value.clamp(0.0, 1.0),
            _ => self.config.default_confidence,
        }
    }

    pub fn is_low_confidence(&self, confidence: f64) -> bool {
        confidence < self.config.low_confidence_threshold
    }
}

impl Default for OutputFormatter {
    fn default() -> Self {
        Self::new()
    }
}
