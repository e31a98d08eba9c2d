//! Model loading and inference
//!
//! Two artifact formats are served behind the [`Model`] trait: ONNX graphs
//! run through tract, and a JSON linear model for regressors exported as
//! plain coefficients.

use super::output::OutputFormatter;
use crate::error::{PredictorError, Result};
use crate::models::FeatureVector;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tract_onnx::prelude::*;
use tract_onnx::tract_hir::internal::DimLike;
use tracing::{debug, info, warn};

/// Maximum inference latency before warning
const MAX_INFERENCE_MS: u128 = 50;

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// A trained replica-count regressor
pub trait Model: Send + Sync {
    /// Input width declared by the artifact, when it declares one
    fn expected_features(&self) -> Option<usize>;

    /// Raw regressor output for one feature row
    fn predict(&self, features: &[f32]) -> Result<f64>;

    /// Whether [`Model::confidence`] yields class probabilities
    fn supports_confidence(&self) -> bool {
        false
    }

    /// Highest class probability for one feature row
    fn confidence(&self, _features: &[f32]) -> Result<Option<f64>> {
        Ok(None)
    }

    /// Version embedded in the artifact, if any
    fn version(&self) -> Option<&str> {
        None
    }
}

/// ONNX graph executed with tract
pub struct OnnxModel {
    plan: TractModel,
    input_width: usize,
    declared_width: Option<usize>,
    has_probabilities: bool,
}

impl OnnxModel {
    /// Parse and optimize an ONNX model. `fallback_width` is used when the
    /// graph leaves its feature dimension symbolic.
    pub fn from_bytes(bytes: &[u8], fallback_width: Option<usize>) -> Result<Self> {
        let model = tract_onnx::onnx()
            .model_for_read(&mut std::io::Cursor::new(bytes))
            .map_err(|e| PredictorError::ModelLoad(format!("failed to parse ONNX model: {}", e)))?;

        let declared_width = Self::introspect_width(&model);
        let input_width = declared_width.or(fallback_width).ok_or_else(|| {
            PredictorError::SchemaUnavailable(
                "ONNX input width is symbolic and no feature names were provided".to_string(),
            )
        })?;

        let has_probabilities = model
            .output_outlets()
            .map(|outlets| outlets.len() > 1)
            .unwrap_or(false);

        let plan = model
            .with_input_fact(0, f32::fact([1, input_width]).into())
            .and_then(|m| m.into_optimized())
            .and_then(|m| m.into_runnable())
            .map_err(|e| PredictorError::ModelLoad(format!("failed to prepare ONNX model: {}", e)))?;

        Ok(Self {
            plan,
            input_width,
            declared_width,
            has_probabilities,
        })
    }

    fn introspect_width(model: &InferenceModel) -> Option<usize> {
        let typed = model.clone().into_typed().ok()?;
        let fact = typed.input_fact(0).ok()?;
        fact.shape.last()?.to_usize().ok()
    }

    fn run(&self, features: &[f32]) -> Result<TVec<TValue>> {
        let input: Tensor = tract_ndarray::Array2::from_shape_vec((1, self.input_width), features.to_vec())
            .map_err(|e| PredictorError::Inference(e.to_string()))?
            .into();
        self.plan
            .run(tvec!(input.into()))
            .map_err(|e| PredictorError::Inference(e.to_string()))
    }

    fn output_values(outputs: &TVec<TValue>, index: usize) -> Result<Vec<f32>> {
        let output = outputs
            .get(index)
            .ok_or_else(|| PredictorError::Inference(format!("model produced no output {}", index)))?;
        let values = output
            .cast_to::<f32>()
            .map_err(|e| PredictorError::Inference(e.to_string()))?;
        let slice = values
            .as_slice::<f32>()
            .map_err(|e| PredictorError::Inference(e.to_string()))?;
        Ok(slice.to_vec())
    }
}

impl Model for OnnxModel {
    fn expected_features(&self) -> Option<usize> {
        self.declared_width
    }

    fn predict(&self, features: &[f32]) -> Result<f64> {
        let outputs = self.run(features)?;
        Self::output_values(&outputs, 0)?
            .first()
            .map(|v| *v as f64)
            .ok_or_else(|| PredictorError::Inference("empty model output".to_string()))
    }

    fn supports_confidence(&self) -> bool {
        self.has_probabilities
    }

    fn confidence(&self, features: &[f32]) -> Result<Option<f64>> {
        if !self.has_probabilities {
            return Ok(None);
        }
        let outputs = self.run(features)?;
        let probabilities = Self::output_values(&outputs, 1)?;
        Ok(probabilities
            .into_iter()
            .map(f64::from)
            .fold(None, |max: Option<f64>, p| Some(max.map_or(p, |m| m.max(p)))))
    }
}

/// Linear regressor stored as JSON: `{"intercept": .., "coefficients": [..]}`
#[derive(Debug, Clone, Deserialize)]
pub struct LinearModel {
    pub intercept: f64,
    pub coefficients: Vec<f64>,
    #[serde(default)]
    pub version: Option<String>,
}

impl LinearModel {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| PredictorError::ModelLoad(format!("invalid linear model: {}", e)))
    }
}

impl Model for LinearModel {
    fn expected_features(&self) -> Option<usize> {
        Some(self.coefficients.len())
    }

    fn predict(&self, features: &[f32]) -> Result<f64> {
        if features.len() != self.coefficients.len() {
            return Err(PredictorError::FeatureMismatch {
                expected: self.coefficients.len(),
                actual: features.len(),
            });
        }
        Ok(self.intercept
            + self
                .coefficients
                .iter()
                .zip(features)
                .map(|(c, x)| c * f64::from(*x))
                .sum::<f64>())
    }

    fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }
}

/// Load a model artifact, dispatching on file extension
pub fn load_model(
    path: &Path,
    expected_sha256: Option<&str>,
    fallback_width: Option<usize>,
) -> Result<Box<dyn Model>> {
    let bytes = std::fs::read(path)
        .map_err(|e| PredictorError::ModelLoad(format!("{}: {}", path.display(), e)))?;

    if let Some(expected) = expected_sha256 {
        let actual = compute_checksum(&bytes);
        if !actual.eq_ignore_ascii_case(expected.trim()) {
            return Err(PredictorError::ModelLoad(format!(
                "checksum mismatch: expected {}, got {}",
                expected, actual
            )));
        }
        debug!(checksum = %actual, "Model checksum verified");
    }

    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase());

    let model: Box<dyn Model> = match extension.as_deref() {
        Some("onnx") => Box::new(OnnxModel::from_bytes(&bytes, fallback_width)?),
        Some("json") => Box::new(LinearModel::from_bytes(&bytes)?),
        other => {
            return Err(PredictorError::ModelLoad(format!(
                "unsupported model format: {}",
                other.unwrap_or("<none>")
            )))
        }
    };

    info!(
        path = %path.display(),
        expected_features = ?model.expected_features(),
        confidence = model.supports_confidence(),
        "Model loaded"
    );
    Ok(model)
}

/// Compute SHA256 checksum of data
pub fn compute_checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Outcome of one inference
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Inference {
    pub replica_count: u32,
    pub confidence: f64,
    pub raw_output: f64,
}

/// Inference statistics
#[derive(Debug, Clone)]
pub struct InferenceStats {
    pub total_inferences: u64,
    pub slow_inferences: u64,
}

/// Runs the loaded model and post-processes its output
pub struct InferenceEngine {
    model: Box<dyn Model>,
    output_formatter: OutputFormatter,
    inference_count: AtomicU64,
    slow_inference_count: AtomicU64,
}

impl InferenceEngine {
    pub fn new(model: Box<dyn Model>) -> Self {
        Self {
            model,
            output_formatter: OutputFormatter::new(),
            inference_count: AtomicU64::new(0),
            slow_inference_count: AtomicU64::new(0),
        }
    }

    pub fn expected_features(&self) -> Option<usize> {
        self.model.expected_features()
    }

    pub fn output_formatter(&self) -> &OutputFormatter {
        &self.output_formatter
    }

    /// Predict a replica count. A width mismatch is rejected before the
    /// model runs; nothing is truncated or padded.
    pub fn infer(&self, features: &FeatureVector) -> Result<Inference> {
        if let Some(expected) = self.model.expected_features() {
            if expected != features.len() {
                return Err(PredictorError::FeatureMismatch {
                    expected,
                    actual: features.len(),
                });
            }
        }

        let start = Instant::now();
        let input = features.as_slice();
        let raw_output = self.model.predict(input)?;

        let raw_confidence = if self.model.supports_confidence() {
            match self.model.confidence(input) {
                Ok(c) => c,
                Err(e) => {
                    debug!(error = %e, "Confidence unavailable, using default");
                    None
                }
            }
        } else {
            None
        };

        let elapsed = start.elapsed();
        self.inference_count.fetch_add(1, Ordering::Relaxed);
        if elapsed.as_millis() > MAX_INFERENCE_MS {
            self.slow_inference_count.fetch_add(1, Ordering::Relaxed);
            warn!(elapsed_ms = elapsed.as_millis(), "Inference exceeded {}ms target", MAX_INFERENCE_MS);
        } else {
            debug!(elapsed_us = elapsed.as_micros(), raw_output, "Inference completed");
        }

        Ok(Inference {
            replica_count: self.output_formatter.replica_count(raw_output),
            confidence: self.output_formatter.confidence(raw_confidence),
            raw_output,
        })
    }

    pub fn stats(&self) -> InferenceStats {
        InferenceStats {
            total_inferences: self.inference_count.load(Ordering::Relaxed),
            slow_inferences: self.slow_inference_count.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predictor::output::DEFAULT_CONFIDENCE;
    use std::io::Write;

    struct ProbabilisticModel;

    impl Model for ProbabilisticModel {
        fn expected_features(&self) -> Option<usize> {
            None
        }

        fn predict(&self, _features: &[f32]) -> Result<f64> {
            Ok(4.2)
        }

        fn supports_confidence(&self) -> bool {
            true
        }

        fn confidence(&self, _features: &[f32]) -> Result<Option<f64>> {
            Ok(Some(0.81))
        }
    }

    fn linear(intercept: f64, coefficients: Vec<f64>) -> LinearModel {
        LinearModel {
            intercept,
            coefficients,
            version: None,
        }
    }

    fn artifact(suffix: &str, content: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::Builder::new().suffix(suffix).tempfile().unwrap();
        file.write_all(content).unwrap();
        file
    }

    #[test]
    fn test_linear_prediction() {
        let model = linear(1.0, vec![0.05, 0.0, 0.001]);
        let raw = model.predict(&[40.0, 0.0, 512.0]).unwrap();
        assert!((raw - 3.512).abs() < 1e-6);
    }

    #[test]
    fn test_engine_rounds_and_defaults_confidence() {
        let engine = InferenceEngine::new(Box::new(linear(1.0, vec![0.05, 0.0, 0.001])));
        let result = engine.infer(&FeatureVector::new(vec![40.0, 0.0, 512.0])).unwrap();

        assert_eq!(result.replica_count, 4);
        assert_eq!(result.confidence, DEFAULT_CONFIDENCE);
        assert_eq!(engine.stats().total_inferences, 1);
    }

    #[test]
    fn test_engine_uses_model_confidence() {
        let engine = InferenceEngine::new(Box::new(ProbabilisticModel));
        let result = engine.infer(&FeatureVector::new(vec![1.0])).unwrap();
        assert_eq!(result.replica_count, 4);
        assert_eq!(result.confidence, 0.81);
    }

    #[test]
    fn test_width_mismatch_rejected() {
        let engine = InferenceEngine::new(Box::new(linear(0.0, vec![1.0; 5])));
        let err = engine.infer(&FeatureVector::new(vec![1.0; 3])).unwrap_err();

        assert!(matches!(
            err,
            PredictorError::FeatureMismatch {
                expected: 5,
                actual: 3
            }
        ));
        assert_eq!(engine.stats().total_inferences, 0);
    }

    #[test]
    fn test_negative_output_floored() {
        let engine = InferenceEngine::new(Box::new(linear(-10.0, vec![1.0])));
        let result = engine.infer(&FeatureVector::new(vec![2.0])).unwrap();
        assert_eq!(result.replica_count, 1);
    }

    #[test]
    fn test_load_linear_model_from_json() {
        let file = artifact(".json", br#"{"intercept":0.5,"coefficients":[1.0,2.0],"version":"3.0.0"}"#);
        let model = load_model(file.path(), None, None).unwrap();

        assert_eq!(model.expected_features(), Some(2));
        assert_eq!(model.version(), Some("3.0.0"));
        assert_eq!(model.predict(&[1.0, 1.0]).unwrap(), 3.5);
    }

    #[test]
    fn test_checksum_verification() {
        let content = br#"{"intercept":1.0,"coefficients":[1.0]}"#;
        let file = artifact(".json", content);
        let checksum = compute_checksum(content);

        assert!(load_model(file.path(), Some(&checksum), None).is_ok());
        assert!(load_model(file.path(), Some(&checksum.to_uppercase()), None).is_ok());

        let err = load_model(file.path(), Some("deadbeef"), None).err().unwrap();
        assert!(matches!(err, PredictorError::ModelLoad(msg) if msg.contains("checksum")));
    }

    #[test]
    fn test_load_failures() {
        let err = load_model(Path::new("/nonexistent/model.onnx"), None, None).err().unwrap();
        assert!(matches!(err, PredictorError::ModelLoad(_)));

        let file = artifact(".pkl", b"\x80\x04");
        let err = load_model(file.path(), None, None).err().unwrap();
        assert!(matches!(err, PredictorError::ModelLoad(msg) if msg.contains("unsupported")));

        let file = artifact(".onnx", b"not an onnx graph");
        let err = load_model(file.path(), None, Some(3)).err().unwrap();
        assert!(matches!(err, PredictorError::ModelLoad(_)));
    }

    /// Minimal protobuf writer for building ONNX graphs in tests
    mod onnx_fixture {
        fn varint(mut value: u64, out: &mut Vec<u8>) {
            while value >= 0x80 {
                out.push((value as u8) | 0x80);
                value >>= 7;
            }
            out.push(value as u8);
        }

        fn int_field(field: u64, value: i64) -> Vec<u8> {
            let mut out = Vec::new();
            varint(field << 3, &mut out);
            varint(value as u64, &mut out);
            out
        }

        fn bytes_field(field: u64, data: &[u8]) -> Vec<u8> {
            let mut out = Vec::new();
            varint((field << 3) | 2, &mut out);
            varint(data.len() as u64, &mut out);
            out.extend_from_slice(data);
            out
        }

        fn str_field(field: u64, value: &str) -> Vec<u8> {
            bytes_field(field, value.as_bytes())
        }

        const FLOAT: i64 = 1;

        fn value_info(name: &str, dims: &[i64]) -> Vec<u8> {
            let shape: Vec<u8> = dims
                .iter()
                .flat_map(|d| bytes_field(1, &int_field(1, *d)))
                .collect();
            let tensor = [int_field(1, FLOAT), bytes_field(2, &shape)].concat();
            let type_proto = bytes_field(1, &tensor);
            [str_field(1, name), bytes_field(2, &type_proto)].concat()
        }

        fn initializer(name: &str, dims: &[i64], values: &[f32]) -> Vec<u8> {
            let mut out: Vec<u8> = dims.iter().flat_map(|d| int_field(1, *d)).collect();
            out.extend(int_field(2, FLOAT));
            out.extend(str_field(8, name));
            let raw: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
            out.extend(bytes_field(9, &raw));
            out
        }

        fn node(inputs: &[&str], outputs: &[&str], op_type: &str) -> Vec<u8> {
            let mut out = Vec::new();
            for input in inputs {
                out.extend(str_field(1, input));
            }
            for output in outputs {
                out.extend(str_field(2, output));
            }
            out.extend(str_field(4, op_type));
            out
        }

        /// `y = x . [0.05, 0, 0.001] + 1` over three features. With
        /// `with_probabilities`, a second output `p = sigmoid(x . W2)` where
        /// only the first feature contributes, with weights `[0.05, -0.05]`.
        pub fn regressor(with_probabilities: bool) -> Vec<u8> {
            let mut nodes = vec![
                node(&["x", "w"], &["xw"], "MatMul"),
                node(&["xw", "b"], &["y"], "Add"),
            ];
            let mut initializers = vec![
                initializer("w", &[3, 1], &[0.05, 0.0, 0.001]),
                initializer("b", &[1], &[1.0]),
            ];
            let mut outputs = vec![value_info("y", &[1, 1])];

            if with_probabilities {
                nodes.push(node(&["x", "w2"], &["z"], "MatMul"));
                nodes.push(node(&["z"], &["p"], "Sigmoid"));
                initializers.push(initializer("w2", &[3, 2], &[0.05, -0.05, 0.0, 0.0, 0.0, 0.0]));
                outputs.push(value_info("p", &[1, 2]));
            }

            let mut graph: Vec<u8> = nodes.iter().flat_map(|n| bytes_field(1, n)).collect();
            graph.extend(str_field(2, "replicas"));
            for init in &initializers {
                graph.extend(bytes_field(5, init));
            }
            graph.extend(bytes_field(11, &value_info("x", &[1, 3])));
            for output in &outputs {
                graph.extend(bytes_field(12, output));
            }

            [
                int_field(1, 7),
                bytes_field(8, &int_field(2, 13)),
                bytes_field(7, &graph),
            ]
            .concat()
        }
    }

    #[test]
    fn test_onnx_regressor_reports_declared_width() {
        let model = OnnxModel::from_bytes(&onnx_fixture::regressor(false), None).unwrap();

        assert_eq!(model.expected_features(), Some(3));
        assert!(!model.supports_confidence());
        let raw = model.predict(&[40.0, 0.0, 512.0]).unwrap();
        assert!((raw - 3.512).abs() < 1e-4);
    }

    #[test]
    fn test_onnx_engine_rejects_wrong_width() {
        let file = artifact(".onnx", &onnx_fixture::regressor(false));
        let engine = InferenceEngine::new(load_model(file.path(), None, None).unwrap());

        let result = engine.infer(&FeatureVector::new(vec![40.0, 0.0, 512.0])).unwrap();
        assert_eq!(result.replica_count, 4);
        assert_eq!(result.confidence, DEFAULT_CONFIDENCE);

        let err = engine.infer(&FeatureVector::new(vec![40.0, 0.0])).unwrap_err();
        assert!(matches!(
            err,
            PredictorError::FeatureMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_onnx_probability_output_enables_confidence() {
        let model = OnnxModel::from_bytes(&onnx_fixture::regressor(true), None).unwrap();
        assert!(model.supports_confidence());

        let engine = InferenceEngine::new(Box::new(model));
        let result = engine.infer(&FeatureVector::new(vec![40.0, 0.0, 512.0])).unwrap();

        // sigmoid(2.0)
        assert_eq!(result.replica_count, 4);
        assert!((result.confidence - 0.880_797).abs() < 1e-4);
    }
}
