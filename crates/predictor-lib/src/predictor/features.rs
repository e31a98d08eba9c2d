//! Feature alignment for ML inference
//!
//! Maps a [`WorkloadSnapshot`] onto the model's feature order. Each schema
//! slot resolves once, at construction, to a raw metric, a derived ratio, or
//! [`FeatureSource::Unavailable`]. Unavailable slots are zero-filled: the
//! model's training-time features may be richer than what is observable
//! online, and serving must not refuse to predict because of that.

use super::schema::FeatureSchema;
use crate::models::{FeatureVector, RawMetric, WorkloadSnapshot};
use tracing::{debug, warn};

/// Additive guard for ratio denominators
pub const RATIO_EPSILON: f64 = 1e-6;

/// Engineered features computable from a single snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DerivedFeature {
    /// cpu_usage / (memory_usage + epsilon)
    CpuMemoryRatio,
    /// Online proxy for total network traffic
    NetworkTotal,
}

impl DerivedFeature {
    pub const ALL: [DerivedFeature; 2] = [DerivedFeature::CpuMemoryRatio, DerivedFeature::NetworkTotal];

    pub fn name(&self) -> &'static str {
        match self {
            DerivedFeature::CpuMemoryRatio => "cpu_memory_ratio",
            DerivedFeature::NetworkTotal => "network_total",
        }
    }

    pub fn compute(&self, snapshot: &WorkloadSnapshot) -> f64 {
        match self {
            DerivedFeature::CpuMemoryRatio => {
                snapshot.cpu_usage / (snapshot.memory_usage + RATIO_EPSILON)
            }
            DerivedFeature::NetworkTotal => snapshot.request_rate,
        }
    }
}

/// How one schema slot is filled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeatureSource {
    Raw(RawMetric),
    Derived(DerivedFeature),
    /// Not reconstructable from real-time data; always 0.0
    Unavailable,
}

impl FeatureSource {
    pub fn resolve(name: &str) -> Self {
        if let Ok(metric) = name.parse::<RawMetric>() {
            return FeatureSource::Raw(metric);
        }
        DerivedFeature::ALL
            .iter()
            .find(|d| d.name() == name)
            .map(|d| FeatureSource::Derived(*d))
            .unwrap_or(FeatureSource::Unavailable)
    }

    fn value(&self, snapshot: &WorkloadSnapshot) -> f64 {
        match self {
            FeatureSource::Raw(metric) => snapshot.get(*metric),
            FeatureSource::Derived(derived) => derived.compute(snapshot),
            FeatureSource::Unavailable => 0.0,
        }
    }
}

/// Precomputed alignment plan for one schema
#[derive(Debug, Clone)]
pub struct FeatureAligner {
    plan: Vec<FeatureSource>,
    unavailable: Vec<String>,
}

impl FeatureAligner {
    pub fn new(schema: &FeatureSchema) -> Self {
        let plan: Vec<FeatureSource> = schema
            .names()
            .iter()
            .map(|name| FeatureSource::resolve(name))
            .collect();

        let unavailable: Vec<String> = schema
            .names()
            .iter()
            .zip(&plan)
            .filter(|(_, source)| **source == FeatureSource::Unavailable)
            .map(|(name, _)| name.clone())
            .collect();

        if !unavailable.is_empty() {
            warn!(
                count = unavailable.len(),
                total = plan.len(),
                features = ?unavailable,
                "Features not observable online will be filled with 0"
            );
        }

        Self { plan, unavailable }
    }

    pub fn plan(&self) -> &[FeatureSource] {
        &self.plan
    }

    /// Schema names that are always zero-filled
    pub fn unavailable_features(&self) -> &[String] {
        &self.unavailable
    }

    /// Build the model input; its length always equals the schema length
    pub fn align(&self, snapshot: &WorkloadSnapshot) -> FeatureVector {
        if !self.unavailable.is_empty() {
            debug!(
                zero_filled = self.unavailable.len(),
                "Aligning snapshot with unavailable features"
            );
        }
        FeatureVector::new(
            self.plan
                .iter()
                .map(|source| source.value(snapshot) as f32)
                .collect(),
        )
    }
}
