//! Core library for workload replica prediction
//!
//! This crate provides the core functionality for:
//! - Metrics acquisition from a Prometheus-compatible store
//! - Feature alignment and ML inference of replica counts
//! - Periodic prediction with a lock-free latest-result cache
//! - The fail-safe scaling signal for an external autoscaler
//! - Health checks and observability

pub mod bridge;
pub mod collector;
pub mod error;
pub mod health;
pub mod models;
pub mod observability;
pub mod predictor;

pub use bridge::ScalingBridge;
pub use error::{PredictorError, Result};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{PredictorMetrics, StructuredLogger};
