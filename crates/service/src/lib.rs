//! Replica predictor service: configuration and HTTP API
//!
//! The binary in `main.rs` wires these together with the prediction
//! pipeline from `predictor-lib`.

pub mod api;
pub mod config;
