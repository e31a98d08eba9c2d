//! CLI command implementations

pub mod history;
pub mod prediction;
