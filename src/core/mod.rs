//! Core module containing configuration and error types
//!
//! Shared by the driver contract, the registry and the test harness.

pub mod config;
pub mod errors;

// Re-export for convenience
pub use config::HarnessConfig;
pub use errors::{HarnessError, HarnessResult, PluginError, PluginResult};
