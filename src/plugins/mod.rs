//! Plugins bundled with the SDK

use crate::driver;
use std::sync::Arc;

pub mod stdout;

pub use stdout::{StdoutConn, StdoutDriver};

/// Version reported by the bundled plugins
pub const BUNDLED_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Register every bundled plugin in the global registry
pub fn register_builtin() {
    driver::register("stdout", Arc::new(StdoutDriver::new()), BUNDLED_VERSION);
}
