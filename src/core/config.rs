//! Configuration for the plugin test runner
//!
//! Settings come from environment variables; command line flags of the
//! `plugin-test` binary override them.

use super::{HarnessError, HarnessResult};
use crate::driver::EventType;
use std::env;

/// Default number of events per run
pub const DEFAULT_COUNT: u64 = 100;

/// Settings for one harness run
#[derive(Debug, Clone, PartialEq)]
pub struct HarnessConfig {
    pub plugin_name: String,
    /// Connection URI, `None` to use the driver's example URI
    pub plugin_uri: Option<String>,
    /// Events to send, 0 runs until a call fails for good
    pub count: u64,
    pub event_type: Option<EventType>,
    pub speed: bool,
    pub debug: bool,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            plugin_name: "stdout".to_string(),
            plugin_uri: None,
            count: DEFAULT_COUNT,
            event_type: None,
            speed: false,
            debug: true,
        }
    }
}

impl HarnessConfig {
    /// Load configuration from environment variables
    ///
    /// # Environment Variables
    ///
    /// - `PLUGIN_NAME`: registered driver to test (default: "stdout")
    /// - `PLUGIN_URI`: connection URI (default: the driver's example URI)
    /// - `TEST_COUNT`: number of events, 0 for unbounded (default: 100)
    /// - `TEST_EVENT_TYPE`: insert, update, delete, query or commit (default: random)
    /// - `TEST_SPEED`: run the throughput mode (default: false)
    /// - `TEST_DEBUG`: log every successful call (default: true)
    pub fn from_env() -> HarnessResult<Self> {
        let config = Self::read_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse the same variables as [`from_env`](Self::from_env) without
    /// [`validate`](Self::validate), so overrides can be applied first.
    pub fn read_env() -> HarnessResult<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> HarnessResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let plugin_name = lookup("PLUGIN_NAME").unwrap_or(defaults.plugin_name);
        let plugin_uri = lookup("PLUGIN_URI").filter(|uri| !uri.is_empty());

        let count = match lookup("TEST_COUNT") {
            Some(raw) => raw.trim().parse::<u64>().map_err(|_| {
                HarnessError::config(format!("TEST_COUNT must be a non-negative integer, got {}", raw))
            })?,
            None => defaults.count,
        };

        let event_type = lookup("TEST_EVENT_TYPE")
            .filter(|raw| !raw.is_empty())
            .map(|raw| raw.parse::<EventType>().map_err(HarnessError::config))
            .transpose()?;

        let speed = match lookup("TEST_SPEED") {
            Some(raw) => parse_bool("TEST_SPEED", &raw)?,
            None => defaults.speed,
        };
        let debug = match lookup("TEST_DEBUG") {
            Some(raw) => parse_bool("TEST_DEBUG", &raw)?,
            None => defaults.debug,
        };

        Ok(Self {
            plugin_name,
            plugin_uri,
            count,
            event_type,
            speed,
            debug,
        })
    }

    /// Check settings that depend on each other
    pub fn validate(&self) -> HarnessResult<()> {
        if self.plugin_name.is_empty() {
            return Err(HarnessError::config("plugin name cannot be empty"));
        }
        if self.speed && matches!(self.event_type, None | Some(EventType::Commit)) {
            return Err(HarnessError::config(
                "speed mode needs an insert, update, delete or query event type",
            ));
        }
        Ok(())
    }
}

fn parse_bool(key: &str, raw: &str) -> HarnessResult<bool> {
    match raw.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(HarnessError::config(format!("{} must be a boolean, got {}", key, raw))),
    }
}
