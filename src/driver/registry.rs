//! Name-keyed registry of plugin drivers
//!
//! Drivers register once at startup; the broker then opens connections and validates
//! URIs by plugin name. Reads share the lock, registration takes it exclusively, and
//! no driver code runs while the lock is held.

use super::{API_VERSION, ConnFun, Driver};
use crate::core::errors::{PluginError, PluginResult};
use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};
use tracing::{debug, error, info};

/// Registration record of one driver
#[derive(Clone, Serialize)]
pub struct DriverStructure {
    /// Plugin's own version
    pub version: String,
    /// SDK API version the plugin was registered against
    pub bifrost_version: String,
    pub error: String,
    pub example_conn_uri: String,
    #[serde(skip)]
    driver: Arc<dyn Driver>,
}

impl DriverStructure {
    pub fn driver(&self) -> &Arc<dyn Driver> {
        &self.driver
    }
}

impl fmt::Debug for DriverStructure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverStructure")
            .field("version", &self.version)
            .field("bifrost_version", &self.bifrost_version)
            .field("error", &self.error)
            .field("example_conn_uri", &self.example_conn_uri)
            .finish_non_exhaustive()
    }
}

/// Registry for available plugin drivers
pub struct DriverRegistry {
    drivers: RwLock<HashMap<String, DriverStructure>>,
}

static GLOBAL: LazyLock<DriverRegistry> = LazyLock::new(DriverRegistry::new);

impl DriverRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            drivers: RwLock::new(HashMap::new()),
        }
    }

    /// Process-wide registry used by the free functions of this module
    pub fn global() -> &'static DriverRegistry {
        &GLOBAL
    }

    /// Register a driver under `name`.
    ///
    /// A second registration of the same name is rejected and the first one kept.
    pub fn register(&self, name: &str, driver: Arc<dyn Driver>, version: &str) -> PluginResult<()> {
        let example_conn_uri = driver.get_uri_example();

        let mut drivers = self.drivers.write();
        if drivers.contains_key(name) {
            return Err(PluginError::DuplicateDriver {
                name: name.to_string(),
            });
        }
        drivers.insert(
            name.to_string(),
            DriverStructure {
                version: version.to_string(),
                bifrost_version: API_VERSION.to_string(),
                error: String::new(),
                example_conn_uri,
                driver,
            },
        );
        info!("Registered driver: {} ({})", name, version);
        Ok(())
    }

    /// Copy of every registration. Changes to the returned map never reach the registry.
    pub fn drivers(&self) -> HashMap<String, DriverStructure> {
        self.drivers.read().clone()
    }

    /// Sorted names of registered drivers
    pub fn driver_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.drivers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.drivers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.read().is_empty()
    }

    fn lookup(&self, name: &str) -> Option<Arc<dyn Driver>> {
        self.drivers.read().get(name).map(|entry| entry.driver.clone())
    }

    /// Open a connection through the driver registered as `name`, `None` if unknown
    pub fn open(&self, name: &str, uri: &str) -> Option<Box<dyn ConnFun>> {
        match self.lookup(name) {
            Some(driver) => Some(driver.open(uri)),
            None => {
                debug!("Open called for unknown driver: {}", name);
                None
            }
        }
    }

    /// Validate `uri` with the driver registered as `name`
    pub fn check_uri(&self, name: &str, uri: &str) -> PluginResult<()> {
        let driver = self.lookup(name).ok_or_else(|| PluginError::not_found(name))?;
        driver.check_uri(uri)
    }
}

impl Default for DriverRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Register a driver in the global registry.
///
/// Duplicate registration is logged and skipped so one bad plugin cannot take the
/// process down.
pub fn register(name: &str, driver: Arc<dyn Driver>, version: &str) {
    if let Err(e) = DriverRegistry::global().register(name, driver, version) {
        error!("Driver registration failed: {}", e);
    }
}

/// Snapshot of the global registry
pub fn drivers() -> HashMap<String, DriverStructure> {
    DriverRegistry::global().drivers()
}

pub fn open(name: &str, uri: &str) -> Option<Box<dyn ConnFun>> {
    DriverRegistry::global().open(name, uri)
}

pub fn check_uri(name: &str, uri: &str) -> PluginResult<()> {
    DriverRegistry::global().check_uri(name, uri)
}
