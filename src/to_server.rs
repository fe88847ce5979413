//! Directory of plugin target servers
//!
//! A plugin process publishes where its destination lives under a key, so the
//! broker can find it. The driver registry does not depend on this directory.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::info;

/// Target server entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToServer {
    pub plugin_name: String,
    pub conn_uri: String,
    pub notes: String,
}

/// Storage backing the directory
pub trait ToServerStore: Send + Sync {
    fn set_to_server_info(&self, key: &str, info: ToServer);

    fn get_to_server_info(&self, key: &str) -> Option<ToServer>;
}

/// In-process directory
#[derive(Debug, Default)]
pub struct MemoryToServerStore {
    entries: RwLock<HashMap<String, ToServer>>,
}

impl MemoryToServerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sorted keys of every published entry
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.entries.read().keys().cloned().collect();
        keys.sort();
        keys
    }
}

impl ToServerStore for MemoryToServerStore {
    fn set_to_server_info(&self, key: &str, info: ToServer) {
        self.entries.write().insert(key.to_string(), info);
    }

    fn get_to_server_info(&self, key: &str) -> Option<ToServer> {
        self.entries.read().get(key).cloned()
    }
}

/// Publish `uri` for `plugin_name` under `to_server_key`, replacing any previous entry
pub fn set_to_server(store: &dyn ToServerStore, to_server_key: &str, plugin_name: &str, uri: &str) -> bool {
    store.set_to_server_info(
        to_server_key,
        ToServer {
            plugin_name: plugin_name.to_string(),
            conn_uri: uri.to_string(),
            notes: String::new(),
        },
    );
    info!("Published target server {} for plugin {}", to_server_key, plugin_name);
    true
}
