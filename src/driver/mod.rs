//! Plugin capability contract
//!
//! Every write-destination plugin implements [`Driver`] to hand out connections and
//! [`ConnFun`] for the connection itself. The broker feeds [`PluginDataType`] events
//! into a connection and persists the [`PluginBinlog`] markers it gets back.

use crate::core::errors::PluginResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;

pub mod registry;
pub mod template;

pub use registry::{DriverRegistry, DriverStructure, check_uri, drivers, open, register};
pub use template::transfer_result;

/// SDK API version plugins are built against
pub const API_VERSION: &str = "v1.2.0";

pub fn get_api_version() -> &'static str {
    API_VERSION
}

/// One row of an event, column name to value
pub type Row = HashMap<String, serde_json::Value>;

/// Key/value parameters a caller hands to a plugin on the first `set_param`
pub type ParamMap = HashMap<String, serde_json::Value>;

/// Plugin-owned state returned by `set_param`, passed back unchanged on the next call
pub type PluginState = Box<dyn Any + Send>;

/// Argument to [`ConnFun::set_param`]
pub enum SetParamArg {
    /// Original parameter mapping from the caller
    Config(ParamMap),
    /// Value the plugin returned from its previous `set_param`
    State(PluginState),
}

impl fmt::Debug for SetParamArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SetParamArg::Config(map) => f.debug_tuple("Config").field(map).finish(),
            SetParamArg::State(_) => f.write_str("State(..)"),
        }
    }
}

/// Kind of replication event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Insert,
    Update,
    Delete,
    Query,
    Commit,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Insert => "insert",
            EventType::Update => "update",
            EventType::Delete => "delete",
            EventType::Query => "query",
            EventType::Commit => "commit",
        }
    }

    /// Maps the 0..=4 draw used by the randomized harness; anything past 3 is commit
    pub fn from_index(index: u32) -> Self {
        match index {
            0 => EventType::Insert,
            1 => EventType::Update,
            2 => EventType::Delete,
            3 => EventType::Query,
            _ => EventType::Commit,
        }
    }

    /// Whether the event carries row data
    pub fn is_row_event(&self) -> bool {
        matches!(self, EventType::Insert | EventType::Update | EventType::Delete)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "insert" => Ok(EventType::Insert),
            "update" => Ok(EventType::Update),
            "delete" | "del" => Ok(EventType::Delete),
            "query" | "sql" => Ok(EventType::Query),
            "commit" => Ok(EventType::Commit),
            other => Err(format!("unknown event type: {}", other)),
        }
    }
}

/// One replication event handed to a plugin
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PluginDataType {
    /// Event time in seconds
    pub timestamp: u32,
    /// insert, update, delete, query or commit
    pub event_type: String,
    /// Row images; empty only for query and commit events.
    /// Updates carry the old image followed by the new one.
    pub rows: Vec<Row>,
    /// Raw statement text for query events
    pub query: String,
    pub schema_name: String,
    pub table_name: String,
    pub binlog_file_num: i32,
    pub binlog_position: u32,
}

impl PluginDataType {
    /// Progress marker of this event
    pub fn binlog(&self) -> PluginBinlog {
        PluginBinlog::new(self.binlog_file_num, self.binlog_position)
    }
}

impl fmt::Display for PluginDataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "{:?}", self),
        }
    }
}

/// Durable progress marker, safe point to resume replication from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PluginBinlog {
    pub binlog_file_num: i32,
    pub binlog_position: u32,
}

impl PluginBinlog {
    pub fn new(binlog_file_num: i32, binlog_position: u32) -> Self {
        Self {
            binlog_file_num,
            binlog_position,
        }
    }
}

impl fmt::Display for PluginBinlog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.binlog_file_num, self.binlog_position)
    }
}

/// Capabilities a plugin declares to the broker.
/// The broker decides whether to honor them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginParam {
    /// Deliver all rows of one source event in a single `rows` batch
    pub batch_commit: bool,
}

/// Channel a plugin can use to report progress committed outside the call that
/// received the data, e.g. after an asynchronous flush
#[derive(Debug, Clone)]
pub struct ToPluginParam {
    pub from_plugin_binlog: mpsc::UnboundedSender<PluginBinlog>,
}

impl ToPluginParam {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PluginBinlog>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                from_plugin_binlog: tx,
            },
            rx,
        )
    }
}

/// Factory for plugin connections, registered once per process
pub trait Driver: Send + Sync {
    /// Create a connection for `uri`. Connecting is left to [`ConnFun::connect`].
    fn open(&self, uri: &str) -> Box<dyn ConnFun>;

    /// Example connection URI shown to users
    fn get_uri_example(&self) -> String;

    /// Validate `uri` without keeping a connection
    fn check_uri(&self, uri: &str) -> PluginResult<()>;
}

/// A connection to one destination.
///
/// Mutating operations return the binlog marker that is now safe to resume from, or
/// `None` when the data is only buffered and nothing new has been made durable.
#[async_trait]
pub trait ConnFun: Send + Sync {
    fn get_conn_status(&self) -> String;

    fn set_conn_status(&mut self, status: &str);

    async fn connect(&mut self) -> bool;

    async fn reconnect(&mut self) -> bool;

    /// Keep-alive check, reconnecting if needed
    async fn heart_check(&mut self);

    async fn close(&mut self) -> bool;

    async fn insert(&mut self, data: &PluginDataType) -> PluginResult<Option<PluginBinlog>>;

    async fn update(&mut self, data: &PluginDataType) -> PluginResult<Option<PluginBinlog>>;

    async fn del(&mut self, data: &PluginDataType) -> PluginResult<Option<PluginBinlog>>;

    async fn query(&mut self, data: &PluginDataType) -> PluginResult<Option<PluginBinlog>>;

    /// Apply parameters, returning the opaque state for the next call
    async fn set_param(&mut self, param: SetParamArg) -> PluginResult<PluginState>;

    /// Flush buffered data
    async fn commit(&mut self) -> PluginResult<Option<PluginBinlog>>;

    fn get_plugin_param(&self) -> PluginParam;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_version() {
        assert_eq!(get_api_version(), "v1.2.0");
    }

    #[test]
    fn test_event_type_from_index() {
        assert_eq!(EventType::from_index(0), EventType::Insert);
        assert_eq!(EventType::from_index(3), EventType::Query);
        assert_eq!(EventType::from_index(4), EventType::Commit);
        assert_eq!(EventType::from_index(9), EventType::Commit);
    }

    #[test]
    fn test_event_type_parse() {
        assert_eq!("INSERT".parse::<EventType>().unwrap(), EventType::Insert);
        assert_eq!("sql".parse::<EventType>().unwrap(), EventType::Query);
        assert!("truncate".parse::<EventType>().is_err());
    }

    #[test]
    fn test_binlog_ordering() {
        let a = PluginBinlog::new(1, 500);
        let b = PluginBinlog::new(1, 900);
        let c = PluginBinlog::new(2, 4);
        assert!(a < b);
        assert!(b < c);
        assert_eq!(c.to_string(), "2:4");
    }

    #[test]
    fn test_data_display_is_json() {
        let data = PluginDataType {
            event_type: "insert".to_string(),
            table_name: "t1".to_string(),
            binlog_file_num: 3,
            binlog_position: 120,
            ..Default::default()
        };
        let text = data.to_string();
        assert!(text.contains("\"table_name\":\"t1\""));
        assert_eq!(data.binlog(), PluginBinlog::new(3, 120));
    }

    #[tokio::test]
    async fn test_to_plugin_param_channel() {
        let (param, mut rx) = ToPluginParam::channel();
        param
            .from_plugin_binlog
            .send(PluginBinlog::new(1, 10))
            .unwrap();
        assert_eq!(rx.recv().await, Some(PluginBinlog::new(1, 10)));
    }
}
