//! Standard output plugin for testing and debugging
//!
//! Writes one JSON line per row, keyed by a rendered template. Lines are buffered
//! until `batch_size` rows are pending, and a binlog marker is only returned once
//! the buffer reaching it has been flushed.

use crate::core::errors::{PluginError, PluginResult};
use crate::driver::{
    ConnFun, Driver, ParamMap, PluginBinlog, PluginDataType, PluginParam, PluginState,
    SetParamArg, transfer_result,
};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::io::{self, Write};
use tracing::{debug, info, warn};

pub const DEFAULT_TEMPLATE: &str = "{$SchemaName}.{$TableName} {$EventType}";

const STATUS_RUNNING: &str = "running";
const STATUS_CLOSE: &str = "close";

/// Driver handing out [`StdoutConn`] connections
#[derive(Debug, Default)]
pub struct StdoutDriver;

impl StdoutDriver {
    pub fn new() -> Self {
        Self
    }
}

impl Driver for StdoutDriver {
    fn open(&self, uri: &str) -> Box<dyn ConnFun> {
        Box::new(StdoutConn::new(uri))
    }

    fn get_uri_example(&self) -> String {
        "stdout://".to_string()
    }

    fn check_uri(&self, uri: &str) -> PluginResult<()> {
        match uri {
            "stdout" | "stdout://" | "stderr" | "stderr://" => Ok(()),
            _ => Err(PluginError::invalid_uri(uri, "expected stdout:// or stderr://")),
        }
    }
}

/// Settings parsed from the param mapping, handed back to the harness as state
#[derive(Debug, Clone, PartialEq)]
pub struct StdoutParam {
    pub template: String,
    pub batch_size: usize,
}

impl Default for StdoutParam {
    fn default() -> Self {
        Self {
            template: DEFAULT_TEMPLATE.to_string(),
            batch_size: 1,
        }
    }
}

/// Connection writing events to stdout (or any writer)
pub struct StdoutConn {
    uri: String,
    status: String,
    writer: Box<dyn Write + Send + Sync>,
    param: StdoutParam,
    pending: Vec<String>,
    pending_binlog: Option<PluginBinlog>,
    last_flushed: Option<PluginBinlog>,
}

impl StdoutConn {
    /// Create a connection for `uri`, writing to stderr when the uri asks for it
    pub fn new(uri: &str) -> Self {
        let writer: Box<dyn Write + Send + Sync> = if uri.starts_with("stderr") {
            Box::new(io::stderr())
        } else {
            Box::new(io::stdout())
        };
        Self::with_writer(uri, writer)
    }

    pub fn with_writer(uri: &str, writer: Box<dyn Write + Send + Sync>) -> Self {
        Self {
            uri: uri.to_string(),
            status: STATUS_CLOSE.to_string(),
            writer,
            param: StdoutParam::default(),
            pending: Vec::new(),
            pending_binlog: None,
            last_flushed: None,
        }
    }

    fn parse_param(map: &ParamMap) -> PluginResult<StdoutParam> {
        let mut param = StdoutParam::default();
        match map.get("Template") {
            Some(Value::String(template)) if !template.is_empty() => {
                param.template = template.clone();
            }
            Some(Value::String(_)) | None => {}
            Some(other) => {
                return Err(PluginError::invalid_param(format!(
                    "Template must be a string, got {}",
                    other
                )));
            }
        }
        if let Some(value) = map.get("BatchSize") {
            let size = value
                .as_u64()
                .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
                .filter(|size| *size > 0)
                .ok_or_else(|| {
                    PluginError::invalid_param(format!(
                        "BatchSize must be a positive integer, got {}",
                        value
                    ))
                })?;
            param.batch_size = size as usize;
        }
        Ok(param)
    }

    fn buffer_event(&mut self, data: &PluginDataType) -> PluginResult<Option<PluginBinlog>> {
        if data.rows.is_empty() {
            self.pending.push(
                json!({
                    "key": transfer_result(&self.param.template, data, 0),
                    "event_type": data.event_type,
                    "query": data.query,
                    "binlog": data.binlog(),
                })
                .to_string(),
            );
        }
        for (index, row) in data.rows.iter().enumerate() {
            self.pending.push(
                json!({
                    "key": transfer_result(&self.param.template, data, index as isize),
                    "event_type": data.event_type,
                    "row": row,
                    "binlog": data.binlog(),
                })
                .to_string(),
            );
        }
        self.pending_binlog = Some(data.binlog());

        if self.pending.len() >= self.param.batch_size {
            self.flush()
        } else {
            Ok(None)
        }
    }

    fn flush(&mut self) -> PluginResult<Option<PluginBinlog>> {
        if self.pending.is_empty() {
            return Ok(self.last_flushed);
        }
        // lines stay pending until the writer confirms them, a failed flush rewrites them
        for line in &self.pending {
            writeln!(self.writer, "{}", line)?;
        }
        self.writer.flush()?;
        self.pending.clear();
        if let Some(binlog) = self.pending_binlog.take() {
            self.last_flushed = Some(binlog);
        }
        debug!("stdout plugin flushed up to {:?}", self.last_flushed);
        Ok(self.last_flushed)
    }
}

#[async_trait]
impl ConnFun for StdoutConn {
    fn get_conn_status(&self) -> String {
        self.status.clone()
    }

    fn set_conn_status(&mut self, status: &str) {
        self.status = status.to_string();
    }

    async fn connect(&mut self) -> bool {
        info!("stdout plugin connected: {}", self.uri);
        self.status = STATUS_RUNNING.to_string();
        true
    }

    async fn reconnect(&mut self) -> bool {
        self.connect().await
    }

    async fn heart_check(&mut self) {
        if self.status != STATUS_RUNNING {
            self.reconnect().await;
        }
    }

    async fn close(&mut self) -> bool {
        if let Err(e) = self.flush() {
            warn!("stdout plugin failed to flush on close: {}", e);
        }
        self.status = STATUS_CLOSE.to_string();
        true
    }

    async fn insert(&mut self, data: &PluginDataType) -> PluginResult<Option<PluginBinlog>> {
        self.buffer_event(data)
    }

    async fn update(&mut self, data: &PluginDataType) -> PluginResult<Option<PluginBinlog>> {
        self.buffer_event(data)
    }

    async fn del(&mut self, data: &PluginDataType) -> PluginResult<Option<PluginBinlog>> {
        self.buffer_event(data)
    }

    async fn query(&mut self, data: &PluginDataType) -> PluginResult<Option<PluginBinlog>> {
        self.buffer_event(data)
    }

    async fn set_param(&mut self, param: SetParamArg) -> PluginResult<PluginState> {
        self.param = match param {
            SetParamArg::Config(map) => Self::parse_param(&map)?,
            SetParamArg::State(state) => *state
                .downcast::<StdoutParam>()
                .map_err(|_| PluginError::invalid_param("state was not created by the stdout plugin"))?,
        };
        Ok(Box::new(self.param.clone()))
    }

    async fn commit(&mut self) -> PluginResult<Option<PluginBinlog>> {
        self.flush()
    }

    fn get_plugin_param(&self) -> PluginParam {
        PluginParam { batch_commit: true }
    }
}
