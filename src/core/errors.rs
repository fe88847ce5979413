//! Error types for the plugin SDK
//! Provides structured error handling using thiserror for plugins, the registry and the test harness

use thiserror::Error;

/// Errors raised by drivers, connections and the driver registry
#[derive(Error, Debug)]
pub enum PluginError {
    /// No driver registered under the requested name
    #[error("driver not found: {name}")]
    DriverNotFound { name: String },

    /// A driver was already registered under this name
    #[error("register called twice for driver: {name}")]
    DuplicateDriver { name: String },

    /// Connection URI rejected by a driver
    #[error("invalid connection uri {uri}: {message}")]
    InvalidUri { uri: String, message: String },

    /// Destination connection errors
    #[error("connection error: {message}")]
    Connection { message: String },

    /// Failure while applying an event to the destination
    #[error("operation error: {message}")]
    Operation { message: String },

    /// Plugin rejected the parameters handed to `set_param`
    #[error("invalid plugin param: {message}")]
    InvalidParam { message: String },

    #[error("serialization error")]
    Serialization(#[from] serde_json::Error),

    #[error("io error")]
    Io(#[from] std::io::Error),

    /// Generic error for plugin implementations
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for plugin operations
pub type PluginResult<T> = std::result::Result<T, PluginError>;

impl PluginError {
    pub fn not_found<S: Into<String>>(name: S) -> Self {
        Self::DriverNotFound { name: name.into() }
    }

    pub fn invalid_uri<U: Into<String>, M: Into<String>>(uri: U, message: M) -> Self {
        Self::InvalidUri {
            uri: uri.into(),
            message: message.into(),
        }
    }

    /// Create a connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    /// Create an operation error
    pub fn operation<S: Into<String>>(message: S) -> Self {
        Self::Operation {
            message: message.into(),
        }
    }

    pub fn invalid_param<S: Into<String>>(message: S) -> Self {
        Self::InvalidParam {
            message: message.into(),
        }
    }
}

/// Errors that terminate a test harness run
#[derive(Error, Debug)]
pub enum HarnessError {
    /// `do_test_start*` called before `set_param`
    #[error("plugin param not set, call set_param first")]
    ParamNotSet,

    #[error("configuration error: {message}")]
    Configuration { message: String },

    #[error("driver not found: {name}")]
    DriverNotFound { name: String },

    /// The plugin refused a param refresh
    #[error("set_param failed")]
    SetParam {
        #[source]
        source: PluginError,
    },

    /// One event failed on every allowed attempt
    #[error("{op} failed after {attempts} attempts, data: {data}")]
    RetriesExhausted {
        op: String,
        attempts: u32,
        data: String,
        #[source]
        source: PluginError,
    },

    /// A single failure in speed mode
    #[error("{op} failed: {source}, data: {data}")]
    Operation {
        op: String,
        data: String,
        #[source]
        source: PluginError,
    },
}

pub type HarnessResult<T> = std::result::Result<T, HarnessError>;

impl HarnessError {
    /// Create a configuration error
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Underlying plugin error, when the run failed inside the plugin
    pub fn plugin_error(&self) -> Option<&PluginError> {
        match self {
            Self::SetParam { source }
            | Self::RetriesExhausted { source, .. }
            | Self::Operation { source, .. } => Some(source),
            _ => None,
        }
    }
}
