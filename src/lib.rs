//! Bifrost plugin SDK
//!
//! Contract between the replication broker and its write-destination plugins:
//! the [`driver::Driver`] / [`driver::ConnFun`] traits, the driver registry, the
//! command template engine and a load-testing harness for plugin connections.

pub mod core;
pub mod driver;
pub mod harness;
pub mod plugins;
pub mod to_server;

pub use crate::core::{HarnessConfig, HarnessError, HarnessResult, PluginError, PluginResult};
pub use crate::driver::{
    API_VERSION, ConnFun, Driver, DriverRegistry, DriverStructure, EventType, ParamMap,
    PluginBinlog, PluginDataType, PluginParam, PluginState, Row, SetParamArg, get_api_version,
    transfer_result,
};
pub use crate::harness::{PluginTester, RunReport};
