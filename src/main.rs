//! Plugin test runner
//!
//! Opens a registered plugin through the driver registry and drives it with the
//! load-testing harness, either with random events or in throughput mode.

use anyhow::{Context, Result, bail};
use bifrost_plugin_sdk::core::HarnessConfig;
use bifrost_plugin_sdk::driver::{self, EventType, ParamMap};
use bifrost_plugin_sdk::harness::PluginTester;
use bifrost_plugin_sdk::plugins;
use clap::Parser;
use serde_json::Value;
use std::env;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

#[derive(Parser, Debug)]
#[command(
    name = "plugin-test",
    about = "Load test a Bifrost write-destination plugin",
    version
)]
struct Args {
    /// Registered plugin name (env: PLUGIN_NAME)
    #[arg(long)]
    plugin: Option<String>,

    /// Connection URI, defaults to the plugin's example URI (env: PLUGIN_URI)
    #[arg(long)]
    uri: Option<String>,

    /// Number of events, 0 runs until a call fails for good (env: TEST_COUNT)
    #[arg(long)]
    count: Option<u64>,

    /// insert, update, delete, query or commit; random when unset (env: TEST_EVENT_TYPE)
    #[arg(long)]
    event_type: Option<EventType>,

    /// Throughput mode: one prebuilt event, no retries (env: TEST_SPEED)
    #[arg(long)]
    speed: bool,

    /// Do not log every successful call (env: TEST_DEBUG=false)
    #[arg(long)]
    quiet: bool,

    /// Plugin parameter as key=value, repeatable
    #[arg(long = "param", value_parser = parse_param)]
    params: Vec<(String, Value)>,

    /// List registered plugins and exit
    #[arg(long)]
    list: bool,
}

fn parse_param(raw: &str) -> Result<(String, Value), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got {}", raw))?;
    // numbers and booleans keep their JSON type, anything else is a string
    let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
    Ok((key.to_string(), value))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false) {
        fmt().json().with_env_filter(filter).with_target(false).init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_thread_names(false)
            .init();
    }
}

fn merge_config(args: &Args) -> Result<HarnessConfig> {
    apply_args(HarnessConfig::read_env()?, args)
}

/// Flags override the environment; the merged result is validated once
fn apply_args(mut config: HarnessConfig, args: &Args) -> Result<HarnessConfig> {
    if let Some(plugin) = &args.plugin {
        config.plugin_name = plugin.clone();
    }
    if let Some(uri) = &args.uri {
        config.plugin_uri = Some(uri.clone());
    }
    if let Some(count) = args.count {
        config.count = count;
    }
    if args.event_type.is_some() {
        config.event_type = args.event_type;
    }
    if args.speed {
        config.speed = true;
    }
    if args.quiet {
        config.debug = false;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();

    plugins::register_builtin();
    info!("Plugin SDK API version: {}", driver::get_api_version());

    if args.list {
        let mut registered: Vec<_> = driver::drivers().into_iter().collect();
        registered.sort_by(|a, b| a.0.cmp(&b.0));
        for (name, entry) in registered {
            println!("{}\t{}\t{}", name, entry.version, entry.example_conn_uri);
        }
        return Ok(());
    }

    let config = merge_config(&args)?;
    info!("Test configuration: {:?}", config);

    match run(&config, args.params.into_iter().collect()).await {
        Ok(()) => {
            info!("Plugin test completed successfully");
            Ok(())
        }
        Err(e) => {
            error!("Plugin test failed: {:#}", e);
            Err(e)
        }
    }
}

async fn run(config: &HarnessConfig, params: ParamMap) -> Result<()> {
    let registered = driver::drivers();
    let Some(entry) = registered.get(&config.plugin_name) else {
        bail!(
            "plugin {} is not registered, available: {:?}",
            config.plugin_name,
            driver::DriverRegistry::global().driver_names()
        );
    };

    let uri = config
        .plugin_uri
        .clone()
        .unwrap_or_else(|| entry.example_conn_uri.clone());
    driver::check_uri(&config.plugin_name, &uri)
        .with_context(|| format!("uri rejected by {}", config.plugin_name))?;

    let mut tester = PluginTester::new(&config.plugin_name, &uri)?;
    tester.set_debug(config.debug);
    if let Some(event_type) = config.event_type {
        tester.set_event_type(event_type);
    }
    tester.set_param(params).await?;

    let report = if config.speed {
        tester.do_test_start_for_speed(config.count).await?
    } else {
        tester.do_test_start(config.count).await?
    };

    info!(
        "{} iterations, {} operations, {} retries, {:.2} ops/s, last binlog: {:?}",
        report.iterations,
        report.operations,
        report.retries,
        report.ops_per_second(),
        report.last_binlog
    );
    tester.close().await;
    Ok(())
}
