//! Head unit
//!
//! Waits for a phone on USB, switches it to accessory mode and runs a
//! protocol session on it. `--connect` starts a session over the network
//! instead.

use anyhow::{Context as _, Result};
use clap::Parser;
use common::{LogTarget, StopSignal, setup_logging};
use headunit::app::{App, events};
use headunit::config::{self, ConfigSource, HeadUnitConfig};
use headunit::entity::RelayEntityFactory;
use headunit::error::InitializationError;
use headunit::executor::IoExecutorPool;
use headunit::transport::tcp;
use headunit::usb::{DeviceFilter, HubCore, NegotiationContext, QueryChain, UsbEventPump, UsbHub};
use rusb::Context;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// How long blocking tasks get to finish when the executor pool stops
const POOL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Parser, Debug)]
#[command(name = "headunit")]
#[command(
    author,
    version,
    about = "Head unit - Run accessory sessions with phones over USB or the network"
)]
#[command(long_about = "
Discovers phones on USB, switches them to accessory mode and hands the
resulting transport to a protocol session. When the session ends or the
phone is unplugged, the head unit goes back to waiting for a device.

EXAMPLES:
    # Wait for a phone on USB
    headunit

    # Also connect to a phone on the network
    headunit --connect 192.168.1.20

    # List USB devices and how they would be treated
    headunit --list-devices

    # Relay sessions to a local protocol stack
    headunit --config ~/headunit.toml

CONFIGURATION:
    The head unit looks for configuration files in the following order:
    1. Path specified with --config
    2. ~/.config/headunit/headunit.toml
    3. /etc/headunit/headunit.toml
    4. Built-in defaults
")]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "PATH")]
    config: Option<String>,

    /// Save default configuration to default location and exit
    #[arg(long)]
    save_config: bool,

    /// List USB devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Connect to a phone at HOST[:PORT] once started
    #[arg(long, value_name = "HOST[:PORT]")]
    connect: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, value_name = "LEVEL")]
    log_level: Option<String>,

    /// Write logs to this file instead of stderr
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,
}

fn main() -> ExitCode {
    let args = Args::parse();

    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            if tracing::dispatcher::has_been_set() {
                error!("{:#}", e);
            } else {
                eprintln!("Error: {:#}", e);
            }
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    // Handle --save-config flag early (before loading config)
    if args.save_config {
        let config = HeadUnitConfig::default();
        let path = HeadUnitConfig::default_path();
        config.save(&path).context("Failed to save configuration")?;
        println!("Configuration saved to: {}", path.display());
        return Ok(());
    }

    let (config, source) = match args.config.as_deref() {
        Some(path) => (
            config::load_config(path).context("Failed to load configuration")?,
            ConfigSource::File(config::expand_path(path)),
        ),
        None => HeadUnitConfig::load_or_default(),
    };

    // Use CLI log level if specified, otherwise use config value
    let log_level = args
        .log_level
        .as_deref()
        .unwrap_or(&config.general.log_level);
    let log_target = args
        .log_file
        .clone()
        .map(LogTarget::File)
        .unwrap_or_default();
    setup_logging(log_level, &log_target).context("Failed to setup logging")?;

    info!("Head unit v{}", env!("CARGO_PKG_VERSION"));
    match &source {
        ConfigSource::File(_) => info!("Using {}", source),
        ConfigSource::Defaults(_) => warn!("Using {}", source),
    }
    info!("Log level: {}", log_level);

    let context = Context::new().map_err(InitializationError::UsbContext)?;
    let filter = DeviceFilter::new(config.usb.accessory_ids(), config.usb.filters.clone());

    if args.list_devices {
        return list_devices_mode(&context, &filter);
    }

    run_head_unit(&args, &config, context, filter)
}

/// List USB devices and exit
fn list_devices_mode(context: &Context, filter: &DeviceFilter) -> Result<()> {
    info!("Listing USB devices...");

    let devices = headunit::usb::list_devices(context, filter)
        .context("Failed to enumerate USB devices")?;

    if devices.is_empty() {
        println!("No USB devices found.");
        return Ok(());
    }

    println!("Found {} USB device(s):\n", devices.len());
    for device in devices {
        println!(
            "  [{}] {} - {} {}",
            device.id,
            device.ids,
            device
                .manufacturer
                .as_deref()
                .unwrap_or("Unknown Manufacturer"),
            device.product.as_deref().unwrap_or("Unknown Product")
        );
        println!(
            "      Bus {:03} Device {:03} Class: {:#04x} ({})",
            device.id.bus,
            device.id.address,
            device.class_code,
            device.candidacy.label()
        );
        println!();
    }

    Ok(())
}

/// Bring up the pools, the hub and the orchestrator, run until signalled,
/// then stop everything in reverse order
fn run_head_unit(
    args: &Args,
    config: &HeadUnitConfig,
    context: Context,
    filter: DeviceFilter,
) -> Result<()> {
    let pool = IoExecutorPool::new(config.workers.io_workers).map_err(|source| {
        InitializationError::WorkerPool {
            pool: "I/O executor",
            source,
        }
    })?;
    let executor = pool.handle().clone();

    let stop = StopSignal::new();
    let pump = UsbEventPump::start(
        context.clone(),
        config.workers.usb_event_workers,
        config.workers.usb_event_timeout(),
        stop.clone(),
    )
    .map_err(|source| InitializationError::WorkerPool {
        pool: "USB event",
        source,
    })?;

    let (events, inbox) = events::channel();
    let chain = Arc::new(QueryChain::new(NegotiationContext {
        executor: executor.clone(),
        accessory_ids: config.usb.accessory_ids(),
        identity: config.accessory.clone(),
        control_timeout: config.usb.control_timeout(),
        bulk_timeout: config.usb.bulk_timeout(),
    }));
    let core = HubCore::new(chain, executor.clone(), events.clone());
    let hub = match UsbHub::new(context.clone(), core, filter) {
        Ok(hub) => Arc::new(hub),
        Err(e) => {
            pump.shutdown();
            return Err(e.into());
        }
    };

    let factory = Arc::new(RelayEntityFactory::new(
        executor.clone(),
        config.entity.relay_addr.clone(),
        config.network.connect_timeout(),
    ));
    let app = App::new(factory, hub.clone()).spawn(&executor, events, inbox);
    app.wait_for_device()
        .context("Failed to start watching for devices")?;

    executor.block_on(async {
        if let Some(addr) = &args.connect {
            match tcp::connect(
                addr,
                config.network.default_port,
                config.network.connect_timeout(),
            )
            .await
            {
                Ok(transport) => {
                    if let Err(e) = app.start(transport) {
                        error!("Failed to hand over network transport: {}", e);
                    }
                }
                Err(e) => warn!("{}", e),
            }
        }

        info!("Press Ctrl+C to shutdown");
        shutdown_signal().await;

        app.stop().await;
    });

    info!("Shutting down USB subsystem...");
    drop(hub);
    pump.shutdown();
    let stats = pool.shutdown(POOL_SHUTDOWN_TIMEOUT);
    if stats.alive() > 0 {
        warn!("{} executor threads still running", stats.alive());
    }
    drop(context);

    info!("Head unit shutdown complete");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                tokio::select! {
                    result = tokio::signal::ctrl_c() => {
                        if let Err(e) = result {
                            error!("Error waiting for Ctrl+C: {}", e);
                        }
                        info!("Received Ctrl+C, shutting down gracefully...");
                    }
                    _ = terminate.recv() => {
                        info!("Received SIGTERM, shutting down gracefully...");
                    }
                }
                return;
            }
            Err(e) => warn!("Cannot listen for SIGTERM: {}", e),
        }
    }

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, shutting down gracefully..."),
        Err(e) => error!("Error waiting for Ctrl+C: {}", e),
    }
}
