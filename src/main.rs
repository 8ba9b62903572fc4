//! lanshare binary entry point.
//!
//! Parses the CLI, loads configuration, builds the process-scoped singletons
//! (status broadcasters, event buses, wake-lock guard, supervisor,
//! orchestrator), and runs until ctrl-c or a shutdown event arrives.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::Notify;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use lanshare::cli::Cli;
use lanshare::config::{ConfigLoader, Preferences, Settings};
use lanshare::event::{ConnectionEvent, ErrorEvent, EventBus, ShutdownEvent};
use lanshare::lock::{LockFileWakeLock, Locker};
use lanshare::network::StaticNetwork;
use lanshare::proxy::{SharedProxy, SocketLoopFactory};
use lanshare::service::ForegroundHandler;
use lanshare::status::StatusBroadcaster;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load configuration with hierarchy merging, then apply CLI flags
    // (highest priority). Configuration comes first so its log_level can
    // seed the tracing filter.
    let mut config = ConfigLoader::new()
        .load(cli.config.as_deref())
        .context("Failed to load configuration")?;
    if cli.port.is_some() {
        config.proxy.port = cli.port;
    }
    if cli.no_wake_lock {
        config.power.keep_wake_lock = Some(false);
    }

    init_tracing(cli.verbose, &config.general.log_level)?;

    debug!("Parsed CLI arguments: {:?}", cli);
    debug!("Loaded configuration: {:?}", config);

    // Process-scoped singletons, constructed once and injected everywhere.
    let settings = Arc::new(Settings::new(config));
    let proxy_status = StatusBroadcaster::new();
    let error_bus: EventBus<ErrorEvent> = EventBus::new();
    let connection_bus: EventBus<ConnectionEvent> = EventBus::new();
    let shutdown_bus: EventBus<ShutdownEvent> = EventBus::new();

    let locker = {
        let prefs = settings.clone();
        Locker::new(
            Arc::new(LockFileWakeLock::new(LockFileWakeLock::DEFAULT_PATH)),
            Arc::new(move || prefs.keep_wake_lock()),
        )
    };

    let factory = Arc::new(SocketLoopFactory::new(
        proxy_status.clone(),
        error_bus.clone(),
        connection_bus.clone(),
        settings.udp_upstream(),
    ));
    let proxy = SharedProxy::new(
        proxy_status.clone(),
        error_bus.clone(),
        connection_bus.clone(),
        settings.clone(),
        factory,
    );

    let network = Arc::new(StaticNetwork::new());
    let handler = ForegroundHandler::new(
        shutdown_bus.clone(),
        locker,
        network,
        proxy_status.clone(),
    );

    // Surface connection/error events in the log for the host shell.
    spawn_event_loggers(&error_bus, &connection_bus);

    // The shutdown callback and ctrl-c both land on the same notify.
    let stop = Arc::new(Notify::new());
    let stop_for_shutdown = stop.clone();
    handler
        .start_proxy(Arc::new(move || stop_for_shutdown.notify_one()))
        .await;
    proxy.start();

    info!("lanshare started, press ctrl-c to stop");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Interrupt received, shutting down");
        }
        _ = stop.notified() => {
            info!("Shutdown requested, shutting down");
        }
    }

    handler.stop_proxy().await;
    proxy.stop();
    proxy.wait_idle().await;

    info!("lanshare stopped");
    Ok(())
}

/// Log transient bus events so status is observable without a UI.
fn spawn_event_loggers(error_bus: &EventBus<ErrorEvent>, connection_bus: &EventBus<ConnectionEvent>) {
    let mut errors = error_bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = errors.recv().await {
            match event {
                ErrorEvent::Clear => debug!("Error state cleared"),
                ErrorEvent::Transport { kind, message } => {
                    warn!("{kind} transport error: {message}");
                }
            }
        }
    });

    let mut connections = connection_bus.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = connections.recv().await {
            match event {
                ConnectionEvent::Clear => debug!("Connection state cleared"),
                ConnectionEvent::Opened { kind, peer } => info!("{kind} peer connected: {peer}"),
                ConnectionEvent::Closed { kind, peer } => info!("{kind} peer closed: {peer}"),
            }
        }
    });
}

/// Initialize the tracing subscriber.
///
/// # Verbosity Levels
/// - 0 (default): configured log_level, else `RUST_LOG`, else warnings only
/// - 1 (-v): Info level
/// - 2 (-vv): Debug level
/// - 3+ (-vvv): Trace level
fn init_tracing(verbose: u8, config_level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*};

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(log_filter(verbose, config_level)?)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(())
}

/// Pick the log filter. `-v` flags win over the configured level.
fn log_filter(verbose: u8, config_level: &str) -> Result<EnvFilter> {
    let filter = match verbose {
        0 if !config_level.is_empty() => EnvFilter::try_new(config_level)
            .with_context(|| format!("Invalid log_level in configuration: {config_level}"))?,
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    Ok(filter)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbose_flag_overrides_config_level() {
        let filter = log_filter(2, "error").unwrap();
        assert_eq!(filter.to_string(), "debug");
    }

    #[test]
    fn test_config_level_applies_when_quiet() {
        let filter = log_filter(0, "info").unwrap();
        assert_eq!(filter.to_string(), "info");
    }

    #[test]
    fn test_invalid_config_level_is_rejected() {
        assert!(log_filter(0, "foo=bar=baz").is_err());
    }
}
