//! Command-line interface definitions for lanshare.
//!
//! Uses clap's derive API for type-safe argument parsing.

use clap::Parser;
use std::path::PathBuf;

/// Local network-sharing proxy.
///
/// lanshare opens a TCP and a UDP listener on one port and relays traffic
/// for devices on the shared network. Lifecycle status is logged and a CPU
/// wake lock is held while the proxy is running (configurable).
#[derive(Parser, Debug)]
#[command(name = "lanshare")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Port for both the TCP and UDP listener.
    ///
    /// Overrides the configured port. Must be within 1024..=65000; values
    /// outside the range are rejected at proxy start.
    #[arg(short = 'p', long = "port", value_name = "PORT")]
    pub port: Option<u16>,

    /// Path to additional config file.
    ///
    /// Merged on top of the system and user configs, giving it the highest
    /// priority (except for CLI flags).
    #[arg(short = 'c', long = "config", value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Do not hold a CPU wake lock while the proxy is running.
    #[arg(long = "no-wake-lock")]
    pub no_wake_lock: bool,

    /// Increase log verbosity.
    ///
    /// Can be specified multiple times:
    /// -v    = info level
    /// -vv   = debug level
    /// -vvv  = trace level
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}
