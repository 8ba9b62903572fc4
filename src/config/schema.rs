//! Configuration schema definitions.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults (compiled into the binary)
//! 2. System config: `/etc/lanshare/config.toml`
//! 3. User config: `~/.config/lanshare/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority)
//!
//! All files are optional; the embedded defaults alone are a working setup.

use serde::{Deserialize, Serialize};

/// Top-level configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Proxy listener settings.
    #[serde(default)]
    pub proxy: ProxyConfig,

    /// Power management settings.
    #[serde(default)]
    pub power: PowerConfig,
}

impl Config {
    /// Merge another config into this one.
    ///
    /// Scalars are overridden when the other config sets them.
    pub fn merge(&mut self, other: Config) {
        self.general.merge(other.general);
        self.proxy.merge(other.proxy);
        self.power.merge(other.power);
    }
}

/// General application settings.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error
    #[serde(default)]
    pub log_level: String,
}

impl GeneralConfig {
    fn merge(&mut self, other: GeneralConfig) {
        if !other.log_level.is_empty() {
            self.log_level = other.log_level;
        }
    }
}

/// Proxy listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct ProxyConfig {
    /// Port for both the TCP and UDP listener.
    ///
    /// Must be within 1024..=65000; values outside the range are rejected at
    /// proxy start, not at load time, so a bad edit surfaces as an observable
    /// error status rather than a crash.
    #[serde(default)]
    pub port: Option<u16>,

    /// Upstream address for UDP datagram forwarding (host:port).
    ///
    /// Plain UDP datagrams carry no destination, so the UDP listener relays
    /// them to this address (default: a public DNS resolver).
    #[serde(default)]
    pub udp_upstream: Option<String>,
}

impl ProxyConfig {
    fn merge(&mut self, other: ProxyConfig) {
        if other.port.is_some() {
            self.port = other.port;
        }
        if other.udp_upstream.is_some() {
            self.udp_upstream = other.udp_upstream;
        }
    }
}

/// Power management configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct PowerConfig {
    /// Whether to hold a CPU wake lock while the proxy is running.
    ///
    /// Defaults to true. The hold is best-effort; the proxy keeps forwarding
    /// traffic even if the wake lock cannot be taken.
    #[serde(default)]
    pub keep_wake_lock: Option<bool>,
}

impl PowerConfig {
    fn merge(&mut self, other: PowerConfig) {
        if other.keep_wake_lock.is_some() {
            self.keep_wake_lock = other.keep_wake_lock;
        }
    }
}
