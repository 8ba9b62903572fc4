//! Live settings store backing the [`Preferences`] trait.
//!
//! Components never hold configuration values; they hold a handle to the
//! store and re-read on use. The wake-lock policy in particular is consulted
//! on every acquire, so a settings change takes effect at the next status
//! transition without a restart.

use std::net::SocketAddr;
use std::sync::RwLock;

use super::schema::Config;

/// Default proxy port when none is configured.
pub const DEFAULT_PORT: u16 = 8228;

/// Default upstream for UDP datagram forwarding.
pub const DEFAULT_UDP_UPSTREAM: &str = "8.8.8.8:53";

/// Externally persisted settings consulted at runtime.
pub trait Preferences: Send + Sync {
    /// The port both proxy listeners bind.
    fn proxy_port(&self) -> u16;

    /// Whether the wake lock should be held while the proxy runs.
    fn keep_wake_lock(&self) -> bool;
}

/// Thread-safe settings store over a merged [`Config`].
pub struct Settings {
    config: RwLock<Config>,
}

impl Settings {
    /// Wrap a merged configuration.
    pub fn new(config: Config) -> Self {
        Self {
            config: RwLock::new(config),
        }
    }

    /// Replace the stored configuration (e.g. after a reload).
    pub fn update(&self, config: Config) {
        *self.config.write().expect("settings lock poisoned") = config;
    }

    /// Upstream address for UDP forwarding.
    ///
    /// Falls back to [`DEFAULT_UDP_UPSTREAM`] when unset or unparseable.
    pub fn udp_upstream(&self) -> SocketAddr {
        let configured = self
            .config
            .read()
            .expect("settings lock poisoned")
            .proxy
            .udp_upstream
            .clone();

        configured
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| {
                DEFAULT_UDP_UPSTREAM
                    .parse()
                    .expect("default upstream is a valid socket address")
            })
    }
}

impl Preferences for Settings {
    fn proxy_port(&self) -> u16 {
        self.config
            .read()
            .expect("settings lock poisoned")
            .proxy
            .port
            .unwrap_or(DEFAULT_PORT)
    }

    fn keep_wake_lock(&self) -> bool {
        self.config
            .read()
            .expect("settings lock poisoned")
            .power
            .keep_wake_lock
            .unwrap_or(true)
    }
}
