//! Configuration system for lanshare.
//!
//! TOML configuration with hierarchy merging:
//!
//! 1. Embedded defaults (compiled into the binary)
//! 2. System config: `/etc/lanshare/config.toml`
//! 3. User config: `~/.config/lanshare/config.toml`
//! 4. Additional config file (via `--config` flag)
//! 5. CLI flags (highest priority, applied in `main`)
//!
//! Runtime components read settings through the [`Preferences`] trait so
//! values like the wake-lock policy are re-read on every use.

mod error;
mod loader;
mod schema;
mod settings;

pub use error::ConfigError;
pub use loader::ConfigLoader;
pub use schema::{Config, GeneralConfig, PowerConfig, ProxyConfig};
pub use settings::{Preferences, Settings, DEFAULT_PORT, DEFAULT_UDP_UPSTREAM};
