//! Configuration loading with hierarchy merging.
//!
//! Configuration is loaded from multiple sources and merged in order:
//!
//! 1. Embedded defaults (compiled into the binary)
//! 2. System config: `/etc/lanshare/config.toml`
//! 3. User config: `~/.config/lanshare/config.toml`
//! 4. Additional config file (via `--config` flag)
//!
//! Missing system/user files are skipped; a missing `--config` file and
//! invalid TOML are errors (fail fast with a clear message).

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use super::error::ConfigError;
use super::schema::Config;

/// System-wide configuration path.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/lanshare/config.toml";

/// User configuration directory name.
pub const USER_CONFIG_DIR: &str = "lanshare";

/// User configuration filename.
pub const USER_CONFIG_FILE: &str = "config.toml";

/// Configuration loader with support for hierarchy merging.
pub struct ConfigLoader {
    /// Path to system-wide configuration.
    system_path: PathBuf,
    /// Path to user configuration.
    user_path: PathBuf,
}

impl ConfigLoader {
    /// Create a new ConfigLoader with default paths.
    #[must_use]
    pub fn new() -> Self {
        let user_config_dir = dirs::config_dir()
            .map(|p| p.join(USER_CONFIG_DIR))
            .unwrap_or_else(|| PathBuf::from(".config").join(USER_CONFIG_DIR));

        Self {
            system_path: PathBuf::from(SYSTEM_CONFIG_PATH),
            user_path: user_config_dir.join(USER_CONFIG_FILE),
        }
    }

    /// Create a ConfigLoader with custom paths (for testing).
    #[must_use]
    pub fn with_paths(system_path: PathBuf, user_path: PathBuf) -> Self {
        Self {
            system_path,
            user_path,
        }
    }

    /// Load and merge configuration from all sources.
    pub fn load(&self, extra: Option<&Path>) -> Result<Config, ConfigError> {
        let mut config = Config::default();
        debug!("Loaded embedded default configuration");

        if let Some(system_config) = self.load_file(&self.system_path)? {
            config.merge(system_config);
            debug!("Loaded system config from {:?}", self.system_path);
        } else {
            debug!("No system config found at {:?}", self.system_path);
        }

        if let Some(user_config) = self.load_file(&self.user_path)? {
            config.merge(user_config);
            debug!("Loaded user config from {:?}", self.user_path);
        } else {
            debug!("No user config found at {:?}", self.user_path);
        }

        if let Some(extra_path) = extra {
            match self.load_file(extra_path)? {
                Some(extra_config) => {
                    config.merge(extra_config);
                    debug!("Loaded additional config from {:?}", extra_path);
                }
                None => {
                    // Unlike system/user config, a missing explicitly
                    // requested config is an error.
                    return Err(ConfigError::ReadError {
                        path: extra_path.to_path_buf(),
                        source: std::io::Error::new(
                            std::io::ErrorKind::NotFound,
                            "Specified config file not found",
                        ),
                    });
                }
            }
        }

        Ok(config)
    }

    /// Load one TOML file. Returns `Ok(None)` if the file does not exist.
    fn load_file(&self, path: &Path) -> Result<Option<Config>, ConfigError> {
        let contents = match fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::ReadError {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };

        let config = toml::from_str(&contents).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Some(config))
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}
