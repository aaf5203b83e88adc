//! Configuration management for tether.
//!
//! Configuration is read from a TOML file, then selected fields may be
//! overridden through environment variables. Every field has a default, so an
//! empty (or missing) file yields a working configuration.

use serde::{Deserialize, Serialize};
use std::{
    env,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::error::{Error, Result};
use crate::tracing::prelude::*;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV: &str = "TETHER_CONFIG";

const SYSTEM_CONFIG: &str = "/etc/tether/tether.toml";

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Enumerated (hardware) discovery
    pub discovery: DiscoveryConfig,

    /// Polled (network) discovery
    pub poll: PollConfig,

    /// Session handling
    pub session: SessionConfig,
}

/// Hardware discovery configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Interval between serial port rescans used to detect attach/detach
    pub watch_interval_ms: u64,

    /// Baud rate used when opening serial backends
    pub baud_rate: u32,

    /// Select a device as soon as it is attached or found by the probe,
    /// instead of keeping the current selection
    pub follow_new_devices: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            watch_interval_ms: 1000,
            baud_rate: 115_200,
            follow_new_devices: false,
        }
    }
}

impl DiscoveryConfig {
    pub fn watch_interval(&self) -> Duration {
        Duration::from_millis(self.watch_interval_ms)
    }
}

/// Network probe configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PollConfig {
    /// Whether the periodic probe runs at all
    pub enabled: bool,

    /// Address probed on every tick
    pub endpoint: String,

    /// Seconds between probe ticks
    pub interval_secs: u64,

    /// Upper bound on a single probe connect
    pub timeout_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            endpoint: "127.0.0.1:15555".to_string(),
            interval_secs: 5,
            timeout_ms: 1000,
        }
    }
}

impl PollConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Depth of the manager command queue
    pub command_queue: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { command_queue: 32 }
    }
}

impl Config {
    /// Load configuration from the default locations.
    ///
    /// `TETHER_CONFIG` wins if set; otherwise the user file
    /// (`~/.config/tether/tether.toml`) and then the system file
    /// (`/etc/tether/tether.toml`) are tried. With no file present the
    /// defaults are used. Environment overrides apply in every case.
    pub fn load() -> Result<Self> {
        let mut config = match Self::locate() {
            Some(path) => Self::load_from(&path)?,
            None => {
                debug!("No configuration file found, using defaults");
                Self::default()
            }
        };
        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::parse(&text)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Parse configuration from TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    fn locate() -> Option<PathBuf> {
        if let Ok(path) = env::var(CONFIG_ENV) {
            return Some(PathBuf::from(path));
        }

        let user = env::var_os("HOME")
            .map(|home| PathBuf::from(home).join(".config/tether/tether.toml"));
        user.into_iter()
            .chain(std::iter::once(PathBuf::from(SYSTEM_CONFIG)))
            .find(|path| path.is_file())
    }

    fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    // Split out from apply_env() so tests need not touch the process
    // environment.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(endpoint) = lookup("TETHER_POLL_ENDPOINT") {
            self.poll.endpoint = endpoint;
        }

        if let Some(secs) = lookup("TETHER_POLL_INTERVAL_SECS") {
            self.poll.interval_secs = secs.parse().map_err(|_| {
                Error::Config(format!("TETHER_POLL_INTERVAL_SECS is not a number: {secs}"))
            })?;
        }

        if let Some(follow) = lookup("TETHER_FOLLOW_NEW_DEVICES") {
            self.discovery.follow_new_devices = matches!(follow.as_str(), "1" | "true" | "yes");
        }

        Ok(())
    }

    /// Reject values the manager cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.poll.interval_secs == 0 {
            return Err(Error::Config("poll.interval_secs must be non-zero".into()));
        }
        if self.discovery.watch_interval_ms == 0 {
            return Err(Error::Config(
                "discovery.watch_interval_ms must be non-zero".into(),
            ));
        }
        if self.session.command_queue == 0 {
            return Err(Error::Config("session.command_queue must be non-zero".into()));
        }
        Ok(())
    }
}
