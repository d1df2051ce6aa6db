//! Configuration module for exsync
//!
//! This module describes a link, its channels, the cyclic driver and the log
//! distributor in one [`SyncConfig`] file.
//!
//! # Config Location
//!
//! The default config file lives in the platform-appropriate config directory:
//! - **Linux**: `~/.config/dev.hxyulin.exsync/exsync.toml`
//! - **macOS**: `~/Library/Application Support/dev.hxyulin.exsync/exsync.toml`
//! - **Windows**: `%APPDATA%\dev.hxyulin.exsync\exsync.toml`
//!
//! # Formats
//!
//! Files ending in `.json` are read and written as JSON, everything else as
//! TOML.
//!
//! # Example
//!
//! ```toml
//! [link]
//! instance_name = "BufferFub_0"
//!
//! [[link.channels]]
//! name = "bufferedSample"
//! direction = "subscribe"
//! byte_size = 4
//! buffered = true
//!
//! [[link.channels]]
//! name = "setup"
//! direction = "publish"
//! byte_size = 8
//!
//! [driver]
//! cycle_time_ms = 10
//!
//! [log]
//! module_name = "gBufferFub_0"
//! ```

use crate::channel::ChannelSpec;
use crate::error::{Result, SyncError};
use crate::log::{validate_module_name, LogFilterConfig};
use crate::ring::DEFAULT_RING_CAPACITY;
use crate::types::Direction;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application identifier for config directories
pub const APP_ID: &str = "dev.hxyulin.exsync";

/// Default config filename
pub const CONFIG_FILE: &str = "exsync.toml";

/// Default cycle time of the driver in milliseconds
pub const DEFAULT_CYCLE_TIME_MS: u64 = 10;

// ==================== Config Directory ====================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID))
}

/// Get the path of the default config file
pub fn default_config_path() -> Option<PathBuf> {
    config_dir().map(|p| p.join(CONFIG_FILE))
}

/// Ensure the config directory exists
pub fn ensure_config_dir() -> Result<PathBuf> {
    let dir = config_dir()
        .ok_or_else(|| SyncError::Config("Could not determine config directory".to_string()))?;

    if !dir.exists() {
        std::fs::create_dir_all(&dir).map_err(|e| {
            SyncError::Config(format!("Failed to create config directory: {}", e))
        })?;
    }

    Ok(dir)
}

/// On-disk format of a config file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Toml,
    Json,
}

impl ConfigFormat {
    /// Pick the format from a file extension
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => ConfigFormat::Json,
            _ => ConfigFormat::Toml,
        }
    }
}

// ==================== Channel Config ====================

fn default_buffer_capacity() -> usize {
    DEFAULT_RING_CAPACITY
}

/// One channel of a link
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelConfig {
    pub name: String,
    #[serde(default)]
    pub direction: Direction,
    pub byte_size: usize,
    /// Queue received values instead of keeping only the latest
    #[serde(default)]
    pub buffered: bool,
    /// Ring slots when buffered (one slot stays unused)
    #[serde(default = "default_buffer_capacity")]
    pub buffer_capacity: usize,
}

impl ChannelConfig {
    pub fn new(name: impl Into<String>, direction: Direction, byte_size: usize) -> Self {
        Self {
            name: name.into(),
            direction,
            byte_size,
            buffered: false,
            buffer_capacity: DEFAULT_RING_CAPACITY,
        }
    }

    /// Convert to a channel declaration for [`crate::link::Link::add_channel`]
    pub fn to_spec(&self) -> ChannelSpec {
        let spec = ChannelSpec::new(self.name.clone(), self.direction, self.byte_size);
        if self.buffered {
            spec.buffered(self.buffer_capacity)
        } else {
            spec
        }
    }
}

// ==================== Link Config ====================

/// A link and its channels, in registration order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub instance_name: String,
    pub alias: Option<String>,
    pub channels: Vec<ChannelConfig>,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            instance_name: "exsync_0".to_string(),
            alias: None,
            channels: Vec::new(),
        }
    }
}

impl LinkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.instance_name.is_empty() {
            return Err(SyncError::InvalidName("link instance name is empty".into()));
        }

        let mut seen = HashSet::new();
        for channel in &self.channels {
            channel.to_spec().validate()?;
            if !seen.insert(channel.name.as_str()) {
                return Err(SyncError::Config(format!(
                    "duplicate channel name '{}' in link '{}'",
                    channel.name, self.instance_name
                )));
            }
        }
        Ok(())
    }
}

// ==================== Driver Config ====================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriverConfig {
    /// Time between two driver cycles
    pub cycle_time_ms: u64,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            cycle_time_ms: DEFAULT_CYCLE_TIME_MS,
        }
    }
}

impl DriverConfig {
    pub fn cycle_time(&self) -> Duration {
        Duration::from_millis(self.cycle_time_ms)
    }
}

// ==================== Log Config ====================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Module name used by this process's log distributor
    pub module_name: String,
    /// Directory for daily rolling log files; console only when unset
    pub log_dir: Option<PathBuf>,
    /// Filter the log server starts with
    pub default_filter: LogFilterConfig,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            module_name: "exsync".to_string(),
            log_dir: None,
            default_filter: LogFilterConfig::default(),
        }
    }
}

impl LogConfig {
    pub fn validate(&self) -> Result<()> {
        validate_module_name(&self.module_name)?;
        self.default_filter.validate()
    }
}

// ==================== Sync Config ====================

/// Complete configuration of one exsync process
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub link: LinkConfig,
    pub driver: DriverConfig,
    pub log: LogConfig,
}

impl SyncConfig {
    pub fn validate(&self) -> Result<()> {
        self.link.validate()?;
        if self.driver.cycle_time_ms == 0 {
            return Err(SyncError::Config("cycle_time_ms must be positive".into()));
        }
        self.log.validate()
    }

    /// Parse from a string in the given format and validate
    pub fn from_str_with_format(content: &str, format: ConfigFormat) -> Result<Self> {
        let config: Self = match format {
            ConfigFormat::Toml => toml::from_str(content)?,
            ConfigFormat::Json => serde_json::from_str(content)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Serialize to a string in the given format
    pub fn to_string_with_format(&self, format: ConfigFormat) -> Result<String> {
        match format {
            ConfigFormat::Toml => toml::to_string_pretty(self)
                .map_err(|e| SyncError::Serialization(e.to_string())),
            ConfigFormat::Json => Ok(serde_json::to_string_pretty(self)?),
        }
    }

    /// Load a config file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;

        Self::from_str_with_format(&content, ConfigFormat::from_path(path))
            .map_err(|e| e.with_context(format!("Failed to parse config file {:?}", path)))
    }

    /// Load a config file, returning defaults on any error
    pub fn load_or_default(path: impl AsRef<Path>) -> Self {
        Self::load(path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Load the config from the default location, if it exists
    pub fn load_default() -> Result<Self> {
        match default_config_path() {
            Some(path) if path.exists() => Self::load(path),
            _ => Ok(Self::default()),
        }
    }

    /// Save the config, creating parent directories as needed
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        self.validate()?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = self.to_string_with_format(ConfigFormat::from_path(path))?;
        std::fs::write(path, content).map_err(|e| {
            SyncError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }
}
