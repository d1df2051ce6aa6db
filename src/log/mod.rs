//! Log distribution with a shared filter configuration
//!
//! Every module that produces log messages owns a [`ConfigDistributor`]. Until
//! the module has received a [`LogFilterConfig`] it cannot know what to
//! forward, so messages are kept in a bounded local queue. The first config
//! flushes that queue through the filter; later configs replace the filter
//! wholesale.
//!
//! A [`LogServer`] is the central authority for the configuration. It hands
//! out distributors, broadcasts config changes to all of them and collects
//! the forwarded records.
//!
//! # Filtering
//!
//! A record is forwarded when all of these hold:
//!
//! - its level is at or above the configured severity (`level <= config.level`)
//! - its type mask is [`LogTypeMask::ALWAYS`] or shares a bit with the config
//! - the emitting module is not in the exclusion list (exact match)

pub mod distributor;
pub mod server;

pub use distributor::{ConfigChangeCallback, ConfigDistributor, Disposition, LogSink};
pub use server::LogServer;

use crate::error::{Result, SyncError};
use bitflags::bitflags;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum number of excluded module names
pub const MAX_EXCLUDED_MODULES: usize = 20;

/// Maximum length of a module name
pub const MAX_MODULE_NAME_LEN: usize = 35;

/// Messages longer than this are truncated
pub const MAX_MESSAGE_LEN: usize = 256;

/// Records queued while no configuration has been received
pub const PENDING_CAPACITY: usize = 100;

/// Severity of a log record, most severe first
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warning,
    #[default]
    Success,
    Info,
    Debug,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LogLevel::Error => write!(f, "ERROR"),
            LogLevel::Warning => write!(f, "WARNING"),
            LogLevel::Success => write!(f, "SUCCESS"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Debug => write!(f, "DEBUG"),
        }
    }
}

bitflags! {
    /// Category of a log record
    ///
    /// The empty mask is [`LogTypeMask::ALWAYS`]: such records pass the type
    /// check regardless of the configured mask.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct LogTypeMask: u32 {
        const USER = 1;
        const SYSTEM = 2;
        const VERBOSE = 4;
    }
}

impl LogTypeMask {
    /// Records that ignore the type filter
    pub const ALWAYS: Self = Self::empty();

    pub fn is_always(&self) -> bool {
        self.is_empty()
    }
}

impl Default for LogTypeMask {
    fn default() -> Self {
        LogTypeMask::USER | LogTypeMask::SYSTEM
    }
}

/// Shared filter configuration, replaced wholesale on every broadcast
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogFilterConfig {
    /// Least severe level still forwarded
    pub level: LogLevel,
    /// Categories forwarded
    pub type_mask: LogTypeMask,
    /// Also print forwarded records on the local console
    pub console_echo: bool,
    /// Modules whose records are dropped
    pub excluded_module_names: Vec<String>,
}

impl Default for LogFilterConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            type_mask: LogTypeMask::default(),
            console_echo: false,
            excluded_module_names: Vec::new(),
        }
    }
}

impl LogFilterConfig {
    /// Validate the exclusion list
    pub fn validate(&self) -> Result<()> {
        if self.excluded_module_names.len() > MAX_EXCLUDED_MODULES {
            return Err(SyncError::Config(format!(
                "at most {} excluded modules allowed, got {}",
                MAX_EXCLUDED_MODULES,
                self.excluded_module_names.len()
            )));
        }
        for name in &self.excluded_module_names {
            validate_module_name(name)?;
        }
        Ok(())
    }

    pub fn is_excluded(&self, module: &str) -> bool {
        self.excluded_module_names.iter().any(|m| m == module)
    }

    /// Whether a record passes this filter
    pub fn allows(&self, module: &str, level: LogLevel, type_mask: LogTypeMask) -> bool {
        level <= self.level
            && (type_mask.is_always() || type_mask.intersects(self.type_mask))
            && !self.is_excluded(module)
    }
}

/// Check a module name against the naming limits
pub fn validate_module_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SyncError::InvalidName("module name is empty".into()));
    }
    if name.chars().count() > MAX_MODULE_NAME_LEN {
        return Err(SyncError::InvalidName(format!(
            "module name '{}' is longer than {} characters",
            name, MAX_MODULE_NAME_LEN
        )));
    }
    Ok(())
}

/// A log message with its origin and classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogRecord {
    pub module: String,
    pub level: LogLevel,
    pub type_mask: LogTypeMask,
    pub message: String,
    /// Time the message was emitted, not when it was forwarded
    pub timestamp: DateTime<Utc>,
}

impl LogRecord {
    pub fn new(
        module: impl Into<String>,
        level: LogLevel,
        type_mask: LogTypeMask,
        message: &str,
    ) -> Self {
        Self {
            module: module.into(),
            level,
            type_mask,
            message: truncate_message(message),
            timestamp: Utc::now(),
        }
    }
}

impl std::fmt::Display for LogRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} [{}] {}: {}",
            self.timestamp.format("%H:%M:%S%.3f"),
            self.level,
            self.module,
            self.message
        )
    }
}

fn truncate_message(message: &str) -> String {
    match message.char_indices().nth(MAX_MESSAGE_LEN) {
        Some((end, _)) => message[..end].to_string(),
        None => message.to_string(),
    }
}
