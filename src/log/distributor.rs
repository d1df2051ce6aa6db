//! Per-module log distributor
//!
//! Queues records until a filter configuration arrives, then forwards the
//! queue and every later record through the filter to a [`LogSink`].

use super::{
    validate_module_name, LogFilterConfig, LogLevel, LogRecord, LogTypeMask, PENDING_CAPACITY,
};
use crate::error::{Result, SyncError};
use crossbeam_channel::{Receiver, Sender, TryRecvError};
use std::collections::VecDeque;

/// Destination of forwarded records
pub trait LogSink: Send {
    fn forward(&mut self, record: LogRecord) -> Result<()>;
}

impl LogSink for Sender<LogRecord> {
    fn forward(&mut self, record: LogRecord) -> Result<()> {
        self.send(record)
            .map_err(|_| SyncError::Channel("log record receiver disconnected".into()))
    }
}

/// Called after a new configuration was applied
///
/// The callback must not request another configuration change; it only
/// receives the new config and has no handle to broadcast one.
pub type ConfigChangeCallback = Box<dyn FnMut(&LogFilterConfig) + Send>;

/// What happened to an emitted record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// No configuration yet, queued locally
    Buffered,
    /// Passed the filter and handed to the sink
    Forwarded,
    /// Rejected by the filter
    Filtered,
}

/// Connection to a [`super::LogServer`]
struct ServerLink {
    config_rx: Receiver<LogFilterConfig>,
    change_tx: Sender<LogFilterConfig>,
}

/// Log front end of one module
pub struct ConfigDistributor {
    module_name: String,
    config: Option<LogFilterConfig>,
    pending: VecDeque<LogRecord>,
    dropped: u64,
    forwarded: u64,
    sink: Box<dyn LogSink>,
    on_change: Option<ConfigChangeCallback>,
    server: Option<ServerLink>,
}

impl std::fmt::Debug for ConfigDistributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigDistributor")
            .field("module_name", &self.module_name)
            .field("config", &self.config)
            .field("pending", &self.pending.len())
            .field("dropped", &self.dropped)
            .field("forwarded", &self.forwarded)
            .finish_non_exhaustive()
    }
}

impl ConfigDistributor {
    /// Create a standalone distributor; configs are applied with
    /// [`ConfigDistributor::on_config_received`]
    pub fn new(module_name: impl Into<String>, sink: impl LogSink + 'static) -> Result<Self> {
        let module_name = module_name.into();
        validate_module_name(&module_name)?;

        Ok(Self {
            module_name,
            config: None,
            pending: VecDeque::with_capacity(PENDING_CAPACITY),
            dropped: 0,
            forwarded: 0,
            sink: Box::new(sink),
            on_change: None,
            server: None,
        })
    }

    pub(crate) fn attach(
        &mut self,
        config_rx: Receiver<LogFilterConfig>,
        change_tx: Sender<LogFilterConfig>,
    ) {
        self.server = Some(ServerLink {
            config_rx,
            change_tx,
        });
    }

    pub fn module_name(&self) -> &str {
        &self.module_name
    }

    /// True once a configuration has been received
    pub fn is_ready(&self) -> bool {
        self.config.is_some()
    }

    /// Current configuration, if any was received
    pub fn config(&self) -> Option<&LogFilterConfig> {
        self.config.as_ref()
    }

    /// Whether this module is excluded by the current configuration
    pub fn is_excluded(&self) -> bool {
        self.config
            .as_ref()
            .is_some_and(|c| c.is_excluded(&self.module_name))
    }

    /// Records waiting for the first configuration
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Records discarded because the pending queue was full
    pub fn dropped_count(&self) -> u64 {
        self.dropped
    }

    /// Records handed to the sink so far
    pub fn forwarded_count(&self) -> u64 {
        self.forwarded
    }

    /// Register the callback run after every applied configuration
    pub fn on_config_changed(&mut self, callback: ConfigChangeCallback) {
        self.on_change = Some(callback);
    }

    /// Emit a record
    ///
    /// Messages longer than [`super::MAX_MESSAGE_LEN`] characters are
    /// truncated.
    pub fn emit(
        &mut self,
        message: &str,
        level: LogLevel,
        type_mask: LogTypeMask,
    ) -> Result<Disposition> {
        let record = LogRecord::new(self.module_name.clone(), level, type_mask, message);

        if self.config.is_none() {
            if self.pending.len() >= PENDING_CAPACITY {
                self.pending.pop_front();
                self.dropped += 1;
            }
            self.pending.push_back(record);
            return Ok(Disposition::Buffered);
        }

        self.dispatch(record)
    }

    /// Errors are always of type [`LogTypeMask::ALWAYS`]
    pub fn error(&mut self, message: &str) -> Result<Disposition> {
        self.emit(message, LogLevel::Error, LogTypeMask::ALWAYS)
    }

    pub fn warning(&mut self, message: &str, type_mask: LogTypeMask) -> Result<Disposition> {
        self.emit(message, LogLevel::Warning, type_mask)
    }

    pub fn success(&mut self, message: &str, type_mask: LogTypeMask) -> Result<Disposition> {
        self.emit(message, LogLevel::Success, type_mask)
    }

    pub fn info(&mut self, message: &str, type_mask: LogTypeMask) -> Result<Disposition> {
        self.emit(message, LogLevel::Info, type_mask)
    }

    pub fn debug(&mut self, message: &str, type_mask: LogTypeMask) -> Result<Disposition> {
        self.emit(message, LogLevel::Debug, type_mask)
    }

    /// Debug record of type `USER | VERBOSE`
    pub fn verbose(&mut self, message: &str) -> Result<Disposition> {
        self.emit(
            message,
            LogLevel::Debug,
            LogTypeMask::USER | LogTypeMask::VERBOSE,
        )
    }

    /// Replace the configuration and flush pending records through it
    ///
    /// Pending records are forwarded in their original order. The change
    /// callback runs after the flush. Returns the number of flushed records
    /// that passed the filter.
    pub fn on_config_received(&mut self, config: LogFilterConfig) -> Result<usize> {
        config.validate()?;
        tracing::debug!(
            "{}: log config received (level {}, mask {:?})",
            self.module_name,
            config.level,
            config.type_mask
        );
        self.config = Some(config);

        let mut flushed = 0;
        let mut first_error = None;
        while let Some(record) = self.pending.pop_front() {
            match self.dispatch(record) {
                Ok(Disposition::Forwarded) => flushed += 1,
                Ok(_) => {}
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        if let (Some(callback), Some(config)) = (self.on_change.as_mut(), self.config.as_ref()) {
            callback(config);
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(flushed),
        }
    }

    /// Ask the log server to broadcast a new configuration
    ///
    /// Takes effect for this module when the broadcast comes back through
    /// [`ConfigDistributor::process`].
    pub fn change_config(&self, config: LogFilterConfig) -> Result<()> {
        config.validate()?;
        let server = self.server.as_ref().ok_or_else(|| {
            SyncError::NotReady(format!("{} is not attached to a log server", self.module_name))
        })?;
        server
            .change_tx
            .send(config)
            .map_err(|_| SyncError::Channel("log server disconnected".into()))
    }

    /// Apply configurations broadcast by the log server
    ///
    /// Returns the number of configurations applied.
    pub fn process(&mut self) -> Result<usize> {
        let mut applied = 0;
        loop {
            let received = match self.server.as_ref() {
                Some(server) => server.config_rx.try_recv(),
                None => break,
            };
            match received {
                Ok(config) => {
                    self.on_config_received(config)?;
                    applied += 1;
                }
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.server = None;
                    return Err(SyncError::Channel("log server disconnected".into()));
                }
            }
        }
        Ok(applied)
    }

    fn dispatch(&mut self, record: LogRecord) -> Result<Disposition> {
        let Some(config) = self.config.as_ref() else {
            return Ok(Disposition::Buffered);
        };
        if !config.allows(&record.module, record.level, record.type_mask) {
            return Ok(Disposition::Filtered);
        }

        if config.console_echo {
            echo(&record);
        }
        self.sink.forward(record)?;
        self.forwarded += 1;
        Ok(Disposition::Forwarded)
    }
}

fn echo(record: &LogRecord) {
    let module = record.module.as_str();
    match record.level {
        LogLevel::Error => tracing::error!(module, "{}", record.message),
        LogLevel::Warning => tracing::warn!(module, "{}", record.message),
        LogLevel::Success | LogLevel::Info => tracing::info!(module, "{}", record.message),
        LogLevel::Debug => tracing::debug!(module, "{}", record.message),
    }
}
