//! Central log server
//!
//! Owns the authoritative [`LogFilterConfig`], hands out one
//! [`ConfigDistributor`] per module and collects forwarded records. Config
//! change requests from any module are rebroadcast to every subscriber on the
//! server's next [`LogServer::process`].

use super::{validate_module_name, ConfigDistributor, LogFilterConfig, LogRecord};
use crate::error::Result;
use crossbeam_channel::{unbounded, Receiver, Sender, TryRecvError};

struct Subscriber {
    module_name: String,
    config_tx: Sender<LogFilterConfig>,
}

/// Log configuration authority and record collector
pub struct LogServer {
    config: LogFilterConfig,
    subscribers: Vec<Subscriber>,
    record_tx: Sender<LogRecord>,
    record_rx: Receiver<LogRecord>,
    change_tx: Sender<LogFilterConfig>,
    change_rx: Receiver<LogFilterConfig>,
}

impl LogServer {
    pub fn new(config: LogFilterConfig) -> Result<Self> {
        config.validate()?;
        let (record_tx, record_rx) = unbounded();
        let (change_tx, change_rx) = unbounded();

        Ok(Self {
            config,
            subscribers: Vec::new(),
            record_tx,
            record_rx,
            change_tx,
            change_rx,
        })
    }

    /// Current configuration
    pub fn config(&self) -> &LogFilterConfig {
        &self.config
    }

    /// Number of connected modules
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Create a distributor for `module_name`
    ///
    /// The current configuration is queued for it right away and applied on
    /// its first `process()`.
    pub fn subscribe(&mut self, module_name: &str) -> Result<ConfigDistributor> {
        validate_module_name(module_name)?;

        let (config_tx, config_rx) = unbounded();
        // receiver is alive, the send cannot fail
        let _ = config_tx.send(self.config.clone());

        let mut distributor = ConfigDistributor::new(module_name, self.record_tx.clone())?;
        distributor.attach(config_rx, self.change_tx.clone());

        tracing::debug!("Log server: {} subscribed", module_name);
        self.subscribers.push(Subscriber {
            module_name: module_name.to_string(),
            config_tx,
        });
        Ok(distributor)
    }

    /// Replace the configuration and send it to every subscriber
    pub fn broadcast(&mut self, config: LogFilterConfig) -> Result<()> {
        config.validate()?;
        self.config = config;

        let config = &self.config;
        self.subscribers.retain(|sub| {
            let alive = sub.config_tx.send(config.clone()).is_ok();
            if !alive {
                tracing::debug!("Log server: {} went away", sub.module_name);
            }
            alive
        });
        tracing::info!(
            "Log server: config broadcast to {} module(s)",
            self.subscribers.len()
        );
        Ok(())
    }

    /// Rebroadcast pending config change requests
    ///
    /// Returns the number of changes applied. Invalid requests are logged and
    /// skipped.
    pub fn process(&mut self) -> usize {
        let mut applied = 0;
        loop {
            match self.change_rx.try_recv() {
                Ok(config) => match self.broadcast(config) {
                    Ok(()) => applied += 1,
                    Err(e) => tracing::warn!("Log server: rejected config change: {}", e),
                },
                // the server holds a sender itself, so this never disconnects
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => break,
            }
        }
        applied
    }

    /// Take every record forwarded since the last call
    pub fn drain_records(&self) -> Vec<LogRecord> {
        self.record_rx.try_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::{LogLevel, LogTypeMask};

    #[test]
    fn test_subscriber_gets_config_on_first_process() {
        let mut server = LogServer::new(LogFilterConfig::default()).unwrap();
        let mut dist = server.subscribe("gBufferFub_0").unwrap();

        dist.success("before config", LogTypeMask::USER).unwrap();
        assert!(!dist.is_ready());
        assert!(server.drain_records().is_empty());

        assert_eq!(dist.process().unwrap(), 1);
        assert!(dist.is_ready());
        let records = server.drain_records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].module, "gBufferFub_0");
    }

    #[test]
    fn test_change_config_is_rebroadcast() {
        let mut server = LogServer::new(LogFilterConfig::default()).unwrap();
        let mut a = server.subscribe("moduleA").unwrap();
        let mut b = server.subscribe("moduleB").unwrap();
        a.process().unwrap();
        b.process().unwrap();

        let debug_all = LogFilterConfig {
            level: LogLevel::Debug,
            type_mask: LogTypeMask::all(),
            ..Default::default()
        };
        a.change_config(debug_all.clone()).unwrap();
        // nothing changes until the server processes the request
        assert_eq!(a.config().unwrap().level, LogLevel::Success);

        assert_eq!(server.process(), 1);
        assert_eq!(server.config(), &debug_all);
        a.process().unwrap();
        b.process().unwrap();
        assert_eq!(a.config(), Some(&debug_all));
        assert_eq!(b.config(), Some(&debug_all));
    }

    #[test]
    fn test_dropped_subscribers_are_pruned() {
        let mut server = LogServer::new(LogFilterConfig::default()).unwrap();
        let a = server.subscribe("moduleA").unwrap();
        let _b = server.subscribe("moduleB").unwrap();
        drop(a);

        server.broadcast(LogFilterConfig::default()).unwrap();
        assert_eq!(server.subscriber_count(), 1);
    }

    #[test]
    fn test_invalid_change_rejected() {
        let mut server = LogServer::new(LogFilterConfig::default()).unwrap();
        let mut bad = LogFilterConfig::default();
        bad.excluded_module_names = (0..25).map(|i| format!("m{}", i)).collect();
        assert!(server.broadcast(bad).is_err());
        assert!(server.config().excluded_module_names.is_empty());
    }
}
