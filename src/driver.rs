//! Cyclic driver
//!
//! [`CyclicDriver`] runs a [`Link`] from a periodic control task. Each call
//! to [`CyclicDriver::cycle`] takes the owner's `enable`/`start` inputs,
//! advances the connection lifecycle by at most one step, processes inbound
//! events and publishes changed values.
//!
//! ```text
//!            enable                  connect                start && Connected
//!   Idle ───────────► Connecting ───────────► WaitStart ◄─────────────────────► Running
//!    ▲                                          │   !start                          │
//!    │ !enable                                  └───────┬───────────────────────────┘
//!  TeardownWait ◄── disconnect ── Teardown ◄────────────┘ aborted / lost / !enable
//! ```
//!
//! The owner exchanges data through a [`ProcessImage`]: writes to publishable
//! channels are published when they differ from the last published value,
//! and new values of subscribed single-slot channels are copied in.

use crate::channel::Channel;
use crate::error::{Result, SyncError};
use crate::link::Link;
use crate::log::{ConfigDistributor, LogTypeMask};
use crate::types::{ChannelId, ConnectionState, DatasetBuffer};
use crate::ErrorKind;
use tracing::{debug, info, warn};

/// Position of the driver in the connection lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum DriverState {
    #[default]
    Idle,
    Connecting,
    WaitStart,
    Running,
    Teardown,
    TeardownWait,
}

impl std::fmt::Display for DriverState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DriverState::Idle => "Idle",
            DriverState::Connecting => "Connecting",
            DriverState::WaitStart => "WaitStart",
            DriverState::Running => "Running",
            DriverState::Teardown => "Teardown",
            DriverState::TeardownWait => "TeardownWait",
        };
        f.write_str(name)
    }
}

/// Status outputs refreshed every cycle
///
/// Exactly one of the four connection flags is set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriverStatus {
    pub disconnected: bool,
    pub connected: bool,
    pub operational: bool,
    pub aborted: bool,
    /// Between connect and teardown
    pub active: bool,
    /// An operation failed during this cycle
    pub error: bool,
}

/// Result of [`CyclicDriver::update_buffered`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStatus {
    /// A sample was moved into the process image
    pub updated: bool,
    /// Samples still waiting
    pub pending: usize,
    /// Samples dropped so far because the ring was full
    pub overflow_errors: u64,
}

/// Owner-visible value of every channel, indexed by [`ChannelId`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessImage {
    values: Vec<DatasetBuffer>,
}

impl ProcessImage {
    /// Zero-filled image matching the channels of `link`
    pub fn for_link(link: &Link) -> Self {
        Self {
            values: link
                .channels()
                .iter()
                .map(|c| DatasetBuffer::new(c.byte_size()))
                .collect(),
        }
    }

    pub fn get(&self, id: ChannelId) -> Result<&[u8]> {
        self.values
            .get(id.index())
            .map(DatasetBuffer::as_bytes)
            .ok_or_else(|| SyncError::NotFound(format!("channel {}", id)))
    }

    /// Overwrite a value; the size must match the channel exactly
    pub fn set(&mut self, id: ChannelId, bytes: &[u8]) -> Result<()> {
        self.values
            .get_mut(id.index())
            .ok_or_else(|| SyncError::NotFound(format!("channel {}", id)))?
            .set(bytes)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Runs a link from a periodic task
#[derive(Debug)]
pub struct CyclicDriver {
    link: Link,
    state: DriverState,
    image: ProcessImage,
    shadow: ProcessImage,
    active: bool,
    cycle_error: bool,
    last_error: Option<SyncError>,
    logger: Option<ConfigDistributor>,
}

impl CyclicDriver {
    pub fn new(link: Link) -> Self {
        let image = ProcessImage::for_link(&link);
        Self {
            shadow: image.clone(),
            image,
            link,
            state: DriverState::Idle,
            active: false,
            cycle_error: false,
            last_error: None,
            logger: None,
        }
    }

    /// Attach a log distributor that is processed every cycle
    pub fn with_logger(mut self, logger: ConfigDistributor) -> Self {
        self.logger = Some(logger);
        self
    }

    pub fn state(&self) -> DriverState {
        self.state
    }

    pub fn link(&self) -> &Link {
        &self.link
    }

    pub fn link_mut(&mut self) -> &mut Link {
        &mut self.link
    }

    pub fn image(&self) -> &ProcessImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut ProcessImage {
        &mut self.image
    }

    pub fn logger_mut(&mut self) -> Option<&mut ConfigDistributor> {
        self.logger.as_mut()
    }

    /// Most recent failure, kept until a later one replaces it
    pub fn last_error(&self) -> Option<&SyncError> {
        self.last_error.as_ref()
    }

    /// Current status outputs
    pub fn status(&self) -> DriverStatus {
        let state = self.link.state();
        DriverStatus {
            disconnected: state == ConnectionState::Disconnected,
            connected: state == ConnectionState::Connected,
            operational: state == ConnectionState::Operational,
            aborted: state == ConnectionState::Aborted,
            active: self.active,
            error: self.cycle_error,
        }
    }

    /// Run one control cycle
    pub fn cycle(&mut self, enable: bool, start: bool) -> DriverStatus {
        self.cycle_error = false;

        if !enable && self.state != DriverState::Idle {
            self.state = DriverState::Teardown;
        }

        match self.state {
            DriverState::Idle => {
                if enable {
                    self.state = DriverState::Connecting;
                }
            }
            DriverState::Connecting => self.connect(),
            DriverState::WaitStart | DriverState::Running => self.run(start),
            DriverState::Teardown => {
                self.teardown();
                if !enable {
                    self.state = DriverState::Idle;
                }
            }
            DriverState::TeardownWait => {
                if !enable {
                    self.state = DriverState::Idle;
                }
            }
        }

        if let Some(logger) = self.logger.as_mut() {
            if let Err(e) = logger.process() {
                warn!("Log distributor: {}", e);
            }
        }

        self.status()
    }

    /// Move the oldest sample of a buffered channel into the process image
    ///
    /// Pops at most one sample, and only if `update` is set.
    pub fn update_buffered(&mut self, id: ChannelId, update: bool) -> Result<BufferStatus> {
        let channel = self.link.channel_mut(id)?;
        if !channel.is_buffered() {
            return Err(SyncError::NotAllowed(format!(
                "channel '{}' is not buffered",
                channel.name()
            )));
        }

        let publishable = channel.direction().can_publish();
        let mut updated = false;
        if update {
            match channel.try_pop() {
                Ok(sample) => {
                    self.image.set(id, &sample.bytes)?;
                    if publishable {
                        self.shadow.set(id, &sample.bytes)?;
                    }
                    updated = true;
                }
                Err(e) if e.kind() == ErrorKind::Empty => {}
                Err(e) => return Err(e),
            }
        }

        Ok(BufferStatus {
            updated,
            pending: channel.pending_count(),
            overflow_errors: channel.overflow_count(),
        })
    }

    fn connect(&mut self) {
        self.state = DriverState::WaitStart;
        self.active = true;
        info!("Starting {} link", self.link.instance_name());
        self.log_success(&format!("starting {} application..", self.link.instance_name()));

        if let Err(e) = self.link.connect() {
            self.fail("connect", e);
        }
    }

    fn run(&mut self, start: bool) {
        if start {
            if self.state == DriverState::WaitStart {
                match self.link.state() {
                    ConnectionState::Connected => match self.link.set_operational() {
                        Ok(()) => self.state = DriverState::Running,
                        Err(e) => {
                            self.fail("set operational", e);
                            return;
                        }
                    },
                    ConnectionState::Operational => self.state = DriverState::Running,
                    _ => {}
                }
            }
        } else {
            self.state = DriverState::WaitStart;
        }

        if let Err(e) = self.link.process() {
            self.record_error("process", e);
        }
        self.copy_subscriptions();
        self.publish_changes();

        if self.link.state() == ConnectionState::Aborted || self.link.lost_connection() {
            warn!(
                "Link {} is {}, tearing down",
                self.link.instance_name(),
                self.link.state()
            );
            self.state = DriverState::Teardown;
        }
    }

    fn teardown(&mut self) {
        if self.link.is_session_open() || self.link.state() != ConnectionState::Disconnected {
            if let Err(e) = self.link.disconnect() {
                self.record_error("disconnect", e);
            }
        }
        if self.active {
            info!("Stopped {} link", self.link.instance_name());
        }
        self.active = false;
        self.state = DriverState::TeardownWait;
    }

    /// Copy new single-slot values into the process image
    fn copy_subscriptions(&mut self) {
        for index in 0..self.image.len() {
            let id = ChannelId::new(index);
            let Ok(channel) = self.link.channel_mut(id) else {
                continue;
            };
            if channel.is_buffered() || !channel.take_updated() {
                continue;
            }

            let publishable = channel.direction().can_publish();
            let value = channel.value();
            if self.image.set(id, value).is_ok() && publishable {
                // a received value must not be echoed back
                let _ = self.shadow.set(id, value);
            }
        }
    }

    /// Publish every publishable value that differs from its shadow
    fn publish_changes(&mut self) {
        for index in 0..self.image.len() {
            let id = ChannelId::new(index);
            let ready = self
                .link
                .channel(id)
                .map(|c| c.direction().can_publish() && c.state().is_connected())
                .unwrap_or(false);
            if !ready || self.image.get(id).ok() == self.shadow.get(id).ok() {
                continue;
            }

            let Ok(value) = self.image.get(id) else {
                continue;
            };
            match self.link.publish(id, value) {
                Ok(()) => {
                    let _ = self.shadow.set(id, value);
                    debug!("Published {}", channel_label(&self.link, id));
                }
                Err(e) if e.kind() == ErrorKind::NotReady => {}
                Err(e) => {
                    self.record_error("publish", e);
                    return;
                }
            }
        }
    }

    fn fail(&mut self, operation: &str, err: SyncError) {
        self.record_error(operation, err);
        self.state = DriverState::Teardown;
    }

    fn record_error(&mut self, operation: &str, err: SyncError) {
        warn!("{} {} failed: {}", self.link.instance_name(), operation, err);
        if let Some(logger) = self.logger.as_mut() {
            let _ = logger.error(&format!("{} failed: {}", operation, err));
        }
        self.cycle_error = true;
        self.last_error = Some(err);
    }

    fn log_success(&mut self, message: &str) {
        if let Some(logger) = self.logger.as_mut() {
            if let Err(e) = logger.success(message, LogTypeMask::USER) {
                warn!("Log distributor: {}", e);
            }
        }
    }
}

fn channel_label(link: &Link, id: ChannelId) -> String {
    link.channel(id)
        .map(Channel::name)
        .map(str::to_string)
        .unwrap_or_else(|_| id.to_string())
}
