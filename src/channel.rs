//! Channel state and data for a single named dataset
//!
//! A [`Channel`] is one fixed-size dataset inside a link. It tracks its own
//! connection state, the last transport fault reported for it, the latest
//! value, and (for buffered subscriptions) a [`RingBuffer`] of received
//! samples.
//!
//! Channels are created by [`crate::link::Link::add_channel`] and mutated only
//! by the link, which routes transport events to them by [`ChannelId`]. The
//! owner reads channel data through `&Channel` accessors and drains buffered
//! samples with [`Channel::try_pop`].
//!
//! # State rules
//!
//! - `Disconnected → Connected` when the transport acknowledges registration
//! - `Connected → Operational` only when promoted by the link
//! - `any → Aborted` on a transport fault; terminal until the link is torn down

use crate::error::{Result, SyncError, TransportFault};
use crate::ring::{RingBuffer, DEFAULT_RING_CAPACITY};
use crate::types::{
    ChannelId, ConnectionState, DatasetBuffer, Direction, ErrorCode, Sample, SendBufferInfo,
};
use std::collections::VecDeque;

/// Size of the rolling window for recent latencies
const RECENT_WINDOW_SIZE: usize = 100;

/// Declaration of a channel, before it is added to a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Name, unique within the link
    pub name: String,
    /// Data direction seen from the local side
    pub direction: Direction,
    /// Fixed payload size in bytes
    pub byte_size: usize,
    /// Ring capacity for buffered subscriptions, `None` for a single slot
    pub buffer_capacity: Option<usize>,
}

impl ChannelSpec {
    pub fn new(name: impl Into<String>, direction: Direction, byte_size: usize) -> Self {
        Self {
            name: name.into(),
            direction,
            byte_size,
            buffer_capacity: None,
        }
    }

    /// A channel the local side publishes
    pub fn publish(name: impl Into<String>, byte_size: usize) -> Self {
        Self::new(name, Direction::Publish, byte_size)
    }

    /// A channel the local side subscribes to
    pub fn subscribe(name: impl Into<String>, byte_size: usize) -> Self {
        Self::new(name, Direction::Subscribe, byte_size)
    }

    /// A channel used in both directions
    pub fn both(name: impl Into<String>, byte_size: usize) -> Self {
        Self::new(name, Direction::Both, byte_size)
    }

    /// Queue received values in a ring of `capacity` slots
    pub fn buffered(mut self, capacity: usize) -> Self {
        self.buffer_capacity = Some(capacity);
        self
    }

    /// Queue received values in a ring of the default capacity
    pub fn buffered_default(self) -> Self {
        self.buffered(DEFAULT_RING_CAPACITY)
    }

    /// Check the declaration on its own
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(SyncError::InvalidName("channel name is empty".into()));
        }
        if self.byte_size == 0 {
            return Err(SyncError::Config(format!(
                "channel '{}' has a zero byte size",
                self.name
            )));
        }
        if let Some(capacity) = self.buffer_capacity {
            if !self.direction.can_subscribe() {
                return Err(SyncError::Config(format!(
                    "channel '{}' is buffered but never receives data",
                    self.name
                )));
            }
            if capacity < 2 {
                return Err(SyncError::Config(format!(
                    "channel '{}' buffer capacity must be at least 2, got {}",
                    self.name, capacity
                )));
            }
        }
        Ok(())
    }
}

/// Latency statistics of received updates
///
/// Latency is the local nettime at receipt minus the producer's nettime at
/// send, in microseconds.
#[derive(Debug, Clone)]
pub struct LatencyStats {
    /// Number of updates measured
    pub updates: u64,
    /// Latency of the most recent update
    pub last_latency_us: i64,
    /// Minimum latency observed
    pub min_latency_us: i64,
    /// Maximum latency observed
    pub max_latency_us: i64,
    total_latency_us: i64,
    /// Rolling window of recent latencies for jitter calculation
    pub recent: VecDeque<i64>,
}

impl Default for LatencyStats {
    fn default() -> Self {
        Self {
            updates: 0,
            last_latency_us: 0,
            min_latency_us: i64::MAX,
            max_latency_us: i64::MIN,
            total_latency_us: 0,
            recent: VecDeque::with_capacity(RECENT_WINDOW_SIZE),
        }
    }
}

impl LatencyStats {
    /// Record the latency of one update
    pub fn record(&mut self, latency_us: i64) {
        self.updates += 1;
        self.last_latency_us = latency_us;
        self.total_latency_us = self.total_latency_us.saturating_add(latency_us);
        self.min_latency_us = self.min_latency_us.min(latency_us);
        self.max_latency_us = self.max_latency_us.max(latency_us);

        if self.recent.len() == RECENT_WINDOW_SIZE {
            self.recent.pop_front();
        }
        self.recent.push_back(latency_us);
    }

    /// Average latency over all updates
    pub fn avg_latency_us(&self) -> f64 {
        if self.updates == 0 {
            0.0
        } else {
            self.total_latency_us as f64 / self.updates as f64
        }
    }

    /// Jitter (max - min) over the recent window
    pub fn jitter_us(&self) -> i64 {
        let min = self.recent.iter().min().copied().unwrap_or(0);
        let max = self.recent.iter().max().copied().unwrap_or(0);
        max - min
    }

    /// Reset all statistics
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// What an inbound update did to the channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The single-slot value was replaced
    Replaced { latency_us: i64 },
    /// The sample was queued in the ring
    Buffered { latency_us: i64, pending: usize },
    /// The ring was full and the sample was dropped
    Overflow { overflow_count: u64 },
}

/// A named, fixed-size dataset within a link
#[derive(Debug)]
pub struct Channel {
    id: ChannelId,
    name: String,
    direction: Direction,
    state: ConnectionState,
    last_error: Option<TransportFault>,
    value: DatasetBuffer,
    nettime: i32,
    updated: bool,
    buffer: Option<RingBuffer<Sample>>,
    send_buffer: SendBufferInfo,
    published_count: u64,
    delivered_count: u64,
    latency: LatencyStats,
}

impl Channel {
    pub(crate) fn new(id: ChannelId, spec: ChannelSpec) -> Result<Self> {
        spec.validate()?;
        let buffer = spec.buffer_capacity.map(RingBuffer::new).transpose()?;

        Ok(Self {
            id,
            name: spec.name,
            direction: spec.direction,
            state: ConnectionState::Disconnected,
            last_error: None,
            value: DatasetBuffer::new(spec.byte_size),
            nettime: 0,
            updated: false,
            buffer,
            send_buffer: SendBufferInfo::default(),
            published_count: 0,
            delivered_count: 0,
            latency: LatencyStats::default(),
        })
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn byte_size(&self) -> usize {
        self.value.len()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Last fault reported by the transport for this channel
    pub fn last_error(&self) -> Option<&TransportFault> {
        self.last_error.as_ref()
    }

    /// Latest value, either the last one published or the last one received
    pub fn value(&self) -> &[u8] {
        self.value.as_bytes()
    }

    /// Producer nettime (µs) of the last received single-slot value
    pub fn nettime(&self) -> i32 {
        self.nettime
    }

    pub fn is_buffered(&self) -> bool {
        self.buffer.is_some()
    }

    /// Send-buffer bookkeeping from the latest publish/delivered ack
    pub fn send_buffer(&self) -> SendBufferInfo {
        self.send_buffer
    }

    pub fn latency(&self) -> &LatencyStats {
        &self.latency
    }

    pub fn published_count(&self) -> u64 {
        self.published_count
    }

    pub fn delivered_count(&self) -> u64 {
        self.delivered_count
    }

    /// Number of samples waiting in the ring (0 for unbuffered channels)
    pub fn pending_count(&self) -> usize {
        self.buffer.as_ref().map_or(0, RingBuffer::pending_count)
    }

    /// Samples dropped because the ring was full (0 for unbuffered channels)
    pub fn overflow_count(&self) -> u64 {
        self.buffer.as_ref().map_or(0, RingBuffer::overflow_count)
    }

    /// Take the oldest buffered sample
    pub fn try_pop(&mut self) -> Result<Sample> {
        self.ring_mut()?.pop()
    }

    /// Move the oldest buffered sample into `dest`
    pub fn pop_into(&mut self, dest: &mut Sample) -> Result<()> {
        self.ring_mut()?.pop_into(dest)
    }

    /// Returns true once after each new single-slot value
    pub fn take_updated(&mut self) -> bool {
        std::mem::take(&mut self.updated)
    }

    fn ring_mut(&mut self) -> Result<&mut RingBuffer<Sample>> {
        match self.buffer.as_mut() {
            Some(ring) => Ok(ring),
            None => Err(SyncError::NotAllowed(format!(
                "channel '{}' is not buffered",
                self.name
            ))),
        }
    }

    /// Check whether `bytes` may be published right now
    ///
    /// Size is checked first, then direction, then state.
    pub(crate) fn check_publish(&self, bytes: &[u8]) -> Result<()> {
        self.value.check(bytes)?;
        if !self.direction.can_publish() {
            return Err(SyncError::NotAllowed(format!(
                "channel '{}' is subscribe-only",
                self.name
            )));
        }
        if !self.state.is_connected() {
            return Err(SyncError::NotReady(format!(
                "channel '{}' is {}",
                self.name, self.state
            )));
        }
        Ok(())
    }

    pub(crate) fn record_published(&mut self, bytes: &[u8]) -> Result<()> {
        self.value.set(bytes)?;
        self.published_count += 1;
        Ok(())
    }

    pub(crate) fn record_send_buffer(&mut self, info: SendBufferInfo, delivered: bool) {
        self.send_buffer = info;
        if delivered {
            self.delivered_count += 1;
        }
    }

    /// Promote to operational; only valid from `Connected`
    pub(crate) fn set_operational(&mut self) -> Result<()> {
        if self.state != ConnectionState::Connected {
            return Err(SyncError::BadState {
                operation: "set channel operational",
                state: self.state,
            });
        }
        self.state = ConnectionState::Operational;
        Ok(())
    }

    /// Apply a transport-reported state change
    ///
    /// Returns true if the state changed. `Aborted` is accepted from any
    /// state; leaving `Aborted` requires [`Channel::reset`].
    pub(crate) fn transition(
        &mut self,
        state: ConnectionState,
        error: Option<TransportFault>,
    ) -> Result<bool> {
        use ConnectionState::*;

        let allowed = match (self.state, state) {
            (_, Aborted) => true,
            (Aborted, _) => false,
            (from, to) if from == to => return Ok(false),
            (Disconnected, Connected) => true,
            (Connected, Operational) => true,
            (Operational, Connected) => true,
            (Connected | Operational, Disconnected) => true,
            _ => false,
        };

        if !allowed {
            return Err(SyncError::BadState {
                operation: "change channel state",
                state: self.state,
            });
        }

        if state == Aborted {
            self.last_error = Some(error.unwrap_or_else(|| {
                TransportFault::new(ErrorCode::System, "channel aborted by transport")
            }));
        } else if error.is_some() {
            self.last_error = error;
        }
        self.state = state;
        Ok(true)
    }

    /// Store a received value
    ///
    /// A payload of the wrong size is a protocol error: it is recorded as the
    /// channel's last error and not applied.
    pub(crate) fn apply_update(
        &mut self,
        bytes: Vec<u8>,
        send_nettime: i32,
        now: i32,
    ) -> Result<UpdateOutcome> {
        if !self.direction.can_subscribe() {
            return Err(SyncError::NotAllowed(format!(
                "channel '{}' is publish-only",
                self.name
            )));
        }
        if let Err(err) = self.value.check(&bytes) {
            self.last_error = Some(TransportFault::new(ErrorCode::BadDatasetSize, err.to_string()));
            return Err(err);
        }

        let latency_us = i64::from(now.wrapping_sub(send_nettime));

        match self.buffer.as_mut() {
            Some(ring) => match ring.push(Sample {
                bytes,
                nettime: send_nettime,
            }) {
                Ok(()) => {
                    self.latency.record(latency_us);
                    Ok(UpdateOutcome::Buffered {
                        latency_us,
                        pending: ring.pending_count(),
                    })
                }
                Err(SyncError::Overflow { overflow_count }) => {
                    Ok(UpdateOutcome::Overflow { overflow_count })
                }
                Err(err) => Err(err),
            },
            None => {
                self.value.set(&bytes)?;
                self.nettime = send_nettime;
                self.updated = true;
                self.latency.record(latency_us);
                Ok(UpdateOutcome::Replaced { latency_us })
            }
        }
    }

    /// Back to `Disconnected`; faults stay visible until the next connect
    pub(crate) fn reset(&mut self) {
        self.state = ConnectionState::Disconnected;
    }

    /// Clear per-session data before a new connect
    pub(crate) fn prepare_connect(&mut self) {
        self.state = ConnectionState::Disconnected;
        self.last_error = None;
        self.updated = false;
        self.send_buffer = SendBufferInfo::default();
        if let Some(ring) = self.buffer.as_mut() {
            ring.clear();
        }
    }
}
