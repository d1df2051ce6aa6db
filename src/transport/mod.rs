//! Transport trait for the link layer
//!
//! The link layer is written against this abstract capability rather than a
//! concrete message queue or socket. A transport registers a link and its
//! channels, sends fixed-size byte buffers, and hands back inbound events
//! when polled.
//!
//! # Addressing
//!
//! Channels are described to the transport in registration order. The
//! position of a channel in that list is its [`ChannelId`], and every inbound
//! channel event refers to the channel by that id. Name lookups happen once,
//! when the owner resolves a channel, never per event.
//!
//! # Components
//!
//! - [`Transport`] - The capability consumed by [`crate::link::Link`]
//! - [`InboundEvent`] - Tagged events returned from [`Transport::poll`]
//! - [`TransportStats`] - Send statistics kept by transport implementations
//! - [`mock::MockTransport`] - In-memory transport for tests and demos

pub mod mock;

pub use mock::{MockPeer, MockTransport, SentFrame};

use crate::error::TransportFault;
use crate::types::{ChannelId, ConnectionState, Direction, SendBufferInfo};

/// Result of a transport call
pub type TransportResult<T> = std::result::Result<T, TransportFault>;

/// Opaque handle for a registered link session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionHandle(pub u64);

impl std::fmt::Display for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Channel description passed to the transport at registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelDescriptor {
    /// Registration index
    pub id: ChannelId,
    /// Channel name, unique within the link
    pub name: String,
    /// Fixed payload size in bytes
    pub byte_size: usize,
    /// Data direction seen from the local side
    pub direction: Direction,
}

/// Event delivered by the transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    /// New data arrived for a subscribed channel
    ChannelUpdated {
        channel: ChannelId,
        bytes: Vec<u8>,
        /// Nettime (µs) at which the peer sent the value
        send_nettime: i32,
    },
    /// Outbound value was accepted by the local server
    ChannelPublishAck {
        channel: ChannelId,
        send_buffer: SendBufferInfo,
    },
    /// Outbound value was delivered to the remote side
    ChannelDeliveredAck {
        channel: ChannelId,
        send_buffer: SendBufferInfo,
    },
    /// Connection state of a single channel changed
    ChannelStateChanged {
        channel: ChannelId,
        state: ConnectionState,
        error: Option<TransportFault>,
    },
    /// Connection state of the whole link changed
    LinkStateChanged {
        state: ConnectionState,
        error: Option<TransportFault>,
    },
}

impl InboundEvent {
    /// The channel this event refers to, if it is a channel-level event
    pub fn channel(&self) -> Option<ChannelId> {
        match self {
            InboundEvent::ChannelUpdated { channel, .. }
            | InboundEvent::ChannelPublishAck { channel, .. }
            | InboundEvent::ChannelDeliveredAck { channel, .. }
            | InboundEvent::ChannelStateChanged { channel, .. } => Some(*channel),
            InboundEvent::LinkStateChanged { .. } => None,
        }
    }
}

/// Unified interface for link transports
///
/// Implementations must be `Send` so a link can be moved to the thread that
/// runs the cyclic task. No method may block: `poll` returns whatever events
/// are queued and timeouts/retries belong to the implementation.
///
/// # Example
///
/// ```ignore
/// fn register_all(transport: &mut dyn Transport, channels: &[ChannelDescriptor]) {
///     let session = transport.register("BufferFub_0", channels)?;
///     for event in transport.poll(session) {
///         println!("{:?}", event);
///     }
/// }
/// ```
pub trait Transport: Send {
    /// Register a link and its channels, in registration order
    fn register(
        &mut self,
        link_name: &str,
        channels: &[ChannelDescriptor],
    ) -> TransportResult<SessionHandle>;

    /// Request promotion of the link to operational
    ///
    /// The promotion takes effect when the transport later reports
    /// `LinkStateChanged { state: Operational }`.
    fn set_operational(&mut self, session: SessionHandle) -> TransportResult<()>;

    /// Send a payload on a channel
    fn send(
        &mut self,
        session: SessionHandle,
        channel: ChannelId,
        bytes: &[u8],
    ) -> TransportResult<()>;

    /// Drain queued inbound events
    fn poll(&mut self, session: SessionHandle) -> Vec<InboundEvent>;

    /// Release a session and everything registered with it
    fn deregister(&mut self, session: SessionHandle);

    /// Current nettime in microseconds
    fn nettime(&self) -> i32;
}

/// Statistics for transport send operations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Total number of successful sends
    pub successful_sends: u64,
    /// Total number of failed sends
    pub failed_sends: u64,
    /// Total bytes sent
    pub total_bytes_sent: u64,
    /// Total inbound events handed out by `poll`
    pub events_polled: u64,
}

impl TransportStats {
    /// Record a successful send
    pub fn record_send(&mut self, bytes: usize) {
        self.successful_sends += 1;
        self.total_bytes_sent += bytes as u64;
    }

    /// Record a failed send
    pub fn record_failure(&mut self) {
        self.failed_sends += 1;
    }

    /// Calculate success rate as percentage
    pub fn success_rate(&self) -> f64 {
        let total = self.successful_sends + self.failed_sends;
        if total == 0 {
            100.0
        } else {
            (self.successful_sends as f64 / total as f64) * 100.0
        }
    }

    /// Reset all statistics
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
