//! Core data types for exsync
//!
//! This module contains the fundamental data structures shared by the link,
//! channel, driver and transport layers.
//!
//! # Main Types
//!
//! - [`ConnectionState`] - Lifecycle state shared by links and channels
//! - [`Direction`] - Whether a channel is published, subscribed, or both
//! - [`ErrorCode`] - Numeric error codes reported by the transport
//! - [`ChannelId`] - Registration index of a channel within its link
//! - [`DatasetBuffer`] - Fixed-size, length-checked payload storage
//! - [`Sample`] - A received payload together with its send timestamp

use serde::{Deserialize, Serialize};

/// Connection state of a link or a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    /// Not registered with the transport
    #[default]
    Disconnected,
    /// Registration acknowledged, data exchange possible
    Connected,
    /// Promoted for normal cyclic data exchange
    Operational,
    /// Unrecoverable transport failure; requires a full teardown
    Aborted,
}

impl ConnectionState {
    /// True for `Connected` and `Operational`
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected | ConnectionState::Operational)
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "Disconnected"),
            ConnectionState::Connected => write!(f, "Connected"),
            ConnectionState::Operational => write!(f, "Operational"),
            ConnectionState::Aborted => write!(f, "Aborted"),
        }
    }
}

/// Data direction of a channel, seen from the local side
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Local side sends values
    #[default]
    Publish,
    /// Local side receives values
    Subscribe,
    /// Both directions
    Both,
}

impl Direction {
    /// Whether values may be published on this channel
    pub fn can_publish(&self) -> bool {
        matches!(self, Direction::Publish | Direction::Both)
    }

    /// Whether values are received on this channel
    pub fn can_subscribe(&self) -> bool {
        matches!(self, Direction::Subscribe | Direction::Both)
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Publish => write!(f, "publish"),
            Direction::Subscribe => write!(f, "subscribe"),
            Direction::Both => write!(f, "publish+subscribe"),
        }
    }
}

/// Error codes reported by the transport and its peers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u32)]
pub enum ErrorCode {
    Ok = 0,
    NotImplemented = 5000,
    ParameterNull = 5001,
    BadLinkHandle = 5002,
    BadChannelHandle = 5003,
    BadLogHandle = 5004,
    BadSyncHandle = 5005,
    NotAllowed = 5006,
    NotFound = 5007,
    StringFormat = 5008,
    MessageFormat = 5009,
    NoData = 5010,
    BufferOverflow = 5011,
    Timeout = 5012,
    BadDatasetSize = 5013,
    User = 5014,
    System = 5015,
    SystemSocket = 5016,
    SystemSocketUsage = 5017,
    SystemMalloc = 5018,
    SystemLxi = 5019,
    NotReady = 5020,
    ServerShutdown = 5021,
    BadState = 5022,
}

impl ErrorCode {
    /// Numeric value as used on the wire
    pub fn as_u32(self) -> u32 {
        self as u32
    }

    /// Look up a code from its numeric value
    pub fn from_u32(value: u32) -> Option<Self> {
        const ALL: [ErrorCode; 24] = [
            ErrorCode::Ok,
            ErrorCode::NotImplemented,
            ErrorCode::ParameterNull,
            ErrorCode::BadLinkHandle,
            ErrorCode::BadChannelHandle,
            ErrorCode::BadLogHandle,
            ErrorCode::BadSyncHandle,
            ErrorCode::NotAllowed,
            ErrorCode::NotFound,
            ErrorCode::StringFormat,
            ErrorCode::MessageFormat,
            ErrorCode::NoData,
            ErrorCode::BufferOverflow,
            ErrorCode::Timeout,
            ErrorCode::BadDatasetSize,
            ErrorCode::User,
            ErrorCode::System,
            ErrorCode::SystemSocket,
            ErrorCode::SystemSocketUsage,
            ErrorCode::SystemMalloc,
            ErrorCode::SystemLxi,
            ErrorCode::NotReady,
            ErrorCode::ServerShutdown,
            ErrorCode::BadState,
        ];
        ALL.into_iter().find(|code| code.as_u32() == value)
    }

    /// Human-readable description of the code
    pub fn description(&self) -> &'static str {
        match self {
            ErrorCode::Ok => "no error",
            ErrorCode::NotImplemented => "not implemented",
            ErrorCode::ParameterNull => "parameter is null",
            ErrorCode::BadLinkHandle => "bad link handle",
            ErrorCode::BadChannelHandle => "bad channel handle",
            ErrorCode::BadLogHandle => "bad log handle",
            ErrorCode::BadSyncHandle => "bad sync handle",
            ErrorCode::NotAllowed => "not allowed",
            ErrorCode::NotFound => "not found",
            ErrorCode::StringFormat => "bad string format",
            ErrorCode::MessageFormat => "bad message format",
            ErrorCode::NoData => "no data",
            ErrorCode::BufferOverflow => "buffer overflow",
            ErrorCode::Timeout => "timeout",
            ErrorCode::BadDatasetSize => "bad dataset size",
            ErrorCode::User => "user error",
            ErrorCode::System => "system error",
            ErrorCode::SystemSocket => "system socket error",
            ErrorCode::SystemSocketUsage => "system socket usage error",
            ErrorCode::SystemMalloc => "memory allocation failed",
            ErrorCode::SystemLxi => "system lxi error",
            ErrorCode::NotReady => "not ready",
            ErrorCode::ServerShutdown => "server shutdown",
            ErrorCode::BadState => "bad state",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.description())
    }
}

/// Registration index of a channel within its link
///
/// Assigned in registration order when the channel is added to the link and
/// used by the transport to address the channel in inbound events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChannelId(pub(crate) usize);

impl ChannelId {
    /// Create an id from a registration index
    pub const fn new(index: usize) -> Self {
        Self(index)
    }

    /// The registration index
    pub const fn index(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for ChannelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Flow-control bookkeeping for outbound data, reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SendBufferInfo {
    /// Total send buffer slots
    pub size: u32,
    /// Free slots
    pub free: u32,
    /// Used slots
    pub used: u32,
}

/// Fixed-size byte storage for one channel value
///
/// The size is set once at construction. Every write is length checked and a
/// mismatched payload is rejected, never truncated or grown.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DatasetBuffer {
    bytes: Box<[u8]>,
}

impl DatasetBuffer {
    /// Create a zero-filled buffer of `size` bytes
    pub fn new(size: usize) -> Self {
        Self {
            bytes: vec![0u8; size].into_boxed_slice(),
        }
    }

    /// Create a buffer holding a copy of `bytes`
    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self {
            bytes: bytes.into(),
        }
    }

    /// Fixed size in bytes
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    /// True for a zero-sized buffer
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Current contents
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Check that `bytes` fits this buffer exactly
    pub fn check(&self, bytes: &[u8]) -> crate::Result<()> {
        if bytes.len() != self.bytes.len() {
            return Err(crate::SyncError::BadDatasetSize {
                expected: self.bytes.len(),
                actual: bytes.len(),
            });
        }
        Ok(())
    }

    /// Overwrite the contents; fails with `BadDatasetSize` on a size mismatch
    pub fn set(&mut self, bytes: &[u8]) -> crate::Result<()> {
        self.check(bytes)?;
        self.bytes.copy_from_slice(bytes);
        Ok(())
    }

    /// Reset the contents to zero
    pub fn clear(&mut self) {
        self.bytes.fill(0);
    }
}

impl AsRef<[u8]> for DatasetBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

/// A received value together with the peer's nettime at send
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Sample {
    /// Payload, exactly the channel's byte size
    pub bytes: Vec<u8>,
    /// Nettime (µs) at which the producer sent the value
    pub nettime: i32,
}
