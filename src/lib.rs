//! # exsync: Dataset Synchronization Middleware
//!
//! Synchronizes fixed-size datasets between a cyclic control task and its
//! peer processes, with explicit connection lifecycle tracking and
//! loss-tolerant buffering.
//!
//! ## Architecture
//!
//! - **Link**: named connection owning an ordered set of channels and a
//!   transport; two-level state machine (link and per channel)
//! - **Channel**: one fixed-size dataset; buffered subscriptions queue samples
//!   in a bounded ring instead of a single slot
//! - **Driver**: runs a link from a periodic task with enable/start inputs,
//!   publish-on-change and clean teardown after aborts
//! - **Log distribution**: per-module distributors that buffer messages until
//!   a shared filter config arrives from the log server
//! - **Transport**: abstract capability the link is written against, with an
//!   in-memory implementation for tests and demos
//!
//! Nothing in the core blocks or spawns threads; every component advances on
//! an explicit call.
//!
//! ## Example
//!
//! ```ignore
//! use exsync::{
//!     channel::ChannelSpec,
//!     driver::CyclicDriver,
//!     link::Link,
//!     transport::MockTransport,
//! };
//!
//! let (transport, peer) = MockTransport::new();
//! let mut link = Link::new("BufferFub_0", Box::new(transport));
//! let sample = link.add_channel(ChannelSpec::subscribe("bufferedSample", 4).buffered(20))?;
//! let setup = link.add_channel(ChannelSpec::publish("setup", 8))?;
//!
//! let mut driver = CyclicDriver::new(link);
//! loop {
//!     let status = driver.cycle(true, true);
//!     driver.image_mut().set(setup, &next_setup())?;
//!     let buffer = driver.update_buffered(sample, true)?;
//!     if status.aborted {
//!         break;
//!     }
//!     std::thread::sleep(std::time::Duration::from_millis(10));
//! }
//! ```

pub mod channel;
pub mod config;
pub mod driver;
pub mod error;
pub mod link;
pub mod log;
pub mod logging;
pub mod ring;
pub mod transport;
pub mod types;

// Re-export commonly used types
pub use channel::{Channel, ChannelSpec};
pub use config::SyncConfig;
pub use driver::{BufferStatus, CyclicDriver, DriverState, DriverStatus, ProcessImage};
pub use error::{ErrorKind, Result, ResultExt, SyncError, TransportFault};
pub use link::{Link, LinkEvent};
pub use log::{ConfigDistributor, LogFilterConfig, LogLevel, LogServer, LogTypeMask};
pub use ring::RingBuffer;
pub use transport::{InboundEvent, Transport};
pub use types::{ChannelId, ConnectionState, DatasetBuffer, Direction, ErrorCode, Sample};
