//! Mock Transport Implementation for Testing
//!
//! This module provides an in-memory transport that can be used to run links
//! and cyclic drivers without a real peer. The test (or demo) side holds a
//! [`MockPeer`] that talks to the [`MockTransport`] over crossbeam channels.
//!
//! # Features
//!
//! - **Auto-acknowledge**: registration, promotion and publishes are
//!   acknowledged the way a healthy server would (enabled by default)
//! - **Event injection**: arbitrary [`InboundEvent`]s, including aborts
//! - **Failure injection**: make the next register/send/promotion fail
//! - **Nettime control**: the peer sets the nettime the transport reports
//!
//! # Example
//!
//! ```ignore
//! use exsync::transport::MockTransport;
//!
//! let (transport, peer) = MockTransport::new();
//! let mut link = Link::new("BufferFub_0", Box::new(transport));
//! let sample = link.add_channel(ChannelSpec::subscribe("bufferedSample", 4))?;
//! link.connect()?;
//! link.process()?;
//!
//! peer.update(sample, vec![1, 0, 0, 0]);
//! link.process()?;
//! ```

use super::{
    ChannelDescriptor, InboundEvent, SessionHandle, Transport, TransportResult, TransportStats,
};
use crate::error::TransportFault;
use crate::types::{ChannelId, ConnectionState, ErrorCode, SendBufferInfo};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;

/// Send buffer slot count reported in acknowledgements
const MOCK_SEND_BUFFER_SIZE: u32 = 32;

/// A payload sent through the mock transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentFrame {
    pub session: SessionHandle,
    pub channel: ChannelId,
    pub bytes: Vec<u8>,
}

/// A registration seen by the mock transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Registration {
    pub session: SessionHandle,
    pub link_name: String,
    pub channels: Vec<ChannelDescriptor>,
}

/// Failure injection requests from the peer
#[derive(Debug, Clone)]
enum MockControl {
    FailNextRegister(TransportFault),
    FailNextSend(TransportFault),
    FailNextOperational(TransportFault),
}

/// State shared between transport and peer
#[derive(Debug)]
struct MockShared {
    auto_ack: AtomicBool,
    nettime: AtomicI32,
    deregistrations: AtomicU64,
}

/// In-memory transport driven by a [`MockPeer`]
pub struct MockTransport {
    shared: Arc<MockShared>,
    inbound_rx: Receiver<InboundEvent>,
    control_rx: Receiver<MockControl>,
    sent_tx: Sender<SentFrame>,
    registration_tx: Sender<Registration>,
    pending: VecDeque<InboundEvent>,
    session: Option<SessionHandle>,
    next_session: u64,
    fail_register: Option<TransportFault>,
    fail_send: Option<TransportFault>,
    fail_operational: Option<TransportFault>,
    stats: TransportStats,
}

/// Test-side handle of a [`MockTransport`]
#[derive(Clone)]
pub struct MockPeer {
    shared: Arc<MockShared>,
    inbound_tx: Sender<InboundEvent>,
    control_tx: Sender<MockControl>,
    sent_rx: Receiver<SentFrame>,
    registration_rx: Receiver<Registration>,
}

impl MockTransport {
    /// Create a transport and the peer handle that controls it
    pub fn new() -> (Self, MockPeer) {
        let (inbound_tx, inbound_rx) = unbounded();
        let (control_tx, control_rx) = unbounded();
        let (sent_tx, sent_rx) = unbounded();
        let (registration_tx, registration_rx) = unbounded();
        let shared = Arc::new(MockShared {
            auto_ack: AtomicBool::new(true),
            nettime: AtomicI32::new(0),
            deregistrations: AtomicU64::new(0),
        });

        let transport = Self {
            shared: shared.clone(),
            inbound_rx,
            control_rx,
            sent_tx,
            registration_tx,
            pending: VecDeque::new(),
            session: None,
            next_session: 1,
            fail_register: None,
            fail_send: None,
            fail_operational: None,
            stats: TransportStats::default(),
        };

        let peer = MockPeer {
            shared,
            inbound_tx,
            control_tx,
            sent_rx,
            registration_rx,
        };

        (transport, peer)
    }

    /// Send statistics
    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    fn auto_ack(&self) -> bool {
        self.shared.auto_ack.load(Ordering::SeqCst)
    }

    /// Apply pending failure-injection requests
    fn process_controls(&mut self) {
        while let Ok(control) = self.control_rx.try_recv() {
            match control {
                MockControl::FailNextRegister(fault) => self.fail_register = Some(fault),
                MockControl::FailNextSend(fault) => self.fail_send = Some(fault),
                MockControl::FailNextOperational(fault) => self.fail_operational = Some(fault),
            }
        }
    }

    fn check_session(&self, session: SessionHandle) -> TransportResult<()> {
        if self.session == Some(session) {
            Ok(())
        } else {
            Err(TransportFault::new(
                ErrorCode::BadLinkHandle,
                format!("{} is not registered", session),
            ))
        }
    }
}

impl Transport for MockTransport {
    fn register(
        &mut self,
        link_name: &str,
        channels: &[ChannelDescriptor],
    ) -> TransportResult<SessionHandle> {
        self.process_controls();
        if let Some(fault) = self.fail_register.take() {
            return Err(fault);
        }
        if let Some(session) = self.session {
            return Err(TransportFault::new(
                ErrorCode::NotAllowed,
                format!("{} is still registered", session),
            ));
        }

        let session = SessionHandle(self.next_session);
        self.next_session += 1;
        self.session = Some(session);
        self.pending.clear();

        let _ = self.registration_tx.send(Registration {
            session,
            link_name: link_name.to_string(),
            channels: channels.to_vec(),
        });

        if self.auto_ack() {
            self.pending.push_back(InboundEvent::LinkStateChanged {
                state: ConnectionState::Connected,
                error: None,
            });
            for descriptor in channels {
                self.pending.push_back(InboundEvent::ChannelStateChanged {
                    channel: descriptor.id,
                    state: ConnectionState::Connected,
                    error: None,
                });
            }
        }

        tracing::debug!("Mock transport registered {} as {}", link_name, session);
        Ok(session)
    }

    fn set_operational(&mut self, session: SessionHandle) -> TransportResult<()> {
        self.process_controls();
        self.check_session(session)?;
        if let Some(fault) = self.fail_operational.take() {
            return Err(fault);
        }

        if self.auto_ack() {
            self.pending.push_back(InboundEvent::LinkStateChanged {
                state: ConnectionState::Operational,
                error: None,
            });
        }
        Ok(())
    }

    fn send(
        &mut self,
        session: SessionHandle,
        channel: ChannelId,
        bytes: &[u8],
    ) -> TransportResult<()> {
        self.process_controls();
        self.check_session(session)?;
        if let Some(fault) = self.fail_send.take() {
            self.stats.record_failure();
            return Err(fault);
        }

        let _ = self.sent_tx.send(SentFrame {
            session,
            channel,
            bytes: bytes.to_vec(),
        });
        self.stats.record_send(bytes.len());

        if self.auto_ack() {
            self.pending.push_back(InboundEvent::ChannelPublishAck {
                channel,
                send_buffer: SendBufferInfo {
                    size: MOCK_SEND_BUFFER_SIZE,
                    free: MOCK_SEND_BUFFER_SIZE - 1,
                    used: 1,
                },
            });
            self.pending.push_back(InboundEvent::ChannelDeliveredAck {
                channel,
                send_buffer: SendBufferInfo {
                    size: MOCK_SEND_BUFFER_SIZE,
                    free: MOCK_SEND_BUFFER_SIZE,
                    used: 0,
                },
            });
        }
        Ok(())
    }

    fn poll(&mut self, session: SessionHandle) -> Vec<InboundEvent> {
        self.process_controls();
        if self.session != Some(session) {
            return Vec::new();
        }

        while let Ok(event) = self.inbound_rx.try_recv() {
            self.pending.push_back(event);
        }
        self.stats.events_polled += self.pending.len() as u64;
        self.pending.drain(..).collect()
    }

    fn deregister(&mut self, session: SessionHandle) {
        if self.session == Some(session) {
            self.session = None;
            self.pending.clear();
            // Events injected for the old session are stale
            while self.inbound_rx.try_recv().is_ok() {}
            self.shared.deregistrations.fetch_add(1, Ordering::SeqCst);
            tracing::debug!("Mock transport deregistered {}", session);
        }
    }

    fn nettime(&self) -> i32 {
        self.shared.nettime.load(Ordering::SeqCst)
    }
}

impl MockPeer {
    /// Enable or disable automatic acknowledgements
    pub fn set_auto_ack(&self, enabled: bool) {
        self.shared.auto_ack.store(enabled, Ordering::SeqCst);
    }

    /// Set the nettime reported by the transport
    pub fn set_nettime(&self, nettime_us: i32) {
        self.shared.nettime.store(nettime_us, Ordering::SeqCst);
    }

    /// Queue an arbitrary inbound event
    pub fn inject(&self, event: InboundEvent) {
        let _ = self.inbound_tx.send(event);
    }

    /// Deliver a new value on a subscribed channel, sent "now"
    pub fn update(&self, channel: ChannelId, bytes: Vec<u8>) {
        let send_nettime = self.shared.nettime.load(Ordering::SeqCst);
        self.update_at(channel, bytes, send_nettime);
    }

    /// Deliver a new value that the producer sent at `send_nettime`
    pub fn update_at(&self, channel: ChannelId, bytes: Vec<u8>, send_nettime: i32) {
        self.inject(InboundEvent::ChannelUpdated {
            channel,
            bytes,
            send_nettime,
        });
    }

    /// Report an unrecoverable link failure
    pub fn abort_link(&self, code: ErrorCode, reason: &str) {
        self.inject(InboundEvent::LinkStateChanged {
            state: ConnectionState::Aborted,
            error: Some(TransportFault::new(code, reason)),
        });
    }

    /// Report an unrecoverable channel failure
    pub fn abort_channel(&self, channel: ChannelId, code: ErrorCode, reason: &str) {
        self.inject(InboundEvent::ChannelStateChanged {
            channel,
            state: ConnectionState::Aborted,
            error: Some(TransportFault::new(code, reason)),
        });
    }

    /// Make the next registration fail
    pub fn fail_next_register(&self, fault: TransportFault) {
        let _ = self.control_tx.send(MockControl::FailNextRegister(fault));
    }

    /// Make the next send fail
    pub fn fail_next_send(&self, fault: TransportFault) {
        let _ = self.control_tx.send(MockControl::FailNextSend(fault));
    }

    /// Make the next promotion request fail
    pub fn fail_next_operational(&self, fault: TransportFault) {
        let _ = self.control_tx.send(MockControl::FailNextOperational(fault));
    }

    /// Drain all frames sent since the last call
    pub fn sent(&self) -> Vec<SentFrame> {
        self.sent_rx.try_iter().collect()
    }

    /// Drain all registrations seen since the last call
    pub fn registrations(&self) -> Vec<Registration> {
        self.registration_rx.try_iter().collect()
    }

    /// Number of sessions released so far
    pub fn deregistrations(&self) -> u64 {
        self.shared.deregistrations.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Direction;

    fn descriptor(index: usize, name: &str) -> ChannelDescriptor {
        ChannelDescriptor {
            id: ChannelId::new(index),
            name: name.to_string(),
            byte_size: 4,
            direction: Direction::Publish,
        }
    }

    #[test]
    fn test_register_auto_acks_in_order() {
        let (mut transport, peer) = MockTransport::new();
        let channels = vec![descriptor(0, "a"), descriptor(1, "b")];
        let session = transport.register("Link_0", &channels).unwrap();

        let events = transport.poll(session);
        assert_eq!(events.len(), 3);
        assert!(matches!(
            events[0],
            InboundEvent::LinkStateChanged {
                state: ConnectionState::Connected,
                ..
            }
        ));
        assert_eq!(events[1].channel(), Some(ChannelId::new(0)));
        assert_eq!(events[2].channel(), Some(ChannelId::new(1)));

        let regs = peer.registrations();
        assert_eq!(regs.len(), 1);
        assert_eq!(regs[0].link_name, "Link_0");
        assert_eq!(regs[0].channels, channels);
    }

    #[test]
    fn test_double_register_rejected() {
        let (mut transport, _peer) = MockTransport::new();
        transport.register("Link_0", &[]).unwrap();
        let fault = transport.register("Link_0", &[]).unwrap_err();
        assert_eq!(fault.code, ErrorCode::NotAllowed);
    }

    #[test]
    fn test_failure_injection() {
        let (mut transport, peer) = MockTransport::new();
        let session = transport.register("Link_0", &[descriptor(0, "a")]).unwrap();

        peer.fail_next_send(TransportFault::new(ErrorCode::SystemSocket, "socket closed"));
        let fault = transport.send(session, ChannelId::new(0), &[1, 2, 3, 4]).unwrap_err();
        assert_eq!(fault.code, ErrorCode::SystemSocket);
        assert_eq!(transport.stats().failed_sends, 1);

        transport.send(session, ChannelId::new(0), &[1, 2, 3, 4]).unwrap();
        assert_eq!(peer.sent().len(), 1);
        assert_eq!(transport.stats().successful_sends, 1);
    }

    #[test]
    fn test_stale_session_gets_nothing() {
        let (mut transport, peer) = MockTransport::new();
        let session = transport.register("Link_0", &[]).unwrap();
        transport.deregister(session);
        peer.update(ChannelId::new(0), vec![0; 4]);

        assert!(transport.poll(session).is_empty());
        assert_eq!(peer.deregistrations(), 1);
        assert!(transport.send(session, ChannelId::new(0), &[0; 4]).is_err());
    }

    #[test]
    fn test_nettime_is_shared() {
        let (transport, peer) = MockTransport::new();
        peer.set_nettime(1_500);
        assert_eq!(transport.nettime(), 1_500);
    }
}
