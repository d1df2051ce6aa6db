//! Link state machine
//!
//! A [`Link`] is the connection between the local application and its peers
//! for one named instance. It owns an ordered set of [`Channel`]s and a boxed
//! [`Transport`], and is advanced by explicit, non-blocking calls:
//!
//! ```text
//! new ─► add_channel* ─► connect ─► process* ─► set_operational ─► process* ─► disconnect
//!                          ▲                                                      │
//!                          └──────────────────────────────────────────────────────┘
//! ```
//!
//! All transport events go through [`Link::on_event`], which updates link and
//! channel state first and only then runs the owner's event handler. A
//! transport-reported failure moves the link to `Aborted`; nothing is retried
//! internally and an aborted link has to be disconnected before it can connect
//! again.

use crate::channel::{Channel, ChannelSpec, UpdateOutcome};
use crate::config::LinkConfig;
use crate::error::{Result, SyncError, TransportFault};
use crate::transport::{ChannelDescriptor, InboundEvent, SessionHandle, Transport};
use crate::types::{ChannelId, ConnectionState, ErrorCode, Sample, SendBufferInfo};
use tracing::{debug, error, info, trace, warn};

/// Event delivered to the owner after internal state was updated
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkEvent {
    LinkStateChanged {
        state: ConnectionState,
        error: Option<TransportFault>,
    },
    ChannelStateChanged {
        channel: ChannelId,
        state: ConnectionState,
        error: Option<TransportFault>,
    },
    /// A received value was stored (single slot or ring)
    ChannelUpdated { channel: ChannelId, latency_us: i64 },
    ChannelPublished {
        channel: ChannelId,
        send_buffer: SendBufferInfo,
    },
    ChannelDelivered {
        channel: ChannelId,
        send_buffer: SendBufferInfo,
    },
    /// A buffered channel dropped a sample because its ring was full
    BufferOverflow { channel: ChannelId, overflow_count: u64 },
}

/// Owner callback for link events
pub type EventHandler = Box<dyn FnMut(&LinkEvent) + Send>;

/// Connection to the peers of one named instance
pub struct Link {
    instance_name: String,
    alias: Option<String>,
    state: ConnectionState,
    last_error: Option<TransportFault>,
    channels: Vec<Channel>,
    transport: Box<dyn Transport>,
    session: Option<SessionHandle>,
    connected_once: bool,
    handler: Option<EventHandler>,
}

impl std::fmt::Debug for Link {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Link")
            .field("instance_name", &self.instance_name)
            .field("alias", &self.alias)
            .field("state", &self.state)
            .field("last_error", &self.last_error)
            .field("channels", &self.channels)
            .field("session", &self.session)
            .finish_non_exhaustive()
    }
}

impl Link {
    /// Create a disconnected link with no channels
    pub fn new(instance_name: impl Into<String>, transport: Box<dyn Transport>) -> Self {
        Self {
            instance_name: instance_name.into(),
            alias: None,
            state: ConnectionState::Disconnected,
            last_error: None,
            channels: Vec::new(),
            transport,
            session: None,
            connected_once: false,
            handler: None,
        }
    }

    /// Build a link and its channels from configuration
    pub fn from_config(config: &LinkConfig, transport: Box<dyn Transport>) -> Result<Self> {
        config.validate()?;

        let mut link = Self::new(config.instance_name.clone(), transport);
        link.alias = config.alias.clone();
        for channel in &config.channels {
            link.add_channel(channel.to_spec())?;
        }
        Ok(link)
    }

    /// Set a user-facing alias
    pub fn with_alias(mut self, alias: impl Into<String>) -> Self {
        self.alias = Some(alias.into());
        self
    }

    /// Install the owner's event handler, replacing any previous one
    pub fn set_event_handler(&mut self, handler: EventHandler) {
        self.handler = Some(handler);
    }

    /// Add a channel; only possible while no session is open
    pub fn add_channel(&mut self, spec: ChannelSpec) -> Result<ChannelId> {
        if self.session.is_some() {
            return Err(SyncError::BadState {
                operation: "add channel",
                state: self.state,
            });
        }
        if self.channels.iter().any(|c| c.name() == spec.name) {
            return Err(SyncError::Config(format!(
                "channel '{}' already exists in link '{}'",
                spec.name, self.instance_name
            )));
        }

        let id = ChannelId::new(self.channels.len());
        self.channels.push(Channel::new(id, spec)?);
        Ok(id)
    }

    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    pub fn alias(&self) -> Option<&str> {
        self.alias.as_deref()
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Last fault reported by the transport for the link itself
    pub fn last_error(&self) -> Option<&TransportFault> {
        self.last_error.as_ref()
    }

    pub fn is_session_open(&self) -> bool {
        self.session.is_some()
    }

    /// Current nettime in microseconds
    pub fn nettime(&self) -> i32 {
        self.transport.nettime()
    }

    /// True when the peer dropped an established connection
    ///
    /// The session is still open and has to be released with
    /// [`Link::disconnect`] before connecting again.
    pub fn lost_connection(&self) -> bool {
        self.session.is_some()
            && self.connected_once
            && self.state == ConnectionState::Disconnected
    }

    /// Resolve a channel name to its id
    pub fn channel_id(&self, name: &str) -> Result<ChannelId> {
        self.channels
            .iter()
            .find(|c| c.name() == name)
            .map(Channel::id)
            .ok_or_else(|| SyncError::NotFound(format!("channel '{}'", name)))
    }

    pub fn channel(&self, id: ChannelId) -> Result<&Channel> {
        self.channels
            .get(id.index())
            .ok_or_else(|| SyncError::NotFound(format!("channel {}", id)))
    }

    pub fn channel_mut(&mut self, id: ChannelId) -> Result<&mut Channel> {
        self.channels
            .get_mut(id.index())
            .ok_or_else(|| SyncError::NotFound(format!("channel {}", id)))
    }

    /// All channels in registration order
    pub fn channels(&self) -> &[Channel] {
        &self.channels
    }

    /// Register the link and its channels with the transport
    ///
    /// The link becomes `Connected` once the transport acknowledges the
    /// registration with a `LinkStateChanged` event.
    pub fn connect(&mut self) -> Result<()> {
        if self.state != ConnectionState::Disconnected || self.session.is_some() {
            return Err(SyncError::BadState {
                operation: "connect",
                state: self.state,
            });
        }

        for channel in &mut self.channels {
            channel.prepare_connect();
        }
        self.last_error = None;
        self.connected_once = false;

        let descriptors: Vec<ChannelDescriptor> = self
            .channels
            .iter()
            .map(|c| ChannelDescriptor {
                id: c.id(),
                name: c.name().to_string(),
                byte_size: c.byte_size(),
                direction: c.direction(),
            })
            .collect();

        match self.transport.register(&self.instance_name, &descriptors) {
            Ok(session) => {
                info!(
                    "Link {} registered {} channel(s) as {}",
                    self.instance_name,
                    descriptors.len(),
                    session
                );
                self.session = Some(session);
                Ok(())
            }
            Err(fault) => Err(self.abort(fault)),
        }
    }

    /// Ask the transport to promote the link; only valid from `Connected`
    pub fn set_operational(&mut self) -> Result<()> {
        let session = match self.session {
            Some(session) if self.state == ConnectionState::Connected => session,
            _ => {
                return Err(SyncError::BadState {
                    operation: "set operational",
                    state: self.state,
                })
            }
        };

        debug!("Link {} requesting operational", self.instance_name);
        self.transport
            .set_operational(session)
            .map_err(|fault| self.abort(fault))
    }

    /// Release the session; every channel reverts to `Disconnected`
    ///
    /// Faults stay readable through [`Link::last_error`] until the next
    /// connect.
    pub fn disconnect(&mut self) -> Result<()> {
        if self.state == ConnectionState::Disconnected && self.session.is_none() {
            return Err(SyncError::BadState {
                operation: "disconnect",
                state: self.state,
            });
        }

        if let Some(session) = self.session.take() {
            self.transport.deregister(session);
        }
        for channel in &mut self.channels {
            channel.reset();
        }
        self.connected_once = false;

        info!("Link {} disconnected (was {})", self.instance_name, self.state);
        self.state = ConnectionState::Disconnected;
        self.emit(LinkEvent::LinkStateChanged {
            state: ConnectionState::Disconnected,
            error: None,
        });
        Ok(())
    }

    /// Poll the transport and dispatch every queued event
    ///
    /// All events are dispatched even if some fail; the first failure is
    /// returned afterwards. Returns the number of events handled.
    pub fn process(&mut self) -> Result<usize> {
        let Some(session) = self.session else {
            return Ok(0);
        };

        let events = self.transport.poll(session);
        let count = events.len();
        let mut first_error = None;
        for event in events {
            if let Err(err) = self.on_event(event) {
                warn!("Link {}: {}", self.instance_name, err);
                first_error.get_or_insert(err);
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(count),
        }
    }

    /// Apply one transport event, then notify the owner
    pub fn on_event(&mut self, event: InboundEvent) -> Result<()> {
        trace!("Link {} event: {:?}", self.instance_name, event);
        match event {
            InboundEvent::LinkStateChanged { state, error } => {
                self.on_link_state(state, error);
                Ok(())
            }
            InboundEvent::ChannelStateChanged {
                channel,
                state,
                error,
            } => self.on_channel_state(channel, state, error),
            InboundEvent::ChannelUpdated {
                channel,
                bytes,
                send_nettime,
            } => self.on_channel_updated(channel, bytes, send_nettime),
            InboundEvent::ChannelPublishAck {
                channel,
                send_buffer,
            } => {
                self.channel_mut(channel)?
                    .record_send_buffer(send_buffer, false);
                self.emit(LinkEvent::ChannelPublished {
                    channel,
                    send_buffer,
                });
                Ok(())
            }
            InboundEvent::ChannelDeliveredAck {
                channel,
                send_buffer,
            } => {
                self.channel_mut(channel)?
                    .record_send_buffer(send_buffer, true);
                self.emit(LinkEvent::ChannelDelivered {
                    channel,
                    send_buffer,
                });
                Ok(())
            }
        }
    }

    /// Publish a new value on a channel
    pub fn publish(&mut self, id: ChannelId, bytes: &[u8]) -> Result<()> {
        self.channel(id)?.check_publish(bytes)?;
        let session = match self.session {
            Some(session) if self.state.is_connected() => session,
            _ => {
                return Err(SyncError::NotReady(format!(
                    "link '{}' is {}",
                    self.instance_name, self.state
                )))
            }
        };

        if let Err(fault) = self.transport.send(session, id, bytes) {
            return Err(self.abort(fault));
        }
        self.channel_mut(id)?.record_published(bytes)
    }

    /// Take the oldest buffered sample of a channel
    pub fn try_pop(&mut self, id: ChannelId) -> Result<Sample> {
        self.channel_mut(id)?.try_pop()
    }

    fn on_link_state(&mut self, state: ConnectionState, error: Option<TransportFault>) {
        use ConnectionState::*;

        let previous = self.state;
        match (previous, state) {
            (Aborted, _) if state != Aborted => {
                warn!(
                    "Link {} ignoring {} while aborted",
                    self.instance_name, state
                );
                return;
            }
            (_, Aborted) => {
                let fault = error.clone().unwrap_or_else(|| {
                    TransportFault::new(ErrorCode::System, "link aborted by transport")
                });
                error!("Link {} aborted: {}", self.instance_name, fault);
                self.last_error = Some(fault);
                self.state = Aborted;
            }
            (Disconnected, Connected) => {
                self.state = Connected;
                self.connected_once = true;
            }
            (Operational, Connected) => {
                self.state = Connected;
                for channel in &mut self.channels {
                    if channel.state() == Operational {
                        let _ = channel.transition(Connected, None);
                    }
                }
            }
            (Connected, Operational) => {
                self.state = Operational;
                for channel in &mut self.channels {
                    if channel.state() == Connected {
                        let _ = channel.set_operational();
                    }
                }
            }
            (Connected | Operational, Disconnected) => {
                warn!("Link {} lost its connection", self.instance_name);
                self.state = Disconnected;
                for channel in &mut self.channels {
                    channel.reset();
                }
            }
            (from, to) if from == to => return,
            (from, to) => {
                warn!(
                    "Link {} ignoring transition {} -> {}",
                    self.instance_name, from, to
                );
                return;
            }
        }

        if state != Aborted {
            if let Some(fault) = &error {
                self.last_error = Some(fault.clone());
            }
            info!("Link {} {} -> {}", self.instance_name, previous, state);
        }
        self.emit(LinkEvent::LinkStateChanged { state, error });
    }

    fn on_channel_state(
        &mut self,
        id: ChannelId,
        state: ConnectionState,
        error: Option<TransportFault>,
    ) -> Result<()> {
        let link_state = self.state;
        let instance_name = &self.instance_name;
        let channel = self
            .channels
            .get_mut(id.index())
            .ok_or_else(|| SyncError::NotFound(format!("channel {}", id)))?;

        let changed = if state == ConnectionState::Operational {
            // channels are promoted top-down only
            if link_state != ConnectionState::Operational {
                warn!(
                    "Link {} ignoring operational for channel '{}' while link is {}",
                    instance_name,
                    channel.name(),
                    link_state
                );
                return Ok(());
            }
            channel.set_operational().is_ok()
        } else {
            match channel.transition(state, error.clone()) {
                Ok(changed) => changed,
                Err(err) => {
                    warn!("Link {} channel '{}': {}", instance_name, channel.name(), err);
                    return Ok(());
                }
            }
        };

        if changed {
            if state == ConnectionState::Aborted {
                error!(
                    "Link {} channel '{}' aborted: {:?}",
                    instance_name,
                    channel.name(),
                    channel.last_error()
                );
            } else {
                debug!(
                    "Link {} channel '{}' -> {}",
                    instance_name,
                    channel.name(),
                    state
                );
            }
            self.emit(LinkEvent::ChannelStateChanged {
                channel: id,
                state,
                error,
            });
        }
        Ok(())
    }

    fn on_channel_updated(&mut self, id: ChannelId, bytes: Vec<u8>, send_nettime: i32) -> Result<()> {
        let now = self.transport.nettime();
        let instance_name = &self.instance_name;
        let channel = self
            .channels
            .get_mut(id.index())
            .ok_or_else(|| SyncError::NotFound(format!("channel {}", id)))?;

        if !channel.state().is_connected() {
            debug!(
                "Link {} dropping update for channel '{}' while {}",
                instance_name,
                channel.name(),
                channel.state()
            );
            return Ok(());
        }

        let event = match channel.apply_update(bytes, send_nettime, now)? {
            UpdateOutcome::Replaced { latency_us } | UpdateOutcome::Buffered { latency_us, .. } => {
                LinkEvent::ChannelUpdated {
                    channel: id,
                    latency_us,
                }
            }
            UpdateOutcome::Overflow { overflow_count } => {
                warn!(
                    "Link {} channel '{}' buffer overflow ({} dropped)",
                    instance_name,
                    channel.name(),
                    overflow_count
                );
                LinkEvent::BufferOverflow {
                    channel: id,
                    overflow_count,
                }
            }
        };
        self.emit(event);
        Ok(())
    }

    /// Move to `Aborted` after a failed transport call
    fn abort(&mut self, fault: TransportFault) -> SyncError {
        error!("Link {} aborted: {}", self.instance_name, fault);
        self.state = ConnectionState::Aborted;
        self.last_error = Some(fault.clone());
        self.emit(LinkEvent::LinkStateChanged {
            state: ConnectionState::Aborted,
            error: Some(fault.clone()),
        });
        SyncError::TransportAborted(fault)
    }

    fn emit(&mut self, event: LinkEvent) {
        if let Some(handler) = self.handler.as_mut() {
            handler(&event);
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            self.transport.deregister(session);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockPeer, MockTransport, TransportResult};
    use crate::ErrorKind;
    use crossbeam_channel::unbounded;

    fn link_with(specs: Vec<ChannelSpec>) -> (Link, MockPeer, Vec<ChannelId>) {
        let (transport, peer) = MockTransport::new();
        let mut link = Link::new("BufferFub_0", Box::new(transport));
        let ids = specs
            .into_iter()
            .map(|spec| link.add_channel(spec).unwrap())
            .collect();
        (link, peer, ids)
    }

    fn connected(specs: Vec<ChannelSpec>) -> (Link, MockPeer, Vec<ChannelId>) {
        let (mut link, peer, ids) = link_with(specs);
        link.connect().unwrap();
        link.process().unwrap();
        (link, peer, ids)
    }

    #[test]
    fn test_publish_before_connect_not_ready() {
        let (mut link, peer, ids) = link_with(vec![ChannelSpec::publish("setup", 8)]);
        let setup = ids[0];

        let err = link.publish(setup, &[1u8; 8]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotReady);

        link.connect().unwrap();
        // nothing is connected until the acknowledgement is processed
        assert_eq!(link.state(), ConnectionState::Disconnected);
        link.process().unwrap();
        assert_eq!(link.state(), ConnectionState::Connected);
        assert_eq!(link.channel(setup).unwrap().state(), ConnectionState::Connected);

        link.publish(setup, &[1u8; 8]).unwrap();
        let sent = peer.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].bytes, vec![1u8; 8]);
        assert_eq!(link.channel(setup).unwrap().value(), &[1u8; 8]);
    }

    #[test]
    fn test_wrong_size_publish_keeps_state() {
        let (mut link, peer, ids) = connected(vec![ChannelSpec::publish("setup", 8)]);
        let err = link.publish(ids[0], &[0u8; 10]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadDatasetSize);
        assert_eq!(link.state(), ConnectionState::Connected);
        assert_eq!(link.channel(ids[0]).unwrap().state(), ConnectionState::Connected);
        assert!(peer.sent().is_empty());
    }

    #[test]
    fn test_publish_on_subscribe_only_not_allowed() {
        let (mut link, _peer, ids) = connected(vec![ChannelSpec::subscribe("sample", 4)]);
        let err = link.publish(ids[0], &[0u8; 4]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotAllowed);
    }

    #[test]
    fn test_connect_twice_is_bad_state() {
        let (mut link, _peer, _) = connected(vec![]);
        assert_eq!(link.connect().unwrap_err().kind(), ErrorKind::BadState);
    }

    #[test]
    fn test_set_operational_requires_connected() {
        let (mut link, _peer, _) = link_with(vec![ChannelSpec::publish("setup", 8)]);
        assert_eq!(link.set_operational().unwrap_err().kind(), ErrorKind::BadState);
    }

    #[test]
    fn test_operational_cascades_before_handler() {
        let (mut link, _peer, ids) = connected(vec![
            ChannelSpec::publish("setup", 8),
            ChannelSpec::subscribe("sample", 4),
        ]);

        let (tx, rx) = unbounded();
        link.set_event_handler(Box::new(move |event| {
            let _ = tx.send(event.clone());
        }));

        link.set_operational().unwrap();
        link.process().unwrap();

        assert_eq!(link.state(), ConnectionState::Operational);
        for id in &ids {
            assert_eq!(link.channel(*id).unwrap().state(), ConnectionState::Operational);
        }
        let events: Vec<LinkEvent> = rx.try_iter().collect();
        assert_eq!(
            events,
            vec![LinkEvent::LinkStateChanged {
                state: ConnectionState::Operational,
                error: None
            }]
        );
    }

    #[test]
    fn test_channel_operational_event_needs_operational_link() {
        let (mut link, _peer, ids) = connected(vec![ChannelSpec::publish("setup", 8)]);
        link.on_event(InboundEvent::ChannelStateChanged {
            channel: ids[0],
            state: ConnectionState::Operational,
            error: None,
        })
        .unwrap();
        assert_eq!(link.channel(ids[0]).unwrap().state(), ConnectionState::Connected);
    }

    #[test]
    fn test_disconnect_resets_operational_channels() {
        let (mut link, peer, ids) = connected(vec![
            ChannelSpec::publish("setup", 8),
            ChannelSpec::both("cmd", 1),
        ]);
        link.set_operational().unwrap();
        link.process().unwrap();

        link.disconnect().unwrap();
        assert_eq!(link.state(), ConnectionState::Disconnected);
        for id in &ids {
            assert_eq!(
                link.channel(*id).unwrap().state(),
                ConnectionState::Disconnected
            );
        }
        assert!(!link.is_session_open());
        assert_eq!(peer.deregistrations(), 1);
        assert_eq!(link.disconnect().unwrap_err().kind(), ErrorKind::BadState);
    }

    #[test]
    fn test_reconnect_after_disconnect() {
        let (mut link, peer, ids) = connected(vec![ChannelSpec::publish("setup", 8)]);
        link.disconnect().unwrap();
        link.connect().unwrap();
        link.process().unwrap();
        assert_eq!(link.state(), ConnectionState::Connected);
        assert_eq!(link.channel(ids[0]).unwrap().state(), ConnectionState::Connected);
        assert_eq!(peer.registrations().len(), 2);
    }

    #[test]
    fn test_abort_requires_disconnect() {
        let (mut link, peer, _) = connected(vec![ChannelSpec::publish("setup", 8)]);
        peer.abort_link(ErrorCode::ServerShutdown, "server went down");
        link.process().unwrap();

        assert_eq!(link.state(), ConnectionState::Aborted);
        let fault = link.last_error().unwrap();
        assert_eq!(fault.code, ErrorCode::ServerShutdown);
        assert_eq!(fault.reason, "server went down");

        assert_eq!(link.connect().unwrap_err().kind(), ErrorKind::BadState);
        link.disconnect().unwrap();
        assert!(link.last_error().is_some());
        link.connect().unwrap();
        assert!(link.last_error().is_none());
    }

    #[test]
    fn test_failed_send_aborts_link() {
        let (mut link, peer, ids) = connected(vec![ChannelSpec::publish("setup", 8)]);
        peer.fail_next_send(TransportFault::new(ErrorCode::SystemSocket, "broken pipe"));

        let err = link.publish(ids[0], &[0u8; 8]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportAborted);
        assert_eq!(link.state(), ConnectionState::Aborted);
        assert_eq!(link.channel(ids[0]).unwrap().value(), &[0u8; 8]);
        assert_eq!(link.channel(ids[0]).unwrap().published_count(), 0);
    }

    #[test]
    fn test_failed_register_aborts_link() {
        let (mut link, peer, _) = link_with(vec![ChannelSpec::publish("setup", 8)]);
        peer.fail_next_register(TransportFault::new(ErrorCode::Timeout, "no server"));

        let err = link.connect().unwrap_err();
        assert_eq!(err.code(), ErrorCode::Timeout);
        assert_eq!(link.state(), ConnectionState::Aborted);
        assert!(!link.is_session_open());
        link.disconnect().unwrap();
        assert_eq!(link.state(), ConnectionState::Disconnected);
    }

    #[test]
    fn test_buffered_updates_and_overflow() {
        let (mut link, peer, ids) =
            connected(vec![ChannelSpec::subscribe("bufferedSample", 2).buffered(4)]);
        let sample = ids[0];

        let (tx, rx) = unbounded();
        link.set_event_handler(Box::new(move |event| {
            let _ = tx.send(event.clone());
        }));

        for i in 0..4u8 {
            peer.update(sample, vec![i, 0]);
        }
        // overflow is reported but never fails the cycle
        assert_eq!(link.process().unwrap(), 4);

        let ch = link.channel(sample).unwrap();
        assert_eq!(ch.pending_count(), 3);
        assert_eq!(ch.overflow_count(), 1);
        assert_eq!(ch.state(), ConnectionState::Connected);
        assert!(rx
            .try_iter()
            .any(|e| e == LinkEvent::BufferOverflow { channel: sample, overflow_count: 1 }));

        assert_eq!(link.try_pop(sample).unwrap().bytes, vec![0, 0]);
        assert_eq!(link.try_pop(sample).unwrap().bytes, vec![1, 0]);
        assert_eq!(link.try_pop(sample).unwrap().bytes, vec![2, 0]);
        assert_eq!(link.try_pop(sample).unwrap_err().kind(), ErrorKind::Empty);
    }

    #[test]
    fn test_update_records_latency() {
        let (mut link, peer, ids) = connected(vec![ChannelSpec::subscribe("sample", 4)]);
        peer.set_nettime(10_400);
        peer.update_at(ids[0], vec![9, 9, 9, 9], 10_000);
        link.process().unwrap();

        let ch = link.channel(ids[0]).unwrap();
        assert_eq!(ch.value(), &[9, 9, 9, 9]);
        assert_eq!(ch.nettime(), 10_000);
        assert_eq!(ch.latency().last_latency_us, 400);
    }

    #[test]
    fn test_wrong_size_update_fails_process_but_not_others() {
        let (mut link, peer, ids) = connected(vec![
            ChannelSpec::subscribe("a", 4),
            ChannelSpec::subscribe("b", 4),
        ]);
        peer.update(ids[0], vec![1, 2]);
        peer.update(ids[1], vec![1, 2, 3, 4]);

        let err = link.process().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadDatasetSize);
        assert_eq!(link.channel(ids[0]).unwrap().value(), &[0, 0, 0, 0]);
        assert_eq!(link.channel(ids[1]).unwrap().value(), &[1, 2, 3, 4]);
    }

    #[test]
    fn test_send_buffer_acks() {
        let (mut link, _peer, ids) = connected(vec![ChannelSpec::publish("setup", 8)]);
        link.publish(ids[0], &[3u8; 8]).unwrap();
        link.process().unwrap();

        let ch = link.channel(ids[0]).unwrap();
        assert_eq!(ch.delivered_count(), 1);
        assert_eq!(ch.send_buffer().used, 0);
        assert!(ch.send_buffer().size > 0);
    }

    #[test]
    fn test_remote_disconnect_is_lost_connection() {
        let (mut link, peer, ids) = connected(vec![ChannelSpec::publish("setup", 8)]);
        assert!(!link.lost_connection());

        peer.inject(InboundEvent::LinkStateChanged {
            state: ConnectionState::Disconnected,
            error: None,
        });
        link.process().unwrap();
        assert!(link.lost_connection());
        assert_eq!(
            link.channel(ids[0]).unwrap().state(),
            ConnectionState::Disconnected
        );
        link.disconnect().unwrap();
        assert!(!link.lost_connection());
    }

    #[test]
    fn test_channel_lookup_and_add_rules() {
        let (mut link, _peer, ids) = link_with(vec![ChannelSpec::publish("setup", 8)]);
        assert_eq!(link.channel_id("setup").unwrap(), ids[0]);
        assert_eq!(
            link.channel_id("missing").unwrap_err().kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            link.add_channel(ChannelSpec::publish("setup", 4))
                .unwrap_err()
                .kind(),
            ErrorKind::Config
        );

        link.connect().unwrap();
        assert_eq!(
            link.add_channel(ChannelSpec::publish("late", 4))
                .unwrap_err()
                .kind(),
            ErrorKind::BadState
        );
    }

    #[test]
    fn test_drop_deregisters_session() {
        let (link, peer, _) = connected(vec![]);
        drop(link);
        assert_eq!(peer.deregistrations(), 1);
    }

    // Tests against a scripted transport with call expectations

    mockall::mock! {
        pub Scripted {}
        impl Transport for Scripted {
            fn register(
                &mut self,
                link_name: &str,
                channels: &[ChannelDescriptor],
            ) -> TransportResult<SessionHandle>;
            fn set_operational(&mut self, session: SessionHandle) -> TransportResult<()>;
            fn send(
                &mut self,
                session: SessionHandle,
                channel: ChannelId,
                bytes: &[u8],
            ) -> TransportResult<()>;
            fn poll(&mut self, session: SessionHandle) -> Vec<InboundEvent>;
            fn deregister(&mut self, session: SessionHandle);
            fn nettime(&self) -> i32;
        }
    }

    #[test]
    fn test_registration_order_and_teardown() {
        let mut transport = MockScripted::new();
        transport
            .expect_register()
            .withf(|name: &str, channels: &[ChannelDescriptor]| {
                let names: Vec<&str> = channels.iter().map(|c| c.name.as_str()).collect();
                name == "BufferFub_0"
                    && names == ["bufferedSample", "setup", "cmdSendBurst"]
                    && channels.iter().enumerate().all(|(i, c)| c.id.index() == i)
            })
            .times(1)
            .returning(|_, _| Ok(SessionHandle(7)));
        transport
            .expect_deregister()
            .withf(|session: &SessionHandle| *session == SessionHandle(7))
            .times(1)
            .return_const(());

        let mut link = Link::new("BufferFub_0", Box::new(transport));
        link.add_channel(ChannelSpec::subscribe("bufferedSample", 4).buffered_default())
            .unwrap();
        link.add_channel(ChannelSpec::publish("setup", 8)).unwrap();
        link.add_channel(ChannelSpec::publish("cmdSendBurst", 1)).unwrap();

        link.connect().unwrap();
        link.disconnect().unwrap();
    }

    #[test]
    fn test_failed_promotion_aborts_link() {
        let mut transport = MockScripted::new();
        transport
            .expect_register()
            .returning(|_, _| Ok(SessionHandle(1)));
        transport.expect_poll().times(1).returning(|_| {
            vec![InboundEvent::LinkStateChanged {
                state: ConnectionState::Connected,
                error: None,
            }]
        });
        transport.expect_set_operational().times(1).returning(|_| {
            Err(TransportFault::new(ErrorCode::NotAllowed, "promotion refused"))
        });
        transport.expect_send().never();
        transport.expect_deregister().times(1).return_const(());

        let mut link = Link::new("BufferFub_0", Box::new(transport));
        link.connect().unwrap();
        link.process().unwrap();

        let err = link.set_operational().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::TransportAborted);
        assert_eq!(link.state(), ConnectionState::Aborted);
        assert_eq!(link.last_error().unwrap().reason, "promotion refused");
    }
}
