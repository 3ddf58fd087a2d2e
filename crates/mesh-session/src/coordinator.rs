//! Session coordinator: the session state machine.
//!
//! Owns the session state, the peer directory, the live connections and the
//! router. Handlers never touch the adapter: anything that needs it is
//! returned as a [`SessionEffect`] for the control loop to execute. Every
//! observable change is published as a [`SessionSnapshot`].
use mesh_transport::{ChannelEvent, ConnectionId, TransportError, TransportEvent};
use tokio::sync::{broadcast, mpsc};

use crate::connection::{Connection, ConnectionTable};
use crate::directory::PeerDirectory;
use crate::error::SessionError;
use crate::message::ContentMessage;
use crate::router::{DeliveryOutcome, MessageRouter, PendingDelivery};
use crate::runtime::effect::SessionEffect;
use crate::types::{Device, DeviceId, SendTarget, SessionSnapshot, SessionState};

pub struct SessionCoordinator {
    state: SessionState,
    directory: PeerDirectory,
    connections: ConnectionTable,
    router: MessageRouter,
    snapshots: broadcast::Sender<SessionSnapshot>,
    /// Handed to every channel we open; the control loop drains the other end.
    channel_events: mpsc::Sender<ChannelEvent>,
    last_error: Option<String>,
}

impl SessionCoordinator {
    pub fn new(
        router: MessageRouter,
        snapshots: broadcast::Sender<SessionSnapshot>,
        channel_events: mpsc::Sender<ChannelEvent>,
    ) -> Self {
        Self {
            state: SessionState::AdapterDisabled,
            directory: PeerDirectory::new(),
            connections: ConnectionTable::new(),
            router,
            snapshots,
            channel_events,
            last_error: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn local_id(&self) -> &DeviceId {
        self.router.local_id()
    }

    pub fn subscribe_messages(&self) -> broadcast::Receiver<ContentMessage> {
        self.router.subscribe()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            devices: self.directory.snapshot(),
            connected: self.connections.devices(),
            last_error: self.last_error.clone(),
        }
    }

    // ── Transport events ─────────────────────────────────────────────

    pub fn handle_transport_event(&mut self, event: TransportEvent) -> Vec<SessionEffect> {
        match event {
            TransportEvent::AdapterEnabled => {
                if self.state == SessionState::AdapterDisabled {
                    self.last_error = None;
                    self.enter(SessionState::Idle);
                    self.emit();
                } else {
                    tracing::debug!("adapter enabled while {}, ignored", self.state);
                }
                Vec::new()
            }

            TransportEvent::AdapterDisabled => {
                if self.state != SessionState::AdapterDisabled {
                    self.teardown_connections();
                    self.enter(SessionState::AdapterDisabled);
                    self.emit();
                }
                // The adapter is gone: nothing left to stop or dissolve.
                Vec::new()
            }

            TransportEvent::PeersChanged(devices) => {
                if self.state == SessionState::AdapterDisabled {
                    tracing::debug!("peer list while adapter disabled, ignored");
                    return Vec::new();
                }
                if self.directory.apply_peer_list(devices) {
                    tracing::debug!("peer directory now holds {} device(s)", self.directory.len());
                    self.emit();
                }
                Vec::new()
            }

            TransportEvent::Connected { device, channel } => {
                if matches!(
                    self.state,
                    SessionState::AdapterDisabled | SessionState::Idle
                ) {
                    tracing::warn!(
                        "refusing connection from {device} while {}; channel closed",
                        self.state
                    );
                    drop(channel);
                    return Vec::new();
                }

                self.remember(&device, channel.remote_name());
                let handle = channel.open(self.channel_events.clone());
                tracing::info!("{}: connected to {device}", handle.id());
                if let Some(replaced) = self.connections.insert(Connection::new(device.clone(), handle)) {
                    replaced.teardown();
                }
                self.directory.pin(&device);
                self.last_error = None;

                let mut effects = Vec::new();
                if self.state == SessionState::Discovering {
                    effects.push(SessionEffect::StopDiscovery);
                    self.enter(SessionState::Connected);
                }
                self.emit();
                effects
            }

            TransportEvent::Disconnected { device } => {
                match self.connections.get(&device).map(Connection::id) {
                    Some(id) => self.lose_connection(id, format!("connection to {device} lost")),
                    // A dial that never completed.
                    None => self.dial_failed(format!("connection to {device} failed")),
                }
            }
        }
    }

    // ── Channel events ───────────────────────────────────────────────

    pub fn handle_channel_event(&mut self, event: ChannelEvent) -> Vec<SessionEffect> {
        match event {
            ChannelEvent::Frame {
                connection,
                device,
                data,
            } => {
                if self.connections.by_id(connection).is_none() {
                    tracing::trace!("{connection}: frame after teardown, dropped");
                    return Vec::new();
                }
                match self.router.dispatch(&device, &data) {
                    Ok(message) => {
                        tracing::debug!(
                            "{connection}: message #{} from {}",
                            message.sequence,
                            message.sender
                        );
                    }
                    Err(e) => tracing::warn!("{connection}: dropping frame from {device}: {e}"),
                }
                Vec::new()
            }

            ChannelEvent::Closed {
                connection,
                device,
                error,
            } => {
                if self.connections.by_id(connection).is_none() {
                    return Vec::new();
                }
                let reason = match error {
                    Some(e) => format!("connection to {device} failed: {e}"),
                    None => format!("{device} closed the connection"),
                };
                self.lose_connection(connection, reason)
            }
        }
    }

    // ── Operations ───────────────────────────────────────────────────

    /// Validate a discovery request. The caller starts discovery on the
    /// adapter and reports back with [`discovery_started`](Self::discovery_started).
    pub fn check_start_discovery(&self) -> Result<(), SessionError> {
        self.require("start_discovery", &[SessionState::Idle])
    }

    pub fn discovery_started(&mut self) {
        self.last_error = None;
        self.enter(SessionState::Discovering);
        self.emit();
    }

    pub fn stop_discovery(&mut self) -> Result<Vec<SessionEffect>, SessionError> {
        self.require("stop_discovery", &[SessionState::Discovering])?;
        self.enter(SessionState::Idle);
        self.emit();
        Ok(vec![SessionEffect::StopDiscovery])
    }

    /// Validate a connection request. Success only means the adapter may be
    /// asked; the state changes when the transport reports the connection.
    pub fn check_connect(&self, device: &DeviceId) -> Result<(), SessionError> {
        self.require("connect_to_peer", &[SessionState::Discovering])?;
        if !self.directory.contains(device) {
            return Err(SessionError::UnknownPeer(device.clone()));
        }
        Ok(())
    }

    /// The adapter refused to start a connection `check_connect` allowed.
    pub fn connect_failed(
        &mut self,
        device: &DeviceId,
        error: &TransportError,
    ) -> Vec<SessionEffect> {
        self.dial_failed(format!("connection to {device} failed: {error}"))
    }

    /// Dissolve the session. A no-op unless discovering or connected.
    pub fn end_session(&mut self) -> Vec<SessionEffect> {
        let effects = match self.state {
            SessionState::Discovering => {
                vec![SessionEffect::StopDiscovery, SessionEffect::TeardownGroup]
            }
            SessionState::Connected => {
                self.teardown_connections();
                vec![SessionEffect::TeardownGroup]
            }
            SessionState::Idle | SessionState::AdapterDisabled => {
                tracing::debug!("end_session while {}, nothing to end", self.state);
                return Vec::new();
            }
        };
        self.enter(SessionState::Idle);
        self.emit();
        effects
    }

    /// Queue `payload` for `target`. The returned delivery settles off-loop;
    /// feed its outcome back through [`apply_delivery`](Self::apply_delivery).
    pub fn send(
        &mut self,
        payload: Vec<u8>,
        target: &SendTarget,
    ) -> Result<PendingDelivery, SessionError> {
        if self.state != SessionState::Connected {
            return Err(SessionError::NotConnected {
                target: target.to_string(),
            });
        }
        self.router.route(payload, target, &self.connections)
    }

    /// Tear down every connection whose write failed.
    pub fn apply_delivery(&mut self, outcome: &DeliveryOutcome) -> Vec<SessionEffect> {
        let mut effects = Vec::new();
        for id in &outcome.failed_connections {
            let Some(device) = self.connections.by_id(*id).map(|c| c.device().clone()) else {
                continue;
            };
            let reason = outcome
                .report
                .failed
                .iter()
                .find(|(failed, _)| *failed == device)
                .map(|(_, e)| e.clone())
                .unwrap_or_else(|| format!("write to {device} failed"));
            tracing::warn!("message #{} not delivered to {device}: {reason}", outcome.report.sequence);
            effects.extend(self.lose_connection(*id, reason));
        }
        effects
    }

    pub fn remove_peer(&mut self, device: &DeviceId) -> Result<Device, SessionError> {
        let removed = self.directory.remove(device)?;
        tracing::debug!("removed {device} from the peer directory");
        self.emit();
        Ok(removed)
    }

    /// Surface an adapter failure to observers.
    pub fn record_transport_error(&mut self, error: &TransportError) {
        tracing::warn!("transport error while {}: {error}", self.state);
        self.last_error = Some(error.to_string());
        self.emit();
    }

    /// Close everything before the control loop exits.
    pub fn shutdown(&mut self) -> Vec<SessionEffect> {
        let effects = match self.state {
            SessionState::Discovering => vec![SessionEffect::StopDiscovery],
            SessionState::Connected => vec![SessionEffect::TeardownGroup],
            SessionState::Idle | SessionState::AdapterDisabled => Vec::new(),
        };
        self.teardown_connections();
        effects
    }

    // ── Internals ────────────────────────────────────────────────────

    fn require(&self, operation: &'static str, valid: &[SessionState]) -> Result<(), SessionError> {
        if valid.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::InvalidState {
                operation,
                state: self.state,
            })
        }
    }

    fn enter(&mut self, next: SessionState) {
        if self.state == next {
            return;
        }
        if self.state == SessionState::Connected {
            self.router.reset_sequence();
        }
        tracing::info!("session: {} -> {next}", self.state);
        self.state = next;
    }

    fn emit(&self) {
        // No observer is fine: snapshots are subscribe-from-now.
        let _ = self.snapshots.send(self.snapshot());
    }

    /// Make sure a connected device is in the directory and reachable.
    /// A name announced over the connection wins over the discovered one.
    fn remember(&mut self, device: &DeviceId, announced: Option<&str>) {
        let name = match announced {
            Some(name) => name.to_string(),
            None => self
                .directory
                .get(device)
                .map(|d| d.name.clone())
                .unwrap_or_else(|| device.to_string()),
        };
        self.directory.upsert(Device::reachable(device.clone(), name));
    }

    fn teardown_connections(&mut self) {
        for connection in self.connections.drain() {
            self.directory.unpin(connection.device());
            connection.teardown();
        }
    }

    /// A connection attempt failed: stop discovering and fall back to Idle.
    fn dial_failed(&mut self, reason: String) -> Vec<SessionEffect> {
        tracing::warn!("{reason}");
        self.last_error = Some(reason);

        let mut effects = Vec::new();
        if self.state == SessionState::Discovering {
            effects.push(SessionEffect::StopDiscovery);
            self.enter(SessionState::Idle);
        }
        self.emit();
        effects
    }

    fn lose_connection(&mut self, id: ConnectionId, reason: String) -> Vec<SessionEffect> {
        let Some(connection) = self.connections.remove_by_id(id) else {
            return Vec::new();
        };
        let device = connection.device().clone();
        connection.teardown();
        self.directory.unpin(&device);
        self.directory.mark_unreachable(&device);
        tracing::warn!("{id}: {reason}");
        self.last_error = Some(reason);

        let mut effects = Vec::new();
        if self.state == SessionState::Connected && self.connections.is_empty() {
            effects.push(SessionEffect::TeardownGroup);
            self.enter(SessionState::Idle);
        }
        self.emit();
        effects
    }
}
