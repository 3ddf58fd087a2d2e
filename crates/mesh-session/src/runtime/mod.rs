/// Session runtime: runs the coordinator on a live control loop.
///
/// The runtime owns the transport adapter's event stream and the
/// [`SessionCoordinator`](crate::SessionCoordinator). It exposes a
/// channel-based API so the application never touches channels, frames or
/// session internals.
pub mod effect;
mod executor;
mod r#loop;

use std::sync::Arc;

use mesh_transport::{TransportAdapter, TransportEvent};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::error::SessionError;
use crate::message::ContentMessage;
use crate::types::{DeliveryReport, Device, DeviceId, SendTarget, SessionSnapshot};

// ── Configuration ─────────────────────────────────────────────────────

/// Configuration for the session runtime.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capacity of the command queue (app → runtime).
    pub command_buffer: usize,
    /// Capacity of the queue channel reader tasks feed.
    pub channel_event_buffer: usize,
    /// How many snapshots / messages a slow observer may lag behind.
    pub observer_capacity: usize,
    /// Largest encoded message the router will queue. The adapter's frame
    /// limit caps it.
    pub max_payload_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_buffer: 64,
            channel_event_buffer: 256,
            observer_capacity: 64,
            max_payload_size: mesh_transport::DEFAULT_MAX_FRAME_SIZE,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn command_buffer(mut self, size: usize) -> Self {
        self.command_buffer = size.max(1);
        self
    }

    pub fn channel_event_buffer(mut self, size: usize) -> Self {
        self.channel_event_buffer = size.max(1);
        self
    }

    pub fn observer_capacity(mut self, size: usize) -> Self {
        self.observer_capacity = size.max(1);
        self
    }

    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }
}

type Reply<T> = oneshot::Sender<Result<T, SessionError>>;

// ── Commands (app → runtime) ──────────────────────────────────────────

/// Commands the application sends to the control loop.
pub(crate) enum RuntimeCommand {
    StartDiscovery {
        reply: Reply<()>,
    },
    StopDiscovery {
        reply: Reply<()>,
    },
    ConnectToPeer {
        device: DeviceId,
        reply: Reply<()>,
    },
    EndSession {
        reply: Reply<()>,
    },
    SendMessage {
        payload: Vec<u8>,
        target: SendTarget,
        reply: Reply<DeliveryReport>,
    },
    RemovePeer {
        device: DeviceId,
        reply: Reply<Device>,
    },
    GetSnapshot {
        reply: oneshot::Sender<SessionSnapshot>,
    },
    /// Stop pulling transport events; they stay queued.
    SuspendEvents {
        reply: Reply<()>,
    },
    ResumeEvents {
        reply: Reply<()>,
    },
    /// Graceful shutdown.
    Shutdown,
}

// ── SessionHandle (app-facing API) ───────────────────────────────────

/// Handle to a running session.
///
/// Cheap to clone. Every call is serialized through the control loop, so
/// calls from different tasks never race on session state.
#[derive(Clone)]
pub struct SessionHandle {
    cmd_tx: mpsc::Sender<RuntimeCommand>,
    snapshots: broadcast::Sender<SessionSnapshot>,
    messages: broadcast::Sender<ContentMessage>,
    local_id: DeviceId,
}

impl SessionHandle {
    /// This device's identity.
    pub fn local_id(&self) -> &DeviceId {
        &self.local_id
    }

    /// Snapshots of every transition from now on.
    pub fn observe_session_state(&self) -> broadcast::Receiver<SessionSnapshot> {
        self.snapshots.subscribe()
    }

    /// Inbound messages from now on, in arrival order per connection.
    pub fn observe_messages(&self) -> broadcast::Receiver<ContentMessage> {
        self.messages.subscribe()
    }

    /// Idle → Discovering.
    pub async fn start_discovery(&self) -> Result<(), SessionError> {
        self.request(|reply| RuntimeCommand::StartDiscovery { reply }).await
    }

    /// Discovering → Idle.
    pub async fn stop_discovery(&self) -> Result<(), SessionError> {
        self.request(|reply| RuntimeCommand::StopDiscovery { reply }).await
    }

    /// Ask the transport to connect to a discovered device.
    ///
    /// `Ok` means the request was accepted; the session becomes Connected
    /// once the transport reports the connection.
    pub async fn connect_to_peer(&self, device: DeviceId) -> Result<(), SessionError> {
        self.request(|reply| RuntimeCommand::ConnectToPeer { device, reply })
            .await
    }

    /// Tear the session down and return to Idle.
    pub async fn end_session(&self) -> Result<(), SessionError> {
        self.request(|reply| RuntimeCommand::EndSession { reply }).await
    }

    /// Send `payload` to one device or to every connected device.
    ///
    /// Resolves once every target's writer settled; per-target outcomes are
    /// in the report.
    pub async fn send_message(
        &self,
        payload: Vec<u8>,
        target: impl Into<SendTarget>,
    ) -> Result<DeliveryReport, SessionError> {
        let target = target.into();
        self.request(|reply| RuntimeCommand::SendMessage {
            payload,
            target,
            reply,
        })
        .await
    }

    /// Forget a device. Refused while it has a live connection.
    pub async fn remove_peer(&self, device: DeviceId) -> Result<Device, SessionError> {
        self.request(|reply| RuntimeCommand::RemovePeer { device, reply })
            .await
    }

    /// The current session snapshot.
    pub async fn snapshot(&self) -> Result<SessionSnapshot, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.cmd_tx
            .send(RuntimeCommand::GetSnapshot { reply: tx })
            .await
            .map_err(|_| SessionError::Shutdown)?;
        rx.await.map_err(|_| SessionError::Shutdown)
    }

    /// Stop applying transport events. Queued events are kept, not dropped.
    ///
    /// Events queued before this call are still applied first.
    pub async fn suspend_event_processing(&self) -> Result<(), SessionError> {
        self.request(|reply| RuntimeCommand::SuspendEvents { reply }).await
    }

    /// Resume applying transport events, oldest first.
    pub async fn resume_event_processing(&self) -> Result<(), SessionError> {
        self.request(|reply| RuntimeCommand::ResumeEvents { reply }).await
    }

    /// Graceful shutdown: every connection is closed before the loop exits.
    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(RuntimeCommand::Shutdown).await;
    }

    async fn command(&self, cmd: RuntimeCommand) -> Result<(), SessionError> {
        self.cmd_tx.send(cmd).await.map_err(|_| SessionError::Shutdown)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(Reply<T>) -> RuntimeCommand,
    ) -> Result<T, SessionError> {
        let (tx, rx) = oneshot::channel();
        self.command(build(tx)).await?;
        rx.await.map_err(|_| SessionError::Shutdown)?
    }
}

// ── SessionRuntime ───────────────────────────────────────────────────

/// The session runtime: spawn it and talk to it through the handle.
pub struct SessionRuntime;

impl SessionRuntime {
    /// Start the control loop as a tokio task.
    ///
    /// Takes the adapter and the event stream its constructor returned. The
    /// session starts in `AdapterDisabled` and follows the adapter's events.
    pub fn spawn(
        adapter: Arc<dyn TransportAdapter>,
        events: mpsc::Receiver<TransportEvent>,
        config: SessionConfig,
    ) -> SessionHandle {
        let local_id = adapter.local_id();

        // Command channel (app → runtime)
        let (cmd_tx, cmd_rx) = mpsc::channel::<RuntimeCommand>(config.command_buffer);

        // Observer channels (runtime → app)
        let (snapshots, _) = broadcast::channel(config.observer_capacity);
        let (messages, _) = broadcast::channel(config.observer_capacity);

        tokio::spawn(r#loop::runtime_loop(
            adapter,
            config,
            cmd_rx,
            events,
            snapshots.clone(),
            messages.clone(),
        ));

        SessionHandle {
            cmd_tx,
            snapshots,
            messages,
            local_id,
        }
    }
}
