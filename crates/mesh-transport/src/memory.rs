//! In-process adapter driven by the caller.
//!
//! Nothing happens on its own: the owner flips the adapter on and off,
//! reports peer lists and completes connections, which makes every
//! transport-side transition explicit in tests and demos. Connections run
//! over `tokio::io::duplex` pipes, so channel framing is exercised for real.
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::io::{duplex, DuplexStream};
use tokio::sync::mpsc;

use crate::channel::ByteStream;
use crate::{
    ConnectionChannel, Device, DeviceId, TransportAdapter, TransportConfig, TransportError,
    TransportEvent,
};

/// Buffer size of each duplex pipe.
const PIPE_CAPACITY: usize = 64 * 1024;

#[derive(Default)]
struct MemoryState {
    enabled: bool,
    discovering: bool,
    connect_requests: Vec<DeviceId>,
    discovery_failure: Option<String>,
    fail_connects: bool,
    teardowns: usize,
}

struct Inner {
    local_id: DeviceId,
    config: TransportConfig,
    events: mpsc::Sender<TransportEvent>,
    state: Mutex<MemoryState>,
}

/// Scriptable [`TransportAdapter`]. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct MemoryAdapter {
    inner: Arc<Inner>,
}

impl MemoryAdapter {
    /// Create an adapter (initially disabled) and its event stream.
    pub fn new(
        local_id: DeviceId,
        config: TransportConfig,
    ) -> (Self, mpsc::Receiver<TransportEvent>) {
        let (events, events_rx) = mpsc::channel(config.event_buffer);
        let adapter = Self {
            inner: Arc::new(Inner {
                local_id,
                config,
                events,
                state: Mutex::new(MemoryState::default()),
            }),
        };
        (adapter, events_rx)
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking test thread must not wedge the other side.
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn emit(&self, event: TransportEvent) -> Result<(), TransportError> {
        self.inner
            .events
            .send(event)
            .await
            .map_err(|_| TransportError::Shutdown)
    }

    /// Turn the adapter on or off and report it.
    pub async fn set_enabled(&self, enabled: bool) -> Result<(), TransportError> {
        {
            let mut state = self.state();
            state.enabled = enabled;
            if !enabled {
                state.discovering = false;
            }
        }
        let event = if enabled {
            TransportEvent::AdapterEnabled
        } else {
            TransportEvent::AdapterDisabled
        };
        self.emit(event).await
    }

    /// Report a complete peer list, as discovery would.
    pub async fn report_peers(&self, devices: Vec<Device>) -> Result<(), TransportError> {
        self.emit(TransportEvent::PeersChanged(devices)).await
    }

    /// Complete a connection to `device` over a fresh pipe.
    ///
    /// Returns the remote end of the pipe, which speaks raw frames.
    pub async fn establish(&self, device: &DeviceId) -> Result<DuplexStream, TransportError> {
        let (local, remote) = duplex(PIPE_CAPACITY);
        self.establish_with(device, local).await?;
        Ok(remote)
    }

    /// Complete a connection to `device` over a caller-provided stream.
    pub async fn establish_with<S: ByteStream>(
        &self,
        device: &DeviceId,
        stream: S,
    ) -> Result<(), TransportError> {
        let channel = ConnectionChannel::new(device.clone(), stream, &self.inner.config);
        self.hand_over(channel).await
    }

    /// Connect two in-process adapters to each other. Each side learns the
    /// other's configured device name.
    pub async fn link(a: &MemoryAdapter, b: &MemoryAdapter) -> Result<(), TransportError> {
        let (a_end, b_end) = duplex(PIPE_CAPACITY);
        a.hand_over(
            ConnectionChannel::new(b.local_id(), a_end, &a.inner.config)
                .named(b.inner.config.name()),
        )
        .await?;
        b.hand_over(
            ConnectionChannel::new(a.local_id(), b_end, &b.inner.config)
                .named(a.inner.config.name()),
        )
        .await
    }

    async fn hand_over(&self, channel: ConnectionChannel) -> Result<(), TransportError> {
        self.emit(TransportEvent::Connected {
            device: channel.remote().clone(),
            channel,
        })
        .await
    }

    /// Report that the connection to `device` was lost.
    pub async fn disconnect(&self, device: &DeviceId) -> Result<(), TransportError> {
        self.emit(TransportEvent::Disconnected {
            device: device.clone(),
        })
        .await
    }

    /// Make the next `discover_peers` call fail.
    pub fn fail_discovery(&self, reason: impl Into<String>) {
        self.state().discovery_failure = Some(reason.into());
    }

    /// Make `connect` calls fail until reset.
    pub fn fail_connects(&self, fail: bool) {
        self.state().fail_connects = fail;
    }

    /// Devices passed to `connect`, in call order.
    pub fn connect_requests(&self) -> Vec<DeviceId> {
        self.state().connect_requests.clone()
    }

    pub fn is_discovering(&self) -> bool {
        self.state().discovering
    }

    /// Number of `teardown_group` calls so far.
    pub fn teardown_count(&self) -> usize {
        self.state().teardowns
    }
}

#[async_trait::async_trait]
impl TransportAdapter for MemoryAdapter {
    fn local_id(&self) -> DeviceId {
        self.inner.local_id.clone()
    }

    fn max_frame_size(&self) -> usize {
        self.inner.config.max_frame_len()
    }

    async fn discover_peers(&self) -> Result<(), TransportError> {
        let mut state = self.state();
        if !state.enabled {
            return Err(TransportError::AdapterUnavailable);
        }
        if let Some(reason) = state.discovery_failure.take() {
            return Err(TransportError::Discovery(reason));
        }
        state.discovering = true;
        Ok(())
    }

    async fn stop_discovery(&self) -> Result<(), TransportError> {
        self.state().discovering = false;
        Ok(())
    }

    async fn connect(&self, device: &DeviceId) -> Result<(), TransportError> {
        let mut state = self.state();
        if !state.enabled {
            return Err(TransportError::AdapterUnavailable);
        }
        if state.fail_connects {
            return Err(TransportError::Connect {
                device: device.clone(),
                source: anyhow::anyhow!("memory adapter: connect refused"),
            });
        }
        state.connect_requests.push(device.clone());
        Ok(())
    }

    async fn teardown_group(&self) -> Result<(), TransportError> {
        let mut state = self.state();
        state.teardowns += 1;
        state.discovering = false;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn adapter() -> (MemoryAdapter, mpsc::Receiver<TransportEvent>) {
        MemoryAdapter::new(DeviceId::new("local"), TransportConfig::new())
    }

    #[tokio::test]
    async fn discovery_requires_enabled_adapter() {
        let (adapter, mut events) = adapter();
        assert!(matches!(
            adapter.discover_peers().await,
            Err(TransportError::AdapterUnavailable)
        ));

        adapter.set_enabled(true).await.unwrap();
        assert!(matches!(events.recv().await, Some(TransportEvent::AdapterEnabled)));
        adapter.discover_peers().await.unwrap();
        assert!(adapter.is_discovering());
    }

    #[tokio::test]
    async fn scripted_discovery_failure_is_one_shot() {
        let (adapter, _events) = adapter();
        adapter.set_enabled(true).await.unwrap();
        adapter.fail_discovery("busy");
        assert!(matches!(
            adapter.discover_peers().await,
            Err(TransportError::Discovery(reason)) if reason == "busy"
        ));
        assert!(adapter.discover_peers().await.is_ok());
    }

    #[tokio::test]
    async fn connect_records_request_without_connecting() {
        let (adapter, mut events) = adapter();
        adapter.set_enabled(true).await.unwrap();
        let _ = events.recv().await;

        adapter.connect(&DeviceId::new("D1")).await.unwrap();
        assert_eq!(adapter.connect_requests(), vec![DeviceId::new("D1")]);
        assert!(events.try_recv().is_err());
    }

    #[test]
    fn frame_limit_follows_config() {
        let (adapter, _events) =
            MemoryAdapter::new(DeviceId::new("local"), TransportConfig::new().max_frame_size(64));
        assert_eq!(adapter.max_frame_size(), 64);
    }

    #[tokio::test]
    async fn link_connects_both_sides() {
        let (a, mut a_events) = MemoryAdapter::new(DeviceId::new("A"), TransportConfig::new());
        let (b, mut b_events) = MemoryAdapter::new(
            DeviceId::new("B"),
            TransportConfig::new().device_name("Bob's phone"),
        );
        MemoryAdapter::link(&a, &b).await.unwrap();

        match a_events.recv().await.unwrap() {
            TransportEvent::Connected { device, channel } => {
                assert_eq!(device, DeviceId::new("B"));
                assert_eq!(channel.remote(), &DeviceId::new("B"));
                assert_eq!(channel.remote_name(), Some("Bob's phone"));
            }
            other => panic!("expected Connected, got {other:?}"),
        }
        match b_events.recv().await.unwrap() {
            TransportEvent::Connected { device, .. } => assert_eq!(device, DeviceId::new("A")),
            other => panic!("expected Connected, got {other:?}"),
        }
    }
}
