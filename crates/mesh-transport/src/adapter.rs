use crate::{ConnectionChannel, Device, DeviceId, TransportError};

/// Events the transport pushes to its single consumer.
#[derive(Debug)]
pub enum TransportEvent {
    /// The local radio/adapter became usable.
    AdapterEnabled,
    /// The local radio/adapter went away.
    AdapterDisabled,
    /// Discovery produced a new complete peer list (ordered).
    PeersChanged(Vec<Device>),
    /// A connection was established (outbound connect or inbound accept).
    Connected {
        device: DeviceId,
        channel: ConnectionChannel,
    },
    /// The transport lost the connection to `device`.
    Disconnected { device: DeviceId },
}

/// Boundary to the platform's local-discovery and socket primitives.
///
/// Production: [`TcpAdapter`](crate::TcpAdapter).
/// Tests and demos: [`MemoryAdapter`](crate::MemoryAdapter).
///
/// Every method only starts work; outcomes arrive later as
/// [`TransportEvent`]s on the stream returned by the adapter's constructor.
#[async_trait::async_trait]
pub trait TransportAdapter: Send + Sync {
    /// Identity of this device.
    fn local_id(&self) -> DeviceId;

    /// Largest frame payload the channels of this adapter accept.
    fn max_frame_size(&self) -> usize;

    /// Start peer discovery.
    async fn discover_peers(&self) -> Result<(), TransportError>;

    /// Stop peer discovery.
    async fn stop_discovery(&self) -> Result<(), TransportError>;

    /// Request a connection to `device`. Completion is reported with
    /// [`TransportEvent::Connected`].
    async fn connect(&self, device: &DeviceId) -> Result<(), TransportError>;

    /// Dissolve the group at transport level.
    async fn teardown_group(&self) -> Result<(), TransportError>;
}
