use std::fmt;

use serde::{Deserialize, Serialize};

pub use mesh_transport::{Device, DeviceId, Reachability};

/// Overall session state. Exactly one per coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionState {
    /// The local adapter is off; nothing can happen until it comes back.
    AdapterDisabled,
    /// Adapter on, not discovering, no connection.
    Idle,
    /// Looking for peers; connections may be requested.
    Discovering,
    /// At least one live connection.
    Connected,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::AdapterDisabled => write!(f, "ADAPTER_DISABLED"),
            SessionState::Idle => write!(f, "IDLE"),
            SessionState::Discovering => write!(f, "DISCOVERING"),
            SessionState::Connected => write!(f, "CONNECTED"),
        }
    }
}

/// Where an outbound payload goes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SendTarget {
    /// One device (host → attendee, or attendee → host).
    Device(DeviceId),
    /// Every connected device.
    Broadcast,
}

impl fmt::Display for SendTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendTarget::Device(id) => write!(f, "{id}"),
            SendTarget::Broadcast => write!(f, "broadcast"),
        }
    }
}

impl From<DeviceId> for SendTarget {
    fn from(id: DeviceId) -> Self {
        SendTarget::Device(id)
    }
}

/// Immutable view of the session, emitted on every transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    /// Known devices in insertion order.
    pub devices: Vec<Device>,
    /// Devices with a live connection, in connection order.
    pub connected: Vec<DeviceId>,
    /// Most recent transport failure, if the transition was forced by one.
    pub last_error: Option<String>,
}

impl SessionSnapshot {
    pub fn active_connections(&self) -> usize {
        self.connected.len()
    }
}

/// Per-target outcome of one send.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Sequence number assigned to the message.
    pub sequence: u64,
    /// Targets whose channel accepted the frame.
    pub delivered: Vec<DeviceId>,
    /// Targets whose write failed, with the failure. Connections whose
    /// stream failed were torn down.
    pub failed: Vec<(DeviceId, String)>,
}

impl DeliveryReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn failed_targets(&self) -> impl Iterator<Item = &DeviceId> {
        self.failed.iter().map(|(id, _)| id)
    }
}
