//! Mesh session transport layer.
//!
//! Defines the boundary to the platform's local-discovery transport
//! ([`TransportAdapter`] + [`TransportEvent`]) and the per-connection
//! [`ConnectionChannel`] that carries length-prefixed frames.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use mesh_transport::{TcpAdapter, TransportAdapter, TransportConfig, TransportEvent};
//!
//! # async fn example() -> Result<(), mesh_transport::TransportError> {
//! let config = TransportConfig::new().device_name("host");
//! let (adapter, mut events) = TcpAdapter::bind("127.0.0.1:0".parse().unwrap(), config).await?;
//! adapter.discover_peers().await?;
//!
//! while let Some(event) = events.recv().await {
//!     if let TransportEvent::Connected { device, channel } = event {
//!         println!("{device} connected ({})", channel.remote());
//!     }
//! }
//! # Ok(())
//! # }
//! ```

mod adapter;
mod channel;
mod config;
mod error;
mod frame;
pub mod memory;
mod tcp;

pub use adapter::{TransportAdapter, TransportEvent};
pub use channel::{ByteStream, ChannelEvent, ChannelHandle, ConnectionChannel, ConnectionId, WriteAck};
pub use config::{TransportConfig, DEFAULT_MAX_FRAME_SIZE};
pub use error::TransportError;
pub use frame::{FrameCodec, FRAME_HEADER_LEN};
pub use memory::MemoryAdapter;
pub use tcp::TcpAdapter;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable identity of a device in the local mesh (address/name pair as
/// reported by discovery).
///
/// Displayed and parsed as the raw string.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceId({})", self.0)
    }
}

impl FromStr for DeviceId {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.len() > MAX_DEVICE_ID_LEN {
            return Err(TransportError::InvalidDeviceId(s.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

impl From<&str> for DeviceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Longest accepted device identifier, in bytes.
pub const MAX_DEVICE_ID_LEN: usize = 256;

/// Last-known reachability of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Reachability {
    Reachable,
    Unreachable,
    Unknown,
}

/// A discoverable endpoint in the local mesh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    pub id: DeviceId,
    pub name: String,
    pub reachability: Reachability,
}

impl Device {
    /// A device freshly reported by discovery (reachable).
    pub fn reachable(id: impl Into<DeviceId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            reachability: Reachability::Reachable,
        }
    }
}

impl From<String> for DeviceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}
