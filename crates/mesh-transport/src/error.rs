use crate::DeviceId;

/// Errors returned by the mesh transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind listener: {0}")]
    Bind(#[source] anyhow::Error),

    #[error("connection to {device} failed: {source}")]
    Connect {
        device: DeviceId,
        #[source]
        source: anyhow::Error,
    },

    #[error("write to {device} failed: {source}")]
    Write {
        device: DeviceId,
        #[source]
        source: anyhow::Error,
    },

    #[error("read failed: {0}")]
    Read(#[source] anyhow::Error),

    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },

    #[error("channel to {0} is closed")]
    ChannelClosed(DeviceId),

    #[error("peer discovery failed: {0}")]
    Discovery(String),

    #[error("adapter is disabled")]
    AdapterUnavailable,

    #[error("invalid device id: {0}")]
    InvalidDeviceId(String),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("transport is shut down")]
    Shutdown,
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        TransportError::Read(e.into())
    }
}
