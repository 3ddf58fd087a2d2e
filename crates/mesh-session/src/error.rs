use mesh_transport::{DeviceId, TransportError};

use crate::types::SessionState;

/// Session-level errors.
///
/// Wraps transport errors and adds the session-specific refusals. None of
/// them is fatal: every variant is scoped to one call or one connection.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("{operation} is not valid in state {state:?}")]
    InvalidState {
        operation: &'static str,
        state: SessionState,
    },

    #[error("unknown peer: {0}")]
    UnknownPeer(DeviceId),

    #[error("not connected to {target}")]
    NotConnected { target: String },

    #[error("peer {0} is still referenced by an active connection")]
    PeerInUse(DeviceId),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("message codec error: {0}")]
    Codec(String),

    #[error("message from {peer} claims sender {claimed}")]
    SenderMismatch { peer: DeviceId, claimed: DeviceId },

    #[error("session runtime shut down")]
    Shutdown,
}

impl From<rmp_serde::encode::Error> for SessionError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        SessionError::Codec(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for SessionError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        SessionError::Codec(e.to_string())
    }
}
