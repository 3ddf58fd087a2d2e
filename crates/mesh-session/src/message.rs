use serde::{Deserialize, Serialize};

use crate::error::SessionError;
use crate::types::DeviceId;

/// One application message as it travels inside a frame.
///
/// Serialized as MessagePack. The `payload` is opaque: the session layer
/// routes it without looking inside.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentMessage {
    /// Identity of the sending device.
    pub sender: DeviceId,
    /// Monotonic per sender, starting at 1.
    pub sequence: u64,
    /// Application bytes, carried as MessagePack `bin`.
    #[serde(with = "serde_bytes")]
    pub payload: Vec<u8>,
}

impl ContentMessage {
    pub fn new(sender: DeviceId, sequence: u64, payload: Vec<u8>) -> Self {
        Self {
            sender,
            sequence,
            payload,
        }
    }

    /// Serialize to MessagePack bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, SessionError> {
        rmp_serde::to_vec(self).map_err(Into::into)
    }

    /// Deserialize from MessagePack bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, SessionError> {
        rmp_serde::from_slice(data).map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_payload_survives_encoding() {
        let msg = ContentMessage::new(DeviceId::new("D1"), 7, Vec::new());
        let decoded = ContentMessage::from_bytes(&msg.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.sender, DeviceId::new("D1"));
        assert_eq!(decoded.sequence, 7);
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn payload_is_encoded_as_binary() {
        let msg = ContentMessage::new(DeviceId::new("D1"), 1, vec![0xff; 200]);
        let bytes = msg.to_bytes().unwrap();
        // bin 8 header: marker + length byte, then the raw bytes.
        assert!(bytes.windows(2).any(|w| w == [0xc4, 200]));
        assert!(bytes.len() < 220);
        assert_eq!(ContentMessage::from_bytes(&bytes).unwrap(), msg);
    }

    #[test]
    fn garbage_is_a_codec_error() {
        let err = ContentMessage::from_bytes(&[0xc1, 0x00]).unwrap_err();
        assert!(matches!(err, SessionError::Codec(_)));
    }

    #[test]
    fn truncated_message_is_a_codec_error() {
        let bytes = ContentMessage::new(DeviceId::new("D1"), 1, vec![1, 2, 3])
            .to_bytes()
            .unwrap();
        let err = ContentMessage::from_bytes(&bytes[..bytes.len() - 1]).unwrap_err();
        assert!(matches!(err, SessionError::Codec(_)));
    }
}
