/// Default maximum frame payload (1 MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Configuration for transport adapters and the channels they open.
///
/// All fields have sensible defaults. Use the builder pattern:
///
/// ```rust
/// use mesh_transport::TransportConfig;
///
/// let config = TransportConfig::new()
///     .max_frame_size(64 * 1024)
///     .event_buffer(128);
/// ```
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum accepted frame payload in bytes.
    pub(crate) max_frame_size: usize,
    /// Channel buffer size for transport events.
    pub(crate) event_buffer: usize,
    /// Size of each read from the underlying stream.
    pub(crate) read_chunk: usize,
    /// Human readable name announced to other devices.
    pub(crate) device_name: String,
    /// Statically known peers (`id=addr`) used as the discovery source by
    /// the TCP adapter.
    pub(crate) static_peers: Vec<(crate::DeviceId, std::net::SocketAddr)>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportConfig {
    /// Create a new config with defaults.
    ///
    /// If the `MESH_MAX_FRAME_SIZE` environment variable is set to a number,
    /// it is used as the maximum frame size. Override with
    /// [`.max_frame_size()`](Self::max_frame_size).
    pub fn new() -> Self {
        let max_frame_size = std::env::var("MESH_MAX_FRAME_SIZE")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MAX_FRAME_SIZE);

        Self {
            max_frame_size,
            event_buffer: 256,
            read_chunk: 8 * 1024,
            device_name: format!("device-{:04x}", rand::random::<u16>()),
            static_peers: Vec::new(),
        }
    }

    /// Set maximum frame payload size (default: 1 MB).
    pub fn max_frame_size(mut self, bytes: usize) -> Self {
        self.max_frame_size = bytes;
        self
    }

    /// Set the channel buffer size for transport events (default: 256).
    pub fn event_buffer(mut self, capacity: usize) -> Self {
        self.event_buffer = capacity;
        self
    }

    /// Set the read size used by channel reader tasks (default: 8 KB).
    pub fn read_chunk(mut self, bytes: usize) -> Self {
        self.read_chunk = bytes;
        self
    }

    /// Set the name announced to other devices (default: random `device-xxxx`).
    pub fn device_name(mut self, name: impl Into<String>) -> Self {
        self.device_name = name.into();
        self
    }

    /// Add a statically known peer, reported by discovery.
    pub fn static_peer(mut self, id: crate::DeviceId, addr: std::net::SocketAddr) -> Self {
        self.static_peers.push((id, addr));
        self
    }

    /// Check that sizes are usable.
    pub fn validate(&self) -> Result<(), crate::TransportError> {
        if self.max_frame_size == 0 || self.max_frame_size > u32::MAX as usize {
            return Err(crate::TransportError::Config(format!(
                "max_frame_size must be in 1..={}, got {}",
                u32::MAX,
                self.max_frame_size
            )));
        }
        if self.event_buffer == 0 || self.read_chunk == 0 {
            return Err(crate::TransportError::Config(
                "event_buffer and read_chunk must be non-zero".into(),
            ));
        }
        Ok(())
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_size
    }

    pub fn name(&self) -> &str {
        &self.device_name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_overrides_defaults() {
        let config = TransportConfig::new().max_frame_size(16).event_buffer(4).read_chunk(2);
        assert_eq!(config.max_frame_len(), 16);
        assert_eq!(config.event_buffer, 4);
        assert_eq!(config.read_chunk, 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn device_name_is_kept_verbatim() {
        let config = TransportConfig::new().device_name("Alice's tablet");
        assert_eq!(config.name(), "Alice's tablet");
    }

    #[test]
    fn zero_frame_size_is_rejected() {
        let config = TransportConfig::new().max_frame_size(0);
        assert!(config.validate().is_err());
    }
}
