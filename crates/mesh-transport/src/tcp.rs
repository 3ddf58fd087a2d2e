//! TCP adapter: the group owner listens, attendees dial.
//!
//! Discovery reports the statically configured peers. Both sides open a
//! connection by exchanging one hello frame (JSON `{id, name}`) so each end
//! learns the other's [`DeviceId`] before the channel is handed over.
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::frame::{FrameCodec, FRAME_HEADER_LEN};
use crate::{
    ConnectionChannel, Device, DeviceId, TransportAdapter, TransportConfig, TransportError,
    TransportEvent,
};

/// Upper bound for the hello frame.
const MAX_HELLO_SIZE: usize = 1024;

#[derive(Debug, Serialize, Deserialize)]
struct Hello {
    id: DeviceId,
    name: String,
}

struct TcpInner {
    local_id: DeviceId,
    local_addr: SocketAddr,
    config: TransportConfig,
    events: mpsc::Sender<TransportEvent>,
    discovering: AtomicBool,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for TcpInner {
    fn drop(&mut self) {
        if let Ok(mut task) = self.accept_task.lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

/// [`TransportAdapter`] over plain TCP. Cheap to clone.
#[derive(Clone)]
pub struct TcpAdapter {
    inner: Arc<TcpInner>,
}

impl TcpAdapter {
    /// Bind a listener on `addr` and start accepting.
    ///
    /// The adapter reports itself enabled as soon as the listener is up.
    /// The local [`DeviceId`] is the configured device name.
    pub async fn bind(
        addr: SocketAddr,
        config: TransportConfig,
    ) -> Result<(Self, mpsc::Receiver<TransportEvent>), TransportError> {
        config.validate()?;
        let local_id: DeviceId = config.name().parse()?;

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Bind(e.into()))?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::Bind(e.into()))?;

        let (events, events_rx) = mpsc::channel(config.event_buffer);
        let inner = Arc::new(TcpInner {
            local_id,
            local_addr,
            config,
            events,
            discovering: AtomicBool::new(false),
            accept_task: Mutex::new(None),
        });

        let task = tokio::spawn(accept_loop(listener, Arc::downgrade(&inner)));
        if let Ok(mut slot) = inner.accept_task.lock() {
            *slot = Some(task);
        }

        let _ = inner.events.send(TransportEvent::AdapterEnabled).await;
        tracing::info!("tcp adapter {} listening on {local_addr}", inner.local_id);

        Ok((Self { inner }, events_rx))
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.inner.local_addr
    }

    /// Whether discovery is running.
    pub fn is_discovering(&self) -> bool {
        self.inner.discovering.load(Ordering::Relaxed)
    }

    fn peer_addr(&self, device: &DeviceId) -> Option<SocketAddr> {
        self.inner
            .config
            .static_peers
            .iter()
            .find(|(id, _)| id == device)
            .map(|(_, addr)| *addr)
    }
}

#[async_trait::async_trait]
impl TransportAdapter for TcpAdapter {
    fn local_id(&self) -> DeviceId {
        self.inner.local_id.clone()
    }

    fn max_frame_size(&self) -> usize {
        self.inner.config.max_frame_len()
    }

    async fn discover_peers(&self) -> Result<(), TransportError> {
        self.inner.discovering.store(true, Ordering::Relaxed);
        let devices = self
            .inner
            .config
            .static_peers
            .iter()
            .map(|(id, addr)| Device::reachable(id.clone(), addr.to_string()))
            .collect();
        self.inner
            .events
            .send(TransportEvent::PeersChanged(devices))
            .await
            .map_err(|_| TransportError::Shutdown)
    }

    async fn stop_discovery(&self) -> Result<(), TransportError> {
        self.inner.discovering.store(false, Ordering::Relaxed);
        Ok(())
    }

    async fn connect(&self, device: &DeviceId) -> Result<(), TransportError> {
        let addr = self.peer_addr(device).ok_or_else(|| TransportError::Connect {
            device: device.clone(),
            source: anyhow::anyhow!("no known address"),
        })?;

        let inner = self.inner.clone();
        let device = device.clone();
        tokio::spawn(async move {
            match dial(&inner, &device, addr).await {
                Ok(channel) => {
                    let _ = inner
                        .events
                        .send(TransportEvent::Connected { device, channel })
                        .await;
                }
                Err(e) => {
                    tracing::warn!("connect to {device} at {addr} failed: {e}");
                    let _ = inner.events.send(TransportEvent::Disconnected { device }).await;
                }
            }
        });
        Ok(())
    }

    async fn teardown_group(&self) -> Result<(), TransportError> {
        self.inner.discovering.store(false, Ordering::Relaxed);
        Ok(())
    }
}

async fn accept_loop(listener: TcpListener, inner: std::sync::Weak<TcpInner>) {
    loop {
        let (stream, peer_addr) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                tracing::warn!("accept failed: {e}");
                continue;
            }
        };
        let Some(inner) = inner.upgrade() else { break };

        tokio::spawn(async move {
            match handshake(&inner, stream).await {
                Ok((device, channel)) => {
                    tracing::debug!("accepted {device} from {peer_addr}");
                    let _ = inner
                        .events
                        .send(TransportEvent::Connected { device, channel })
                        .await;
                }
                Err(e) => tracing::warn!("handshake with {peer_addr} failed: {e}"),
            }
        });
    }
}

async fn dial(
    inner: &TcpInner,
    device: &DeviceId,
    addr: SocketAddr,
) -> Result<ConnectionChannel, TransportError> {
    let stream = TcpStream::connect(addr)
        .await
        .map_err(|e| TransportError::Connect {
            device: device.clone(),
            source: e.into(),
        })?;
    let (remote, channel) = handshake(inner, stream).await?;
    if &remote != device {
        return Err(TransportError::Connect {
            device: device.clone(),
            source: anyhow::anyhow!("remote identified as {remote}"),
        });
    }
    Ok(channel)
}

/// Exchange hello frames, then wrap the stream in a channel.
async fn handshake(
    inner: &TcpInner,
    mut stream: TcpStream,
) -> Result<(DeviceId, ConnectionChannel), TransportError> {
    let _ = stream.set_nodelay(true);
    let codec = FrameCodec::new(MAX_HELLO_SIZE);

    let hello = Hello {
        id: inner.local_id.clone(),
        name: inner.config.name().to_string(),
    };
    let body = serde_json::to_vec(&hello)
        .map_err(|e| TransportError::Config(format!("hello encoding: {e}")))?;
    stream.write_all(&codec.encode(&body)?).await?;

    let mut len_buf = [0u8; FRAME_HEADER_LEN];
    stream.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_HELLO_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: len,
            max: MAX_HELLO_SIZE,
        });
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    let remote: Hello = serde_json::from_slice(&body)
        .map_err(|e| TransportError::Read(anyhow::anyhow!("bad hello: {e}")))?;
    // Same rules as a locally configured id.
    let id: DeviceId = remote.id.as_str().parse()?;

    let channel = ConnectionChannel::new(id.clone(), stream, &inner.config).named(remote.name);
    Ok((id, channel))
}
