//! Per-connection bidirectional channel carrying length-prefixed frames.
//!
//! A [`ConnectionChannel`] wraps the raw byte stream handed over by an
//! adapter. [`ConnectionChannel::open`] splits it into one reader task and
//! one writer task and returns the [`ChannelHandle`] that owns both: dropping
//! or closing the handle stops the tasks and releases the stream.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot, watch};

use crate::frame::FrameCodec;
use crate::{DeviceId, TransportConfig, TransportError};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of one opened channel.
///
/// Lets the owner recognise events from a channel it already replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Any bidirectional byte stream a channel can run over.
pub trait ByteStream: AsyncRead + AsyncWrite + Send + Unpin + 'static {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin + 'static> ByteStream for T {}

type BoxedStream = Box<dyn ByteStream>;

/// Events produced by a channel's reader task.
#[derive(Debug)]
pub enum ChannelEvent {
    /// One complete frame arrived.
    Frame {
        connection: ConnectionId,
        device: DeviceId,
        data: Bytes,
    },
    /// The remote side went away or the stream failed.
    ///
    /// `error` is `None` on a clean end-of-stream. Not emitted when the
    /// channel was closed locally.
    Closed {
        connection: ConnectionId,
        device: DeviceId,
        error: Option<String>,
    },
}

/// Resolves once the writer task has written and flushed the frame (or
/// failed to).
pub type WriteAck = oneshot::Receiver<Result<(), TransportError>>;

struct WriteRequest {
    frame: Bytes,
    ack: oneshot::Sender<Result<(), TransportError>>,
}

/// An established, not yet opened connection to one device.
pub struct ConnectionChannel {
    remote: DeviceId,
    remote_name: Option<String>,
    stream: BoxedStream,
    codec: FrameCodec,
    read_chunk: usize,
}

impl fmt::Debug for ConnectionChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionChannel")
            .field("remote", &self.remote)
            .field("remote_name", &self.remote_name)
            .finish_non_exhaustive()
    }
}

impl ConnectionChannel {
    pub fn new<S: ByteStream>(remote: DeviceId, stream: S, config: &TransportConfig) -> Self {
        Self {
            remote,
            remote_name: None,
            stream: Box::new(stream),
            codec: FrameCodec::new(config.max_frame_size),
            read_chunk: config.read_chunk,
        }
    }

    /// Attach the display name the remote announced for itself.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.remote_name = (!name.trim().is_empty()).then_some(name);
        self
    }

    /// The device on the other end.
    pub fn remote(&self) -> &DeviceId {
        &self.remote
    }

    /// Display name announced by the remote, if the adapter learned one.
    pub fn remote_name(&self) -> Option<&str> {
        self.remote_name.as_deref()
    }

    /// Start the reader and writer tasks.
    ///
    /// Inbound frames and remote closure are reported on `events`, tagged
    /// with the returned handle's [`ConnectionId`].
    pub fn open(self, events: mpsc::Sender<ChannelEvent>) -> ChannelHandle {
        let id = ConnectionId::next();
        let (reader, writer) = tokio::io::split(self.stream);
        let (write_tx, write_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        let shutdown = Arc::new(shutdown_tx);

        tokio::spawn(read_loop(
            reader,
            id,
            self.remote.clone(),
            self.codec,
            self.read_chunk,
            shutdown.clone(),
            events,
        ));
        tokio::spawn(write_loop(
            writer,
            self.remote.clone(),
            write_rx,
            shutdown.subscribe(),
        ));

        tracing::debug!("{id}: channel to {} opened", self.remote);

        ChannelHandle {
            id,
            remote: self.remote,
            codec: self.codec,
            writes: write_tx,
            shutdown,
        }
    }
}

/// Owner of an opened channel. Closing (or dropping) it stops both tasks.
pub struct ChannelHandle {
    id: ConnectionId,
    remote: DeviceId,
    codec: FrameCodec,
    writes: mpsc::UnboundedSender<WriteRequest>,
    shutdown: Arc<watch::Sender<bool>>,
}

impl fmt::Debug for ChannelHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChannelHandle")
            .field("id", &self.id)
            .field("remote", &self.remote)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ChannelHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn remote(&self) -> &DeviceId {
        &self.remote
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    /// Largest payload [`write`](Self::write) accepts.
    pub fn max_frame_size(&self) -> usize {
        self.codec.max_frame_size()
    }

    /// Queue one payload for the writer task.
    ///
    /// Frames queued from any number of callers are written one at a time,
    /// in queue order.
    pub fn write(&self, payload: &[u8]) -> WriteAck {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.is_closed() {
            let _ = ack_tx.send(Err(TransportError::ChannelClosed(self.remote.clone())));
            return ack_rx;
        }

        match self.codec.encode(payload) {
            Ok(frame) => {
                if let Err(mpsc::error::SendError(req)) =
                    self.writes.send(WriteRequest { frame, ack: ack_tx })
                {
                    let _ = req
                        .ack
                        .send(Err(TransportError::ChannelClosed(self.remote.clone())));
                }
            }
            Err(e) => {
                let _ = ack_tx.send(Err(e));
            }
        }
        ack_rx
    }

    /// Close the channel. Idempotent.
    pub fn close(&self) {
        let changed = self.shutdown.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });
        if changed {
            tracing::debug!("{}: channel to {} closed", self.id, self.remote);
        }
    }
}

impl Drop for ChannelHandle {
    fn drop(&mut self) {
        self.close();
    }
}

async fn closed(shutdown: &mut watch::Receiver<bool>) {
    // Sender dropped counts as closed too.
    let _ = shutdown.wait_for(|closed| *closed).await;
}

async fn read_loop(
    mut reader: ReadHalf<BoxedStream>,
    id: ConnectionId,
    remote: DeviceId,
    codec: FrameCodec,
    read_chunk: usize,
    shutdown: Arc<watch::Sender<bool>>,
    events: mpsc::Sender<ChannelEvent>,
) {
    let mut shutdown_rx = shutdown.subscribe();
    let mut buf = BytesMut::with_capacity(read_chunk);

    let outcome: Option<Option<String>> = 'read: loop {
        buf.reserve(read_chunk);
        tokio::select! {
            biased;
            _ = closed(&mut shutdown_rx) => break None,
            result = reader.read_buf(&mut buf) => {
                match result {
                    Ok(0) => {
                        if !buf.is_empty() {
                            break Some(Some(format!(
                                "stream ended inside a frame ({} bytes buffered)",
                                buf.len()
                            )));
                        }
                        break Some(None);
                    }
                    Ok(_) => loop {
                        match codec.decode(&mut buf) {
                            Ok(Some(data)) => {
                                tracing::debug!("{id}: frame of {} bytes from {remote}", data.len());
                                let event = ChannelEvent::Frame {
                                    connection: id,
                                    device: remote.clone(),
                                    data,
                                };
                                if events.send(event).await.is_err() {
                                    break 'read None;
                                }
                            }
                            Ok(None) => break,
                            Err(e) => break 'read Some(Some(e.to_string())),
                        }
                    },
                    Err(e) => break Some(Some(e.to_string())),
                }
            }
        }
    };

    let locally_closed = *shutdown.borrow();
    // Stop the writer as well; the stream is released once both halves drop.
    shutdown.send_replace(true);

    if let (Some(error), false) = (outcome, locally_closed) {
        match &error {
            Some(e) => tracing::warn!("{id}: channel to {remote} failed: {e}"),
            None => tracing::debug!("{id}: {remote} closed the stream"),
        }
        let _ = events
            .send(ChannelEvent::Closed {
                connection: id,
                device: remote,
                error,
            })
            .await;
    }
}

async fn write_loop(
    mut writer: WriteHalf<BoxedStream>,
    remote: DeviceId,
    mut requests: mpsc::UnboundedReceiver<WriteRequest>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            biased;
            _ = closed(&mut shutdown) => break,
            request = requests.recv() => {
                let Some(request) = request else { break };
                let result = write_frame(&mut writer, &request.frame).await.map_err(|e| {
                    TransportError::Write {
                        device: remote.clone(),
                        source: e.into(),
                    }
                });
                let failed = result.is_err();
                let _ = request.ack.send(result);
                if failed {
                    break;
                }
            }
        }
    }

    requests.close();
    while let Ok(request) = requests.try_recv() {
        let _ = request
            .ack
            .send(Err(TransportError::ChannelClosed(remote.clone())));
    }
    let _ = writer.shutdown().await;
}

async fn write_frame(
    writer: &mut WriteHalf<BoxedStream>,
    frame: &[u8],
) -> Result<(), std::io::Error> {
    writer.write_all(frame).await?;
    writer.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::io::{duplex, DuplexStream};

    fn config() -> TransportConfig {
        TransportConfig::new().max_frame_size(1024).read_chunk(16)
    }

    fn pair() -> (ConnectionChannel, DuplexStream) {
        let (local, remote) = duplex(4096);
        (ConnectionChannel::new(DeviceId::new("D1"), local, &config()), remote)
    }

    #[tokio::test]
    async fn frames_written_by_remote_are_reassembled() {
        let (channel, mut remote) = pair();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = channel.open(tx);

        let frame = FrameCodec::new(1024).encode(b"hello there").unwrap();
        // Dribble the frame in three writes.
        remote.write_all(&frame[..3]).await.unwrap();
        remote.write_all(&frame[3..9]).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(rx.try_recv().is_err());
        remote.write_all(&frame[9..]).await.unwrap();

        match rx.recv().await.unwrap() {
            ChannelEvent::Frame { connection, device, data } => {
                assert_eq!(connection, handle.id());
                assert_eq!(device, DeviceId::new("D1"));
                assert_eq!(data, &b"hello there"[..]);
            }
            other => panic!("expected frame, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn writes_are_framed_and_acknowledged() {
        let (channel, mut remote) = pair();
        let (tx, _rx) = mpsc::channel(8);
        let handle = channel.open(tx);

        handle.write(b"a").await.unwrap().unwrap();
        handle.write(b"bc").await.unwrap().unwrap();

        let mut buf = [0u8; 11];
        remote.read_exact(&mut buf).await.unwrap();
        assert_eq!(buf, [0, 0, 0, 1, b'a', 0, 0, 0, 2, b'b', b'c']);
    }

    #[tokio::test]
    async fn close_is_idempotent_and_releases_stream() {
        let (channel, mut remote) = pair();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = channel.open(tx);

        handle.close();
        handle.close();
        assert!(handle.is_closed());

        // Both halves dropped: the remote sees end-of-stream.
        let mut buf = Vec::new();
        let n = tokio::time::timeout(Duration::from_secs(5), remote.read_to_end(&mut buf))
            .await
            .expect("stream not released")
            .unwrap();
        assert_eq!(n, 0);

        // Local close does not report a Closed event.
        drop(handle);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn write_after_close_fails_with_channel_closed() {
        let (channel, _remote) = pair();
        let (tx, _rx) = mpsc::channel(8);
        let handle = channel.open(tx);
        handle.close();

        let result = handle.write(b"late").await.unwrap();
        assert!(matches!(result, Err(TransportError::ChannelClosed(_))));
    }

    #[tokio::test]
    async fn remote_hangup_is_reported() {
        let (channel, remote) = pair();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = channel.open(tx);
        drop(remote);

        match rx.recv().await.unwrap() {
            ChannelEvent::Closed { connection, error, .. } => {
                assert_eq!(connection, handle.id());
                assert!(error.is_none());
            }
            other => panic!("expected Closed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn oversized_frame_closes_channel() {
        let (channel, mut remote) = pair();
        let (tx, mut rx) = mpsc::channel(8);
        let handle = channel.open(tx);

        remote.write_all(&(4096u32).to_be_bytes()).await.unwrap();

        match rx.recv().await.unwrap() {
            ChannelEvent::Closed { error, .. } => {
                assert!(error.unwrap().contains("frame too large"));
            }
            other => panic!("expected Closed, got {other:?}"),
        }
        assert!(handle.is_closed());
    }
}
