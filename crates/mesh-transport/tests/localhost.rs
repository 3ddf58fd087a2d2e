//! Integration tests: two TcpAdapter instances on localhost.

use std::time::Duration;

use mesh_transport::{
    ChannelEvent, DeviceId, FrameCodec, TcpAdapter, TransportAdapter, TransportConfig,
    TransportError, TransportEvent,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();
}

async fn next_event(events: &mut mpsc::Receiver<TransportEvent>) -> TransportEvent {
    tokio::time::timeout(Duration::from_secs(10), events.recv())
        .await
        .expect("event timed out")
        .expect("event stream ended")
}

/// Host listens, attendee dials, both sides get a channel and frames flow
/// both ways.
#[tokio::test]
async fn attendee_connects_and_exchanges_frames() {
    init_tracing();

    let (host, mut host_events) = TcpAdapter::bind(
        "127.0.0.1:0".parse().unwrap(),
        TransportConfig::new().device_name("host"),
    )
    .await
    .unwrap();
    assert!(matches!(next_event(&mut host_events).await, TransportEvent::AdapterEnabled));

    let (attendee, mut attendee_events) = TcpAdapter::bind(
        "127.0.0.1:0".parse().unwrap(),
        TransportConfig::new()
            .device_name("attendee")
            .static_peer(DeviceId::new("host"), host.local_addr()),
    )
    .await
    .unwrap();
    assert!(matches!(next_event(&mut attendee_events).await, TransportEvent::AdapterEnabled));

    // Discovery reports the configured host.
    attendee.discover_peers().await.unwrap();
    assert!(attendee.is_discovering());
    match next_event(&mut attendee_events).await {
        TransportEvent::PeersChanged(devices) => {
            assert_eq!(devices.len(), 1);
            assert_eq!(devices[0].id, DeviceId::new("host"));
        }
        other => panic!("expected PeersChanged, got {other:?}"),
    }

    attendee.connect(&DeviceId::new("host")).await.unwrap();

    let attendee_channel = match next_event(&mut attendee_events).await {
        TransportEvent::Connected { device, channel } => {
            assert_eq!(device, DeviceId::new("host"));
            assert_eq!(channel.remote_name(), Some("host"));
            channel
        }
        other => panic!("expected Connected, got {other:?}"),
    };
    let host_channel = match next_event(&mut host_events).await {
        TransportEvent::Connected { device, channel } => {
            assert_eq!(device, DeviceId::new("attendee"));
            assert_eq!(channel.remote_name(), Some("attendee"));
            channel
        }
        other => panic!("expected Connected, got {other:?}"),
    };

    let (host_tx, mut host_rx) = mpsc::channel(8);
    let (attendee_tx, mut attendee_rx) = mpsc::channel(8);
    let host_handle = host_channel.open(host_tx);
    let attendee_handle = attendee_channel.open(attendee_tx);

    attendee_handle.write(b"hello host").await.unwrap().unwrap();
    match host_rx.recv().await.unwrap() {
        ChannelEvent::Frame { device, data, .. } => {
            assert_eq!(device, DeviceId::new("attendee"));
            assert_eq!(data, &b"hello host"[..]);
        }
        other => panic!("expected Frame, got {other:?}"),
    }

    host_handle.write(b"welcome").await.unwrap().unwrap();
    match attendee_rx.recv().await.unwrap() {
        ChannelEvent::Frame { data, .. } => assert_eq!(data, &b"welcome"[..]),
        other => panic!("expected Frame, got {other:?}"),
    }

    // Host closes: the attendee's reader sees the hangup.
    host_handle.close();
    match tokio::time::timeout(Duration::from_secs(10), attendee_rx.recv())
        .await
        .expect("close not observed")
        .unwrap()
    {
        ChannelEvent::Closed { device, .. } => assert_eq!(device, DeviceId::new("host")),
        other => panic!("expected Closed, got {other:?}"),
    }
}

/// Dialing a device with no known address fails synchronously.
#[tokio::test]
async fn connect_to_unknown_device_fails() {
    init_tracing();

    let (adapter, _events) = TcpAdapter::bind(
        "127.0.0.1:0".parse().unwrap(),
        TransportConfig::new().device_name("lonely"),
    )
    .await
    .unwrap();

    match adapter.connect(&DeviceId::new("ghost")).await {
        Err(TransportError::Connect { device, .. }) => assert_eq!(device, DeviceId::new("ghost")),
        other => panic!("expected Connect error, got {other:?}"),
    }
}

/// An unreachable configured address surfaces as Disconnected.
#[tokio::test]
async fn failed_dial_reports_disconnected() {
    init_tracing();

    // Grab a free port and release it so nothing listens there.
    let dead_addr = {
        let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        spare.local_addr().unwrap()
    };

    let (adapter, mut events) = TcpAdapter::bind(
        "127.0.0.1:0".parse().unwrap(),
        TransportConfig::new()
            .device_name("dialer")
            .static_peer(DeviceId::new("gone"), dead_addr),
    )
    .await
    .unwrap();
    let _ = next_event(&mut events).await; // AdapterEnabled

    adapter.connect(&DeviceId::new("gone")).await.unwrap();
    match next_event(&mut events).await {
        TransportEvent::Disconnected { device } => assert_eq!(device, DeviceId::new("gone")),
        other => panic!("expected Disconnected, got {other:?}"),
    }
}

/// Frames above the configured maximum are refused before hitting the wire.
#[tokio::test]
async fn reject_oversized_frame() {
    init_tracing();

    let (host, mut host_events) = TcpAdapter::bind(
        "127.0.0.1:0".parse().unwrap(),
        TransportConfig::new().device_name("big-host").max_frame_size(64),
    )
    .await
    .unwrap();
    let _ = next_event(&mut host_events).await;

    let (attendee, mut attendee_events) = TcpAdapter::bind(
        "127.0.0.1:0".parse().unwrap(),
        TransportConfig::new()
            .device_name("small-attendee")
            .max_frame_size(64)
            .static_peer(DeviceId::new("big-host"), host.local_addr()),
    )
    .await
    .unwrap();
    let _ = next_event(&mut attendee_events).await;

    attendee.connect(&DeviceId::new("big-host")).await.unwrap();
    let channel = match next_event(&mut attendee_events).await {
        TransportEvent::Connected { channel, .. } => channel,
        other => panic!("expected Connected, got {other:?}"),
    };
    let (tx, _rx) = mpsc::channel(8);
    let handle = channel.open(tx);
    assert_eq!(attendee.max_frame_size(), 64);
    assert_eq!(handle.max_frame_size(), 64);

    match handle.write(&[0u8; 128]).await.unwrap() {
        Err(TransportError::FrameTooLarge { size, max }) => {
            assert_eq!(size, 128);
            assert_eq!(max, 64);
        }
        other => panic!("expected FrameTooLarge, got {other:?}"),
    }
}

/// A hello announcing an unusable id never becomes a connection.
#[tokio::test]
async fn hello_with_invalid_id_is_refused() {
    init_tracing();

    let (host, mut host_events) = TcpAdapter::bind(
        "127.0.0.1:0".parse().unwrap(),
        TransportConfig::new().device_name("host"),
    )
    .await
    .unwrap();
    let _ = next_event(&mut host_events).await; // AdapterEnabled

    let mut stream = tokio::net::TcpStream::connect(host.local_addr()).await.unwrap();
    let hello = FrameCodec::new(1024)
        .encode(br#"{"id":"   ","name":"impostor"}"#)
        .unwrap();
    stream.write_all(&hello).await.unwrap();

    // The host sends its own hello, then drops the stream.
    let mut received = Vec::new();
    tokio::time::timeout(Duration::from_secs(10), stream.read_to_end(&mut received))
        .await
        .expect("host kept the stream open")
        .unwrap();
    assert!(!received.is_empty());

    assert!(
        tokio::time::timeout(Duration::from_millis(200), host_events.recv())
            .await
            .is_err()
    );
}
