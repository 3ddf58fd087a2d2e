//! Host and attendee sessions over localhost TCP.
use std::sync::Arc;
use std::time::Duration;

use mesh_session::{
    DeviceId, SendTarget, SessionConfig, SessionHandle, SessionRuntime, SessionSnapshot,
    SessionState,
};
use mesh_transport::{TcpAdapter, TransportConfig};
use tokio::sync::broadcast;

async fn wait_for(
    snapshots: &mut broadcast::Receiver<SessionSnapshot>,
    what: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match snapshots.recv().await {
                Ok(snapshot) if what(&snapshot) => return snapshot,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("snapshot stream failed: {e}"),
            }
        }
    })
    .await
    .expect("timed out waiting for snapshot")
}

async fn start(config: TransportConfig) -> (TcpAdapter, SessionHandle) {
    let (adapter, events) = TcpAdapter::bind("127.0.0.1:0".parse().unwrap(), config)
        .await
        .unwrap();
    let session = SessionRuntime::spawn(Arc::new(adapter.clone()), events, SessionConfig::new());
    (adapter, session)
}

#[tokio::test]
async fn host_and_attendee_chat_over_tcp() {
    let _ = tracing_subscriber::fmt().with_env_filter("warn").try_init();

    let (host_adapter, host) = start(TransportConfig::new().device_name("host")).await;
    let (_attendee_adapter, attendee) = start(
        TransportConfig::new()
            .device_name("guest")
            .static_peer(DeviceId::new("host"), host_adapter.local_addr()),
    )
    .await;

    let mut host_states = host.observe_session_state();
    let mut attendee_states = attendee.observe_session_state();
    let mut host_inbox = host.observe_messages();
    let mut attendee_inbox = attendee.observe_messages();

    // Both adapters come up enabled; the host waits for attendees.
    host.start_discovery().await.unwrap();
    attendee.start_discovery().await.unwrap();
    wait_for(&mut attendee_states, |s| !s.devices.is_empty()).await;

    attendee.connect_to_peer(DeviceId::new("host")).await.unwrap();

    let snapshot = wait_for(&mut host_states, |s| s.state == SessionState::Connected).await;
    assert_eq!(snapshot.connected, vec![DeviceId::new("guest")]);
    wait_for(&mut attendee_states, |s| s.state == SessionState::Connected).await;

    let report = attendee
        .send_message(b"hello host".to_vec(), DeviceId::new("host"))
        .await
        .unwrap();
    assert_eq!(report.sequence, 1);

    let received = tokio::time::timeout(Duration::from_secs(10), host_inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.sender, DeviceId::new("guest"));
    assert_eq!(received.payload, b"hello host");

    host.send_message(b"welcome".to_vec(), SendTarget::Broadcast)
        .await
        .unwrap();
    let received = tokio::time::timeout(Duration::from_secs(10), attendee_inbox.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received.sender, DeviceId::new("host"));
    assert_eq!(received.sequence, 1);

    // The host ends the session; the attendee sees the socket close.
    host.end_session().await.unwrap();
    wait_for(&mut attendee_states, |s| s.state == SessionState::Idle).await;
}
