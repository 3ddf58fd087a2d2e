/// The session control loop.
///
/// A single async task that owns the coordinator and multiplexes over
/// settled deliveries, transport events, channel events and application
/// commands. Transport events already queued when a command arrives are
/// applied first.
use std::sync::Arc;

use mesh_transport::{ChannelEvent, TransportAdapter, TransportError, TransportEvent};
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::coordinator::SessionCoordinator;
use crate::error::SessionError;
use crate::message::ContentMessage;
use crate::router::{DeliveryOutcome, MessageRouter};
use crate::types::{DeliveryReport, SessionSnapshot};

use super::effect::SessionEffect;
use super::executor::execute_effects;
use super::{RuntimeCommand, SessionConfig};

/// A delivery settled off-loop, with the caller still waiting for it.
type Settled = (DeliveryOutcome, oneshot::Sender<Result<DeliveryReport, SessionError>>);

/// Main event loop: owns all session state.
pub(super) async fn runtime_loop(
    adapter: Arc<dyn TransportAdapter>,
    config: SessionConfig,
    mut cmd_rx: mpsc::Receiver<RuntimeCommand>,
    mut transport_rx: mpsc::Receiver<TransportEvent>,
    snapshots: broadcast::Sender<SessionSnapshot>,
    messages: broadcast::Sender<ContentMessage>,
) {
    let (channel_tx, mut channel_rx) = mpsc::channel::<ChannelEvent>(config.channel_event_buffer);
    let (settled_tx, mut settled_rx) = mpsc::channel::<Settled>(config.command_buffer);

    // Never queue more than the adapter's channels can frame.
    let max_payload_size = config.max_payload_size.min(adapter.max_frame_size());
    let router = MessageRouter::new(adapter.local_id(), max_payload_size, messages);
    let mut coordinator = SessionCoordinator::new(router, snapshots, channel_tx);

    let mut suspended = false;
    let mut transport_open = true;

    tracing::info!("session runtime started for {}", coordinator.local_id());

    loop {
        tokio::select! {
            biased;

            // ── 1. Deliveries whose writers all answered ────────
            Some((outcome, reply)) = settled_rx.recv() => {
                let effects = coordinator.apply_delivery(&outcome);
                run_effects(&mut coordinator, adapter.as_ref(), effects).await;
                let _ = reply.send(Ok(outcome.report));
            }

            // ── 2. Transport events ─────────────────────────────
            event = transport_rx.recv(), if transport_open && !suspended => {
                match event {
                    Some(event) => {
                        tracing::debug!("transport event: {event:?}");
                        let effects = coordinator.handle_transport_event(event);
                        run_effects(&mut coordinator, adapter.as_ref(), effects).await;
                    }
                    None => {
                        tracing::warn!("transport event stream ended");
                        transport_open = false;
                    }
                }
            }

            // ── 3. Frames and closures from channel readers ─────
            Some(event) = channel_rx.recv() => {
                let effects = coordinator.handle_channel_event(event);
                run_effects(&mut coordinator, adapter.as_ref(), effects).await;
            }

            // ── 4. Application commands ─────────────────────────
            cmd = cmd_rx.recv() => {
                let Some(cmd) = cmd else {
                    tracing::debug!("every session handle dropped");
                    break;
                };
                match cmd {
                    RuntimeCommand::StartDiscovery { reply } => {
                        let result = start_discovery(&mut coordinator, adapter.as_ref()).await;
                        let _ = reply.send(result);
                    }
                    RuntimeCommand::StopDiscovery { reply } => {
                        let result = match coordinator.stop_discovery() {
                            Ok(effects) => {
                                run_effects(&mut coordinator, adapter.as_ref(), effects).await;
                                Ok(())
                            }
                            Err(e) => Err(e),
                        };
                        let _ = reply.send(result);
                    }
                    RuntimeCommand::ConnectToPeer { device, reply } => {
                        let result = match coordinator.check_connect(&device) {
                            Ok(()) => match adapter.connect(&device).await {
                                Ok(()) => Ok(()),
                                Err(e) => {
                                    let effects = coordinator.connect_failed(&device, &e);
                                    run_effects(&mut coordinator, adapter.as_ref(), effects).await;
                                    Err(e.into())
                                }
                            },
                            Err(e) => Err(e),
                        };
                        let _ = reply.send(result);
                    }
                    RuntimeCommand::EndSession { reply } => {
                        let effects = coordinator.end_session();
                        run_effects(&mut coordinator, adapter.as_ref(), effects).await;
                        let _ = reply.send(Ok(()));
                    }
                    RuntimeCommand::SendMessage { payload, target, reply } => {
                        match coordinator.send(payload, &target) {
                            Ok(pending) => {
                                tracing::debug!("message #{} queued for {target}", pending.sequence());
                                let settled_tx = settled_tx.clone();
                                tokio::spawn(async move {
                                    let outcome = pending.settle().await;
                                    let _ = settled_tx.send((outcome, reply)).await;
                                });
                            }
                            Err(e) => {
                                let _ = reply.send(Err(e));
                            }
                        }
                    }
                    RuntimeCommand::RemovePeer { device, reply } => {
                        let _ = reply.send(coordinator.remove_peer(&device));
                    }
                    RuntimeCommand::GetSnapshot { reply } => {
                        let _ = reply.send(coordinator.snapshot());
                    }
                    RuntimeCommand::SuspendEvents { reply } => {
                        if !suspended {
                            tracing::debug!("transport event processing suspended");
                        }
                        suspended = true;
                        let _ = reply.send(Ok(()));
                    }
                    RuntimeCommand::ResumeEvents { reply } => {
                        if suspended {
                            tracing::debug!("transport event processing resumed");
                        }
                        suspended = false;
                        let _ = reply.send(Ok(()));
                    }
                    RuntimeCommand::Shutdown => {
                        tracing::info!("session runtime shutting down");
                        break;
                    }
                }
            }
        }
    }

    let effects = coordinator.shutdown();
    run_effects(&mut coordinator, adapter.as_ref(), effects).await;
}

async fn start_discovery(
    coordinator: &mut SessionCoordinator,
    adapter: &dyn TransportAdapter,
) -> Result<(), SessionError> {
    coordinator.check_start_discovery()?;
    match adapter.discover_peers().await {
        Ok(()) => {
            coordinator.discovery_started();
            Ok(())
        }
        Err(e) => {
            coordinator.record_transport_error(&e);
            Err(e.into())
        }
    }
}

async fn run_effects(
    coordinator: &mut SessionCoordinator,
    adapter: &dyn TransportAdapter,
    effects: Vec<SessionEffect>,
) {
    if effects.is_empty() {
        return;
    }
    for error in execute_effects(effects, adapter).await {
        report(coordinator, &error);
    }
}

fn report(coordinator: &mut SessionCoordinator, error: &TransportError) {
    // A disabled adapter has nothing left to stop; not worth surfacing.
    if matches!(error, TransportError::AdapterUnavailable) {
        return;
    }
    coordinator.record_transport_error(error);
}
