/// Message router for the session layer.
///
/// Outbound: assigns the local sequence number, encodes the message and
/// queues the frame on every target channel. Inbound: decodes frames and
/// publishes them to subscribers in arrival order.
///
/// Sequence numbers are observability only. Duplicates or gaps on the
/// inbound side are surfaced as-is, never reordered.
use mesh_transport::{ConnectionId, TransportError, WriteAck};
use tokio::sync::broadcast;

use crate::connection::{Connection, ConnectionTable};
use crate::error::SessionError;
use crate::message::ContentMessage;
use crate::types::{DeliveryReport, DeviceId, SendTarget};

/// First sequence number of every session.
pub const FIRST_SEQUENCE: u64 = 1;

pub struct MessageRouter {
    local_id: DeviceId,
    next_sequence: u64,
    max_payload_size: usize,
    subscribers: broadcast::Sender<ContentMessage>,
}

impl MessageRouter {
    pub fn new(
        local_id: DeviceId,
        max_payload_size: usize,
        subscribers: broadcast::Sender<ContentMessage>,
    ) -> Self {
        Self {
            local_id,
            next_sequence: FIRST_SEQUENCE,
            max_payload_size,
            subscribers,
        }
    }

    pub fn local_id(&self) -> &DeviceId {
        &self.local_id
    }

    /// Subscribe to inbound messages from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<ContentMessage> {
        self.subscribers.subscribe()
    }

    /// Sequence number the next outbound message will carry.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Start numbering from [`FIRST_SEQUENCE`] again (new session).
    pub fn reset_sequence(&mut self) {
        self.next_sequence = FIRST_SEQUENCE;
    }

    /// Queue `payload` on the channel(s) named by `target`.
    ///
    /// Fails with `NotConnected` when the target has no live connection
    /// (for `Broadcast`: when no connection is live at all). The sequence
    /// number is only consumed once the frame has been queued.
    pub fn route(
        &mut self,
        payload: Vec<u8>,
        target: &SendTarget,
        connections: &ConnectionTable,
    ) -> Result<PendingDelivery, SessionError> {
        let targets: Vec<&Connection> = match target {
            SendTarget::Device(id) => {
                let connection = connections
                    .get(id)
                    .filter(|c| c.is_live())
                    .ok_or_else(|| SessionError::NotConnected {
                        target: id.to_string(),
                    })?;
                vec![connection]
            }
            SendTarget::Broadcast => {
                let live: Vec<&Connection> = connections.iter().filter(|c| c.is_live()).collect();
                if live.is_empty() {
                    return Err(SessionError::NotConnected {
                        target: target.to_string(),
                    });
                }
                live
            }
        };

        // The smallest channel limit applies to the whole send.
        let max = targets
            .iter()
            .map(|c| c.handle().max_frame_size())
            .fold(self.max_payload_size, usize::min);

        let sequence = self.next_sequence;
        let bytes = ContentMessage::new(self.local_id.clone(), sequence, payload).to_bytes()?;
        if bytes.len() > max {
            return Err(TransportError::FrameTooLarge {
                size: bytes.len(),
                max,
            }
            .into());
        }
        self.next_sequence += 1;

        let acks = targets
            .into_iter()
            .map(|c| PendingWrite {
                device: c.device().clone(),
                connection: c.id(),
                ack: c.handle().write(&bytes),
            })
            .collect();

        tracing::debug!("routed #{sequence} ({} bytes) to {target}", bytes.len());
        Ok(PendingDelivery { sequence, writes: acks })
    }

    /// Decode one inbound frame received from `peer` and publish it to every
    /// subscriber. A message naming any sender other than `peer` is refused.
    pub fn dispatch(&self, peer: &DeviceId, data: &[u8]) -> Result<ContentMessage, SessionError> {
        let message = ContentMessage::from_bytes(data)?;
        if &message.sender != peer {
            return Err(SessionError::SenderMismatch {
                peer: peer.clone(),
                claimed: message.sender,
            });
        }
        // No subscriber is not an error: the message is simply unobserved.
        let _ = self.subscribers.send(message.clone());
        Ok(message)
    }
}

struct PendingWrite {
    device: DeviceId,
    connection: ConnectionId,
    ack: WriteAck,
}

/// Frames queued by [`MessageRouter::route`], waiting for their writers.
pub struct PendingDelivery {
    sequence: u64,
    writes: Vec<PendingWrite>,
}

/// A settled delivery: the report plus the connections whose stream failed.
#[derive(Debug)]
pub struct DeliveryOutcome {
    pub report: DeliveryReport,
    pub failed_connections: Vec<ConnectionId>,
}

impl PendingDelivery {
    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    /// Wait for every writer to acknowledge. Never fails as a whole: each
    /// target is settled individually.
    pub async fn settle(self) -> DeliveryOutcome {
        let mut report = DeliveryReport {
            sequence: self.sequence,
            ..DeliveryReport::default()
        };
        let mut failed_connections = Vec::new();

        for write in self.writes {
            let result = match write.ack.await {
                Ok(result) => result,
                Err(_) => Err(TransportError::ChannelClosed(write.device.clone())),
            };
            match result {
                Ok(()) => report.delivered.push(write.device),
                // Refused before reaching the stream; the connection is fine.
                Err(e @ TransportError::FrameTooLarge { .. }) => {
                    report.failed.push((write.device, e.to_string()));
                }
                Err(e) => {
                    report.failed.push((write.device, e.to_string()));
                    failed_connections.push(write.connection);
                }
            }
        }

        DeliveryOutcome {
            report,
            failed_connections,
        }
    }
}
