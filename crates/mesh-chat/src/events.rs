use std::io::Write;
use std::time::{SystemTime, UNIX_EPOCH};

use mesh_session::{ContentMessage, DeliveryReport, SessionSnapshot, VisibleRegions};
use serde::Serialize;

pub fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

// ── Session events ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventState {
    pub event: &'static str,
    pub state: String,
    pub devices: Vec<String>,
    pub connected: Vec<String>,
    pub last_error: Option<String>,
    pub timestamp_ms: u64,
}

// ── Message events ──────────────────────────────────────────────

#[derive(Serialize)]
pub struct EventMessage {
    pub event: &'static str,
    pub from: String,
    pub seq: u64,
    pub text: String,
    pub timestamp_ms: u64,
}

#[derive(Serialize)]
pub struct EventDelivery {
    pub event: &'static str,
    pub seq: u64,
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
}

/// Where session events go: JSON lines on stdout, or plain text.
pub struct Output {
    json: bool,
}

impl Output {
    pub fn new(json: bool) -> Self {
        Self { json }
    }

    /// Emit a JSONL event to stdout (flushed immediately for piped output).
    fn emit<T: Serialize>(&self, event: &T) {
        if let Ok(json) = serde_json::to_string(event) {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            let _ = writeln!(lock, "{json}");
            let _ = lock.flush();
        }
    }

    pub fn state(&self, snapshot: &SessionSnapshot) {
        if self.json {
            self.emit(&EventState {
                event: "state",
                state: snapshot.state.to_string(),
                devices: snapshot.devices.iter().map(|d| d.id.to_string()).collect(),
                connected: snapshot.connected.iter().map(ToString::to_string).collect(),
                last_error: snapshot.last_error.clone(),
                timestamp_ms: now_ms(),
            });
            return;
        }

        let regions = VisibleRegions::from_snapshot(snapshot);
        if let Some(error) = &snapshot.last_error {
            eprintln!("  ! {error}");
        }
        if regions.adapter_disabled_notice {
            eprintln!("[{}] adapter is off", snapshot.state);
        } else if regions.chat_panel {
            let peers: Vec<String> = snapshot.connected.iter().map(ToString::to_string).collect();
            eprintln!("[{}] chatting with {}", snapshot.state, peers.join(", "));
        } else if regions.peer_list {
            eprintln!("[{}] devices nearby:", snapshot.state);
            for device in &snapshot.devices {
                eprintln!("  - {} ({}, {:?})", device.id, device.name, device.reachability);
            }
        } else if regions.no_connection_panel {
            eprintln!("[{}] no connection yet", snapshot.state);
        }
    }

    pub fn message(&self, message: &ContentMessage) {
        let text = String::from_utf8_lossy(&message.payload).into_owned();
        if self.json {
            self.emit(&EventMessage {
                event: "message",
                from: message.sender.to_string(),
                seq: message.sequence,
                text,
                timestamp_ms: now_ms(),
            });
        } else {
            println!("<{}> {text}", message.sender);
        }
    }

    pub fn delivery(&self, report: &DeliveryReport) {
        if self.json {
            self.emit(&EventDelivery {
                event: "delivery",
                seq: report.sequence,
                delivered: report.delivered.iter().map(ToString::to_string).collect(),
                failed: report.failed_targets().map(ToString::to_string).collect(),
            });
        } else {
            for (device, error) in &report.failed {
                eprintln!("  ! #{} not delivered to {device}: {error}", report.sequence);
            }
        }
    }
}
