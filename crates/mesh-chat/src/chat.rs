use mesh_session::{
    DeviceId, SendTarget, SessionError, SessionHandle, SessionSnapshot, SessionState,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;

use crate::events::Output;

pub enum Role {
    /// Keeps discovering and accepts every attendee.
    Host,
    /// Connects to the given host once discovery finds it.
    Attendee(DeviceId),
}

/// Interactive loop: stdin lines are sent, session events are printed.
///
/// Lines starting with `/` are commands: `/quit`, `/end`, `/peers`,
/// `/to <device> <text>`.
pub async fn run(session: SessionHandle, role: Role, out: Output) -> anyhow::Result<()> {
    let mut states = session.observe_session_state();
    let mut inbox = session.observe_messages();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let mut joined = false;
    let mut join_requested = false;

    let snapshot = session.snapshot().await?;
    out.state(&snapshot);
    if snapshot.state == SessionState::Idle {
        session.start_discovery().await?;
    }

    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            _ = &mut ctrl_c => {
                eprintln!("\nCtrl+C received, shutting down...");
                break;
            }

            snapshot = states.recv() => {
                let snapshot = match snapshot {
                    Ok(snapshot) => snapshot,
                    Err(RecvError::Lagged(n)) => {
                        tracing::warn!("skipped {n} session updates");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                out.state(&snapshot);

                match &role {
                    Role::Host => {
                        // Reopen the group once the last attendee left.
                        if snapshot.state == SessionState::Idle {
                            match session.start_discovery().await {
                                // Stale snapshot: discovery already running.
                                Ok(()) | Err(SessionError::InvalidState { .. }) => {}
                                Err(e) => eprintln!("  ! could not restart discovery: {e}"),
                            }
                        }
                    }
                    Role::Attendee(host) => {
                        if snapshot.state == SessionState::Connected {
                            joined = true;
                        } else if joined {
                            eprintln!("Session with {host} ended.");
                            break;
                        } else if join_requested && snapshot.last_error.is_some() {
                            eprintln!("Could not reach {host}.");
                            break;
                        } else if !join_requested && host_found(&snapshot, host) {
                            join_requested = true;
                            if let Err(e) = session.connect_to_peer(host.clone()).await {
                                eprintln!("Could not join {host}: {e}");
                                break;
                            }
                        }
                    }
                }
            }

            message = inbox.recv() => {
                match message {
                    Ok(message) => out.message(&message),
                    Err(RecvError::Lagged(n)) => tracing::warn!("skipped {n} messages"),
                    Err(RecvError::Closed) => break,
                }
            }

            line = lines.next_line() => {
                let Some(line) = line? else { break };
                if !handle_line(&session, &out, line.trim()).await {
                    break;
                }
            }
        }
    }

    session.end_session().await.ok();
    session.shutdown().await;
    Ok(())
}

fn host_found(snapshot: &SessionSnapshot, host: &DeviceId) -> bool {
    snapshot.state == SessionState::Discovering && snapshot.devices.iter().any(|d| &d.id == host)
}

/// Returns `false` when the user asked to quit.
async fn handle_line(session: &SessionHandle, out: &Output, line: &str) -> bool {
    if line.is_empty() {
        return true;
    }

    let (target, text) = match line.split_once(' ').unwrap_or((line, "")) {
        ("/quit", _) => return false,
        ("/end", _) => {
            if let Err(e) = session.end_session().await {
                eprintln!("  ! {e}");
            }
            return true;
        }
        ("/peers", _) => {
            match session.snapshot().await {
                Ok(snapshot) => out.state(&snapshot),
                Err(e) => eprintln!("  ! {e}"),
            }
            return true;
        }
        ("/to", rest) => match rest.split_once(' ') {
            Some((device, text)) => match device.parse::<DeviceId>() {
                Ok(device) => (SendTarget::Device(device), text),
                Err(e) => {
                    eprintln!("  ! {e}");
                    return true;
                }
            },
            None => {
                eprintln!("  usage: /to <device> <text>");
                return true;
            }
        },
        _ => (SendTarget::Broadcast, line),
    };

    match session.send_message(text.as_bytes().to_vec(), target).await {
        Ok(report) => out.delivery(&report),
        Err(e) => eprintln!("  ! {e}"),
    }
    true
}
