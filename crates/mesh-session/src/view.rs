//! What a chat screen should show for a given snapshot.
//!
//! Pure projection: it consumes snapshots and never feeds back into the
//! session.
use crate::types::{SessionSnapshot, SessionState};

/// Screen regions to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VisibleRegions {
    /// "Turn the adapter on" notice.
    pub adapter_disabled_notice: bool,
    /// Placeholder shown while no connection exists.
    pub no_connection_panel: bool,
    /// Discovered devices to pick from.
    pub peer_list: bool,
    /// Conversation and input box.
    pub chat_panel: bool,
}

impl VisibleRegions {
    pub fn from_snapshot(snapshot: &SessionSnapshot) -> Self {
        let enabled = snapshot.state != SessionState::AdapterDisabled;
        let connected = snapshot.state == SessionState::Connected;
        Self {
            adapter_disabled_notice: !enabled,
            no_connection_panel: enabled && !connected,
            peer_list: enabled && !connected && !snapshot.devices.is_empty(),
            chat_panel: connected,
        }
    }
}

impl From<&SessionSnapshot> for VisibleRegions {
    fn from(snapshot: &SessionSnapshot) -> Self {
        Self::from_snapshot(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Device, DeviceId};

    fn snapshot(state: SessionState, devices: &[&str]) -> SessionSnapshot {
        SessionSnapshot {
            state,
            devices: devices.iter().map(|d| Device::reachable(*d, *d)).collect(),
            connected: if state == SessionState::Connected {
                vec![DeviceId::new("D1")]
            } else {
                Vec::new()
            },
            last_error: None,
        }
    }

    #[test]
    fn adapter_disabled_shows_only_the_notice() {
        let regions = VisibleRegions::from_snapshot(&snapshot(SessionState::AdapterDisabled, &["D1"]));
        assert_eq!(
            regions,
            VisibleRegions {
                adapter_disabled_notice: true,
                ..VisibleRegions::default()
            }
        );
    }

    #[test]
    fn peer_list_needs_devices() {
        let empty = VisibleRegions::from_snapshot(&snapshot(SessionState::Discovering, &[]));
        assert!(empty.no_connection_panel);
        assert!(!empty.peer_list);

        let found = VisibleRegions::from_snapshot(&snapshot(SessionState::Discovering, &["D1"]));
        assert!(found.no_connection_panel);
        assert!(found.peer_list);
        assert!(!found.chat_panel);
    }

    #[test]
    fn connected_shows_chat_only() {
        let regions: VisibleRegions = (&snapshot(SessionState::Connected, &["D1"])).into();
        assert_eq!(
            regions,
            VisibleRegions {
                chat_panel: true,
                ..VisibleRegions::default()
            }
        );
    }
}
