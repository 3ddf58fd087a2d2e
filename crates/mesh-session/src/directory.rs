/// Peer directory: the devices discovery has reported.
///
/// Keeps insertion order so snapshots render without reordering, and
/// refuses to forget a device that a live connection still references.
///
/// Pure logic, not thread-safe: only the control loop mutates it.
use std::collections::{HashMap, HashSet};

use crate::error::SessionError;
use crate::types::{Device, DeviceId, Reachability};

#[derive(Debug, Default)]
pub struct PeerDirectory {
    devices: HashMap<DeviceId, Device>,
    /// Insertion order of `devices` keys.
    order: Vec<DeviceId>,
    /// Devices referenced by a live connection.
    pinned: HashSet<DeviceId>,
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a device or refresh its name and reachability.
    ///
    /// Returns whether anything observable changed.
    pub fn upsert(&mut self, device: Device) -> bool {
        match self.devices.get_mut(&device.id) {
            Some(existing) => {
                if *existing == device {
                    return false;
                }
                *existing = device;
                true
            }
            None => {
                self.order.push(device.id.clone());
                self.devices.insert(device.id.clone(), device);
                true
            }
        }
    }

    /// Mark a device unreachable. Returns whether it changed.
    pub fn mark_unreachable(&mut self, id: &DeviceId) -> bool {
        match self.devices.get_mut(id) {
            Some(device) if device.reachability != Reachability::Unreachable => {
                device.reachability = Reachability::Unreachable;
                true
            }
            _ => false,
        }
    }

    /// Forget a device.
    ///
    /// Refused while a live connection references it; the caller must tear
    /// the connection down first.
    pub fn remove(&mut self, id: &DeviceId) -> Result<Device, SessionError> {
        if self.pinned.contains(id) {
            return Err(SessionError::PeerInUse(id.clone()));
        }
        let device = self
            .devices
            .remove(id)
            .ok_or_else(|| SessionError::UnknownPeer(id.clone()))?;
        self.order.retain(|known| known != id);
        Ok(device)
    }

    /// Apply one complete peer list from discovery.
    ///
    /// Listed devices are upserted. Unlisted devices are removed, unless a
    /// connection pins them, in which case they are only marked unreachable.
    pub fn apply_peer_list(&mut self, devices: Vec<Device>) -> bool {
        let listed: HashSet<DeviceId> = devices.iter().map(|d| d.id.clone()).collect();
        let mut changed = false;

        for device in devices {
            changed |= self.upsert(device);
        }

        let absent: Vec<DeviceId> = self
            .order
            .iter()
            .filter(|id| !listed.contains(*id))
            .cloned()
            .collect();
        for id in absent {
            if self.pinned.contains(&id) {
                changed |= self.mark_unreachable(&id);
            } else if self.remove(&id).is_ok() {
                changed = true;
            }
        }

        changed
    }

    /// Record that a live connection references `id`.
    pub fn pin(&mut self, id: &DeviceId) {
        self.pinned.insert(id.clone());
    }

    /// Release the connection reference on `id`.
    pub fn unpin(&mut self, id: &DeviceId) {
        self.pinned.remove(id);
    }

    pub fn is_pinned(&self, id: &DeviceId) -> bool {
        self.pinned.contains(id)
    }

    pub fn get(&self, id: &DeviceId) -> Option<&Device> {
        self.devices.get(id)
    }

    pub fn contains(&self, id: &DeviceId) -> bool {
        self.devices.contains_key(id)
    }

    /// Current devices in insertion order.
    pub fn snapshot(&self) -> Vec<Device> {
        self.order
            .iter()
            .filter_map(|id| self.devices.get(id))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}
