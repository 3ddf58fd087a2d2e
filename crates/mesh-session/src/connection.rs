//! Live connections owned by the coordinator.
use mesh_transport::{ChannelHandle, ConnectionId};

use crate::types::DeviceId;

/// One live connection: exactly one opened channel to one device.
#[derive(Debug)]
pub struct Connection {
    device: DeviceId,
    handle: ChannelHandle,
}

impl Connection {
    pub fn new(device: DeviceId, handle: ChannelHandle) -> Self {
        Self { device, handle }
    }

    pub fn id(&self) -> ConnectionId {
        self.handle.id()
    }

    pub fn device(&self) -> &DeviceId {
        &self.device
    }

    pub fn handle(&self) -> &ChannelHandle {
        &self.handle
    }

    pub fn is_live(&self) -> bool {
        !self.handle.is_closed()
    }

    /// Close the channel and give the connection up.
    pub fn teardown(self) {
        self.handle.close();
        tracing::debug!("{}: connection to {} torn down", self.handle.id(), self.device);
    }
}

/// Connections keyed by device, kept in the order they were established.
#[derive(Debug, Default)]
pub struct ConnectionTable {
    connections: Vec<Connection>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. A previous connection to the same device is
    /// returned so the caller can tear it down.
    pub fn insert(&mut self, connection: Connection) -> Option<Connection> {
        let replaced = self.remove(connection.device());
        self.connections.push(connection);
        replaced
    }

    pub fn get(&self, device: &DeviceId) -> Option<&Connection> {
        self.connections.iter().find(|c| c.device() == device)
    }

    pub fn by_id(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.iter().find(|c| c.id() == id)
    }

    pub fn remove(&mut self, device: &DeviceId) -> Option<Connection> {
        let index = self.connections.iter().position(|c| c.device() == device)?;
        Some(self.connections.remove(index))
    }

    pub fn remove_by_id(&mut self, id: ConnectionId) -> Option<Connection> {
        let index = self.connections.iter().position(|c| c.id() == id)?;
        Some(self.connections.remove(index))
    }

    /// Take every connection out of the table.
    pub fn drain(&mut self) -> Vec<Connection> {
        std::mem::take(&mut self.connections)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.iter()
    }

    pub fn devices(&self) -> Vec<DeviceId> {
        self.connections.iter().map(|c| c.device().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }
}
