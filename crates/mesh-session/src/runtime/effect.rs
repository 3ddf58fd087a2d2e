/// Adapter work requested by the coordinator.
///
/// Coordinator handlers return `Vec<SessionEffect>`; the control loop then
/// runs them against the transport adapter through the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEffect {
    /// Stop peer discovery on the adapter.
    StopDiscovery,
    /// Dissolve the group at transport level.
    TeardownGroup,
}
