//! Effect executor: the only place the control loop calls the adapter for
//! coordinator-driven work.
//!
//! - StopDiscovery -> adapter.stop_discovery()
//! - TeardownGroup -> adapter.teardown_group()
//!
//! Failures do not stop the remaining effects; they are handed back so the
//! coordinator can surface them.

use mesh_transport::{TransportAdapter, TransportError};

use super::effect::SessionEffect;

/// Execute `effects` in order, returning the failures.
pub(super) async fn execute_effects(
    effects: Vec<SessionEffect>,
    adapter: &dyn TransportAdapter,
) -> Vec<TransportError> {
    let mut failures = Vec::new();
    for effect in effects {
        let result = match effect {
            SessionEffect::StopDiscovery => adapter.stop_discovery().await,
            SessionEffect::TeardownGroup => adapter.teardown_group().await,
        };
        if let Err(e) = result {
            tracing::debug!("{effect:?} failed: {e}");
            failures.push(e);
        }
    }
    failures
}
