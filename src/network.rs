//! LAN network layer collaborator.
//!
//! Group formation (hotspot/Wi-Fi Direct ownership) is platform territory
//! and lives behind the [`Network`] trait. The lifecycle orchestrator only
//! needs two things from it: fire-and-forget `start`/`stop`, and a status
//! broadcaster it can watch so a broken network releases the wake lock even
//! when the proxy itself is healthy.

use crate::status::{RunningStatus, StatusBroadcaster};
use tracing::debug;

/// The network layer the proxy shares.
pub trait Network: Send + Sync {
    /// Bring the network up. Non-blocking; progress is reported through
    /// [`Network::status`].
    fn start(&self);

    /// Tear the network down. Non-blocking.
    fn stop(&self);

    /// The network's status broadcaster.
    fn status(&self) -> &StatusBroadcaster;
}

/// Network implementation for an externally managed LAN.
///
/// When the host's hotspot/interface is administered outside this process
/// there is nothing to form; start and stop only publish status so the
/// orchestrator's watchers have a real subsystem to observe.
pub struct StaticNetwork {
    status: StatusBroadcaster,
}

impl StaticNetwork {
    /// Create the network layer with its own status broadcaster.
    pub fn new() -> Self {
        Self {
            status: StatusBroadcaster::new(),
        }
    }
}

impl Default for StaticNetwork {
    fn default() -> Self {
        Self::new()
    }
}

impl Network for StaticNetwork {
    fn start(&self) {
        debug!("Network marked up (externally managed)");
        self.status.set(RunningStatus::Running);
    }

    fn stop(&self) {
        debug!("Network marked down");
        self.status.set(RunningStatus::NotRunning);
    }

    fn status(&self) -> &StatusBroadcaster {
        &self.status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_publishes_running() {
        let network = StaticNetwork::new();
        assert_eq!(network.status().current(), RunningStatus::NotRunning);

        network.start();
        assert_eq!(network.status().current(), RunningStatus::Running);

        network.stop();
        assert_eq!(network.status().current(), RunningStatus::NotRunning);
    }
}
