//! Lifecycle orchestration for the hosting shell.
//!
//! [`ForegroundHandler`] is the reactive glue between the subsystems: it
//! watches both status broadcasters and the shutdown bus, and drives the
//! wake lock from what it observes. The watchers are deliberately split —
//! one per concern — so a slow reaction to one signal can never starve the
//! others, and so the wake lock is released on `Error` no matter which
//! subsystem reported it first.

use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::event::{EventBus, ShutdownEvent};
use crate::lock::Locker;
use crate::network::Network;
use crate::status::{RunningStatus, StatusBroadcaster};

/// Callback invoked when a shutdown event arrives.
pub type ShutdownCallback = Arc<dyn Fn() + Send + Sync>;

/// Orchestrates proxy lifecycle side effects for the host shell.
pub struct ForegroundHandler {
    shutdown_bus: EventBus<ShutdownEvent>,
    locker: Locker,
    network: Arc<dyn Network>,
    proxy_status: StatusBroadcaster,
    /// The watcher task group; aborted together on stop or restart.
    watchers: Mutex<JoinSet<()>>,
}

impl ForegroundHandler {
    /// Wire the handler against the shared singletons.
    pub fn new(
        shutdown_bus: EventBus<ShutdownEvent>,
        locker: Locker,
        network: Arc<dyn Network>,
        proxy_status: StatusBroadcaster,
    ) -> Self {
        Self {
            shutdown_bus,
            locker,
            network,
            proxy_status,
            watchers: Mutex::new(JoinSet::new()),
        }
    }

    /// Start the proxy lifecycle: spawn the watch tasks and bring up the
    /// network. Any watchers from a previous start are cancelled first.
    ///
    /// `on_shutdown` is invoked when a [`ShutdownEvent`] arrives; the host
    /// shell uses it to terminate its service.
    pub async fn start_proxy(&self, on_shutdown: ShutdownCallback) {
        let mut watchers = self.watchers.lock().await;
        watchers.abort_all();

        // Kill the service when a shutdown event is received.
        let mut shutdown_rx = self.shutdown_bus.subscribe();
        watchers.spawn(async move {
            while shutdown_rx.recv().await.is_ok() {
                debug!("Shutdown event received");
                on_shutdown();
            }
        });

        // Watch status of the network layer.
        let mut network_status = self.network.status().subscribe();
        let locker = self.locker.clone();
        watchers.spawn(async move {
            while let Some(status) = network_status.next().await {
                match status {
                    RunningStatus::Error { message } => {
                        warn!("Network error: {message}");
                        locker.release().await;
                    }
                    other => debug!("Network status changed: {other}"),
                }
            }
        });

        // Watch status of the proxy.
        let mut proxy_status = self.proxy_status.subscribe();
        let locker = self.locker.clone();
        watchers.spawn(async move {
            while let Some(status) = proxy_status.next().await {
                match status {
                    RunningStatus::Running => {
                        debug!("Proxy server started, claiming wake lock");
                        locker.acquire().await;
                    }
                    RunningStatus::Error { message } => {
                        warn!("Proxy error: {message}");
                        locker.release().await;
                    }
                    other => debug!("Proxy status changed: {other}"),
                }
            }
        });

        // Bring the network up.
        let network = self.network.clone();
        watchers.spawn(async move {
            debug!("Starting network");
            network.start();
        });
    }

    /// Stop the proxy lifecycle: cancel all watchers, then concurrently
    /// tear the network down and release the wake lock.
    ///
    /// The release here is unconditional; stop is not an error, so it must
    /// not rely on the error-triggered watcher path.
    pub async fn stop_proxy(&self) {
        {
            let mut watchers = self.watchers.lock().await;
            watchers.abort_all();
            while watchers.join_next().await.is_some() {}
        }

        let network = self.network.clone();
        tokio::join!(
            async move {
                debug!("Stopping network");
                network.stop();
            },
            self.locker.release(),
        );
    }
}
