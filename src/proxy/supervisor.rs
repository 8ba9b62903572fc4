//! Proxy lifecycle supervisor.
//!
//! [`SharedProxy`] is an actor: `start()`/`stop()` enqueue commands onto an
//! internal channel consumed by a single runner task. Callers never block,
//! commands are handled strictly in arrival order, and a start sequence is
//! always fully unwound before the next command begins.
//!
//! Every start begins with an unconditional teardown, so start-after-start
//! and start-after-error always proceed from a clean slate. `Running` is
//! only broadcast after both transport jobs are registered: a subscriber
//! reacting to `Running` (the wake-lock watcher, for one) is guaranteed both
//! transports are live.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{tcp, udp, TransportKind};
use crate::config::Preferences;
use crate::event::{ConnectionEvent, ErrorEvent, EventBus};
use crate::status::{RunningStatus, StatusBroadcaster};

/// Lowest port the proxy will bind (below are reserved/privileged).
const MIN_PORT: u16 = 1024;

/// Highest port the proxy will bind (safety margin under the ephemeral range).
const MAX_PORT: u16 = 65000;

/// A boxed transport loop ready to be spawned.
pub type LoopFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

/// Produces one accept-loop future per transport.
///
/// The supervisor depends only on this seam; tests substitute inert loops
/// and production wires [`SocketLoopFactory`].
pub trait LoopFactory: Send + Sync {
    /// Build the accept loop for `kind` on `port`.
    fn create(&self, kind: TransportKind, port: u16) -> LoopFuture;
}

/// [`LoopFactory`] over the real socket loops in [`tcp`] and [`udp`].
pub struct SocketLoopFactory {
    status: StatusBroadcaster,
    error_bus: EventBus<ErrorEvent>,
    connection_bus: EventBus<ConnectionEvent>,
    udp_upstream: std::net::SocketAddr,
}

impl SocketLoopFactory {
    /// Wire a factory against the shared status broadcaster and buses.
    pub fn new(
        status: StatusBroadcaster,
        error_bus: EventBus<ErrorEvent>,
        connection_bus: EventBus<ConnectionEvent>,
        udp_upstream: std::net::SocketAddr,
    ) -> Self {
        Self {
            status,
            error_bus,
            connection_bus,
            udp_upstream,
        }
    }
}

impl LoopFactory for SocketLoopFactory {
    fn create(&self, kind: TransportKind, port: u16) -> LoopFuture {
        match kind {
            TransportKind::Tcp => Box::pin(tcp::serve(
                port,
                self.status.clone(),
                self.error_bus.clone(),
                self.connection_bus.clone(),
            )),
            TransportKind::Udp => Box::pin(udp::serve(
                port,
                self.udp_upstream,
                self.status.clone(),
                self.error_bus.clone(),
                self.connection_bus.clone(),
            )),
        }
    }
}

/// One running accept loop.
struct ProxyJob {
    kind: TransportKind,
    handle: JoinHandle<()>,
}

enum Command {
    Start,
    Stop,
    /// Acknowledged once every previously queued command has completed.
    Sync(oneshot::Sender<()>),
}

struct ProxyInner {
    status: StatusBroadcaster,
    error_bus: EventBus<ErrorEvent>,
    connection_bus: EventBus<ConnectionEvent>,
    prefs: Arc<dyn Preferences>,
    factory: Arc<dyn LoopFactory>,
    jobs: Mutex<Vec<ProxyJob>>,
}

/// The shared TCP/UDP proxy supervisor.
pub struct SharedProxy {
    inner: Arc<ProxyInner>,
    commands: mpsc::UnboundedSender<Command>,
    runner: JoinHandle<()>,
}

impl SharedProxy {
    /// Create the supervisor and spawn its command loop.
    ///
    /// Must be called within a tokio runtime.
    pub fn new(
        status: StatusBroadcaster,
        error_bus: EventBus<ErrorEvent>,
        connection_bus: EventBus<ConnectionEvent>,
        prefs: Arc<dyn Preferences>,
        factory: Arc<dyn LoopFactory>,
    ) -> Self {
        let inner = Arc::new(ProxyInner {
            status,
            error_bus,
            connection_bus,
            prefs,
            factory,
            jobs: Mutex::new(Vec::new()),
        });

        let (commands, mut rx) = mpsc::unbounded_channel();
        let runner = {
            let inner = inner.clone();
            tokio::spawn(async move {
                while let Some(command) = rx.recv().await {
                    match command {
                        Command::Start => handle_start(&inner).await,
                        Command::Stop => handle_stop(&inner).await,
                        Command::Sync(ack) => {
                            let _ = ack.send(());
                        }
                    }
                }
            })
        };

        Self {
            inner,
            commands,
            runner,
        }
    }

    /// Queue a proxy start. Never blocks; calls are processed in arrival
    /// order, each fully unwinding any previous state first.
    pub fn start(&self) {
        let _ = self.commands.send(Command::Start);
    }

    /// Queue a proxy stop. Safe to call even if never started.
    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    /// Wait until every command queued before this call has completed.
    pub async fn wait_idle(&self) {
        let (tx, rx) = oneshot::channel();
        if self.commands.send(Command::Sync(tx)).is_ok() {
            let _ = rx.await;
        }
    }

    /// The proxy's status broadcaster.
    pub fn status(&self) -> &StatusBroadcaster {
        &self.inner.status
    }

    /// Number of registered transport jobs (0 or 2 between completed calls).
    pub async fn task_count(&self) -> usize {
        self.inner.jobs.lock().await.len()
    }
}

impl Drop for SharedProxy {
    fn drop(&mut self) {
        self.runner.abort();
        // Registered jobs hold the sockets; they must not outlive the
        // supervisor. Only the runner ever contends for the list, so the
        // try_lock can miss only while a command is still unwinding.
        if let Ok(mut jobs) = self.inner.jobs.try_lock() {
            for job in jobs.drain(..) {
                job.handle.abort();
            }
        }
    }
}

async fn handle_start(inner: &Arc<ProxyInner>) {
    // Unconditional teardown first: start-after-start and start-after-error
    // both begin from a clean slate.
    shutdown(inner).await;

    let port = inner.prefs.proxy_port();
    if !(MIN_PORT..=MAX_PORT).contains(&port) {
        warn!("Port is invalid: {port}");
        inner
            .status
            .set(RunningStatus::error(format!("Port is invalid: {port}")));
        return;
    }

    inner.status.set(RunningStatus::Starting);

    let tcp = proxy_loop(inner, TransportKind::Tcp, port);
    let udp = proxy_loop(inner, TransportKind::Udp, port);

    {
        let mut jobs = inner.jobs.lock().await;
        jobs.push(tcp);
        jobs.push(udp);
    }

    info!("Started proxy server on port: {port}");
    inner.status.set(RunningStatus::Running);
}

async fn handle_stop(inner: &Arc<ProxyInner>) {
    debug!("Stopping proxy server");

    inner.status.set(RunningStatus::Stopping);

    shutdown(inner).await;

    inner.status.set(RunningStatus::NotRunning);
}

/// Cancel all jobs, then clear both buses. Observers reacting to whatever
/// status follows are guaranteed no stale error/connection events remain.
async fn shutdown(inner: &Arc<ProxyInner>) {
    clear_jobs(inner).await;

    inner.error_bus.send(ErrorEvent::Clear);
    inner.connection_bus.send(ConnectionEvent::Clear);
}

async fn clear_jobs(inner: &Arc<ProxyInner>) {
    let drained: Vec<ProxyJob> = {
        let mut jobs = inner.jobs.lock().await;
        jobs.drain(..).collect()
    };

    for job in drained {
        debug!("Cancelling {} proxy job", job.kind);
        job.handle.abort();
        // Join so cancellation has fully landed before the buses are cleared.
        let _ = job.handle.await;
    }
}

fn proxy_loop(inner: &Arc<ProxyInner>, kind: TransportKind, port: u16) -> ProxyJob {
    debug!("{kind} begin proxy server loop");
    let fut = inner.factory.create(kind, port);
    ProxyJob {
        kind,
        handle: tokio::spawn(fut),
    }
}
