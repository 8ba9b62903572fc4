//! End-to-end lifecycle tests: supervisor, orchestrator and wake lock wired
//! together the way the binary wires them.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use lanshare::config::{Config, Settings};
use lanshare::event::{ConnectionEvent, ErrorEvent, EventBus, ShutdownEvent};
use lanshare::lock::{Locker, NullWakeLock};
use lanshare::network::StaticNetwork;
use lanshare::proxy::{LoopFactory, SharedProxy, SocketLoopFactory, TransportKind};
use lanshare::service::ForegroundHandler;
use lanshare::status::{RunningStatus, StatusBroadcaster};

/// Loops that run forever without touching the network.
struct InertLoopFactory;

impl LoopFactory for InertLoopFactory {
    fn create(&self, _kind: TransportKind, _port: u16) -> Pin<Box<dyn Future<Output = ()> + Send>> {
        Box::pin(std::future::pending())
    }
}

struct Harness {
    proxy: SharedProxy,
    handler: ForegroundHandler,
    proxy_status: StatusBroadcaster,
    locker: Locker,
    wake_lock: Arc<NullWakeLock>,
}

fn harness(port: u16) -> Harness {
    let mut config = Config::default();
    config.proxy.port = Some(port);
    let settings = Arc::new(Settings::new(config));

    let proxy_status = StatusBroadcaster::new();
    let error_bus: EventBus<ErrorEvent> = EventBus::new();
    let connection_bus: EventBus<ConnectionEvent> = EventBus::new();
    let shutdown_bus: EventBus<ShutdownEvent> = EventBus::new();

    let wake_lock = Arc::new(NullWakeLock::default());
    let locker = Locker::new(wake_lock.clone(), Arc::new(|| true));

    let proxy = SharedProxy::new(
        proxy_status.clone(),
        error_bus,
        connection_bus,
        settings,
        Arc::new(InertLoopFactory),
    );

    let handler = ForegroundHandler::new(
        shutdown_bus,
        locker.clone(),
        Arc::new(StaticNetwork::new()),
        proxy_status.clone(),
    );

    Harness {
        proxy,
        handler,
        proxy_status,
        locker,
        wake_lock,
    }
}

async fn wait_for_held(locker: &Locker, expected: bool) {
    for _ in 0..200 {
        if locker.is_held().await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("locker never reached held={expected}");
}

#[tokio::test]
async fn full_lifecycle_acquires_and_releases_wake_lock() {
    let h = harness(8080);
    h.handler.start_proxy(Arc::new(|| {})).await;
    h.proxy.start();
    h.proxy.wait_idle().await;

    assert_eq!(h.proxy.status().current(), RunningStatus::Running);
    assert_eq!(h.proxy.task_count().await, 2);
    wait_for_held(&h.locker, true).await;
    assert!(h.wake_lock.held());

    h.handler.stop_proxy().await;
    h.proxy.stop();
    h.proxy.wait_idle().await;

    assert_eq!(h.proxy.status().current(), RunningStatus::NotRunning);
    assert_eq!(h.proxy.task_count().await, 0);
    assert!(!h.locker.is_held().await);
    assert!(!h.wake_lock.held());
}

#[tokio::test]
async fn invalid_port_never_acquires_wake_lock() {
    let h = harness(80);
    h.handler.start_proxy(Arc::new(|| {})).await;
    h.proxy.start();
    h.proxy.wait_idle().await;

    assert_eq!(
        h.proxy.status().current(),
        RunningStatus::error("Port is invalid: 80")
    );
    assert_eq!(h.proxy.task_count().await, 0);

    // Give the watcher a moment; the error must not leave the lock held.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!h.locker.is_held().await);
    assert!(!h.wake_lock.held());
}

#[tokio::test]
async fn runtime_transport_error_releases_wake_lock() {
    let h = harness(8080);
    h.handler.start_proxy(Arc::new(|| {})).await;
    h.proxy.start();
    h.proxy.wait_idle().await;
    wait_for_held(&h.locker, true).await;

    // A transport failing after Running reports through the same broadcaster.
    h.proxy_status
        .set(RunningStatus::error("TCP socket died"));
    wait_for_held(&h.locker, false).await;
}

#[tokio::test]
async fn late_subscriber_sees_running_immediately() {
    let h = harness(8080);
    h.proxy.start();
    h.proxy.wait_idle().await;

    let mut stream = h.proxy.status().subscribe();
    assert_eq!(stream.next().await, Some(RunningStatus::Running));
}

#[tokio::test]
async fn shutdown_event_reaches_host_callback() {
    let shutdown_bus: EventBus<ShutdownEvent> = EventBus::new();
    let locker = Locker::new(Arc::new(NullWakeLock::default()), Arc::new(|| true));
    let handler = ForegroundHandler::new(
        shutdown_bus.clone(),
        locker,
        Arc::new(StaticNetwork::new()),
        StatusBroadcaster::new(),
    );

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let tx = std::sync::Mutex::new(Some(tx));
    handler
        .start_proxy(Arc::new(move || {
            if let Some(tx) = tx.lock().unwrap().take() {
                let _ = tx.send(());
            }
        }))
        .await;

    shutdown_bus.send(ShutdownEvent);
    tokio::time::timeout(Duration::from_secs(2), rx)
        .await
        .expect("shutdown callback not invoked")
        .unwrap();
}

#[tokio::test]
async fn real_socket_loops_bind_and_run() {
    // Grab an ephemeral port in the valid range, then hand it to the proxy.
    let probe = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let mut config = Config::default();
    config.proxy.port = Some(port);
    let settings = Arc::new(Settings::new(config));

    let proxy_status = StatusBroadcaster::new();
    let error_bus: EventBus<ErrorEvent> = EventBus::new();
    let connection_bus: EventBus<ConnectionEvent> = EventBus::new();

    let factory = Arc::new(SocketLoopFactory::new(
        proxy_status.clone(),
        error_bus.clone(),
        connection_bus.clone(),
        "127.0.0.1:5300".parse().unwrap(),
    ));
    let proxy = SharedProxy::new(
        proxy_status.clone(),
        error_bus,
        connection_bus,
        settings,
        factory,
    );

    proxy.start();
    proxy.wait_idle().await;
    assert_eq!(proxy.status().current(), RunningStatus::Running);
    assert_eq!(proxy.task_count().await, 2);

    // The TCP listener is actually accepting.
    let conn = tokio::net::TcpStream::connect(("127.0.0.1", port)).await;
    assert!(conn.is_ok());

    proxy.stop();
    proxy.wait_idle().await;
    assert_eq!(proxy.status().current(), RunningStatus::NotRunning);

    // Sockets are released: the port can be bound again.
    let rebound = tokio::net::TcpListener::bind(("127.0.0.1", port)).await;
    assert!(rebound.is_ok());
}

#[tokio::test]
async fn start_stop_storm_keeps_invariants() {
    let h = Arc::new(harness(8080));

    let mut handles = Vec::new();
    for i in 0..50 {
        let h = h.clone();
        handles.push(tokio::spawn(async move {
            if i % 3 == 0 {
                h.proxy.stop();
            } else {
                h.proxy.start();
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }
    h.proxy.wait_idle().await;

    let count = h.proxy.task_count().await;
    assert!(count == 0 || count == 2, "torn job list: {count}");
}
