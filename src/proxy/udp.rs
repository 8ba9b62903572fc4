//! UDP datagram forward loop.
//!
//! Plain UDP datagrams carry no destination, so the loop forwards every
//! client datagram to one configured upstream (a DNS resolver by default),
//! NAT-style: each client peer gets its own outbound socket, and a reply
//! pump copies upstream answers back through the listener socket to that
//! peer.
//!
//! Sessions are evicted when the upstream goes quiet for [`SESSION_IDLE`]
//! or when forwarding to it fails; eviction cancels the pump and frees the
//! outbound socket, so the table stays bounded by the number of live peers.
//! Reply pumps live in a [`JoinSet`] owned by the loop; cancelling the loop
//! tears every session socket down with it. Bind failure is reported through
//! the shared error bus and status broadcaster.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::net::UdpSocket;
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::TransportKind;
use crate::event::{ConnectionEvent, ErrorEvent, EventBus};
use crate::status::{RunningStatus, StatusBroadcaster};

/// Largest datagram we will relay.
const MAX_DATAGRAM: usize = 64 * 1024;

/// Sessions with no upstream reply for this long are torn down.
const SESSION_IDLE: Duration = Duration::from_secs(60);

/// One NAT entry: the outbound socket plus the handle to cancel its pump.
struct Session {
    outbound: Arc<UdpSocket>,
    pump: AbortHandle,
}

/// Shared between the forward loop and the pumps so either side can evict.
type SessionMap = Arc<Mutex<HashMap<SocketAddr, Session>>>;

/// Run the UDP forward loop on `port` until cancelled.
pub async fn serve(
    port: u16,
    upstream: SocketAddr,
    status: StatusBroadcaster,
    error_bus: EventBus<ErrorEvent>,
    connection_bus: EventBus<ConnectionEvent>,
) {
    serve_with_idle(port, upstream, SESSION_IDLE, status, error_bus, connection_bus).await
}

async fn serve_with_idle(
    port: u16,
    upstream: SocketAddr,
    idle: Duration,
    status: StatusBroadcaster,
    error_bus: EventBus<ErrorEvent>,
    connection_bus: EventBus<ConnectionEvent>,
) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let socket = match UdpSocket::bind(addr).await {
        Ok(socket) => Arc::new(socket),
        Err(e) => {
            let message = format!("UDP bind failed on port {port}: {e}");
            warn!("{message}");
            error_bus.send(ErrorEvent::Transport {
                kind: TransportKind::Udp,
                message: message.clone(),
            });
            status.set(RunningStatus::Error { message });
            return;
        }
    };

    info!("UDP proxy listening on {addr}, forwarding to {upstream}");

    let sessions: SessionMap = Arc::new(Mutex::new(HashMap::new()));
    let mut pumps = JoinSet::new();
    let mut buf = vec![0u8; MAX_DATAGRAM];

    loop {
        while pumps.try_join_next().is_some() {}

        let (len, peer) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                warn!("UDP recv failed: {e}");
                continue;
            }
        };

        let existing = sessions
            .lock()
            .expect("session table poisoned")
            .get(&peer)
            .map(|session| session.outbound.clone());
        let outbound = match existing {
            Some(outbound) => outbound,
            None => {
                match open_session(
                    &socket,
                    peer,
                    upstream,
                    idle,
                    &sessions,
                    &connection_bus,
                    &mut pumps,
                )
                .await
                {
                    Some(outbound) => outbound,
                    None => continue,
                }
            }
        };

        if let Err(e) = outbound.send(&buf[..len]).await {
            debug!("UDP session for {peer} ended: {e}");
            evict(&sessions, peer, &connection_bus);
        }
    }
}

/// Create the outbound socket for a new peer, register the session and
/// start its reply pump.
async fn open_session(
    listener: &Arc<UdpSocket>,
    peer: SocketAddr,
    upstream: SocketAddr,
    idle: Duration,
    sessions: &SessionMap,
    connection_bus: &EventBus<ConnectionEvent>,
    pumps: &mut JoinSet<()>,
) -> Option<Arc<UdpSocket>> {
    let outbound = match UdpSocket::bind(SocketAddr::from(([0, 0, 0, 0], 0))).await {
        Ok(socket) => socket,
        Err(e) => {
            warn!("Failed to open UDP session socket for {peer}: {e}");
            return None;
        }
    };
    if let Err(e) = outbound.connect(upstream).await {
        warn!("Failed to connect UDP session for {peer} to {upstream}: {e}");
        return None;
    }

    debug!("New UDP session {peer} -> {upstream}");
    connection_bus.send(ConnectionEvent::Opened {
        kind: TransportKind::Udp,
        peer,
    });

    let outbound = Arc::new(outbound);
    let pump_socket = outbound.clone();
    let pump_listener = listener.clone();
    let pump_sessions = sessions.clone();
    let pump_bus = connection_bus.clone();
    let pump = pumps.spawn(async move {
        let mut buf = vec![0u8; MAX_DATAGRAM];
        loop {
            let len = match timeout(idle, pump_socket.recv(&mut buf)).await {
                Err(_) => {
                    debug!("UDP session for {peer} idle, closing");
                    break;
                }
                Ok(Err(e)) => {
                    debug!("UDP reply pump for {peer} ended: {e}");
                    break;
                }
                Ok(Ok(len)) => len,
            };
            if let Err(e) = pump_listener.send_to(&buf[..len], peer).await {
                debug!("UDP reply to {peer} failed: {e}");
                break;
            }
        }
        evict(&pump_sessions, peer, &pump_bus);
    });

    sessions.lock().expect("session table poisoned").insert(
        peer,
        Session {
            outbound: outbound.clone(),
            pump,
        },
    );

    Some(outbound)
}

/// Remove a session and cancel its pump. `Closed` is sent exactly once per
/// session no matter which side noticed the end first.
fn evict(sessions: &SessionMap, peer: SocketAddr, connection_bus: &EventBus<ConnectionEvent>) {
    let removed = sessions
        .lock()
        .expect("session table poisoned")
        .remove(&peer);
    if let Some(session) = removed {
        session.pump.abort();
        connection_bus.send(ConnectionEvent::Closed {
            kind: TransportKind::Udp,
            peer,
        });
    }
}
