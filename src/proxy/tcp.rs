//! TCP accept loop and per-connection relay.
//!
//! Clients on the shared network speak plain HTTP proxy to us: `CONNECT
//! host:port` for tunnels (HTTPS and friends) and absolute-form requests
//! (`GET http://host/path`) for plain HTTP. Either way the relay is a raw
//! bidirectional byte copy once the upstream connection stands; nothing is
//! inspected beyond the request head.
//!
//! The loop owns the listening socket and all per-connection tasks (they
//! live in a [`JoinSet`], so cancelling the loop cancels every relay and
//! closes every socket). Irrecoverable failures are reported through the
//! shared error bus and status broadcaster, never panicked.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use super::error::{ProxyError, ProxyResult};
use super::TransportKind;
use crate::event::{ConnectionEvent, ErrorEvent, EventBus};
use crate::status::{RunningStatus, StatusBroadcaster};

/// Cap on the request head we will buffer while looking for the header
/// terminator.
const MAX_HEAD: usize = 8 * 1024;

/// Run the TCP accept loop on `port` until cancelled.
pub async fn serve(
    port: u16,
    status: StatusBroadcaster,
    error_bus: EventBus<ErrorEvent>,
    connection_bus: EventBus<ConnectionEvent>,
) {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            let message = format!("TCP bind failed on port {port}: {e}");
            warn!("{message}");
            error_bus.send(ErrorEvent::Transport {
                kind: TransportKind::Tcp,
                message: message.clone(),
            });
            status.set(RunningStatus::Error { message });
            return;
        }
    };

    info!("TCP proxy listening on {addr}");

    let mut relays = JoinSet::new();
    loop {
        // Reap finished relays so the set does not grow without bound.
        while relays.try_join_next().is_some() {}

        match listener.accept().await {
            Ok((stream, peer)) => {
                debug!("Accepted TCP connection from {peer}");
                connection_bus.send(ConnectionEvent::Opened {
                    kind: TransportKind::Tcp,
                    peer,
                });

                let bus = connection_bus.clone();
                relays.spawn(async move {
                    if let Err(e) = relay_client(stream).await {
                        // Resets and broken pipes are everyday churn.
                        let msg = e.to_string();
                        if msg.contains("reset") || msg.contains("broken pipe") {
                            debug!("TCP relay for {peer} ended: {e}");
                        } else {
                            debug!("TCP relay for {peer} failed: {e}");
                        }
                    }
                    bus.send(ConnectionEvent::Closed {
                        kind: TransportKind::Tcp,
                        peer,
                    });
                });
            }
            Err(e) => {
                warn!("Failed to accept TCP connection: {e}");
            }
        }
    }
}

/// Handle one client: read the request head, connect upstream, relay bytes.
async fn relay_client(mut client: TcpStream) -> ProxyResult<()> {
    let head = read_head(&mut client).await?;
    let head_text = String::from_utf8_lossy(&head);
    let request_line = head_text
        .lines()
        .next()
        .ok_or_else(|| ProxyError::InvalidRequest("empty request".into()))?;

    let (method, target) = parse_request_line(request_line)?;

    if method.eq_ignore_ascii_case("CONNECT") {
        let mut upstream =
            TcpStream::connect(&target)
                .await
                .map_err(|e| ProxyError::UpstreamConnect {
                    addr: target.clone(),
                    message: e.to_string(),
                })?;

        client
            .write_all(b"HTTP/1.1 200 Connection Established\r\n\r\n")
            .await?;

        // Tunnel bytes the client pipelined behind the header already sit
        // in the buffered head; hand them upstream before the raw copy.
        let body_start = head
            .windows(4)
            .position(|w| w == b"\r\n\r\n")
            .map(|pos| pos + 4)
            .unwrap_or(head.len());
        if body_start < head.len() {
            upstream.write_all(&head[body_start..]).await?;
        }

        tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
    } else {
        let authority = authority_from_uri(&target)?;
        let mut upstream =
            TcpStream::connect(&authority)
                .await
                .map_err(|e| ProxyError::UpstreamConnect {
                    addr: authority.clone(),
                    message: e.to_string(),
                })?;

        // Forward the buffered head verbatim, then relay the rest.
        upstream.write_all(&head).await?;
        tokio::io::copy_bidirectional(&mut client, &mut upstream).await?;
    }

    Ok(())
}

/// Read from the client until the header terminator, bounded by [`MAX_HEAD`].
async fn read_head(client: &mut TcpStream) -> ProxyResult<Vec<u8>> {
    let mut head = Vec::with_capacity(1024);
    let mut buf = [0u8; 1024];

    loop {
        let n = client.read(&mut buf).await?;
        if n == 0 {
            return Err(ProxyError::InvalidRequest(
                "connection closed before request head".into(),
            ));
        }
        head.extend_from_slice(&buf[..n]);

        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            return Ok(head);
        }
        if head.len() > MAX_HEAD {
            return Err(ProxyError::HeadTooLarge);
        }
    }
}

/// Split a request line into method and target.
fn parse_request_line(line: &str) -> ProxyResult<(String, String)> {
    let mut parts = line.split_whitespace();
    let method = parts
        .next()
        .ok_or_else(|| ProxyError::InvalidRequest("missing method".into()))?;
    let target = parts
        .next()
        .ok_or_else(|| ProxyError::InvalidRequest("missing target".into()))?;
    Ok((method.to_string(), target.to_string()))
}

/// Derive `host:port` from an absolute-form request target.
fn authority_from_uri(uri: &str) -> ProxyResult<String> {
    let rest = uri
        .split_once("://")
        .map(|(_, rest)| rest)
        .ok_or_else(|| ProxyError::InvalidRequest(format!("not an absolute URI: {uri}")))?;

    let authority = rest.split('/').next().unwrap_or(rest);
    if authority.is_empty() {
        return Err(ProxyError::InvalidRequest(format!(
            "missing authority: {uri}"
        )));
    }

    // An IPv6 literal has colons inside the brackets; only one after the
    // closing bracket marks a port.
    let has_port = match authority.rfind(']') {
        Some(end) => authority[end + 1..].starts_with(':'),
        None => authority.contains(':'),
    };

    if has_port {
        Ok(authority.to_string())
    } else {
        Ok(format!("{authority}:80"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_request_line_connect() {
        let (method, target) = parse_request_line("CONNECT example.com:443 HTTP/1.1").unwrap();
        assert_eq!(method, "CONNECT");
        assert_eq!(target, "example.com:443");
    }

    #[test]
    fn test_parse_request_line_get() {
        let (method, target) = parse_request_line("GET http://example.com/x HTTP/1.1").unwrap();
        assert_eq!(method, "GET");
        assert_eq!(target, "http://example.com/x");
    }

    #[test]
    fn test_parse_request_line_empty() {
        assert!(parse_request_line("").is_err());
    }

    #[test]
    fn test_authority_default_port() {
        assert_eq!(
            authority_from_uri("http://example.com/path").unwrap(),
            "example.com:80"
        );
    }

    #[test]
    fn test_authority_explicit_port() {
        assert_eq!(
            authority_from_uri("http://example.com:8080/path").unwrap(),
            "example.com:8080"
        );
    }

    #[test]
    fn test_authority_no_path() {
        assert_eq!(
            authority_from_uri("http://example.com").unwrap(),
            "example.com:80"
        );
    }

    #[test]
    fn test_authority_rejects_origin_form() {
        assert!(authority_from_uri("/just/a/path").is_err());
    }

    #[test]
    fn test_authority_ipv6_default_port() {
        assert_eq!(authority_from_uri("http://[::1]/path").unwrap(), "[::1]:80");
    }

    #[test]
    fn test_authority_ipv6_explicit_port() {
        assert_eq!(
            authority_from_uri("http://[::1]:8080/path").unwrap(),
            "[::1]:8080"
        );
    }

    #[tokio::test]
    async fn test_bind_failure_reports_error_status() {
        let status = StatusBroadcaster::new();
        let error_bus: EventBus<ErrorEvent> = EventBus::new();
        let mut errors = error_bus.subscribe();

        // Two loops on one port: the second bind must fail.
        let first = tokio::net::TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = first.local_addr().unwrap().port();

        serve(port, status.clone(), error_bus.clone(), EventBus::new()).await;

        assert!(status.current().is_error());
        assert!(matches!(
            errors.recv().await.unwrap(),
            ErrorEvent::Transport {
                kind: TransportKind::Tcp,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_connect_tunnel_end_to_end() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // Stand in for a remote server.
        let upstream = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = upstream.accept().await.unwrap();
            let mut buf = [0u8; 4];
            sock.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ping");
            sock.write_all(b"pong").await.unwrap();
        });

        // Proxy loop on an ephemeral port.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();
        drop(listener);
        let handle = tokio::spawn(serve(
            proxy_addr.port(),
            StatusBroadcaster::new(),
            EventBus::new(),
            EventBus::new(),
        ));

        // Client side of the tunnel.
        let mut client = loop {
            match tokio::net::TcpStream::connect(proxy_addr).await {
                Ok(c) => break c,
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        };
        client
            .write_all(format!("CONNECT {upstream_addr} HTTP/1.1\r\n\r\n").as_bytes())
            .await
            .unwrap();

        let mut response = [0u8; 39];
        client.read_exact(&mut response).await.unwrap();
        assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 200"));

        client.write_all(b"ping").await.unwrap();
        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"pong");

        handle.abort();
    }

    #[tokio::test]
    async fn test_connect_tunnel_forwards_pipelined_bytes() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        let upstream = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let upstream_addr = upstream.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = upstream.accept().await.unwrap();
            let mut buf = [0u8; 4];
            sock.read_exact(&mut buf).await.unwrap();
            assert_eq!(&buf, b"ping");
            sock.write_all(b"pong").await.unwrap();
        });

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let proxy_addr = listener.local_addr().unwrap();
        drop(listener);
        let handle = tokio::spawn(serve(
            proxy_addr.port(),
            StatusBroadcaster::new(),
            EventBus::new(),
            EventBus::new(),
        ));

        let mut client = loop {
            match tokio::net::TcpStream::connect(proxy_addr).await {
                Ok(c) => break c,
                Err(_) => tokio::time::sleep(std::time::Duration::from_millis(10)).await,
            }
        };

        // Tunnel payload arrives in the same segment as the request head;
        // it must still reach the upstream.
        client
            .write_all(format!("CONNECT {upstream_addr} HTTP/1.1\r\n\r\nping").as_bytes())
            .await
            .unwrap();

        let mut response = [0u8; 39];
        client.read_exact(&mut response).await.unwrap();
        assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 200"));

        let mut reply = [0u8; 4];
        client.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"pong");

        handle.abort();
    }
}
