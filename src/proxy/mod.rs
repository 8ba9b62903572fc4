//! The shared TCP/UDP proxy.
//!
//! [`SharedProxy`] owns the two transport accept loops and the proxy's
//! lifecycle status. `start()`/`stop()` are fire-and-forget and strictly
//! serialized: every call is queued onto the supervisor's own command loop,
//! so concurrent callers can never interleave a torn start/stop.
//!
//! The accept loops themselves ([`tcp`], [`udp`]) are collaborators behind
//! the [`LoopFactory`] seam; the supervisor only spawns, registers and
//! cancels them. They report their own failures through the shared status
//! broadcaster and error bus.

pub mod error;
pub mod supervisor;
pub mod tcp;
pub mod udp;

pub use error::ProxyError;
pub use supervisor::{LoopFactory, LoopFuture, SharedProxy, SocketLoopFactory};

use serde::Serialize;
use std::fmt;

/// Transport handled by one accept loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// TCP stream relay.
    Tcp,
    /// UDP datagram forwarding.
    Udp,
}

impl fmt::Display for TransportKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "TCP"),
            Self::Udp => write!(f, "UDP"),
        }
    }
}
