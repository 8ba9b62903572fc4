//! Lifecycle status broadcasting.
//!
//! Each monitored subsystem (the LAN network layer, the TCP/UDP proxy) owns
//! one [`StatusBroadcaster`]. Subscribers always receive the latest status
//! immediately on subscription, then every subsequent change in the order it
//! was set. Setters never block on slow consumers: a consumer that falls
//! behind skips straight to the latest value.
//!
//! # Example
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use lanshare::status::{RunningStatus, StatusBroadcaster};
//!
//! let status = StatusBroadcaster::new();
//! status.set(RunningStatus::Running);
//!
//! // A late subscriber still sees the current value first.
//! let mut stream = status.subscribe();
//! assert_eq!(stream.next().await, Some(RunningStatus::Running));
//! # }
//! ```

use serde::Serialize;
use std::fmt;
use tokio::sync::watch;

/// Lifecycle state of a monitored subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunningStatus {
    /// The subsystem is not running.
    NotRunning,
    /// The subsystem is starting up.
    Starting,
    /// The subsystem is fully running.
    Running,
    /// The subsystem is shutting down.
    Stopping,
    /// The subsystem failed.
    Error {
        /// Human-readable failure description.
        message: String,
    },
}

impl RunningStatus {
    /// Convenience constructor for the error state.
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    /// Whether this status is the error state.
    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error { .. })
    }
}

impl fmt::Display for RunningStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotRunning => write!(f, "not running"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
            Self::Error { message } => write!(f, "error: {message}"),
        }
    }
}

/// Broadcasts the current [`RunningStatus`] of one subsystem.
///
/// Cheap to clone; all clones share the same underlying channel. The
/// broadcaster keeps the last set value so new subscribers never miss the
/// current state.
#[derive(Debug, Clone)]
pub struct StatusBroadcaster {
    tx: watch::Sender<RunningStatus>,
}

impl StatusBroadcaster {
    /// Create a broadcaster starting in [`RunningStatus::NotRunning`].
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(RunningStatus::NotRunning);
        Self { tx }
    }

    /// Store a new status and notify all current subscribers.
    pub fn set(&self, status: RunningStatus) {
        // send_replace never fails even with zero subscribers.
        self.tx.send_replace(status);
    }

    /// The most recently set status.
    pub fn current(&self) -> RunningStatus {
        self.tx.borrow().clone()
    }

    /// Subscribe to status changes.
    ///
    /// The returned stream yields the current value first, then each change
    /// in set order. A slow consumer observes an ordered subsequence ending
    /// at the latest value; it never blocks the setter.
    pub fn subscribe(&self) -> StatusStream {
        StatusStream {
            rx: self.tx.subscribe(),
            primed: false,
        }
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

/// Infinite, cancellable stream of status values for one subscriber.
#[derive(Debug)]
pub struct StatusStream {
    rx: watch::Receiver<RunningStatus>,
    primed: bool,
}

impl StatusStream {
    /// Wait for the next status value.
    ///
    /// The first call returns immediately with the current value. Returns
    /// `None` once the broadcaster has been dropped.
    pub async fn next(&mut self) -> Option<RunningStatus> {
        if !self.primed {
            self.primed = true;
            return Some(self.rx.borrow_and_update().clone());
        }
        self.rx.changed().await.ok()?;
        Some(self.rx.borrow_and_update().clone())
    }
}
