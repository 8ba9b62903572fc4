//! Exclusive resource guard (wake-lock coordination).
//!
//! The proxy holds a system-level wake lock while it is running so the host
//! does not sleep under active traffic. The lock has real cost (battery,
//! inhibited suspend), so its lifecycle must be exact: acquire only from
//! not-held, release only from held, and never leak a hold because a caller
//! was cancelled.
//!
//! [`Locker`] serializes all acquire/release traffic through one mutex and
//! runs the critical sections on a detached task, so an externally cancelled
//! caller can never abandon a release half-way.
//!
//! # Example
//!
//! ```
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! use lanshare::lock::{Locker, NullWakeLock};
//! use std::sync::Arc;
//!
//! let locker = Locker::new(Arc::new(NullWakeLock::default()), Arc::new(|| true));
//! locker.acquire().await;
//! assert!(locker.is_held().await);
//! locker.release().await;
//! assert!(!locker.is_held().await);
//! # }
//! ```

mod error;

pub use error::LockError;

use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// The underlying exclusive primitive.
///
/// Implementations must fail on double-acquire; [`Locker`] is responsible for
/// never calling `acquire` while the primitive is held.
pub trait WakeLock: Send + Sync {
    /// Take the underlying resource.
    fn acquire(&self) -> Result<(), LockError>;
    /// Give the underlying resource back.
    fn release(&self) -> Result<(), LockError>;
}

/// Policy source, re-read on every acquire.
///
/// Returning `false` turns `acquire()` into a no-op (the user opted out of
/// holding the wake lock).
pub type HoldPolicy = dyn Fn() -> bool + Send + Sync;

struct LockerInner {
    lock: Arc<dyn WakeLock>,
    policy: Arc<HoldPolicy>,
    /// Guards `held`; never held across the primitive's I/O for longer than
    /// the critical section itself.
    mutex: Mutex<bool>,
}

/// Serialized, idempotent guard over one [`WakeLock`].
///
/// Cheap to clone; all clones share the same held state.
#[derive(Clone)]
pub struct Locker {
    inner: Arc<LockerInner>,
}

impl Locker {
    /// Create a guard over `lock`, consulting `policy` on every acquire.
    pub fn new(lock: Arc<dyn WakeLock>, policy: Arc<HoldPolicy>) -> Self {
        Self {
            inner: Arc::new(LockerInner {
                lock,
                policy,
                mutex: Mutex::new(false),
            }),
        }
    }

    /// Acquire the resource if the policy allows it.
    ///
    /// Always performs an internal release first: calling `acquire()` twice
    /// without an intervening `release()` must not double-acquire the
    /// underlying primitive. Primitive failures are logged and swallowed;
    /// holding the lock is best-effort and never fatal to the proxy.
    pub async fn acquire(&self) {
        let inner = self.inner.clone();
        // Detached task: runs to completion even if the caller is cancelled.
        let task = tokio::spawn(async move {
            release_locked(&inner).await;

            if !(inner.policy)() {
                debug!("Wake lock disabled by policy, not acquiring");
                return;
            }

            let mut held = inner.mutex.lock().await;
            if !*held {
                match inner.lock.acquire() {
                    Ok(()) => {
                        debug!("Acquired wake lock");
                        *held = true;
                    }
                    Err(e) => warn!("Failed to acquire wake lock: {e}"),
                }
            }
        });
        let _ = task.await;
    }

    /// Release the resource. Safe to call when not held (no-op).
    ///
    /// Runs to completion even if the calling task is cancelled mid-await;
    /// a leaked hold here would drain the battery for as long as the process
    /// lives.
    pub async fn release(&self) {
        let inner = self.inner.clone();
        let task = tokio::spawn(async move {
            release_locked(&inner).await;
        });
        let _ = task.await;
    }

    /// Whether the resource is currently held.
    pub async fn is_held(&self) -> bool {
        *self.inner.mutex.lock().await
    }
}

async fn release_locked(inner: &LockerInner) {
    let mut held = inner.mutex.lock().await;
    if *held {
        match inner.lock.release() {
            Ok(()) => debug!("Released wake lock"),
            Err(e) => warn!("Failed to release wake lock: {e}"),
        }
        *held = false;
    }
}

/// Wake lock backed by an exclusive lock file.
///
/// `acquire` creates the file with `create_new`, so a second acquire without
/// a release is a hard error at the primitive level. External suspend
/// inhibitors can watch this path.
pub struct LockFileWakeLock {
    path: PathBuf,
}

impl LockFileWakeLock {
    /// Lock file under the system runtime directory.
    pub const DEFAULT_PATH: &'static str = "/run/lanshare/proxy.lock";

    /// Create a wake lock at `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl WakeLock for LockFileWakeLock {
    fn acquire(&self) -> Result<(), LockError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|source| LockError::Io {
                path: self.path.clone(),
                source,
            })?;
        }
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&self.path)
        {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                Err(LockError::AlreadyHeld(self.path.clone()))
            }
            Err(source) => Err(LockError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }

    fn release(&self) -> Result<(), LockError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            // Releasing an absent lock file is harmless.
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(LockError::Io {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

/// Wake lock that tracks acquisition without touching the system.
///
/// Used where no inhibitor is available, and by tests that assert on the
/// strict alternation of acquire/release.
#[derive(Debug, Default)]
pub struct NullWakeLock {
    held: AtomicBool,
}

impl NullWakeLock {
    /// Whether the primitive believes it is held.
    pub fn held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

impl WakeLock for NullWakeLock {
    fn acquire(&self) -> Result<(), LockError> {
        if self.held.swap(true, Ordering::SeqCst) {
            return Err(LockError::AlreadyHeld(PathBuf::from("<null>")));
        }
        Ok(())
    }

    fn release(&self) -> Result<(), LockError> {
        self.held.store(false, Ordering::SeqCst);
        Ok(())
    }
}
