//! lanshare: local network-sharing proxy
//!
//! This crate turns a host into a network-sharing proxy: one TCP and one UDP
//! listener on a single configured port, with an observable lifecycle exposed
//! to the hosting shell.
//!
//! # Architecture
//!
//! - **Status**: per-subsystem lifecycle broadcast; subscribers always see the
//!   current value first, then every change
//! - **Event**: fire-and-forget buses for transient error/connection notices
//! - **Lock**: serialized, cancellation-proof wake-lock coordination
//! - **Proxy**: the supervisor actor owning both transport accept loops
//! - **Network**: the LAN/group-formation collaborator behind a trait
//! - **Service**: the lifecycle orchestrator tying status, wake lock and
//!   shutdown signal together for the host shell
//! - **Config**: hierarchical TOML configuration read live at runtime
//!
//! All shared broadcasters, buses and guards are constructed once in the
//! binary's composition root and injected; nothing in the library is global
//! state.

#![warn(clippy::all)]
#![warn(missing_docs)]

pub mod cli;
pub mod config;
pub mod event;
pub mod lock;
pub mod network;
pub mod proxy;
pub mod service;
pub mod status;
