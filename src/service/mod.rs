//! Host service layer.
//!
//! The pieces a hosting shell (daemon, system service) talks to: the
//! lifecycle orchestrator that ties proxy status, network status, the wake
//! lock and the shutdown signal together.

pub mod foreground;

pub use foreground::ForegroundHandler;
