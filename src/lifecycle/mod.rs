//! Host process lifecycle.
//!
//! # Data Flow
//! ```text
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → HostSignal::Shutdown → unload the tree, exit
//!     SIGHUP         → HostSignal::Reload   → reload the configuration aggregator
//!
//! Shutdown (shutdown.rs):
//!     trigger() → admin server and watcher tasks stop
//!               → a startup load still running stops before its next wave
//!
//! Cancellation:
//!     CancellationToken (child of the shutdown token) shared with an
//!     in-flight load; checked between waves
//! ```
//!
//! # Design Decisions
//! - The tree is unloaded before background tasks are stopped
//! - A second shutdown signal is not special-cased; unload is bounded by unit timeouts

pub mod shutdown;
pub mod signals;

pub use shutdown::Shutdown;
pub use signals::{wait_for_signal, HostSignal};
pub use tokio_util::sync::CancellationToken;
