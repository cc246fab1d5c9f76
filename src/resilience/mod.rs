//! Resilience helpers for unit loads and config source fetches.
//!
//! # Data Flow
//! ```text
//! Config source fetch:
//!     → retries.rs (up to 1 + retries attempts)
//!         → timeouts.rs (per-attempt deadline)
//!         → backoff.rs (jittered exponential delay between attempts)
//!
//! Leaf load / unload:
//!     → timeouts.rs only; a leaf failure is never retried
//! ```
//!
//! # Design Decisions
//! - A deadline is optional; none means wait forever
//! - Retries belong to config sources only, where failures are usually transient

pub mod backoff;
pub mod retries;
pub mod timeouts;

pub use backoff::calculate_backoff;
pub use retries::{retry, RetryPolicy};
pub use timeouts::within;
