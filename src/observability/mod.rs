//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Loader, aggregator and host produce:
//!     → logging.rs (structured log events, one span per load/unload invocation)
//!     → metrics.rs (transition counters, operation latency, source fetches)
//!
//! Consumers:
//!     → stdout (pretty for development, JSON for production)
//!     → Prometheus scrape endpoint (optional)
//! ```
//!
//! # Design Decisions
//! - Every invocation carries a UUID on its span so concurrent loads can be told apart
//! - Metrics are recorded unconditionally; without an installed exporter they are no-ops

pub mod logging;
pub mod metrics;

pub use logging::init_logging;
