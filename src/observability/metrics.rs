//! Metrics collection and exposition.
//!
//! # Metrics
//! - `runtime_unit_transitions_total` (counter): state changes by kind, target state
//! - `runtime_operations_total` (counter): load/unload/reload by outcome
//! - `runtime_operation_duration_seconds` (histogram): invocation latency
//! - `runtime_config_fetch_total` (counter): source fetches by source, outcome
//! - `runtime_config_source_failures_total` (counter): sources that exhausted their retries
//! - `runtime_config_keys` (gauge): leaf keys in the effective tree
//! - `runtime_rollbacks_total` (counter): aborted loads that were unwound

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};
use std::net::SocketAddr;
use std::time::Instant;

use crate::unit::UnitState;

/// Install the Prometheus recorder and its scrape listener on `addr`.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_transition(kind: &str, to: UnitState) {
    counter!(
        "runtime_unit_transitions_total",
        "kind" => kind.to_string(),
        "state" => to.as_str()
    )
    .increment(1);
}

pub fn record_operation(operation: &'static str, succeeded: bool, started: Instant) {
    let outcome = if succeeded { "ok" } else { "error" };
    counter!("runtime_operations_total", "operation" => operation, "outcome" => outcome).increment(1);
    histogram!("runtime_operation_duration_seconds", "operation" => operation)
        .record(started.elapsed().as_secs_f64());
}

pub fn record_source_fetch(source: &str, succeeded: bool) {
    let outcome = if succeeded { "ok" } else { "error" };
    counter!(
        "runtime_config_fetch_total",
        "source" => source.to_string(),
        "outcome" => outcome
    )
    .increment(1);
    if !succeeded {
        counter!("runtime_config_source_failures_total", "source" => source.to_string()).increment(1);
    }
}

pub fn record_config_keys(keys: usize) {
    gauge!("runtime_config_keys").set(keys as f64);
}

pub fn record_rollback(units: usize) {
    counter!("runtime_rollbacks_total").increment(1);
    tracing::debug!(units, "Rollback recorded");
}
