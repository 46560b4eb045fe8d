//! Metrics collection and exposition.
//!
//! # Metrics
//! - `affinity_pool_connections` (gauge): tracked connections
//! - `affinity_pool_aggregate_state` (gauge): 0=idle 1=connecting 2=ready 3=transient_failure
//! - `affinity_pool_connections_created_total` (counter)
//! - `affinity_pool_connection_creation_failures_total` (counter)
//! - `affinity_pool_state_changes_total` (counter): by new state
//! - `affinity_pool_picks_total` (counter): by outcome
//! - `affinity_pool_affinity_keys` (gauge): bound affinity keys

use std::net::SocketAddr;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

use crate::connectivity::{AggregateState, ConnectionState};

/// Install the Prometheus recorder with an HTTP scrape listener.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}

pub fn record_pool_size(size: usize) {
    ::metrics::gauge!("affinity_pool_connections").set(size as f64);
}

pub fn record_aggregate_state(state: AggregateState) {
    ::metrics::gauge!("affinity_pool_aggregate_state").set(state as u8 as f64);
}

pub fn record_connection_created() {
    ::metrics::counter!("affinity_pool_connections_created_total").increment(1);
}

pub fn record_connection_creation_failed() {
    ::metrics::counter!("affinity_pool_connection_creation_failures_total").increment(1);
}

pub fn record_state_change(state: ConnectionState) {
    let label = match state {
        ConnectionState::Idle => "idle",
        ConnectionState::Connecting => "connecting",
        ConnectionState::Ready => "ready",
        ConnectionState::TransientFailure => "transient_failure",
        ConnectionState::Shutdown => "shutdown",
    };
    ::metrics::counter!("affinity_pool_state_changes_total", "state" => label).increment(1);
}

pub fn record_pick(outcome: &'static str) {
    ::metrics::counter!("affinity_pool_picks_total", "outcome" => outcome).increment(1);
}

pub fn record_affinity_keys(count: usize) {
    ::metrics::gauge!("affinity_pool_affinity_keys").set(count as f64);
}
