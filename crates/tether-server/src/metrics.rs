//! Prometheus metrics recorder and `/metrics` endpoint handler.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Install the Prometheus metrics recorder (global).
///
/// Returns the `PrometheusHandle` used to render the `/metrics` endpoint.
/// Must be called once at server startup before any metrics are recorded.
pub fn install_recorder() -> PrometheusHandle {
    let handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("failed to install metrics recorder");
    info!("prometheus metrics recorder installed");
    handle
}

/// Render Prometheus text format from the installed recorder.
pub fn render(handle: &PrometheusHandle) -> String {
    handle.render()
}

// Metric name constants to avoid typos across crates.

/// Calls dispatched (counter, labels: method).
pub const CALLS_TOTAL: &str = "bridge_calls_total";
/// Call errors (counter, labels: method, error_type).
pub const CALL_ERRORS_TOTAL: &str = "bridge_call_errors_total";
/// Call duration seconds (histogram, labels: method).
pub const CALL_DURATION_SECONDS: &str = "bridge_call_duration_seconds";
/// Handlers registered by the startup scan (gauge).
pub const HANDLERS_REGISTERED: &str = "bridge_handlers_registered";
/// Async items accepted (counter).
pub const ASYNC_SUBMITTED_TOTAL: &str = "bridge_async_submitted_total";
/// Async admissions refused (counter).
pub const ASYNC_REJECTED_TOTAL: &str = "bridge_async_rejected_total";
/// Async items skipped because the caller was gone (counter).
pub const ASYNC_SKIPPED_TOTAL: &str = "bridge_async_skipped_total";
/// Accepted async items not yet finished (gauge).
pub const ASYNC_BACKLOG: &str = "bridge_async_backlog";
/// WebSocket connections opened (counter).
pub const WS_CONNECTIONS_TOTAL: &str = "bridge_ws_connections_total";
/// WebSocket disconnections (counter).
pub const WS_DISCONNECTIONS_TOTAL: &str = "bridge_ws_disconnections_total";
/// Active WebSocket connections (gauge).
pub const WS_CONNECTIONS_ACTIVE: &str = "bridge_ws_connections_active";
/// WebSocket connection duration seconds (histogram).
pub const WS_CONNECTION_DURATION_SECONDS: &str = "bridge_ws_connection_duration_seconds";
/// Liveness probes sent (counter).
pub const LIVENESS_PINGS_TOTAL: &str = "bridge_liveness_pings_total";
/// Connections evicted by the liveness monitor (counter).
pub const LIVENESS_EVICTIONS_TOTAL: &str = "bridge_liveness_evictions_total";
