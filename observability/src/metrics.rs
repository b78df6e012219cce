//! Control plane metrics.
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed, so library code can record unconditionally.

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

pub const LIFECYCLE_TOTAL: &str = "control_plane_lifecycle_total";
pub const LIFECYCLE_DURATION: &str = "control_plane_lifecycle_duration_seconds";
pub const DEPENDENCY_CHECKS_TOTAL: &str = "control_plane_dependency_checks_total";
pub const MIRROR_WRITES_TOTAL: &str = "control_plane_env_mirror_writes_total";

#[derive(Debug, thiserror::Error)]
pub enum MetricsError {
    #[error("failed to install Prometheus exporter on {addr}: {message}")]
    Install { addr: SocketAddr, message: String },
}

/// Serve `/metrics` for Prometheus on `addr`. Must be called from within a
/// tokio runtime.
pub fn install_prometheus_exporter(addr: SocketAddr) -> Result<(), MetricsError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| MetricsError::Install {
            addr,
            message: e.to_string(),
        })
}

/// Named recording helpers so metric names and labels stay consistent.
pub struct ControlPlaneMetrics;

impl ControlPlaneMetrics {
    /// One finished lifecycle operation (`action` is `start` or `stop`).
    pub fn lifecycle(server_type: &str, action: &'static str, outcome: &'static str, elapsed: Duration) {
        let server_type = server_type.to_string();
        ::metrics::counter!(
            LIFECYCLE_TOTAL,
            "server_type" => server_type.clone(),
            "action" => action,
            "outcome" => outcome
        )
        .increment(1);
        ::metrics::histogram!(
            LIFECYCLE_DURATION,
            "server_type" => server_type,
            "action" => action
        )
        .record(elapsed.as_secs_f64());
    }

    /// One dependency probe (`dependency` is e.g. `consul`).
    pub fn dependency_check(dependency: &'static str, reachable: bool) {
        ::metrics::counter!(
            DEPENDENCY_CHECKS_TOTAL,
            "dependency" => dependency,
            "reachable" => if reachable { "true" } else { "false" }
        )
        .increment(1);
    }

    pub fn mirror_write(success: bool) {
        ::metrics::counter!(
            MIRROR_WRITES_TOTAL,
            "outcome" => if success { "ok" } else { "error" }
        )
        .increment(1);
    }
}
