//! Observability for the server control plane.
//!
//! - **Tracing**: structured logging through `tracing-subscriber`, human
//!   readable or JSON
//! - **Metrics**: lifecycle and dependency-check counters recorded through
//!   the `metrics` facade, optionally exported for Prometheus scraping
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              Observability Layer             │
//! ├──────────────────────┬───────────────────────┤
//! │       Tracing        │        Metrics        │
//! │   (tracing + fmt /   │  (metrics + optional  │
//! │    json subscriber)  │  prometheus exporter) │
//! ├──────────────────────┴───────────────────────┤
//! │       Orchestrator / Probe / REST API        │
//! └──────────────────────────────────────────────┘
//! ```

pub mod metrics;
pub mod tracing_setup;

pub use crate::metrics::{install_prometheus_exporter, ControlPlaneMetrics, MetricsError};
pub use crate::tracing_setup::{init_tracing, LogFormat, TracingConfig, TracingError};
