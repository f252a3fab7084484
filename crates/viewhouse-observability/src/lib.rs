//! Viewhouse Observability
//!
//! Two complementary views of what the router and executor are doing:
//!
//! - **Prometheus metrics** ([`metrics`]): counters, gauges and histograms
//!   for routing decisions, plan timings, build outcomes, and quarantines.
//! - **Routing telemetry** ([`telemetry`]): per-query sidecar JSON records
//!   written next to each result file, plus an aggregated session summary.
//!   This is the forensic trail: which candidates were evaluated, who won,
//!   with what score, and how long compute vs I/O actually took.

pub mod metrics;
pub mod telemetry;

pub use metrics::init as init_metrics;
pub use metrics::REGISTRY;
pub use telemetry::{RouteRecord, TelemetrySession};
