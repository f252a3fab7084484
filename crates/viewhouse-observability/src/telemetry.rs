//! Routing Telemetry Sidecars
//!
//! For every executed query the executor emits a `<result>.router.json`
//! sidecar describing the routing decision and its cost, and a session-level
//! summary aggregating hit rates. Sidecars are the ground truth when a
//! routing regression is suspected: they record the candidates evaluated,
//! not just the winner.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

/// One query's routing and execution record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRecord {
    pub query_id: String,

    /// Chosen source: a view name or "base".
    pub source: String,

    /// exact | partial | base | sampled
    pub match_type: String,

    /// Winning score, and the base-scan score it had to beat.
    pub score: i32,
    pub base_score: i32,

    /// Every candidate the planner evaluated, serialized by the planner.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub candidates: Vec<serde_json::Value>,

    /// Planner decision time.
    pub routing_ms: f64,

    /// In-engine execution time (memory-only, excludes serialization).
    pub compute_ms: f64,

    /// Result serialization and rename time.
    pub io_ms: f64,

    pub rows: u64,

    /// OK | MEMORY | TIMEOUT | ENGINE_ERROR | SCHEMA_DRIFT
    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    pub approximate: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling_rate: Option<f64>,

    /// Day partitions the scan was pruned to; empty when unpruned.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub partitions_scanned: Vec<String>,

    pub partition_pruning_effective: bool,
}

impl RouteRecord {
    /// Write the sidecar next to the query's result file.
    pub fn write_sidecar(&self, result_path: &Path) -> std::io::Result<PathBuf> {
        let sidecar = result_path.with_extension("router.json");
        let json = serde_json::to_string_pretty(self)
            .unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"));
        std::fs::write(&sidecar, json)?;
        Ok(sidecar)
    }
}

/// Aggregated routing statistics for one execution session.
#[derive(Debug, Default, Serialize)]
pub struct TelemetrySummary {
    pub queries: usize,
    pub exact_hits: usize,
    pub partial_hits: usize,
    pub base_scans: usize,
    pub sampled_scans: usize,
    pub failures: usize,
    pub total_compute_ms: f64,
    pub total_io_ms: f64,
    pub total_rows: u64,
}

/// Collects route records and derives the session summary.
#[derive(Debug, Default)]
pub struct TelemetrySession {
    records: Vec<RouteRecord>,
}

impl TelemetrySession {
    pub fn new() -> TelemetrySession {
        TelemetrySession::default()
    }

    pub fn record(&mut self, record: RouteRecord) {
        self.records.push(record);
    }

    pub fn records(&self) -> &[RouteRecord] {
        &self.records
    }

    pub fn summary(&self) -> TelemetrySummary {
        let mut summary = TelemetrySummary {
            queries: self.records.len(),
            ..Default::default()
        };
        for r in &self.records {
            match r.match_type.as_str() {
                "exact" => summary.exact_hits += 1,
                "partial" => summary.partial_hits += 1,
                "sampled" => summary.sampled_scans += 1,
                _ => summary.base_scans += 1,
            }
            if r.status != "OK" {
                summary.failures += 1;
            }
            summary.total_compute_ms += r.compute_ms;
            summary.total_io_ms += r.io_ms;
            summary.total_rows += r.rows;
        }
        summary
    }

    /// Write the session summary; failures are logged, not fatal.
    pub fn export_summary(&self, path: &Path) {
        let summary = self.summary();
        match serde_json::to_string_pretty(&summary) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    warn!(path = %path.display(), error = %e, "could not write telemetry summary");
                }
            }
            Err(e) => warn!(error = %e, "could not serialize telemetry summary"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(match_type: &str, status: &str) -> RouteRecord {
        RouteRecord {
            query_id: "q1".to_string(),
            source: "mv_day_country".to_string(),
            match_type: match_type.to_string(),
            score: 95,
            base_score: 60,
            candidates: vec![],
            routing_ms: 0.2,
            compute_ms: 12.5,
            io_ms: 1.5,
            rows: 42,
            status: status.to_string(),
            error_kind: None,
            message: None,
            approximate: false,
            sampling_rate: None,
            partitions_scanned: vec![],
            partition_pruning_effective: false,
        }
    }

    #[test]
    fn test_summary_counts() {
        let mut session = TelemetrySession::new();
        session.record(record("exact", "OK"));
        session.record(record("partial", "OK"));
        session.record(record("base", "TIMEOUT"));
        session.record(record("sampled", "OK"));

        let summary = session.summary();
        assert_eq!(summary.queries, 4);
        assert_eq!(summary.exact_hits, 1);
        assert_eq!(summary.partial_hits, 1);
        assert_eq!(summary.base_scans, 1);
        assert_eq!(summary.sampled_scans, 1);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.total_rows, 168);
    }

    #[test]
    fn test_sidecar_path() {
        let tmp = tempfile::TempDir::new().unwrap();
        let result = tmp.path().join("q1.csv");
        let sidecar = record("exact", "OK").write_sidecar(&result).unwrap();
        assert!(sidecar.ends_with("q1.router.json"));
        let raw = std::fs::read_to_string(sidecar).unwrap();
        let back: RouteRecord = serde_json::from_str(&raw).unwrap();
        assert_eq!(back.query_id, "q1");
    }
}
