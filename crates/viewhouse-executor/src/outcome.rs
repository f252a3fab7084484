//! Plan Outcomes and Batch Reports

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Terminal status of one executed plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PlanStatus {
    Ok,
    Memory,
    Timeout,
    EngineError,
    SchemaDrift,
}

impl PlanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanStatus::Ok => "OK",
            PlanStatus::Memory => "MEMORY",
            PlanStatus::Timeout => "TIMEOUT",
            PlanStatus::EngineError => "ENGINE_ERROR",
            PlanStatus::SchemaDrift => "SCHEMA_DRIFT",
        }
    }
}

/// Per-query execution record in the batch report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryOutcome {
    pub query_id: String,

    pub status: PlanStatus,

    /// input | memory | timeout | engine | drift
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// View name or "base"; "-" when planning itself failed.
    pub source: String,

    pub match_type: String,

    pub score: i32,

    /// In-engine time to a materialized in-memory result.
    pub compute_ms: f64,

    /// Serialization and atomic rename time, after the compute clock stops.
    pub io_ms: f64,

    pub rows: u64,

    /// Estimated bytes the result held in memory.
    pub bytes: u64,

    pub approximate: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<PathBuf>,
}

/// Summary of one executed batch.
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchReport {
    pub batch_id: String,
    pub outcomes: Vec<QueryOutcome>,
    pub status_counts: BTreeMap<String, usize>,
    pub total_compute_ms: f64,
    pub total_io_ms: f64,
    /// Total result bytes buffered across the batch.
    pub buffered_bytes: u64,
    /// Number of superset groups that shared a single engine execution.
    pub superset_groups: usize,
}

impl BatchReport {
    pub fn new(
        batch_id: String,
        outcomes: Vec<QueryOutcome>,
        buffered_bytes: u64,
        superset_groups: usize,
    ) -> BatchReport {
        let mut status_counts = BTreeMap::new();
        let mut total_compute_ms = 0.0;
        let mut total_io_ms = 0.0;
        for outcome in &outcomes {
            *status_counts
                .entry(outcome.status.as_str().to_string())
                .or_insert(0) += 1;
            total_compute_ms += outcome.compute_ms;
            total_io_ms += outcome.io_ms;
        }
        BatchReport {
            batch_id,
            outcomes,
            status_counts,
            total_compute_ms,
            total_io_ms,
            buffered_bytes,
            superset_groups,
        }
    }

    pub fn succeeded(&self) -> usize {
        self.status_counts.get("OK").copied().unwrap_or(0)
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"));
        std::fs::write(path, json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outcome(id: &str, status: PlanStatus) -> QueryOutcome {
        QueryOutcome {
            query_id: id.to_string(),
            status,
            error_kind: None,
            message: None,
            source: "base".to_string(),
            match_type: "base".to_string(),
            score: 60,
            compute_ms: 10.0,
            io_ms: 2.0,
            rows: 5,
            bytes: 100,
            approximate: false,
            output: None,
        }
    }

    #[test]
    fn test_status_serialization() {
        assert_eq!(
            serde_json::to_string(&PlanStatus::EngineError).unwrap(),
            "\"ENGINE_ERROR\""
        );
        assert_eq!(
            serde_json::to_string(&PlanStatus::SchemaDrift).unwrap(),
            "\"SCHEMA_DRIFT\""
        );
    }

    #[test]
    fn test_report_counts() {
        let report = BatchReport::new(
            "batch_001".to_string(),
            vec![
                outcome("q1", PlanStatus::Ok),
                outcome("q2", PlanStatus::Ok),
                outcome("q3", PlanStatus::Memory),
            ],
            300,
            0,
        );
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.status_counts.get("MEMORY"), Some(&1));
        assert!((report.total_compute_ms - 30.0).abs() < 1e-9);
    }
}
