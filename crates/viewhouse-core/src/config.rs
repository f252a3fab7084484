//! Runtime Configuration
//!
//! Knobs shared by the builder, executor and validator:
//!
//! - **threads**: engine worker count (default: available parallelism)
//! - **memory_limit_bytes**: per-batch result buffering cap (default: 4 GiB)
//! - **batch_size_limit**: maximum queries per batch, hard-capped at 20
//! - **sampling_rate**: sampling rate for approximate base scans (default 10%)
//! - **query_deadline_ms / build_deadline_ms**: per-plan and per-build deadlines
//!
//! The time zone is fixed to UTC; it is surfaced here so session setup and
//! telemetry have one source of truth rather than a scattering of literals.

use serde::{Deserialize, Serialize};

use crate::error::QueryError;

/// Hard upper bound on batch size; submissions above this are rejected.
pub const MAX_BATCH_SIZE: usize = 20;

/// Fixed engine time zone.
pub const TIME_ZONE: &str = "UTC";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Engine worker threads (default: available parallelism)
    #[serde(default = "default_threads")]
    pub threads: usize,

    /// Per-batch in-memory result budget in bytes (default: 4 GiB)
    #[serde(default = "default_memory_limit")]
    pub memory_limit_bytes: u64,

    /// Maximum queries per batch, <= 20 (default: 20)
    #[serde(default = "default_batch_size_limit")]
    pub batch_size_limit: usize,

    /// Sampling rate for approximate base scans, 0 < r <= 1 (default: 0.10)
    #[serde(default = "default_sampling_rate")]
    pub sampling_rate: f64,

    /// Per-plan execution deadline in milliseconds (default: 30s)
    #[serde(default = "default_query_deadline_ms")]
    pub query_deadline_ms: u64,

    /// Per-view build deadline in milliseconds (default: 5 min)
    #[serde(default = "default_build_deadline_ms")]
    pub build_deadline_ms: u64,

    /// Dimensions considered high-cardinality when deciding whether an
    /// unmatched ad-hoc query may fall back to a sampled scan.
    #[serde(default = "default_high_cardinality")]
    pub high_cardinality_dimensions: Vec<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            threads: default_threads(),
            memory_limit_bytes: default_memory_limit(),
            batch_size_limit: default_batch_size_limit(),
            sampling_rate: default_sampling_rate(),
            query_deadline_ms: default_query_deadline_ms(),
            build_deadline_ms: default_build_deadline_ms(),
            high_cardinality_dimensions: default_high_cardinality(),
        }
    }
}

impl RuntimeConfig {
    pub fn validate(&self) -> Result<(), QueryError> {
        if self.threads == 0 {
            return Err(QueryError::InvalidConfig(
                "threads must be positive".to_string(),
            ));
        }
        if self.batch_size_limit == 0 || self.batch_size_limit > MAX_BATCH_SIZE {
            return Err(QueryError::InvalidConfig(format!(
                "batch_size_limit must be in 1..={MAX_BATCH_SIZE}"
            )));
        }
        if !(self.sampling_rate > 0.0 && self.sampling_rate <= 1.0) {
            return Err(QueryError::InvalidConfig(
                "sampling_rate must be in (0, 1]".to_string(),
            ));
        }
        Ok(())
    }

    /// Engine-facing memory limit string, e.g. "4096MB".
    pub fn memory_limit_pragma(&self) -> String {
        format!("{}MB", self.memory_limit_bytes / (1024 * 1024))
    }
}

/// Parse a human size string ("4GB", "512MiB", "1048576") into bytes.
pub fn parse_size(input: &str) -> Result<u64, QueryError> {
    let s = input.trim();
    let split = s
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(s.len());
    let (num, unit) = s.split_at(split);
    let value: f64 = num
        .parse()
        .map_err(|_| QueryError::InvalidConfig(format!("invalid size: {input}")))?;
    let multiplier: u64 = match unit.trim().to_ascii_uppercase().as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        "T" | "TB" | "TIB" => 1024u64.pow(4),
        other => {
            return Err(QueryError::InvalidConfig(format!(
                "unknown size unit: {other}"
            )))
        }
    };
    Ok((value * multiplier as f64) as u64)
}

fn default_threads() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

fn default_memory_limit() -> u64 {
    4 * 1024 * 1024 * 1024 // 4 GiB
}

fn default_batch_size_limit() -> usize {
    MAX_BATCH_SIZE
}

fn default_sampling_rate() -> f64 {
    0.10
}

fn default_query_deadline_ms() -> u64 {
    30_000
}

fn default_build_deadline_ms() -> u64 {
    300_000 // 5 minutes
}

fn default_high_cardinality() -> Vec<String> {
    vec!["user_id".to_string()]
}
