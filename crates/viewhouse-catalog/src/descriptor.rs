//! Materialized-View Descriptors
//!
//! A descriptor is the immutable metadata record the builder produces and the
//! planner consumes. Its `schema_fingerprint` is a stable hash of the
//! definition (grain, dimensions, filters, measures): two descriptors with
//! the same fingerprint compute the same thing, and the registry refuses to
//! keep two healthy views with identical fingerprints.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use viewhouse_core::query::{AggFunc, Predicate};
use viewhouse_core::Grain;

use crate::error::{CatalogError, Result};

/// File name of the per-view descriptor manifest.
pub const MANIFEST_FILE: &str = "manifest.json";

/// Health state of a materialized view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Health {
    Healthy,
    Building,
    Stale,
    Quarantined,
    Missing,
}

impl Health {
    /// Allowed lifecycle transitions.
    ///
    /// Quarantine is reachable from every state (validator failures trump
    /// everything); leaving quarantine requires a successful rebuild.
    pub fn can_transition(self, to: Health) -> bool {
        use Health::*;
        if to == Quarantined {
            return self != Quarantined;
        }
        matches!(
            (self, to),
            (Missing, Building)
                | (Healthy, Stale)
                | (Healthy, Building)
                | (Stale, Building)
                | (Quarantined, Building)
                // Build completion, or reverting a failed rebuild to the
                // state the previous ready directory still supports.
                | (Building, Healthy)
                | (Building, Stale)
                | (Building, Missing)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Health::Healthy => "HEALTHY",
            Health::Building => "BUILDING",
            Health::Stale => "STALE",
            Health::Quarantined => "QUARANTINED",
            Health::Missing => "MISSING",
        }
    }
}

/// A pre-computed measure: a plain or filtered aggregate.
///
/// `filter` is the measure-level predicate of a filtered aggregate, e.g.
/// `sum(total_price) where type = 'purchase'`. It is independent of the
/// view's build-time `filters`, which restrict every row of the view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MeasureExpr {
    pub func: AggFunc,

    /// Source column; `None` for `count(*)`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<Predicate>,
}

impl MeasureExpr {
    pub fn plain(func: AggFunc, column: Option<&str>) -> MeasureExpr {
        MeasureExpr {
            func,
            column: column.map(|c| c.to_string()),
            filter: None,
        }
    }

    pub fn filtered(func: AggFunc, column: Option<&str>, filter: Predicate) -> MeasureExpr {
        MeasureExpr {
            func,
            column: column.map(|c| c.to_string()),
            filter: Some(filter),
        }
    }
}

/// Immutable metadata for one materialized view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewDescriptor {
    /// Globally unique view name, e.g. `mv_day_country_impr`.
    pub name: String,

    pub grain: Grain,

    /// Non-time grouping columns, in build order. Time-bucket columns come
    /// from `grain.key_columns()` and are not repeated here.
    pub dimensions: Vec<String>,

    /// Build-time row filters; every row of the view satisfies these.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Predicate>,

    /// Measure column name -> computation rule.
    pub measures: BTreeMap<String, MeasureExpr>,

    /// Stable hash of (grain, dimensions, filters, measures).
    pub schema_fingerprint: String,

    /// Parquet files under `ready/`, relative paths.
    #[serde(default)]
    pub files: Vec<String>,

    pub row_count: u64,

    pub byte_size: u64,

    pub built_at: DateTime<Utc>,

    /// Max lake day observed at build time; the staleness watermark.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_watermark: Option<NaiveDate>,

    pub health: Health,
}

impl ViewDescriptor {
    /// All columns present in the view's parquet output: grain key columns,
    /// then dimensions, then measure columns.
    pub fn columns(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = self
            .grain
            .key_columns()
            .iter()
            .copied()
            .collect();
        cols.extend(self.dimensions.iter().map(|d| d.as_str()));
        cols.extend(self.measures.keys().map(|m| m.as_str()));
        cols
    }

    /// Grouping columns (grain key + dimensions) without measures.
    pub fn group_columns(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = self.grain.key_columns().to_vec();
        cols.extend(self.dimensions.iter().map(|d| d.as_str()));
        cols
    }

    /// Find a measure column matching an aggregate rule exactly.
    pub fn find_measure(
        &self,
        func: AggFunc,
        column: Option<&str>,
        filter: Option<&Predicate>,
    ) -> Option<&str> {
        self.measures
            .iter()
            .find(|(_, expr)| {
                expr.func == func
                    && expr.column.as_deref() == column
                    && expr.filter.as_ref() == filter
            })
            .map(|(name, _)| name.as_str())
    }

    pub fn is_healthy(&self) -> bool {
        self.health == Health::Healthy
    }

    /// Write this descriptor to `<view_dir>/manifest.json`.
    pub fn write_manifest(&self, view_dir: &Path) -> Result<()> {
        std::fs::create_dir_all(view_dir)?;
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(view_dir.join(MANIFEST_FILE), json)?;
        Ok(())
    }

    /// Load a descriptor from `<view_dir>/manifest.json`. A malformed
    /// manifest is corruption, not a recoverable miss.
    pub fn load_manifest(view_dir: &Path) -> Result<ViewDescriptor> {
        let path = view_dir.join(MANIFEST_FILE);
        let raw = std::fs::read_to_string(&path).map_err(|e| CatalogError::Corrupt {
            path: path.clone(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&raw).map_err(|e| CatalogError::Corrupt {
            path,
            reason: e.to_string(),
        })
    }
}

/// Stable fingerprint over a view definition.
///
/// The hash covers the canonical JSON of (grain, dimensions, filters,
/// measures); names, file lists and statistics are deliberately excluded so
/// rebuilds of the same definition fingerprint identically.
pub fn compute_fingerprint(
    grain: Grain,
    dimensions: &[String],
    filters: &[Predicate],
    measures: &BTreeMap<String, MeasureExpr>,
) -> String {
    #[derive(Serialize)]
    struct Canonical<'a> {
        grain: Grain,
        dimensions: &'a [String],
        filters: &'a [Predicate],
        measures: &'a BTreeMap<String, MeasureExpr>,
    }
    let canonical = Canonical {
        grain,
        dimensions,
        filters,
        measures,
    };
    // BTreeMap ordering plus struct field order make this byte-stable.
    let json = serde_json::to_vec(&canonical).unwrap_or_default();
    let digest = Sha256::digest(&json);
    hex_string(&digest)
}

fn hex_string(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
