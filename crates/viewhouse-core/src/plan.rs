//! Logical Plans
//!
//! The planner's output: a declarative description of where a query's data
//! comes from and how the output columns are computed. Plans are pure data -
//! rendering to engine SQL happens in the engine layer, execution in the
//! executor.
//!
//! A plan's shape depends on how the source was matched:
//!
//! - **Exact**: the view already has the query's grain and dimensions; stored
//!   measure columns are projected directly, no regrouping.
//! - **Partial**: the view is finer than the query; rows are regrouped by the
//!   query's dimensions and partial measures are combined (sum of sums, sum
//!   of counts, min of mins, max of maxes, avg = sum/count).
//! - **Base**: a pruned scan over lake partitions with aggregates computed
//!   from raw events.
//! - **Sampled**: a base scan over a bernoulli sample, flagged approximate.

use serde::{Deserialize, Serialize};

use crate::query::{AggFunc, Aggregate, OrderBy, Predicate};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlanSource {
    /// A materialized view's ready directory.
    View { name: String },
    /// The base lake.
    Base,
}

impl PlanSource {
    /// Telemetry label: the view name or "base".
    pub fn label(&self) -> &str {
        match self {
            PlanSource::View { name } => name,
            PlanSource::Base => "base",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchType {
    Exact,
    Partial,
    Base,
    Sampled,
}

impl MatchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchType::Exact => "exact",
            MatchType::Partial => "partial",
            MatchType::Base => "base",
            MatchType::Sampled => "sampled",
        }
    }
}

/// One output column of a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "expr", rename_all = "snake_case")]
pub enum ColumnExpr {
    /// A source column projected as-is (dimension or grain key).
    Column { name: String },

    /// Week bucket derived from the source's day column.
    WeekOfDay,

    /// An aggregate computed from raw rows (base scans).
    Aggregate { agg: Aggregate },

    /// A stored measure column read directly (exact view match).
    MeasureRef { measure: String },

    /// A partial measure combined under regrouping. `Sum` and `Count`
    /// partials are summed; `Min`/`Max` partials take min/max.
    Combine { func: AggFunc, measure: String },

    /// Average recomputed from stored sum and count partials.
    AvgFromParts { sum: String, count: String },
}

/// A projected output column with its CSV header label.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectionItem {
    #[serde(flatten)]
    pub expr: ColumnExpr,
    pub label: String,
}

impl ProjectionItem {
    pub fn column(name: &str) -> ProjectionItem {
        ProjectionItem {
            expr: ColumnExpr::Column {
                name: name.to_string(),
            },
            label: name.to_string(),
        }
    }
}

/// The executable representation of one routed query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    pub source: PlanSource,

    pub match_type: MatchType,

    /// Deterministic routing score this plan won with.
    pub score: i32,

    /// Parquet globs the scan reads.
    pub scan_globs: Vec<String>,

    /// Output columns in select order.
    pub projection: Vec<ProjectionItem>,

    /// Filters still applied at scan time (build-time view filters and
    /// measure-consumed filters are already excluded).
    pub residual_filters: Vec<Predicate>,

    /// Grouping expressions; empty means no GROUP BY (global aggregate or
    /// exact view rows passed through).
    pub group_exprs: Vec<ColumnExpr>,

    /// Filtered-measure guard: a stored count measure that must be positive
    /// for a group to exist, mirroring the base scan's WHERE semantics.
    pub group_guard: Option<String>,

    /// Canonical days the scan was pruned to (telemetry; empty = unpruned).
    pub partition_days: Vec<String>,

    /// Bernoulli sampling rate for approximate scans.
    pub sampling_rate: Option<f64>,

    pub order_by: Vec<OrderBy>,

    pub limit: Option<u64>,
}

impl Plan {
    pub fn is_view(&self) -> bool {
        matches!(self.source, PlanSource::View { .. })
    }

    pub fn is_approximate(&self) -> bool {
        self.sampling_rate.is_some()
    }

    /// CSV header labels in output order.
    pub fn labels(&self) -> Vec<&str> {
        self.projection.iter().map(|p| p.label.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_label() {
        assert_eq!(
            PlanSource::View {
                name: "mv_day_country".to_string()
            }
            .label(),
            "mv_day_country"
        );
        assert_eq!(PlanSource::Base.label(), "base");
    }

    #[test]
    fn test_plan_serializes_for_telemetry() {
        let plan = Plan {
            source: PlanSource::Base,
            match_type: MatchType::Base,
            score: 85,
            scan_globs: vec!["lake/events/day=2024-01-01/**/*.parquet".to_string()],
            projection: vec![ProjectionItem::column("country")],
            residual_filters: vec![],
            group_exprs: vec![ColumnExpr::Column {
                name: "country".to_string(),
            }],
            group_guard: None,
            partition_days: vec!["2024-01-01".to_string()],
            sampling_rate: None,
            order_by: vec![],
            limit: None,
        };
        let json = serde_json::to_string(&plan).unwrap();
        let back: Plan = serde_json::from_str(&json).unwrap();
        assert_eq!(plan, back);
        assert!(!plan.is_approximate());
    }
}
