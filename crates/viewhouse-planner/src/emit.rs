//! Plan Emission
//!
//! Turns a scored candidate (or the base lake) into a concrete [`Plan`].
//! Emission decides column-by-column how each select item is produced:
//! stored measure reads and partial-combiners for views, raw aggregates for
//! base scans, and the derived week bucket wherever the source has no
//! physical `week` column.

use std::path::Path;

use viewhouse_core::plan::{ColumnExpr, MatchType, Plan, PlanSource, ProjectionItem};
use viewhouse_core::query::{QuerySpec, SelectItem};
use viewhouse_core::{format_day, Grain};
use viewhouse_lake::Lake;

use crate::error::Result;
use crate::score::{BoundAggregate, ViewCandidate};

/// Emit the plan for a winning view candidate.
pub fn view_plan(query: &QuerySpec, candidate: &ViewCandidate, mvs_root: &Path) -> Result<Plan> {
    let desc = &candidate.descriptor;
    let glob = format!("{}/{}/ready/**/*.parquet", mvs_root.display(), desc.name);

    // Week is physical only at week grain; finer views derive it from day.
    let week_is_physical = desc.grain == Grain::Week;
    let dim_expr = |col: &str| -> ColumnExpr {
        if col == "week" && !week_is_physical {
            ColumnExpr::WeekOfDay
        } else {
            ColumnExpr::Column {
                name: col.to_string(),
            }
        }
    };

    let mut projection = Vec::with_capacity(query.select.len());
    let mut agg_idx = 0usize;
    for item in &query.select {
        match item {
            SelectItem::Dimension(d) => projection.push(ProjectionItem {
                expr: dim_expr(d),
                label: d.clone(),
            }),
            SelectItem::Aggregate(agg) => {
                let bound = &candidate.bound[agg_idx];
                agg_idx += 1;
                let expr = match (bound, candidate.needs_regroup) {
                    (BoundAggregate::Measure(m), false) => ColumnExpr::MeasureRef {
                        measure: m.clone(),
                    },
                    (BoundAggregate::Measure(m), true) => ColumnExpr::Combine {
                        func: agg.func,
                        measure: m.clone(),
                    },
                    (BoundAggregate::AvgStored(m), _) => ColumnExpr::MeasureRef {
                        measure: m.clone(),
                    },
                    (BoundAggregate::AvgParts { sum, count }, _) => ColumnExpr::AvgFromParts {
                        sum: sum.clone(),
                        count: count.clone(),
                    },
                };
                projection.push(ProjectionItem {
                    expr,
                    label: agg.label(),
                });
            }
        }
    }

    let group_exprs = if candidate.needs_regroup {
        query.group_by.iter().map(|g| dim_expr(g)).collect()
    } else {
        Vec::new()
    };

    Ok(Plan {
        source: PlanSource::View {
            name: desc.name.clone(),
        },
        match_type: candidate.match_type,
        score: candidate.score,
        scan_globs: vec![glob],
        projection,
        residual_filters: candidate.residual.clone(),
        group_exprs,
        group_guard: candidate.guard.clone(),
        partition_days: vec![],
        sampling_rate: None,
        order_by: query.order_by.clone(),
        limit: query.limit,
    })
}

/// Emit a base-scan plan, pruning day partitions from the query's date
/// predicates. With no date predicate the scan covers the whole lake.
pub fn base_plan(
    query: &QuerySpec,
    lake: &Lake,
    score: i32,
    match_type: MatchType,
    sampling_rate: Option<f64>,
) -> Result<Plan> {
    let has_date_filter = query
        .filters
        .iter()
        .any(|p| p.col == "day" || p.col == "week");

    let (scan_globs, partition_days) = if has_date_filter {
        let days = lake.prune(&query.filters)?;
        let globs = lake.partition_globs(&days);
        (globs, days.iter().map(|d| format_day(*d)).collect())
    } else {
        (vec![lake.full_glob()], vec![])
    };

    let dim_expr = |col: &str| -> ColumnExpr {
        if col == "week" {
            ColumnExpr::WeekOfDay
        } else {
            ColumnExpr::Column {
                name: col.to_string(),
            }
        }
    };

    let projection = query
        .select
        .iter()
        .map(|item| match item {
            SelectItem::Dimension(d) => ProjectionItem {
                expr: dim_expr(d),
                label: d.clone(),
            },
            SelectItem::Aggregate(agg) => ProjectionItem {
                expr: ColumnExpr::Aggregate { agg: agg.clone() },
                label: agg.label(),
            },
        })
        .collect();

    let group_exprs = query.group_by.iter().map(|g| dim_expr(g)).collect();

    Ok(Plan {
        source: PlanSource::Base,
        match_type,
        score,
        scan_globs,
        projection,
        residual_filters: query.filters.clone(),
        group_exprs,
        group_guard: None,
        partition_days,
        sampling_rate,
        order_by: query.order_by.clone(),
        limit: query.limit,
    })
}
