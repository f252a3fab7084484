//! Batch Superset Optimization
//!
//! When several queries in a batch regroup the same view under the same
//! residual filters, the executor computes one superset aggregate (grouped
//! by the union of their dimensions) and projects each member's result from
//! it in memory. The projection is exact: partial sums and counts are
//! summed, extremes take min/max, and averages are re-derived from sum and
//! count partials - the same combiners a per-member engine run would use.
//!
//! Only regrouping view plans qualify. Exact-match plans are already plain
//! reads of small files, sampled plans are not deterministic across runs,
//! and base scans rarely share enough structure to be worth the fusion.

use std::collections::BTreeMap;

use viewhouse_core::plan::{ColumnExpr, MatchType, Plan, ProjectionItem};
use viewhouse_core::query::{AggFunc, OrderDir};
use viewhouse_engine::Scalar;

/// One schedulable unit of a batch.
#[derive(Debug)]
pub enum ExecutionUnit {
    /// Plan executed on its own; the index points into the batch.
    Single(usize),
    /// A fused group: execute `plan` once, project every member from it.
    Superset { members: Vec<usize>, plan: Plan },
}

/// Partition a batch's plans into execution units.
pub fn group_batch(plans: &[(usize, Plan)]) -> Vec<ExecutionUnit> {
    let mut groups: BTreeMap<String, Vec<usize>> = BTreeMap::new();
    let mut singles: Vec<usize> = Vec::new();

    for (idx, plan) in plans {
        match superset_key(plan) {
            Some(key) => groups.entry(key).or_default().push(*idx),
            None => singles.push(*idx),
        }
    }

    let mut units: Vec<ExecutionUnit> = Vec::new();
    for (_, members) in groups {
        if members.len() < 2 {
            singles.extend(members);
            continue;
        }
        let member_plans: Vec<&Plan> = members
            .iter()
            .map(|i| {
                &plans
                    .iter()
                    .find(|(idx, _)| idx == i)
                    .expect("member index belongs to the batch")
                    .1
            })
            .collect();
        units.push(ExecutionUnit::Superset {
            plan: build_superset(&member_plans),
            members,
        });
    }
    singles.sort_unstable();
    units.extend(singles.into_iter().map(ExecutionUnit::Single));
    units
}

/// Grouping key: same view, same scan, same residual filters and guard.
/// `None` means the plan is ineligible for fusion.
fn superset_key(plan: &Plan) -> Option<String> {
    if !plan.is_view() || plan.sampling_rate.is_some() {
        return None;
    }
    // Every aggregate must be a combinable partial.
    let combinable = plan.projection.iter().all(|item| {
        matches!(
            item.expr,
            ColumnExpr::Column { .. }
                | ColumnExpr::WeekOfDay
                | ColumnExpr::Combine { .. }
                | ColumnExpr::AvgFromParts { .. }
        )
    });
    if !combinable || plan.group_exprs.is_empty() {
        return None;
    }

    let mut filters: Vec<String> = plan
        .residual_filters
        .iter()
        .map(|p| serde_json::to_string(p).unwrap_or_default())
        .collect();
    filters.sort();
    Some(format!(
        "{}|{}|{:?}|{:?}",
        plan.source.label(),
        plan.scan_globs.join(","),
        plan.group_guard,
        filters
    ))
}

fn dim_label(expr: &ColumnExpr) -> String {
    match expr {
        ColumnExpr::Column { name } => name.clone(),
        ColumnExpr::WeekOfDay => "week".to_string(),
        other => unreachable!("non-dimension expression in group position: {other:?}"),
    }
}

/// Superset column name for a combined measure partial.
fn measure_label(func: AggFunc, measure: &str) -> String {
    format!("__agg_{}_{}", func.as_sql().to_lowercase(), measure)
}

/// Build the fused plan: union of member dimensions, union of the measure
/// partials every member needs, no ordering, no limit.
fn build_superset(members: &[&Plan]) -> Plan {
    let template = members[0];

    let mut dims: Vec<ColumnExpr> = Vec::new();
    let mut dim_labels: Vec<String> = Vec::new();
    let mut measures: Vec<(AggFunc, String)> = Vec::new();

    for plan in members {
        for expr in &plan.group_exprs {
            let label = dim_label(expr);
            if !dim_labels.contains(&label) {
                dim_labels.push(label);
                dims.push(expr.clone());
            }
        }
        for item in &plan.projection {
            match &item.expr {
                ColumnExpr::Combine { func, measure } => {
                    if !measures.contains(&(*func, measure.clone())) {
                        measures.push((*func, measure.clone()));
                    }
                }
                ColumnExpr::AvgFromParts { sum, count } => {
                    for pair in [(AggFunc::Sum, sum.clone()), (AggFunc::Count, count.clone())] {
                        if !measures.contains(&pair) {
                            measures.push(pair);
                        }
                    }
                }
                _ => {}
            }
        }
    }

    let mut projection: Vec<ProjectionItem> = dims
        .iter()
        .zip(&dim_labels)
        .map(|(expr, label)| ProjectionItem {
            expr: expr.clone(),
            label: label.clone(),
        })
        .collect();
    projection.extend(measures.iter().map(|(func, measure)| ProjectionItem {
        expr: ColumnExpr::Combine {
            func: *func,
            measure: measure.clone(),
        },
        label: measure_label(*func, measure),
    }));

    Plan {
        source: template.source.clone(),
        match_type: MatchType::Partial,
        score: template.score,
        scan_globs: template.scan_globs.clone(),
        projection,
        residual_filters: template.residual_filters.clone(),
        group_exprs: dims,
        group_guard: template.group_guard.clone(),
        partition_days: vec![],
        sampling_rate: None,
        order_by: vec![],
        limit: None,
    }
}

enum Acc {
    /// Additive partial: running total, whether anything was seen, and
    /// whether every input was integral (to emit Int instead of Float).
    Add { total: f64, seen: bool, integral: bool },
    Extreme { best: Option<Scalar>, min: bool },
    Avg { sum: f64, count: f64 },
}

impl Acc {
    fn for_expr(expr: &ColumnExpr) -> Option<Acc> {
        match expr {
            ColumnExpr::Combine { func, .. } => Some(match func {
                AggFunc::Sum | AggFunc::Count => Acc::Add {
                    total: 0.0,
                    seen: false,
                    integral: true,
                },
                AggFunc::Min => Acc::Extreme {
                    best: None,
                    min: true,
                },
                AggFunc::Max => Acc::Extreme {
                    best: None,
                    min: false,
                },
                AggFunc::Avg => return None,
            }),
            ColumnExpr::AvgFromParts { .. } => Some(Acc::Avg {
                sum: 0.0,
                count: 0.0,
            }),
            _ => None,
        }
    }

    fn finish(self, func: Option<AggFunc>) -> Scalar {
        match self {
            Acc::Add {
                total,
                seen,
                integral,
            } => {
                if func == Some(AggFunc::Count) {
                    Scalar::Int(total as i64)
                } else if !seen {
                    Scalar::Null
                } else if integral {
                    Scalar::Int(total as i64)
                } else {
                    Scalar::Float(total)
                }
            }
            Acc::Extreme { best, .. } => best.unwrap_or(Scalar::Null),
            Acc::Avg { sum, count } => {
                if count == 0.0 {
                    Scalar::Null
                } else {
                    Scalar::Float(sum / count)
                }
            }
        }
    }
}

/// Project one member's exact result from the superset rows.
///
/// `labels` are the superset's output labels, `rows` its materialized rows.
/// Returns the member's rows in its own projection order, sorted and
/// limited per the member plan.
pub fn project_member(member: &Plan, labels: &[String], rows: &[Vec<Scalar>]) -> Vec<Vec<Scalar>> {
    let col = |label: &str| labels.iter().position(|l| l == label);

    // Member grouping key columns within the superset output.
    let key_cols: Vec<usize> = member
        .group_exprs
        .iter()
        .filter_map(|e| col(&dim_label(e)))
        .collect();

    // Regroup.
    let mut groups: BTreeMap<Vec<String>, Vec<&Vec<Scalar>>> = BTreeMap::new();
    for row in rows {
        let key: Vec<String> = key_cols.iter().map(|i| row[*i].to_string()).collect();
        groups.entry(key).or_default().push(row);
    }

    // Global aggregate over an empty superset still yields one row.
    if groups.is_empty() && member.group_exprs.is_empty() {
        groups.insert(vec![], vec![]);
    }

    let mut out: Vec<Vec<Scalar>> = Vec::with_capacity(groups.len());
    for group_rows in groups.values() {
        let mut output_row: Vec<Scalar> = Vec::with_capacity(member.projection.len());
        for item in &member.projection {
            let value = match &item.expr {
                ColumnExpr::Column { .. } | ColumnExpr::WeekOfDay => {
                    let idx = col(&dim_label(&item.expr));
                    match (idx, group_rows.first()) {
                        (Some(i), Some(row)) => row[i].clone(),
                        _ => Scalar::Null,
                    }
                }
                ColumnExpr::Combine { func, measure } => {
                    let idx = col(&measure_label(*func, measure));
                    let mut acc = Acc::for_expr(&item.expr)
                        .expect("combinable expression has an accumulator");
                    if let Some(i) = idx {
                        for row in group_rows.iter() {
                            accumulate(&mut acc, &row[i]);
                        }
                    }
                    acc.finish(Some(*func))
                }
                ColumnExpr::AvgFromParts { sum, count } => {
                    let sum_idx = col(&measure_label(AggFunc::Sum, sum));
                    let count_idx = col(&measure_label(AggFunc::Count, count));
                    let mut total_sum = 0.0;
                    let mut total_count = 0.0;
                    for row in group_rows.iter() {
                        if let (Some(si), Some(ci)) = (sum_idx, count_idx) {
                            if let Some(v) = row[si].as_f64() {
                                total_sum += v;
                            }
                            if let Some(v) = row[ci].as_f64() {
                                total_count += v;
                            }
                        }
                    }
                    Acc::Avg {
                        sum: total_sum,
                        count: total_count,
                    }
                    .finish(None)
                }
                other => unreachable!("superset member with non-combinable expr: {other:?}"),
            };
            output_row.push(value);
        }
        out.push(output_row);
    }

    sort_and_limit(member, &mut out);
    out
}

fn accumulate(acc: &mut Acc, value: &Scalar) {
    match acc {
        Acc::Add {
            total,
            seen,
            integral,
        } => {
            if let Some(v) = value.as_f64() {
                *total += v;
                *seen = true;
                if !matches!(value, Scalar::Int(_)) {
                    *integral = false;
                }
            }
        }
        Acc::Extreme { best, min } => {
            if !value.is_null() {
                let better = match best {
                    None => true,
                    Some(current) => {
                        let ord = value.compare(current);
                        if *min {
                            ord == std::cmp::Ordering::Less
                        } else {
                            ord == std::cmp::Ordering::Greater
                        }
                    }
                };
                if better {
                    *best = Some(value.clone());
                }
            }
        }
        // Avg partials are accumulated explicitly in project_member.
        Acc::Avg { .. } => {}
    }
}

/// Order per the member's ORDER BY (resolved against projection labels) and
/// apply its LIMIT.
pub fn sort_and_limit(member: &Plan, rows: &mut Vec<Vec<Scalar>>) {
    if !member.order_by.is_empty() {
        let keys: Vec<(usize, OrderDir)> = member
            .order_by
            .iter()
            .filter_map(|o| {
                member
                    .projection
                    .iter()
                    .position(|p| p.label == o.col)
                    .map(|i| (i, o.dir))
            })
            .collect();
        rows.sort_by(|a, b| {
            for (idx, dir) in &keys {
                let ord = a[*idx].compare(&b[*idx]);
                let ord = match dir {
                    OrderDir::Asc => ord,
                    OrderDir::Desc => ord.reverse(),
                };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });
    }
    if let Some(limit) = member.limit {
        rows.truncate(limit as usize);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use viewhouse_core::plan::PlanSource;
    use viewhouse_core::query::OrderBy;

    fn view_plan(
        name: &str,
        dims: &[&str],
        projection: Vec<ProjectionItem>,
        order_by: Vec<OrderBy>,
        limit: Option<u64>,
    ) -> Plan {
        Plan {
            source: PlanSource::View {
                name: name.to_string(),
            },
            match_type: MatchType::Partial,
            score: 85,
            scan_globs: vec![format!("/mvs/{name}/ready/**/*.parquet")],
            projection,
            residual_filters: vec![],
            group_exprs: dims
                .iter()
                .map(|d| ColumnExpr::Column {
                    name: d.to_string(),
                })
                .collect(),
            group_guard: None,
            partition_days: vec![],
            sampling_rate: None,
            order_by,
            limit,
        }
    }

    fn combine(func: AggFunc, measure: &str, label: &str) -> ProjectionItem {
        ProjectionItem {
            expr: ColumnExpr::Combine {
                func,
                measure: measure.to_string(),
            },
            label: label.to_string(),
        }
    }

    fn member_day() -> Plan {
        view_plan(
            "mv_hour_wide",
            &["day"],
            vec![
                ProjectionItem::column("day"),
                combine(AggFunc::Sum, "sum_bid", "SUM(bid_price)"),
            ],
            vec![],
            None,
        )
    }

    fn member_country() -> Plan {
        view_plan(
            "mv_hour_wide",
            &["country"],
            vec![
                ProjectionItem::column("country"),
                combine(AggFunc::Count, "events", "COUNT(*)"),
            ],
            vec![OrderBy {
                col: "country".to_string(),
                dir: OrderDir::Asc,
            }],
            None,
        )
    }

    #[test]
    fn test_group_batch_fuses_same_view() {
        let plans = vec![(0usize, member_day()), (1usize, member_country())];
        let units = group_batch(&plans);
        assert_eq!(units.len(), 1);
        match &units[0] {
            ExecutionUnit::Superset { members, plan } => {
                assert_eq!(members, &vec![0, 1]);
                // Union dims: day + country; measures: sum_bid + events.
                let labels: Vec<&str> =
                    plan.projection.iter().map(|p| p.label.as_str()).collect();
                assert_eq!(
                    labels,
                    vec!["day", "country", "__agg_sum_sum_bid", "__agg_count_events"]
                );
                assert!(plan.order_by.is_empty());
                assert!(plan.limit.is_none());
            }
            other => panic!("expected a superset unit, got {other:?}"),
        }
    }

    #[test]
    fn test_exact_and_sampled_plans_stay_single() {
        let mut exact = member_day();
        exact.group_exprs.clear();
        exact.projection = vec![ProjectionItem {
            expr: ColumnExpr::MeasureRef {
                measure: "sum_bid".to_string(),
            },
            label: "SUM(bid_price)".to_string(),
        }];

        let mut sampled = member_day();
        sampled.sampling_rate = Some(0.1);

        let plans = vec![(0usize, exact), (1usize, sampled)];
        let units = group_batch(&plans);
        assert_eq!(units.len(), 2);
        assert!(units
            .iter()
            .all(|u| matches!(u, ExecutionUnit::Single(_))));
    }

    fn superset_fixture() -> (Plan, Vec<String>, Vec<Vec<Scalar>>) {
        let plans = vec![(0usize, member_day()), (1usize, member_country())];
        let units = group_batch(&plans);
        let plan = match units.into_iter().next().unwrap() {
            ExecutionUnit::Superset { plan, .. } => plan,
            _ => unreachable!(),
        };
        let labels: Vec<String> = plan.projection.iter().map(|p| p.label.clone()).collect();
        // (day, country) -> sum_bid partial, events partial
        let rows = vec![
            vec![
                Scalar::Text("2024-01-01".into()),
                Scalar::Text("JP".into()),
                Scalar::Float(10.0),
                Scalar::Int(4),
            ],
            vec![
                Scalar::Text("2024-01-01".into()),
                Scalar::Text("US".into()),
                Scalar::Float(5.0),
                Scalar::Int(2),
            ],
            vec![
                Scalar::Text("2024-01-02".into()),
                Scalar::Text("JP".into()),
                Scalar::Float(2.5),
                Scalar::Int(1),
            ],
        ];
        (plan, labels, rows)
    }

    #[test]
    fn test_project_member_regroups_exactly() {
        let (_plan, labels, rows) = superset_fixture();

        // Member 0: per-day revenue.
        let by_day = project_member(&member_day(), &labels, &rows);
        assert_eq!(by_day.len(), 2);
        assert!(by_day.contains(&vec![
            Scalar::Text("2024-01-01".into()),
            Scalar::Float(15.0)
        ]));
        assert!(by_day.contains(&vec![
            Scalar::Text("2024-01-02".into()),
            Scalar::Float(2.5)
        ]));

        // Member 1: per-country event counts, ordered.
        let by_country = project_member(&member_country(), &labels, &rows);
        assert_eq!(
            by_country,
            vec![
                vec![Scalar::Text("JP".into()), Scalar::Int(5)],
                vec![Scalar::Text("US".into()), Scalar::Int(2)],
            ]
        );
    }

    #[test]
    fn test_project_member_global_aggregate_over_empty_superset() {
        let (_plan, labels, _) = superset_fixture();
        let global = view_plan(
            "mv_hour_wide",
            &[],
            vec![combine(AggFunc::Count, "events", "COUNT(*)")],
            vec![],
            None,
        );
        let rows = project_member(&global, &labels, &[]);
        assert_eq!(rows, vec![vec![Scalar::Int(0)]]);
    }

    #[test]
    fn test_avg_from_parts_projection() {
        let member = view_plan(
            "mv_hour_wide",
            &["day"],
            vec![
                ProjectionItem::column("day"),
                ProjectionItem {
                    expr: ColumnExpr::AvgFromParts {
                        sum: "sum_total".to_string(),
                        count: "cnt_total".to_string(),
                    },
                    label: "AVG(total_price)".to_string(),
                },
            ],
            vec![],
            None,
        );
        let labels = vec![
            "day".to_string(),
            "__agg_sum_sum_total".to_string(),
            "__agg_count_cnt_total".to_string(),
        ];
        let rows = vec![
            vec![
                Scalar::Text("2024-01-01".into()),
                Scalar::Float(30.0),
                Scalar::Int(2),
            ],
            vec![
                Scalar::Text("2024-01-01".into()),
                Scalar::Float(10.0),
                Scalar::Int(2),
            ],
        ];
        let out = project_member(&member, &labels, &rows);
        assert_eq!(
            out,
            vec![vec![Scalar::Text("2024-01-01".into()), Scalar::Float(10.0)]]
        );
    }

    #[test]
    fn test_sort_and_limit() {
        let member = view_plan(
            "mv",
            &["country"],
            vec![
                ProjectionItem::column("country"),
                combine(AggFunc::Sum, "sum_bid", "revenue"),
            ],
            vec![OrderBy {
                col: "revenue".to_string(),
                dir: OrderDir::Desc,
            }],
            Some(1),
        );
        let mut rows = vec![
            vec![Scalar::Text("JP".into()), Scalar::Float(5.0)],
            vec![Scalar::Text("US".into()), Scalar::Float(9.0)],
        ];
        sort_and_limit(&member, &mut rows);
        assert_eq!(rows, vec![vec![Scalar::Text("US".into()), Scalar::Float(9.0)]]);
    }
}
