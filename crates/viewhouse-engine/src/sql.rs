//! SQL Generation
//!
//! Renders logical plans and view definitions into the SQL dialect the
//! engine executes. All literal quoting, identifier quoting, date casting
//! and combiner selection is centralized here.
//!
//! Two fixed conventions, both load-bearing for correctness:
//!
//! - `day` (and `week`) arrive from hive partition directories as VARCHAR;
//!   comparisons always go through `CAST(col AS DATE)` against `DATE '...'`
//!   literals so lexicographic accidents cannot creep in.
//! - Aggregate output columns are always aliased to the query's canonical
//!   label (e.g. `"SUM(bid_price)"`), which is what ORDER BY resolves
//!   against and what lands in the CSV header.

use viewhouse_catalog::MeasureExpr;
use viewhouse_core::plan::{ColumnExpr, Plan};
use viewhouse_core::query::{
    AggFunc, Aggregate, CompareOp, OrderBy, OrderDir, Predicate, PredicateValue, ScalarValue,
};
use viewhouse_core::schema;

use crate::error::{EngineError, Result};

/// Quote an identifier (column alias) for SQL.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn string_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

/// Render a scalar literal with column-aware typing: date columns take
/// `DATE '...'` literals, everything else renders by value kind.
pub fn literal(col: &str, value: &ScalarValue) -> String {
    match value {
        ScalarValue::Int(v) => v.to_string(),
        ScalarValue::Float(v) => v.to_string(),
        ScalarValue::Text(s) if schema::is_date_column(col) => format!("DATE '{s}'"),
        ScalarValue::Text(s) => string_literal(s),
    }
}

/// Comparable expression for a column; date columns are cast from their
/// VARCHAR partition representation.
pub fn column_expr(col: &str) -> String {
    if schema::is_date_column(col) {
        format!("CAST({col} AS DATE)")
    } else {
        col.to_string()
    }
}

/// Render one predicate as a boolean SQL condition.
pub fn condition_sql(pred: &Predicate) -> Result<String> {
    condition_sql_over(pred, &column_expr(&pred.col))
}

/// Render a predicate against an explicit left-hand expression. Base scans
/// use this for `week`, which is not a physical column of the lake.
pub fn condition_sql_over(pred: &Predicate, col: &str) -> Result<String> {
    let col = col.to_string();
    let bad_shape = || {
        EngineError::Sql(format!(
            "operator {} on {} has a mismatched operand shape",
            pred.op.as_str(),
            pred.col
        ))
    };
    let sql = match (pred.op, &pred.val) {
        (CompareOp::Eq, PredicateValue::Scalar(v)) => {
            format!("{col} = {}", literal(&pred.col, v))
        }
        (CompareOp::Neq, PredicateValue::Scalar(v)) => {
            format!("{col} != {}", literal(&pred.col, v))
        }
        (CompareOp::Lt, PredicateValue::Scalar(v)) => {
            format!("{col} < {}", literal(&pred.col, v))
        }
        (CompareOp::Lte, PredicateValue::Scalar(v)) => {
            format!("{col} <= {}", literal(&pred.col, v))
        }
        (CompareOp::Gt, PredicateValue::Scalar(v)) => {
            format!("{col} > {}", literal(&pred.col, v))
        }
        (CompareOp::Gte, PredicateValue::Scalar(v)) => {
            format!("{col} >= {}", literal(&pred.col, v))
        }
        (CompareOp::Between, PredicateValue::List(vals)) if vals.len() == 2 => {
            format!(
                "{col} BETWEEN {} AND {}",
                literal(&pred.col, &vals[0]),
                literal(&pred.col, &vals[1])
            )
        }
        (CompareOp::In, PredicateValue::List(vals)) if !vals.is_empty() => {
            let items: Vec<String> = vals.iter().map(|v| literal(&pred.col, v)).collect();
            format!("{col} IN ({})", items.join(", "))
        }
        _ => return Err(bad_shape()),
    };
    Ok(sql)
}

/// Render a WHERE clause, or an empty string when there is nothing to filter.
pub fn where_sql(predicates: &[Predicate]) -> Result<String> {
    if predicates.is_empty() {
        return Ok(String::new());
    }
    let parts: Vec<String> = predicates
        .iter()
        .map(condition_sql)
        .collect::<Result<_>>()?;
    Ok(format!("WHERE {}", parts.join(" AND ")))
}

/// Build-time SQL for a measure over raw event columns.
///
/// Filtered aggregates use `CASE WHEN` without an ELSE so that groups with
/// no matching rows hold NULL sums (matching a base scan's SUM over an
/// empty set) and zero counts.
pub fn measure_sql(expr: &MeasureExpr) -> Result<String> {
    let inner = match &expr.filter {
        None => match (&expr.func, &expr.column) {
            (AggFunc::Count, None) => return Ok("COUNT(*)".to_string()),
            (_, Some(col)) => col.clone(),
            (func, None) => {
                return Err(EngineError::Sql(format!(
                    "{} requires a column",
                    func.as_sql()
                )))
            }
        },
        Some(filter) => {
            let cond = condition_sql(filter)?;
            let then = match (&expr.func, &expr.column) {
                (AggFunc::Count, None) => "1".to_string(),
                (_, Some(col)) => col.clone(),
                (func, None) => {
                    return Err(EngineError::Sql(format!(
                        "{} requires a column",
                        func.as_sql()
                    )))
                }
            };
            format!("CASE WHEN {cond} THEN {then} END")
        }
    };
    Ok(format!("{}({})", expr.func.as_sql(), inner))
}

/// The scan source: one or more parquet globs with hive partition columns.
pub fn source_parquet(globs: &[String]) -> Result<String> {
    if globs.is_empty() {
        return Err(EngineError::Sql("scan has no parquet globs".to_string()));
    }
    let quoted: Vec<String> = globs.iter().map(|g| string_literal(g)).collect();
    if quoted.len() == 1 {
        Ok(format!(
            "read_parquet({}, hive_partitioning = true)",
            quoted[0]
        ))
    } else {
        Ok(format!(
            "read_parquet([{}], hive_partitioning = true)",
            quoted.join(", ")
        ))
    }
}

pub fn order_by_sql(order_by: &[OrderBy]) -> String {
    if order_by.is_empty() {
        return String::new();
    }
    let parts: Vec<String> = order_by
        .iter()
        .map(|o| {
            let dir = match o.dir {
                OrderDir::Asc => "ASC",
                OrderDir::Desc => "DESC",
            };
            format!("{} {dir}", quote_ident(&o.col))
        })
        .collect();
    format!("ORDER BY {}", parts.join(", "))
}

fn group_expr_sql(expr: &ColumnExpr) -> Result<String> {
    match expr {
        ColumnExpr::Column { name } => Ok(name.clone()),
        ColumnExpr::WeekOfDay => Ok("DATE_TRUNC('week', CAST(day AS DATE))".to_string()),
        other => Err(EngineError::Sql(format!(
            "expression cannot appear in GROUP BY: {other:?}"
        ))),
    }
}

fn aggregate_sql(agg: &Aggregate, sampling_rate: Option<f64>) -> String {
    let base = format!(
        "{}({})",
        agg.func.as_sql(),
        agg.column.as_deref().unwrap_or("*")
    );
    // Additive aggregates over a bernoulli sample are scaled back up;
    // avg/min/max are left unscaled.
    match (sampling_rate, agg.func) {
        (Some(rate), AggFunc::Sum) => format!("({base} / {rate})"),
        (Some(rate), AggFunc::Count) => {
            format!("CAST(ROUND({base} / {rate}) AS BIGINT)")
        }
        _ => base,
    }
}

fn projection_sql(plan: &Plan) -> Result<String> {
    let regrouping = !plan.group_exprs.is_empty() && plan.is_view();
    let mut parts = Vec::with_capacity(plan.projection.len());
    for item in &plan.projection {
        let rendered = match &item.expr {
            ColumnExpr::Column { name } => {
                if *name == item.label {
                    name.clone()
                } else {
                    format!("{} AS {}", name, quote_ident(&item.label))
                }
            }
            ColumnExpr::WeekOfDay => format!(
                "DATE_TRUNC('week', CAST(day AS DATE)) AS {}",
                quote_ident(&item.label)
            ),
            ColumnExpr::Aggregate { agg } => format!(
                "{} AS {}",
                aggregate_sql(agg, plan.sampling_rate),
                quote_ident(&item.label)
            ),
            ColumnExpr::MeasureRef { measure } => {
                format!("{} AS {}", measure, quote_ident(&item.label))
            }
            ColumnExpr::Combine { func, measure } => {
                let combiner = match func {
                    // Partial sums and counts are summed; extremes keep
                    // their own function.
                    AggFunc::Sum | AggFunc::Count => "SUM",
                    AggFunc::Min => "MIN",
                    AggFunc::Max => "MAX",
                    AggFunc::Avg => {
                        return Err(EngineError::Sql(
                            "avg partials cannot be combined directly".to_string(),
                        ))
                    }
                };
                format!("{combiner}({measure}) AS {}", quote_ident(&item.label))
            }
            ColumnExpr::AvgFromParts { sum, count } => {
                if regrouping {
                    format!(
                        "SUM({sum}) / NULLIF(SUM({count}), 0) AS {}",
                        quote_ident(&item.label)
                    )
                } else {
                    format!(
                        "{sum} / NULLIF({count}, 0) AS {}",
                        quote_ident(&item.label)
                    )
                }
            }
        };
        parts.push(rendered);
    }
    Ok(parts.join(", "))
}

/// Render a full logical plan into one SELECT statement.
pub fn render_plan(plan: &Plan) -> Result<String> {
    let projection = projection_sql(plan)?;
    let source = source_parquet(&plan.scan_globs)?;

    let sample = match plan.sampling_rate {
        Some(rate) => {
            // Round away float artifacts (0.1 * 100.0 != 10.0 exactly).
            let pct = (rate * 100.0 * 1e6).round() / 1e6;
            format!(" USING SAMPLE {pct} PERCENT (bernoulli)")
        }
        None => String::new(),
    };

    // The group guard keeps view results multiset-equal to a base scan:
    // groups with no rows matching the consumed filter must not appear.
    let render_cond = |p: &Predicate| {
        if !plan.is_view() && p.col == "week" {
            condition_sql_over(p, "DATE_TRUNC('week', CAST(day AS DATE))")
        } else {
            condition_sql(p)
        }
    };
    let mut where_parts: Vec<String> = plan
        .residual_filters
        .iter()
        .map(render_cond)
        .collect::<Result<_>>()?;
    let mut having = String::new();
    if let Some(guard) = &plan.group_guard {
        if plan.group_exprs.is_empty() {
            where_parts.push(format!("{guard} > 0"));
        } else {
            having = format!("HAVING SUM({guard}) > 0");
        }
    }
    let where_clause = if where_parts.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", where_parts.join(" AND "))
    };

    let group_clause = if plan.group_exprs.is_empty() {
        String::new()
    } else {
        let exprs: Vec<String> = plan
            .group_exprs
            .iter()
            .map(group_expr_sql)
            .collect::<Result<_>>()?;
        format!("GROUP BY {}", exprs.join(", "))
    };

    let order_clause = order_by_sql(&plan.order_by);
    let limit_clause = match plan.limit {
        Some(n) => format!("LIMIT {n}"),
        None => String::new(),
    };

    let sql = [
        format!("SELECT {projection}"),
        format!("FROM {source}{sample}"),
        where_clause,
        group_clause,
        having,
        order_clause,
        limit_clause,
    ]
    .into_iter()
    .filter(|part| !part.is_empty())
    .collect::<Vec<_>>()
    .join(" ");

    Ok(sql)
}
