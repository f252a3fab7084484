//! Result Comparison
//!
//! Multiset comparison of result rows over a query's dimensions, with the
//! numeric tolerances the validator guarantees:
//!
//! - sums and counts: relative tolerance 1e-9
//! - averages: `|avg_a - avg_b| <= 1e-9 * max(1, |avg_b|)` (the same rule,
//!   anchored at 1 for small magnitudes)
//! - dates and strings: exact on canonical form

use std::cmp::Ordering;

use viewhouse_core::plan::{ColumnExpr, Plan};
use viewhouse_engine::Scalar;

pub const REL_TOLERANCE: f64 = 1e-9;

/// Column roles derived from a plan's projection: dimensions compare
/// exactly, measures numerically.
fn dimension_columns(plan: &Plan) -> Vec<bool> {
    plan.projection
        .iter()
        .map(|p| matches!(p.expr, ColumnExpr::Column { .. } | ColumnExpr::WeekOfDay))
        .collect()
}

/// Compare two result sets as multisets of rows over the plan's dimensions.
/// Returns `Ok(())` or a description of the first divergence.
pub fn rows_match(
    plan: &Plan,
    left: &[Vec<Scalar>],
    right: &[Vec<Scalar>],
) -> std::result::Result<(), String> {
    if left.len() != right.len() {
        return Err(format!(
            "row count mismatch: {} vs {}",
            left.len(),
            right.len()
        ));
    }
    let is_dim = dimension_columns(plan);

    // Canonical order: rows keyed by their dimension values. Aggregated
    // results have one row per key, so pairing sorted rows is the multiset
    // comparison.
    let mut a: Vec<&Vec<Scalar>> = left.iter().collect();
    let mut b: Vec<&Vec<Scalar>> = right.iter().collect();
    let key_cmp = |x: &&Vec<Scalar>, y: &&Vec<Scalar>| -> Ordering {
        for (i, dim) in is_dim.iter().enumerate() {
            if !dim {
                continue;
            }
            let ord = x[i].compare(&y[i]);
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    };
    a.sort_by(key_cmp);
    b.sort_by(key_cmp);

    for (row_a, row_b) in a.iter().zip(&b) {
        for (i, dim) in is_dim.iter().enumerate() {
            let (va, vb) = (&row_a[i], &row_b[i]);
            let label = &plan.projection[i].label;
            if *dim {
                if va.compare(vb) != Ordering::Equal {
                    return Err(format!("dimension {label}: {va} vs {vb}"));
                }
            } else if !numeric_close(va, vb) {
                return Err(format!("measure {label}: {va} vs {vb}"));
            }
        }
    }
    Ok(())
}

/// Numeric equality under the relative tolerance; NULL only equals NULL.
pub fn numeric_close(a: &Scalar, b: &Scalar) -> bool {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => (x - y).abs() <= REL_TOLERANCE * f64::max(1.0, y.abs()),
        (None, None) => a.compare(b) == Ordering::Equal,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use viewhouse_core::plan::{MatchType, PlanSource, ProjectionItem};
    use viewhouse_core::query::{AggFunc, Aggregate};

    fn plan() -> Plan {
        Plan {
            source: PlanSource::Base,
            match_type: MatchType::Base,
            score: 60,
            scan_globs: vec!["g".to_string()],
            projection: vec![
                ProjectionItem::column("country"),
                ProjectionItem {
                    expr: ColumnExpr::Aggregate {
                        agg: Aggregate::new(AggFunc::Sum, Some("bid_price")),
                    },
                    label: "SUM(bid_price)".to_string(),
                },
            ],
            residual_filters: vec![],
            group_exprs: vec![ColumnExpr::Column {
                name: "country".to_string(),
            }],
            group_guard: None,
            partition_days: vec![],
            sampling_rate: None,
            order_by: vec![],
            limit: None,
        }
    }

    fn row(country: &str, sum: f64) -> Vec<Scalar> {
        vec![Scalar::Text(country.to_string()), Scalar::Float(sum)]
    }

    #[test]
    fn test_equal_multisets_match_regardless_of_order() {
        let a = vec![row("JP", 1.5), row("US", 2.0)];
        let b = vec![row("US", 2.0), row("JP", 1.5)];
        assert!(rows_match(&plan(), &a, &b).is_ok());
    }

    #[test]
    fn test_tolerance_absorbs_float_noise() {
        let a = vec![row("JP", 1.5)];
        let b = vec![row("JP", 1.5 + 1e-12)];
        assert!(rows_match(&plan(), &a, &b).is_ok());
    }

    #[test]
    fn test_real_divergence_is_reported() {
        let a = vec![row("JP", 1.5)];
        let b = vec![row("JP", 3.0)];
        let err = rows_match(&plan(), &a, &b).unwrap_err();
        assert!(err.contains("SUM(bid_price)"));
    }

    #[test]
    fn test_row_count_mismatch() {
        let a = vec![row("JP", 1.5)];
        let b = vec![row("JP", 1.5), row("US", 2.0)];
        assert!(rows_match(&plan(), &a, &b).is_err());
    }

    #[test]
    fn test_dimension_mismatch_is_exact() {
        let a = vec![row("JP", 1.5)];
        let b = vec![row("JPX", 1.5)];
        let err = rows_match(&plan(), &a, &b).unwrap_err();
        assert!(err.contains("country"));
    }

    #[test]
    fn test_null_only_equals_null() {
        assert!(numeric_close(&Scalar::Null, &Scalar::Null));
        assert!(!numeric_close(&Scalar::Null, &Scalar::Float(0.0)));
        // Relative tolerance anchored at 1 for small magnitudes.
        assert!(numeric_close(&Scalar::Float(1e-12), &Scalar::Float(0.0)));
        assert!(!numeric_close(&Scalar::Float(1e-6), &Scalar::Float(0.0)));
    }

    #[test]
    fn test_int_and_float_counts_compare() {
        assert!(numeric_close(&Scalar::Int(5), &Scalar::Float(5.0)));
    }
}
