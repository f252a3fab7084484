//! Candidate Scoring and Measure Binding
//!
//! Scoring table (per candidate view):
//!
//! | Component          | Condition                                   | Score |
//! |--------------------|---------------------------------------------|-------|
//! | Grain match        | view grain equals the query grain           | +30   |
//! | Grain coverage     | view grain is finer (reaggregation)         | +20   |
//! | Dimension exact    | view dims equal the query dims              | +30   |
//! | Dimension superset | view dims are a superset                    | +20   |
//! | Filter compatible  | view/measure filters absorb query filters   | +15   |
//! | Measures available | every aggregate computable (gate)           | +20   |
//!
//! The base scan scores a flat 60 (it always has the exact grain and
//! dimensions), plus 25 when the query's date window spans at most seven
//! days and partition pruning makes a raw scan cheap. Candidates are
//! ordered by score, then byte size, then name; the +1..+5 size bonus is
//! reported per candidate but the ordering itself already encodes it.
//!
//! A view survives only if every requested aggregate binds to its measures:
//! `avg(x)` binds to a stored average only when no regrouping is needed,
//! and otherwise requires stored `sum(x)` and `count(x)` partials.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;

use viewhouse_catalog::ViewDescriptor;
use viewhouse_core::plan::MatchType;
use viewhouse_core::query::{
    AggFunc, Aggregate, CompareOp, Predicate, PredicateValue, QuerySpec, ScalarValue,
};
use viewhouse_core::parse_canonical_day;

pub const SCORE_GRAIN_EXACT: i32 = 30;
pub const SCORE_GRAIN_FINER: i32 = 20;
pub const SCORE_DIMS_EXACT: i32 = 30;
pub const SCORE_DIMS_SUPERSET: i32 = 20;
pub const SCORE_FILTER_COMPAT: i32 = 15;
pub const SCORE_MEASURES: i32 = 20;

/// Base-scan baseline: exact grain (+30) and exact dimensions (+30), since
/// the raw lake can always compute precisely what was asked.
pub const SCORE_BASE: i32 = 60;
pub const SCORE_BASE_NARROW_BONUS: i32 = 25;
pub const NARROW_WINDOW_DAYS: i64 = 7;

/// How one query aggregate is served from a view's stored measures.
#[derive(Debug, Clone, PartialEq)]
pub enum BoundAggregate {
    /// A stored measure column; read directly on exact matches, combined
    /// with the aggregate's own combiner under regrouping.
    Measure(String),
    /// A stored average, usable only without regrouping.
    AvgStored(String),
    /// Average recomputed from stored sum and count partials.
    AvgParts { sum: String, count: String },
}

/// A view that survived elimination, with everything emission needs.
#[derive(Debug, Clone)]
pub struct ViewCandidate {
    pub descriptor: Arc<ViewDescriptor>,
    pub score: i32,
    pub size_bonus: i32,
    pub match_type: MatchType,
    /// Parallel to `query.aggregates()`.
    pub bound: Vec<BoundAggregate>,
    /// Query filters still applied at scan time.
    pub residual: Vec<Predicate>,
    /// Filtered count measure guarding group existence, when a query filter
    /// was consumed by filtered measures instead of row filtering.
    pub guard: Option<String>,
    pub needs_regroup: bool,
}

impl ViewCandidate {
    pub fn report(&self) -> CandidateScore {
        CandidateScore {
            name: self.descriptor.name.clone(),
            score: self.score,
            size_bonus: self.size_bonus,
            match_type: self.match_type,
            byte_size: self.descriptor.byte_size,
        }
    }
}

/// Telemetry record for one evaluated candidate.
#[derive(Debug, Clone, Serialize)]
pub struct CandidateScore {
    pub name: String,
    pub score: i32,
    pub size_bonus: i32,
    pub match_type: MatchType,
    pub byte_size: u64,
}

/// Score one healthy view against a query; `None` means eliminated.
pub fn evaluate_view(query: &QuerySpec, desc: Arc<ViewDescriptor>) -> Option<ViewCandidate> {
    let required = query.required_grain();
    if !desc.grain.can_serve(required) {
        return None;
    }

    let q_dims: BTreeSet<&str> = query.non_time_dimensions().into_iter().collect();
    let v_dims: BTreeSet<&str> = desc.dimensions.iter().map(|d| d.as_str()).collect();
    if !q_dims.is_subset(&v_dims) {
        return None;
    }

    let grain_exact = desc.grain == required;
    let dims_exact = q_dims == v_dims;
    let needs_regroup = !(grain_exact && dims_exact);

    // Every build-time filter must be pinned by an identical query
    // predicate; otherwise the view is missing rows the query wants.
    if !desc.filters.iter().all(|f| query.filters.contains(f)) {
        return None;
    }

    // Partition the query's filters: consumed by the view's build filter,
    // applicable at scan time, or in need of a filtered measure.
    let filterable: BTreeSet<&str> = desc.group_columns().into_iter().collect();
    let mut residual = Vec::new();
    let mut absorbed_by_view = false;
    let mut unmatched: Vec<Predicate> = Vec::new();
    for pred in &query.filters {
        if desc.filters.contains(pred) {
            absorbed_by_view = true;
        } else if filterable.contains(pred.col.as_str()) {
            residual.push(pred.clone());
        } else if pred.op == CompareOp::Eq {
            unmatched.push(pred.clone());
        } else {
            return None;
        }
    }
    // A measure carries at most one filter predicate.
    if unmatched.len() > 1 {
        return None;
    }
    let shared = unmatched.into_iter().next();

    let bind_all = |filter: Option<&Predicate>| -> Option<Vec<BoundAggregate>> {
        query
            .aggregates()
            .iter()
            .map(|agg| bind_aggregate(&desc, agg, filter, needs_regroup))
            .collect()
    };

    let (bound, guard) = if let Some(f) = &shared {
        // The unmatched filter must be absorbed by every measure, and a
        // same-filtered count must exist to drop groups the base scan
        // would never produce.
        let bound = bind_all(Some(f))?;
        let guard = find_filtered_count(&desc, f)?;
        (bound, Some(guard))
    } else if let Some(bound) = bind_all(None) {
        (bound, None)
    } else {
        // Plain measures are missing; retry against an equality filter the
        // view stores filtered measures for. The predicate stays residual,
        // so no guard is needed.
        let retry = residual
            .iter()
            .filter(|p| p.op == CompareOp::Eq)
            .find_map(|p| bind_all(Some(p)));
        (retry?, None)
    };

    let filter_compatible = absorbed_by_view || shared.is_some();
    let mut score = SCORE_MEASURES;
    score += if grain_exact {
        SCORE_GRAIN_EXACT
    } else {
        SCORE_GRAIN_FINER
    };
    score += if dims_exact {
        SCORE_DIMS_EXACT
    } else {
        SCORE_DIMS_SUPERSET
    };
    if filter_compatible {
        score += SCORE_FILTER_COMPAT;
    }

    Some(ViewCandidate {
        descriptor: desc,
        score,
        size_bonus: 0,
        match_type: if needs_regroup {
            MatchType::Partial
        } else {
            MatchType::Exact
        },
        bound,
        residual,
        guard,
        needs_regroup,
    })
}

fn bind_aggregate(
    desc: &ViewDescriptor,
    agg: &Aggregate,
    filter: Option<&Predicate>,
    needs_regroup: bool,
) -> Option<BoundAggregate> {
    let col = agg.column.as_deref();
    match agg.func {
        AggFunc::Avg => {
            let col = col?;
            // A stored average cannot be reaggregated; it only serves exact
            // matches. Under regrouping, avg must come from sum and count.
            if !needs_regroup {
                if let Some(m) = desc.find_measure(AggFunc::Avg, Some(col), filter) {
                    return Some(BoundAggregate::AvgStored(m.to_string()));
                }
            }
            let sum = desc.find_measure(AggFunc::Sum, Some(col), filter)?;
            let count = desc.find_measure(AggFunc::Count, Some(col), filter)?;
            Some(BoundAggregate::AvgParts {
                sum: sum.to_string(),
                count: count.to_string(),
            })
        }
        func => {
            let m = desc.find_measure(func, col, filter)?;
            Some(BoundAggregate::Measure(m.to_string()))
        }
    }
}

fn find_filtered_count(desc: &ViewDescriptor, filter: &Predicate) -> Option<String> {
    desc.measures
        .iter()
        .find(|(_, expr)| expr.func == AggFunc::Count && expr.filter.as_ref() == Some(filter))
        .map(|(name, _)| name.clone())
}

/// Order candidates deterministically and assign the reported size bonus:
/// score descending, then byte size ascending, then name.
pub fn rank(candidates: &mut [ViewCandidate]) {
    candidates.sort_by(|a, b| {
        b.score
            .cmp(&a.score)
            .then(a.descriptor.byte_size.cmp(&b.descriptor.byte_size))
            .then(a.descriptor.name.cmp(&b.descriptor.name))
    });
    let mut i = 0;
    while i < candidates.len() {
        let score = candidates[i].score;
        let mut j = i;
        while j < candidates.len() && candidates[j].score == score {
            j += 1;
        }
        for (pos, candidate) in candidates[i..j].iter_mut().enumerate() {
            candidate.size_bonus = (5 - pos as i32).max(1);
        }
        i = j;
    }
}

/// Deterministic base-scan score for a query.
pub fn base_score(query: &QuerySpec) -> i32 {
    if narrow_day_window(query) {
        SCORE_BASE + SCORE_BASE_NARROW_BONUS
    } else {
        SCORE_BASE
    }
}

/// Whether the query's date predicates bound the scan to at most seven
/// partitions; unbounded ranges (`gt`, `lt`) never count as narrow.
fn narrow_day_window(query: &QuerySpec) -> bool {
    for pred in &query.filters {
        let window: Option<i64> = match (pred.col.as_str(), pred.op, &pred.val) {
            ("day", CompareOp::Eq, PredicateValue::Scalar(_)) => Some(1),
            ("day", CompareOp::In, PredicateValue::List(vals)) => Some(vals.len() as i64),
            ("day", CompareOp::Between, PredicateValue::List(vals)) if vals.len() == 2 => {
                day_span(&vals[0], &vals[1])
            }
            ("week", CompareOp::Eq, PredicateValue::Scalar(_)) => Some(7),
            _ => None,
        };
        if let Some(days) = window {
            if days >= 0 && days <= NARROW_WINDOW_DAYS {
                return true;
            }
        }
    }
    false
}

fn day_span(lo: &ScalarValue, hi: &ScalarValue) -> Option<i64> {
    let lo = lo.as_text().and_then(parse_canonical_day)?;
    let hi = hi.as_text().and_then(parse_canonical_day)?;
    Some((hi - lo).num_days() + 1)
}
