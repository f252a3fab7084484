//! Plan Cache
//!
//! Memoizes routing decisions for identical queries against the same
//! registry snapshot. The cache key is a fingerprint over the canonical
//! form of the query (sorted filters and grouping, canonical aggregate
//! names), so semantically identical queries share an entry regardless of
//! field order in the JSON. Any registry swap invalidates the whole cache:
//! entries are only ever valid for one snapshot epoch.

use std::collections::HashMap;

use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use viewhouse_core::query::{Predicate, QuerySpec};

use crate::Routing;

/// Stable fingerprint of a query's canonical form.
pub fn query_fingerprint(query: &QuerySpec) -> String {
    let mut filters: Vec<&Predicate> = query.filters.iter().collect();
    filters.sort_by(|a, b| {
        (&a.col, a.op.as_str())
            .cmp(&(&b.col, b.op.as_str()))
            .then_with(|| {
                serde_json::to_string(&a.val)
                    .unwrap_or_default()
                    .cmp(&serde_json::to_string(&b.val).unwrap_or_default())
            })
    });
    let mut group_by: Vec<&String> = query.group_by.iter().collect();
    group_by.sort();
    let aggregates: Vec<String> = query
        .aggregates()
        .iter()
        .map(|a| a.canonical_name())
        .collect();
    let dimensions: Vec<&str> = query.dimensions();

    let mut hasher = Sha256::new();
    let canonical = serde_json::json!({
        "dimensions": dimensions,
        "aggregates": aggregates,
        "filters": filters,
        "group_by": group_by,
        "order_by": &query.order_by,
        "limit": query.limit,
        "approximate": query.approximate,
    });
    hasher.update(canonical.to_string().as_bytes());
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{b:02x}")).collect()
}

/// Epoch-scoped memoization of routing decisions.
pub struct PlanCache {
    inner: Mutex<CacheState>,
}

struct CacheState {
    epoch: u64,
    entries: HashMap<String, Routing>,
}

impl Default for PlanCache {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanCache {
    pub fn new() -> PlanCache {
        PlanCache {
            inner: Mutex::new(CacheState {
                epoch: 0,
                entries: HashMap::new(),
            }),
        }
    }

    /// Look up a routing for this fingerprint at this epoch. A different
    /// epoch flushes the cache first.
    pub fn get(&self, epoch: u64, fingerprint: &str) -> Option<Routing> {
        let mut state = self.inner.lock();
        if state.epoch != epoch {
            state.entries.clear();
            state.epoch = epoch;
            return None;
        }
        state.entries.get(fingerprint).cloned()
    }

    pub fn put(&self, epoch: u64, fingerprint: String, routing: Routing) {
        let mut state = self.inner.lock();
        if state.epoch != epoch {
            state.entries.clear();
            state.epoch = epoch;
        }
        state.entries.insert(fingerprint, routing);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(raw: &str) -> QuerySpec {
        QuerySpec::from_json(raw).unwrap()
    }

    #[test]
    fn test_fingerprint_ignores_filter_order() {
        let a = query(
            r#"{"from":"events","select":[{"COUNT":"*"}],
                "where":[{"col":"type","op":"eq","val":"click"},
                         {"col":"country","op":"eq","val":"JP"}]}"#,
        );
        let b = query(
            r#"{"from":"events","select":[{"COUNT":"*"}],
                "where":[{"col":"country","op":"eq","val":"JP"},
                         {"col":"type","op":"eq","val":"click"}]}"#,
        );
        assert_eq!(query_fingerprint(&a), query_fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_distinguishes_values() {
        let a = query(
            r#"{"from":"events","select":[{"COUNT":"*"}],
                "where":[{"col":"country","op":"eq","val":"JP"}]}"#,
        );
        let b = query(
            r#"{"from":"events","select":[{"COUNT":"*"}],
                "where":[{"col":"country","op":"eq","val":"US"}]}"#,
        );
        assert_ne!(query_fingerprint(&a), query_fingerprint(&b));
    }

    #[test]
    fn test_epoch_change_flushes() {
        use viewhouse_core::plan::{MatchType, Plan, PlanSource};

        let cache = PlanCache::new();
        let routing = Routing {
            plan: Plan {
                source: PlanSource::Base,
                match_type: MatchType::Base,
                score: 60,
                scan_globs: vec!["g".to_string()],
                projection: vec![],
                residual_filters: vec![],
                group_exprs: vec![],
                group_guard: None,
                partition_days: vec![],
                sampling_rate: None,
                order_by: vec![],
                limit: None,
            },
            candidates: vec![],
            base_score: 60,
        };

        cache.put(1, "fp".to_string(), routing);
        assert!(cache.get(1, "fp").is_some());
        // New epoch: stale entry is gone.
        assert!(cache.get(2, "fp").is_none());
        assert!(cache.is_empty());
    }
}
