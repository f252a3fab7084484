//! Viewhouse Planner
//!
//! Translates a declarative query into a logical [`Plan`] against the best
//! healthy materialized view, or the base lake when no view wins.
//!
//! ## Routing
//!
//! Every healthy view in the registry snapshot is scored by a deterministic
//! table (grain match, dimension match, filter compatibility, measure
//! availability); a view that cannot supply every requested aggregate is
//! eliminated outright. The base lake always competes as a candidate and
//! earns a bonus for narrow date windows, where partition pruning makes a
//! raw scan cheap. Ties break by score, then byte size, then name, so a
//! fixed registry snapshot and query always produce the same plan.
//!
//! The planner is purely computational: it reads an in-memory snapshot and
//! an in-memory lake handle, performs no I/O, and never suspends.
//!
//! ## Sampling
//!
//! A query that explicitly opts into approximate results gets a sampled
//! base scan; so does an ad-hoc query that no view can serve and that
//! groups by a high-cardinality dimension. Sampled plans are flagged and
//! their sampling rate is surfaced in telemetry.

pub mod cache;
pub mod emit;
pub mod error;
pub mod score;

use std::path::PathBuf;

use tracing::debug;

use viewhouse_catalog::RegistrySnapshot;
use viewhouse_core::plan::{MatchType, Plan};
use viewhouse_core::{QuerySpec, RuntimeConfig};
use viewhouse_lake::Lake;

pub use cache::{query_fingerprint, PlanCache};
pub use error::{PlanError, Result};
pub use score::{base_score, evaluate_view, CandidateScore, ViewCandidate};

/// Routing outcome: the chosen plan plus the scores of every candidate the
/// planner looked at, for telemetry.
#[derive(Debug, Clone)]
pub struct Routing {
    pub plan: Plan,
    pub candidates: Vec<CandidateScore>,
    pub base_score: i32,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PlanOptions {
    /// Bypass view routing entirely; used by the validator to produce
    /// ground-truth base plans.
    pub force_base: bool,
}

pub struct Planner {
    mvs_root: PathBuf,
    sampling_rate: f64,
    high_cardinality: Vec<String>,
}

impl Planner {
    pub fn new(mvs_root: impl Into<PathBuf>, config: &RuntimeConfig) -> Planner {
        Planner {
            mvs_root: mvs_root.into(),
            sampling_rate: config.sampling_rate,
            high_cardinality: config.high_cardinality_dimensions.clone(),
        }
    }

    /// Root of the view directory tree this planner emits globs under.
    pub fn mvs_root(&self) -> &std::path::Path {
        &self.mvs_root
    }

    /// Route a validated query against a registry snapshot.
    pub fn plan(
        &self,
        query: &QuerySpec,
        snapshot: &RegistrySnapshot,
        lake: &Lake,
    ) -> Result<Routing> {
        self.plan_with(query, snapshot, lake, PlanOptions::default())
    }

    pub fn plan_with(
        &self,
        query: &QuerySpec,
        snapshot: &RegistrySnapshot,
        lake: &Lake,
        options: PlanOptions,
    ) -> Result<Routing> {
        let base = base_score(query);

        if options.force_base {
            let plan = emit::base_plan(query, lake, base, MatchType::Base, None)?;
            return Ok(Routing {
                plan,
                candidates: vec![],
                base_score: base,
            });
        }

        if query.approximate {
            let plan =
                emit::base_plan(query, lake, base, MatchType::Sampled, Some(self.sampling_rate))?;
            return Ok(Routing {
                plan,
                candidates: vec![],
                base_score: base,
            });
        }

        let mut candidates: Vec<ViewCandidate> = snapshot
            .list_healthy()
            .into_iter()
            .filter_map(|desc| evaluate_view(query, desc))
            .collect();
        score::rank(&mut candidates);
        let reports: Vec<CandidateScore> = candidates.iter().map(|c| c.report()).collect();

        // The base scan wins only on a strictly higher score: at equal
        // scores the pre-aggregated view is the smaller scan by
        // construction, which is exactly what the size tiebreak rewards.
        let winner = candidates.into_iter().next().filter(|c| c.score >= base);

        let plan = match winner {
            Some(candidate) => {
                debug!(
                    view = %candidate.descriptor.name,
                    score = candidate.score,
                    base_score = base,
                    "routing to materialized view"
                );
                emit::view_plan(query, &candidate, &self.mvs_root)?
            }
            None => {
                let sampled = reports.is_empty() && self.has_high_cardinality_dim(query);
                if sampled {
                    debug!("no view candidate; emitting sampled base scan");
                    emit::base_plan(query, lake, base, MatchType::Sampled, Some(self.sampling_rate))?
                } else {
                    emit::base_plan(query, lake, base, MatchType::Base, None)?
                }
            }
        };

        Ok(Routing {
            plan,
            candidates: reports,
            base_score: base,
        })
    }

    fn has_high_cardinality_dim(&self, query: &QuerySpec) -> bool {
        query
            .group_by
            .iter()
            .any(|d| self.high_cardinality.iter().any(|h| h == d))
    }
}
