//! Viewhouse Validator
//!
//! Proves that routing to materialized views never changes answers:
//!
//! - **Replay validation**: run a suite of queries through the normal
//!   planner and again with routing forced to the base lake, and compare
//!   row multisets under the numeric tolerances of [`compare`]. Any
//!   divergence quarantines the responsible view, which the planner then
//!   bypasses.
//! - **Checksum audit**: a cheap whole-view check comparing global measure
//!   totals (sum of sums, sum of counts, min of mins) and group counts
//!   against the base lake. Runs after every successful build.
//! - **Data quality**: structural invariants of the lake itself: canonical
//!   partition names, non-null key columns, finite numeric measures,
//!   enumerated event types, and BETWEEN inclusivity on date predicates.
//!
//! The validator runs synchronously on the caller's thread and opens a
//! dedicated engine session per check.

pub mod compare;
pub mod error;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info};

use viewhouse_catalog::{Health, Registry, ViewDescriptor};
use viewhouse_core::plan::Plan;
use viewhouse_core::query::AggFunc;
use viewhouse_core::{format_day, EventType, QuerySpec, RuntimeConfig};
use viewhouse_engine::{sql, Scalar, SessionFactory};
use viewhouse_lake::Lake;
use viewhouse_observability::metrics;
use viewhouse_planner::{PlanOptions, Planner};

pub use compare::{numeric_close, rows_match, REL_TOLERANCE};
pub use error::{Result, ValidateError};

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Serialize)]
pub struct ValidationReport {
    pub checks: Vec<CheckResult>,
    pub passed: usize,
    pub failed: usize,
}

impl ValidationReport {
    fn from_checks(checks: Vec<CheckResult>) -> ValidationReport {
        let passed = checks.iter().filter(|c| c.passed).count();
        let failed = checks.len() - passed;
        ValidationReport {
            checks,
            passed,
            failed,
        }
    }

    pub fn all_passed(&self) -> bool {
        self.failed == 0
    }

    pub fn write(&self, path: &Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"));
        std::fs::write(path, json)
    }
}

pub struct Validator {
    factory: SessionFactory,
    planner: Planner,
    registry: Arc<Registry>,
}

impl Validator {
    pub fn new(
        mvs_root: impl Into<PathBuf>,
        config: &RuntimeConfig,
        registry: Arc<Registry>,
    ) -> Validator {
        Validator {
            factory: SessionFactory::new(config),
            planner: Planner::new(mvs_root, config),
            registry,
        }
    }

    /// Replay a query suite against chosen plans and forced base scans.
    pub fn replay_suite(
        &self,
        suite: &[(String, QuerySpec)],
        lake: &Lake,
    ) -> Result<ValidationReport> {
        let mut checks = Vec::with_capacity(suite.len());
        for (query_id, query) in suite {
            checks.push(self.replay_one(query_id, query, lake)?);
        }
        Ok(ValidationReport::from_checks(checks))
    }

    fn replay_one(&self, query_id: &str, query: &QuerySpec, lake: &Lake) -> Result<CheckResult> {
        let snapshot = self.registry.snapshot();
        let routing = self.planner.plan(query, &snapshot, lake)?;

        let view_name = match &routing.plan.source {
            viewhouse_core::plan::PlanSource::View { name } => name.clone(),
            viewhouse_core::plan::PlanSource::Base => {
                return Ok(CheckResult {
                    name: format!("replay:{query_id}"),
                    view: None,
                    passed: true,
                    detail: "routed to base; nothing to cross-check".to_string(),
                })
            }
        };
        if query.limit.is_some() && query.order_by.is_empty() {
            // A limit without a total order makes row sets incomparable.
            return Ok(CheckResult {
                name: format!("replay:{query_id}"),
                view: Some(view_name),
                passed: true,
                detail: "skipped: LIMIT without ORDER BY".to_string(),
            });
        }

        let base_routing =
            self.planner
                .plan_with(query, &snapshot, lake, PlanOptions { force_base: true })?;

        let view_rows = self.run(&routing.plan)?;
        let base_rows = self.run(&base_routing.plan)?;

        match rows_match(&routing.plan, &view_rows, &base_rows) {
            Ok(()) => Ok(CheckResult {
                name: format!("replay:{query_id}"),
                view: Some(view_name),
                passed: true,
                detail: format!("{} rows matched", view_rows.len()),
            }),
            Err(divergence) => {
                self.quarantine(&view_name, &divergence);
                Ok(CheckResult {
                    name: format!("replay:{query_id}"),
                    view: Some(view_name),
                    passed: false,
                    detail: divergence,
                })
            }
        }
    }

    /// Cheap whole-view audit: global measure totals and group counts
    /// against a base replay of the view definition.
    pub fn checksum_audit(&self, lake: &Lake) -> Result<ValidationReport> {
        let mut checks = Vec::new();
        for desc in self.registry.list_healthy() {
            checks.push(self.audit_view(&desc, lake)?);
        }
        Ok(ValidationReport::from_checks(checks))
    }

    fn audit_view(&self, desc: &ViewDescriptor, lake: &Lake) -> Result<CheckResult> {
        let check_name = format!("checksum:{}", desc.name);
        if desc.files.is_empty() {
            return Ok(CheckResult {
                name: check_name,
                view: Some(desc.name.clone()),
                passed: true,
                detail: "empty view; nothing to audit".to_string(),
            });
        }

        let session = self.factory.open()?;
        let view_glob = self.view_ready_glob(desc);
        let view_from = sql::source_parquet(&[view_glob])?;
        let base_from = sql::source_parquet(&[lake.full_glob()])?;
        let where_clause = sql::where_sql(&desc.filters)?;

        // Group count: distinct keys in the view vs distinct keys in base.
        let view_groups = session.query_i64(&format!("SELECT COUNT(*) FROM {view_from}"))?;
        let group_cols = base_group_exprs(desc);
        let base_groups = if group_cols.is_empty() {
            1
        } else {
            session.query_i64(&format!(
                "SELECT COUNT(*) FROM (SELECT 1 FROM {base_from} {where_clause} GROUP BY {}) t",
                group_cols.join(", ")
            ))?
        };
        if view_groups != base_groups {
            let detail = format!("group count mismatch: view {view_groups} vs base {base_groups}");
            self.quarantine(&desc.name, &detail);
            return Ok(CheckResult {
                name: check_name,
                view: Some(desc.name.clone()),
                passed: false,
                detail,
            });
        }

        // Measure totals, combined with the measure's own combiner.
        for (measure, expr) in &desc.measures {
            let combiner = match expr.func {
                AggFunc::Sum | AggFunc::Count => "SUM",
                AggFunc::Min => "MIN",
                AggFunc::Max => "MAX",
                // Averages are not additive; the replay suite covers them.
                AggFunc::Avg => continue,
            };
            // Cast through DOUBLE: summing integral partials widens to
            // HUGEINT, which has no direct f64 fetch path.
            let view_total = session.query_f64_opt(&format!(
                "SELECT CAST({combiner}({measure}) AS DOUBLE) FROM {view_from}"
            ))?;
            let base_total = session.query_f64_opt(&format!(
                "SELECT CAST({} AS DOUBLE) FROM {base_from} {where_clause}",
                sql::measure_sql(expr)?
            ))?;
            let close = match (view_total, base_total) {
                (Some(v), Some(b)) => numeric_close(&Scalar::Float(v), &Scalar::Float(b)),
                (None, None) => true,
                _ => false,
            };
            if !close {
                let detail = format!(
                    "measure {measure} mismatch: view {view_total:?} vs base {base_total:?}"
                );
                self.quarantine(&desc.name, &detail);
                return Ok(CheckResult {
                    name: check_name,
                    view: Some(desc.name.clone()),
                    passed: false,
                    detail,
                });
            }
        }

        Ok(CheckResult {
            name: check_name,
            view: Some(desc.name.clone()),
            passed: true,
            detail: format!("{view_groups} groups, all measure totals within tolerance"),
        })
    }

    /// Structural invariants of the lake itself.
    pub fn data_quality(&self, lake: &Lake) -> Result<ValidationReport> {
        let mut checks = Vec::new();

        checks.push(CheckResult {
            name: "lake:canonical-partitions".to_string(),
            view: None,
            passed: lake.quarantined().is_empty(),
            detail: if lake.quarantined().is_empty() {
                format!("{} partitions, all canonical", lake.partitions().len())
            } else {
                format!("{} non-canonical entries quarantined", lake.quarantined().len())
            },
        });

        if lake.partitions().is_empty() {
            return Ok(ValidationReport::from_checks(checks));
        }

        let session = self.factory.open()?;
        let from = sql::source_parquet(&[lake.full_glob()])?;

        for key in ["day", "type", "advertiser_id"] {
            let nulls =
                session.query_i64(&format!("SELECT COUNT(*) FROM {from} WHERE {key} IS NULL"))?;
            checks.push(CheckResult {
                name: format!("lake:non-null:{key}"),
                view: None,
                passed: nulls == 0,
                detail: format!("{nulls} null values"),
            });
        }

        let non_finite = session.query_i64(&format!(
            "SELECT COUNT(CASE WHEN NOT isfinite(bid_price) THEN 1 END) \
             + COUNT(CASE WHEN total_price IS NOT NULL AND NOT isfinite(total_price) THEN 1 END) \
             FROM {from}"
        ))?;
        checks.push(CheckResult {
            name: "lake:finite-measures".to_string(),
            view: None,
            passed: non_finite == 0,
            detail: format!("{non_finite} non-finite values"),
        });

        let allowed: Vec<String> = EventType::ALL
            .iter()
            .map(|t| format!("'{}'", t.as_str()))
            .collect();
        let unknown = session.query_i64(&format!(
            "SELECT COUNT(*) FROM {from} WHERE type NOT IN ({})",
            allowed.join(", ")
        ))?;
        checks.push(CheckResult {
            name: "lake:enumerated-types".to_string(),
            view: None,
            passed: unknown == 0,
            detail: format!("{unknown} rows outside the event type enumeration"),
        });

        // BETWEEN on a single day must equal that day's row count exactly.
        if let Some(day) = lake.max_day() {
            let day = format_day(day);
            let eq = session.query_i64(&format!(
                "SELECT COUNT(*) FROM {from} WHERE CAST(day AS DATE) = DATE '{day}'"
            ))?;
            let between = session.query_i64(&format!(
                "SELECT COUNT(*) FROM {from} \
                 WHERE CAST(day AS DATE) BETWEEN DATE '{day}' AND DATE '{day}'"
            ))?;
            checks.push(CheckResult {
                name: "lake:between-inclusivity".to_string(),
                view: None,
                passed: eq == between,
                detail: format!("eq={eq} between={between} on {day}"),
            });
        }

        Ok(ValidationReport::from_checks(checks))
    }

    fn run(&self, plan: &Plan) -> Result<Vec<Vec<Scalar>>> {
        if plan.scan_globs.is_empty() {
            return Ok(vec![]);
        }
        let session = self.factory.open()?;
        let rendered = sql::render_plan(plan)?;
        Ok(session.query_rows(&rendered, plan.projection.len())?)
    }

    fn view_ready_glob(&self, desc: &ViewDescriptor) -> String {
        // The planner and validator share one layout convention.
        self.planner
            .mvs_root()
            .join(&desc.name)
            .join("ready/**/*.parquet")
            .to_string_lossy()
            .to_string()
    }

    fn quarantine(&self, view: &str, reason: &str) {
        error!(view, reason, "integrity failure; quarantining view");
        metrics::VALIDATION_FAILURES_TOTAL
            .with_label_values(&[view])
            .inc();
        metrics::QUARANTINES_TOTAL.with_label_values(&[view]).inc();
        if let Err(e) = self.registry.mark(view, Health::Quarantined) {
            error!(view, error = %e, "could not quarantine view");
        } else {
            info!(view, "view is now invisible to the planner");
        }
    }
}

/// Week buckets are derived in base group-bys; other keys are physical.
fn base_group_exprs(desc: &ViewDescriptor) -> Vec<String> {
    desc.group_columns()
        .iter()
        .map(|col| {
            if *col == "week" {
                "DATE_TRUNC('week', CAST(day AS DATE))".to_string()
            } else {
                col.to_string()
            }
        })
        .collect()
}
