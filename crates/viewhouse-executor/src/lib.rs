//! Viewhouse Batch Executor
//!
//! Runs one bounded batch of declarative queries end to end: route each
//! query through the planner, fuse superset-compatible plans, execute on a
//! bounded pool of per-thread engine sessions, and write results atomically.
//!
//! ## Contracts
//!
//! - **Batch size**: at most 20 queries per batch; larger submissions are
//!   rejected with `BatchTooLarge` before any work starts.
//! - **Memory budget**: results buffer in memory against a shared per-batch
//!   byte budget. A plan that would cross it is aborted with MEMORY status;
//!   siblings keep running.
//! - **Memory-only timing**: `compute_ms` covers plan submission to result
//!   materialization in memory. CSV serialization and the atomic rename
//!   happen after the clock stops and land in `io_ms`.
//! - **Session discipline**: every worker opens its own engine session
//!   inside the blocking closure and drops it there. Sessions never cross
//!   threads.
//! - **Isolation**: a plan failure (timeout, memory, engine error) is
//!   recorded in that plan's outcome; the batch always runs to completion.
//!
//! Results are written to `staging/` and renamed into place, so a partially
//! written CSV is never observable. A routing-telemetry sidecar accompanies
//! every result, and the batch report aggregates statuses and timings.

pub mod error;
pub mod outcome;
pub mod superset;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};
use uuid::Uuid;

use viewhouse_catalog::{Health, Registry};
use viewhouse_core::plan::{ColumnExpr, Plan, PlanSource};
use viewhouse_core::query::AggFunc;
use viewhouse_core::{QuerySpec, RuntimeConfig};
use viewhouse_engine::{sql, EngineError, Scalar, SessionFactory};
use viewhouse_lake::Lake;
use viewhouse_observability::metrics;
use viewhouse_observability::telemetry::{RouteRecord, TelemetrySession};
use viewhouse_planner::{query_fingerprint, PlanCache, Planner, Routing};

pub use error::{ExecError, Result};
pub use outcome::{BatchReport, PlanStatus, QueryOutcome};
pub use superset::ExecutionUnit;

pub struct BatchExecutor {
    config: RuntimeConfig,
    factory: SessionFactory,
    planner: Planner,
    cache: PlanCache,
    registry: Arc<Registry>,
    lake: Lake,
    out_dir: PathBuf,
}

/// What one plan produced before the I/O phase.
struct ExecResult {
    status: PlanStatus,
    error_kind: Option<String>,
    message: Option<String>,
    rows: Vec<Vec<Scalar>>,
    compute_ms: f64,
    bytes: u64,
}

impl ExecResult {
    fn failed(status: PlanStatus, kind: &str, message: String) -> ExecResult {
        ExecResult {
            status,
            error_kind: Some(kind.to_string()),
            message: Some(message),
            rows: vec![],
            compute_ms: 0.0,
            bytes: 0,
        }
    }
}

/// One query's routing state going into execution.
struct PlannedQuery {
    query_id: String,
    routing: Option<Routing>,
    routing_ms: f64,
    input_error: Option<String>,
}

impl BatchExecutor {
    pub fn new(
        config: RuntimeConfig,
        registry: Arc<Registry>,
        lake: Lake,
        mvs_root: impl Into<PathBuf>,
        out_dir: impl Into<PathBuf>,
    ) -> BatchExecutor {
        let factory = SessionFactory::new(&config);
        let planner = Planner::new(mvs_root, &config);
        BatchExecutor {
            config,
            factory,
            planner,
            cache: PlanCache::new(),
            registry,
            lake,
            out_dir: out_dir.into(),
        }
    }

    /// Execute a batch and write per-query CSVs, telemetry sidecars, and the
    /// batch report under the output directory.
    pub async fn run_batch(&self, queries: Vec<(String, QuerySpec)>) -> Result<BatchReport> {
        if queries.len() > self.config.batch_size_limit {
            return Err(ExecError::BatchTooLarge {
                len: queries.len(),
                max: self.config.batch_size_limit,
            });
        }
        let batch_id = format!("batch_{}", Uuid::new_v4().simple());
        let staging_dir = self.out_dir.join("staging");
        std::fs::create_dir_all(&staging_dir)?;

        // Route everything against one snapshot: the whole batch sees one
        // consistent registry state.
        let snapshot = self.registry.snapshot();
        let mut planned: Vec<PlannedQuery> = Vec::with_capacity(queries.len());
        for (query_id, query) in &queries {
            let start = Instant::now();
            let fingerprint = query_fingerprint(query);
            let routing = match self.cache.get(snapshot.epoch(), &fingerprint) {
                Some(hit) => Ok(hit),
                None => self
                    .planner
                    .plan(query, &snapshot, &self.lake)
                    .map(|routing| {
                        self.cache
                            .put(snapshot.epoch(), fingerprint, routing.clone());
                        routing
                    }),
            };
            let routing_ms = start.elapsed().as_secs_f64() * 1000.0;
            match routing {
                Ok(routing) => planned.push(PlannedQuery {
                    query_id: query_id.clone(),
                    routing: Some(routing),
                    routing_ms,
                    input_error: None,
                }),
                Err(e) => planned.push(PlannedQuery {
                    query_id: query_id.clone(),
                    routing: None,
                    routing_ms,
                    input_error: Some(e.to_string()),
                }),
            }
        }

        let plans: Vec<(usize, Plan)> = planned
            .iter()
            .enumerate()
            .filter_map(|(i, p)| p.routing.as_ref().map(|r| (i, r.plan.clone())))
            .collect();
        let units = superset::group_batch(&plans);
        let superset_groups = units
            .iter()
            .filter(|u| matches!(u, ExecutionUnit::Superset { .. }))
            .count();

        let used = Arc::new(AtomicU64::new(0));
        let semaphore = Arc::new(Semaphore::new(self.config.threads.max(1)));
        let deadline = Duration::from_millis(self.config.query_deadline_ms);
        let mut join_set: JoinSet<Vec<(usize, ExecResult)>> = JoinSet::new();

        for unit in units {
            let factory = self.factory.clone();
            let registry = Arc::clone(&self.registry);
            let used = Arc::clone(&used);
            let semaphore = Arc::clone(&semaphore);
            let limit = self.config.memory_limit_bytes;
            let (plan, members) = match unit {
                ExecutionUnit::Single(i) => {
                    let plan = plans
                        .iter()
                        .find(|(idx, _)| *idx == i)
                        .map(|(_, p)| p.clone())
                        .expect("single unit indexes a planned query");
                    (plan, vec![i])
                }
                ExecutionUnit::Superset { members, plan } => (plan, members),
            };
            let member_plans: Vec<(usize, Plan)> = members
                .iter()
                .map(|i| {
                    (
                        *i,
                        plans
                            .iter()
                            .find(|(idx, _)| idx == i)
                            .map(|(_, p)| p.clone())
                            .expect("member indexes a planned query"),
                    )
                })
                .collect();

            join_set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return fan_out(
                            &member_plans,
                            ExecResult::failed(
                                PlanStatus::EngineError,
                                "engine",
                                "executor shut down".to_string(),
                            ),
                        )
                    }
                };
                execute_unit(factory, registry, used, limit, deadline, plan, member_plans).await
            });
        }

        let mut results: Vec<Option<ExecResult>> = planned.iter().map(|_| None).collect();
        while let Some(joined) = join_set.join_next().await {
            for (idx, result) in joined? {
                results[idx] = Some(result);
            }
        }

        // I/O phase: serialize results, write to staging, rename into place,
        // emit telemetry. Compute clocks have already stopped.
        let mut telemetry = TelemetrySession::new();
        let mut outcomes = Vec::with_capacity(planned.len());
        for (i, p) in planned.iter().enumerate() {
            let outcome = self
                .finish_query(p, &queries[i].1, results[i].take(), &staging_dir, &mut telemetry)
                .await?;
            outcomes.push(outcome);
        }

        telemetry.export_summary(&self.out_dir.join(format!("{batch_id}.telemetry.json")));
        let report = BatchReport::new(
            batch_id.clone(),
            outcomes,
            used.load(Ordering::Relaxed),
            superset_groups,
        );
        report.write(&self.out_dir.join(format!("{batch_id}.report.json")))?;
        Ok(report)
    }

    async fn finish_query(
        &self,
        planned: &PlannedQuery,
        query: &QuerySpec,
        result: Option<ExecResult>,
        staging_dir: &Path,
        telemetry: &mut TelemetrySession,
    ) -> Result<QueryOutcome> {
        let (source, match_type, score, base_score, candidates, sampling, partitions) =
            match &planned.routing {
                Some(r) => (
                    r.plan.source.label().to_string(),
                    r.plan.match_type.as_str().to_string(),
                    r.plan.score,
                    r.base_score,
                    r.candidates
                        .iter()
                        .filter_map(|c| serde_json::to_value(c).ok())
                        .collect(),
                    r.plan.sampling_rate,
                    r.plan.partition_days.clone(),
                ),
                None => ("-".to_string(), "-".to_string(), 0, 0, vec![], None, vec![]),
            };

        let result = match result {
            Some(r) => r,
            None => ExecResult::failed(
                PlanStatus::EngineError,
                "input",
                planned
                    .input_error
                    .clone()
                    .unwrap_or_else(|| "query was not executed".to_string()),
            ),
        };

        let result_path = self.out_dir.join(format!("{}.csv", planned.query_id));
        let mut io_ms = 0.0;
        let mut output = None;
        let rows = result.rows.len() as u64;

        if result.status == PlanStatus::Ok {
            let labels: Vec<String> = planned
                .routing
                .as_ref()
                .map(|r| r.plan.labels().iter().map(|l| l.to_string()).collect())
                .unwrap_or_default();
            let io_start = Instant::now();
            let csv = to_csv(&labels, &result.rows);
            let staging =
                staging_dir.join(format!("{}.{}.tmp", planned.query_id, Uuid::new_v4().simple()));
            tokio::fs::write(&staging, csv.as_bytes()).await?;
            tokio::fs::rename(&staging, &result_path).await?;
            io_ms = io_start.elapsed().as_secs_f64() * 1000.0;
            output = Some(result_path.clone());
        }

        let source_kind = if source == "base" || source == "-" {
            "base"
        } else {
            "view"
        };
        metrics::ROUTING_DECISIONS_TOTAL
            .with_label_values(&[&match_type])
            .inc();
        metrics::PLAN_STATUS_TOTAL
            .with_label_values(&[result.status.as_str()])
            .inc();
        metrics::PLAN_COMPUTE_MS
            .with_label_values(&[source_kind])
            .observe(result.compute_ms);
        metrics::PLAN_IO_MS
            .with_label_values(&[source_kind])
            .observe(io_ms);
        if result.status == PlanStatus::Memory {
            metrics::MEMORY_ABORTS_TOTAL.inc();
        }

        let record = RouteRecord {
            query_id: planned.query_id.clone(),
            source: source.clone(),
            match_type: match_type.clone(),
            score,
            base_score,
            candidates,
            routing_ms: planned.routing_ms,
            compute_ms: result.compute_ms,
            io_ms,
            rows,
            status: result.status.as_str().to_string(),
            error_kind: result.error_kind.clone(),
            message: result.message.clone(),
            approximate: sampling.is_some() || query.approximate,
            sampling_rate: sampling,
            partition_pruning_effective: !partitions.is_empty(),
            partitions_scanned: partitions,
        };
        if let Err(e) = record.write_sidecar(&result_path) {
            warn!(query = %planned.query_id, error = %e, "could not write telemetry sidecar");
        }
        telemetry.record(record);

        Ok(QueryOutcome {
            query_id: planned.query_id.clone(),
            status: result.status,
            error_kind: result.error_kind,
            message: result.message,
            source,
            match_type,
            score,
            compute_ms: result.compute_ms,
            io_ms,
            rows,
            bytes: result.bytes,
            approximate: sampling.is_some() || query.approximate,
            output,
        })
    }
}

/// Duplicate a failure across every member of a unit.
fn fan_out(members: &[(usize, Plan)], template: ExecResult) -> Vec<(usize, ExecResult)> {
    members
        .iter()
        .map(|(i, _)| {
            (
                *i,
                ExecResult {
                    status: template.status,
                    error_kind: template.error_kind.clone(),
                    message: template.message.clone(),
                    rows: vec![],
                    compute_ms: template.compute_ms,
                    bytes: 0,
                },
            )
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
async fn execute_unit(
    factory: SessionFactory,
    registry: Arc<Registry>,
    used: Arc<AtomicU64>,
    limit: u64,
    deadline: Duration,
    plan: Plan,
    member_plans: Vec<(usize, Plan)>,
) -> Vec<(usize, ExecResult)> {
    // A view re-registered or quarantined since planning must not be read:
    // its ready directory may no longer match the plan's measure columns.
    if let PlanSource::View { name } = &plan.source {
        let current = registry.get(name);
        let healthy = current.map(|d| d.health == Health::Healthy).unwrap_or(false);
        if !healthy {
            return fan_out(
                &member_plans,
                ExecResult::failed(
                    PlanStatus::SchemaDrift,
                    "drift",
                    format!("view {name} changed state since planning"),
                ),
            );
        }
    }

    // Budget check before the plan starts: an exhausted batch budget aborts
    // the plan outright rather than letting it race the limit.
    let already_used = used.load(Ordering::Relaxed);
    if already_used >= limit {
        return fan_out(
            &member_plans,
            ExecResult::failed(
                PlanStatus::Memory,
                "memory",
                format!("batch memory budget exhausted ({already_used} of {limit} bytes)"),
            ),
        );
    }
    let budget = limit - already_used;

    let blocking_plan = plan.clone();
    let handle =
        tokio::task::spawn_blocking(move || run_plan_blocking(&factory, &blocking_plan, budget));

    let run = match tokio::time::timeout(deadline, handle).await {
        Err(_) => {
            // The blocking task keeps running in the background; its result
            // is discarded and nothing is promoted.
            return fan_out(
                &member_plans,
                ExecResult::failed(
                    PlanStatus::Timeout,
                    "timeout",
                    format!("plan exceeded deadline of {} ms", deadline.as_millis()),
                ),
            );
        }
        Ok(Err(join_err)) => {
            return fan_out(
                &member_plans,
                ExecResult::failed(PlanStatus::EngineError, "engine", join_err.to_string()),
            )
        }
        Ok(Ok(run)) => run,
    };

    let (rows, bytes, compute_ms) = match run {
        Ok(ok) => ok,
        Err(EngineError::BudgetExceeded { budget }) => {
            return fan_out(
                &member_plans,
                ExecResult::failed(
                    PlanStatus::Memory,
                    "memory",
                    format!("result exceeded remaining budget of {budget} bytes"),
                ),
            )
        }
        Err(e) => {
            // An engine failure on a view plan tentatively quarantines the
            // view pending a validator re-check.
            if let PlanSource::View { name } = &plan.source {
                metrics::QUARANTINES_TOTAL.with_label_values(&[name]).inc();
                if let Err(mark_err) = registry.mark(name, Health::Quarantined) {
                    warn!(view = %name, error = %mark_err, "could not quarantine view");
                }
            }
            return fan_out(
                &member_plans,
                ExecResult::failed(PlanStatus::EngineError, "engine", e.to_string()),
            );
        }
    };
    used.fetch_add(bytes, Ordering::Relaxed);

    if member_plans.len() == 1 && member_plans[0].1 == plan {
        return vec![(
            member_plans[0].0,
            ExecResult {
                status: PlanStatus::Ok,
                error_kind: None,
                message: None,
                rows,
                compute_ms,
                bytes,
            },
        )];
    }

    // Superset unit: project each member from the shared result. Projection
    // output counts against the budget like any other buffered rows.
    let labels: Vec<String> = plan.projection.iter().map(|p| p.label.clone()).collect();
    let mut out = Vec::with_capacity(member_plans.len());
    for (idx, member) in &member_plans {
        let member_rows = superset::project_member(member, &labels, &rows);
        let member_bytes = rows_bytes(&member_rows);
        let current = used.fetch_add(member_bytes, Ordering::Relaxed) + member_bytes;
        if current > limit {
            out.push((
                *idx,
                ExecResult::failed(
                    PlanStatus::Memory,
                    "memory",
                    "projected result exceeded the batch memory budget".to_string(),
                ),
            ));
            continue;
        }
        out.push((
            *idx,
            ExecResult {
                status: PlanStatus::Ok,
                error_kind: None,
                message: None,
                rows: member_rows,
                compute_ms,
                bytes: member_bytes,
            },
        ));
    }
    out
}

/// Execute one plan to an in-memory result. Runs on a blocking thread with
/// its own engine session; `compute_ms` covers exactly this function's
/// engine work.
fn run_plan_blocking(
    factory: &SessionFactory,
    plan: &Plan,
    byte_budget: u64,
) -> std::result::Result<(Vec<Vec<Scalar>>, u64, f64), EngineError> {
    // Pruning may have eliminated every partition; the empty result shape
    // is known without touching the engine.
    if plan.scan_globs.is_empty() {
        return Ok((empty_scan_rows(plan), 0, 0.0));
    }

    let session = factory.open()?;
    let sql = sql::render_plan(plan)?;
    debug!(sql = %sql, "executing plan");
    let start = Instant::now();
    let (rows, bytes) = session.query_rows_limited(&sql, plan.projection.len(), Some(byte_budget))?;
    let compute_ms = start.elapsed().as_secs_f64() * 1000.0;
    Ok((rows, bytes, compute_ms))
}

/// Result of a scan over zero partitions: no rows for grouped queries, a
/// single row of empty aggregates (0 for counts, NULL otherwise) for global
/// ones.
fn empty_scan_rows(plan: &Plan) -> Vec<Vec<Scalar>> {
    if !plan.group_exprs.is_empty() || plan.projection.is_empty() {
        return vec![];
    }
    let all_aggregates = plan
        .projection
        .iter()
        .all(|p| !matches!(p.expr, ColumnExpr::Column { .. } | ColumnExpr::WeekOfDay));
    if !all_aggregates {
        return vec![];
    }
    vec![plan
        .projection
        .iter()
        .map(|p| match &p.expr {
            ColumnExpr::Aggregate { agg } if agg.func == AggFunc::Count => Scalar::Int(0),
            ColumnExpr::Combine {
                func: AggFunc::Count,
                ..
            } => Scalar::Int(0),
            _ => Scalar::Null,
        })
        .collect()]
}

fn rows_bytes(rows: &[Vec<Scalar>]) -> u64 {
    rows.iter()
        .flat_map(|r| r.iter())
        .map(|s| match s {
            Scalar::Null => 1,
            Scalar::Int(_) | Scalar::Float(_) => 8,
            Scalar::Text(t) => t.len() as u64 + 2,
        })
        .sum()
}

/// Serialize rows to CSV with the plan's labels as header. Headers are
/// always emitted, even for zero rows.
fn to_csv(labels: &[String], rows: &[Vec<Scalar>]) -> String {
    let mut out = String::new();
    let header: Vec<String> = labels
        .iter()
        .map(|l| viewhouse_engine::value::csv_quote(l))
        .collect();
    out.push_str(&header.join(","));
    out.push('\n');
    for row in rows {
        let fields: Vec<String> = row.iter().map(|s| s.to_csv_field()).collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_csv_headers_only_for_empty_result() {
        let csv = to_csv(&["country".to_string(), "SUM(bid_price)".to_string()], &[]);
        assert_eq!(csv, "country,SUM(bid_price)\n");
    }

    #[test]
    fn test_to_csv_rows() {
        let rows = vec![
            vec![Scalar::Text("JP".into()), Scalar::Float(1.5)],
            vec![Scalar::Text("US".into()), Scalar::Null],
        ];
        let csv = to_csv(&["country".to_string(), "v".to_string()], &rows);
        assert_eq!(csv, "country,v\nJP,1.5\nUS,\n");
    }

    #[test]
    fn test_rows_bytes_estimate() {
        let rows = vec![vec![Scalar::Int(1), Scalar::Text("abc".into()), Scalar::Null]];
        assert_eq!(rows_bytes(&rows), 8 + 5 + 1);
    }
}
