//! Viewhouse Safe View Builder
//!
//! Constructs and refreshes materialized views from the base lake with the
//! staging -> ready -> retired protocol:
//!
//! 1. Take the view's build lock (builds of the same view serialize; builds
//!    of different views run in parallel).
//! 2. Consult the registry for a fingerprint conflict - another healthy
//!    view computing the same definition aborts the build.
//! 3. Stream the build query into a fresh staging directory through a
//!    dedicated engine session.
//! 4. Sanity-check the staged output (row count, non-null keys, finite
//!    measures).
//! 5. Promote atomically; the previous ready directory moves to retired/.
//! 6. Register the new descriptor as HEALTHY.
//!
//! Any failure discards staging and reverts the view to whatever its
//! previous ready directory still supports. Builds are idempotent:
//! re-running with identical inputs yields logically identical rows.

pub mod definition;
pub mod error;
pub mod staging;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use viewhouse_catalog::{Health, Registry, ViewDescriptor};
use viewhouse_core::query::AggFunc;
use viewhouse_core::RuntimeConfig;
use viewhouse_engine::{sql, EngineSession, SessionFactory};
use viewhouse_lake::Lake;
use viewhouse_observability::metrics;

pub use definition::ViewDefinition;
pub use error::{BuildError, Result};
pub use staging::ViewPaths;

/// How long abandoned staging directories linger before GC.
const STAGING_GC_GRACE: Duration = Duration::from_secs(3600);

/// How long retired ready directories linger. Readers holding an old
/// registry snapshot finish well within this window.
const RETIRED_GC_GRACE: Duration = Duration::from_secs(3600);

/// When a view counts as stale relative to the lake watermark.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum WatermarkPolicy {
    /// Any new day partition beyond the build watermark marks the view stale.
    AnyNewDay,
    /// Tolerate up to `days` of lag before going stale.
    LagDays { days: u32 },
}

impl Default for WatermarkPolicy {
    fn default() -> Self {
        WatermarkPolicy::AnyNewDay
    }
}

impl WatermarkPolicy {
    pub fn is_stale(&self, watermark: Option<NaiveDate>, lake_max: Option<NaiveDate>) -> bool {
        let (Some(watermark), Some(lake_max)) = (watermark, lake_max) else {
            // No watermark recorded: anything in the lake makes it stale.
            return lake_max.is_some();
        };
        match self {
            WatermarkPolicy::AnyNewDay => lake_max > watermark,
            WatermarkPolicy::LagDays { days } => {
                (lake_max - watermark).num_days() > *days as i64
            }
        }
    }
}

/// Result of one successful build.
#[derive(Debug, Clone, Serialize)]
pub struct BuildOutcome {
    pub name: String,
    pub rows: u64,
    pub bytes: u64,
    pub build_ms: f64,
    pub watermark: Option<NaiveDate>,
}

/// Per-view entry in the refresh report.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReportEntry {
    pub name: String,
    pub status: String,
    pub rows: u64,
    pub bytes: u64,
    pub build_ms: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate report for one refresh run.
#[derive(Debug, Serialize)]
pub struct BuildReport {
    pub entries: Vec<BuildReportEntry>,
    pub succeeded: usize,
    pub failed: usize,
    pub total_ms: f64,
}

impl BuildReport {
    pub fn write(&self, path: &std::path::Path) -> std::io::Result<()> {
        let json = serde_json::to_string_pretty(self)
            .unwrap_or_else(|e| format!("{{\"error\":\"{e}\"}}"));
        std::fs::write(path, json)
    }
}

pub struct ViewBuilder {
    mvs_root: PathBuf,
    factory: SessionFactory,
    registry: Arc<Registry>,
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
    build_deadline: Duration,
    watermark_policy: WatermarkPolicy,
}

impl ViewBuilder {
    pub fn new(
        mvs_root: impl Into<PathBuf>,
        config: &RuntimeConfig,
        registry: Arc<Registry>,
    ) -> ViewBuilder {
        ViewBuilder {
            mvs_root: mvs_root.into(),
            factory: SessionFactory::new(config),
            registry,
            locks: Mutex::new(HashMap::new()),
            build_deadline: Duration::from_millis(config.build_deadline_ms),
            watermark_policy: WatermarkPolicy::default(),
        }
    }

    pub fn with_watermark_policy(mut self, policy: WatermarkPolicy) -> ViewBuilder {
        self.watermark_policy = policy;
        self
    }

    /// Per-view build lock; same-name builds serialize.
    fn lock_for(&self, name: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Build (or rebuild) one view end to end.
    pub async fn build(&self, def: &ViewDefinition, lake: &Lake) -> Result<BuildOutcome> {
        let lock = self.lock_for(&def.name);
        let _guard = lock.lock().await;
        let started = Instant::now();

        let fingerprint = def.fingerprint();
        if let Some(existing) = self
            .registry
            .snapshot()
            .list_healthy()
            .iter()
            .find(|d| d.name != def.name && d.schema_fingerprint == fingerprint)
        {
            metrics::BUILD_FAILURES_TOTAL
                .with_label_values(&[&def.name, "drift"])
                .inc();
            return Err(BuildError::SchemaDrift {
                name: def.name.clone(),
                existing: existing.name.clone(),
            });
        }

        let previous = self.registry.get(&def.name);
        match &previous {
            Some(_) => self.registry.mark(&def.name, Health::Building)?,
            None => self
                .registry
                .register(self.placeholder(def, &fingerprint))?,
        }

        let paths = ViewPaths::new(&self.mvs_root, &def.name);
        let staging = paths.new_staging_dir()?;

        let result = self
            .attempt(def, lake, &paths, &staging, &fingerprint)
            .await;

        match result {
            Ok((rows, bytes)) => {
                let build_ms = started.elapsed().as_secs_f64() * 1000.0;
                metrics::BUILD_DURATION_SECONDS
                    .with_label_values(&[&def.name])
                    .observe(build_ms / 1000.0);
                paths.gc_staging(STAGING_GC_GRACE);
                paths.gc_retired(RETIRED_GC_GRACE);
                info!(view = %def.name, rows, bytes, build_ms, "view built");
                Ok(BuildOutcome {
                    name: def.name.clone(),
                    rows,
                    bytes,
                    build_ms,
                    watermark: lake.max_day(),
                })
            }
            Err(e) => {
                paths.discard_staging(&staging);
                self.revert(&def.name, previous.as_deref());
                metrics::BUILD_FAILURES_TOTAL
                    .with_label_values(&[&def.name, failure_reason(&e)])
                    .inc();
                warn!(view = %def.name, error = %e, "build failed; previous ready directory stays live");
                Err(e)
            }
        }
    }

    async fn attempt(
        &self,
        def: &ViewDefinition,
        lake: &Lake,
        paths: &ViewPaths,
        staging: &std::path::Path,
        fingerprint: &str,
    ) -> Result<(u64, u64)> {
        let build_sql = def.build_sql(lake)?;
        let factory = self.factory.clone();
        let def_blocking = def.clone();
        let staging_blocking = staging.to_path_buf();

        let handle = tokio::task::spawn_blocking(move || {
            build_into_staging(&factory, &def_blocking, &build_sql, &staging_blocking)
        });
        let rows = match tokio::time::timeout(self.build_deadline, handle).await {
            // The interrupted engine session keeps writing into the unique
            // staging directory until it notices; discard handles the rest.
            Err(_) => {
                return Err(BuildError::Timeout {
                    name: def.name.clone(),
                    ms: self.build_deadline.as_millis() as u64,
                })
            }
            Ok(join) => join??,
        };

        paths.promote(staging)?;
        let (files, bytes) = paths.ready_files()?;

        let descriptor = ViewDescriptor {
            name: def.name.clone(),
            grain: def.grain,
            dimensions: def.dimensions.clone(),
            filters: def.filters.clone(),
            measures: def.measures.clone(),
            schema_fingerprint: fingerprint.to_string(),
            files,
            row_count: rows,
            byte_size: bytes,
            built_at: Utc::now(),
            source_watermark: lake.max_day(),
            health: Health::Healthy,
        };
        self.registry.register(descriptor.clone())?;
        descriptor.write_manifest(paths.view_dir())?;
        Ok((rows, bytes))
    }

    /// Build many views concurrently (distinct names run in parallel; the
    /// engine work sits on blocking threads, so the fan-out is real).
    pub async fn build_all(&self, definitions: Vec<ViewDefinition>, lake: &Lake) -> BuildReport {
        let started = Instant::now();
        let builds = definitions.into_iter().map(|def| async move {
            let t0 = Instant::now();
            match self.build(&def, lake).await {
                Ok(outcome) => BuildReportEntry {
                    name: outcome.name,
                    status: "READY".to_string(),
                    rows: outcome.rows,
                    bytes: outcome.bytes,
                    build_ms: outcome.build_ms,
                    error: None,
                },
                Err(e) => BuildReportEntry {
                    name: def.name.clone(),
                    status: "FAILED".to_string(),
                    rows: 0,
                    bytes: 0,
                    build_ms: t0.elapsed().as_secs_f64() * 1000.0,
                    error: Some(e.to_string()),
                },
            }
        });
        let mut entries = futures::future::join_all(builds).await;
        entries.sort_by(|a, b| a.name.cmp(&b.name));
        let succeeded = entries.iter().filter(|e| e.status == "READY").count();
        let failed = entries.len() - succeeded;
        metrics::HEALTHY_VIEWS.set(self.registry.list_healthy().len() as i64);
        BuildReport {
            entries,
            succeeded,
            failed,
            total_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }

    /// Apply the watermark policy: healthy views whose source watermark
    /// lags the lake go STALE (still routable, flagged for refresh).
    pub fn refresh_stale(&self, lake: &Lake) -> Vec<String> {
        let lake_max = lake.max_day();
        let mut stale = Vec::new();
        for desc in self.registry.list_healthy() {
            if self
                .watermark_policy
                .is_stale(desc.source_watermark, lake_max)
            {
                if let Err(e) = self.registry.mark(&desc.name, Health::Stale) {
                    warn!(view = %desc.name, error = %e, "could not mark stale");
                } else {
                    stale.push(desc.name.clone());
                }
            }
        }
        stale
    }

    fn placeholder(&self, def: &ViewDefinition, fingerprint: &str) -> ViewDescriptor {
        ViewDescriptor {
            name: def.name.clone(),
            grain: def.grain,
            dimensions: def.dimensions.clone(),
            filters: def.filters.clone(),
            measures: def.measures.clone(),
            schema_fingerprint: fingerprint.to_string(),
            files: vec![],
            row_count: 0,
            byte_size: 0,
            built_at: Utc::now(),
            source_watermark: None,
            health: Health::Building,
        }
    }

    /// After a failed build, put the view back into the state its ready
    /// directory still supports.
    fn revert(&self, name: &str, previous: Option<&ViewDescriptor>) {
        let target = match previous {
            None => Health::Missing,
            Some(prev) => prev.health,
        };
        if let Err(e) = self.registry.mark(name, target) {
            warn!(view = %name, error = %e, "could not revert health after failed build");
        }
    }
}

fn failure_reason(e: &BuildError) -> &'static str {
    match e {
        BuildError::SchemaDrift { .. } => "drift",
        BuildError::Timeout { .. } => "timeout",
        BuildError::Sanity { .. } => "sanity",
        BuildError::Engine(_) => "engine",
        BuildError::Catalog(_) => "catalog",
        BuildError::Io(_) | BuildError::Join(_) => "io",
    }
}

/// Run the build query into staging and sanity-check the output. Blocking;
/// owns its engine session for the duration.
fn build_into_staging(
    factory: &SessionFactory,
    def: &ViewDefinition,
    build_sql: &str,
    staging: &std::path::Path,
) -> Result<u64> {
    let session = factory.open()?;
    let copy = if def.partition_by_day() {
        format!(
            "COPY ({build_sql}) TO '{}' (FORMAT PARQUET, PARTITION_BY (day), COMPRESSION ZSTD)",
            staging.display()
        )
    } else {
        format!(
            "COPY ({build_sql}) TO '{}/data.parquet' (FORMAT PARQUET, COMPRESSION ZSTD)",
            staging.display()
        )
    };
    session.execute_batch(&copy)?;
    sanity_check(&session, def, staging)
}

/// Row count, non-null keys, finite measures. Referencing every declared
/// column also proves the staged schema is complete.
fn sanity_check(
    session: &EngineSession,
    def: &ViewDefinition,
    staging: &std::path::Path,
) -> Result<u64> {
    let glob = format!("{}/**/*.parquet", staging.display());
    let from = sql::source_parquet(&[glob])?;

    let rows = match session.query_i64(&format!("SELECT COUNT(*) FROM {from}")) {
        Ok(n) => n as u64,
        // A partitioned COPY of zero rows writes no files at all.
        Err(_) if def.allow_empty => return Ok(0),
        Err(e) => return Err(e.into()),
    };
    if rows == 0 && !def.allow_empty {
        return Err(BuildError::Sanity {
            name: def.name.clone(),
            reason: "build produced zero rows".to_string(),
        });
    }

    for key in def.group_columns() {
        let nulls = session.query_i64(&format!(
            "SELECT COUNT(*) FROM {from} WHERE {key} IS NULL"
        ))?;
        if nulls > 0 {
            return Err(BuildError::Sanity {
                name: def.name.clone(),
                reason: format!("{nulls} null values in key column {key}"),
            });
        }
    }

    for (measure, expr) in &def.measures {
        if matches!(expr.func, AggFunc::Count) {
            continue;
        }
        let non_finite = session.query_i64(&format!(
            "SELECT COUNT(CASE WHEN NOT isfinite({measure}) THEN 1 END) FROM {from}"
        ))?;
        if non_finite > 0 {
            return Err(BuildError::Sanity {
                name: def.name.clone(),
                reason: format!("{non_finite} non-finite values in measure {measure}"),
            });
        }
    }

    Ok(rows)
}
