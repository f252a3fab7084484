//! Partition enumeration, canonical-form validation, and pruning.
//!
//! A partition directory is valid iff its name is `day=` followed by a
//! ten-character canonical ISO date. Everything else under `events/` is
//! quarantined: remembered, logged, and never scanned.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{debug, warn};

use viewhouse_core::query::{CompareOp, Predicate, PredicateValue, ScalarValue};
use viewhouse_core::{format_day, parse_canonical_day};

use crate::error::{LakeError, Result};

const PARTITION_PREFIX: &str = "day=";

/// Read-only handle over the lake directory tree.
#[derive(Debug, Clone)]
pub struct Lake {
    root: PathBuf,
    partitions: BTreeMap<NaiveDate, PathBuf>,
    quarantined: Vec<PathBuf>,
}

impl Lake {
    /// Open a lake root and enumerate its day partitions.
    ///
    /// A missing `events/` directory is fatal; a non-canonical partition
    /// name is not (the directory is quarantined and skipped).
    pub fn open<P: AsRef<Path>>(root: P) -> Result<Lake> {
        let root = root.as_ref().to_path_buf();
        let events = root.join("events");
        if !events.is_dir() {
            return Err(LakeError::Corrupt {
                path: root,
                reason: "missing events/ directory".to_string(),
            });
        }

        let mut partitions = BTreeMap::new();
        let mut quarantined = Vec::new();
        for entry in std::fs::read_dir(&events)? {
            let entry = entry?;
            let path = entry.path();
            if !path.is_dir() {
                // Stray files at the partition level are a layout violation.
                quarantined.push(path);
                continue;
            }
            let name = entry.file_name();
            let name = name.to_string_lossy();
            match parse_partition_name(&name) {
                Some(day) => {
                    partitions.insert(day, path);
                }
                None => {
                    warn!(partition = %name, "quarantined non-canonical partition");
                    quarantined.push(path);
                }
            }
        }

        debug!(
            partitions = partitions.len(),
            quarantined = quarantined.len(),
            root = %root.display(),
            "opened lake"
        );
        Ok(Lake {
            root,
            partitions,
            quarantined,
        })
    }

    /// Re-enumerate partitions (the lake is append-only; new days appear).
    pub fn refresh(&mut self) -> Result<()> {
        *self = Lake::open(&self.root)?;
        Ok(())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn partitions(&self) -> &BTreeMap<NaiveDate, PathBuf> {
        &self.partitions
    }

    /// Partition directories that failed canonical validation.
    pub fn quarantined(&self) -> &[PathBuf] {
        &self.quarantined
    }

    /// Highest day present; the builder records this as `source_watermark`.
    pub fn max_day(&self) -> Option<NaiveDate> {
        self.partitions.keys().next_back().copied()
    }

    /// Glob matching every valid partition.
    pub fn full_glob(&self) -> String {
        format!(
            "{}/events/{}*/**/*.parquet",
            self.root.display(),
            PARTITION_PREFIX
        )
    }

    /// Per-partition globs for an explicit day list.
    pub fn partition_globs(&self, days: &[NaiveDate]) -> Vec<String> {
        days.iter()
            .filter_map(|d| self.partitions.get(d))
            .map(|p| format!("{}/**/*.parquet", p.display()))
            .collect()
    }

    /// Restrict the partition set to the days implied by the query's date
    /// predicates. Predicates on other columns are ignored here; they stay
    /// in the plan as residual filters.
    pub fn prune(&self, predicates: &[Predicate]) -> Result<Vec<NaiveDate>> {
        let mut days: Vec<NaiveDate> = self.partitions.keys().copied().collect();
        for pred in predicates {
            match pred.col.as_str() {
                "day" => days.retain_by_date_predicate(pred)?,
                // A week filter covers seven consecutive days.
                "week" => match (pred.op, &pred.val) {
                    (CompareOp::Eq, PredicateValue::Scalar(v)) => {
                        let start = parse_date_operand(&pred.col, v)?;
                        let end = start + chrono::Duration::days(6);
                        days.retain(|d| *d >= start && *d <= end);
                    }
                    (CompareOp::Between, PredicateValue::List(vals)) if vals.len() == 2 => {
                        let lo = parse_date_operand(&pred.col, &vals[0])?;
                        let hi =
                            parse_date_operand(&pred.col, &vals[1])? + chrono::Duration::days(6);
                        days.retain(|d| *d >= lo && *d <= hi);
                    }
                    _ => {}
                },
                _ => {}
            }
        }
        Ok(days)
    }
}

trait RetainByDate {
    fn retain_by_date_predicate(&mut self, pred: &Predicate) -> Result<()>;
}

impl RetainByDate for Vec<NaiveDate> {
    fn retain_by_date_predicate(&mut self, pred: &Predicate) -> Result<()> {
        match (pred.op, &pred.val) {
            (CompareOp::Eq, PredicateValue::Scalar(v)) => {
                let d = parse_date_operand(&pred.col, v)?;
                self.retain(|x| *x == d);
            }
            (CompareOp::Neq, PredicateValue::Scalar(v)) => {
                let d = parse_date_operand(&pred.col, v)?;
                self.retain(|x| *x != d);
            }
            (CompareOp::Lt, PredicateValue::Scalar(v)) => {
                let d = parse_date_operand(&pred.col, v)?;
                self.retain(|x| *x < d);
            }
            (CompareOp::Lte, PredicateValue::Scalar(v)) => {
                let d = parse_date_operand(&pred.col, v)?;
                self.retain(|x| *x <= d);
            }
            (CompareOp::Gt, PredicateValue::Scalar(v)) => {
                let d = parse_date_operand(&pred.col, v)?;
                self.retain(|x| *x > d);
            }
            (CompareOp::Gte, PredicateValue::Scalar(v)) => {
                let d = parse_date_operand(&pred.col, v)?;
                self.retain(|x| *x >= d);
            }
            // BETWEEN is inclusive at both ends.
            (CompareOp::Between, PredicateValue::List(vals)) if vals.len() == 2 => {
                let lo = parse_date_operand(&pred.col, &vals[0])?;
                let hi = parse_date_operand(&pred.col, &vals[1])?;
                self.retain(|x| *x >= lo && *x <= hi);
            }
            (CompareOp::In, PredicateValue::List(vals)) => {
                let mut set = Vec::with_capacity(vals.len());
                for v in vals {
                    set.push(parse_date_operand(&pred.col, v)?);
                }
                self.retain(|x| set.contains(x));
            }
            _ => {}
        }
        Ok(())
    }
}

fn parse_date_operand(col: &str, value: &ScalarValue) -> Result<NaiveDate> {
    value
        .as_text()
        .and_then(parse_canonical_day)
        .ok_or_else(|| LakeError::BadDateLiteral {
            col: col.to_string(),
            value: value.to_string(),
        })
}

fn parse_partition_name(name: &str) -> Option<NaiveDate> {
    let raw = name.strip_prefix(PARTITION_PREFIX)?;
    parse_canonical_day(raw)
}

/// Canonical partition directory name for a day.
pub fn partition_dir_name(day: NaiveDate) -> String {
    format!("{}{}", PARTITION_PREFIX, format_day(day))
}
