//! Lake manifest: a serialized map from canonical day to parquet globs.
//!
//! The manifest lets a planner snapshot partition state without touching the
//! directory tree, and gives operators a greppable record of what the lake
//! contained when it was last scanned.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use viewhouse_core::{format_day, parse_canonical_day};

use crate::error::Result;
use crate::partitions::Lake;

pub const MANIFEST_FILE: &str = "manifest.json";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LakeManifest {
    /// Canonical day -> glob patterns covering that partition.
    pub days: BTreeMap<String, Vec<String>>,
}

impl LakeManifest {
    pub fn from_lake(lake: &Lake) -> LakeManifest {
        let days = lake
            .partitions()
            .iter()
            .map(|(day, path)| {
                (
                    format_day(*day),
                    vec![format!("{}/**/*.parquet", path.display())],
                )
            })
            .collect();
        LakeManifest { days }
    }

    /// Write next to the lake's `events/` directory.
    pub fn write(&self, lake_root: &Path) -> Result<()> {
        let path = lake_root.join(MANIFEST_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    pub fn load(lake_root: &Path) -> Result<LakeManifest> {
        let path = lake_root.join(MANIFEST_FILE);
        if !path.exists() {
            return Ok(LakeManifest::default());
        }
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Glob patterns for an explicit day list, deduplicated and sorted.
    pub fn patterns_for(&self, days: &[NaiveDate]) -> Vec<String> {
        let mut out: Vec<String> = days
            .iter()
            .filter_map(|d| self.days.get(&format_day(*d)))
            .flatten()
            .cloned()
            .collect();
        out.sort();
        out.dedup();
        out
    }

    pub fn max_day(&self) -> Option<NaiveDate> {
        self.days.keys().rev().find_map(|d| parse_canonical_day(d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_round_trip() {
        let tmp = TempDir::new().unwrap();
        let events = tmp.path().join("events");
        for day in ["2024-01-01", "2024-01-02"] {
            std::fs::create_dir_all(events.join(format!("day={day}"))).unwrap();
        }
        let lake = Lake::open(tmp.path()).unwrap();

        let manifest = LakeManifest::from_lake(&lake);
        manifest.write(tmp.path()).unwrap();

        let loaded = LakeManifest::load(tmp.path()).unwrap();
        assert_eq!(loaded.days.len(), 2);
        assert_eq!(loaded.max_day(), parse_canonical_day("2024-01-02"));

        let patterns = loaded.patterns_for(&[parse_canonical_day("2024-01-01").unwrap()]);
        assert_eq!(patterns.len(), 1);
        assert!(patterns[0].contains("day=2024-01-01"));
    }

    #[test]
    fn test_missing_manifest_is_empty() {
        let tmp = TempDir::new().unwrap();
        let manifest = LakeManifest::load(tmp.path()).unwrap();
        assert!(manifest.days.is_empty());
        assert_eq!(manifest.max_day(), None);
    }
}
