//! View Definitions
//!
//! A [`ViewDefinition`] is the operator-supplied recipe for one
//! materialized view: name, grain, dimensions, build-time filters, and
//! measure rules. Definitions are loaded from a JSON config and turned into
//! the build query here; everything else the builder does (staging,
//! promotion, registration) is definition-agnostic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use viewhouse_catalog::{compute_fingerprint, MeasureExpr};
use viewhouse_core::query::Predicate;
use viewhouse_core::Grain;
use viewhouse_engine::sql;
use viewhouse_lake::Lake;

use crate::error::Result;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewDefinition {
    pub name: String,

    pub grain: Grain,

    /// Non-time grouping columns.
    #[serde(default)]
    pub dimensions: Vec<String>,

    /// Build-time row filters applied to every row of the view.
    #[serde(default)]
    pub filters: Vec<Predicate>,

    /// Measure column name -> computation rule.
    pub measures: BTreeMap<String, MeasureExpr>,

    /// Permit zero-row builds (filters that legitimately match nothing).
    #[serde(default)]
    pub allow_empty: bool,
}

impl ViewDefinition {
    pub fn fingerprint(&self) -> String {
        compute_fingerprint(self.grain, &self.dimensions, &self.filters, &self.measures)
    }

    /// Views at day grain or finer are hive-partitioned by day, mirroring
    /// the lake layout so the engine can prune them the same way.
    pub fn partition_by_day(&self) -> bool {
        self.grain.key_columns().contains(&"day")
    }

    /// Grouping columns: grain key, then dimensions.
    pub fn group_columns(&self) -> Vec<&str> {
        let mut cols: Vec<&str> = self.grain.key_columns().to_vec();
        cols.extend(self.dimensions.iter().map(|d| d.as_str()));
        cols
    }

    /// The aggregation query the engine runs over the lake to produce this
    /// view's rows.
    pub fn build_sql(&self, lake: &Lake) -> Result<String> {
        let mut select: Vec<String> = Vec::new();
        let mut group: Vec<String> = Vec::new();
        for col in self.grain.key_columns() {
            // Week is derived; day/hour/minute are physical lake columns.
            if *col == "week" {
                select.push("DATE_TRUNC('week', CAST(day AS DATE)) AS week".to_string());
                group.push("DATE_TRUNC('week', CAST(day AS DATE))".to_string());
            } else {
                select.push(col.to_string());
                group.push(col.to_string());
            }
        }
        for dim in &self.dimensions {
            select.push(dim.clone());
            group.push(dim.clone());
        }
        for (name, expr) in &self.measures {
            select.push(format!("{} AS {}", sql::measure_sql(expr)?, name));
        }

        let source = sql::source_parquet(&[lake.full_glob()])?;
        let where_clause = sql::where_sql(&self.filters)?;
        let group_clause = if group.is_empty() {
            String::new()
        } else {
            format!("GROUP BY {}", group.join(", "))
        };

        Ok([
            format!("SELECT {}", select.join(", ")),
            format!("FROM {source}"),
            where_clause,
            group_clause,
        ]
        .into_iter()
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join(" "))
    }

    /// Load a definition list from a JSON array file.
    pub fn load_all(path: &std::path::Path) -> std::io::Result<Vec<ViewDefinition>> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use viewhouse_core::query::{AggFunc, ScalarValue};

    fn lake() -> (TempDir, Lake) {
        let tmp = TempDir::new().unwrap();
        std::fs::create_dir_all(tmp.path().join("events/day=2024-01-01")).unwrap();
        let lake = Lake::open(tmp.path()).unwrap();
        (tmp, lake)
    }

    fn definition() -> ViewDefinition {
        let mut measures = BTreeMap::new();
        measures.insert(
            "sum_bid".to_string(),
            MeasureExpr::plain(AggFunc::Sum, Some("bid_price")),
        );
        measures.insert(
            "events".to_string(),
            MeasureExpr::plain(AggFunc::Count, None),
        );
        ViewDefinition {
            name: "mv_day_country_impr".to_string(),
            grain: Grain::Day,
            dimensions: vec!["country".to_string()],
            filters: vec![Predicate::eq(
                "type",
                ScalarValue::Text("impression".to_string()),
            )],
            measures,
            allow_empty: false,
        }
    }

    #[test]
    fn test_build_sql_shape() {
        let (_tmp, lake) = lake();
        let sql = definition().build_sql(&lake).unwrap();
        assert!(sql.starts_with("SELECT day, country, COUNT(*) AS events, SUM(bid_price) AS sum_bid"));
        assert!(sql.contains("WHERE type = 'impression'"));
        assert!(sql.ends_with("GROUP BY day, country"));
    }

    #[test]
    fn test_week_grain_derives_bucket() {
        let (_tmp, lake) = lake();
        let mut def = definition();
        def.grain = Grain::Week;
        let sql = def.build_sql(&lake).unwrap();
        assert!(sql.contains("DATE_TRUNC('week', CAST(day AS DATE)) AS week"));
        assert!(sql.contains("GROUP BY DATE_TRUNC('week', CAST(day AS DATE)), country"));
        assert!(!def.partition_by_day());
    }

    #[test]
    fn test_fingerprint_tracks_definition() {
        let a = definition();
        let mut b = definition();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.dimensions.push("publisher_id".to_string());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_definition_json_round_trip() {
        let def = definition();
        let json = serde_json::to_string(&def).unwrap();
        let back: ViewDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, def.name);
        assert_eq!(back.fingerprint(), def.fingerprint());
    }
}
