//! Declarative Query Signature
//!
//! This module defines the line-delimited JSON query format accepted by the
//! planner:
//!
//! ```json
//! {
//!   "from": "events",
//!   "select": ["country", {"SUM": "bid_price"}],
//!   "where": [
//!     {"col": "type", "op": "eq", "val": "impression"},
//!     {"col": "day", "op": "between", "val": ["2025-09-10", "2025-09-12"]}
//!   ],
//!   "group_by": ["country"],
//!   "order_by": [{"col": "country", "dir": "asc"}],
//!   "limit": 100
//! }
//! ```
//!
//! Every node is a tagged variant: operators and aggregate functions are
//! closed enums, and record types reject unknown fields, so a malformed
//! query fails deserialization instead of being silently misread.
//!
//! Deserialization catches shape errors; [`QuerySpec::validate`] then checks
//! the semantic rules (known columns, grouped dimensions, aggregable
//! measures, operand shapes).

use std::collections::BTreeMap;
use std::fmt;

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{QueryError, Result};
use crate::grain::Grain;
use crate::schema;

/// A scalar literal in a predicate: string or number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    Int(i64),
    Float(f64),
    Text(String),
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Int(v) => write!(f, "{v}"),
            ScalarValue::Float(v) => write!(f, "{v}"),
            ScalarValue::Text(v) => write!(f, "{v}"),
        }
    }
}

impl ScalarValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            ScalarValue::Text(s) => Some(s),
            _ => None,
        }
    }
}

/// Predicate operand: a scalar, a `[lo, hi]` pair for `between`, or a list
/// for `in`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PredicateValue {
    Scalar(ScalarValue),
    List(Vec<ScalarValue>),
}

/// Comparison operators recognized in `where` clauses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompareOp {
    Eq,
    Neq,
    Lt,
    Lte,
    Gt,
    Gte,
    Between,
    In,
}

impl CompareOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompareOp::Eq => "eq",
            CompareOp::Neq => "neq",
            CompareOp::Lt => "lt",
            CompareOp::Lte => "lte",
            CompareOp::Gt => "gt",
            CompareOp::Gte => "gte",
            CompareOp::Between => "between",
            CompareOp::In => "in",
        }
    }
}

/// A single filter condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Predicate {
    pub col: String,
    pub op: CompareOp,
    pub val: PredicateValue,
}

impl Predicate {
    pub fn eq(col: &str, val: ScalarValue) -> Self {
        Predicate {
            col: col.to_string(),
            op: CompareOp::Eq,
            val: PredicateValue::Scalar(val),
        }
    }

    /// The scalar operand, if this is a scalar-shaped predicate.
    pub fn scalar(&self) -> Option<&ScalarValue> {
        match &self.val {
            PredicateValue::Scalar(s) => Some(s),
            PredicateValue::List(_) => None,
        }
    }
}

/// Aggregate functions recognized in `select` items.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggFunc {
    Sum,
    Count,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    pub fn as_sql(&self) -> &'static str {
        match self {
            AggFunc::Sum => "SUM",
            AggFunc::Count => "COUNT",
            AggFunc::Avg => "AVG",
            AggFunc::Min => "MIN",
            AggFunc::Max => "MAX",
        }
    }

    pub fn parse(s: &str) -> Option<AggFunc> {
        match s.to_ascii_uppercase().as_str() {
            "SUM" => Some(AggFunc::Sum),
            "COUNT" => Some(AggFunc::Count),
            "AVG" => Some(AggFunc::Avg),
            "MIN" => Some(AggFunc::Min),
            "MAX" => Some(AggFunc::Max),
            _ => None,
        }
    }
}

/// An aggregate select item, e.g. `{"SUM": "bid_price", "as": "revenue"}`.
///
/// `column` is `None` for `COUNT(*)`.
#[derive(Debug, Clone, PartialEq)]
pub struct Aggregate {
    pub func: AggFunc,
    pub column: Option<String>,
    pub alias: Option<String>,
}

impl Aggregate {
    pub fn new(func: AggFunc, column: Option<&str>) -> Self {
        Aggregate {
            func,
            column: column.map(|c| c.to_string()),
            alias: None,
        }
    }

    /// Canonical output label: the explicit alias if given, otherwise the
    /// `FUNC(column)` form used for CSV headers and ORDER BY resolution.
    pub fn label(&self) -> String {
        match &self.alias {
            Some(a) => a.clone(),
            None => self.canonical_name(),
        }
    }

    /// `FUNC(column)` regardless of alias; stable across queries, so batch
    /// members that alias the same aggregate differently still share work.
    pub fn canonical_name(&self) -> String {
        format!(
            "{}({})",
            self.func.as_sql(),
            self.column.as_deref().unwrap_or("*")
        )
    }
}

impl<'de> Deserialize<'de> for Aggregate {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let map = BTreeMap::<String, serde_json::Value>::deserialize(deserializer)?;
        let mut func = None;
        let mut column = None;
        let mut alias = None;
        for (key, value) in &map {
            if key.eq_ignore_ascii_case("as") {
                let a = value
                    .as_str()
                    .ok_or_else(|| D::Error::custom("aggregate alias must be a string"))?;
                alias = Some(a.to_string());
            } else if let Some(f) = AggFunc::parse(key) {
                if func.is_some() {
                    return Err(D::Error::custom(
                        "select item contains more than one aggregate function",
                    ));
                }
                let col = value
                    .as_str()
                    .ok_or_else(|| D::Error::custom("aggregate column must be a string"))?;
                func = Some(f);
                column = if col == "*" {
                    None
                } else {
                    Some(col.to_string())
                };
            } else {
                return Err(D::Error::custom(format!(
                    "unknown aggregate function: {key}"
                )));
            }
        }
        let func =
            func.ok_or_else(|| D::Error::custom("select item is missing an aggregate function"))?;
        if func != AggFunc::Count && column.is_none() {
            return Err(D::Error::custom("only COUNT accepts the * column"));
        }
        Ok(Aggregate {
            func,
            column,
            alias,
        })
    }
}

impl Serialize for Aggregate {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = BTreeMap::new();
        map.insert(
            self.func.as_sql().to_string(),
            self.column.clone().unwrap_or_else(|| "*".to_string()),
        );
        if let Some(a) = &self.alias {
            map.insert("as".to_string(), a.clone());
        }
        map.serialize(serializer)
    }
}

/// One entry in the select list: a plain dimension or an aggregate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SelectItem {
    Dimension(String),
    Aggregate(Aggregate),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderDir {
    Asc,
    Desc,
}

impl Default for OrderDir {
    fn default() -> Self {
        OrderDir::Asc
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderBy {
    pub col: String,
    #[serde(default)]
    pub dir: OrderDir,
}

/// The full declarative query signature, the planner's sole input besides a
/// registry snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuerySpec {
    pub from: String,

    pub select: Vec<SelectItem>,

    #[serde(rename = "where", default, skip_serializing_if = "Vec::is_empty")]
    pub filters: Vec<Predicate>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub group_by: Vec<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub order_by: Vec<OrderBy>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    /// Explicit opt-in to approximate (sampled) execution.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub approximate: bool,
}

impl QuerySpec {
    /// Parse one JSON query record and validate it.
    pub fn from_json(raw: &str) -> Result<QuerySpec> {
        let spec: QuerySpec =
            serde_json::from_str(raw).map_err(|e| QueryError::Malformed(e.to_string()))?;
        spec.validate()?;
        Ok(spec)
    }

    /// Plain dimension columns in select order.
    pub fn dimensions(&self) -> Vec<&str> {
        self.select
            .iter()
            .filter_map(|item| match item {
                SelectItem::Dimension(d) => Some(d.as_str()),
                SelectItem::Aggregate(_) => None,
            })
            .collect()
    }

    /// Aggregate select items in select order.
    pub fn aggregates(&self) -> Vec<&Aggregate> {
        self.select
            .iter()
            .filter_map(|item| match item {
                SelectItem::Aggregate(a) => Some(a),
                SelectItem::Dimension(_) => None,
            })
            .collect()
    }

    /// Grouping columns that are not time buckets.
    pub fn non_time_dimensions(&self) -> Vec<&str> {
        self.group_by
            .iter()
            .map(|c| c.as_str())
            .filter(|c| !schema::is_time_dimension(c))
            .collect()
    }

    /// The time grain this query requires, from its grouping columns.
    pub fn required_grain(&self) -> Grain {
        Grain::required_by(&self.group_by)
    }

    /// The scalar of an equality filter on `col`, if one exists.
    pub fn eq_filter(&self, col: &str) -> Option<&ScalarValue> {
        self.filters
            .iter()
            .find(|p| p.col == col && p.op == CompareOp::Eq)
            .and_then(|p| p.scalar())
    }

    /// Semantic validation on top of the shape checks serde already did.
    pub fn validate(&self) -> Result<()> {
        if self.from != "events" {
            return Err(QueryError::UnsupportedSource(self.from.clone()));
        }
        if self.select.is_empty() {
            return Err(QueryError::EmptySelect);
        }

        for col in &self.group_by {
            if !schema::is_dimension(col) {
                return Err(QueryError::UnknownColumn(col.clone()));
            }
        }

        for item in &self.select {
            match item {
                SelectItem::Dimension(d) => {
                    if !schema::is_dimension(d) {
                        return Err(QueryError::UnknownColumn(d.clone()));
                    }
                    if !self.group_by.iter().any(|g| g == d) {
                        return Err(QueryError::UngroupedDimension(d.clone()));
                    }
                }
                SelectItem::Aggregate(agg) => self.validate_aggregate(agg)?,
            }
        }

        for pred in &self.filters {
            self.validate_predicate(pred)?;
        }

        for ob in &self.order_by {
            // Sorting resolves against output labels: an aliased aggregate
            // is addressable only by its alias.
            let is_dim = self.dimensions().iter().any(|d| *d == ob.col);
            let is_agg = self.aggregates().iter().any(|a| a.label() == ob.col);
            if !is_dim && !is_agg {
                return Err(QueryError::UnsortableColumn(ob.col.clone()));
            }
        }

        if self.limit == Some(0) {
            return Err(QueryError::InvalidLimit);
        }

        Ok(())
    }

    fn validate_aggregate(&self, agg: &Aggregate) -> Result<()> {
        match (&agg.func, &agg.column) {
            (AggFunc::Count, None) => Ok(()),
            (AggFunc::Count, Some(col)) if schema::is_known_column(col) => Ok(()),
            (AggFunc::Count, Some(col)) => Err(QueryError::UnknownColumn(col.clone())),
            (_, Some(col)) if schema::is_measure(col) => Ok(()),
            (func, Some(col)) => Err(QueryError::InvalidAggregate {
                func: func.as_sql().to_string(),
                column: col.clone(),
                reason: "not a numeric measure column".to_string(),
            }),
            (func, None) => Err(QueryError::InvalidAggregate {
                func: func.as_sql().to_string(),
                column: "*".to_string(),
                reason: "only COUNT accepts *".to_string(),
            }),
        }
    }

    fn validate_predicate(&self, pred: &Predicate) -> Result<()> {
        if !schema::is_known_column(&pred.col) {
            return Err(QueryError::UnknownColumn(pred.col.clone()));
        }
        let operand_err = |expected: &'static str| QueryError::InvalidOperand {
            col: pred.col.clone(),
            op: pred.op.as_str().to_string(),
            expected,
        };
        match (pred.op, &pred.val) {
            (CompareOp::Between, PredicateValue::List(vals)) if vals.len() == 2 => Ok(()),
            (CompareOp::Between, _) => Err(operand_err("a [low, high] pair")),
            (CompareOp::In, PredicateValue::List(vals)) if !vals.is_empty() => Ok(()),
            (CompareOp::In, _) => Err(operand_err("a non-empty list")),
            (_, PredicateValue::Scalar(_)) => Ok(()),
            (_, PredicateValue::List(_)) => Err(operand_err("a single scalar")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> Result<QuerySpec> {
        QuerySpec::from_json(raw)
    }

    #[test]
    fn test_parse_full_query() {
        let q = parse(
            r#"{
                "from": "events",
                "select": ["country", {"SUM": "bid_price"}],
                "where": [
                    {"col": "type", "op": "eq", "val": "impression"},
                    {"col": "day", "op": "between", "val": ["2025-09-10", "2025-09-12"]}
                ],
                "group_by": ["country"],
                "order_by": [{"col": "country", "dir": "asc"}],
                "limit": 100
            }"#,
        )
        .unwrap();

        assert_eq!(q.dimensions(), vec!["country"]);
        assert_eq!(q.aggregates().len(), 1);
        assert_eq!(q.aggregates()[0].canonical_name(), "SUM(bid_price)");
        assert_eq!(q.required_grain(), Grain::AllTime);
        assert_eq!(q.limit, Some(100));
        assert_eq!(
            q.eq_filter("type"),
            Some(&ScalarValue::Text("impression".to_string()))
        );
    }

    #[test]
    fn test_count_star_and_alias() {
        let q = parse(
            r#"{
                "from": "events",
                "select": ["advertiser_id", "type", {"COUNT": "*", "as": "events"}],
                "group_by": ["advertiser_id", "type"]
            }"#,
        )
        .unwrap();
        let agg = q.aggregates()[0];
        assert_eq!(agg.func, AggFunc::Count);
        assert_eq!(agg.column, None);
        assert_eq!(agg.label(), "events");
        assert_eq!(agg.canonical_name(), "COUNT(*)");
    }

    #[test]
    fn test_unknown_operator_rejected() {
        let err = parse(
            r#"{
                "from": "events",
                "select": [{"COUNT": "*"}],
                "where": [{"col": "country", "op": "like", "val": "J%"}]
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::Malformed(_)));
    }

    #[test]
    fn test_unknown_aggregate_rejected() {
        let err = parse(
            r#"{"from": "events", "select": [{"MEDIAN": "bid_price"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::Malformed(_)));
    }

    #[test]
    fn test_unknown_top_level_field_rejected() {
        let err = parse(
            r#"{"from": "events", "select": [{"COUNT": "*"}], "having": []}"#,
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::Malformed(_)));
    }

    #[test]
    fn test_unknown_column_rejected() {
        let err = parse(
            r#"{"from": "events", "select": ["campaign"], "group_by": ["campaign"]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::UnknownColumn(c) if c == "campaign"));
    }

    #[test]
    fn test_selected_dimension_must_be_grouped() {
        let err = parse(
            r#"{"from": "events", "select": ["country", {"COUNT": "*"}], "group_by": ["day"]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::UngroupedDimension(c) if c == "country"));
    }

    #[test]
    fn test_between_requires_pair() {
        let err = parse(
            r#"{
                "from": "events",
                "select": [{"COUNT": "*"}],
                "where": [{"col": "day", "op": "between", "val": ["2024-01-01"]}]
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::InvalidOperand { .. }));
    }

    #[test]
    fn test_sum_requires_measure_column() {
        let err = parse(
            r#"{"from": "events", "select": [{"SUM": "country"}]}"#,
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::InvalidAggregate { .. }));
    }

    #[test]
    fn test_order_by_resolves_alias_and_canonical() {
        let q = parse(
            r#"{
                "from": "events",
                "select": ["day", {"SUM": "bid_price", "as": "revenue"}],
                "group_by": ["day"],
                "order_by": [{"col": "revenue", "dir": "desc"}]
            }"#,
        )
        .unwrap();
        assert_eq!(q.order_by[0].dir, OrderDir::Desc);

        let err = parse(
            r#"{
                "from": "events",
                "select": ["day", {"SUM": "bid_price"}],
                "group_by": ["day"],
                "order_by": [{"col": "profit"}]
            }"#,
        )
        .unwrap_err();
        assert!(matches!(err, QueryError::UnsortableColumn(_)));
    }

    #[test]
    fn test_non_events_source_rejected() {
        let err = parse(r#"{"from": "clicks", "select": [{"COUNT": "*"}]}"#).unwrap_err();
        assert!(matches!(err, QueryError::UnsupportedSource(_)));
    }

    #[test]
    fn test_round_trip_serialization() {
        let q = parse(
            r#"{
                "from": "events",
                "select": ["day", {"AVG": "total_price"}],
                "where": [{"col": "type", "op": "eq", "val": "purchase"}],
                "group_by": ["day"]
            }"#,
        )
        .unwrap();
        let json = serde_json::to_string(&q).unwrap();
        let back: QuerySpec = serde_json::from_str(&json).unwrap();
        assert_eq!(q, back);
    }
}
