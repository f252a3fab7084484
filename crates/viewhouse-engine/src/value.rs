//! In-memory scalar values.
//!
//! Everything fetched from the engine is normalized into [`Scalar`] before
//! it reaches the executor: result buffering, superset projection, multiset
//! comparison and CSV serialization all work on this one representation
//! instead of DuckDB's wire types.

use std::cmp::Ordering;
use std::fmt;

use chrono::NaiveDate;
use duckdb::types::{TimeUnit, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Scalar {
    pub fn from_engine(value: Value) -> Scalar {
        match value {
            Value::Null => Scalar::Null,
            Value::Boolean(b) => Scalar::Int(b as i64),
            Value::TinyInt(v) => Scalar::Int(v as i64),
            Value::SmallInt(v) => Scalar::Int(v as i64),
            Value::Int(v) => Scalar::Int(v as i64),
            Value::BigInt(v) => Scalar::Int(v),
            Value::HugeInt(v) => Scalar::Int(v as i64),
            Value::UTinyInt(v) => Scalar::Int(v as i64),
            Value::USmallInt(v) => Scalar::Int(v as i64),
            Value::UInt(v) => Scalar::Int(v as i64),
            Value::UBigInt(v) => Scalar::Int(v as i64),
            Value::Float(v) => Scalar::Float(v as f64),
            Value::Double(v) => Scalar::Float(v),
            Value::Text(s) => Scalar::Text(s),
            Value::Date32(days) => Scalar::Text(format_date32(days)),
            Value::Timestamp(unit, raw) => Scalar::Text(format_timestamp(unit, raw)),
            other => Scalar::Text(format!("{other:?}")),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Scalar::Int(v) => Some(*v as f64),
            Scalar::Float(v) => Some(*v),
            _ => None,
        }
    }

    /// Total order used for in-memory ORDER BY: NULLs first, numbers by
    /// value, text lexicographic, mixed kinds by kind rank.
    pub fn compare(&self, other: &Scalar) -> Ordering {
        use Scalar::*;
        match (self, other) {
            (Null, Null) => Ordering::Equal,
            (Null, _) => Ordering::Less,
            (_, Null) => Ordering::Greater,
            (Int(a), Int(b)) => a.cmp(b),
            (Text(a), Text(b)) => a.cmp(b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(Ordering::Equal),
                _ => kind_rank(a).cmp(&kind_rank(b)),
            },
        }
    }

    /// CSV field rendering: quote only when the content requires it.
    pub fn to_csv_field(&self) -> String {
        match self {
            Scalar::Null => String::new(),
            Scalar::Int(v) => v.to_string(),
            Scalar::Float(v) => v.to_string(),
            Scalar::Text(s) => csv_quote(s),
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => write!(f, "NULL"),
            Scalar::Int(v) => write!(f, "{v}"),
            Scalar::Float(v) => write!(f, "{v}"),
            Scalar::Text(s) => write!(f, "{s}"),
        }
    }
}

fn kind_rank(s: &Scalar) -> u8 {
    match s {
        Scalar::Null => 0,
        Scalar::Int(_) | Scalar::Float(_) => 1,
        Scalar::Text(_) => 2,
    }
}

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn format_date32(days_since_epoch: i32) -> String {
    // 1970-01-01 is day 719_163 in chrono's CE day count.
    match NaiveDate::from_num_days_from_ce_opt(719_163 + days_since_epoch) {
        Some(d) => d.format("%Y-%m-%d").to_string(),
        None => String::new(),
    }
}

fn format_timestamp(unit: TimeUnit, raw: i64) -> String {
    let micros = match unit {
        TimeUnit::Second => raw.saturating_mul(1_000_000),
        TimeUnit::Millisecond => raw.saturating_mul(1_000),
        TimeUnit::Microsecond => raw,
        TimeUnit::Nanosecond => raw / 1_000,
    };
    match chrono::DateTime::from_timestamp_micros(micros) {
        Some(ts) => ts.format("%Y-%m-%dT%H:%M:%S%.6fZ").to_string(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_engine_numerics() {
        assert_eq!(Scalar::from_engine(Value::BigInt(42)), Scalar::Int(42));
        assert_eq!(Scalar::from_engine(Value::Double(0.5)), Scalar::Float(0.5));
        assert_eq!(Scalar::from_engine(Value::Null), Scalar::Null);
    }

    #[test]
    fn test_date32_formatting() {
        // 2024-01-01 is 19723 days after the epoch.
        assert_eq!(
            Scalar::from_engine(Value::Date32(19_723)),
            Scalar::Text("2024-01-01".to_string())
        );
        assert_eq!(
            Scalar::from_engine(Value::Date32(0)),
            Scalar::Text("1970-01-01".to_string())
        );
    }

    #[test]
    fn test_ordering() {
        assert_eq!(
            Scalar::Null.compare(&Scalar::Int(0)),
            Ordering::Less
        );
        assert_eq!(Scalar::Int(2).compare(&Scalar::Float(1.5)), Ordering::Greater);
        assert_eq!(
            Scalar::Text("JP".into()).compare(&Scalar::Text("US".into())),
            Ordering::Less
        );
    }

    #[test]
    fn test_csv_quoting() {
        assert_eq!(Scalar::Text("JP".into()).to_csv_field(), "JP");
        assert_eq!(
            Scalar::Text("a,b".into()).to_csv_field(),
            "\"a,b\""
        );
        assert_eq!(
            Scalar::Text("say \"hi\"".into()).to_csv_field(),
            "\"say \"\"hi\"\"\""
        );
        assert_eq!(Scalar::Null.to_csv_field(), "");
    }
}
