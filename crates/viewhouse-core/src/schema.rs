//! Column catalog for the events table.
//!
//! The declarative query format references columns by name; this module is
//! the single place that knows which names exist, which are dimensions,
//! which are time buckets, and which can be aggregated.

/// Grouping/filtering dimensions, including derived time buckets.
pub const DIMENSIONS: [&str; 9] = [
    "day",
    "hour",
    "minute",
    "week",
    "country",
    "advertiser_id",
    "publisher_id",
    "user_id",
    "type",
];

/// Time-bucket columns; grouping by one of these fixes the query grain.
pub const TIME_DIMENSIONS: [&str; 4] = ["day", "hour", "minute", "week"];

/// Numeric measure columns eligible for sum/avg/min/max.
pub const MEASURES: [&str; 2] = ["bid_price", "total_price"];

/// Non-null key columns enforced by the lake validator.
pub const KEY_COLUMNS: [&str; 3] = ["day", "type", "advertiser_id"];

pub fn is_dimension(col: &str) -> bool {
    DIMENSIONS.contains(&col)
}

pub fn is_time_dimension(col: &str) -> bool {
    TIME_DIMENSIONS.contains(&col)
}

pub fn is_measure(col: &str) -> bool {
    MEASURES.contains(&col)
}

pub fn is_known_column(col: &str) -> bool {
    is_dimension(col) || is_measure(col)
}

/// Columns holding date values, which take `DATE '...'` literals and
/// canonical-form comparisons.
pub fn is_date_column(col: &str) -> bool {
    col == "day" || col == "week"
}
