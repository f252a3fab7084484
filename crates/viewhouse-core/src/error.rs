//! Core Error Types
//!
//! Errors raised while parsing and validating declarative queries. Input
//! errors are surfaced per query and never abort a batch.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, QueryError>;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("Malformed query: {0}")]
    Malformed(String),

    #[error("Unknown column: {0}")]
    UnknownColumn(String),

    #[error("Unsupported source table: {0} (only 'events' is queryable)")]
    UnsupportedSource(String),

    #[error("Select list is empty")]
    EmptySelect,

    #[error("Column {0} is selected but not grouped")]
    UngroupedDimension(String),

    #[error("Aggregate {func}({column}) is not supported: {reason}")]
    InvalidAggregate {
        func: String,
        column: String,
        reason: String,
    },

    #[error("Operator {op} on column {col} expects {expected}")]
    InvalidOperand {
        col: String,
        op: String,
        expected: &'static str,
    },

    #[error("Order-by column {0} is neither a selected dimension nor an aggregate alias")]
    UnsortableColumn(String),

    #[error("Limit must be a positive integer")]
    InvalidLimit,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
