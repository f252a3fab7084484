//! Engine Error Types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Engine error: {0}")]
    Duckdb(#[from] duckdb::Error),

    #[error("SQL generation error: {0}")]
    Sql(String),

    /// Result materialization hit the caller's byte budget.
    #[error("Result exceeded the in-memory byte budget of {budget} bytes")]
    BudgetExceeded { budget: u64 },
}
