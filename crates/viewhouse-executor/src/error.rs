//! Executor Error Types
//!
//! Only batch-level failures surface as errors; individual plan failures
//! are isolated into their outcome's status and never abort siblings.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ExecError>;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("Batch of {len} queries exceeds the limit of {max}")]
    BatchTooLarge { len: usize, max: usize },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Worker task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
