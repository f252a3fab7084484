//! Lake Error Types

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, LakeError>;

#[derive(Debug, Error)]
pub enum LakeError {
    /// The lake root is missing or structurally broken. Fatal: the system
    /// refuses to start rather than plan against a half-readable lake.
    #[error("Corrupt lake layout at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("Invalid date literal in predicate on {col}: {value}")]
    BadDateLiteral { col: String, value: String },

    #[error("I/O error reading lake: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest error: {0}")]
    Manifest(#[from] serde_json::Error),
}
