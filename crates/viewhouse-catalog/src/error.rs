//! Catalog Error Types

use std::path::PathBuf;

use thiserror::Error;

use crate::descriptor::Health;

pub type Result<T> = std::result::Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("View not found: {0}")]
    UnknownView(String),

    #[error("Invalid health transition for {name}: {from:?} -> {to:?}")]
    InvalidTransition {
        name: String,
        from: Health,
        to: Health,
    },

    /// Another healthy view already carries this schema fingerprint.
    #[error("Schema drift: {name} conflicts with healthy view {existing} (fingerprint {fingerprint})")]
    SchemaDrift {
        name: String,
        existing: String,
        fingerprint: String,
    },

    /// The on-disk registry is broken. Fatal: refuse to start.
    #[error("Corrupt catalog at {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Manifest serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
