//! Builder Error Types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum BuildError {
    /// A healthy view with a conflicting fingerprint already exists; the
    /// build aborts and the old view stays live.
    #[error("Schema drift: {name} conflicts with healthy view {existing}")]
    SchemaDrift { name: String, existing: String },

    #[error("Build of {name} exceeded its deadline of {ms} ms")]
    Timeout { name: String, ms: u64 },

    /// A post-build sanity check failed; staging is discarded.
    #[error("Sanity check failed for {name}: {reason}")]
    Sanity { name: String, reason: String },

    #[error(transparent)]
    Engine(#[from] viewhouse_engine::EngineError),

    #[error(transparent)]
    Catalog(#[from] viewhouse_catalog::CatalogError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Build worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
