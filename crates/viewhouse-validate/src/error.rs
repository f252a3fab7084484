//! Validator Error Types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ValidateError>;

#[derive(Debug, Error)]
pub enum ValidateError {
    #[error(transparent)]
    Engine(#[from] viewhouse_engine::EngineError),

    #[error(transparent)]
    Plan(#[from] viewhouse_planner::PlanError),

    #[error(transparent)]
    Catalog(#[from] viewhouse_catalog::CatalogError),

    #[error(transparent)]
    Lake(#[from] viewhouse_lake::LakeError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
