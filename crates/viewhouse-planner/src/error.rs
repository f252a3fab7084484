//! Planner Error Types
//!
//! The planner has exactly one failure mode that escapes it: a date literal
//! in the query that cannot be pruned against the lake. "No view can serve
//! this query" is not an error - the base scan always can.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, PlanError>;

#[derive(Debug, Error)]
pub enum PlanError {
    #[error(transparent)]
    Lake(#[from] viewhouse_lake::LakeError),
}
