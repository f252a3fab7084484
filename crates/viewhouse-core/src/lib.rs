//! Viewhouse Core Types
//!
//! Shared vocabulary for the viewhouse engine: the event row model, the
//! declarative query signature, the materialized-view grain lattice, and the
//! runtime configuration knobs.
//!
//! Everything downstream (lake, catalog, builder, planner, executor,
//! validator) speaks in these types. The crate is deliberately free of I/O:
//! parsing a query or validating a signature never touches disk or an engine
//! session.

pub mod config;
pub mod error;
pub mod event;
pub mod grain;
pub mod plan;
pub mod query;
pub mod schema;

pub use config::RuntimeConfig;
pub use error::{QueryError, Result};
pub use event::{Event, EventType, format_day, parse_canonical_day};
pub use grain::Grain;
pub use plan::{ColumnExpr, MatchType, Plan, PlanSource, ProjectionItem};
pub use query::{
    AggFunc, Aggregate, CompareOp, OrderBy, OrderDir, Predicate, PredicateValue, QuerySpec,
    ScalarValue, SelectItem,
};
