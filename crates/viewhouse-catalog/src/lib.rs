//! Viewhouse Catalog
//!
//! The authoritative in-memory index of materialized views - the "brain"
//! that knows what pre-aggregated data exists, where its parquet files live,
//! and whether each view is currently trustworthy.
//!
//! ## Components
//!
//! ### ViewDescriptor
//! Immutable metadata for one MV: grain, dimensions, build filters, measure
//! rules, schema fingerprint, backing files, row/byte counts, source
//! watermark, and health. Persisted as `mvs/<name>/manifest.json`.
//!
//! ### Registry
//! Snapshot-swap registry over descriptors. Readers (the planner) grab an
//! `Arc` snapshot and never block; writers (builder, validator) take a brief
//! exclusive section only to publish a new snapshot. A reader that planned
//! against an old snapshot can finish its queries against the old ready
//! directory - retired files outlive the swap.
//!
//! ### Health state machine
//! ```text
//! MISSING -> BUILDING -> HEALTHY -> STALE -> BUILDING -> ...
//!                  \         \         \
//!                   +---------+---------+--> QUARANTINED --> BUILDING
//! ```
//! A QUARANTINED view is invisible to the planner until a rebuild succeeds.

pub mod descriptor;
pub mod error;
pub mod registry;

pub use descriptor::{Health, MeasureExpr, ViewDescriptor, compute_fingerprint};
pub use error::{CatalogError, Result};
pub use registry::{Registry, RegistrySnapshot};
