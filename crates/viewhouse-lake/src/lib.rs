//! Viewhouse Lake
//!
//! Read-only view over the day-partitioned parquet lake:
//!
//! ```text
//! lake/
//!   events/
//!     day=2025-09-10/*.parquet
//!     day=2025-09-11/*.parquet
//!   manifest.json
//! ```
//!
//! The lake crate owns partition enumeration, canonical-name validation
//! (anything that is not `day=` + a ten-character ISO date is quarantined),
//! partition pruning from date predicates, and the day -> glob manifest.
//!
//! It never reads parquet itself; scans are delegated to the engine via the
//! glob patterns this crate hands out.

pub mod error;
pub mod manifest;
pub mod partitions;

pub use error::{LakeError, Result};
pub use manifest::LakeManifest;
pub use partitions::Lake;
