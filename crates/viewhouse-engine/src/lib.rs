//! Viewhouse Engine Layer
//!
//! Thin ownership and SQL-generation layer over DuckDB, the columnar engine
//! that actually scans parquet. Three rules hold everywhere:
//!
//! 1. **One session per thread.** An [`EngineSession`] wraps one DuckDB
//!    connection and is never shared or sent across threads; workers open
//!    their own from a [`SessionFactory`]. The shared-handle segfaults that
//!    motivated this rule are not worth relitigating.
//! 2. **Sessions are uniform.** Every session gets the same pragmas
//!    (thread count, memory limit, UTC) so results never depend on which
//!    worker ran the plan.
//! 3. **SQL is generated, never concatenated ad hoc.** The [`sql`] module is
//!    the only place that renders literals, predicates, measures and
//!    reaggregation combiners.

pub mod error;
pub mod session;
pub mod sql;
pub mod value;

pub use error::{EngineError, Result};
pub use session::{EngineSession, SessionFactory};
pub use value::Scalar;
