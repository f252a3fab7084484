//! Engine Sessions
//!
//! An [`EngineSession`] owns one in-memory DuckDB connection reading parquet
//! directly via `read_parquet`. Sessions are configured identically by the
//! [`SessionFactory`] and are strictly per-thread: the executor and builder
//! open a session inside each worker closure and drop it there.

use duckdb::Connection;
use tracing::debug;

use viewhouse_core::RuntimeConfig;

use crate::error::Result;
use crate::value::Scalar;

/// Builds identically-configured engine sessions.
#[derive(Debug, Clone)]
pub struct SessionFactory {
    threads: usize,
    memory_limit: String,
}

impl SessionFactory {
    pub fn new(config: &RuntimeConfig) -> SessionFactory {
        // The configured limit bounds result buffering; the engine itself
        // still needs working memory, so the pragma never goes below 128MB.
        let mb = (config.memory_limit_bytes / (1024 * 1024)).max(128);
        SessionFactory {
            threads: config.threads,
            memory_limit: format!("{mb}MB"),
        }
    }

    /// Open a fresh session. Cheap enough to do per plan; DuckDB's object
    /// cache keeps parquet metadata warm across connections.
    pub fn open(&self) -> Result<EngineSession> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(&format!(
            "PRAGMA threads={};\nSET memory_limit='{}';\nPRAGMA enable_object_cache=true;",
            self.threads, self.memory_limit
        ))?;
        // Explicit UTC needs the ICU extension; without it the engine has no
        // session time zone at all, which is the same thing for our purposes.
        if let Err(e) = conn.execute_batch("SET TimeZone='UTC';") {
            debug!(error = %e, "TimeZone pragma unavailable, continuing");
        }
        Ok(EngineSession { conn })
    }
}

/// One exclusively-owned DuckDB connection.
pub struct EngineSession {
    conn: Connection,
}

impl EngineSession {
    /// Run statements with no result set (COPY, CREATE, pragmas).
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    /// Fetch a full result set as scalar rows. `columns` is the projection
    /// width the caller expects; the generated SQL fixed it already.
    pub fn query_rows(&self, sql: &str, columns: usize) -> Result<Vec<Vec<Scalar>>> {
        self.query_rows_limited(sql, columns, None).map(|(rows, _)| rows)
    }

    /// Fetch rows under an optional byte budget; returns the rows and their
    /// estimated in-memory size. Crossing the budget aborts the fetch with
    /// [`crate::EngineError::BudgetExceeded`] instead of buffering on.
    pub fn query_rows_limited(
        &self,
        sql: &str,
        columns: usize,
        byte_budget: Option<u64>,
    ) -> Result<(Vec<Vec<Scalar>>, u64)> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        let mut bytes: u64 = 0;
        while let Some(row) = rows.next()? {
            let mut record = Vec::with_capacity(columns);
            for i in 0..columns {
                let value: duckdb::types::Value = row.get(i)?;
                let scalar = Scalar::from_engine(value);
                bytes += estimated_size(&scalar);
                record.push(scalar);
            }
            if let Some(budget) = byte_budget {
                if bytes > budget {
                    return Err(crate::EngineError::BudgetExceeded { budget });
                }
            }
            out.push(record);
        }
        Ok((out, bytes))
    }

    /// Fetch a single count/aggregate as i64.
    pub fn query_i64(&self, sql: &str) -> Result<i64> {
        let v = self.conn.query_row(sql, [], |row| row.get::<_, i64>(0))?;
        Ok(v)
    }

    /// Fetch a single nullable numeric as f64.
    pub fn query_f64_opt(&self, sql: &str) -> Result<Option<f64>> {
        let v = self
            .conn
            .query_row(sql, [], |row| row.get::<_, Option<f64>>(0))?;
        Ok(v)
    }
}

/// Rough per-value buffering cost, used only for budget accounting.
fn estimated_size(scalar: &Scalar) -> u64 {
    match scalar {
        Scalar::Null => 1,
        Scalar::Int(_) | Scalar::Float(_) => 8,
        Scalar::Text(s) => s.len() as u64 + 2,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn factory() -> SessionFactory {
        SessionFactory::new(&RuntimeConfig {
            threads: 2,
            ..Default::default()
        })
    }

    #[test]
    fn test_open_and_query() {
        let session = factory().open().unwrap();
        session
            .execute_batch("CREATE TABLE t AS SELECT * FROM (VALUES (1, 'a'), (2, 'b')) v(n, s);")
            .unwrap();

        let rows = session
            .query_rows("SELECT n, s FROM t ORDER BY n", 2)
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0][0], Scalar::Int(1));
        assert_eq!(rows[1][1], Scalar::Text("b".to_string()));
    }

    #[test]
    fn test_aggregate_fetches() {
        let session = factory().open().unwrap();
        session
            .execute_batch("CREATE TABLE t AS SELECT * FROM range(10) r(n);")
            .unwrap();
        assert_eq!(session.query_i64("SELECT COUNT(*) FROM t").unwrap(), 10);
        assert_eq!(
            session
                .query_f64_opt("SELECT SUM(n) FROM t WHERE n > 100")
                .unwrap(),
            None
        );
    }

    #[test]
    fn test_byte_budget_aborts_fetch() {
        let session = factory().open().unwrap();
        session
            .execute_batch("CREATE TABLE t AS SELECT repeat('x', 100) AS s FROM range(100);")
            .unwrap();
        let err = session
            .query_rows_limited("SELECT s FROM t", 1, Some(500))
            .unwrap_err();
        assert!(matches!(
            err,
            crate::EngineError::BudgetExceeded { budget: 500 }
        ));
    }

    #[test]
    fn test_null_surfaces_as_scalar_null() {
        let session = factory().open().unwrap();
        let rows = session
            .query_rows("SELECT NULL, 1.5", 2)
            .unwrap();
        assert_eq!(rows[0][0], Scalar::Null);
        assert_eq!(rows[0][1], Scalar::Float(1.5));
    }
}
