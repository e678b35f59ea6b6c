//! SqliteStore - `PruneStore` and `JobStateStore` on a SQLite database.
//!
//! SQLite has no `WITH HOLD` cursors, so a cursor is a TEMP table filled
//! once from the candidate query. Rows are consumed from it in the same
//! transaction that deletes their targets: a rolled-back batch leaves the
//! cursor exactly where it was.
//!
//! The connection lives behind a `std::sync::Mutex`; every operation runs on
//! the blocking pool and holds the mutex for one whole transaction.

mod job_state;
mod prune;

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::types::{ToSql, ToSqlOutput, Value, ValueRef};
use rusqlite::{Connection, ErrorCode};

use crate::domain::SqlValue;
use crate::error::GarboError;

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;
    CREATE TABLE IF NOT EXISTS garbo_job_state (
        name TEXT PRIMARY KEY,
        json_data TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
";

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, GarboError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        Self::from_connection(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, GarboError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    pub fn from_connection(conn: Connection) -> Result<Self, GarboError> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    pub async fn with_connection<F, T>(&self, f: F) -> Result<T, GarboError>
    where
        F: FnOnce(&mut Connection) -> Result<T, GarboError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn.lock().map_err(|_| GarboError::Poisoned)?;
            f(&mut conn)
        })
        .await?
    }

    pub async fn execute_batch(&self, sql: impl Into<String>) -> Result<(), GarboError> {
        let sql = sql.into();
        self.with_connection(move |conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
        .await
    }

    /// Evaluate a single-value integer query, e.g. `SELECT count(*) FROM t`.
    pub async fn query_i64(&self, sql: impl Into<String>) -> Result<i64, GarboError> {
        let sql = sql.into();
        self.with_connection(move |conn| Ok(conn.query_row(&sql, [], |row| row.get(0))?))
            .await
    }
}

/// Constraint violations roll back one batch and are retried next run;
/// everything else is a storage failure.
fn classify(err: rusqlite::Error) -> GarboError {
    match &err {
        rusqlite::Error::SqliteFailure(e, msg) if e.code == ErrorCode::ConstraintViolation => {
            GarboError::Transient(msg.clone().unwrap_or_else(|| e.to_string()))
        }
        _ => GarboError::Storage(err),
    }
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            SqlValue::Null => ToSqlOutput::Owned(Value::Null),
            SqlValue::Integer(v) => ToSqlOutput::Owned(Value::Integer(*v)),
            SqlValue::Real(v) => ToSqlOutput::Owned(Value::Real(*v)),
            SqlValue::Text(v) => ToSqlOutput::Borrowed(ValueRef::Text(v.as_bytes())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_schema_with_foreign_keys_enabled() {
        let store = SqliteStore::open_in_memory().unwrap();
        let fk = store.query_i64("PRAGMA foreign_keys").await.unwrap();
        assert_eq!(fk, 1);
        let tables = store
            .query_i64("SELECT count(*) FROM sqlite_master WHERE name = 'garbo_job_state'")
            .await
            .unwrap();
        assert_eq!(tables, 1);
    }

    #[tokio::test]
    async fn opens_file_database_in_new_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db").join("garbo.db");
        let store = SqliteStore::open(&path).unwrap();
        store
            .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();
        assert!(path.exists());
    }

    #[test]
    fn classifies_constraint_violations_as_transient() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY); INSERT INTO t VALUES (1);")
            .unwrap();
        let err = conn.execute("INSERT INTO t VALUES (1)", []).unwrap_err();
        assert!(classify(err).is_transient());

        let err = conn.execute("SELECT * FROM missing", []).unwrap_err();
        assert!(matches!(classify(err), GarboError::Storage(_)));
    }
}
