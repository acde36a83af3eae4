//! SQLite connection wrapper.
//!
//! A single `rusqlite::Connection` behind a blocking Mutex. Statement
//! execution is the only suspension point in the system; the compilers are
//! pure and run outside the lock.

use std::sync::{Arc, Mutex};

use rusqlite::{Connection, OpenFlags};
use serde_json::Value;
use tracing::{debug, warn};
use ulid::Ulid;

use doclite_core::{DocError, Result, StoreConfig};

/// Convert a JSON parameter to a SQLite value for binding.
///
/// Booleans bind as integers 1/0, JSON1's own scalar representation of
/// true/false. Arrays and objects are serialized callers' responsibility;
/// any reaching here bind as their JSON text.
pub(crate) fn value_to_sql(v: &Value) -> rusqlite::types::Value {
    match v {
        Value::Null => rusqlite::types::Value::Null,
        Value::Bool(b) => rusqlite::types::Value::Integer(if *b { 1 } else { 0 }),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                rusqlite::types::Value::Integer(i)
            } else {
                rusqlite::types::Value::Real(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => rusqlite::types::Value::Text(s.clone()),
        other => rusqlite::types::Value::Text(other.to_string()),
    }
}

fn db_err(e: rusqlite::Error) -> DocError {
    DocError::database(e.to_string())
}

/// Shared connection handle.
#[derive(Debug)]
pub(crate) struct Db {
    conn: Mutex<Connection>,
    log_sql: bool,
}

impl Db {
    /// Open or create a database file with the configured pragmas.
    pub fn open(config: &StoreConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open_with_flags(
            &config.path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .map_err(|e| DocError::database(format!("Failed to open database: {}", e)))?;

        Self::init(conn, config)
    }

    /// Open an in-memory database (for testing).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()
            .map_err(|e| DocError::database(format!("Failed to open in-memory database: {}", e)))?;

        Self::init(conn, &StoreConfig::default())
    }

    fn init(conn: Connection, config: &StoreConfig) -> Result<Self> {
        conn.execute_batch(&format!(
            "PRAGMA journal_mode = {};\n\
             PRAGMA synchronous = NORMAL;\n\
             PRAGMA busy_timeout = {};\n\
             PRAGMA cache_size = {};\n\
             PRAGMA temp_store = MEMORY;",
            config.journal_mode.as_sql(),
            config.busy_timeout_ms,
            config.cache_size,
        ))
        .map_err(|e| DocError::database(format!("Failed to configure connection: {}", e)))?;

        Ok(Self {
            conn: Mutex::new(conn),
            log_sql: config.log_sql,
        })
    }

    /// Execute a blocking operation on the connection.
    pub fn with_conn<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&Connection) -> Result<R>,
    {
        let conn = self.conn.lock().map_err(|e| DocError::database(e.to_string()))?;
        f(&conn)
    }

    /// Execute a parameterized statement, returning the affected row count.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<usize> {
        if self.log_sql {
            debug!(sql, ?params, "execute");
        }
        self.with_conn(|conn| {
            conn.execute(sql, rusqlite::params_from_iter(params.iter().map(value_to_sql)))
                .map_err(db_err)
        })
    }

    /// Execute a batch of statements without parameters.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        if self.log_sql {
            debug!(sql, "execute_batch");
        }
        self.with_conn(|conn| conn.execute_batch(sql).map_err(db_err))
    }

    /// Run a parameterized query, mapping each row.
    pub fn query_rows<T, F>(&self, sql: &str, params: &[Value], f: F) -> Result<Vec<T>>
    where
        F: FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>,
    {
        if self.log_sql {
            debug!(sql, ?params, "query");
        }
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(sql).map_err(db_err)?;
            let rows = stmt
                .query_map(
                    rusqlite::params_from_iter(params.iter().map(value_to_sql)),
                    f,
                )
                .map_err(db_err)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(db_err)?;
            Ok(rows)
        })
    }

    /// Run a single-value query, e.g. a COUNT.
    pub fn query_scalar(&self, sql: &str, params: &[Value]) -> Result<i64> {
        self.with_conn(|conn| {
            conn.query_row(
                sql,
                rusqlite::params_from_iter(params.iter().map(value_to_sql)),
                |row| row.get(0),
            )
            .map_err(db_err)
        })
    }
}

/// A named savepoint on the shared connection.
///
/// Transactions nest through savepoints: `begin` opens one under a fresh
/// opaque name, `commit` releases it, `rollback` unwinds to it. The caller
/// always resolves the savepoint explicitly and re-raises the originating
/// error on the rollback path.
pub(crate) struct Savepoint {
    name: String,
    db: Arc<Db>,
}

impl Savepoint {
    pub fn begin(db: Arc<Db>) -> Result<Self> {
        let name = format!("sp_{}", Ulid::new());
        db.execute_batch(&format!("SAVEPOINT \"{}\"", name))?;
        Ok(Self { name, db })
    }

    pub fn commit(self) -> Result<()> {
        self.db.execute_batch(&format!("RELEASE \"{}\"", self.name))
    }

    pub fn rollback(self) {
        let sql = format!("ROLLBACK TO \"{n}\"; RELEASE \"{n}\"", n = self.name);
        if let Err(e) = self.db.execute_batch(&sql) {
            warn!("Failed to roll back savepoint {}: {}", self.name, e);
        }
    }
}
