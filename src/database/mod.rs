//! Database layer — statement execution behind the table API.
//!
//! - [`query`] builds parameterized statements from a [`CrudOperation`].
//! - [`Executor`] is the seam to the database: run one statement, get rows of
//!   named string columns or a write count back.
//! - [`SqliteExecutor`] is the production executor: one connection opened at
//!   startup, guarded by a mutex so concurrent requests never interleave on it,
//!   with every statement wrapped in its own transaction.
//! - [`execute`] ties them together for one request and maps the result onto a
//!   [`CrudOutcome`].
//!
//! Executors are synchronous; [`execute`] runs them on Tokio's blocking pool.

use std::path::Path;
use std::sync::{Arc, Mutex};

use rusqlite::types::ValueRef;
use rusqlite::{Connection, params_from_iter};
use thiserror::Error;
use tracing::debug;

use crate::http::StatusCode;

pub mod query;

pub use query::{CrudOperation, Params, QueryError, Statement, StatementKind};

/// One result row: column name and value, in the order the database returned
/// them. SQL `NULL` is `None`.
pub type Row = Vec<(String, Option<String>)>;

/// Errors raised by an [`Executor`] or while handing work to it.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("Database unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Statement(#[from] rusqlite::Error),

    #[error("Database worker failed: {0}")]
    Worker(String),
}

impl DbError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unavailable(_) => StatusCode::ServiceUnavailable,
            Self::Statement(_) | Self::Worker(_) => StatusCode::InternalServerError,
        }
    }
}

/// What running a statement produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Execution {
    Rows(Vec<Row>),
    Written { affected: usize, last_insert_id: i64 },
}

/// Runs parameterized statements.
///
/// Each call is a complete unit of work: it commits on success and leaves no
/// trace on failure.
pub trait Executor: Send + Sync {
    fn run(&self, statement: &Statement) -> Result<Execution, DbError>;
}

/// SQLite-backed [`Executor`].
#[derive(Debug)]
pub struct SqliteExecutor {
    conn: Mutex<Connection>,
}

impl SqliteExecutor {
    /// Opens (or creates) the database file at `path`. `":memory:"` opens a
    /// private in-memory database.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Unavailable`] when the file cannot be opened.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let path = path.as_ref();
        let conn = Connection::open(path)
            .map_err(|e| DbError::Unavailable(format!("{}: {e}", path.display())))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Opens a private in-memory database.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory().map_err(|e| DbError::Unavailable(e.to_string()))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Runs raw SQL (schema setup, fixtures). Not reachable from the API.
    pub fn execute_batch(&self, sql: &str) -> Result<(), DbError> {
        let conn = self.lock()?;
        conn.execute_batch(sql)?;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, DbError> {
        self.conn
            .lock()
            .map_err(|_| DbError::Unavailable("connection lock poisoned".to_owned()))
    }
}

impl Executor for SqliteExecutor {
    fn run(&self, statement: &Statement) -> Result<Execution, DbError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;

        let execution = match statement.kind {
            StatementKind::Query => {
                let mut stmt = tx.prepare(&statement.sql)?;
                let columns: Vec<String> =
                    stmt.column_names().iter().map(|c| c.to_string()).collect();
                let mut rows = stmt.query(params_from_iter(statement.params.iter()))?;

                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let mut values = Row::with_capacity(columns.len());
                    for (idx, column) in columns.iter().enumerate() {
                        values.push((column.clone(), value_to_string(row.get_ref(idx)?)));
                    }
                    out.push(values);
                }
                Execution::Rows(out)
            }
            StatementKind::Write => {
                let affected = tx.execute(&statement.sql, params_from_iter(statement.params.iter()))?;
                Execution::Written {
                    affected,
                    last_insert_id: tx.last_insert_rowid(),
                }
            }
        };

        tx.commit()?;
        Ok(execution)
    }
}

fn value_to_string(value: ValueRef<'_>) -> Option<String> {
    match value {
        ValueRef::Null => None,
        ValueRef::Integer(i) => Some(i.to_string()),
        ValueRef::Real(f) => Some(f.to_string()),
        ValueRef::Text(t) | ValueRef::Blob(t) => Some(String::from_utf8_lossy(t).into_owned()),
    }
}

/// Result of one CRUD call, as seen by the API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrudOutcome {
    Rows(Vec<Row>),
    Inserted(i64),
    Updated(String),
    Deleted(String),
    /// Update or delete matched no row.
    NotFound,
}

/// Why a CRUD call produced no outcome.
#[derive(Debug, Error)]
pub enum CrudError {
    #[error(transparent)]
    Query(#[from] QueryError),

    #[error(transparent)]
    Db(#[from] DbError),
}

impl CrudError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Query(e) => e.status(),
            Self::Db(e) => e.status(),
        }
    }
}

/// Builds the statement for `operation` and runs it on `executor`.
///
/// Builder rejections return before the executor is touched. Zero rows
/// affected by an update or delete is [`CrudOutcome::NotFound`], not an error.
pub async fn execute(
    executor: Arc<dyn Executor>,
    operation: CrudOperation,
) -> Result<CrudOutcome, CrudError> {
    let statement = query::build(&operation)?;
    debug!(op = operation.name(), sql = %statement.sql, "running statement");

    let execution = tokio::task::spawn_blocking(move || executor.run(&statement))
        .await
        .map_err(|e| DbError::Worker(e.to_string()))??;

    let outcome = match (operation, execution) {
        (CrudOperation::Select { .. }, Execution::Rows(rows)) => CrudOutcome::Rows(rows),
        (CrudOperation::Insert { .. }, Execution::Written { last_insert_id, .. }) => {
            CrudOutcome::Inserted(last_insert_id)
        }
        (_, Execution::Written { affected: 0, .. }) => CrudOutcome::NotFound,
        (op @ CrudOperation::Update { .. }, Execution::Written { .. }) => {
            CrudOutcome::Updated(op.id().unwrap_or_default().to_owned())
        }
        (op @ CrudOperation::Delete { .. }, Execution::Written { .. }) => {
            CrudOutcome::Deleted(op.id().unwrap_or_default().to_owned())
        }
        (op, execution) => {
            return Err(DbError::Worker(format!(
                "{} returned unexpected result {execution:?}",
                op.name()
            ))
            .into());
        }
    };
    Ok(outcome)
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;

    /// Executor that records every statement and replays a fixed result.
    #[derive(Debug)]
    pub(crate) struct RecordingExecutor {
        pub(crate) seen: Mutex<Vec<Statement>>,
        reply: Execution,
    }

    impl RecordingExecutor {
        pub(crate) fn new(reply: Execution) -> Arc<Self> {
            Arc::new(Self {
                seen: Mutex::new(Vec::new()),
                reply,
            })
        }

        pub(crate) fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    impl Executor for RecordingExecutor {
        fn run(&self, statement: &Statement) -> Result<Execution, DbError> {
            self.seen.lock().unwrap().push(statement.clone());
            Ok(self.reply.clone())
        }
    }
}
