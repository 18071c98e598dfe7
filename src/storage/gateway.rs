//! Structured Store Gateway
//!
//! Read-only access to the relational dataset: schema introspection and
//! guarded query execution, backed by SQLite through an r2d2 pool of
//! read-only connections.
//!
//! Every call is blocking. Async callers run it on
//! `tokio::task::spawn_blocking`.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use retail_copilot_core::{ColumnSchema, Schema, TableSchema};
use rusqlite::types::ValueRef;
use rusqlite::{Connection, ErrorCode, OpenFlags};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::sql_guard::{check_read_only, GuardRejection};
use crate::utils::error::{AppError, AppResult};

/// Rows kept from a single result; the rest is dropped with a warning.
const MAX_ROWS: usize = 500;

/// SQLite VM instructions between deadline checks.
const PROGRESS_CHECK_OPS: i32 = 1000;

// ============================================================================
// Results and failures
// ============================================================================

/// Columns and rows of a successful query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRows {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

/// Structured reason a query produced no usable result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum QueryFailure {
    #[error("query exceeded the {millis} ms time limit")]
    Timeout { millis: u64 },

    #[error("SQL error: {message}")]
    Syntax { message: String },

    #[error("query returned no rows")]
    Empty,

    #[error("query rejected: {reason}")]
    MutationRejected { reason: String },
}

/// Gateway failure: either the store is unusable or the query failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum GatewayError {
    /// The database cannot be reached. Fatal to a run.
    #[error("structured store unavailable: {0}")]
    Unavailable(String),

    /// The query itself failed. Recoverable through SQL repair.
    #[error(transparent)]
    Query(#[from] QueryFailure),
}

impl From<GuardRejection> for QueryFailure {
    fn from(rejection: GuardRejection) -> Self {
        match rejection {
            GuardRejection::Empty => QueryFailure::Syntax {
                message: rejection.to_string(),
            },
            other => QueryFailure::MutationRejected {
                reason: other.to_string(),
            },
        }
    }
}

// ============================================================================
// Gateway contract
// ============================================================================

/// Schema introspection and read-only query execution.
pub trait StructuredStoreGateway: Send + Sync {
    /// Tables and views available to queries.
    fn describe_schema(&self) -> Result<Schema, GatewayError>;

    /// Run one read-only query with a hard time limit.
    fn execute(&self, query: &str, timeout: Duration) -> Result<QueryRows, GatewayError>;
}

// ============================================================================
// SQLite implementation
// ============================================================================

/// Type alias for the connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// SQLite-backed gateway over a read-only database file.
#[derive(Clone)]
pub struct SqliteGateway {
    pool: DbPool,
    path: PathBuf,
    schema: Schema,
}

impl SqliteGateway {
    /// Open `path` read-only with a pool of `max_connections` connections.
    ///
    /// Each connection gets a temporary `order_items` view over
    /// `"Order Details"` when that table exists, so generated SQL may use
    /// either name.
    pub fn open(path: impl AsRef<Path>, max_connections: u32) -> AppResult<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.is_file() {
            return Err(AppError::not_found(format!("database {}", path.display())));
        }

        let manager = SqliteConnectionManager::file(&path)
            .with_flags(
                OpenFlags::SQLITE_OPEN_READ_ONLY
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX
                    | OpenFlags::SQLITE_OPEN_URI,
            )
            .with_init(|conn| install_compat_views(conn));
        let pool = Pool::builder()
            .max_size(max_connections.max(1))
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))?;

        let schema = {
            let conn = pool.get()?;
            read_schema(&conn)?
        };

        tracing::info!(
            path = %path.display(),
            tables = schema.tables.len(),
            "opened structured store"
        );

        Ok(Self { pool, path, schema })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn run_query(conn: &Connection, sql: &str) -> Result<QueryRows, rusqlite::Error> {
        let mut stmt = conn.prepare(sql)?;
        if !stmt.readonly() {
            return Err(rusqlite::Error::InvalidQuery);
        }
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
        let width = columns.len();

        let mut rows = Vec::new();
        let mut cursor = stmt.query([])?;
        while let Some(row) = cursor.next()? {
            if rows.len() == MAX_ROWS {
                tracing::warn!(max_rows = MAX_ROWS, "query result truncated");
                break;
            }
            let mut values = Vec::with_capacity(width);
            for idx in 0..width {
                values.push(value_to_json(row.get_ref(idx)?));
            }
            rows.push(values);
        }

        Ok(QueryRows { columns, rows })
    }
}

impl StructuredStoreGateway for SqliteGateway {
    fn describe_schema(&self) -> Result<Schema, GatewayError> {
        Ok(self.schema.clone())
    }

    fn execute(&self, query: &str, timeout: Duration) -> Result<QueryRows, GatewayError> {
        let sql = check_read_only(query).map_err(QueryFailure::from)?;

        let conn = self
            .pool
            .get()
            .map_err(|e| GatewayError::Unavailable(e.to_string()))?;

        let deadline = Instant::now() + timeout;
        conn.progress_handler(PROGRESS_CHECK_OPS, Some(move || Instant::now() > deadline));
        let outcome = Self::run_query(&conn, &sql);
        conn.progress_handler(0, None::<fn() -> bool>);

        let rows = outcome.map_err(|err| classify_error(err, timeout))?;

        let all_null = rows
            .rows
            .iter()
            .all(|row| row.iter().all(Value::is_null));
        if rows.rows.is_empty() || all_null {
            return Err(QueryFailure::Empty.into());
        }

        tracing::debug!(
            columns = rows.columns.len(),
            rows = rows.rows.len(),
            "query executed"
        );
        Ok(rows)
    }
}

fn classify_error(err: rusqlite::Error, timeout: Duration) -> GatewayError {
    match &err {
        rusqlite::Error::SqliteFailure(e, _) if e.code == ErrorCode::OperationInterrupted => {
            QueryFailure::Timeout {
                millis: timeout.as_millis() as u64,
            }
            .into()
        }
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(
                e.code,
                ErrorCode::CannotOpen | ErrorCode::NotADatabase | ErrorCode::DatabaseCorrupt
            ) =>
        {
            GatewayError::Unavailable(err.to_string())
        }
        rusqlite::Error::InvalidQuery => QueryFailure::MutationRejected {
            reason: "statement would modify the database".to_string(),
        }
        .into(),
        _ => QueryFailure::Syntax {
            message: err.to_string(),
        }
        .into(),
    }
}

fn value_to_json(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(format!("<blob {} bytes>", bytes.len())),
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn install_compat_views(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    let has_details: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM main.sqlite_master WHERE type = 'table' AND name = 'Order Details')",
        [],
        |row| row.get(0),
    )?;
    let has_alias: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM main.sqlite_master WHERE lower(name) = 'order_items')",
        [],
        |row| row.get(0),
    )?;
    if has_details && !has_alias {
        conn.execute_batch(
            "CREATE TEMP VIEW IF NOT EXISTS order_items AS SELECT * FROM main.\"Order Details\"",
        )?;
    }
    Ok(())
}

fn read_schema(conn: &Connection) -> AppResult<Schema> {
    let mut names: Vec<String> = Vec::new();
    for master in ["main.sqlite_master", "temp.sqlite_master"] {
        let mut stmt = conn.prepare(&format!(
            "SELECT name FROM {} WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%' ORDER BY name",
            master
        ))?;
        let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
        for name in rows {
            names.push(name?);
        }
    }

    let mut tables = Vec::with_capacity(names.len());
    for name in names {
        let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(&name)))?;
        let columns = stmt
            .query_map([], |row| {
                Ok(ColumnSchema {
                    name: row.get(1)?,
                    decl_type: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        tables.push(TableSchema { name, columns });
    }

    Ok(Schema { tables })
}
