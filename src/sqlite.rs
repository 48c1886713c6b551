//! SQLite connection.
//!
//! Embedded backend for single-process deployments and tests:
//! - WAL mode for concurrent readers
//! - in-memory databases pinned to a single connection

use async_trait::async_trait;
use serde_json::Value;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

use crate::connection::{Connection, QueryResult, Row};
use crate::error::{Result, StoreError};
use crate::statement::{Dialect, SqlValue, Statement, StatementKind};

/// SQLite implementation of [`Connection`].
#[derive(Debug, Clone)]
pub struct SqliteConnection {
    pool: SqlitePool,
}

impl SqliteConnection {
    /// Open or create a database file at the given path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Opening SQLite session database at {:?}", path);

        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| StoreError::Connection(e.to_string()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Create an in-memory database (for testing).
    ///
    /// Every connection to `:memory:` is a separate database, so the pool
    /// holds exactly one connection and never recycles it.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let pool = SqlitePoolOptions::new()
            .min_connections(1)
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Wrap an existing pool.
    pub fn from_pool(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn query(&self, statement: &Statement) -> Result<QueryResult> {
        let (sql, values) = statement.render(Dialect::Sqlite)?;

        let mut query = sqlx::query(&sql);
        for value in values {
            query = match value {
                SqlValue::Integer(n) => query.bind(n),
                SqlValue::Text(s) => query.bind(s),
            };
        }

        match statement.kind() {
            StatementKind::Query => {
                let rows = query.fetch_all(&self.pool).await?;
                Ok(QueryResult::from_rows(rows.iter().map(decode_row).collect()))
            }
            StatementKind::Execute => {
                let done = query.execute(&self.pool).await?;
                Ok(QueryResult::affected(done.rows_affected()))
            }
        }
    }

    async fn end(&self) -> Result<()> {
        self.pool.close().await;
        debug!("SQLite connection pool closed");
        Ok(())
    }
}

fn decode_row(row: &SqliteRow) -> Row {
    row.columns()
        .iter()
        .map(|column| {
            let index = column.ordinal();
            (column.name().to_string(), decode_value(row, index))
        })
        .collect()
}

fn decode_value(row: &SqliteRow, index: usize) -> Value {
    let type_name = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return Value::Null,
    };

    match type_name.as_str() {
        "INTEGER" => row.try_get::<i64, _>(index).map(Value::from).unwrap_or(Value::Null),
        "REAL" => row.try_get::<f64, _>(index).map(Value::from).unwrap_or(Value::Null),
        "BLOB" => row
            .try_get::<Vec<u8>, _>(index)
            .map(|bytes| Value::String(String::from_utf8_lossy(&bytes).into_owned()))
            .unwrap_or(Value::Null),
        _ => row.try_get::<String, _>(index).map(Value::String).unwrap_or(Value::Null),
    }
}
