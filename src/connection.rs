//! Connection provider and query executor.
//!
//! A [`Connection`] runs a [`Statement`] and hands back rows in one shape
//! regardless of the driver underneath. The store either uses a connection
//! injected by the caller or builds its own pool from [`ConnectionOptions`].

use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

use crate::config::ConnectionOptions;
use crate::error::Result;
use crate::mysql::MySqlConnection;
use crate::statement::{Dialect, Statement};

/// One result row, keyed by column name (or alias).
pub type Row = BTreeMap<String, Value>;

/// Metadata reported alongside the rows.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryMetadata {
    /// Rows changed by an `INSERT`/`UPDATE`/`DELETE`; zero for queries.
    pub rows_affected: u64,
    /// Column names of the result set, empty when no rows came back.
    pub columns: Vec<String>,
}

/// Normalized `(rows, metadata)` pair.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryResult {
    pub rows: Vec<Row>,
    pub metadata: QueryMetadata,
}

impl QueryResult {
    /// Result of a statement that returned rows.
    pub fn from_rows(rows: Vec<Row>) -> Self {
        let columns = rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();
        Self {
            rows,
            metadata: QueryMetadata {
                rows_affected: 0,
                columns,
            },
        }
    }

    /// Result of a statement that only changed rows.
    pub fn affected(rows_affected: u64) -> Self {
        Self {
            rows: Vec::new(),
            metadata: QueryMetadata {
                rows_affected,
                columns: Vec::new(),
            },
        }
    }

    pub fn first(&self) -> Option<&Row> {
        self.rows.first()
    }

    pub fn rows_affected(&self) -> u64 {
        self.metadata.rows_affected
    }

    /// Integer column of the first row, or 0 when there is no row.
    pub fn scalar(&self, column: &str) -> u64 {
        self.first()
            .and_then(|row| row.get(column))
            .and_then(value_as_u64)
            .unwrap_or(0)
    }
}

/// Integer value of a column, tolerating drivers that report numbers as text.
pub fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

fn value_as_u64(value: &Value) -> Option<u64> {
    value_as_i64(value).and_then(|n| u64::try_from(n).ok())
}

/// A query-capable handle to the backing database.
#[async_trait]
pub trait Connection: Send + Sync {
    /// SQL flavour used to render statements.
    fn dialect(&self) -> Dialect;

    /// Execute a statement. Errors are returned unchanged; nothing is retried.
    async fn query(&self, statement: &Statement) -> Result<QueryResult>;

    /// Terminate the connection (or pool).
    async fn end(&self) -> Result<()>;
}

/// Build a store-owned connection pool.
///
/// The pool connects lazily, so this never blocks; an unreachable server
/// surfaces on the first statement.
pub fn connect(options: &ConnectionOptions, collation: &str) -> Result<Arc<dyn Connection>> {
    let connection = MySqlConnection::lazy(options, collation)?;
    Ok(Arc::new(connection))
}
