//! MySQL connection.
//!
//! Used for store-owned pools. Only the allow-listed keys of
//! [`ConnectionOptions`] reach the driver.

use async_trait::async_trait;
use serde_json::Value;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow};
use sqlx::{Column, Row as _, TypeInfo, ValueRef};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::ConnectionOptions;
use crate::connection::{Connection, QueryResult, Row};
use crate::error::Result;
use crate::statement::{Dialect, SqlValue, Statement, StatementKind};

/// Default pool size when `connectionLimit` is not given.
pub const DEFAULT_CONNECTION_LIMIT: u32 = 10;

/// MySQL implementation of [`Connection`] over an sqlx pool.
#[derive(Debug, Clone)]
pub struct MySqlConnection {
    pool: MySqlPool,
}

impl MySqlConnection {
    /// Wrap an existing pool.
    pub fn from_pool(pool: MySqlPool) -> Self {
        Self { pool }
    }

    /// Build a lazily connecting pool from store options.
    pub fn lazy(options: &ConnectionOptions, collation: &str) -> Result<Self> {
        let mut connect = MySqlConnectOptions::new();
        if let Some(host) = &options.host {
            connect = connect.host(host);
        }
        if let Some(port) = options.port {
            connect = connect.port(port);
        }
        if let Some(user) = &options.user {
            connect = connect.username(user);
        }
        if let Some(password) = &options.password {
            connect = connect.password(password);
        }
        if let Some(database) = &options.database {
            connect = connect.database(database);
        }
        if !collation.is_empty() {
            connect = connect.collation(collation);
        }

        let limit = options
            .connection_limit
            .unwrap_or(DEFAULT_CONNECTION_LIMIT)
            .max(1);
        let mut pool = MySqlPoolOptions::new().max_connections(limit);
        if let Some(max_idle) = options.max_idle {
            pool = pool.min_connections(max_idle.min(limit));
        }
        if let Some(idle_timeout) = options.idle_timeout {
            pool = pool.idle_timeout(Duration::from_millis(idle_timeout));
        }
        // The pool always queues acquisitions.
        if options.wait_for_connections.is_some() || options.queue_limit.is_some() {
            debug!("waitForConnections/queueLimit have no pool equivalent and are ignored");
        }

        info!(
            host = options.host.as_deref().unwrap_or("localhost"),
            database = options.database.as_deref().unwrap_or(""),
            max_connections = limit,
            "Creating MySQL connection pool"
        );
        Ok(Self {
            pool: pool.connect_lazy_with(connect),
        })
    }

    pub fn pool(&self) -> &MySqlPool {
        &self.pool
    }
}

#[async_trait]
impl Connection for MySqlConnection {
    fn dialect(&self) -> Dialect {
        Dialect::MySql
    }

    async fn query(&self, statement: &Statement) -> Result<QueryResult> {
        let (sql, values) = statement.render(Dialect::MySql)?;

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
        debug!("MySQL connection pool closed");
        Ok(())
    }
}

fn decode_row(row: &MySqlRow) -> Row {
    row.columns()
        .iter()
        .map(|column| {
            let index = column.ordinal();
            (column.name().to_string(), decode_value(row, index))
        })
        .collect()
}

fn decode_value(row: &MySqlRow, index: usize) -> Value {
    let type_name = match row.try_get_raw(index) {
        Ok(raw) if raw.is_null() => return Value::Null,
        Ok(raw) => raw.type_info().name().to_string(),
        Err(_) => return Value::Null,
    };

    if type_name.contains("INT") {
        if let Ok(n) = row.try_get::<i64, _>(index) {
            return Value::from(n);
        }
        if let Ok(n) = row.try_get::<u64, _>(index) {
            return Value::from(n);
        }
    }
    if type_name == "FLOAT" || type_name == "DOUBLE" {
        if let Ok(f) = row.try_get::<f64, _>(index) {
            return Value::from(f);
        }
    }
    if let Ok(s) = row.try_get::<String, _>(index) {
        return Value::String(s);
    }
    // Binary collations (utf8mb4_bin) come back as blobs.
    match row.try_get::<Vec<u8>, _>(index) {
        Ok(bytes) => Value::String(String::from_utf8_lossy(&bytes).into_owned()),
        Err(_) => Value::Null,
    }
}
