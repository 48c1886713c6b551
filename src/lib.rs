//! # univrs-session
//!
//! SQL-backed session storage for HTTP session middleware.
//!
//! Sessions are JSON payloads keyed by session id, stored one row each with
//! an expiration timestamp:
//!
//! - **Cookie-driven expiration**: `cookie.expires` (or `cookie._expires`)
//!   when present, the configured lifetime otherwise
//! - **Background sweep**: expired rows are deleted on a fixed interval
//! - **Configurable schema**: table and column names are options
//! - **Lifecycle**: explicit ready signal and orderly close
//!
//! ## Backends
//!
//! - [`MySqlConnection`]: pooled MySQL/MariaDB (built from [`ConnectionOptions`])
//! - [`SqliteConnection`]: embedded SQLite, also used for tests
//! - [`MemorySessionStore`]: in-memory store without SQL
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use serde_json::json;
//! use univrs_session::{Connection, SessionStore, SqlSessionStore, SqliteConnection, StoreOptions};
//!
//! #[tokio::main]
//! async fn main() -> univrs_session::Result<()> {
//!     let connection: Arc<dyn Connection> = Arc::new(SqliteConnection::open("sessions.db").await?);
//!     let store = SqlSessionStore::new(StoreOptions::new(), Some(connection))?;
//!     store.on_ready().await?;
//!
//!     store.set("abc", &json!({"cookie": {"maxAge": 3600000}, "user": "ada"})).await?;
//!     if let Some(session) = store.get("abc").await? {
//!         println!("{}", session);
//!     }
//!
//!     store.close().await
//! }
//! ```
//!
//! ## Options
//!
//! Options use the camelCase names session middleware configs carry:
//!
//! ```rust,no_run
//! use serde_json::json;
//! use univrs_session::SqlSessionStore;
//!
//! #[tokio::main]
//! async fn main() -> univrs_session::Result<()> {
//!     let store = SqlSessionStore::from_value(
//!         json!({
//!             "host": "localhost",
//!             "user": "session_test",
//!             "password": "password",
//!             "database": "session_test",
//!             "checkExpirationInterval": 60000,
//!             "schema": {
//!                 "tableName": "custom_sessions",
//!                 "columnNames": {"session_id": "custom_session_id"}
//!             }
//!         }),
//!         None,
//!     )?;
//!     store.on_ready().await?;
//!     Ok(())
//! }
//! ```

pub mod callback;
pub mod config;
pub mod connection;
pub mod error;
pub mod expiry;
pub mod lifecycle;
pub mod memory;
pub mod mysql;
pub mod sql_store;
pub mod sqlite;
pub mod statement;
pub mod store;
pub mod sweeper;
pub mod watch;

// Re-export main types
pub use callback::{CallbackAdapter, Completion};
pub use config::{ColumnNames, ConnectionOptions, SchemaOptions, StoreOptions};
pub use connection::{Connection, QueryMetadata, QueryResult, Row};
pub use error::{Result, StoreError};
pub use lifecycle::LifecycleState;
pub use memory::MemorySessionStore;
pub use mysql::MySqlConnection;
pub use sql_store::SqlSessionStore;
pub use sqlite::SqliteConnection;
pub use statement::{Dialect, SqlValue, Statement};
pub use store::{ExportedSession, SessionRecord, SessionStats, SessionStore};
pub use watch::{EventStream, SessionEvent};

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::StoreOptions;
    pub use crate::error::{Result, StoreError};
    pub use crate::lifecycle::LifecycleState;
    pub use crate::memory::MemorySessionStore;
    pub use crate::sql_store::SqlSessionStore;
    pub use crate::sqlite::SqliteConnection;
    pub use crate::store::SessionStore;
    pub use crate::watch::{EventStream, SessionEvent};
}
