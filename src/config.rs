//! Store options and schema resolution.
//!
//! Options are merged over defaults at three levels (top-level flags, the
//! `schema` block and the `schema.columnNames` block). Every struct below is
//! `#[serde(default)]`, so a partial document only overrides what it names.
//!
//! Column-name overrides are restricted to the three logical columns of a
//! session record; any other key is a [`StoreError::Configuration`].
//! Connection parameters live at the top level next to the store flags, and
//! unknown top-level keys are dropped rather than forwarded.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

use crate::error::{Result, StoreError};
use crate::expiry::MAX_EXPIRY_MILLIS;

/// Default period between expiration sweeps (15 minutes).
pub const DEFAULT_CHECK_EXPIRATION_INTERVAL: Duration = Duration::from_millis(900_000);

/// Default session lifetime when the payload carries no cookie expiration (1 day).
pub const DEFAULT_EXPIRATION: Duration = Duration::from_millis(86_400_000);

/// Default table name.
pub const DEFAULT_TABLE_NAME: &str = "sessions";

/// Default MySQL collation for the session table and connection.
pub const DEFAULT_CHARSET: &str = "utf8mb4_bin";

/// Logical columns whose physical names may be overridden.
pub const CONFIGURABLE_COLUMNS: [&str; 3] = ["session_id", "expires", "data"];

/// Fully resolved store options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoreOptions {
    /// Periodically delete expired rows.
    pub clear_expired: bool,
    /// Period of the expiration sweep.
    #[serde(with = "millis")]
    pub check_expiration_interval: Duration,
    /// Lifetime given to sessions whose payload has no cookie expiration.
    #[serde(with = "millis")]
    pub expiration: Duration,
    /// Create the session table (if missing) during bring-up.
    pub create_database_table: bool,
    /// Terminate the connection when the store is closed.
    ///
    /// Left unset, this resolves to `true` only for connections the store built itself.
    pub end_connection_on_close: Option<bool>,
    /// Turn `touch` into a no-op.
    pub disable_touch: bool,
    /// MySQL collation used for the table and the connection.
    pub charset: String,
    /// Table and column names.
    pub schema: SchemaOptions,
    /// Parameters for a store-owned connection pool.
    #[serde(flatten)]
    pub connection: ConnectionOptions,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            clear_expired: true,
            check_expiration_interval: DEFAULT_CHECK_EXPIRATION_INTERVAL,
            expiration: DEFAULT_EXPIRATION,
            create_database_table: true,
            end_connection_on_close: None,
            disable_touch: false,
            charset: DEFAULT_CHARSET.to_string(),
            schema: SchemaOptions::default(),
            connection: ConnectionOptions::default(),
        }
    }
}

impl StoreOptions {
    /// Default options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse options from a JSON document, merging it over the defaults.
    ///
    /// A `null` document yields the defaults.
    pub fn from_value(value: serde_json::Value) -> Result<Self> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value).map_err(|e| StoreError::Configuration(e.to_string()))
    }

    /// Parse options from a TOML document, merging it over the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| StoreError::Configuration(e.to_string()))
    }

    /// Fill computed defaults and validate.
    ///
    /// `connection_injected` is whether the caller supplied its own
    /// connection; only store-built connections are closed by default.
    pub fn resolve(mut self, connection_injected: bool) -> Result<Self> {
        if self.end_connection_on_close.is_none() {
            self.end_connection_on_close = Some(!connection_injected);
        }
        self.validate()?;
        Ok(self)
    }

    /// Check invariants that deserialization alone does not enforce.
    pub fn validate(&self) -> Result<()> {
        if self.schema.table_name.trim().is_empty() {
            return Err(StoreError::Configuration(
                "schema.tableName cannot be empty".to_string(),
            ));
        }
        for (key, name) in self.schema.column_names.iter() {
            if name.trim().is_empty() {
                return Err(StoreError::Configuration(format!(
                    "column name for \"{}\" cannot be empty",
                    key
                )));
            }
        }
        if let Some(column) = &self.schema.user_id_column {
            if column.trim().is_empty() {
                return Err(StoreError::Configuration(
                    "schema.userIdColumn cannot be empty".to_string(),
                ));
            }
        }
        if self.expiration.as_millis() > MAX_EXPIRY_MILLIS as u128 {
            return Err(StoreError::Configuration(format!(
                "expiration must not exceed {} ms",
                MAX_EXPIRY_MILLIS
            )));
        }
        if self.clear_expired && self.check_expiration_interval.is_zero() {
            return Err(StoreError::Configuration(
                "checkExpirationInterval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether `close` should terminate the connection.
    pub fn closes_connection(&self) -> bool {
        self.end_connection_on_close.unwrap_or(true)
    }

    pub fn with_clear_expired(mut self, enabled: bool) -> Self {
        self.clear_expired = enabled;
        self
    }

    pub fn with_check_expiration_interval(mut self, interval: Duration) -> Self {
        self.check_expiration_interval = interval;
        self
    }

    pub fn with_expiration(mut self, expiration: Duration) -> Self {
        self.expiration = expiration;
        self
    }

    pub fn with_create_database_table(mut self, enabled: bool) -> Self {
        self.create_database_table = enabled;
        self
    }

    pub fn with_end_connection_on_close(mut self, enabled: bool) -> Self {
        self.end_connection_on_close = Some(enabled);
        self
    }

    pub fn with_disable_touch(mut self, disabled: bool) -> Self {
        self.disable_touch = disabled;
        self
    }

    pub fn with_table_name(mut self, table_name: impl Into<String>) -> Self {
        self.schema.table_name = table_name.into();
        self
    }

    /// Override the physical name of one logical column.
    pub fn with_column_name(mut self, column: &str, name: impl Into<String>) -> Result<Self> {
        self.schema.column_names.set(column, name)?;
        Ok(self)
    }

    pub fn with_user_id_column(mut self, column: impl Into<String>) -> Self {
        self.schema.user_id_column = Some(column.into());
        self
    }

    pub fn with_connection(mut self, connection: ConnectionOptions) -> Self {
        self.connection = connection;
        self
    }
}

/// Table layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SchemaOptions {
    pub table_name: String,
    pub column_names: ColumnNames,
    /// Column holding the owning user's id. Not part of the managed schema;
    /// only needed by `notify_simultaneous_sessions`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id_column: Option<String>,
}

impl Default for SchemaOptions {
    fn default() -> Self {
        Self {
            table_name: DEFAULT_TABLE_NAME.to_string(),
            column_names: ColumnNames::default(),
            user_id_column: None,
        }
    }
}

/// Physical names of the three session columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "BTreeMap<String, String>")]
pub struct ColumnNames {
    pub session_id: String,
    pub expires: String,
    pub data: String,
}

impl Default for ColumnNames {
    fn default() -> Self {
        Self {
            session_id: "session_id".to_string(),
            expires: "expires".to_string(),
            data: "data".to_string(),
        }
    }
}

impl ColumnNames {
    /// Override one column. Fails for keys outside [`CONFIGURABLE_COLUMNS`].
    pub fn set(&mut self, column: &str, name: impl Into<String>) -> Result<()> {
        let slot = match column {
            "session_id" => &mut self.session_id,
            "expires" => &mut self.expires,
            "data" => &mut self.data,
            other => return Err(StoreError::Configuration(unknown_column_message(other))),
        };
        *slot = name.into();
        Ok(())
    }

    /// `(logical, physical)` pairs in declaration order.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("session_id", self.session_id.as_str()),
            ("expires", self.expires.as_str()),
            ("data", self.data.as_str()),
        ]
        .into_iter()
    }
}

impl TryFrom<BTreeMap<String, String>> for ColumnNames {
    type Error = String;

    fn try_from(overrides: BTreeMap<String, String>) -> std::result::Result<Self, Self::Error> {
        let mut columns = ColumnNames::default();
        for (key, name) in overrides {
            columns.set(&key, name).map_err(|_| unknown_column_message(&key))?;
        }
        Ok(columns)
    }
}

fn unknown_column_message(column: &str) -> String {
    format!(
        "Unknown column specified (\"{}\"). Only the following columns are configurable: \"session_id\", \"expires\", \"data\".",
        column
    )
}

/// Allow-listed parameters for a store-owned MySQL pool.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConnectionOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Queue acquisitions when the pool is exhausted instead of failing fast.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub wait_for_connections: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_idle: Option<u32>,
    /// Milliseconds a connection may sit idle before being closed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle_timeout: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_limit: Option<u32>,
}

impl ConnectionOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    pub fn database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    pub fn connection_limit(mut self, limit: u32) -> Self {
        self.connection_limit = Some(limit);
        self
    }
}

/// `Duration` as whole milliseconds.
mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
