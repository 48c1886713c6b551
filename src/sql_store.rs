//! SQL session store.
//!
//! Construction resolves options synchronously, then brings the store up in
//! the background: optional table creation, `INITIALIZED`, optional sweep
//! schedule, and finally the ready signal. Operations do not wait for
//! readiness themselves; callers await [`SqlSessionStore::on_ready`] first.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{ColumnNames, StoreOptions};
use crate::connection::{connect, value_as_i64, Connection, QueryResult, Row};
use crate::error::{Result, StoreError};
use crate::expiry::{expiration_for, now_unix};
use crate::lifecycle::{LifecycleState, ReadySignal, StateCell};
use crate::statement::{Dialect, Statement};
use crate::store::{ExportedSession, SessionRecord, SessionStats, SessionStore};
use crate::sweeper::ExpirationTimer;
use crate::watch::{EventSender, EventStream, SessionEvent};

/// Session store backed by a SQL table.
///
/// Cheap to clone; clones share the same connection and lifecycle.
#[derive(Clone)]
pub struct SqlSessionStore {
    inner: Arc<Inner>,
}

struct Inner {
    options: StoreOptions,
    connection: Arc<dyn Connection>,
    state: StateCell,
    ready: ReadySignal,
    timer: Mutex<Option<ExpirationTimer>>,
    events: EventSender,
}

impl SqlSessionStore {
    /// Create a store and start bringing it up.
    ///
    /// With `connection` set, that handle is used as-is; otherwise a pool is
    /// built from `options.connection`. Option errors are returned before
    /// any connection exists. Must be called within a tokio runtime.
    pub fn new(options: StoreOptions, connection: Option<Arc<dyn Connection>>) -> Result<Self> {
        let options = options.resolve(connection.is_some())?;
        let connection = match connection {
            Some(connection) => connection,
            None => connect(&options.connection, &options.charset)?,
        };

        info!(
            table = %options.schema.table_name,
            dialect = ?connection.dialect(),
            "Creating session store"
        );

        let inner = Arc::new(Inner {
            options,
            connection,
            state: StateCell::default(),
            ready: ReadySignal::new(),
            timer: Mutex::new(None),
            events: EventSender::default(),
        });
        inner.state.advance(LifecycleState::Initializing);

        let store = Self { inner };
        tokio::spawn(store.clone().bring_up());
        Ok(store)
    }

    /// Create a store from a JSON options document.
    pub fn from_value(options: Value, connection: Option<Arc<dyn Connection>>) -> Result<Self> {
        Self::new(StoreOptions::from_value(options)?, connection)
    }

    async fn initialize(&self) -> Result<()> {
        if self.inner.options.create_database_table {
            self.create_database_table().await?;
        }
        self.inner.state.advance(LifecycleState::Initialized);
        if self.inner.options.clear_expired {
            self.set_expiration_interval(None)?;
        }
        Ok(())
    }

    async fn bring_up(self) {
        match self.initialize().await {
            Ok(()) => {
                debug!("Session store ready");
                self.inner.ready.resolve();
            }
            Err(e) => {
                error!(error = %e, "Session store failed to initialize");
                self.inner.ready.reject(e);
            }
        }
    }

    /// Wait until bring-up has finished.
    ///
    /// Resolves immediately once the store is initialized. If bring-up
    /// failed, every waiter gets [`StoreError::Startup`].
    pub async fn on_ready(&self) -> Result<()> {
        if self.inner.state.get() == LifecycleState::Initialized {
            return Ok(());
        }
        self.inner.ready.wait().await
    }

    pub fn lifecycle_state(&self) -> LifecycleState {
        self.inner.state.get()
    }

    pub fn options(&self) -> &StoreOptions {
        &self.inner.options
    }

    /// Subscribe to session change events matching `pattern`.
    pub fn subscribe(&self, pattern: impl Into<String>) -> EventStream {
        self.inner.events.subscribe(pattern)
    }

    fn dialect(&self) -> Dialect {
        self.inner.connection.dialect()
    }

    fn table(&self) -> &str {
        &self.inner.options.schema.table_name
    }

    fn columns(&self) -> &ColumnNames {
        &self.inner.options.schema.column_names
    }

    /// Run a statement against the store's connection.
    pub async fn query(&self, statement: Statement) -> Result<QueryResult> {
        if self.inner.state.get() >= LifecycleState::Closing {
            return Err(StoreError::Closed);
        }
        self.inner.connection.query(&statement).await
    }

    /// Create the session table if it does not exist.
    pub async fn create_database_table(&self) -> Result<()> {
        info!(table = %self.table(), "Creating sessions database table");
        let c = self.columns();

        let statement = match self.dialect() {
            Dialect::MySql => {
                let collation = &self.inner.options.charset;
                let charset = collation.split('_').next().unwrap_or(collation.as_str());
                Statement::execute(
                    "CREATE TABLE IF NOT EXISTS ?? (\
                     ?? VARCHAR(128) NOT NULL, \
                     ?? INT(11) UNSIGNED NOT NULL, \
                     ?? MEDIUMTEXT, \
                     PRIMARY KEY (??)\
                     ) ENGINE=InnoDB DEFAULT CHARSET=?? COLLATE=??",
                )
                .ident(self.table())
                .ident(&c.session_id)
                .ident(&c.expires)
                .ident(&c.data)
                .ident(&c.session_id)
                .ident(charset)
                .ident(collation.as_str())
            }
            Dialect::Sqlite => Statement::execute(
                "CREATE TABLE IF NOT EXISTS ?? (\
                 ?? TEXT NOT NULL PRIMARY KEY, \
                 ?? INTEGER NOT NULL, \
                 ?? TEXT)",
            )
            .ident(self.table())
            .ident(&c.session_id)
            .ident(&c.expires)
            .ident(&c.data),
        };

        self.query(statement)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to create sessions database table"))?;
        debug!("Successfully created sessions database table");
        Ok(())
    }

    /// Delete every row whose expiration has passed. Returns the number removed.
    pub async fn clear_expired_sessions(&self) -> Result<u64> {
        debug!("Clearing expired sessions");
        let c = self.columns();
        let statement = Statement::execute("DELETE FROM ?? WHERE ?? < ?")
            .ident(self.table())
            .ident(&c.expires)
            .bind(now_unix());

        let removed = self
            .query(statement)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to clear expired sessions"))?
            .rows_affected();

        if removed > 0 {
            info!(removed, "Cleared expired sessions");
            self.inner.events.send(SessionEvent::ExpiredCleared { removed });
        }
        Ok(removed)
    }

    /// (Re)start the sweep schedule. `None` or a zero interval uses
    /// `checkExpirationInterval`.
    pub fn set_expiration_interval(&self, interval: Option<Duration>) -> Result<()> {
        let period = interval
            .filter(|interval| !interval.is_zero())
            .unwrap_or(self.inner.options.check_expiration_interval);
        if period.is_zero() {
            return Err(StoreError::Configuration(
                "expiration interval must be greater than zero".to_string(),
            ));
        }
        debug!(period_ms = period.as_millis() as u64, "Setting expiration interval");

        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        let timer = ExpirationTimer::start(period, move || {
            let inner = weak.upgrade()?;
            let store = SqlSessionStore { inner };
            Some(async move { store.clear_expired_sessions().await })
        });

        // Replacing the previous timer drops (and cancels) it.
        *self.inner.timer.lock() = Some(timer);
        Ok(())
    }

    /// Cancel the sweep schedule, if any.
    pub fn clear_expiration_interval(&self) {
        if self.inner.timer.lock().take().is_some() {
            info!("Expiration timer stopped");
        }
    }

    /// Period of the active sweep schedule.
    pub fn expiration_interval(&self) -> Option<Duration> {
        self.inner.timer.lock().as_ref().map(ExpirationTimer::period)
    }

    /// Unexpired rows.
    pub async fn get_active_sessions(&self) -> Result<Vec<SessionRecord>> {
        debug!("Fetching active sessions");
        self.records_where(">=")
            .await
            .inspect_err(|e| error!(error = %e, "Failed to fetch active sessions"))
    }

    /// Expired rows not yet swept.
    pub async fn get_expired_sessions(&self) -> Result<Vec<SessionRecord>> {
        debug!("Fetching expired sessions");
        self.records_where("<")
            .await
            .inspect_err(|e| error!(error = %e, "Failed to fetch expired sessions"))
    }

    async fn records_where(&self, comparison: &str) -> Result<Vec<SessionRecord>> {
        let c = self.columns();
        let sql = format!(
            "SELECT ?? AS session_id, ?? AS expires, ?? AS data FROM ?? WHERE ?? {} ? ORDER BY ??",
            comparison
        );
        let statement = Statement::query(sql)
            .ident(&c.session_id)
            .ident(&c.expires)
            .ident(&c.data)
            .ident(self.table())
            .ident(&c.expires)
            .bind(now_unix())
            .ident(&c.session_id);

        let result = self.query(statement).await?;
        Ok(result.rows.iter().map(record_from_row).collect())
    }

    /// Whether an unexpired session exists.
    pub async fn session_exists(&self, session_id: &str) -> Result<bool> {
        self.exists(session_id).await
    }

    /// Active and expired counts, queried concurrently.
    pub async fn get_session_stats(&self) -> Result<SessionStats> {
        let now = now_unix();
        let c = self.columns();
        let active = Statement::query("SELECT COUNT(*) AS active FROM ?? WHERE ?? >= ?")
            .ident(self.table())
            .ident(&c.expires)
            .bind(now);
        let expired = Statement::query("SELECT COUNT(*) AS expired FROM ?? WHERE ?? < ?")
            .ident(self.table())
            .ident(&c.expires)
            .bind(now);

        let (active, expired) = tokio::try_join!(self.query(active), self.query(expired))
            .inspect_err(|e| error!(error = %e, "Failed to get session stats"))?;

        Ok(SessionStats {
            active: active.scalar("active"),
            expired: expired.scalar("expired"),
        })
    }

    /// Every row (expired or not) as pretty-printed JSON, ordered by id.
    ///
    /// Fails if any stored payload is not valid JSON.
    pub async fn export_sessions(&self) -> Result<String> {
        debug!("Exporting all sessions");
        let c = self.columns();
        let statement =
            Statement::query("SELECT ?? AS session_id, ?? AS data, ?? AS expires FROM ?? ORDER BY ??")
                .ident(&c.session_id)
                .ident(&c.data)
                .ident(&c.expires)
                .ident(self.table())
                .ident(&c.session_id);

        let result = self
            .query(statement)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to export sessions"))?;

        let sessions = result
            .rows
            .iter()
            .map(|row| -> Result<ExportedSession> {
                let record = record_from_row(row);
                Ok(ExportedSession {
                    data: record.payload()?,
                    session_id: record.session_id,
                    expires: record.expires,
                })
            })
            .collect::<Result<Vec<_>>>()
            .inspect_err(|e| error!(error = %e, "Failed to parse session data for export"))?;
        Ok(serde_json::to_string_pretty(&sessions)?)
    }

    /// Count the user's active sessions and publish a
    /// [`SessionEvent::SimultaneousSessions`] when there is more than one.
    ///
    /// Requires `schema.userIdColumn`.
    pub async fn notify_simultaneous_sessions(&self, user_id: &str) -> Result<u64> {
        let Some(user_column) = self.inner.options.schema.user_id_column.as_deref() else {
            return Err(StoreError::Configuration(
                "schema.userIdColumn is not configured".to_string(),
            ));
        };
        debug!(user_id, "Checking for simultaneous sessions");

        let statement = Statement::query("SELECT COUNT(*) AS total FROM ?? WHERE ?? = ? AND ?? >= ?")
            .ident(self.table())
            .ident(user_column)
            .bind(user_id)
            .ident(&self.columns().expires)
            .bind(now_unix());

        let count = self
            .query(statement)
            .await
            .inspect_err(|e| error!(user_id, error = %e, "Failed to check simultaneous sessions"))?
            .scalar("total");

        if count > 1 {
            info!(user_id, count, "User has simultaneous sessions");
            self.inner.events.send(SessionEvent::SimultaneousSessions {
                user_id: user_id.to_string(),
                count,
            });
        }
        Ok(count)
    }
}

#[async_trait]
impl SessionStore for SqlSessionStore {
    async fn get(&self, session_id: &str) -> Result<Option<Value>> {
        debug!(session_id, "Getting session");
        let c = self.columns();
        // Primary key lookup; no LIMIT needed.
        let statement = Statement::query("SELECT ?? AS data, ?? AS expires FROM ?? WHERE ?? = ?")
            .ident(&c.data)
            .ident(&c.expires)
            .ident(self.table())
            .ident(&c.session_id)
            .bind(session_id);

        let result = self
            .query(statement)
            .await
            .inspect_err(|e| error!(session_id, error = %e, "Failed to get session"))?;

        let Some(row) = result.first() else {
            return Ok(None);
        };
        if row_expires(row) < now_unix() {
            return Ok(None);
        }

        match row.get("data") {
            Some(Value::String(data)) => serde_json::from_str(data).map(Some).map_err(|e| {
                error!(session_id, error = %e, "Failed to parse data for session");
                e.into()
            }),
            Some(Value::Null) | None => Ok(None),
            Some(other) => Ok(Some(other.clone())),
        }
    }

    async fn set(&self, session_id: &str, session: &Value) -> Result<()> {
        debug!(session_id, "Setting session");
        let expires = expiration_for(session, self.inner.options.expiration)?;
        let data = serde_json::to_string(session)?;
        let c = self.columns();

        let statement = match self.dialect() {
            Dialect::MySql => Statement::execute(
                "INSERT INTO ?? (??, ??, ??) VALUES (?, ?, ?) \
                 ON DUPLICATE KEY UPDATE ?? = VALUES(??), ?? = VALUES(??)",
            )
            .ident(self.table())
            .ident(&c.session_id)
            .ident(&c.expires)
            .ident(&c.data)
            .bind(session_id)
            .bind(expires)
            .bind(data)
            .ident(&c.expires)
            .ident(&c.expires)
            .ident(&c.data)
            .ident(&c.data),
            Dialect::Sqlite => Statement::execute(
                "INSERT INTO ?? (??, ??, ??) VALUES (?, ?, ?) \
                 ON CONFLICT (??) DO UPDATE SET ?? = excluded.??, ?? = excluded.??",
            )
            .ident(self.table())
            .ident(&c.session_id)
            .ident(&c.expires)
            .ident(&c.data)
            .bind(session_id)
            .bind(expires)
            .bind(data)
            .ident(&c.session_id)
            .ident(&c.expires)
            .ident(&c.expires)
            .ident(&c.data)
            .ident(&c.data),
        };

        self.query(statement)
            .await
            .inspect_err(|e| error!(session_id, error = %e, "Failed to insert session data"))?;

        self.inner.events.send(SessionEvent::Set {
            session_id: session_id.to_string(),
            expires,
        });
        Ok(())
    }

    async fn touch(&self, session_id: &str, session: &Value) -> Result<()> {
        if self.inner.options.disable_touch {
            return Ok(());
        }
        debug!(session_id, "Touching session");
        let expires = expiration_for(session, self.inner.options.expiration)?;
        let c = self.columns();
        let statement = Statement::execute("UPDATE ?? SET ?? = ? WHERE ?? = ?")
            .ident(self.table())
            .ident(&c.expires)
            .bind(expires)
            .ident(&c.session_id)
            .bind(session_id);

        let touched = self
            .query(statement)
            .await
            .inspect_err(|e| error!(session_id, error = %e, "Failed to touch session"))?
            .rows_affected();

        if touched > 0 {
            self.inner.events.send(SessionEvent::Touched {
                session_id: session_id.to_string(),
                expires,
            });
        }
        Ok(())
    }

    async fn destroy(&self, session_id: &str) -> Result<()> {
        debug!(session_id, "Destroying session");
        let c = self.columns();
        let statement = Statement::execute("DELETE FROM ?? WHERE ?? = ?")
            .ident(self.table())
            .ident(&c.session_id)
            .bind(session_id);

        let removed = self
            .query(statement)
            .await
            .inspect_err(|e| error!(session_id, error = %e, "Failed to destroy session"))?
            .rows_affected();

        if removed > 0 {
            self.inner.events.send(SessionEvent::Destroyed {
                session_id: session_id.to_string(),
            });
        }
        Ok(())
    }

    async fn all(&self) -> Result<BTreeMap<String, Value>> {
        debug!("Getting all sessions");
        let c = self.columns();
        let statement = Statement::query("SELECT ?? AS session_id, ?? AS data FROM ?? WHERE ?? >= ?")
            .ident(&c.session_id)
            .ident(&c.data)
            .ident(self.table())
            .ident(&c.expires)
            .bind(now_unix());

        let result = self
            .query(statement)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to get all sessions"))?;

        let mut sessions = BTreeMap::new();
        for row in &result.rows {
            let session_id = row
                .get("session_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            let data = match row.get("data") {
                Some(Value::String(data)) => match serde_json::from_str(data) {
                    Ok(value) => value,
                    Err(e) => {
                        warn!(session_id, error = %e, "Failed to parse data for session, skipping");
                        continue;
                    }
                },
                Some(other) => other.clone(),
                None => Value::Null,
            };
            sessions.insert(session_id, data);
        }
        Ok(sessions)
    }

    async fn length(&self) -> Result<u64> {
        debug!("Getting number of sessions");
        let c = self.columns();
        let statement = Statement::query("SELECT COUNT(*) AS total FROM ?? WHERE ?? >= ?")
            .ident(self.table())
            .ident(&c.expires)
            .bind(now_unix());

        let result = self
            .query(statement)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to get number of sessions"))?;
        Ok(result.scalar("total"))
    }

    async fn clear(&self) -> Result<()> {
        debug!("Clearing all sessions");
        let statement = Statement::execute("DELETE FROM ??").ident(self.table());
        self.query(statement)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to clear all sessions"))?;
        self.inner.events.send(SessionEvent::Cleared);
        Ok(())
    }

    /// Stop the sweep schedule and, if configured, end the connection.
    ///
    /// The store reaches `CLOSED` even if ending the connection fails.
    async fn close(&self) -> Result<()> {
        info!("Closing session store");
        self.clear_expiration_interval();

        if !self.inner.options.closes_connection()
            || !self
                .inner
                .state
                .transition(LifecycleState::Initialized, LifecycleState::Closing)
        {
            return Ok(());
        }

        let ended = self.inner.connection.end().await;
        self.inner.state.advance(LifecycleState::Closed);
        ended.inspect_err(|e| error!(error = %e, "Failed to end session store connection"))
    }
}

fn row_expires(row: &Row) -> i64 {
    row.get("expires").and_then(value_as_i64).unwrap_or(i64::MIN)
}

fn record_from_row(row: &Row) -> SessionRecord {
    SessionRecord {
        session_id: row
            .get("session_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        expires: row_expires(row),
        data: row.get("data").and_then(|data| match data {
            Value::Null => None,
            Value::String(s) => Some(s.clone()),
            other => Some(other.to_string()),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::SqliteConnection;
    use crate::statement::SqlValue;
    use serde_json::json;
    use tokio_stream::StreamExt;

    async fn sqlite() -> Arc<dyn Connection> {
        Arc::new(SqliteConnection::in_memory().await.unwrap())
    }

    async fn store_with(options: StoreOptions) -> SqlSessionStore {
        let store = SqlSessionStore::new(options, Some(sqlite().await)).unwrap();
        store.on_ready().await.unwrap();
        store
    }

    async fn store() -> SqlSessionStore {
        store_with(StoreOptions::new()).await
    }

    fn expired_session() -> Value {
        json!({"cookie": {"expires": (now_unix() - 60) * 1000}, "foo": "bar"})
    }

    async fn next_event(events: &mut EventStream) -> Option<SessionEvent> {
        tokio::time::timeout(Duration::from_secs(1), events.next())
            .await
            .unwrap()
    }

    fn unreachable_connection() -> Arc<dyn Connection> {
        Arc::new(UnreachableConnection)
    }

    /// MySQL-dialect connection that records rendered statements.
    #[derive(Default)]
    struct RecordingConnection {
        statements: parking_lot::Mutex<Vec<(String, Vec<SqlValue>)>>,
    }

    #[async_trait]
    impl Connection for RecordingConnection {
        fn dialect(&self) -> Dialect {
            Dialect::MySql
        }

        async fn query(&self, statement: &Statement) -> Result<QueryResult> {
            self.statements.lock().push(statement.render(Dialect::MySql)?);
            Ok(QueryResult::affected(1))
        }

        async fn end(&self) -> Result<()> {
            Ok(())
        }
    }

    struct UnreachableConnection;

    #[async_trait]
    impl Connection for UnreachableConnection {
        fn dialect(&self) -> Dialect {
            Dialect::MySql
        }

        async fn query(&self, _statement: &Statement) -> Result<QueryResult> {
            Err(StoreError::Connection("connect ECONNREFUSED".to_string()))
        }

        async fn end(&self) -> Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_mysql_statements() {
        let connection = Arc::new(RecordingConnection::default());
        let options = StoreOptions::new().with_clear_expired(false);
        let store = SqlSessionStore::new(options, Some(connection.clone() as Arc<dyn Connection>))
            .unwrap();
        store.on_ready().await.unwrap();

        let session = json!({"cookie": {"expires": "2100-01-01T00:00:00.000Z"}});
        store.set("abc", &session).await.unwrap();
        store.touch("abc", &session).await.unwrap();

        let statements = connection.statements.lock().clone();
        assert_eq!(statements.len(), 3);

        assert_eq!(
            statements[0].0,
            "CREATE TABLE IF NOT EXISTS `sessions` (\
             `session_id` VARCHAR(128) NOT NULL, \
             `expires` INT(11) UNSIGNED NOT NULL, \
             `data` MEDIUMTEXT, \
             PRIMARY KEY (`session_id`)\
             ) ENGINE=InnoDB DEFAULT CHARSET=`utf8mb4` COLLATE=`utf8mb4_bin`"
        );
        assert!(statements[0].1.is_empty());

        assert_eq!(
            statements[1].0,
            "INSERT INTO `sessions` (`session_id`, `expires`, `data`) VALUES (?, ?, ?) \
             ON DUPLICATE KEY UPDATE `expires` = VALUES(`expires`), `data` = VALUES(`data`)"
        );
        assert_eq!(
            statements[1].1,
            vec![
                SqlValue::from("abc"),
                SqlValue::Integer(4_102_444_800),
                SqlValue::from(session.to_string()),
            ]
        );

        assert_eq!(
            statements[2].0,
            "UPDATE `sessions` SET `expires` = ? WHERE `session_id` = ?"
        );
        assert_eq!(
            statements[2].1,
            vec![SqlValue::Integer(4_102_444_800), SqlValue::from("abc")]
        );
    }

    #[tokio::test]
    async fn test_mysql_custom_collation_and_names() {
        let connection = Arc::new(RecordingConnection::default());
        let options = StoreOptions::from_value(json!({
            "clearExpired": false,
            "charset": "latin1_swedish_ci",
            "schema": {"tableName": "app.sessions", "columnNames": {"data": "payload"}}
        }))
        .unwrap();
        let store = SqlSessionStore::new(options, Some(connection.clone() as Arc<dyn Connection>))
            .unwrap();
        store.on_ready().await.unwrap();

        let statements = connection.statements.lock().clone();
        let create = &statements[0].0;
        assert!(create.starts_with("CREATE TABLE IF NOT EXISTS `app`.`sessions` ("));
        assert!(create.contains("`payload` MEDIUMTEXT"));
        assert!(create.ends_with("DEFAULT CHARSET=`latin1` COLLATE=`latin1_swedish_ci`"));
    }

    #[test]
    fn test_record_from_row() {
        let row: Row = [
            ("session_id".to_string(), Value::from("abc")),
            ("expires".to_string(), Value::from(42)),
            ("data".to_string(), Value::from("{}")),
        ]
        .into_iter()
        .collect();

        let record = record_from_row(&row);
        assert_eq!(record.session_id, "abc");
        assert_eq!(record.expires, 42);
        assert_eq!(record.data.as_deref(), Some("{}"));
    }

    #[test]
    fn test_row_without_expires_is_expired() {
        assert!(row_expires(&Row::new()) < now_unix());
    }

    #[tokio::test]
    async fn test_unknown_column_fails_before_connecting() {
        let err = SqlSessionStore::from_value(
            json!({"schema": {"columnNames": {"bogus": "x"}}}),
            None,
        )
        .err()
        .unwrap();
        assert!(matches!(err, StoreError::Configuration(_)));
        assert!(err.to_string().contains("bogus"));
    }

    #[tokio::test]
    async fn test_ready_and_state() {
        let store = store().await;
        assert_eq!(store.lifecycle_state(), LifecycleState::Initialized);
        assert_eq!(
            store.expiration_interval(),
            Some(store.options().check_expiration_interval)
        );

        // Already initialized: resolves immediately, any number of times.
        store.on_ready().await.unwrap();
        store.on_ready().await.unwrap();
    }

    #[tokio::test]
    async fn test_startup_failure_rejects_waiters() {
        let store = SqlSessionStore::new(StoreOptions::new(), Some(unreachable_connection())).unwrap();

        let err = store.on_ready().await.unwrap_err();
        assert!(matches!(err, StoreError::Startup(_)));
        assert!(err.is_retryable());
        assert!(err.to_string().contains("ECONNREFUSED"));

        // Same outcome for a second waiter; the store never initializes.
        assert!(store.on_ready().await.is_err());
        assert_eq!(store.lifecycle_state(), LifecycleState::Initializing);
        assert_eq!(store.expiration_interval(), None);
    }

    #[tokio::test]
    async fn test_no_table_creation_skips_queries() {
        let options = StoreOptions::new()
            .with_create_database_table(false)
            .with_clear_expired(false);
        let store = SqlSessionStore::new(options, Some(unreachable_connection())).unwrap();

        store.on_ready().await.unwrap();
        assert_eq!(store.lifecycle_state(), LifecycleState::Initialized);
        assert_eq!(store.expiration_interval(), None);
        assert!(store.get("abc").await.is_err());
    }

    #[tokio::test]
    async fn test_set_get_roundtrip() {
        let store = store().await;
        let session = json!({"cookie": {"maxAge": 3600000}, "user": {"id": 7, "name": "ada"}});

        store.set("abc", &session).await.unwrap();
        assert_eq!(store.get("abc").await.unwrap(), Some(session));
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_set_replaces_existing() {
        let store = store().await;
        store.set("abc", &json!({"n": 1})).await.unwrap();
        store.set("abc", &json!({"n": 2})).await.unwrap();

        assert_eq!(store.get("abc").await.unwrap(), Some(json!({"n": 2})));
        assert_eq!(store.length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_default_expiration() {
        let options = StoreOptions::new().with_expiration(Duration::from_secs(600));
        let store = store_with(options).await;
        let before = now_unix();
        store.set("abc", &json!({})).await.unwrap();

        let records = store.get_active_sessions().await.unwrap();
        assert_eq!(records.len(), 1);
        let expires = records[0].expires;
        assert!(expires >= before + 600 && expires <= now_unix() + 601);
    }

    #[tokio::test]
    async fn test_cookie_expiration_is_used() {
        let store = store().await;
        store
            .set("abc", &json!({"cookie": {"expires": "2100-01-01T00:00:00.000Z"}}))
            .await
            .unwrap();

        let records = store.get_active_sessions().await.unwrap();
        assert_eq!(records[0].expires, 4_102_444_800);
    }

    #[tokio::test]
    async fn test_invalid_cookie_expiration_is_rejected() {
        let store = store().await;
        let err = store
            .set("abc", &json!({"cookie": {"expires": "not a date"}}))
            .await
            .unwrap_err();

        assert!(matches!(err, StoreError::InvalidExpiration(_)));
        assert_eq!(store.get("abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_session_not_found_until_swept() {
        let store = store().await;
        store.set("old", &expired_session()).await.unwrap();

        assert_eq!(store.get("old").await.unwrap(), None);
        assert!(!store.session_exists("old").await.unwrap());
        assert_eq!(store.length().await.unwrap(), 0);
        assert!(store.all().await.unwrap().is_empty());

        // The row is still there until a sweep removes it.
        let expired = store.get_expired_sessions().await.unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].session_id, "old");
    }

    #[tokio::test]
    async fn test_length_and_clear() {
        let store = store().await;
        store.clear().await.unwrap();
        assert_eq!(store.length().await.unwrap(), 0);

        store.set("abc", &json!({})).await.unwrap();
        assert_eq!(store.length().await.unwrap(), 1);

        store.clear().await.unwrap();
        assert_eq!(store.length().await.unwrap(), 0);
        assert_eq!(store.get("abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_all_returns_active_sessions() {
        let store = store().await;
        store.set("a", &json!({"n": 1})).await.unwrap();
        store.set("b", &json!({"n": 2})).await.unwrap();
        store.set("old", &expired_session()).await.unwrap();

        let all = store.all().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all["a"], json!({"n": 1}));
        assert_eq!(all["b"], json!({"n": 2}));
    }

    #[tokio::test]
    async fn test_corrupt_payload() {
        let store = store().await;
        store.set("good", &json!({"ok": true})).await.unwrap();
        store
            .query(
                Statement::execute("INSERT INTO ?? (??, ??, ??) VALUES (?, ?, ?)")
                    .ident("sessions")
                    .ident("session_id")
                    .ident("expires")
                    .ident("data")
                    .bind("bad")
                    .bind(now_unix() + 600)
                    .bind("{not json"),
            )
            .await
            .unwrap();

        // Single reads fail, bulk reads skip the row.
        assert!(matches!(
            store.get("bad").await,
            Err(StoreError::PayloadDecode(_))
        ));
        let all = store.all().await.unwrap();
        assert_eq!(all.keys().collect::<Vec<_>>(), vec!["good"]);
        assert!(store.export_sessions().await.is_err());
    }

    #[tokio::test]
    async fn test_touch_extends_expiration() {
        let store = store().await;
        let session = expired_session();
        store.set("abc", &session).await.unwrap();
        assert_eq!(store.get("abc").await.unwrap(), None);

        store.touch("abc", &json!({"ignored": true})).await.unwrap();
        assert_eq!(store.get("abc").await.unwrap(), Some(session));

        // Touching a missing session is not an error.
        store.touch("missing", &json!({})).await.unwrap();
        assert_eq!(store.get("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_disable_touch() {
        let store = store_with(StoreOptions::new().with_disable_touch(true)).await;
        store.set("abc", &expired_session()).await.unwrap();

        store.touch("abc", &json!({})).await.unwrap();
        assert_eq!(store.get("abc").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_destroy() {
        let store = store().await;
        store.set("abc", &json!({})).await.unwrap();
        store.destroy("abc").await.unwrap();

        assert_eq!(store.get("abc").await.unwrap(), None);
        assert_eq!(store.length().await.unwrap(), 0);
        store.destroy("abc").await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_expired_sessions() {
        let store = store().await;
        store.set("live", &json!({})).await.unwrap();
        store.set("old1", &expired_session()).await.unwrap();
        store.set("old2", &expired_session()).await.unwrap();

        assert_eq!(store.clear_expired_sessions().await.unwrap(), 2);
        assert_eq!(store.clear_expired_sessions().await.unwrap(), 0);
        assert!(store.get_expired_sessions().await.unwrap().is_empty());
        assert_eq!(store.length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_scheduled_sweep() {
        let options = StoreOptions::new().with_check_expiration_interval(Duration::from_millis(50));
        let store = store_with(options).await;
        store.set("old", &expired_session()).await.unwrap();
        assert_eq!(store.get_expired_sessions().await.unwrap().len(), 1);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert!(store.get_expired_sessions().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_expiration_interval_control() {
        let store = store_with(StoreOptions::new().with_clear_expired(false)).await;
        assert_eq!(store.expiration_interval(), None);

        store
            .set_expiration_interval(Some(Duration::from_secs(5)))
            .unwrap();
        assert_eq!(store.expiration_interval(), Some(Duration::from_secs(5)));

        store.set_expiration_interval(None).unwrap();
        assert_eq!(
            store.expiration_interval(),
            Some(store.options().check_expiration_interval)
        );

        store
            .set_expiration_interval(Some(Duration::from_secs(5)))
            .unwrap();
        store.set_expiration_interval(Some(Duration::ZERO)).unwrap();
        assert_eq!(
            store.expiration_interval(),
            Some(store.options().check_expiration_interval)
        );

        store.clear_expiration_interval();
        assert_eq!(store.expiration_interval(), None);
        store.clear_expiration_interval();
    }

    #[tokio::test]
    async fn test_custom_schema() {
        let options = StoreOptions::from_value(json!({
            "schema": {
                "tableName": "custom_sessions",
                "columnNames": {
                    "session_id": "custom_session_id",
                    "expires": "custom_expires",
                    "data": "custom_data"
                }
            }
        }))
        .unwrap();
        let store = store_with(options).await;
        store.set("abc", &json!({"foo": "bar"})).await.unwrap();

        let raw = store
            .query(
                Statement::query("SELECT ?? AS sid FROM ??")
                    .ident("custom_session_id")
                    .ident("custom_sessions"),
            )
            .await
            .unwrap();
        assert_eq!(raw.first().and_then(|row| row.get("sid")), Some(&json!("abc")));
        assert_eq!(store.get("abc").await.unwrap(), Some(json!({"foo": "bar"})));
        assert_eq!(store.length().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_stats_and_export() {
        let store = store().await;
        store.set("b", &json!({"n": 2})).await.unwrap();
        store.set("a", &json!({"n": 1})).await.unwrap();
        store.set("old", &expired_session()).await.unwrap();

        assert_eq!(
            store.get_session_stats().await.unwrap(),
            SessionStats {
                active: 2,
                expired: 1
            }
        );

        let exported: Vec<ExportedSession> =
            serde_json::from_str(&store.export_sessions().await.unwrap()).unwrap();
        let ids: Vec<_> = exported.iter().map(|s| s.session_id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "old"]);
        assert_eq!(exported[0].data, json!({"n": 1}));

        let active: Vec<_> = store
            .get_active_sessions()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.session_id)
            .collect();
        assert_eq!(active, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_update_session_data() {
        let store = store().await;
        store.set("abc", &json!({"a": 1, "b": 2})).await.unwrap();

        assert!(store.update_session_data("abc", &json!({"b": 3})).await.unwrap());
        assert_eq!(store.get("abc").await.unwrap(), Some(json!({"a": 1, "b": 3})));
        assert!(!store.update_session_data("missing", &json!({})).await.unwrap());
    }

    #[tokio::test]
    async fn test_events() {
        let store = store().await;
        let mut events = store.subscribe("abc");

        store.set("other", &json!({})).await.unwrap();
        store.set("abc", &json!({})).await.unwrap();
        store.destroy("abc").await.unwrap();
        store.destroy("abc").await.unwrap();
        store.clear().await.unwrap();

        assert!(matches!(
            next_event(&mut events).await,
            Some(SessionEvent::Set { ref session_id, .. }) if session_id == "abc"
        ));
        assert_eq!(
            next_event(&mut events).await,
            Some(SessionEvent::Destroyed {
                session_id: "abc".to_string()
            })
        );
        assert_eq!(next_event(&mut events).await, Some(SessionEvent::Cleared));
    }

    #[tokio::test]
    async fn test_simultaneous_sessions() {
        let store = store_with(StoreOptions::new().with_user_id_column("user_id")).await;
        assert!(store.notify_simultaneous_sessions("u1").await.is_err());

        store
            .query(
                Statement::execute("ALTER TABLE ?? ADD COLUMN ?? TEXT")
                    .ident("sessions")
                    .ident("user_id"),
            )
            .await
            .unwrap();
        store.set("s1", &json!({})).await.unwrap();
        store.set("s2", &json!({})).await.unwrap();
        store.set("s3", &expired_session()).await.unwrap();
        store
            .query(
                Statement::execute("UPDATE ?? SET ?? = ?")
                    .ident("sessions")
                    .ident("user_id")
                    .bind("u1"),
            )
            .await
            .unwrap();

        let mut events = store.subscribe("*");
        assert_eq!(store.notify_simultaneous_sessions("u1").await.unwrap(), 2);
        assert_eq!(store.notify_simultaneous_sessions("u2").await.unwrap(), 0);
        assert_eq!(
            next_event(&mut events).await,
            Some(SessionEvent::SimultaneousSessions {
                user_id: "u1".to_string(),
                count: 2
            })
        );
    }

    #[tokio::test]
    async fn test_simultaneous_sessions_requires_user_column() {
        let store = store().await;
        assert!(matches!(
            store.notify_simultaneous_sessions("u1").await,
            Err(StoreError::Configuration(_))
        ));
    }

    #[tokio::test]
    async fn test_close_keeps_injected_connection() {
        let store = store().await;
        store.close().await.unwrap();

        assert_eq!(store.lifecycle_state(), LifecycleState::Initialized);
        assert_eq!(store.expiration_interval(), None);
        store.set("abc", &json!({})).await.unwrap();
    }

    #[tokio::test]
    async fn test_close_ends_owned_connection() {
        let store = store_with(StoreOptions::new().with_end_connection_on_close(true)).await;
        store.close().await.unwrap();

        assert_eq!(store.lifecycle_state(), LifecycleState::Closed);
        assert!(matches!(store.get("abc").await, Err(StoreError::Closed)));

        // Closing again is a no-op.
        store.close().await.unwrap();
        assert_eq!(store.lifecycle_state(), LifecycleState::Closed);
    }

    #[tokio::test]
    async fn test_callback_adapter_over_sql_store() {
        let store = store().await;
        let adapter = crate::callback::CallbackAdapter::new(&store);

        adapter.set("abc", &json!({"foo": "bar"}), None).await.unwrap();
        assert_eq!(adapter.length(None).await.unwrap(), 1);
        assert_eq!(
            adapter.get("abc", None).await.unwrap(),
            Some(json!({"foo": "bar"}))
        );
    }
}
