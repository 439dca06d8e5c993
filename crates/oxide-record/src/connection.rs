//! Named SQLite connections.
//!
//! A [`ConnectionRegistry`] owns one [`Connection`] per logical database
//! name, opened on first use and kept for the registry's lifetime. Clone the
//! registry to share it; clones see the same connections.

use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use oxide_record_core::{Statement, Value, DATETIME_FORMAT};
use sqlx::sqlite::{SqliteArguments, SqliteConnectOptions, SqlitePool, SqlitePoolOptions, SqliteRow};
use sqlx::{Column as _, Row as _, Sqlite, TypeInfo as _, ValueRef as _};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::{Config, ConnectionConfig, DatabaseConfig, SQLITE_DRIVER};
use crate::error::{OrmError, Result};

/// One fetched row, keyed by column name.
pub type Row = BTreeMap<String, Value>;

/// Outcome of a statement that does not return rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecuteResult {
    /// Number of rows inserted, updated or deleted.
    pub rows_affected: u64,
    /// Rowid of the last inserted row on this connection.
    pub last_insert_id: i64,
}

/// A live handle to one named database.
///
/// Backed by a single-connection pool whose connection never expires, so an
/// in-memory database survives between statements.
#[derive(Debug)]
pub struct Connection {
    name: String,
    pool: SqlitePool,
    statements: AtomicU64,
}

impl Connection {
    /// Wraps an existing pool.
    #[must_use]
    pub fn new(name: impl Into<String>, pool: SqlitePool) -> Self {
        Self {
            name: name.into(),
            pool,
            statements: AtomicU64::new(0),
        }
    }

    /// Opens a connection from its settings.
    ///
    /// # Errors
    ///
    /// [`OrmError::ConnectionUnavailable`] for unsupported drivers and for
    /// any failure while opening the database.
    pub async fn open(name: &str, config: &ConnectionConfig) -> Result<Self> {
        if !config.driver.eq_ignore_ascii_case(SQLITE_DRIVER) {
            return Err(OrmError::ConnectionUnavailable {
                name: String::from(name),
                reason: format!("unsupported driver `{}`", config.driver),
            });
        }

        let unavailable = |e: sqlx::Error| OrmError::ConnectionUnavailable {
            name: String::from(name),
            reason: e.to_string(),
        };

        let mut options = if config.database == ":memory:" {
            SqliteConnectOptions::from_str("sqlite::memory:").map_err(unavailable)?
        } else {
            SqliteConnectOptions::new()
                .filename(&config.database)
                .create_if_missing(true)
        };
        for (key, value) in config.pragmas() {
            options = options.pragma(key, value);
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(unavailable)?;

        info!(connection = name, database = %config.database, "opened connection");
        Ok(Self::new(name, pool))
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The underlying pool, for statements outside the builder.
    #[must_use]
    pub const fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Number of statements executed through this connection.
    #[must_use]
    pub fn statement_count(&self) -> u64 {
        self.statements.load(Ordering::Relaxed)
    }

    fn record(&self, stmt: &Statement) {
        self.statements.fetch_add(1, Ordering::Relaxed);
        debug!(
            connection = %self.name,
            sql = %stmt.sql,
            bindings = stmt.bindings.len(),
            "executing statement"
        );
    }

    /// Runs a row-returning statement and decodes every row.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Database`] if preparation, execution or decoding
    /// fails.
    pub async fn select(&self, stmt: &Statement) -> Result<Vec<Row>> {
        self.record(stmt);
        let mut query = sqlx::query(&stmt.sql);
        for value in &stmt.bindings {
            query = bind_value(query, value);
        }
        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(decode_row).collect()
    }

    /// Runs a statement that does not return rows.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Database`] if preparation or execution fails.
    pub async fn execute(&self, stmt: &Statement) -> Result<ExecuteResult> {
        self.record(stmt);
        let mut query = sqlx::query(&stmt.sql);
        for value in &stmt.bindings {
            query = bind_value(query, value);
        }
        let result = query.execute(&self.pool).await?;
        Ok(ExecuteResult {
            rows_affected: result.rows_affected(),
            last_insert_id: result.last_insert_rowid(),
        })
    }

    /// Runs one or more unparameterized statements, such as schema setup.
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Database`] on the first failing statement.
    pub async fn execute_script(&self, sql: &str) -> Result<u64> {
        debug!(connection = %self.name, sql, "executing script");
        let result = sqlx::raw_sql(sql).execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}

fn bind_value<'q>(
    query: sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &Value,
) -> sqlx::query::Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(Option::<i64>::None),
        Value::Bool(b) => query.bind(*b),
        Value::Int(i) => query.bind(*i),
        Value::Float(f) => query.bind(*f),
        Value::Text(s) => query.bind(s.clone()),
        Value::Blob(b) => query.bind(b.clone()),
        Value::DateTime(dt) => query.bind(dt.format(DATETIME_FORMAT).to_string()),
        Value::Json(json) => query.bind(json.to_string()),
    }
}

/// Decodes a row by each value's storage class.
fn decode_row(row: &SqliteRow) -> Result<Row> {
    let mut out = Row::new();
    for (i, column) in row.columns().iter().enumerate() {
        let raw = row.try_get_raw(i)?;
        let value = if raw.is_null() {
            Value::Null
        } else {
            let storage = raw.type_info().name().to_ascii_uppercase();
            match storage.as_str() {
                "INTEGER" | "BOOLEAN" => Value::Int(row.try_get_unchecked::<i64, _>(i)?),
                "REAL" | "NUMERIC" => Value::Float(row.try_get_unchecked::<f64, _>(i)?),
                "BLOB" => Value::Blob(row.try_get_unchecked::<Vec<u8>, _>(i)?),
                _ => Value::Text(row.try_get_unchecked::<String, _>(i)?),
            }
        };
        out.insert(String::from(column.name()), value);
    }
    Ok(out)
}

/// Lazily opened connections keyed by logical name.
#[derive(Debug, Clone)]
pub struct ConnectionRegistry {
    inner: Arc<RegistryInner>,
}

#[derive(Debug)]
struct RegistryInner {
    config: DatabaseConfig,
    connections: Mutex<HashMap<String, Arc<Connection>>>,
}

impl ConnectionRegistry {
    /// Creates a registry; nothing is opened until first use.
    #[must_use]
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                config,
                connections: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Creates a registry from the `database` section of a [`Config`].
    ///
    /// # Errors
    ///
    /// Returns [`OrmError::Config`] when the section is missing or malformed.
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config.database()?))
    }

    /// A registry whose `default` connection is an in-memory database.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(DatabaseConfig::in_memory())
    }

    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.inner.config
    }

    /// Returns the named connection, opening it on first use.
    ///
    /// `default` resolves to the configured default name.
    ///
    /// # Errors
    ///
    /// [`OrmError::ConnectionUnavailable`] for unknown names, unsupported
    /// drivers and open failures. Nothing is retried.
    pub async fn connection(&self, name: &str) -> Result<Arc<Connection>> {
        let resolved = self.inner.config.resolve_name(name);
        let mut connections = self.inner.connections.lock().await;
        if let Some(connection) = connections.get(resolved) {
            return Ok(Arc::clone(connection));
        }

        let settings =
            self.inner
                .config
                .connections
                .get(resolved)
                .ok_or_else(|| OrmError::ConnectionUnavailable {
                    name: String::from(resolved),
                    reason: String::from("no such connection is configured"),
                })?;
        let connection = Arc::new(Connection::open(resolved, settings).await?);
        connections.insert(String::from(resolved), Arc::clone(&connection));
        Ok(connection)
    }

    /// Registers an externally created pool under `name`, replacing any
    /// connection already cached for it.
    pub async fn register_pool(&self, name: &str, pool: SqlitePool) -> Arc<Connection> {
        let resolved = self.inner.config.resolve_name(name);
        let connection = Arc::new(Connection::new(resolved, pool));
        self.inner
            .connections
            .lock()
            .await
            .insert(String::from(resolved), Arc::clone(&connection));
        connection
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_connection_is_cached() {
        let registry = ConnectionRegistry::in_memory();
        let first = registry.connection("default").await.unwrap();
        first
            .execute_script("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .await
            .unwrap();

        let again = registry.connection("default").await.unwrap();
        assert!(Arc::ptr_eq(&first, &again));
        // Same in-memory database: the table is still there.
        let rows = again
            .select(&Statement::new(String::from("SELECT * FROM t"), Vec::new()))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_connection() {
        let registry = ConnectionRegistry::in_memory();
        let err = registry.connection("reporting").await.unwrap_err();
        assert!(matches!(
            err,
            OrmError::ConnectionUnavailable { ref name, .. } if name == "reporting"
        ));
    }

    #[tokio::test]
    async fn test_unsupported_driver() {
        let mut config = ConnectionConfig::sqlite(":memory:");
        config.driver = String::from("mysql");
        let registry = ConnectionRegistry::new(DatabaseConfig::default().with_connection("default", config));
        let err = registry.connection("default").await.unwrap_err();
        assert!(matches!(err, OrmError::ConnectionUnavailable { .. }));
    }

    #[tokio::test]
    async fn test_storage_classes_decode() {
        let registry = ConnectionRegistry::in_memory();
        let conn = registry.connection("default").await.unwrap();
        let rows = conn
            .select(&Statement::new(
                String::from("SELECT 1 AS i, 2.5 AS f, 'x' AS t, X'00FF' AS b, NULL AS n, ? AS bound"),
                vec![Value::Bool(true)],
            ))
            .await
            .unwrap();
        let row = &rows[0];
        assert_eq!(row["i"], Value::Int(1));
        assert_eq!(row["f"], Value::Float(2.5));
        assert_eq!(row["t"], Value::from("x"));
        assert_eq!(row["b"], Value::Blob(vec![0x00, 0xFF]));
        assert_eq!(row["n"], Value::Null);
        assert_eq!(row["bound"], Value::Int(1));
        assert_eq!(conn.statement_count(), 1);
    }

    #[tokio::test]
    async fn test_execute_reports_last_insert_id() {
        let registry = ConnectionRegistry::in_memory();
        let conn = registry.connection("default").await.unwrap();
        conn.execute_script("CREATE TABLE t (id INTEGER PRIMARY KEY, name TEXT)")
            .await
            .unwrap();
        let result = conn
            .execute(&Statement::new(
                String::from("INSERT INTO t (name) VALUES (?)"),
                vec![Value::from("a")],
            ))
            .await
            .unwrap();
        assert_eq!(result.rows_affected, 1);
        assert_eq!(result.last_insert_id, 1);
    }
}
