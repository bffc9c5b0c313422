//! sqlx-backed driver.
//!
//! Uses database-specific connections (MySqlConnection, PgConnection,
//! SqliteConnection) to keep full type support, the same way the pools are
//! split per database elsewhere in the sqlx ecosystem.

use crate::db::driver::{ConnectRequest, Connector, NativeConnection};
use crate::db::dsn::{Dsn, DsnTarget};
use crate::error::{DbError, DbResult};
use crate::models::Driver;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection};
use sqlx::postgres::{PgConnectOptions, PgConnection};
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection};
use sqlx::{ConnectOptions, Connection, Executor};
use std::str::FromStr;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Database-specific connection.
#[derive(Debug)]
pub enum SqlxHandle {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    SQLite(SqliteConnection),
}

/// A raw sqlx connection plus the transaction state the driver has seen.
#[derive(Debug)]
pub struct SqlxConnection {
    handle: SqlxHandle,
    in_transaction: bool,
    persistent: bool,
}

impl SqlxConnection {
    fn new(handle: SqlxHandle, persistent: bool) -> Self {
        Self {
            handle,
            in_transaction: false,
            persistent,
        }
    }

    /// Get the driver for this connection.
    pub fn driver(&self) -> Driver {
        match self.handle {
            SqlxHandle::MySql(_) => Driver::MySQL,
            SqlxHandle::Postgres(_) => Driver::PostgreSQL,
            SqlxHandle::SQLite(_) => Driver::SQLite,
        }
    }

    /// Whether the connection was opened with the persistent flag.
    pub fn is_persistent(&self) -> bool {
        self.persistent
    }

    /// Direct access to the underlying sqlx connection.
    pub fn handle_mut(&mut self) -> &mut SqlxHandle {
        &mut self.handle
    }

    /// Run one or more statements without parameters and return the number of
    /// affected rows.
    ///
    /// Transaction-control statements update the native transaction state.
    pub async fn execute(&mut self, sql: &str) -> DbResult<u64> {
        let affected = match &mut self.handle {
            SqlxHandle::MySql(conn) => {
                Executor::execute(&mut *conn, sqlx::raw_sql(sql))
                    .await?
                    .rows_affected()
            }
            SqlxHandle::Postgres(conn) => {
                Executor::execute(&mut *conn, sqlx::raw_sql(sql))
                    .await?
                    .rows_affected()
            }
            SqlxHandle::SQLite(conn) => {
                Executor::execute(&mut *conn, sqlx::raw_sql(sql))
                    .await?
                    .rows_affected()
            }
        };
        if let Some(active) = transaction_effect(sql) {
            self.in_transaction = active;
        }
        Ok(affected)
    }

    /// Fetch a single integer value, e.g. `SELECT COUNT(*) ...`.
    pub async fn fetch_i64(&mut self, sql: &str) -> DbResult<i64> {
        let value = match &mut self.handle {
            SqlxHandle::MySql(conn) => {
                sqlx::query_scalar::<_, i64>(sql)
                    .fetch_one(&mut *conn)
                    .await?
            }
            SqlxHandle::Postgres(conn) => {
                sqlx::query_scalar::<_, i64>(sql)
                    .fetch_one(&mut *conn)
                    .await?
            }
            SqlxHandle::SQLite(conn) => {
                sqlx::query_scalar::<_, i64>(sql)
                    .fetch_one(&mut *conn)
                    .await?
            }
        };
        Ok(value)
    }

    /// Close the connection gracefully.
    pub async fn close(self) -> DbResult<()> {
        match self.handle {
            SqlxHandle::MySql(conn) => conn.close().await?,
            SqlxHandle::Postgres(conn) => conn.close().await?,
            SqlxHandle::SQLite(conn) => conn.close().await?,
        }
        Ok(())
    }
}

impl NativeConnection for SqlxConnection {
    async fn begin_transaction(&mut self) -> DbResult<()> {
        self.execute("BEGIN").await.map(|_| ())
    }

    async fn commit(&mut self) -> DbResult<()> {
        self.execute("COMMIT").await.map(|_| ())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        self.execute("ROLLBACK").await.map(|_| ())
    }

    fn in_transaction_natively(&self) -> bool {
        self.in_transaction
    }
}

/// How a statement changes the transaction state: `Some(true)` opens one,
/// `Some(false)` ends one, `None` leaves it alone.
fn transaction_effect(sql: &str) -> Option<bool> {
    let mut words = sql
        .split_whitespace()
        .map(|w| w.trim_end_matches(';').to_ascii_uppercase());
    match words.next()?.as_str() {
        "BEGIN" => Some(true),
        "START" => (words.next().as_deref() == Some("TRANSACTION")).then_some(true),
        "COMMIT" | "END" | "ABORT" => Some(false),
        // ROLLBACK TO SAVEPOINT keeps the transaction open
        "ROLLBACK" => (!words.any(|w| w == "TO")).then_some(false),
        _ => None,
    }
}

/// Opens connections with sqlx from a connection string.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqlxConnector;

impl SqlxConnector {
    pub fn new() -> Self {
        Self
    }

    async fn open(&self, dsn: &Dsn, request: &ConnectRequest) -> DbResult<SqlxConnection> {
        let options = &request.options;
        if options.emulate_prepares == Some(true) {
            warn!("Client-side statement emulation is not available; using server-side prepares");
        }
        let persistent = options.persistent.unwrap_or(false);

        let handle = match (&dsn.driver, &dsn.target) {
            (Driver::SQLite, DsnTarget::Memory) => {
                let conn = SqliteConnectOptions::from_str("sqlite::memory:")?
                    .connect()
                    .await
                    .map_err(|e| connect_error(Driver::SQLite, e))?;
                SqlxHandle::SQLite(conn)
            }
            (Driver::SQLite, DsnTarget::File(path)) => {
                let conn = SqliteConnectOptions::new()
                    .filename(path)
                    .create_if_missing(true)
                    .connect()
                    .await
                    .map_err(|e| connect_error(Driver::SQLite, e))?;
                SqlxHandle::SQLite(conn)
            }
            (
                Driver::MySQL,
                DsnTarget::Network {
                    host,
                    port,
                    dbname,
                    charset,
                },
            ) => {
                let mut connect_options = MySqlConnectOptions::new()
                    .host(host)
                    .port(*port)
                    .database(dbname)
                    .charset(charset);
                if let Some(credentials) = &request.credentials {
                    connect_options = connect_options
                        .username(&credentials.username)
                        .password(&credentials.password);
                }
                let conn = connect_options
                    .connect()
                    .await
                    .map_err(|e| connect_error(Driver::MySQL, e))?;
                SqlxHandle::MySql(conn)
            }
            (
                Driver::PostgreSQL,
                DsnTarget::Network {
                    host, port, dbname, ..
                },
            ) => {
                let mut connect_options = PgConnectOptions::new()
                    .host(host)
                    .port(*port)
                    .database(dbname);
                if let Some(credentials) = &request.credentials {
                    connect_options = connect_options
                        .username(&credentials.username)
                        .password(&credentials.password);
                }
                let conn = connect_options
                    .connect()
                    .await
                    .map_err(|e| connect_error(Driver::PostgreSQL, e))?;
                SqlxHandle::Postgres(conn)
            }
            (driver, target) => {
                return Err(DbError::invalid_input(format!(
                    "Connection target {:?} is not valid for the {} driver",
                    target,
                    driver.display_name()
                )));
            }
        };

        let mut connection = SqlxConnection::new(handle, persistent);
        for statement in &options.session_init {
            connection.execute(statement).await?;
        }
        debug!(
            driver = %connection.driver(),
            persistent = persistent,
            session_init = options.session_init.len(),
            "Opened database connection"
        );
        Ok(connection)
    }
}

impl Connector for SqlxConnector {
    type Connection = SqlxConnection;

    async fn connect(&self, request: &ConnectRequest) -> DbResult<SqlxConnection> {
        let dsn: Dsn = request.dsn.parse()?;
        match request.options.connect_timeout {
            Some(limit) => timeout(limit, self.open(&dsn, request))
                .await
                .map_err(|_| DbError::timeout("connect", limit.as_secs()))?,
            None => self.open(&dsn, request).await,
        }
    }
}

/// Map a connect failure to an error with a helpful suggestion.
///
/// Server-reported errors keep their SQLSTATE.
fn connect_error(driver: Driver, error: sqlx::Error) -> DbError {
    if matches!(error, sqlx::Error::Database(_)) {
        return DbError::from(error);
    }

    let error_str = error.to_string().to_lowercase();
    let suggestion = if error_str.contains("connection refused") {
        format!(
            "Check that the {} server is running and accessible",
            driver.display_name()
        )
    } else if error_str.contains("authentication") || error_str.contains("password") {
        "Verify DB_USER and DB_PASSWORD".to_string()
    } else if error_str.contains("does not exist") || error_str.contains("unknown database") {
        "Check that DB_NAME names an existing database".to_string()
    } else if error_str.contains("tls") || error_str.contains("ssl") {
        "Check TLS/SSL configuration or try disabling it".to_string()
    } else {
        match driver {
            Driver::SQLite => "Verify the file path exists and is accessible".to_string(),
            _ => "Verify DB_HOST and DB_PORT".to_string(),
        }
    };

    DbError::connection(format!("Failed to connect: {}", error), suggestion)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ConfigOverrides, DbConfig};
    use std::time::Duration;

    #[test]
    fn test_transaction_effect() {
        assert_eq!(transaction_effect("BEGIN"), Some(true));
        assert_eq!(transaction_effect("  begin immediate;"), Some(true));
        assert_eq!(transaction_effect("START TRANSACTION"), Some(true));
        assert_eq!(transaction_effect("START SLAVE"), None);
        assert_eq!(transaction_effect("COMMIT;"), Some(false));
        assert_eq!(transaction_effect("END"), Some(false));
        assert_eq!(transaction_effect("ROLLBACK"), Some(false));
        assert_eq!(transaction_effect("ROLLBACK TO SAVEPOINT sp1"), None);
        assert_eq!(transaction_effect("SELECT 1"), None);
        assert_eq!(transaction_effect(""), None);
    }

    #[tokio::test]
    async fn test_connect_sqlite_memory() {
        let config = DbConfig::from_overrides(ConfigOverrides::sqlite_memory()).unwrap();
        let mut conn = SqlxConnector::new()
            .connect(&ConnectRequest::from_config(&config))
            .await
            .unwrap();
        assert_eq!(conn.driver(), Driver::SQLite);
        assert!(!conn.is_persistent());
        assert_eq!(conn.fetch_i64("SELECT 41 + 1").await.unwrap(), 42);
        conn.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_raw_begin_is_seen_natively() {
        let config = DbConfig::from_overrides(ConfigOverrides::sqlite_memory()).unwrap();
        let mut conn = SqlxConnector::new()
            .connect(&ConnectRequest::from_config(&config))
            .await
            .unwrap();
        conn.execute("CREATE TABLE t (id INTEGER)").await.unwrap();
        assert!(!conn.in_transaction_natively());
        conn.execute("BEGIN").await.unwrap();
        assert!(conn.in_transaction_natively());
        conn.execute("ROLLBACK").await.unwrap();
        assert!(!conn.in_transaction_natively());
    }

    #[tokio::test]
    async fn test_connection_works_on_spawned_task() {
        let config = DbConfig::from_overrides(ConfigOverrides::sqlite_memory()).unwrap();
        let task = tokio::spawn(async move {
            let mut conn = SqlxConnector::new()
                .connect(&ConnectRequest::from_config(&config))
                .await?;
            conn.begin_transaction().await?;
            conn.execute("CREATE TABLE t (id INTEGER)").await?;
            conn.commit().await?;
            Ok::<_, DbError>(conn.in_transaction_natively())
        });
        assert!(!task.await.unwrap().unwrap());
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_native_state() {
        let config = DbConfig::from_overrides(ConfigOverrides::sqlite_memory()).unwrap();
        let mut conn = SqlxConnector::new()
            .connect(&ConnectRequest::from_config(&config))
            .await
            .unwrap();
        // COMMIT without BEGIN fails in SQLite
        assert!(conn.commit().await.is_err());
        assert!(!conn.in_transaction_natively());
    }

    #[tokio::test]
    async fn test_connect_refused_is_connection_error() {
        let config = DbConfig::from_overrides(ConfigOverrides {
            host: Some("127.0.0.1".to_string()),
            port: Some(1),
            timeout_secs: Some(2),
            ..ConfigOverrides::default()
        })
        .unwrap();
        let request = ConnectRequest::from_config(&config);
        assert_eq!(request.options.connect_timeout, Some(Duration::from_secs(2)));

        let err = SqlxConnector::new().connect(&request).await.unwrap_err();
        assert!(
            matches!(err, DbError::Connection { .. } | DbError::Timeout { .. }),
            "unexpected error: {:?}",
            err
        );
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_malformed_dsn_rejected() {
        let request = ConnectRequest {
            dsn: "nonsense".to_string(),
            credentials: None,
            options: Default::default(),
        };
        let err = SqlxConnector::new().connect(&request).await.unwrap_err();
        assert!(matches!(err, DbError::InvalidInput { .. }));
    }
}
