//! Contract between the connection layer and a database driver.
//!
//! A [`Connector`] opens raw connections from a [`ConnectRequest`]; each raw
//! connection implements [`NativeConnection`] so adapters can drive its
//! transactions. The production implementation lives in `sqlx_driver`.

use crate::config::DbConfig;
use crate::db::dsn::Dsn;
use crate::error::DbResult;
use crate::models::Driver;
use std::future::Future;
use std::time::Duration;

/// Transaction control offered by a raw driver connection.
pub trait NativeConnection: Send + 'static {
    fn begin_transaction(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn commit(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    fn rollback(&mut self) -> impl Future<Output = DbResult<()>> + Send;

    /// Whether the driver itself considers a transaction open, including ones
    /// started outside the adapter.
    fn in_transaction_natively(&self) -> bool;
}

/// Opens raw connections.
pub trait Connector: Send + Sync + 'static {
    type Connection: NativeConnection;

    fn connect(
        &self,
        request: &ConnectRequest,
    ) -> impl Future<Output = DbResult<Self::Connection>> + Send;
}

/// Username and password for network drivers.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    /// Sensitive - never logged
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Driver options assembled for one connect call.
///
/// Errors always come back as `Result` values and rows are read by column
/// name, so there is no error-mode or fetch-mode switch to carry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandleOptions {
    /// Network drivers only
    pub connect_timeout: Option<Duration>,
    /// Network drivers only. Advisory under sqlx: it is recorded on the
    /// connection but does not change how the connection is opened.
    pub persistent: Option<bool>,
    /// Network drivers only; always `Some(false)` (server-side prepares)
    pub emulate_prepares: Option<bool>,
    /// Statements run once right after connecting
    pub session_init: Vec<String>,
}

/// Everything a connector needs to open one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub dsn: String,
    /// `None` for drivers opened without credentials (SQLite)
    pub credentials: Option<Credentials>,
    pub options: HandleOptions,
}

impl ConnectRequest {
    /// Assemble the request for `config`, reusing an already built DSN.
    pub fn new(config: &DbConfig, dsn: String) -> Self {
        if !config.driver.is_network() {
            return Self {
                dsn,
                credentials: None,
                options: HandleOptions::default(),
            };
        }

        let mut options = HandleOptions {
            connect_timeout: Some(config.timeout()),
            persistent: Some(config.persistent),
            emulate_prepares: Some(false),
            session_init: Vec::new(),
        };
        if config.driver == Driver::MySQL {
            options.session_init = mysql_session_init(config);
        }

        Self {
            dsn,
            credentials: Some(Credentials {
                username: config.username.clone(),
                password: config.password.clone(),
            }),
            options,
        }
    }

    /// Assemble the request for `config`, building its DSN.
    pub fn from_config(config: &DbConfig) -> Self {
        Self::new(config, Dsn::from_config(config).to_string())
    }
}

/// Character set, collation and strict-mode enforcement for MySQL sessions.
fn mysql_session_init(config: &DbConfig) -> Vec<String> {
    vec![
        format!(
            "SET NAMES '{}' COLLATE '{}'",
            config.charset, config.collation
        ),
        "SET SESSION sql_mode = 'STRICT_ALL_TABLES,NO_ZERO_IN_DATE,NO_ZERO_DATE,ERROR_FOR_DIVISION_BY_ZERO,NO_ENGINE_SUBSTITUTION'".to_string(),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mysql_request() {
        let config = DbConfig {
            password: "pw".to_string(),
            timeout_secs: 7,
            persistent: false,
            ..DbConfig::default()
        };
        let request = ConnectRequest::from_config(&config);

        assert_eq!(
            request.dsn,
            "mysql:host=localhost;port=3306;dbname=gemvc_db;charset=utf8mb4"
        );
        let credentials = request.credentials.as_ref().unwrap();
        assert_eq!(credentials.username, "root");
        assert_eq!(credentials.password, "pw");
        assert_eq!(request.options.connect_timeout, Some(Duration::from_secs(7)));
        assert_eq!(request.options.persistent, Some(false));
        assert_eq!(request.options.emulate_prepares, Some(false));
        assert_eq!(request.options.session_init.len(), 2);
        assert_eq!(
            request.options.session_init[0],
            "SET NAMES 'utf8mb4' COLLATE 'utf8mb4_unicode_ci'"
        );
        assert!(request.options.session_init[1].contains("STRICT_ALL_TABLES"));
    }

    #[test]
    fn test_postgres_request_has_no_session_init() {
        let config = DbConfig {
            driver: Driver::PostgreSQL,
            port: 5432,
            ..DbConfig::default()
        };
        let request = ConnectRequest::from_config(&config);
        assert!(request.dsn.starts_with("pgsql:host=localhost;port=5432;"));
        assert!(request.credentials.is_some());
        assert_eq!(request.options.persistent, Some(true));
        assert!(request.options.session_init.is_empty());
    }

    #[test]
    fn test_sqlite_request_omits_network_options() {
        let config = DbConfig {
            driver: Driver::SQLite,
            database: ":memory:".to_string(),
            ..DbConfig::default()
        };
        let request = ConnectRequest::from_config(&config);
        assert_eq!(request.dsn, "sqlite::memory:");
        assert!(request.credentials.is_none());
        assert_eq!(request.options, HandleOptions::default());
    }

    #[test]
    fn test_credentials_debug_masks_password() {
        let credentials = Credentials {
            username: "app".to_string(),
            password: "hunter2".to_string(),
        };
        assert!(!format!("{:?}", credentials).contains("hunter2"));
    }
}
