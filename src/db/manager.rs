//! Named, cached connections.
//!
//! The manager resolves configuration, builds the connection string, and keeps
//! one [`ConnectionAdapter`] per caller-supplied name. It is not a pool: there
//! is no size limit, idle eviction or health checking.

use crate::config::{self, ConfigOverrides, ConfigSource, DbConfig, ProcessEnv};
use crate::db::adapter::ConnectionAdapter;
use crate::db::driver::{ConnectRequest, Connector, NativeConnection};
use crate::db::dsn::Dsn;
use crate::db::sqlx_driver::SqlxConnector;
use crate::error::{DbError, DbResult, ErrorContext, LastError};
use crate::models::{MANAGER_TYPE, PoolStats, PoolStatsConfig};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Name used when callers do not pick one.
pub const DEFAULT_CONNECTION: &str = "default";

/// Adapter type handed out by a manager using connector `K`.
pub type Adapter<K> = ConnectionAdapter<<K as Connector>::Connection>;

/// Emit a lifecycle event: `info` in the dev environment, `debug` otherwise.
macro_rules! lifecycle {
    ($dev:expr, $($arg:tt)+) => {
        if $dev {
            info!($($arg)+);
        } else {
            debug!($($arg)+);
        }
    };
}

struct ManagerState<C> {
    connections: HashMap<String, Arc<ConnectionAdapter<C>>>,
    config: DbConfig,
    /// Memoized connection string, cleared whenever `config` changes
    dsn: Option<String>,
    overridden: bool,
    initialized: bool,
    environment: String,
    error: LastError,
}

impl<C> ManagerState<C> {
    fn is_dev(&self) -> bool {
        self.environment == config::DEV_ENVIRONMENT
    }

    fn dsn(&mut self) -> String {
        self.dsn
            .get_or_insert_with(|| Dsn::from_config(&self.config).to_string())
            .clone()
    }

    /// Load configuration from `source`. On failure the defaults are installed
    /// and the manager is marked uninitialized.
    fn load(&mut self, source: &dyn ConfigSource) -> DbResult<()> {
        self.environment = config::environment_label(source);
        self.overridden = false;
        self.dsn = None;
        match DbConfig::from_source(source) {
            Ok(config) => {
                self.config = config;
                self.initialized = true;
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "Failed to initialize connection manager");
                self.config = DbConfig::default();
                self.initialized = false;
                self.error.record(&e);
                Err(e)
            }
        }
    }
}

impl<C: NativeConnection> ManagerState<C> {
    async fn release_all(&mut self) {
        let dev = self.is_dev();
        let count = self.connections.len();
        for (name, adapter) in self.connections.drain() {
            adapter.release().await;
            lifecycle!(dev, connection = %name, "Released database connection");
        }
        if count > 0 {
            lifecycle!(dev, count = count, "Connection cache cleared");
        }
    }
}

/// Creates connections on demand and caches them by name.
pub struct ConnectionManager<K: Connector> {
    connector: K,
    source: Arc<dyn ConfigSource>,
    state: Mutex<ManagerState<K::Connection>>,
}

impl<K: Connector> std::fmt::Debug for ConnectionManager<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager").finish_non_exhaustive()
    }
}

impl ConnectionManager<SqlxConnector> {
    /// Create a sqlx-backed manager configured from the process environment.
    pub fn from_env() -> Self {
        Self::new(SqlxConnector::new(), Arc::new(ProcessEnv))
    }
}

/// The process-wide manager, created on first access.
///
/// Use [`ConnectionManager::reset`] to rebuild it from the environment.
pub fn shared() -> &'static ConnectionManager<SqlxConnector> {
    static SHARED: OnceLock<ConnectionManager<SqlxConnector>> = OnceLock::new();
    SHARED.get_or_init(ConnectionManager::from_env)
}

impl<K: Connector> ConnectionManager<K> {
    /// Create a manager. Configuration errors leave it uninitialized with the
    /// error recorded; check [`is_initialized`](Self::is_initialized).
    pub fn new(connector: K, source: Arc<dyn ConfigSource>) -> Self {
        let mut state = ManagerState {
            connections: HashMap::new(),
            config: DbConfig::default(),
            dsn: None,
            overridden: false,
            initialized: false,
            environment: config::DEFAULT_ENVIRONMENT.to_string(),
            error: LastError::default(),
        };
        if state.load(source.as_ref()).is_ok() {
            lifecycle!(
                state.is_dev(),
                driver = %state.config.driver,
                environment = %state.environment,
                "Connection manager initialized"
            );
        }
        Self {
            connector,
            source,
            state: Mutex::new(state),
        }
    }

    /// Get the connection cached under `name`, opening it if needed.
    ///
    /// Repeated calls with the same name return the same adapter until it is
    /// released or the configuration changes.
    pub async fn get_connection(&self, name: &str) -> DbResult<Arc<Adapter<K>>> {
        let mut state = self.state.lock().await;
        state.error.clear();

        if let Some(adapter) = state.connections.get(name) {
            return Ok(Arc::clone(adapter));
        }

        if !state.initialized {
            let err = DbError::configuration("Connection manager is not initialized");
            state.error.record(&err);
            return Err(err);
        }

        let dsn = state.dsn();
        let request = ConnectRequest::new(&state.config, dsn);
        // The lock is held across the connect so a name is never opened twice.
        match self.connector.connect(&request).await {
            Ok(connection) => {
                let adapter = Arc::new(ConnectionAdapter::new(Some(connection)));
                state
                    .connections
                    .insert(name.to_string(), Arc::clone(&adapter));
                lifecycle!(
                    state.is_dev(),
                    connection = %name,
                    driver = %state.config.driver,
                    cached = state.connections.len(),
                    "Created database connection"
                );
                Ok(adapter)
            }
            Err(e) => {
                let mut context = ErrorContext::new();
                context.insert("connection_name".to_string(), json!(name));
                context.insert(
                    "error_code".to_string(),
                    json!(e.sql_state().unwrap_or("connect_failed")),
                );
                let message = format!("Failed to create database connection: {}", e);
                state.error.set(Some(&message), &context);
                warn!(
                    connection = %name,
                    driver = %state.config.driver,
                    error = %e,
                    "Failed to create database connection"
                );
                Err(e)
            }
        }
    }

    /// Get the connection named [`DEFAULT_CONNECTION`].
    pub async fn default_connection(&self) -> DbResult<Arc<Adapter<K>>> {
        self.get_connection(DEFAULT_CONNECTION).await
    }

    /// Remove `adapter` from the cache and drop its handle. Adapters this
    /// manager does not hold are ignored.
    pub async fn release_connection(&self, adapter: &Arc<Adapter<K>>) {
        let mut state = self.state.lock().await;
        let name = state
            .connections
            .iter()
            .find(|(_, cached)| Arc::ptr_eq(cached, adapter))
            .map(|(name, _)| name.clone());

        let Some(name) = name else {
            debug!("Release requested for an adapter that is not cached");
            return;
        };
        if let Some(cached) = state.connections.remove(&name) {
            cached.release().await;
            lifecycle!(state.is_dev(), connection = %name, "Released database connection");
        }
    }

    /// Replace the configuration with `overrides` applied over the defaults.
    ///
    /// Every cached connection is released. Invalid overrides change nothing.
    pub async fn set_config(&self, overrides: ConfigOverrides) -> DbResult<()> {
        let mut state = self.state.lock().await;
        let config = match DbConfig::from_overrides(overrides) {
            Ok(config) => config,
            Err(e) => {
                state.error.record(&e);
                return Err(e);
            }
        };

        state.config = config;
        state.overridden = true;
        state.initialized = true;
        state.dsn = None;
        state.release_all().await;
        info!(driver = %state.config.driver, "Database configuration overridden");
        Ok(())
    }

    /// Discard overrides and reload the configuration from the source.
    ///
    /// Every cached connection is released.
    pub async fn reset_config(&self) -> DbResult<()> {
        let mut state = self.state.lock().await;
        state.release_all().await;
        state.load(self.source.as_ref())?;
        info!(driver = %state.config.driver, "Database configuration reset");
        Ok(())
    }

    /// Release every cached connection and clear the cache.
    pub async fn close_all(&self) {
        self.state.lock().await.release_all().await;
    }

    /// Tear down and re-initialize from the source, as if newly constructed.
    pub async fn reset(&self) -> DbResult<()> {
        let mut state = self.state.lock().await;
        state.release_all().await;
        state.error.clear();
        state.load(self.source.as_ref())
    }

    /// Read-only status snapshot.
    pub async fn pool_stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        PoolStats {
            manager_type: MANAGER_TYPE,
            environment: state.environment.clone(),
            cached_connections: state.connections.len(),
            initialized: state.initialized,
            persistent_connections: state.config.persistent,
            config: PoolStatsConfig {
                driver: state.config.driver,
                host: state.config.host.clone(),
                database: state.config.database.clone(),
                timeout: state.config.timeout_secs,
            },
        }
    }

    /// The connection string for the current configuration (memoized).
    pub async fn connection_string(&self) -> String {
        self.state.lock().await.dsn()
    }

    /// A copy of the active configuration.
    pub async fn config(&self) -> DbConfig {
        self.state.lock().await.config.clone()
    }

    /// Whether the active configuration came from `set_config`.
    pub async fn is_overridden(&self) -> bool {
        self.state.lock().await.overridden
    }

    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    pub async fn has_connection(&self, name: &str) -> bool {
        self.state.lock().await.connections.contains_key(name)
    }

    pub async fn error(&self) -> Option<String> {
        self.state.lock().await.error.get()
    }

    pub async fn set_error(&self, message: Option<&str>, context: &ErrorContext) {
        self.state.lock().await.error.set(message, context);
    }

    pub async fn clear_error(&self) {
        self.state.lock().await.error.clear();
    }

    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.initialized
    }
}

impl<K: Connector> Drop for ConnectionManager<K> {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        for (name, adapter) in state.connections.drain() {
            if !adapter.try_release() {
                warn!(connection = %name, "Adapter busy during teardown; handle dropped with it");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ENV_APP_ENV, ENV_DATABASE, ENV_DRIVER, ENV_HOST, ENV_PORT};
    use crate::models::Driver;

    fn manager(pairs: &[(&str, &str)]) -> ConnectionManager<SqlxConnector> {
        let source: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ConnectionManager::new(SqlxConnector::new(), Arc::new(source))
    }

    fn sqlite_memory() -> ConnectionManager<SqlxConnector> {
        manager(&[(ENV_DRIVER, "sqlite"), (ENV_DATABASE, ":memory:")])
    }

    #[tokio::test]
    async fn test_initial_stats() {
        let manager = manager(&[]);
        let stats = manager.pool_stats().await;
        assert_eq!(stats.manager_type, MANAGER_TYPE);
        assert_eq!(stats.environment, "production");
        assert_eq!(stats.cached_connections, 0);
        assert!(stats.initialized);
        assert!(stats.persistent_connections);
        assert_eq!(stats.config.driver, Driver::MySQL);
        assert_eq!(stats.config.host, "localhost");
        assert_eq!(stats.config.database, "gemvc_db");
        assert_eq!(stats.config.timeout, 5);
    }

    #[tokio::test]
    async fn test_invalid_source_leaves_manager_uninitialized() {
        let manager = manager(&[(ENV_PORT, "not-a-port")]);
        assert!(!manager.is_initialized().await);
        assert!(manager.error().await.unwrap().contains(ENV_PORT));

        let err = manager.get_connection("main").await.unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
        assert_eq!(manager.connection_count().await, 0);
    }

    #[tokio::test]
    async fn test_connection_string_is_memoized_and_invalidated() {
        let manager = manager(&[(ENV_HOST, "db1")]);
        assert_eq!(
            manager.connection_string().await,
            "mysql:host=db1;port=3306;dbname=gemvc_db;charset=utf8mb4"
        );

        manager
            .set_config(ConfigOverrides::sqlite_memory())
            .await
            .unwrap();
        assert_eq!(manager.connection_string().await, "sqlite::memory:");
        assert!(manager.is_overridden().await);

        manager.reset_config().await.unwrap();
        assert!(manager.connection_string().await.contains("host=db1"));
        assert!(!manager.is_overridden().await);
    }

    #[tokio::test]
    async fn test_same_name_returns_same_adapter() {
        let manager = sqlite_memory();
        let first = manager.get_connection("main").await.unwrap();
        let second = manager.get_connection("main").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        let other = manager.get_connection("reports").await.unwrap();
        assert!(!Arc::ptr_eq(&first, &other));
        assert_eq!(manager.connection_count().await, 2);
    }

    #[tokio::test]
    async fn test_release_connection() {
        let manager = sqlite_memory();
        let adapter = manager.get_connection("main").await.unwrap();
        manager.release_connection(&adapter).await;

        assert!(!manager.has_connection("main").await);
        assert!(adapter.connection().await.is_none());

        // A second release is a no-op
        manager.release_connection(&adapter).await;
        assert_eq!(manager.error().await, None);

        let fresh = manager.get_connection("main").await.unwrap();
        assert!(!Arc::ptr_eq(&adapter, &fresh));
    }

    #[tokio::test]
    async fn test_invalid_override_changes_nothing() {
        let manager = sqlite_memory();
        manager.get_connection("main").await.unwrap();

        let err = manager
            .set_config(ConfigOverrides {
                database: Some(String::new()),
                ..ConfigOverrides::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::Configuration { .. }));
        assert_eq!(manager.connection_count().await, 1);
        assert_eq!(manager.config().await.driver, Driver::SQLite);
    }

    #[tokio::test]
    async fn test_close_all_releases_handles() {
        let manager = sqlite_memory();
        let a = manager.get_connection("a").await.unwrap();
        let b = manager.get_connection("b").await.unwrap();
        manager.close_all().await;

        assert_eq!(manager.connection_count().await, 0);
        assert!(!a.is_initialized().await);
        assert!(!b.is_initialized().await);
    }

    #[tokio::test]
    async fn test_reset_rebuilds_from_source() {
        let manager = manager(&[
            (ENV_DRIVER, "sqlite"),
            (ENV_DATABASE, ":memory:"),
            (ENV_APP_ENV, "dev"),
        ]);
        manager.get_connection("main").await.unwrap();
        manager
            .set_config(ConfigOverrides {
                host: Some("elsewhere".to_string()),
                ..ConfigOverrides::default()
            })
            .await
            .unwrap();

        manager.reset().await.unwrap();
        let stats = manager.pool_stats().await;
        assert_eq!(stats.environment, "dev");
        assert_eq!(stats.config.driver, Driver::SQLite);
        assert_eq!(stats.cached_connections, 0);
        assert!(stats.initialized);
    }

    #[tokio::test]
    async fn test_drop_releases_cached_adapters() {
        let manager = sqlite_memory();
        let adapter = manager.get_connection("main").await.unwrap();
        drop(manager);
        assert!(adapter.connection().await.is_none());
    }
}
