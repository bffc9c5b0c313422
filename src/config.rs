//! Configuration handling.
//!
//! Database settings are resolved from a [`ConfigSource`] (the process
//! environment in production) or from programmatic [`ConfigOverrides`]. The
//! binary's own flags are parsed with clap.

use crate::error::{DbError, DbResult};
use crate::models::Driver;
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::time::Duration;

pub const ENV_DRIVER: &str = "DB_DRIVER";
pub const ENV_HOST: &str = "DB_HOST";
pub const ENV_PORT: &str = "DB_PORT";
pub const ENV_DATABASE: &str = "DB_NAME";
pub const ENV_USERNAME: &str = "DB_USER";
pub const ENV_PASSWORD: &str = "DB_PASSWORD";
pub const ENV_CHARSET: &str = "DB_CHARSET";
pub const ENV_COLLATION: &str = "DB_COLLATION";
pub const ENV_PERSISTENT: &str = "DB_PERSISTENT_CONNECTIONS";
pub const ENV_TIMEOUT: &str = "DB_CONNECTION_TIMEOUT";
pub const ENV_APP_ENV: &str = "APP_ENV";

pub const DEFAULT_DRIVER: Driver = Driver::MySQL;
pub const DEFAULT_HOST: &str = "localhost";
pub const DEFAULT_PORT: u16 = 3306;
pub const DEFAULT_DATABASE: &str = "gemvc_db";
pub const DEFAULT_USERNAME: &str = "root";
pub const DEFAULT_CHARSET: &str = "utf8mb4";
pub const DEFAULT_COLLATION: &str = "utf8mb4_unicode_ci";
pub const DEFAULT_PERSISTENT: bool = true;
pub const DEFAULT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_ENVIRONMENT: &str = "production";

/// Environment label that turns on connection lifecycle diagnostics.
pub const DEV_ENVIRONMENT: &str = "dev";

/// Exact, case-sensitive tokens accepted as "enabled" for the persistent flag.
const TRUTHY_TOKENS: &[&str] = &["1", "true", "yes"];

/// Source of raw configuration values.
pub trait ConfigSource: Send + Sync {
    fn var(&self, key: &str) -> Option<String>;
}

/// Reads configuration from the process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessEnv;

impl ConfigSource for ProcessEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

impl ConfigSource for HashMap<String, String> {
    fn var(&self, key: &str) -> Option<String> {
        self.get(key).cloned()
    }
}

/// Parse the persistent-connection flag.
pub fn parse_persistent_flag(raw: &str) -> bool {
    TRUTHY_TOKENS.contains(&raw)
}

/// The environment label of a source.
pub fn environment_label(source: &dyn ConfigSource) -> String {
    source
        .var(ENV_APP_ENV)
        .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
}

/// Resolved database configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct DbConfig {
    pub driver: Driver,
    pub host: String,
    pub port: u16,
    /// Database name, file path, or `:memory:` for SQLite
    pub database: String,
    pub username: String,
    /// Sensitive - never logged
    pub password: String,
    pub charset: String,
    pub collation: String,
    pub persistent: bool,
    pub timeout_secs: u64,
}

impl std::fmt::Debug for DbConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DbConfig")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("username", &self.username)
            .field("password", &"***")
            .field("charset", &self.charset)
            .field("collation", &self.collation)
            .field("persistent", &self.persistent)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            driver: DEFAULT_DRIVER,
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            database: DEFAULT_DATABASE.to_string(),
            username: DEFAULT_USERNAME.to_string(),
            password: String::new(),
            charset: DEFAULT_CHARSET.to_string(),
            collation: DEFAULT_COLLATION.to_string(),
            persistent: DEFAULT_PERSISTENT,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl DbConfig {
    /// Build and validate a configuration from raw source values.
    pub fn from_source(source: &dyn ConfigSource) -> DbResult<Self> {
        let driver = match non_blank(source, ENV_DRIVER) {
            Some(raw) => raw.parse()?,
            None => DEFAULT_DRIVER,
        };
        let port = match non_blank(source, ENV_PORT) {
            Some(raw) => parse_number(ENV_PORT, &raw)?,
            None => default_port(driver),
        };
        let timeout_secs = match non_blank(source, ENV_TIMEOUT) {
            Some(raw) => parse_number(ENV_TIMEOUT, &raw)?,
            None => DEFAULT_TIMEOUT_SECS,
        };

        let defaults = Self::default();
        let config = Self {
            driver,
            host: source.var(ENV_HOST).unwrap_or(defaults.host),
            port,
            database: source.var(ENV_DATABASE).unwrap_or(defaults.database),
            username: source.var(ENV_USERNAME).unwrap_or(defaults.username),
            password: source.var(ENV_PASSWORD).unwrap_or(defaults.password),
            charset: source.var(ENV_CHARSET).unwrap_or(defaults.charset),
            collation: source.var(ENV_COLLATION).unwrap_or(defaults.collation),
            persistent: source
                .var(ENV_PERSISTENT)
                .map_or(DEFAULT_PERSISTENT, |raw| parse_persistent_flag(&raw)),
            timeout_secs,
        };
        config.validate()?;
        Ok(config)
    }

    /// Merge overrides over the documented defaults (not over any previous
    /// configuration) and validate the result.
    pub fn from_overrides(overrides: ConfigOverrides) -> DbResult<Self> {
        let defaults = Self::default();
        let driver = overrides.driver.unwrap_or(defaults.driver);
        let config = Self {
            driver,
            host: overrides.host.unwrap_or(defaults.host),
            port: overrides.port.unwrap_or_else(|| default_port(driver)),
            database: overrides.database.unwrap_or(defaults.database),
            username: overrides.username.unwrap_or(defaults.username),
            password: overrides.password.unwrap_or(defaults.password),
            charset: overrides.charset.unwrap_or(defaults.charset),
            collation: overrides.collation.unwrap_or(defaults.collation),
            persistent: overrides.persistent.unwrap_or(defaults.persistent),
            timeout_secs: overrides.timeout_secs.unwrap_or(defaults.timeout_secs),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration and return an error if invalid.
    pub fn validate(&self) -> DbResult<()> {
        if self.database.trim().is_empty() {
            return Err(DbError::configuration("Database name must not be empty"));
        }
        if self.timeout_secs == 0 {
            return Err(DbError::configuration(
                "Connection timeout must be greater than 0",
            ));
        }
        if self.driver.is_network() {
            if self.host.trim().is_empty() {
                return Err(DbError::configuration(format!(
                    "Host is required for the {} driver",
                    self.driver.display_name()
                )));
            }
            if self.port == 0 {
                return Err(DbError::configuration("Port must be greater than 0"));
            }
            // Both are written into the `key=value;` connection string.
            for (name, value) in [("host", &self.host), ("database", &self.database)] {
                if value.contains([';', '=']) {
                    return Err(DbError::configuration(format!(
                        "Invalid {} '{}': ';' and '=' are not allowed",
                        name, value
                    )));
                }
            }
        }
        // Both end up inside session-init SQL.
        for (name, value) in [("charset", &self.charset), ("collation", &self.collation)] {
            if value.is_empty() || !value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(DbError::configuration(format!(
                    "Invalid {} '{}': only letters, digits and '_' are allowed",
                    name, value
                )));
            }
        }
        Ok(())
    }

    /// Get the connect timeout as a Duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_port(driver: Driver) -> u16 {
    driver.default_port().unwrap_or(DEFAULT_PORT)
}

/// Blank values count as unset, so `DB_PORT=` falls back to the default.
fn non_blank(source: &dyn ConfigSource, key: &str) -> Option<String> {
    source.var(key).filter(|raw| !raw.trim().is_empty())
}

fn parse_number<T: std::str::FromStr>(key: &str, raw: &str) -> DbResult<T> {
    raw.trim()
        .parse()
        .map_err(|_| DbError::configuration(format!("Invalid {} value '{}'", key, raw)))
}

/// Partial configuration applied with `ConnectionManager::set_config`.
///
/// Unset fields fall back to the documented defaults.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub driver: Option<Driver>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub charset: Option<String>,
    pub collation: Option<String>,
    pub persistent: Option<bool>,
    pub timeout_secs: Option<u64>,
}

impl ConfigOverrides {
    /// Overrides selecting an in-memory SQLite database.
    pub fn sqlite_memory() -> Self {
        Self::sqlite(crate::models::MEMORY_DATABASE)
    }

    /// Overrides selecting a SQLite database file.
    pub fn sqlite(path: impl Into<String>) -> Self {
        Self {
            driver: Some(Driver::SQLite),
            database: Some(path.into()),
            ..Self::default()
        }
    }
}

/// Command-line interface of the `dbconn` binary.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "dbconn",
    about = "Inspect and verify named database connections configured through DB_* variables",
    version,
    author
)]
pub struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "LOG_LEVEL")]
    pub log_level: String,

    /// Enable JSON logging format
    #[arg(long, env = "LOG_JSON")]
    pub json_logs: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Print the manager status snapshot as JSON without connecting
    Stats,
    /// Open a named connection, begin and roll back a transaction, print status
    Check {
        /// Connection name
        #[arg(default_value = "default")]
        name: String,
    },
}
