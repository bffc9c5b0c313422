//! Driver-specific connection strings.
//!
//! Network drivers use `<driver>:host=<host>;port=<port>;dbname=<db>;charset=<cs>`,
//! SQLite uses `sqlite:<path>` or `sqlite::memory:`.

use crate::config::DbConfig;
use crate::error::{DbError, DbResult};
use crate::models::{Driver, MEMORY_DATABASE};
use std::str::FromStr;

/// Where a connection string points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DsnTarget {
    Memory,
    File(String),
    Network {
        host: String,
        port: u16,
        dbname: String,
        charset: String,
    },
}

/// A parsed connection string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dsn {
    pub driver: Driver,
    pub target: DsnTarget,
}

impl Dsn {
    /// Derive the connection string for a configuration.
    pub fn from_config(config: &DbConfig) -> Self {
        let target = match config.driver {
            Driver::SQLite if config.database == MEMORY_DATABASE => DsnTarget::Memory,
            Driver::SQLite => DsnTarget::File(config.database.clone()),
            _ => DsnTarget::Network {
                host: config.host.clone(),
                port: config.port,
                dbname: config.database.clone(),
                charset: config.charset.clone(),
            },
        };
        Self {
            driver: config.driver,
            target,
        }
    }
}

impl std::fmt::Display for Dsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.target {
            DsnTarget::Memory => write!(f, "{}:{}", self.driver, MEMORY_DATABASE),
            DsnTarget::File(path) => write!(f, "{}:{}", self.driver, path),
            DsnTarget::Network {
                host,
                port,
                dbname,
                charset,
            } => write!(
                f,
                "{}:host={};port={};dbname={};charset={}",
                self.driver, host, port, dbname, charset
            ),
        }
    }
}

impl FromStr for Dsn {
    type Err = DbError;

    fn from_str(s: &str) -> DbResult<Self> {
        let (prefix, rest) = s.split_once(':').ok_or_else(|| {
            DbError::invalid_input(format!("Connection string '{}' has no driver prefix", s))
        })?;
        let driver: Driver = prefix.parse()?;

        if driver == Driver::SQLite {
            let target = match rest {
                MEMORY_DATABASE => DsnTarget::Memory,
                "" => {
                    return Err(DbError::invalid_input(
                        "SQLite connection string has no database path",
                    ));
                }
                path => DsnTarget::File(path.to_string()),
            };
            return Ok(Self { driver, target });
        }

        let mut host = None;
        let mut port = None;
        let mut dbname = None;
        let mut charset = None;
        for pair in rest.split(';').filter(|p| !p.trim().is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                DbError::invalid_input(format!("Malformed connection string segment '{}'", pair))
            })?;
            let key = key.trim();
            let value = value.trim().to_string();
            let slot = match key {
                "host" => &mut host,
                "port" => &mut port,
                "dbname" => &mut dbname,
                "charset" => &mut charset,
                // Unknown keys are left to the driver's defaults.
                _ => continue,
            };
            if slot.replace(value).is_some() {
                return Err(DbError::invalid_input(format!(
                    "Connection string repeats '{}'",
                    key
                )));
            }
        }
        let port = port
            .map(|value| {
                value
                    .parse::<u16>()
                    .map_err(|_| DbError::invalid_input(format!("Invalid port '{}'", value)))
            })
            .transpose()?;

        let host = host
            .ok_or_else(|| DbError::invalid_input("Connection string is missing 'host'"))?;
        let dbname = dbname
            .ok_or_else(|| DbError::invalid_input("Connection string is missing 'dbname'"))?;
        let port = match port.or(driver.default_port()) {
            Some(port) => port,
            None => return Err(DbError::invalid_input("Connection string is missing 'port'")),
        };

        Ok(Self {
            driver,
            target: DsnTarget::Network {
                host,
                port,
                dbname,
                charset: charset.unwrap_or_else(|| crate::config::DEFAULT_CHARSET.to_string()),
            },
        })
    }
}
