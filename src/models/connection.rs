//! Connection-related data models.
//!
//! This module defines the supported drivers and how they are named in
//! configuration and connection strings.

use crate::error::DbError;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Marker database name that selects an in-memory SQLite database.
pub const MEMORY_DATABASE: &str = ":memory:";

/// Supported database drivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Driver {
    /// Includes MariaDB
    #[serde(rename = "mysql")]
    MySQL,
    #[serde(rename = "pgsql")]
    PostgreSQL,
    /// In-process, file or memory backed
    #[serde(rename = "sqlite")]
    SQLite,
}

impl Driver {
    /// Name used in configuration and as the DSN prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MySQL => "mysql",
            Self::PostgreSQL => "pgsql",
            Self::SQLite => "sqlite",
        }
    }

    /// Get the display name for this driver.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Get the default port for this driver.
    pub fn default_port(&self) -> Option<u16> {
        match self {
            Self::PostgreSQL => Some(5432),
            Self::MySQL => Some(3306),
            Self::SQLite => None,
        }
    }

    /// Network drivers talk to a server and need credentials, a timeout and
    /// the persistence flag. SQLite needs none of these.
    pub fn is_network(&self) -> bool {
        !matches!(self, Self::SQLite)
    }
}

impl FromStr for Driver {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(Self::MySQL),
            "pgsql" | "postgres" | "postgresql" => Ok(Self::PostgreSQL),
            "sqlite" | "sqlite3" => Ok(Self::SQLite),
            other => Err(DbError::configuration(format!(
                "Unsupported database driver '{}' (expected mysql, pgsql or sqlite)",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
