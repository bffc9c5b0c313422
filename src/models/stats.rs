//! Read-only manager status snapshot.

use crate::models::Driver;
use serde::Serialize;

/// Label reported as the manager kind.
pub const MANAGER_TYPE: &str = "cached";

/// Snapshot returned by `ConnectionManager::pool_stats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub manager_type: &'static str,
    /// Value of `APP_ENV`, "production" when unset
    pub environment: String,
    pub cached_connections: usize,
    pub initialized: bool,
    pub persistent_connections: bool,
    pub config: PoolStatsConfig,
}

/// The non-secret subset of the active configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStatsConfig {
    pub driver: Driver,
    pub host: String,
    pub database: String,
    /// Connect timeout in seconds
    pub timeout: u64,
}
