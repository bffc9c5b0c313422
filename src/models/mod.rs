//! Data models shared by the configuration and connection layers.

pub mod connection;
pub mod stats;

pub use connection::{Driver, MEMORY_DATABASE};
pub use stats::{MANAGER_TYPE, PoolStats, PoolStatsConfig};
