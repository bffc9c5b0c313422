//! dbconn
//!
//! Named, cached database connections (MySQL, PostgreSQL, SQLite) with
//! transaction-state tracking and retrievable error strings.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{ConfigOverrides, DbConfig};
pub use db::{ConnectionAdapter, ConnectionManager};
pub use error::{DbError, DbResult};
