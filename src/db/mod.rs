//! Database connection layer.
//!
//! This module provides:
//! - The driver contract and its sqlx implementation
//! - Connection string building and parsing
//! - Transaction-tracking connection adapters
//! - The name-keyed connection manager
//! - Generic capability traits over adapters and managers

pub mod adapter;
pub mod capability;
pub mod driver;
pub mod dsn;
pub mod manager;
pub mod sqlx_driver;

pub use adapter::{ConnectionAdapter, SharedHandle};
pub use capability::{ConnectionProvider, DatabaseConnection};
pub use driver::{ConnectRequest, Connector, Credentials, HandleOptions, NativeConnection};
pub use dsn::{Dsn, DsnTarget};
pub use manager::{Adapter, ConnectionManager, DEFAULT_CONNECTION, shared};
pub use sqlx_driver::{SqlxConnection, SqlxConnector, SqlxHandle};
