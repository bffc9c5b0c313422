//! Generic capability interfaces for code that should not depend on a concrete
//! manager or driver.

use crate::db::adapter::{ConnectionAdapter, SharedHandle};
use crate::db::driver::{Connector, NativeConnection};
use crate::db::manager::{Adapter, ConnectionManager};
use crate::error::{DbResult, ErrorContext};
use crate::models::PoolStats;
use std::future::Future;
use std::sync::Arc;

/// A single database connection with transaction control and error state.
pub trait DatabaseConnection: Send + Sync {
    type Handle: Send + Sync;

    fn connection(&self) -> impl Future<Output = Option<Self::Handle>> + Send;

    fn release_connection(&self, handle: &Self::Handle) -> impl Future<Output = bool> + Send;

    fn begin_transaction(&self) -> impl Future<Output = DbResult<()>> + Send;

    fn commit(&self) -> impl Future<Output = DbResult<()>> + Send;

    fn rollback(&self) -> impl Future<Output = DbResult<()>> + Send;

    fn in_transaction(&self) -> impl Future<Output = bool> + Send;

    fn error(&self) -> impl Future<Output = Option<String>> + Send;

    fn set_error(
        &self,
        message: Option<&str>,
        context: &ErrorContext,
    ) -> impl Future<Output = ()> + Send;

    fn clear_error(&self) -> impl Future<Output = ()> + Send;

    fn is_initialized(&self) -> impl Future<Output = bool> + Send;
}

/// Hands out named connections.
pub trait ConnectionProvider: Send + Sync {
    type Connection: DatabaseConnection;

    fn get_connection(
        &self,
        name: &str,
    ) -> impl Future<Output = DbResult<Arc<Self::Connection>>> + Send;

    fn release_connection(
        &self,
        connection: &Arc<Self::Connection>,
    ) -> impl Future<Output = ()> + Send;

    fn pool_stats(&self) -> impl Future<Output = PoolStats> + Send;

    fn error(&self) -> impl Future<Output = Option<String>> + Send;

    fn set_error(
        &self,
        message: Option<&str>,
        context: &ErrorContext,
    ) -> impl Future<Output = ()> + Send;

    fn clear_error(&self) -> impl Future<Output = ()> + Send;

    fn is_initialized(&self) -> impl Future<Output = bool> + Send;
}

impl<C: NativeConnection> DatabaseConnection for ConnectionAdapter<C> {
    type Handle = SharedHandle<C>;

    async fn connection(&self) -> Option<SharedHandle<C>> {
        ConnectionAdapter::connection(self).await
    }

    async fn release_connection(&self, handle: &SharedHandle<C>) -> bool {
        ConnectionAdapter::release_connection(self, handle).await
    }

    async fn begin_transaction(&self) -> DbResult<()> {
        ConnectionAdapter::begin_transaction(self).await
    }

    async fn commit(&self) -> DbResult<()> {
        ConnectionAdapter::commit(self).await
    }

    async fn rollback(&self) -> DbResult<()> {
        ConnectionAdapter::rollback(self).await
    }

    async fn in_transaction(&self) -> bool {
        ConnectionAdapter::in_transaction(self).await
    }

    async fn error(&self) -> Option<String> {
        ConnectionAdapter::error(self).await
    }

    async fn set_error(&self, message: Option<&str>, context: &ErrorContext) {
        ConnectionAdapter::set_error(self, message, context).await
    }

    async fn clear_error(&self) {
        ConnectionAdapter::clear_error(self).await
    }

    async fn is_initialized(&self) -> bool {
        ConnectionAdapter::is_initialized(self).await
    }
}

impl<K: Connector> ConnectionProvider for ConnectionManager<K> {
    type Connection = Adapter<K>;

    async fn get_connection(&self, name: &str) -> DbResult<Arc<Adapter<K>>> {
        ConnectionManager::get_connection(self, name).await
    }

    async fn release_connection(&self, connection: &Arc<Adapter<K>>) {
        ConnectionManager::release_connection(self, connection).await
    }

    async fn pool_stats(&self) -> PoolStats {
        ConnectionManager::pool_stats(self).await
    }

    async fn error(&self) -> Option<String> {
        ConnectionManager::error(self).await
    }

    async fn set_error(&self, message: Option<&str>, context: &ErrorContext) {
        ConnectionManager::set_error(self, message, context).await
    }

    async fn clear_error(&self) {
        ConnectionManager::clear_error(self).await
    }

    async fn is_initialized(&self) -> bool {
        ConnectionManager::is_initialized(self).await
    }
}
