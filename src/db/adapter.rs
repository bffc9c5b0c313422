//! Transaction-tracking wrapper around one raw connection.
//!
//! An adapter is in one of three states: no handle, handle idle, or handle in
//! a transaction. Every failure is returned as an error and also kept as the
//! adapter's last error string.

use crate::db::driver::NativeConnection;
use crate::error::{DbError, DbResult, ErrorContext, LastError};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// A raw connection shared between its adapter and callers running queries.
pub type SharedHandle<C> = Arc<Mutex<C>>;

#[derive(Debug)]
struct AdapterState<C> {
    handle: Option<SharedHandle<C>>,
    in_transaction: bool,
    initialized: bool,
    error: LastError,
}

impl<C> AdapterState<C> {
    fn fail<T>(&mut self, err: DbError) -> DbResult<T> {
        self.error.record(&err);
        Err(err)
    }

    fn drop_handle(&mut self) {
        self.handle = None;
        self.in_transaction = false;
        self.initialized = false;
    }
}

#[derive(Clone, Copy)]
enum Completion {
    Commit,
    Rollback,
}

impl Completion {
    fn name(self) -> &'static str {
        match self {
            Completion::Commit => "commit",
            Completion::Rollback => "rollback",
        }
    }
}

/// Wraps one connection handle (or none) with transaction state and error
/// capture.
#[derive(Debug)]
pub struct ConnectionAdapter<C> {
    state: Mutex<AdapterState<C>>,
}

impl<C: NativeConnection> ConnectionAdapter<C> {
    /// Wrap a raw connection. `None` yields an uninitialized adapter.
    pub fn new(connection: Option<C>) -> Self {
        Self::from_shared(connection.map(|c| Arc::new(Mutex::new(c))))
    }

    /// Wrap an already shared handle.
    pub fn from_shared(handle: Option<SharedHandle<C>>) -> Self {
        let initialized = handle.is_some();
        Self {
            state: Mutex::new(AdapterState {
                handle,
                in_transaction: false,
                initialized,
                error: LastError::default(),
            }),
        }
    }

    /// The owned handle, if any.
    ///
    /// Do not hold the handle's lock while calling transaction methods on
    /// this adapter; they lock the handle themselves.
    pub async fn connection(&self) -> Option<SharedHandle<C>> {
        self.state.lock().await.handle.clone()
    }

    /// Drop the owned handle if it is `handle` itself. Any other handle is
    /// ignored. Returns whether the handle was released.
    pub async fn release_connection(&self, handle: &SharedHandle<C>) -> bool {
        let mut state = self.state.lock().await;
        match &state.handle {
            Some(owned) if Arc::ptr_eq(owned, handle) => {
                if state.in_transaction {
                    warn!("Releasing a connection with an active transaction");
                }
                state.drop_handle();
                true
            }
            _ => {
                debug!("Ignoring release of a handle this adapter does not own");
                false
            }
        }
    }

    /// Drop whatever handle is owned.
    pub(crate) async fn release(&self) {
        self.state.lock().await.drop_handle();
    }

    /// Drop the handle without waiting. Returns false if the state is locked.
    pub(crate) fn try_release(&self) -> bool {
        match self.state.try_lock() {
            Ok(mut state) => {
                state.drop_handle();
                true
            }
            Err(_) => false,
        }
    }

    pub async fn begin_transaction(&self) -> DbResult<()> {
        let mut state = self.state.lock().await;
        state.error.clear();

        let Some(handle) = state.handle.clone() else {
            return state.fail(DbError::NoConnection);
        };
        if state.in_transaction {
            return state.fail(DbError::AlreadyInTransaction);
        }

        let result = handle.lock().await.begin_transaction().await;
        match result {
            Ok(()) => {
                state.in_transaction = true;
                debug!("Transaction started");
                Ok(())
            }
            Err(e) => state.fail(DbError::transaction_failed("begin", &e)),
        }
    }

    pub async fn commit(&self) -> DbResult<()> {
        self.complete(Completion::Commit).await
    }

    pub async fn rollback(&self) -> DbResult<()> {
        self.complete(Completion::Rollback).await
    }

    async fn complete(&self, completion: Completion) -> DbResult<()> {
        let mut state = self.state.lock().await;
        state.error.clear();

        let Some(handle) = state.handle.clone() else {
            return state.fail(DbError::NoConnection);
        };
        if !state.in_transaction {
            return state.fail(DbError::NoActiveTransaction {
                operation: completion.name(),
            });
        }

        let result = {
            let mut conn = handle.lock().await;
            match completion {
                Completion::Commit => conn.commit().await,
                Completion::Rollback => conn.rollback().await,
            }
        };
        match result {
            Ok(()) => {
                state.in_transaction = false;
                debug!(operation = completion.name(), "Transaction finished");
                Ok(())
            }
            // The transaction stays marked active: the caller decides whether
            // to retry or roll back.
            Err(e) => state.fail(DbError::transaction_failed(completion.name(), &e)),
        }
    }

    /// True if this adapter started a transaction or the driver reports one.
    pub async fn in_transaction(&self) -> bool {
        let state = self.state.lock().await;
        match &state.handle {
            None => false,
            Some(_) if state.in_transaction => true,
            Some(handle) => handle.lock().await.in_transaction_natively(),
        }
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
