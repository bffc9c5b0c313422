//! Scripted driver used to exercise failure paths without a database server.

#![allow(dead_code)]

use dbconn::config::ConfigSource;
use dbconn::db::{ConnectRequest, Connector, NativeConnection};
use dbconn::error::{DbError, DbResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Switches shared by a connector and every connection it opened.
#[derive(Debug, Default)]
pub struct Script {
    pub fail_connect: AtomicBool,
    pub fail_begin: AtomicBool,
    pub fail_commit: AtomicBool,
    pub fail_rollback: AtomicBool,
}

#[derive(Debug, Clone, Default)]
pub struct FakeConnector {
    pub script: Arc<Script>,
    pub connects: Arc<AtomicUsize>,
    pub requests: Arc<Mutex<Vec<ConnectRequest>>>,
}

impl FakeConnector {
    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<ConnectRequest> {
        self.requests.lock().unwrap().last().cloned()
    }
}

impl Connector for FakeConnector {
    type Connection = FakeConnection;

    async fn connect(&self, request: &ConnectRequest) -> DbResult<FakeConnection> {
        self.requests.lock().unwrap().push(request.clone());
        if self.script.fail_connect.load(Ordering::SeqCst) {
            return Err(DbError::database(
                "Access denied for user 'root'@'localhost'",
                Some("28000".to_string()),
                "Verify DB_USER and DB_PASSWORD",
            ));
        }
        self.connects.fetch_add(1, Ordering::SeqCst);
        Ok(FakeConnection {
            script: Arc::clone(&self.script),
            native: false,
        })
    }
}

#[derive(Debug)]
pub struct FakeConnection {
    script: Arc<Script>,
    pub native: bool,
}

impl FakeConnection {
    fn step(flag: &AtomicBool, op: &str) -> DbResult<()> {
        if flag.load(Ordering::SeqCst) {
            Err(DbError::database(
                format!("server refused {}", op),
                Some("40001".to_string()),
                "retry",
            ))
        } else {
            Ok(())
        }
    }
}

impl NativeConnection for FakeConnection {
    async fn begin_transaction(&mut self) -> DbResult<()> {
        Self::step(&self.script.fail_begin, "begin")?;
        self.native = true;
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        Self::step(&self.script.fail_commit, "commit")?;
        self.native = false;
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        Self::step(&self.script.fail_rollback, "rollback")?;
        self.native = false;
        Ok(())
    }

    fn in_transaction_natively(&self) -> bool {
        self.native
    }
}

/// Build a config source from key/value pairs.
pub fn source(pairs: &[(&str, &str)]) -> Arc<dyn ConfigSource> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    Arc::new(map)
}
