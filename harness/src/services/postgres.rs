//! Postgres access through the client tools
//!
//! `pg_isready` answers the readiness ping without opening a session;
//! statements run through `psql` with `ON_ERROR_STOP` so a failing
//! statement fails the call.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{BackendError, BackendResult};
use crate::services::command;
use crate::traits::{DatabaseConnector, DatabaseHandle};

const DEFAULT_DATABASE: &str = "postgres";

#[derive(Debug, Clone)]
pub struct PsqlConnector {
    database: String,
}

impl PsqlConnector {
    pub fn new() -> Self {
        Self {
            database: DEFAULT_DATABASE.to_string(),
        }
    }
}

impl Default for PsqlConnector {
    fn default() -> Self {
        Self::new()
    }
}

fn connection_args(host: &str, port: u16, user: &str, database: &str) -> Vec<String> {
    vec![
        "-h".to_string(),
        host.to_string(),
        "-p".to_string(),
        port.to_string(),
        "-U".to_string(),
        user.to_string(),
        "-d".to_string(),
        database.to_string(),
    ]
}

#[async_trait]
impl DatabaseConnector for PsqlConnector {
    async fn ping(&self, host: &str, port: u16, user: &str) -> BackendResult<bool> {
        let args = connection_args(host, port, user, &self.database);
        let (status, output) = command::run_unchecked("pg_isready", &args, &BTreeMap::new()).await?;

        // 0 accepting, 1 rejecting, 2 no response, 3 bad invocation
        match status.code() {
            Some(0) => Ok(true),
            Some(1) | Some(2) => {
                debug!(host, port, "Postgres not accepting connections: {}", output.stdout.trim());
                Ok(false)
            }
            _ => Err(BackendError::CommandFailed {
                program: "pg_isready".to_string(),
                status: status.to_string(),
                stderr: output.stderr.trim().to_string(),
            }),
        }
    }

    async fn connect(&self, host: &str, port: u16, user: &str) -> BackendResult<Arc<dyn DatabaseHandle>> {
        let handle = PsqlHandle {
            connection: connection_args(host, port, user, &self.database),
            closed: AtomicBool::new(false),
        };
        handle.exec("SELECT 1").await?;
        Ok(Arc::new(handle))
    }
}

/// A logical connection; each statement runs in its own `psql` session
pub struct PsqlHandle {
    connection: Vec<String>,
    closed: AtomicBool,
}

#[async_trait]
impl DatabaseHandle for PsqlHandle {
    async fn exec(&self, sql: &str) -> BackendResult<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed {
                what: "database connection".to_string(),
            });
        }

        let mut args = self.connection.clone();
        args.extend(
            ["-X", "-q", "-v", "ON_ERROR_STOP=1", "-c", sql]
                .into_iter()
                .map(str::to_string),
        );
        command::run("psql", &args, &BTreeMap::new()).await?;
        Ok(())
    }

    async fn close(&self) -> BackendResult<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
