//! # Outbound Ports
//!
//! Traits for external dependencies: datasource connections, statement
//! execution and wall-clock time.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::domain::{ExecOutcome, ExecutionError, RoutedStatement, RowSet};

/// Datasource connections - outbound port.
#[async_trait]
pub trait ConnectionProvider: Send + Sync + 'static {
    /// Connection handle handed to the executor.
    type Connection: Send + 'static;

    /// Open (or borrow) a connection to a datasource.
    async fn connect(&self, data_source: &str) -> Result<Self::Connection, ExecutionError>;
}

/// Statement execution - outbound port.
#[async_trait]
pub trait StatementExecutor<C: Send + 'static>: Send + Sync + 'static {
    /// Run one routed statement on a connection.
    async fn execute(
        &self,
        connection: &mut C,
        statement: &RoutedStatement,
    ) -> Result<ExecOutcome, ExecutionError>;
}

/// Wall-clock milliseconds since the Unix epoch - outbound port.
pub trait TimeSource: Send + Sync + fmt::Debug {
    /// Current time.
    fn now_millis(&self) -> u64;
}

// =============================================================================
// Mock Implementations for Testing
// =============================================================================

/// Clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    /// Clock frozen at `millis`.
    pub fn new(millis: u64) -> Self {
        Self {
            millis: AtomicU64::new(millis),
        }
    }

    /// Jump to an absolute time (backwards allowed).
    pub fn set(&self, millis: u64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    /// Move forward.
    pub fn advance(&self, millis: u64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Connection handed out by [`MockDataSources`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MockConnection {
    /// Datasource the connection points at.
    pub data_source: String,
}

/// Scripted datasources for testing.
///
/// Responses are keyed by `datasource.table` or by datasource. Unscripted
/// queries return an empty row set and unscripted writes affect one row.
#[derive(Clone, Default)]
pub struct MockDataSources {
    responses: Arc<Mutex<HashMap<String, ExecOutcome>>>,
    failures: Arc<Mutex<HashMap<String, ExecutionError>>>,
    delays: Arc<Mutex<HashMap<String, Duration>>>,
    executed: Arc<Mutex<Vec<RoutedStatement>>>,
}

impl MockDataSources {
    /// Empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the outcome for a `datasource.table` or a whole datasource.
    pub fn respond(&self, key: &str, outcome: ExecOutcome) {
        self.responses.lock().insert(key.to_string(), outcome);
    }

    /// Script rows for a `datasource.table` or a whole datasource.
    pub fn respond_rows(&self, key: &str, rows: RowSet) {
        self.respond(key, ExecOutcome::Rows(rows));
    }

    /// Make every statement on a datasource fail.
    pub fn fail(&self, data_source: &str, error: ExecutionError) {
        self.failures.lock().insert(data_source.to_string(), error);
    }

    /// Delay every statement on a datasource.
    pub fn delay(&self, data_source: &str, delay: Duration) {
        self.delays.lock().insert(data_source.to_string(), delay);
    }

    /// Statements executed so far, in completion order.
    pub fn executed(&self) -> Vec<RoutedStatement> {
        self.executed.lock().clone()
    }
}

#[async_trait]
impl ConnectionProvider for MockDataSources {
    type Connection = MockConnection;

    async fn connect(&self, data_source: &str) -> Result<MockConnection, ExecutionError> {
        Ok(MockConnection {
            data_source: data_source.to_string(),
        })
    }
}

#[async_trait]
impl StatementExecutor<MockConnection> for MockDataSources {
    async fn execute(
        &self,
        connection: &mut MockConnection,
        statement: &RoutedStatement,
    ) -> Result<ExecOutcome, ExecutionError> {
        let delay = self.delays.lock().get(&connection.data_source).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(error) = self.failures.lock().get(&connection.data_source) {
            return Err(error.clone());
        }
        self.executed.lock().push(statement.clone());
        let responses = self.responses.lock();
        let scripted = responses
            .get(&statement.target.to_string())
            .or_else(|| responses.get(&connection.data_source));
        Ok(match scripted {
            Some(outcome) => outcome.clone(),
            None if statement.sql.trim_start().to_ascii_uppercase().starts_with("SELECT") => {
                ExecOutcome::Rows(RowSet::default())
            }
            None => ExecOutcome::Affected(1),
        })
    }
}
