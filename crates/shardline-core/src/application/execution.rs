//! # Fan-out Execution
//!
//! Runs routed statements in parallel on a `JoinSet`, bounded by a
//! per-query semaphore and a per-target deadline.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::domain::{ExecOutcome, ExecutionError, RoutedStatement, ShardResult};
use crate::ports::outbound::{ConnectionProvider, StatementExecutor};

/// Executes routed statements against the outbound ports.
pub struct FanOutExecutor<P, E> {
    provider: Arc<P>,
    executor: Arc<E>,
    max_in_flight: usize,
    target_timeout: Duration,
}

impl<P, E> FanOutExecutor<P, E>
where
    P: ConnectionProvider,
    E: StatementExecutor<P::Connection>,
{
    /// Create an executor.
    pub fn new(provider: Arc<P>, executor: Arc<E>, config: &EngineConfig) -> Self {
        Self {
            provider,
            executor,
            max_in_flight: config.max_connections_per_query.max(1),
            target_timeout: Duration::from_millis(config.target_timeout_ms),
        }
    }

    /// Run every statement; one result per statement, in completion order.
    ///
    /// Failures (including timeouts and panicked tasks) are reported per
    /// target and never cancel the other targets.
    pub async fn execute_all(&self, statements: &[RoutedStatement]) -> Vec<ShardResult> {
        let permits = Arc::new(Semaphore::new(self.max_in_flight));
        let mut tasks = JoinSet::new();
        for (route_index, statement) in statements.iter().cloned().enumerate() {
            let provider = Arc::clone(&self.provider);
            let executor = Arc::clone(&self.executor);
            let permits = Arc::clone(&permits);
            let deadline = self.target_timeout;
            tasks.spawn(async move {
                let outcome = match permits.acquire_owned().await {
                    Ok(_permit) => {
                        let work = run_one(&*provider, &*executor, &statement);
                        match timeout(deadline, work).await {
                            Ok(outcome) => outcome,
                            Err(_) => Err(ExecutionError::Timeout(deadline.as_millis() as u64)),
                        }
                    }
                    Err(_) => Err(ExecutionError::Statement(
                        "execution permits closed".to_string(),
                    )),
                };
                ShardResult {
                    route_index,
                    target: statement.target,
                    outcome,
                }
            });
        }

        let mut results = Vec::with_capacity(statements.len());
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    if let Err(error) = &result.outcome {
                        warn!(shard = %result.target, %error, "[shardline] target failed");
                    }
                    results.push(result);
                }
                Err(error) => warn!(%error, "[shardline] execution task aborted"),
            }
        }
        // A panicked task loses its result; report its target as failed.
        if results.len() < statements.len() {
            for (route_index, statement) in statements.iter().enumerate() {
                if !results.iter().any(|r| r.route_index == route_index) {
                    results.push(ShardResult {
                        route_index,
                        target: statement.target.clone(),
                        outcome: Err(ExecutionError::Statement(
                            "execution task aborted".to_string(),
                        )),
                    });
                }
            }
        }
        debug!(targets = results.len(), "[shardline] fan-out complete");
        results
    }
}

async fn run_one<P, E>(
    provider: &P,
    executor: &E,
    statement: &RoutedStatement,
) -> Result<ExecOutcome, ExecutionError>
where
    P: ConnectionProvider,
    E: StatementExecutor<P::Connection>,
{
    let mut connection = provider.connect(&statement.target.data_source).await?;
    executor.execute(&mut connection, statement).await
}
