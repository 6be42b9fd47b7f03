//! # Sharding Engine
//!
//! The inbound entry point. One logical statement flows through:
//!
//! ```text
//! classify -> generate keys -> route -> fan out -> merge
//! ```
//!
//! The engine owns no mutable routing state: the registry is shared
//! read-only and every call works on its own [`LogicalStatement`].

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::config::EngineConfig;
use crate::domain::{
    LogicalResult, RoutedStatement, RuleRegistry, ShardingError, SqlValue, StatementKind,
};
use crate::metrics::EngineMetrics;
use crate::ports::inbound::ShardingApi;
use crate::ports::outbound::{ConnectionProvider, StatementExecutor};
use crate::sql::{LogicalStatement, SqlClassifier};

use super::broadcast::BroadcastHandler;
use super::execution::FanOutExecutor;
use super::merger::ResultMerger;
use super::router::{QueryRouter, RoutePlan};

/// Routes, executes and merges SQL over a sharded set of datasources.
pub struct ShardingEngine<P, E> {
    config: EngineConfig,
    registry: Arc<RuleRegistry>,
    classifier: SqlClassifier,
    router: QueryRouter,
    executor: Arc<FanOutExecutor<P, E>>,
    broadcast: BroadcastHandler<P, E>,
    metrics: Arc<EngineMetrics>,
}

impl<D> ShardingEngine<D, D>
where
    D: ConnectionProvider + StatementExecutor<<D as ConnectionProvider>::Connection>,
{
    /// Engine over an adapter that both connects and executes.
    pub fn with_data_sources(registry: Arc<RuleRegistry>, data_sources: D, config: EngineConfig) -> Self {
        let data_sources = Arc::new(data_sources);
        Self::new(registry, Arc::clone(&data_sources), data_sources, config)
    }
}

impl<P, E> ShardingEngine<P, E>
where
    P: ConnectionProvider,
    E: StatementExecutor<P::Connection>,
{
    /// Create an engine.
    pub fn new(
        registry: Arc<RuleRegistry>,
        provider: Arc<P>,
        executor: Arc<E>,
        config: EngineConfig,
    ) -> Self {
        let executor = Arc::new(FanOutExecutor::new(provider, executor, &config));
        info!(
            data_sources = registry.data_sources().len(),
            max_connections_per_query = config.max_connections_per_query,
            target_timeout_ms = config.target_timeout_ms,
            "[shardline] sharding engine ready"
        );
        Self {
            classifier: SqlClassifier::new(Arc::clone(&registry)),
            router: QueryRouter::new(Arc::clone(&registry)),
            broadcast: BroadcastHandler::new(Arc::clone(&registry), Arc::clone(&executor)),
            executor,
            registry,
            config,
            metrics: Arc::new(EngineMetrics::new()),
        }
    }

    /// Engine settings.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Shared metrics.
    pub fn metrics(&self) -> Arc<EngineMetrics> {
        Arc::clone(&self.metrics)
    }

    /// Execute one logical statement.
    pub async fn execute(&self, sql: &str) -> Result<LogicalResult, ShardingError> {
        let started = Instant::now();
        let result = self.run(sql).await;
        match &result {
            Ok(_) => self.metrics.record_success(started.elapsed()),
            Err(ShardingError::PartialFailure(_)) => {
                self.metrics.record_partial_failure(started.elapsed())
            }
            Err(error) => {
                debug!(%error, "[shardline] statement failed");
                self.metrics.record_failure(started.elapsed())
            }
        }
        result
    }

    /// Routed statements for `sql`, without executing anything.
    ///
    /// INSERTs that rely on a key generator consume keys here as well.
    pub fn preview(&self, sql: &str) -> Result<Vec<RoutedStatement>, ShardingError> {
        let (statement, _) = self.prepare(sql)?;
        Ok(self.router.plan(&statement)?.statements)
    }

    async fn run(&self, sql: &str) -> Result<LogicalResult, ShardingError> {
        let (statement, keys) = self.prepare(sql)?;
        let plan = self.router.plan(&statement)?;
        self.metrics.record_route(plan.statements.len(), plan.broadcast);
        self.show_sql(sql, &plan);
        let result = if plan.broadcast {
            self.broadcast.broadcast(&statement).await
        } else {
            let results = self.executor.execute_all(&plan.statements).await;
            ResultMerger::merge(&plan.merge, results)
        };
        match result {
            Ok(result) => Ok(attach_keys(result, &keys)),
            Err(error) => Err(attach_keys_to_error(error, &keys)),
        }
    }

    fn prepare(&self, sql: &str) -> Result<(LogicalStatement, Vec<SqlValue>), ShardingError> {
        let mut statement = self.classifier.classify(sql)?;
        let keys = self.generate_keys(&mut statement)?;
        Ok((statement, keys))
    }

    /// Fill the key column of INSERT rows that omit it.
    fn generate_keys(&self, statement: &mut LogicalStatement) -> Result<Vec<SqlValue>, ShardingError> {
        if statement.kind != StatementKind::Insert {
            return Ok(Vec::new());
        }
        let Some(rule) = statement.primary_table().and_then(|t| self.registry.find(t)) else {
            return Ok(Vec::new());
        };
        let Some(strategy) = rule.key_generate_strategy.clone() else {
            return Ok(Vec::new());
        };
        let rows = match &statement.insert {
            Some(insert) if !insert.has_column(&strategy.column) => insert.rows.len(),
            _ => return Ok(Vec::new()),
        };
        let keys = (0..rows)
            .map(|_| strategy.generator.generate_key())
            .collect::<Result<Vec<_>, _>>()?;
        statement.append_insert_column(&strategy.column, &keys)?;
        self.metrics.record_keys(keys.len());
        debug!(
            column = %strategy.column,
            generator = %strategy.generator_name,
            count = keys.len(),
            "[shardline] keys generated"
        );
        Ok(keys)
    }

    fn show_sql(&self, sql: &str, plan: &RoutePlan) {
        if !self.config.sql_show {
            return;
        }
        info!("[shardline] Logic SQL: {sql}");
        for statement in &plan.statements {
            info!("[shardline] Actual SQL: {statement}");
        }
    }
}

fn attach_keys(result: LogicalResult, keys: &[SqlValue]) -> LogicalResult {
    match result {
        LogicalResult::Affected { rows, .. } if !keys.is_empty() => LogicalResult::Affected {
            rows,
            generated_keys: keys.to_vec(),
        },
        other => other,
    }
}

fn attach_keys_to_error(error: ShardingError, keys: &[SqlValue]) -> ShardingError {
    match error {
        ShardingError::PartialFailure(mut failure) => {
            failure.partial = attach_keys(failure.partial, keys);
            ShardingError::PartialFailure(failure)
        }
        other => other,
    }
}

#[async_trait]
impl<P, E> ShardingApi for ShardingEngine<P, E>
where
    P: ConnectionProvider,
    E: StatementExecutor<P::Connection>,
{
    async fn execute(&self, sql: &str) -> Result<LogicalResult, ShardingError> {
        ShardingEngine::execute(self, sql).await
    }

    fn preview(&self, sql: &str) -> Result<Vec<RoutedStatement>, ShardingError> {
        ShardingEngine::preview(self, sql)
    }

    fn registry(&self) -> &RuleRegistry {
        &self.registry
    }
}
