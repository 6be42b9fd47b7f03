//! # Broadcast Handler
//!
//! Statements on broadcast tables. Writes and DDL run unrewritten on every
//! datasource with no rollback. Reads go to the default datasource, or to
//! the first one when no default is configured; a broadcast table joined
//! with an unregistered table is only readable where the latter lives.

use std::sync::Arc;

use tracing::info;

use crate::domain::{LogicalResult, PhysicalTarget, RoutedStatement, RuleRegistry, ShardingError};
use crate::ports::outbound::{ConnectionProvider, StatementExecutor};
use crate::sql::LogicalStatement;

use super::execution::FanOutExecutor;
use super::merger::ResultMerger;

/// Unrewritten copies of a broadcast statement, one per target datasource.
pub fn broadcast_statements(
    registry: &RuleRegistry,
    statement: &LogicalStatement,
) -> Vec<RoutedStatement> {
    let table = statement
        .tables
        .iter()
        .find(|t| registry.is_broadcast(t))
        .or_else(|| statement.tables.first())
        .cloned()
        .unwrap_or_default();
    let sql = statement.sql();
    let data_sources = registry.data_sources();
    let targets = if statement.kind.is_mutation() {
        data_sources
    } else {
        let read = registry
            .default_data_source()
            .and_then(|default| data_sources.iter().position(|ds| ds == default))
            .unwrap_or(0);
        data_sources.get(read..=read).unwrap_or_default()
    };
    targets
        .iter()
        .map(|ds| RoutedStatement::new(PhysicalTarget::new(ds.clone(), table.clone()), sql.clone()))
        .collect()
}

/// Replicates statements on broadcast tables.
pub struct BroadcastHandler<P, E> {
    registry: Arc<RuleRegistry>,
    executor: Arc<FanOutExecutor<P, E>>,
}

impl<P, E> BroadcastHandler<P, E>
where
    P: ConnectionProvider,
    E: StatementExecutor<P::Connection>,
{
    /// Create a handler sharing the engine's executor.
    pub fn new(registry: Arc<RuleRegistry>, executor: Arc<FanOutExecutor<P, E>>) -> Self {
        Self { registry, executor }
    }

    /// Run the statement on its broadcast targets.
    ///
    /// Failed datasources are reported in `PartialFailure`; the datasources
    /// that succeeded keep their changes.
    pub async fn broadcast(
        &self,
        statement: &LogicalStatement,
    ) -> Result<LogicalResult, ShardingError> {
        let statements = broadcast_statements(&self.registry, statement);
        info!(
            kind = %statement.kind,
            targets = statements.len(),
            "[shardline] broadcasting statement"
        );
        let results = self.executor.execute_all(&statements).await;
        ResultMerger::merge_kind(statement.kind, results)
    }
}
