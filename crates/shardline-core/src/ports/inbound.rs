//! # Inbound Ports
//!
//! API trait defining what the sharding engine can do.

use async_trait::async_trait;

use crate::domain::{LogicalResult, RoutedStatement, RuleRegistry, ShardingError};

/// Sharding API - inbound port.
///
/// One logical database: callers submit SQL written against logical tables
/// and get one merged result back.
#[async_trait]
pub trait ShardingApi: Send + Sync {
    /// Classify, route, execute and merge one statement.
    async fn execute(&self, sql: &str) -> Result<LogicalResult, ShardingError>;

    /// Routed statements `execute` would run, without running them.
    fn preview(&self, sql: &str) -> Result<Vec<RoutedStatement>, ShardingError>;

    /// Rules the engine routes with.
    fn registry(&self) -> &RuleRegistry;
}
