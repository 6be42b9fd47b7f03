//! # Shardline Core
//!
//! Transparent database sharding for SQL clients.
//!
//! **Architecture:** Hexagonal (DDD + Ports/Adapters)
//!
//! ## Purpose
//!
//! Present many physical databases as one logical database:
//! - Table rules decide which physical tables hold each row
//! - Statements are classified, routed and rewritten per target
//! - Routed statements run in parallel and their results are merged
//! - Snowflake and UUID generators fill missing key columns
//!
//! ## Statement Flow
//!
//! ```text
//! SQL ──► SqlClassifier ──► key generation ──► QueryRouter ──► FanOutExecutor ──► ResultMerger
//!              │                                   │
//!              └──── RuleRegistry (read-only) ─────┘
//! ```
//!
//! ## Module Structure
//!
//! ```text
//! shardline-core/
//! ├── domain/          # Values, table rules, registry, results, errors
//! ├── algorithms/      # Inline expressions, sharding algorithms, keys, merging
//! ├── sql/             # Parsing, classification, AST rewriting
//! ├── application/     # Router, executor, merger, broadcast, engine
//! ├── ports/           # API trait + datasource/clock traits
//! ├── adapters/        # System clock, in-memory datasources
//! ├── config.rs        # Engine settings and rule file model
//! └── metrics.rs       # Engine counters
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod adapters;
pub mod algorithms;
pub mod application;
pub mod config;
pub mod domain;
pub mod metrics;
pub mod ports;
pub mod sql;

#[cfg(test)]
mod test_support;

// Re-exports
pub use adapters::{InMemoryDataSources, MemoryConnection, SystemClock};
pub use algorithms::{
    build_key_generator, evaluate, evaluate_conditions, expand_data_nodes, merge_row_sets,
    InlineExpression, KeyGenerator, MergePlan, ShardingAlgorithm, SnowflakeKeyGenerator,
    UuidKeyGenerator,
};
pub use application::{QueryRouter, ResultMerger, RoutePlan, ShardingEngine};
pub use config::{
    AlgorithmConfig, EngineConfig, KeyGeneratorConfig, ShardingRuleConfig, SnowflakeConfig,
    StrategyConfig, TableRuleConfig,
};
pub use domain::{
    ClockRegressionPolicy, DataNode, ExecOutcome, ExecutionError, GeneratedKey, LogicalResult,
    PartialFailure, PhysicalTarget, RoutedStatement, RowSet, RuleRegistry, RuleRegistryBuilder,
    ShardingConditions, ShardingError, SqlValue, StatementKind, TableRule,
};
pub use metrics::{EngineMetrics, MetricsSnapshot};
pub use ports::{
    ConnectionProvider, ManualClock, MockDataSources, ShardingApi, StatementExecutor, TimeSource,
};
pub use sql::{LogicalStatement, SqlClassifier};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
