//! # Configuration
//!
//! Engine settings and the serde model of a sharding rule file.
//!
//! Rule files are JSON. Algorithm and key generator entries are tagged by
//! `type` and take kebab-case properties:
//!
//! ```json
//! {
//!   "data_sources": ["ds0", "ds1"],
//!   "tables": [{
//!     "logic_table": "t_order",
//!     "actual_data_nodes": "ds${0..1}.t_order${0..1}",
//!     "table_strategy": { "sharding_column": "order_id", "sharding_algorithm_name": "t_order_inline" },
//!     "key_generate_strategy": { "column": "order_id", "key_generator_name": "snowflake" }
//!   }],
//!   "broadcast_tables": ["t_address"],
//!   "default_database_strategy": { "sharding_column": "user_id", "sharding_algorithm_name": "database_inline" },
//!   "sharding_algorithms": {
//!     "database_inline": { "type": "INLINE", "algorithm-expression": "ds${user_id % 2}" },
//!     "t_order_inline": { "type": "INLINE", "algorithm-expression": "t_order${order_id % 2}" }
//!   },
//!   "key_generators": { "snowflake": { "type": "SNOWFLAKE", "worker-id": 123 } }
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::domain::{
    ClockRegressionPolicy, ShardingError, DEFAULT_MAX_TOLERATE_TIME_DIFFERENCE_MS,
    DEFAULT_MAX_VIBRATION_OFFSET,
};

/// Execution settings of the engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum statements of one logical query in flight at once.
    pub max_connections_per_query: usize,

    /// Per-target deadline in milliseconds.
    pub target_timeout_ms: u64,

    /// Log every routed statement at info level.
    pub sql_show: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_connections_per_query: 8,
            target_timeout_ms: 30_000,
            sql_show: false,
        }
    }
}

impl EngineConfig {
    /// Create a config for testing (small limits, routed SQL logged).
    pub fn for_testing() -> Self {
        Self {
            max_connections_per_query: 4,
            target_timeout_ms: 2_000,
            sql_show: true,
        }
    }
}

/// A named sharding algorithm.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlgorithmConfig {
    /// Inline template, e.g. `ds${user_id % 2}`.
    #[serde(rename_all = "kebab-case")]
    Inline {
        /// Template text.
        algorithm_expression: String,
    },
    /// Modulo over an integer value.
    #[serde(rename_all = "kebab-case")]
    Mod {
        /// Number of partitions.
        sharding_count: u32,
    },
    /// CRC32 of the value text, modulo.
    #[serde(rename_all = "kebab-case")]
    HashMod {
        /// Number of partitions.
        sharding_count: u32,
    },
    /// Fixed-width ranges.
    #[serde(rename_all = "kebab-case")]
    VolumeRange {
        /// Lower bound.
        range_lower: i64,
        /// Upper bound.
        range_upper: i64,
        /// Partition width.
        sharding_volume: i64,
    },
    /// Explicit ascending boundaries.
    #[serde(rename_all = "kebab-case")]
    BoundaryRange {
        /// Boundaries.
        sharding_ranges: Vec<i64>,
    },
    /// Algorithm registered in code under a class name.
    #[serde(rename_all = "kebab-case")]
    ClassBased {
        /// Registered name.
        algorithm_class_name: String,
    },
}

/// Snowflake generator settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SnowflakeConfig {
    /// Worker id, 0..=1023.
    #[serde(default)]
    pub worker_id: u16,

    /// Largest clock regression tolerated before failing.
    #[serde(default = "default_tolerance")]
    pub max_tolerate_time_difference_milliseconds: u64,

    /// Upper bound of the per-millisecond starting sequence.
    #[serde(default = "default_vibration")]
    pub max_vibration_offset: u16,

    /// Behavior for a regression within tolerance.
    #[serde(default)]
    pub clock_regression_policy: ClockRegressionPolicy,
}

fn default_tolerance() -> u64 {
    DEFAULT_MAX_TOLERATE_TIME_DIFFERENCE_MS
}

fn default_vibration() -> u16 {
    DEFAULT_MAX_VIBRATION_OFFSET
}

impl Default for SnowflakeConfig {
    fn default() -> Self {
        Self {
            worker_id: 0,
            max_tolerate_time_difference_milliseconds: DEFAULT_MAX_TOLERATE_TIME_DIFFERENCE_MS,
            max_vibration_offset: DEFAULT_MAX_VIBRATION_OFFSET,
            clock_regression_policy: ClockRegressionPolicy::Wait,
        }
    }
}

/// A named key generator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum KeyGeneratorConfig {
    /// Time-ordered 64-bit ids.
    Snowflake(SnowflakeConfig),
    /// Random 32-character hex ids.
    Uuid,
}

/// Column plus algorithm reference for one dimension.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StrategyConfig {
    /// Column read by the algorithm.
    pub sharding_column: String,
    /// Key into `sharding_algorithms`.
    pub sharding_algorithm_name: String,
}

/// Key generation reference of a table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyGenerateConfig {
    /// Column receiving generated keys.
    pub column: String,
    /// Key into `key_generators`.
    pub key_generator_name: String,
}

/// One sharded table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableRuleConfig {
    /// Logical table name.
    pub logic_table: String,
    /// Inline data node declaration; defaults to every datasource.
    #[serde(default)]
    pub actual_data_nodes: Option<String>,
    /// Database dimension.
    #[serde(default)]
    pub database_strategy: Option<StrategyConfig>,
    /// Table dimension.
    #[serde(default)]
    pub table_strategy: Option<StrategyConfig>,
    /// Key generation.
    #[serde(default)]
    pub key_generate_strategy: Option<KeyGenerateConfig>,
}

impl TableRuleConfig {
    /// A table with no strategies yet.
    pub fn new(logic_table: impl Into<String>) -> Self {
        Self {
            logic_table: logic_table.into(),
            actual_data_nodes: None,
            database_strategy: None,
            table_strategy: None,
            key_generate_strategy: None,
        }
    }
}

/// Complete rule file.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ShardingRuleConfig {
    /// Datasource names, in routing order.
    pub data_sources: Vec<String>,
    /// Sharded tables.
    #[serde(default)]
    pub tables: Vec<TableRuleConfig>,
    /// Tables replicated to every datasource.
    #[serde(default)]
    pub broadcast_tables: Vec<String>,
    /// Groups of identically sharded tables.
    #[serde(default)]
    pub binding_tables: Vec<Vec<String>>,
    /// Inherited by tables without a database strategy.
    #[serde(default)]
    pub default_database_strategy: Option<StrategyConfig>,
    /// Inherited by tables without a table strategy.
    #[serde(default)]
    pub default_table_strategy: Option<StrategyConfig>,
    /// Receives statements on unregistered tables.
    #[serde(default)]
    pub default_data_source: Option<String>,
    /// Named algorithms.
    #[serde(default)]
    pub sharding_algorithms: BTreeMap<String, AlgorithmConfig>,
    /// Named key generators.
    #[serde(default)]
    pub key_generators: BTreeMap<String, KeyGeneratorConfig>,
}

impl ShardingRuleConfig {
    /// Parse a JSON rule document.
    pub fn from_json(text: &str) -> Result<Self, ShardingError> {
        serde_json::from_str(text)
            .map_err(|e| ShardingError::ConfigError(format!("invalid rule file: {e}")))
    }

    /// Read and parse a JSON rule file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ShardingError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            ShardingError::ConfigError(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&text)
    }
}
