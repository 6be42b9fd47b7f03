//! # Table Rules
//!
//! Per-table routing configuration resolved at registration time.

use std::sync::Arc;

use crate::algorithms::key_generator::KeyGenerator;
use crate::algorithms::sharding_algorithm::ShardingAlgorithm;

use super::errors::ShardingError;
use super::value_objects::{DataNode, PhysicalTarget, SqlValue};

/// Maps one column's value to a shard name within a single dimension.
#[derive(Clone, Debug)]
pub struct ShardingStrategy {
    /// Column the algorithm reads.
    pub sharding_column: String,
    /// Registry key of the algorithm.
    pub algorithm_name: String,
    /// Resolved algorithm.
    pub algorithm: ShardingAlgorithm,
}

impl ShardingStrategy {
    /// Create a strategy.
    pub fn new(
        sharding_column: impl Into<String>,
        algorithm_name: impl Into<String>,
        algorithm: ShardingAlgorithm,
    ) -> Self {
        Self {
            sharding_column: sharding_column.into(),
            algorithm_name: algorithm_name.into(),
            algorithm,
        }
    }

    /// Resolve a value to one of `available`.
    ///
    /// A computed name outside `available` is `NoRouteTarget`.
    pub fn route(
        &self,
        table: &str,
        available: &[&str],
        value: &SqlValue,
    ) -> Result<String, ShardingError> {
        let candidate = self
            .algorithm
            .do_sharding(available, &self.sharding_column, value)?;
        candidate
            .and_then(|name| {
                available
                    .iter()
                    .find(|declared| declared.eq_ignore_ascii_case(&name))
            })
            .map(|declared| declared.to_string())
            .ok_or_else(|| ShardingError::NoRouteTarget {
                table: table.to_string(),
                column: self.sharding_column.clone(),
                value: value.to_string(),
            })
    }

    /// True when both strategies would route identically.
    pub fn same_definition(&self, other: &ShardingStrategy) -> bool {
        self.sharding_column.eq_ignore_ascii_case(&other.sharding_column)
            && self.algorithm.describe() == other.algorithm.describe()
    }
}

/// Fills a column with generated keys on INSERT.
#[derive(Clone, Debug)]
pub struct KeyGenerateStrategy {
    /// Column receiving generated keys.
    pub column: String,
    /// Registry key of the generator.
    pub generator_name: String,
    /// Shared generator instance.
    pub generator: Arc<dyn KeyGenerator>,
}

impl KeyGenerateStrategy {
    /// Create a key generation strategy.
    pub fn new(
        column: impl Into<String>,
        generator_name: impl Into<String>,
        generator: Arc<dyn KeyGenerator>,
    ) -> Self {
        Self {
            column: column.into(),
            generator_name: generator_name.into(),
            generator,
        }
    }
}

/// Routing rule of one logical table.
#[derive(Clone, Debug)]
pub struct TableRule {
    /// Logical table name as registered.
    pub logic_table: String,
    /// Declared grid, in declaration order.
    pub data_nodes: Vec<DataNode>,
    /// Database dimension strategy.
    pub database_strategy: Option<ShardingStrategy>,
    /// Table dimension strategy.
    pub table_strategy: Option<ShardingStrategy>,
    /// Key generation for INSERT.
    pub key_generate_strategy: Option<KeyGenerateStrategy>,
    /// Replicated to every datasource.
    pub broadcast: bool,
    /// Binding group the table belongs to.
    pub binding_group: Option<usize>,
}

impl TableRule {
    /// A sharded (or single-node) table over the given grid.
    pub fn sharded(logic_table: impl Into<String>, data_nodes: Vec<DataNode>) -> Self {
        Self {
            logic_table: logic_table.into(),
            data_nodes,
            database_strategy: None,
            table_strategy: None,
            key_generate_strategy: None,
            broadcast: false,
            binding_group: None,
        }
    }

    /// A broadcast table present, unrenamed, in every datasource.
    pub fn broadcast(logic_table: impl Into<String>, data_sources: &[String]) -> Self {
        let logic_table = logic_table.into();
        let data_nodes = data_sources
            .iter()
            .map(|ds| PhysicalTarget::new(ds.clone(), logic_table.clone()))
            .collect();
        Self {
            logic_table,
            data_nodes,
            database_strategy: None,
            table_strategy: None,
            key_generate_strategy: None,
            broadcast: true,
            binding_group: None,
        }
    }

    /// Set the database strategy.
    pub fn with_database_strategy(mut self, strategy: ShardingStrategy) -> Self {
        self.database_strategy = Some(strategy);
        self
    }

    /// Set the table strategy.
    pub fn with_table_strategy(mut self, strategy: ShardingStrategy) -> Self {
        self.table_strategy = Some(strategy);
        self
    }

    /// Set the key generation strategy.
    pub fn with_key_generate_strategy(mut self, strategy: KeyGenerateStrategy) -> Self {
        self.key_generate_strategy = Some(strategy);
        self
    }

    /// True when the table has at least one sharding strategy.
    pub fn is_sharded(&self) -> bool {
        self.database_strategy.is_some() || self.table_strategy.is_some()
    }

    /// Distinct datasources of the grid, in declaration order.
    pub fn data_source_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = Vec::new();
        for node in &self.data_nodes {
            if !names.contains(&node.data_source.as_str()) {
                names.push(&node.data_source);
            }
        }
        names
    }

    /// Distinct physical tables of the grid, in declaration order.
    pub fn actual_tables(&self) -> Vec<&str> {
        let mut tables: Vec<&str> = Vec::new();
        for node in &self.data_nodes {
            if !tables.contains(&node.table.as_str()) {
                tables.push(&node.table);
            }
        }
        tables
    }

    /// Physical tables declared in one datasource, in declaration order.
    pub fn actual_tables_in(&self, data_source: &str) -> Vec<&str> {
        self.data_nodes
            .iter()
            .filter(|node| node.data_source == data_source)
            .map(|node| node.table.as_str())
            .collect()
    }

    /// Columns read by the strategies.
    pub fn sharding_columns(&self) -> Vec<&str> {
        let mut columns = Vec::new();
        for strategy in [&self.database_strategy, &self.table_strategy]
            .into_iter()
            .flatten()
        {
            if !columns
                .iter()
                .any(|c: &&str| c.eq_ignore_ascii_case(&strategy.sharding_column))
            {
                columns.push(strategy.sharding_column.as_str());
            }
        }
        columns
    }

    /// True when `column` feeds a strategy.
    pub fn is_sharding_column(&self, column: &str) -> bool {
        self.sharding_columns()
            .iter()
            .any(|c| c.eq_ignore_ascii_case(column))
    }

    /// Column filled by the key generator, if any.
    pub fn key_column(&self) -> Option<&str> {
        self.key_generate_strategy
            .as_ref()
            .map(|strategy| strategy.column.as_str())
    }

    /// True when both rules describe the same routing.
    pub fn same_definition(&self, other: &TableRule) -> bool {
        fn same(a: &Option<ShardingStrategy>, b: &Option<ShardingStrategy>) -> bool {
            match (a, b) {
                (None, None) => true,
                (Some(x), Some(y)) => x.same_definition(y),
                _ => false,
            }
        }
        let same_key = match (&self.key_generate_strategy, &other.key_generate_strategy) {
            (None, None) => true,
            (Some(x), Some(y)) => {
                x.column.eq_ignore_ascii_case(&y.column) && x.generator_name == y.generator_name
            }
            _ => false,
        };
        self.logic_table.eq_ignore_ascii_case(&other.logic_table)
            && self.data_nodes == other.data_nodes
            && self.broadcast == other.broadcast
            && same(&self.database_strategy, &other.database_strategy)
            && same(&self.table_strategy, &other.table_strategy)
            && same_key
    }
}
