//! # Rule Registry
//!
//! Table rules keyed by logical table name. Built once through
//! [`RuleRegistryBuilder`], then immutable; share it behind an `Arc` and
//! read it without locks.
//!
//! Registration resolves algorithm and key generator names immediately, so
//! algorithms and generators must be added before the tables that use them.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tracing::{debug, info};

use crate::adapters::clock::SystemClock;
use crate::algorithms::inline_expression::expand_data_nodes;
use crate::algorithms::key_generator::{build_key_generator, KeyGenerator};
use crate::algorithms::sharding_algorithm::{
    CustomAlgorithms, CustomShardingAlgorithm, ShardingAlgorithm,
};
use crate::config::{
    AlgorithmConfig, KeyGeneratorConfig, ShardingRuleConfig, StrategyConfig, TableRuleConfig,
};
use crate::ports::outbound::TimeSource;

use super::errors::ShardingError;
use super::invariants::invariant_sharded_xor_broadcast;
use super::rules::{KeyGenerateStrategy, ShardingStrategy, TableRule};
use super::value_objects::PhysicalTarget;

/// Immutable routing rules of one logical database.
#[derive(Debug, Clone)]
pub struct RuleRegistry {
    data_sources: Vec<String>,
    tables: BTreeMap<String, TableRule>,
    binding_groups: Vec<Vec<String>>,
    default_data_source: Option<String>,
}

impl RuleRegistry {
    /// Start building a registry.
    pub fn builder() -> RuleRegistryBuilder {
        RuleRegistryBuilder::default()
    }

    /// Build from a parsed rule file, using the system clock for key generators.
    pub fn from_config(config: &ShardingRuleConfig) -> Result<Self, ShardingError> {
        Self::from_config_with_clock(config, Arc::new(SystemClock))
    }

    /// Build from a parsed rule file with an explicit clock.
    pub fn from_config_with_clock(
        config: &ShardingRuleConfig,
        clock: Arc<dyn TimeSource>,
    ) -> Result<Self, ShardingError> {
        let mut builder = Self::builder();
        builder.with_clock(clock).load_config(config)?;
        builder.build()
    }

    /// Rule of a logical table.
    pub fn lookup(&self, table: &str) -> Result<&TableRule, ShardingError> {
        self.find(table)
            .ok_or_else(|| ShardingError::TableNotFound(table.to_string()))
    }

    /// Rule of a logical table, if registered.
    pub fn find(&self, table: &str) -> Option<&TableRule> {
        self.tables.get(&table.to_ascii_lowercase())
    }

    /// Configured datasources, in routing order.
    pub fn data_sources(&self) -> &[String] {
        &self.data_sources
    }

    /// Datasource for unregistered tables.
    pub fn default_data_source(&self) -> Option<&str> {
        self.default_data_source.as_deref()
    }

    /// True for registered broadcast tables.
    pub fn is_broadcast(&self, table: &str) -> bool {
        self.find(table).is_some_and(|rule| rule.broadcast)
    }

    /// True when both tables belong to the same binding group.
    pub fn are_bound(&self, left: &str, right: &str) -> bool {
        match (self.find(left), self.find(right)) {
            (Some(l), Some(r)) => l.binding_group.is_some() && l.binding_group == r.binding_group,
            _ => false,
        }
    }

    /// Binding groups, as registered.
    pub fn binding_groups(&self) -> &[Vec<String>] {
        &self.binding_groups
    }

    /// All rules, ordered by logical name.
    pub fn tables(&self) -> impl Iterator<Item = &TableRule> {
        self.tables.values()
    }
}

/// Accumulates and validates rules.
pub struct RuleRegistryBuilder {
    data_sources: Vec<String>,
    clock: Arc<dyn TimeSource>,
    algorithms: HashMap<String, (AlgorithmConfig, ShardingAlgorithm)>,
    custom_algorithms: CustomAlgorithms,
    key_generators: HashMap<String, (KeyGeneratorConfig, Arc<dyn KeyGenerator>)>,
    default_database_strategy: Option<ShardingStrategy>,
    default_table_strategy: Option<ShardingStrategy>,
    default_data_source: Option<String>,
    tables: BTreeMap<String, TableRule>,
    binding_groups: Vec<Vec<String>>,
}

impl Default for RuleRegistryBuilder {
    fn default() -> Self {
        Self {
            data_sources: Vec::new(),
            clock: Arc::new(SystemClock),
            algorithms: HashMap::new(),
            custom_algorithms: CustomAlgorithms::new(),
            key_generators: HashMap::new(),
            default_database_strategy: None,
            default_table_strategy: None,
            default_data_source: None,
            tables: BTreeMap::new(),
            binding_groups: Vec::new(),
        }
    }
}

impl RuleRegistryBuilder {
    /// Datasource names, in routing order.
    pub fn with_data_sources<I, S>(&mut self, data_sources: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.data_sources = data_sources.into_iter().map(Into::into).collect();
        self
    }

    /// Clock used by key generators added after this call.
    pub fn with_clock(&mut self, clock: Arc<dyn TimeSource>) -> &mut Self {
        self.clock = clock;
        self
    }

    /// Datasource receiving statements on unregistered tables.
    pub fn with_default_data_source(&mut self, data_source: &str) -> &mut Self {
        self.default_data_source = Some(data_source.to_string());
        self
    }

    /// Make a code-registered algorithm available to `CLASS_BASED` entries.
    pub fn with_custom_algorithm(
        &mut self,
        class_name: &str,
        algorithm: Arc<dyn CustomShardingAlgorithm>,
    ) -> &mut Self {
        self.custom_algorithms
            .insert(class_name.to_string(), algorithm);
        self
    }

    /// Add a named algorithm.
    pub fn with_algorithm(
        &mut self,
        name: &str,
        config: &AlgorithmConfig,
    ) -> Result<&mut Self, ShardingError> {
        if let Some((existing, _)) = self.algorithms.get(name) {
            if existing == config {
                return Ok(self);
            }
            return Err(ShardingError::ConfigError(format!(
                "sharding algorithm `{name}` registered twice with different definitions"
            )));
        }
        let algorithm = ShardingAlgorithm::from_config(name, config, &self.custom_algorithms)?;
        self.algorithms
            .insert(name.to_string(), (config.clone(), algorithm));
        Ok(self)
    }

    /// Add a named key generator.
    pub fn with_key_generator(
        &mut self,
        name: &str,
        config: &KeyGeneratorConfig,
    ) -> Result<&mut Self, ShardingError> {
        if let Some((existing, _)) = self.key_generators.get(name) {
            if existing == config {
                return Ok(self);
            }
            return Err(ShardingError::ConfigError(format!(
                "key generator `{name}` registered twice with different definitions"
            )));
        }
        let generator = build_key_generator(config, Arc::clone(&self.clock))?;
        self.key_generators
            .insert(name.to_string(), (config.clone(), generator));
        Ok(self)
    }

    /// Database strategy inherited by tables without one.
    pub fn with_default_database_strategy(
        &mut self,
        config: &StrategyConfig,
    ) -> Result<&mut Self, ShardingError> {
        self.default_database_strategy = Some(self.resolve_strategy(config)?);
        Ok(self)
    }

    /// Table strategy inherited by tables without one.
    pub fn with_default_table_strategy(
        &mut self,
        config: &StrategyConfig,
    ) -> Result<&mut Self, ShardingError> {
        self.default_table_strategy = Some(self.resolve_strategy(config)?);
        Ok(self)
    }

    /// Register a table from its configuration.
    pub fn register_table(&mut self, config: &TableRuleConfig) -> Result<&mut Self, ShardingError> {
        let data_nodes = match &config.actual_data_nodes {
            Some(expression) => expand_data_nodes(expression)?,
            None => self.every_data_source(&config.logic_table)?,
        };
        let mut rule = TableRule::sharded(config.logic_table.clone(), data_nodes);
        if let Some(strategy) = &config.database_strategy {
            rule.database_strategy = Some(self.resolve_strategy(strategy)?);
        }
        if let Some(strategy) = &config.table_strategy {
            rule.table_strategy = Some(self.resolve_strategy(strategy)?);
        }
        if let Some(key) = &config.key_generate_strategy {
            let (_, generator) = self.key_generators.get(&key.key_generator_name).ok_or_else(|| {
                ShardingError::ConfigError(format!(
                    "table {} references undefined key generator `{}`",
                    config.logic_table, key.key_generator_name
                ))
            })?;
            rule.key_generate_strategy = Some(KeyGenerateStrategy::new(
                key.column.clone(),
                key.key_generator_name.clone(),
                Arc::clone(generator),
            ));
        }
        let name = config.logic_table.clone();
        self.register(&name, rule)
    }

    /// Register a fully built rule.
    ///
    /// Re-registering an identical rule is a no-op; a different rule under
    /// the same name is a `ConfigError`.
    pub fn register(&mut self, table: &str, rule: TableRule) -> Result<&mut Self, ShardingError> {
        let key = table.to_ascii_lowercase();
        match self.tables.get(&key) {
            Some(existing) if existing.same_definition(&rule) => {
                debug!(table, "[shardline] identical rule registered twice, ignoring");
                Ok(self)
            }
            Some(existing) => Err(ShardingError::ConfigError(format!(
                "table {table} already registered with a different {} rule",
                if existing.broadcast { "broadcast" } else { "sharding" }
            ))),
            None => {
                self.tables.insert(key, rule);
                Ok(self)
            }
        }
    }

    /// Register a table replicated to every datasource.
    pub fn register_broadcast(&mut self, table: &str) -> Result<&mut Self, ShardingError> {
        if self.data_sources.is_empty() {
            return Err(ShardingError::ConfigError(
                "data sources must be configured before broadcast tables".to_string(),
            ));
        }
        let rule = TableRule::broadcast(table, &self.data_sources);
        self.register(table, rule)
    }

    /// Declare tables that are sharded identically and may be joined.
    pub fn with_binding_group<I, S>(&mut self, tables: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.binding_groups
            .push(tables.into_iter().map(Into::into).collect());
        self
    }

    /// Apply a parsed rule file.
    ///
    /// Custom algorithms referenced by `CLASS_BASED` entries must be added
    /// before this call.
    pub fn load_config(&mut self, config: &ShardingRuleConfig) -> Result<&mut Self, ShardingError> {
        self.with_data_sources(config.data_sources.iter().cloned());
        if let Some(ds) = &config.default_data_source {
            self.with_default_data_source(ds);
        }
        for (name, algorithm) in &config.sharding_algorithms {
            self.with_algorithm(name, algorithm)?;
        }
        for (name, generator) in &config.key_generators {
            self.with_key_generator(name, generator)?;
        }
        if let Some(strategy) = &config.default_database_strategy {
            self.with_default_database_strategy(strategy)?;
        }
        if let Some(strategy) = &config.default_table_strategy {
            self.with_default_table_strategy(strategy)?;
        }
        for table in &config.tables {
            self.register_table(table)?;
        }
        for table in &config.broadcast_tables {
            self.register_broadcast(table)?;
        }
        for group in &config.binding_tables {
            self.with_binding_group(group.iter().cloned());
        }
        Ok(self)
    }

    /// Validate everything and freeze the registry.
    pub fn build(mut self) -> Result<RuleRegistry, ShardingError> {
        if self.data_sources.is_empty() {
            return Err(ShardingError::ConfigError(
                "at least one data source is required".to_string(),
            ));
        }
        for (i, ds) in self.data_sources.iter().enumerate() {
            if self.data_sources[..i].contains(ds) {
                return Err(ShardingError::ConfigError(format!(
                    "data source {ds} listed twice"
                )));
            }
        }
        if let Some(ds) = &self.default_data_source {
            if !self.data_sources.contains(ds) {
                return Err(ShardingError::ConfigError(format!(
                    "default data source {ds} is not configured"
                )));
            }
        }

        for rule in self.tables.values_mut() {
            if rule.broadcast {
                continue;
            }
            if rule.database_strategy.is_none() && rule.data_source_names().len() > 1 {
                rule.database_strategy = self.default_database_strategy.clone();
            }
            if rule.table_strategy.is_none() && rule.actual_tables().len() > 1 {
                rule.table_strategy = self.default_table_strategy.clone();
            }
        }

        for rule in self.tables.values() {
            invariant_sharded_xor_broadcast(rule)?;
            for node in &rule.data_nodes {
                if !self.data_sources.contains(&node.data_source) {
                    return Err(ShardingError::ConfigError(format!(
                        "table {} references unknown data source {}",
                        rule.logic_table, node.data_source
                    )));
                }
            }
        }

        for (index, group) in self.binding_groups.iter().enumerate() {
            Self::validate_binding_group(&self.tables, group)?;
            for table in group {
                let key = table.to_ascii_lowercase();
                if let Some(rule) = self.tables.get_mut(&key) {
                    if rule.binding_group.is_some() {
                        return Err(ShardingError::ConfigError(format!(
                            "table {table} belongs to more than one binding group"
                        )));
                    }
                    rule.binding_group = Some(index);
                }
            }
        }

        info!(
            data_sources = self.data_sources.len(),
            tables = self.tables.len(),
            binding_groups = self.binding_groups.len(),
            "[shardline] rule registry built"
        );

        Ok(RuleRegistry {
            data_sources: self.data_sources,
            tables: self.tables,
            binding_groups: self.binding_groups,
            default_data_source: self.default_data_source,
        })
    }

    fn resolve_strategy(&self, config: &StrategyConfig) -> Result<ShardingStrategy, ShardingError> {
        let (_, algorithm) = self
            .algorithms
            .get(&config.sharding_algorithm_name)
            .ok_or_else(|| {
                ShardingError::ConfigError(format!(
                    "undefined sharding algorithm `{}`",
                    config.sharding_algorithm_name
                ))
            })?;
        algorithm.validate_column(&config.sharding_column)?;
        Ok(ShardingStrategy::new(
            config.sharding_column.clone(),
            config.sharding_algorithm_name.clone(),
            algorithm.clone(),
        ))
    }

    fn every_data_source(&self, table: &str) -> Result<Vec<PhysicalTarget>, ShardingError> {
        if self.data_sources.is_empty() {
            return Err(ShardingError::ConfigError(format!(
                "table {table} has no actual data nodes and no data sources are configured"
            )));
        }
        Ok(self
            .data_sources
            .iter()
            .map(|ds| PhysicalTarget::new(ds.clone(), table))
            .collect())
    }

    fn validate_binding_group(
        tables: &BTreeMap<String, TableRule>,
        group: &[String],
    ) -> Result<(), ShardingError> {
        let mut rules = Vec::with_capacity(group.len());
        for name in group {
            let rule = tables.get(&name.to_ascii_lowercase()).ok_or_else(|| {
                ShardingError::ConfigError(format!("binding table {name} is not registered"))
            })?;
            if rule.broadcast {
                return Err(ShardingError::ConfigError(format!(
                    "broadcast table {name} cannot be a binding table"
                )));
            }
            rules.push(rule);
        }
        let Some((first, rest)) = rules.split_first() else {
            return Ok(());
        };
        let shape = |rule: &TableRule| -> Vec<(String, usize)> {
            rule.data_source_names()
                .into_iter()
                .map(|ds| (ds.to_string(), rule.actual_tables_in(ds).len()))
                .collect()
        };
        let columns = |rule: &TableRule| -> Vec<String> {
            let mut cols: Vec<String> = rule
                .sharding_columns()
                .iter()
                .map(|c| c.to_ascii_lowercase())
                .collect();
            cols.sort();
            cols
        };
        for rule in rest {
            if shape(rule) != shape(first) || columns(rule) != columns(first) {
                return Err(ShardingError::ConfigError(format!(
                    "binding tables {} and {} are not sharded identically",
                    first.logic_table, rule.logic_table
                )));
            }
        }
        Ok(())
    }
}
