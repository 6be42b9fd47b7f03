//! # Algorithms Module
//!
//! Pure algorithms of the sharding engine: inline expressions, named
//! sharding algorithms, key generation, shard evaluation and result merging.

pub mod evaluator;
pub mod inline_expression;
pub mod key_generator;
pub mod merge;
pub mod sharding_algorithm;

pub use evaluator::{evaluate, evaluate_conditions, evaluate_insert_rows};
pub use inline_expression::{expand_data_nodes, expand_names, InlineExpression};
pub use key_generator::{build_key_generator, KeyGenerator, SnowflakeKeyGenerator, UuidKeyGenerator};
pub use merge::{kway_merge, merge_row_sets, AggregationPlan, MergePlan};
pub use sharding_algorithm::{CustomAlgorithms, CustomShardingAlgorithm, ShardingAlgorithm};
