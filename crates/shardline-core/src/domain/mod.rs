//! # Domain Module
//!
//! Core domain types: values, table rules, the rule registry, results and
//! errors.

pub mod entities;
pub mod errors;
pub mod invariants;
pub mod registry;
pub mod rules;
pub mod value_objects;

pub use entities::*;
pub use errors::*;
pub use invariants::*;
pub use registry::{RuleRegistry, RuleRegistryBuilder};
pub use rules::{KeyGenerateStrategy, ShardingStrategy, TableRule};
pub use value_objects::*;
