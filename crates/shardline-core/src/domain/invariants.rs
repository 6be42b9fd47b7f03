//! # Domain Invariants
//!
//! Rules that must always hold for routing and key generation, plus the
//! Snowflake layout constants they are expressed in.

use std::collections::HashSet;

use super::errors::ShardingError;
use super::rules::TableRule;
use super::value_objects::{GeneratedKey, PhysicalTarget};

/// Snowflake epoch: 2016-11-01T00:00:00Z.
pub const SNOWFLAKE_EPOCH_MILLIS: u64 = 1_477_929_600_000;

/// Bits reserved for the per-millisecond sequence.
pub const SEQUENCE_BITS: u32 = 12;

/// Bits reserved for the worker id.
pub const WORKER_ID_BITS: u32 = 10;

/// Shift applied to the millisecond offset.
pub const TIMESTAMP_LEFT_SHIFT: u32 = SEQUENCE_BITS + WORKER_ID_BITS;

/// Sequence mask (4095).
pub const SEQUENCE_MASK: u64 = (1 << SEQUENCE_BITS) - 1;

/// Worker id mask (1023).
pub const WORKER_ID_MASK: u64 = (1 << WORKER_ID_BITS) - 1;

/// Largest valid worker id.
pub const MAX_WORKER_ID: u16 = WORKER_ID_MASK as u16;

/// Default tolerated clock regression.
pub const DEFAULT_MAX_TOLERATE_TIME_DIFFERENCE_MS: u64 = 10;

/// Default upper bound of the per-millisecond starting sequence.
pub const DEFAULT_MAX_VIBRATION_OFFSET: u16 = 1;

/// Invariant: routing is a pure function of its input.
///
/// Same rule + same value = same targets.
pub fn invariant_deterministic_routing<F, V>(route_fn: F, value: &V) -> bool
where
    F: Fn(&V) -> Result<Vec<PhysicalTarget>, ShardingError>,
{
    match (route_fn(value), route_fn(value)) {
        (Ok(first), Ok(second)) => first == second,
        (Err(first), Err(second)) => first.to_string() == second.to_string(),
        _ => false,
    }
}

/// Invariant: every routed target belongs to the declared grid, once.
pub fn invariant_targets_within_grid(
    targets: &[PhysicalTarget],
    grid: &[PhysicalTarget],
) -> Result<(), ShardingError> {
    let mut seen = HashSet::new();
    for target in targets {
        if !grid.contains(target) {
            return Err(ShardingError::ConfigError(format!(
                "target {target} is outside the declared data nodes"
            )));
        }
        if !seen.insert(target) {
            return Err(ShardingError::ConfigError(format!(
                "target {target} routed twice"
            )));
        }
    }
    Ok(())
}

/// Invariant: a table is sharded or broadcast, never implicitly both.
///
/// A non-broadcast table without any strategy must resolve to one data node.
pub fn invariant_sharded_xor_broadcast(rule: &TableRule) -> Result<(), ShardingError> {
    let has_strategy = rule.database_strategy.is_some() || rule.table_strategy.is_some();
    if rule.broadcast && has_strategy {
        return Err(ShardingError::ConfigError(format!(
            "table {} is both broadcast and sharded",
            rule.logic_table
        )));
    }
    if !rule.broadcast && !has_strategy && rule.data_nodes.len() != 1 {
        return Err(ShardingError::ConfigError(format!(
            "table {} spans {} data nodes but has no sharding strategy",
            rule.logic_table,
            rule.data_nodes.len()
        )));
    }
    Ok(())
}

/// Invariant: keys from one generator are strictly increasing.
pub fn invariant_monotonic_keys(keys: &[GeneratedKey]) -> bool {
    keys.windows(2).all(|pair| pair[0] < pair[1])
}

/// Invariant: worker id fits in the layout.
pub fn invariant_worker_id(worker_id: u16) -> Result<(), ShardingError> {
    if worker_id > MAX_WORKER_ID {
        return Err(ShardingError::ConfigError(format!(
            "worker id {worker_id} out of range 0..={MAX_WORKER_ID}"
        )));
    }
    Ok(())
}
