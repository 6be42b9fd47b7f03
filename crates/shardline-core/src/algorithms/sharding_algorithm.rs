//! # Sharding Algorithms
//!
//! Named algorithms map a sharding column value to one shard name of a
//! dimension. They are tagged variants resolved once at registration time;
//! `CLASS_BASED` looks up implementations registered in code.
//!
//! Suffix based algorithms (`MOD`, `HASH_MOD`, `VOLUME_RANGE`,
//! `BOUNDARY_RANGE`) compute a partition index and select the declared name
//! whose trailing digits equal it, so `t_order0..t_order3` and `ds_0..ds_3`
//! both work.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::AlgorithmConfig;
use crate::domain::{ShardingError, SqlValue};

use super::inline_expression::InlineExpression;

/// User supplied algorithm for `CLASS_BASED` rules.
pub trait CustomShardingAlgorithm: Send + Sync + fmt::Debug {
    /// Pick one of `available_targets` for `value`; `None` when nothing matches.
    fn do_sharding(
        &self,
        available_targets: &[&str],
        column: &str,
        value: &SqlValue,
    ) -> Result<Option<String>, ShardingError>;
}

/// Custom algorithms keyed by class name.
pub type CustomAlgorithms = HashMap<String, Arc<dyn CustomShardingAlgorithm>>;

/// A resolved sharding algorithm.
#[derive(Clone, Debug)]
pub enum ShardingAlgorithm {
    /// Inline template evaluated with the sharding column bound.
    Inline(InlineExpression),
    /// `value mod sharding_count`.
    Mod {
        /// Number of partitions.
        sharding_count: u32,
    },
    /// `crc32(value text) mod sharding_count`.
    HashMod {
        /// Number of partitions.
        sharding_count: u32,
    },
    /// Fixed-width ranges between `lower` and `upper`, plus an underflow and
    /// an overflow partition.
    VolumeRange {
        /// Inclusive lower bound of partition 1.
        lower: i64,
        /// Values at or above this land in the last partition.
        upper: i64,
        /// Width of each partition.
        volume: i64,
    },
    /// Partition index = number of boundaries not greater than the value.
    BoundaryRange {
        /// Strictly ascending boundaries.
        boundaries: Vec<i64>,
    },
    /// Code-registered implementation.
    ClassBased {
        /// Name it was registered under.
        class_name: String,
        /// Implementation.
        algorithm: Arc<dyn CustomShardingAlgorithm>,
    },
}

impl ShardingAlgorithm {
    /// Resolve a configured algorithm.
    pub fn from_config(
        name: &str,
        config: &AlgorithmConfig,
        custom: &CustomAlgorithms,
    ) -> Result<Self, ShardingError> {
        let invalid = |reason: &str| {
            ShardingError::ConfigError(format!("sharding algorithm `{name}`: {reason}"))
        };
        match config {
            AlgorithmConfig::Inline {
                algorithm_expression,
            } => Ok(Self::Inline(InlineExpression::parse(algorithm_expression)?)),
            AlgorithmConfig::Mod { sharding_count } => {
                if *sharding_count == 0 {
                    return Err(invalid("sharding-count must be positive"));
                }
                Ok(Self::Mod {
                    sharding_count: *sharding_count,
                })
            }
            AlgorithmConfig::HashMod { sharding_count } => {
                if *sharding_count == 0 {
                    return Err(invalid("sharding-count must be positive"));
                }
                Ok(Self::HashMod {
                    sharding_count: *sharding_count,
                })
            }
            AlgorithmConfig::VolumeRange {
                range_lower,
                range_upper,
                sharding_volume,
            } => {
                if *sharding_volume <= 0 || range_lower >= range_upper {
                    return Err(invalid(
                        "requires range-lower < range-upper and a positive sharding-volume",
                    ));
                }
                Ok(Self::VolumeRange {
                    lower: *range_lower,
                    upper: *range_upper,
                    volume: *sharding_volume,
                })
            }
            AlgorithmConfig::BoundaryRange { sharding_ranges } => {
                if sharding_ranges.is_empty()
                    || sharding_ranges.windows(2).any(|pair| pair[0] >= pair[1])
                {
                    return Err(invalid("sharding-ranges must be non-empty and strictly ascending"));
                }
                Ok(Self::BoundaryRange {
                    boundaries: sharding_ranges.clone(),
                })
            }
            AlgorithmConfig::ClassBased {
                algorithm_class_name,
            } => custom
                .get(algorithm_class_name)
                .map(|algorithm| Self::ClassBased {
                    class_name: algorithm_class_name.clone(),
                    algorithm: Arc::clone(algorithm),
                })
                .ok_or_else(|| {
                    invalid(&format!(
                        "no custom algorithm registered as `{algorithm_class_name}`"
                    ))
                }),
        }
    }

    /// Algorithm type tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Inline(_) => "INLINE",
            Self::Mod { .. } => "MOD",
            Self::HashMod { .. } => "HASH_MOD",
            Self::VolumeRange { .. } => "VOLUME_RANGE",
            Self::BoundaryRange { .. } => "BOUNDARY_RANGE",
            Self::ClassBased { .. } => "CLASS_BASED",
        }
    }

    /// Canonical text used to compare definitions.
    pub fn describe(&self) -> String {
        match self {
            Self::Inline(expr) => format!("INLINE({})", expr.source()),
            Self::Mod { sharding_count } => format!("MOD({sharding_count})"),
            Self::HashMod { sharding_count } => format!("HASH_MOD({sharding_count})"),
            Self::VolumeRange {
                lower,
                upper,
                volume,
            } => format!("VOLUME_RANGE({lower},{upper},{volume})"),
            Self::BoundaryRange { boundaries } => format!("BOUNDARY_RANGE({boundaries:?})"),
            Self::ClassBased { class_name, .. } => format!("CLASS_BASED({class_name})"),
        }
    }

    /// Check the algorithm only reads `column`.
    pub fn validate_column(&self, column: &str) -> Result<(), ShardingError> {
        if let Self::Inline(expr) = self {
            let foreign: Vec<String> = expr
                .variables()
                .into_iter()
                .filter(|var| !var.eq_ignore_ascii_case(column))
                .collect();
            if !foreign.is_empty() {
                return Err(ShardingError::ConfigError(format!(
                    "inline expression `{}` references {:?} but shards on `{column}`",
                    expr.source(),
                    foreign
                )));
            }
        }
        Ok(())
    }

    /// Compute the shard name for a value.
    ///
    /// Returns `None` when the computed partition has no declared name. Inline
    /// and custom algorithms may return names outside `available`; the
    /// caller checks membership.
    pub fn do_sharding(
        &self,
        available: &[&str],
        column: &str,
        value: &SqlValue,
    ) -> Result<Option<String>, ShardingError> {
        match self {
            Self::Inline(expr) => expr.evaluate(&[(column, value)]).map(Some),
            Self::Mod { sharding_count } => {
                let v = integer_value(self.kind(), column, value)?;
                Ok(pick_by_suffix(
                    available,
                    v.rem_euclid(i64::from(*sharding_count)),
                ))
            }
            Self::HashMod { sharding_count } => {
                if value.is_null() {
                    return Err(ShardingError::UnsupportedSql(format!(
                        "HASH_MOD sharding column {column} cannot be NULL"
                    )));
                }
                let hash = crc32fast::hash(value.to_string().as_bytes());
                Ok(pick_by_suffix(
                    available,
                    i64::from(hash % *sharding_count),
                ))
            }
            Self::VolumeRange {
                lower,
                upper,
                volume,
            } => {
                let v = integer_value(self.kind(), column, value)?;
                Ok(pick_by_suffix(available, volume_partition(v, *lower, *upper, *volume)))
            }
            Self::BoundaryRange { boundaries } => {
                let v = integer_value(self.kind(), column, value)?;
                let index = boundaries.iter().filter(|b| **b <= v).count();
                Ok(pick_by_suffix(available, index as i64))
            }
            Self::ClassBased { algorithm, .. } => algorithm.do_sharding(available, column, value),
        }
    }
}

fn integer_value(kind: &str, column: &str, value: &SqlValue) -> Result<i64, ShardingError> {
    value.as_i64().ok_or_else(|| {
        ShardingError::UnsupportedSql(format!(
            "{kind} sharding requires an integer value for {column}, got `{value}`"
        ))
    })
}

fn volume_partition(value: i64, lower: i64, upper: i64, volume: i64) -> i64 {
    if value < lower {
        return 0;
    }
    let middle = (upper - lower + volume - 1) / volume;
    if value >= upper {
        return middle + 1;
    }
    (value - lower) / volume + 1
}

/// Trailing decimal digits of a name (`t_order12` -> 12).
pub fn numeric_suffix(name: &str) -> Option<i64> {
    let digits = name
        .bytes()
        .rev()
        .take_while(|b| b.is_ascii_digit())
        .count();
    if digits == 0 {
        return None;
    }
    name[name.len() - digits..].parse().ok()
}

fn pick_by_suffix(available: &[&str], index: i64) -> Option<String> {
    available
        .iter()
        .find(|name| numeric_suffix(name) == Some(index))
        .map(|name| name.to_string())
}
