//! # Domain Errors
//!
//! Error types for the sharding engine.
//!
//! `ShardingError` covers everything the engine itself can reject: rule
//! configuration, SQL parsing and classification, routing, key generation
//! and partial fan-out failures. `ExecutionError` is the error type of the
//! outbound ports and describes a single physical target failing.

use thiserror::Error;

use super::entities::PartialFailure;
use super::value_objects::PhysicalTarget;

/// Sharding engine error types.
#[derive(Debug, Error)]
pub enum ShardingError {
    /// Invalid rule configuration (fatal, raised at registration time).
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Malformed SQL text.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// SQL the engine refuses to route (cross-shard joins, sub-queries...).
    #[error("Unsupported SQL: {0}")]
    UnsupportedSql(String),

    /// No rule registered under the logical table name.
    #[error("Table not found: {0}")]
    TableNotFound(String),

    /// A sharding algorithm produced a name outside the declared grid.
    #[error("No route target for {column} = {value} on table {table}")]
    NoRouteTarget {
        /// Logical table
        table: String,
        /// Sharding column
        column: String,
        /// Offending value
        value: String,
    },

    /// Inline expression could not be parsed or evaluated.
    #[error("Inline expression error: {0}")]
    Expression(String),

    /// The clock moved backwards past what the key generator tolerates.
    #[error("Clock moved backwards by {offset_ms}ms (tolerance {tolerance_ms}ms)")]
    ClockRegression {
        /// How far the clock went back
        offset_ms: u64,
        /// Configured tolerance
        tolerance_ms: u64,
    },

    /// A single-target statement failed on its only target.
    #[error("Execution failed on {target}: {source}")]
    Execution {
        /// The failing target
        target: PhysicalTarget,
        /// Underlying failure
        #[source]
        source: ExecutionError,
    },

    /// Some targets of a fan-out failed.
    #[error("{0}")]
    PartialFailure(Box<PartialFailure>),
}

impl ShardingError {
    /// Returns the partial failure detail, if this is a fan-out failure.
    pub fn partial_failure(&self) -> Option<&PartialFailure> {
        match self {
            ShardingError::PartialFailure(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Error raised by the outbound connection and execution ports.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExecutionError {
    /// Could not obtain a connection.
    #[error("Connection to {data_source} failed: {reason}")]
    Connection {
        /// Datasource name
        data_source: String,
        /// Driver message
        reason: String,
    },

    /// Datasource is not known to the provider.
    #[error("Unknown data source: {0}")]
    UnknownDataSource(String),

    /// The statement itself failed on the datasource.
    #[error("Statement failed: {0}")]
    Statement(String),

    /// Target did not answer within the per-target deadline.
    #[error("Timed out after {0}ms")]
    Timeout(u64),
}
