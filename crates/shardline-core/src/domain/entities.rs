//! # Domain Entities
//!
//! Request-scoped routing artifacts and execution results.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::errors::ExecutionError;
use super::value_objects::{PhysicalTarget, SqlValue};

/// A rewritten statement bound to one physical target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoutedStatement {
    /// Where the statement runs.
    pub target: PhysicalTarget,
    /// Rewritten SQL text.
    pub sql: String,
}

impl RoutedStatement {
    /// Create a routed statement.
    pub fn new(target: PhysicalTarget, sql: impl Into<String>) -> Self {
        Self {
            target,
            sql: sql.into(),
        }
    }
}

impl fmt::Display for RoutedStatement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ::: {}", self.target.data_source, self.sql)
    }
}

/// Column labels plus rows.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    /// Column labels in projection order.
    pub columns: Vec<String>,
    /// Row values, one `Vec` per row, aligned with `columns`.
    pub rows: Vec<Vec<SqlValue>>,
}

impl RowSet {
    /// Create a row set.
    pub fn new(columns: Vec<String>, rows: Vec<Vec<SqlValue>>) -> Self {
        Self { columns, rows }
    }

    /// Case-insensitive column lookup.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|column| column.eq_ignore_ascii_case(name))
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// True when there are no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// All values of one column.
    pub fn column_values(&self, name: &str) -> Vec<SqlValue> {
        match self.column_index(name) {
            Some(idx) => self.rows.iter().filter_map(|row| row.get(idx).cloned()).collect(),
            None => Vec::new(),
        }
    }
}

/// What a single target returned.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum ExecOutcome {
    /// Query result.
    Rows(RowSet),
    /// Affected row count of a write or DDL statement.
    Affected(u64),
}

/// Result of one routed statement, tagged with its position in the route.
#[derive(Clone, Debug)]
pub struct ShardResult {
    /// Index into the routed statement sequence.
    pub route_index: usize,
    /// Target the statement ran on.
    pub target: PhysicalTarget,
    /// Outcome or failure.
    pub outcome: Result<ExecOutcome, ExecutionError>,
}

/// Merged result of a logical statement.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum LogicalResult {
    /// Merged query rows.
    Rows(RowSet),
    /// Summed affected rows, plus keys generated for INSERT.
    Affected {
        /// Total affected rows.
        rows: u64,
        /// Keys filled in by the key generator, in row order.
        generated_keys: Vec<SqlValue>,
    },
}

impl LogicalResult {
    /// Affected-row result without generated keys.
    pub fn affected(rows: u64) -> Self {
        LogicalResult::Affected {
            rows,
            generated_keys: Vec::new(),
        }
    }

    /// Row set, for queries.
    pub fn rows(&self) -> Option<&RowSet> {
        match self {
            LogicalResult::Rows(rows) => Some(rows),
            LogicalResult::Affected { .. } => None,
        }
    }

    /// Affected rows, for writes.
    pub fn affected_rows(&self) -> Option<u64> {
        match self {
            LogicalResult::Affected { rows, .. } => Some(*rows),
            LogicalResult::Rows(_) => None,
        }
    }

    /// Keys generated while executing an INSERT.
    pub fn generated_keys(&self) -> &[SqlValue] {
        match self {
            LogicalResult::Affected { generated_keys, .. } => generated_keys,
            LogicalResult::Rows(_) => &[],
        }
    }
}

/// One failed target of a fan-out.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TargetFailure {
    /// The failed target.
    pub target: PhysicalTarget,
    /// Why it failed.
    pub error: ExecutionError,
}

/// Some targets of a fan-out failed. Nothing is rolled back.
#[derive(Clone, Debug, PartialEq)]
pub struct PartialFailure {
    /// Merged result of the targets that succeeded.
    pub partial: LogicalResult,
    /// Targets that succeeded.
    pub succeeded: Vec<PhysicalTarget>,
    /// Targets that failed, with their errors.
    pub failed: Vec<TargetFailure>,
}

impl PartialFailure {
    /// Targets a caller may retry.
    pub fn retryable_targets(&self) -> Vec<&PhysicalTarget> {
        self.failed.iter().map(|failure| &failure.target).collect()
    }
}

impl fmt::Display for PartialFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.failed.len() + self.succeeded.len();
        write!(
            f,
            "Partial failure: {} of {} targets failed: ",
            self.failed.len(),
            total
        )?;
        let detail: Vec<String> = self
            .failed
            .iter()
            .map(|failure| format!("{} ({})", failure.target, failure.error))
            .collect();
        f.write_str(&detail.join(", "))
    }
}
