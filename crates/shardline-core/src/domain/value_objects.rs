//! # Domain Value Objects
//!
//! Immutable value types for the sharding engine.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

use super::errors::ShardingError;
use super::invariants::{SEQUENCE_BITS, SEQUENCE_MASK, SNOWFLAKE_EPOCH_MILLIS, TIMESTAMP_LEFT_SHIFT, WORKER_ID_MASK};

/// A single SQL scalar as seen by the router and the merger.
///
/// Values are totally ordered: `Null < Bool < numbers < Text`, with integers
/// and floats compared numerically, so they can be used as set members,
/// group keys and sort keys.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// Boolean literal.
    Bool(bool),
    /// Integer literal.
    Int(i64),
    /// Floating point literal.
    Float(f64),
    /// String literal.
    Text(String),
}

/// Numeric view used for cross-type comparison.
#[derive(Clone, Copy)]
enum Numeric {
    Int(i64),
    Float(f64),
}

impl Numeric {
    fn normalize(self) -> Self {
        match self {
            Numeric::Float(f) if f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 => {
                Numeric::Int(f as i64)
            }
            other => other,
        }
    }

    fn cmp(self, other: Self) -> Ordering {
        match (self.normalize(), other.normalize()) {
            (Numeric::Int(a), Numeric::Int(b)) => a.cmp(&b),
            (Numeric::Int(a), Numeric::Float(b)) => (a as f64).total_cmp(&b),
            (Numeric::Float(a), Numeric::Int(b)) => a.total_cmp(&(b as f64)),
            (Numeric::Float(a), Numeric::Float(b)) => a.total_cmp(&b),
        }
    }
}

impl SqlValue {
    /// Returns true for SQL NULL.
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Integer view of the value (integral floats and numeric text included).
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            SqlValue::Float(f) => match Numeric::Float(*f).normalize() {
                Numeric::Int(i) => Some(i),
                Numeric::Float(_) => None,
            },
            SqlValue::Text(s) => s.trim().parse().ok(),
            SqlValue::Null | SqlValue::Bool(_) => None,
        }
    }

    /// Floating point view of the value.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            SqlValue::Int(i) => Some(*i as f64),
            SqlValue::Float(f) => Some(*f),
            SqlValue::Text(s) => s.trim().parse().ok(),
            SqlValue::Null | SqlValue::Bool(_) => None,
        }
    }

    /// Renders the value as a SQL literal (strings quoted and escaped).
    pub fn to_sql_literal(&self) -> String {
        match self {
            SqlValue::Null => "NULL".to_string(),
            SqlValue::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            SqlValue::Int(i) => i.to_string(),
            SqlValue::Float(f) => f.to_string(),
            SqlValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
        }
    }

    /// Numeric addition used by SUM/COUNT merging. NULL is the identity.
    pub fn add(&self, other: &SqlValue) -> SqlValue {
        match (self, other) {
            (SqlValue::Null, v) | (v, SqlValue::Null) => v.clone(),
            (SqlValue::Int(a), SqlValue::Int(b)) => match a.checked_add(*b) {
                Some(sum) => SqlValue::Int(sum),
                None => SqlValue::Float(*a as f64 + *b as f64),
            },
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => SqlValue::Float(x + y),
                _ => SqlValue::Null,
            },
        }
    }

    fn rank(&self) -> u8 {
        match self {
            SqlValue::Null => 0,
            SqlValue::Bool(_) => 1,
            SqlValue::Int(_) | SqlValue::Float(_) => 2,
            SqlValue::Text(_) => 3,
        }
    }

    fn numeric(&self) -> Option<Numeric> {
        match self {
            SqlValue::Int(i) => Some(Numeric::Int(*i)),
            SqlValue::Float(f) => Some(Numeric::Float(*f)),
            _ => None,
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => write!(f, "NULL"),
            SqlValue::Bool(b) => write!(f, "{b}"),
            SqlValue::Int(i) => write!(f, "{i}"),
            SqlValue::Float(v) => write!(f, "{v}"),
            SqlValue::Text(s) => write!(f, "{s}"),
        }
    }
}

impl Ord for SqlValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SqlValue::Bool(a), SqlValue::Bool(b)) => a.cmp(b),
            (SqlValue::Text(a), SqlValue::Text(b)) => a.cmp(b),
            (a, b) => match (a.numeric(), b.numeric()) {
                (Some(x), Some(y)) => x.cmp(y),
                _ => a.rank().cmp(&b.rank()),
            },
        }
    }
}

impl PartialOrd for SqlValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for SqlValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for SqlValue {}

impl Hash for SqlValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rank().hash(state);
        match self {
            SqlValue::Null => {}
            SqlValue::Bool(b) => b.hash(state),
            SqlValue::Text(s) => s.hash(state),
            SqlValue::Int(_) | SqlValue::Float(_) => match self.numeric().map(Numeric::normalize) {
                Some(Numeric::Int(i)) => i.hash(state),
                Some(Numeric::Float(f)) => f.to_bits().hash(state),
                None => {}
            },
        }
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        SqlValue::Int(value)
    }
}

impl From<f64> for SqlValue {
    fn from(value: f64) -> Self {
        SqlValue::Float(value)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        SqlValue::Bool(value)
    }
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        SqlValue::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        SqlValue::Text(value)
    }
}

/// A physical routing target: one table in one datasource.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PhysicalTarget {
    /// Datasource identifier.
    pub data_source: String,
    /// Physical table name.
    pub table: String,
}

/// One `datasource.table` entry of a rule's declared grid.
pub type DataNode = PhysicalTarget;

impl PhysicalTarget {
    /// Create a target.
    pub fn new(data_source: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            data_source: data_source.into(),
            table: table.into(),
        }
    }

    /// Parse a `datasource.table` data node.
    pub fn parse(text: &str) -> Result<Self, ShardingError> {
        let text = text.trim();
        match text.split_once('.') {
            Some((ds, table)) if !ds.is_empty() && !table.is_empty() && !table.contains('.') => {
                Ok(Self::new(ds, table))
            }
            _ => Err(ShardingError::ConfigError(format!(
                "invalid data node `{text}`, expected `datasource.table`"
            ))),
        }
    }
}

impl fmt::Display for PhysicalTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.data_source, self.table)
    }
}

/// Statement category, decides routing and merging.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StatementKind {
    /// INSERT
    Insert,
    /// SELECT
    Select,
    /// UPDATE
    Update,
    /// DELETE
    Delete,
    /// CREATE / DROP / ALTER / TRUNCATE
    Ddl,
}

impl StatementKind {
    /// True for data-modifying statements.
    pub fn is_write(&self) -> bool {
        matches!(self, Self::Insert | Self::Update | Self::Delete)
    }

    /// True for statements answered with affected-row counts.
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Self::Select)
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Insert => "INSERT",
            Self::Select => "SELECT",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
            Self::Ddl => "DDL",
        };
        f.write_str(name)
    }
}

/// Snowflake identifier: timestamp | worker id | sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GeneratedKey(pub u64);

impl GeneratedKey {
    /// Assemble a key from its parts.
    pub fn compose(timestamp_millis: u64, worker_id: u16, sequence: u64) -> Self {
        let elapsed = timestamp_millis.saturating_sub(SNOWFLAKE_EPOCH_MILLIS);
        Self(
            (elapsed << TIMESTAMP_LEFT_SHIFT)
                | ((u64::from(worker_id) & WORKER_ID_MASK) << SEQUENCE_BITS)
                | (sequence & SEQUENCE_MASK),
        )
    }

    /// Raw 64-bit value.
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Wall-clock milliseconds the key was generated at.
    pub fn timestamp_millis(&self) -> u64 {
        (self.0 >> TIMESTAMP_LEFT_SHIFT) + SNOWFLAKE_EPOCH_MILLIS
    }

    /// Worker id embedded in the key.
    pub fn worker_id(&self) -> u16 {
        ((self.0 >> SEQUENCE_BITS) & WORKER_ID_MASK) as u16
    }

    /// Per-millisecond sequence.
    pub fn sequence(&self) -> u64 {
        self.0 & SEQUENCE_MASK
    }
}

impl From<GeneratedKey> for SqlValue {
    fn from(key: GeneratedKey) -> Self {
        // 41 timestamp bits keep the sign bit clear until 2086.
        SqlValue::Int(key.0 as i64)
    }
}

/// What a Snowflake generator does when the clock moves backwards within tolerance.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockRegressionPolicy {
    /// Block until the clock catches up (bounded by the tolerance).
    #[default]
    Wait,
    /// Fail immediately with `ClockRegression`.
    Fail,
}

/// ORDER BY direction.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum SortDirection {
    /// Ascending
    #[default]
    Asc,
    /// Descending
    Desc,
}

impl SortDirection {
    /// Apply the direction to an ascending ordering.
    pub fn apply(&self, ordering: Ordering) -> Ordering {
        match self {
            SortDirection::Asc => ordering,
            SortDirection::Desc => ordering.reverse(),
        }
    }
}

/// Aggregate functions the merger knows how to combine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AggregationKind {
    /// COUNT
    Count,
    /// SUM
    Sum,
    /// AVG
    Avg,
    /// MAX
    Max,
    /// MIN
    Min,
}

impl AggregationKind {
    /// Resolve a SQL function name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "COUNT" => Some(Self::Count),
            "SUM" => Some(Self::Sum),
            "AVG" => Some(Self::Avg),
            "MAX" => Some(Self::Max),
            "MIN" => Some(Self::Min),
            _ => None,
        }
    }
}

/// Values each column is constrained to by a WHERE clause or INSERT row.
///
/// A column absent from the map is unconstrained (routes everywhere). An
/// empty value set is a contradiction (routes nowhere).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ShardingConditions {
    columns: BTreeMap<String, BTreeSet<SqlValue>>,
}

impl ShardingConditions {
    /// No constraints.
    pub fn new() -> Self {
        Self::default()
    }

    /// A single column constrained to the given values.
    pub fn single(column: &str, values: impl IntoIterator<Item = SqlValue>) -> Self {
        let mut conditions = Self::new();
        conditions
            .columns
            .insert(column.to_ascii_lowercase(), values.into_iter().collect());
        conditions
    }

    /// Values the column is constrained to, if any.
    pub fn values(&self, column: &str) -> Option<&BTreeSet<SqlValue>> {
        self.columns.get(&column.to_ascii_lowercase())
    }

    /// True when nothing is constrained.
    pub fn is_unconstrained(&self) -> bool {
        self.columns.is_empty()
    }

    /// Constrained column names (lowercase).
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    /// Conjunction: per-column intersection.
    pub fn and(mut self, other: ShardingConditions) -> Self {
        for (column, values) in other.columns {
            match self.columns.get_mut(&column) {
                Some(existing) => existing.retain(|v| values.contains(v)),
                None => {
                    self.columns.insert(column, values);
                }
            }
        }
        self
    }

    /// Disjunction: only columns constrained on both sides survive, unioned.
    pub fn or(self, mut other: ShardingConditions) -> Self {
        let columns = self
            .columns
            .into_iter()
            .filter_map(|(column, mut values)| {
                other.columns.remove(&column).map(|rhs| {
                    values.extend(rhs);
                    (column, values)
                })
            })
            .collect();
        Self { columns }
    }
}
