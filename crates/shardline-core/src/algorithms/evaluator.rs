//! # Sharding Strategy Evaluator
//!
//! Resolves sharding conditions to physical targets of one table rule.
//!
//! Each dimension is resolved on its own:
//! - no strategy, or no value for its column: every declared name;
//! - equality: one name, IN: the union of names;
//! - an empty value set (contradictory WHERE): no name.
//!
//! The result is the declared grid filtered by both dimensions, so targets
//! come back deduplicated, inside the grid, and in declaration order.

use std::collections::BTreeSet;

use crate::domain::{PhysicalTarget, ShardingConditions, ShardingError, ShardingStrategy, TableRule};
use crate::sql::{InsertValues, LogicalStatement};

/// Targets of a classified statement on `rule`.
///
/// INSERT targets are the union of the per-row targets.
pub fn evaluate(
    rule: &TableRule,
    statement: &LogicalStatement,
) -> Result<Vec<PhysicalTarget>, ShardingError> {
    match &statement.insert {
        Some(insert) => {
            let per_row = evaluate_insert_rows(rule, insert)?;
            Ok(rule
                .data_nodes
                .iter()
                .filter(|node| per_row.contains(node))
                .cloned()
                .collect())
        }
        None => evaluate_conditions(rule, &statement.conditions),
    }
}

/// Targets matching a set of sharding conditions.
pub fn evaluate_conditions(
    rule: &TableRule,
    conditions: &ShardingConditions,
) -> Result<Vec<PhysicalTarget>, ShardingError> {
    if rule.broadcast {
        return Ok(rule.data_nodes.clone());
    }
    let data_sources = rule.data_source_names();
    let databases = resolve_dimension(
        &rule.logic_table,
        rule.database_strategy.as_ref(),
        &data_sources,
        conditions,
    )?;
    let tables = rule.actual_tables();
    let tables = resolve_dimension(
        &rule.logic_table,
        rule.table_strategy.as_ref(),
        &tables,
        conditions,
    )?;
    Ok(rule
        .data_nodes
        .iter()
        .filter(|node| databases.contains(&node.data_source) && tables.contains(&node.table))
        .cloned()
        .collect())
}

/// One target per INSERT row.
///
/// A row that does not resolve to exactly one target (missing sharding
/// value, non-literal value) is `UnsupportedSql`.
pub fn evaluate_insert_rows(
    rule: &TableRule,
    insert: &InsertValues,
) -> Result<Vec<PhysicalTarget>, ShardingError> {
    (0..insert.rows.len())
        .map(|row| {
            let mut targets = evaluate_conditions(rule, &insert.row_conditions(row))?;
            if targets.len() != 1 {
                return Err(ShardingError::UnsupportedSql(format!(
                    "INSERT row {} of {} resolves to {} targets; sharding columns {:?} need literal values",
                    row + 1,
                    rule.logic_table,
                    targets.len(),
                    rule.sharding_columns()
                )));
            }
            Ok(targets.remove(0))
        })
        .collect()
}

fn resolve_dimension(
    table: &str,
    strategy: Option<&ShardingStrategy>,
    available: &[&str],
    conditions: &ShardingConditions,
) -> Result<BTreeSet<String>, ShardingError> {
    let values = strategy.and_then(|s| conditions.values(&s.sharding_column).map(|v| (s, v)));
    match values {
        None => Ok(available.iter().map(|name| name.to_string()).collect()),
        Some((strategy, values)) => values
            .iter()
            .map(|value| strategy.route(table, available, value))
            .collect(),
    }
}
