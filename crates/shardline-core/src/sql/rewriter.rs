//! # Statement Rewriter
//!
//! In-place AST edits applied per routed target: logical to physical table
//! names, INSERT row splitting, generated key columns, derived projections
//! and LIMIT widening.

use std::collections::HashMap;
use std::ops::ControlFlow;

use sqlparser::ast::{
    visit_expressions_mut, Expr, FromTable, Ident, LimitClause, ObjectName, ObjectNamePart,
    Query, SelectItem, SetExpr, Statement, TableFactor, TableObject, TableWithJoins,
};

use crate::domain::{ShardingError, SqlValue};

use super::parse_expression;

/// Logical (lowercase) to physical table names.
pub type TableRenames = HashMap<String, String>;

/// Replace every logical table reference, including `table.column`
/// qualifiers. Aliases and unlisted tables are left alone.
pub fn rename_tables(statement: &mut Statement, renames: &TableRenames) {
    if renames.is_empty() {
        return;
    }
    match statement {
        Statement::Insert(insert) => {
            if let TableObject::TableName(name) = &mut insert.table {
                rename(name, renames);
            }
        }
        Statement::Query(query) => rename_in_query(query, renames),
        Statement::Update { table, .. } => rename_in_relation(table, renames),
        Statement::Delete(delete) => match &mut delete.from {
            FromTable::WithFromKeyword(tables) | FromTable::WithoutKeyword(tables) => {
                tables.iter_mut().for_each(|t| rename_in_relation(t, renames));
            }
        },
        Statement::CreateTable(create) => rename(&mut create.name, renames),
        Statement::CreateIndex(create) => rename(&mut create.table_name, renames),
        Statement::AlterTable { name, .. } => rename(name, renames),
        Statement::Drop { names, .. } => names.iter_mut().for_each(|n| rename(n, renames)),
        Statement::Truncate { table_names, .. } => {
            table_names.iter_mut().for_each(|t| rename(&mut t.name, renames));
        }
        _ => {}
    }
    let visited: ControlFlow<()> = visit_expressions_mut(statement, |expr| {
        if let Expr::CompoundIdentifier(idents) = expr {
            if idents.len() >= 2 {
                let owner = idents.len() - 2;
                if let Some(physical) = renames.get(&idents[owner].value.to_ascii_lowercase()) {
                    idents[owner].value = physical.clone();
                }
            }
        }
        ControlFlow::Continue(())
    });
    // The visitor never breaks early.
    debug_assert!(visited.is_continue());
}

fn rename_in_query(query: &mut Query, renames: &TableRenames) {
    if let SetExpr::Select(select) = query.body.as_mut() {
        select
            .from
            .iter_mut()
            .for_each(|t| rename_in_relation(t, renames));
    }
}

fn rename_in_relation(table: &mut TableWithJoins, renames: &TableRenames) {
    rename_factor(&mut table.relation, renames);
    for join in &mut table.joins {
        rename_factor(&mut join.relation, renames);
    }
}

fn rename_factor(factor: &mut TableFactor, renames: &TableRenames) {
    if let TableFactor::Table { name, .. } = factor {
        rename(name, renames);
    }
}

fn rename(name: &mut ObjectName, renames: &TableRenames) {
    if let Some(ObjectNamePart::Identifier(ident)) = name.0.last_mut() {
        if let Some(physical) = renames.get(&ident.value.to_ascii_lowercase()) {
            ident.value = physical.clone();
        }
    }
}

fn values_rows(statement: &mut Statement) -> Option<&mut Vec<Vec<Expr>>> {
    let Statement::Insert(insert) = statement else {
        return None;
    };
    match insert.source.as_mut()?.body.as_mut() {
        SetExpr::Values(values) => Some(&mut values.rows),
        _ => None,
    }
}

/// Keep only the given INSERT rows, in the given order.
pub fn retain_insert_rows(statement: &mut Statement, keep: &[usize]) {
    if let Some(rows) = values_rows(statement) {
        let kept = keep.iter().filter_map(|i| rows.get(*i).cloned()).collect();
        *rows = kept;
    }
}

/// Append a column to an INSERT with one literal per row.
pub fn append_insert_column(
    statement: &mut Statement,
    column: &str,
    values: &[SqlValue],
) -> Result<(), ShardingError> {
    let literals = values
        .iter()
        .map(|value| parse_expression(&value.to_sql_literal()))
        .collect::<Result<Vec<_>, _>>()?;
    if let Statement::Insert(insert) = statement {
        insert.columns.push(Ident::new(column));
    }
    let rows = values_rows(statement)
        .ok_or_else(|| ShardingError::UnsupportedSql("INSERT without VALUES".to_string()))?;
    for (row, literal) in rows.iter_mut().zip(literals) {
        row.push(literal);
    }
    Ok(())
}

fn select_mut(statement: &mut Statement) -> Result<&mut sqlparser::ast::Select, ShardingError> {
    if let Statement::Query(query) = statement {
        if let SetExpr::Select(select) = query.body.as_mut() {
            return Ok(select);
        }
    }
    Err(ShardingError::UnsupportedSql(
        "derived columns need a plain SELECT".to_string(),
    ))
}

/// Append `expression AS alias` to the select list.
pub fn add_projection(
    statement: &mut Statement,
    expression: &str,
    alias: &str,
) -> Result<(), ShardingError> {
    let expr = parse_expression(expression)?;
    select_mut(statement)?.projection.push(SelectItem::ExprWithAlias {
        expr,
        alias: Ident::new(alias),
    });
    Ok(())
}

/// Replace LIMIT/OFFSET with a plain `LIMIT n`, or drop it.
pub fn set_limit(statement: &mut Statement, limit: Option<u64>) -> Result<(), ShardingError> {
    let Statement::Query(query) = statement else {
        return Ok(());
    };
    query.limit_clause = match limit {
        Some(n) => Some(LimitClause::LimitOffset {
            limit: Some(parse_expression(&n.to_string())?),
            offset: None,
            limit_by: Vec::new(),
        }),
        None => None,
    };
    Ok(())
}
