//! # SQL Statement Classifier
//!
//! Turns raw SQL into a [`LogicalStatement`]: statement kind, logical
//! tables, sharding conditions, INSERT rows and SELECT merge context.
//!
//! Statements the engine cannot route safely are rejected here, before
//! anything is executed:
//! - joins across tables that are not bound together;
//! - sub-queries;
//! - UPDATE of a sharding column;
//! - anything other than DML and table DDL.
//!
//! A qualified column only constrains routing when its qualifier names a
//! sharded table of the statement. NULL never matches a row, so NULL
//! literals drop out of sharding value sets.

use std::collections::HashMap;
use std::sync::Arc;

use sqlparser::ast::{
    AssignmentTarget, BinaryOperator, Distinct, DuplicateTreatment, Expr, FromTable,
    FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr, LimitClause, ObjectType,
    OrderByKind, Query, Select, SelectItem, SetExpr, Statement, TableFactor, TableObject,
    TableWithJoins, Value,
};
use tracing::debug;

use crate::domain::{
    AggregationKind, RuleRegistry, ShardingConditions, ShardingError, SortDirection, SqlValue,
    StatementKind,
};

use super::statement::{InsertValues, LogicalStatement, OrderItem, Projection, SelectContext};
use super::{column_name, literal_value, object_table_name, parse_statement};

/// Classifies SQL against a rule registry.
#[derive(Clone, Debug)]
pub struct SqlClassifier {
    registry: Arc<RuleRegistry>,
}

impl SqlClassifier {
    /// Create a classifier.
    pub fn new(registry: Arc<RuleRegistry>) -> Self {
        Self { registry }
    }

    /// Parse and classify one statement.
    pub fn classify(&self, sql: &str) -> Result<LogicalStatement, ShardingError> {
        let ast = parse_statement(sql)?;
        let mut statement = match &ast {
            Statement::Insert(insert) => {
                let table = match &insert.table {
                    TableObject::TableName(name) => object_table_name(name)?,
                    _ => return Err(unsupported("INSERT into a table function")),
                };
                let columns = insert.columns.iter().map(|c| c.value.clone()).collect();
                let values = insert_values(columns, insert.source.as_deref())?;
                LogicalStatement {
                    kind: StatementKind::Insert,
                    tables: vec![table],
                    conditions: ShardingConditions::new(),
                    insert: Some(values),
                    select: None,
                    ast: ast.clone(),
                }
            }
            Statement::Query(query) => {
                let (tables, conditions, context) = classify_query(&self.registry, query)?;
                LogicalStatement {
                    kind: StatementKind::Select,
                    tables,
                    conditions,
                    insert: None,
                    select: Some(context),
                    ast: ast.clone(),
                }
            }
            Statement::Update {
                table,
                assignments,
                from,
                selection,
                ..
            } => {
                if from.is_some() || !table.joins.is_empty() {
                    return Err(unsupported("multi-table UPDATE"));
                }
                let mut tables = Vec::new();
                collect_tables(table, &mut tables)?;
                for assignment in assignments {
                    if let AssignmentTarget::ColumnName(name) = &assignment.target {
                        let column = object_table_name(name)?;
                        self.reject_sharding_column_update(&tables, &column)?;
                    }
                }
                LogicalStatement {
                    kind: StatementKind::Update,
                    tables,
                    conditions: ConditionScope::new(&self.registry, std::slice::from_ref(table))
                        .where_conditions(selection.as_ref())?,
                    insert: None,
                    select: None,
                    ast: ast.clone(),
                }
            }
            Statement::Delete(delete) => {
                if !delete.tables.is_empty() || delete.using.is_some() {
                    return Err(unsupported("multi-table DELETE"));
                }
                let mut tables = Vec::new();
                let (FromTable::WithFromKeyword(from) | FromTable::WithoutKeyword(from)) =
                    &delete.from;
                for table in from {
                    collect_tables(table, &mut tables)?;
                }
                LogicalStatement {
                    kind: StatementKind::Delete,
                    tables,
                    conditions: ConditionScope::new(&self.registry, from)
                        .where_conditions(delete.selection.as_ref())?,
                    insert: None,
                    select: None,
                    ast: ast.clone(),
                }
            }
            other => ddl(other, ast.clone())?,
        };
        dedup_tables(&mut statement.tables);
        self.validate_tables(&statement.tables)?;
        debug!(
            kind = %statement.kind,
            tables = ?statement.tables,
            "[shardline] statement classified"
        );
        Ok(statement)
    }

    fn reject_sharding_column_update(
        &self,
        tables: &[String],
        column: &str,
    ) -> Result<(), ShardingError> {
        for table in tables {
            if let Some(rule) = self.registry.find(table) {
                if rule.is_sharding_column(column) {
                    return Err(ShardingError::UnsupportedSql(format!(
                        "UPDATE of sharding column {column} on {table}"
                    )));
                }
            }
        }
        Ok(())
    }

    /// Several tables are routable together only when they cannot end up
    /// on different shards.
    fn validate_tables(&self, tables: &[String]) -> Result<(), ShardingError> {
        if tables.len() < 2 {
            return Ok(());
        }
        let sharded: Vec<&str> = tables
            .iter()
            .filter(|t| self.registry.find(t).is_some_and(|rule| !rule.broadcast))
            .map(String::as_str)
            .collect();
        if sharded.is_empty() {
            return Ok(());
        }
        if let Some(unregistered) = tables.iter().find(|t| self.registry.find(t).is_none()) {
            return Err(ShardingError::UnsupportedSql(format!(
                "join between sharded table {} and unregistered table {unregistered}",
                sharded[0]
            )));
        }
        let primary = sharded[0];
        for other in &sharded[1..] {
            if !self.registry.are_bound(primary, other) {
                return Err(ShardingError::UnsupportedSql(format!(
                    "cross-shard join between {primary} and {other}"
                )));
            }
        }
        Ok(())
    }
}

fn unsupported(what: &str) -> ShardingError {
    ShardingError::UnsupportedSql(format!("{what} is not supported"))
}

fn dedup_tables(tables: &mut Vec<String>) {
    let mut seen: Vec<String> = Vec::new();
    tables.retain(|t| {
        let key = t.to_ascii_lowercase();
        if seen.contains(&key) {
            false
        } else {
            seen.push(key);
            true
        }
    });
}

fn collect_tables(table: &TableWithJoins, out: &mut Vec<String>) -> Result<(), ShardingError> {
    collect_factor(&table.relation, out)?;
    for join in &table.joins {
        collect_factor(&join.relation, out)?;
    }
    Ok(())
}

fn collect_factor(factor: &TableFactor, out: &mut Vec<String>) -> Result<(), ShardingError> {
    match factor {
        TableFactor::Table { name, .. } => {
            out.push(object_table_name(name)?);
            Ok(())
        }
        TableFactor::Derived { .. } => Err(unsupported("sub-query in FROM")),
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => collect_tables(table_with_joins, out),
        other => Err(ShardingError::UnsupportedSql(format!(
            "table factor {other} is not supported"
        ))),
    }
}

fn insert_values(columns: Vec<String>, source: Option<&Query>) -> Result<InsertValues, ShardingError> {
    let source = source.ok_or_else(|| unsupported("INSERT without VALUES"))?;
    let SetExpr::Values(values) = source.body.as_ref() else {
        return Err(unsupported("INSERT ... SELECT"));
    };
    let rows = values
        .rows
        .iter()
        .map(|row| row.iter().map(literal_value).collect())
        .collect();
    Ok(InsertValues { columns, rows })
}

/// Column references of a WHERE clause, resolved against the tables in
/// FROM / JOIN.
struct ConditionScope<'a> {
    registry: &'a RuleRegistry,
    /// Lowercase alias or table name to logical table.
    qualifiers: HashMap<String, String>,
}

impl<'a> ConditionScope<'a> {
    fn new(registry: &'a RuleRegistry, from: &[TableWithJoins]) -> Self {
        let mut qualifiers = HashMap::new();
        for table in from {
            collect_qualifiers(&table.relation, &mut qualifiers);
            for join in &table.joins {
                collect_qualifiers(&join.relation, &mut qualifiers);
            }
        }
        Self {
            registry,
            qualifiers,
        }
    }

    fn where_conditions(&self, selection: Option<&Expr>) -> Result<ShardingConditions, ShardingError> {
        match selection {
            Some(expr) => self.conditions(expr),
            None => Ok(ShardingConditions::new()),
        }
    }

    /// Sharding conditions of a predicate.
    fn conditions(&self, expr: &Expr) -> Result<ShardingConditions, ShardingError> {
        match expr {
            Expr::BinaryOp {
                left,
                op: BinaryOperator::And,
                right,
            } => Ok(self.conditions(left)?.and(self.conditions(right)?)),
            Expr::BinaryOp {
                left,
                op: BinaryOperator::Or,
                right,
            } => Ok(self.conditions(left)?.or(self.conditions(right)?)),
            Expr::BinaryOp {
                left,
                op: BinaryOperator::Eq,
                right,
            } => {
                let equality = match (self.column(left), literal_value(right)) {
                    (Some(column), Some(value)) => Some((column, value)),
                    _ => self.column(right).zip(literal_value(left)),
                };
                Ok(match equality {
                    Some((column, value)) => matching(&column, [value]),
                    None => ShardingConditions::new(),
                })
            }
            Expr::InList {
                expr,
                list,
                negated: false,
            } => {
                let values: Option<Vec<SqlValue>> = list.iter().map(literal_value).collect();
                Ok(match (self.column(expr), values) {
                    (Some(column), Some(values)) => matching(&column, values),
                    _ => ShardingConditions::new(),
                })
            }
            Expr::Nested(inner) => self.conditions(inner),
            Expr::InSubquery { .. } | Expr::Exists { .. } | Expr::Subquery(_) => {
                Err(unsupported("sub-query"))
            }
            _ => Ok(ShardingConditions::new()),
        }
    }

    /// Column name of a reference that may constrain routing. Qualified
    /// references count only when they point at a sharded table.
    fn column(&self, expr: &Expr) -> Option<String> {
        match expr {
            Expr::CompoundIdentifier(idents) => {
                let (column, path) = idents.split_last()?;
                let qualifier = path.last()?.value.to_ascii_lowercase();
                let table = self.qualifiers.get(&qualifier)?;
                self.registry.find(table).filter(|rule| !rule.broadcast)?;
                Some(column.value.clone())
            }
            Expr::Nested(inner) => self.column(inner),
            other => column_name(other),
        }
    }
}

fn collect_qualifiers(factor: &TableFactor, out: &mut HashMap<String, String>) {
    match factor {
        TableFactor::Table { name, alias, .. } => {
            if let Ok(table) = object_table_name(name) {
                if let Some(alias) = alias {
                    out.insert(alias.name.value.to_ascii_lowercase(), table.clone());
                }
                out.insert(table.to_ascii_lowercase(), table);
            }
        }
        TableFactor::NestedJoin {
            table_with_joins, ..
        } => {
            collect_qualifiers(&table_with_joins.relation, out);
            for join in &table_with_joins.joins {
                collect_qualifiers(&join.relation, out);
            }
        }
        _ => {}
    }
}

/// Equality against literal values; NULL matches nothing.
fn matching(column: &str, values: impl IntoIterator<Item = SqlValue>) -> ShardingConditions {
    ShardingConditions::single(column, values.into_iter().filter(|value| !value.is_null()))
}

fn classify_query(
    registry: &RuleRegistry,
    query: &Query,
) -> Result<(Vec<String>, ShardingConditions, SelectContext), ShardingError> {
    if query.with.is_some() {
        return Err(unsupported("WITH"));
    }
    let SetExpr::Select(select) = query.body.as_ref() else {
        return Err(unsupported("set operation"));
    };
    let mut tables = Vec::new();
    for table in &select.from {
        collect_tables(table, &mut tables)?;
    }
    let conditions =
        ConditionScope::new(registry, &select.from).where_conditions(select.selection.as_ref())?;
    let context = select_context(query, select)?;
    Ok((tables, conditions, context))
}

fn select_context(query: &Query, select: &Select) -> Result<SelectContext, ShardingError> {
    let mut context = SelectContext {
        distinct: match &select.distinct {
            None => false,
            Some(Distinct::Distinct) => true,
            Some(Distinct::On(_)) => return Err(unsupported("DISTINCT ON")),
        },
        having: select.having.is_some(),
        ..Default::default()
    };
    for item in &select.projection {
        match item {
            SelectItem::UnnamedExpr(expr) => context.projections.push(projection(expr, None)?),
            SelectItem::ExprWithAlias { expr, alias } => context
                .projections
                .push(projection(expr, Some(alias.value.clone()))?),
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(..) => {
                context.has_wildcard = true
            }
        }
    }
    match &select.group_by {
        GroupByExpr::Expressions(exprs, _) => {
            for expr in exprs {
                let expression = match select_list_item(&context, expr, "GROUP BY")? {
                    Some(projection) if projection.aggregation.is_some() => {
                        return Err(ShardingError::UnsupportedSql(format!(
                            "GROUP BY {expr} refers to aggregate {}",
                            projection.expression
                        )))
                    }
                    Some(projection) => projection.expression.clone(),
                    None => expr.to_string(),
                };
                context.group_by.push(expression);
            }
        }
        GroupByExpr::All(_) => return Err(unsupported("GROUP BY ALL")),
    }
    if let Some(order_by) = &query.order_by {
        let OrderByKind::Expressions(items) = &order_by.kind else {
            return Err(unsupported("ORDER BY ALL"));
        };
        for item in items {
            let (expression, column) = match select_list_item(&context, &item.expr, "ORDER BY")? {
                Some(projection) => (projection.expression.clone(), Some(projection.label.clone())),
                None => (item.expr.to_string(), column_name(&item.expr)),
            };
            context.order_by.push(OrderItem {
                expression,
                column,
                direction: match item.options.asc {
                    Some(false) => SortDirection::Desc,
                    _ => SortDirection::Asc,
                },
            });
        }
    }
    match &query.limit_clause {
        None => {}
        Some(LimitClause::LimitOffset { limit, offset, .. }) => {
            context.limit = limit.as_ref().map(row_count).transpose()?;
            context.offset = offset.as_ref().map(|o| row_count(&o.value)).transpose()?;
        }
        Some(LimitClause::OffsetCommaLimit { offset, limit }) => {
            context.limit = Some(row_count(limit)?);
            context.offset = Some(row_count(offset)?);
        }
    }
    Ok(context)
}

/// Projection a positional ORDER BY / GROUP BY item (`ORDER BY 2`) refers
/// to. Positions are 1-based. Over a wildcard select list the position is
/// left as written.
fn select_list_item<'c>(
    context: &'c SelectContext,
    expr: &Expr,
    clause: &str,
) -> Result<Option<&'c Projection>, ShardingError> {
    let Expr::Value(value) = expr else {
        return Ok(None);
    };
    let Value::Number(text, _) = &value.value else {
        return Ok(None);
    };
    if context.has_wildcard {
        return Ok(None);
    }
    text.parse::<usize>()
        .ok()
        .and_then(|position| position.checked_sub(1))
        .and_then(|index| context.projections.get(index))
        .map(Some)
        .ok_or_else(|| {
            ShardingError::UnsupportedSql(format!(
                "{clause} position {text} is outside the select list of {} items",
                context.projections.len()
            ))
        })
}

fn row_count(expr: &Expr) -> Result<u64, ShardingError> {
    literal_value(expr)
        .and_then(|v| v.as_i64())
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| {
            ShardingError::UnsupportedSql(format!("LIMIT/OFFSET must be a literal, got {expr}"))
        })
}

fn projection(expr: &Expr, alias: Option<String>) -> Result<Projection, ShardingError> {
    if matches!(expr, Expr::Subquery(_) | Expr::Exists { .. } | Expr::InSubquery { .. }) {
        return Err(unsupported("sub-query"));
    }
    let expression = expr.to_string();
    let mut projection = Projection {
        label: alias
            .clone()
            .or_else(|| column_name(expr))
            .unwrap_or_else(|| expression.clone()),
        expression,
        alias,
        aggregation: None,
        argument: None,
        distinct_argument: false,
    };
    if let Expr::Function(function) = expr {
        let name = function.name.to_string();
        if let Some(kind) = AggregationKind::from_name(&name) {
            projection.aggregation = Some(kind);
            if let FunctionArguments::List(list) = &function.args {
                projection.distinct_argument =
                    matches!(list.duplicate_treatment, Some(DuplicateTreatment::Distinct));
                projection.argument = list.args.first().map(|arg| match arg {
                    FunctionArg::Unnamed(FunctionArgExpr::Expr(e)) => e.to_string(),
                    FunctionArg::Unnamed(FunctionArgExpr::Wildcard) => "*".to_string(),
                    other => other.to_string(),
                });
            }
        }
    }
    Ok(projection)
}

fn ddl(statement: &Statement, ast: Statement) -> Result<LogicalStatement, ShardingError> {
    let tables = match statement {
        Statement::CreateTable(create) => vec![object_table_name(&create.name)?],
        Statement::CreateIndex(create) => vec![object_table_name(&create.table_name)?],
        Statement::AlterTable { name, .. } => vec![object_table_name(name)?],
        Statement::Drop {
            object_type: ObjectType::Table,
            names,
            ..
        } => {
            if names.len() != 1 {
                return Err(unsupported("DROP of several tables at once"));
            }
            vec![object_table_name(&names[0])?]
        }
        Statement::Truncate { table_names, .. } => {
            if table_names.len() != 1 {
                return Err(unsupported("TRUNCATE of several tables at once"));
            }
            vec![object_table_name(&table_names[0].name)?]
        }
        other => {
            let text = other.to_string();
            let keyword = text.split_whitespace().next().unwrap_or_default().to_uppercase();
            return Err(ShardingError::UnsupportedSql(format!(
                "{keyword} statements are not supported"
            )));
        }
    };
    Ok(LogicalStatement {
        kind: StatementKind::Ddl,
        tables,
        conditions: ShardingConditions::new(),
        insert: None,
        select: None,
        ast,
    })
}
