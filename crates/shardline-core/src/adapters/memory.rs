//! In-Memory Datasources Adapter
//!
//! Implements `ConnectionProvider` and `StatementExecutor` over named
//! in-memory databases. Each routed statement is parsed and run against
//! plain row vectors, which is enough to exercise routing and merging end
//! to end without a database server.
//!
//! Supported: CREATE/DROP/TRUNCATE/ALTER TABLE ... ADD COLUMN, INSERT ...
//! VALUES, single-table SELECT (WHERE, aggregates, GROUP BY, HAVING, ORDER
//! BY, DISTINCT, LIMIT/OFFSET), UPDATE and DELETE. Joins are rejected.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use sqlparser::ast::{
    AlterTableOperation, AssignmentTarget, BinaryOperator, Distinct, Expr, FromTable,
    FunctionArg, FunctionArgExpr, FunctionArguments, GroupByExpr, LimitClause, ObjectName,
    ObjectType, OrderByKind, Query, Select, SelectItem, SetExpr, Statement, TableFactor,
    TableObject, TableWithJoins, UnaryOperator,
};
use tracing::debug;

use crate::domain::{
    AggregationKind, ExecOutcome, ExecutionError, RoutedStatement, RowSet, SqlValue,
};
use crate::ports::outbound::{ConnectionProvider, StatementExecutor};
use crate::sql::{column_name, literal_value, object_table_name, parse_statement};

type Row = Vec<SqlValue>;

#[derive(Clone, Debug, Default)]
struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    fn column_index(&self, name: &str) -> Result<usize, ExecutionError> {
        self.columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .ok_or_else(|| failure(format!("unknown column {name}")))
    }
}

#[derive(Debug, Default)]
struct Database {
    tables: HashMap<String, Table>,
    online: bool,
}

impl Database {
    fn table(&self, name: &ObjectName) -> Result<&Table, ExecutionError> {
        let name = table_key(name)?;
        self.tables
            .get(&name)
            .ok_or_else(|| failure(format!("table {name} doesn't exist")))
    }

    fn table_mut(&mut self, name: &ObjectName) -> Result<&mut Table, ExecutionError> {
        let name = table_key(name)?;
        self.tables
            .get_mut(&name)
            .ok_or_else(|| failure(format!("table {name} doesn't exist")))
    }
}

/// Connection handed out by [`InMemoryDataSources`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MemoryConnection {
    /// Datasource the connection points at.
    pub data_source: String,
}

/// A fixed set of in-memory databases, one per datasource name.
///
/// Clones share the same databases.
#[derive(Clone, Debug, Default)]
pub struct InMemoryDataSources {
    databases: Arc<RwLock<HashMap<String, Database>>>,
}

impl InMemoryDataSources {
    /// Create empty databases for the given datasource names.
    pub fn new<I, S>(data_sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let databases = data_sources
            .into_iter()
            .map(|name| {
                let db = Database {
                    online: true,
                    ..Database::default()
                };
                (name.into(), db)
            })
            .collect();
        Self {
            databases: Arc::new(RwLock::new(databases)),
        }
    }

    /// Refuse (or accept again) connections to a datasource.
    pub fn set_online(&self, data_source: &str, online: bool) {
        if let Some(db) = self.databases.write().get_mut(data_source) {
            db.online = online;
        }
    }

    /// Snapshot of one physical table.
    pub fn table(&self, data_source: &str, table: &str) -> Option<RowSet> {
        let databases = self.databases.read();
        let table = databases
            .get(data_source)?
            .tables
            .get(&table.to_ascii_lowercase())?;
        Some(RowSet::new(table.columns.clone(), table.rows.clone()))
    }

    /// Rows stored in one physical table (0 when it does not exist).
    pub fn row_count(&self, data_source: &str, table: &str) -> usize {
        self.table(data_source, table).map_or(0, |rows| rows.len())
    }

    /// Physical table names of a datasource, sorted.
    pub fn table_names(&self, data_source: &str) -> Vec<String> {
        let databases = self.databases.read();
        let mut names: Vec<String> = databases
            .get(data_source)
            .map(|db| db.tables.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    fn run(&self, data_source: &str, sql: &str) -> Result<ExecOutcome, ExecutionError> {
        let statement = parse_statement(sql).map_err(|e| failure(e.to_string()))?;
        let mut databases = self.databases.write();
        let db = databases
            .get_mut(data_source)
            .ok_or_else(|| ExecutionError::UnknownDataSource(data_source.to_string()))?;
        match &statement {
            Statement::Query(query) => select(db, query).map(ExecOutcome::Rows),
            Statement::Insert(insert) => {
                let TableObject::TableName(name) = &insert.table else {
                    return Err(failure("INSERT into a table function".to_string()));
                };
                let source = insert
                    .source
                    .as_ref()
                    .ok_or_else(|| failure("INSERT without VALUES".to_string()))?;
                let SetExpr::Values(values) = source.body.as_ref() else {
                    return Err(failure("only INSERT ... VALUES is supported".to_string()));
                };
                let table = db.table_mut(name)?;
                let positions = if insert.columns.is_empty() {
                    (0..table.columns.len()).collect()
                } else {
                    insert
                        .columns
                        .iter()
                        .map(|c| table.column_index(&c.value))
                        .collect::<Result<Vec<_>, _>>()?
                };
                let mut inserted = 0;
                for exprs in &values.rows {
                    if exprs.len() != positions.len() {
                        return Err(failure("column count doesn't match value count".to_string()));
                    }
                    let mut row = vec![SqlValue::Null; table.columns.len()];
                    for (position, expr) in positions.iter().zip(exprs) {
                        row[*position] = evaluate(expr, &Scope::empty())?;
                    }
                    table.rows.push(row);
                    inserted += 1;
                }
                Ok(ExecOutcome::Affected(inserted))
            }
            Statement::Update {
                table,
                assignments,
                selection,
                ..
            } => {
                let table = db.table_mut(single_table(table)?)?;
                let targets = assignments
                    .iter()
                    .map(|assignment| {
                        let AssignmentTarget::ColumnName(column) = &assignment.target else {
                            return Err(failure("tuple assignment".to_string()));
                        };
                        let column = table_key(column)?;
                        Ok((table.column_index(&column)?, &assignment.value))
                    })
                    .collect::<Result<Vec<_>, ExecutionError>>()?;
                let columns = table.columns.clone();
                let mut affected = 0;
                for row in table.rows.iter_mut() {
                    let scope = Scope::row(&columns, row);
                    if !matches_filter(selection.as_ref(), &scope)? {
                        continue;
                    }
                    let values = targets
                        .iter()
                        .map(|(_, expr)| evaluate(expr, &scope))
                        .collect::<Result<Vec<_>, _>>()?;
                    for ((position, _), value) in targets.iter().zip(values) {
                        row[*position] = value;
                    }
                    affected += 1;
                }
                Ok(ExecOutcome::Affected(affected))
            }
            Statement::Delete(delete) => {
                let (FromTable::WithFromKeyword(from) | FromTable::WithoutKeyword(from)) =
                    &delete.from;
                let first = from
                    .first()
                    .ok_or_else(|| failure("DELETE without a table".to_string()))?;
                let table = db.table_mut(single_table(first)?)?;
                let columns = table.columns.clone();
                let before = table.rows.len();
                let mut kept = Vec::with_capacity(before);
                for row in table.rows.drain(..) {
                    if !matches_filter(delete.selection.as_ref(), &Scope::row(&columns, &row))? {
                        kept.push(row);
                    }
                }
                table.rows = kept;
                Ok(ExecOutcome::Affected((before - table.rows.len()) as u64))
            }
            Statement::CreateTable(create) => {
                let name = table_key(&create.name)?;
                if db.tables.contains_key(&name) {
                    if create.if_not_exists {
                        return Ok(ExecOutcome::Affected(0));
                    }
                    return Err(failure(format!("table {name} already exists")));
                }
                let columns = create.columns.iter().map(|c| c.name.value.clone()).collect();
                db.tables.insert(
                    name,
                    Table {
                        columns,
                        rows: Vec::new(),
                    },
                );
                Ok(ExecOutcome::Affected(0))
            }
            Statement::Drop {
                object_type: ObjectType::Table,
                names,
                if_exists,
                ..
            } => {
                for name in names {
                    let key = table_key(name)?;
                    if db.tables.remove(&key).is_none() && !*if_exists {
                        return Err(failure(format!("table {key} doesn't exist")));
                    }
                }
                Ok(ExecOutcome::Affected(0))
            }
            Statement::Truncate { table_names, .. } => {
                for target in table_names {
                    db.table_mut(&target.name)?.rows.clear();
                }
                Ok(ExecOutcome::Affected(0))
            }
            Statement::AlterTable {
                name, operations, ..
            } => {
                let table = db.table_mut(name)?;
                for operation in operations {
                    if let AlterTableOperation::AddColumn { column_def, .. } = operation {
                        table.columns.push(column_def.name.value.clone());
                        for row in table.rows.iter_mut() {
                            row.push(SqlValue::Null);
                        }
                    }
                }
                Ok(ExecOutcome::Affected(0))
            }
            Statement::CreateIndex(_) => Ok(ExecOutcome::Affected(0)),
            other => Err(failure(format!("unsupported statement: {other}"))),
        }
    }
}

#[async_trait]
impl ConnectionProvider for InMemoryDataSources {
    type Connection = MemoryConnection;

    async fn connect(&self, data_source: &str) -> Result<MemoryConnection, ExecutionError> {
        match self.databases.read().get(data_source) {
            None => Err(ExecutionError::UnknownDataSource(data_source.to_string())),
            Some(db) if !db.online => Err(ExecutionError::Connection {
                data_source: data_source.to_string(),
                reason: "datasource is offline".to_string(),
            }),
            Some(_) => Ok(MemoryConnection {
                data_source: data_source.to_string(),
            }),
        }
    }
}

#[async_trait]
impl StatementExecutor<MemoryConnection> for InMemoryDataSources {
    async fn execute(
        &self,
        connection: &mut MemoryConnection,
        statement: &RoutedStatement,
    ) -> Result<ExecOutcome, ExecutionError> {
        debug!(
            data_source = %connection.data_source,
            sql = %statement.sql,
            "[shardline] in-memory execute"
        );
        self.run(&connection.data_source, &statement.sql)
    }
}

fn failure(message: String) -> ExecutionError {
    ExecutionError::Statement(message)
}

fn table_key(name: &ObjectName) -> Result<String, ExecutionError> {
    object_table_name(name)
        .map(|name| name.to_ascii_lowercase())
        .map_err(|e| failure(e.to_string()))
}

fn single_table(from: &TableWithJoins) -> Result<&ObjectName, ExecutionError> {
    if !from.joins.is_empty() {
        return Err(failure("joins are not supported in memory".to_string()));
    }
    match &from.relation {
        TableFactor::Table { name, .. } => Ok(name),
        other => Err(failure(format!("unsupported table reference {other}"))),
    }
}

// =============================================================================
// Expression evaluation
// =============================================================================

/// Rows an expression is evaluated over.
///
/// Plain column references read the first row; aggregates fold all rows.
struct Scope<'a> {
    columns: &'a [String],
    rows: Vec<&'a Row>,
}

impl<'a> Scope<'a> {
    fn empty() -> Self {
        Scope {
            columns: &[],
            rows: Vec::new(),
        }
    }

    fn row(columns: &'a [String], row: &'a Row) -> Self {
        Scope {
            columns,
            rows: vec![row],
        }
    }

    fn column(&self, name: &str) -> Result<SqlValue, ExecutionError> {
        let index = self
            .columns
            .iter()
            .position(|c| c.eq_ignore_ascii_case(name))
            .ok_or_else(|| failure(format!("unknown column {name}")))?;
        Ok(self
            .rows
            .first()
            .and_then(|row| row.get(index).cloned())
            .unwrap_or(SqlValue::Null))
    }
}

fn truthy(value: &SqlValue) -> bool {
    match value {
        SqlValue::Bool(b) => *b,
        SqlValue::Int(i) => *i != 0,
        SqlValue::Float(f) => *f != 0.0,
        SqlValue::Null | SqlValue::Text(_) => false,
    }
}

fn matches_filter(filter: Option<&Expr>, scope: &Scope<'_>) -> Result<bool, ExecutionError> {
    match filter {
        None => Ok(true),
        Some(expr) => Ok(truthy(&evaluate(expr, scope)?)),
    }
}

fn evaluate(expr: &Expr, scope: &Scope<'_>) -> Result<SqlValue, ExecutionError> {
    if let Some(value) = literal_value(expr) {
        return Ok(value);
    }
    match expr {
        Expr::Identifier(_) | Expr::CompoundIdentifier(_) => {
            let name = column_name(expr).unwrap_or_default();
            scope.column(&name)
        }
        Expr::Nested(inner) => evaluate(inner, scope),
        Expr::IsNull(inner) => Ok(SqlValue::Bool(evaluate(inner, scope)?.is_null())),
        Expr::IsNotNull(inner) => Ok(SqlValue::Bool(!evaluate(inner, scope)?.is_null())),
        Expr::UnaryOp {
            op: UnaryOperator::Not,
            expr,
        } => Ok(match evaluate(expr, scope)? {
            SqlValue::Null => SqlValue::Null,
            value => SqlValue::Bool(!truthy(&value)),
        }),
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => arithmetic(&SqlValue::Int(0), &BinaryOperator::Minus, &evaluate(expr, scope)?),
        Expr::InList {
            expr,
            list,
            negated,
        } => {
            let value = evaluate(expr, scope)?;
            if value.is_null() {
                return Ok(SqlValue::Null);
            }
            let mut found = false;
            for item in list {
                if evaluate(item, scope)? == value {
                    found = true;
                    break;
                }
            }
            Ok(SqlValue::Bool(found != *negated))
        }
        Expr::Between {
            expr,
            negated,
            low,
            high,
        } => {
            let value = evaluate(expr, scope)?;
            let low = evaluate(low, scope)?;
            let high = evaluate(high, scope)?;
            if value.is_null() || low.is_null() || high.is_null() {
                return Ok(SqlValue::Null);
            }
            Ok(SqlValue::Bool((low <= value && value <= high) != *negated))
        }
        Expr::Like {
            negated,
            expr,
            pattern,
            ..
        } => {
            let value = evaluate(expr, scope)?;
            let pattern = evaluate(pattern, scope)?;
            if value.is_null() || pattern.is_null() {
                return Ok(SqlValue::Null);
            }
            let matched = like(&value.to_string(), &pattern.to_string());
            Ok(SqlValue::Bool(matched != *negated))
        }
        Expr::BinaryOp { left, op, right } => match op {
            BinaryOperator::And => {
                let l = evaluate(left, scope)?;
                let r = evaluate(right, scope)?;
                Ok(SqlValue::Bool(truthy(&l) && truthy(&r)))
            }
            BinaryOperator::Or => {
                let l = evaluate(left, scope)?;
                let r = evaluate(right, scope)?;
                Ok(SqlValue::Bool(truthy(&l) || truthy(&r)))
            }
            _ => {
                let l = evaluate(left, scope)?;
                let r = evaluate(right, scope)?;
                match comparison(op) {
                    Some(_) if l.is_null() || r.is_null() => Ok(SqlValue::Null),
                    Some(test) => Ok(SqlValue::Bool(test(l.cmp(&r)))),
                    None => arithmetic(&l, op, &r),
                }
            }
        },
        Expr::Function(_) => aggregate(expr, scope),
        other => Err(failure(format!("unsupported expression {other}"))),
    }
}

fn comparison(op: &BinaryOperator) -> Option<fn(Ordering) -> bool> {
    Some(match op {
        BinaryOperator::Eq => Ordering::is_eq,
        BinaryOperator::NotEq => Ordering::is_ne,
        BinaryOperator::Lt => Ordering::is_lt,
        BinaryOperator::LtEq => Ordering::is_le,
        BinaryOperator::Gt => Ordering::is_gt,
        BinaryOperator::GtEq => Ordering::is_ge,
        _ => return None,
    })
}

fn arithmetic(l: &SqlValue, op: &BinaryOperator, r: &SqlValue) -> Result<SqlValue, ExecutionError> {
    if l.is_null() || r.is_null() {
        return Ok(SqlValue::Null);
    }
    if let (SqlValue::Int(a), SqlValue::Int(b)) = (l, r) {
        let exact = match op {
            BinaryOperator::Plus => a.checked_add(*b),
            BinaryOperator::Minus => a.checked_sub(*b),
            BinaryOperator::Multiply => a.checked_mul(*b),
            BinaryOperator::Modulo if *b != 0 => Some(a % b),
            _ => None,
        };
        if let Some(value) = exact {
            return Ok(SqlValue::Int(value));
        }
    }
    let (Some(a), Some(b)) = (l.as_f64(), r.as_f64()) else {
        return Err(failure(format!("cannot apply {op} to {l} and {r}")));
    };
    Ok(match op {
        BinaryOperator::Plus => SqlValue::Float(a + b),
        BinaryOperator::Minus => SqlValue::Float(a - b),
        BinaryOperator::Multiply => SqlValue::Float(a * b),
        BinaryOperator::Divide | BinaryOperator::Modulo if b == 0.0 => SqlValue::Null,
        BinaryOperator::Divide => SqlValue::Float(a / b),
        BinaryOperator::Modulo => SqlValue::Float(a % b),
        other => return Err(failure(format!("unsupported operator {other}"))),
    })
}

/// `%` and `_` wildcards, case-sensitive.
fn like(value: &str, pattern: &str) -> bool {
    fn matches(value: &[char], pattern: &[char]) -> bool {
        match pattern.split_first() {
            None => value.is_empty(),
            Some(('%', rest)) => (0..=value.len()).any(|skip| matches(&value[skip..], rest)),
            Some(('_', rest)) => !value.is_empty() && matches(&value[1..], rest),
            Some((c, rest)) => value.first() == Some(c) && matches(&value[1..], rest),
        }
    }
    let value: Vec<char> = value.chars().collect();
    let pattern: Vec<char> = pattern.chars().collect();
    matches(&value, &pattern)
}

fn aggregate(expr: &Expr, scope: &Scope<'_>) -> Result<SqlValue, ExecutionError> {
    let Expr::Function(function) = expr else {
        return Err(failure(format!("unsupported expression {expr}")));
    };
    let name = function.name.to_string();
    let kind = AggregationKind::from_name(&name)
        .ok_or_else(|| failure(format!("unsupported function {name}")))?;
    let FunctionArguments::List(list) = &function.args else {
        return Err(failure(format!("{name} needs an argument")));
    };
    let distinct = matches!(
        list.duplicate_treatment,
        Some(sqlparser::ast::DuplicateTreatment::Distinct)
    );
    let argument = match list.args.first() {
        Some(FunctionArg::Unnamed(FunctionArgExpr::Expr(e))) => Some(e),
        Some(FunctionArg::Unnamed(FunctionArgExpr::Wildcard)) => None,
        _ => return Err(failure(format!("unsupported arguments for {name}"))),
    };
    let mut values = Vec::with_capacity(scope.rows.len());
    for row in &scope.rows {
        let value = match argument {
            Some(e) => evaluate(e, &Scope::row(scope.columns, row))?,
            None => SqlValue::Int(1),
        };
        if !value.is_null() {
            values.push(value);
        }
    }
    if distinct {
        let mut seen = HashSet::new();
        values.retain(|v| seen.insert(v.clone()));
    }
    Ok(match kind {
        AggregationKind::Count => SqlValue::Int(values.len() as i64),
        AggregationKind::Sum => values.iter().fold(SqlValue::Null, |acc, v| acc.add(v)),
        AggregationKind::Avg => {
            if values.is_empty() {
                SqlValue::Null
            } else {
                let sum = values.iter().fold(SqlValue::Null, |acc, v| acc.add(v));
                match sum.as_f64() {
                    Some(total) => SqlValue::Float(total / values.len() as f64),
                    None => SqlValue::Null,
                }
            }
        }
        AggregationKind::Max => values.into_iter().max().unwrap_or(SqlValue::Null),
        AggregationKind::Min => values.into_iter().min().unwrap_or(SqlValue::Null),
    })
}

fn has_aggregate(expr: &Expr) -> bool {
    match expr {
        Expr::Function(f) => AggregationKind::from_name(&f.name.to_string()).is_some(),
        Expr::Nested(inner) => has_aggregate(inner),
        Expr::BinaryOp { left, right, .. } => has_aggregate(left) || has_aggregate(right),
        _ => false,
    }
}

// =============================================================================
// SELECT
// =============================================================================

fn select(db: &Database, query: &Query) -> Result<RowSet, ExecutionError> {
    let SetExpr::Select(body) = query.body.as_ref() else {
        return Err(failure("only plain SELECT is supported".to_string()));
    };
    let body: &Select = body;
    let empty = Table::default();
    let no_row: Row = Vec::new();
    let table = match body.from.as_slice() {
        [] => &empty,
        [from] => db.table(single_table(from)?)?,
        _ => return Err(failure("joins are not supported in memory".to_string())),
    };

    let mut filtered = Vec::new();
    if body.from.is_empty() {
        filtered.push(&no_row);
    }
    for row in &table.rows {
        if matches_filter(body.selection.as_ref(), &Scope::row(&table.columns, row))? {
            filtered.push(row);
        }
    }

    let mut items: Vec<(String, Option<&Expr>)> = Vec::new();
    for item in &body.projection {
        match item {
            SelectItem::UnnamedExpr(expr) => {
                let label = column_name(expr).unwrap_or_else(|| expr.to_string());
                items.push((label, Some(expr)));
            }
            SelectItem::ExprWithAlias { expr, alias } => {
                items.push((alias.value.clone(), Some(expr)));
            }
            SelectItem::Wildcard(_) | SelectItem::QualifiedWildcard(_, _) => {
                items.extend(table.columns.iter().map(|c| (c.clone(), None)));
            }
        }
    }

    let group_by = match &body.group_by {
        GroupByExpr::Expressions(exprs, _) => exprs.clone(),
        GroupByExpr::All(_) => return Err(failure("GROUP BY ALL".to_string())),
    };
    let aggregating = items.iter().any(|(_, e)| e.is_some_and(has_aggregate));

    // Each unit becomes one output row.
    let units: Vec<Vec<&Row>> = if !group_by.is_empty() {
        let mut index: HashMap<Vec<SqlValue>, usize> = HashMap::new();
        let mut groups: Vec<Vec<&Row>> = Vec::new();
        for row in filtered {
            let scope = Scope::row(&table.columns, row);
            let key = group_by
                .iter()
                .map(|e| match position(e, items.len()) {
                    Some(i) => match items[i].1 {
                        Some(expr) => evaluate(expr, &scope),
                        None => scope.column(&items[i].0),
                    },
                    None => evaluate(e, &scope),
                })
                .collect::<Result<Vec<_>, _>>()?;
            match index.get(&key) {
                Some(&i) => groups[i].push(row),
                None => {
                    index.insert(key, groups.len());
                    groups.push(vec![row]);
                }
            }
        }
        groups
    } else if aggregating {
        vec![filtered]
    } else {
        filtered.into_iter().map(|row| vec![row]).collect()
    };

    let order_by = match &query.order_by {
        None => Vec::new(),
        Some(order_by) => match &order_by.kind {
            OrderByKind::Expressions(exprs) => exprs.iter().collect(),
            OrderByKind::All(_) => return Err(failure("ORDER BY ALL".to_string())),
        },
    };

    let mut output: Vec<(Row, Row)> = Vec::with_capacity(units.len());
    for unit in units {
        let scope = Scope {
            columns: &table.columns,
            rows: unit,
        };
        if let Some(having) = &body.having {
            if !truthy(&evaluate(having, &scope)?) {
                continue;
            }
        }
        let mut row = Vec::with_capacity(items.len());
        for (label, expr) in &items {
            row.push(match expr {
                Some(expr) => evaluate(expr, &scope)?,
                None => scope.column(label)?,
            });
        }
        let mut keys = Vec::with_capacity(order_by.len());
        for item in &order_by {
            let text = item.expr.to_string();
            let column = column_name(&item.expr);
            let projected = position(&item.expr, items.len()).or_else(|| {
                items.iter().position(|(label, expr)| {
                    label.eq_ignore_ascii_case(&text)
                        || expr.is_some_and(|e| e.to_string().eq_ignore_ascii_case(&text))
                        || column.as_deref().is_some_and(|c| label.eq_ignore_ascii_case(c))
                })
            });
            keys.push(match projected {
                Some(i) => row[i].clone(),
                None => evaluate(&item.expr, &scope)?,
            });
        }
        output.push((row, keys));
    }

    if matches!(body.distinct, Some(Distinct::Distinct)) {
        let mut seen = HashSet::new();
        output.retain(|(row, _)| seen.insert(row.clone()));
    }

    if !order_by.is_empty() {
        output.sort_by(|(_, a), (_, b)| {
            for (i, item) in order_by.iter().enumerate() {
                let ordering = a[i].cmp(&b[i]);
                let ordering = if item.options.asc == Some(false) {
                    ordering.reverse()
                } else {
                    ordering
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });
    }

    let (limit, offset) = match &query.limit_clause {
        None => (None, 0),
        Some(LimitClause::LimitOffset { limit, offset, .. }) => (
            limit.as_ref().map(row_count).transpose()?,
            offset.as_ref().map(|o| row_count(&o.value)).transpose()?.unwrap_or(0),
        ),
        Some(LimitClause::OffsetCommaLimit { offset, limit }) => {
            (Some(row_count(limit)?), row_count(offset)?)
        }
    };
    let rows = output
        .into_iter()
        .map(|(row, _)| row)
        .skip(offset)
        .take(limit.unwrap_or(usize::MAX))
        .collect();
    let columns = items.into_iter().map(|(label, _)| label).collect();
    Ok(RowSet::new(columns, rows))
}

/// Select-list index of a positional item such as `ORDER BY 2`.
fn position(expr: &Expr, items: usize) -> Option<usize> {
    let Expr::Value(_) = expr else {
        return None;
    };
    let index = literal_value(expr)?.as_i64()?.checked_sub(1)?;
    usize::try_from(index).ok().filter(|index| *index < items)
}

fn row_count(expr: &Expr) -> Result<usize, ExecutionError> {
    literal_value(expr)
        .and_then(|v| v.as_i64())
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| failure(format!("invalid LIMIT/OFFSET {expr}")))
}
