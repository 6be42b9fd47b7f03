//! # Logical Statements
//!
//! What the classifier extracts from one SQL statement: its kind, the
//! logical tables it touches, sharding conditions, INSERT rows and the
//! SELECT context the merger needs.

use sqlparser::ast::Statement;

use crate::domain::{AggregationKind, ShardingConditions, ShardingError, SortDirection, SqlValue, StatementKind};

use super::rewriter;

/// Literal rows of an `INSERT ... VALUES` statement.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct InsertValues {
    /// Column list as written (empty when omitted).
    pub columns: Vec<String>,
    /// One entry per row; `None` marks a non-literal expression.
    pub rows: Vec<Vec<Option<SqlValue>>>,
}

impl InsertValues {
    /// True when the column list names `column`.
    pub fn has_column(&self, column: &str) -> bool {
        self.columns.iter().any(|c| c.eq_ignore_ascii_case(column))
    }

    /// Equality conditions carried by one row.
    pub fn row_conditions(&self, row: usize) -> ShardingConditions {
        let mut conditions = ShardingConditions::new();
        if let Some(values) = self.rows.get(row) {
            for (column, value) in self.columns.iter().zip(values) {
                if let Some(value) = value {
                    conditions = conditions.and(ShardingConditions::single(column, [value.clone()]));
                }
            }
        }
        conditions
    }
}

/// One item of the select list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Projection {
    /// Column label the database reports for the item.
    pub label: String,
    /// Expression text.
    pub expression: String,
    /// Explicit alias.
    pub alias: Option<String>,
    /// Aggregate function, when the item is one.
    pub aggregation: Option<AggregationKind>,
    /// Aggregate argument text (`*` for `COUNT(*)`).
    pub argument: Option<String>,
    /// `COUNT(DISTINCT x)` and friends.
    pub distinct_argument: bool,
}

/// One ORDER BY item.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OrderItem {
    /// Expression text.
    pub expression: String,
    /// Bare column name when the expression is a column reference.
    pub column: Option<String>,
    /// Sort direction.
    pub direction: SortDirection,
}

/// Everything about a SELECT that affects merging.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SelectContext {
    /// Select list, excluding wildcards.
    pub projections: Vec<Projection>,
    /// `*` or `t.*` appears in the select list.
    pub has_wildcard: bool,
    /// ORDER BY items.
    pub order_by: Vec<OrderItem>,
    /// GROUP BY expression texts.
    pub group_by: Vec<String>,
    /// SELECT DISTINCT.
    pub distinct: bool,
    /// HAVING present.
    pub having: bool,
    /// LIMIT row count.
    pub limit: Option<u64>,
    /// OFFSET row count.
    pub offset: Option<u64>,
}

impl SelectContext {
    /// True when rows must be grouped or aggregated after merging.
    pub fn is_grouping(&self) -> bool {
        !self.group_by.is_empty() || self.projections.iter().any(|p| p.aggregation.is_some())
    }

    /// Label of the projection an ORDER BY / GROUP BY expression refers to.
    pub fn resolve_label(&self, expression: &str, column: Option<&str>) -> Option<String> {
        self.projections
            .iter()
            .find(|p| {
                p.expression.eq_ignore_ascii_case(expression)
                    || p.label.eq_ignore_ascii_case(expression)
                    || p.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(expression))
            })
            .or_else(|| {
                let column = column?;
                self.projections.iter().find(|p| {
                    p.aggregation.is_none() && p.label.eq_ignore_ascii_case(column)
                })
            })
            .map(|p| p.label.clone())
    }
}

/// A classified statement.
#[derive(Clone, Debug)]
pub struct LogicalStatement {
    /// Statement category.
    pub kind: StatementKind,
    /// Logical tables in order of appearance (deduplicated, as written).
    pub tables: Vec<String>,
    /// Sharding conditions of the WHERE clause.
    pub conditions: ShardingConditions,
    /// INSERT rows.
    pub insert: Option<InsertValues>,
    /// SELECT merge context.
    pub select: Option<SelectContext>,
    /// Parsed statement, rewritten per target by the router.
    pub ast: Statement,
}

impl LogicalStatement {
    /// First table of the statement.
    pub fn primary_table(&self) -> Option<&str> {
        self.tables.first().map(String::as_str)
    }

    /// Append a column with one value per INSERT row, to both the AST and
    /// the extracted rows.
    pub fn append_insert_column(
        &mut self,
        column: &str,
        values: &[SqlValue],
    ) -> Result<(), ShardingError> {
        let insert = self.insert.as_mut().ok_or_else(|| {
            ShardingError::UnsupportedSql(format!("{} has no VALUES rows", self.kind))
        })?;
        if values.len() != insert.rows.len() {
            return Err(ShardingError::Expression(format!(
                "{} values for {} rows",
                values.len(),
                insert.rows.len()
            )));
        }
        rewriter::append_insert_column(&mut self.ast, column, values)?;
        insert.columns.push(column.to_string());
        for (row, value) in insert.rows.iter_mut().zip(values) {
            row.push(Some(value.clone()));
        }
        Ok(())
    }

    /// Original SQL text, re-rendered from the AST.
    pub fn sql(&self) -> String {
        self.ast.to_string()
    }
}
