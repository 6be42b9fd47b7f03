//! # SQL Layer
//!
//! Parsing (MySQL dialect), classification into [`LogicalStatement`]s and
//! per-target AST rewriting.

pub mod classifier;
pub mod rewriter;
pub mod statement;

pub use classifier::SqlClassifier;
pub use statement::{InsertValues, LogicalStatement, OrderItem, Projection, SelectContext};

use sqlparser::ast::{Expr, ObjectName, Statement, UnaryOperator, Value};
use sqlparser::dialect::MySqlDialect;
use sqlparser::parser::Parser;

use crate::domain::{ShardingError, SqlValue};

/// Parse exactly one statement.
pub fn parse_statement(sql: &str) -> Result<Statement, ShardingError> {
    let mut statements = Parser::parse_sql(&MySqlDialect {}, sql)
        .map_err(|e| ShardingError::ParseError(e.to_string()))?;
    if statements.len() != 1 {
        return Err(ShardingError::ParseError(format!(
            "expected exactly one statement, found {}",
            statements.len()
        )));
    }
    Ok(statements.remove(0))
}

/// Split a script into single statements, each re-rendered from its parse
/// tree. Delimiters inside literals and comments are not split on.
pub fn split_script(script: &str) -> Result<Vec<String>, ShardingError> {
    Parser::parse_sql(&MySqlDialect {}, script)
        .map(|statements| statements.iter().map(ToString::to_string).collect())
        .map_err(|e| ShardingError::ParseError(e.to_string()))
}

/// Parse a standalone expression.
pub fn parse_expression(text: &str) -> Result<Expr, ShardingError> {
    let dialect = MySqlDialect {};
    Parser::new(&dialect)
        .try_with_sql(text)
        .and_then(|mut parser| parser.parse_expr())
        .map_err(|e| ShardingError::ParseError(e.to_string()))
}

/// Literal value of an expression, if it is one.
pub fn literal_value(expr: &Expr) -> Option<SqlValue> {
    match expr {
        Expr::Value(value) => match &value.value {
            Value::Number(text, _) => text
                .parse::<i64>()
                .map(SqlValue::Int)
                .ok()
                .or_else(|| text.parse::<f64>().ok().map(SqlValue::Float)),
            Value::SingleQuotedString(s) | Value::DoubleQuotedString(s) => {
                Some(SqlValue::Text(s.clone()))
            }
            Value::Boolean(b) => Some(SqlValue::Bool(*b)),
            Value::Null => Some(SqlValue::Null),
            _ => None,
        },
        Expr::UnaryOp {
            op: UnaryOperator::Minus,
            expr,
        } => match literal_value(expr)? {
            SqlValue::Int(i) => Some(SqlValue::Int(i.checked_neg()?)),
            SqlValue::Float(f) => Some(SqlValue::Float(-f)),
            _ => None,
        },
        Expr::UnaryOp {
            op: UnaryOperator::Plus,
            expr,
        }
        | Expr::Nested(expr) => literal_value(expr),
        _ => None,
    }
}

/// Column name of a (possibly qualified) column reference.
pub fn column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.clone()),
        Expr::CompoundIdentifier(idents) => idents.last().map(|ident| ident.value.clone()),
        Expr::Nested(inner) => column_name(inner),
        _ => None,
    }
}

/// Last identifier of a possibly schema-qualified name.
pub fn object_table_name(name: &ObjectName) -> Result<String, ShardingError> {
    name.0
        .last()
        .and_then(|part| part.as_ident())
        .map(|ident| ident.value.clone())
        .ok_or_else(|| ShardingError::ParseError(format!("unsupported table name {name}")))
}
