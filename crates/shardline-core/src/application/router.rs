//! # Query Router
//!
//! Turns a [`LogicalStatement`] into routed statements plus the merge plan
//! for their results.
//!
//! ## Routing Decisions
//!
//! | Tables in the statement | Targets |
//! |-------------------------|---------|
//! | a sharded table (plus bound / broadcast tables) | evaluated grid targets |
//! | only broadcast tables | every datasource (writes), default or first datasource (reads) |
//! | unregistered tables | the default datasource |
//!
//! Only table identifiers are rewritten for a single target. A SELECT that
//! fans out also gains derived columns and a widened LIMIT so the merger
//! can reproduce the single-database answer.

use std::sync::Arc;

use tracing::debug;

use crate::algorithms::evaluator::{evaluate_conditions, evaluate_insert_rows};
use crate::algorithms::merge::{AggregationPlan, MergePlan};
use crate::domain::{
    AggregationKind, PhysicalTarget, RoutedStatement, RuleRegistry, ShardingError,
    StatementKind, TableRule,
};
use crate::sql::rewriter::{self, TableRenames};
use crate::sql::{LogicalStatement, SelectContext};

use super::broadcast::broadcast_statements;

/// Routed statements and how to merge their results.
#[derive(Clone, Debug)]
pub struct RoutePlan {
    /// Statements in route order.
    pub statements: Vec<RoutedStatement>,
    /// Merge instructions.
    pub merge: MergePlan,
    /// True when the statement is replicated to every datasource.
    pub broadcast: bool,
}

/// Routes classified statements against a registry.
#[derive(Clone, Debug)]
pub struct QueryRouter {
    registry: Arc<RuleRegistry>,
}

impl QueryRouter {
    /// Create a router.
    pub fn new(registry: Arc<RuleRegistry>) -> Self {
        Self { registry }
    }

    /// Routed statements of a classified statement.
    pub fn route(&self, statement: &LogicalStatement) -> Result<Vec<RoutedStatement>, ShardingError> {
        Ok(self.plan(statement)?.statements)
    }

    /// Routed statements plus merge plan.
    pub fn plan(&self, statement: &LogicalStatement) -> Result<RoutePlan, ShardingError> {
        let sharded = statement
            .tables
            .iter()
            .filter_map(|table| self.registry.find(table))
            .find(|rule| !rule.broadcast);
        let plan = match sharded {
            Some(rule) => self.plan_sharded(statement, rule)?,
            None if statement.tables.iter().any(|t| self.registry.is_broadcast(t)) => RoutePlan {
                statements: broadcast_statements(&self.registry, statement),
                merge: MergePlan::pass_through(statement.kind),
                broadcast: statement.kind.is_mutation(),
            },
            None => self.plan_default(statement)?,
        };
        debug!(
            kind = %statement.kind,
            targets = plan.statements.len(),
            broadcast = plan.broadcast,
            "[shardline] statement routed"
        );
        Ok(plan)
    }

    fn plan_default(&self, statement: &LogicalStatement) -> Result<RoutePlan, ShardingError> {
        let data_source = match (self.registry.default_data_source(), self.registry.data_sources()) {
            (Some(ds), _) => ds.to_string(),
            (None, [only]) => only.clone(),
            (None, _) => {
                return Err(match statement.primary_table() {
                    Some(table) => ShardingError::TableNotFound(table.to_string()),
                    None => ShardingError::ConfigError(
                        "no default data source for statements without tables".to_string(),
                    ),
                })
            }
        };
        let table = statement.primary_table().unwrap_or_default();
        Ok(RoutePlan {
            statements: vec![RoutedStatement::new(
                PhysicalTarget::new(data_source, table),
                statement.sql(),
            )],
            merge: MergePlan::pass_through(statement.kind),
            broadcast: false,
        })
    }

    fn plan_sharded(
        &self,
        statement: &LogicalStatement,
        rule: &TableRule,
    ) -> Result<RoutePlan, ShardingError> {
        if let Some(insert) = &statement.insert {
            let per_row = evaluate_insert_rows(rule, insert)?;
            let mut statements = Vec::new();
            for node in &rule.data_nodes {
                let rows: Vec<usize> = per_row
                    .iter()
                    .enumerate()
                    .filter(|(_, target)| *target == node)
                    .map(|(row, _)| row)
                    .collect();
                if rows.is_empty() {
                    continue;
                }
                let mut ast = statement.ast.clone();
                rewriter::retain_insert_rows(&mut ast, &rows);
                rewriter::rename_tables(&mut ast, &self.renames(statement, rule, node)?);
                statements.push(RoutedStatement::new(node.clone(), ast.to_string()));
            }
            return Ok(RoutePlan {
                statements,
                merge: MergePlan::pass_through(StatementKind::Insert),
                broadcast: false,
            });
        }

        let targets = evaluate_conditions(rule, &statement.conditions)?;
        let mut base = statement.ast.clone();
        let merge = match &statement.select {
            Some(context) if targets.len() > 1 => fan_out_select(&mut base, context)?,
            _ => MergePlan::pass_through(statement.kind),
        };
        let statements = targets
            .iter()
            .map(|target| {
                let mut ast = base.clone();
                rewriter::rename_tables(&mut ast, &self.renames(statement, rule, target)?);
                Ok(RoutedStatement::new(target.clone(), ast.to_string()))
            })
            .collect::<Result<Vec<_>, ShardingError>>()?;
        Ok(RoutePlan {
            statements,
            merge,
            broadcast: false,
        })
    }

    /// Logical to physical names for one target. Bound tables take the
    /// physical table at the same position within the datasource.
    fn renames(
        &self,
        statement: &LogicalStatement,
        rule: &TableRule,
        target: &PhysicalTarget,
    ) -> Result<TableRenames, ShardingError> {
        let mut renames = TableRenames::new();
        renames.insert(rule.logic_table.to_ascii_lowercase(), target.table.clone());
        let position = rule
            .actual_tables_in(&target.data_source)
            .iter()
            .position(|table| *table == target.table);
        for table in &statement.tables {
            let Some(other) = self.registry.find(table) else {
                continue;
            };
            if other.broadcast || other.logic_table.eq_ignore_ascii_case(&rule.logic_table) {
                continue;
            }
            let physical = position
                .and_then(|i| other.actual_tables_in(&target.data_source).get(i).copied())
                .ok_or_else(|| {
                    ShardingError::ConfigError(format!(
                        "bound table {} has no counterpart of {target}",
                        other.logic_table
                    ))
                })?;
            renames.insert(other.logic_table.to_ascii_lowercase(), physical.to_string());
        }
        Ok(renames)
    }
}

/// Rewrite a fanned-out SELECT and describe how to merge it.
fn fan_out_select(
    ast: &mut sqlparser::ast::Statement,
    context: &SelectContext,
) -> Result<MergePlan, ShardingError> {
    let mut plan = MergePlan::pass_through(StatementKind::Select);
    if context.having {
        return Err(ShardingError::UnsupportedSql(
            "HAVING across several shards is not supported".to_string(),
        ));
    }
    let mut avg_index = 0;
    for projection in &context.projections {
        let Some(kind) = projection.aggregation else {
            continue;
        };
        if projection.distinct_argument {
            return Err(ShardingError::UnsupportedSql(format!(
                "{} across several shards is not supported",
                projection.expression
            )));
        }
        let mut aggregation = AggregationPlan {
            kind,
            label: projection.label.clone(),
            sum_label: None,
            count_label: None,
        };
        if kind == AggregationKind::Avg {
            let argument = projection.argument.as_deref().unwrap_or("*");
            let sum = format!("AVG_DERIVED_SUM_{avg_index}");
            let count = format!("AVG_DERIVED_COUNT_{avg_index}");
            rewriter::add_projection(ast, &format!("SUM({argument})"), &sum)?;
            rewriter::add_projection(ast, &format!("COUNT({argument})"), &count)?;
            plan.derived_columns.push(sum.clone());
            plan.derived_columns.push(count.clone());
            aggregation.sum_label = Some(sum);
            aggregation.count_label = Some(count);
            avg_index += 1;
        }
        plan.aggregations.push(aggregation);
    }

    for (index, item) in context.order_by.iter().enumerate() {
        let label = match context.resolve_label(&item.expression, item.column.as_deref()) {
            Some(label) => label,
            None if context.has_wildcard && item.column.is_some() => {
                item.column.clone().unwrap_or_default()
            }
            None if is_position(&item.expression) => return Err(wildcard_position("ORDER BY")),
            None => {
                let alias = format!("ORDER_BY_DERIVED_{index}");
                rewriter::add_projection(ast, &item.expression, &alias)?;
                plan.derived_columns.push(alias.clone());
                alias
            }
        };
        plan.order_by.push((label, item.direction));
    }

    for (index, expression) in context.group_by.iter().enumerate() {
        let column = crate::sql::parse_expression(expression)
            .ok()
            .and_then(|expr| crate::sql::column_name(&expr));
        let label = match context.resolve_label(expression, column.as_deref()) {
            Some(label) => label,
            None if context.has_wildcard && column.is_some() => column.unwrap_or_default(),
            None if is_position(expression) => return Err(wildcard_position("GROUP BY")),
            None => {
                let alias = format!("GROUP_BY_DERIVED_{index}");
                rewriter::add_projection(ast, expression, &alias)?;
                plan.derived_columns.push(alias.clone());
                alias
            }
        };
        plan.group_by.push(label);
    }

    plan.distinct = context.distinct;
    plan.offset = context.offset.unwrap_or(0);
    plan.limit = context.limit;
    if context.is_grouping() {
        rewriter::set_limit(ast, None)?;
    } else if context.offset.is_some() || context.limit.is_some() {
        let widened = context.limit.map(|limit| limit.saturating_add(plan.offset));
        rewriter::set_limit(ast, widened)?;
    }
    Ok(plan)
}

/// Positions left unresolved by the classifier (select list has a wildcard).
fn is_position(expression: &str) -> bool {
    expression.parse::<u64>().is_ok()
}

fn wildcard_position(clause: &str) -> ShardingError {
    ShardingError::UnsupportedSql(format!(
        "positional {clause} over a wildcard select list across several shards"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::SqlClassifier;
    use crate::test_support::order_registry;

    fn plan(sql: &str) -> Result<RoutePlan, ShardingError> {
        let registry = order_registry();
        let statement = SqlClassifier::new(Arc::clone(&registry)).classify(sql)?;
        QueryRouter::new(registry).plan(&statement)
    }

    fn targets(plan: &RoutePlan) -> Vec<String> {
        plan.statements.iter().map(|s| s.target.to_string()).collect()
    }

    #[test]
    fn test_insert_routes_to_single_node() {
        let plan = plan("INSERT INTO t_order (user_id, order_id, status) VALUES (2, 1, 'NEW')").unwrap();
        assert_eq!(targets(&plan), vec!["ds0.t_order1"]);
        assert_eq!(
            plan.statements[0].sql,
            "INSERT INTO t_order1 (user_id, order_id, status) VALUES (2, 1, 'NEW')"
        );
    }

    #[test]
    fn test_multi_row_insert_is_split() {
        let plan = plan(
            "INSERT INTO t_order (user_id, order_id) VALUES (1, 1), (2, 2), (3, 3), (4, 4)",
        )
        .unwrap();
        assert_eq!(targets(&plan), vec!["ds0.t_order0", "ds1.t_order1"]);
        assert_eq!(
            plan.statements[0].sql,
            "INSERT INTO t_order0 (user_id, order_id) VALUES (2, 2), (4, 4)"
        );
        assert_eq!(
            plan.statements[1].sql,
            "INSERT INTO t_order1 (user_id, order_id) VALUES (1, 1), (3, 3)"
        );
    }

    #[test]
    fn test_select_without_sharding_value_fans_out() {
        let plan = plan("SELECT * FROM t_order WHERE status = 'NEW'").unwrap();
        assert_eq!(
            targets(&plan),
            vec!["ds0.t_order0", "ds0.t_order1", "ds1.t_order0", "ds1.t_order1"]
        );
        assert_eq!(plan.merge, MergePlan::pass_through(StatementKind::Select));
    }

    #[test]
    fn test_single_target_is_passed_through() {
        let plan = plan(
            "SELECT AVG(price) FROM t_order WHERE user_id = 2 AND order_id = 1 ORDER BY status LIMIT 5 OFFSET 5",
        )
        .unwrap();
        assert_eq!(
            plan.statements[0].sql,
            "SELECT AVG(price) FROM t_order1 WHERE user_id = 2 AND order_id = 1 ORDER BY status LIMIT 5 OFFSET 5"
        );
        assert_eq!(plan.merge, MergePlan::pass_through(StatementKind::Select));
    }

    #[test]
    fn test_avg_gains_derived_columns() {
        let plan = plan("SELECT AVG(price) FROM t_order WHERE user_id = 1").unwrap();
        assert_eq!(plan.statements.len(), 2);
        assert_eq!(
            plan.statements[0].sql,
            "SELECT AVG(price), SUM(price) AS AVG_DERIVED_SUM_0, COUNT(price) AS AVG_DERIVED_COUNT_0 FROM t_order0 WHERE user_id = 1"
        );
        assert_eq!(plan.merge.aggregations[0].sum_label.as_deref(), Some("AVG_DERIVED_SUM_0"));
        assert_eq!(plan.merge.derived_columns.len(), 2);
    }

    #[test]
    fn test_order_by_outside_projection_and_limit_widening() {
        let plan = plan("SELECT order_id FROM t_order ORDER BY status DESC LIMIT 10 OFFSET 20").unwrap();
        let sql = &plan.statements[0].sql;
        assert!(sql.contains("status AS ORDER_BY_DERIVED_0"), "{sql}");
        assert!(sql.ends_with("LIMIT 30"), "{sql}");
        assert_eq!(plan.merge.order_by, vec![("ORDER_BY_DERIVED_0".to_string(), crate::domain::SortDirection::Desc)]);
        assert_eq!(plan.merge.offset, 20);
        assert_eq!(plan.merge.limit, Some(10));
    }

    #[test]
    fn test_positional_order_by_merges_on_projection() {
        let plan = plan("SELECT order_id, status FROM t_order ORDER BY 1 DESC").unwrap();
        assert_eq!(plan.statements.len(), 4);
        assert_eq!(
            plan.statements[0].sql,
            "SELECT order_id, status FROM t_order0 ORDER BY 1 DESC"
        );
        assert_eq!(
            plan.merge.order_by,
            vec![("order_id".to_string(), crate::domain::SortDirection::Desc)]
        );
        assert!(plan.merge.derived_columns.is_empty());
    }

    #[test]
    fn test_positional_group_by_merges_on_projection() {
        let plan = plan("SELECT status, COUNT(*) AS n FROM t_order GROUP BY 1 ORDER BY 2").unwrap();
        let sql = &plan.statements[0].sql;
        assert!(!sql.contains("DERIVED"), "{sql}");
        assert_eq!(plan.merge.group_by, vec!["status"]);
        assert_eq!(
            plan.merge.order_by,
            vec![("n".to_string(), crate::domain::SortDirection::Asc)]
        );
    }

    #[test]
    fn test_positional_order_by_over_wildcard() {
        assert!(matches!(
            plan("SELECT * FROM t_order ORDER BY 1"),
            Err(ShardingError::UnsupportedSql(_))
        ));
        // A single target sorts by itself.
        let single = plan("SELECT * FROM t_order WHERE user_id = 1 AND order_id = 1 ORDER BY 1").unwrap();
        assert_eq!(targets(&single), vec!["ds1.t_order1"]);
    }

    #[test]
    fn test_grouping_removes_limit_and_derives_group_column() {
        let plan = plan("SELECT COUNT(*) FROM t_order GROUP BY user_id LIMIT 3").unwrap();
        let sql = &plan.statements[0].sql;
        assert!(sql.contains("user_id AS GROUP_BY_DERIVED_0"), "{sql}");
        assert!(!sql.contains("LIMIT"), "{sql}");
        assert_eq!(plan.merge.group_by, vec!["GROUP_BY_DERIVED_0"]);
        assert_eq!(plan.merge.limit, Some(3));
    }

    #[test]
    fn test_binding_tables_share_suffix() {
        let plan = plan(
            "SELECT * FROM t_order o JOIN t_order_item i ON o.order_id = i.order_id WHERE o.user_id = 1 AND o.order_id = 3",
        )
        .unwrap();
        assert_eq!(targets(&plan), vec!["ds1.t_order1"]);
        assert!(plan.statements[0].sql.contains("JOIN t_order_item1 AS i"));
    }

    #[test]
    fn test_broadcast_reads_and_writes() {
        let read = plan("SELECT * FROM t_address").unwrap();
        assert_eq!(targets(&read), vec!["ds0.t_address"]);
        assert!(!read.broadcast);
        let write = plan("INSERT INTO t_address (address_id, city) VALUES (1, 'x')").unwrap();
        assert_eq!(targets(&write), vec!["ds0.t_address", "ds1.t_address"]);
        assert!(write.broadcast);
        assert_eq!(
            write.statements[1].sql,
            "INSERT INTO t_address (address_id, city) VALUES (1, 'x')"
        );
    }

    #[test]
    fn test_unregistered_table_goes_to_default_data_source() {
        let plan = plan("SELECT * FROM t_config WHERE id = 1").unwrap();
        assert_eq!(targets(&plan), vec!["ds0.t_config"]);
        assert_eq!(plan.statements[0].sql, "SELECT * FROM t_config WHERE id = 1");
    }

    #[test]
    fn test_ddl_hits_every_node() {
        let plan = plan("CREATE TABLE t_order (order_id BIGINT, user_id INT)").unwrap();
        assert_eq!(plan.statements.len(), 4);
        assert!(plan.statements[3].sql.starts_with("CREATE TABLE t_order1"));
    }

    #[test]
    fn test_contradiction_routes_nowhere() {
        let plan = plan("SELECT * FROM t_order WHERE user_id = 1 AND user_id = 2").unwrap();
        assert!(plan.statements.is_empty());
    }

    #[test]
    fn test_condition_on_joined_broadcast_table_keeps_full_route() {
        let plan = plan(
            "SELECT * FROM t_order o JOIN t_address a ON o.address_id = a.address_id WHERE a.user_id = 1",
        )
        .unwrap();
        assert_eq!(
            targets(&plan),
            vec!["ds0.t_order0", "ds0.t_order1", "ds1.t_order0", "ds1.t_order1"]
        );
    }

    #[test]
    fn test_null_sharding_values_route_nowhere() {
        let with_null = plan("SELECT * FROM t_order WHERE user_id IN (1, NULL)").unwrap();
        let without = plan("SELECT * FROM t_order WHERE user_id = 1").unwrap();
        assert_eq!(targets(&with_null), targets(&without));
        assert_eq!(targets(&with_null), vec!["ds1.t_order0", "ds1.t_order1"]);

        let only_null = plan("SELECT * FROM t_order WHERE user_id = NULL").unwrap();
        assert!(only_null.statements.is_empty());
    }

    #[test]
    fn test_having_across_shards_rejected() {
        assert!(matches!(
            plan("SELECT user_id, COUNT(*) FROM t_order GROUP BY user_id HAVING COUNT(*) > 1"),
            Err(ShardingError::UnsupportedSql(_))
        ));
    }
}
