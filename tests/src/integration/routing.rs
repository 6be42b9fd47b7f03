//! # Routing Flows
//!
//! Classification, shard evaluation and rewriting as seen through
//! `preview` and through the rows that land in each physical table.

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use proptest::prelude::*;
    use shardline_core::{
        EngineConfig, InMemoryDataSources, PhysicalTarget, ShardingEngine, ShardingError,
    };

    use crate::fixtures::{order_engine, order_registry, MemoryEngine};

    fn preview_engine() -> MemoryEngine {
        ShardingEngine::with_data_sources(
            order_registry(),
            InMemoryDataSources::new(["ds0", "ds1"]),
            EngineConfig::default(),
        )
    }

    fn targets(engine: &MemoryEngine, sql: &str) -> Vec<String> {
        engine
            .preview(sql)
            .unwrap()
            .into_iter()
            .map(|r| r.target.to_string())
            .collect()
    }

    // =============================================================================
    // SINGLE-TARGET ROUTING
    // =============================================================================

    #[tokio::test]
    async fn test_insert_lands_in_one_physical_table() {
        let (engine, data_sources) = order_engine().await;
        let routed = engine
            .preview("INSERT INTO t_order (user_id, order_id, status) VALUES (2, 1, 'NEW')")
            .unwrap();
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].target, PhysicalTarget::new("ds0", "t_order1"));
        assert_eq!(
            routed[0].sql,
            "INSERT INTO t_order1 (user_id, order_id, status) VALUES (2, 1, 'NEW')"
        );

        engine
            .execute("INSERT INTO t_order (user_id, order_id, status) VALUES (2, 1, 'NEW')")
            .await
            .unwrap();
        assert_eq!(data_sources.row_count("ds0", "t_order1"), 1);
        for (ds, table) in [("ds0", "t_order0"), ("ds1", "t_order0"), ("ds1", "t_order1")] {
            assert_eq!(data_sources.row_count(ds, table), 0, "{ds}.{table}");
        }
    }

    #[test]
    fn test_unconstrained_select_covers_the_grid() {
        let engine = preview_engine();
        let routed: BTreeSet<String> = targets(&engine, "SELECT * FROM t_order").into_iter().collect();
        let grid: BTreeSet<String> = order_registry()
            .lookup("t_order")
            .unwrap()
            .data_nodes
            .iter()
            .map(|n| n.to_string())
            .collect();
        assert_eq!(routed, grid);
        assert_eq!(routed.len(), 4);
    }

    #[test]
    fn test_select_without_database_column_hits_both_datasources() {
        let engine = preview_engine();
        let routed = targets(&engine, "SELECT * FROM t_order WHERE order_id = 7");
        assert_eq!(routed, vec!["ds0.t_order1", "ds1.t_order1"]);
    }

    #[test]
    fn test_in_list_and_or_conditions() {
        let engine = preview_engine();
        assert_eq!(
            targets(&engine, "SELECT * FROM t_order WHERE user_id IN (1, 3) AND order_id = 2"),
            vec!["ds1.t_order0"]
        );
        assert_eq!(
            targets(&engine, "SELECT * FROM t_order WHERE order_id = 1 OR order_id = 3").len(),
            2
        );
        assert_eq!(
            targets(&engine, "SELECT * FROM t_order WHERE user_id = 1 AND user_id = 2"),
            Vec::<String>::new()
        );
    }

    #[test]
    fn test_condition_on_joined_broadcast_table_does_not_prune() {
        let engine = preview_engine();
        assert_eq!(
            targets(
                &engine,
                "SELECT * FROM t_order o JOIN t_address a ON o.address_id = a.address_id WHERE a.user_id = 1"
            ),
            vec!["ds0.t_order0", "ds0.t_order1", "ds1.t_order0", "ds1.t_order1"]
        );
        assert_eq!(
            targets(
                &engine,
                "SELECT * FROM t_order o JOIN t_address a ON o.address_id = a.address_id WHERE o.user_id = 1"
            ),
            vec!["ds1.t_order0", "ds1.t_order1"]
        );
    }

    #[tokio::test]
    async fn test_null_in_sharding_values_is_ignored() {
        let (engine, _) = order_engine().await;
        crate::fixtures::seed_orders(&engine, 40).await;
        assert_eq!(
            targets(&engine, "SELECT * FROM t_order WHERE user_id IN (1, NULL)"),
            targets(&engine, "SELECT * FROM t_order WHERE user_id = 1")
        );
        assert!(targets(&engine, "SELECT * FROM t_order WHERE user_id = NULL").is_empty());

        let result = engine
            .execute("SELECT order_id FROM t_order WHERE user_id IN (1, NULL) ORDER BY order_id")
            .await
            .unwrap();
        let ids: Vec<i64> = result
            .rows()
            .unwrap()
            .column_values("order_id")
            .iter()
            .map(|v| v.as_i64().unwrap())
            .collect();
        assert_eq!(ids, vec![1, 8, 15, 22, 29, 36]);

        let none = engine
            .execute("SELECT order_id FROM t_order WHERE user_id = NULL")
            .await
            .unwrap();
        assert!(none.rows().map_or(true, |rows| rows.is_empty()));
    }

    #[test]
    fn test_binding_tables_route_pairwise() {
        let engine = preview_engine();
        let routed = engine
            .preview(
                "SELECT o.order_id, i.sku FROM t_order o JOIN t_order_item i \
                 ON o.order_id = i.order_id WHERE o.user_id = 2",
            )
            .unwrap();
        assert_eq!(routed.len(), 2);
        for statement in &routed {
            assert_eq!(statement.target.data_source, "ds0");
            let suffix = statement.target.table.trim_start_matches("t_order");
            assert!(
                statement
                    .sql
                    .contains(&format!("FROM t_order{suffix} AS o JOIN t_order_item{suffix} AS i")),
                "{statement}"
            );
        }
    }

    #[test]
    fn test_unregistered_table_uses_default_datasource() {
        let engine = preview_engine();
        assert_eq!(
            targets(&engine, "UPDATE t_config SET value = 'x' WHERE name = 'mode'"),
            vec!["ds0.t_config"]
        );
    }

    #[tokio::test]
    async fn test_multi_row_insert_is_split_per_node() {
        let (engine, data_sources) = order_engine().await;
        let sql = "INSERT INTO t_order (user_id, order_id, status) VALUES \
                   (0, 0, 'A'), (0, 1, 'B'), (1, 2, 'C'), (1, 3, 'D'), (0, 5, 'E')";
        let routed = engine.preview(sql).unwrap();
        assert_eq!(routed.len(), 4);
        let result = engine.execute(sql).await.unwrap();
        assert_eq!(result.affected_rows(), Some(5));
        assert_eq!(data_sources.row_count("ds0", "t_order0"), 1);
        assert_eq!(data_sources.row_count("ds0", "t_order1"), 2);
        assert_eq!(data_sources.row_count("ds1", "t_order0"), 1);
        assert_eq!(data_sources.row_count("ds1", "t_order1"), 1);
    }

    #[tokio::test]
    async fn test_update_and_delete_reach_only_their_shard() {
        let (engine, data_sources) = order_engine().await;
        engine
            .execute("INSERT INTO t_order (user_id, order_id, status) VALUES (1, 1, 'NEW'), (2, 2, 'NEW')")
            .await
            .unwrap();
        let updated = engine
            .execute("UPDATE t_order SET status = 'PAID' WHERE user_id = 1 AND order_id = 1")
            .await
            .unwrap();
        assert_eq!(updated.affected_rows(), Some(1));
        let stored = data_sources.table("ds1", "t_order1").unwrap();
        assert_eq!(stored.column_values("status"), vec!["PAID".into()]);

        let deleted = engine.execute("DELETE FROM t_order WHERE order_id = 2").await.unwrap();
        assert_eq!(deleted.affected_rows(), Some(1));
        assert_eq!(data_sources.row_count("ds0", "t_order0"), 0);
    }

    // =============================================================================
    // REJECTED STATEMENTS
    // =============================================================================

    #[test]
    fn test_rejected_statements_never_route() {
        let engine = preview_engine();
        let unsupported = [
            "UPDATE t_order SET user_id = 3 WHERE order_id = 1",
            "SELECT * FROM t_order o JOIN t_config c ON o.status = c.name",
            "SELECT * FROM t_order WHERE order_id IN (SELECT order_id FROM t_order_item)",
            "SELECT status FROM t_order GROUP BY status HAVING COUNT(*) > 1",
            "SELECT COUNT(DISTINCT status) FROM t_order",
            "SELECT * FROM t_order UNION SELECT * FROM t_order",
        ];
        for sql in unsupported {
            assert!(
                matches!(engine.preview(sql), Err(ShardingError::UnsupportedSql(_))),
                "{sql}"
            );
        }
        assert!(matches!(
            engine.preview("SELEC * FROM t_order"),
            Err(ShardingError::ParseError(_))
        ));
    }

    #[test]
    fn test_single_shard_having_is_allowed() {
        let engine = preview_engine();
        let routed = engine
            .preview("SELECT status FROM t_order WHERE user_id = 1 AND order_id = 1 GROUP BY status HAVING COUNT(*) > 1")
            .unwrap();
        assert_eq!(routed.len(), 1);
    }

    // =============================================================================
    // PROPERTIES
    // =============================================================================

    proptest! {
        #[test]
        fn prop_routing_is_deterministic_and_in_grid(user_id in 0i64..100_000, order_id in 0i64..100_000) {
            let engine = preview_engine();
            let sql = format!("SELECT * FROM t_order WHERE user_id = {user_id} AND order_id = {order_id}");
            let first = engine.preview(&sql).unwrap();
            let second = engine.preview(&sql).unwrap();
            prop_assert_eq!(&first, &second);
            prop_assert_eq!(first.len(), 1);
            prop_assert_eq!(
                first[0].target.clone(),
                PhysicalTarget::new(format!("ds{}", user_id % 2), format!("t_order{}", order_id % 2))
            );
        }
    }
}
