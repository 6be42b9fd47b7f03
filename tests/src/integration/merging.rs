//! # Merging Flows
//!
//! Fan-out queries against seeded in-memory shards: ordering, pagination,
//! aggregation, grouping and DISTINCT must match a single-database answer.

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use shardline_core::{
        EngineConfig, MockDataSources, RowSet, ShardingEngine, ShardingError, SqlValue,
    };

    use crate::fixtures::{order_engine, order_registry, seed_orders};

    fn ints(values: &[SqlValue]) -> Vec<i64> {
        values.iter().map(|v| v.as_i64().unwrap()).collect()
    }

    #[tokio::test]
    async fn test_fan_out_select_loses_and_duplicates_nothing() {
        let (engine, data_sources) = order_engine().await;
        seed_orders(&engine, 40).await;
        // Every physical table got some rows.
        for ds in ["ds0", "ds1"] {
            for table in ["t_order0", "t_order1"] {
                assert!(data_sources.row_count(ds, table) > 0, "{ds}.{table}");
            }
        }

        let result = engine.execute("SELECT order_id FROM t_order").await.unwrap();
        let ids = ints(&result.rows().unwrap().column_values("order_id"));
        assert_eq!(ids.len(), 40);
        let unique: BTreeSet<i64> = ids.into_iter().collect();
        assert_eq!(unique, (1..=40).collect());
    }

    #[tokio::test]
    async fn test_order_by_is_global() {
        let (engine, _) = order_engine().await;
        seed_orders(&engine, 40).await;
        let result = engine
            .execute("SELECT order_id, amount FROM t_order ORDER BY amount DESC")
            .await
            .unwrap();
        let amounts = ints(&result.rows().unwrap().column_values("amount"));
        assert_eq!(amounts, (1..=40).rev().collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_positional_order_by_is_global() {
        let (engine, _) = order_engine().await;
        seed_orders(&engine, 40).await;
        let result = engine
            .execute("SELECT order_id, status FROM t_order ORDER BY 1 DESC")
            .await
            .unwrap();
        let rows = result.rows().unwrap();
        assert_eq!(rows.columns, vec!["order_id", "status"]);
        assert_eq!(
            ints(&rows.column_values("order_id")),
            (1..=40).rev().collect::<Vec<_>>()
        );
    }

    #[tokio::test]
    async fn test_positional_group_by_across_shards() {
        let (engine, _) = order_engine().await;
        seed_orders(&engine, 40).await;
        let result = engine
            .execute("SELECT status, COUNT(*) AS n FROM t_order GROUP BY 1 ORDER BY 1")
            .await
            .unwrap();
        let rows = result.rows().unwrap();
        assert_eq!(
            rows.column_values("status"),
            vec![SqlValue::from("NEW"), SqlValue::from("PAID")]
        );
        assert_eq!(ints(&rows.column_values("n")), vec![27, 13]);
    }

    #[tokio::test]
    async fn test_pagination_across_shards() {
        let (engine, _) = order_engine().await;
        seed_orders(&engine, 40).await;
        let result = engine
            .execute("SELECT order_id FROM t_order ORDER BY order_id LIMIT 5 OFFSET 10")
            .await
            .unwrap();
        assert_eq!(
            ints(&result.rows().unwrap().column_values("order_id")),
            vec![11, 12, 13, 14, 15]
        );
    }

    #[tokio::test]
    async fn test_order_by_column_outside_projection() {
        let (engine, _) = order_engine().await;
        seed_orders(&engine, 40).await;
        let result = engine
            .execute("SELECT status FROM t_order ORDER BY order_id DESC LIMIT 3")
            .await
            .unwrap();
        let rows = result.rows().unwrap();
        assert_eq!(rows.columns, vec!["status"]);
        assert_eq!(
            rows.column_values("status"),
            vec![SqlValue::from("NEW"), SqlValue::from("PAID"), SqlValue::from("NEW")]
        );
    }

    #[tokio::test]
    async fn test_avg_is_recomputed_from_sum_and_count() {
        let (engine, _) = order_engine().await;
        // ds0 holds (4, 6): sum 10, count 2. ds1 holds (5, 7, 8): sum 20, count 3.
        engine
            .execute(
                "INSERT INTO t_order (order_id, user_id, amount) VALUES \
                 (1, 0, 4), (2, 2, 6), (3, 1, 5), (4, 3, 7), (5, 5, 8)",
            )
            .await
            .unwrap();
        let result = engine.execute("SELECT AVG(amount) FROM t_order").await.unwrap();
        let rows = result.rows().unwrap();
        assert_eq!(rows.columns, vec!["AVG(amount)"]);
        assert_eq!(rows.rows, vec![vec![SqlValue::Float(6.0)]]);
    }

    #[tokio::test]
    async fn test_avg_from_scripted_partials() {
        let mock = MockDataSources::new();
        let partial = |avg: f64, sum: i64, count: i64| {
            RowSet::new(
                vec![
                    "AVG(amount)".into(),
                    "AVG_DERIVED_SUM_0".into(),
                    "AVG_DERIVED_COUNT_0".into(),
                ],
                vec![vec![SqlValue::Float(avg), SqlValue::Int(sum), SqlValue::Int(count)]],
            )
        };
        mock.respond_rows("ds0", partial(5.0, 10, 2));
        mock.respond_rows("ds1", partial(20.0 / 3.0, 20, 3));
        let engine = ShardingEngine::with_data_sources(order_registry(), mock.clone(), EngineConfig::for_testing());

        let result = engine
            .execute("SELECT AVG(amount) FROM t_order WHERE order_id = 1")
            .await
            .unwrap();
        assert_eq!(result.rows().unwrap().rows, vec![vec![SqlValue::Float(6.0)]]);
        let executed = mock.executed();
        assert_eq!(executed.len(), 2);
        assert!(executed[0].sql.contains("SUM(amount) AS AVG_DERIVED_SUM_0"));
        assert!(executed[0].sql.contains("COUNT(amount) AS AVG_DERIVED_COUNT_0"));
    }

    #[tokio::test]
    async fn test_count_max_min_across_shards() {
        let (engine, _) = order_engine().await;
        seed_orders(&engine, 40).await;
        let result = engine
            .execute("SELECT COUNT(*), MAX(amount), MIN(amount), SUM(amount) FROM t_order")
            .await
            .unwrap();
        assert_eq!(
            result.rows().unwrap().rows,
            vec![vec![
                SqlValue::Int(40),
                SqlValue::Int(40),
                SqlValue::Int(1),
                SqlValue::Int(820)
            ]]
        );
    }

    #[tokio::test]
    async fn test_group_by_merges_partial_groups() {
        let (engine, _) = order_engine().await;
        seed_orders(&engine, 40).await;
        let result = engine
            .execute(
                "SELECT status, COUNT(*) AS cnt, SUM(amount) AS total FROM t_order \
                 GROUP BY status ORDER BY status",
            )
            .await
            .unwrap();
        assert_eq!(
            result.rows().unwrap().rows,
            vec![
                vec![SqlValue::from("NEW"), SqlValue::Int(27), SqlValue::Int(547)],
                vec![SqlValue::from("PAID"), SqlValue::Int(13), SqlValue::Int(273)],
            ]
        );
    }

    #[tokio::test]
    async fn test_group_by_column_outside_projection() {
        let (engine, _) = order_engine().await;
        seed_orders(&engine, 40).await;
        let result = engine
            .execute("SELECT COUNT(*) AS cnt FROM t_order GROUP BY status ORDER BY cnt")
            .await
            .unwrap();
        let rows = result.rows().unwrap();
        assert_eq!(rows.columns, vec!["cnt"]);
        assert_eq!(ints(&rows.column_values("cnt")), vec![13, 27]);
    }

    #[tokio::test]
    async fn test_distinct_across_shards() {
        let (engine, _) = order_engine().await;
        seed_orders(&engine, 40).await;
        let result = engine
            .execute("SELECT DISTINCT status FROM t_order ORDER BY status")
            .await
            .unwrap();
        assert_eq!(
            result.rows().unwrap().column_values("status"),
            vec![SqlValue::from("NEW"), SqlValue::from("PAID")]
        );
    }

    #[tokio::test]
    async fn test_empty_route_returns_no_rows() {
        let (engine, _) = order_engine().await;
        seed_orders(&engine, 10).await;
        let result = engine
            .execute("SELECT order_id FROM t_order WHERE user_id = 1 AND user_id = 2")
            .await
            .unwrap();
        assert!(result.rows().map_or(true, |rows| rows.is_empty()));
    }

    #[tokio::test]
    async fn test_cross_shard_having_is_rejected_before_execution() {
        let (engine, _) = order_engine().await;
        let error = engine
            .execute("SELECT status FROM t_order GROUP BY status HAVING COUNT(*) > 1")
            .await
            .unwrap_err();
        assert!(matches!(error, ShardingError::UnsupportedSql(_)));
    }
}
