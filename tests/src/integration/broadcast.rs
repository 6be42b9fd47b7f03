//! # Broadcast Flows
//!
//! Broadcast tables replicate writes to every datasource and read from one.

#[cfg(test)]
mod tests {
    use shardline_core::{ExecutionError, LogicalResult, ShardingError, SqlValue};

    use crate::fixtures::order_engine;

    #[tokio::test]
    async fn test_broadcast_insert_reaches_every_datasource() {
        let (engine, data_sources) = order_engine().await;
        let result = engine
            .execute("INSERT INTO t_address (address_id, city) VALUES (1, 'Oslo'), (2, 'Lisbon')")
            .await
            .unwrap();
        assert_eq!(result.affected_rows(), Some(4));
        for ds in ["ds0", "ds1"] {
            let table = data_sources.table(ds, "t_address").unwrap();
            assert_eq!(
                table.column_values("city"),
                vec![SqlValue::from("Oslo"), SqlValue::from("Lisbon")],
                "{ds}"
            );
        }
    }

    #[tokio::test]
    async fn test_broadcast_read_uses_one_datasource() {
        let (engine, _) = order_engine().await;
        engine
            .execute("INSERT INTO t_address (address_id, city) VALUES (1, 'Oslo')")
            .await
            .unwrap();
        let routed = engine.preview("SELECT city FROM t_address").unwrap();
        assert_eq!(routed.len(), 1);
        assert_eq!(routed[0].target.data_source, "ds0");
        assert_eq!(routed[0].sql, "SELECT city FROM t_address");

        let result = engine.execute("SELECT city FROM t_address").await.unwrap();
        assert_eq!(result.rows().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_broadcast_with_one_datasource_down() {
        let (engine, data_sources) = order_engine().await;
        data_sources.set_online("ds1", false);

        let error = engine
            .execute("INSERT INTO t_address (address_id, city) VALUES (3, 'Quito')")
            .await
            .unwrap_err();
        let partial = error.partial_failure().expect("partial failure");
        assert_eq!(partial.partial, LogicalResult::affected(1));
        assert_eq!(partial.failed.len(), 1);
        assert_eq!(partial.failed[0].target.data_source, "ds1");
        assert!(matches!(partial.failed[0].error, ExecutionError::Connection { .. }));
        assert_eq!(partial.succeeded.len(), 1);
        assert_eq!(partial.succeeded[0].data_source, "ds0");
        assert!(partial.to_string().contains("ds1"));

        // Work on the healthy datasource is kept.
        assert_eq!(data_sources.row_count("ds0", "t_address"), 1);
        data_sources.set_online("ds1", true);
        assert_eq!(data_sources.row_count("ds1", "t_address"), 0);
    }

    #[tokio::test]
    async fn test_broadcast_ddl() {
        let (engine, data_sources) = order_engine().await;
        engine
            .execute("ALTER TABLE t_address ADD COLUMN country VARCHAR(2)")
            .await
            .unwrap();
        engine
            .execute("INSERT INTO t_address (address_id, city, country) VALUES (4, 'Lima', 'PE')")
            .await
            .unwrap();
        for ds in ["ds0", "ds1"] {
            let table = data_sources.table(ds, "t_address").unwrap();
            assert_eq!(table.columns, vec!["address_id", "city", "country"]);
        }

        let error = engine.execute("DROP TABLE t_address, t_order").await.unwrap_err();
        assert!(matches!(error, ShardingError::UnsupportedSql(_)));
    }
}
