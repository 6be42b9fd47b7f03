//! # Failure Flows
//!
//! Offline shards, slow shards and how failures show up in results and
//! metrics. Nothing is rolled back; successful targets keep their work.

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;
    use shardline_core::{
        ConnectionProvider, EngineConfig, ExecOutcome, ExecutionError, MockDataSources,
        PhysicalTarget, RoutedStatement, RowSet, ShardingEngine, ShardingError, SqlValue,
        StatementExecutor,
    };

    use crate::fixtures::{order_engine, order_registry, seed_orders};

    #[tokio::test]
    async fn test_fan_out_select_with_offline_datasource() {
        let (engine, data_sources) = order_engine().await;
        seed_orders(&engine, 20).await;
        data_sources.set_online("ds1", false);

        let error = engine
            .execute("SELECT order_id FROM t_order ORDER BY order_id")
            .await
            .unwrap_err();
        let partial = error.partial_failure().expect("partial failure");
        let mut retry: Vec<String> = partial
            .retryable_targets()
            .into_iter()
            .map(ToString::to_string)
            .collect();
        retry.sort();
        assert_eq!(retry, vec!["ds1.t_order0", "ds1.t_order1"]);

        // Rows from ds0 come back merged and ordered.
        let rows = partial.partial.rows().unwrap();
        let ids: Vec<i64> = rows
            .column_values("order_id")
            .iter()
            .map(|v| v.as_i64().unwrap())
            .collect();
        let expected: Vec<i64> = (1..=20).filter(|id| (id % 7) % 2 == 0).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn test_fan_out_update_keeps_successful_work() {
        let (engine, data_sources) = order_engine().await;
        seed_orders(&engine, 20).await;
        data_sources.set_online("ds0", false);

        let error = engine
            .execute("UPDATE t_order SET status = 'CLOSED' WHERE order_id > 0")
            .await
            .unwrap_err();
        let partial = error.partial_failure().expect("partial failure");
        let updated_on_ds1 = (1..=20).filter(|id| (id % 7) % 2 == 1).count() as u64;
        assert_eq!(partial.partial.affected_rows(), Some(updated_on_ds1));
        assert!(partial.failed.iter().all(|f| f.target.data_source == "ds0"));

        data_sources.set_online("ds0", true);
        let closed = engine
            .execute("SELECT COUNT(*) AS n FROM t_order WHERE status = 'CLOSED'")
            .await
            .unwrap();
        assert_eq!(
            closed.rows().unwrap().column_values("n"),
            vec![SqlValue::Int(updated_on_ds1 as i64)]
        );
    }

    #[tokio::test]
    async fn test_single_target_failure_is_an_execution_error() {
        let (engine, data_sources) = order_engine().await;
        data_sources.set_online("ds1", false);
        let error = engine
            .execute("SELECT * FROM t_order WHERE user_id = 1 AND order_id = 1")
            .await
            .unwrap_err();
        match error {
            ShardingError::Execution { target, source } => {
                assert_eq!(target, PhysicalTarget::new("ds1", "t_order1"));
                assert!(matches!(source, ExecutionError::Connection { .. }));
            }
            other => panic!("expected an execution error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_statement_error_on_shard() {
        let (engine, _) = order_engine().await;
        engine
            .execute("INSERT INTO t_order (order_id, user_id) VALUES (1, 1)")
            .await
            .unwrap();
        let error = engine
            .execute("SELECT missing FROM t_order WHERE user_id = 1 AND order_id = 1")
            .await
            .unwrap_err();
        assert!(matches!(
            error,
            ShardingError::Execution {
                source: ExecutionError::Statement(_),
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_slow_target_times_out() {
        let mock = MockDataSources::new();
        mock.delay("ds1", Duration::from_millis(500));
        let config = EngineConfig {
            target_timeout_ms: 50,
            ..EngineConfig::for_testing()
        };
        let engine = ShardingEngine::with_data_sources(order_registry(), mock.clone(), config);

        let error = engine
            .execute("DELETE FROM t_order WHERE order_id = 4")
            .await
            .unwrap_err();
        let partial = error.partial_failure().expect("partial failure");
        assert_eq!(partial.partial.affected_rows(), Some(1));
        assert_eq!(partial.failed.len(), 1);
        assert_eq!(partial.failed[0].target, PhysicalTarget::new("ds1", "t_order0"));
        assert_eq!(partial.failed[0].error, ExecutionError::Timeout(50));
    }

    #[tokio::test]
    async fn test_metrics_count_outcomes() {
        let (engine, data_sources) = order_engine().await;
        let before = engine.metrics().snapshot();

        engine
            .execute("INSERT INTO t_order (user_id, status) VALUES (1, 'NEW'), (2, 'NEW')")
            .await
            .unwrap();
        engine.execute("SELECT * FROM t_order").await.unwrap();
        assert!(engine.execute("SELECT * FROM t_order t, t_config c").await.is_err());
        data_sources.set_online("ds1", false);
        assert!(engine.execute("SELECT * FROM t_order").await.is_err());

        let after = engine.metrics().snapshot();
        assert_eq!(after.statements - before.statements, 4);
        assert_eq!(after.succeeded - before.succeeded, 2);
        assert_eq!(after.failed - before.failed, 1);
        assert_eq!(after.partial_failures - before.partial_failures, 1);
        assert_eq!(after.keys_generated - before.keys_generated, 2);
        assert_eq!(after.multi_target_statements - before.multi_target_statements, 3);

        let exported = serde_json::to_value(after).unwrap();
        assert_eq!(exported["partial_failures"], after.partial_failures);
    }

    // =============================================================================
    // BOUNDED FAN-OUT
    // =============================================================================

    /// Datasources that track how many statements run at once.
    #[derive(Default)]
    struct GaugedDataSources {
        gauge: Mutex<(usize, usize)>,
    }

    impl GaugedDataSources {
        fn peak(&self) -> usize {
            self.gauge.lock().1
        }
    }

    #[async_trait]
    impl ConnectionProvider for GaugedDataSources {
        type Connection = String;

        async fn connect(&self, data_source: &str) -> Result<String, ExecutionError> {
            Ok(data_source.to_string())
        }
    }

    #[async_trait]
    impl StatementExecutor<String> for GaugedDataSources {
        async fn execute(
            &self,
            _connection: &mut String,
            statement: &RoutedStatement,
        ) -> Result<ExecOutcome, ExecutionError> {
            {
                let mut gauge = self.gauge.lock();
                gauge.0 += 1;
                gauge.1 = gauge.1.max(gauge.0);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.gauge.lock().0 -= 1;
            Ok(ExecOutcome::Rows(RowSet::new(
                vec!["target".into()],
                vec![vec![SqlValue::from(statement.target.to_string())]],
            )))
        }
    }

    #[tokio::test]
    async fn test_fan_out_respects_connection_limit() {
        let data_sources = Arc::new(GaugedDataSources::default());
        let config = EngineConfig {
            max_connections_per_query: 2,
            ..EngineConfig::for_testing()
        };
        let engine = ShardingEngine::new(
            order_registry(),
            Arc::clone(&data_sources),
            Arc::clone(&data_sources),
            config,
        );
        let result = engine.execute("SELECT * FROM t_order").await.unwrap();
        assert_eq!(result.rows().unwrap().len(), 4);
        assert!(data_sources.peak() <= 2, "peak {}", data_sources.peak());
        assert!(data_sources.peak() >= 1);
    }
}
