//! # Key Generation Flows
//!
//! Snowflake uniqueness under concurrency, generated keys landing in the
//! routed rows, UUID keys, and clock regression surfacing from the engine.

#[cfg(test)]
mod tests {
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    use shardline_core::{
        domain::invariant_monotonic_keys, EngineConfig, GeneratedKey, InMemoryDataSources,
        ManualClock, RuleRegistry, ShardingEngine, ShardingError, ShardingRuleConfig,
        SnowflakeConfig, SnowflakeKeyGenerator, SqlValue,
    };

    use crate::fixtures::{order_engine, MemoryEngine, ORDER_RULES, ORDER_SCHEMA};

    const KEYS_PER_GENERATOR: usize = 50_000;

    // =============================================================================
    // SNOWFLAKE UNDER CONTENTION
    // =============================================================================

    #[test]
    fn test_two_generators_never_collide() {
        let generators: Vec<Arc<SnowflakeKeyGenerator>> = [1u16, 2]
            .into_iter()
            .map(|worker_id| {
                Arc::new(
                    SnowflakeKeyGenerator::new(SnowflakeConfig {
                        worker_id,
                        ..SnowflakeConfig::default()
                    })
                    .unwrap(),
                )
            })
            .collect();

        let handles: Vec<_> = generators
            .iter()
            .map(|generator| {
                let generator = Arc::clone(generator);
                thread::spawn(move || {
                    (0..KEYS_PER_GENERATOR)
                        .map(|_| generator.next().unwrap())
                        .collect::<Vec<GeneratedKey>>()
                })
            })
            .collect();
        let batches: Vec<Vec<GeneratedKey>> =
            handles.into_iter().map(|h| h.join().unwrap()).collect();

        let mut all = HashSet::with_capacity(2 * KEYS_PER_GENERATOR);
        for (batch, worker_id) in batches.iter().zip([1u16, 2]) {
            assert!(invariant_monotonic_keys(batch));
            assert!(batch.iter().all(|key| key.worker_id() == worker_id));
            all.extend(batch.iter().copied());
        }
        assert_eq!(all.len(), 2 * KEYS_PER_GENERATOR);
    }

    #[test]
    fn test_shared_generator_across_threads() {
        let generator = Arc::new(
            SnowflakeKeyGenerator::new(SnowflakeConfig {
                worker_id: 9,
                ..SnowflakeConfig::default()
            })
            .unwrap(),
        );
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let generator = Arc::clone(&generator);
                thread::spawn(move || {
                    (0..5_000).map(|_| generator.next().unwrap()).collect::<Vec<_>>()
                })
            })
            .collect();
        let mut all = HashSet::new();
        for handle in handles {
            let batch = handle.join().unwrap();
            // Each thread observes its own keys in increasing order.
            assert!(invariant_monotonic_keys(&batch));
            all.extend(batch);
        }
        assert_eq!(all.len(), 20_000);
    }

    // =============================================================================
    // KEYS THROUGH THE ENGINE
    // =============================================================================

    #[tokio::test]
    async fn test_generated_keys_are_stored_and_routed() {
        let (engine, data_sources) = order_engine().await;
        let result = engine
            .execute("INSERT INTO t_order (user_id, status, amount) VALUES (1, 'NEW', 10), (2, 'NEW', 20)")
            .await
            .unwrap();
        assert_eq!(result.affected_rows(), Some(2));
        let keys = result.generated_keys().to_vec();
        assert_eq!(keys.len(), 2);

        for (key, user_id) in keys.iter().zip([1i64, 2]) {
            let id = key.as_i64().unwrap();
            let generated = GeneratedKey(id as u64);
            assert_eq!(generated.worker_id(), 42);
            let table = data_sources
                .table(&format!("ds{}", user_id % 2), &format!("t_order{}", id % 2))
                .unwrap();
            assert!(table.column_values("order_id").contains(key), "key {id} not stored");
        }

        let read = engine
            .execute(&format!(
                "SELECT user_id FROM t_order WHERE order_id = {}",
                keys[0]
            ))
            .await
            .unwrap();
        assert_eq!(read.rows().unwrap().column_values("user_id"), vec![SqlValue::Int(1)]);
    }

    #[tokio::test]
    async fn test_explicit_key_is_left_alone() {
        let (engine, _) = order_engine().await;
        let result = engine
            .execute("INSERT INTO t_order (order_id, user_id, status) VALUES (77, 1, 'NEW')")
            .await
            .unwrap();
        assert!(result.generated_keys().is_empty());
        assert_eq!(engine.metrics().snapshot().keys_generated, 0);
    }

    #[tokio::test]
    async fn test_uuid_item_keys() {
        let (engine, data_sources) = order_engine().await;
        let result = engine
            .execute("INSERT INTO t_order_item (order_id, user_id, sku) VALUES (3, 2, 'B-7')")
            .await
            .unwrap();
        let keys = result.generated_keys();
        assert_eq!(keys.len(), 1);
        match &keys[0] {
            SqlValue::Text(text) => {
                assert_eq!(text.len(), 32);
                assert!(text.chars().all(|c| c.is_ascii_hexdigit()));
            }
            other => panic!("expected a text key, got {other:?}"),
        }
        let stored = data_sources.table("ds0", "t_order_item1").unwrap();
        assert_eq!(stored.column_values("item_id"), vec![keys[0].clone()]);
    }

    // =============================================================================
    // CLOCK REGRESSION
    // =============================================================================

    const NOW: u64 = 1_700_000_000_000;

    async fn engine_with_clock(clock: Arc<ManualClock>) -> MemoryEngine {
        let rules = ORDER_RULES.replace(
            "\"worker-id\": 42",
            "\"worker-id\": 42, \"clock-regression-policy\": \"fail\"",
        );
        let config = ShardingRuleConfig::from_json(&rules).unwrap();
        let registry = Arc::new(RuleRegistry::from_config_with_clock(&config, clock).unwrap());
        let engine = ShardingEngine::with_data_sources(
            registry,
            InMemoryDataSources::new(["ds0", "ds1"]),
            EngineConfig::for_testing(),
        );
        for ddl in ORDER_SCHEMA {
            engine.execute(ddl).await.unwrap();
        }
        engine
    }

    #[tokio::test]
    async fn test_clock_regression_fails_the_insert() {
        let clock = Arc::new(ManualClock::new(NOW));
        let engine = engine_with_clock(Arc::clone(&clock)).await;
        let insert = "INSERT INTO t_order (user_id, status) VALUES (1, 'NEW')";

        let first = engine.execute(insert).await.unwrap();
        let key = GeneratedKey(first.generated_keys()[0].as_i64().unwrap() as u64);
        assert_eq!(key.timestamp_millis(), NOW);

        clock.set(NOW - 5);
        let error = engine.execute(insert).await.unwrap_err();
        assert!(matches!(error, ShardingError::ClockRegression { offset_ms: 5, .. }));

        clock.set(NOW + 1);
        let recovered = engine.execute(insert).await.unwrap();
        assert_eq!(recovered.generated_keys().len(), 1);
    }
}
