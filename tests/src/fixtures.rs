//! # Test Fixtures
//!
//! The order schema used across the suite:
//!
//! | Table | Kind | Grid | Routing |
//! |-------|------|------|---------|
//! | `t_order` | sharded | `ds${0..1}.t_order${0..1}` | `ds${user_id % 2}` / `t_order${order_id % 2}` |
//! | `t_order_item` | sharded, bound to `t_order` | `ds${0..1}.t_order_item${0..1}` | same columns |
//! | `t_address` | broadcast | every datasource | - |
//! | anything else | unregistered | `ds0` | - |

use std::sync::Arc;

use shardline_core::{
    EngineConfig, InMemoryDataSources, RuleRegistry, ShardingEngine, ShardingRuleConfig,
};

/// Rule file of the order schema.
pub const ORDER_RULES: &str = r#"{
  "data_sources": ["ds0", "ds1"],
  "default_data_source": "ds0",
  "tables": [
    {
      "logic_table": "t_order",
      "actual_data_nodes": "ds${0..1}.t_order${0..1}",
      "table_strategy": { "sharding_column": "order_id", "sharding_algorithm_name": "t_order_inline" },
      "key_generate_strategy": { "column": "order_id", "key_generator_name": "snowflake" }
    },
    {
      "logic_table": "t_order_item",
      "actual_data_nodes": "ds${0..1}.t_order_item${0..1}",
      "table_strategy": { "sharding_column": "order_id", "sharding_algorithm_name": "t_order_item_inline" },
      "key_generate_strategy": { "column": "item_id", "key_generator_name": "uuid" }
    }
  ],
  "broadcast_tables": ["t_address"],
  "binding_tables": [["t_order", "t_order_item"]],
  "default_database_strategy": { "sharding_column": "user_id", "sharding_algorithm_name": "database_inline" },
  "sharding_algorithms": {
    "database_inline": { "type": "INLINE", "algorithm-expression": "ds${user_id % 2}" },
    "t_order_inline": { "type": "INLINE", "algorithm-expression": "t_order${order_id % 2}" },
    "t_order_item_inline": { "type": "INLINE", "algorithm-expression": "t_order_item${order_id % 2}" }
  },
  "key_generators": {
    "snowflake": { "type": "SNOWFLAKE", "worker-id": 42 },
    "uuid": { "type": "UUID" }
  }
}"#;

/// DDL creating every logical table.
pub const ORDER_SCHEMA: [&str; 4] = [
    "CREATE TABLE t_order (order_id BIGINT, user_id INT, status VARCHAR(16), amount INT)",
    "CREATE TABLE t_order_item (item_id VARCHAR(32), order_id BIGINT, user_id INT, sku VARCHAR(16))",
    "CREATE TABLE t_address (address_id INT, city VARCHAR(32))",
    "CREATE TABLE t_config (name VARCHAR(32), value VARCHAR(32))",
];

/// Engine over in-memory datasources.
pub type MemoryEngine = ShardingEngine<InMemoryDataSources, InMemoryDataSources>;

/// Registry of the order schema.
pub fn order_registry() -> Arc<RuleRegistry> {
    let config = ShardingRuleConfig::from_json(ORDER_RULES).expect("order rules parse");
    Arc::new(RuleRegistry::from_config(&config).expect("order rules are valid"))
}

/// Engine plus a handle on its datasources, schema already created.
pub async fn order_engine() -> (MemoryEngine, InMemoryDataSources) {
    let data_sources = InMemoryDataSources::new(["ds0", "ds1"]);
    let engine = ShardingEngine::with_data_sources(
        order_registry(),
        data_sources.clone(),
        EngineConfig::for_testing(),
    );
    for ddl in ORDER_SCHEMA {
        engine.execute(ddl).await.expect("schema created");
    }
    (engine, data_sources)
}

/// Insert `count` orders with ids `1..=count`, `user_id = id % 7`, `amount = id`.
pub async fn seed_orders(engine: &MemoryEngine, count: i64) {
    for id in 1..=count {
        let status = if id % 3 == 0 { "PAID" } else { "NEW" };
        let sql = format!(
            "INSERT INTO t_order (order_id, user_id, status, amount) VALUES ({id}, {}, '{status}', {id})",
            id % 7
        );
        engine.execute(&sql).await.expect("order inserted");
    }
}
