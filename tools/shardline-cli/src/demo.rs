//! Self-contained demo: two in-memory datasources, an order schema and a
//! script that exercises routing, key generation, broadcast and merging.

use std::sync::Arc;

use anyhow::Result;
use shardline_core::{EngineConfig, RuleRegistry, ShardingRuleConfig};

use crate::commands::run_script;

/// Rules used by the demo.
pub const DEMO_RULES: &str = r#"{
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
      "key_generate_strategy": { "column": "item_id", "key_generator_name": "snowflake" }
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
  "key_generators": { "snowflake": { "type": "SNOWFLAKE", "worker-id": 1 } }
}"#;

/// Statements run by the demo.
pub const DEMO_SCRIPT: &str = "
CREATE TABLE t_order (order_id BIGINT, user_id INT, status VARCHAR(16), amount INT);
CREATE TABLE t_order_item (item_id BIGINT, order_id BIGINT, user_id INT, sku VARCHAR(16));
CREATE TABLE t_address (address_id INT, city VARCHAR(32));
INSERT INTO t_address (address_id, city) VALUES (1, 'Oslo'), (2, 'Lisbon');
INSERT INTO t_order (order_id, user_id, status, amount) VALUES (1, 1, 'NEW', 10), (2, 1, 'PAID', 20), (3, 2, 'NEW', 30), (4, 2, 'PAID', 40);
INSERT INTO t_order (user_id, status, amount) VALUES (3, 'NEW', 50);
INSERT INTO t_order_item (order_id, user_id, sku) VALUES (1, 1, 'A-1'), (3, 2, 'B-7');
SELECT order_id, user_id, status FROM t_order WHERE order_id IN (1, 2, 3, 4) ORDER BY order_id;
SELECT status, COUNT(*) AS orders, SUM(amount) AS total, AVG(amount) AS average FROM t_order GROUP BY status ORDER BY status;
SELECT i.order_id, i.sku FROM t_order_item i WHERE i.user_id = 2 AND i.order_id = 3;
SELECT order_id, amount FROM t_order ORDER BY amount DESC LIMIT 2 OFFSET 1;
UPDATE t_order SET status = 'SHIPPED' WHERE status = 'PAID';
SELECT city FROM t_address ORDER BY city;
DELETE FROM t_order WHERE user_id = 1 AND order_id = 1
";

/// Registry built from [`DEMO_RULES`].
pub fn demo_registry() -> Result<Arc<RuleRegistry>> {
    let config = ShardingRuleConfig::from_json(DEMO_RULES)?;
    Ok(Arc::new(RuleRegistry::from_config(&config)?))
}

/// Run the demo script and return its transcript.
pub async fn run_demo(sql_show: bool) -> Result<String> {
    let config = EngineConfig {
        sql_show,
        ..EngineConfig::default()
    };
    run_script(demo_registry()?, DEMO_SCRIPT, config, false).await
}
