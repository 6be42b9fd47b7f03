//! Shared fixtures for unit tests.

use std::sync::Arc;

use crate::config::{
    AlgorithmConfig, KeyGenerateConfig, KeyGeneratorConfig, SnowflakeConfig, StrategyConfig,
    TableRuleConfig,
};
use crate::domain::RuleRegistry;

fn strategy(column: &str, algorithm: &str) -> StrategyConfig {
    StrategyConfig {
        sharding_column: column.into(),
        sharding_algorithm_name: algorithm.into(),
    }
}

/// Two datasources, two tables each:
/// - `t_order` / `t_order_item`: bound, `ds${user_id % 2}.<table>${order_id % 2}`;
/// - `t_order` generates `order_id` with a Snowflake generator;
/// - `t_user`: same grid, MOD on `user_id` for both dimensions, not bound;
/// - `t_address`: broadcast;
/// - `t_config`: unregistered tables go to `ds0`.
pub fn order_registry() -> Arc<RuleRegistry> {
    let mut builder = RuleRegistry::builder();
    builder
        .with_data_sources(["ds0", "ds1"])
        .with_default_data_source("ds0");
    builder
        .with_algorithm(
            "db_inline",
            &AlgorithmConfig::Inline {
                algorithm_expression: "ds${user_id % 2}".into(),
            },
        )
        .unwrap()
        .with_algorithm(
            "order_inline",
            &AlgorithmConfig::Inline {
                algorithm_expression: "t_order${order_id % 2}".into(),
            },
        )
        .unwrap()
        .with_algorithm(
            "item_inline",
            &AlgorithmConfig::Inline {
                algorithm_expression: "t_order_item${order_id % 2}".into(),
            },
        )
        .unwrap()
        .with_algorithm("mod2", &AlgorithmConfig::Mod { sharding_count: 2 })
        .unwrap()
        .with_key_generator(
            "snowflake",
            &KeyGeneratorConfig::Snowflake(SnowflakeConfig::default()),
        )
        .unwrap();

    let mut order = TableRuleConfig::new("t_order");
    order.actual_data_nodes = Some("ds${0..1}.t_order${0..1}".into());
    order.database_strategy = Some(strategy("user_id", "db_inline"));
    order.table_strategy = Some(strategy("order_id", "order_inline"));
    order.key_generate_strategy = Some(KeyGenerateConfig {
        column: "order_id".into(),
        key_generator_name: "snowflake".into(),
    });

    let mut item = TableRuleConfig::new("t_order_item");
    item.actual_data_nodes = Some("ds${0..1}.t_order_item${0..1}".into());
    item.database_strategy = Some(strategy("user_id", "db_inline"));
    item.table_strategy = Some(strategy("order_id", "item_inline"));

    let mut user = TableRuleConfig::new("t_user");
    user.actual_data_nodes = Some("ds${0..1}.t_user${0..1}".into());
    user.database_strategy = Some(strategy("user_id", "mod2"));
    user.table_strategy = Some(strategy("user_id", "mod2"));

    for table in [&order, &item, &user] {
        builder.register_table(table).unwrap();
    }
    builder.register_broadcast("t_address").unwrap();
    builder.with_binding_group(["t_order", "t_order_item"]);
    Arc::new(builder.build().unwrap())
}
