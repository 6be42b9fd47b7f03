//! # Shardline Routing Benchmarks
//!
//! | Stage | What is measured |
//! |-------|------------------|
//! | classify + route | `preview` of point, IN-list, full-scan and INSERT statements |
//! | inline expressions | evaluating `t_order${order_id % 2}` |
//! | key generation | Snowflake `next()` |
//! | merge | ordered k-way merge and grouped AVG across 4 shards |

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use rand::Rng;
use std::time::Duration;

use shardline_core::domain::{AggregationKind, SortDirection};
use shardline_core::{
    algorithms::merge::AggregationPlan, merge_row_sets, EngineConfig, InMemoryDataSources,
    InlineExpression, MergePlan, RowSet, ShardingEngine, SnowflakeConfig, SnowflakeKeyGenerator,
    SqlValue, StatementKind,
};
use shardline_tests::fixtures::{order_registry, MemoryEngine};

fn engine() -> MemoryEngine {
    ShardingEngine::with_data_sources(
        order_registry(),
        InMemoryDataSources::new(["ds0", "ds1"]),
        EngineConfig::default(),
    )
}

// ============================================================================
// Routing
// ============================================================================

fn bench_preview(c: &mut Criterion) {
    let mut group = c.benchmark_group("routing-preview");
    group.measurement_time(Duration::from_secs(5));
    let engine = engine();

    let statements = [
        ("point", "SELECT * FROM t_order WHERE user_id = 3 AND order_id = 8"),
        ("in_list", "SELECT * FROM t_order WHERE order_id IN (1, 2, 3, 4, 5, 6)"),
        ("full_scan", "SELECT status, COUNT(*), AVG(amount) FROM t_order GROUP BY status ORDER BY status"),
        ("binding_join", "SELECT o.order_id, i.sku FROM t_order o JOIN t_order_item i ON o.order_id = i.order_id WHERE o.user_id = 2"),
        ("insert_keygen", "INSERT INTO t_order (user_id, status, amount) VALUES (1, 'NEW', 10), (2, 'NEW', 20)"),
    ];
    for (name, sql) in statements {
        group.bench_function(name, |b| b.iter(|| black_box(engine.preview(sql).is_ok())));
    }
    group.finish();
}

fn bench_inline_expression(c: &mut Criterion) {
    let expression = InlineExpression::parse("t_order${order_id % 2}").unwrap_or_else(|e| panic!("{e}"));
    let mut rng = rand::thread_rng();
    let values: Vec<SqlValue> = (0..1_000).map(|_| SqlValue::Int(rng.gen_range(0..1_000_000))).collect();

    c.bench_function("inline-expression-evaluate", |b| {
        b.iter(|| {
            for value in &values {
                black_box(expression.evaluate(&[("order_id", value)]).is_ok());
            }
        })
    });
}

fn bench_snowflake(c: &mut Criterion) {
    let generator = SnowflakeKeyGenerator::new(SnowflakeConfig::default())
        .unwrap_or_else(|e| panic!("{e}"));
    let mut group = c.benchmark_group("key-generation");
    group.throughput(Throughput::Elements(1));
    group.bench_function("snowflake_next", |b| b.iter(|| black_box(generator.next().is_ok())));
    group.finish();
}

// ============================================================================
// Merging
// ============================================================================

fn shard_sets(shards: usize, rows_per_shard: usize) -> Vec<RowSet> {
    let mut rng = rand::thread_rng();
    (0..shards)
        .map(|_| {
            let mut rows: Vec<Vec<SqlValue>> = (0..rows_per_shard)
                .map(|_| {
                    let amount = rng.gen_range(0..10_000i64);
                    vec![
                        SqlValue::Int(amount),
                        SqlValue::from(if amount % 2 == 0 { "NEW" } else { "PAID" }),
                        SqlValue::Int(amount),
                        SqlValue::Int(1),
                    ]
                })
                .collect();
            rows.sort_by(|a, b| a[0].cmp(&b[0]));
            RowSet::new(
                vec![
                    "amount".into(),
                    "status".into(),
                    "AVG_DERIVED_SUM_0".into(),
                    "AVG_DERIVED_COUNT_0".into(),
                ],
                rows,
            )
        })
        .collect()
}

fn bench_merge(c: &mut Criterion) {
    let mut group = c.benchmark_group("merge");

    let mut ordered = MergePlan::pass_through(StatementKind::Select);
    ordered.order_by = vec![("amount".into(), SortDirection::Asc)];
    ordered.limit = Some(100);

    let mut grouped = MergePlan::pass_through(StatementKind::Select);
    grouped.group_by = vec!["status".into()];
    grouped.aggregations = vec![AggregationPlan {
        kind: AggregationKind::Avg,
        label: "amount".into(),
        sum_label: Some("AVG_DERIVED_SUM_0".into()),
        count_label: Some("AVG_DERIVED_COUNT_0".into()),
    }];
    grouped.derived_columns = vec!["AVG_DERIVED_SUM_0".into(), "AVG_DERIVED_COUNT_0".into()];

    for rows_per_shard in [100, 1_000, 10_000] {
        let sets = shard_sets(4, rows_per_shard);
        group.throughput(Throughput::Elements((4 * rows_per_shard) as u64));
        group.bench_with_input(BenchmarkId::new("ordered_limit", rows_per_shard), &sets, |b, sets| {
            b.iter(|| black_box(merge_row_sets(&ordered, sets.clone()).is_ok()))
        });
        group.bench_with_input(BenchmarkId::new("grouped_avg", rows_per_shard), &sets, |b, sets| {
            b.iter(|| black_box(merge_row_sets(&grouped, sets.clone()).is_ok()))
        });
    }
    group.finish();
}

criterion_group!(
    benches,
    bench_preview,
    bench_inline_expression,
    bench_snowflake,
    bench_merge
);
criterion_main!(benches);
