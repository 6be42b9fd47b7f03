//! Subcommand implementations. Each returns the text to print.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use shardline_core::{
    EngineConfig, InMemoryDataSources, KeyGenerator, RoutedStatement, RuleRegistry,
    ShardingEngine, ShardingError, ShardingRuleConfig, SnowflakeConfig, SnowflakeKeyGenerator,
    UuidKeyGenerator,
};
use shardline_core::sql::split_script;
use shardline_telemetry::{log_event, log_route_event};

use crate::render::{format_key, format_result, format_routes};

/// Load and validate a JSON rule file.
pub fn load_registry(path: &Path) -> Result<Arc<RuleRegistry>> {
    let config = ShardingRuleConfig::from_file(path)?;
    let registry = RuleRegistry::from_config(&config)
        .with_context(|| format!("invalid rules in {}", path.display()))?;
    log_event!(
        info,
        "cli",
        "rules loaded",
        data_sources = registry.data_sources().len(),
        tables = registry.tables().count()
    );
    Ok(Arc::new(registry))
}

/// Engine over fresh in-memory databases, one per configured datasource.
pub fn memory_engine(
    registry: Arc<RuleRegistry>,
    config: EngineConfig,
) -> ShardingEngine<InMemoryDataSources, InMemoryDataSources> {
    let data_sources = InMemoryDataSources::new(registry.data_sources().iter().cloned());
    ShardingEngine::with_data_sources(registry, data_sources, config)
}

/// JSON form of one previewed statement.
#[derive(Debug, Serialize)]
struct RoutePreview<'a> {
    sql: &'a str,
    routes: Vec<RoutedStatement>,
}

/// Routed statements for each SQL text, without executing anything.
pub fn route(registry: Arc<RuleRegistry>, statements: &[String], json: bool) -> Result<String> {
    if statements.is_empty() {
        bail!("no SQL given");
    }
    let engine = memory_engine(registry, EngineConfig::default());
    let mut out = String::new();
    let mut previews = Vec::with_capacity(statements.len());
    for sql in statements {
        let routes = engine
            .preview(sql)
            .with_context(|| format!("cannot route `{sql}`"))?;
        for routed in &routes {
            log_route_event!(
                debug,
                "cli",
                "statement routed",
                routed.target.data_source,
                routed.target.table,
                sql = %routed.sql
            );
        }
        if json {
            previews.push(RoutePreview { sql, routes });
        } else {
            out += &format!("Logic SQL: {sql}\n");
            out += &format_routes(&routes);
        }
    }
    if json {
        out = serde_json::to_string_pretty(&previews)? + "\n";
    }
    Ok(out)
}

/// Generate keys with a Snowflake (or UUID) generator.
pub fn keygen(worker_id: u16, count: usize, uuid: bool, explain: bool) -> Result<String> {
    let mut out = String::new();
    if uuid {
        let generator = UuidKeyGenerator;
        for _ in 0..count {
            out += &format!("{}\n", generator.generate_key()?);
        }
        return Ok(out);
    }
    let generator = SnowflakeKeyGenerator::new(SnowflakeConfig {
        worker_id,
        ..SnowflakeConfig::default()
    })?;
    for _ in 0..count {
        let key = generator.next()?;
        if explain {
            out += &format_key(key);
            out.push('\n');
        } else {
            out += &format!("{}\n", key.value());
        }
    }
    Ok(out)
}

/// Split a script into statements with the SQL parser, so `;` inside
/// string literals and comments stays put.
pub fn split_statements(script: &str) -> Result<Vec<String>> {
    split_script(script).context("cannot split script into statements")
}

/// Execute a script against in-memory datasources.
///
/// Statements run in order; the first failing statement stops the script
/// unless `keep_going` is set.
pub async fn run_script(
    registry: Arc<RuleRegistry>,
    script: &str,
    config: EngineConfig,
    keep_going: bool,
) -> Result<String> {
    let engine = memory_engine(registry, config);
    let mut out = String::new();
    for sql in split_statements(script)? {
        out += &format!("> {sql}\n");
        match engine.execute(&sql).await {
            Ok(result) => out += &format_result(&result),
            Err(error) => {
                out += &describe_error(&error);
                if !keep_going {
                    return Err(error).with_context(|| format!("statement failed: {sql}"));
                }
            }
        }
    }
    out += &format!(
        "metrics: {}\n",
        serde_json::to_string(&engine.metrics().snapshot())?
    );
    Ok(out)
}

/// Error text, with per-target detail for partial failures.
pub fn describe_error(error: &ShardingError) -> String {
    match error.partial_failure() {
        Some(partial) => {
            let mut out = format!("error: {error}\n");
            for failure in &partial.failed {
                out += &format!("  failed  {}: {}\n", failure.target, failure.error);
            }
            for target in &partial.succeeded {
                out += &format!("  applied {target}\n");
            }
            out
        }
        None => format!("error: {error}\n"),
    }
}
