//! Shardline: route, run and inspect sharded SQL from the command line.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::debug;

use shardline_cli::{keygen, load_registry, route, run_demo, run_script, DEMO_RULES};
use shardline_core::EngineConfig;
use shardline_telemetry::{init_telemetry, TelemetryConfig};

/// Shardline: SQL sharding and routing engine
#[derive(Parser, Debug)]
#[command(name = "shardline", version)]
#[command(about = "Preview routing, run SQL against in-memory shards and generate keys")]
struct Args {
    /// Log filter (overrides SHARDLINE_LOG_LEVEL / RUST_LOG)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the routed statements for SQL, without executing it
    Route {
        /// JSON rule file
        #[arg(short, long)]
        rules: PathBuf,

        /// Print JSON instead of text
        #[arg(long)]
        json: bool,

        /// Logical SQL statements
        #[arg(required = true)]
        sql: Vec<String>,
    },

    /// Execute a `;`-separated script against in-memory datasources
    Run {
        /// JSON rule file
        #[arg(short, long)]
        rules: PathBuf,

        /// SQL script file
        #[arg(short, long)]
        script: PathBuf,

        /// Continue after a failing statement
        #[arg(long)]
        keep_going: bool,

        /// Log every routed statement
        #[arg(long)]
        sql_show: bool,

        /// Maximum statements of one query in flight
        #[arg(long, default_value_t = EngineConfig::default().max_connections_per_query)]
        max_connections: usize,

        /// Per-target timeout in milliseconds
        #[arg(long, default_value_t = EngineConfig::default().target_timeout_ms)]
        timeout_ms: u64,
    },

    /// Generate Snowflake or UUID keys
    Keygen {
        /// Snowflake worker id (0-1023)
        #[arg(short, long, default_value_t = 0)]
        worker_id: u16,

        /// Number of keys
        #[arg(short, long, default_value_t = 1)]
        count: usize,

        /// Generate UUID keys instead
        #[arg(long)]
        uuid: bool,

        /// Show timestamp, worker and sequence of each key
        #[arg(long)]
        explain: bool,
    },

    /// Run the built-in demo against two in-memory datasources
    Demo {
        /// Log every routed statement
        #[arg(long)]
        sql_show: bool,

        /// Print the demo rule file and exit
        #[arg(long)]
        print_rules: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut telemetry = TelemetryConfig::for_component("cli");
    if let Some(level) = args.log_level {
        telemetry = telemetry.with_log_level(level);
    }
    let _guard = init_telemetry(telemetry).context("cannot initialize logging")?;
    debug!(command = ?args.command, "[shardline] cli starting");

    let output = match args.command {
        Command::Route { rules, json, sql } => route(load_registry(&rules)?, &sql, json)?,
        Command::Run {
            rules,
            script,
            keep_going,
            sql_show,
            max_connections,
            timeout_ms,
        } => {
            let text = std::fs::read_to_string(&script)
                .with_context(|| format!("cannot read {}", script.display()))?;
            let config = EngineConfig {
                max_connections_per_query: max_connections,
                target_timeout_ms: timeout_ms,
                sql_show,
            };
            run_script(load_registry(&rules)?, &text, config, keep_going).await?
        }
        Command::Keygen {
            worker_id,
            count,
            uuid,
            explain,
        } => keygen(worker_id, count, uuid, explain)?,
        Command::Demo { print_rules: true, .. } => format!("{DEMO_RULES}\n"),
        Command::Demo { sql_show, .. } => run_demo(sql_show).await?,
    };
    print!("{output}");
    Ok(())
}
