//! Structured logging.
//!
//! One `tracing-subscriber` registry with an `EnvFilter` and either a plain
//! or a JSON `fmt` layer. JSON lines carry consistent fields:
//! - `timestamp`, `level`, `target`
//! - `component`: emitting component (`router`, `cli`, ...)
//! - `data_source` / `table`: physical target of routed statements
//! - Additional context fields

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::{TelemetryConfig, TelemetryError};

/// Build the filter from the configured directive.
pub fn build_filter(config: &TelemetryConfig) -> Result<EnvFilter, TelemetryError> {
    EnvFilter::try_new(&config.log_level)
        .map_err(|e| TelemetryError::Filter(format!("{}: {e}", config.log_level)))
}

/// Install the global subscriber.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = build_filter(config)?;

    if !config.console_output {
        return tracing_subscriber::registry()
            .with(env_filter)
            .try_init()
            .map_err(|e| TelemetryError::SubscriberInit(e.to_string()));
    }

    if config.json_logs {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .try_init()
            .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .with_ansi(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::SubscriberInit(e.to_string()))?;
    }

    tracing::debug!(
        service = %config.service_name,
        json_logs = config.json_logs,
        "[shardline] logging initialized"
    );
    Ok(())
}

/// Structured log entry with a `component` field.
///
/// ```rust,ignore
/// log_event!(info, "cli", "rules loaded", tables = 3);
/// ```
#[macro_export]
macro_rules! log_event {
    ($level:ident, $component:expr, $msg:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            component = $component,
            $($($field)*,)?
            $msg
        )
    };
}

/// Log a routed-statement event with standard target fields.
///
/// ```rust,ignore
/// log_route_event!(info, "router", "statement routed", "ds0", "t_order1", sql = %sql);
/// ```
#[macro_export]
macro_rules! log_route_event {
    ($level:ident, $component:expr, $msg:expr, $data_source:expr, $table:expr $(, $($field:tt)*)?) => {
        tracing::$level!(
            component = $component,
            data_source = %$data_source,
            table = %$table,
            $($($field)*,)?
            $msg
        )
    };
}
