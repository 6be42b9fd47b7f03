//! # Shardline Telemetry
//!
//! Structured logging for Shardline binaries and tests.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shardline_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() {
//!     let _guard = init_telemetry(TelemetryConfig::from_env()).expect("telemetry");
//!     // Routed statements and merge decisions are now logged
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `SHARDLINE_SERVICE_NAME` | `shardline` | Service name in log lines |
//! | `SHARDLINE_LOG_LEVEL` / `RUST_LOG` | `info` | Log filter |
//! | `SHARDLINE_CONSOLE_OUTPUT` | `true` | Write logs to stdout |
//! | `SHARDLINE_JSON_LOGS` | `false` | JSON lines instead of plain text |

#![warn(missing_docs)]

mod config;
mod logging;

pub use config::{TelemetryConfig, DEFAULT_SERVICE_NAME};
pub use logging::{build_filter, init_logging};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    /// The log filter directive does not parse.
    #[error("Invalid log filter: {0}")]
    Filter(String),

    /// A global subscriber is already installed.
    #[error("Failed to initialize subscriber: {0}")]
    SubscriberInit(String),
}

/// Initialize logging.
///
/// Returns a guard to hold for the lifetime of the application.
pub fn init_telemetry(config: TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    init_logging(&config)?;
    tracing::info!(
        service = %config.service_name,
        version = env!("CARGO_PKG_VERSION"),
        "[shardline] telemetry initialized"
    );
    Ok(TelemetryGuard {
        service_name: config.service_name,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    service_name: String,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!(service = %self.service_name, "[shardline] shutting down telemetry");
    }
}
