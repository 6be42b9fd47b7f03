//! Metrics for the sharding engine
//!
//! Lock-free counters updated on every logical statement and a point-in-time
//! snapshot for reporting.
//!
//! ## Usage
//!
//! ```ignore
//! let metrics = engine.metrics();
//! let snapshot = metrics.snapshot();
//! println!("{} statements, {} fanned out", snapshot.statements, snapshot.multi_target_statements);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;

/// Counters of one engine instance.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    /// Logical statements received.
    pub statements: AtomicU64,
    /// Statements that completed without error.
    pub succeeded: AtomicU64,
    /// Statements rejected or failed outright.
    pub failed: AtomicU64,
    /// Statements where some targets failed.
    pub partial_failures: AtomicU64,
    /// Routed statements executed.
    pub routed_statements: AtomicU64,
    /// Logical statements routed to more than one target.
    pub multi_target_statements: AtomicU64,
    /// Statements replicated to every datasource.
    pub broadcasts: AtomicU64,
    /// Keys produced by key generators.
    pub keys_generated: AtomicU64,
    /// Cumulative end-to-end latency in microseconds.
    pub latency_us: AtomicU64,
}

/// Plain copy of the counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    /// Logical statements received.
    pub statements: u64,
    /// Statements that completed without error.
    pub succeeded: u64,
    /// Statements rejected or failed outright.
    pub failed: u64,
    /// Statements where some targets failed.
    pub partial_failures: u64,
    /// Routed statements executed.
    pub routed_statements: u64,
    /// Logical statements routed to more than one target.
    pub multi_target_statements: u64,
    /// Statements replicated to every datasource.
    pub broadcasts: u64,
    /// Keys produced by key generators.
    pub keys_generated: u64,
    /// Mean end-to-end latency in microseconds.
    pub avg_latency_us: u64,
}

impl EngineMetrics {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the routing of one logical statement.
    pub fn record_route(&self, targets: usize, broadcast: bool) {
        self.routed_statements
            .fetch_add(targets as u64, Ordering::Relaxed);
        if targets > 1 {
            self.multi_target_statements.fetch_add(1, Ordering::Relaxed);
        }
        if broadcast {
            self.broadcasts.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record generated keys.
    pub fn record_keys(&self, count: usize) {
        self.keys_generated.fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Record a completed statement.
    pub fn record_success(&self, duration: Duration) {
        self.record_statement(duration);
        self.succeeded.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a statement that failed on some targets only.
    pub fn record_partial_failure(&self, duration: Duration) {
        self.record_statement(duration);
        self.partial_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a rejected or failed statement.
    pub fn record_failure(&self, duration: Duration) {
        self.record_statement(duration);
        self.failed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_statement(&self, duration: Duration) {
        self.statements.fetch_add(1, Ordering::Relaxed);
        self.latency_us
            .fetch_add(duration.as_micros() as u64, Ordering::Relaxed);
    }

    /// Get a snapshot of current metrics
    pub fn snapshot(&self) -> MetricsSnapshot {
        let statements = self.statements.load(Ordering::Relaxed);
        let latency = self.latency_us.load(Ordering::Relaxed);
        MetricsSnapshot {
            statements,
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            partial_failures: self.partial_failures.load(Ordering::Relaxed),
            routed_statements: self.routed_statements.load(Ordering::Relaxed),
            multi_target_statements: self.multi_target_statements.load(Ordering::Relaxed),
            broadcasts: self.broadcasts.load(Ordering::Relaxed),
            keys_generated: self.keys_generated.load(Ordering::Relaxed),
            avg_latency_us: if statements > 0 { latency / statements } else { 0 },
        }
    }
}
