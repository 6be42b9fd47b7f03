//! # Ports
//!
//! Inbound API and outbound dependency traits, plus test doubles.

pub mod inbound;
pub mod outbound;

pub use inbound::ShardingApi;
pub use outbound::{
    ConnectionProvider, ManualClock, MockConnection, MockDataSources, StatementExecutor,
    TimeSource,
};
