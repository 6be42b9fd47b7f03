//! # Application Layer
//!
//! Orchestrates classification, routing, fan-out execution and merging
//! behind the [`ShardingApi`](crate::ports::inbound::ShardingApi) port.

pub mod broadcast;
pub mod engine;
pub mod execution;
pub mod merger;
pub mod router;

pub use broadcast::{broadcast_statements, BroadcastHandler};
pub use engine::ShardingEngine;
pub use execution::FanOutExecutor;
pub use merger::ResultMerger;
pub use router::{QueryRouter, RoutePlan};
