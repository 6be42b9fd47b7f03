//! # Integration Flows
//!
//! Each module drives the public engine API end to end.

pub mod broadcast;
pub mod failures;
pub mod keys;
pub mod merging;
pub mod routing;
