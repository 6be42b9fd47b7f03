//! # Adapters Layer (Hexagonal Architecture)
//!
//! Implements outbound port traits: the system clock and in-memory
//! datasources.

pub mod clock;
pub mod memory;

pub use clock::SystemClock;
pub use memory::{InMemoryDataSources, MemoryConnection};
