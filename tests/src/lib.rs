//! # Shardline Test Suite
//!
//! End-to-end flows through the sharding engine against in-memory
//! datasources and scripted mocks.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! ├── fixtures.rs       # Order schema rules, engines, seeding helpers
//! └── integration/      # Routing, merging, keys, broadcast, failures
//! tests/benches/        # Criterion benchmarks for routing and merging
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p shardline-tests
//!
//! # By category
//! cargo test -p shardline-tests integration::routing
//! cargo test -p shardline-tests integration::keys
//!
//! # Benchmarks
//! cargo bench -p shardline-tests
//! ```

#![allow(dead_code)]

pub mod fixtures;
pub mod integration;
