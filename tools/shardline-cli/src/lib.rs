//! # Shardline CLI
//!
//! Command line front end for the sharding engine.
//!
//! ```text
//! shardline route  --rules rules.json "SELECT * FROM t_order WHERE order_id = 7"
//! shardline run    --rules rules.json --script seed.sql
//! shardline keygen --worker-id 3 --count 5 --explain
//! shardline demo
//! ```
//!
//! `route` previews routed statements without executing them; `run` and
//! `demo` execute against in-memory datasources.

pub mod commands;
pub mod demo;
pub mod render;

pub use commands::{describe_error, keygen, load_registry, route, run_script, split_statements};
pub use demo::{demo_registry, run_demo, DEMO_RULES, DEMO_SCRIPT};
