//! Shardguard CLI support
//!
//! Configuration loading and the HTTP surface of the `shardguard`
//! binary. The binary itself lives in `main.rs`; everything here is a
//! library so the test suites can exercise it directly.

pub mod config;
pub mod http;
