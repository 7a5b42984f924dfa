//! Shardguard Database Client
//!
//! This crate provides the client side of the shardguard-to-database
//! contract: a typed [`Query`] sum, the [`Backend`] seam behind which the
//! wire codec lives, a URI-keyed lazy [`ConnPool`] and the retrying
//! [`Connector`] every orchestrator component talks through.
//!
//! # Overview
//!
//! Every node of a managed cluster answers three probes (`router_info`,
//! `replication`, `instance_info`) and one mutation (`promote_master`).
//! The pool hands out one long-lived connector per sanitized URI; the
//! connector retries transient failures and enforces per-call deadlines.
//!
//! # Components
//!
//! - [`query`] - The probe and mutation requests plus connection options
//! - [`backend`] - The wire-codec seam and the TCP implementation
//! - [`pool`] - URI-keyed lazy connection pool with override rules
//! - [`connector`] - Retry-on-transient exec wrapper
//! - [`mock`] - Scriptable in-memory backend used by the test suites

pub mod backend;
pub mod connector;
pub mod mock;
pub mod pool;
pub mod query;

pub use backend::{Backend, BackendFactory, TcpBackend, TcpBackendFactory};
pub use connector::Connector;
pub use mock::{MockBackendFactory, MockCluster};
pub use pool::ConnPool;
pub use query::{ConnOptions, Query};
