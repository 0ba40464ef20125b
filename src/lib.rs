//! # graphtx
//!
//! A transaction executor for Bolt-speaking graph databases (Neo4j, Memgraph).
//!
//! Callers hand over a Cypher text with parameters and get back one normalized
//! result shape, whatever the execution mode.
//!
//! ## Features
//!
//! - **Managed transactions** - Read and write through the backend's retrying transaction functions
//! - **Auto-commit statements** - Single-statement reads and writes with a fixed deadline
//! - **Timing statistics** - Response time from server-reported or measured timings
//! - **Retry classification** - Every failure carries a "safe to resubmit" verdict
//! - **Scoped sessions** - Each call opens one session and releases it exactly once
//! - **Bolt backend** - Pooled Bolt 4.1-5.0 connections to a real server
//!
//! ## Basic Usage
//!
//! ```rust
//! use graphtx::backend::{ScriptedBackend, ScriptedConnector, ScriptedResponse};
//! use graphtx::{Counters, Dialect, DriverConfig, DriverHandle, DriverParams, Query, TransactionExecutor};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = ScriptedBackend::new();
//! backend.push(ScriptedResponse::new().with_counters(Counters {
//!     nodes_created: 1,
//!     ..Default::default()
//! }));
//!
//! let params = DriverParams::new("localhost", "7687", "neo4j", "password");
//! let config = DriverConfig::new(Dialect::Neo4j, &params)?;
//! let handle = DriverHandle::connect(config, &ScriptedConnector::new(backend)).await?;
//! let executor = TransactionExecutor::new(handle);
//!
//! let outcome = executor
//!     .write_commit_tx(&Query::new("CREATE (n:Device {name: $name})").with_param("name", "d0"))
//!     .await;
//! assert!(!outcome.retryable);
//! assert_eq!(outcome.write_summary().map(|s| s.nodes_created), Some(1));
//!
//! executor.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! Against a live server, swap the connector:
//!
//! ```rust,no_run
//! use graphtx::backend::BoltConnector;
//! use graphtx::{Dialect, DriverConfig, DriverHandle, DriverParams};
//!
//! # async fn run() -> graphtx::DriverResult<()> {
//! let params = DriverParams::new("localhost", "7687", "neo4j", "password");
//! let handle = DriverHandle::connect(DriverConfig::new(Dialect::Neo4j, &params)?, &BoltConnector).await?;
//! # handle.close().await
//! # }
//! ```
//!
//! ## Error Handling
//!
//! Execution modes never return `Err`; the failure and its retry verdict live in
//! [`TxOutcome`]. Construction and lifecycle calls return [`DriverResult`].
//!
//! ## Modules
//!
//! - [`driver`] - Executor, configuration, and backend contracts
//! - [`backend`] - Backend implementations (Bolt and scripted)
//! - [`bolt`] - Bolt wire layer: PackStream, messages, chunking, connections
//! - [`sample`] - Device topology workload
//!

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod backend;
pub mod bolt;
pub mod driver;
pub mod sample;

// Re-exports for convenience
pub use driver::{
    AccessMode, AuthToken, Counters, Dialect, DriverConfig, DriverConfigBuilder, DriverError,
    DriverHandle, DriverParams, DriverResult, DriverStats, GraphDriver, Query, Record,
    ResultSummary, SessionConfig, TransactionConfig, TransactionExecutor, TxOutcome, TxReport,
    Value, WriteSummary,
};

/// Config alias for convenience
pub type Config = DriverConfig;
