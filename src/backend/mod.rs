//! Backends
//!
//! [`GraphBackend`](crate::driver::GraphBackend) 구현.
//!
//! - [`BoltConnector`] - Neo4j/Memgraph 서버에 Bolt로 연결 (연결 풀 포함)
//! - [`ScriptedConnector`] - 서버 없이 응답을 미리 정해 두는 인메모리 백엔드

pub mod bolt;
pub mod pool;
pub mod scripted;

pub use bolt::{BoltBackend, BoltConnector};
pub use pool::{ConnectionPool, PoolSettings, PooledConnection};
pub use scripted::{
    ExecutedQuery, ScriptedBackend, ScriptedConnector, ScriptedResponse, Stage,
    DEFAULT_MANAGED_RETRIES,
};
