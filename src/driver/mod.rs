//! Driver Module
//!
//! 그래프 데이터베이스 트랜잭션 실행기
//!
//! # 구성
//!
//! - 드라이버 핸들 (DriverHandle, DriverConfig, Dialect)
//! - 실행기 (TransactionExecutor, GraphDriver)
//! - 세션/트랜잭션 계약 (GraphSession, ManagedTransaction, ResultCursor)
//! - 결과 형태 (TxOutcome, DriverStats, WriteSummary)
//! - 이벤트 (EventListener, TracingListener)
//!
//! # Example
//!
//! ```ignore
//! use graphtx::driver::{Dialect, DriverConfig, DriverHandle, DriverParams, Query, TransactionExecutor};
//!
//! let params = DriverParams::new("localhost", "7687", "neo4j", "password");
//! let config = DriverConfig::new(Dialect::Neo4j, &params)?;
//! let handle = DriverHandle::connect(config, &connector).await?;
//! let executor = TransactionExecutor::new(handle);
//!
//! let outcome = executor.read_tx(&Query::new("MATCH (n:Device) RETURN n")).await;
//! if let Some(stats) = outcome.stats() {
//!     println!("{:.3}s", stats.response_time_seconds);
//! }
//!
//! executor.close().await?;
//! ```

#[allow(clippy::module_inception)]
mod driver;
mod error;
mod events;
mod executor;
mod record;
mod retry;
mod session;
mod stats;
mod transaction;
mod types;

// Re-exports
pub use driver::{
    AuthToken, BackendConnector, Dialect, DriverConfig, DriverConfigBuilder, DriverHandle,
    DriverParams, GraphBackend, ServerAddress, DEFAULT_BOLT_PORT, DEFAULT_MAX_POOL_SIZE,
    READ_TX_TIMEOUT_SECS,
};
pub use error::{BackendError, DriverError, DriverResult, EMPTY_STATEMENT_CODE};
pub use events::{
    DriverEvent, EventKind, EventListener, NoopListener, RecordedEvent, RecordingListener,
    TracingListener,
};
pub use executor::{ExecutorBuilder, GraphDriver, TransactionExecutor};
pub use record::Record;
pub use retry::{CodeRetryClassifier, RetryClassifier};
pub use session::{
    AccessMode, Counters, GraphSession, InputPosition, Notification, Query, ResultCursor,
    ResultSummary, ScopedSession, SessionConfig,
};
pub use stats::{DriverStats, TxOutcome, TxReport, WriteSummary};
pub use transaction::{ManagedTransaction, TransactionConfig, TransactionOutput, TransactionWork};
pub use types::{Node, Relationship, Value};

/// 파라미터 맵 생성 매크로
#[macro_export]
macro_rules! params {
    () => {
        std::collections::HashMap::<String, $crate::driver::Value>::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = std::collections::HashMap::<String, $crate::driver::Value>::new();
        $(
            map.insert($key.into(), $crate::driver::Value::from($value));
        )+
        map
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_macro() {
        let params = crate::params! {
            "hub_id" => "h-1",
            "count" => 3i64,
        };

        assert_eq!(params.len(), 2);
        assert_eq!(params.get("hub_id"), Some(&Value::from("h-1")));
        assert_eq!(params.get("count"), Some(&Value::Integer(3)));
        assert!(crate::params!().is_empty());
    }
}
