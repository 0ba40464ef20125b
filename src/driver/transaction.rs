//! Transaction Contract
//!
//! 관리 트랜잭션 함수에 넘기는 작업과 트랜잭션 설정

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;

use super::error::DriverResult;
use super::record::Record;
use super::session::{Query, ResultCursor, ResultSummary};
use super::types::Value;

// ============================================================================
// TransactionConfig - 트랜잭션 설정
// ============================================================================

/// 트랜잭션 설정
#[derive(Debug, Clone, Default)]
pub struct TransactionConfig {
    /// 서버 측 타임아웃 (None이면 백엔드 기본값)
    pub timeout: Option<Duration>,
    /// 메타데이터
    pub metadata: HashMap<String, Value>,
}

impl TransactionConfig {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 타임아웃 설정
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// 메타데이터 추가
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

// ============================================================================
// ManagedTransaction - 관리 트랜잭션
// ============================================================================

/// 관리 트랜잭션 함수 안에서 작업이 받는 트랜잭션.
/// 커밋과 롤백은 백엔드가 담당한다.
#[async_trait]
pub trait ManagedTransaction: Send {
    /// 트랜잭션 안에서 쿼리 실행
    async fn run(&mut self, query: &Query) -> DriverResult<Box<dyn ResultCursor>>;
}

// ============================================================================
// TransactionWork - 트랜잭션 작업
// ============================================================================

/// 관리 트랜잭션 작업
///
/// 백엔드가 재시도하면 같은 작업이 여러 번 실행될 수 있으므로 호출 사이에 상태를 남기지 않는다.
#[async_trait]
pub trait TransactionWork: Send + Sync {
    /// 작업 실행
    async fn execute(&self, tx: &mut dyn ManagedTransaction) -> DriverResult<TransactionOutput>;
}

/// 작업 결과
#[derive(Debug, Clone, Default)]
pub struct TransactionOutput {
    /// 수집된 레코드
    pub records: Vec<Record>,
    /// 소비 메타데이터 (소비 실패 시 None)
    pub summary: Option<ResultSummary>,
    /// 쿼리 본문 측정 시간
    pub measured: Duration,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_config() {
        let config = TransactionConfig::new()
            .with_timeout(Duration::from_secs(30))
            .with_metadata("app", "graphtx");

        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(config.metadata.get("app"), Some(&Value::from("graphtx")));
        assert!(TransactionConfig::default().timeout.is_none());
    }
}
