//! Session Contract
//!
//! 백엔드 세션 계약과 쿼리/결과 요약 타입.
//! 실행기는 호출마다 세션을 새로 열고, [`ScopedSession`]이 모든 종료 경로에서 한 번만 닫는다.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::time::Duration;

use async_trait::async_trait;

use super::error::{DriverError, DriverResult};
use super::record::Record;
use super::transaction::{TransactionConfig, TransactionOutput, TransactionWork};
use super::types::Value;

// ============================================================================
// AccessMode - 접근 모드
// ============================================================================

/// 접근 모드
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// 읽기
    #[default]
    Read,
    /// 쓰기
    Write,
}

// ============================================================================
// SessionConfig - 세션 설정
// ============================================================================

/// 세션 설정
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// 데이터베이스 이름 (None이면 서버 기본값)
    pub database: Option<String>,
    /// 기본 접근 모드
    pub default_access_mode: AccessMode,
}

impl SessionConfig {
    /// 새 설정 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 데이터베이스 설정
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.database = Some(database.into());
        self
    }

    /// 접근 모드 설정
    pub fn with_access_mode(mut self, mode: AccessMode) -> Self {
        self.default_access_mode = mode;
        self
    }
}

// ============================================================================
// Query - 쿼리 요청
// ============================================================================

/// 트랜잭션 하나에 대한 쿼리 요청
///
/// 호출자가 호출마다 만들고 실행기는 수정하지 않는다.
#[derive(Debug, Clone, Default)]
pub struct Query {
    /// Cypher 텍스트
    pub text: String,
    /// 파라미터
    pub parameters: HashMap<String, Value>,
    /// 타임아웃 재정의 (초)
    pub timeout_secs: Option<i64>,
}

impl Query {
    /// 새 쿼리 생성
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    /// 파라미터 추가
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// 파라미터들 추가
    pub fn with_params(mut self, params: HashMap<String, Value>) -> Self {
        self.parameters.extend(params);
        self
    }

    /// 타임아웃 재정의 설정
    pub fn with_timeout_secs(mut self, secs: i64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// 타임아웃 재정의 설정. 1초 미만 자투리는 올림한다.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        let mut secs = timeout.as_secs();
        if timeout.subsec_nanos() > 0 {
            secs += 1;
        }
        self.timeout_secs = Some(i64::try_from(secs).unwrap_or(i64::MAX));
        self
    }

    /// 실행 가능 여부 검사
    pub fn validate(&self) -> DriverResult<()> {
        if self.text.trim().is_empty() {
            return Err(DriverError::empty_statement());
        }
        Ok(())
    }

    /// 유효 타임아웃 계산 (재정의가 없으면 `default`)
    pub fn effective_timeout(&self, default: Duration) -> DriverResult<Duration> {
        match self.timeout_secs {
            None => Ok(default),
            Some(secs) if secs > 0 => Ok(Duration::from_secs(secs as u64)),
            Some(secs) => Err(DriverError::configuration(format!(
                "Timeout must be positive, got {}s",
                secs
            ))),
        }
    }
}

impl From<&str> for Query {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Query {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

// ============================================================================
// ResultSummary - 결과 요약
// ============================================================================

/// 결과를 소비한 뒤 백엔드가 보고하는 메타데이터
#[derive(Debug, Clone, Default)]
pub struct ResultSummary {
    /// 카운터
    pub counters: Counters,
    /// 첫 레코드까지 걸린 시간 (서버 측)
    pub result_available_after: Duration,
    /// 결과 소비까지 걸린 시간 (서버 측)
    pub result_consumed_after: Duration,
    /// 데이터베이스 정보
    pub database: Option<String>,
    /// 서버 정보
    pub server: Option<String>,
    /// 알림
    pub notifications: Vec<Notification>,
}

/// 카운터
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Counters {
    /// 생성된 노드 수
    pub nodes_created: i64,
    /// 삭제된 노드 수
    pub nodes_deleted: i64,
    /// 생성된 관계 수
    pub relationships_created: i64,
    /// 삭제된 관계 수
    pub relationships_deleted: i64,
    /// 설정된 속성 수
    pub properties_set: i64,
    /// 추가된 레이블 수
    pub labels_added: i64,
    /// 제거된 레이블 수
    pub labels_removed: i64,
    /// 생성된 인덱스 수
    pub indexes_added: i64,
    /// 제거된 인덱스 수
    pub indexes_removed: i64,
    /// 추가된 제약조건 수
    pub constraints_added: i64,
    /// 제거된 제약조건 수
    pub constraints_removed: i64,
}

impl Counters {
    /// 변경 사항 존재 여부
    pub fn contains_updates(&self) -> bool {
        self.nodes_created > 0
            || self.nodes_deleted > 0
            || self.relationships_created > 0
            || self.relationships_deleted > 0
            || self.properties_set > 0
            || self.labels_added > 0
            || self.labels_removed > 0
    }

    /// 스키마 변경 존재 여부
    pub fn contains_system_updates(&self) -> bool {
        self.indexes_added > 0
            || self.indexes_removed > 0
            || self.constraints_added > 0
            || self.constraints_removed > 0
    }

    /// 변경된 노드와 관계의 총 수
    pub fn nodes_relationships_changed(&self) -> i64 {
        self.nodes_created
            + self.nodes_deleted
            + self.relationships_created
            + self.relationships_deleted
    }
}

/// 알림
#[derive(Debug, Clone)]
pub struct Notification {
    /// 코드
    pub code: String,
    /// 제목
    pub title: String,
    /// 설명
    pub description: String,
    /// 심각도
    pub severity: String,
    /// 위치
    pub position: Option<InputPosition>,
}

/// 입력 위치
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputPosition {
    /// 오프셋
    pub offset: i64,
    /// 라인
    pub line: i64,
    /// 컬럼
    pub column: i64,
}

impl fmt::Display for InputPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "line {}, column {} (offset {})", self.line, self.column, self.offset)
    }
}

// ============================================================================
// ResultCursor / GraphSession - 백엔드 계약
// ============================================================================

/// 실행된 쿼리의 결과 커서
#[async_trait]
pub trait ResultCursor: Send {
    /// 남은 레코드를 모두 메모리로 수집
    async fn collect(&mut self) -> DriverResult<Vec<Record>>;

    /// 남은 레코드를 버리고 요약 메타데이터 반환
    async fn consume(&mut self) -> DriverResult<ResultSummary>;
}

/// 백엔드 세션
///
/// 구현은 백엔드 드라이버가 제공한다. `execute_read`/`execute_write`는 백엔드의
/// 관리 트랜잭션 함수로, 일시적 실패 시 `work`를 다시 실행할 수 있다.
#[async_trait]
pub trait GraphSession: Send {
    /// 관리 읽기 트랜잭션에서 작업 실행
    async fn execute_read(
        &mut self,
        config: &TransactionConfig,
        work: &dyn TransactionWork,
    ) -> DriverResult<TransactionOutput>;

    /// 관리 쓰기 트랜잭션에서 작업 실행 (성공 시 커밋)
    async fn execute_write(
        &mut self,
        config: &TransactionConfig,
        work: &dyn TransactionWork,
    ) -> DriverResult<TransactionOutput>;

    /// 단일 문장 실행 (auto-commit, 재시도 없음)
    async fn run(
        &mut self,
        query: &Query,
        config: &TransactionConfig,
    ) -> DriverResult<Box<dyn ResultCursor>>;

    /// 세션 반환. 세션당 정확히 한 번 호출된다.
    fn close(&mut self);
}

// ============================================================================
// ScopedSession - 범위 세션
// ============================================================================

/// 드롭 시 세션을 닫는 가드
///
/// 에러, 패닉, 타임아웃으로 future가 취소된 경우에도 `close`가 한 번 호출된다.
pub struct ScopedSession {
    session: Box<dyn GraphSession>,
}

impl ScopedSession {
    /// 열린 세션을 감싼다
    pub fn new(session: Box<dyn GraphSession>) -> Self {
        Self { session }
    }
}

impl Deref for ScopedSession {
    type Target = dyn GraphSession;

    fn deref(&self) -> &Self::Target {
        self.session.as_ref()
    }
}

impl DerefMut for ScopedSession {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut()
    }
}

impl Drop for ScopedSession {
    fn drop(&mut self) {
        self.session.close();
    }
}

impl fmt::Debug for ScopedSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedSession").finish_non_exhaustive()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;

    #[test]
    fn test_query_builder() {
        let query = Query::new("MATCH (n:Device) RETURN n")
            .with_param("name", "device0")
            .with_param("count", 3i64)
            .with_timeout_secs(5);

        assert_eq!(query.parameters.len(), 2);
        assert_eq!(query.parameters.get("count"), Some(&Value::Integer(3)));
        assert_eq!(query.timeout_secs, Some(5));
    }

    #[test]
    fn test_query_validate() {
        assert!(Query::new("RETURN 1").validate().is_ok());

        let err = Query::new("").validate().unwrap_err();
        assert!(err.is_client_error());
        assert!(!err.is_retryable());

        assert!(Query::new("  \n\t").validate().is_err());
    }

    #[test]
    fn test_query_effective_timeout() {
        let default = Duration::from_secs(30);

        assert_eq!(Query::new("RETURN 1").effective_timeout(default).unwrap(), default);
        assert_eq!(
            Query::new("RETURN 1").with_timeout_secs(1).effective_timeout(default).unwrap(),
            Duration::from_secs(1)
        );

        let err = Query::new("RETURN 1").with_timeout_secs(-3).effective_timeout(default);
        assert!(matches!(err, Err(DriverError::Configuration(_))));
        assert!(Query::new("RETURN 1").with_timeout_secs(0).effective_timeout(default).is_err());
    }

    #[test]
    fn test_query_with_duration_timeout() {
        let default = Duration::from_secs(30);

        let query = Query::new("RETURN 1").with_timeout(Duration::from_secs(5));
        assert_eq!(query.timeout_secs, Some(5));
        assert_eq!(query.effective_timeout(default).unwrap(), Duration::from_secs(5));

        let query = Query::new("RETURN 1").with_timeout(Duration::from_millis(1500));
        assert_eq!(query.timeout_secs, Some(2));

        let query = Query::new("RETURN 1").with_timeout(Duration::ZERO);
        assert!(matches!(
            query.effective_timeout(default),
            Err(DriverError::Configuration(_))
        ));
    }

    #[test]
    fn test_counters() {
        let counters = Counters {
            nodes_created: 1,
            relationships_created: 2,
            ..Default::default()
        };

        assert!(counters.contains_updates());
        assert!(!counters.contains_system_updates());
        assert_eq!(counters.nodes_relationships_changed(), 3);

        let schema = Counters {
            constraints_added: 1,
            ..Default::default()
        };
        assert!(schema.contains_system_updates());
        assert!(!schema.contains_updates());
    }

    #[test]
    fn test_input_position_display() {
        let pos = InputPosition {
            offset: 10,
            line: 1,
            column: 11,
        };
        assert_eq!(pos.to_string(), "line 1, column 11 (offset 10)");
    }

    struct CountingSession {
        closed: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl GraphSession for CountingSession {
        async fn execute_read(
            &mut self,
            _config: &TransactionConfig,
            _work: &dyn TransactionWork,
        ) -> DriverResult<TransactionOutput> {
            Err(DriverError::internal("unused"))
        }

        async fn execute_write(
            &mut self,
            _config: &TransactionConfig,
            _work: &dyn TransactionWork,
        ) -> DriverResult<TransactionOutput> {
            Err(DriverError::internal("unused"))
        }

        async fn run(
            &mut self,
            _query: &Query,
            _config: &TransactionConfig,
        ) -> DriverResult<Box<dyn ResultCursor>> {
            Err(DriverError::connection("refused"))
        }

        fn close(&mut self) {
            self.closed.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_scoped_session_closes_once_on_error() {
        let closed = Arc::new(AtomicUsize::new(0));
        {
            let mut scoped = ScopedSession::new(Box::new(CountingSession {
                closed: closed.clone(),
            }));
            let result = scoped.run(&Query::new("RETURN 1"), &TransactionConfig::new()).await;
            assert!(result.is_err());
        }
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_scoped_session_closes_on_panic() {
        let closed = Arc::new(AtomicUsize::new(0));
        let inner = closed.clone();
        let outcome = std::panic::catch_unwind(move || {
            let _scoped = ScopedSession::new(Box::new(CountingSession { closed: inner }));
            panic!("backend fault");
        });
        assert!(outcome.is_err());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }
}
