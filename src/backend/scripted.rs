//! Scripted Backend
//!
//! 응답을 미리 적어 두고 돌려주는 인메모리 백엔드.
//! 세션 열기/닫기 횟수를 세고, 파이프라인 단계별 실패와 지연을 주입할 수 있다.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::driver::{
    AccessMode, BackendConnector, Counters, DriverConfig, DriverError, DriverResult,
    GraphBackend, GraphSession, ManagedTransaction, Notification, Query, Record, ResultCursor,
    ResultSummary, SessionConfig, TransactionConfig, TransactionOutput, TransactionWork, Value,
};

/// 관리 트랜잭션 기본 재시도 횟수
pub const DEFAULT_MANAGED_RETRIES: usize = 3;

// ============================================================================
// Stage / ScriptedResponse - 스크립트
// ============================================================================

/// 실패를 주입할 파이프라인 단계
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// 세션 획득
    Open,
    /// 쿼리 실행
    Run,
    /// 레코드 수집
    Collect,
    /// 요약 소비
    Consume,
    /// 커밋 (관리 쓰기)
    Commit,
}

/// 쿼리 실행 한 번에 대한 응답
#[derive(Debug, Default)]
pub struct ScriptedResponse {
    /// 돌려줄 레코드
    pub records: Vec<Record>,
    /// 돌려줄 요약
    pub summary: ResultSummary,
    /// 실행 단계 지연
    pub delay: Duration,
    /// 주입할 실패
    pub failure: Option<(Stage, DriverError)>,
}

impl ScriptedResponse {
    /// 빈 응답
    pub fn new() -> Self {
        Self::default()
    }

    /// 레코드 설정
    pub fn with_records(mut self, records: Vec<Record>) -> Self {
        self.records = records;
        self
    }

    /// 카운터 설정
    pub fn with_counters(mut self, counters: Counters) -> Self {
        self.summary.counters = counters;
        self
    }

    /// 서버 보고 타이밍 설정
    pub fn with_timings(mut self, available_after: Duration, consumed_after: Duration) -> Self {
        self.summary.result_available_after = available_after;
        self.summary.result_consumed_after = consumed_after;
        self
    }

    /// 알림 추가
    pub fn with_notification(mut self, notification: Notification) -> Self {
        self.summary.notifications.push(notification);
        self
    }

    /// 실행 지연 설정
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 단계 실패 설정
    pub fn failing_at(mut self, stage: Stage, error: DriverError) -> Self {
        self.failure = Some((stage, error));
        self
    }

    fn take_failure(&mut self, stage: Stage) -> Option<DriverError> {
        match &self.failure {
            Some((s, _)) if *s == stage => self.failure.take().map(|(_, err)| err),
            _ => None,
        }
    }
}

/// 백엔드가 받은 실행 기록
#[derive(Debug, Clone, PartialEq)]
pub struct ExecutedQuery {
    /// 쿼리 텍스트
    pub text: String,
    /// 관리 트랜잭션 접근 모드 (auto-commit이면 None)
    pub access_mode: Option<AccessMode>,
    /// 세션을 열 때 요청된 접근 모드
    pub session_mode: AccessMode,
    /// 전달된 서버 측 타임아웃
    pub timeout: Option<Duration>,
    /// 전달된 트랜잭션 메타데이터
    pub metadata: HashMap<String, Value>,
}

// ============================================================================
// ScriptedBackend - 스크립트 백엔드
// ============================================================================

#[derive(Default)]
struct Inner {
    responses: Mutex<VecDeque<ScriptedResponse>>,
    executed: Mutex<Vec<ExecutedQuery>>,
    verify_failure: Mutex<Option<DriverError>>,
    close_failure: Mutex<Option<DriverError>>,
    max_managed_retries: AtomicUsize,
    sessions_opened: AtomicUsize,
    sessions_closed: AtomicUsize,
    verify_calls: AtomicUsize,
    close_calls: AtomicUsize,
}

impl Inner {
    fn next_response(&self) -> ScriptedResponse {
        self.responses.lock().pop_front().unwrap_or_default()
    }

    fn record(
        &self,
        query: &Query,
        access_mode: Option<AccessMode>,
        session_mode: AccessMode,
        config: &TransactionConfig,
    ) {
        self.executed.lock().push(ExecutedQuery {
            text: query.text.clone(),
            access_mode,
            session_mode,
            timeout: config.timeout,
            metadata: config.metadata.clone(),
        });
    }

    /// 응답 하나를 꺼내 실행 단계를 흉내 낸다
    async fn execute(
        &self,
        query: &Query,
        access_mode: Option<AccessMode>,
        session_mode: AccessMode,
        config: &TransactionConfig,
    ) -> DriverResult<ScriptedCursor> {
        self.record(query, access_mode, session_mode, config);
        let mut response = self.next_response();

        if !response.delay.is_zero() {
            tokio::time::sleep(response.delay).await;
        }
        if let Some(err) = response.take_failure(Stage::Run) {
            return Err(err);
        }
        Ok(ScriptedCursor::new(response))
    }
}

/// 스크립트 백엔드. 복제본은 같은 상태를 공유한다.
#[derive(Clone)]
pub struct ScriptedBackend {
    inner: Arc<Inner>,
}

impl ScriptedBackend {
    /// 새 백엔드 생성
    pub fn new() -> Self {
        let inner = Inner {
            max_managed_retries: AtomicUsize::new(DEFAULT_MANAGED_RETRIES),
            ..Default::default()
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    /// 응답 추가 (실행 순서대로 소비됨)
    pub fn push(&self, response: ScriptedResponse) -> &Self {
        self.inner.responses.lock().push_back(response);
        self
    }

    /// 관리 트랜잭션 재시도 횟수 설정
    pub fn set_max_managed_retries(&self, retries: usize) {
        self.inner.max_managed_retries.store(retries, Ordering::SeqCst);
    }

    /// 다음 연결 테스트 실패 설정
    pub fn fail_next_verify(&self, error: DriverError) {
        *self.inner.verify_failure.lock() = Some(error);
    }

    /// 다음 종료 실패 설정
    pub fn fail_next_close(&self, error: DriverError) {
        *self.inner.close_failure.lock() = Some(error);
    }

    /// 열린 세션 수
    pub fn sessions_opened(&self) -> usize {
        self.inner.sessions_opened.load(Ordering::SeqCst)
    }

    /// 닫힌 세션 수
    pub fn sessions_closed(&self) -> usize {
        self.inner.sessions_closed.load(Ordering::SeqCst)
    }

    /// 연결 테스트 호출 수
    pub fn verify_calls(&self) -> usize {
        self.inner.verify_calls.load(Ordering::SeqCst)
    }

    /// 종료 호출 수
    pub fn close_calls(&self) -> usize {
        self.inner.close_calls.load(Ordering::SeqCst)
    }

    /// 소비되지 않은 응답 수
    pub fn pending_responses(&self) -> usize {
        self.inner.responses.lock().len()
    }

    /// 실행 기록
    pub fn executed(&self) -> Vec<ExecutedQuery> {
        self.inner.executed.lock().clone()
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ScriptedBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScriptedBackend")
            .field("pending_responses", &self.pending_responses())
            .field("sessions_opened", &self.sessions_opened())
            .field("sessions_closed", &self.sessions_closed())
            .finish()
    }
}

#[async_trait]
impl GraphBackend for ScriptedBackend {
    async fn open_session(&self, config: &SessionConfig) -> DriverResult<Box<dyn GraphSession>> {
        {
            let mut responses = self.inner.responses.lock();
            if let Some(front) = responses.front_mut() {
                if let Some(err) = front.take_failure(Stage::Open) {
                    responses.pop_front();
                    return Err(err);
                }
            }
        }

        self.inner.sessions_opened.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            inner: self.inner.clone(),
            mode: config.default_access_mode,
        }))
    }

    async fn verify_connectivity(&self) -> DriverResult<()> {
        self.inner.verify_calls.fetch_add(1, Ordering::SeqCst);
        match self.inner.verify_failure.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn close(&self) -> DriverResult<()> {
        self.inner.close_calls.fetch_add(1, Ordering::SeqCst);
        match self.inner.close_failure.lock().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

// ============================================================================
// ScriptedSession / ScriptedTransaction / ScriptedCursor
// ============================================================================

struct ScriptedSession {
    inner: Arc<Inner>,
    mode: AccessMode,
}

impl ScriptedSession {
    /// 백엔드 트랜잭션 함수: 재시도 가능한 실패면 작업을 다시 실행한다
    async fn execute_managed(
        &mut self,
        mode: AccessMode,
        config: &TransactionConfig,
        work: &dyn TransactionWork,
    ) -> DriverResult<TransactionOutput> {
        let max_retries = self.inner.max_managed_retries.load(Ordering::SeqCst);
        let mut attempt = 0;

        loop {
            let mut tx = ScriptedTransaction {
                inner: self.inner.clone(),
                mode,
                session_mode: self.mode,
                config: config.clone(),
                commit_failure: None,
            };

            let result = match work.execute(&mut tx).await {
                Ok(output) => match tx.commit_failure.take() {
                    Some(err) if mode == AccessMode::Write => Err(err),
                    _ => Ok(output),
                },
                Err(err) => Err(err),
            };

            match result {
                Err(err) if err.is_retryable() && attempt < max_retries => {
                    attempt += 1;
                    tracing::debug!(attempt, %err, "retrying managed transaction");
                }
                other => return other,
            }
        }
    }
}

#[async_trait]
impl GraphSession for ScriptedSession {
    async fn execute_read(
        &mut self,
        config: &TransactionConfig,
        work: &dyn TransactionWork,
    ) -> DriverResult<TransactionOutput> {
        self.execute_managed(AccessMode::Read, config, work).await
    }

    async fn execute_write(
        &mut self,
        config: &TransactionConfig,
        work: &dyn TransactionWork,
    ) -> DriverResult<TransactionOutput> {
        self.execute_managed(AccessMode::Write, config, work).await
    }

    async fn run(
        &mut self,
        query: &Query,
        config: &TransactionConfig,
    ) -> DriverResult<Box<dyn ResultCursor>> {
        let cursor = self.inner.execute(query, None, self.mode, config).await?;
        Ok(Box::new(cursor))
    }

    fn close(&mut self) {
        self.inner.sessions_closed.fetch_add(1, Ordering::SeqCst);
    }
}

struct ScriptedTransaction {
    inner: Arc<Inner>,
    mode: AccessMode,
    session_mode: AccessMode,
    config: TransactionConfig,
    commit_failure: Option<DriverError>,
}

#[async_trait]
impl ManagedTransaction for ScriptedTransaction {
    async fn run(&mut self, query: &Query) -> DriverResult<Box<dyn ResultCursor>> {
        let mut cursor = self
            .inner
            .execute(query, Some(self.mode), self.session_mode, &self.config)
            .await?;
        self.commit_failure = cursor.response.take_failure(Stage::Commit);
        Ok(Box::new(cursor))
    }
}

struct ScriptedCursor {
    response: ScriptedResponse,
    collected: bool,
}

impl ScriptedCursor {
    fn new(response: ScriptedResponse) -> Self {
        Self {
            response,
            collected: false,
        }
    }
}

#[async_trait]
impl ResultCursor for ScriptedCursor {
    async fn collect(&mut self) -> DriverResult<Vec<Record>> {
        if let Some(err) = self.response.take_failure(Stage::Collect) {
            return Err(err);
        }
        self.collected = true;
        Ok(std::mem::take(&mut self.response.records))
    }

    async fn consume(&mut self) -> DriverResult<ResultSummary> {
        if let Some(err) = self.response.take_failure(Stage::Consume) {
            return Err(err);
        }
        if !self.collected {
            self.response.records.clear();
        }
        Ok(self.response.summary.clone())
    }
}

// ============================================================================
// ScriptedConnector - 스크립트 커넥터
// ============================================================================

/// 스크립트 백엔드를 돌려주거나 핸드셰이크 실패를 흉내 내는 커넥터
#[derive(Default)]
pub struct ScriptedConnector {
    backend: Option<ScriptedBackend>,
    failure: Mutex<Option<DriverError>>,
    delay: Duration,
    connect_calls: AtomicUsize,
}

impl ScriptedConnector {
    /// 백엔드를 돌려주는 커넥터
    pub fn new(backend: ScriptedBackend) -> Self {
        Self {
            backend: Some(backend),
            ..Default::default()
        }
    }

    /// 핸드셰이크에 실패하는 커넥터
    pub fn failing(error: DriverError) -> Self {
        Self {
            failure: Mutex::new(Some(error)),
            ..Default::default()
        }
    }

    /// 핸드셰이크 지연 설정
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 연결 시도 수
    pub fn connect_calls(&self) -> usize {
        self.connect_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BackendConnector for ScriptedConnector {
    async fn connect(&self, config: &DriverConfig) -> DriverResult<Arc<dyn GraphBackend>> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if let Some(err) = self.failure.lock().take() {
            return Err(err);
        }
        match &self.backend {
            Some(backend) => Ok(Arc::new(backend.clone())),
            None => Err(DriverError::connection(format!("{} is unreachable", config.uri()))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_failure_consumes_response() {
        let backend = ScriptedBackend::new();
        backend.push(ScriptedResponse::new().failing_at(Stage::Open, DriverError::connection("refused")));

        let err = backend.open_session(&SessionConfig::new()).await.err().unwrap();
        assert!(matches!(err, DriverError::Connection(_)));
        assert_eq!(backend.pending_responses(), 0);
        assert_eq!(backend.sessions_opened(), 0);
    }

    #[tokio::test]
    async fn test_auto_commit_run_records_execution() {
        let backend = ScriptedBackend::new();
        backend.push(
            ScriptedResponse::new().with_records(vec![Record::from_pairs([("n", 1i64)])]),
        );

        let mut session = backend.open_session(&SessionConfig::new()).await.unwrap();
        let config = TransactionConfig::new().with_timeout(Duration::from_secs(30));
        let mut cursor = session.run(&Query::new("RETURN 1 AS n"), &config).await.unwrap();
        assert_eq!(cursor.collect().await.unwrap().len(), 1);
        session.close();

        let executed = backend.executed();
        assert_eq!(executed.len(), 1);
        assert_eq!(executed[0].access_mode, None);
        assert_eq!(executed[0].timeout, Some(Duration::from_secs(30)));
        assert_eq!(backend.sessions_closed(), 1);
    }

    #[tokio::test]
    async fn test_consume_without_collect_discards_records() {
        let mut cursor = ScriptedCursor::new(
            ScriptedResponse::new()
                .with_records(vec![Record::from_pairs([("n", 1i64)])])
                .with_counters(Counters {
                    nodes_created: 1,
                    ..Default::default()
                }),
        );

        let summary = cursor.consume().await.unwrap();
        assert_eq!(summary.counters.nodes_created, 1);
        assert!(cursor.collect().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_connector_without_backend_is_unreachable() {
        let connector = ScriptedConnector::default();
        let err = connector.connect(&DriverConfig::default()).await.err().unwrap();
        assert_eq!(err.to_string(), "Connection error: bolt://localhost:7687 is unreachable");
    }
}
