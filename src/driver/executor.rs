//! Transaction Executor
//!
//! 네 가지 실행 모드를 하나의 결과 형태([`TxOutcome`])로 제공한다.
//!
//! | 모드 | 트랜잭션 | 타임아웃 | 결과 |
//! |------|----------|----------|------|
//! | `read_tx` | 관리 읽기 | 요청 재정의 또는 30초 | 레코드 + [`DriverStats`] |
//! | `write_commit_tx` | 관리 쓰기 | 백엔드 기본값 | [`WriteSummary`] |
//! | `write_tx` | 관리 쓰기 | 백엔드 기본값 | 없음 |
//! | `write_single_tx` | auto-commit | 고정 30초 | 없음 |
//! | `read_single_tx` | auto-commit | 고정 30초 | 레코드 |
//!
//! 모든 모드는 호출마다 세션을 새로 열고 종료 경로와 상관없이 한 번 닫는다.
//! 실패는 [`RetryClassifier`]로 분류되며, 재시도는 호출자 몫이다.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::driver::{Dialect, DriverHandle};
use super::error::{DriverError, DriverResult};
use super::events::{DriverEvent, EventListener, TracingListener};
use super::record::Record;
use super::retry::{CodeRetryClassifier, RetryClassifier};
use super::session::{AccessMode, Query, ResultSummary, ScopedSession};
use super::stats::{DriverStats, TxOutcome, TxReport, WriteSummary};
use super::transaction::{ManagedTransaction, TransactionConfig, TransactionOutput, TransactionWork};
use super::types::Value;

const READ_TX: &str = "ReadTx";
const WRITE_COMMIT_TX: &str = "WriteCommitTx";
const WRITE_SINGLE_TX: &str = "WriteSingleTx";
const READ_SINGLE_TX: &str = "ReadSingleTx";

// ============================================================================
// GraphDriver - 호출자 계약
// ============================================================================

/// 호출자가 사용하는 드라이버 계약
#[async_trait]
pub trait GraphDriver: Send + Sync {
    /// 관리 읽기
    async fn read_tx(&self, query: &Query) -> TxOutcome;

    /// 관리 쓰기 (요약 없음)
    async fn write_tx(&self, query: &Query) -> TxOutcome;

    /// 관리 쓰기 + 변경 요약
    async fn write_commit_tx(&self, query: &Query) -> TxOutcome;

    /// 단일 문장 쓰기
    async fn write_single_tx(&self, query: &Query) -> TxOutcome;

    /// 단일 문장 읽기
    async fn read_single_tx(&self, query: &Query) -> TxOutcome;

    /// 연결 테스트
    async fn verify_connectivity(&self) -> DriverResult<()>;

    /// 백엔드 방언
    fn mode(&self) -> Dialect;

    /// 종료
    async fn close(&self) -> DriverResult<()>;
}

// ============================================================================
// ExecutorBuilder - 실행기 빌더
// ============================================================================

/// 실행기 빌더
pub struct ExecutorBuilder {
    handle: DriverHandle,
    listener: Arc<dyn EventListener>,
    classifier: Arc<dyn RetryClassifier>,
    read_timeout: Duration,
    single_statement_timeout: Duration,
    metadata: HashMap<String, Value>,
}

impl ExecutorBuilder {
    /// 이벤트 리스너 설정
    pub fn with_listener(mut self, listener: Arc<dyn EventListener>) -> Self {
        self.listener = listener;
        self
    }

    /// 재시도 분류기 설정
    pub fn with_retry_classifier(mut self, classifier: Arc<dyn RetryClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    /// 관리 읽기 기본 타임아웃 설정
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// 단일 문장 타임아웃 설정
    pub fn with_single_statement_timeout(mut self, timeout: Duration) -> Self {
        self.single_statement_timeout = timeout;
        self
    }

    /// 모든 트랜잭션에 붙일 메타데이터 추가 (서버 쿼리 로그에 남는다)
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// 빌드
    pub fn build(self) -> TransactionExecutor {
        TransactionExecutor {
            handle: self.handle,
            listener: self.listener,
            classifier: self.classifier,
            read_timeout: self.read_timeout,
            single_statement_timeout: self.single_statement_timeout,
            metadata: self.metadata,
        }
    }
}

// ============================================================================
// TransactionExecutor - 트랜잭션 실행기
// ============================================================================

/// 트랜잭션 실행기
///
/// 내부에 공유 가변 상태가 없으므로 여러 태스크에서 동시에 호출해도 된다.
/// 호출 간 순서는 보장하지 않는다.
pub struct TransactionExecutor {
    handle: DriverHandle,
    listener: Arc<dyn EventListener>,
    classifier: Arc<dyn RetryClassifier>,
    read_timeout: Duration,
    single_statement_timeout: Duration,
    metadata: HashMap<String, Value>,
}

impl TransactionExecutor {
    /// 기본 리스너([`TracingListener`])와 분류기로 생성
    pub fn new(handle: DriverHandle) -> Self {
        Self::builder(handle).build()
    }

    /// 빌더 시작. 타임아웃 기본값은 핸들 설정에서 가져온다.
    pub fn builder(handle: DriverHandle) -> ExecutorBuilder {
        let read_timeout = handle.config().read_timeout;
        let single_statement_timeout = handle.config().single_statement_timeout;
        ExecutorBuilder {
            handle,
            listener: Arc::new(TracingListener),
            classifier: Arc::new(CodeRetryClassifier),
            read_timeout,
            single_statement_timeout,
            metadata: HashMap::new(),
        }
    }

    /// 드라이버 핸들
    pub fn handle(&self) -> &DriverHandle {
        &self.handle
    }

    /// 관리 읽기
    ///
    /// 결과 전체를 메모리로 수집한 뒤 요약을 소비해 [`DriverStats`]를 계산한다.
    /// 요약 소비 실패는 이벤트로만 보고되고 통계는 측정 시간으로 채워진다.
    pub async fn read_tx(&self, query: &Query) -> TxOutcome {
        self.emit(DriverEvent::Request {
            action: READ_TX,
            query,
        });

        match self.managed_read(query).await {
            Ok((records, stats)) => {
                TxOutcome::success(Some(records), Some(TxReport::Read(stats)))
            }
            Err(err) => self.fail(READ_TX, err, None),
        }
    }

    /// 관리 쓰기. 변경 요약은 버리고 재시도 판정과 에러만 남긴다.
    pub async fn write_tx(&self, query: &Query) -> TxOutcome {
        let mut outcome = self.write_commit_tx(query).await;
        outcome.report = None;
        outcome
    }

    /// 관리 쓰기 + 변경 요약
    ///
    /// 실패하면 0으로 채운 [`WriteSummary`]를 돌려준다.
    pub async fn write_commit_tx(&self, query: &Query) -> TxOutcome {
        self.emit(DriverEvent::Request {
            action: WRITE_COMMIT_TX,
            query,
        });

        match self.managed_write(query).await {
            Ok(summary) => TxOutcome::success(None, Some(TxReport::Write(summary))),
            Err(err) => self.fail(
                WRITE_COMMIT_TX,
                err,
                Some(TxReport::Write(WriteSummary::default())),
            ),
        }
    }

    /// 단일 문장 쓰기 (백엔드 자동 재시도 없음).
    /// 카운터와 알림은 이벤트로만 보고된다.
    pub async fn write_single_tx(&self, query: &Query) -> TxOutcome {
        self.emit(DriverEvent::Request {
            action: WRITE_SINGLE_TX,
            query,
        });

        match self.single_write(query).await {
            Ok(()) => TxOutcome::success(None, None),
            Err(err) => self.fail(WRITE_SINGLE_TX, err, None),
        }
    }

    /// 단일 문장 읽기 (통계 없음)
    pub async fn read_single_tx(&self, query: &Query) -> TxOutcome {
        self.emit(DriverEvent::Request {
            action: READ_SINGLE_TX,
            query,
        });

        match self.single_read(query).await {
            Ok(records) => TxOutcome::success(Some(records), None),
            Err(err) => self.fail(READ_SINGLE_TX, err, None),
        }
    }

    /// 연결 테스트. 새 연결을 만들지 않는다.
    pub async fn verify_connectivity(&self) -> DriverResult<()> {
        self.handle.verify_connectivity().await
    }

    /// 백엔드 방언
    pub fn mode(&self) -> Dialect {
        self.handle.dialect()
    }

    /// 풀의 모든 연결 해제
    pub async fn close(&self) -> DriverResult<()> {
        self.emit(DriverEvent::Closing);
        self.handle.close().await
    }

    // ------------------------------------------------------------------------
    // 모드별 파이프라인
    // ------------------------------------------------------------------------

    async fn managed_read(&self, query: &Query) -> DriverResult<(Vec<Record>, DriverStats)> {
        query.validate()?;
        let timeout = query.effective_timeout(self.read_timeout)?;
        let config = self.tx_config(Some(timeout));
        let work = CollectWork {
            action: READ_TX,
            query,
            listener: self.listener.as_ref(),
            strict_consume: false,
        };

        let output = self
            .within(READ_TX, timeout, async {
                let mut session = self.open_session(AccessMode::Read).await?;
                session.execute_read(&config, &work).await
            })
            .await?;

        let stats = match &output.summary {
            Some(summary) => DriverStats::from_timings(
                summary.result_available_after,
                summary.result_consumed_after,
                output.measured,
            ),
            None => DriverStats::from_timings(Duration::ZERO, Duration::ZERO, output.measured),
        };
        Ok((output.records, stats))
    }

    async fn managed_write(&self, query: &Query) -> DriverResult<WriteSummary> {
        query.validate()?;
        let work = CollectWork {
            action: WRITE_COMMIT_TX,
            query,
            listener: self.listener.as_ref(),
            strict_consume: true,
        };

        let config = self.tx_config(None);
        let mut session = self.open_session(AccessMode::Write).await?;
        let output = session.execute_write(&config, &work).await?;
        drop(session);

        let summary = output
            .summary
            .ok_or_else(|| DriverError::internal("Write transaction finished without a summary"))?;
        self.log_summary(WRITE_COMMIT_TX, &summary);
        Ok(WriteSummary::from_counters(&summary.counters))
    }

    async fn single_write(&self, query: &Query) -> DriverResult<()> {
        query.validate()?;
        let timeout = self.single_statement_timeout;
        let config = self.tx_config(Some(timeout));

        let (records, summary) = self
            .within(WRITE_SINGLE_TX, timeout, async {
                let mut session = self.open_session(AccessMode::Write).await?;
                let mut cursor = session.run(query, &config).await?;
                let records = cursor.collect().await?;
                let summary = cursor.consume().await?;
                Ok((records, summary))
            })
            .await?;

        // RETURN 절이 있는 쓰기는 행도 로그에 남긴다
        if !records.is_empty() {
            self.emit(DriverEvent::Records {
                action: WRITE_SINGLE_TX,
                records: &records,
            });
        }
        self.log_summary(WRITE_SINGLE_TX, &summary);
        Ok(())
    }

    async fn single_read(&self, query: &Query) -> DriverResult<Vec<Record>> {
        query.validate()?;
        let timeout = self.single_statement_timeout;
        let config = self.tx_config(Some(timeout));

        let records = self
            .within(READ_SINGLE_TX, timeout, async {
                let mut session = self.open_session(AccessMode::Read).await?;
                let mut cursor = session.run(query, &config).await?;
                cursor.collect().await
            })
            .await?;

        self.emit(DriverEvent::Records {
            action: READ_SINGLE_TX,
            records: &records,
        });
        Ok(records)
    }

    // ------------------------------------------------------------------------
    // 공통
    // ------------------------------------------------------------------------

    async fn open_session(&self, mode: AccessMode) -> DriverResult<ScopedSession> {
        self.handle.open_session(mode).await.map(ScopedSession::new)
    }

    fn tx_config(&self, timeout: Option<Duration>) -> TransactionConfig {
        TransactionConfig {
            timeout,
            metadata: self.metadata.clone(),
        }
    }

    /// 타임아웃 안에서 실행. 만료되면 future가 드롭되어 세션도 닫힌다.
    async fn within<T, F>(&self, action: &str, timeout: Duration, fut: F) -> DriverResult<T>
    where
        F: Future<Output = DriverResult<T>>,
    {
        tokio::time::timeout(timeout, fut).await.map_err(|_| {
            DriverError::timeout(format!("{} exceeded {:?}", action, timeout))
        })?
    }

    fn log_summary(&self, action: &'static str, summary: &ResultSummary) {
        self.emit(DriverEvent::Counters {
            action,
            counters: &summary.counters,
        });
        for (index, notification) in summary.notifications.iter().enumerate() {
            self.emit(DriverEvent::Notification {
                action,
                index,
                notification,
            });
        }
    }

    fn fail(&self, action: &'static str, error: DriverError, report: Option<TxReport>) -> TxOutcome {
        let retryable = self.classifier.is_retryable(&error);
        self.emit(DriverEvent::Failure {
            action,
            error: &error,
            retryable,
        });
        TxOutcome::failure(error, retryable, report)
    }

    fn emit(&self, event: DriverEvent<'_>) {
        self.listener.on_event(&event);
    }
}

impl std::fmt::Debug for TransactionExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionExecutor")
            .field("handle", &self.handle)
            .field("read_timeout", &self.read_timeout)
            .field("single_statement_timeout", &self.single_statement_timeout)
            .finish()
    }
}

#[async_trait]
impl GraphDriver for TransactionExecutor {
    async fn read_tx(&self, query: &Query) -> TxOutcome {
        TransactionExecutor::read_tx(self, query).await
    }

    async fn write_tx(&self, query: &Query) -> TxOutcome {
        TransactionExecutor::write_tx(self, query).await
    }

    async fn write_commit_tx(&self, query: &Query) -> TxOutcome {
        TransactionExecutor::write_commit_tx(self, query).await
    }

    async fn write_single_tx(&self, query: &Query) -> TxOutcome {
        TransactionExecutor::write_single_tx(self, query).await
    }

    async fn read_single_tx(&self, query: &Query) -> TxOutcome {
        TransactionExecutor::read_single_tx(self, query).await
    }

    async fn verify_connectivity(&self) -> DriverResult<()> {
        TransactionExecutor::verify_connectivity(self).await
    }

    fn mode(&self) -> Dialect {
        TransactionExecutor::mode(self)
    }

    async fn close(&self) -> DriverResult<()> {
        TransactionExecutor::close(self).await
    }
}

// ============================================================================
// CollectWork - 관리 트랜잭션 작업
// ============================================================================

/// 실행 -> 수집 -> 소비 작업
struct CollectWork<'a> {
    action: &'static str,
    query: &'a Query,
    listener: &'a dyn EventListener,
    /// true면 소비 실패가 작업 실패가 된다
    strict_consume: bool,
}

#[async_trait]
impl<'a> TransactionWork for CollectWork<'a> {
    async fn execute(&self, tx: &mut dyn ManagedTransaction) -> DriverResult<TransactionOutput> {
        let started = Instant::now();
        let mut cursor = tx.run(self.query).await?;
        let records = cursor.collect().await?;
        self.listener.on_event(&DriverEvent::Records {
            action: self.action,
            records: &records,
        });

        let summary = match cursor.consume().await {
            Ok(summary) => Some(summary),
            Err(err) if !self.strict_consume => {
                self.listener.on_event(&DriverEvent::ConsumeFailure {
                    action: self.action,
                    error: &err,
                });
                None
            }
            Err(err) => return Err(err),
        };

        Ok(TransactionOutput {
            records,
            summary,
            measured: started.elapsed(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::scripted::{ScriptedBackend, ScriptedResponse, Stage};
    use crate::driver::driver::DriverConfig;
    use crate::driver::error::EMPTY_STATEMENT_CODE;
    use crate::driver::events::{EventKind, RecordingListener};
    use crate::driver::session::{AccessMode, Counters, Notification};

    const OUTDATED: &str = "Neo.TransientError.Transaction.Outdated";
    const SYNTAX: &str = "Neo.ClientError.Statement.SyntaxError";

    fn executor(backend: &ScriptedBackend) -> (TransactionExecutor, Arc<RecordingListener>) {
        let listener = Arc::new(RecordingListener::new());
        let handle = DriverHandle::with_backend(DriverConfig::default(), Arc::new(backend.clone()));
        let executor = TransactionExecutor::builder(handle)
            .with_listener(listener.clone())
            .build();
        (executor, listener)
    }

    fn device_record(name: &str) -> Record {
        Record::from_pairs([("name", name)])
    }

    fn assert_sessions_balanced(backend: &ScriptedBackend) {
        assert_eq!(backend.sessions_opened(), backend.sessions_closed());
    }

    #[tokio::test]
    async fn test_write_commit_reports_counters() {
        let backend = ScriptedBackend::new();
        backend.push(ScriptedResponse::new().with_counters(Counters {
            nodes_created: 1,
            relationships_created: 1,
            properties_set: 2,
            ..Default::default()
        }));
        let (executor, _) = executor(&backend);

        let outcome = executor
            .write_commit_tx(&Query::new("CREATE (a:Device)-[:IF]->(b:Interface)"))
            .await;

        assert!(!outcome.retryable);
        assert!(outcome.error.is_none());
        assert!(outcome.records.is_none());
        assert_eq!(
            outcome.write_summary(),
            Some(&WriteSummary {
                nodes_created: 1,
                nodes_deleted: 0,
                relationships_created: 1,
                relationships_deleted: 0,
            })
        );
        assert_sessions_balanced(&backend);
    }

    #[tokio::test]
    async fn test_read_prefers_server_available_time() {
        let backend = ScriptedBackend::new();
        backend.push(
            ScriptedResponse::new()
                .with_records(vec![device_record("device0"), device_record("device1")])
                .with_timings(Duration::from_millis(120), Duration::from_millis(150)),
        );
        let (executor, _) = executor(&backend);

        let outcome = executor.read_tx(&Query::new("MATCH (n:Device) RETURN n.name AS name")).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.records().len(), 2);
        assert_eq!(outcome.records()[1].get_string("name").unwrap(), "device1");

        let stats = outcome.stats().unwrap();
        assert_eq!(stats.response_time, Duration::from_millis(120));
        assert_eq!(stats.consumed_time, Duration::from_millis(150));
        assert!((stats.response_time_seconds - 0.12).abs() < 1e-9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_falls_back_to_measured_time() {
        let backend = ScriptedBackend::new();
        backend.push(ScriptedResponse::new().with_delay(Duration::from_millis(200)));
        let (executor, _) = executor(&backend);

        let outcome = executor.read_tx(&Query::new("MATCH (n) RETURN n")).await;

        let stats = outcome.stats().unwrap();
        assert_eq!(stats.available_time, Duration::ZERO);
        assert!(stats.measured_time >= Duration::from_millis(200));
        assert_eq!(stats.response_time, stats.measured_time);
    }

    #[tokio::test]
    async fn test_transient_write_failure_is_retryable() {
        let backend = ScriptedBackend::new();
        backend.set_max_managed_retries(0);
        backend.push(
            ScriptedResponse::new().failing_at(Stage::Run, DriverError::server(OUTDATED, "conflict")),
        );
        let (executor, listener) = executor(&backend);

        let outcome = executor.write_commit_tx(&Query::new("CREATE (n:Device)")).await;

        assert!(outcome.retryable);
        assert_eq!(outcome.write_summary(), Some(&WriteSummary::default()));
        assert_eq!(outcome.error.as_ref().and_then(|e| e.code()), Some(OUTDATED));
        assert_eq!(
            listener.events().last().map(|e| (e.kind, e.retryable)),
            Some((EventKind::Failure, Some(true)))
        );
        assert_sessions_balanced(&backend);
    }

    #[tokio::test]
    async fn test_empty_statement_opens_no_session() {
        let backend = ScriptedBackend::new();
        let (executor, _) = executor(&backend);
        let query = Query::new("  \n ");

        let outcomes = vec![
            executor.read_tx(&query).await,
            executor.write_tx(&query).await,
            executor.write_commit_tx(&query).await,
            executor.write_single_tx(&query).await,
            executor.read_single_tx(&query).await,
        ];

        for outcome in outcomes {
            let err = outcome.error.unwrap();
            assert_eq!(err.code(), Some(EMPTY_STATEMENT_CODE));
            assert!(!outcome.retryable);
        }
        assert_eq!(backend.sessions_opened(), 0);
        assert!(backend.executed().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_timeout_is_rejected() {
        let backend = ScriptedBackend::new();
        let (executor, _) = executor(&backend);

        for secs in [0, -5] {
            let outcome = executor
                .read_tx(&Query::new("MATCH (n) RETURN n").with_timeout_secs(secs))
                .await;
            assert!(matches!(outcome.error, Some(DriverError::Configuration(_))));
            assert!(!outcome.retryable);
        }
        assert_eq!(backend.sessions_opened(), 0);
    }

    #[tokio::test]
    async fn test_sessions_released_on_every_stage_failure() {
        let stages = [Stage::Open, Stage::Run, Stage::Collect, Stage::Consume, Stage::Commit];

        for stage in stages {
            let backend = ScriptedBackend::new();
            let (executor, _) = executor(&backend);
            let query = Query::new("MATCH (n) RETURN n");
            let failing = || ScriptedResponse::new().failing_at(stage, DriverError::query(SYNTAX, "bad"));

            backend.push(failing());
            executor.read_tx(&query).await;
            assert_sessions_balanced(&backend);

            backend.push(failing());
            executor.write_commit_tx(&query).await;
            assert_sessions_balanced(&backend);

            backend.push(failing());
            executor.write_tx(&query).await;
            assert_sessions_balanced(&backend);

            backend.push(failing());
            executor.write_single_tx(&query).await;
            assert_sessions_balanced(&backend);

            backend.push(failing());
            executor.read_single_tx(&query).await;
            assert_sessions_balanced(&backend);

            let expected = if stage == Stage::Open { 0 } else { 5 };
            assert_eq!(backend.sessions_opened(), expected, "stage {:?}", stage);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_read_timeout_cancels_call() {
        let backend = ScriptedBackend::new();
        backend.push(ScriptedResponse::new().with_delay(Duration::from_secs(5)));
        let (executor, _) = executor(&backend);

        let started = Instant::now();
        let outcome = executor
            .read_tx(&Query::new("MATCH (n) RETURN n").with_timeout_secs(1))
            .await;
        let elapsed = started.elapsed();

        assert!(elapsed >= Duration::from_secs(1));
        assert!(elapsed < Duration::from_secs(2));
        assert!(outcome.error.as_ref().is_some_and(DriverError::is_timeout));
        assert!(outcome.retryable);
        assert!(outcome.stats().is_none());
        assert_eq!(backend.sessions_opened(), 1);
        assert_sessions_balanced(&backend);
        assert_eq!(backend.executed()[0].timeout, Some(Duration::from_secs(1)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_statement_timeout() {
        let backend = ScriptedBackend::new();
        backend.push(ScriptedResponse::new().with_delay(Duration::from_secs(10)));
        let handle = DriverHandle::with_backend(DriverConfig::default(), Arc::new(backend.clone()));
        let executor = TransactionExecutor::builder(handle)
            .with_listener(Arc::new(crate::driver::events::NoopListener))
            .with_single_statement_timeout(Duration::from_secs(2))
            .build();

        let started = Instant::now();
        let outcome = executor.read_single_tx(&Query::new("MATCH (n) RETURN n")).await;

        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(outcome.error.as_ref().is_some_and(DriverError::is_timeout));
        assert_sessions_balanced(&backend);
    }

    #[tokio::test]
    async fn test_timeouts_reach_backend() {
        let backend = ScriptedBackend::new();
        let (executor, _) = executor(&backend);
        let query = Query::new("MATCH (n) RETURN n");

        executor.read_tx(&query).await;
        executor.write_commit_tx(&query).await;
        executor.write_single_tx(&query).await;
        executor.read_single_tx(&query).await;

        let thirty = Some(Duration::from_secs(30));
        let seen: Vec<_> = backend
            .executed()
            .into_iter()
            .map(|q| (q.access_mode, q.timeout))
            .collect();
        assert_eq!(
            seen,
            vec![
                (Some(AccessMode::Read), thirty),
                (Some(AccessMode::Write), None),
                (None, thirty),
                (None, thirty),
            ]
        );
    }

    #[tokio::test]
    async fn test_backend_retry_does_not_double_count() {
        let backend = ScriptedBackend::new();
        backend.push(
            ScriptedResponse::new().failing_at(Stage::Run, DriverError::server(OUTDATED, "conflict")),
        );
        backend.push(ScriptedResponse::new().with_counters(Counters {
            nodes_created: 2,
            relationships_created: 1,
            ..Default::default()
        }));
        let (executor, listener) = executor(&backend);

        let outcome = executor.write_commit_tx(&Query::new("CREATE (a)-[:IF]->(b)")).await;

        assert!(outcome.is_success());
        let summary = outcome.write_summary().unwrap();
        assert_eq!(summary.nodes_created, 2);
        assert_eq!(summary.relationships_created, 1);
        assert_eq!(backend.executed().len(), 2);
        assert_eq!(backend.sessions_opened(), 1);
        assert_eq!(listener.count(EventKind::Counters), 1);
        assert_eq!(listener.count(EventKind::Failure), 0);
    }

    #[tokio::test]
    async fn test_negative_counters_clamp_to_zero() {
        let backend = ScriptedBackend::new();
        backend.push(ScriptedResponse::new().with_counters(Counters {
            nodes_deleted: -3,
            ..Default::default()
        }));
        let (executor, _) = executor(&backend);

        let outcome = executor.write_commit_tx(&Query::new("MATCH (n) DELETE n")).await;
        assert_eq!(outcome.write_summary(), Some(&WriteSummary::default()));
    }

    #[tokio::test]
    async fn test_consume_failure_tolerated_on_read() {
        let backend = ScriptedBackend::new();
        backend.push(
            ScriptedResponse::new()
                .with_records(vec![device_record("device0")])
                .with_timings(Duration::from_millis(50), Duration::ZERO)
                .failing_at(Stage::Consume, DriverError::query(SYNTAX, "lost summary")),
        );
        let (executor, listener) = executor(&backend);

        let outcome = executor.read_tx(&Query::new("MATCH (n) RETURN n.name AS name")).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.records().len(), 1);
        let stats = outcome.stats().unwrap();
        assert_eq!(stats.available_time, Duration::ZERO);
        assert_eq!(stats.response_time, stats.measured_time);
        assert_eq!(listener.count(EventKind::ConsumeFailure), 1);
    }

    #[tokio::test]
    async fn test_consume_failure_fails_write() {
        let backend = ScriptedBackend::new();
        backend.push(
            ScriptedResponse::new().failing_at(Stage::Consume, DriverError::query(SYNTAX, "lost")),
        );
        let (executor, _) = executor(&backend);

        let outcome = executor.write_commit_tx(&Query::new("CREATE (n)")).await;
        assert!(outcome.error.is_some());
        assert!(!outcome.retryable);
    }

    #[tokio::test]
    async fn test_commit_failure_fails_write() {
        let backend = ScriptedBackend::new();
        backend.set_max_managed_retries(0);
        backend.push(
            ScriptedResponse::new()
                .with_counters(Counters {
                    nodes_created: 1,
                    ..Default::default()
                })
                .failing_at(Stage::Commit, DriverError::service_unavailable("leader lost")),
        );
        let (executor, _) = executor(&backend);

        let outcome = executor.write_commit_tx(&Query::new("CREATE (n)")).await;
        assert!(matches!(outcome.error, Some(DriverError::ServiceUnavailable(_))));
        assert!(outcome.retryable);
        assert_eq!(outcome.write_summary(), Some(&WriteSummary::default()));
    }

    #[tokio::test]
    async fn test_write_tx_drops_report() {
        let backend = ScriptedBackend::new();
        backend.set_max_managed_retries(0);
        backend.push(ScriptedResponse::new().with_counters(Counters {
            nodes_created: 1,
            ..Default::default()
        }));
        backend.push(
            ScriptedResponse::new().failing_at(Stage::Run, DriverError::server(OUTDATED, "conflict")),
        );
        let (executor, _) = executor(&backend);

        let ok = executor.write_tx(&Query::new("CREATE (n)")).await;
        assert!(ok.is_success());
        assert!(ok.report.is_none());

        let failed = executor.write_tx(&Query::new("CREATE (n)")).await;
        assert!(failed.retryable);
        assert!(failed.report.is_none());
        assert!(failed.error.is_some());
    }

    #[tokio::test]
    async fn test_single_write_logs_counters_and_notifications() {
        let backend = ScriptedBackend::new();
        backend.push(
            ScriptedResponse::new()
                .with_counters(Counters {
                    nodes_created: 1,
                    ..Default::default()
                })
                .with_notification(Notification {
                    code: "Neo.ClientNotification.Statement.CartesianProduct".into(),
                    title: "Cartesian product".into(),
                    description: "disconnected patterns".into(),
                    severity: "WARNING".into(),
                    position: None,
                }),
        );
        let (executor, listener) = executor(&backend);

        let outcome = executor.write_single_tx(&Query::new("CREATE (n)")).await;

        assert!(outcome.is_success());
        assert!(outcome.report.is_none());
        assert!(outcome.records.is_none());
        assert_eq!(
            listener.kinds(),
            vec![EventKind::Request, EventKind::Counters, EventKind::Notification]
        );
    }

    #[tokio::test]
    async fn test_single_write_logs_returned_rows() {
        let backend = ScriptedBackend::new();
        backend.push(
            ScriptedResponse::new()
                .with_records(vec![device_record("device0")])
                .with_counters(Counters {
                    nodes_created: 1,
                    ..Default::default()
                }),
        );
        let (executor, listener) = executor(&backend);

        let outcome = executor
            .write_single_tx(&Query::new("CREATE (n:Device {name: 'device0'}) RETURN n.name AS name"))
            .await;

        assert!(outcome.is_success());
        assert!(outcome.records.is_none());
        assert_eq!(
            listener.kinds(),
            vec![EventKind::Request, EventKind::Records, EventKind::Counters]
        );
        assert_eq!(
            listener.events()[1].action,
            Some(WRITE_SINGLE_TX)
        );
        assert_sessions_balanced(&backend);
    }

    #[tokio::test]
    async fn test_metadata_and_session_mode_reach_backend() {
        let backend = ScriptedBackend::new();
        let handle = DriverHandle::with_backend(DriverConfig::default(), Arc::new(backend.clone()));
        let executor = TransactionExecutor::builder(handle)
            .with_listener(Arc::new(RecordingListener::new()))
            .with_metadata("app", "device-inventory")
            .build();

        executor.read_tx(&Query::new("MATCH (n) RETURN n")).await;
        executor.write_commit_tx(&Query::new("CREATE (n)")).await;
        executor.write_single_tx(&Query::new("CREATE (n)")).await;
        executor.read_single_tx(&Query::new("MATCH (n) RETURN n")).await;

        let executed = backend.executed();
        let modes: Vec<_> = executed.iter().map(|e| e.session_mode).collect();
        assert_eq!(
            modes,
            vec![AccessMode::Read, AccessMode::Write, AccessMode::Write, AccessMode::Read]
        );
        assert!(executed
            .iter()
            .all(|e| e.metadata.get("app") == Some(&Value::from("device-inventory"))));
    }

    #[tokio::test]
    async fn test_single_read_returns_records_without_stats() {
        let backend = ScriptedBackend::new();
        backend.push(ScriptedResponse::new().with_records(vec![device_record("device0")]));
        let (executor, listener) = executor(&backend);

        let outcome = executor.read_single_tx(&Query::new("MATCH (n) RETURN n.name AS name")).await;

        assert_eq!(outcome.into_result().unwrap().len(), 1);
        assert_eq!(listener.kinds(), vec![EventKind::Request, EventKind::Records]);
    }

    #[tokio::test]
    async fn test_read_failures_are_classified() {
        let backend = ScriptedBackend::new();
        backend.set_max_managed_retries(0);
        backend.push(ScriptedResponse::new().failing_at(Stage::Run, DriverError::connection("reset")));
        backend.push(ScriptedResponse::new().failing_at(Stage::Collect, DriverError::query(SYNTAX, "bad")));
        let (executor, listener) = executor(&backend);

        let transient = executor.read_tx(&Query::new("MATCH (n) RETURN n")).await;
        assert!(transient.retryable);
        assert!(transient.report.is_none());

        let permanent = executor.read_single_tx(&Query::new("MATCH (n) RETURN n")).await;
        assert!(!permanent.retryable);

        let retryable: Vec<_> = listener
            .events()
            .into_iter()
            .filter(|e| e.kind == EventKind::Failure)
            .map(|e| (e.action, e.retryable))
            .collect();
        assert_eq!(
            retryable,
            vec![(Some(READ_TX), Some(true)), (Some(READ_SINGLE_TX), Some(false))]
        );
    }

    #[tokio::test]
    async fn test_custom_retry_classifier() {
        let backend = ScriptedBackend::new();
        backend.set_max_managed_retries(0);
        backend.push(ScriptedResponse::new().failing_at(Stage::Run, DriverError::query(SYNTAX, "bad")));
        let handle = DriverHandle::with_backend(DriverConfig::default(), Arc::new(backend.clone()));
        let executor = TransactionExecutor::builder(handle)
            .with_retry_classifier(Arc::new(|_: &DriverError| true))
            .build();

        let outcome = executor.write_commit_tx(&Query::new("CREATE (n)")).await;
        assert!(outcome.retryable);
    }

    #[tokio::test]
    async fn test_verify_connectivity_is_idempotent() {
        let backend = ScriptedBackend::new();
        let (executor, _) = executor(&backend);

        for _ in 0..3 {
            executor.verify_connectivity().await.unwrap();
        }

        assert_eq!(backend.verify_calls(), 3);
        assert_eq!(backend.sessions_opened(), 0);
        assert!(executor.handle().is_open());

        backend.fail_next_verify(DriverError::service_unavailable("no server"));
        assert!(executor.verify_connectivity().await.is_err());
        executor.verify_connectivity().await.unwrap();
    }

    #[tokio::test]
    async fn test_use_after_close() {
        let backend = ScriptedBackend::new();
        let (executor, listener) = executor(&backend);

        executor.close().await.unwrap();
        executor.close().await.unwrap();
        assert_eq!(backend.close_calls(), 1);
        assert_eq!(listener.count(EventKind::Closing), 2);

        let outcome = executor.read_tx(&Query::new("MATCH (n) RETURN n")).await;
        assert!(matches!(outcome.error, Some(DriverError::Session(_))));
        assert!(!outcome.retryable);
        assert!(executor.verify_connectivity().await.is_err());
        assert_eq!(backend.sessions_opened(), 0);
    }

    #[tokio::test]
    async fn test_concurrent_calls() {
        let backend = ScriptedBackend::new();
        for i in 0..8 {
            backend.push(ScriptedResponse::new().with_records(vec![device_record(&format!("device{}", i))]));
        }
        let (executor, _) = executor(&backend);
        let query = Query::new("MATCH (n) RETURN n.name AS name");

        let outcomes = futures::future::join_all((0..8).map(|_| executor.read_tx(&query))).await;

        assert!(outcomes.iter().all(|o| o.is_success() && o.records().len() == 1));
        assert_eq!(backend.sessions_opened(), 8);
        assert_sessions_balanced(&backend);
    }

    #[tokio::test]
    async fn test_graph_driver_trait_object() {
        let backend = ScriptedBackend::new();
        let (executor, _) = executor(&backend);
        let driver: Box<dyn GraphDriver> = Box::new(executor);

        assert_eq!(driver.mode(), Dialect::Neo4j);
        assert!(driver.read_tx(&Query::new("RETURN 1")).await.is_success());
        driver.close().await.unwrap();
    }
}
