//! Bolt Backend
//!
//! 실제 Neo4j/Memgraph 서버에 Bolt로 연결하는 백엔드.
//!
//! - 관리 트랜잭션은 BEGIN -> 작업 -> COMMIT (실패 시 ROLLBACK)으로 실행하고,
//!   재시도 가능한 실패는 `max_transaction_retry_time` 안에서 백오프하며 다시 실행한다.
//! - auto-commit 문장은 RUN에 `tx_timeout`을 실어 보낸다.
//! - 결과는 PULL로 모두 받은 뒤 커서가 돌려준다.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use super::pool::{ConnectionPool, PoolSettings, PooledConnection};
use crate::bolt::message::transaction_extra;
use crate::bolt::{BoltConnection, QueryResult};
use crate::driver::{
    AccessMode, BackendConnector, DriverConfig, DriverError, DriverResult, GraphBackend,
    GraphSession, ManagedTransaction, Query, Record, ResultCursor, ResultSummary, SessionConfig,
    TransactionConfig, TransactionOutput, TransactionWork,
};

/// 재시도 백오프 단위
const RETRY_BACKOFF_STEP: Duration = Duration::from_millis(100);

/// 재시도 백오프 상한
const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(5);

// ============================================================================
// BoltConnector
// ============================================================================

/// `bolt://host:port`에 연결하는 커넥터.
/// 연결 하나를 만들어 핸드셰이크와 인증을 확인한 뒤 풀에 남겨 둔다.
#[derive(Debug, Clone, Copy, Default)]
pub struct BoltConnector;

#[async_trait]
impl BackendConnector for BoltConnector {
    async fn connect(&self, config: &DriverConfig) -> DriverResult<Arc<dyn GraphBackend>> {
        let backend = BoltBackend::connect(config).await?;
        Ok(Arc::new(backend))
    }
}

// ============================================================================
// BoltBackend
// ============================================================================

/// Bolt 연결 풀 위의 백엔드
#[derive(Debug)]
pub struct BoltBackend {
    pool: Arc<ConnectionPool>,
    max_retry_time: Duration,
}

impl BoltBackend {
    /// 연결하지 않고 백엔드 생성
    pub fn new(config: &DriverConfig) -> Self {
        Self {
            pool: ConnectionPool::new(PoolSettings::from(config)),
            max_retry_time: config.max_transaction_retry_time,
        }
    }

    /// 백엔드 생성 후 첫 연결로 서버와 자격 증명을 확인
    pub async fn connect(config: &DriverConfig) -> DriverResult<Self> {
        let backend = Self::new(config);
        let pooled = backend.pool.acquire().await?;
        drop(pooled);
        tracing::info!(uri = %config.uri(), dialect = %config.dialect, "bolt backend ready");
        Ok(backend)
    }

    /// 연결 풀
    pub fn pool(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }
}

#[async_trait]
impl GraphBackend for BoltBackend {
    async fn open_session(&self, config: &SessionConfig) -> DriverResult<Box<dyn GraphSession>> {
        Ok(Box::new(BoltSession {
            pool: self.pool.clone(),
            config: config.clone(),
            max_retry_time: self.max_retry_time,
            conn: None,
        }))
    }

    async fn verify_connectivity(&self) -> DriverResult<()> {
        self.pool.verify_connectivity().await
    }

    async fn close(&self) -> DriverResult<()> {
        self.pool.close().await
    }
}

// ============================================================================
// BoltSession
// ============================================================================

/// 세션. 연결은 처음 쓸 때 풀에서 빌린다.
struct BoltSession {
    pool: Arc<ConnectionPool>,
    config: SessionConfig,
    max_retry_time: Duration,
    conn: Option<PooledConnection>,
}

impl BoltSession {
    async fn connection(&mut self) -> DriverResult<&mut BoltConnection> {
        // 끊겼거나 교환 도중 취소된 연결은 버린다
        if !self.conn.as_ref().is_some_and(PooledConnection::is_reusable) {
            self.conn = None;
            self.conn = Some(self.pool.acquire().await?);
        }
        self.conn
            .as_mut()
            .ok_or_else(|| DriverError::internal("Session has no connection"))?
            .connection()
    }

    async fn execute_managed(
        &mut self,
        mode: AccessMode,
        config: &TransactionConfig,
        work: &dyn TransactionWork,
    ) -> DriverResult<TransactionOutput> {
        let started = Instant::now();
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            match self.attempt(mode, config, work).await {
                Err(err) if err.is_retryable() && started.elapsed() < self.max_retry_time => {
                    let delay = (RETRY_BACKOFF_STEP * attempts).min(MAX_RETRY_BACKOFF);
                    tracing::debug!(attempts, %err, ?delay, "retrying managed transaction");
                    tokio::time::sleep(delay).await;
                }
                other => return other,
            }
        }
    }

    async fn attempt(
        &mut self,
        mode: AccessMode,
        config: &TransactionConfig,
        work: &dyn TransactionWork,
    ) -> DriverResult<TransactionOutput> {
        let session = self.config.clone().with_access_mode(mode);
        let extra = transaction_extra(&session, config);
        let conn = self.connection().await?;
        conn.begin(extra).await?;

        let result = work.execute(&mut BoltTransaction { conn: &mut *conn }).await;
        match result {
            Ok(output) => {
                conn.commit().await?;
                Ok(output)
            }
            Err(err) => {
                if let Err(rollback) = conn.rollback().await {
                    tracing::debug!(%rollback, "rollback after failed work failed");
                }
                Err(err)
            }
        }
    }
}

#[async_trait]
impl GraphSession for BoltSession {
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
        let extra = transaction_extra(&self.config, config);
        let conn = self.connection().await?;
        let result = conn.run(&query.text, &query.parameters, extra).await?;
        Ok(Box::new(BufferedCursor::new(result)))
    }

    fn close(&mut self) {
        // 드롭되면서 풀로 돌아간다
        self.conn = None;
    }
}

// ============================================================================
// BoltTransaction / BufferedCursor
// ============================================================================

struct BoltTransaction<'a> {
    conn: &'a mut BoltConnection,
}

#[async_trait]
impl ManagedTransaction for BoltTransaction<'_> {
    async fn run(&mut self, query: &Query) -> DriverResult<Box<dyn ResultCursor>> {
        let result = self
            .conn
            .run(&query.text, &query.parameters, HashMap::new())
            .await?;
        Ok(Box::new(BufferedCursor::new(result)))
    }
}

/// PULL로 이미 받은 결과를 돌려주는 커서
struct BufferedCursor {
    records: Vec<Record>,
    summary: ResultSummary,
}

impl BufferedCursor {
    fn new(result: QueryResult) -> Self {
        Self {
            records: result.records,
            summary: result.summary,
        }
    }
}

#[async_trait]
impl ResultCursor for BufferedCursor {
    async fn collect(&mut self) -> DriverResult<Vec<Record>> {
        Ok(std::mem::take(&mut self.records))
    }

    async fn consume(&mut self) -> DriverResult<ResultSummary> {
        self.records.clear();
        Ok(self.summary.clone())
    }
}
