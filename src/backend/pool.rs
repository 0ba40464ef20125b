//! Connection Pool
//!
//! Bolt 연결 풀. 사용 중인 연결 수는 세마포어로 제한하고,
//! 반환된 연결은 재사용 가능할 때만 유휴 큐로 돌아간다.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::bolt::BoltConnection;
use crate::driver::{AuthToken, DriverConfig, DriverError, DriverResult, ServerAddress};

/// 연결 최대 수명
const MAX_CONNECTION_LIFETIME: Duration = Duration::from_secs(3600);

// ============================================================================
// PoolSettings
// ============================================================================

/// 풀 설정 (드라이버 설정에서 파생)
#[derive(Debug, Clone)]
pub struct PoolSettings {
    /// 서버 주소
    pub address: ServerAddress,
    /// HELLO 인증 토큰
    pub auth: AuthToken,
    /// HELLO User Agent
    pub user_agent: String,
    /// 동시에 사용 중일 수 있는 최대 연결 수
    pub max_size: usize,
    /// 연결 생성과 획득 대기 타임아웃
    pub connection_timeout: Duration,
    /// 이보다 오래된 유휴 연결은 버린다
    pub max_lifetime: Duration,
}

impl From<&DriverConfig> for PoolSettings {
    fn from(config: &DriverConfig) -> Self {
        Self {
            address: config.address.clone(),
            auth: config.auth.clone(),
            user_agent: config.user_agent.clone(),
            max_size: config.max_connection_pool_size.max(1),
            connection_timeout: config.connection_timeout,
            max_lifetime: MAX_CONNECTION_LIFETIME,
        }
    }
}

// ============================================================================
// PooledConnection
// ============================================================================

struct IdleConnection {
    id: u64,
    conn: BoltConnection,
    created_at: Instant,
}

/// 풀에서 빌린 연결. 드롭되면 풀로 돌아간다.
pub struct PooledConnection {
    id: u64,
    conn: Option<BoltConnection>,
    created_at: Instant,
    pool: Arc<ConnectionPool>,
    _permit: OwnedSemaphorePermit,
}

impl PooledConnection {
    /// 연결 ID
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Bolt 연결
    pub fn connection(&mut self) -> DriverResult<&mut BoltConnection> {
        self.conn
            .as_mut()
            .ok_or_else(|| DriverError::internal("Pooled connection already released"))
    }

    /// 재사용 가능 여부
    pub fn is_reusable(&self) -> bool {
        self.conn.as_ref().is_some_and(BoltConnection::is_reusable)
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(IdleConnection {
                id: self.id,
                conn,
                created_at: self.created_at,
            });
        }
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("id", &self.id)
            .field("age", &self.created_at.elapsed())
            .field("reusable", &self.is_reusable())
            .finish()
    }
}

// ============================================================================
// ConnectionPool
// ============================================================================

/// 연결 풀
pub struct ConnectionPool {
    settings: PoolSettings,
    idle: Mutex<VecDeque<IdleConnection>>,
    semaphore: Arc<Semaphore>,
    open: RwLock<bool>,
    next_id: AtomicU64,
    total_created: AtomicU64,
    total_closed: AtomicU64,
}

impl ConnectionPool {
    /// 새 풀 생성. 연결은 처음 필요할 때 만든다.
    pub fn new(settings: PoolSettings) -> Arc<Self> {
        Arc::new(Self {
            semaphore: Arc::new(Semaphore::new(settings.max_size)),
            settings,
            idle: Mutex::new(VecDeque::new()),
            open: RwLock::new(true),
            next_id: AtomicU64::new(1),
            total_created: AtomicU64::new(0),
            total_closed: AtomicU64::new(0),
        })
    }

    /// 풀 설정
    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    /// 연결 획득: 유휴 연결을 먼저 쓰고, 없으면 새로 연결해 인증한다
    pub async fn acquire(self: &Arc<Self>) -> DriverResult<PooledConnection> {
        self.ensure_open()?;

        let timeout = self.settings.connection_timeout;
        let permit = tokio::time::timeout(timeout, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| {
                DriverError::timeout(format!(
                    "No pooled connection to {} became free within {:?}",
                    self.settings.address, timeout
                ))
            })?
            .map_err(|_| DriverError::session("Connection pool is closed"))?;

        if let Some(idle) = self.take_idle() {
            return Ok(PooledConnection {
                id: idle.id,
                conn: Some(idle.conn),
                created_at: idle.created_at,
                pool: self.clone(),
                _permit: permit,
            });
        }

        let conn = tokio::time::timeout(timeout, self.create_connection())
            .await
            .map_err(|_| {
                DriverError::timeout(format!(
                    "Connecting to {} timed out after {:?}",
                    self.settings.address, timeout
                ))
            })??;

        Ok(PooledConnection {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            conn: Some(conn),
            created_at: Instant::now(),
            pool: self.clone(),
            _permit: permit,
        })
    }

    /// RESET으로 연결 확인
    pub async fn verify_connectivity(self: &Arc<Self>) -> DriverResult<()> {
        let mut pooled = self.acquire().await?;
        pooled.connection()?.reset().await
    }

    /// 풀 닫기: 유휴 연결에 GOODBYE를 보내고, 사용 중인 연결은 반환 시 닫힌다
    pub async fn close(&self) -> DriverResult<()> {
        *self.open.write() = false;
        self.semaphore.close();

        let drained: Vec<IdleConnection> = self.idle.lock().drain(..).collect();
        let count = drained.len();
        for idle in drained {
            idle.conn.close().await;
            self.total_closed.fetch_add(1, Ordering::Relaxed);
        }
        tracing::debug!(address = %self.settings.address, closed = count, "connection pool closed");
        Ok(())
    }

    /// 열린 상태 여부
    pub fn is_open(&self) -> bool {
        *self.open.read()
    }

    /// 유휴 연결 수
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    /// 지금까지 만든 연결 수
    pub fn total_created(&self) -> u64 {
        self.total_created.load(Ordering::Relaxed)
    }

    /// 지금까지 버린 연결 수
    pub fn total_closed(&self) -> u64 {
        self.total_closed.load(Ordering::Relaxed)
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DriverError::session("Connection pool is closed"))
        }
    }

    fn take_idle(&self) -> Option<IdleConnection> {
        let mut idle = self.idle.lock();
        while let Some(conn) = idle.pop_front() {
            if conn.created_at.elapsed() <= self.settings.max_lifetime {
                return Some(conn);
            }
            self.total_closed.fetch_add(1, Ordering::Relaxed);
        }
        None
    }

    async fn create_connection(&self) -> DriverResult<BoltConnection> {
        let mut conn = BoltConnection::connect(&self.settings.address).await?;
        conn.hello(&self.settings.user_agent, &self.settings.auth).await?;
        self.total_created.fetch_add(1, Ordering::Relaxed);
        Ok(conn)
    }

    fn release(&self, idle: IdleConnection) {
        if self.is_open() && idle.conn.is_reusable() {
            self.idle.lock().push_back(idle);
        } else {
            tracing::debug!(id = idle.id, "discarding bolt connection");
            self.total_closed.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("address", &self.settings.address)
            .field("max_size", &self.settings.max_size)
            .field("idle", &self.idle_count())
            .field("open", &self.is_open())
            .finish()
    }
}
