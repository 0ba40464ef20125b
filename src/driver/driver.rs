//! Driver Handle
//!
//! 백엔드 연결 설정과 프로세스 범위 드라이버 핸들

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::error::{DriverError, DriverResult};
use super::session::{AccessMode, GraphSession, SessionConfig};

/// 읽기 경로 기본 타임아웃 (초)
pub const READ_TX_TIMEOUT_SECS: u64 = 30;

/// 기본 Bolt 포트
pub const DEFAULT_BOLT_PORT: u16 = 7687;

/// 기본 최대 연결 풀 크기
pub const DEFAULT_MAX_POOL_SIZE: usize = 100;

// ============================================================================
// Dialect - 백엔드 방언
// ============================================================================

/// 같은 와이어 프로토콜을 쓰는 백엔드 방언.
/// 호출자는 쿼리 문법이 실제로 다른 곳에서만 분기한다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Neo4j
    #[default]
    Neo4j,
    /// Memgraph
    Memgraph,
}

impl Dialect {
    /// 방언 태그
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Neo4j => "neo4j",
            Self::Memgraph => "memgraph",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "neo4j" => Ok(Self::Neo4j),
            "memgraph" => Ok(Self::Memgraph),
            other => Err(DriverError::configuration(format!("Unknown dialect '{}'", other))),
        }
    }
}

// ============================================================================
// AuthToken - 인증 토큰
// ============================================================================

/// 인증 토큰
#[derive(Clone, Default, PartialEq, Eq)]
pub enum AuthToken {
    /// 인증 없음
    #[default]
    None,
    /// Basic 인증 (사용자명/비밀번호)
    Basic { username: String, password: String },
    /// Bearer 토큰
    Bearer { token: String },
}

impl AuthToken {
    /// Basic 인증 토큰 생성
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self::Basic {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Bearer 토큰 생성
    pub fn bearer(token: impl Into<String>) -> Self {
        Self::Bearer {
            token: token.into(),
        }
    }

    /// 인증 스킴
    pub fn scheme(&self) -> &str {
        match self {
            Self::None => "none",
            Self::Basic { .. } => "basic",
            Self::Bearer { .. } => "bearer",
        }
    }
}

// 비밀번호와 토큰은 로그에 남기지 않는다
impl fmt::Debug for AuthToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => f.write_str("None"),
            Self::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"***")
                .finish(),
            Self::Bearer { .. } => f.debug_struct("Bearer").field("token", &"***").finish(),
        }
    }
}

// ============================================================================
// ServerAddress - 서버 주소
// ============================================================================

/// 서버 주소
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    /// 호스트
    pub host: String,
    /// 포트
    pub port: u16,
}

impl ServerAddress {
    /// 새 서버 주소 생성
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// 문자열 포트로 생성
    pub fn parse(host: &str, port: &str) -> DriverResult<Self> {
        if host.trim().is_empty() {
            return Err(DriverError::configuration("Host must not be empty"));
        }
        let port = match port.trim() {
            "" => DEFAULT_BOLT_PORT,
            p => p
                .parse()
                .map_err(|_| DriverError::configuration(format!("Invalid port '{}'", p)))?,
        };
        Ok(Self::new(host.trim(), port))
    }

    /// Bolt URI
    pub fn to_uri(&self) -> String {
        format!("bolt://{}:{}", self.host, self.port)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new("localhost", DEFAULT_BOLT_PORT)
    }
}

// ============================================================================
// DriverParams - 생성 파라미터
// ============================================================================

/// 시작 시 한 번 주어지는 연결 파라미터
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct DriverParams {
    /// 호스트
    pub host: String,
    /// 사용자
    pub user: String,
    /// 비밀번호
    pub password: String,
    /// 포트 (빈 문자열이면 7687)
    #[serde(default)]
    pub port: String,
}

impl DriverParams {
    /// 새 파라미터 생성
    pub fn new(
        host: impl Into<String>,
        port: impl Into<String>,
        user: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            host: host.into(),
            user: user.into(),
            password: password.into(),
            port: port.into(),
        }
    }
}

impl fmt::Debug for DriverParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

// ============================================================================
// DriverConfig - 드라이버 설정
// ============================================================================

/// 드라이버 설정
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// 백엔드 방언
    pub dialect: Dialect,
    /// 서버 주소
    pub address: ServerAddress,
    /// 인증 토큰
    pub auth: AuthToken,
    /// 세션 설정
    pub session: SessionConfig,
    /// 관리 읽기 기본 타임아웃
    pub read_timeout: Duration,
    /// 단일 문장 실행 타임아웃
    pub single_statement_timeout: Duration,
    /// 연결 타임아웃
    pub connection_timeout: Duration,
    /// HELLO에 실리는 User Agent
    pub user_agent: String,
    /// 최대 연결 풀 크기
    pub max_connection_pool_size: usize,
    /// 관리 트랜잭션 재시도 최대 시간
    pub max_transaction_retry_time: Duration,
}

impl DriverConfig {
    /// 방언과 연결 파라미터로 설정 생성 (`bolt://host:port` + basic 인증)
    pub fn new(dialect: Dialect, params: &DriverParams) -> DriverResult<Self> {
        let address = ServerAddress::parse(&params.host, &params.port)?;
        Ok(Self {
            dialect,
            address,
            auth: AuthToken::basic(params.user.clone(), params.password.clone()),
            ..Default::default()
        })
    }

    /// 빌더 시작
    pub fn builder(dialect: Dialect, params: &DriverParams) -> DriverResult<DriverConfigBuilder> {
        let config = Self::new(dialect, params)?;
        Ok(DriverConfigBuilder { config })
    }

    /// 연결 URI
    pub fn uri(&self) -> String {
        self.address.to_uri()
    }
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            dialect: Dialect::default(),
            address: ServerAddress::default(),
            auth: AuthToken::default(),
            session: SessionConfig::default(),
            read_timeout: Duration::from_secs(READ_TX_TIMEOUT_SECS),
            single_statement_timeout: Duration::from_secs(READ_TX_TIMEOUT_SECS),
            connection_timeout: Duration::from_secs(30),
            user_agent: format!("graphtx/{}", env!("CARGO_PKG_VERSION")),
            max_connection_pool_size: DEFAULT_MAX_POOL_SIZE,
            max_transaction_retry_time: Duration::from_secs(30),
        }
    }
}

// ============================================================================
// DriverConfigBuilder - 설정 빌더
// ============================================================================

/// 드라이버 설정 빌더
#[derive(Debug)]
pub struct DriverConfigBuilder {
    config: DriverConfig,
}

impl DriverConfigBuilder {
    /// 인증 토큰 교체
    pub fn with_auth(mut self, auth: AuthToken) -> Self {
        self.config.auth = auth;
        self
    }

    /// 데이터베이스 설정
    pub fn with_database(mut self, database: impl Into<String>) -> Self {
        self.config.session.database = Some(database.into());
        self
    }

    /// 관리 읽기 기본 타임아웃 설정
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.config.read_timeout = timeout;
        self
    }

    /// 단일 문장 타임아웃 설정
    pub fn with_single_statement_timeout(mut self, timeout: Duration) -> Self {
        self.config.single_statement_timeout = timeout;
        self
    }

    /// 연결 타임아웃 설정
    pub fn with_connection_timeout(mut self, timeout: Duration) -> Self {
        self.config.connection_timeout = timeout;
        self
    }

    /// User Agent 설정
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// 최대 연결 풀 크기 설정
    pub fn with_max_connection_pool_size(mut self, size: usize) -> Self {
        self.config.max_connection_pool_size = size.max(1);
        self
    }

    /// 관리 트랜잭션 재시도 최대 시간 설정
    pub fn with_max_transaction_retry_time(mut self, time: Duration) -> Self {
        self.config.max_transaction_retry_time = time;
        self
    }

    /// 기본 세션 접근 모드 설정
    pub fn with_access_mode(mut self, mode: AccessMode) -> Self {
        self.config.session.default_access_mode = mode;
        self
    }

    /// 빌드
    pub fn build(self) -> DriverConfig {
        self.config
    }
}

// ============================================================================
// GraphBackend / BackendConnector - 백엔드 계약
// ============================================================================

/// 백엔드 연결 풀 겸 세션 팩토리
#[async_trait]
pub trait GraphBackend: Send + Sync {
    /// 새 세션 획득
    async fn open_session(&self, config: &SessionConfig) -> DriverResult<Box<dyn GraphSession>>;

    /// 기존 연결로 서버 확인
    async fn verify_connectivity(&self) -> DriverResult<()>;

    /// 풀의 모든 연결 해제
    async fn close(&self) -> DriverResult<()>;
}

/// 핸드셰이크를 수행해 백엔드를 만드는 커넥터
#[async_trait]
pub trait BackendConnector: Send + Sync {
    /// 연결
    async fn connect(&self, config: &DriverConfig) -> DriverResult<Arc<dyn GraphBackend>>;
}

// ============================================================================
// DriverHandle - 드라이버 핸들
// ============================================================================

/// 백엔드 연결 자원의 단일 소유자
pub struct DriverHandle {
    /// 설정
    config: DriverConfig,
    /// 백엔드
    backend: Arc<dyn GraphBackend>,
    /// 열린 상태
    open: RwLock<bool>,
}

impl DriverHandle {
    /// 핸드셰이크까지 수행해 핸들 생성. 실패는 바로 반환된다.
    pub async fn connect(
        config: DriverConfig,
        connector: &dyn BackendConnector,
    ) -> DriverResult<Self> {
        let backend = tokio::time::timeout(config.connection_timeout, connector.connect(&config))
            .await
            .map_err(|_| {
                DriverError::timeout(format!(
                    "Connecting to {} timed out after {:?}",
                    config.uri(),
                    config.connection_timeout
                ))
            })??;

        tracing::debug!(uri = %config.uri(), dialect = %config.dialect, "driver connected");
        Ok(Self::with_backend(config, backend))
    }

    /// 이미 연결된 백엔드로 핸들 생성
    pub fn with_backend(config: DriverConfig, backend: Arc<dyn GraphBackend>) -> Self {
        Self {
            config,
            backend,
            open: RwLock::new(true),
        }
    }

    /// 설정
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    /// 방언
    pub fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    /// 열린 상태 여부
    pub fn is_open(&self) -> bool {
        *self.open.read()
    }

    /// 설정된 기본 접근 모드로 세션 획득
    pub async fn open_default_session(&self) -> DriverResult<Box<dyn GraphSession>> {
        self.open_session(self.config.session.default_access_mode).await
    }

    /// 주어진 접근 모드로 세션 획득 (라우팅 백엔드는 모드로 서버를 고른다)
    pub async fn open_session(&self, mode: AccessMode) -> DriverResult<Box<dyn GraphSession>> {
        self.ensure_open()?;
        let session = self.config.session.clone().with_access_mode(mode);
        self.backend.open_session(&session).await
    }

    /// 연결 테스트
    pub async fn verify_connectivity(&self) -> DriverResult<()> {
        self.ensure_open()?;
        self.backend.verify_connectivity().await
    }

    /// 핸들 종료. 성공한 뒤의 호출은 아무것도 하지 않는다.
    /// 백엔드 종료가 실패하면 핸들은 다시 열린 상태가 되어 재시도할 수 있다.
    pub async fn close(&self) -> DriverResult<()> {
        {
            let mut open = self.open.write();
            if !*open {
                return Ok(());
            }
            *open = false;
        }

        let result = self.backend.close().await;
        if let Err(err) = &result {
            tracing::warn!(%err, "backend close failed");
            *self.open.write() = true;
        }
        result
    }

    /// 열린 상태 확인
    fn ensure_open(&self) -> DriverResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DriverError::session("Driver is closed"))
        }
    }
}

impl fmt::Debug for DriverHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverHandle")
            .field("address", &self.config.address)
            .field("dialect", &self.config.dialect)
            .field("open", &self.is_open())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
