//! Bolt Connection
//!
//! TCP 연결 하나 위에서 핸드셰이크, 인증, 쿼리 실행, 트랜잭션 제어를 수행한다.

use std::collections::HashMap;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::codec::{Decoder, Encoder};

use super::codec::BoltCodec;
use super::message::{self, Request, Response};
use super::{handshake_request, BoltVersion};
use crate::driver::{
    AuthToken, DriverError, DriverResult, Record, ResultSummary, ServerAddress, Value,
};

/// RUN + PULL 한 번의 결과
#[derive(Debug, Clone, Default)]
pub struct QueryResult {
    /// 컬럼 이름
    pub keys: Vec<String>,
    /// 결과 행
    pub records: Vec<Record>,
    /// 요약
    pub summary: ResultSummary,
}

/// 클라이언트 측 Bolt 연결
pub struct BoltConnection {
    stream: TcpStream,
    codec: BoltCodec,
    read_buffer: BytesMut,
    write_buffer: BytesMut,
    version: BoltVersion,
    address: ServerAddress,
    server_agent: Option<String>,
    /// 요청을 보내고 응답을 다 받기 전이면 true. 취소된 교환 뒤에는 재사용하지 않는다.
    in_flight: bool,
    /// 입출력 실패나 프로토콜 위반 후
    broken: bool,
    /// BEGIN 후 COMMIT/ROLLBACK 전
    in_tx: bool,
}

impl BoltConnection {
    /// TCP 연결 후 버전 협상
    pub async fn connect(address: &ServerAddress) -> DriverResult<Self> {
        let mut stream = TcpStream::connect((address.host.as_str(), address.port))
            .await
            .map_err(|e| {
                DriverError::service_unavailable(format!("Failed to connect to {}: {}", address, e))
            })?;
        stream.set_nodelay(true).ok();

        let version = Self::handshake(&mut stream).await?;
        tracing::debug!(%address, %version, "bolt handshake complete");

        Ok(Self {
            stream,
            codec: BoltCodec::new(version.utc_datetime()),
            read_buffer: BytesMut::with_capacity(8192),
            write_buffer: BytesMut::with_capacity(8192),
            version,
            address: address.clone(),
            server_agent: None,
            in_flight: false,
            broken: false,
            in_tx: false,
        })
    }

    async fn handshake(stream: &mut TcpStream) -> DriverResult<BoltVersion> {
        stream
            .write_all(&handshake_request())
            .await
            .map_err(|e| DriverError::connection(format!("Handshake write failed: {}", e)))?;

        let mut response = [0u8; 4];
        stream
            .read_exact(&mut response)
            .await
            .map_err(|e| DriverError::connection(format!("Handshake read failed: {}", e)))?;

        BoltVersion::from_bytes(response).ok_or_else(|| {
            DriverError::protocol(format!(
                "Server does not support any proposed Bolt version (answered {:?})",
                response
            ))
        })
    }

    /// HELLO로 인증
    pub async fn hello(&mut self, user_agent: &str, auth: &AuthToken) -> DriverResult<()> {
        let request = Request::Hello {
            user_agent: user_agent.to_string(),
            auth: auth.clone(),
        };
        let meta = self.request(&request).await?;
        self.server_agent = message::string(&meta, "server");
        tracing::debug!(
            address = %self.address,
            server = ?self.server_agent,
            connection_id = ?message::string(&meta, "connection_id"),
            "bolt connection authenticated"
        );
        Ok(())
    }

    /// RUN + PULL. 결과를 모두 메모리로 받는다.
    pub async fn run(
        &mut self,
        query: &str,
        parameters: &HashMap<String, Value>,
        extra: HashMap<String, Value>,
    ) -> DriverResult<QueryResult> {
        let run = Request::Run {
            query: query.to_string(),
            parameters: parameters.clone(),
            extra,
        };
        let run_meta = self.request(&run).await?;
        let keys = message::fields(&run_meta);

        let mut records = Vec::new();
        let pull_meta = loop {
            let meta = self.pull(&keys, &mut records).await?;
            if !message::has_more(&meta) {
                break meta;
            }
        };

        let summary = ResultSummary {
            counters: message::counters(&pull_meta),
            result_available_after: message::millis(&run_meta, "t_first"),
            result_consumed_after: message::millis(&pull_meta, "t_last"),
            database: message::string(&pull_meta, "db"),
            server: self.server_agent.clone(),
            notifications: message::notifications(&pull_meta),
        };
        Ok(QueryResult {
            keys,
            records,
            summary,
        })
    }

    async fn pull(
        &mut self,
        keys: &[String],
        records: &mut Vec<Record>,
    ) -> DriverResult<HashMap<String, Value>> {
        self.in_flight = true;
        self.send(&Request::Pull).await?;
        loop {
            match self.recv().await? {
                Response::Record(values) => records.push(Record::new(keys.to_vec(), values)),
                other => {
                    self.in_flight = false;
                    return self.expect_success("PULL", other).await;
                }
            }
        }
    }

    /// 명시적 트랜잭션 시작
    pub async fn begin(&mut self, extra: HashMap<String, Value>) -> DriverResult<()> {
        self.request(&Request::Begin { extra }).await?;
        self.in_tx = true;
        Ok(())
    }

    /// 커밋
    pub async fn commit(&mut self) -> DriverResult<()> {
        let result = self.request(&Request::Commit).await;
        self.in_tx = false;
        result.map(|_| ())
    }

    /// 롤백. 열린 트랜잭션이 없으면 아무것도 보내지 않는다.
    pub async fn rollback(&mut self) -> DriverResult<()> {
        if !self.in_tx {
            return Ok(());
        }
        self.in_tx = false;
        self.request(&Request::Rollback).await.map(|_| ())
    }

    /// 연결 상태 초기화 (연결 확인에도 쓴다)
    pub async fn reset(&mut self) -> DriverResult<()> {
        self.request(&Request::Reset).await?;
        self.in_tx = false;
        Ok(())
    }

    /// GOODBYE 후 소켓 종료
    pub async fn close(mut self) {
        if !self.broken {
            if let Err(err) = self.send(&Request::Goodbye).await {
                tracing::debug!(address = %self.address, %err, "GOODBYE failed");
            }
        }
        let _ = self.stream.shutdown().await;
    }

    /// 풀로 돌려보내도 되는지
    pub fn is_reusable(&self) -> bool {
        !self.broken && !self.in_flight && !self.in_tx
    }

    /// 협상된 버전
    pub fn version(&self) -> BoltVersion {
        self.version
    }

    /// 서버 에이전트 (HELLO 응답)
    pub fn server_agent(&self) -> Option<&str> {
        self.server_agent.as_deref()
    }

    // ------------------------------------------------------------------------
    // 메시지 교환
    // ------------------------------------------------------------------------

    async fn request(&mut self, request: &Request) -> DriverResult<HashMap<String, Value>> {
        self.in_flight = true;
        self.send(request).await?;
        let response = self.recv().await?;
        self.in_flight = false;
        self.expect_success(request.name(), response).await
    }

    async fn expect_success(
        &mut self,
        name: &str,
        response: Response,
    ) -> DriverResult<HashMap<String, Value>> {
        match response {
            Response::Success(meta) => Ok(meta),
            Response::Failure(err) => {
                tracing::debug!(
                    address = %self.address,
                    request = name,
                    code = %err.code,
                    "bolt failure"
                );
                self.recover().await;
                Err(err.into())
            }
            Response::Ignored => {
                self.recover().await;
                Err(DriverError::protocol(format!("{} was ignored by the server", name)))
            }
            Response::Record(_) => {
                self.broken = true;
                Err(DriverError::protocol(format!("Unexpected RECORD in reply to {}", name)))
            }
        }
    }

    /// 실패 상태의 서버를 RESET으로 되돌린다. 실패하면 연결을 버린다.
    async fn recover(&mut self) {
        self.in_tx = false;
        self.in_flight = true;
        if self.send(&Request::Reset).await.is_err() {
            return;
        }
        loop {
            match self.recv().await {
                Ok(Response::Success(_)) => {
                    self.in_flight = false;
                    return;
                }
                Ok(Response::Ignored) | Ok(Response::Record(_)) => continue,
                Ok(Response::Failure(_)) | Err(_) => {
                    self.broken = true;
                    return;
                }
            }
        }
    }

    async fn send(&mut self, request: &Request) -> DriverResult<()> {
        self.write_buffer.clear();
        self.codec.encode(request, &mut self.write_buffer)?;

        let written = match self.stream.write_all(&self.write_buffer).await {
            Ok(()) => self.stream.flush().await,
            Err(e) => Err(e),
        };
        written.map_err(|e| {
            self.broken = true;
            DriverError::connection(format!("Send {} failed: {}", request.name(), e))
        })
    }

    async fn recv(&mut self) -> DriverResult<Response> {
        loop {
            match self.codec.decode(&mut self.read_buffer) {
                Ok(Some(response)) => return Ok(response),
                Ok(None) => {}
                Err(err) => {
                    self.broken = true;
                    return Err(err);
                }
            }

            let n = self.stream.read_buf(&mut self.read_buffer).await.map_err(|e| {
                self.broken = true;
                DriverError::connection(format!("Read failed: {}", e))
            })?;
            if n == 0 {
                self.broken = true;
                return Err(DriverError::connection("Connection closed by server"));
            }
        }
    }
}

impl std::fmt::Debug for BoltConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoltConnection")
            .field("address", &self.address)
            .field("version", &self.version)
            .field("server_agent", &self.server_agent)
            .field("reusable", &self.is_reusable())
            .finish()
    }
}
