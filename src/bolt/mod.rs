//! # Bolt Wire Layer
//!
//! Neo4j와 Memgraph가 공유하는 Bolt 프로토콜 클라이언트 측 구현.
//!
//! - [`packstream`] - 값 직렬화
//! - [`message`] - 요청/응답 메시지와 SUCCESS 메타데이터
//! - [`codec`] - 청크 프레이밍 (`tokio_util::codec`)
//! - [`connection`] - 핸드셰이크, 인증, 쿼리/트랜잭션 교환
//!
//! 대부분의 사용자는 [`crate::backend::BoltConnector`]만 쓰면 된다.

pub mod codec;
pub mod connection;
pub mod message;
pub mod packstream;

use std::fmt;

pub use codec::BoltCodec;
pub use connection::{BoltConnection, QueryResult};
pub use message::{Request, Response};

/// 핸드셰이크 매직 넘버
pub const BOLT_MAGIC: [u8; 4] = [0x60, 0x60, 0xB0, 0x17];

/// 제안하는 프로토콜 버전 (선호 순서). 5.1부터는 LOGON이 필요하므로 5.0까지만 제안한다.
pub const SUPPORTED_VERSIONS: [BoltVersion; 4] = [
    BoltVersion::new(5, 0),
    BoltVersion::new(4, 4),
    BoltVersion::new(4, 3),
    BoltVersion::new(4, 1),
];

/// 협상된 Bolt 버전
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BoltVersion {
    /// 주 버전
    pub major: u8,
    /// 부 버전
    pub minor: u8,
}

impl BoltVersion {
    /// 버전 생성
    pub const fn new(major: u8, minor: u8) -> Self {
        Self { major, minor }
    }

    /// 핸드셰이크 4바이트 표현: `[0, range, minor, major]`
    pub fn to_bytes(self) -> [u8; 4] {
        [0, 0, self.minor, self.major]
    }

    /// 서버 응답 해석. 모두 0이면 None.
    pub fn from_bytes(bytes: [u8; 4]) -> Option<Self> {
        let version = Self::new(bytes[3], bytes[2]);
        SUPPORTED_VERSIONS.contains(&version).then_some(version)
    }

    /// DateTime을 UTC 초로 주고받는지 (Bolt 5)
    pub fn utc_datetime(self) -> bool {
        self.major >= 5
    }
}

impl fmt::Display for BoltVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

/// 핸드셰이크 요청: 매직 + 버전 제안 4개
pub fn handshake_request() -> [u8; 20] {
    let mut buf = [0u8; 20];
    buf[..4].copy_from_slice(&BOLT_MAGIC);
    for (i, version) in SUPPORTED_VERSIONS.iter().enumerate() {
        let offset = 4 + i * 4;
        buf[offset..offset + 4].copy_from_slice(&version.to_bytes());
    }
    buf
}
