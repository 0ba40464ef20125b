//! Bolt Messages
//!
//! 클라이언트 요청과 서버 응답, 그리고 SUCCESS 메타데이터 해석.

use std::collections::HashMap;
use std::time::Duration;

use bytes::BytesMut;

use super::packstream::{Decoder, Encoder};
use crate::driver::{
    AccessMode, AuthToken, BackendError, Counters, DriverError, DriverResult, InputPosition,
    Notification, SessionConfig, TransactionConfig, Value,
};

/// 메시지 시그니처
#[allow(missing_docs)]
pub mod signature {
    pub const HELLO: u8 = 0x01;
    pub const GOODBYE: u8 = 0x02;
    pub const RESET: u8 = 0x0F;
    pub const RUN: u8 = 0x10;
    pub const BEGIN: u8 = 0x11;
    pub const COMMIT: u8 = 0x12;
    pub const ROLLBACK: u8 = 0x13;
    pub const DISCARD: u8 = 0x2F;
    pub const PULL: u8 = 0x3F;

    pub const SUCCESS: u8 = 0x70;
    pub const RECORD: u8 = 0x71;
    pub const IGNORED: u8 = 0x7E;
    pub const FAILURE: u8 = 0x7F;
}

/// 서버가 코드를 주지 않은 실패에 쓰는 코드
const UNKNOWN_ERROR_CODE: &str = "Neo.DatabaseError.General.UnknownError";

// ============================================================================
// Request
// ============================================================================

/// 클라이언트 요청
#[derive(Debug, Clone)]
pub enum Request {
    /// 인증 포함 초기화
    Hello {
        /// User Agent
        user_agent: String,
        /// 인증 토큰
        auth: AuthToken,
    },
    /// 쿼리 실행
    Run {
        /// Cypher 텍스트
        query: String,
        /// 파라미터
        parameters: HashMap<String, Value>,
        /// db, mode, tx_timeout, tx_metadata
        extra: HashMap<String, Value>,
    },
    /// 결과 전체 가져오기
    Pull,
    /// 명시적 트랜잭션 시작
    Begin {
        /// db, mode, tx_timeout, tx_metadata
        extra: HashMap<String, Value>,
    },
    /// 커밋
    Commit,
    /// 롤백
    Rollback,
    /// 실패 상태 초기화
    Reset,
    /// 연결 종료 통보
    Goodbye,
}

impl Request {
    /// 메시지 이름 (로그용)
    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "HELLO",
            Self::Run { .. } => "RUN",
            Self::Pull => "PULL",
            Self::Begin { .. } => "BEGIN",
            Self::Commit => "COMMIT",
            Self::Rollback => "ROLLBACK",
            Self::Reset => "RESET",
            Self::Goodbye => "GOODBYE",
        }
    }

    /// PackStream 구조체로 인코딩
    pub fn encode(&self, buf: &mut BytesMut, utc_datetime: bool) -> DriverResult<()> {
        let mut enc = Encoder::new(buf, utc_datetime);
        match self {
            Self::Hello { user_agent, auth } => {
                enc.struct_header(1, signature::HELLO);
                enc.map(&hello_fields(user_agent, auth))?;
            }
            Self::Run {
                query,
                parameters,
                extra,
            } => {
                enc.struct_header(3, signature::RUN);
                enc.string(query)?;
                enc.map(parameters)?;
                enc.map(extra)?;
            }
            Self::Pull => {
                let mut all = HashMap::new();
                all.insert("n".to_string(), Value::Integer(-1));
                enc.struct_header(1, signature::PULL);
                enc.map(&all)?;
            }
            Self::Begin { extra } => {
                enc.struct_header(1, signature::BEGIN);
                enc.map(extra)?;
            }
            Self::Commit => enc.struct_header(0, signature::COMMIT),
            Self::Rollback => enc.struct_header(0, signature::ROLLBACK),
            Self::Reset => enc.struct_header(0, signature::RESET),
            Self::Goodbye => enc.struct_header(0, signature::GOODBYE),
        }
        Ok(())
    }
}

fn hello_fields(user_agent: &str, auth: &AuthToken) -> HashMap<String, Value> {
    let mut fields = HashMap::new();
    fields.insert("user_agent".to_string(), Value::from(user_agent));
    fields.insert("scheme".to_string(), Value::from(auth.scheme()));
    match auth {
        AuthToken::None => {}
        AuthToken::Basic { username, password } => {
            fields.insert("principal".to_string(), Value::from(username.as_str()));
            fields.insert("credentials".to_string(), Value::from(password.as_str()));
        }
        AuthToken::Bearer { token } => {
            fields.insert("credentials".to_string(), Value::from(token.as_str()));
        }
    }
    fields
}

/// BEGIN/RUN extra 필드
pub fn transaction_extra(
    session: &SessionConfig,
    config: &TransactionConfig,
) -> HashMap<String, Value> {
    let mut extra = HashMap::new();
    if let Some(db) = &session.database {
        extra.insert("db".to_string(), Value::from(db.as_str()));
    }
    if session.default_access_mode == AccessMode::Read {
        extra.insert("mode".to_string(), Value::from("r"));
    }
    if let Some(timeout) = config.timeout {
        let millis = i64::try_from(timeout.as_millis()).unwrap_or(i64::MAX);
        extra.insert("tx_timeout".to_string(), Value::Integer(millis));
    }
    if !config.metadata.is_empty() {
        extra.insert("tx_metadata".to_string(), Value::Map(config.metadata.clone()));
    }
    extra
}

// ============================================================================
// Response
// ============================================================================

/// 서버 응답
#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    /// 성공과 메타데이터
    Success(HashMap<String, Value>),
    /// 결과 행
    Record(Vec<Value>),
    /// 이전 실패로 무시됨
    Ignored,
    /// 실패
    Failure(BackendError),
}

impl Response {
    /// 청크를 합친 메시지 바이트에서 디코딩
    pub fn decode(bytes: &[u8]) -> DriverResult<Self> {
        let mut dec = Decoder::new(bytes);
        let (fields, sig) = dec.struct_header()?;
        let response = match (sig, fields) {
            (signature::SUCCESS, 1) => Self::Success(dec.metadata()?),
            (signature::RECORD, 1) => match dec.value()? {
                Value::List(values) => Self::Record(values),
                other => {
                    return Err(DriverError::protocol(format!(
                        "RECORD expects a list, found {}",
                        other.type_name()
                    )))
                }
            },
            (signature::IGNORED, _) => Self::Ignored,
            (signature::FAILURE, 1) => {
                let meta = dec.metadata()?;
                Self::Failure(BackendError::new(
                    string(&meta, "code").unwrap_or_else(|| UNKNOWN_ERROR_CODE.to_string()),
                    string(&meta, "message").unwrap_or_default(),
                ))
            }
            (sig, n) => {
                return Err(DriverError::protocol(format!(
                    "Unexpected response 0x{:02X} with {} fields",
                    sig, n
                )))
            }
        };
        if dec.remaining() > 0 {
            return Err(DriverError::protocol(format!(
                "{} trailing bytes after response",
                dec.remaining()
            )));
        }
        Ok(response)
    }
}

// ============================================================================
// SUCCESS metadata
// ============================================================================

/// 문자열 필드
pub fn string(meta: &HashMap<String, Value>, key: &str) -> Option<String> {
    meta.get(key).and_then(Value::as_str).map(str::to_string)
}

/// RUN 응답의 컬럼 이름
pub fn fields(meta: &HashMap<String, Value>) -> Vec<String> {
    meta.get("fields")
        .and_then(Value::as_list)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// 밀리초 필드 (`t_first`, `t_last`)
pub fn millis(meta: &HashMap<String, Value>, key: &str) -> Duration {
    meta.get(key)
        .and_then(Value::as_int)
        .and_then(|ms| u64::try_from(ms).ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::ZERO)
}

/// 스트림이 더 남아 있는지
pub fn has_more(meta: &HashMap<String, Value>) -> bool {
    meta.get("has_more").and_then(Value::as_bool).unwrap_or(false)
}

/// `stats` 맵의 변경 카운터
pub fn counters(meta: &HashMap<String, Value>) -> Counters {
    let Some(stats) = meta.get("stats").and_then(Value::as_map) else {
        return Counters::default();
    };
    let get = |key: &str| stats.get(key).and_then(Value::as_int).unwrap_or(0);
    Counters {
        nodes_created: get("nodes-created"),
        nodes_deleted: get("nodes-deleted"),
        relationships_created: get("relationships-created"),
        relationships_deleted: get("relationships-deleted"),
        properties_set: get("properties-set"),
        labels_added: get("labels-added"),
        labels_removed: get("labels-removed"),
        indexes_added: get("indexes-added"),
        indexes_removed: get("indexes-removed"),
        constraints_added: get("constraints-added"),
        constraints_removed: get("constraints-removed"),
    }
}

/// 서버 알림 목록
pub fn notifications(meta: &HashMap<String, Value>) -> Vec<Notification> {
    let Some(items) = meta.get("notifications").and_then(Value::as_list) else {
        return Vec::new();
    };
    items
        .iter()
        .filter_map(Value::as_map)
        .map(|n| Notification {
            code: string(n, "code").unwrap_or_default(),
            title: string(n, "title").unwrap_or_default(),
            description: string(n, "description").unwrap_or_default(),
            severity: string(n, "severity").unwrap_or_default(),
            position: n.get("position").and_then(Value::as_map).map(|p| {
                let get = |key: &str| p.get(key).and_then(Value::as_int).unwrap_or(0);
                InputPosition {
                    offset: get("offset"),
                    line: get("line"),
                    column: get("column"),
                }
            }),
        })
        .collect()
}
