//! Execution Events
//!
//! 실행기가 내보내는 구조화 로그 이벤트와 리스너.
//! 리스너는 순수 부수 효과이며 실행 결과나 재시도 분류에 영향을 주지 않는다.

use std::collections::HashMap;
use std::fmt;

use parking_lot::Mutex;

use super::error::DriverError;
use super::record::Record;
use super::session::{Counters, Notification, Query};
use super::types::Value;

// ============================================================================
// DriverEvent - 실행 이벤트
// ============================================================================

/// 실행 이벤트
#[derive(Debug)]
pub enum DriverEvent<'a> {
    /// 실행 전 요청
    Request {
        /// 실행 모드 이름
        action: &'static str,
        /// 실행할 쿼리
        query: &'a Query,
    },
    /// 수집된 레코드
    Records {
        /// 실행 모드 이름
        action: &'static str,
        /// 수집된 행
        records: &'a [Record],
    },
    /// 변경 카운터
    Counters {
        /// 실행 모드 이름
        action: &'static str,
        /// 서버 보고 카운터
        counters: &'a Counters,
    },
    /// 서버 알림
    Notification {
        /// 실행 모드 이름
        action: &'static str,
        /// 요약 안에서의 순번
        index: usize,
        /// 알림
        notification: &'a Notification,
    },
    /// 실행 실패
    Failure {
        /// 실행 모드 이름
        action: &'static str,
        /// 실패 원인
        error: &'a DriverError,
        /// 재시도 판정
        retryable: bool,
    },
    /// 요약 소비 실패 (주 결과는 유지)
    ConsumeFailure {
        /// 실행 모드 이름
        action: &'static str,
        /// 소비 실패 원인
        error: &'a DriverError,
    },
    /// 드라이버 종료
    Closing,
}

impl DriverEvent<'_> {
    /// 이벤트 종류
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Request { .. } => EventKind::Request,
            Self::Records { .. } => EventKind::Records,
            Self::Counters { .. } => EventKind::Counters,
            Self::Notification { .. } => EventKind::Notification,
            Self::Failure { .. } => EventKind::Failure,
            Self::ConsumeFailure { .. } => EventKind::ConsumeFailure,
            Self::Closing => EventKind::Closing,
        }
    }

    /// 이벤트를 낸 실행 모드
    pub fn action(&self) -> Option<&'static str> {
        match self {
            Self::Request { action, .. }
            | Self::Records { action, .. }
            | Self::Counters { action, .. }
            | Self::Notification { action, .. }
            | Self::Failure { action, .. }
            | Self::ConsumeFailure { action, .. } => Some(*action),
            Self::Closing => None,
        }
    }
}

/// 이벤트 종류
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum EventKind {
    Request,
    Records,
    Counters,
    Notification,
    Failure,
    ConsumeFailure,
    Closing,
}

// ============================================================================
// EventListener - 리스너
// ============================================================================

/// 실행 이벤트 리스너
pub trait EventListener: Send + Sync {
    /// 이벤트 수신
    fn on_event(&self, event: &DriverEvent<'_>);
}

/// `tracing`으로 이벤트를 기록하는 기본 리스너
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingListener;

impl EventListener for TracingListener {
    fn on_event(&self, event: &DriverEvent<'_>) {
        match event {
            DriverEvent::Request { action, query } => {
                tracing::info!(
                    action,
                    cypher = %query.text,
                    params = %render_params(&query.parameters),
                    timeout_secs = ?query.timeout_secs,
                    "DB request"
                );
            }
            DriverEvent::Records { action, records } => {
                tracing::debug!(action, count = records.len(), "DB records collected");
                for record in records.iter() {
                    tracing::debug!(action, %record, "DB record");
                }
            }
            DriverEvent::Counters { action, counters } => {
                tracing::info!(
                    action,
                    changed_nodes_relationships = counters.nodes_relationships_changed(),
                    changed_properties = counters.properties_set,
                    nodes_created = counters.nodes_created,
                    nodes_deleted = counters.nodes_deleted,
                    relationships_created = counters.relationships_created,
                    relationships_deleted = counters.relationships_deleted,
                    properties_set = counters.properties_set,
                    labels_added = counters.labels_added,
                    labels_removed = counters.labels_removed,
                    indexes_added = counters.indexes_added,
                    indexes_removed = counters.indexes_removed,
                    constraints_added = counters.constraints_added,
                    constraints_removed = counters.constraints_removed,
                    "DB counters"
                );
            }
            DriverEvent::Notification {
                action,
                index,
                notification,
            } => {
                tracing::info!(
                    action,
                    index,
                    code = %notification.code,
                    title = %notification.title,
                    description = %notification.description,
                    severity = %notification.severity,
                    position = ?notification.position,
                    "DB notification"
                );
            }
            DriverEvent::Failure {
                action,
                error,
                retryable,
            } => {
                tracing::error!(action, %error, retryable, "DB transaction error");
            }
            DriverEvent::ConsumeFailure { action, error } => {
                tracing::error!(action, %error, "DB summary consume error");
            }
            DriverEvent::Closing => {
                tracing::info!("Closing driver and underlying connections");
            }
        }
    }
}

/// 아무것도 기록하지 않는 리스너
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopListener;

impl EventListener for NoopListener {
    fn on_event(&self, _event: &DriverEvent<'_>) {}
}

/// 이벤트를 메모리에 모으는 리스너 (테스트용)
#[derive(Debug, Default)]
pub struct RecordingListener {
    events: Mutex<Vec<RecordedEvent>>,
}

/// 기록된 이벤트
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    /// 종류
    pub kind: EventKind,
    /// 실행 모드
    pub action: Option<&'static str>,
    /// 실패 이벤트의 재시도 판정
    pub retryable: Option<bool>,
}

impl RecordingListener {
    /// 새 리스너 생성
    pub fn new() -> Self {
        Self::default()
    }

    /// 기록된 이벤트 복사본
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.events.lock().clone()
    }

    /// 기록된 이벤트 종류
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }

    /// 특정 종류의 이벤트 수
    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }

    /// 기록 초기화
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventListener for RecordingListener {
    fn on_event(&self, event: &DriverEvent<'_>) {
        let retryable = match event {
            DriverEvent::Failure { retryable, .. } => Some(*retryable),
            _ => None,
        };
        self.events.lock().push(RecordedEvent {
            kind: event.kind(),
            action: event.action(),
            retryable,
        });
    }
}

/// 파라미터 맵을 로그용 JSON으로 렌더링
fn render_params(params: &HashMap<String, Value>) -> ParamsDisplay<'_> {
    ParamsDisplay(params)
}

struct ParamsDisplay<'a>(&'a HashMap<String, Value>);

impl fmt::Display for ParamsDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match serde_json::to_string(self.0) {
            Ok(json) => f.write_str(&json),
            Err(_) => write!(f, "<{} params>", self.0.len()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_listener() {
        let listener = RecordingListener::new();
        let query = Query::new("RETURN 1");
        let error = DriverError::timeout("elapsed");

        listener.on_event(&DriverEvent::Request {
            action: "ReadTx",
            query: &query,
        });
        listener.on_event(&DriverEvent::Failure {
            action: "ReadTx",
            error: &error,
            retryable: true,
        });
        listener.on_event(&DriverEvent::Closing);

        assert_eq!(
            listener.kinds(),
            vec![EventKind::Request, EventKind::Failure, EventKind::Closing]
        );
        assert_eq!(listener.count(EventKind::Failure), 1);

        let events = listener.events();
        assert_eq!(events[1].action, Some("ReadTx"));
        assert_eq!(events[1].retryable, Some(true));
        assert_eq!(events[2].action, None);

        listener.clear();
        assert!(listener.kinds().is_empty());
    }

    #[test]
    fn test_render_params() {
        let mut params = HashMap::new();
        params.insert("hub_id".to_string(), Value::from("h-1"));

        assert_eq!(render_params(&params).to_string(), r#"{"hub_id":"h-1"}"#);
        assert_eq!(render_params(&HashMap::new()).to_string(), "{}");
    }

    #[test]
    fn test_tracing_listener_accepts_every_event() {
        let query = Query::new("RETURN 1");
        let counters = Counters::default();
        let error = DriverError::connection("refused");
        let notification = Notification {
            code: "Neo.ClientNotification.Statement.UnknownLabelWarning".into(),
            title: "Unknown label".into(),
            description: "Label 'Foo' does not exist".into(),
            severity: "WARNING".into(),
            position: None,
        };

        let listener = TracingListener;
        listener.on_event(&DriverEvent::Request { action: "ReadTx", query: &query });
        listener.on_event(&DriverEvent::Records { action: "ReadTx", records: &[] });
        listener.on_event(&DriverEvent::Counters { action: "WriteCommitTx", counters: &counters });
        listener.on_event(&DriverEvent::Notification {
            action: "WriteCommitTx",
            index: 0,
            notification: &notification,
        });
        listener.on_event(&DriverEvent::Failure { action: "ReadTx", error: &error, retryable: true });
        listener.on_event(&DriverEvent::ConsumeFailure { action: "ReadTx", error: &error });
        listener.on_event(&DriverEvent::Closing);
    }
}
