//! Execution Results
//!
//! 읽기 타이밍 통계, 쓰기 요약, 그리고 모든 실행 모드가 공유하는 결과 형태

use std::time::Duration;

use super::error::{DriverError, DriverResult};
use super::record::Record;
use super::session::Counters;

// ============================================================================
// DriverStats - 읽기 타이밍
// ============================================================================

/// 관리 읽기 한 번의 타이밍 통계
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DriverStats {
    /// 응답 시간 (`available_time` 또는 `measured_time`)
    pub response_time: Duration,
    /// 쿼리 본문 주변에서 측정한 벽시계 시간
    pub measured_time: Duration,
    /// 백엔드가 보고한 result-available-after
    pub available_time: Duration,
    /// 백엔드가 보고한 result-consumed-after
    pub consumed_time: Duration,
    /// `response_time`의 초 단위 값
    pub response_time_seconds: f64,
}

impl DriverStats {
    /// 보고된 타이밍과 측정 시간으로 통계 계산.
    /// 보고된 available 시간이 0보다 크면 그것을, 아니면 측정 시간을 응답 시간으로 쓴다.
    pub fn from_timings(available: Duration, consumed: Duration, measured: Duration) -> Self {
        let response_time = if available > Duration::ZERO {
            available
        } else {
            measured
        };

        Self {
            response_time,
            measured_time: measured,
            available_time: available,
            consumed_time: consumed,
            response_time_seconds: response_time.as_secs_f64(),
        }
    }
}

// ============================================================================
// WriteSummary - 쓰기 요약
// ============================================================================

/// 관리 쓰기 한 번의 변경 카운터
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteSummary {
    /// 생성된 노드 수
    pub nodes_created: u64,
    /// 삭제된 노드 수
    pub nodes_deleted: u64,
    /// 생성된 관계 수
    pub relationships_created: u64,
    /// 삭제된 관계 수
    pub relationships_deleted: u64,
}

impl WriteSummary {
    /// 백엔드 카운터에서 생성 (음수는 0)
    pub fn from_counters(counters: &Counters) -> Self {
        let clamp = |v: i64| u64::try_from(v).unwrap_or(0);
        Self {
            nodes_created: clamp(counters.nodes_created),
            nodes_deleted: clamp(counters.nodes_deleted),
            relationships_created: clamp(counters.relationships_created),
            relationships_deleted: clamp(counters.relationships_deleted),
        }
    }

    /// 변경 사항 존재 여부
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

// ============================================================================
// TxOutcome - 실행 결과
// ============================================================================

/// 실행 모드별 부가 결과
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TxReport {
    /// 관리 읽기 타이밍
    Read(DriverStats),
    /// 관리 쓰기 카운터
    Write(WriteSummary),
}

/// 모든 실행 모드의 공통 결과
///
/// 성공이면 `error`가 None이고, 실패면 `records`는 None, `retryable`은 분류기 판정이다.
#[derive(Debug)]
pub struct TxOutcome {
    /// 수집된 레코드 (쓰기 모드는 None)
    pub records: Option<Vec<Record>>,
    /// 통계 또는 쓰기 요약
    pub report: Option<TxReport>,
    /// 같은 요청을 다시 실행해도 되는지
    pub retryable: bool,
    /// 실패 원인
    pub error: Option<DriverError>,
}

impl TxOutcome {
    pub(crate) fn success(records: Option<Vec<Record>>, report: Option<TxReport>) -> Self {
        Self {
            records,
            report,
            retryable: false,
            error: None,
        }
    }

    pub(crate) fn failure(error: DriverError, retryable: bool, report: Option<TxReport>) -> Self {
        Self {
            records: None,
            report,
            retryable,
            error: Some(error),
        }
    }

    /// 성공 여부
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// 읽기 통계
    pub fn stats(&self) -> Option<&DriverStats> {
        match &self.report {
            Some(TxReport::Read(stats)) => Some(stats),
            _ => None,
        }
    }

    /// 쓰기 요약
    pub fn write_summary(&self) -> Option<&WriteSummary> {
        match &self.report {
            Some(TxReport::Write(summary)) => Some(summary),
            _ => None,
        }
    }

    /// 레코드 참조
    pub fn records(&self) -> &[Record] {
        self.records.as_deref().unwrap_or_default()
    }

    /// `Result`로 변환 (레코드가 없으면 빈 목록)
    pub fn into_result(self) -> DriverResult<Vec<Record>> {
        match self.error {
            Some(err) => Err(err),
            None => Ok(self.records.unwrap_or_default()),
        }
    }
}
