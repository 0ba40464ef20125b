//! Retry Classification
//!
//! 실패를 같은 요청으로 다시 실행해도 되는지 판정

use super::error::DriverError;

/// 재시도 분류기
pub trait RetryClassifier: Send + Sync {
    /// 재시도 가능 여부
    fn is_retryable(&self, error: &DriverError) -> bool;
}

impl<F> RetryClassifier for F
where
    F: Fn(&DriverError) -> bool + Send + Sync,
{
    fn is_retryable(&self, error: &DriverError) -> bool {
        self(error)
    }
}

/// 에러 분류 기반 기본 분류기
///
/// 연결, 타임아웃, 서비스 불가 에러와 트랜지언트/리더 변경 서버 코드를 재시도 가능으로 본다.
#[derive(Debug, Clone, Copy, Default)]
pub struct CodeRetryClassifier;

impl RetryClassifier for CodeRetryClassifier {
    fn is_retryable(&self, error: &DriverError) -> bool {
        error.is_retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_classifier() {
        let classifier = CodeRetryClassifier;

        assert!(classifier.is_retryable(&DriverError::server(
            "Neo.TransientError.Transaction.Outdated",
            "conflict"
        )));
        assert!(classifier.is_retryable(&DriverError::timeout("elapsed")));
        assert!(!classifier.is_retryable(&DriverError::server(
            "Neo.ClientError.Statement.SyntaxError",
            "bad"
        )));
        assert!(!classifier.is_retryable(&DriverError::authentication("denied")));
    }

    #[test]
    fn test_closure_classifier() {
        let never = |_: &DriverError| false;
        assert!(!never.is_retryable(&DriverError::timeout("elapsed")));
    }
}
