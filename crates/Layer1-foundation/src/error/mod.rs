//! Error types for agentbox
//!
//! 모든 에러를 중앙에서 관리

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// 에러 분류 (호출자가 HTTP 상태 등으로 매핑할 때 사용)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Security,
    Execution,
    Container,
    Generation,
    Storage,
    Internal,
}

/// agentbox 에러 타입
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // 입력 검증
    // ========================================================================
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    // ========================================================================
    // 조회
    // ========================================================================
    #[error("Not found: {0}")]
    NotFound(String),

    // ========================================================================
    // 보안 (경로 탈출, 차단된 명령어)
    // ========================================================================
    #[error("Security violation: {0}")]
    Security(String),

    // ========================================================================
    // 실행 관련
    // ========================================================================
    #[error("Execution failed: {0}")]
    Execution(String),

    #[error("Container error: {0}")]
    Container(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    // ========================================================================
    // 설정/저장소
    // ========================================================================
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    // ========================================================================
    // 외부 에러 변환
    // ========================================================================
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ========================================================================
    // 기타
    // ========================================================================
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// 에러 분류
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Validation(_) | Error::InvalidTransition { .. } => ErrorKind::Validation,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::Security(_) => ErrorKind::Security,
            Error::Execution(_) => ErrorKind::Execution,
            Error::Container(_) => ErrorKind::Container,
            Error::Generation(_) => ErrorKind::Generation,
            Error::Config(_) | Error::Storage(_) | Error::Io(_) | Error::Json(_) => {
                ErrorKind::Storage
            }
            Error::Internal(_) => ErrorKind::Internal,
        }
    }

    /// 재시도 가능한 에러인지 확인
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Storage(_) | Error::Container(_) | Error::Io(_))
    }

    /// 사용자에게 보여줄 수 있는 에러인지 확인
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Validation | ErrorKind::NotFound | ErrorKind::Security
        )
    }

    /// 상태 전이 에러 생성 헬퍼
    pub fn invalid_transition(from: impl ToString, to: impl ToString) -> Self {
        Error::InvalidTransition {
            from: from.to_string(),
            to: to.to_string(),
        }
    }
}

// ============================================================================
// From 구현 (추가 변환)
// ============================================================================

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Internal(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Internal(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(Error::Security("x".into()).kind(), ErrorKind::Security);
        assert_eq!(
            Error::invalid_transition("queued", "running").kind(),
            ErrorKind::Validation
        );
        let io = std::io::Error::new(std::io::ErrorKind::Other, "disk");
        assert_eq!(Error::from(io).kind(), ErrorKind::Storage);
    }

    #[test]
    fn test_user_facing() {
        assert!(Error::NotFound("job".into()).is_user_facing());
        assert!(Error::Security("escape".into()).is_user_facing());
        assert!(!Error::Internal("boom".into()).is_user_facing());
        assert!(Error::Storage("locked".into()).is_retryable());
    }

    #[test]
    fn test_transition_message() {
        let err = Error::invalid_transition("completed", "running");
        assert_eq!(
            err.to_string(),
            "Invalid status transition: completed -> running"
        );
    }
}
