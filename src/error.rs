//! 오케스트레이터 에러 타입
//!
//! HTTP 게이트웨이는 로컬/원격 경로를 똑같이 보이게 하려고 에러를 상태 코드가 아니라
//! `{Success:false, Error, ErrorCode}` 본문으로 돌려줍니다.

use crate::protocol::ProbeError;
use crate::restart::RestartError;
use crate::update::UpdateError;

#[derive(thiserror::Error, Debug)]
pub enum FleetError {
    #[error("Instance '{0}' not found")]
    InstanceNotFound(String),

    #[error("Invalid instance id '{0}' (expected address:port)")]
    InvalidInstanceKey(String),

    #[error("Unknown command: {0}")]
    UnknownCommand(String),

    #[error("{0}")]
    AlreadyInProgress(String),

    #[error("Instance unreachable: {0}")]
    Unreachable(ProbeError),

    #[error("Instance rejected request: {0}")]
    Rejected(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl From<ProbeError> for FleetError {
    fn from(e: ProbeError) -> Self {
        match e {
            ProbeError::Rejected(msg) => Self::Rejected(msg),
            ProbeError::Malformed(msg) => Self::Rejected(msg),
            other => Self::Unreachable(other),
        }
    }
}

impl From<UpdateError> for FleetError {
    fn from(e: UpdateError) -> Self {
        match e {
            UpdateError::AlreadyInProgress => Self::AlreadyInProgress(e.to_string()),
            UpdateError::IdleTimeout(_) => Self::Timeout(e.to_string()),
        }
    }
}

impl From<RestartError> for FleetError {
    fn from(e: RestartError) -> Self {
        match e {
            RestartError::AlreadyInProgress | RestartError::AlreadyRanToday => {
                Self::AlreadyInProgress(e.to_string())
            }
            RestartError::InvalidSchedule(_) => Self::InvalidRequest(e.to_string()),
            RestartError::Persist(_) => Self::Internal(anyhow::anyhow!(e.to_string())),
        }
    }
}

impl FleetError {
    /// 머신 리더블 에러 코드
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::InstanceNotFound(_) => "INSTANCE_NOT_FOUND",
            Self::InvalidInstanceKey(_) => "INVALID_INSTANCE_ID",
            Self::UnknownCommand(_) => "UNKNOWN_COMMAND",
            Self::AlreadyInProgress(_) => "ALREADY_IN_PROGRESS",
            Self::Unreachable(_) => "UNREACHABLE",
            Self::Rejected(_) => "REJECTED",
            Self::InvalidRequest(_) => "INVALID_REQUEST",
            Self::Timeout(_) => "TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "Success": false,
            "Error": self.to_string(),
            "ErrorCode": self.error_code(),
        })
    }
}

/// 게이트웨이 핸들러가 FleetError를 직접 반환할 수 있도록 (항상 HTTP 200)
impl axum::response::IntoResponse for FleetError {
    fn into_response(self) -> axum::response::Response {
        tracing::debug!("[Gateway] Request failed: {}", self);
        axum::Json(self.to_json()).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn already_in_progress_renders_bare_message() {
        let err = FleetError::AlreadyInProgress("already in progress".into());
        let json = err.to_json();
        assert_eq!(json["Success"], false);
        assert_eq!(json["Error"], "already in progress");
        assert_eq!(json["ErrorCode"], "ALREADY_IN_PROGRESS");
    }

    #[test]
    fn probe_errors_are_classified() {
        let e: FleetError = ProbeError::Rejected("busy".into()).into();
        assert!(matches!(e, FleetError::Rejected(_)));
        let e: FleetError = ProbeError::Timeout("1.2.3.4:8081".into()).into();
        assert_eq!(e.error_code(), "UNREACHABLE");
    }

    #[test]
    fn restart_rejection_keeps_exact_text() {
        let e: FleetError = RestartError::AlreadyInProgress.into();
        assert_eq!(e.to_json()["Error"], "already in progress");
    }
}
