//! 업데이터 에러 타입
//!
//! ## 지원하는 에러 상황
//! - 네트워크 끊김 / 타임아웃
//! - 릴리스 피드 응답 오류
//! - 바이너리 교체 중 파일 시스템 오류
//! - 설정 누락 (kind에 대한 피드 없음 등)

use serde::{Deserialize, Serialize};
use std::fmt;

/// 업데이터 에러 타입
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "details")]
pub enum UpdaterError {
    /// 네트워크 연결 실패
    NetworkError {
        message: String,
        recoverable: bool,
    },
    /// HTTP 요청 타임아웃
    Timeout {
        operation: String,
        duration_secs: u64,
    },
    /// API 응답 오류
    ApiError {
        status_code: u16,
        message: String,
    },
    /// 릴리스에 다운로드 가능한 에셋이 없음
    NoAsset {
        kind: String,
        version: String,
    },
    /// 파일 시스템 오류
    FileSystemError {
        operation: String,
        path: String,
        message: String,
    },
    /// 설정 오류
    ConfigError {
        message: String,
    },
}

impl fmt::Display for UpdaterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UpdaterError::NetworkError { message, .. } => {
                write!(f, "Network error: {}", message)
            }
            UpdaterError::Timeout { operation, duration_secs } => {
                write!(f, "Timeout after {}s: {}", duration_secs, operation)
            }
            UpdaterError::ApiError { status_code, message } => {
                write!(f, "API error ({}): {}", status_code, message)
            }
            UpdaterError::NoAsset { kind, version } => {
                write!(f, "No downloadable asset for {} {}", kind, version)
            }
            UpdaterError::FileSystemError { operation, path, message } => {
                write!(f, "File system error during {} on '{}': {}", operation, path, message)
            }
            UpdaterError::ConfigError { message } => {
                write!(f, "Configuration error: {}", message)
            }
        }
    }
}

impl std::error::Error for UpdaterError {}

impl UpdaterError {
    /// 재시도하면 성공할 여지가 있는 에러인지
    pub fn is_recoverable(&self) -> bool {
        match self {
            UpdaterError::NetworkError { recoverable, .. } => *recoverable,
            UpdaterError::Timeout { .. } => true,
            // 5xx 에러는 재시도 가능, 4xx는 불가능
            UpdaterError::ApiError { status_code, .. } => *status_code >= 500,
            UpdaterError::NoAsset { .. } => false,
            UpdaterError::FileSystemError { .. } => false,
            UpdaterError::ConfigError { .. } => false,
        }
    }

    /// reqwest 에러를 UpdaterError로 변환
    pub fn from_reqwest(err: &reqwest::Error, operation: &str) -> Self {
        if err.is_timeout() {
            UpdaterError::Timeout {
                operation: operation.to_string(),
                duration_secs: 30,
            }
        } else if err.is_connect() {
            UpdaterError::NetworkError {
                message: format!("connection failed ({})", operation),
                recoverable: true,
            }
        } else if let Some(status) = err.status() {
            UpdaterError::ApiError {
                status_code: status.as_u16(),
                message: err.to_string(),
            }
        } else {
            UpdaterError::NetworkError {
                message: err.to_string(),
                recoverable: err.is_request() || err.is_body(),
            }
        }
    }

    /// IO 에러를 UpdaterError로 변환
    pub fn from_io(err: &std::io::Error, operation: &str, path: &std::path::Path) -> Self {
        UpdaterError::FileSystemError {
            operation: operation.to_string(),
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_errors_recoverable_only_on_5xx() {
        let server = UpdaterError::ApiError { status_code: 502, message: "bad gateway".into() };
        let client = UpdaterError::ApiError { status_code: 404, message: "not found".into() };
        assert!(server.is_recoverable());
        assert!(!client.is_recoverable());
    }

    #[test]
    fn serializes_with_type_tag() {
        let err = UpdaterError::NoAsset { kind: "RaidBot".into(), version: "1.1".into() };
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["type"], "NoAsset");
        assert_eq!(json["details"]["kind"], "RaidBot");
    }

    #[test]
    fn io_error_keeps_path() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err = UpdaterError::from_io(&io, "rename", std::path::Path::new("/opt/bot"));
        assert!(err.to_string().contains("/opt/bot"));
        assert!(err.to_string().contains("rename"));
    }
}
