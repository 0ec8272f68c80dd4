//! 컨트롤 프로토콜 - 연결당 한 줄 요청, 한 줄 응답
//!
//! 응답은 bare 문자열, `OK: …`, `ERROR: …`, 또는 구조화 질의(`INFO`, `LISTBOTS`)에 대한
//! JSON 한 줄입니다.

pub mod probe;
pub mod server;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::command::BotCommand;

pub use probe::{ControlLink, ProbeTier, TcpLink};

pub const ERROR_PREFIX: &str = "ERROR:";
pub const OK_PREFIX: &str = "OK:";

pub fn ok_line(message: impl std::fmt::Display) -> String {
    format!("{} {}", OK_PREFIX, message)
}

pub fn error_line(message: impl std::fmt::Display) -> String {
    format!("{} {}", ERROR_PREFIX, message)
}

/// 프로브 실패 종류. 네트워크 경계를 넘어 예외로 전파되지 않고 항상 값으로 돌아옵니다.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    #[error("connection to {0} timed out")]
    Timeout(String),

    #[error("connection to {0} refused")]
    Refused(String),

    #[error("I/O error talking to {addr}: {message}")]
    Io { addr: String, message: String },

    #[error("empty response from {0}")]
    EmptyResponse(String),

    /// 상대가 `ERROR: …`로 응답
    #[error("{0}")]
    Rejected(String),

    #[error("malformed response: {0}")]
    Malformed(String),

    #[error("invalid address {0}")]
    InvalidAddress(String),
}

impl ProbeError {
    /// 프로토콜 경계용 `ERROR: …` 한 줄
    pub fn sentinel(&self) -> String {
        error_line(self)
    }

    /// 상대 프로세스가 없거나 응답하지 않는 경우
    pub fn is_unreachable(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Refused(_) | Self::Io { .. } | Self::InvalidAddress(_)
        )
    }
}

/// 수신한 한 줄을 해석한 결과
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlCommand {
    /// `{VERB}ALL`
    All(BotCommand),
    ListBots,
    /// `STATUS` 또는 `STATUS:<unit>`
    Status(Option<String>),
    IsReady,
    Info,
    Version,
    Update,
    SelfRestart,
    Unknown(String),
}

impl ControlCommand {
    pub fn parse(line: &str) -> Self {
        let line = line.trim();

        if let Some(prefix) = line.get(..7) {
            if prefix.eq_ignore_ascii_case("STATUS:") {
                let unit = line[7..].trim();
                return if unit.is_empty() {
                    Self::Status(None)
                } else {
                    Self::Status(Some(unit.to_string()))
                };
            }
        }

        let upper = line.to_ascii_uppercase();
        match upper.as_str() {
            "LISTBOTS" => return Self::ListBots,
            "STATUS" => return Self::Status(None),
            "ISREADY" => return Self::IsReady,
            "INFO" => return Self::Info,
            "VERSION" => return Self::Version,
            "UPDATE" => return Self::Update,
            "SELFRESTART" => return Self::SelfRestart,
            _ => {}
        }

        if let Some(verb) = upper.strip_suffix("ALL") {
            if let Some(cmd) = BotCommand::from_verb(verb) {
                return Self::All(cmd);
            }
        }

        Self::Unknown(line.to_string())
    }
}

/// `INFO` 응답 본문
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct InfoPayload {
    #[serde(default, alias = "version", skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
    #[serde(default, alias = "name", skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, alias = "botType", alias = "BotKind", skip_serializing_if = "Option::is_none")]
    pub bot_type: Option<String>,
    #[serde(default, alias = "mode", skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, alias = "pid", skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
    #[serde(default, alias = "port", skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    #[serde(default, alias = "isMaster", skip_serializing_if = "Option::is_none")]
    pub is_master: Option<bool>,
    #[serde(default, alias = "instanceId", skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
}

impl InfoPayload {
    /// version/name/kind 중 하나라도 있어야 봇 인스턴스 응답으로 인정
    pub fn parse(line: &str) -> Option<Self> {
        let payload: Self = serde_json::from_str(line.trim()).ok()?;
        let has = |v: &Option<String>| v.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false);
        if has(&payload.version) || has(&payload.name) || has(&payload.bot_type) {
            Some(payload)
        } else {
            None
        }
    }
}
