//! 봇 호스트 - 오케스트레이터가 로컬 봇 유닛을 다루는 유일한 통로
//!
//! 자동화 코어는 시작 시 `BotHost` 구현을 등록하고, 오케스트레이터는
//! 이 트레이트를 통해서만 유닛 상태를 읽고 명령을 보냅니다.

pub mod local;

use serde::{Deserialize, Serialize};

use crate::command::BotCommand;

pub use local::LocalBotHost;

/// 유닛 상태 문자열 중 "작업 없음"으로 간주하는 값
pub const IDLE_STATES: [&str; 2] = ["IDLE", "STOPPED"];

pub const STATE_RUNNING: &str = "RUNNING";

/// 유닛 하나의 상태
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BotUnitStatus {
    #[serde(alias = "name")]
    pub name: String,
    #[serde(alias = "state")]
    pub state: String,
}

impl BotUnitStatus {
    pub fn new(name: &str, state: &str) -> Self {
        Self { name: name.to_string(), state: state.to_string() }
    }

    pub fn is_idle(&self) -> bool {
        is_idle_state(&self.state)
    }

    pub fn is_running(&self) -> bool {
        self.state.eq_ignore_ascii_case(STATE_RUNNING)
    }
}

pub fn is_idle_state(state: &str) -> bool {
    IDLE_STATES.iter().any(|s| s.eq_ignore_ascii_case(state.trim()))
}

/// INFO로 보고되는 이 프로세스의 정체성
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostIdentity {
    pub name: String,
    pub bot_kind: String,
    pub version: String,
    pub mode: String,
}

/// 자동화 코어가 구현하는 호스트 인터페이스
///
/// 모든 메서드는 즉시 반환해야 합니다. 명령은 호스트 자신의 실행 컨텍스트에
/// 큐잉되고, 완료를 기다리지 않습니다.
pub trait BotHost: Send + Sync {
    fn identity(&self) -> HostIdentity;

    fn list_units(&self) -> Vec<BotUnitStatus>;

    /// 모든 유닛에 명령 큐잉. 큐잉된 유닛 수 반환
    fn send_all(&self, command: BotCommand) -> usize;

    /// 현재 프로세스를 새 프로세스로 교체 (재시작)
    fn restart_process(&self) -> anyhow::Result<()>;

    /// 정상 종료 요청
    fn shutdown(&self);
}
