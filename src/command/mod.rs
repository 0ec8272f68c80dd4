//! 봇 명령어 정의와 인스턴스/플릿 단위 전달
//!
//! 대상이 이 프로세스면 `BotHost`에 직접 큐잉하고, 아니면 컨트롤 프로토콜로
//! `{VERB}ALL` 한 줄을 보냅니다. 어느 쪽이든 "접수됨"까지만 보장합니다.

pub mod dispatch;

use serde::{Deserialize, Serialize};
use std::fmt;

pub use dispatch::{
    collect_idle_status, fetch_units, send_to_fleet, send_to_instance, wait_for_idle, CommandOutcome,
    IdleStatus,
};

/// 유닛에 보낼 수 있는 전역 명령
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BotCommand {
    Start,
    Stop,
    Idle,
    Resume,
    Restart,
    Reboot,
    RefreshMap,
    ScreenOn,
    ScreenOff,
}

impl BotCommand {
    pub const ALL: [BotCommand; 9] = [
        BotCommand::Start,
        BotCommand::Stop,
        BotCommand::Idle,
        BotCommand::Resume,
        BotCommand::Restart,
        BotCommand::Reboot,
        BotCommand::RefreshMap,
        BotCommand::ScreenOn,
        BotCommand::ScreenOff,
    ];

    /// 외부 요청 이름 파싱 ("start", "refresh-map", "screenOn", "REFRESHMAP" 모두 허용)
    pub fn parse(name: &str) -> Option<Self> {
        let normalized: String = name
            .trim()
            .chars()
            .filter(|c| *c != '-' && *c != '_' && *c != ' ')
            .collect::<String>()
            .to_uppercase();
        Self::from_verb(&normalized)
    }

    /// 프로토콜 동사 (대문자, 구분자 없음)
    pub fn verb(&self) -> &'static str {
        match self {
            BotCommand::Start => "START",
            BotCommand::Stop => "STOP",
            BotCommand::Idle => "IDLE",
            BotCommand::Resume => "RESUME",
            BotCommand::Restart => "RESTART",
            BotCommand::Reboot => "REBOOT",
            BotCommand::RefreshMap => "REFRESHMAP",
            BotCommand::ScreenOn => "SCREENON",
            BotCommand::ScreenOff => "SCREENOFF",
        }
    }

    pub fn from_verb(verb: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.verb() == verb)
    }

    /// 인스턴스의 모든 유닛 대상 - `STARTALL`
    pub fn all_verb(&self) -> String {
        format!("{}ALL", self.verb())
    }

    pub fn name(&self) -> &'static str {
        match self {
            BotCommand::Start => "start",
            BotCommand::Stop => "stop",
            BotCommand::Idle => "idle",
            BotCommand::Resume => "resume",
            BotCommand::Restart => "restart",
            BotCommand::Reboot => "reboot",
            BotCommand::RefreshMap => "refresh-map",
            BotCommand::ScreenOn => "screen-on",
            BotCommand::ScreenOff => "screen-off",
        }
    }
}

impl fmt::Display for BotCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
