//! 프로세스 내 유닛 테이블
//!
//! 자동화 코어가 유닛 이름만 등록하는 구성에서 쓰는 `BotHost` 구현입니다.
//! 명령은 mpsc 채널로 전용 워커 태스크에 넘겨지므로 `send_all`은 항상 즉시 반환합니다.

use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{BotHost, BotUnitStatus, HostIdentity, STATE_RUNNING};
use crate::command::BotCommand;

pub struct LocalBotHost {
    identity: HostIdentity,
    units: Arc<RwLock<Vec<BotUnitStatus>>>,
    tx: mpsc::UnboundedSender<BotCommand>,
    shutdown: CancellationToken,
}

impl LocalBotHost {
    /// 호스트 생성 및 명령 워커 시작 (tokio 런타임 안에서 호출)
    pub fn spawn(identity: HostIdentity, unit_names: &[String], shutdown: CancellationToken) -> Arc<Self> {
        let units = Arc::new(RwLock::new(
            unit_names
                .iter()
                .map(|name| BotUnitStatus::new(name, "STOPPED"))
                .collect::<Vec<_>>(),
        ));
        let (tx, rx) = mpsc::unbounded_channel();

        tokio::spawn(command_worker(units.clone(), rx, shutdown.clone()));

        Arc::new(Self { identity, units, tx, shutdown })
    }
}

/// 명령 → 다음 상태. None이면 상태 변화 없음
fn next_state(command: BotCommand) -> Option<&'static str> {
    match command {
        BotCommand::Start | BotCommand::Resume | BotCommand::Restart | BotCommand::Reboot => {
            Some(STATE_RUNNING)
        }
        BotCommand::Idle => Some("IDLE"),
        BotCommand::Stop => Some("STOPPED"),
        BotCommand::RefreshMap | BotCommand::ScreenOn | BotCommand::ScreenOff => None,
    }
}

async fn command_worker(
    units: Arc<RwLock<Vec<BotUnitStatus>>>,
    mut rx: mpsc::UnboundedReceiver<BotCommand>,
    shutdown: CancellationToken,
) {
    loop {
        let command = tokio::select! {
            _ = shutdown.cancelled() => break,
            cmd = rx.recv() => match cmd {
                Some(cmd) => cmd,
                None => break,
            },
        };

        let mut guard = units.write().unwrap_or_else(|e| e.into_inner());
        match next_state(command) {
            Some(state) => {
                for unit in guard.iter_mut() {
                    unit.state = state.to_string();
                }
                tracing::info!("[Host] {} applied to {} unit(s) → {}", command, guard.len(), state);
            }
            None => {
                tracing::info!("[Host] {} forwarded to {} unit(s)", command, guard.len());
            }
        }
    }
    tracing::debug!("[Host] Command worker stopped");
}

impl BotHost for LocalBotHost {
    fn identity(&self) -> HostIdentity {
        self.identity.clone()
    }

    fn list_units(&self) -> Vec<BotUnitStatus> {
        self.units.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn send_all(&self, command: BotCommand) -> usize {
        let count = self.units.read().unwrap_or_else(|e| e.into_inner()).len();
        if self.tx.send(command).is_err() {
            tracing::warn!("[Host] Command worker gone, dropping {}", command);
            return 0;
        }
        count
    }

    fn restart_process(&self) -> anyhow::Result<()> {
        crate::utils::relaunch_self()?;
        self.shutdown.cancel();
        Ok(())
    }

    fn shutdown(&self) {
        tracing::info!("[Host] Shutdown requested");
        self.shutdown.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn identity() -> HostIdentity {
        HostIdentity {
            name: "test".into(),
            bot_kind: "PokeBot".into(),
            version: "1.0".into(),
            mode: "default".into(),
        }
    }

    async fn wait_for_state(host: &LocalBotHost, state: &str) -> bool {
        for _ in 0..50 {
            if host.list_units().iter().all(|u| u.state == state) {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        false
    }

    #[tokio::test]
    async fn commands_are_applied_asynchronously() {
        let host = LocalBotHost::spawn(
            identity(),
            &["a".to_string(), "b".to_string()],
            CancellationToken::new(),
        );
        assert!(host.list_units().iter().all(|u| u.state == "STOPPED"));

        assert_eq!(host.send_all(BotCommand::Start), 2);
        assert!(wait_for_state(&host, "RUNNING").await);

        host.send_all(BotCommand::Idle);
        assert!(wait_for_state(&host, "IDLE").await);
        assert!(host.list_units().iter().all(|u| u.is_idle()));
    }

    #[tokio::test]
    async fn shutdown_cancels_token() {
        let token = CancellationToken::new();
        let host = LocalBotHost::spawn(identity(), &[], token.clone());
        host.shutdown();
        assert!(token.is_cancelled());
    }

    #[test]
    fn screen_commands_do_not_change_state() {
        assert_eq!(next_state(BotCommand::ScreenOff), None);
        assert_eq!(next_state(BotCommand::Reboot), Some(STATE_RUNNING));
    }
}
