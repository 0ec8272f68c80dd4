//! 크래시 복구 - 재시작 중 남긴 플래그/PID 파일 처리
//!
//! 코디네이터는 스스로 재시작하기 직전에 알려진 PID 전체와 진행 중 플래그를 남깁니다.
//! 다음 기동에서 플래그가 있으면 남은 옛 프로세스를 강제 종료하고, 포트가 안정되면
//! 플릿 전체에 start를 다시 보냅니다.

use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;

use crate::command::{self, BotCommand};
use crate::config::StatePaths;
use crate::context::FleetContext;
use crate::registry::MarkerStore;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// 재시작 플래그가 있었는지
    pub recovered: bool,
    pub killed: Vec<u32>,
    pub pruned_markers: usize,
}

/// 재시작 직전 상태 기록: PID 목록 → 플래그 순
pub fn persist(paths: &StatePaths, pids: &[u32]) -> anyhow::Result<()> {
    paths.ensure()?;
    std::fs::write(paths.restart_pids(), serde_json::to_string(pids)?)?;
    std::fs::write(paths.restart_flag(), crate::restart::today())?;
    Ok(())
}

pub fn clear(paths: &StatePaths) {
    let _ = std::fs::remove_file(paths.restart_flag());
    let _ = std::fs::remove_file(paths.restart_pids());
}

fn read_pids(paths: &StatePaths) -> Vec<u32> {
    std::fs::read_to_string(paths.restart_pids())
        .ok()
        .and_then(|s| serde_json::from_str(&s).ok())
        .unwrap_or_default()
}

/// 기동 시 한 번 호출
pub async fn recover_on_startup(paths: &StatePaths, markers: &MarkerStore, own_pid: u32) -> RecoveryReport {
    let mut report = RecoveryReport::default();

    if paths.restart_flag().exists() {
        report.recovered = true;
        let pids = read_pids(paths);
        clear(paths);
        tracing::info!("[Recovery] Restart flag found, checking {} pre-restart process(es)", pids.len());

        let leftovers: Vec<u32> = pids.into_iter().filter(|p| *p != own_pid).collect();
        for pid in crate::process_monitor::filter_running(leftovers).await {
            match crate::process_monitor::kill_pid(pid) {
                Ok(()) => {
                    tracing::warn!("[Recovery] Killed leftover process {}", pid);
                    report.killed.push(pid);
                }
                Err(e) => tracing::warn!("[Recovery] Could not kill {}: {}", pid, e),
            }
        }
    }

    report.pruned_markers = markers.prune_stale().await;
    report
}

/// 인스턴스 수가 연속 두 라운드 같아질 때까지 기다린 뒤 전체 start
pub fn spawn_follow_up(ctx: Arc<FleetContext>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let settings = &ctx.config.restart;
        let interval = Duration::from_secs(settings.stabilize_interval_secs).max(Duration::from_millis(100));
        let mut previous: Option<usize> = None;
        let mut instances = Vec::new();

        for round in 1..=settings.stabilize_rounds.max(1) {
            tokio::select! {
                _ = ctx.shutdown.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            instances = ctx.discover_fresh().await;
            let count = instances.len();
            tracing::debug!("[Recovery] Stabilization round {}: {} instance(s)", round, count);
            if previous == Some(count) {
                break;
            }
            previous = Some(count);
        }

        tracing::info!("[Recovery] Fleet stable with {} instance(s), sending start", instances.len());
        let outcomes = command::send_to_fleet(&ctx, instances, BotCommand::Start).await;
        let failed = outcomes.iter().filter(|o| !o.success).count();
        if failed > 0 {
            tracing::warn!("[Recovery] Start failed on {} instance(s)", failed);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn no_flag_means_no_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StatePaths::new(dir.path());
        let markers = MarkerStore::new(paths.ports_dir());

        let report = recover_on_startup(&paths, &markers, std::process::id()).await;
        assert!(!report.recovered);
        assert!(report.killed.is_empty());
    }

    #[tokio::test]
    async fn flag_is_consumed_and_own_pid_spared() {
        let dir = tempfile::tempdir().unwrap();
        let paths = StatePaths::new(dir.path());
        let markers = MarkerStore::new(paths.ports_dir());
        let me = std::process::id();

        // 존재하지 않는 PID와 자기 자신만 기록
        persist(&paths, &[me, u32::MAX - 7]).unwrap();
        markers.write(u32::MAX - 7, 8083).unwrap();

        let report = recover_on_startup(&paths, &markers, me).await;
        assert!(report.recovered);
        assert!(report.killed.is_empty());
        assert_eq!(report.pruned_markers, 1);
        assert!(!paths.restart_flag().exists());
        assert!(!paths.restart_pids().exists());
    }
}
