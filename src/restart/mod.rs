//! 재시작 매니저 - 플릿 전체 재시작 상태 기계
//!
//! `Idle → Preparing → DiscoveringInstances → IdlingBots → WaitingForIdle →
//! RestartingSlaves → RestartingMaster → Idle`
//!
//! 프로세스 전체에 하나만 존재하며, Idle이 아닐 때 들어온 요청은 즉시 거절합니다.
//! 어떤 경로로 끝나든(패닉 포함) 상태는 Idle로 돌아갑니다.

pub mod recovery;
pub mod schedule;

use chrono::Local;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, Notify};

use crate::command::{self, BotCommand};
use crate::context::FleetContext;
use crate::protocol::{InfoPayload, ProbeTier, OK_PREFIX};
use crate::registry::Instance;

pub use schedule::ScheduleConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RestartState {
    Idle,
    Preparing,
    DiscoveringInstances,
    IdlingBots,
    WaitingForIdle,
    RestartingSlaves,
    RestartingMaster,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RestartTrigger {
    Manual,
    Scheduled,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum RestartError {
    #[error("already in progress")]
    AlreadyInProgress,

    #[error("restart already ran today")]
    AlreadyRanToday,

    #[error("invalid schedule time '{0}' (expected HH:MM)")]
    InvalidSchedule(String),

    #[error("failed to persist schedule: {0}")]
    Persist(String),
}

/// 마지막 재시작 시퀀스 결과
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RestartOutcome {
    pub trigger: RestartTrigger,
    pub started_at: String,
    pub finished_at: String,
    pub success: bool,
    pub message: String,
    pub slaves_restarted: Vec<String>,
    pub slaves_failed: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RestartStatus {
    pub state: RestartState,
    pub in_progress: bool,
    pub last_restart_date: Option<String>,
    pub last_outcome: Option<RestartOutcome>,
    pub schedule: ScheduleConfig,
}

pub fn today() -> String {
    Local::now().format("%Y-%m-%d").to_string()
}

pub struct RestartManager {
    ctx: Arc<FleetContext>,
    state: watch::Sender<RestartState>,
    last_outcome: Mutex<Option<RestartOutcome>>,
    schedule: Mutex<ScheduleConfig>,
    /// 스케줄 변경 시 타이머 재설정
    rearm: Notify,
}

/// 시퀀스 태스크가 어떻게 끝나든 Idle 복귀
struct ResetToIdle(Arc<RestartManager>);

impl Drop for ResetToIdle {
    fn drop(&mut self) {
        self.0.state.send_replace(RestartState::Idle);
    }
}

struct SequenceReport {
    message: String,
    slaves_restarted: Vec<String>,
    slaves_failed: Vec<String>,
}

impl RestartManager {
    pub fn new(ctx: Arc<FleetContext>) -> Arc<Self> {
        let schedule = ScheduleConfig::load(&ctx.config.paths().schedule());
        let (state, _) = watch::channel(RestartState::Idle);
        Arc::new(Self {
            ctx,
            state,
            last_outcome: Mutex::new(None),
            schedule: Mutex::new(schedule),
            rearm: Notify::new(),
        })
    }

    pub fn state(&self) -> RestartState {
        *self.state.borrow()
    }

    pub fn last_restart_date(&self) -> Option<String> {
        std::fs::read_to_string(self.ctx.config.paths().last_restart_date())
            .ok()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
    }

    fn record_restart_date(&self) {
        let path = self.ctx.config.paths().last_restart_date();
        if let Err(e) = std::fs::write(&path, today()) {
            tracing::warn!("[Restart] Failed to write {}: {}", path.display(), e);
        }
    }

    pub fn status(&self) -> RestartStatus {
        let state = self.state();
        RestartStatus {
            state,
            in_progress: state != RestartState::Idle,
            last_restart_date: self.last_restart_date(),
            last_outcome: self.last_outcome.lock().unwrap_or_else(|e| e.into_inner()).clone(),
            schedule: self.schedule(),
        }
    }

    pub fn schedule(&self) -> ScheduleConfig {
        self.schedule.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// 스케줄 저장 후 타이머 재설정
    pub fn set_schedule(&self, config: ScheduleConfig) -> Result<ScheduleConfig, RestartError> {
        if config.parse_time().is_none() {
            return Err(RestartError::InvalidSchedule(config.time));
        }
        config
            .save(&self.ctx.config.paths().schedule())
            .map_err(|e| RestartError::Persist(e.to_string()))?;
        *self.schedule.lock().unwrap_or_else(|e| e.into_inner()) = config.clone();
        self.rearm.notify_one();
        tracing::info!("[Restart] Schedule updated: enabled={} time={}", config.enabled, config.time);
        Ok(config)
    }

    pub(crate) async fn schedule_changed(&self) {
        self.rearm.notified().await;
    }

    /// 재시작 시퀀스 시작. 이미 진행 중이면 상태를 건드리지 않고 거절
    pub fn request(self: &Arc<Self>, trigger: RestartTrigger) -> Result<(), RestartError> {
        if trigger == RestartTrigger::Scheduled && self.last_restart_date().as_deref() == Some(today().as_str()) {
            return Err(RestartError::AlreadyRanToday);
        }

        let mut accepted = false;
        self.state.send_if_modified(|state| {
            if *state == RestartState::Idle {
                *state = RestartState::Preparing;
                accepted = true;
                true
            } else {
                false
            }
        });
        if !accepted {
            tracing::info!("[Restart] {:?} request rejected: already in progress", trigger);
            return Err(RestartError::AlreadyInProgress);
        }

        tracing::info!("[Restart] {:?} restart accepted", trigger);
        let manager = self.clone();
        tokio::spawn(async move { manager.run(trigger).await });
        Ok(())
    }

    fn enter(&self, state: RestartState) {
        tracing::info!("[Restart] → {:?}", state);
        self.state.send_replace(state);
    }

    async fn run(self: Arc<Self>, trigger: RestartTrigger) {
        let _reset = ResetToIdle(self.clone());
        let started_at = Local::now().to_rfc3339();

        let (success, report) = match self.sequence().await {
            Ok(report) => (true, report),
            Err(report) => (false, report),
        };
        if success {
            tracing::info!("[Restart] Sequence finished: {}", report.message);
        } else {
            tracing::error!("[Restart] Sequence failed: {}", report.message);
        }

        *self.last_outcome.lock().unwrap_or_else(|e| e.into_inner()) = Some(RestartOutcome {
            trigger,
            started_at,
            finished_at: Local::now().to_rfc3339(),
            success,
            message: report.message,
            slaves_restarted: report.slaves_restarted,
            slaves_failed: report.slaves_failed,
        });
    }

    async fn sequence(&self) -> Result<SequenceReport, SequenceReport> {
        let ctx = &self.ctx;
        let settings = &ctx.config.restart;

        self.enter(RestartState::Preparing);
        self.record_restart_date();

        self.enter(RestartState::DiscoveringInstances);
        let instances = ctx.discover_fresh().await;
        // 원격 pid는 다른 호스트의 것이므로 제외
        let mut pids: BTreeSet<u32> = instances
            .iter()
            .filter(|i| !i.is_remote)
            .filter_map(|i| i.process_id)
            .collect();
        pids.insert(ctx.pid);
        let mut slaves: Vec<Instance> = instances.iter().filter(|i| !i.is_local).cloned().collect();
        slaves.sort_by(|a, b| (&a.address, a.port).cmp(&(&b.address, b.port)));
        tracing::info!("[Restart] {} instance(s) discovered, {} slave(s)", instances.len(), slaves.len());

        self.enter(RestartState::IdlingBots);
        command::send_to_fleet(ctx, instances.clone(), BotCommand::Idle).await;

        self.enter(RestartState::WaitingForIdle);
        let status = command::wait_for_idle(
            ctx,
            &instances,
            Duration::from_secs(settings.idle_wait_secs),
            poll_interval(settings.poll_secs),
        )
        .await;
        if !status.all_idle {
            tracing::warn!("[Restart] Idle wait expired, force-stopping every unit");
            command::send_to_fleet(ctx, instances.clone(), BotCommand::Stop).await;
        }

        self.enter(RestartState::RestartingSlaves);
        let mut restarted = Vec::new();
        let mut failed = Vec::new();
        for slave in &slaves {
            match self.restart_slave(slave).await {
                Ok(()) => restarted.push(slave.id.clone()),
                Err(e) => {
                    tracing::warn!("[Restart] Slave {} failed: {}", slave.id, e);
                    failed.push(slave.id.clone());
                }
            }
        }

        self.enter(RestartState::RestartingMaster);
        let report = |message: String| SequenceReport {
            message,
            slaves_restarted: restarted.clone(),
            slaves_failed: failed.clone(),
        };

        if let Err(e) = recovery::persist(&ctx.config.paths(), &pids.into_iter().collect::<Vec<_>>()) {
            return Err(report(format!("failed to persist restart state: {}", e)));
        }
        if let Err(e) = ctx.host.restart_process() {
            recovery::clear(&ctx.config.paths());
            return Err(report(format!("failed to restart coordinator: {}", e)));
        }

        Ok(report(format!(
            "{} slave(s) restarted, {} failed, coordinator restarting",
            restarted.len(),
            failed.len()
        )))
    }

    /// 슬레이브 하나: 정지 → SELFRESTART → 이전 프로세스 종료와 새 프로세스 응답 확인
    async fn restart_slave(&self, slave: &Instance) -> Result<(), String> {
        let ctx = &self.ctx;
        let tier = if slave.is_remote { ProbeTier::Remote } else { ProbeTier::Standard };
        let timeout = Duration::from_secs(ctx.config.restart.instance_timeout_secs);
        let poll = poll_interval(ctx.config.restart.poll_secs);
        tracing::info!("[Restart] Restarting slave {}", slave.id);

        if let Err(e) = ctx
            .link
            .request(&slave.address, slave.port, &BotCommand::Stop.all_verb(), tier)
            .await
        {
            tracing::warn!("[Restart] STOPALL to {} failed: {}", slave.id, e);
        }

        match ctx.link.request(&slave.address, slave.port, "SELFRESTART", tier).await {
            Ok(reply) if reply.starts_with(OK_PREFIX) => {}
            Ok(reply) => return Err(format!("unexpected SELFRESTART reply: {}", reply)),
            Err(e) => return Err(e.to_string()),
        }

        let deadline = tokio::time::Instant::now() + timeout;

        if let (true, Some(pid)) = (slave.key().is_loopback(), slave.process_id) {
            if pid != ctx.pid && !crate::process_monitor::wait_for_exit(pid, timeout).await {
                return Err(format!("old process {} did not exit", pid));
            }
        }

        let mut saw_down = false;
        loop {
            match ctx.link.request(&slave.address, slave.port, "INFO", tier).await {
                Ok(line) => {
                    if let Some(info) = InfoPayload::parse(&line) {
                        let replaced = match (&slave.instance_id, &info.instance_id) {
                            (Some(old), Some(new)) => old != new,
                            _ => saw_down,
                        };
                        if replaced {
                            tracing::info!("[Restart] Slave {} is back", slave.id);
                            return Ok(());
                        }
                    }
                }
                Err(_) => saw_down = true,
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(format!("did not come back within {:?}", timeout));
            }
            tokio::time::sleep(poll).await;
        }
    }
}

fn poll_interval(secs: u64) -> Duration {
    Duration::from_secs(secs).max(Duration::from_millis(100))
}
