//! 업데이트 오케스트레이터 - 드레인(idle) → 설치의 2단계 롤아웃
//!
//! 원격 인스턴스를 먼저 하나씩 갱신하고, 자기 자신(로컬)은 마지막에 갱신합니다.
//! 인스턴스 하나의 실패는 기록만 하고 나머지 배치를 계속 진행합니다.

pub mod installer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use saba_fleet_updater::{needs_update, FeedChain, GitHubFeed, ReleaseFeed, StaticFeed, UpdaterError};

use crate::command::{self, BotCommand, IdleStatus};
use crate::config::ReleaseSettings;
use crate::context::FleetContext;
use crate::protocol::{ProbeTier, OK_PREFIX};
use crate::registry::Instance;

pub use installer::BinarySelfUpdater;

/// 설정의 고정 버전을 먼저, 그다음 GitHub 릴리스를 조회하는 피드
///
/// 고정 항목에 URL이 없으면 GitHub의 같은 버전 에셋으로 설치합니다.
pub fn release_feed(settings: &ReleaseSettings) -> Result<Arc<dyn ReleaseFeed>, UpdaterError> {
    let pinned = settings
        .versions
        .iter()
        .fold(StaticFeed::new(), |feed, (kind, release)| {
            feed.with_release(kind, release.version(), release.url())
        });
    let github = GitHubFeed::new(settings.repos.clone(), settings.api_base_url.as_deref())?;
    Ok(Arc::new(FeedChain::new(vec![Arc::new(pinned), Arc::new(github)])))
}

/// 이 프로세스 자신의 바이너리 교체
#[async_trait]
pub trait LocalInstaller: Send + Sync {
    /// 최신 릴리스를 설치하고 종료를 예약. 설치(또는 이미 설치된) 버전 반환
    async fn install_latest(&self) -> anyhow::Result<String>;
}

#[derive(thiserror::Error, Debug)]
pub enum UpdateError {
    #[error("update already in progress")]
    AlreadyInProgress,

    #[error("bots did not become idle in time: {}", .0.join(", "))]
    IdleTimeout(Vec<String>),
}

/// `all` 또는 bot kind (대소문자 무시)
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateTarget {
    All,
    Kind(String),
}

impl UpdateTarget {
    pub fn parse(s: &str) -> Self {
        let s = s.trim();
        if s.is_empty() || s.eq_ignore_ascii_case("all") {
            Self::All
        } else {
            Self::Kind(s.to_string())
        }
    }

    pub fn matches(&self, kind: &str) -> bool {
        match self {
            Self::All => true,
            Self::Kind(k) => k.eq_ignore_ascii_case(kind),
        }
    }
}

impl std::fmt::Display for UpdateTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => f.write_str("all"),
            Self::Kind(k) => f.write_str(k),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProceedOptions {
    #[serde(default = "default_true")]
    pub wait_for_idle: bool,
    #[serde(default)]
    pub force_stop: bool,
}

fn default_true() -> bool {
    true
}

impl Default for ProceedOptions {
    fn default() -> Self {
        Self { wait_for_idle: true, force_stop: false }
    }
}

/// 인스턴스별 업데이트 기록
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateTask {
    pub instance: String,
    pub name: String,
    pub bot_kind: String,
    pub is_local: bool,
    pub current_version: String,
    pub latest_version: Option<String>,
    pub needs_update: bool,
    pub started: bool,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct UpdateSummary {
    pub stage: String,
    pub target: String,
    pub updates_needed: usize,
    pub updates_started: usize,
    pub updates_failed: usize,
    /// 최신 버전 조회에 실패해 판정하지 못한 인스턴스 수
    pub lookups_failed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idle: Option<IdleStatus>,
    pub tasks: Vec<UpdateTask>,
}

impl UpdateSummary {
    fn new(stage: &str, target: &UpdateTarget, tasks: Vec<UpdateTask>, idle: Option<IdleStatus>) -> Self {
        let needing = tasks.iter().filter(|t| t.needs_update);
        Self {
            stage: stage.to_string(),
            target: target.to_string(),
            updates_needed: needing.clone().count(),
            updates_started: tasks.iter().filter(|t| t.started).count(),
            updates_failed: needing.filter(|t| t.error.is_some()).count(),
            lookups_failed: tasks
                .iter()
                .filter(|t| t.latest_version.is_none() && t.error.is_some())
                .count(),
            idle,
            tasks,
        }
    }
}

pub struct UpdateOrchestrator {
    ctx: Arc<FleetContext>,
    /// 한 번에 하나의 배치만
    running: tokio::sync::Mutex<()>,
}

impl UpdateOrchestrator {
    pub fn new(ctx: Arc<FleetContext>) -> Self {
        Self { ctx, running: tokio::sync::Mutex::new(()) }
    }

    pub fn is_running(&self) -> bool {
        self.running.try_lock().is_err()
    }

    /// 1단계: 버전 비교 후 갱신 대상에 idle 전송
    pub async fn start(&self, target: &UpdateTarget) -> Result<UpdateSummary, UpdateError> {
        let _guard = self.running.try_lock().map_err(|_| UpdateError::AlreadyInProgress)?;
        Ok(self.start_phase(target).await)
    }

    /// 2단계: 유휴 대기 후 원격 → 로컬 순으로 설치
    pub async fn proceed(&self, target: &UpdateTarget, options: ProceedOptions) -> Result<UpdateSummary, UpdateError> {
        let _guard = self.running.try_lock().map_err(|_| UpdateError::AlreadyInProgress)?;
        self.proceed_phase(target, options).await
    }

    /// 두 단계를 한 번에
    pub async fn run(&self, target: &UpdateTarget, options: ProceedOptions) -> Result<UpdateSummary, UpdateError> {
        let _guard = self.running.try_lock().map_err(|_| UpdateError::AlreadyInProgress)?;
        let drained = self.start_phase(target).await;
        if drained.updates_needed == 0 {
            return Ok(drained);
        }
        self.proceed_phase(target, options).await
    }

    /// 최신 버전은 kind마다 한 번만 조회
    async fn plan(&self, target: &UpdateTarget) -> Vec<(Instance, UpdateTask)> {
        let instances: Vec<Instance> = self
            .ctx
            .discover_fresh()
            .await
            .into_iter()
            .filter(|i| target.matches(&i.bot_kind))
            .collect();

        let mut latest: HashMap<String, Result<String, String>> = HashMap::new();
        for inst in &instances {
            let key = inst.bot_kind.to_lowercase();
            if latest.contains_key(&key) {
                continue;
            }
            let result = self
                .ctx
                .feed
                .latest(&inst.bot_kind)
                .await
                .map(|r| r.version)
                .map_err(|e| e.to_string());
            if let Err(e) = &result {
                tracing::warn!("[Update] Release lookup for {} failed: {}", inst.bot_kind, e);
            }
            latest.insert(key, result);
        }

        instances
            .into_iter()
            .map(|inst| {
                let lookup = latest.get(&inst.bot_kind.to_lowercase()).cloned();
                let (latest_version, needs, error) = match lookup {
                    Some(Ok(v)) => {
                        let needs = needs_update(&inst.version, &v);
                        (Some(v), needs, None)
                    }
                    Some(Err(e)) => (None, false, Some(format!("release lookup failed: {}", e))),
                    None => (None, false, None),
                };
                let task = UpdateTask {
                    instance: inst.id.clone(),
                    name: inst.name.clone(),
                    bot_kind: inst.bot_kind.clone(),
                    is_local: inst.is_local,
                    current_version: inst.version.clone(),
                    latest_version,
                    needs_update: needs,
                    started: false,
                    error,
                };
                (inst, task)
            })
            .collect()
    }

    async fn start_phase(&self, target: &UpdateTarget) -> UpdateSummary {
        let mut plan = self.plan(target).await;
        let needing = plan.iter().filter(|(_, t)| t.needs_update).count();
        tracing::info!("[Update] Start ({}): {} of {} instance(s) need update", target, needing, plan.len());

        for (inst, task) in plan.iter_mut().filter(|(_, t)| t.needs_update) {
            let outcome = command::send_to_instance(&self.ctx, inst, BotCommand::Idle).await;
            if !outcome.success {
                task.error = Some(format!("idle failed: {}", outcome.message));
            }
        }

        UpdateSummary::new("start", target, plan.into_iter().map(|(_, t)| t).collect(), None)
    }

    async fn proceed_phase(&self, target: &UpdateTarget, options: ProceedOptions) -> Result<UpdateSummary, UpdateError> {
        let settings = &self.ctx.config.update;
        let mut plan = self.plan(target).await;
        let needing: Vec<Instance> = plan
            .iter()
            .filter(|(_, t)| t.needs_update)
            .map(|(i, _)| i.clone())
            .collect();
        tracing::info!("[Update] Proceed ({}): {} instance(s) to update", target, needing.len());

        if needing.is_empty() {
            return Ok(UpdateSummary::new("proceed", target, plan.into_iter().map(|(_, t)| t).collect(), None));
        }

        let mut idle = None;
        if options.wait_for_idle {
            let status = command::wait_for_idle(
                &self.ctx,
                &needing,
                Duration::from_secs(settings.idle_wait_secs),
                Duration::from_secs(settings.poll_secs.max(1)),
            )
            .await;
            if !status.all_idle {
                if !options.force_stop {
                    return Err(UpdateError::IdleTimeout(status.busy_instances));
                }
                tracing::warn!("[Update] Force-stopping busy instances: {:?}", status.busy_instances);
                for inst in needing.iter().filter(|i| status.busy_instances.contains(&i.id)) {
                    command::send_to_instance(&self.ctx, inst, BotCommand::Stop).await;
                }
            }
            idle = Some(status);
        }

        // 원격 먼저 (주소/포트 순), 로컬은 마지막
        plan.sort_by(|(a, _), (b, _)| (a.is_local, &a.address, a.port).cmp(&(b.is_local, &b.address, b.port)));

        let delay = Duration::from_millis(settings.instance_delay_ms);
        let mut first_remote = true;
        for (inst, task) in plan.iter_mut().filter(|(_, t)| t.needs_update) {
            task.error = None;
            if inst.is_local {
                self.update_local(task).await;
                continue;
            }
            if !first_remote {
                tokio::time::sleep(delay).await;
            }
            first_remote = false;
            self.update_remote(inst, task).await;
        }

        let summary = UpdateSummary::new("proceed", target, plan.into_iter().map(|(_, t)| t).collect(), idle);
        tracing::info!(
            "[Update] Finished: needed={} started={} failed={}",
            summary.updates_needed,
            summary.updates_started,
            summary.updates_failed
        );
        Ok(summary)
    }

    async fn update_remote(&self, inst: &Instance, task: &mut UpdateTask) {
        let tier = if inst.is_remote { ProbeTier::Remote } else { ProbeTier::Standard };
        match self.ctx.link.request(&inst.address, inst.port, "UPDATE", tier).await {
            Ok(reply) if reply.starts_with(OK_PREFIX) => {
                tracing::info!("[Update] {} accepted update: {}", inst.id, reply);
                task.started = true;
            }
            Ok(reply) => {
                tracing::warn!("[Update] {} gave unexpected reply: {}", inst.id, reply);
                task.error = Some(format!("unexpected reply: {}", reply));
            }
            Err(e) => {
                tracing::warn!("[Update] {} failed: {}", inst.id, e);
                task.error = Some(e.to_string());
            }
        }
    }

    async fn update_local(&self, task: &mut UpdateTask) {
        match self.ctx.installer.install_latest().await {
            Ok(version) => {
                tracing::info!("[Update] Local instance installed {}", version);
                task.started = true;
            }
            Err(e) => {
                tracing::error!("[Update] Local install failed: {}", e);
                task.error = Some(e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_parsing() {
        assert_eq!(UpdateTarget::parse("ALL"), UpdateTarget::All);
        assert_eq!(UpdateTarget::parse(""), UpdateTarget::All);
        let raid = UpdateTarget::parse("raidbot");
        assert!(raid.matches("RaidBot"));
        assert!(!raid.matches("PokeBot"));
    }

    #[test]
    fn proceed_options_defaults() {
        let opts: ProceedOptions = serde_json::from_str("{}").unwrap();
        assert_eq!(opts, ProceedOptions::default());
        assert!(opts.wait_for_idle);
        assert!(!opts.force_stop);
    }

    fn task(needs: bool, started: bool, error: Option<&str>) -> UpdateTask {
        UpdateTask {
            instance: "127.0.0.1:8081".into(),
            name: "n".into(),
            bot_kind: "PokeBot".into(),
            is_local: false,
            current_version: "1.0".into(),
            latest_version: Some("1.1".into()),
            needs_update: needs,
            started,
            error: error.map(String::from),
        }
    }

    #[test]
    fn summary_tally() {
        let summary = UpdateSummary::new(
            "proceed",
            &UpdateTarget::All,
            vec![task(true, true, None), task(true, false, Some("refused")), task(false, false, None)],
            None,
        );
        assert_eq!(summary.updates_needed, 2);
        assert_eq!(summary.updates_started, 1);
        assert_eq!(summary.updates_failed, 1);
        assert_eq!(summary.lookups_failed, 0);

        let json = serde_json::to_value(&summary).unwrap();
        assert_eq!(json["UpdatesNeeded"], 2);
        assert!(json.get("Idle").is_none());
    }

    #[test]
    fn release_lookup_failures_are_tallied_separately() {
        let mut unknown = task(false, false, Some("release lookup failed: no feed"));
        unknown.latest_version = None;
        let summary = UpdateSummary::new("start", &UpdateTarget::All, vec![unknown, task(true, true, None)], None);
        assert_eq!(summary.updates_failed, 0);
        assert_eq!(summary.lookups_failed, 1);
        assert_eq!(serde_json::to_value(&summary).unwrap()["LookupsFailed"], 1);
    }

    #[tokio::test]
    async fn pinned_release_with_url_needs_no_network() {
        let mut settings = ReleaseSettings::default();
        settings.versions.insert(
            "PokeBot".to_string(),
            crate::config::PinnedRelease::Release {
                version: "1.4".to_string(),
                url: Some("https://example.invalid/pokebot-1.4".to_string()),
            },
        );
        settings.api_base_url = Some("http://127.0.0.1:1".to_string());

        let feed = release_feed(&settings).unwrap();
        let info = feed.latest("pokebot").await.unwrap();
        assert_eq!(info.version, "1.4");
        assert_eq!(info.download_url.as_deref(), Some("https://example.invalid/pokebot-1.4"));
    }
}
