//! 일일 재시작 스케줄 - `{enabled, time}` 영속화와 재설정 가능한 타이머

use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, NaiveTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{RestartError, RestartManager, RestartTrigger};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default, alias = "Enabled")]
    pub enabled: bool,
    /// 로컬 시각 `HH:MM`
    #[serde(default = "default_time", alias = "Time")]
    pub time: String,
}

fn default_time() -> String {
    "04:00".to_string()
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { enabled: false, time: default_time() }
    }
}

impl ScheduleConfig {
    /// 파일이 없거나 깨졌으면 기본값 (비활성)
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(s) => serde_json::from_str(&s).unwrap_or_else(|e| {
                tracing::warn!("[Restart] Ignoring malformed schedule {}: {}", path.display(), e);
                Self::default()
            }),
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(self)?)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }

    pub fn parse_time(&self) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(self.time.trim(), "%H:%M").ok()
    }
}

/// 오늘 그 시각이 아직 안 지났으면 오늘, 아니면 내일
pub fn next_occurrence(now: NaiveDateTime, at: NaiveTime) -> NaiveDateTime {
    let today = now.date().and_time(at);
    if today > now {
        today
    } else {
        today + ChronoDuration::days(1)
    }
}

fn until_next(at: NaiveTime) -> Duration {
    let now = Local::now();
    let next = next_occurrence(now.naive_local(), at);
    let next_local = Local
        .from_local_datetime(&next)
        .earliest()
        .unwrap_or_else(|| now + ChronoDuration::hours(1));
    (next_local - now).to_std().unwrap_or(Duration::from_secs(60))
}

/// 스케줄 타이머. 매 발화 후 다음 날로 다시 계산하고, 스케줄이 바뀌면 즉시 재설정
pub fn spawn_timer(manager: Arc<RestartManager>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let config = manager.schedule();
            let Some(at) = config.parse_time().filter(|_| config.enabled) else {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = manager.schedule_changed() => {}
                }
                continue;
            };

            let wait = until_next(at);
            tracing::info!("[Restart] Next scheduled restart at {} (in {:?})", config.time, wait);

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = manager.schedule_changed() => continue,
                _ = tokio::time::sleep(wait) => {}
            }

            if !manager.ctx.is_master() {
                tracing::debug!("[Restart] Scheduled time reached but not coordinator, skipping");
                continue;
            }
            match manager.request(RestartTrigger::Scheduled) {
                Ok(()) => tracing::info!("[Restart] Scheduled restart started"),
                Err(RestartError::AlreadyRanToday) => {
                    tracing::info!("[Restart] Restart already ran today, skipping scheduled run")
                }
                Err(e) => tracing::warn!("[Restart] Scheduled restart not started: {}", e),
            }
            // 같은 분 안에 다시 발화하지 않도록
            tokio::time::sleep(Duration::from_secs(1)).await;
        }
        tracing::debug!("[Restart] Schedule timer stopped");
    })
}
