use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use saba_fleet_updater::{needs_update, BinaryInstaller, ReleaseFeed, UpdaterError};

use super::LocalInstaller;

/// 일시적 다운로드 오류(네트워크, 5xx) 재시도 횟수
const INSTALL_ATTEMPTS: u32 = 3;
const RETRY_DELAY: Duration = Duration::from_millis(500);

/// 릴리스 피드에서 받은 바이너리로 현재 실행 파일을 교체하고 종료를 예약
pub struct BinarySelfUpdater {
    feed: Arc<dyn ReleaseFeed>,
    installer: BinaryInstaller,
    bot_kind: String,
    current_version: String,
    shutdown: CancellationToken,
    shutdown_delay: Duration,
}

impl BinarySelfUpdater {
    pub fn new(
        feed: Arc<dyn ReleaseFeed>,
        installer: BinaryInstaller,
        bot_kind: &str,
        current_version: &str,
        shutdown: CancellationToken,
        shutdown_delay: Duration,
    ) -> Self {
        Self {
            feed,
            installer,
            bot_kind: bot_kind.to_string(),
            current_version: current_version.to_string(),
            shutdown,
            shutdown_delay,
        }
    }

    async fn install_with_retry(&self, url: &str) -> Result<(), UpdaterError> {
        let mut attempt = 1;
        loop {
            match self.installer.install_from_url(url).await {
                Ok(()) => return Ok(()),
                Err(e) if e.is_recoverable() && attempt < INSTALL_ATTEMPTS => {
                    tracing::warn!("[Update] Install attempt {} failed, retrying: {}", attempt, e);
                    attempt += 1;
                    tokio::time::sleep(RETRY_DELAY).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl LocalInstaller for BinarySelfUpdater {
    async fn install_latest(&self) -> anyhow::Result<String> {
        let release = self.feed.latest(&self.bot_kind).await?;
        if !needs_update(&self.current_version, &release.version) {
            tracing::info!("[Update] Already at {}, nothing to install", release.version);
            return Ok(release.version);
        }

        let url = release.download_url.as_deref().ok_or_else(|| UpdaterError::NoAsset {
            kind: self.bot_kind.clone(),
            version: release.version.clone(),
        })?;

        tracing::info!(
            "[Update] Installing {} {} → {} into {}",
            self.bot_kind,
            self.current_version,
            release.version,
            self.installer.target().display()
        );
        self.install_with_retry(url).await?;

        // 응답이 나갈 시간을 준 뒤 정상 종료. 재기동은 외부 감독자 몫
        let shutdown = self.shutdown.clone();
        let delay = self.shutdown_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            tracing::info!("[Update] Shutting down to finish update");
            shutdown.cancel();
        });

        Ok(release.version)
    }
}
