//! 릴리스 피드 - bot kind별 최신 버전 조회
//!
//! GitHub Release API(`/repos/{owner}/{repo}/releases/latest`)를 사용하거나,
//! 설정 파일에 고정된 버전(`StaticFeed`)을 사용합니다.
//! 오케스트레이터는 배치 하나당 kind별로 한 번만 조회합니다.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::UpdaterError;

/// 한 kind의 최신 릴리스 정보
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseInfo {
    pub version: String,
    /// 로컬 설치에 사용할 바이너리 URL (원격 인스턴스는 스스로 받으므로 없어도 됨)
    pub download_url: Option<String>,
}

/// 최신 버전을 알려주는 외부 피드
#[async_trait]
pub trait ReleaseFeed: Send + Sync {
    async fn latest(&self, kind: &str) -> Result<ReleaseInfo, UpdaterError>;
}

// ═══════════════════════════════════════════════════════
// GitHub
// ═══════════════════════════════════════════════════════

/// GitHub Release 응답 (필요한 필드만)
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubRelease {
    pub tag_name: String,
    #[serde(default)]
    pub assets: Vec<GitHubAsset>,
}

/// GitHub Release Asset
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubAsset {
    pub name: String,
    pub browser_download_url: String,
}

/// kind 하나에 대응하는 저장소
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub repo: String,
    /// 에셋 이름에 포함되어야 하는 문자열 (예: "linux-x64")
    #[serde(default)]
    pub asset: Option<String>,
}

/// GitHub Release 기반 피드
pub struct GitHubFeed {
    http: reqwest::Client,
    /// API 베이스 URL (기본: "https://api.github.com")
    /// 로컬 mock 서버 테스트 시 "http://127.0.0.1:9876" 등으로 오버라이드
    base_url: String,
    /// 소문자 kind → 저장소
    repos: HashMap<String, RepoRef>,
}

impl GitHubFeed {
    pub fn new(
        repos: HashMap<String, RepoRef>,
        base_url: Option<&str>,
    ) -> Result<Self, UpdaterError> {
        let http = reqwest::Client::builder()
            .user_agent("saba-fleet-updater/1.0")
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| UpdaterError::ConfigError {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http,
            base_url: base_url
                .filter(|s| !s.trim().is_empty())
                .unwrap_or("https://api.github.com")
                .trim_end_matches('/')
                .to_string(),
            repos: repos
                .into_iter()
                .map(|(kind, repo)| (kind.to_lowercase(), repo))
                .collect(),
        })
    }

    async fn fetch_latest_release(&self, repo: &RepoRef) -> Result<GitHubRelease, UpdaterError> {
        let url = format!(
            "{}/repos/{}/{}/releases/latest",
            self.base_url, repo.owner, repo.repo
        );

        let response = self
            .http
            .get(&url)
            .header("Accept", "application/vnd.github+json")
            .send()
            .await
            .map_err(|e| UpdaterError::from_reqwest(&e, "fetch latest release"))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(UpdaterError::ApiError {
                status_code: status.as_u16(),
                message: body,
            });
        }

        response
            .json::<GitHubRelease>()
            .await
            .map_err(|e| UpdaterError::from_reqwest(&e, "parse latest release"))
    }
}

#[async_trait]
impl ReleaseFeed for GitHubFeed {
    async fn latest(&self, kind: &str) -> Result<ReleaseInfo, UpdaterError> {
        let repo = self.repos.get(&kind.to_lowercase()).ok_or_else(|| {
            UpdaterError::ConfigError {
                message: format!("No release repository configured for '{}'", kind),
            }
        })?;

        let release = self.fetch_latest_release(repo).await?;
        let info = release_to_info(&release, repo.asset.as_deref());
        tracing::debug!("[Feed] {} latest = {} ({}/{})", kind, info.version, repo.owner, repo.repo);
        Ok(info)
    }
}

/// 태그에서 버전 문자열을 뽑고 에셋을 고릅니다.
///
/// 태그의 선행 `v`만 제거합니다. 그 외의 정규화는 하지 않습니다.
fn release_to_info(release: &GitHubRelease, asset_hint: Option<&str>) -> ReleaseInfo {
    let version = release
        .tag_name
        .strip_prefix('v')
        .unwrap_or(&release.tag_name)
        .to_string();

    let asset = match asset_hint {
        Some(hint) => release.assets.iter().find(|a| a.name.contains(hint)),
        None => release.assets.first(),
    };

    ReleaseInfo {
        version,
        download_url: asset.map(|a| a.browser_download_url.clone()),
    }
}

// ═══════════════════════════════════════════════════════
// Static / chain
// ═══════════════════════════════════════════════════════

/// 설정 파일에 고정된 버전 (오프라인 플릿, 테스트)
#[derive(Debug, Clone, Default)]
pub struct StaticFeed {
    versions: HashMap<String, ReleaseInfo>,
}

impl StaticFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_version(self, kind: &str, version: &str) -> Self {
        self.with_release(kind, version, None)
    }

    /// 다운로드 URL까지 고정
    pub fn with_release(mut self, kind: &str, version: &str, download_url: Option<&str>) -> Self {
        self.versions.insert(
            kind.to_lowercase(),
            ReleaseInfo {
                version: version.to_string(),
                download_url: download_url.map(str::to_string),
            },
        );
        self
    }
}

#[async_trait]
impl ReleaseFeed for StaticFeed {
    async fn latest(&self, kind: &str) -> Result<ReleaseInfo, UpdaterError> {
        self.versions
            .get(&kind.to_lowercase())
            .cloned()
            .ok_or_else(|| UpdaterError::ConfigError {
                message: format!("No static release version for '{}'", kind),
            })
    }
}

/// 여러 피드를 순서대로 시도 - 첫 성공을 반환
///
/// 첫 성공에 에셋이 없으면 뒤쪽 피드에서 같은 버전의 에셋을 찾아 채웁니다.
/// 버전은 항상 첫 성공 결과를 따릅니다.
pub struct FeedChain {
    feeds: Vec<Arc<dyn ReleaseFeed>>,
}

impl FeedChain {
    pub fn new(feeds: Vec<Arc<dyn ReleaseFeed>>) -> Self {
        Self { feeds }
    }
}

#[async_trait]
impl ReleaseFeed for FeedChain {
    async fn latest(&self, kind: &str) -> Result<ReleaseInfo, UpdaterError> {
        let mut last_err = UpdaterError::ConfigError {
            message: format!("No release feed configured for '{}'", kind),
        };
        let mut found: Option<ReleaseInfo> = None;
        for feed in &self.feeds {
            let info = match feed.latest(kind).await {
                Ok(info) => info,
                Err(e) => {
                    last_err = e;
                    continue;
                }
            };

            if let Some(pinned) = found.as_mut() {
                if info.version == pinned.version && info.download_url.is_some() {
                    pinned.download_url = info.download_url;
                    break;
                }
                tracing::debug!(
                    "[Feed] {} asset lookup skipped: feed has {}, pinned {}",
                    kind,
                    info.version,
                    pinned.version
                );
                continue;
            }

            if info.download_url.is_some() {
                return Ok(info);
            }
            found = Some(info);
        }
        found.ok_or(last_err)
    }
}
