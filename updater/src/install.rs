//! 바이너리 교체 - 다운로드 → `.backup` 보존 → 새 파일로 교체
//!
//! 1. 새 바이너리를 `<target>.new`로 스트리밍 다운로드
//! 2. 현재 실행 파일을 `<target>.backup`으로 rename
//! 3. `<target>.new`를 `<target>`으로 rename
//!
//! 3단계가 실패하면 백업을 되돌립니다 (best-effort, 트랜잭션 아님).
//! 실행 중인 바이너리를 rename하는 것은 Windows/Unix 모두 허용됩니다.

use futures_util::StreamExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

use crate::error::UpdaterError;

pub struct BinaryInstaller {
    target: PathBuf,
}

impl BinaryInstaller {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        Self { target: target.into() }
    }

    /// 현재 실행 파일을 대상으로 하는 설치기
    pub fn for_current_exe() -> Result<Self, UpdaterError> {
        let exe = std::env::current_exe()
            .map_err(|e| UpdaterError::from_io(&e, "current_exe", Path::new(".")))?;
        Ok(Self::new(exe))
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn backup_path(&self) -> PathBuf {
        with_suffix(&self.target, ".backup")
    }

    pub fn staged_path(&self) -> PathBuf {
        with_suffix(&self.target, ".new")
    }

    /// URL에서 받아 교체까지 수행
    pub async fn install_from_url(&self, url: &str) -> Result<(), UpdaterError> {
        let staged = self.staged_path();
        download_to_file(url, &staged).await?;
        self.swap_in(&staged)
    }

    /// 스테이징된 파일을 대상 위치로 교체
    pub fn swap_in(&self, staged: &Path) -> Result<(), UpdaterError> {
        let backup = self.backup_path();

        if backup.exists() {
            std::fs::remove_file(&backup)
                .map_err(|e| UpdaterError::from_io(&e, "remove stale backup", &backup))?;
        }

        if self.target.exists() {
            std::fs::rename(&self.target, &backup)
                .map_err(|e| UpdaterError::from_io(&e, "backup current binary", &self.target))?;
        }

        if let Err(e) = std::fs::rename(staged, &self.target) {
            tracing::error!("[Install] Swap failed, restoring backup: {}", e);
            let err = UpdaterError::from_io(&e, "move new binary", staged);
            if let Err(restore_err) = self.restore_backup() {
                tracing::error!("[Install] Backup restore also failed: {}", restore_err);
            }
            return Err(err);
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.target, std::fs::Permissions::from_mode(0o755))
                .map_err(|e| UpdaterError::from_io(&e, "chmod", &self.target))?;
        }

        tracing::info!(
            "[Install] {} replaced (backup: {})",
            self.target.display(),
            backup.display()
        );
        Ok(())
    }

    /// `.backup`을 대상 위치로 되돌림
    pub fn restore_backup(&self) -> Result<(), UpdaterError> {
        let backup = self.backup_path();
        if !backup.exists() {
            return Err(UpdaterError::FileSystemError {
                operation: "restore backup".to_string(),
                path: backup.display().to_string(),
                message: "backup does not exist".to_string(),
            });
        }
        if self.target.exists() {
            std::fs::remove_file(&self.target)
                .map_err(|e| UpdaterError::from_io(&e, "remove broken binary", &self.target))?;
        }
        std::fs::rename(&backup, &self.target)
            .map_err(|e| UpdaterError::from_io(&e, "restore backup", &backup))?;
        tracing::warn!("[Install] Restored {} from backup", self.target.display());
        Ok(())
    }
}

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// 스트리밍 다운로드
async fn download_to_file(url: &str, dest: &Path) -> Result<(), UpdaterError> {
    tracing::info!("[Install] Downloading {} → {}", url, dest.display());

    let response = reqwest::Client::builder()
        .user_agent("saba-fleet-updater/1.0")
        .timeout(std::time::Duration::from_secs(300))
        .build()
        .map_err(|e| UpdaterError::from_reqwest(&e, "build client"))?
        .get(url)
        .send()
        .await
        .map_err(|e| UpdaterError::from_reqwest(&e, "download"))?;

    if !response.status().is_success() {
        return Err(UpdaterError::ApiError {
            status_code: response.status().as_u16(),
            message: format!("download failed: {}", url),
        });
    }

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| UpdaterError::from_io(&e, "create dir", parent))?;
    }

    let mut file = tokio::fs::File::create(dest)
        .await
        .map_err(|e| UpdaterError::from_io(&e, "create staged file", dest))?;

    let mut written: u64 = 0;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| UpdaterError::from_reqwest(&e, "download body"))?;
        file.write_all(&chunk)
            .await
            .map_err(|e| UpdaterError::from_io(&e, "write staged file", dest))?;
        written += chunk.len() as u64;
    }
    file.flush()
        .await
        .map_err(|e| UpdaterError::from_io(&e, "flush staged file", dest))?;

    tracing::info!("[Install] Downloaded {} bytes", written);
    Ok(())
}
