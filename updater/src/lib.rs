//! # saba-fleet 업데이터 라이브러리
//!
//! 플릿 오케스트레이터가 사용하는 업데이트 프리미티브를 모아둔 크레이트입니다.
//!
//! - **피드(feed.rs)**: bot kind별 최신 버전 조회 (GitHub Release / 고정 버전)
//! - **설치(install.rs)**: 새 바이너리 다운로드 후 `.backup`을 남기고 교체
//! - **에러(error.rs)**: 네트워크 끊김, 타임아웃, 파일 시스템 오류
//!
//! 버전 비교는 의도적으로 문자열 완전 일치입니다. 시맨틱 버전 비교는 하지 않으므로
//! 다운그레이드도 "업데이트 필요"로 판정됩니다.

pub mod error;
pub mod feed;
pub mod install;

pub use error::UpdaterError;
pub use feed::{FeedChain, GitHubFeed, ReleaseFeed, ReleaseInfo, RepoRef, StaticFeed};
pub use install::BinaryInstaller;

/// 보고된 버전과 최신 버전이 다르면 업데이트 대상
pub fn needs_update(current: &str, latest: &str) -> bool {
    current != latest
}
