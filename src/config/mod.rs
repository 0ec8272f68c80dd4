use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use saba_fleet_updater::RepoRef;

/// 설정 파일 기본 경로 (`SABA_FLEET_CONFIG`로 오버라이드)
pub const DEFAULT_CONFIG_PATH: &str = "config/fleet.toml";

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config '{path}': {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("Failed to parse config '{path}': {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// 플릿 노드 설정 - `config/fleet.toml`
#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct FleetConfig {
    /// INFO에 보고할 표시 이름
    pub node_name: String,
    /// bot kind 태그 (예: "PokeBot", "RaidBot")
    pub bot_kind: String,
    /// 봇 동작 모드 (INFO에 그대로 노출)
    pub mode: String,
    /// 이 프로세스가 관리하는 유닛 이름
    pub units: Vec<String>,

    pub bind_address: String,
    /// 코디네이터 전용 포트 (대시보드 HTTP)
    pub dashboard_port: u16,
    /// 명시적 컨트롤 포트. 없으면 fleet_port_range에서 빈 포트를 고름
    pub control_port: Option<u16>,
    /// 표준 플릿 포트 범위 (양 끝 포함)
    pub fleet_port_range: PortRange,
    /// 추가 스캔 범위
    pub extra_port_range: Option<LabeledRange>,
    pub remote_hosts: Vec<RemoteHost>,

    pub data_dir: PathBuf,

    pub probe: ProbeTimeouts,
    pub discovery: DiscoverySettings,
    pub election: ElectionSettings,
    pub update: UpdateSettings,
    pub restart: RestartSettings,
    pub releases: ReleaseSettings,
    /// 이름 → kind 추론용 키워드 (소문자 부분 문자열)
    pub kind_hints: Vec<KindHint>,
}

#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    pub fn new(start: u16, end: u16) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, port: u16) -> bool {
        port >= self.start && port <= self.end
    }

    pub fn ports(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }
}

/// kind 라벨이 붙을 수 있는 포트 범위
#[derive(Deserialize, Debug, Clone)]
pub struct LabeledRange {
    pub start: u16,
    pub end: u16,
    #[serde(default)]
    pub kind: Option<String>,
}

impl LabeledRange {
    pub fn range(&self) -> PortRange {
        PortRange::new(self.start, self.end)
    }
}

/// 다른 호스트에 할당된 포트 범위
#[derive(Deserialize, Debug, Clone)]
pub struct RemoteHost {
    pub address: String,
    pub port_start: u16,
    pub port_end: u16,
    #[serde(default)]
    pub kind: Option<String>,
}

impl RemoteHost {
    pub fn range(&self) -> PortRange {
        PortRange::new(self.port_start, self.port_end)
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct KindHint {
    pub keyword: String,
    pub kind: String,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ProbeTimeouts {
    /// 대량 스캔용 (대부분 실패가 예상되는 포트)
    pub fast_ms: u64,
    /// 응답이 예상되는 확인된 인스턴스용
    pub standard_ms: u64,
    /// 다른 호스트 연결용
    pub remote_connect_ms: u64,
    pub read_ms: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct DiscoverySettings {
    pub cache_ms: u64,
    /// 원격 호스트 스캔 전체 예산
    pub remote_scan_ms: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ElectionSettings {
    pub monitor_min_secs: u64,
    pub monitor_max_secs: u64,
    pub takeover_delay_min_ms: u64,
    pub takeover_delay_max_ms: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct UpdateSettings {
    pub idle_wait_secs: u64,
    pub poll_secs: u64,
    /// 원격 인스턴스 사이 간격
    pub instance_delay_ms: u64,
    /// 로컬 교체 후 종료까지 대기
    pub shutdown_delay_ms: u64,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(default)]
pub struct RestartSettings {
    pub idle_wait_secs: u64,
    pub poll_secs: u64,
    /// 슬레이브 하나가 다시 살아날 때까지 최대 대기
    pub instance_timeout_secs: u64,
    /// 크래시 복구 후 포트 안정화 확인 라운드 상한
    pub stabilize_rounds: u32,
    pub stabilize_interval_secs: u64,
}

#[derive(Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct ReleaseSettings {
    pub api_base_url: Option<String>,
    /// kind → GitHub 저장소
    pub repos: HashMap<String, RepoRef>,
    /// kind → 고정 최신 버전 (`"1.2"` 또는 `{ version = "1.2", url = "..." }`)
    pub versions: HashMap<String, PinnedRelease>,
}

/// 설정에 고정한 릴리스. URL이 없으면 같은 버전의 GitHub 에셋을 사용
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum PinnedRelease {
    Version(String),
    Release {
        version: String,
        #[serde(default)]
        url: Option<String>,
    },
}

impl PinnedRelease {
    pub fn version(&self) -> &str {
        match self {
            Self::Version(v) => v,
            Self::Release { version, .. } => version,
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Version(_) => None,
            Self::Release { url, .. } => url.as_deref(),
        }
    }
}

impl Default for FleetConfig {
    fn default() -> Self {
        Self {
            node_name: "saba-fleet".to_string(),
            bot_kind: "PokeBot".to_string(),
            mode: "default".to_string(),
            units: vec!["bot-1".to_string()],
            bind_address: "0.0.0.0".to_string(),
            dashboard_port: 8080,
            control_port: None,
            fleet_port_range: PortRange::new(8081, 8110),
            extra_port_range: None,
            remote_hosts: Vec::new(),
            data_dir: PathBuf::from("./data"),
            probe: ProbeTimeouts::default(),
            discovery: DiscoverySettings::default(),
            election: ElectionSettings::default(),
            update: UpdateSettings::default(),
            restart: RestartSettings::default(),
            releases: ReleaseSettings::default(),
            kind_hints: vec![
                KindHint { keyword: "raid".to_string(), kind: "RaidBot".to_string() },
                KindHint { keyword: "poke".to_string(), kind: "PokeBot".to_string() },
                KindHint { keyword: "trade".to_string(), kind: "PokeBot".to_string() },
            ],
        }
    }
}

impl Default for ProbeTimeouts {
    fn default() -> Self {
        Self { fast_ms: 250, standard_ms: 800, remote_connect_ms: 500, read_ms: 2000 }
    }
}

impl Default for DiscoverySettings {
    fn default() -> Self {
        Self { cache_ms: 2000, remote_scan_ms: 2000 }
    }
}

impl Default for ElectionSettings {
    fn default() -> Self {
        Self {
            monitor_min_secs: 10,
            monitor_max_secs: 15,
            takeover_delay_min_ms: 500,
            takeover_delay_max_ms: 3000,
        }
    }
}

impl Default for UpdateSettings {
    fn default() -> Self {
        Self { idle_wait_secs: 300, poll_secs: 5, instance_delay_ms: 2000, shutdown_delay_ms: 1500 }
    }
}

impl Default for RestartSettings {
    fn default() -> Self {
        Self {
            idle_wait_secs: 180,
            poll_secs: 3,
            instance_timeout_secs: 120,
            stabilize_rounds: 20,
            stabilize_interval_secs: 5,
        }
    }
}

impl ElectionSettings {
    pub fn monitor_range(&self) -> (Duration, Duration) {
        ordered(self.monitor_min_secs * 1000, self.monitor_max_secs * 1000)
    }

    pub fn takeover_range(&self) -> (Duration, Duration) {
        ordered(self.takeover_delay_min_ms, self.takeover_delay_max_ms)
    }
}

fn ordered(a_ms: u64, b_ms: u64) -> (Duration, Duration) {
    let (lo, hi) = if a_ms <= b_ms { (a_ms, b_ms) } else { (b_ms, a_ms) };
    (Duration::from_millis(lo), Duration::from_millis(hi))
}

impl FleetConfig {
    /// `SABA_FLEET_CONFIG` 또는 기본 경로에서 로드. 파일이 없으면 기본값
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var("SABA_FLEET_CONFIG")
            .unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        let mut cfg = Self::load_from(Path::new(&path))?;
        if let Ok(dir) = std::env::var("SABA_FLEET_DATA_DIR") {
            cfg.data_dir = PathBuf::from(dir);
        }
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::info!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&s).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn from_toml(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fleet_port_range.start > self.fleet_port_range.end {
            return Err(ConfigError::Invalid(format!(
                "fleet_port_range start {} > end {}",
                self.fleet_port_range.start, self.fleet_port_range.end
            )));
        }
        if self.fleet_port_range.contains(self.dashboard_port) {
            return Err(ConfigError::Invalid(format!(
                "dashboard_port {} overlaps fleet_port_range",
                self.dashboard_port
            )));
        }
        if let Some(extra) = &self.extra_port_range {
            if extra.start > extra.end {
                return Err(ConfigError::Invalid(format!(
                    "extra_port_range start {} > end {}",
                    extra.start, extra.end
                )));
            }
            if extra.range().contains(self.dashboard_port) {
                return Err(ConfigError::Invalid(format!(
                    "dashboard_port {} overlaps extra_port_range",
                    self.dashboard_port
                )));
            }
        }
        for host in &self.remote_hosts {
            if host.port_start > host.port_end {
                return Err(ConfigError::Invalid(format!(
                    "remote host {} has an empty port range",
                    host.address
                )));
            }
        }
        Ok(())
    }

    /// 로컬 스캔 창: 표준 범위 ∪ 추가 범위
    pub fn local_scan_ranges(&self) -> Vec<PortRange> {
        let mut ranges = vec![self.fleet_port_range];
        if let Some(extra) = &self.extra_port_range {
            ranges.push(extra.range());
        }
        ranges
    }

    pub fn in_local_scan_window(&self, port: u16) -> bool {
        self.local_scan_ranges().iter().any(|r| r.contains(port))
    }

    pub fn paths(&self) -> StatePaths {
        StatePaths::new(&self.data_dir)
    }
}

/// 디스크에 남기는 상태 파일 위치
#[derive(Debug, Clone)]
pub struct StatePaths {
    root: PathBuf,
}

impl StatePaths {
    pub fn new(root: &Path) -> Self {
        Self { root: root.to_path_buf() }
    }

    /// 포트 마커 디렉터리 (`{pid}.port`)
    pub fn ports_dir(&self) -> PathBuf {
        self.root.join("ports")
    }

    pub fn restart_flag(&self) -> PathBuf {
        self.root.join("restart_in_progress.flag")
    }

    pub fn restart_pids(&self) -> PathBuf {
        self.root.join("restart_pids.json")
    }

    pub fn last_restart_date(&self) -> PathBuf {
        self.root.join("last_restart_date")
    }

    pub fn schedule(&self) -> PathBuf {
        self.root.join("restart_schedule.json")
    }

    pub fn ensure(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.ports_dir())
    }
}
