//! 인스턴스 레지스트리 & 디스커버리
//!
//! 매 디스커버리마다 플릿 뷰를 새로 만듭니다. 인스턴스의 정체성은 PID가 아니라
//! `(address, port)` 쌍입니다. 원격 인스턴스는 PID를 알 수 없는 경우가 많기 때문입니다.

pub mod marker;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

use crate::config::FleetConfig;
use crate::context::FleetContext;
use crate::error::FleetError;
use crate::host::BotUnitStatus;
use crate::protocol::{ControlLink, InfoPayload, ProbeTier};

pub use marker::{MarkerStore, PortMarker};

pub const LOOPBACK: &str = "127.0.0.1";
pub const UNKNOWN_KIND: &str = "Unknown";

/// 인스턴스 식별자 `address:port`
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InstanceKey {
    pub address: String,
    pub port: u16,
}

impl InstanceKey {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self { address: address.into(), port }
    }

    pub fn parse(s: &str) -> Result<Self, FleetError> {
        let invalid = || FleetError::InvalidInstanceKey(s.to_string());
        let (address, port) = s.trim().rsplit_once(':').ok_or_else(invalid)?;
        let address = address.trim_start_matches('[').trim_end_matches(']');
        if address.is_empty() {
            return Err(invalid());
        }
        let port: u16 = port.parse().map_err(|_| invalid())?;
        Ok(Self::new(address, port))
    }

    pub fn is_loopback(&self) -> bool {
        is_loopback(&self.address)
    }
}

impl fmt::Display for InstanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.address, self.port)
    }
}

pub fn is_loopback(address: &str) -> bool {
    address.eq_ignore_ascii_case("localhost") || address == "::1" || address.starts_with("127.")
}

/// 봇 관리 프로세스 하나
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Instance {
    /// `address:port`
    pub id: String,
    pub process_id: Option<u32>,
    pub address: String,
    pub port: u16,
    pub name: String,
    pub bot_kind: String,
    pub version: String,
    pub mode: String,
    pub instance_id: Option<String>,
    pub online: bool,
    pub is_master: bool,
    pub is_remote: bool,
    pub is_local: bool,
    pub bots: Vec<BotUnitStatus>,
}

impl Instance {
    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(self.address.clone(), self.port)
    }

    /// INFO 응답으로 원격/이웃 인스턴스 구성
    pub fn from_info(key: &InstanceKey, info: InfoPayload, bot_kind: String) -> Self {
        let name = info
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| key.to_string());
        Self {
            id: key.to_string(),
            process_id: info.process_id,
            address: key.address.clone(),
            port: key.port,
            name,
            bot_kind,
            version: info.version.unwrap_or_default(),
            mode: info.mode.unwrap_or_default(),
            instance_id: info.instance_id,
            online: true,
            is_master: info.is_master.unwrap_or(false),
            is_remote: !key.is_loopback(),
            is_local: false,
            bots: Vec::new(),
        }
    }
}

/// 명시적 kind가 없을 때의 추정: 이름 키워드 → 포트 범위 라벨 → Unknown
pub fn infer_kind(config: &FleetConfig, name: &str, range_label: Option<&str>) -> String {
    let lower = name.to_lowercase();
    if let Some(hint) = config
        .kind_hints
        .iter()
        .find(|h| !h.keyword.is_empty() && lower.contains(&h.keyword.to_lowercase()))
    {
        return hint.kind.clone();
    }
    range_label
        .filter(|l| !l.trim().is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| UNKNOWN_KIND.to_string())
}

fn resolve_kind(config: &FleetConfig, info: &InfoPayload, name: &str, label: Option<&str>) -> String {
    match info.bot_type.as_deref().map(str::trim) {
        Some(kind) if !kind.is_empty() => kind.to_string(),
        _ => infer_kind(config, name, label),
    }
}

struct ScanTarget {
    key: InstanceKey,
    tier: ProbeTier,
    label: Option<String>,
    process_id: Option<u32>,
}

struct CachedScan {
    at: Instant,
    others: Vec<Instance>,
}

/// 플릿 디스커버리. 짧은 창 동안 스캔 결과를 캐시하며 로컬 인스턴스는 매번 다시 만듭니다.
pub struct Discovery {
    ttl: Duration,
    cache: Mutex<Option<CachedScan>>,
}

impl Discovery {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, cache: Mutex::new(None) }
    }

    pub fn invalidate(&self) {
        *self.cache.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn cached(&self) -> Option<Vec<Instance>> {
        let guard = self.cache.lock().unwrap_or_else(|e| e.into_inner());
        guard
            .as_ref()
            .filter(|c| c.at.elapsed() < self.ttl)
            .map(|c| c.others.clone())
    }

    pub async fn discover(&self, ctx: &FleetContext) -> Vec<Instance> {
        let others = match self.cached() {
            Some(others) => others,
            None => {
                let others = self.scan(ctx).await;
                *self.cache.lock().unwrap_or_else(|e| e.into_inner()) =
                    Some(CachedScan { at: Instant::now(), others: others.clone() });
                others
            }
        };

        let mut all = Vec::with_capacity(others.len() + 1);
        all.push(ctx.local_instance());
        all.extend(others);
        all
    }

    /// 캐시를 버리고 다시 스캔
    pub async fn discover_fresh(&self, ctx: &FleetContext) -> Vec<Instance> {
        self.invalidate();
        self.discover(ctx).await
    }

    async fn scan(&self, ctx: &FleetContext) -> Vec<Instance> {
        let config = &ctx.config;
        let started = Instant::now();
        let mut found: Vec<Instance> = Vec::new();

        // 1) 원격 호스트: 전체 예산 안에 끝난 결과만 사용
        if !config.remote_hosts.is_empty() {
            let targets: Vec<ScanTarget> = config
                .remote_hosts
                .iter()
                .flat_map(|host| {
                    host.range().ports().map(move |port| ScanTarget {
                        key: InstanceKey::new(host.address.clone(), port),
                        tier: ProbeTier::Remote,
                        label: host.kind.clone(),
                        process_id: None,
                    })
                })
                .collect();
            let budget = Duration::from_millis(config.discovery.remote_scan_ms);
            found.extend(probe_targets(ctx, targets, Some(budget)).await);
        }

        // 2) 포트 마커로 확인된 로컬 프로세스
        let mut resolved: HashSet<u16> = HashSet::new();
        resolved.insert(ctx.control_port);

        let markers: Vec<PortMarker> = ctx
            .markers
            .list()
            .into_iter()
            .filter(|m| m.pid != ctx.pid && m.port != ctx.control_port)
            .filter(|m| config.in_local_scan_window(m.port))
            .collect();
        let live = crate::process_monitor::filter_running(markers.iter().map(|m| m.pid).collect()).await;

        let marker_targets: Vec<ScanTarget> = markers
            .iter()
            .filter(|m| live.contains(&m.pid))
            .map(|m| ScanTarget {
                key: InstanceKey::new(LOOPBACK, m.port),
                tier: ProbeTier::Standard,
                label: range_label(config, m.port),
                process_id: Some(m.pid),
            })
            .collect();
        resolved.extend(marker_targets.iter().map(|t| t.key.port));
        found.extend(probe_targets(ctx, marker_targets, None).await);

        // 3) 나머지 로컬 스캔 창
        let mut window: Vec<u16> = config
            .local_scan_ranges()
            .iter()
            .flat_map(|r| r.ports())
            .filter(|p| !resolved.contains(p))
            .collect();
        window.sort_unstable();
        window.dedup();

        let window_targets: Vec<ScanTarget> = window
            .into_iter()
            .map(|port| ScanTarget {
                key: InstanceKey::new(LOOPBACK, port),
                tier: ProbeTier::Fast,
                label: range_label(config, port),
                process_id: None,
            })
            .collect();
        found.extend(probe_targets(ctx, window_targets, None).await);

        // 자기 자신(원격 호스트 목록에 자기 주소가 있는 경우)과 중복 제거
        let mut seen: HashSet<InstanceKey> = HashSet::new();
        found.retain(|inst| {
            if inst.instance_id.as_deref() == Some(ctx.instance_id.as_str()) {
                return false;
            }
            seen.insert(inst.key())
        });
        found.sort_by(|a, b| (a.is_remote, &a.address, a.port).cmp(&(b.is_remote, &b.address, b.port)));

        tracing::debug!(
            "[Discovery] Scan finished in {:?}: {} other instance(s)",
            started.elapsed(),
            found.len()
        );
        found
    }
}

fn range_label(config: &FleetConfig, port: u16) -> Option<String> {
    config
        .extra_port_range
        .as_ref()
        .filter(|r| r.range().contains(port))
        .and_then(|r| r.kind.clone())
}

/// 대상 전부에 INFO를 동시에 보냄. `budget`이 있으면 그 안에 끝난 것만 수집
async fn probe_targets(ctx: &FleetContext, targets: Vec<ScanTarget>, budget: Option<Duration>) -> Vec<Instance> {
    if targets.is_empty() {
        return Vec::new();
    }

    let mut set = JoinSet::new();
    for target in targets {
        let link: Arc<dyn ControlLink> = ctx.link.clone();
        set.spawn(async move {
            match link.request(&target.key.address, target.key.port, "INFO", target.tier).await {
                Ok(line) => InfoPayload::parse(&line).map(|info| (target, info)),
                Err(e) => {
                    tracing::debug!("[Discovery] {} not answering: {}", target.key, e);
                    None
                }
            }
        });
    }

    let mut results = Vec::new();
    let collect = async {
        while let Some(joined) = set.join_next().await {
            if let Ok(Some(pair)) = joined {
                results.push(pair);
            }
        }
    };

    match budget {
        Some(budget) => {
            if tokio::time::timeout(budget, collect).await.is_err() {
                tracing::debug!("[Discovery] Remote scan budget {:?} exhausted, keeping partial results", budget);
            }
        }
        None => collect.await,
    }
    // 남은 프로브는 JoinSet drop 시 중단됨

    results
        .into_iter()
        .map(|(target, info)| {
            let name = info.name.clone().unwrap_or_default();
            let kind = resolve_kind(&ctx.config, &info, &name, target.label.as_deref());
            let mut inst = Instance::from_info(&target.key, info, kind);
            if inst.process_id.is_none() {
                inst.process_id = target.process_id;
            }
            inst
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_parsing() {
        let key = InstanceKey::parse("192.168.0.20:8091").unwrap();
        assert_eq!(key, InstanceKey::new("192.168.0.20", 8091));
        assert_eq!(key.to_string(), "192.168.0.20:8091");
        assert!(!key.is_loopback());

        assert!(InstanceKey::parse("[::1]:8081").unwrap().is_loopback());
        assert!(InstanceKey::parse("8081").is_err());
        assert!(InstanceKey::parse(":8081").is_err());
        assert!(InstanceKey::parse("host:99999").is_err());
    }

    #[test]
    fn kind_inference_order() {
        let config = FleetConfig::default();
        assert_eq!(infer_kind(&config, "Raid-Host-2", Some("PokeBot")), "RaidBot");
        assert_eq!(infer_kind(&config, "switch-3", Some("PokeBot")), "PokeBot");
        assert_eq!(infer_kind(&config, "switch-3", None), UNKNOWN_KIND);
    }

    #[test]
    fn explicit_kind_wins() {
        let config = FleetConfig::default();
        let info = InfoPayload { bot_type: Some("SVRaidBot".into()), ..Default::default() };
        assert_eq!(resolve_kind(&config, &info, "poke-host", None), "SVRaidBot");
    }

    #[test]
    fn from_info_fills_defaults() {
        let key = InstanceKey::new("10.0.0.5", 8083);
        let info = InfoPayload { version: Some("2.0".into()), ..Default::default() };
        let inst = Instance::from_info(&key, info, "PokeBot".into());
        assert_eq!(inst.name, "10.0.0.5:8083");
        assert_eq!(inst.id, "10.0.0.5:8083");
        assert!(inst.is_remote);
        assert!(!inst.is_master);
        assert!(inst.online);
    }
}
