//! 통합 테스트 공용 픽스처
//!
//! - `ScriptedLink`: 포트별로 스크립트된 가짜 인스턴스에 응답하는 ControlLink
//! - `FakeHost` / `FakeInstaller`: 로컬 호출을 같은 이벤트 로그에 기록
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use saba_fleet::command::BotCommand;
use saba_fleet::config::{FleetConfig, RemoteHost};
use saba_fleet::context::{Collaborators, FleetContext};
use saba_fleet::election::Role;
use saba_fleet::host::{BotHost, BotUnitStatus, HostIdentity};
use saba_fleet::protocol::{ControlCommand, ControlLink, InfoPayload, ProbeError, ProbeTier};
use saba_fleet::update::LocalInstaller;
use saba_fleet_updater::StaticFeed;

pub type Events = Arc<Mutex<Vec<String>>>;

pub fn events_of(events: &Events) -> Vec<String> {
    events.lock().unwrap().clone()
}

/// `pattern`을 포함하는 첫 이벤트 위치
pub fn position(events: &[String], pattern: &str) -> Option<usize> {
    events.iter().position(|e| e.contains(pattern))
}

// ─── Scripted remote instances ───────────────────────────

#[derive(Debug, Clone)]
pub struct ScriptedNode {
    pub info: InfoPayload,
    pub units: Vec<BotUnitStatus>,
    /// IDLEALL을 무시하고 계속 RUNNING
    pub sticky_busy: bool,
    /// UPDATE에 대한 응답
    pub update_reply: Result<String, ProbeError>,
    /// SELFRESTART 뒤 다시 살아나지 않음
    pub stays_down: bool,
    /// SELFRESTART 뒤 INFO가 거절될 남은 횟수
    down_polls: u32,
    boots: u32,
}

impl ScriptedNode {
    pub fn new(name: &str, kind: &str, version: &str) -> Self {
        Self {
            info: InfoPayload {
                version: Some(version.to_string()),
                name: Some(name.to_string()),
                bot_type: Some(kind.to_string()),
                mode: Some("default".to_string()),
                process_id: None,
                port: None,
                is_master: Some(false),
                instance_id: Some(format!("{}-boot-0", name)),
            },
            units: vec![BotUnitStatus::new(&format!("{}-unit", name), "RUNNING")],
            sticky_busy: false,
            update_reply: Ok("OK: update started".to_string()),
            stays_down: false,
            down_polls: 0,
            boots: 0,
        }
    }

    pub fn busy_forever(mut self) -> Self {
        self.sticky_busy = true;
        self
    }

    pub fn stays_down(mut self) -> Self {
        self.stays_down = true;
        self
    }

    pub fn failing_update(mut self, err: ProbeError) -> Self {
        self.update_reply = Err(err);
        self
    }
}

#[derive(Default)]
struct LinkState {
    nodes: HashMap<(String, u16), ScriptedNode>,
    /// SELFRESTART 후 아직 다시 살아나지 않은 노드
    restarting: Vec<(String, u16)>,
    overlap_detected: bool,
    requests: usize,
}

pub struct ScriptedLink {
    state: Mutex<LinkState>,
    events: Events,
}

impl ScriptedLink {
    pub fn new(events: Events) -> Self {
        Self { state: Mutex::new(LinkState::default()), events }
    }

    pub fn add(&self, address: &str, port: u16, node: ScriptedNode) {
        self.state.lock().unwrap().nodes.insert((address.to_string(), port), node);
    }

    pub fn overlap_detected(&self) -> bool {
        self.state.lock().unwrap().overlap_detected
    }

    pub fn request_count(&self) -> usize {
        self.state.lock().unwrap().requests
    }

    pub fn units(&self, address: &str, port: u16) -> Vec<BotUnitStatus> {
        self.state.lock().unwrap().nodes[&(address.to_string(), port)].units.clone()
    }
}

#[async_trait]
impl ControlLink for ScriptedLink {
    async fn request(
        &self,
        address: &str,
        port: u16,
        line: &str,
        _tier: ProbeTier,
    ) -> Result<String, ProbeError> {
        let key = (address.to_string(), port);
        let target = format!("{}:{}", address, port);
        let mut state = self.state.lock().unwrap();
        state.requests += 1;

        let restarting_now = state.restarting.clone();
        let Some(node) = state.nodes.get_mut(&key) else {
            return Err(ProbeError::Refused(target));
        };

        if line != "INFO" {
            self.events.lock().unwrap().push(format!("{} {}", target, line));
        }

        match ControlCommand::parse(line) {
            ControlCommand::Info => {
                if node.down_polls > 0 {
                    node.down_polls -= 1;
                    return Err(ProbeError::Refused(target));
                }
                let reply = serde_json::to_string(&node.info).unwrap();
                state.restarting.retain(|k| k != &key);
                Ok(reply)
            }
            ControlCommand::ListBots => Ok(serde_json::to_string(&node.units).unwrap()),
            ControlCommand::All(cmd) => {
                let next = match cmd {
                    BotCommand::Idle if !node.sticky_busy => Some("IDLE"),
                    BotCommand::Stop => Some("STOPPED"),
                    BotCommand::Start => Some("RUNNING"),
                    _ => None,
                };
                if let Some(next) = next {
                    for unit in node.units.iter_mut() {
                        unit.state = next.to_string();
                    }
                }
                Ok(format!("OK: {} sent to {} bots", cmd.verb(), node.units.len()))
            }
            ControlCommand::Update => node.update_reply.clone(),
            ControlCommand::SelfRestart => {
                node.boots += 1;
                node.down_polls = if node.stays_down { u32::MAX } else { 2 };
                let name = node.info.name.clone().unwrap_or_default();
                node.info.instance_id = Some(format!("{}-boot-{}", name, node.boots));
                if !restarting_now.is_empty() {
                    state.overlap_detected = true;
                }
                state.restarting.push(key);
                Ok("OK: restarting".to_string())
            }
            ControlCommand::Version => Ok(node.info.version.clone().unwrap_or_default()),
            other => Err(ProbeError::Rejected(format!("Unknown command: {:?}", other))),
        }
    }
}

// ─── Local collaborators ─────────────────────────────────

pub struct FakeHost {
    identity: HostIdentity,
    units: Mutex<Vec<BotUnitStatus>>,
    events: Events,
}

impl FakeHost {
    pub fn new(identity: HostIdentity, units: &[(&str, &str)], events: Events) -> Self {
        Self {
            identity,
            units: Mutex::new(units.iter().map(|(n, s)| BotUnitStatus::new(n, s)).collect()),
            events,
        }
    }
}

impl BotHost for FakeHost {
    fn identity(&self) -> HostIdentity {
        self.identity.clone()
    }

    fn list_units(&self) -> Vec<BotUnitStatus> {
        self.units.lock().unwrap().clone()
    }

    fn send_all(&self, command: BotCommand) -> usize {
        self.events.lock().unwrap().push(format!("local {}", command.all_verb()));
        let mut units = self.units.lock().unwrap();
        let next = match command {
            BotCommand::Idle => Some("IDLE"),
            BotCommand::Stop => Some("STOPPED"),
            BotCommand::Start | BotCommand::Resume => Some("RUNNING"),
            _ => None,
        };
        if let Some(next) = next {
            for unit in units.iter_mut() {
                unit.state = next.to_string();
            }
        }
        units.len()
    }

    fn restart_process(&self) -> anyhow::Result<()> {
        self.events.lock().unwrap().push("local restart_process".to_string());
        Ok(())
    }

    fn shutdown(&self) {
        self.events.lock().unwrap().push("local shutdown".to_string());
    }
}

pub struct FakeInstaller {
    events: Events,
    version: String,
}

#[async_trait]
impl LocalInstaller for FakeInstaller {
    async fn install_latest(&self) -> anyhow::Result<String> {
        self.events.lock().unwrap().push("local install".to_string());
        Ok(self.version.clone())
    }
}

// ─── Harness ─────────────────────────────────────────────

pub const CONTROL_PORT: u16 = 8081;

pub struct Harness {
    pub ctx: Arc<FleetContext>,
    pub link: Arc<ScriptedLink>,
    pub events: Events,
    pub dir: tempfile::TempDir,
}

pub fn identity(kind: &str, version: &str) -> HostIdentity {
    HostIdentity {
        name: "local-host".to_string(),
        bot_kind: kind.to_string(),
        version: version.to_string(),
        mode: "default".to_string(),
    }
}

/// 빠른 폴링/짧은 타임아웃으로 맞춘 테스트용 설정
pub fn fast_config() -> FleetConfig {
    let mut cfg = FleetConfig::default();
    cfg.update.poll_secs = 1;
    cfg.update.idle_wait_secs = 2;
    cfg.update.instance_delay_ms = 10;
    cfg.restart.poll_secs = 0;
    cfg.restart.idle_wait_secs = 1;
    cfg.restart.instance_timeout_secs = 5;
    cfg.discovery.remote_scan_ms = 1000;
    cfg
}

pub fn remote_host(address: &str, port: u16) -> RemoteHost {
    RemoteHost { address: address.to_string(), port_start: port, port_end: port, kind: None }
}

pub fn harness(
    mut config: FleetConfig,
    local: HostIdentity,
    local_units: &[(&str, &str)],
    feed: StaticFeed,
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    config.data_dir = dir.path().to_path_buf();
    config.paths().ensure().unwrap();

    let events: Events = Arc::new(Mutex::new(Vec::new()));
    let link = Arc::new(ScriptedLink::new(events.clone()));
    let host = Arc::new(FakeHost::new(local.clone(), local_units, events.clone()));
    let installer = Arc::new(FakeInstaller { events: events.clone(), version: local.version });

    let ctx = FleetContext::new(
        Arc::new(config),
        Collaborators { host, link: link.clone(), feed: Arc::new(feed), installer },
        CONTROL_PORT,
        Role::Coordinator,
        CancellationToken::new(),
    );
    Harness { ctx, link, events, dir }
}

/// 조건이 참이 될 때까지 대기 (최대 `limit`)
pub async fn eventually<F: Fn() -> bool>(limit: Duration, check: F) -> bool {
    let deadline = tokio::time::Instant::now() + limit;
    while tokio::time::Instant::now() < deadline {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}
