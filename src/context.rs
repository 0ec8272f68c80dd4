//! 프로세스 전역 상태를 하나로 묶은 컨텍스트
//!
//! `main`에서 한 번 만들고 `Arc`로 각 컴포넌트에 넘깁니다.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use saba_fleet_updater::ReleaseFeed;

use crate::config::FleetConfig;
use crate::election::Role;
use crate::host::BotHost;
use crate::protocol::{ControlLink, InfoPayload};
use crate::registry::{is_loopback, Discovery, Instance, InstanceKey, MarkerStore, LOOPBACK};
use crate::update::LocalInstaller;

/// 컨텍스트에 주입되는 외부 협력자
pub struct Collaborators {
    pub host: Arc<dyn BotHost>,
    pub link: Arc<dyn ControlLink>,
    pub feed: Arc<dyn ReleaseFeed>,
    pub installer: Arc<dyn LocalInstaller>,
}

pub struct FleetContext {
    pub config: Arc<FleetConfig>,
    pub host: Arc<dyn BotHost>,
    pub link: Arc<dyn ControlLink>,
    pub feed: Arc<dyn ReleaseFeed>,
    pub installer: Arc<dyn LocalInstaller>,
    pub markers: MarkerStore,
    pub discovery: Discovery,
    pub control_port: u16,
    /// 부팅마다 새로 만드는 식별자 (INFO의 InstanceId)
    pub instance_id: String,
    pub pid: u32,
    role: watch::Sender<Role>,
    pub shutdown: CancellationToken,
}

impl FleetContext {
    pub fn new(
        config: Arc<FleetConfig>,
        parts: Collaborators,
        control_port: u16,
        role: Role,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        let markers = MarkerStore::new(config.paths().ports_dir());
        let discovery = Discovery::new(Duration::from_millis(config.discovery.cache_ms));
        let (role, _) = watch::channel(role);

        Arc::new(Self {
            host: parts.host,
            link: parts.link,
            feed: parts.feed,
            installer: parts.installer,
            markers,
            discovery,
            control_port,
            instance_id: uuid::Uuid::new_v4().to_string(),
            pid: std::process::id(),
            role,
            shutdown,
            config,
        })
    }

    pub fn role(&self) -> Role {
        *self.role.borrow()
    }

    pub fn is_master(&self) -> bool {
        self.role() == Role::Coordinator
    }

    pub fn set_role(&self, role: Role) {
        self.role.send_replace(role);
    }

    /// INFO 응답 본문
    pub fn info(&self) -> InfoPayload {
        let identity = self.host.identity();
        InfoPayload {
            version: Some(identity.version),
            name: Some(identity.name),
            bot_type: Some(identity.bot_kind),
            mode: Some(identity.mode),
            process_id: Some(self.pid),
            port: Some(self.control_port),
            is_master: Some(self.is_master()),
            instance_id: Some(self.instance_id.clone()),
        }
    }

    /// 네트워크 왕복 없이 프로세스 내부 상태로 만든 로컬 인스턴스
    pub fn local_instance(&self) -> Instance {
        let identity = self.host.identity();
        let key = InstanceKey::new(LOOPBACK, self.control_port);
        Instance {
            id: key.to_string(),
            process_id: Some(self.pid),
            address: key.address,
            port: key.port,
            name: identity.name,
            bot_kind: identity.bot_kind,
            version: identity.version,
            mode: identity.mode,
            instance_id: Some(self.instance_id.clone()),
            online: true,
            is_master: self.is_master(),
            is_remote: false,
            is_local: true,
            bots: self.host.list_units(),
        }
    }

    /// 같은 프로세스(같은 컨트롤 포트)를 가리키는지
    pub fn is_local(&self, key: &InstanceKey) -> bool {
        key.port == self.control_port
            && (is_loopback(&key.address)
                || key.address == self.config.bind_address
                || key.address == "0.0.0.0")
    }

    pub async fn discover(&self) -> Vec<Instance> {
        self.discovery.discover(self).await
    }

    pub async fn discover_fresh(&self) -> Vec<Instance> {
        self.discovery.discover_fresh(self).await
    }

    /// 플릿 뷰에서 키로 인스턴스 찾기. 로컬이면 스캔 없이 바로 반환
    pub async fn find_instance(&self, key: &InstanceKey) -> Option<Instance> {
        if self.is_local(key) {
            return Some(self.local_instance());
        }
        self.discover().await.into_iter().find(|i| &i.key() == key)
    }
}
