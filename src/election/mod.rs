//! 코디네이터 선출 & 장애 조치 모니터
//!
//! 잘 알려진 대시보드 포트를 OS 수준에서 독점 바인딩한 프로세스가 코디네이터입니다.
//! 합의 알고리즘은 없고, 소켓 바인딩 자체가 임대(lease) 역할을 합니다.

use rand::Rng;
use serde::Serialize;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::FleetConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Role {
    Coordinator,
    Member,
}

/// 시작 시 선출 결과와 바인딩된 리스너
pub struct Startup {
    pub role: Role,
    /// 코디네이터일 때만 존재 (HTTP 게이트웨이용)
    pub dashboard: Option<TcpListener>,
    pub control: TcpListener,
    pub control_port: u16,
}

/// SO_REUSEADDR 없이 바인딩. 이미 누가 쓰고 있으면 실패
pub fn try_bind_exclusive(address: &str, port: u16) -> std::io::Result<TcpListener> {
    let addr: SocketAddr = format!("{}:{}", address, port)
        .parse()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidInput, e))?;

    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(false)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(128)?;

    let listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(listener)
}

/// 대시보드 포트 경합 후 자기 컨트롤 포트 확보
pub fn start(config: &FleetConfig) -> anyhow::Result<Startup> {
    let (role, dashboard) = match try_bind_exclusive(&config.bind_address, config.dashboard_port) {
        Ok(listener) => {
            tracing::info!("[Election] Won dashboard port {}, acting as coordinator", config.dashboard_port);
            (Role::Coordinator, Some(listener))
        }
        Err(e) => {
            tracing::info!(
                "[Election] Dashboard port {} unavailable ({}), joining as member",
                config.dashboard_port,
                e
            );
            (Role::Member, None)
        }
    };

    let control = bind_control_port(config)?;
    let control_port = control.local_addr()?.port();
    tracing::info!("[Election] Control port bound: {}", control_port);

    Ok(Startup { role, dashboard, control, control_port })
}

fn bind_control_port(config: &FleetConfig) -> anyhow::Result<TcpListener> {
    if let Some(port) = config.control_port {
        return try_bind_exclusive(&config.bind_address, port)
            .map_err(|e| anyhow::anyhow!("Failed to bind control port {}: {}", port, e));
    }

    for port in config.fleet_port_range.ports() {
        if port == config.dashboard_port {
            continue;
        }
        if let Ok(listener) = try_bind_exclusive(&config.bind_address, port) {
            return Ok(listener);
        }
    }
    anyhow::bail!(
        "No free control port in {}-{}",
        config.fleet_port_range.start,
        config.fleet_port_range.end
    )
}

fn jitter((lo, hi): (Duration, Duration)) -> Duration {
    let ms = rand::thread_rng().gen_range(lo.as_millis() as u64..=hi.as_millis() as u64);
    Duration::from_millis(ms)
}

fn probe_address(config: &FleetConfig) -> &str {
    match config.bind_address.as_str() {
        "0.0.0.0" | "" => "127.0.0.1",
        "::" => "::1",
        other => other,
    }
}

/// 누가 듣고 있으면 false. 응답 없음(타임아웃)도 점유로 간주
pub async fn port_is_free(address: &str, port: u16) -> bool {
    let target = format!("{}:{}", address, port);
    match tokio::time::timeout(Duration::from_secs(1), TcpStream::connect(&target)).await {
        Ok(Ok(_)) => false,
        Ok(Err(e)) => e.kind() == std::io::ErrorKind::ConnectionRefused,
        Err(_) => false,
    }
}

/// 멤버 모니터 루프
///
/// 10–15초(지터) 간격으로 대시보드 포트를 확인하고, 비어 있으면 짧은 무작위 지연 뒤
/// 한 번 더 확인한 다음 바인딩을 시도합니다. 승격에 성공하면 `on_promote`를 호출하고 종료합니다.
pub fn spawn_monitor<F>(config: Arc<FleetConfig>, cancel: CancellationToken, on_promote: F) -> JoinHandle<()>
where
    F: FnOnce(TcpListener) + Send + 'static,
{
    tokio::spawn(async move {
        let mut on_promote = Some(on_promote);
        let port = config.dashboard_port;
        let address = probe_address(&config).to_string();
        tracing::info!("[Election] Monitoring coordinator port {}", port);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(jitter(config.election.monitor_range())) => {}
            }

            if !port_is_free(&address, port).await {
                tracing::debug!("[Election] Coordinator alive on {}", port);
                continue;
            }

            let delay = jitter(config.election.takeover_range());
            tracing::info!("[Election] Coordinator port {} looks free, re-checking in {:?}", port, delay);
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }

            if !port_is_free(&address, port).await {
                tracing::info!("[Election] Another member took over port {}", port);
                continue;
            }

            match try_bind_exclusive(&config.bind_address, port) {
                Ok(listener) => {
                    tracing::info!("[Election] Promoted to coordinator on port {}", port);
                    if let Some(promote) = on_promote.take() {
                        promote(listener);
                    }
                    break;
                }
                Err(e) => {
                    tracing::warn!("[Election] Lost takeover race for port {}: {}", port, e);
                }
            }
        }
        tracing::debug!("[Election] Monitor loop stopped");
    })
}
