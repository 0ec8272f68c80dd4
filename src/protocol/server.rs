//! 컨트롤 프로토콜 서버
//!
//! 연결마다 별도 태스크에서 한 줄 읽고 한 줄 쓴 뒤 닫습니다.
//! 느린 클라이언트가 다른 연결을 막지 못하도록 읽기/쓰기에 각각 타임아웃을 겁니다.

use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::sync::CancellationToken;

use super::{error_line, ok_line, ControlCommand};
use crate::context::FleetContext;

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
/// SELFRESTART 응답이 나간 뒤 재시작하기까지의 여유
const SELF_RESTART_DELAY: Duration = Duration::from_millis(300);

/// 취소될 때까지 연결 수락
pub async fn serve(listener: TcpListener, ctx: Arc<FleetContext>, cancel: CancellationToken) {
    let local = listener
        .local_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "?".to_string());
    tracing::info!("[Control] Listening on {}", local);

    loop {
        let accepted = tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let ctx = ctx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, &ctx).await {
                        tracing::debug!("[Control] Connection from {} dropped: {}", peer, e);
                    }
                });
            }
            Err(e) => {
                tracing::warn!("[Control] Accept failed: {}", e);
                tokio::time::sleep(Duration::from_millis(100)).await;
            }
        }
    }
    tracing::info!("[Control] Listener on {} stopped", local);
}

async fn handle_connection(stream: TcpStream, ctx: &Arc<FleetContext>) -> anyhow::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    tokio::time::timeout(READ_TIMEOUT, reader.read_line(&mut line))
        .await
        .map_err(|_| anyhow::anyhow!("read timed out"))??;

    let response = dispatch(ctx, &line).await;

    tokio::time::timeout(WRITE_TIMEOUT, async {
        writer.write_all(response.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await
    })
    .await
    .map_err(|_| anyhow::anyhow!("write timed out"))??;
    Ok(())
}

/// 한 줄 명령 실행 → 한 줄 응답
pub async fn dispatch(ctx: &Arc<FleetContext>, line: &str) -> String {
    let command = ControlCommand::parse(line);
    tracing::debug!("[Control] Received {:?}", command);

    match command {
        ControlCommand::All(cmd) => {
            let count = ctx.host.send_all(cmd);
            ok_line(format!("{} sent to {} bots", cmd.verb(), count))
        }

        ControlCommand::ListBots => match serde_json::to_string(&ctx.host.list_units()) {
            Ok(json) => json,
            Err(e) => error_line(format!("failed to serialize units: {}", e)),
        },

        ControlCommand::Status(None) => {
            let units = ctx.host.list_units();
            if units.is_empty() {
                "No bots".to_string()
            } else {
                units
                    .iter()
                    .map(|u| format!("{}: {}", u.name, u.state))
                    .collect::<Vec<_>>()
                    .join(" | ")
            }
        }

        ControlCommand::Status(Some(id)) => ctx
            .host
            .list_units()
            .into_iter()
            .find(|u| u.name.eq_ignore_ascii_case(&id))
            .map(|u| u.state)
            .unwrap_or_else(|| error_line(format!("unit not found: {}", id))),

        ControlCommand::IsReady => ctx.host.list_units().iter().any(|u| u.is_running()).to_string(),

        ControlCommand::Info => match serde_json::to_string(&ctx.info()) {
            Ok(json) => json,
            Err(e) => error_line(format!("failed to serialize info: {}", e)),
        },

        ControlCommand::Version => ctx.host.identity().version,

        ControlCommand::Update => {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                match ctx.installer.install_latest().await {
                    Ok(version) => tracing::info!("[Update] Self-update to {} installed", version),
                    Err(e) => tracing::error!("[Update] Self-update failed: {}", e),
                }
            });
            ok_line("update started")
        }

        ControlCommand::SelfRestart => {
            let ctx = ctx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(SELF_RESTART_DELAY).await;
                if let Err(e) = ctx.host.restart_process() {
                    tracing::error!("[Control] Self-restart failed: {}", e);
                }
            });
            ok_line("restarting")
        }

        ControlCommand::Unknown(verb) => error_line(format!("Unknown command: {}", verb)),
    }
}
