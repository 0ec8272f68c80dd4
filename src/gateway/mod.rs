//! HTTP 게이트웨이 - 코디네이터에서만 뜨는 플릿 집계 API
//!
//! 모든 응답은 JSON이며 실패도 HTTP 200 + `{Success:false, Error}`로 돌려줍니다.

pub mod handlers;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::context::FleetContext;
use crate::restart::RestartManager;
use crate::update::UpdateOrchestrator;

/// 핸들러 공유 상태
#[derive(Clone)]
pub struct GatewayState {
    pub ctx: Arc<FleetContext>,
    pub updates: Arc<UpdateOrchestrator>,
    pub restarts: Arc<RestartManager>,
}

pub fn router(state: GatewayState) -> Router {
    Router::new()
        .route("/api/bot/instances", get(handlers::instances::list_instances))
        .route("/api/bot/instances/:instance/bots", get(handlers::instances::list_bots))
        .route("/api/bot/instances/:instance/command", post(handlers::command::instance_command))
        .route("/api/bot/command/all", post(handlers::command::fleet_command))
        .route("/api/bot/update/idle-status", get(handlers::update::idle_status))
        .route("/api/bot/update/:target", post(handlers::update::start_update))
        .route("/api/bot/restart/now", post(handlers::restart::restart_now))
        .route("/api/bot/restart/status", get(handlers::restart::restart_status))
        .route(
            "/api/bot/restart/schedule",
            get(handlers::restart::get_schedule).post(handlers::restart::set_schedule),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// 취소될 때까지 HTTP 서비스
pub fn spawn(listener: TcpListener, state: GatewayState, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let addr = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "?".to_string());
        tracing::info!("[Gateway] HTTP listening on http://{}", addr);

        let app = router(state);
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await
        {
            tracing::error!("[Gateway] HTTP server error: {}", e);
        }
        tracing::info!("[Gateway] HTTP server on {} stopped", addr);
    })
}
