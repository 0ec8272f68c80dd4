use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::Value;

use super::{parse_body, success_with};
use crate::command;
use crate::error::FleetError;
use crate::gateway::GatewayState;
use crate::update::{ProceedOptions, UpdateTarget};

#[derive(Debug, Deserialize)]
pub struct UpdateRequest {
    #[serde(default = "default_stage", alias = "Stage")]
    pub stage: String,
    #[serde(default = "default_true", alias = "WaitForIdle")]
    pub wait_for_idle: bool,
    #[serde(default, alias = "ForceStop")]
    pub force_stop: bool,
}

fn default_stage() -> String {
    "start".to_string()
}

fn default_true() -> bool {
    true
}

impl Default for UpdateRequest {
    fn default() -> Self {
        Self { stage: default_stage(), wait_for_idle: true, force_stop: false }
    }
}

/// POST /api/bot/update/:target - 단계별 업데이트 (`start` | `proceed` | `full`)
pub async fn start_update(
    Path(target): Path<String>,
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Json<Value>, FleetError> {
    let req: UpdateRequest = parse_body(&body)?;
    let target = UpdateTarget::parse(&target);
    let options = ProceedOptions { wait_for_idle: req.wait_for_idle, force_stop: req.force_stop };

    let summary = match req.stage.trim().to_ascii_lowercase().as_str() {
        "start" => state.updates.start(&target).await?,
        "proceed" => state.updates.proceed(&target, options).await?,
        "full" => state.updates.run(&target, options).await?,
        other => return Err(FleetError::InvalidRequest(format!("unknown stage '{}'", other))),
    };
    Ok(Json(success_with(&summary)?))
}

/// GET /api/bot/update/idle-status - 플릿 유휴 집계
pub async fn idle_status(State(state): State<GatewayState>) -> Result<Json<Value>, FleetError> {
    let instances = state.ctx.discover().await;
    let status = command::collect_idle_status(&state.ctx, &instances).await;
    Ok(Json(success_with(&status)?))
}
