use axum::{body::Bytes, extract::State, Json};
use serde_json::{json, Value};

use super::{parse_body, success_with};
use crate::error::FleetError;
use crate::gateway::GatewayState;
use crate::restart::{RestartTrigger, ScheduleConfig};

/// POST /api/bot/restart/now - 수동 재시작
pub async fn restart_now(State(state): State<GatewayState>) -> Result<Json<Value>, FleetError> {
    state.restarts.request(RestartTrigger::Manual)?;
    Ok(Json(json!({
        "Success": true,
        "Message": "restart started",
    })))
}

/// GET /api/bot/restart/status
pub async fn restart_status(State(state): State<GatewayState>) -> Result<Json<Value>, FleetError> {
    Ok(Json(success_with(&state.restarts.status())?))
}

/// GET /api/bot/restart/schedule
pub async fn get_schedule(State(state): State<GatewayState>) -> Json<Value> {
    Json(json!({
        "Success": true,
        "Schedule": state.restarts.schedule(),
    }))
}

/// POST /api/bot/restart/schedule - 저장 후 타이머 재설정
pub async fn set_schedule(State(state): State<GatewayState>, body: Bytes) -> Result<Json<Value>, FleetError> {
    let config: ScheduleConfig = parse_body(&body)?;
    let saved = state.restarts.set_schedule(config)?;
    Ok(Json(json!({
        "Success": true,
        "Schedule": saved,
    })))
}
