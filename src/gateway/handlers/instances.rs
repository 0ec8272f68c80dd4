use axum::{
    extract::{Path, State},
    Json,
};
use serde_json::{json, Value};

use crate::command;
use crate::error::FleetError;
use crate::gateway::GatewayState;
use crate::registry::InstanceKey;

/// GET /api/bot/instances - 현재 플릿 스냅샷
pub async fn list_instances(State(state): State<GatewayState>) -> Json<Value> {
    let instances = state.ctx.discover().await;
    Json(json!({
        "Success": true,
        "Count": instances.len(),
        "Instances": instances,
    }))
}

/// GET /api/bot/instances/:instance/bots - 인스턴스 하나의 유닛 목록
pub async fn list_bots(
    Path(instance): Path<String>,
    State(state): State<GatewayState>,
) -> Result<Json<Value>, FleetError> {
    let key = InstanceKey::parse(&instance)?;
    let target = state
        .ctx
        .find_instance(&key)
        .await
        .ok_or_else(|| FleetError::InstanceNotFound(key.to_string()))?;

    let bots = command::fetch_units(&state.ctx, &target).await?;
    Ok(Json(json!({
        "Success": true,
        "Instance": target.id,
        "Bots": bots,
    })))
}
