use axum::{
    body::Bytes,
    extract::{Path, State},
    Json,
};
use serde::Deserialize;
use serde_json::{json, Value};

use super::parse_body;
use crate::command::{self, BotCommand};
use crate::error::FleetError;
use crate::gateway::GatewayState;
use crate::registry::InstanceKey;

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandRequest {
    #[serde(default, alias = "command")]
    pub command: String,
}

fn parse_command(req: &CommandRequest) -> Result<BotCommand, FleetError> {
    if req.command.trim().is_empty() {
        return Err(FleetError::InvalidRequest("missing Command".to_string()));
    }
    BotCommand::parse(&req.command).ok_or_else(|| FleetError::UnknownCommand(req.command.clone()))
}

/// POST /api/bot/instances/:instance/command - 인스턴스 하나에 명령
///
/// 응답은 "접수됨"을 뜻하며 봇 쪽 완료를 기다리지 않습니다.
pub async fn instance_command(
    Path(instance): Path<String>,
    State(state): State<GatewayState>,
    body: Bytes,
) -> Result<Json<Value>, FleetError> {
    let req: CommandRequest = parse_body(&body)?;
    let cmd = parse_command(&req)?;
    let key = InstanceKey::parse(&instance)?;
    let target = state
        .ctx
        .find_instance(&key)
        .await
        .ok_or_else(|| FleetError::InstanceNotFound(key.to_string()))?;

    tracing::info!("[Gateway] {} → {}", cmd, target.id);
    let outcome = command::send_to_instance(&state.ctx, &target, cmd).await;
    if outcome.success {
        Ok(Json(json!({
            "Success": true,
            "Instance": outcome.instance,
            "Command": cmd.name(),
            "Message": outcome.message,
        })))
    } else {
        Ok(Json(json!({
            "Success": false,
            "Instance": outcome.instance,
            "Command": cmd.name(),
            "Error": outcome.message,
        })))
    }
}

/// POST /api/bot/command/all - 플릿 전체에 명령
pub async fn fleet_command(State(state): State<GatewayState>, body: Bytes) -> Result<Json<Value>, FleetError> {
    let req: CommandRequest = parse_body(&body)?;
    let cmd = parse_command(&req)?;

    let instances = state.ctx.discover().await;
    tracing::info!("[Gateway] {} → {} instance(s)", cmd, instances.len());
    let outcomes = command::send_to_fleet(&state.ctx, instances, cmd).await;
    let failed = outcomes.iter().filter(|o| !o.success).count();

    Ok(Json(json!({
        "Success": failed == 0,
        "Command": cmd.name(),
        "Sent": outcomes.len() - failed,
        "Failed": failed,
        "Results": outcomes,
    })))
}
