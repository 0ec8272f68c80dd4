use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;

use super::BotCommand;
use crate::context::FleetContext;
use crate::host::BotUnitStatus;
use crate::protocol::{ProbeError, ProbeTier};
use crate::registry::Instance;

/// 인스턴스 하나에 대한 명령 전달 결과 ("접수됨"이지 "완료됨"이 아님)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct CommandOutcome {
    pub instance: String,
    pub success: bool,
    pub message: String,
}

fn tier_for(instance: &Instance) -> ProbeTier {
    if instance.is_remote {
        ProbeTier::Remote
    } else {
        ProbeTier::Standard
    }
}

pub async fn send_to_instance(ctx: &FleetContext, instance: &Instance, command: BotCommand) -> CommandOutcome {
    if instance.is_local || ctx.is_local(&instance.key()) {
        let queued = ctx.host.send_all(command);
        tracing::info!("[Control] {} queued locally for {} bot(s)", command, queued);
        return CommandOutcome {
            instance: instance.id.clone(),
            success: true,
            message: format!("{} sent to {} bots", command.verb(), queued),
        };
    }

    match ctx
        .link
        .request(&instance.address, instance.port, &command.all_verb(), tier_for(instance))
        .await
    {
        Ok(reply) => CommandOutcome { instance: instance.id.clone(), success: true, message: reply },
        Err(e) => {
            tracing::warn!("[Control] {} to {} failed: {}", command, instance.id, e);
            CommandOutcome { instance: instance.id.clone(), success: false, message: e.sentinel() }
        }
    }
}

/// 플릿 전체에 동시에 전달. 결과는 인스턴스 id 순
pub async fn send_to_fleet(
    ctx: &Arc<FleetContext>,
    instances: Vec<Instance>,
    command: BotCommand,
) -> Vec<CommandOutcome> {
    let mut set = JoinSet::new();
    for instance in instances {
        let ctx = ctx.clone();
        set.spawn(async move { send_to_instance(&ctx, &instance, command).await });
    }

    let mut outcomes = Vec::new();
    while let Some(joined) = set.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) => tracing::error!("[Control] Dispatch task failed: {}", e),
        }
    }
    outcomes.sort_by(|a, b| a.instance.cmp(&b.instance));
    outcomes
}

/// 인스턴스의 유닛 목록. 로컬은 호스트에서 바로, 원격은 LISTBOTS
pub async fn fetch_units(ctx: &FleetContext, instance: &Instance) -> Result<Vec<BotUnitStatus>, ProbeError> {
    if instance.is_local || ctx.is_local(&instance.key()) {
        return Ok(ctx.host.list_units());
    }

    let reply = ctx
        .link
        .request(&instance.address, instance.port, "LISTBOTS", tier_for(instance))
        .await?;
    serde_json::from_str(&reply).map_err(|e| ProbeError::Malformed(format!("LISTBOTS from {}: {}", instance.id, e)))
}

/// 플릿 유휴 상태 집계
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct IdleStatus {
    pub all_idle: bool,
    pub total_bots: usize,
    pub idle_bots: usize,
    /// 유휴가 아닌 유닛이 있는 인스턴스 id
    pub busy_instances: Vec<String>,
    /// 응답하지 않아 집계에서 빠진 인스턴스 id
    pub unreachable: Vec<String>,
}

/// 응답하지 않는 인스턴스는 집계에서 제외 (기다려도 유휴가 될 수 없으므로)
pub async fn collect_idle_status(ctx: &Arc<FleetContext>, instances: &[Instance]) -> IdleStatus {
    let mut set = JoinSet::new();
    for instance in instances.iter().cloned() {
        let ctx = ctx.clone();
        set.spawn(async move {
            let units = fetch_units(&ctx, &instance).await;
            (instance.id, units)
        });
    }

    let mut status = IdleStatus::default();
    while let Some(joined) = set.join_next().await {
        let (id, units) = match joined {
            Ok(pair) => pair,
            Err(e) => {
                tracing::error!("[Control] Idle check task failed: {}", e);
                continue;
            }
        };
        match units {
            Ok(units) => {
                let idle = units.iter().filter(|u| u.is_idle()).count();
                status.total_bots += units.len();
                status.idle_bots += idle;
                if idle < units.len() {
                    status.busy_instances.push(id);
                }
            }
            Err(e) => {
                tracing::debug!("[Control] Skipping {} in idle check: {}", id, e);
                status.unreachable.push(id);
            }
        }
    }
    status.busy_instances.sort();
    status.unreachable.sort();
    status.all_idle = status.busy_instances.is_empty();
    status
}

/// 모든 대상 유닛이 유휴가 되거나 제한 시간이 지날 때까지 고정 간격 폴링
///
/// 반환값의 `all_idle`이 false면 타임아웃입니다.
pub async fn wait_for_idle(
    ctx: &Arc<FleetContext>,
    instances: &[Instance],
    timeout: std::time::Duration,
    poll: std::time::Duration,
) -> IdleStatus {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        let status = collect_idle_status(ctx, instances).await;
        if status.all_idle {
            return status;
        }
        if tokio::time::Instant::now() >= deadline {
            tracing::warn!(
                "[Control] Idle wait timed out: {}/{} bots idle, busy: {:?}",
                status.idle_bots,
                status.total_bots,
                status.busy_instances
            );
            return status;
        }
        tracing::debug!(
            "[Control] Waiting for idle: {}/{} bots idle",
            status.idle_bots,
            status.total_bots
        );
        tokio::time::sleep(poll).await;
    }
}
