/// HTTP 게이트웨이 테스트 (tower oneshot, 실제 소켓 없음)

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

use common::*;
use saba_fleet::gateway::{self, GatewayState};
use saba_fleet::restart::RestartManager;
use saba_fleet::update::UpdateOrchestrator;
use saba_fleet_updater::StaticFeed;

fn app(h: &Harness) -> Router {
    gateway::router(GatewayState {
        ctx: h.ctx.clone(),
        updates: Arc::new(UpdateOrchestrator::new(h.ctx.clone())),
        restarts: RestartManager::new(h.ctx.clone()),
    })
}

async fn call(app: Router, method: Method, uri: &str, body: &str) -> Value {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn two_node_harness() -> Harness {
    let mut config = fast_config();
    config.remote_hosts = vec![remote_host("10.0.0.2", 8091)];
    let h = harness(config, identity("PokeBot", "1.0"), &[("switch-1", "RUNNING")], StaticFeed::new());
    h.link.add("10.0.0.2", 8091, ScriptedNode::new("host-b", "RaidBot", "1.0"));
    h
}

#[tokio::test]
async fn lists_local_and_remote_instances() {
    let h = two_node_harness();
    let json = call(app(&h), Method::GET, "/api/bot/instances", "").await;

    assert_eq!(json["Success"], true);
    assert_eq!(json["Count"], 2);
    let instances = json["Instances"].as_array().unwrap();
    assert_eq!(instances[0]["Id"], format!("127.0.0.1:{}", CONTROL_PORT));
    assert_eq!(instances[0]["IsLocal"], true);
    assert_eq!(instances[1]["Id"], "10.0.0.2:8091");
    assert_eq!(instances[1]["BotKind"], "RaidBot");
    assert_eq!(instances[1]["IsRemote"], true);
}

#[tokio::test]
async fn local_command_is_queued_without_network() {
    let h = two_node_harness();
    let uri = format!("/api/bot/instances/127.0.0.1:{}/command", CONTROL_PORT);
    let json = call(app(&h), Method::POST, &uri, r#"{"Command":"start"}"#).await;

    assert_eq!(json["Success"], true);
    assert_eq!(json["Message"], "START sent to 1 bots");
    let events = events_of(&h.events);
    assert!(position(&events, "local STARTALL").is_some());
    assert_eq!(events.len(), 1, "no remote traffic expected: {:?}", events);
}

#[tokio::test]
async fn remote_command_goes_over_the_link() {
    let h = two_node_harness();
    let json = call(app(&h), Method::POST, "/api/bot/instances/10.0.0.2:8091/command", r#"{"command":"idle"}"#).await;

    assert_eq!(json["Success"], true);
    assert!(position(&events_of(&h.events), "10.0.0.2:8091 IDLEALL").is_some());
    assert_eq!(h.link.units("10.0.0.2", 8091)[0].state, "IDLE");
}

#[tokio::test]
async fn unknown_command_is_structured_error() {
    let h = two_node_harness();
    let uri = format!("/api/bot/instances/127.0.0.1:{}/command", CONTROL_PORT);
    let json = call(app(&h), Method::POST, &uri, r#"{"Command":"dance"}"#).await;

    assert_eq!(json["Success"], false);
    assert_eq!(json["ErrorCode"], "UNKNOWN_COMMAND");
    assert!(events_of(&h.events).is_empty());
}

#[tokio::test]
async fn bad_instance_ids_are_rejected() {
    let h = two_node_harness();

    let json = call(app(&h), Method::GET, "/api/bot/instances/no-port/bots", "").await;
    assert_eq!(json["ErrorCode"], "INVALID_INSTANCE_ID");

    let json = call(app(&h), Method::GET, "/api/bot/instances/10.9.9.9:8081/bots", "").await;
    assert_eq!(json["Success"], false);
    assert_eq!(json["ErrorCode"], "INSTANCE_NOT_FOUND");
}

#[tokio::test]
async fn malformed_body_is_invalid_request() {
    let h = two_node_harness();
    let json = call(app(&h), Method::POST, "/api/bot/command/all", "{not json").await;
    assert_eq!(json["Success"], false);
    assert_eq!(json["ErrorCode"], "INVALID_REQUEST");
}

#[tokio::test]
async fn fleet_command_reports_per_instance_results() {
    let h = two_node_harness();
    let json = call(app(&h), Method::POST, "/api/bot/command/all", r#"{"Command":"stop"}"#).await;

    assert_eq!(json["Success"], true);
    assert_eq!(json["Sent"], 2);
    assert_eq!(json["Failed"], 0);
    assert_eq!(json["Results"].as_array().unwrap().len(), 2);
    let events = events_of(&h.events);
    assert!(position(&events, "local STOPALL").is_some());
    assert!(position(&events, "10.0.0.2:8091 STOPALL").is_some());
}

#[tokio::test]
async fn idle_status_counts_every_unit() {
    let h = two_node_harness();
    let json = call(app(&h), Method::GET, "/api/bot/update/idle-status", "").await;

    assert_eq!(json["Success"], true);
    assert_eq!(json["AllIdle"], false);
    assert_eq!(json["TotalBots"], 2);
    assert_eq!(json["IdleBots"], 0);
    assert_eq!(json["BusyInstances"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn unknown_update_stage_is_rejected() {
    let h = two_node_harness();
    let json = call(app(&h), Method::POST, "/api/bot/update/all", r#"{"stage":"sideways"}"#).await;
    assert_eq!(json["ErrorCode"], "INVALID_REQUEST");
}

#[tokio::test]
async fn schedule_round_trips_through_http() {
    let h = two_node_harness();
    let app = app(&h);

    let json = call(app.clone(), Method::GET, "/api/bot/restart/schedule", "").await;
    assert_eq!(json["Schedule"]["enabled"], false);

    let json = call(
        app.clone(),
        Method::POST,
        "/api/bot/restart/schedule",
        r#"{"Enabled":true,"Time":"05:30"}"#,
    )
    .await;
    assert_eq!(json["Success"], true);
    assert_eq!(json["Schedule"]["time"], "05:30");

    let json = call(app.clone(), Method::GET, "/api/bot/restart/schedule", "").await;
    assert_eq!(json["Schedule"]["enabled"], true);
    assert!(h.ctx.config.paths().schedule().exists());

    let json = call(app, Method::POST, "/api/bot/restart/schedule", r#"{"enabled":true,"time":"25:99"}"#).await;
    assert_eq!(json["Success"], false);
    assert_eq!(json["ErrorCode"], "INVALID_REQUEST");
}
