/// 컨트롤 프로토콜 서버 ↔ TcpLink 왕복 테스트 (실제 루프백 소켓)

mod common;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use common::*;
use saba_fleet::config::ProbeTimeouts;
use saba_fleet::protocol::{server, ControlLink, InfoPayload, ProbeError, ProbeTier, TcpLink};
use saba_fleet_updater::StaticFeed;

async fn start_server(h: &Harness) -> (u16, CancellationToken) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let cancel = CancellationToken::new();
    tokio::spawn(server::serve(listener, h.ctx.clone(), cancel.clone()));
    (port, cancel)
}

#[tokio::test]
async fn info_reports_this_process() {
    let h = harness(fast_config(), identity("RaidBot", "2.1"), &[("switch-1", "RUNNING")], StaticFeed::new());
    let (port, cancel) = start_server(&h).await;
    let link = TcpLink::new(ProbeTimeouts::default());

    let reply = link.request("127.0.0.1", port, "INFO", ProbeTier::Standard).await.unwrap();
    let info = InfoPayload::parse(&reply).unwrap();
    assert_eq!(info.instance_id.as_deref(), Some(h.ctx.instance_id.as_str()));
    assert_eq!(info.bot_type.as_deref(), Some("RaidBot"));
    assert_eq!(info.version.as_deref(), Some("2.1"));
    assert_eq!(info.process_id, Some(std::process::id()));
    assert_eq!(info.is_master, Some(true));
    cancel.cancel();
}

#[tokio::test]
async fn unit_commands_and_status() {
    let h = harness(
        fast_config(),
        identity("PokeBot", "1.0"),
        &[("switch-1", "RUNNING"), ("switch-2", "RUNNING")],
        StaticFeed::new(),
    );
    let (port, cancel) = start_server(&h).await;
    let link = TcpLink::new(ProbeTimeouts::default());
    let ask = |line: &'static str| {
        let link = &link;
        async move { link.request("127.0.0.1", port, line, ProbeTier::Standard).await }
    };

    assert_eq!(ask("ISREADY").await.unwrap(), "true");
    assert_eq!(ask("idleall").await.unwrap(), "OK: IDLE sent to 2 bots");
    assert!(position(&events_of(&h.events), "local IDLEALL").is_some());
    assert_eq!(ask("STATUS").await.unwrap(), "switch-1: IDLE | switch-2: IDLE");
    assert_eq!(ask("STATUS:switch-2").await.unwrap(), "IDLE");
    assert_eq!(ask("ISREADY").await.unwrap(), "false");
    assert_eq!(ask("VERSION").await.unwrap(), "1.0");
    cancel.cancel();
}

#[tokio::test]
async fn errors_come_back_as_rejections() {
    let h = harness(fast_config(), identity("PokeBot", "1.0"), &[], StaticFeed::new());
    let (port, cancel) = start_server(&h).await;
    let link = TcpLink::new(ProbeTimeouts::default());

    let err = link.request("127.0.0.1", port, "FOO", ProbeTier::Standard).await.unwrap_err();
    assert_eq!(err, ProbeError::Rejected("Unknown command: FOO".to_string()));

    let err = link.request("127.0.0.1", port, "STATUS:ghost", ProbeTier::Standard).await.unwrap_err();
    assert!(matches!(err, ProbeError::Rejected(ref m) if m.contains("ghost")));

    assert_eq!(link.request("127.0.0.1", port, "STATUS", ProbeTier::Standard).await.unwrap(), "No bots");
    cancel.cancel();
}

#[tokio::test]
async fn self_restart_is_acknowledged_then_performed() {
    let h = harness(fast_config(), identity("PokeBot", "1.0"), &[], StaticFeed::new());
    let (port, cancel) = start_server(&h).await;
    let link = TcpLink::new(ProbeTimeouts::default());

    let reply = link.request("127.0.0.1", port, "SELFRESTART", ProbeTier::Standard).await.unwrap();
    assert!(reply.starts_with("OK:"));
    assert!(
        eventually(std::time::Duration::from_secs(3), || {
            position(&events_of(&h.events), "local restart_process").is_some()
        })
        .await
    );
    cancel.cancel();
}
