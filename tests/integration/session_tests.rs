//! Connection lifecycle: limits, disconnects, health and shutdown.

use std::time::Duration;

use serde_json::{json, Value};
use tokio_tungstenite::tungstenite::Message;

use super::test_helpers::{
    completed, http_get, test_config, wait_group_gone, Client, TestServer,
};

#[tokio::test]
async fn connection_over_limit_is_rejected_with_policy_close() {
    let mut config = test_config();
    config.max_sessions = 1;
    let server = TestServer::start(config).await;
    let (first, _) = server.connect().await;

    let (mut second, rejection) = Client::connect(&server.ws_url()).await;
    assert!(rejection["id"].is_null());
    assert_eq!(rejection["error"]["code"], -32006);
    assert_eq!(rejection["error"]["message"], "session_limit");
    match second.next_frame().await {
        Some(Message::Close(Some(frame))) => assert_eq!(u16::from(frame.code), 1008),
        other => panic!("expected policy close, got {other:?}"),
    }

    // Closing the first session frees the slot.
    first.close().await;
    let mut admitted = None;
    for _ in 0..50 {
        if server.server.manager().session_count() == 0 {
            let (client, connected) = server.connect().await;
            admitted = Some((client, connected));
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let (_client, connected) = admitted.expect("slot freed after disconnect");
    assert_eq!(connected["method"], "connected");

    server.stop().await;
}

#[tokio::test]
async fn disconnect_cancels_running_execution() {
    let server = TestServer::start(test_config()).await;
    let (mut client, _) = server.connect().await;

    let response = client.execute(json!({"command": "sleep 30"})).await;
    let pgid = response["result"]["pid"].as_i64().unwrap();
    assert_eq!(server.server.manager().execution_count(), 1);
    client.close().await;

    assert!(wait_group_gone(pgid, Duration::from_secs(3)).await);
    for _ in 0..50 {
        if server.server.manager().execution_count() == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(server.server.manager().execution_count(), 0);
    assert_eq!(server.server.manager().session_count(), 0);

    server.stop().await;
}

#[tokio::test]
async fn sessions_are_isolated() {
    let server = TestServer::start(test_config()).await;
    let (mut busy, _) = server.connect().await;
    let (mut other, _) = server.connect().await;

    busy.execute(json!({"command": "sleep 30"})).await;
    let response = other.execute(json!({"command": "echo free"})).await;
    assert!(response.get("result").is_some());
    let messages = other.collect_until_completed().await;
    assert_eq!(completed(&messages)["status"], "completed");

    // CANCEL on the idle session does not touch the other one.
    other.control("CANCEL").await;
    assert_eq!(server.server.manager().execution_count(), 1);

    busy.control("CANCEL").await;
    busy.collect_until_completed().await;
    server.stop().await;
}

#[tokio::test]
async fn health_reports_counts() {
    let server = TestServer::start(test_config()).await;
    let (status, body) = http_get(server.addr, "/health").await;
    assert_eq!(status, 200);
    let health: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["status"], "healthy");
    assert_eq!(health["active_sessions"], 0);
    assert_eq!(health["max_sessions"], test_config().max_sessions);

    let (mut client, _) = server.connect().await;
    client.execute(json!({"command": "sleep 30"})).await;
    let (_, body) = http_get(server.addr, "/health").await;
    let health: Value = serde_json::from_str(&body).unwrap();
    assert_eq!(health["active_sessions"], 1);
    assert_eq!(health["active_executions"], 1);

    client.control("CANCEL").await;
    client.collect_until_completed().await;
    server.stop().await;
}

#[tokio::test]
async fn shutdown_completes_executions_then_closes() {
    let server = TestServer::start(test_config()).await;
    let (mut client, _) = server.connect().await;

    let response = client.execute(json!({"command": "sleep 30"})).await;
    let pgid = response["result"]["pid"].as_i64().unwrap();
    client.wait_for("process.started").await;

    let stopper = tokio::spawn(server.stop());
    let messages = client.collect_until_completed().await;
    let done = completed(&messages);
    assert_eq!(done["status"], "cancelled");
    assert_eq!(done["reason"], "shutdown");
    assert_eq!(done["partial"], true);

    match client.next_frame().await {
        Some(Message::Close(Some(frame))) => assert_eq!(u16::from(frame.code), 1001),
        other => panic!("expected going-away close, got {other:?}"),
    }
    stopper.await.unwrap();
    assert!(wait_group_gone(pgid, Duration::from_secs(1)).await);
}
