//! PAUSE, RESUME and CANCEL.

use std::time::{Duration, Instant};

use serde_json::json;

use super::test_helpers::{
    completed, methods, stream_text, test_config, wait_group_gone, TestServer,
};

#[tokio::test]
async fn cancel_kills_whole_group_within_grace() {
    let server = TestServer::start(test_config()).await;
    let (mut client, _) = server.connect().await;

    let response = client
        .execute(json!({"command": "sleep 30 & sleep 30 & echo ready; wait"}))
        .await;
    let pgid = response["result"]["pid"].as_i64().unwrap();
    let (output, _) = client.wait_for("process.output").await;
    assert_eq!(output["params"]["data"], "ready\n");

    let started = Instant::now();
    let ack = client.control("CANCEL").await;
    assert_eq!(ack["result"]["acknowledged"], true);
    assert_eq!(ack["result"]["execution_id"], response["result"]["execution_id"]);

    let messages = client.collect_until_completed().await;
    let done = completed(&messages);
    assert_eq!(done["status"], "cancelled");
    assert_eq!(done["reason"], "user");
    assert_eq!(done["partial"], true);
    // grace period (500ms) plus scheduling margin
    assert!(started.elapsed() < Duration::from_millis(2500));
    assert!(wait_group_gone(pgid, Duration::from_millis(500)).await);

    server.stop().await;
}

#[tokio::test]
async fn cancel_escalates_when_sigterm_is_ignored() {
    let server = TestServer::start(test_config()).await;
    let (mut client, _) = server.connect().await;

    let response = client
        .execute(json!({"command": "trap '' TERM; echo armed; while :; do sleep 0.05; done"}))
        .await;
    let pgid = response["result"]["pid"].as_i64().unwrap();
    client.wait_for("process.output").await;

    let started = Instant::now();
    client.control("CANCEL").await;
    let messages = client.collect_until_completed().await;
    assert_eq!(completed(&messages)["status"], "cancelled");
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert!(started.elapsed() < Duration::from_secs(3));
    assert!(wait_group_gone(pgid, Duration::from_millis(500)).await);

    server.stop().await;
}

#[tokio::test]
async fn repeated_cancel_yields_one_completion() {
    let server = TestServer::start(test_config()).await;
    let (mut client, _) = server.connect().await;

    client.execute(json!({"command": "sleep 30"})).await;
    let first = client.control("CANCEL").await;
    let second = client.control("CANCEL").await;
    assert_eq!(first["result"]["acknowledged"], true);
    assert_eq!(second["result"]["acknowledged"], true);

    let messages = client.collect_until_completed().await;
    assert_eq!(completed(&messages)["status"], "cancelled");

    // Nothing else follows; a fresh execute proves the session is idle.
    let next = client.execute(json!({"command": "echo again"})).await;
    assert!(next.get("result").is_some());
    let after = client.collect_until_completed().await;
    assert_eq!(
        methods(&after)
            .iter()
            .filter(|m| *m == "process.completed")
            .count(),
        1
    );

    server.stop().await;
}

#[tokio::test]
async fn cancel_without_execution_is_acknowledged() {
    let server = TestServer::start(test_config()).await;
    let (mut client, _) = server.connect().await;

    let ack = client.control("CANCEL").await;
    assert_eq!(ack["result"]["acknowledged"], true);
    assert!(ack["result"].get("execution_id").is_none());

    server.stop().await;
}

#[tokio::test]
async fn pause_without_execution_is_invalid_state() {
    let server = TestServer::start(test_config()).await;
    let (mut client, _) = server.connect().await;

    let response = client.control("PAUSE").await;
    assert_eq!(response["error"]["code"], -32003);
    assert_eq!(response["error"]["message"], "invalid_state");

    server.stop().await;
}

#[tokio::test]
async fn unknown_control_type_is_invalid_params() {
    let server = TestServer::start(test_config()).await;
    let (mut client, _) = server.connect().await;

    let response = client.control("STOP").await;
    assert_eq!(response["error"]["code"], -32602);

    server.stop().await;
}

#[tokio::test]
async fn disabled_pause_resume_is_unsupported() {
    let mut config = test_config();
    config.pause_resume = false;
    let server = TestServer::start(config).await;
    let (mut client, connected) = server.connect().await;
    assert!(!connected["params"]["capabilities"]
        .as_array()
        .unwrap()
        .contains(&json!("pause_resume")));

    client.execute(json!({"command": "sleep 30"})).await;
    let response = client.control("PAUSE").await;
    assert_eq!(response["error"]["code"], -32002);
    assert_eq!(response["error"]["message"], "unsupported_operation");

    client.control("CANCEL").await;
    client.collect_until_completed().await;
    server.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn pause_and_resume_preserve_output_order() {
    let server = TestServer::start(test_config()).await;
    let (mut client, _) = server.connect().await;

    let script = "i=0; while [ $i -lt 20 ]; do echo n$i; i=$((i+1)); sleep 0.05; done";
    let response = client
        .execute(json!({"command": script, "heartbeat_interval": 0.2}))
        .await;
    client.wait_for("process.output").await;

    let paused = client.control("PAUSE").await;
    assert_eq!(paused["result"]["state"], "paused");
    let (notice, _) = client.wait_for("process.paused").await;
    assert_eq!(notice["params"]["pid"], response["result"]["pid"]);

    // Second PAUSE is rejected while paused.
    let again = client.control("PAUSE").await;
    assert_eq!(again["error"]["code"], -32003);

    tokio::time::sleep(Duration::from_millis(600)).await;
    let resumed = client.control("RESUME").await;
    assert_eq!(resumed["result"]["state"], "running");

    let messages = client.collect_until_completed().await;
    let names = methods(&messages);
    assert!(names.contains(&"process.resumed".to_owned()));
    assert_eq!(completed(&messages)["status"], "completed");

    server.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn pause_resume_cycle_loses_no_output() {
    let server = TestServer::start(test_config()).await;
    let (mut client, _) = server.connect().await;

    let script = "i=0; while [ $i -lt 10 ]; do echo n$i; i=$((i+1)); sleep 0.05; done";
    client.execute(json!({"command": script})).await;
    let (first, _) = client.wait_for("process.output").await;
    client.control("PAUSE").await;
    let (_, before_pause) = client.wait_for("process.paused").await;

    tokio::time::sleep(Duration::from_millis(300)).await;
    let resumed = client.control("RESUME").await;
    assert!(resumed.get("result").is_some());

    let mut messages = vec![first];
    messages.extend(before_pause);
    messages.extend(client.collect_until_completed().await);
    let expected: String = (0..10).map(|i| format!("n{i}\n")).collect();
    assert_eq!(stream_text(&messages, "stdout"), expected);

    server.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn nothing_follows_completed_under_congestion() {
    let mut config = test_config();
    config.streams.outbound_buffer = 1;
    let server = TestServer::start(config).await;
    let (mut client, _) = server.connect().await;

    let script = "i=0; while [ $i -lt 400 ]; do echo line$i; i=$((i+1)); done";
    let response = client.execute(json!({"command": script})).await;
    let execution_id = response["result"]["execution_id"].clone();

    // Pipeline control requests while output saturates the queue.
    for (id, action) in (1000..1040).zip(["PAUSE", "RESUME"].iter().cycle()) {
        let request = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "control",
            "params": {"type": action}
        });
        client.send_text(request.to_string()).await;
    }
    let messages = client.collect_until_completed().await;
    let expected: String = (0..400).map(|i| format!("line{i}\n")).collect();
    assert_eq!(stream_text(&messages, "stdout"), expected);

    // A follow-up execution flushes anything still queued for the first.
    client.execute(json!({"command": "echo next"})).await;
    let after = client.collect_until_completed().await;
    let stray: Vec<_> = after
        .iter()
        .filter(|m| m["params"]["execution_id"] == execution_id)
        .collect();
    assert!(stray.is_empty(), "messages after process.completed: {stray:?}");

    server.stop().await;
}

#[cfg(unix)]
#[tokio::test]
async fn cancel_while_paused_terminates() {
    let server = TestServer::start(test_config()).await;
    let (mut client, _) = server.connect().await;

    let response = client.execute(json!({"command": "sleep 30"})).await;
    let pgid = response["result"]["pid"].as_i64().unwrap();
    client.control("PAUSE").await;
    client.wait_for("process.paused").await;

    let started = Instant::now();
    client.control("CANCEL").await;
    let messages = client.collect_until_completed().await;
    assert_eq!(completed(&messages)["status"], "cancelled");
    assert!(started.elapsed() < Duration::from_secs(2));
    assert!(wait_group_gone(pgid, Duration::from_millis(500)).await);

    server.stop().await;
}
