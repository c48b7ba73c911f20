//! Provider-limit notifications.

use serde_json::json;

use super::test_helpers::{completed, methods, test_config, TestServer};

#[tokio::test]
async fn rate_limit_marker_is_reported_once() {
    let server = TestServer::start(test_config()).await;
    let (mut client, _) = server.connect().await;

    client
        .execute(json!({"command": "echo 'HTTP 429 Too Many Requests'; echo 'rate limit again' >&2"}))
        .await;
    let messages = client.collect_until_completed().await;
    let hits: Vec<_> = messages
        .iter()
        .filter(|m| m["method"] == "error.rate_limit_exceeded")
        .collect();
    assert_eq!(hits.len(), 1);
    let params = &hits[0]["params"];
    assert_eq!(params["message"], "HTTP 429 Too Many Requests");
    assert_eq!(params["recoverable"], true);
    assert_eq!(params["error_type"], "rate_limit_exceeded");

    // Detection alone does not stop the command.
    assert_eq!(completed(&messages)["status"], "completed");

    server.stop().await;
}

#[tokio::test]
async fn token_limit_notification_follows_its_output() {
    let mut config = test_config();
    config.limits.token_limit = 4096;
    let server = TestServer::start(config).await;
    let (mut client, _) = server.connect().await;

    client
        .execute(json!({"command": "echo 'error: output token maximum exceeded'"}))
        .await;
    let messages = client.collect_until_completed().await;
    let names = methods(&messages);
    let output = names.iter().position(|m| m == "process.output").unwrap();
    let limit = names
        .iter()
        .position(|m| m == "error.token_limit_exceeded")
        .unwrap();
    assert!(output < limit);

    let params = &messages[limit]["params"];
    assert_eq!(params["limit"], 4096);
    assert_eq!(params["error_type"], "token_limit_exceeded");
    assert!(params["suggestion"].as_str().is_some_and(|s| !s.is_empty()));

    server.stop().await;
}

#[tokio::test]
async fn cancel_on_detect_stops_execution() {
    let mut config = test_config();
    config.limits.cancel_on_detect = true;
    let server = TestServer::start(config).await;
    let (mut client, _) = server.connect().await;

    client
        .execute(json!({"command": "echo 'token limit reached'; sleep 30"}))
        .await;
    let messages = client.collect_until_completed().await;
    let done = completed(&messages);
    assert_eq!(done["status"], "cancelled");
    assert_eq!(done["reason"], "provider_limit");
    assert_eq!(done["partial"], true);

    server.stop().await;
}
