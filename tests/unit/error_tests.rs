//! Display format of `AppError` and its JSON-RPC error mapping.

use shellwire::rpc::protocol::RpcErrorObject;
use shellwire::AppError;

#[test]
fn display_prefixes_kind() {
    assert_eq!(AppError::Busy("x".into()).to_string(), "busy: x");
    assert_eq!(
        AppError::InvalidState("PAUSE not accepted while paused".into()).to_string(),
        "invalid state: PAUSE not accepted while paused"
    );
    assert_eq!(AppError::Spawn("missing".into()).to_string(), "spawn: missing");
    assert_eq!(AppError::NotAllowed("rm".into()).to_string(), "not allowed: rm");
}

#[test]
fn error_messages_have_no_trailing_period() {
    let err = AppError::Transport("socket closed".into());
    assert!(!err.to_string().ends_with('.'));
}

#[test]
fn io_error_converts_to_io_variant() {
    let io = std::io::Error::new(std::io::ErrorKind::BrokenPipe, "pipe closed");
    let err: AppError = io.into();
    assert!(matches!(err, AppError::Io(ref msg) if msg.contains("pipe closed")));
}

#[test]
fn json_error_converts_to_protocol_variant() {
    let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
    let err: AppError = json_err.into();
    assert!(matches!(err, AppError::Protocol(_)));
}

fn rpc(err: &AppError) -> RpcErrorObject {
    err.into()
}

#[test]
fn protocol_errors_map_to_stable_names() {
    let cases = [
        (AppError::Protocol("bad".into()), -32600, "invalid_request"),
        (AppError::Busy("busy".into()), -32001, "busy"),
        (AppError::Unsupported("no".into()), -32002, "unsupported_operation"),
        (AppError::InvalidState("no".into()), -32003, "invalid_state"),
        (AppError::Spawn("no".into()), -32004, "spawn_failed"),
        (AppError::NotAllowed("no".into()), -32005, "command_not_allowed"),
        (AppError::Capacity("full".into()), -32006, "session_limit"),
    ];
    for (err, code, name) in cases {
        let object = rpc(&err);
        assert_eq!(object.code, code, "{err}");
        assert_eq!(object.message, name, "{err}");
    }
}

#[test]
fn internal_failures_map_to_internal_error() {
    for err in [
        AppError::Signal("x".into()),
        AppError::Io("x".into()),
        AppError::Hook("x".into()),
        AppError::Config("x".into()),
    ] {
        assert_eq!(rpc(&err).message, "internal_error");
        assert_eq!(rpc(&err).code, RpcErrorObject::INTERNAL_ERROR);
    }
}

#[test]
fn error_detail_carries_display_text() {
    let object = rpc(&AppError::Busy("execution abc is still running".into()));
    let detail = object.data.expect("data")["detail"].clone();
    assert_eq!(detail, "busy: execution abc is still running");
}
