//! One WebSocket connection: session setup, request dispatch, teardown.
//!
//! Requests are handled in arrival order on the connection task; output
//! produced by runners reaches the socket through the shared outbound
//! queue and a dedicated writer task.

use std::sync::Arc;

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::outbound::{NotificationSink, Outbound};
use super::protocol::{
    ControlParams, ExecuteParams, Notification, RpcErrorObject, RpcRequest, RpcResponse,
    BASE_CAPABILITIES, JSONRPC_VERSION, PAUSE_RESUME_CAPABILITY,
};
use crate::models::execution::ControlAction;
use crate::models::session::Session;
use crate::orchestrator::runner::completed_notification;
use crate::orchestrator::session_manager::{Launch, SessionManager};
use crate::AppError;

/// Serve one upgraded socket until the client leaves or `shutdown` fires.
pub async fn serve_connection(
    socket: WebSocket,
    peer: Option<String>,
    manager: Arc<SessionManager>,
    shutdown: CancellationToken,
) {
    let (ws_tx, mut ws_rx) = socket.split();
    let (out_tx, out_rx) = mpsc::channel(manager.config().streams.outbound_buffer);
    let writer = tokio::spawn(write_loop(ws_tx, out_rx));
    let sink = NotificationSink::new(out_tx);

    let session = match manager.open_session(peer) {
        Ok(session) => session,
        Err(err) => {
            sink.respond(RpcResponse::failure(Value::Null, (&err).into()))
                .await;
            sink.close(close_code::POLICY, "session limit reached").await;
            drop(sink);
            let _ = writer.await;
            return;
        }
    };

    sink.notify(Notification::Connected {
        session_id: session.id.clone(),
        capabilities: capabilities(&manager),
        version: env!("CARGO_PKG_VERSION").to_owned(),
    })
    .await;

    loop {
        let message = tokio::select! {
            () = shutdown.cancelled() => {
                sink.close(close_code::AWAY, "server shutting down").await;
                break;
            }
            message = ws_rx.next() => message,
        };
        match message {
            Some(Ok(Message::Text(text))) => {
                handle_text(&manager, &session, &sink, text.as_str()).await;
            }
            Some(Ok(Message::Binary(_))) => {
                sink.respond(RpcResponse::failure(
                    Value::Null,
                    RpcErrorObject::invalid_request("binary frames are not supported"),
                ))
                .await;
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(err)) => {
                debug!(session_id = %session.id, %err, "websocket receive failed");
                break;
            }
        }
    }

    manager.close_session(&session.id);
    drop(sink);
    // The writer keeps flushing until every runner holding a sink is done.
    let _ = writer.await;
    info!(session_id = %session.id, "connection closed");
}

fn capabilities(manager: &SessionManager) -> Vec<String> {
    let mut capabilities: Vec<String> = BASE_CAPABILITIES.iter().map(|c| (*c).to_owned()).collect();
    if manager.config().pause_resume_supported() {
        capabilities.push(PAUSE_RESUME_CAPABILITY.to_owned());
    }
    capabilities
}

async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<Outbound>,
) {
    while let Some(outbound) = out_rx.recv().await {
        let message = match outbound {
            Outbound::Close { code, reason } => {
                let frame = CloseFrame {
                    code,
                    reason: reason.into(),
                };
                let _ = ws_tx.send(Message::Close(Some(frame))).await;
                break;
            }
            other => match other.to_json() {
                Ok(Some(text)) => Message::Text(text.into()),
                Ok(None) => continue,
                Err(err) => {
                    warn!(kind = other.label(), %err, "failed to serialise outbound message");
                    continue;
                }
            },
        };
        if let Err(err) = ws_tx.send(message).await {
            debug!(%err, "websocket send failed, stopping writer");
            break;
        }
    }
}

async fn handle_text(
    manager: &Arc<SessionManager>,
    session: &Arc<Session>,
    sink: &NotificationSink,
    text: &str,
) {
    let request: RpcRequest = match serde_json::from_str(text) {
        Ok(request) => request,
        Err(err) => {
            sink.respond(RpcResponse::failure(
                Value::Null,
                RpcErrorObject::invalid_request(format!("malformed request: {err}")),
            ))
            .await;
            return;
        }
    };
    let id = request.id.clone().unwrap_or(Value::Null);
    if request.jsonrpc != JSONRPC_VERSION {
        sink.respond(RpcResponse::failure(
            id,
            RpcErrorObject::invalid_request(format!(
                "unsupported jsonrpc version '{}'",
                request.jsonrpc
            )),
        ))
        .await;
        return;
    }

    match request.method.as_str() {
        "execute" => handle_execute(manager, session, sink, id, request.params).await,
        "control" => handle_control(manager, session, sink, id, request.params).await,
        other => {
            sink.respond(RpcResponse::failure(id, RpcErrorObject::method_not_found(other)))
                .await;
        }
    }
}

async fn handle_execute(
    manager: &Arc<SessionManager>,
    session: &Arc<Session>,
    sink: &NotificationSink,
    id: Value,
    params: Value,
) {
    let decoded = serde_json::from_value::<ExecuteParams>(params)
        .map_err(AppError::from)
        .and_then(ExecuteParams::into_request);
    let request = match decoded {
        Ok(request) => request,
        Err(err) => {
            sink.respond(RpcResponse::failure(
                id,
                RpcErrorObject::invalid_params(err.to_string()),
            ))
            .await;
            return;
        }
    };

    match manager.execute(session, request).await {
        Ok(Launch::Started(pending)) => {
            let result = json!({
                "pid": pending.pid(),
                "session_id": session.id,
                "execution_id": pending.execution().id,
            });
            sink.respond(RpcResponse::success(id, result)).await;
            pending.start(sink.clone()).await;
        }
        Ok(Launch::SpawnFailed {
            execution,
            outcome,
            error,
        }) => {
            sink.respond(RpcResponse::failure(id, (&error).into())).await;
            sink.notify(completed_notification(&execution, &outcome))
                .await;
        }
        Err(err) => {
            debug!(session_id = %session.id, %err, "execute rejected");
            sink.respond(RpcResponse::failure(id, (&err).into())).await;
        }
    }
}

async fn handle_control(
    manager: &SessionManager,
    session: &Session,
    sink: &NotificationSink,
    id: Value,
    params: Value,
) {
    let action = match serde_json::from_value::<ControlParams>(params) {
        Ok(params) => params.action,
        Err(err) => {
            sink.respond(RpcResponse::failure(
                id,
                RpcErrorObject::invalid_params(err.to_string()),
            ))
            .await;
            return;
        }
    };

    let ack = match manager.control(session, action) {
        Ok(ack) => ack,
        Err(err) => {
            debug!(session_id = %session.id, action = action.as_str(), %err, "control rejected");
            sink.respond(RpcResponse::failure(id, (&err).into())).await;
            return;
        }
    };

    let mut result = json!({ "acknowledged": true });
    if let Some(execution) = &ack.execution {
        result["execution_id"] = json!(execution.id);
        result["state"] = json!(execution.state());
    }
    sink.respond(RpcResponse::success(id, result)).await;

    // The runner emits the matching process.paused/process.resumed.
    if let Some(execution) = ack
        .execution
        .filter(|_| ack.changed && action != ControlAction::Cancel)
    {
        execution.announce(action);
    }
}
