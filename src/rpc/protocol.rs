//! JSON-RPC 2.0 wire types.
//!
//! Requests are `execute` and `control`; everything the server pushes
//! without being asked is a [`Notification`], a closed set of variants
//! serialised as `{"jsonrpc":"2.0","method":...,"params":{...}}`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::chunk::StreamKind;
use crate::models::execution::{CancelReason, CommandSpec, ControlAction, ExecutionState};
use crate::orchestrator::session_manager::ExecuteRequest;
use crate::{AppError, Result};

/// Protocol version string carried in every message.
pub const JSONRPC_VERSION: &str = "2.0";

/// Capabilities advertised in `connected` on every platform.
pub const BASE_CAPABILITIES: [&str; 3] = ["execute", "control", "stream"];

/// Capability added when PAUSE/RESUME is available.
pub const PAUSE_RESUME_CAPABILITY: &str = "pause_resume";

/// Inbound request envelope.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcRequest {
    /// Must be `"2.0"`.
    pub jsonrpc: String,
    /// Request id echoed in the response; absent ids are answered with null.
    #[serde(default)]
    pub id: Option<Value>,
    /// Method name.
    pub method: String,
    /// Method parameters.
    #[serde(default)]
    pub params: Value,
}

/// Parameters of `execute`.
#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteParams {
    /// Shell string or argv.
    pub command: CommandSpec,
    /// Total deadline in seconds; 0 disables it.
    #[serde(default)]
    pub timeout: Option<f64>,
    /// Heartbeat interval override in seconds.
    #[serde(default)]
    pub heartbeat_interval: Option<f64>,
    /// Stall threshold override in seconds.
    #[serde(default)]
    pub stall_timeout: Option<f64>,
}

impl ExecuteParams {
    /// Validate numeric fields and convert to an orchestrator request.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` for negative or non-finite durations
    /// and for zero intervals.
    pub fn into_request(self) -> Result<ExecuteRequest> {
        let timeout = self
            .timeout
            .map(|secs| seconds("timeout", secs, true))
            .transpose()?;
        let heartbeat_interval = self
            .heartbeat_interval
            .map(|secs| seconds("heartbeat_interval", secs, false))
            .transpose()?;
        let stall_timeout = self
            .stall_timeout
            .map(|secs| seconds("stall_timeout", secs, false))
            .transpose()?;
        Ok(ExecuteRequest {
            command: self.command,
            timeout,
            heartbeat_interval,
            stall_timeout,
        })
    }
}

fn seconds(field: &str, value: f64, allow_zero: bool) -> Result<Duration> {
    if !value.is_finite() || value < 0.0 || (!allow_zero && value <= 0.0) {
        return Err(AppError::Protocol(format!(
            "{field} must be a positive number of seconds"
        )));
    }
    Duration::try_from_secs_f64(value)
        .map_err(|err| AppError::Protocol(format!("{field} out of range: {err}")))
}

/// Parameters of `control`.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ControlParams {
    /// `PAUSE`, `RESUME` or `CANCEL`.
    #[serde(rename = "type")]
    pub action: ControlAction,
}

/// JSON-RPC error object.
///
/// `message` carries a stable machine-readable name; `data.detail` the
/// human-readable explanation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RpcErrorObject {
    /// Numeric code.
    pub code: i32,
    /// Stable error name.
    pub message: String,
    /// `{ "detail": ... }`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl RpcErrorObject {
    /// Malformed request.
    pub const INVALID_REQUEST: i32 = -32600;
    /// Unknown method.
    pub const METHOD_NOT_FOUND: i32 = -32601;
    /// Parameters did not decode.
    pub const INVALID_PARAMS: i32 = -32602;
    /// Unexpected server-side failure.
    pub const INTERNAL_ERROR: i32 = -32603;
    /// Session already has an active execution.
    pub const BUSY: i32 = -32001;
    /// Operation unavailable on this platform or disabled.
    pub const UNSUPPORTED_OPERATION: i32 = -32002;
    /// Control action invalid in the current state.
    pub const INVALID_STATE: i32 = -32003;
    /// The process could not be started.
    pub const SPAWN_FAILED: i32 = -32004;
    /// Allow-list or hook rejected the command.
    pub const COMMAND_NOT_ALLOWED: i32 = -32005;
    /// Server at its session limit.
    pub const SESSION_LIMIT: i32 = -32006;

    /// Build an error object.
    #[must_use]
    pub fn new(code: i32, name: &str, detail: impl Into<String>) -> Self {
        Self {
            code,
            message: name.to_owned(),
            data: Some(json!({ "detail": detail.into() })),
        }
    }

    /// `invalid_request` with `detail`.
    #[must_use]
    pub fn invalid_request(detail: impl Into<String>) -> Self {
        Self::new(Self::INVALID_REQUEST, "invalid_request", detail)
    }

    /// `method_not_found` for `method`.
    #[must_use]
    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            Self::METHOD_NOT_FOUND,
            "method_not_found",
            format!("unknown method '{method}'"),
        )
    }

    /// `invalid_params` with `detail`.
    #[must_use]
    pub fn invalid_params(detail: impl Into<String>) -> Self {
        Self::new(Self::INVALID_PARAMS, "invalid_params", detail)
    }
}

impl From<&AppError> for RpcErrorObject {
    fn from(err: &AppError) -> Self {
        let (code, name) = match err {
            AppError::Protocol(_) => (Self::INVALID_REQUEST, "invalid_request"),
            AppError::Busy(_) => (Self::BUSY, "busy"),
            AppError::InvalidState(_) => (Self::INVALID_STATE, "invalid_state"),
            AppError::Unsupported(_) => (Self::UNSUPPORTED_OPERATION, "unsupported_operation"),
            AppError::NotAllowed(_) => (Self::COMMAND_NOT_ALLOWED, "command_not_allowed"),
            AppError::Capacity(_) => (Self::SESSION_LIMIT, "session_limit"),
            AppError::Spawn(_) => (Self::SPAWN_FAILED, "spawn_failed"),
            AppError::Config(_)
            | AppError::Signal(_)
            | AppError::Hook(_)
            | AppError::Transport(_)
            | AppError::Io(_) => (Self::INTERNAL_ERROR, "internal_error"),
        };
        Self::new(code, name, err.to_string())
    }
}

/// Outbound response envelope.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct RpcResponse {
    /// Always `"2.0"`.
    pub jsonrpc: &'static str,
    /// Echo of the request id.
    pub id: Value,
    /// Success payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure payload.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    /// Successful response.
    #[must_use]
    pub fn success(id: Value, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: Some(result),
            error: None,
        }
    }

    /// Error response.
    #[must_use]
    pub fn failure(id: Value, error: RpcErrorObject) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION,
            id,
            result: None,
            error: Some(error),
        }
    }
}

/// Parameters of `process.completed`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletedParams {
    /// Finished execution.
    pub execution_id: String,
    /// Exit code; null when killed by a signal or never spawned.
    pub exit_code: Option<i32>,
    /// Seconds from creation to terminal state.
    pub duration: f64,
    /// Output truncated by timeout or cancellation.
    pub partial: bool,
    /// Terminal state.
    pub status: ExecutionState,
    /// Why the server cancelled, for partial results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<CancelReason>,
    /// Spawn or wait failure text.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Server-initiated notification.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "method", content = "params")]
pub enum Notification {
    /// First message on every accepted connection.
    #[serde(rename = "connected")]
    Connected {
        /// Session identifier.
        session_id: String,
        /// Supported features.
        capabilities: Vec<String>,
        /// Server version.
        version: String,
    },
    /// The process is running.
    #[serde(rename = "process.started")]
    ProcessStarted {
        /// Execution identifier.
        execution_id: String,
        /// OS process ID.
        pid: u32,
    },
    /// One output chunk.
    #[serde(rename = "process.output")]
    ProcessOutput {
        /// Execution identifier.
        execution_id: String,
        /// Source pipe.
        stream: StreamKind,
        /// Decoded text.
        data: String,
        /// Per-stream sequence number.
        seq: u64,
    },
    /// The single terminal notification of an execution.
    #[serde(rename = "process.completed")]
    ProcessCompleted(CompletedParams),
    /// PAUSE took effect.
    #[serde(rename = "process.paused")]
    ProcessPaused {
        /// Execution identifier.
        execution_id: String,
        /// OS process ID.
        pid: Option<u32>,
    },
    /// RESUME took effect.
    #[serde(rename = "process.resumed")]
    ProcessResumed {
        /// Execution identifier.
        execution_id: String,
        /// OS process ID.
        pid: Option<u32>,
    },
    /// Liveness signal during silence.
    #[serde(rename = "heartbeat")]
    Heartbeat {
        /// Execution identifier.
        execution_id: String,
        /// Seconds since start.
        elapsed_seconds: f64,
    },
    /// Prolonged silence report.
    #[serde(rename = "process.status")]
    ProcessStatus {
        /// Execution identifier.
        execution_id: String,
        /// Seconds since the last output.
        no_output_for: f64,
    },
    /// Token-limit marker seen in output.
    #[serde(rename = "error.token_limit_exceeded")]
    TokenLimitExceeded {
        /// Execution identifier.
        execution_id: String,
        /// Configured token limit.
        limit: u64,
        /// Output line containing the marker.
        message: String,
        /// Retry guidance.
        suggestion: String,
        /// Whether a retry can succeed.
        recoverable: bool,
        /// Stable classification.
        error_type: String,
    },
    /// Rate-limit marker seen in output.
    #[serde(rename = "error.rate_limit_exceeded")]
    RateLimitExceeded {
        /// Execution identifier.
        execution_id: String,
        /// Output line containing the marker.
        message: String,
        /// Whether a retry can succeed.
        recoverable: bool,
        /// Stable classification.
        error_type: String,
    },
}

impl Notification {
    /// JSON-RPC method name.
    #[must_use]
    pub fn method(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::ProcessStarted { .. } => "process.started",
            Self::ProcessOutput { .. } => "process.output",
            Self::ProcessCompleted(_) => "process.completed",
            Self::ProcessPaused { .. } => "process.paused",
            Self::ProcessResumed { .. } => "process.resumed",
            Self::Heartbeat { .. } => "heartbeat",
            Self::ProcessStatus { .. } => "process.status",
            Self::TokenLimitExceeded { .. } => "error.token_limit_exceeded",
            Self::RateLimitExceeded { .. } => "error.rate_limit_exceeded",
        }
    }

    /// Serialise with the JSON-RPC envelope.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` if serialisation fails.
    pub fn to_json(&self) -> Result<String> {
        #[derive(Serialize)]
        struct Envelope<'a> {
            jsonrpc: &'static str,
            #[serde(flatten)]
            notification: &'a Notification,
        }
        Ok(serde_json::to_string(&Envelope {
            jsonrpc: JSONRPC_VERSION,
            notification: self,
        })?)
    }
}

/// `GET /health` body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct HealthStatus {
    /// Always `"healthy"` while serving.
    pub status: String,
    /// Server version.
    pub version: String,
    /// Connected sessions.
    pub active_sessions: usize,
    /// Session limit.
    pub max_sessions: u32,
    /// Non-terminal executions.
    pub active_executions: usize,
    /// Seconds since the server started.
    pub uptime_seconds: u64,
}
