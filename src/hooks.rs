//! Pre/post execution hooks.
//!
//! A hook is an external executable. It receives a JSON document on
//! stdin describing the execution and may answer on stdout with
//! `{"decision": "allow"|"block", "reason": ..., "environment": {...}}`.
//! An empty reply means allow. Callers treat hook errors as allow.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use crate::config::HookConfig;
use crate::models::execution::{CancelReason, ExecutionState};
use crate::{AppError, Result};

/// Boxed future returned by [`ExecutionHooks`] methods.
pub type HookFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Lifecycle point a hook runs at.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum HookEvent {
    /// Before spawn; may amend the environment or block.
    PreExecute,
    /// After the terminal notification.
    PostExecute,
}

/// Summary of a finished execution passed to post hooks.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HookOutcome {
    /// Terminal state.
    pub status: ExecutionState,
    /// Exit code, when the process exited normally.
    pub exit_code: Option<i32>,
    /// Whether output was truncated.
    pub partial: bool,
    /// Cancellation reason for partial results.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<CancelReason>,
    /// Run time in seconds.
    pub duration: f64,
}

/// Document written to a hook's stdin.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct HookRequest {
    /// Lifecycle point.
    pub event: HookEvent,
    /// Session issuing the command.
    pub session_id: String,
    /// Execution, once one exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    /// Command text.
    pub command: String,
    /// Environment the child will receive on top of the server's own.
    pub environment: HashMap<String, String>,
    /// Terminal summary (post hooks only).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<HookOutcome>,
}

/// Hook verdict.
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HookDecision {
    /// Proceed.
    #[default]
    Allow,
    /// Reject the execute request.
    Block,
}

/// Reply parsed from a hook's stdout.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct HookReply {
    /// Verdict; defaults to allow.
    #[serde(default)]
    pub decision: HookDecision,
    /// Explanation for a block.
    #[serde(default)]
    pub reason: Option<String>,
    /// Replacement environment.
    #[serde(default)]
    pub environment: Option<HashMap<String, String>>,
}

impl HookReply {
    /// An unconditional allow.
    #[must_use]
    pub fn allow() -> Self {
        Self::default()
    }
}

/// Hooks invoked around every execution.
pub trait ExecutionHooks: Send + Sync {
    /// Called before spawn.
    fn pre_execute(&self, request: HookRequest) -> HookFuture<'_, HookReply>;

    /// Called after the terminal notification has been queued.
    fn post_execute(&self, request: HookRequest) -> HookFuture<'_, ()>;
}

/// Hooks that do nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopHooks;

impl ExecutionHooks for NoopHooks {
    fn pre_execute(&self, _request: HookRequest) -> HookFuture<'_, HookReply> {
        Box::pin(async { Ok(HookReply::allow()) })
    }

    fn post_execute(&self, _request: HookRequest) -> HookFuture<'_, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// Hooks backed by configured executables.
#[derive(Debug, Clone)]
pub struct CommandHooks {
    pre: Option<PathBuf>,
    post: Option<PathBuf>,
    timeout: Duration,
}

impl CommandHooks {
    /// Build from the `[hooks]` section.
    #[must_use]
    pub fn new(config: &HookConfig, timeout: Duration) -> Self {
        Self {
            pre: config.pre_execute.clone(),
            post: config.post_execute.clone(),
            timeout,
        }
    }

    /// Whether any hook executable is configured.
    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.pre.is_some() || self.post.is_some()
    }

    async fn invoke(&self, program: &Path, request: &HookRequest) -> Result<HookReply> {
        let payload = serde_json::to_vec(request)?;
        let mut child = Command::new(program)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| {
                AppError::Hook(format!("failed to run hook {}: {err}", program.display()))
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            // A hook that ignores stdin may close it early.
            if let Err(err) = stdin.write_all(&payload).await {
                debug!(%err, "hook closed stdin before reading the request");
            }
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_elapsed| {
                AppError::Hook(format!(
                    "hook {} timed out after {}s",
                    program.display(),
                    self.timeout.as_secs()
                ))
            })?
            .map_err(|err| AppError::Hook(format!("hook {} failed: {err}", program.display())))?;

        if !output.status.success() {
            return Err(AppError::Hook(format!(
                "hook {} exited with {}: {}",
                program.display(),
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.trim().is_empty() {
            return Ok(HookReply::allow());
        }
        serde_json::from_str(stdout.trim())
            .map_err(|err| AppError::Hook(format!("hook {} reply invalid: {err}", program.display())))
    }
}

impl ExecutionHooks for CommandHooks {
    fn pre_execute(&self, request: HookRequest) -> HookFuture<'_, HookReply> {
        Box::pin(async move {
            let Some(program) = self.pre.as_ref() else {
                return Ok(HookReply::allow());
            };
            let reply = self.invoke(program, &request).await?;
            info!(
                session_id = %request.session_id,
                decision = ?reply.decision,
                "pre-execute hook completed"
            );
            Ok(reply)
        })
    }

    fn post_execute(&self, request: HookRequest) -> HookFuture<'_, ()> {
        Box::pin(async move {
            let Some(program) = self.post.as_ref() else {
                return Ok(());
            };
            self.invoke(program, &request).await?;
            debug!(execution_id = ?request.execution_id, "post-execute hook completed");
            Ok(())
        })
    }
}
