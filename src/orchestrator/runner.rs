//! Execution runner: owns a spawned process from start to terminal state.
//!
//! ```text
//!   stdout drain ─┐
//!   stderr drain ─┼─► NotificationSink ─► writer task ─► WebSocket
//!   stall timer  ─┤
//!   runner loop  ─┘   (waits on exit | cancel | timer events)
//! ```
//!
//! Every path through [`run`] reaps the child, stops the timers, drains
//! both pipes and emits exactly one `process.completed`. PAUSE and RESUME
//! notices are emitted here too, so nothing follows the terminal one.

use std::collections::HashMap;
use std::process::ExitStatus;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::process::Child;
use tokio::sync::mpsc;
use tracing::{debug, info, info_span, warn, Instrument};

use super::execution::Execution;
use super::limit_detector::{LimitDetector, LimitHit, LimitKind};
use super::session_manager::SessionManager;
use super::stall_detector::{StallDetector, StallEvent};
use crate::hooks::{HookEvent, HookOutcome, HookRequest};
use crate::models::chunk::{OutputChunk, StreamKind};
use crate::models::execution::{CancelReason, ControlAction, ExecutionOutcome};
use crate::process::signals;
use crate::process::spawner::SpawnedProcess;
use crate::rpc::outbound::NotificationSink;
use crate::rpc::protocol::{CompletedParams, Notification};
use crate::stream::multiplexer::{ChunkHandler, HandlerFuture, StreamMultiplexer};
use crate::{AppError, Result};

const TOKEN_LIMIT_SUGGESTION: &str =
    "Reduce the requested output size or split the task into smaller steps, then retry.";

/// Effective per-execution timer and stream settings.
#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Heartbeat interval during silence.
    pub heartbeat_interval: Duration,
    /// Silence before `process.status` is reported.
    pub stall_threshold: Duration,
    /// Total deadline; `None` for unbounded.
    pub total_timeout: Option<Duration>,
    /// SIGTERM to SIGKILL grace period.
    pub grace_period: Duration,
    /// Bound on post-exit pipe draining.
    pub drain_timeout: Duration,
    /// Bytes per pipe read.
    pub chunk_size: usize,
    /// Limit reported in `error.token_limit_exceeded`.
    pub token_limit: u64,
    /// Cancel once a provider limit is detected.
    pub cancel_on_detect: bool,
}

/// A spawned execution whose runner has not started yet.
///
/// Returned by [`SessionManager::execute`] so the connection can send
/// the `execute` response before any notification of this execution.
pub struct PendingExecution {
    pub(super) execution: Arc<Execution>,
    pub(super) process: SpawnedProcess,
    pub(super) settings: RunSettings,
    pub(super) environment: HashMap<String, String>,
    pub(super) manager: Arc<SessionManager>,
}

impl PendingExecution {
    /// The execution being started.
    #[must_use]
    pub fn execution(&self) -> &Arc<Execution> {
        &self.execution
    }

    /// OS process ID.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.process.pid
    }

    /// Emit `process.started` and hand the process to a tracked runner task.
    pub async fn start(self, sink: NotificationSink) {
        sink.notify(Notification::ProcessStarted {
            execution_id: self.execution.id.clone(),
            pid: self.process.pid,
        })
        .await;

        let span = info_span!(
            "execution",
            execution_id = %self.execution.id,
            session_id = %self.execution.session_id,
            pid = self.process.pid
        );
        let tracker = self.manager.tracker().clone();
        tracker.spawn(run(self, sink).instrument(span));
    }
}

enum Exit {
    Natural(std::io::Result<ExitStatus>),
    Cancelled,
}

async fn run(pending: PendingExecution, sink: NotificationSink) {
    let PendingExecution {
        execution,
        process,
        settings,
        environment,
        manager,
    } = pending;
    let SpawnedProcess {
        mut child,
        pid,
        pgid,
        stdout,
        stderr,
    } = process;

    let forwarder = Arc::new(OutputForwarder {
        execution: Arc::clone(&execution),
        sink: sink.clone(),
        detector: Mutex::new(LimitDetector::new(Arc::clone(manager.limit_patterns()))),
        token_limit: settings.token_limit,
        cancel_on_detect: settings.cancel_on_detect,
    });
    let mut mux = StreamMultiplexer::new(execution.id.clone(), settings.chunk_size, forwarder);
    mux.attach(StreamKind::Stdout, stdout);
    mux.attach(StreamKind::Stderr, stderr);

    let (event_tx, mut event_rx) = mpsc::channel(16);
    let stall = StallDetector::new(
        execution.id.clone(),
        settings.heartbeat_interval,
        settings.stall_threshold,
        settings.total_timeout,
        execution.stall_control(),
        event_tx,
    )
    .spawn();
    let cancel = execution.cancel_token();
    let mut notices = execution
        .take_notices()
        .unwrap_or_else(|| mpsc::unbounded_channel().1);

    let exit = loop {
        tokio::select! {
            status = child.wait() => break Exit::Natural(status),
            () = cancel.cancelled() => break Exit::Cancelled,
            Some(event) = event_rx.recv() => on_stall_event(event, &execution, &sink).await,
            Some(action) = notices.recv() => on_control_notice(action, &execution, &sink).await,
        }
    };
    let (status, reason) = reap(exit, &mut child, pid, pgid, &execution, &settings).await;

    stall.await_completion().await;
    let drained = mux.finish(settings.drain_timeout).await;
    if drained.truncated {
        warn!("output drain aborted; a descendant kept a pipe open");
    }
    debug!(
        stdout_bytes = drained.stdout.bytes,
        stderr_bytes = drained.stderr.bytes,
        "streams drained"
    );

    // Later announcements are dropped; the terminal notice must be last.
    notices.close();
    while let Ok(action) = notices.try_recv() {
        on_control_notice(action, &execution, &sink).await;
    }

    let outcome = decide_outcome(status, reason);
    execution.finish(&outcome);
    manager.release(&execution);

    info!(
        status = outcome.terminal_state().as_str(),
        exit_code = ?outcome.exit_code(),
        partial = outcome.is_partial(),
        duration_secs = execution.elapsed().as_secs_f64(),
        "execution finished"
    );
    if !sink.notify(completed_notification(&execution, &outcome)).await {
        debug!("client gone before process.completed was queued");
    }

    run_post_hook(&manager, &execution, &outcome, environment).await;
}

async fn reap(
    exit: Exit,
    child: &mut Child,
    pid: u32,
    pgid: Option<i32>,
    execution: &Execution,
    settings: &RunSettings,
) -> (Result<ExitStatus>, Option<CancelReason>) {
    match exit {
        Exit::Natural(Ok(status)) => {
            // Descendants left behind by the leader would hold the pipes open.
            signals::kill_remaining(pgid);
            (Ok(status), None)
        }
        Exit::Natural(Err(err)) => {
            warn!(%err, "wait on child failed, terminating group");
            if let Err(term_err) = signals::terminate(child, pgid, settings.grace_period).await {
                warn!(%term_err, "terminating group after failed wait also failed");
            }
            (Err(AppError::Io(format!("wait failed: {err}"))), None)
        }
        Exit::Cancelled => {
            let reason = execution.cancel_reason().unwrap_or(CancelReason::User);
            info!(pid, ?reason, "terminating process group");
            let status = signals::terminate(child, pgid, settings.grace_period)
                .await
                .map(|termination| termination.status);
            (status, Some(reason))
        }
    }
}

async fn run_post_hook(
    manager: &SessionManager,
    execution: &Execution,
    outcome: &ExecutionOutcome,
    environment: HashMap<String, String>,
) {
    let request = HookRequest {
        event: HookEvent::PostExecute,
        session_id: execution.session_id.clone(),
        execution_id: Some(execution.id.clone()),
        command: execution.command.display(),
        environment,
        outcome: Some(HookOutcome {
            status: outcome.terminal_state(),
            exit_code: outcome.exit_code(),
            partial: outcome.is_partial(),
            reason: outcome.reason(),
            duration: execution.elapsed().as_secs_f64(),
        }),
    };
    if let Err(err) = manager.hooks().post_execute(request).await {
        warn!(%err, "post-execute hook failed");
    }
}

async fn on_control_notice(
    action: ControlAction,
    execution: &Execution,
    sink: &NotificationSink,
) {
    let execution_id = execution.id.clone();
    let pid = execution.pid();
    let notification = match action {
        ControlAction::Pause => Notification::ProcessPaused { execution_id, pid },
        ControlAction::Resume => Notification::ProcessResumed { execution_id, pid },
        ControlAction::Cancel => return,
    };
    sink.notify(notification).await;
}

async fn on_stall_event(event: StallEvent, execution: &Execution, sink: &NotificationSink) {
    match event {
        StallEvent::Heartbeat { elapsed } => {
            sink.notify(Notification::Heartbeat {
                execution_id: execution.id.clone(),
                elapsed_seconds: elapsed.as_secs_f64(),
            })
            .await;
        }
        StallEvent::Silent { no_output_for } => {
            sink.notify(Notification::ProcessStatus {
                execution_id: execution.id.clone(),
                no_output_for: no_output_for.as_secs_f64(),
            })
            .await;
        }
        StallEvent::DeadlineExceeded { elapsed } => {
            warn!(elapsed_secs = elapsed.as_secs_f64(), "total timeout reached");
            execution.request_cancel(CancelReason::Timeout);
        }
    }
}

/// Map the reaped status and cancellation reason to an outcome.
///
/// Any server-initiated termination is partial, whatever the exit code.
#[must_use]
pub fn decide_outcome(
    status: Result<ExitStatus>,
    reason: Option<CancelReason>,
) -> ExecutionOutcome {
    match (status, reason) {
        (Ok(status), Some(reason)) => ExecutionOutcome::Partial {
            exit_code: status.code(),
            reason,
        },
        (Err(err), Some(reason)) => {
            warn!(%err, "reap after cancellation failed");
            ExecutionOutcome::Partial {
                exit_code: None,
                reason,
            }
        }
        (Ok(status), None) if status.success() => ExecutionOutcome::Complete,
        (Ok(status), None) => ExecutionOutcome::Failed {
            exit_code: status.code(),
            error: None,
        },
        (Err(err), None) => ExecutionOutcome::Failed {
            exit_code: None,
            error: Some(err.to_string()),
        },
    }
}

/// Build the terminal notification for `execution`.
#[must_use]
pub fn completed_notification(execution: &Execution, outcome: &ExecutionOutcome) -> Notification {
    Notification::ProcessCompleted(CompletedParams {
        execution_id: execution.id.clone(),
        exit_code: outcome.exit_code(),
        duration: execution.elapsed().as_secs_f64(),
        partial: outcome.is_partial(),
        status: outcome.terminal_state(),
        reason: outcome.reason(),
        error: outcome.error().map(str::to_owned),
    })
}

/// Forwards chunks to the client and feeds activity and limit tracking.
struct OutputForwarder {
    execution: Arc<Execution>,
    sink: NotificationSink,
    detector: Mutex<LimitDetector>,
    token_limit: u64,
    cancel_on_detect: bool,
}

impl OutputForwarder {
    fn limit_notification(&self, hit: LimitHit) -> Notification {
        let execution_id = self.execution.id.clone();
        match hit.kind {
            LimitKind::Token => Notification::TokenLimitExceeded {
                execution_id,
                limit: self.token_limit,
                message: hit.message,
                suggestion: TOKEN_LIMIT_SUGGESTION.to_owned(),
                recoverable: true,
                error_type: "token_limit_exceeded".to_owned(),
            },
            LimitKind::Rate => Notification::RateLimitExceeded {
                execution_id,
                message: hit.message,
                recoverable: true,
                error_type: "rate_limit_exceeded".to_owned(),
            },
        }
    }
}

impl ChunkHandler for OutputForwarder {
    fn on_chunk(&self, chunk: OutputChunk) -> HandlerFuture<'_> {
        Box::pin(async move {
            self.execution.touch();
            let hits = self
                .detector
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .scan(chunk.stream, &chunk.data);

            // A closed sink means the client left; keep draining so the
            // child never blocks on a full pipe before it is terminated.
            self.sink
                .notify(Notification::ProcessOutput {
                    execution_id: chunk.execution_id,
                    stream: chunk.stream,
                    data: chunk.data,
                    seq: chunk.seq,
                })
                .await;

            for hit in hits {
                warn!(kind = ?hit.kind, message = %hit.message, "provider limit detected");
                let notification = self.limit_notification(hit);
                self.sink.notify(notification).await;
                if self.cancel_on_detect {
                    self.execution.request_cancel(CancelReason::ProviderLimit);
                }
            }
        })
    }
}
