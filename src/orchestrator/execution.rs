//! Live execution handle shared by the session, the registry and the runner.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::stall_detector::StallControl;
use crate::models::execution::{
    CancelReason, CommandSpec, ControlAction, ExecutionOutcome, ExecutionState,
};
use crate::process::signals;
use crate::Result;

#[derive(Debug)]
struct Inner {
    state: ExecutionState,
    cancel_reason: Option<CancelReason>,
    pid: Option<u32>,
    pgid: Option<i32>,
    exit_code: Option<i32>,
}

/// One spawned command and its lifecycle state.
///
/// State changes and the signals that accompany them happen under one
/// lock, so a PAUSE can never interleave with a CANCEL half-way.
#[derive(Debug)]
pub struct Execution {
    /// Unique execution identifier.
    pub id: String,
    /// Owning session.
    pub session_id: String,
    /// Command as submitted.
    pub command: CommandSpec,
    /// Wall-clock creation time.
    pub created_at: DateTime<Utc>,
    started_at: Instant,
    inner: Mutex<Inner>,
    cancel: CancellationToken,
    stall: StallControl,
    notices_tx: mpsc::UnboundedSender<ControlAction>,
    notices_rx: Mutex<Option<mpsc::UnboundedReceiver<ControlAction>>>,
}

impl Execution {
    /// Create an execution in `Starting`.
    #[must_use]
    pub fn new(session_id: String, command: CommandSpec) -> Self {
        let (notices_tx, notices_rx) = mpsc::unbounded_channel();
        Self {
            id: Uuid::new_v4().to_string(),
            session_id,
            command,
            created_at: Utc::now(),
            started_at: Instant::now(),
            inner: Mutex::new(Inner {
                state: ExecutionState::Starting,
                cancel_reason: None,
                pid: None,
                pgid: None,
                exit_code: None,
            }),
            cancel: CancellationToken::new(),
            stall: StallControl::new(),
            notices_tx,
            notices_rx: Mutex::new(Some(notices_rx)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ExecutionState {
        self.lock().state
    }

    /// OS process ID once spawned.
    #[must_use]
    pub fn pid(&self) -> Option<u32> {
        self.lock().pid
    }

    /// Exit code recorded at the terminal transition.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        self.lock().exit_code
    }

    /// Why cancellation was requested, if it was.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        self.lock().cancel_reason
    }

    /// Time since the execution was created.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    /// Token cancelled when termination is requested.
    #[must_use]
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Activity flags shared with the stall detector.
    #[must_use]
    pub fn stall_control(&self) -> StallControl {
        self.stall.clone()
    }

    /// Record the spawned process and move `Starting` to `Running`.
    ///
    /// A cancel that arrived while spawning keeps the execution in
    /// `Cancelling`; the runner observes the token and terminates.
    pub fn mark_started(&self, pid: u32, pgid: Option<i32>) {
        let mut inner = self.lock();
        inner.pid = Some(pid);
        inner.pgid = pgid;
        if inner.state == ExecutionState::Starting {
            inner.state = ExecutionState::Running;
        }
    }

    /// Record an output chunk.
    pub fn touch(&self) {
        self.stall.reset();
    }

    /// Queue the client notice for an applied PAUSE or RESUME.
    ///
    /// The runner emits queued notices, so they can never follow
    /// `process.completed`. Once the runner has closed the queue the
    /// notice is dropped.
    pub fn announce(&self, action: ControlAction) {
        if self.notices_tx.send(action).is_err() {
            debug!(
                execution_id = %self.id,
                action = action.as_str(),
                "execution finished, control notice dropped"
            );
        }
    }

    /// Take the receiving end of the control notice queue.
    ///
    /// Returns `None` after the first call.
    #[must_use]
    pub fn take_notices(&self) -> Option<mpsc::UnboundedReceiver<ControlAction>> {
        self.notices_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Apply a client control action.
    ///
    /// Returns `Ok(false)` for an idempotent no-op (CANCEL while already
    /// cancelling or terminal).
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` when the action is not accepted in
    /// the current state, and the signal error when SIGSTOP/SIGCONT
    /// delivery fails (the state is left unchanged).
    pub fn control(&self, action: ControlAction) -> Result<bool> {
        let mut inner = self.lock();
        let Some(next) = inner.state.on_control(action)? else {
            return Ok(false);
        };
        match next {
            ExecutionState::Paused => {
                signals::suspend(inner.pgid)?;
                inner.state = next;
                self.stall.pause();
            }
            ExecutionState::Running => {
                signals::resume(inner.pgid)?;
                inner.state = next;
                self.stall.resume();
            }
            _ => {
                inner.state = ExecutionState::Cancelling;
                inner.cancel_reason.get_or_insert(CancelReason::User);
                self.cancel.cancel();
            }
        }
        info!(
            execution_id = %self.id,
            action = action.as_str(),
            state = inner.state.as_str(),
            "control applied"
        );
        Ok(true)
    }

    /// Request termination for a server-side `reason`.
    ///
    /// Returns `false` if the execution is already cancelling or terminal.
    pub fn request_cancel(&self, reason: CancelReason) -> bool {
        let mut inner = self.lock();
        if inner.state.is_terminal() || inner.state == ExecutionState::Cancelling {
            return false;
        }
        inner.state = ExecutionState::Cancelling;
        inner.cancel_reason = Some(reason);
        drop(inner);
        info!(execution_id = %self.id, ?reason, "cancellation requested");
        self.cancel.cancel();
        true
    }

    /// Enter the terminal state for `outcome`.
    pub fn finish(&self, outcome: &ExecutionOutcome) {
        let next = outcome.terminal_state();
        let mut inner = self.lock();
        if !inner.state.can_transition_to(next) {
            warn!(
                execution_id = %self.id,
                from = inner.state.as_str(),
                to = next.as_str(),
                "forcing terminal transition"
            );
        }
        inner.state = next;
        inner.exit_code = outcome.exit_code();
    }
}
