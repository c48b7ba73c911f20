//! Execution lifecycle model: states, control actions and outcomes.
//!
//! ```text
//! STARTING → RUNNING ⇄ PAUSED → { CANCELLING → CANCELLED | TIMED_OUT
//!                                | COMPLETED | FAILED }
//! ```

use serde::{Deserialize, Serialize};

use crate::{AppError, Result};

/// Lifecycle state of a single execution.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Accepted; process not yet spawned.
    Starting,
    /// Process running and streaming.
    Running,
    /// Process group suspended with SIGSTOP.
    Paused,
    /// Termination requested; waiting for the process to exit.
    Cancelling,
    /// Terminated on request (user, disconnect, shutdown, provider limit).
    Cancelled,
    /// Exited on its own with status zero.
    Completed,
    /// Spawn failure, wait failure, or non-zero exit.
    Failed,
    /// Terminated because the total deadline elapsed.
    TimedOut,
}

impl ExecutionState {
    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Cancelled | Self::Completed | Self::Failed | Self::TimedOut
        )
    }

    /// Stable wire name.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Cancelling => "cancelling",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
        }
    }

    /// Determine whether a lifecycle transition is permitted.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Starting, Self::Running | Self::Cancelling | Self::Failed)
                | (Self::Running, Self::Paused)
                | (Self::Paused, Self::Running)
                | (
                    Self::Running | Self::Paused,
                    Self::Cancelling | Self::Completed | Self::Failed
                )
                | (
                    Self::Cancelling,
                    Self::Cancelled | Self::TimedOut | Self::Completed | Self::Failed
                )
        )
    }

    /// Resolve a control action against this state.
    ///
    /// Returns `Ok(Some(next))` when the action causes a transition and
    /// `Ok(None)` when it is an idempotent no-op (CANCEL on an execution
    /// that is already cancelling or terminal).
    ///
    /// # Errors
    ///
    /// Returns `AppError::InvalidState` when PAUSE is issued outside
    /// `Running` or RESUME outside `Paused`.
    pub fn on_control(self, action: ControlAction) -> Result<Option<Self>> {
        match (action, self) {
            (ControlAction::Cancel, state) if state.is_terminal() => Ok(None),
            (ControlAction::Cancel, Self::Cancelling) => Ok(None),
            (ControlAction::Cancel, _) => Ok(Some(Self::Cancelling)),
            (ControlAction::Pause, Self::Running) => Ok(Some(Self::Paused)),
            (ControlAction::Resume, Self::Paused) => Ok(Some(Self::Running)),
            (action, state) => Err(AppError::InvalidState(format!(
                "{} not accepted while {}",
                action.as_str(),
                state.as_str()
            ))),
        }
    }
}

/// Client-issued control command.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ControlAction {
    /// Suspend the process group.
    Pause,
    /// Continue a suspended process group.
    Resume,
    /// Terminate the process group.
    Cancel,
}

impl ControlAction {
    /// Wire name (`PAUSE`, `RESUME`, `CANCEL`).
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pause => "PAUSE",
            Self::Resume => "RESUME",
            Self::Cancel => "CANCEL",
        }
    }
}

/// Why an execution was cancelled by the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Client sent CANCEL.
    User,
    /// Total deadline elapsed.
    Timeout,
    /// Connection closed with the execution still live.
    Disconnect,
    /// Server shutting down.
    Shutdown,
    /// A provider limit marker was detected and cancel-on-detect is set.
    ProviderLimit,
}

/// Command to execute: a shell string or an explicit argv.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(untagged)]
pub enum CommandSpec {
    /// Run through `<shell> -c`.
    Shell(String),
    /// Executed directly; `argv[0]` is the program.
    Argv(Vec<String>),
}

impl CommandSpec {
    /// Reject empty commands.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` for an empty string or argv.
    pub fn validate(&self) -> Result<()> {
        let empty = match self {
            Self::Shell(cmd) => cmd.trim().is_empty(),
            Self::Argv(argv) => argv.first().map_or(true, |p| p.trim().is_empty()),
        };
        if empty {
            Err(AppError::Protocol("command must not be empty".into()))
        } else {
            Ok(())
        }
    }

    /// Name of the program that will run, used by the allow-list.
    ///
    /// For shell strings this is the basename of the first word.
    #[must_use]
    pub fn program_name(&self) -> Option<&str> {
        let first = match self {
            Self::Shell(cmd) => cmd.split_whitespace().next(),
            Self::Argv(argv) => argv.first().map(String::as_str),
        }?;
        first.rsplit('/').next()
    }

    /// Human-readable form for logs, hooks and timeout classification.
    #[must_use]
    pub fn display(&self) -> String {
        match self {
            Self::Shell(cmd) => cmd.clone(),
            Self::Argv(argv) => argv.join(" "),
        }
    }
}

/// How an execution ended.
///
/// A timeout or cancellation is always `Partial`, never represented as
/// a clean completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Exited on its own with status zero; output is complete.
    Complete,
    /// Terminated by the server; output is truncated.
    Partial {
        /// Exit code if the process exited rather than died by signal.
        exit_code: Option<i32>,
        /// Why the server terminated it.
        reason: CancelReason,
    },
    /// Spawn failure, wait failure, or non-zero exit.
    Failed {
        /// Exit code if one was reported.
        exit_code: Option<i32>,
        /// Error text for spawn or wait failures.
        error: Option<String>,
    },
}

impl ExecutionOutcome {
    /// Terminal state this outcome maps to.
    #[must_use]
    pub fn terminal_state(&self) -> ExecutionState {
        match self {
            Self::Complete => ExecutionState::Completed,
            Self::Partial {
                reason: CancelReason::Timeout,
                ..
            } => ExecutionState::TimedOut,
            Self::Partial { .. } => ExecutionState::Cancelled,
            Self::Failed { .. } => ExecutionState::Failed,
        }
    }

    /// Exit code to report on the wire.
    #[must_use]
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Self::Complete => Some(0),
            Self::Partial { exit_code, .. } | Self::Failed { exit_code, .. } => *exit_code,
        }
    }

    /// Whether the captured output is truncated.
    #[must_use]
    pub fn is_partial(&self) -> bool {
        matches!(self, Self::Partial { .. })
    }

    /// Cancellation reason, for partial outcomes.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        match self {
            Self::Partial { reason, .. } => Some(*reason),
            _ => None,
        }
    }

    /// Error text, for failures that never produced an exit status.
    #[must_use]
    pub fn error(&self) -> Option<&str> {
        match self {
            Self::Failed { error, .. } => error.as_deref(),
            _ => None,
        }
    }
}
