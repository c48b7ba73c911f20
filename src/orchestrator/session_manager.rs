//! Session and execution registries.
//!
//! The [`SessionManager`] owns the only globally shared state: the map
//! of connected sessions and the map of live executions. Each map sits
//! behind its own mutex; per-execution state lives in the execution's
//! own lock, so no registry lock is held across a signal or an await.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio_util::task::TaskTracker;
use tracing::{info, warn};

use super::execution::Execution;
use super::limit_detector::LimitPatterns;
use super::runner::{PendingExecution, RunSettings};
use crate::config::GlobalConfig;
use crate::hooks::{ExecutionHooks, HookDecision, HookEvent, HookRequest};
use crate::models::execution::{CancelReason, CommandSpec, ControlAction, ExecutionOutcome};
use crate::models::session::Session;
use crate::process::spawner;
use crate::timing::{resolve_timeout, TimeoutAdvisor};
use crate::{AppError, Result};

/// Validated `execute` request.
#[derive(Debug, Clone, PartialEq)]
pub struct ExecuteRequest {
    /// Command to run.
    pub command: CommandSpec,
    /// Requested total deadline; zero disables it.
    pub timeout: Option<Duration>,
    /// Heartbeat interval override.
    pub heartbeat_interval: Option<Duration>,
    /// Stall threshold override.
    pub stall_timeout: Option<Duration>,
}

impl ExecuteRequest {
    /// Request with server defaults for every timer.
    #[must_use]
    pub fn new(command: CommandSpec) -> Self {
        Self {
            command,
            timeout: None,
            heartbeat_interval: None,
            stall_timeout: None,
        }
    }
}

/// Result of [`SessionManager::execute`].
pub enum Launch {
    /// The process is running; call [`PendingExecution::start`] after
    /// responding.
    Started(PendingExecution),
    /// The process could not be spawned. The execution is already
    /// terminal and detached; the caller reports `error` and then the
    /// terminal notification for `outcome`.
    SpawnFailed {
        /// The failed execution.
        execution: Arc<Execution>,
        /// Its terminal outcome.
        outcome: ExecutionOutcome,
        /// The spawn error.
        error: AppError,
    },
}

/// Result of [`SessionManager::control`].
#[derive(Debug)]
pub struct ControlAck {
    /// Execution the action applied to, if the session had one.
    pub execution: Option<Arc<Execution>>,
    /// Whether the action changed state (false for idempotent CANCEL).
    pub changed: bool,
}

/// Shared registries plus the collaborators every execution needs.
pub struct SessionManager {
    config: Arc<GlobalConfig>,
    hooks: Arc<dyn ExecutionHooks>,
    advisor: Arc<dyn TimeoutAdvisor>,
    limits: Arc<LimitPatterns>,
    sessions: Mutex<HashMap<String, Arc<Session>>>,
    executions: Mutex<HashMap<String, Arc<Execution>>>,
    tracker: TaskTracker,
}

impl SessionManager {
    /// Build a manager.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the limit patterns fail to compile.
    pub fn new(
        config: Arc<GlobalConfig>,
        hooks: Arc<dyn ExecutionHooks>,
        advisor: Arc<dyn TimeoutAdvisor>,
    ) -> Result<Self> {
        Ok(Self {
            config,
            hooks,
            advisor,
            limits: Arc::new(LimitPatterns::new()?),
            sessions: Mutex::new(HashMap::new()),
            executions: Mutex::new(HashMap::new()),
            tracker: TaskTracker::new(),
        })
    }

    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Arc<Session>>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn executions(&self) -> MutexGuard<'_, HashMap<String, Arc<Execution>>> {
        self.executions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Server configuration.
    #[must_use]
    pub fn config(&self) -> &Arc<GlobalConfig> {
        &self.config
    }

    /// Configured hooks.
    #[must_use]
    pub fn hooks(&self) -> &Arc<dyn ExecutionHooks> {
        &self.hooks
    }

    /// Compiled provider-limit patterns.
    #[must_use]
    pub fn limit_patterns(&self) -> &Arc<LimitPatterns> {
        &self.limits
    }

    /// Tracker owning every runner task.
    #[must_use]
    pub fn tracker(&self) -> &TaskTracker {
        &self.tracker
    }

    /// Connected sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions().len()
    }

    /// Non-terminal executions.
    #[must_use]
    pub fn execution_count(&self) -> usize {
        self.executions().len()
    }

    /// Look up a live execution.
    #[must_use]
    pub fn execution(&self, execution_id: &str) -> Option<Arc<Execution>> {
        self.executions().get(execution_id).cloned()
    }

    /// Register a new session.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Capacity` at the `max_sessions` limit.
    pub fn open_session(&self, peer: Option<String>) -> Result<Arc<Session>> {
        let mut sessions = self.sessions();
        let limit = usize::try_from(self.config.max_sessions).unwrap_or(usize::MAX);
        if sessions.len() >= limit {
            warn!(?peer, limit, "session limit reached, rejecting connection");
            return Err(AppError::Capacity(format!(
                "maximum of {limit} sessions reached"
            )));
        }
        let session = Arc::new(Session::new(peer));
        sessions.insert(session.id.clone(), Arc::clone(&session));
        info!(session_id = %session.id, peer = ?session.peer, "session opened");
        Ok(session)
    }

    /// Remove a session, cancelling its active execution.
    pub fn close_session(&self, session_id: &str) {
        let removed = self.sessions().remove(session_id);
        let Some(session) = removed else {
            return;
        };
        if let Some(execution) = session.active() {
            execution.request_cancel(CancelReason::Disconnect);
        }
        info!(session_id, "session closed");
    }

    /// Validate, spawn and register a new execution for `session`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Protocol` for an empty command,
    /// `AppError::NotAllowed` for allow-list or hook rejections and
    /// `AppError::Busy` when the session already has an active
    /// execution. Spawn failures are not errors here; they yield
    /// [`Launch::SpawnFailed`].
    pub async fn execute(
        self: &Arc<Self>,
        session: &Arc<Session>,
        request: ExecuteRequest,
    ) -> Result<Launch> {
        request.command.validate()?;
        self.check_allowed(&request.command)?;
        if let Some(active) = session.active() {
            return Err(AppError::Busy(format!(
                "execution {} is still {}",
                active.id,
                active.state().as_str()
            )));
        }

        let environment = self.run_pre_hook(session, &request.command).await?;
        let settings = self.settings_for(&request);

        let execution = Arc::new(Execution::new(session.id.clone(), request.command));
        session.try_attach(Arc::clone(&execution))?;
        self.executions()
            .insert(execution.id.clone(), Arc::clone(&execution));

        match spawner::spawn(&execution.command, &self.config.shell, &environment) {
            Ok(process) => {
                execution.mark_started(process.pid, process.pgid);
                info!(
                    session_id = %session.id,
                    execution_id = %execution.id,
                    pid = process.pid,
                    timeout_secs = ?settings.total_timeout.map(|limit| limit.as_secs_f64()),
                    "execution started"
                );
                Ok(Launch::Started(PendingExecution {
                    execution,
                    process,
                    settings,
                    environment,
                    manager: Arc::clone(self),
                }))
            }
            Err(error) => {
                warn!(execution_id = %execution.id, %error, "spawn failed");
                let outcome = ExecutionOutcome::Failed {
                    exit_code: None,
                    error: Some(error.to_string()),
                };
                execution.finish(&outcome);
                self.release(&execution);
                Ok(Launch::SpawnFailed {
                    execution,
                    outcome,
                    error,
                })
            }
        }
    }

    /// Apply a control action to the session's active execution.
    ///
    /// CANCEL without an active execution is acknowledged as a no-op.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Unsupported` for PAUSE/RESUME when disabled or
    /// unavailable, `AppError::InvalidState` when there is no execution
    /// to pause or resume or its state rejects the action, and signal
    /// errors from delivery.
    pub fn control(&self, session: &Session, action: ControlAction) -> Result<ControlAck> {
        if action != ControlAction::Cancel && !self.config.pause_resume_supported() {
            return Err(AppError::Unsupported(format!(
                "{} is not supported on this server",
                action.as_str()
            )));
        }
        let Some(execution) = session.active() else {
            if action == ControlAction::Cancel {
                return Ok(ControlAck {
                    execution: None,
                    changed: false,
                });
            }
            return Err(AppError::InvalidState(format!(
                "no active execution to {}",
                action.as_str()
            )));
        };
        let changed = execution.control(action)?;
        Ok(ControlAck {
            execution: Some(execution),
            changed,
        })
    }

    /// Detach a terminal execution from its session and the registry.
    pub fn release(&self, execution: &Execution) {
        self.executions().remove(&execution.id);
        let session = self.sessions().get(&execution.session_id).cloned();
        if let Some(session) = session {
            session.detach(&execution.id);
        }
    }

    /// Cancel every live execution and wait for their runners to finish.
    pub async fn shutdown(&self) {
        let live: Vec<Arc<Execution>> = self.executions().values().cloned().collect();
        info!(count = live.len(), "cancelling executions for shutdown");
        for execution in live {
            execution.request_cancel(CancelReason::Shutdown);
        }
        self.tracker.close();
        self.tracker.wait().await;
    }

    fn check_allowed(&self, command: &CommandSpec) -> Result<()> {
        if self.config.allowed_commands.is_empty() {
            return Ok(());
        }
        let program = command.program_name().unwrap_or_default();
        if self
            .config
            .allowed_commands
            .iter()
            .any(|allowed| allowed == program)
        {
            Ok(())
        } else {
            Err(AppError::NotAllowed(format!(
                "'{program}' is not in the allowed command list"
            )))
        }
    }

    async fn run_pre_hook(
        &self,
        session: &Session,
        command: &CommandSpec,
    ) -> Result<HashMap<String, String>> {
        let environment = spawner::base_environment();
        let request = HookRequest {
            event: HookEvent::PreExecute,
            session_id: session.id.clone(),
            execution_id: None,
            command: command.display(),
            environment: environment.clone(),
            outcome: None,
        };
        match self.hooks.pre_execute(request).await {
            Ok(reply) if reply.decision == HookDecision::Block => {
                let reason = reply
                    .reason
                    .unwrap_or_else(|| "blocked by pre-execute hook".into());
                info!(session_id = %session.id, %reason, "execution blocked by hook");
                Err(AppError::NotAllowed(reason))
            }
            Ok(reply) => Ok(reply.environment.unwrap_or(environment)),
            Err(err) => {
                warn!(session_id = %session.id, %err, "pre-execute hook failed, allowing");
                Ok(environment)
            }
        }
    }

    fn settings_for(&self, request: &ExecuteRequest) -> RunSettings {
        let suggested = self.advisor.suggest(&request.command);
        RunSettings {
            heartbeat_interval: request
                .heartbeat_interval
                .unwrap_or_else(|| self.config.heartbeat_interval()),
            stall_threshold: request
                .stall_timeout
                .unwrap_or_else(|| self.config.stall_threshold()),
            total_timeout: resolve_timeout(request.timeout, suggested, self.config.total_timeout()),
            grace_period: self.config.grace_period(),
            drain_timeout: self.config.drain_timeout(),
            chunk_size: self.config.streams.chunk_size,
            token_limit: self.config.limits.token_limit,
            cancel_on_detect: self.config.limits.cancel_on_detect,
        }
    }
}
