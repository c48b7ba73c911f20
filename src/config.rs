//! Global configuration parsing and validation.
//!
//! Every field carries a default so an empty file (or no file at all)
//! yields a usable server configuration.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::{AppError, Result};

/// Timer and grace-period settings for executions.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct TimeoutConfig {
    /// Absolute deadline per execution; 0 disables the deadline.
    pub total_seconds: u64,
    /// Silence before `process.status` reports a stall.
    pub stall_seconds: u64,
    /// Interval between heartbeats while no output is flowing.
    pub heartbeat_seconds: u64,
    /// Time between SIGTERM and SIGKILL when cancelling.
    pub grace_period_ms: u64,
    /// Upper bound on draining pipes after the process has exited.
    pub drain_seconds: u64,
    /// Upper bound on a single hook script invocation.
    pub hook_seconds: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            total_seconds: 600,
            stall_seconds: 120,
            heartbeat_seconds: 30,
            grace_period_ms: 2000,
            drain_seconds: 5,
            hook_seconds: 10,
        }
    }
}

/// Output streaming settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct StreamConfig {
    /// Bytes read from a pipe per `process.output` chunk.
    pub chunk_size: usize,
    /// Capacity of the per-connection outbound queue.
    pub outbound_buffer: usize,
    /// Largest inbound WebSocket message accepted.
    pub max_message_bytes: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_size: 8192,
            outbound_buffer: 64,
            max_message_bytes: 1_048_576,
        }
    }
}

/// Provider-limit detection settings.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct LimitConfig {
    /// Token limit reported in `error.token_limit_exceeded`.
    pub token_limit: u64,
    /// Cancel the execution once a limit marker is seen.
    pub cancel_on_detect: bool,
}

impl Default for LimitConfig {
    fn default() -> Self {
        Self {
            token_limit: 32_000,
            cancel_on_detect: false,
        }
    }
}

/// Optional hook executables run around each execution.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case", default)]
pub struct HookConfig {
    /// Invoked before spawn; may amend the environment or block.
    pub pre_execute: Option<PathBuf>,
    /// Invoked after the terminal notification.
    pub post_execute: Option<PathBuf>,
}

/// Command classification rule supplying a suggested total timeout.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct TimeoutRule {
    /// Regular expression matched against the command text.
    pub pattern: String,
    /// Suggested total timeout in seconds.
    pub seconds: u64,
}

fn default_bind() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 8003))
}

fn default_ws_path() -> String {
    "/ws".into()
}

fn default_max_sessions() -> u32 {
    100
}

fn default_shell() -> String {
    "/bin/sh".into()
}

fn default_true() -> bool {
    true
}

/// Global configuration parsed from `config.toml`.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub struct GlobalConfig {
    /// Address the WebSocket server listens on.
    #[serde(default = "default_bind")]
    pub bind: SocketAddr,
    /// Route serving the WebSocket upgrade.
    #[serde(default = "default_ws_path")]
    pub ws_path: String,
    /// Maximum simultaneously connected sessions.
    #[serde(default = "default_max_sessions")]
    pub max_sessions: u32,
    /// Executables permitted to run; empty means unrestricted.
    #[serde(default)]
    pub allowed_commands: Vec<String>,
    /// Shell used for string commands (`<shell> -c <command>`).
    #[serde(default = "default_shell")]
    pub shell: String,
    /// Expose PAUSE/RESUME (only honoured on unix).
    #[serde(default = "default_true")]
    pub pause_resume: bool,
    /// Execution timers.
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    /// Streaming settings.
    #[serde(default)]
    pub streams: StreamConfig,
    /// Provider-limit detection.
    #[serde(default)]
    pub limits: LimitConfig,
    /// Hook executables.
    #[serde(default)]
    pub hooks: HookConfig,
    /// Suggested timeouts by command classification.
    #[serde(default)]
    pub timeout_rules: Vec<TimeoutRule>,
}

impl Default for GlobalConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            ws_path: default_ws_path(),
            max_sessions: default_max_sessions(),
            allowed_commands: Vec::new(),
            shell: default_shell(),
            pause_resume: true,
            timeouts: TimeoutConfig::default(),
            streams: StreamConfig::default(),
            limits: LimitConfig::default(),
            hooks: HookConfig::default(),
            timeout_rules: Vec::new(),
        }
    }
}

impl GlobalConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read or contains
    /// invalid TOML, or if validation fails.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check value ranges that serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        if self.max_sessions == 0 {
            return Err(AppError::Config(
                "max_sessions must be greater than zero".into(),
            ));
        }
        if !self.ws_path.starts_with('/') {
            return Err(AppError::Config("ws_path must start with '/'".into()));
        }
        if self.shell.trim().is_empty() {
            return Err(AppError::Config("shell must not be empty".into()));
        }
        if self.timeouts.heartbeat_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.heartbeat_seconds must be greater than zero".into(),
            ));
        }
        if self.timeouts.stall_seconds == 0 {
            return Err(AppError::Config(
                "timeouts.stall_seconds must be greater than zero".into(),
            ));
        }
        if self.timeouts.grace_period_ms == 0 {
            return Err(AppError::Config(
                "timeouts.grace_period_ms must be greater than zero".into(),
            ));
        }
        if self.streams.chunk_size == 0 {
            return Err(AppError::Config(
                "streams.chunk_size must be greater than zero".into(),
            ));
        }
        if self.streams.outbound_buffer == 0 {
            return Err(AppError::Config(
                "streams.outbound_buffer must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Default deadline for an execution, if any.
    #[must_use]
    pub fn total_timeout(&self) -> Option<Duration> {
        (self.timeouts.total_seconds > 0).then_some(Duration::from_secs(self.timeouts.total_seconds))
    }

    /// Silence threshold for `process.status` reports.
    #[must_use]
    pub fn stall_threshold(&self) -> Duration {
        Duration::from_secs(self.timeouts.stall_seconds)
    }

    /// Heartbeat interval during silence.
    #[must_use]
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.timeouts.heartbeat_seconds)
    }

    /// SIGTERM to SIGKILL grace period.
    #[must_use]
    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.timeouts.grace_period_ms)
    }

    /// Bound on post-exit pipe draining.
    #[must_use]
    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.drain_seconds)
    }

    /// Bound on a single hook invocation.
    #[must_use]
    pub fn hook_timeout(&self) -> Duration {
        Duration::from_secs(self.timeouts.hook_seconds)
    }

    /// Whether PAUSE/RESUME can be honoured on this build.
    #[must_use]
    pub fn pause_resume_supported(&self) -> bool {
        cfg!(unix) && self.pause_resume
    }
}
