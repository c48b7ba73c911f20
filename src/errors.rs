//! Error types shared across the application.

use std::fmt::{Display, Formatter};

/// Shared application result type.
pub type Result<T> = std::result::Result<T, AppError>;

/// Application error enumeration covering all domain failure modes.
///
/// Protocol-level variants (`Protocol`, `Busy`, `InvalidState`,
/// `Unsupported`, `NotAllowed`, `Capacity`) are answered synchronously as
/// JSON-RPC errors and never reach the process layer. Process-level
/// variants (`Spawn`, `Signal`, `Io`) are resolved into terminal
/// notifications by the execution runner.
#[derive(Debug)]
pub enum AppError {
    /// Configuration parsing or validation failure.
    Config(String),
    /// Malformed or out-of-order JSON-RPC request.
    Protocol(String),
    /// The session already has a non-terminal execution.
    Busy(String),
    /// Control action not valid in the execution's current state.
    InvalidState(String),
    /// Operation not available on this platform or disabled by config.
    Unsupported(String),
    /// Command rejected by the allow-list or a pre-execute hook.
    NotAllowed(String),
    /// Server is at its session limit.
    Capacity(String),
    /// Process could not be spawned (missing executable, permissions).
    Spawn(String),
    /// Delivering a signal to a process group failed.
    Signal(String),
    /// Hook script failure.
    Hook(String),
    /// WebSocket transport or listener failure.
    Transport(String),
    /// File-system or I/O operation failure.
    Io(String),
}

impl Display for AppError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol: {msg}"),
            Self::Busy(msg) => write!(f, "busy: {msg}"),
            Self::InvalidState(msg) => write!(f, "invalid state: {msg}"),
            Self::Unsupported(msg) => write!(f, "unsupported: {msg}"),
            Self::NotAllowed(msg) => write!(f, "not allowed: {msg}"),
            Self::Capacity(msg) => write!(f, "capacity: {msg}"),
            Self::Spawn(msg) => write!(f, "spawn: {msg}"),
            Self::Signal(msg) => write!(f, "signal: {msg}"),
            Self::Hook(msg) => write!(f, "hook: {msg}"),
            Self::Transport(msg) => write!(f, "transport: {msg}"),
            Self::Io(msg) => write!(f, "io: {msg}"),
        }
    }
}

impl std::error::Error for AppError {}

impl From<toml::de::Error> for AppError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(format!("invalid config: {err}"))
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        Self::Protocol(err.to_string())
    }
}
