//! Child process spawner.
//!
//! Every execution runs in its own process group (`process_group(0)`)
//! so one signal reaches the command and every descendant it forks.
//! stdin is `/dev/null` and both output pipes are captured; the child
//! also has `kill_on_drop(true)` as a last-resort safety net.

use std::collections::HashMap;
use std::process::Stdio;

use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::info;

use crate::models::execution::CommandSpec;
use crate::{AppError, Result};

/// Environment the server adds on top of its own for every child.
///
/// Hooks receive (and may replace) this map before spawn.
#[must_use]
pub fn base_environment() -> HashMap<String, String> {
    HashMap::from([("PYTHONUNBUFFERED".to_owned(), "1".to_owned())])
}

/// A freshly spawned process with its pipes detached from the handle.
#[derive(Debug)]
pub struct SpawnedProcess {
    /// Child handle; owns the reap.
    pub child: Child,
    /// OS process ID.
    pub pid: u32,
    /// Process group ID (equal to `pid` on unix, `None` elsewhere).
    pub pgid: Option<i32>,
    /// Child's stdout pipe.
    pub stdout: ChildStdout,
    /// Child's stderr pipe.
    pub stderr: ChildStderr,
}

/// Build the OS command for `command`.
fn build_command(command: &CommandSpec, shell: &str) -> Result<Command> {
    command.validate()?;
    let cmd = match command {
        CommandSpec::Shell(text) => {
            let mut cmd = Command::new(shell);
            cmd.arg("-c").arg(text);
            cmd
        }
        CommandSpec::Argv(argv) => {
            let (program, args) = argv
                .split_first()
                .ok_or_else(|| AppError::Protocol("command must not be empty".into()))?;
            let mut cmd = Command::new(program);
            cmd.args(args);
            cmd
        }
    };
    Ok(cmd)
}

/// Spawn `command` in a new process group with piped stdout/stderr.
///
/// # Errors
///
/// Returns `AppError::Protocol` for an empty command and
/// `AppError::Spawn` when the OS refuses to start the process
/// (executable missing, permission denied).
pub fn spawn(
    command: &CommandSpec,
    shell: &str,
    environment: &HashMap<String, String>,
) -> Result<SpawnedProcess> {
    let mut cmd = build_command(command, shell)?;
    cmd.envs(environment)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Spawn(format!("failed to spawn '{}': {err}", command.display()))
    })?;

    let pid = child
        .id()
        .ok_or_else(|| AppError::Spawn("process exited before its pid was read".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Spawn("failed to capture stderr".into()))?;

    let pgid = process_group_of(pid);
    info!(pid, ?pgid, command = %command.display(), "process spawned");

    Ok(SpawnedProcess {
        child,
        pid,
        pgid,
        stdout,
        stderr,
    })
}

#[cfg(unix)]
fn process_group_of(pid: u32) -> Option<i32> {
    use nix::unistd::{getpgid, Pid};

    let raw = i32::try_from(pid).ok()?;
    // The group leader's pgid equals its pid; getpgid confirms it took effect.
    Some(getpgid(Some(Pid::from_raw(raw))).map_or(raw, Pid::as_raw))
}

#[cfg(not(unix))]
fn process_group_of(_pid: u32) -> Option<i32> {
    None
}
