//! Process-group signalling: suspend, resume, and the cancel sequence.
//!
//! Suspend/resume are POSIX-only (SIGSTOP/SIGCONT); on other platforms
//! they return `AppError::Unsupported` instead of silently succeeding.

use std::process::ExitStatus;
use std::time::Duration;

use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::{AppError, Result};

/// Result of [`terminate`].
#[derive(Debug, Clone, Copy)]
pub struct Termination {
    /// Reaped exit status.
    pub status: ExitStatus,
    /// Whether SIGKILL was needed after the grace period.
    pub forced: bool,
}

#[cfg(unix)]
mod group {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    use crate::{AppError, Result};

    /// Send `signal` to group `pgid`. `Ok(false)` if the group is gone.
    pub(super) fn send(pgid: i32, signal: Signal) -> Result<bool> {
        match killpg(Pid::from_raw(pgid), signal) {
            Ok(()) => Ok(true),
            Err(Errno::ESRCH) => Ok(false),
            Err(err) => Err(AppError::Signal(format!(
                "failed to send {signal:?} to process group {pgid}: {err}"
            ))),
        }
    }

    /// Whether any member of group `pgid` is still alive.
    pub(super) fn alive(pgid: i32) -> bool {
        killpg(Pid::from_raw(pgid), None).is_ok()
    }
}

/// Suspend every process in the group.
///
/// # Errors
///
/// Returns `AppError::Unsupported` on non-unix platforms or when the
/// group id is unknown, and `AppError::Signal` if delivery fails.
pub fn suspend(pgid: Option<i32>) -> Result<()> {
    #[cfg(unix)]
    {
        let pgid = pgid.ok_or_else(|| AppError::Unsupported("process group unknown".into()))?;
        if !group::send(pgid, nix::sys::signal::Signal::SIGSTOP)? {
            return Err(AppError::InvalidState(format!(
                "process group {pgid} no longer exists"
            )));
        }
        info!(pgid, "sent SIGSTOP to process group");
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = pgid;
        Err(AppError::Unsupported(
            "PAUSE requires POSIX signals".into(),
        ))
    }
}

/// Continue every process in the group.
///
/// # Errors
///
/// Same conditions as [`suspend`].
pub fn resume(pgid: Option<i32>) -> Result<()> {
    #[cfg(unix)]
    {
        let pgid = pgid.ok_or_else(|| AppError::Unsupported("process group unknown".into()))?;
        if !group::send(pgid, nix::sys::signal::Signal::SIGCONT)? {
            return Err(AppError::InvalidState(format!(
                "process group {pgid} no longer exists"
            )));
        }
        info!(pgid, "sent SIGCONT to process group");
        Ok(())
    }
    #[cfg(not(unix))]
    {
        let _ = pgid;
        Err(AppError::Unsupported(
            "RESUME requires POSIX signals".into(),
        ))
    }
}

/// SIGKILL whatever is left of the group after its leader was reaped.
///
/// Background descendants that outlive the leader would otherwise be
/// orphaned and keep the pipes open.
pub fn kill_remaining(pgid: Option<i32>) {
    #[cfg(unix)]
    if let Some(pgid) = pgid {
        match group::send(pgid, nix::sys::signal::Signal::SIGKILL) {
            Ok(true) => debug!(pgid, "killed leftover process group members"),
            Ok(false) => {}
            Err(err) => warn!(pgid, %err, "failed to kill leftover process group members"),
        }
    }
    #[cfg(not(unix))]
    let _ = pgid;
}

/// Whether any process of the group is still alive.
#[must_use]
pub fn group_alive(pgid: Option<i32>) -> bool {
    #[cfg(unix)]
    {
        pgid.is_some_and(group::alive)
    }
    #[cfg(not(unix))]
    {
        let _ = pgid;
        false
    }
}

/// Terminate the child and its process group, always reaping the child.
///
/// Sends SIGTERM (followed by SIGCONT so suspended members can act on
/// it), waits up to `grace`, then sends SIGKILL. Every path ends in
/// `child.wait()`, so no zombie is left behind. Calling this on a child
/// that has already exited only reaps it.
///
/// # Errors
///
/// Returns `AppError::Io` only if the final reap itself fails.
pub async fn terminate(child: &mut Child, pgid: Option<i32>, grace: Duration) -> Result<Termination> {
    if let Ok(Some(status)) = child.try_wait() {
        kill_remaining(pgid);
        return Ok(Termination {
            status,
            forced: false,
        });
    }

    send_terminate(child, pgid);

    match tokio::time::timeout(grace, child.wait()).await {
        Ok(Ok(status)) => {
            info!(?status, "process terminated within grace period");
            kill_remaining(pgid);
            return Ok(Termination {
                status,
                forced: false,
            });
        }
        Ok(Err(err)) => warn!(%err, "wait failed after SIGTERM, escalating"),
        Err(_elapsed) => {
            warn!(grace_ms = grace.as_millis(), "grace period elapsed, sending SIGKILL");
        }
    }

    force_kill(child, pgid);
    let status = child
        .wait()
        .await
        .map_err(|err| AppError::Io(format!("failed to reap process: {err}")))?;
    Ok(Termination {
        status,
        forced: true,
    })
}

fn send_terminate(child: &mut Child, pgid: Option<i32>) {
    #[cfg(unix)]
    if let Some(pgid) = pgid {
        use nix::sys::signal::Signal;

        match group::send(pgid, Signal::SIGTERM) {
            Ok(_) => {
                info!(pgid, "sent SIGTERM to process group");
                let _ = group::send(pgid, Signal::SIGCONT);
            }
            Err(err) => warn!(pgid, %err, "SIGTERM failed"),
        }
        return;
    }
    if let Err(err) = child.start_kill() {
        warn!(%err, "failed to start kill");
    }
}

fn force_kill(child: &mut Child, pgid: Option<i32>) {
    kill_remaining(pgid);
    // The leader is killed directly too in case it left its group.
    if let Err(err) = child.start_kill() {
        debug!(%err, "start_kill after grace period failed");
    }
}
