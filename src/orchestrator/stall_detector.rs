//! Per-execution silence and deadline timer.
//!
//! Each running execution gets a [`StallDetector`]. The heartbeat timer
//! restarts on every output chunk (via [`StallControl::reset`]), so
//! heartbeats only flow while the child is silent. The total deadline is
//! absolute from start and is unaffected by output or pausing.
//!
//! Events are delivered on a `tokio::sync::mpsc` channel so the runner
//! can turn them into notifications or escalate to cancellation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// Events emitted by the stall detector for the runner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StallEvent {
    /// No output for one heartbeat interval.
    Heartbeat {
        /// Time since the execution started.
        elapsed: Duration,
    },
    /// Silence has reached the stall threshold. Emitted alongside a
    /// heartbeat; suppressed while paused.
    Silent {
        /// Time since the last output chunk (or start).
        no_output_for: Duration,
    },
    /// The total deadline elapsed. Emitted once; the detector then stops.
    DeadlineExceeded {
        /// Time since the execution started.
        elapsed: Duration,
    },
}

/// Shared activity and pause flags, held by the execution.
#[derive(Debug, Clone, Default)]
pub struct StallControl {
    reset_notify: Arc<Notify>,
    paused: Arc<AtomicBool>,
}

impl StallControl {
    /// Create a fresh, unpaused control.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record activity: restarts the heartbeat timer.
    pub fn reset(&self) {
        self.reset_notify.notify_one();
    }

    /// Suppress stall reports while the process group is suspended.
    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    /// Re-enable stall reports; counts as activity.
    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.reset_notify.notify_one();
    }

    /// Whether stall reports are suppressed.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }
}

/// Builder for a per-execution stall detector.
///
/// Call [`spawn`](Self::spawn) to start the background timer task.
pub struct StallDetector {
    execution_id: String,
    heartbeat_interval: Duration,
    stall_threshold: Duration,
    deadline: Option<Duration>,
    control: StallControl,
    event_tx: mpsc::Sender<StallEvent>,
    cancel: CancellationToken,
}

impl StallDetector {
    /// Construct a new detector (does not start the timer yet).
    ///
    /// `deadline` of `None` disables the total timeout, as does a deadline
    /// too far out to represent on the clock.
    #[must_use]
    pub fn new(
        execution_id: String,
        heartbeat_interval: Duration,
        stall_threshold: Duration,
        deadline: Option<Duration>,
        control: StallControl,
        event_tx: mpsc::Sender<StallEvent>,
    ) -> Self {
        Self {
            execution_id,
            heartbeat_interval,
            stall_threshold,
            deadline,
            control,
            event_tx,
            cancel: CancellationToken::new(),
        }
    }

    /// Spawn the background timer task and return a handle for stopping it.
    #[must_use]
    pub fn spawn(self) -> StallDetectorHandle {
        let cancel = self.cancel.clone();
        let span = info_span!("stall_detector", execution_id = %self.execution_id);
        let join_handle = tokio::spawn(self.run().instrument(span));
        StallDetectorHandle {
            join_handle: Some(join_handle),
            cancel,
        }
    }

    /// Core timer loop.
    async fn run(self) {
        let started = Instant::now();
        let deadline_at = self.deadline.and_then(|limit| {
            let at = started.checked_add(limit);
            if at.is_none() {
                debug!(
                    limit_secs = limit.as_secs_f64(),
                    "deadline beyond clock range, running unbounded"
                );
            }
            at
        });
        let mut last_activity = started;

        loop {
            let deadline = async {
                match deadline_at {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending().await,
                }
            };

            tokio::select! {
                () = self.cancel.cancelled() => {
                    debug!("stall detector cancelled");
                    return;
                }
                () = deadline => {
                    let elapsed = started.elapsed();
                    warn!(elapsed_secs = elapsed.as_secs_f64(), "total deadline exceeded");
                    self.emit(StallEvent::DeadlineExceeded { elapsed }).await;
                    return;
                }
                () = self.control.reset_notify.notified() => {
                    last_activity = Instant::now();
                }
                () = tokio::time::sleep(self.heartbeat_interval) => {
                    let elapsed = started.elapsed();
                    if !self.emit(StallEvent::Heartbeat { elapsed }).await {
                        return;
                    }
                    let no_output_for = last_activity.elapsed();
                    if !self.control.is_paused() && no_output_for >= self.stall_threshold {
                        info!(silent_secs = no_output_for.as_secs(), "execution silent past stall threshold");
                        if !self.emit(StallEvent::Silent { no_output_for }).await {
                            return;
                        }
                    }
                }
            }
        }
    }

    /// Deliver `event` unless cancelled first. Returns `false` when the
    /// detector should stop.
    async fn emit(&self, event: StallEvent) -> bool {
        tokio::select! {
            () = self.cancel.cancelled() => false,
            sent = self.event_tx.send(event) => sent.is_ok(),
        }
    }
}

/// Handle returned from [`StallDetector::spawn`].
pub struct StallDetectorHandle {
    /// Task handle for the background detector loop.
    join_handle: Option<JoinHandle<()>>,
    /// Cancelled when the handle is dropped.
    cancel: CancellationToken,
}

impl Drop for StallDetectorHandle {
    /// Cancel the background detector task when the handle is dropped.
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl StallDetectorHandle {
    /// Stop the timers and wait for the task to exit.
    pub async fn await_completion(mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.join_handle.take() {
            let _ = handle.await;
        }
    }
}
