//! # ExecTracker: the in-flight execution and its completion sequence.
//!
//! One tracker owns one spawned child and its pumps. A background task
//! drives the completion sequence; callers interact through
//! [`ExecTracker::await_result`] and [`ExecTracker::cancel`].
//!
//! ## Background sequence
//! ```text
//! Created → Running ──child exit──► Finished(code) ─┐
//!              │                                    │
//!              └──stop token──► Cancelled/TimedOut ─┤
//!                                                   ▼
//!   stop pumps (clean/forced) → join pumps (+ grace) → close streams
//!        → [forced only: stopper] → materialize → validate exit code
//!        → after_finish → after_stop (always) → unregister → notify
//! ```
//!
//! ## Rules
//! - stop-pumps happens before close-streams, before materialization,
//!   before validation, before notification; a caller can never observe
//!   a result that skipped its exit-code check.
//! - The background task performs **exactly one** non-blocking notify,
//!   on every path, so a waiter can never suspend forever.
//! - Close failures during a grace-bounded close phase are downgraded to
//!   warnings; without a grace period they surface as `StreamClose`.
//! - `cancel()` is legal only once a waiter has started awaiting.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::time;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::core::launcher::CaptureMode;
use crate::core::notifier::{Notifier, WaitOutcome};
use crate::core::reaper;
use crate::core::stopper::ProcessStopper;
use crate::error::{ExecContext, ExecError};
use crate::io::pump::PumpSet;
use crate::io::{BufferSink, OutputReader};
use crate::listeners::ListenerSet;
use crate::process::{exit, CommandSpec, ExecOutput, ExecResult, OutputSnapshot, Pid, ProcessChild};

/// Progress of the background completion task.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Phase {
    Created,
    Running,
    Finished(i32),
    Cancelled,
    StreamsClosed,
    ResultReady,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// State shared between the tracker handle and its background task.
pub(crate) struct TrackerShared {
    notifier: Notifier,
    outcome: Mutex<Option<Result<ExecResult, ExecError>>>,
    phase: Mutex<Phase>,
    snapshot: OutputSnapshot,
    exit_code: Mutex<Option<i32>>,
    reader: Mutex<Option<OutputReader>>,
    reader_claimed: AtomicBool,
    consumed: AtomicBool,
}

/// Everything the background task needs beyond the child and pumps.
pub(crate) struct TrackerConfig {
    pub spec: Arc<CommandSpec>,
    pub stopper: Arc<dyn ProcessStopper>,
    pub listeners: ListenerSet,
    pub grace: Option<Duration>,
    pub capture: CaptureMode,
    pub buffer: Option<Arc<Mutex<Vec<u8>>>>,
    pub reader: Option<OutputReader>,
    pub snapshot: OutputSnapshot,
    pub reaper_id: u64,
}

/// Handle to an in-flight or completed process execution.
///
/// Awaitable, cancellable, queryable. Exactly one tracker owns a given
/// child handle and its three pipes.
pub struct ExecTracker {
    spec: Arc<CommandSpec>,
    shared: Arc<TrackerShared>,
    stop: CancellationToken,
    waiter_started: AtomicBool,
    pid: Pid,
}

impl ExecTracker {
    /// Spawns the background completion task and returns the handle.
    pub(crate) fn start(
        child: Box<dyn ProcessChild>,
        pumps: PumpSet,
        mut cfg: TrackerConfig,
    ) -> Self {
        let reader = cfg.reader.take();
        let shared = Arc::new(TrackerShared {
            notifier: Notifier::new(),
            outcome: Mutex::new(None),
            phase: Mutex::new(Phase::Created),
            snapshot: cfg.snapshot.clone(),
            exit_code: Mutex::new(None),
            reader: Mutex::new(reader),
            reader_claimed: AtomicBool::new(false),
            consumed: AtomicBool::new(false),
        });
        let stop = CancellationToken::new();
        let pid = child.pid();
        let spec = Arc::clone(&cfg.spec);

        tokio::spawn(drive(
            child,
            pumps,
            Arc::clone(&shared),
            stop.clone(),
            cfg,
        ));

        Self {
            spec,
            shared,
            stop,
            waiter_started: AtomicBool::new(false),
            pid,
        }
    }

    /// Pid of the child, or [`Pid::Unsupported`].
    pub fn pid(&self) -> Pid {
        self.pid
    }

    /// The frozen attributes this execution was launched with.
    pub fn spec(&self) -> &CommandSpec {
        &self.spec
    }

    /// Claims the streaming pull handle (streaming capture mode only).
    ///
    /// Meaningful once; `None` when capture is not streaming, when the
    /// reader was already claimed, or when the engine has already
    /// materialized it into the result.
    pub fn take_output_reader(&self) -> Option<OutputReader> {
        let taken = lock(&self.shared.reader).take();
        if taken.is_some() {
            self.shared.reader_claimed.store(true, Ordering::SeqCst);
        }
        taken
    }

    /// Suspends until the execution completes, is cancelled, or the
    /// bound elapses.
    ///
    /// `None` and a zero bound both wait without a time limit while
    /// remaining cancellable. On timeout, a diagnostic
    /// [`ExecError::Timeout`] is synthesized and the background task is
    /// forcibly cancelled; the configured stopper destroys the process
    /// on that path.
    pub async fn await_result(
        &self,
        bound: Option<Duration>,
    ) -> Result<ExecResult, ExecError> {
        let bound = bound.filter(|d| !d.is_zero());
        if self.shared.consumed.load(Ordering::SeqCst) {
            return Err(ExecError::IllegalUse(
                "execution result was already consumed".into(),
            ));
        }
        self.waiter_started.store(true, Ordering::SeqCst);

        match self.shared.notifier.wait(bound).await {
            WaitOutcome::Notified | WaitOutcome::Cancelled => self.take_outcome(),
            WaitOutcome::TimedOut => {
                let limit = bound.unwrap_or_default();
                let exit_code = *lock(&self.shared.exit_code);
                let phase = format!("{:?}", *lock(&self.shared.phase));
                let context = ExecContext::new(&self.spec, &self.shared.snapshot);
                // Interrupt the background task; its forced path runs
                // the stopper and still performs the final cleanup.
                self.stop.cancel();
                Err(ExecError::timeout(limit, exit_code, phase, context))
            }
        }
    }

    /// Cancels the execution with a reason.
    ///
    /// Only legal after a waiter has started awaiting; calling it
    /// earlier is a programmer error and raises
    /// [`ExecError::IllegalUse`]. The pending await observes
    /// [`ExecError::Cancelled`] carrying the reason and best-effort
    /// partial output.
    pub fn cancel(&self, reason: &str) -> Result<(), ExecError> {
        if !self.waiter_started.load(Ordering::SeqCst) {
            return Err(ExecError::IllegalUse(
                "cancel() called before any waiter started awaiting".into(),
            ));
        }
        {
            let mut slot = lock(&self.shared.outcome);
            if slot.is_none() {
                *slot = Some(Err(ExecError::Cancelled {
                    reason: reason.to_string(),
                    context: Box::new(ExecContext::new(&self.spec, &self.shared.snapshot)),
                }));
            }
        }
        *lock(&self.shared.phase) = Phase::Cancelled;
        self.shared.notifier.cancel();
        self.stop.cancel();
        Ok(())
    }

    fn take_outcome(&self) -> Result<ExecResult, ExecError> {
        let taken = lock(&self.shared.outcome).take();
        match taken {
            Some(outcome) => {
                self.shared.consumed.store(true, Ordering::SeqCst);
                outcome
            }
            None => Err(ExecError::IllegalUse(
                "execution result was already consumed".into(),
            )),
        }
    }
}

/// The background completion sequence. Runs exactly once per tracker.
async fn drive(
    mut child: Box<dyn ProcessChild>,
    mut pumps: PumpSet,
    shared: Arc<TrackerShared>,
    stop: CancellationToken,
    cfg: TrackerConfig,
) {
    *lock(&shared.phase) = Phase::Running;
    let pid = child.pid();

    let waited: Option<io::Result<i32>> = tokio::select! {
        res = child.wait() => Some(res),
        _ = stop.cancelled() => None,
    };

    let finished_cleanly = matches!(waited, Some(Ok(_)));
    match &waited {
        Some(Ok(code)) => {
            *lock(&shared.exit_code) = Some(*code);
            *lock(&shared.phase) = Phase::Finished(*code);
            debug!(pid = %pid, code, "process exited");
        }
        Some(Err(_)) => {}
        None => {
            *lock(&shared.phase) = Phase::Cancelled;
            if let Some(code) = child.try_exit_code() {
                *lock(&shared.exit_code) = Some(code);
            }
        }
    }

    // Stop pumps before closing streams, always.
    pumps.stop(finished_cleanly);
    let close_errors = join_pumps(&mut pumps, &shared, &cfg).await;

    // Forced paths destroy the process only through the stopper.
    if !finished_cleanly {
        cfg.stopper.stop(child.as_mut()).await;
    }
    *lock(&shared.phase) = Phase::StreamsClosed;

    let outcome: Result<ExecResult, ExecError> = match waited {
        Some(Ok(code)) => {
            if let Some(err) = ExecError::from_close_errors(close_errors) {
                Err(err)
            } else {
                let output = materialize(&cfg, &shared);
                match exit::enforce(&cfg.spec, code, &shared.snapshot) {
                    Ok(()) => Ok(ExecResult {
                        pid,
                        exit_code: code,
                        output,
                    }),
                    Err(e) => Err(e),
                }
            }
        }
        Some(Err(e)) => Err(ExecError::Initialization {
            program: cfg.spec.program.clone(),
            os_code: e.raw_os_error(),
            source: e,
        }),
        None => {
            if !close_errors.is_empty() {
                warn!(
                    pid = %pid,
                    errors = close_errors.len(),
                    "stream close failures after forced stop"
                );
            }
            // The canceller usually recorded the real outcome already;
            // this fallback covers a bare stop-token cancellation.
            Err(ExecError::Cancelled {
                reason: "execution was interrupted".into(),
                context: Box::new(ExecContext::new(&cfg.spec, &shared.snapshot)),
            })
        }
    };

    // after_finish runs on successful outcomes only; its failure turns
    // the outcome into ListenerRejected.
    let outcome = match outcome {
        Ok(result) => match cfg.listeners.after_finish(&result).await {
            Ok(()) => Ok(result),
            Err(e) => Err(e),
        },
        err => err,
    };

    // Everything below runs on every path.
    let outcome = match cfg.listeners.after_stop().await {
        Ok(()) => outcome,
        Err(stop_failure) => match outcome {
            Ok(_) => Err(stop_failure),
            Err(original) => {
                warn!(error = %stop_failure, "after_stop listener failed");
                Err(original)
            }
        },
    };
    reaper::unregister(cfg.reaper_id);
    {
        let mut slot = lock(&shared.outcome);
        if slot.is_none() {
            *slot = Some(outcome);
        } else if let Err(e) = outcome {
            debug!(error = %e, "background outcome superseded by cancellation");
        }
    }
    *lock(&shared.phase) = Phase::ResultReady;
    shared.notifier.notify();
}

/// Joins the pump tasks, draining an unclaimed streaming reader in
/// parallel so a full channel can never wedge the join.
///
/// With a grace period configured, the whole phase runs under its
/// timeout: close failures are downgraded to warnings and stragglers
/// are aborted on expiry.
async fn join_pumps(
    pumps: &mut PumpSet,
    shared: &TrackerShared,
    cfg: &TrackerConfig,
) -> Vec<io::Error> {
    let drain_unclaimed = async {
        if cfg.capture != CaptureMode::Streamed {
            return;
        }
        let taken = lock(&shared.reader).take();
        if let Some(mut reader) = taken {
            reader.buffer_remaining().await;
            *lock(&shared.reader) = Some(reader);
        }
    };

    match cfg.grace {
        None => {
            let (errs, ()) = tokio::join!(pumps.join(), drain_unclaimed);
            errs
        }
        Some(grace) => {
            let phase = async { tokio::join!(pumps.join(), drain_unclaimed) };
            match time::timeout(grace, phase).await {
                Ok((errs, ())) => {
                    if let Some(err) = ExecError::from_close_errors(errs) {
                        warn!(error = %err, "stream close failed; continuing");
                    }
                    Vec::new()
                }
                Err(_) => {
                    warn!(
                        grace_ms = grace.as_millis() as u64,
                        "stream close grace period expired; abandoning streams"
                    );
                    pumps.abort_all();
                    let _ = pumps.join().await;
                    Vec::new()
                }
            }
        }
    }
}

/// Builds the result's output access once the streams are closed.
fn materialize(cfg: &TrackerConfig, shared: &TrackerShared) -> ExecOutput {
    match cfg.capture {
        CaptureMode::Off => ExecOutput::Unavailable,
        CaptureMode::Buffered => match &cfg.buffer {
            Some(buffer) => ExecOutput::Buffered(BufferSink::take_from(buffer)),
            None => ExecOutput::Unavailable,
        },
        CaptureMode::Streamed => {
            if shared.reader_claimed.load(Ordering::SeqCst) {
                return ExecOutput::Claimed;
            }
            match lock(&shared.reader).take() {
                Some(reader) => ExecOutput::Streamed(reader),
                None => {
                    // Lost to a grace-period abort mid-drain.
                    warn!("streamed output was lost to an expired close grace period");
                    ExecOutput::Buffered(Vec::new())
                }
            }
        }
    }
}
