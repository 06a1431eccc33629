//! # Single-slot completion signal.
//!
//! The Notifier carries exactly one real event, completion, from the
//! background task to the waiter:
//!
//! ## Rules
//! - **Send never blocks**: `notify()` is a `try_send` into a
//!   capacity-1 queue. A signal sent before anyone waits is latched, so
//!   a waiter that arrives later still observes it; a second notify is
//!   silently dropped.
//! - **Receive is bounded and cancellable**: `wait()` suspends on the
//!   slot, the cancellation path, and the optional timeout. With no
//!   timeout the wait is unbounded in time but still cancellable; no
//!   large finite bound is substituted.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;
use tokio_util::sync::CancellationToken;

/// What a bounded wait observed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum WaitOutcome {
    /// The completion signal arrived (possibly latched earlier).
    Notified,
    /// The cancellation path was driven.
    Cancelled,
    /// The bound elapsed first.
    TimedOut,
}

/// Latched single-slot mailbox plus a cancellation path.
pub(crate) struct Notifier {
    tx: mpsc::Sender<()>,
    rx: tokio::sync::Mutex<mpsc::Receiver<()>>,
    cancel: CancellationToken,
}

impl Notifier {
    pub(crate) fn new() -> Self {
        let (tx, rx) = mpsc::channel(1);
        Self {
            tx,
            rx: tokio::sync::Mutex::new(rx),
            cancel: CancellationToken::new(),
        }
    }

    /// Non-blocking send; latches if nobody waits yet, drops if already
    /// latched.
    pub(crate) fn notify(&self) {
        let _ = self.tx.try_send(());
    }

    /// Drives the cancellation path; pending and future waits observe it.
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Suspends until notified, cancelled, or the bound elapses.
    ///
    /// The notified branch wins when several are ready, so a completed
    /// execution is always reported as completed.
    pub(crate) async fn wait(&self, bound: Option<Duration>) -> WaitOutcome {
        let mut rx = self.rx.lock().await;
        match bound {
            Some(limit) => {
                tokio::select! {
                    biased;
                    _ = rx.recv() => WaitOutcome::Notified,
                    _ = self.cancel.cancelled() => WaitOutcome::Cancelled,
                    _ = time::sleep(limit) => WaitOutcome::TimedOut,
                }
            }
            None => {
                tokio::select! {
                    biased;
                    _ = rx.recv() => WaitOutcome::Notified,
                    _ = self.cancel.cancelled() => WaitOutcome::Cancelled,
                }
            }
        }
    }
}
