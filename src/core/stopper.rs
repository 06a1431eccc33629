//! # Pluggable destroy strategy for forced termination.
//!
//! A [`ProcessStopper`] is invoked only on the forced paths (await
//! timeout, explicit cancel), never on a normal exit. It is
//! fire-and-forget: the tracker does not re-verify that the process
//! actually died before finalizing.

use async_trait::async_trait;
use tracing::debug;

use crate::process::ProcessChild;

/// Strategy applied to the child when an execution is forcibly ended.
#[async_trait]
pub trait ProcessStopper: Send + Sync + 'static {
    /// Requests that the child stop. Best effort; errors are the
    /// implementation's to log.
    async fn stop(&self, child: &mut dyn ProcessChild);

    /// Human-readable name for logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}

/// Default strategy: forceful OS-level termination.
#[derive(Clone, Copy, Debug, Default)]
pub struct ForceStopper;

#[async_trait]
impl ProcessStopper for ForceStopper {
    async fn stop(&self, child: &mut dyn ProcessChild) {
        if let Err(e) = child.kill().await {
            debug!(pid = %child.pid(), error = %e, "force stop failed");
        }
    }
}

/// Detects timeouts without destructive side effects: the process is
/// left running.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopStopper;

#[async_trait]
impl ProcessStopper for NoopStopper {
    async fn stop(&self, child: &mut dyn ProcessChild) {
        debug!(pid = %child.pid(), "no-op stopper leaves the process running");
    }
}
