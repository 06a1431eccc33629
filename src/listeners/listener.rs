//! # Lifecycle listener trait.
//!
//! `ExecListener` is the extension point for observing (and, in the
//! before-start window, still shaping) a launch. All four callbacks have
//! no-op defaults, so implementors override only what they need.
//!
//! ## Contract
//! - `before_start` runs before validation and spawn; it receives the
//!   launcher mutably and may still change the configuration.
//! - `after_start` runs once the child exists, with its pid.
//! - `after_finish` runs only after a successful, validated result.
//! - `after_stop` runs on **every** outcome, success or failure, as the
//!   last step before the caller is notified.
//!
//! A callback failure after a result was produced surfaces as
//! [`ListenerRejected`](crate::ExecError::ListenerRejected). Panics are
//! caught and treated the same way, so a misbehaving listener cannot
//! take the engine down.

use async_trait::async_trait;

use crate::core::Launcher;
use crate::process::{ExecResult, Pid};

/// Failure type lifecycle callbacks may return.
pub type ListenerFault = Box<dyn std::error::Error + Send + Sync>;

/// Hooks into the lifecycle of one process execution.
#[async_trait]
pub trait ExecListener: Send + Sync + 'static {
    /// Called before validation and spawn; may mutate the configuration.
    async fn before_start(&self, launcher: &mut Launcher) -> Result<(), ListenerFault> {
        let _ = launcher;
        Ok(())
    }

    /// Called immediately after a successful spawn.
    async fn after_start(&self, pid: Pid) -> Result<(), ListenerFault> {
        let _ = pid;
        Ok(())
    }

    /// Called after a normal, validated finish.
    async fn after_finish(&self, result: &ExecResult) -> Result<(), ListenerFault> {
        let _ = result;
        Ok(())
    }

    /// Called unconditionally, regardless of outcome.
    async fn after_stop(&self) -> Result<(), ListenerFault> {
        Ok(())
    }

    /// Human-readable name for logs.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }
}
