//! Error types raised by the execution engine.
//!
//! One enum, [`ExecError`], covers the whole failure surface:
//!
//! - [`ExecError::Initialization`] - the native spawn call failed.
//! - [`ExecError::UnexpectedExitCode`] - the observed code is outside a
//!   configured allowed set.
//! - [`ExecError::Timeout`] - an await exceeded its bound.
//! - [`ExecError::Cancelled`] - the tracker was cancelled explicitly.
//! - [`ExecError::StreamClose`] - closing the child's pipes failed;
//!   aggregated with suppressed secondary causes.
//! - [`ExecError::IllegalUse`] - state-machine violations by the caller.
//! - [`ExecError::ListenerRejected`] - a lifecycle listener failed after
//!   a result was produced.
//!
//! Timeout, cancellation, and exit-code failures all carry an
//! [`ExecContext`] so their messages uniformly include the command, the
//! working directory, the non-empty environment overlay, and a truncated
//! rendering of the output captured so far.

use std::fmt;
use std::io;
use std::time::Duration;

use thiserror::Error;

use crate::process::{CommandSpec, OutputSnapshot};

/// Launch context attached to user-facing failures.
///
/// Rendered into the error message; kept as pre-formatted strings so the
/// error type stays cheap to move and independent of the live tracker.
#[derive(Debug)]
pub struct ExecContext {
    /// Full command line.
    pub command: String,
    /// Working directory, if one was configured.
    pub working_dir: Option<String>,
    /// Rendered environment overlay, if non-empty.
    pub env: Option<String>,
    /// Truncated captured output, if any was produced.
    pub output: Option<String>,
}

impl ExecContext {
    /// Builds the context from the frozen spec and the output snapshot.
    pub(crate) fn new(spec: &CommandSpec, snapshot: &OutputSnapshot) -> Self {
        Self {
            command: spec.command_line(),
            working_dir: spec
                .current_dir
                .as_ref()
                .map(|d| d.display().to_string()),
            env: spec.describe_env(),
            output: if snapshot.is_empty() {
                None
            } else {
                Some(snapshot.render())
            },
        }
    }
}

impl fmt::Display for ExecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "command: {}", self.command)?;
        if let Some(dir) = &self.working_dir {
            write!(f, "\nworking directory: {dir}")?;
        }
        if let Some(env) = &self.env {
            write!(f, "\nenvironment overlay: {env}")?;
        }
        if let Some(out) = &self.output {
            write!(f, "\noutput so far:\n{out}")?;
        }
        Ok(())
    }
}

/// Human description of a duration, pluralized correctly.
///
/// Whole seconds render as "1 second" / "3 seconds"; sub-second bounds
/// render in milliseconds; fractional seconds keep one decimal.
pub(crate) fn describe_duration(d: Duration) -> String {
    let ms = d.as_millis();
    if ms >= 1000 {
        if ms % 1000 == 0 {
            let s = ms / 1000;
            format!("{s} second{}", if s == 1 { "" } else { "s" })
        } else {
            format!("{:.1} seconds", d.as_secs_f64())
        }
    } else {
        format!("{ms} millisecond{}", if ms == 1 { "" } else { "s" })
    }
}

/// Errors produced by launching, awaiting, or cancelling an execution.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ExecError {
    /// The native spawn call itself failed.
    #[error("failed to start process '{program}': {source}")]
    Initialization {
        /// Program that failed to start.
        program: String,
        /// OS error code, when the platform reported one.
        os_code: Option<i32>,
        /// Underlying spawn error.
        #[source]
        source: io::Error,
    },

    /// The process exited with a code outside the configured allowed set.
    #[error("process exited with unexpected code {code} (allowed: {allowed:?})\n{context}")]
    UnexpectedExitCode {
        /// Observed exit code.
        code: i32,
        /// The configured allowed set.
        allowed: Vec<i32>,
        /// Launch context for the message.
        context: Box<ExecContext>,
    },

    /// An await on the tracker exceeded its bound.
    #[error("process did not complete within {human}{}\n{context}", exit_note(exit_code))]
    Timeout {
        /// The configured bound.
        limit: Duration,
        /// Pre-rendered pluralized description of the bound.
        human: String,
        /// Exit code, when the process had already exited.
        exit_code: Option<i32>,
        /// Last observed phase of the background completion task.
        phase: String,
        /// Launch context for the message.
        context: Box<ExecContext>,
    },

    /// The tracker was cancelled through [`cancel`](crate::ExecTracker::cancel).
    #[error("process execution cancelled: {reason}\n{context}")]
    Cancelled {
        /// Reason supplied by the canceller.
        reason: String,
        /// Launch context for the message.
        context: Box<ExecContext>,
    },

    /// Closing the child's pipes failed after the pumps stopped.
    #[error("failed to close process streams: {primary}")]
    StreamClose {
        /// First close failure observed.
        primary: io::Error,
        /// Further close failures, suppressed under the primary.
        secondary: Vec<io::Error>,
    },

    /// The engine was driven through an illegal state transition.
    #[error("illegal use: {0}")]
    IllegalUse(String),

    /// A lifecycle listener failed after a result was produced.
    #[error("lifecycle listener rejected the execution during {stage}: {message}")]
    ListenerRejected {
        /// Which callback failed.
        stage: &'static str,
        /// The listener's own failure message.
        message: String,
    },
}

/// Formats the "exit code already observed" note for timeout messages.
fn exit_note(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!(" (exit code {c} already observed)"),
        None => String::new(),
    }
}

impl ExecError {
    /// Short stable label (snake_case) for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ExecError::Initialization { .. } => "exec_initialization",
            ExecError::UnexpectedExitCode { .. } => "exec_unexpected_exit_code",
            ExecError::Timeout { .. } => "exec_timeout",
            ExecError::Cancelled { .. } => "exec_cancelled",
            ExecError::StreamClose { .. } => "exec_stream_close",
            ExecError::IllegalUse(_) => "exec_illegal_use",
            ExecError::ListenerRejected { .. } => "exec_listener_rejected",
        }
    }

    /// Builds a [`ExecError::Timeout`] with a pre-rendered description.
    pub(crate) fn timeout(
        limit: Duration,
        exit_code: Option<i32>,
        phase: String,
        context: ExecContext,
    ) -> Self {
        ExecError::Timeout {
            limit,
            human: describe_duration(limit),
            exit_code,
            phase,
            context: Box::new(context),
        }
    }

    /// Folds a list of close failures into one aggregated error.
    ///
    /// Returns `None` for an empty list. The first failure becomes the
    /// primary cause; the rest are kept as suppressed secondaries.
    pub(crate) fn from_close_errors(mut errors: Vec<io::Error>) -> Option<Self> {
        if errors.is_empty() {
            return None;
        }
        let primary = errors.remove(0);
        Some(ExecError::StreamClose {
            primary,
            secondary: errors,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn context() -> ExecContext {
        let spec = CommandSpec {
            program: "sh".into(),
            args: vec!["-c".into(), "exit 3".into()],
            current_dir: Some("/tmp/work".into()),
            env: {
                let mut env = BTreeMap::new();
                env.insert("FOO".into(), Some("bar".into()));
                env
            },
            allowed_codes: BTreeSet::new(),
        };
        let snap = OutputSnapshot::new();
        snap.record(b"partial output");
        ExecContext::new(&spec, &snap)
    }

    #[test]
    fn durations_pluralize() {
        assert_eq!(describe_duration(Duration::from_secs(1)), "1 second");
        assert_eq!(describe_duration(Duration::from_secs(3)), "3 seconds");
        assert_eq!(describe_duration(Duration::from_millis(1)), "1 millisecond");
        assert_eq!(
            describe_duration(Duration::from_millis(250)),
            "250 milliseconds"
        );
        assert_eq!(
            describe_duration(Duration::from_millis(1500)),
            "1.5 seconds"
        );
    }

    #[test]
    fn timeout_message_contains_bound_and_context() {
        let err = ExecError::timeout(
            Duration::from_secs(3),
            Some(7),
            "Running".into(),
            context(),
        );
        let msg = err.to_string();
        assert!(msg.contains("3 seconds"));
        assert!(msg.contains("exit code 7"));
        assert!(msg.contains("command: sh -c exit 3"));
        assert!(msg.contains("working directory: /tmp/work"));
        assert!(msg.contains("FOO=bar"));
        assert!(msg.contains("partial output"));
    }

    #[test]
    fn close_errors_aggregate_first_as_primary() {
        let errs = vec![
            io::Error::new(io::ErrorKind::Other, "first"),
            io::Error::new(io::ErrorKind::Other, "second"),
        ];
        let agg = ExecError::from_close_errors(errs).unwrap();
        match agg {
            ExecError::StreamClose { primary, secondary } => {
                assert_eq!(primary.to_string(), "first");
                assert_eq!(secondary.len(), 1);
                assert_eq!(secondary[0].to_string(), "second");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(ExecError::from_close_errors(Vec::new()).is_none());
    }

    #[test]
    fn labels_are_stable() {
        assert_eq!(
            ExecError::IllegalUse("x".into()).as_label(),
            "exec_illegal_use"
        );
    }
}
