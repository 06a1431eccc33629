//! # ListenerSet: panic-isolated fan-out over lifecycle listeners.
//!
//! Invokes each listener in registration order, converting both returned
//! faults and panics into [`ExecError::ListenerRejected`] so the engine
//! never unwinds through a listener. The first failing listener stops
//! the fan-out for that callback.

use std::sync::Arc;

use futures::FutureExt;

use super::listener::{ExecListener, ListenerFault};
use crate::core::Launcher;
use crate::error::ExecError;
use crate::process::{ExecResult, Pid};

/// Ordered set of listeners for one launch.
#[derive(Clone, Default)]
pub(crate) struct ListenerSet {
    listeners: Vec<Arc<dyn ExecListener>>,
}

impl ListenerSet {
    pub(crate) fn new(listeners: Vec<Arc<dyn ExecListener>>) -> Self {
        Self { listeners }
    }

    pub(crate) async fn before_start(&self, launcher: &mut Launcher) -> Result<(), ExecError> {
        for l in &self.listeners {
            let name = l.name();
            let call = std::panic::AssertUnwindSafe(l.before_start(launcher)).catch_unwind();
            settle(call.await, "before_start", name)?;
        }
        Ok(())
    }

    pub(crate) async fn after_start(&self, pid: Pid) -> Result<(), ExecError> {
        for l in &self.listeners {
            let name = l.name();
            let call = std::panic::AssertUnwindSafe(l.after_start(pid)).catch_unwind();
            settle(call.await, "after_start", name)?;
        }
        Ok(())
    }

    pub(crate) async fn after_finish(&self, result: &ExecResult) -> Result<(), ExecError> {
        for l in &self.listeners {
            let name = l.name();
            let call = std::panic::AssertUnwindSafe(l.after_finish(result)).catch_unwind();
            settle(call.await, "after_finish", name)?;
        }
        Ok(())
    }

    pub(crate) async fn after_stop(&self) -> Result<(), ExecError> {
        let mut first_failure = None;
        for l in &self.listeners {
            let name = l.name();
            let call = std::panic::AssertUnwindSafe(l.after_stop()).catch_unwind();
            // after_stop runs for every listener even when one fails.
            if let Err(e) = settle(call.await, "after_stop", name) {
                first_failure.get_or_insert(e);
            }
        }
        match first_failure {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }
}

/// Converts a caught callback outcome into the engine error.
fn settle(
    outcome: Result<Result<(), ListenerFault>, Box<dyn std::any::Any + Send>>,
    stage: &'static str,
    listener: &'static str,
) -> Result<(), ExecError> {
    match outcome {
        Ok(Ok(())) => Ok(()),
        Ok(Err(fault)) => Err(ExecError::ListenerRejected {
            stage,
            message: format!("{listener}: {fault}"),
        }),
        Err(panic) => Err(ExecError::ListenerRejected {
            stage,
            message: format!("{listener} panicked: {}", panic_message(&panic)),
        }),
    }
}

/// Best-effort extraction of a panic payload message.
fn panic_message(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Panicking;

    #[async_trait::async_trait]
    impl ExecListener for Panicking {
        async fn after_stop(&self) -> Result<(), ListenerFault> {
            panic!("listener blew up");
        }

        fn name(&self) -> &'static str {
            "panicking"
        }
    }

    struct Counting(Arc<AtomicUsize>);

    #[async_trait::async_trait]
    impl ExecListener for Counting {
        async fn after_stop(&self) -> Result<(), ListenerFault> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn panics_become_listener_rejected() {
        let set = ListenerSet::new(vec![Arc::new(Panicking)]);
        let err = set.after_stop().await.unwrap_err();
        match err {
            ExecError::ListenerRejected { stage, message } => {
                assert_eq!(stage, "after_stop");
                assert!(message.contains("listener blew up"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn after_stop_runs_every_listener_despite_failures() {
        let count = Arc::new(AtomicUsize::new(0));
        let set = ListenerSet::new(vec![
            Arc::new(Panicking),
            Arc::new(Counting(Arc::clone(&count))),
        ]);
        assert!(set.after_stop().await.is_err());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
