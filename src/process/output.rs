//! # Result surface: pid, exit code, and captured output.
//!
//! Three concerns live here:
//! - [`Pid`]: the child's OS pid, or an explicit unsupported sentinel.
//!   A backend that cannot report a pid returns [`Pid::Unsupported`],
//!   which is distinguishable from any real pid (including zero).
//! - [`OutputSnapshot`]: a bounded head+tail capture of everything the
//!   pumps relayed, used to render truncated output into error messages
//!   without ever growing unbounded.
//! - [`ExecResult`] / [`ExecOutput`]: what a finished execution exposes.

use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::ExecError;
use crate::io::OutputReader;

/// Process id of a spawned child, or an explicit "not available" marker.
///
/// The sentinel is a distinct variant rather than a magic number, so a
/// real pid of zero (possible on some transports) is never ambiguous.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pid {
    /// A real OS process id.
    Id(u32),
    /// The backend cannot report a pid for this child.
    Unsupported,
}

impl Pid {
    /// Returns the numeric pid when one is available.
    pub fn id(&self) -> Option<u32> {
        match self {
            Pid::Id(p) => Some(*p),
            Pid::Unsupported => None,
        }
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pid::Id(p) => write!(f, "{p}"),
            Pid::Unsupported => f.write_str("unsupported"),
        }
    }
}

/// Characters kept from the start of the captured output.
const SNAPSHOT_HEAD: usize = 2500;
/// Characters kept from the end of the captured output.
const SNAPSHOT_TAIL: usize = 2500;

/// Bounded head+tail capture of relayed output, for diagnostics.
///
/// Every chunk a pump relays is recorded here regardless of capture
/// mode, so timeout/cancel/exit-code failures can always show what the
/// process produced so far. Memory stays bounded: the first
/// `SNAPSHOT_HEAD` bytes and the last `SNAPSHOT_TAIL` bytes are kept,
/// everything in between is counted and elided at render time.
///
/// Cheap to clone; all clones share one buffer.
#[derive(Clone, Default)]
pub struct OutputSnapshot {
    inner: Arc<Mutex<SnapshotInner>>,
}

#[derive(Default)]
struct SnapshotInner {
    head: Vec<u8>,
    tail: VecDeque<u8>,
    total: u64,
}

impl OutputSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a relayed chunk.
    pub fn record(&self, chunk: &[u8]) {
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        inner.total += chunk.len() as u64;
        let mut rest = chunk;
        if inner.head.len() < SNAPSHOT_HEAD {
            let take = (SNAPSHOT_HEAD - inner.head.len()).min(rest.len());
            inner.head.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
        }
        for &b in rest {
            if inner.tail.len() == SNAPSHOT_TAIL {
                inner.tail.pop_front();
            }
            inner.tail.push_back(b);
        }
    }

    /// True if nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .total
            == 0
    }

    /// Renders the capture, eliding the middle when it exceeds the bound.
    ///
    /// The rendering is `head + "[... N bytes elided ...]" + tail` when
    /// more was produced than the snapshot keeps, or the exact bytes
    /// otherwise. Invalid UTF-8 is replaced, never an error.
    pub fn render(&self) -> String {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let kept = (inner.head.len() + inner.tail.len()) as u64;
        let elided = inner.total - kept;
        let mut out = String::from_utf8_lossy(&inner.head).into_owned();
        if elided > 0 {
            out.push_str(&format!("\n[... {elided} bytes elided ...]\n"));
        }
        if !inner.tail.is_empty() {
            let tail: Vec<u8> = inner.tail.iter().copied().collect();
            out.push_str(&String::from_utf8_lossy(&tail));
        }
        out
    }
}

/// Output access on a finished [`ExecResult`].
#[derive(Debug)]
pub enum ExecOutput {
    /// Output capture was not requested at launch.
    Unavailable,
    /// Fully materialized bytes. Repeated reads see identical bytes.
    Buffered(Vec<u8>),
    /// Streaming pull handle. Bytes produced before completion are
    /// latched and served by its pulls; the channel behind it is closed.
    Streamed(OutputReader),
    /// The streaming reader was claimed from the tracker before the
    /// process finished; the bytes went to its holder.
    Claimed,
}

/// Outcome of a finished process execution.
///
/// Created exactly once, at the end of the completion sequence, after
/// exit-code validation has run. Immutable from then on.
#[derive(Debug)]
pub struct ExecResult {
    /// Pid of the child, or [`Pid::Unsupported`].
    pub pid: Pid,
    /// Observed exit code.
    pub exit_code: i32,
    /// Captured output, if capture was enabled.
    pub output: ExecOutput,
}

impl ExecResult {
    /// Borrows the fully buffered output bytes.
    ///
    /// Fails with [`ExecError::IllegalUse`] when capture was never
    /// enabled, or when the streaming reader was claimed and the bytes
    /// therefore live with its holder.
    pub fn output_bytes(&self) -> Result<&[u8], ExecError> {
        match &self.output {
            ExecOutput::Buffered(bytes) => Ok(bytes),
            ExecOutput::Unavailable => Err(ExecError::IllegalUse(
                "output was not captured: enable capture on the launcher before reading it".into(),
            )),
            ExecOutput::Streamed(_) => Err(ExecError::IllegalUse(
                "output was captured in streaming mode; pull it from the output reader".into(),
            )),
            ExecOutput::Claimed => Err(ExecError::IllegalUse(
                "streamed output was claimed from the tracker; read it from the output reader"
                    .into(),
            )),
        }
    }

    /// Consumes the result, returning its output access.
    pub fn into_output(self) -> ExecOutput {
        self.output
    }

    /// Consumes the result, returning the streaming reader if the
    /// output was materialized in streaming mode and never claimed.
    pub fn into_output_reader(self) -> Option<OutputReader> {
        match self.output {
            ExecOutput::Streamed(reader) => Some(reader),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_sentinel_is_distinct_from_zero() {
        assert_ne!(Pid::Id(0), Pid::Unsupported);
        assert_eq!(Pid::Id(0).id(), Some(0));
        assert_eq!(Pid::Unsupported.id(), None);
    }

    #[test]
    fn snapshot_exact_below_bound() {
        let snap = OutputSnapshot::new();
        snap.record(b"hello ");
        snap.record(b"world");
        assert_eq!(snap.render(), "hello world");
    }

    #[test]
    fn snapshot_elides_middle_above_bound() {
        let snap = OutputSnapshot::new();
        let chunk = vec![b'x'; 2500];
        snap.record(&chunk);
        snap.record(&vec![b'm'; 1000]);
        snap.record(&vec![b'y'; 2500]);
        let rendered = snap.render();
        assert!(rendered.starts_with(&"x".repeat(2500)));
        assert!(rendered.ends_with(&"y".repeat(2500)));
        assert!(rendered.contains("[... 1000 bytes elided ...]"));
    }

    #[test]
    fn snapshot_tail_keeps_latest_bytes() {
        let snap = OutputSnapshot::new();
        snap.record(&vec![b'a'; 6000]);
        snap.record(b"END");
        assert!(snap.render().ends_with("END"));
    }

    #[test]
    fn output_bytes_errors_when_not_captured() {
        let res = ExecResult {
            pid: Pid::Unsupported,
            exit_code: 0,
            output: ExecOutput::Unavailable,
        };
        assert!(matches!(
            res.output_bytes(),
            Err(ExecError::IllegalUse(_))
        ));
    }

    #[test]
    fn buffered_reads_are_idempotent() {
        let res = ExecResult {
            pid: Pid::Id(42),
            exit_code: 0,
            output: ExecOutput::Buffered(b"same bytes".to_vec()),
        };
        let first = res.output_bytes().unwrap().to_vec();
        let second = res.output_bytes().unwrap().to_vec();
        assert_eq!(first, second);
    }
}
