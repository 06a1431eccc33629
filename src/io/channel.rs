//! # Bounded byte channel for streaming output.
//!
//! [`OutputChannel`] is the producer half the pumps write into;
//! [`OutputReader`] is the pull half handed to the consumer. The channel
//! is a thin wrapper over [`tokio::sync::mpsc`] at byte granularity:
//!
//! ## Rules
//! - **Bounded**: the queue holds at most its configured capacity;
//!   a push suspends when full. This is the backpressure contract, the
//!   buffer never grows unbounded.
//! - **Nothing lost on close**: when the producers drop, bytes already
//!   queued stay readable; pulls serve them and only then report the end
//!   of the stream.
//! - **Single consumer**: one reader owns the pull side.

use tokio::sync::mpsc;

/// Default capacity of the streaming output queue, in bytes.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// How many bytes a single pull asks the queue for at most.
const PULL_BATCH: usize = 4096;

/// Producer half of the bounded byte queue.
///
/// Cheap to clone; all clones feed the same reader (stdout and a merged
/// stderr use this).
#[derive(Clone)]
pub struct OutputChannel {
    tx: mpsc::Sender<u8>,
}

impl OutputChannel {
    /// Creates a channel with the given byte capacity (clamped to 1).
    pub fn new(capacity: usize) -> (Self, OutputReader) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            Self { tx },
            OutputReader {
                rx,
                pending: Vec::new(),
            },
        )
    }

    /// Pushes a chunk, suspending while the queue is full.
    ///
    /// Returns `false` when the reader is gone; the rest of the chunk is
    /// discarded in that case and later pushes become no-ops.
    pub async fn push(&self, chunk: &[u8]) -> bool {
        for &b in chunk {
            if self.tx.send(b).await.is_err() {
                return false;
            }
        }
        true
    }
}

/// Pull handle over the streaming output queue.
///
/// Offers a raw chunk pull plus newline-aware line decoding. Once the
/// producers finish, remaining bytes are served before the end of the
/// stream is reported.
pub struct OutputReader {
    rx: mpsc::Receiver<u8>,
    /// Bytes pulled from the queue but not yet handed out (line scanning
    /// leftovers and drained remainders).
    pending: Vec<u8>,
}

impl std::fmt::Debug for OutputReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OutputReader")
            .field("pending", &self.pending.len())
            .finish()
    }
}

impl OutputReader {
    /// Pulls the next chunk of raw bytes.
    ///
    /// Suspends while the queue is empty and the process still runs.
    /// Returns `None` once the stream is closed and fully consumed.
    pub async fn pull(&mut self) -> Option<Vec<u8>> {
        if !self.pending.is_empty() {
            return Some(std::mem::take(&mut self.pending));
        }
        let mut batch = Vec::new();
        let n = self.rx.recv_many(&mut batch, PULL_BATCH).await;
        if n == 0 {
            None
        } else {
            Some(batch)
        }
    }

    /// Pulls the next newline-terminated line, decoded lossily.
    ///
    /// The trailing `\n` (and a preceding `\r`) is stripped. The last
    /// line is returned even when the stream ends without a newline.
    /// Returns `None` once the stream is exhausted.
    pub async fn next_line(&mut self) -> Option<String> {
        loop {
            if let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
                let rest = self.pending.split_off(pos + 1);
                let mut line = std::mem::replace(&mut self.pending, rest);
                line.pop();
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Some(String::from_utf8_lossy(&line).into_owned());
            }
            let mut batch = Vec::new();
            let n = self.rx.recv_many(&mut batch, PULL_BATCH).await;
            if n == 0 {
                if self.pending.is_empty() {
                    return None;
                }
                let line = std::mem::take(&mut self.pending);
                return Some(String::from_utf8_lossy(&line).into_owned());
            }
            self.pending.extend_from_slice(&batch);
        }
    }

    /// Drains everything still queued, until the producers are gone.
    ///
    /// Used when a finished execution materializes streamed output into
    /// a final buffer so nothing already produced is lost.
    pub(crate) async fn drain(&mut self) -> Vec<u8> {
        let mut out = std::mem::take(&mut self.pending);
        while let Some(chunk) = self.pull().await {
            out.extend_from_slice(&chunk);
        }
        out
    }

    /// Drains the queue into the reader's own pending buffer.
    ///
    /// Afterwards every already-produced byte is served by later pulls
    /// even though the channel is closed.
    pub(crate) async fn buffer_remaining(&mut self) {
        let drained = self.drain().await;
        self.pending = drained;
    }
}
