//! # Byte sinks and sources for the stream pumps.
//!
//! [`ByteSink`] receives what a pump reads from the child's stdout or
//! stderr; [`ByteSource`] feeds the child's stdin. Both are async trait
//! seams so callers can plug in their own endpoints.
//!
//! ## Composition rules
//! - [`NullSink`] is the no-op default. Installing a sink over it simply
//!   substitutes it.
//! - Installing a sink over a real one creates a [`TeeSink`], a fan-out
//!   that writes to both branches. A write failure in either branch
//!   fails the whole pump. Close attempts both branches even when the
//!   first fails, and reports both failures if both fail.

use std::io;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use super::channel::OutputChannel;

/// Receiving end of an output pump.
#[async_trait]
pub trait ByteSink: Send + 'static {
    /// Writes one relayed chunk. May suspend (backpressure).
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()>;

    /// Flushes and releases the sink. Called once, after the pump stops.
    async fn close(&mut self) -> io::Result<()>;

    /// True for the no-op sink; composition substitutes it instead of
    /// teeing over it.
    fn is_null(&self) -> bool {
        false
    }
}

#[async_trait]
impl ByteSink for Box<dyn ByteSink> {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        (**self).write(chunk).await
    }

    async fn close(&mut self) -> io::Result<()> {
        (**self).close().await
    }

    fn is_null(&self) -> bool {
        (**self).is_null()
    }
}

/// Feeding end of the stdin pump. Exhausted at `Ok(0)`.
#[async_trait]
pub trait ByteSource: Send + 'static {
    /// Reads the next chunk into `buf`; `Ok(0)` means end of input.
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Discards everything. The default sink when no capture or redirection
/// is configured.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

#[async_trait]
impl ByteSink for NullSink {
    async fn write(&mut self, _chunk: &[u8]) -> io::Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }

    fn is_null(&self) -> bool {
        true
    }
}

/// Accumulates into a shared growable buffer (buffered capture mode).
///
/// Clones share one buffer, which is how a merged stderr lands in the
/// same capture as stdout.
#[derive(Clone, Default)]
pub struct BufferSink {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the bytes accumulated so far.
    ///
    /// Useful when this sink was installed as a tee branch and its
    /// holder wants the copy after the run.
    pub fn contents(&self) -> Vec<u8> {
        self.buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Handle to the shared buffer, for materialization.
    pub(crate) fn shared(&self) -> Arc<Mutex<Vec<u8>>> {
        Arc::clone(&self.buf)
    }

    /// Takes the accumulated bytes out of the shared buffer.
    pub(crate) fn take_from(buf: &Arc<Mutex<Vec<u8>>>) -> Vec<u8> {
        std::mem::take(&mut *buf.lock().unwrap_or_else(PoisonError::into_inner))
    }
}

#[async_trait]
impl ByteSink for BufferSink {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.buf
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .extend_from_slice(chunk);
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Pushes into the bounded output channel (streaming capture mode).
///
/// The push suspends while the channel is full; if the reader is gone,
/// remaining output is discarded rather than failing the run.
#[derive(Clone)]
pub struct ChannelSink {
    chan: OutputChannel,
    disconnected: bool,
}

impl ChannelSink {
    pub fn new(chan: OutputChannel) -> Self {
        Self {
            chan,
            disconnected: false,
        }
    }
}

#[async_trait]
impl ByteSink for ChannelSink {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        if self.disconnected {
            return Ok(());
        }
        if !self.chan.push(chunk).await {
            trace!("output reader dropped; discarding further streamed output");
            self.disconnected = true;
        }
        Ok(())
    }

    async fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Adapts any [`AsyncWrite`] into a sink.
pub struct WriterSink<W> {
    writer: W,
}

impl<W: AsyncWrite + Send + Unpin + 'static> WriterSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }
}

#[async_trait]
impl<W: AsyncWrite + Send + Unpin + 'static> ByteSink for WriterSink<W> {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.writer.write_all(chunk).await
    }

    async fn close(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

/// Fan-out sink duplicating writes to two branches.
pub struct TeeSink {
    left: Box<dyn ByteSink>,
    right: Box<dyn ByteSink>,
}

impl TeeSink {
    pub fn new(left: Box<dyn ByteSink>, right: Box<dyn ByteSink>) -> Self {
        Self { left, right }
    }
}

#[async_trait]
impl ByteSink for TeeSink {
    async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.left.write(chunk).await?;
        self.right.write(chunk).await
    }

    async fn close(&mut self) -> io::Result<()> {
        let first = self.left.close().await;
        let second = self.right.close().await;
        match (first, second) {
            (Ok(()), Ok(())) => Ok(()),
            (Err(e), Ok(())) | (Ok(()), Err(e)) => Err(e),
            (Err(a), Err(b)) => Err(io::Error::new(
                a.kind(),
                format!("both tee branches failed to close: {a}; also: {b}"),
            )),
        }
    }
}

/// Composes a sink stack: the no-op sink is substituted, anything else
/// is teed.
pub(crate) fn compose_sinks(
    base: Box<dyn ByteSink>,
    added: Vec<Box<dyn ByteSink>>,
) -> Box<dyn ByteSink> {
    let mut current = base;
    for sink in added {
        current = if current.is_null() {
            sink
        } else {
            Box::new(TeeSink::new(current, sink))
        };
    }
    current
}

/// Empty stdin: the child observes end of input immediately.
#[derive(Clone, Copy, Debug, Default)]
pub struct EmptySource;

#[async_trait]
impl ByteSource for EmptySource {
    async fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
        Ok(0)
    }
}

/// Feeds a fixed byte buffer to the child's stdin.
pub struct BytesSource {
    data: Vec<u8>,
    pos: usize,
}

impl BytesSource {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: data.into(),
            pos: 0,
        }
    }
}

#[async_trait]
impl ByteSource for BytesSource {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = &self.data[self.pos..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.pos += n;
        Ok(n)
    }
}

/// Adapts any [`AsyncRead`] into a stdin source.
pub struct ReaderSource<R> {
    reader: R,
}

impl<R: AsyncRead + Send + Unpin + 'static> ReaderSource<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

#[async_trait]
impl<R: AsyncRead + Send + Unpin + 'static> ByteSource for ReaderSource<R> {
    async fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Sink that fails on demand, for tee failure tests.
    struct FailingSink {
        fail_write: bool,
        fail_close: bool,
        closed: Arc<Mutex<bool>>,
    }

    impl FailingSink {
        fn new(fail_write: bool, fail_close: bool) -> (Self, Arc<Mutex<bool>>) {
            let closed = Arc::new(Mutex::new(false));
            (
                Self {
                    fail_write,
                    fail_close,
                    closed: Arc::clone(&closed),
                },
                closed,
            )
        }
    }

    #[async_trait]
    impl ByteSink for FailingSink {
        async fn write(&mut self, _chunk: &[u8]) -> io::Result<()> {
            if self.fail_write {
                Err(io::Error::new(io::ErrorKind::Other, "write refused"))
            } else {
                Ok(())
            }
        }

        async fn close(&mut self) -> io::Result<()> {
            *self.closed.lock().unwrap() = true;
            if self.fail_close {
                Err(io::Error::new(io::ErrorKind::Other, "close refused"))
            } else {
                Ok(())
            }
        }
    }

    #[tokio::test]
    async fn buffer_sink_accumulates() {
        let sink = BufferSink::new();
        let shared = sink.shared();
        let mut sink = sink;
        sink.write(b"ab").await.unwrap();
        sink.write(b"cd").await.unwrap();
        assert_eq!(BufferSink::take_from(&shared), b"abcd");
    }

    #[tokio::test]
    async fn tee_duplicates_writes() {
        let left = BufferSink::new();
        let right = BufferSink::new();
        let (lb, rb) = (left.shared(), right.shared());
        let mut tee = TeeSink::new(Box::new(left), Box::new(right));
        tee.write(b"copy me").await.unwrap();
        tee.close().await.unwrap();
        assert_eq!(BufferSink::take_from(&lb), b"copy me");
        assert_eq!(BufferSink::take_from(&rb), b"copy me");
    }

    #[tokio::test]
    async fn tee_write_fails_when_either_branch_fails() {
        let (bad, _) = FailingSink::new(true, false);
        let mut tee = TeeSink::new(Box::new(BufferSink::new()), Box::new(bad));
        assert!(tee.write(b"x").await.is_err());
    }

    #[tokio::test]
    async fn tee_close_attempts_second_branch_and_reports_both() {
        let (first, _) = FailingSink::new(false, true);
        let (second, second_closed) = FailingSink::new(false, true);
        let mut tee = TeeSink::new(Box::new(first), Box::new(second));
        let err = tee.close().await.unwrap_err();
        assert!(*second_closed.lock().unwrap(), "second close not attempted");
        let msg = err.to_string();
        assert!(msg.contains("close refused"));
        assert!(msg.contains("also:"));
    }

    #[tokio::test]
    async fn composition_substitutes_null_then_tees() {
        let only = compose_sinks(
            Box::new(NullSink),
            vec![Box::new(BufferSink::new()) as Box<dyn ByteSink>],
        );
        assert!(!only.is_null());

        let buffer = BufferSink::new();
        let shared = buffer.shared();
        let mut stacked = compose_sinks(
            Box::new(buffer),
            vec![
                Box::new(BufferSink::new()) as Box<dyn ByteSink>,
                Box::new(NullSink) as Box<dyn ByteSink>,
            ],
        );
        stacked.write(b"fan out").await.unwrap();
        assert_eq!(BufferSink::take_from(&shared), b"fan out");
    }

    #[tokio::test]
    async fn bytes_source_reads_to_exhaustion() {
        let mut src = BytesSource::new(b"abc".to_vec());
        let mut buf = [0u8; 2];
        assert_eq!(src.read(&mut buf).await.unwrap(), 2);
        assert_eq!(&buf, b"ab");
        assert_eq!(src.read(&mut buf).await.unwrap(), 1);
        assert_eq!(buf[0], b'c');
        assert_eq!(src.read(&mut buf).await.unwrap(), 0);
    }
}
