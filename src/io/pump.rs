//! # Stream pumps: relaying bytes between the child and the sinks.
//!
//! A pump moves bytes between the child's three OS pipes and the
//! configured sinks/sources, never blocks indefinitely on an empty or
//! full pipe, and stops only after draining everything the OS had
//! already buffered when the process exited normally.
//!
//! ## Modes
//! - **Shared task** (default): one task serves all three directions in
//!   round robin. Each direction is probed with a zero-length read
//!   attempt; when a full pass moves nothing, the task suspends for the
//!   poll interval or until stop is requested. It never sleeps while a
//!   stream has data ready.
//! - **Per-stream tasks**: one task per direction, each suspended
//!   directly on its stream plus the stop signal.
//!
//! ## Termination protocol
//! ```text
//! stop(finished_cleanly = true)    stop(finished_cleanly = false)
//!        │                                │
//!        ▼                                ▼
//!   drain until a full pass         exit at the next safe point,
//!   finds no more data,             no further draining
//!   then exit
//! ```
//!
//! After the pump tasks join, sinks are closed and the child's stdin is
//! shut down; close failures are collected for aggregation, except a
//! benign already-closed condition on stdin which is only traced.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::task::JoinSet;
use tokio::time;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::trace;

use crate::io::sink::{ByteSink, ByteSource};
use crate::process::backend::{ChildIo, InputStream, OutputStream};
use crate::process::OutputSnapshot;

/// Read/write chunk size for all pumps.
const CHUNK: usize = 8192;

/// Default suspend interval for an idle pump pass.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// How the pump work is scheduled across tasks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PumpMode {
    /// One task polls all three streams in round robin.
    #[default]
    Shared,
    /// One independent task per stream direction.
    PerStream,
}

/// Stop signal shared between the tracker and its pumps.
///
/// The tracker owns the transitions; pumps only observe. `stop` trips on
/// every shutdown; `force` additionally trips when the stop was not a
/// clean process exit, telling loops to skip draining.
pub(crate) struct PumpState {
    stop: CancellationToken,
    force: CancellationToken,
}

impl PumpState {
    fn new() -> Self {
        Self {
            stop: CancellationToken::new(),
            force: CancellationToken::new(),
        }
    }

    /// Requests pump shutdown. Idempotent.
    pub(crate) fn stop(&self, finished_cleanly: bool) {
        if !finished_cleanly {
            self.force.cancel();
        }
        self.stop.cancel();
    }

    pub(crate) fn stop_requested(&self) -> bool {
        self.stop.is_cancelled()
    }

    pub(crate) fn forced(&self) -> bool {
        self.force.is_cancelled()
    }

    pub(crate) fn stopped(&self) -> WaitForCancellationFuture<'_> {
        self.stop.cancelled()
    }

    pub(crate) fn force_stopped(&self) -> WaitForCancellationFuture<'_> {
        self.force.cancelled()
    }
}

/// Everything needed to wire pumps onto a spawned child.
pub(crate) struct PumpConfig {
    pub mode: PumpMode,
    pub io: ChildIo,
    pub stdout_sink: Box<dyn ByteSink>,
    pub stderr_sink: Box<dyn ByteSink>,
    pub stdin_source: Box<dyn ByteSource>,
    pub snapshot: OutputSnapshot,
    pub poll: Duration,
}

/// The set of running pump tasks plus their shared stop state.
pub(crate) struct PumpSet {
    tasks: JoinSet<Vec<io::Error>>,
    state: Arc<PumpState>,
}

impl PumpSet {
    /// Spawns the pump tasks for the given mode.
    pub(crate) fn start(cfg: PumpConfig) -> Self {
        let state = Arc::new(PumpState::new());
        let mut tasks = JoinSet::new();

        match cfg.mode {
            PumpMode::PerStream => {
                if let Some(stdin) = cfg.io.stdin {
                    tasks.spawn(pump_writer(stdin, cfg.stdin_source, Arc::clone(&state)));
                }
                if let Some(stdout) = cfg.io.stdout {
                    tasks.spawn(pump_reader(
                        stdout,
                        cfg.stdout_sink,
                        Arc::clone(&state),
                        cfg.snapshot.clone(),
                        cfg.poll,
                    ));
                }
                if let Some(stderr) = cfg.io.stderr {
                    tasks.spawn(pump_reader(
                        stderr,
                        cfg.stderr_sink,
                        Arc::clone(&state),
                        cfg.snapshot,
                        cfg.poll,
                    ));
                }
            }
            PumpMode::Shared => {
                tasks.spawn(pump_shared(SharedPump {
                    stdin: cfg.io.stdin,
                    source: cfg.stdin_source,
                    stdout: cfg.io.stdout,
                    stdout_sink: cfg.stdout_sink,
                    stderr: cfg.io.stderr,
                    stderr_sink: cfg.stderr_sink,
                    state: Arc::clone(&state),
                    snapshot: cfg.snapshot,
                    poll: cfg.poll,
                }));
            }
        }

        Self { tasks, state }
    }

    /// Signals all pumps to stop; clean stops drain first.
    pub(crate) fn stop(&self, finished_cleanly: bool) {
        self.state.stop(finished_cleanly);
    }

    /// Awaits all pump tasks and collects their close/relay failures.
    pub(crate) async fn join(&mut self) -> Vec<io::Error> {
        let mut errs = Vec::new();
        while let Some(res) = self.tasks.join_next().await {
            match res {
                Ok(mut task_errs) => errs.append(&mut task_errs),
                Err(join_err) if join_err.is_panic() => errs.push(io::Error::new(
                    io::ErrorKind::Other,
                    format!("stream pump panicked: {join_err}"),
                )),
                Err(_) => {} // aborted after the grace period expired
            }
        }
        errs
    }

    /// Aborts stragglers after a grace-period expiry.
    pub(crate) fn abort_all(&mut self) {
        self.tasks.abort_all();
    }
}

/// One step of a reading pump.
enum ReadStep {
    Data(usize),
    Eof,
    Retry,
    Stop,
    Fail(io::Error),
}

async fn read_step(stream: &mut OutputStream, buf: &mut [u8], state: &PumpState) -> ReadStep {
    tokio::select! {
        res = stream.read(buf) => match res {
            Ok(0) => ReadStep::Eof,
            Ok(n) => ReadStep::Data(n),
            Err(e) if e.kind() == io::ErrorKind::Interrupted => ReadStep::Retry,
            Err(e) => ReadStep::Fail(e),
        },
        _ = state.stopped() => ReadStep::Stop,
    }
}

/// Writes a chunk to the sink, abandoning the write on a forced stop.
///
/// Returns `false` when the pump should end (sink failure or forced
/// stop).
async fn write_or_force(
    sink: &mut Box<dyn ByteSink>,
    chunk: &[u8],
    state: &PumpState,
    errs: &mut Vec<io::Error>,
) -> bool {
    tokio::select! {
        res = sink.write(chunk) => match res {
            Ok(()) => true,
            Err(e) => {
                errs.push(e);
                false
            }
        },
        _ = state.force_stopped() => false,
    }
}

/// Drains a reader after a clean stop: keeps reading until one full
/// probe interval passes with no data, or the stream reports EOF.
async fn drain_reader(
    stream: &mut Option<OutputStream>,
    sink: &mut Box<dyn ByteSink>,
    snapshot: &OutputSnapshot,
    state: &PumpState,
    poll: Duration,
    errs: &mut Vec<io::Error>,
) {
    let mut buf = vec![0u8; CHUNK];
    loop {
        let step = match stream.as_mut() {
            None => break,
            Some(s) => match time::timeout(poll, s.read(&mut buf)).await {
                Err(_) => break, // a full pass found no more data
                Ok(Ok(0)) => ReadStep::Eof,
                Ok(Ok(n)) => ReadStep::Data(n),
                Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => ReadStep::Retry,
                Ok(Err(e)) => ReadStep::Fail(e),
            },
        };
        match step {
            ReadStep::Eof => *stream = None,
            ReadStep::Retry => {}
            ReadStep::Data(n) => {
                snapshot.record(&buf[..n]);
                if !write_or_force(sink, &buf[..n], state, errs).await {
                    break;
                }
            }
            ReadStep::Fail(e) => {
                errs.push(e);
                *stream = None;
            }
            // not produced by the probe above
            ReadStep::Stop => break,
        }
    }
}

/// Dedicated reader task (per-stream mode): child stdout or stderr into
/// its sink.
async fn pump_reader(
    stream: OutputStream,
    mut sink: Box<dyn ByteSink>,
    state: Arc<PumpState>,
    snapshot: OutputSnapshot,
    poll: Duration,
) -> Vec<io::Error> {
    let mut errs = Vec::new();
    let mut stream = Some(stream);
    let mut buf = vec![0u8; CHUNK];
    loop {
        let step = match stream.as_mut() {
            None => break,
            Some(s) => read_step(s, &mut buf, &state).await,
        };
        match step {
            ReadStep::Eof => stream = None,
            ReadStep::Retry => {}
            ReadStep::Data(n) => {
                snapshot.record(&buf[..n]);
                if !write_or_force(&mut sink, &buf[..n], &state, &mut errs).await {
                    break;
                }
            }
            ReadStep::Fail(e) => {
                errs.push(e);
                stream = None;
            }
            ReadStep::Stop => {
                if !state.forced() {
                    drain_reader(&mut stream, &mut sink, &snapshot, &state, poll, &mut errs)
                        .await;
                }
                break;
            }
        }
    }
    if let Err(e) = sink.close().await {
        errs.push(e);
    }
    errs
}

/// True for the benign "child already closed its end" stdin conditions.
fn stdin_gone(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::BrokenPipe | io::ErrorKind::NotConnected | io::ErrorKind::WriteZero
    )
}

/// Shuts the child's stdin down; an already-closed pipe is only traced.
async fn close_stdin(stdin: &mut InputStream, errs: &mut Vec<io::Error>) {
    match stdin.shutdown().await {
        Ok(()) => {}
        Err(e) if stdin_gone(&e) => trace!(error = %e, "stdin already closed"),
        Err(e) => errs.push(e),
    }
}

/// One step of the writing pump.
enum WriteStep {
    Fed(usize),
    SourceDone,
    SourceFail(io::Error),
    Stop,
}

/// Dedicated writer task (per-stream mode): source into child stdin.
///
/// Closes stdin as soon as the source is exhausted so the child observes
/// end of input without waiting for process shutdown.
async fn pump_writer(
    stream: InputStream,
    mut source: Box<dyn ByteSource>,
    state: Arc<PumpState>,
) -> Vec<io::Error> {
    let mut errs = Vec::new();
    let mut stdin = stream;
    let mut buf = vec![0u8; CHUNK];
    loop {
        let step = tokio::select! {
            res = source.read(&mut buf) => match res {
                Ok(0) => WriteStep::SourceDone,
                Ok(n) => WriteStep::Fed(n),
                Err(e) => WriteStep::SourceFail(e),
            },
            _ = state.stopped() => WriteStep::Stop,
        };
        match step {
            WriteStep::SourceDone | WriteStep::Stop => break,
            WriteStep::SourceFail(e) => {
                errs.push(e);
                break;
            }
            WriteStep::Fed(n) => {
                enum W {
                    Done(io::Result<()>),
                    Forced,
                }
                let wrote = tokio::select! {
                    res = stdin.write_all(&buf[..n]) => W::Done(res),
                    _ = state.force_stopped() => W::Forced,
                };
                match wrote {
                    W::Done(Ok(())) => {}
                    W::Done(Err(e)) if stdin_gone(&e) => {
                        trace!(error = %e, "child closed stdin; stopping input pump");
                        break;
                    }
                    W::Done(Err(e)) => {
                        errs.push(e);
                        break;
                    }
                    W::Forced => break,
                }
            }
        }
    }
    close_stdin(&mut stdin, &mut errs).await;
    errs
}

/// State of the single-task pump serving all three directions.
struct SharedPump {
    stdin: Option<InputStream>,
    source: Box<dyn ByteSource>,
    stdout: Option<OutputStream>,
    stdout_sink: Box<dyn ByteSink>,
    stderr: Option<OutputStream>,
    stderr_sink: Box<dyn ByteSink>,
    state: Arc<PumpState>,
    snapshot: OutputSnapshot,
    poll: Duration,
}

/// Probes one reader direction without blocking.
///
/// Returns `true` when the pass made progress (moved data, observed EOF,
/// or retired a failed stream).
async fn reader_probe(
    stream: &mut Option<OutputStream>,
    sink: &mut Box<dyn ByteSink>,
    snapshot: &OutputSnapshot,
    state: &PumpState,
    buf: &mut [u8],
    errs: &mut Vec<io::Error>,
) -> bool {
    let step = match stream.as_mut() {
        None => return false,
        Some(s) => match time::timeout(Duration::ZERO, s.read(buf)).await {
            Err(_) => return false, // nothing available right now
            Ok(Ok(0)) => ReadStep::Eof,
            Ok(Ok(n)) => ReadStep::Data(n),
            Ok(Err(e)) if e.kind() == io::ErrorKind::Interrupted => ReadStep::Retry,
            Ok(Err(e)) => ReadStep::Fail(e),
        },
    };
    match step {
        ReadStep::Eof => {
            *stream = None;
            true
        }
        ReadStep::Retry => true,
        ReadStep::Data(n) => {
            snapshot.record(&buf[..n]);
            write_or_force(sink, &buf[..n], state, errs).await
        }
        ReadStep::Fail(e) => {
            errs.push(e);
            *stream = None;
            true
        }
        // not produced by the probe above
        ReadStep::Stop => false,
    }
}

/// Probes the writer direction without blocking on the source.
async fn writer_probe(
    stdin: &mut Option<InputStream>,
    source: &mut Box<dyn ByteSource>,
    state: &PumpState,
    buf: &mut [u8],
    errs: &mut Vec<io::Error>,
) -> bool {
    if stdin.is_none() {
        return false;
    }
    let step = match time::timeout(Duration::ZERO, source.read(buf)).await {
        Err(_) => return false, // source has nothing ready
        Ok(Ok(0)) => WriteStep::SourceDone,
        Ok(Ok(n)) => WriteStep::Fed(n),
        Ok(Err(e)) => WriteStep::SourceFail(e),
    };
    match step {
        WriteStep::SourceDone => {
            if let Some(mut s) = stdin.take() {
                close_stdin(&mut s, errs).await;
            }
            true
        }
        WriteStep::SourceFail(e) => {
            errs.push(e);
            if let Some(mut s) = stdin.take() {
                close_stdin(&mut s, errs).await;
            }
            true
        }
        WriteStep::Fed(n) => {
            enum W {
                Done(io::Result<()>),
                Forced,
            }
            let wrote = {
                let Some(s) = stdin.as_mut() else {
                    return false;
                };
                tokio::select! {
                    res = s.write_all(&buf[..n]) => W::Done(res),
                    _ = state.force_stopped() => W::Forced,
                }
            };
            match wrote {
                W::Done(Ok(())) => true,
                W::Done(Err(e)) if stdin_gone(&e) => {
                    trace!(error = %e, "child closed stdin; stopping input pump");
                    *stdin = None;
                    true
                }
                W::Done(Err(e)) => {
                    errs.push(e);
                    *stdin = None;
                    true
                }
                W::Forced => false,
            }
        }
        // not produced by the probe above
        WriteStep::Stop => false,
    }
}

/// The shared-task pump loop: round robin over all three directions.
async fn pump_shared(mut p: SharedPump) -> Vec<io::Error> {
    let mut errs = Vec::new();
    let mut buf = vec![0u8; CHUNK];
    loop {
        if p.state.stop_requested() {
            if !p.state.forced() {
                drain_reader(
                    &mut p.stdout,
                    &mut p.stdout_sink,
                    &p.snapshot,
                    &p.state,
                    p.poll,
                    &mut errs,
                )
                .await;
                drain_reader(
                    &mut p.stderr,
                    &mut p.stderr_sink,
                    &p.snapshot,
                    &p.state,
                    p.poll,
                    &mut errs,
                )
                .await;
            }
            break;
        }
        if p.stdin.is_none() && p.stdout.is_none() && p.stderr.is_none() {
            // every direction finished early; nothing left but to wait
            p.state.stopped().await;
            continue;
        }
        let mut moved = false;
        moved |= writer_probe(&mut p.stdin, &mut p.source, &p.state, &mut buf, &mut errs).await;
        moved |= reader_probe(
            &mut p.stdout,
            &mut p.stdout_sink,
            &p.snapshot,
            &p.state,
            &mut buf,
            &mut errs,
        )
        .await;
        moved |= reader_probe(
            &mut p.stderr,
            &mut p.stderr_sink,
            &p.snapshot,
            &p.state,
            &mut buf,
            &mut errs,
        )
        .await;
        if !moved {
            tokio::select! {
                _ = time::sleep(p.poll) => {}
                _ = p.state.stopped() => {}
            }
        }
    }
    if let Some(mut stdin) = p.stdin.take() {
        close_stdin(&mut stdin, &mut errs).await;
    }
    if let Err(e) = p.stdout_sink.close().await {
        errs.push(e);
    }
    if let Err(e) = p.stderr_sink.close().await {
        errs.push(e);
    }
    errs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::sink::{BufferSink, BytesSource, EmptySource, NullSink};
    use tokio::io::AsyncWriteExt;

    fn boxed_read(
        r: impl tokio::io::AsyncRead + Send + Unpin + 'static,
    ) -> OutputStream {
        Box::new(r)
    }

    fn boxed_write(
        w: impl tokio::io::AsyncWrite + Send + Unpin + 'static,
    ) -> InputStream {
        Box::new(w)
    }

    #[tokio::test]
    async fn reader_drains_buffered_data_on_clean_stop() {
        let (mut far, near) = tokio::io::duplex(64);
        let sink = BufferSink::new();
        let shared = sink.shared();
        let state = Arc::new(PumpState::new());
        let task = tokio::spawn(pump_reader(
            boxed_read(near),
            Box::new(sink),
            Arc::clone(&state),
            OutputSnapshot::new(),
            Duration::from_millis(50),
        ));
        far.write_all(b"buffered before stop").await.unwrap();
        // Request a clean stop while data is still in flight.
        state.stop(true);
        drop(far);
        let errs = task.await.unwrap();
        assert!(errs.is_empty(), "unexpected errors: {errs:?}");
        assert_eq!(BufferSink::take_from(&shared), b"buffered before stop");
    }

    #[tokio::test]
    async fn reader_exits_without_draining_on_forced_stop() {
        let (_far, near) = tokio::io::duplex(64);
        let state = Arc::new(PumpState::new());
        let task = tokio::spawn(pump_reader(
            boxed_read(near),
            Box::new(NullSink),
            Arc::clone(&state),
            OutputSnapshot::new(),
            Duration::from_secs(10),
        ));
        state.stop(false);
        // A forced stop returns promptly even though the far end is open.
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .expect("forced stop did not end the pump")
            .unwrap();
    }

    #[tokio::test]
    async fn writer_feeds_source_then_signals_eof() {
        let (near, mut far) = tokio::io::duplex(64);
        let state = Arc::new(PumpState::new());
        let task = tokio::spawn(pump_writer(
            boxed_write(near),
            Box::new(BytesSource::new(b"stdin payload".to_vec())),
            Arc::clone(&state),
        ));
        let mut got = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut far, &mut got)
            .await
            .unwrap();
        assert_eq!(got, b"stdin payload");
        assert!(task.await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn shared_pump_round_trips_all_directions() {
        let (mut out_far, out_near) = tokio::io::duplex(256);
        let (err_far, err_near) = tokio::io::duplex(256);
        let (in_near, mut in_far) = tokio::io::duplex(256);

        let stdout_sink = BufferSink::new();
        let stderr_sink = BufferSink::new();
        let (out_buf, err_buf) = (stdout_sink.shared(), stderr_sink.shared());

        let mut set = PumpSet::start(PumpConfig {
            mode: PumpMode::Shared,
            io: ChildIo {
                stdin: Some(boxed_write(in_near)),
                stdout: Some(boxed_read(out_near)),
                stderr: Some(boxed_read(err_near)),
            },
            stdout_sink: Box::new(stdout_sink),
            stderr_sink: Box::new(stderr_sink),
            stdin_source: Box::new(BytesSource::new(b"to child".to_vec())),
            snapshot: OutputSnapshot::new(),
            poll: Duration::from_millis(20),
        });

        out_far.write_all(b"from stdout").await.unwrap();
        let mut echoed = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut in_far, &mut echoed)
            .await
            .unwrap();
        assert_eq!(echoed, b"to child");

        drop(out_far);
        drop(err_far);
        set.stop(true);
        let errs = set.join().await;
        assert!(errs.is_empty(), "unexpected errors: {errs:?}");
        assert_eq!(BufferSink::take_from(&out_buf), b"from stdout");
        assert!(BufferSink::take_from(&err_buf).is_empty());
    }

    #[tokio::test]
    async fn per_stream_pumps_join_after_eof() {
        let (far, near) = tokio::io::duplex(64);
        let mut set = PumpSet::start(PumpConfig {
            mode: PumpMode::PerStream,
            io: ChildIo {
                stdin: None,
                stdout: Some(boxed_read(near)),
                stderr: None,
            },
            stdout_sink: Box::new(NullSink),
            stderr_sink: Box::new(NullSink),
            stdin_source: Box::new(EmptySource),
            snapshot: OutputSnapshot::new(),
            poll: Duration::from_millis(20),
        });
        drop(far); // EOF right away
        set.stop(true);
        assert!(set.join().await.is_empty());
    }
}
