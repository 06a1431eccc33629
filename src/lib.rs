//! # procvisor
//!
//! **Procvisor** is a concurrent process execution engine for Rust.
//!
//! It launches one external OS process per engine instance and manages
//! its three I/O streams and completion lifecycle safely: no deadlocks
//! on full pipe buffers, no loss of buffered output on process exit, no
//! caller suspended forever. The crate is designed as a building block
//! for tools that shell out and need the classic pitfalls of native
//! process APIs handled for them.
//!
//! ## Architecture
//! ```text
//!  Launcher (builder)
//!     │  freeze CommandSpec + stream settings, spawn via backend
//!     ▼
//!  ┌───────────────────────────────────────────────────────────────┐
//!  │ ExecTracker (background completion task)                      │
//!  │  - awaits child exit (or forced cancellation)                 │
//!  │  - stops pumps (clean: drain fully / forced: stop now)        │
//!  │  - closes streams (optionally under a grace period)           │
//!  │  - materializes the result, validates the exit code           │
//!  │  - runs listeners, unregisters from the reaper, notifies      │
//!  └───────┬──────────────────────┬────────────────────────────────┘
//!          ▼                      ▼
//!   StreamPump tasks        Notifier (single slot)
//!   stdin ◄─ ByteSource        │ exactly one notify
//!   stdout ─► ByteSink         ▼
//!   stderr ─► ByteSink      await_result() / cancel()
//!          │
//!          ▼ (streaming capture)
//!   OutputChannel (bounded, backpressure) ─► OutputReader
//! ```
//!
//! ## Features
//! | Area            | Description                                           | Key types                                 |
//! |-----------------|-------------------------------------------------------|-------------------------------------------|
//! | **Launching**   | Argv command, env overlay, cwd, allowed exit codes.   | [`Launcher`], [`CommandSpec`]             |
//! | **Streams**     | Replace/tee sinks, stdin sources, two pump modes.     | [`ByteSink`], [`ByteSource`], [`PumpMode`]|
//! | **Capture**     | Off, buffered, or streaming with backpressure.        | [`CaptureMode`], [`OutputReader`]         |
//! | **Completion**  | Await with optional bound, cancel with reason.        | [`ExecTracker`], [`ExecResult`]           |
//! | **Forced stop** | Pluggable destroy strategy, destroy-on-exit registry. | [`ProcessStopper`], [`reaper`]            |
//! | **Backends**    | Local processes or any transport with the same shape. | [`ProcessBackend`], [`ProcessChild`]      |
//! | **Lifecycle**   | Four hook points around start/finish/stop.            | [`ExecListener`]                          |
//! | **Errors**      | Typed taxonomy with full launch context in messages.  | [`ExecError`]                             |
//!
//! ## Example
//! ```no_run
//! use std::time::Duration;
//! use procvisor::{CaptureMode, Launcher};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), procvisor::ExecError> {
//!     // Blocking style: suspend until the validated result.
//!     let result = Launcher::new("sh")
//!         .arg("-c")
//!         .arg("echo hello")
//!         .capture(CaptureMode::Buffered)
//!         .allow_exit_codes([0])
//!         .timeout(Duration::from_secs(5))
//!         .run()
//!         .await?;
//!     assert_eq!(result.exit_code, 0);
//!
//!     // Streaming style: pull output while the process runs.
//!     let tracker = Launcher::new("sh")
//!         .arg("-c")
//!         .arg("seq 1 100000")
//!         .capture(CaptureMode::Streamed)
//!         .launch()
//!         .await?;
//!     let mut reader = tracker.take_output_reader().expect("streaming enabled");
//!     let mut lines = 0usize;
//!     while let Some(_line) = reader.next_line().await {
//!         lines += 1;
//!     }
//!     let result = tracker.await_result(None).await?;
//!     assert_eq!(result.exit_code, 0);
//!     assert_eq!(lines, 100_000);
//!     Ok(())
//! }
//! ```

mod core;
mod error;
mod io;
mod listeners;
mod process;

// ---- Public re-exports ----

pub use crate::core::{
    reaper, CaptureMode, ExecTracker, ForceStopper, Launcher, NoopStopper, ProcessStopper,
};
pub use crate::error::{ExecContext, ExecError};
pub use crate::io::{
    BufferSink, ByteSink, ByteSource, BytesSource, ChannelSink, EmptySource, NullSink,
    OutputChannel, OutputReader, PumpMode, ReaderSource, TeeSink, WriterSink,
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_POLL_INTERVAL,
};
pub use crate::listeners::{ExecListener, ListenerFault};
pub use crate::process::{
    ChildIo, CommandSpec, ExecOutput, ExecResult, InputStream, LocalBackend, OutputSnapshot,
    OutputStream, Pid, ProcessBackend, ProcessChild,
};
