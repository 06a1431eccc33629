//! # Launcher: configure, validate, spawn, and wire an execution.
//!
//! The [`Launcher`] is the caller-facing configuration object. It
//! follows the mutable-builder shape of [`std::process::Command`]:
//! chain setters, then either
//!
//! - [`Launcher::run`] - spawn and suspend until the validated result is
//!   ready (the configured timeout applies here), or
//! - [`Launcher::launch`] - spawn detached and get a live
//!   [`ExecTracker`] to await or cancel later (no timeout applies to the
//!   start itself).
//!
//! ## Configuration surface
//! Per-stream redirection (replace or tee), output capture mode
//! (off / buffered / streaming), allowed exit codes, timeout,
//! stream-close grace period, pump mode, idle poll interval, channel
//! capacity, process stopper, spawn backend, and the four lifecycle
//! listeners.
//!
//! One launcher starts at most one process; a second `launch` is
//! rejected as illegal use.
//!
//! ## Example
//! ```no_run
//! use procvisor::{CaptureMode, Launcher};
//!
//! # async fn demo() -> Result<(), procvisor::ExecError> {
//! let result = Launcher::new("sh")
//!     .arg("-c")
//!     .arg("echo hello")
//!     .capture(CaptureMode::Buffered)
//!     .allow_exit_codes([0])
//!     .run()
//!     .await?;
//! assert_eq!(result.exit_code, 0);
//! assert_eq!(result.output_bytes()?, b"hello\n");
//! # Ok(())
//! # }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::debug;

use crate::core::reaper;
use crate::core::stopper::{ForceStopper, ProcessStopper};
use crate::core::tracker::{ExecTracker, TrackerConfig};
use crate::error::ExecError;
use crate::io::pump::{PumpConfig, PumpSet, DEFAULT_POLL_INTERVAL};
use crate::io::{
    compose_sinks, BufferSink, ByteSink, ByteSource, BytesSource, ChannelSink, EmptySource,
    NullSink, OutputChannel, PumpMode, DEFAULT_CHANNEL_CAPACITY,
};
use crate::listeners::{ExecListener, ListenerSet};
use crate::process::{CommandSpec, ExecOutput, ExecResult, LocalBackend, OutputSnapshot, ProcessBackend};

/// How (and whether) the child's output is captured.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum CaptureMode {
    /// No capture; reading the result's output is an error.
    #[default]
    Off,
    /// Accumulate into a buffer materialized after completion.
    Buffered,
    /// Push through the bounded channel; pull during or after the run.
    Streamed,
}

/// Builder and entry point for one process execution.
pub struct Launcher {
    program: String,
    args: Vec<String>,
    current_dir: Option<PathBuf>,
    env: BTreeMap<String, Option<String>>,
    allowed_codes: BTreeSet<i32>,
    capture: CaptureMode,
    merge_stderr: bool,
    pump_mode: PumpMode,
    poll_interval: Duration,
    channel_capacity: usize,
    timeout: Option<Duration>,
    close_grace: Option<Duration>,
    stdout_sinks: Vec<Box<dyn ByteSink>>,
    stderr_sinks: Vec<Box<dyn ByteSink>>,
    stdin_source: Option<Box<dyn ByteSource>>,
    listeners: Vec<Arc<dyn ExecListener>>,
    stopper: Arc<dyn ProcessStopper>,
    backend: Arc<dyn ProcessBackend>,
    launched: bool,
}

impl Launcher {
    /// Creates a launcher for the given program with default settings.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            current_dir: None,
            env: BTreeMap::new(),
            allowed_codes: BTreeSet::new(),
            capture: CaptureMode::Off,
            merge_stderr: false,
            pump_mode: PumpMode::Shared,
            poll_interval: DEFAULT_POLL_INTERVAL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            timeout: None,
            close_grace: None,
            stdout_sinks: Vec::new(),
            stderr_sinks: Vec::new(),
            stdin_source: None,
            listeners: Vec::new(),
            stopper: Arc::new(ForceStopper),
            backend: Arc::new(LocalBackend),
            launched: false,
        }
    }

    /// Appends one argument.
    pub fn arg(&mut self, arg: impl Into<String>) -> &mut Self {
        self.args.push(arg.into());
        self
    }

    /// Appends several arguments.
    pub fn args<I, S>(&mut self, args: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Sets the child's working directory.
    pub fn current_dir(&mut self, dir: impl Into<PathBuf>) -> &mut Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Overrides (or adds) an environment variable for the child.
    pub fn env(&mut self, key: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.env.insert(key.into(), Some(value.into()));
        self
    }

    /// Removes an inherited environment variable from the child.
    pub fn env_remove(&mut self, key: impl Into<String>) -> &mut Self {
        self.env.insert(key.into(), None);
        self
    }

    /// Sets the exit codes accepted as success. Unset means any code.
    pub fn allow_exit_codes(&mut self, codes: impl IntoIterator<Item = i32>) -> &mut Self {
        self.allowed_codes = codes.into_iter().collect();
        self
    }

    /// Selects the output capture mode.
    pub fn capture(&mut self, mode: CaptureMode) -> &mut Self {
        self.capture = mode;
        self
    }

    /// Routes the child's stderr into the same capture as stdout.
    pub fn merge_stderr(&mut self, merge: bool) -> &mut Self {
        self.merge_stderr = merge;
        self
    }

    /// Selects shared-task or per-stream-task pumping.
    pub fn pump_mode(&mut self, mode: PumpMode) -> &mut Self {
        self.pump_mode = mode;
        self
    }

    /// Suspend interval for an idle pump pass.
    pub fn poll_interval(&mut self, interval: Duration) -> &mut Self {
        self.poll_interval = interval;
        self
    }

    /// Capacity of the streaming output channel, in bytes.
    pub fn channel_capacity(&mut self, capacity: usize) -> &mut Self {
        self.channel_capacity = capacity;
        self
    }

    /// Bound for [`Launcher::run`]. Never applies to [`Launcher::launch`].
    pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
        self.timeout = Some(timeout);
        self
    }

    /// Grace period for the stream-close phase. When set, close
    /// failures and stuck pipes only produce warnings.
    pub fn close_grace(&mut self, grace: Duration) -> &mut Self {
        self.close_grace = Some(grace);
        self
    }

    /// Replaces the stdout sink stack with the given sink.
    pub fn redirect_stdout(&mut self, sink: impl ByteSink) -> &mut Self {
        self.stdout_sinks = vec![Box::new(sink)];
        self
    }

    /// Adds a stdout sink: substitutes a no-op sink, tees otherwise.
    pub fn tee_stdout(&mut self, sink: impl ByteSink) -> &mut Self {
        self.stdout_sinks.push(Box::new(sink));
        self
    }

    /// Replaces the stderr sink stack with the given sink.
    pub fn redirect_stderr(&mut self, sink: impl ByteSink) -> &mut Self {
        self.stderr_sinks = vec![Box::new(sink)];
        self
    }

    /// Adds a stderr sink: substitutes a no-op sink, tees otherwise.
    pub fn tee_stderr(&mut self, sink: impl ByteSink) -> &mut Self {
        self.stderr_sinks.push(Box::new(sink));
        self
    }

    /// Feeds the child's stdin from a fixed byte buffer.
    pub fn stdin_bytes(&mut self, bytes: impl Into<Vec<u8>>) -> &mut Self {
        self.stdin_source = Some(Box::new(BytesSource::new(bytes)));
        self
    }

    /// Feeds the child's stdin from a custom source.
    pub fn stdin_source(&mut self, source: impl ByteSource) -> &mut Self {
        self.stdin_source = Some(Box::new(source));
        self
    }

    /// Registers a lifecycle listener.
    pub fn listener(&mut self, listener: Arc<dyn ExecListener>) -> &mut Self {
        self.listeners.push(listener);
        self
    }

    /// Replaces the destroy strategy for forced termination paths.
    pub fn stopper(&mut self, stopper: impl ProcessStopper) -> &mut Self {
        self.stopper = Arc::new(stopper);
        self
    }

    /// Replaces the spawn backend (local is the default).
    pub fn backend(&mut self, backend: impl ProcessBackend) -> &mut Self {
        self.backend = Arc::new(backend);
        self
    }

    /// Spawns the process detached and returns its live tracker.
    ///
    /// The configured timeout does not apply here; pass a bound to
    /// [`ExecTracker::await_result`] instead.
    pub async fn launch(&mut self) -> Result<ExecTracker, ExecError> {
        if self.launched {
            return Err(ExecError::IllegalUse(
                "this launcher already started its process".into(),
            ));
        }

        // before_start still sees the mutable configuration.
        let hooks = ListenerSet::new(self.listeners.clone());
        hooks.before_start(self).await?;

        if self.program.is_empty() && !self.backend.allows_empty_command() {
            return Err(ExecError::IllegalUse("command must not be empty".into()));
        }
        self.launched = true;

        let spec = Arc::new(CommandSpec {
            program: self.program.clone(),
            args: self.args.clone(),
            current_dir: self.current_dir.clone(),
            env: self.env.clone(),
            allowed_codes: self.allowed_codes.clone(),
        });
        let listeners = ListenerSet::new(self.listeners.clone());

        let mut child =
            self.backend
                .spawn(&spec)
                .await
                .map_err(|e| ExecError::Initialization {
                    program: spec.program.clone(),
                    os_code: e.raw_os_error(),
                    source: e,
                })?;
        let pid = child.pid();
        let reaper_id = reaper::register(pid);
        debug!(pid = %pid, command = %spec.command_line(), "execution started");

        if let Err(e) = listeners.after_start(pid).await {
            let _ = child.kill().await;
            reaper::unregister(reaper_id);
            return Err(e);
        }

        let snapshot = OutputSnapshot::new();
        let io = child.take_io();

        // Capture base sinks by mode; user sinks substitute or tee.
        let mut buffer = None;
        let mut reader = None;
        let (stdout_base, stderr_base): (Box<dyn ByteSink>, Box<dyn ByteSink>) =
            match self.capture {
                CaptureMode::Off => (Box::new(NullSink), Box::new(NullSink)),
                CaptureMode::Buffered => {
                    let sink = BufferSink::new();
                    buffer = Some(sink.shared());
                    let err_base: Box<dyn ByteSink> = if self.merge_stderr {
                        Box::new(sink.clone())
                    } else {
                        Box::new(NullSink)
                    };
                    (Box::new(sink), err_base)
                }
                CaptureMode::Streamed => {
                    let (chan, rd) = OutputChannel::new(self.channel_capacity);
                    reader = Some(rd);
                    let err_base: Box<dyn ByteSink> = if self.merge_stderr {
                        Box::new(ChannelSink::new(chan.clone()))
                    } else {
                        Box::new(NullSink)
                    };
                    (Box::new(ChannelSink::new(chan)), err_base)
                }
            };
        let stdout_sink = compose_sinks(stdout_base, std::mem::take(&mut self.stdout_sinks));
        let stderr_sink = compose_sinks(stderr_base, std::mem::take(&mut self.stderr_sinks));
        let stdin_source = self
            .stdin_source
            .take()
            .unwrap_or_else(|| Box::new(EmptySource));

        let pumps = PumpSet::start(PumpConfig {
            mode: self.pump_mode,
            io,
            stdout_sink,
            stderr_sink,
            stdin_source,
            snapshot: snapshot.clone(),
            poll: self.poll_interval,
        });

        Ok(ExecTracker::start(
            child,
            pumps,
            TrackerConfig {
                spec,
                stopper: Arc::clone(&self.stopper),
                listeners,
                grace: self.close_grace,
                capture: self.capture,
                buffer,
                reader,
                snapshot,
                reaper_id,
            },
        ))
    }

    /// Spawns the process and suspends until its validated result.
    ///
    /// Honors the configured timeout. In streaming capture mode the
    /// engine pulls the channel itself and hands back fully buffered
    /// bytes, since a suspended caller cannot pull concurrently.
    pub async fn run(&mut self) -> Result<ExecResult, ExecError> {
        let tracker = self.launch().await?;
        let timeout = self.timeout;

        let collector = if self.capture == CaptureMode::Streamed {
            tracker.take_output_reader().map(|mut reader| {
                tokio::spawn(async move {
                    let mut all = Vec::new();
                    while let Some(chunk) = reader.pull().await {
                        all.extend_from_slice(&chunk);
                    }
                    all
                })
            })
        } else {
            None
        };

        let result = tracker.await_result(timeout).await;
        match (result, collector) {
            (Ok(mut result), Some(handle)) => {
                result.output = ExecOutput::Buffered(handle.await.unwrap_or_default());
                Ok(result)
            }
            (outcome, _) => outcome,
        }
    }
}
