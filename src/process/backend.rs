//! # Spawn backend boundary.
//!
//! The tracker is agnostic to where a process actually runs. Anything
//! that can satisfy the handle shape - three byte streams, a pid probe,
//! an awaitable exit, and a kill switch - can host an execution: the
//! default [`LocalBackend`] wraps [`tokio::process::Command`], and an
//! alternate transport (a remote execution session, a container runner)
//! implements the same pair of traits.
//!
//! A backend that frames its own command line may accept an empty
//! program; the launcher consults [`ProcessBackend::allows_empty_command`]
//! before validating.

use std::io;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};
use tracing::debug;

use super::output::Pid;
use super::spec::CommandSpec;

/// Byte stream feeding the child's stdin.
pub type InputStream = Box<dyn AsyncWrite + Send + Unpin>;
/// Byte stream reading the child's stdout or stderr.
pub type OutputStream = Box<dyn AsyncRead + Send + Unpin>;

/// The child's three pipe ends, taken once by the pumps.
pub struct ChildIo {
    pub stdin: Option<InputStream>,
    pub stdout: Option<OutputStream>,
    pub stderr: Option<OutputStream>,
}

/// A spawned process, local or remote.
#[async_trait]
pub trait ProcessChild: Send + 'static {
    /// Pid of the child, or [`Pid::Unsupported`] when the transport
    /// cannot report one.
    fn pid(&self) -> Pid;

    /// Takes the three pipe ends. Meaningful once; later calls return
    /// empty handles.
    fn take_io(&mut self) -> ChildIo;

    /// Exit code when the process has already exited, without waiting.
    fn try_exit_code(&mut self) -> Option<i32>;

    /// Suspends until the process exits and returns its exit code.
    async fn wait(&mut self) -> io::Result<i32>;

    /// Requests forceful termination.
    async fn kill(&mut self) -> io::Result<()>;
}

/// Spawns processes for the launcher.
#[async_trait]
pub trait ProcessBackend: Send + Sync + 'static {
    /// Spawns a child for the frozen spec.
    async fn spawn(&self, spec: &CommandSpec) -> io::Result<Box<dyn ProcessChild>>;

    /// True when the backend supplies its own command framing and an
    /// empty program is therefore acceptable.
    fn allows_empty_command(&self) -> bool {
        false
    }
}

/// Maps an [`ExitStatus`] to a numeric exit code.
///
/// On Unix a signal death maps to `128 + signal`, the shell convention;
/// a status with neither code nor signal maps to `-1`.
fn status_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(sig) = status.signal() {
            return 128 + sig;
        }
    }
    -1
}

/// Default backend: local OS processes via [`tokio::process`].
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalBackend;

#[async_trait]
impl ProcessBackend for LocalBackend {
    async fn spawn(&self, spec: &CommandSpec) -> io::Result<Box<dyn ProcessChild>> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(spec.argv());
        if let Some(dir) = &spec.current_dir {
            cmd.current_dir(dir);
        }
        for (key, value) in &spec.env {
            match value {
                Some(v) => {
                    cmd.env(key, v);
                }
                None => {
                    cmd.env_remove(key);
                }
            }
        }
        // The engine kills only through its stopper and the destroy
        // registry; kill-on-drop would defeat the no-op stopper.
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        let child = cmd.spawn()?;
        let pid = match child.id() {
            Some(p) => Pid::Id(p),
            None => Pid::Unsupported,
        };
        debug!(pid = %pid, command = %spec.command_line(), "process spawned");
        Ok(Box::new(LocalChild { child, pid }))
    }
}

/// Local child handle.
pub struct LocalChild {
    child: Child,
    pid: Pid,
}

#[async_trait]
impl ProcessChild for LocalChild {
    fn pid(&self) -> Pid {
        self.pid
    }

    fn take_io(&mut self) -> ChildIo {
        ChildIo {
            stdin: self
                .child
                .stdin
                .take()
                .map(|s| Box::new(s) as InputStream),
            stdout: self
                .child
                .stdout
                .take()
                .map(|s| Box::new(s) as OutputStream),
            stderr: self
                .child
                .stderr
                .take()
                .map(|s| Box::new(s) as OutputStream),
        }
    }

    fn try_exit_code(&mut self) -> Option<i32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(status_code(status)),
            _ => None,
        }
    }

    async fn wait(&mut self) -> io::Result<i32> {
        let status = self.child.wait().await?;
        Ok(status_code(status))
    }

    async fn kill(&mut self) -> io::Result<()> {
        self.child.kill().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeMap, BTreeSet};

    fn sh(script: &str) -> CommandSpec {
        CommandSpec {
            program: "sh".into(),
            args: vec!["-c".into(), script.into()],
            current_dir: None,
            env: BTreeMap::new(),
            allowed_codes: BTreeSet::new(),
        }
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn spawn_reports_pid_and_exit_code() {
        let mut child = LocalBackend.spawn(&sh("exit 7")).await.unwrap();
        assert!(matches!(child.pid(), Pid::Id(p) if p > 0));
        assert_eq!(child.wait().await.unwrap(), 7);
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn env_overlay_overrides_and_removes() {
        // The parent provides INHERITED; the overlay removes it and adds SET.
        std::env::set_var("PROCVISOR_TEST_INHERITED", "yes");
        let mut spec = sh("printf '%s|%s' \"${PROCVISOR_TEST_INHERITED:-gone}\" \"${PROCVISOR_TEST_SET:-unset}\"");
        spec.env.insert("PROCVISOR_TEST_INHERITED".into(), None);
        spec.env
            .insert("PROCVISOR_TEST_SET".into(), Some("value".into()));

        let mut child = LocalBackend.spawn(&spec).await.unwrap();
        let io = child.take_io();
        drop(io.stdin);
        let mut out = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut io.stdout.unwrap(), &mut out)
            .await
            .unwrap();
        child.wait().await.unwrap();
        assert_eq!(out, b"gone|value");
    }

    #[tokio::test]
    #[cfg(unix)]
    async fn kill_terminates_a_sleeping_child() {
        let mut child = LocalBackend.spawn(&sh("sleep 60")).await.unwrap();
        child.kill().await.unwrap();
        let code = child.wait().await.unwrap();
        assert_ne!(code, 0);
    }

    #[tokio::test]
    async fn spawn_failure_surfaces_io_error() {
        let spec = CommandSpec {
            program: "procvisor-definitely-missing-binary".into(),
            args: vec![],
            current_dir: None,
            env: BTreeMap::new(),
            allowed_codes: BTreeSet::new(),
        };
        assert!(LocalBackend.spawn(&spec).await.is_err());
    }
}
