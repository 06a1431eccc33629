//! # Destroy-on-host-exit registry.
//!
//! Process-wide, lazily initialized, mutex-guarded registry of live
//! children. The launcher registers a child immediately after a
//! successful spawn; the tracker unregisters it during finalization.
//! Unregister failures during host shutdown are swallowed, since
//! shutdown ordering is unreliable by nature.
//!
//! Rust has no portable shutdown-hook primitive, so the killing half is
//! explicit: a host that wants registered children destroyed on
//! termination spawns [`watch_shutdown_signals`], which waits for a
//! termination signal and then best-effort kills everything still
//! registered. Hosts with their own signal handling can call
//! [`reap_all`] directly from it.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

use tracing::{debug, warn};

use crate::process::Pid;

static REGISTRY: OnceLock<Mutex<HashMap<u64, Pid>>> = OnceLock::new();
static NEXT_ID: AtomicU64 = AtomicU64::new(1);

fn registry() -> &'static Mutex<HashMap<u64, Pid>> {
    REGISTRY.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Registers a live child; returns the handle for unregistering.
pub(crate) fn register(pid: Pid) -> u64 {
    let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
    registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(id, pid);
    id
}

/// Removes a child from the registry. Idempotent; never fails.
pub(crate) fn unregister(id: u64) {
    registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .remove(&id);
}

/// Number of currently registered children.
pub fn registered_count() -> usize {
    registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .len()
}

#[cfg(test)]
fn is_registered(id: u64) -> bool {
    registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .contains_key(&id)
}

/// Best-effort kill of every registered child, emptying the registry.
pub fn reap_all() {
    let drained: Vec<(u64, Pid)> = registry()
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .drain()
        .collect();
    for (_, pid) in drained {
        match pid {
            Pid::Id(p) => kill_pid(p),
            Pid::Unsupported => {
                debug!("skipping registered child without a reportable pid")
            }
        }
    }
}

/// Waits for a host termination signal, then reaps registered children.
///
/// Spawn this from the host when destroy-on-exit behavior is wanted; it
/// is not installed implicitly because registering a signal handler
/// changes the host's default signal disposition.
#[cfg(unix)]
pub async fn watch_shutdown_signals() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {},
        _ = sigint.recv() => {},
        _ = sigterm.recv() => {},
    }
    reap_all();
    Ok(())
}

/// Waits for a host termination signal, then reaps registered children.
#[cfg(not(unix))]
pub async fn watch_shutdown_signals() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await?;
    reap_all();
    Ok(())
}

/// Forceful kill by pid, outside any handle ownership.
#[cfg(unix)]
fn kill_pid(pid: u32) {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid as NixPid;

    match kill(NixPid::from_raw(pid as i32), Signal::SIGKILL) {
        Ok(()) => debug!(pid, "reaped registered child"),
        Err(e) => warn!(pid, error = %e, "failed to reap registered child"),
    }
}

/// Forceful kill by pid, outside any handle ownership.
#[cfg(windows)]
fn kill_pid(pid: u32) {
    let spawned = std::process::Command::new("taskkill")
        .args(["/pid", &pid.to_string(), "/f", "/t"])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn();
    match spawned {
        Ok(_) => debug!(pid, "reaped registered child"),
        Err(e) => warn!(pid, error = %e, "failed to reap registered child"),
    }
}

#[cfg(not(any(unix, windows)))]
fn kill_pid(pid: u32) {
    warn!(pid, "no reap support on this platform");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_unregister_are_balanced() {
        let id = register(Pid::Id(999_999));
        assert!(is_registered(id));
        unregister(id);
        assert!(!is_registered(id));
        // unregister is idempotent
        unregister(id);
        assert!(!is_registered(id));
    }

    #[test]
    fn entries_get_distinct_ids() {
        let a = register(Pid::Unsupported);
        let b = register(Pid::Unsupported);
        assert_ne!(a, b);
        unregister(a);
        unregister(b);
    }
}
