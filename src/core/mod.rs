//! Engine core: launch, track, signal, stop, reap.
//!
//! Internal modules:
//! - [`launcher`]: caller-facing builder; validates, spawns, and wires
//!   pumps and tracker;
//! - [`tracker`]: background completion sequence plus await/cancel;
//! - [`notifier`]: single-slot completion signal;
//! - [`stopper`]: pluggable destroy strategy for forced paths;
//! - [`reaper`]: destroy-on-host-exit registry.

pub(crate) mod launcher;
mod notifier;
pub mod reaper;
mod stopper;
pub(crate) mod tracker;

pub use launcher::{CaptureMode, Launcher};
pub use stopper::{ForceStopper, NoopStopper, ProcessStopper};
pub use tracker::ExecTracker;
