//! # Process-facing types: spec, backend boundary, and result surface.
//!
//! - [`CommandSpec`] - immutable launch attributes snapshot
//! - [`ProcessBackend`] / [`ProcessChild`] - spawn boundary, local or remote
//! - [`ExecResult`] / [`ExecOutput`] / [`Pid`] - what a finished run exposes
//! - [`OutputSnapshot`] - bounded diagnostic capture for error messages

pub(crate) mod backend;
pub(crate) mod exit;
mod output;
mod spec;

pub use backend::{ChildIo, InputStream, LocalBackend, OutputStream, ProcessBackend, ProcessChild};
pub use output::{ExecOutput, ExecResult, OutputSnapshot, Pid};
pub use spec::CommandSpec;
