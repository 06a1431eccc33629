//! # Frozen launch attributes.
//!
//! [`CommandSpec`] is the immutable snapshot of everything that identifies
//! a launch: program, arguments, working directory, environment overlay,
//! and the set of exit codes considered successful. The [`Launcher`]
//! captures one at spawn time, so later changes to a builder can never
//! affect an in-flight process.
//!
//! ## Environment overlay
//! The overlay maps a variable name to `Some(value)` (override or add) or
//! `None` (remove the inherited variable). Entries not present in the
//! overlay are inherited from the host unchanged.
//!
//! ## Empty-argument fixup
//! The Windows spawn API silently drops empty arguments, so on that
//! platform an empty string is rewritten to a literal `""` token. All
//! other platforms pass empty arguments through unchanged.
//!
//! [`Launcher`]: crate::Launcher

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::PathBuf;

/// Immutable snapshot of the attributes a process is launched with.
///
/// Created once by the launcher and shared (via `Arc`) with the tracker,
/// the exit policy, and every error message that needs launch context.
#[derive(Clone, Debug)]
pub struct CommandSpec {
    /// Program to execute (argv[0]).
    pub program: String,
    /// Arguments, in order. Never interpreted by a shell.
    pub args: Vec<String>,
    /// Working directory for the child, or inherit the host's.
    pub current_dir: Option<PathBuf>,
    /// Environment overlay: `Some(v)` overrides, `None` removes.
    pub env: BTreeMap<String, Option<String>>,
    /// Exit codes accepted as success. Empty means any code is accepted.
    pub allowed_codes: BTreeSet<i32>,
}

impl CommandSpec {
    /// Arguments with the platform empty-argument fixup applied.
    pub fn argv(&self) -> Vec<String> {
        Self::fixed_args(&self.args, cfg!(windows))
    }

    /// Rewrites empty arguments to a literal `""` token when `windows`.
    ///
    /// Split out from [`CommandSpec::argv`] so the fixup is testable on
    /// every platform.
    pub(crate) fn fixed_args(args: &[String], windows: bool) -> Vec<String> {
        args.iter()
            .map(|a| {
                if windows && a.is_empty() {
                    "\"\"".to_string()
                } else {
                    a.clone()
                }
            })
            .collect()
    }

    /// Single-line rendering of the command for logs and error messages.
    pub fn command_line(&self) -> String {
        let mut line = self.program.clone();
        for a in &self.args {
            line.push(' ');
            if a.is_empty() {
                line.push_str("\"\"");
            } else {
                line.push_str(a);
            }
        }
        line
    }

    /// Renders the non-empty parts of the environment overlay.
    ///
    /// Removed variables are shown with a leading `!`. Returns `None`
    /// when the overlay is empty, so messages can skip the section.
    pub fn describe_env(&self) -> Option<String> {
        if self.env.is_empty() {
            return None;
        }
        let mut out = String::new();
        for (k, v) in &self.env {
            if !out.is_empty() {
                out.push_str(", ");
            }
            match v {
                Some(v) => {
                    out.push_str(k);
                    out.push('=');
                    out.push_str(v);
                }
                None => {
                    out.push('!');
                    out.push_str(k);
                }
            }
        }
        Some(out)
    }
}

impl fmt::Display for CommandSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(args: &[&str]) -> CommandSpec {
        CommandSpec {
            program: "prog".into(),
            args: args.iter().map(|s| s.to_string()).collect(),
            current_dir: None,
            env: BTreeMap::new(),
            allowed_codes: BTreeSet::new(),
        }
    }

    #[test]
    fn empty_arg_rewritten_on_windows_only() {
        let args = vec!["a".to_string(), String::new(), "b".to_string()];
        assert_eq!(
            CommandSpec::fixed_args(&args, true),
            vec!["a", "\"\"", "b"]
        );
        assert_eq!(CommandSpec::fixed_args(&args, false), vec!["a", "", "b"]);
    }

    #[test]
    fn command_line_shows_empty_args() {
        let s = spec(&["-c", ""]);
        assert_eq!(s.command_line(), "prog -c \"\"");
    }

    #[test]
    fn env_overlay_rendering() {
        let mut s = spec(&[]);
        assert!(s.describe_env().is_none());
        s.env.insert("KEEP".into(), Some("1".into()));
        s.env.insert("DROP".into(), None);
        assert_eq!(s.describe_env().as_deref(), Some("!DROP, KEEP=1"));
    }
}
