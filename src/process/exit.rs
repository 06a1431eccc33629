//! Exit-code validation against the configured allowed set.
//!
//! An empty allowed set accepts any code. A non-empty set turns every
//! other code into [`ExecError::UnexpectedExitCode`], carrying the full
//! launch context so the failure is diagnosable from its message alone.

use crate::error::{ExecContext, ExecError};
use crate::process::{CommandSpec, OutputSnapshot};

/// Validates the observed exit code against the spec's allowed set.
pub(crate) fn enforce(
    spec: &CommandSpec,
    code: i32,
    snapshot: &OutputSnapshot,
) -> Result<(), ExecError> {
    if spec.allowed_codes.is_empty() || spec.allowed_codes.contains(&code) {
        return Ok(());
    }
    Err(ExecError::UnexpectedExitCode {
        code,
        allowed: spec.allowed_codes.iter().copied().collect(),
        context: Box::new(ExecContext::new(spec, snapshot)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn spec(allowed: &[i32]) -> CommandSpec {
        CommandSpec {
            program: "true".into(),
            args: vec![],
            current_dir: None,
            env: BTreeMap::new(),
            allowed_codes: allowed.iter().copied().collect(),
        }
    }

    #[test]
    fn empty_set_accepts_any_code() {
        let snap = OutputSnapshot::new();
        for code in [-1, 0, 1, 42, 255] {
            assert!(enforce(&spec(&[]), code, &snap).is_ok());
        }
    }

    #[test]
    fn member_codes_pass_others_fail() {
        let snap = OutputSnapshot::new();
        let s = spec(&[0, 3]);
        assert!(enforce(&s, 0, &snap).is_ok());
        assert!(enforce(&s, 3, &snap).is_ok());
        let err = enforce(&s, 1, &snap).unwrap_err();
        match err {
            ExecError::UnexpectedExitCode { code, allowed, .. } => {
                assert_eq!(code, 1);
                assert_eq!(allowed, vec![0, 3]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn failure_message_carries_context() {
        let snap = OutputSnapshot::new();
        snap.record(b"some produced output");
        let mut s = spec(&[0]);
        s.args = vec!["--flag".into()];
        let msg = enforce(&s, 2, &snap).unwrap_err().to_string();
        assert!(msg.contains("unexpected code 2"));
        assert!(msg.contains("true --flag"));
        assert!(msg.contains("some produced output"));
    }
}
