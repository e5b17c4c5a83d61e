// ============================================================
// Layer 3 — Pipeline Errors
// ============================================================
// The failure kinds every tool in the pipeline can report.
// All of them are fatal for the current run: use cases wrap
// them in anyhow::Error and the process exits with the message.
//
// Callers that need to branch on the kind (tests, the
// per-sample skip policy) use `err.downcast_ref::<PipelineError>()`.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Unknown file extension or output mode
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// An assumed precondition (channel count, value range, mask rank) is false
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// Paired evaluation records disagree on their identifier
    #[error("mismatch in question_id: {left} != {right}")]
    IdentifierMismatch { left: String, right: String },

    /// An input path does not exist
    #[error("{} does not exist", .0.display())]
    MissingInput(PathBuf),

    /// A codec (image, DICOM) could not decode a file
    #[error("cannot decode '{}': {message}", path.display())]
    Decode { path: PathBuf, message: String },
}

impl PipelineError {
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation(message.into())
    }

    pub fn decode(path: impl Into<PathBuf>, message: impl std::fmt::Display) -> Self {
        Self::Decode { path: path.into(), message: message.to_string() }
    }
}

/// Fail with `InvariantViolation` when `cond` is false.
/// The analogue of an assertion that reports instead of panicking.
pub fn ensure_invariant(cond: bool, message: impl FnOnce() -> String) -> Result<(), PipelineError> {
    if cond {
        Ok(())
    } else {
        Err(PipelineError::InvariantViolation(message()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mismatch_message_names_both_ids() {
        let e = PipelineError::IdentifierMismatch { left: "q1".into(), right: "q2".into() };
        assert_eq!(e.to_string(), "mismatch in question_id: q1 != q2");
    }

    #[test]
    fn test_ensure_invariant() {
        assert!(ensure_invariant(true, || "unused".into()).is_ok());
        let err = ensure_invariant(false, || "3 channels expected".into()).unwrap_err();
        assert!(matches!(err, PipelineError::InvariantViolation(m) if m.contains("3 channels")));
    }
}
