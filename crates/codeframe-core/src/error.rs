use thiserror::Error;

/// A convenience `Result` alias using [`CoreError`].
pub type CoreResult<T> = Result<T, CoreError>;

/// Top-level error type for the CodeFRAME core.
///
/// Each variant corresponds to a failure kind with a distinct recovery
/// policy: validation and conflict errors surface to the caller, budget
/// exhaustion fails the task, transient infrastructure errors are retried,
/// consistency violations roll back the enclosing transaction.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Invalid user input (name format, answer length, project type).
    #[error("Validation error: {0}")]
    Validation(String),

    /// Duplicate resource (project name, open blocker, double assignment).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// An operation was attempted in a state that forbids it, e.g. a
    /// context operation with no active task. Always an internal bug signal.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// A linter, test runner, git, or LLM invocation failed or produced
    /// unparseable output.
    #[error("External tool failure: {0}")]
    ExternalTool(String),

    /// An LLM or task timeout, or an exhausted review-iteration budget.
    #[error("Budget exhausted: {0}")]
    Budget(String),

    /// Subprocess spawn failure, disk pressure, and similar retryable faults.
    #[error("Transient infrastructure error: {0}")]
    Transient(String),

    /// A detected invariant violation (dependency cycle, tier mismatch).
    /// Fatal at the scope of the affected entity.
    #[error("Consistency violation: {0}")]
    Consistency(String),

    /// An error from the persistence layer.
    #[error("Store error: {0}")]
    Store(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    /// Whether a retry with backoff is worth attempting.
    pub fn is_transient(&self) -> bool {
        matches!(self, CoreError::Transient(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_kind() {
        let err = CoreError::Validation("name too short".into());
        assert_eq!(err.to_string(), "Validation error: name too short");

        let err = CoreError::Budget("LLM call exceeded 120s".into());
        assert!(err.to_string().starts_with("Budget exhausted"));
    }

    #[test]
    fn test_json_error_converts() {
        let bad = serde_json::from_str::<serde_json::Value>("{nope");
        let err: CoreError = bad.expect_err("must fail").into();
        assert!(matches!(err, CoreError::Json(_)));
    }

    #[test]
    fn test_is_transient() {
        assert!(CoreError::Transient("spawn failed".into()).is_transient());
        assert!(!CoreError::Conflict("dup".into()).is_transient());
    }
}
