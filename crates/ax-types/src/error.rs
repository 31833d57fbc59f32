//! Shared error types for the AX system.

use thiserror::Error;

/// Top-level error type for the AX system.
///
/// The variants follow the platform's failure taxonomy: validation errors
/// fail locally and are returned to the caller; policy errors carry only an
/// opaque reason code to the caller (the full reason lives in the audit
/// log); provider errors surface to the agent as tool results; fatal errors
/// terminate the process.
#[derive(Error, Debug)]
pub enum AxError {
    /// Malformed input: bad JSON, unknown action, unknown field, invalid
    /// UUID, out-of-range value, path traversal attempt.
    #[error("Validation error: {0}")]
    Validation(String),

    /// A security policy denied the action. The message shown to callers is
    /// terse; `reason_code` is an opaque identifier resolvable only through
    /// the audit log.
    #[error("blocked by security policy ({reason_code})")]
    Policy {
        /// Opaque reason code (e.g. `"tb-1"` for taint budget).
        reason_code: String,
    },

    /// An upstream provider failed: LLM rate limit or 5xx, web/browser
    /// timeout, sandbox spawn failure.
    #[error("Provider error: {0}")]
    Provider(String),

    /// A configuration problem. Fatal when raised at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The requested entity was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl AxError {
    /// Shorthand for a policy error with the given reason code.
    pub fn policy(reason_code: impl Into<String>) -> Self {
        Self::Policy {
            reason_code: reason_code.into(),
        }
    }

    /// Whether this error is a policy denial.
    pub fn is_policy(&self) -> bool {
        matches!(self, Self::Policy { .. })
    }
}

impl From<serde_json::Error> for AxError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}

/// Alias for Result with AxError.
pub type AxResult<T> = Result<T, AxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn policy_message_is_terse() {
        let err = AxError::policy("tb-1");
        assert_eq!(err.to_string(), "blocked by security policy (tb-1)");
        assert!(err.is_policy());
    }

    #[test]
    fn validation_is_not_policy() {
        let err = AxError::Validation("bad field".into());
        assert!(!err.is_policy());
    }

    #[test]
    fn io_error_converts() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: AxError = io.into();
        assert!(matches!(err, AxError::Io(_)));
    }
}
