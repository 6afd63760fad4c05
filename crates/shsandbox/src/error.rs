//! Error types for shsandbox
//!
//! Every failure of a sandboxed run surfaces as a single [`Error`]. The
//! variants are the classification callers match on:
//! - parse errors from the front-end parser, passed through unchanged
//! - internal errors for malformed trees (never a user mistake)
//! - arithmetic faults, policy denials, cancellation and resource limits

use crate::cancel::CancelReason;
use crate::limits::LimitExceeded;
use thiserror::Error;

/// Result type alias using shsandbox's Error.
pub type Result<T> = std::result::Result<T, Error>;

/// shsandbox error types.
///
/// Policy denials name the offending command or path verbatim so callers can
/// assert on substrings of the message.
#[derive(Error, Debug)]
pub enum Error {
    /// Parse error occurred while parsing the script (without location info).
    #[error("parse error: {0}")]
    Parse(String),

    /// Parse error with source location information.
    #[error("parse error at line {line}, column {column}: {message}")]
    ParseAt {
        message: String,
        line: usize,
        column: usize,
    },

    /// A tree node has a shape the evaluator does not recognize.
    ///
    /// This is an upstream contract breach (the parser produced, or a caller
    /// hand-built, an impossible node). It aborts the run and is never
    /// recovered from.
    #[error("internal error: {0}")]
    Internal(String),

    /// Arithmetic fault during evaluation (division or remainder by zero).
    #[error("arithmetic error: {0}")]
    Arithmetic(String),

    /// The command name is not in the policy's whitelist.
    #[error("command not in whitelist: {0}")]
    NotInWhitelist(String),

    /// The path was rejected by the policy's path rules.
    #[error("cannot open path: {0:?}")]
    PathDenied(String),

    /// The run was aborted by its cancellation handle or deadline.
    #[error("execution cancelled: {0}")]
    Cancelled(CancelReason),

    /// Resource limit exceeded.
    #[error("resource limit exceeded: {0}")]
    ResourceLimit(#[from] LimitExceeded),

    /// I/O error from an allowed file or a child process pipe.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Execution error that is not one of the classified kinds above.
    #[error("execution error: {0}")]
    Execution(String),
}

impl Error {
    /// Create a parse error with source location.
    pub fn parse_at(message: impl Into<String>, line: usize, column: usize) -> Self {
        Self::ParseAt {
            message: message.into(),
            line,
            column,
        }
    }

    /// Create an internal (invariant violation) error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// True for invariant violations that indicate a malformed tree.
    pub fn is_internal(&self) -> bool {
        matches!(self, Self::Internal(_))
    }

    /// True for errors raised by the authorization policy.
    pub fn is_policy_violation(&self) -> bool {
        matches!(self, Self::NotInWhitelist(_) | Self::PathDenied(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_whitelist_message_names_command() {
        let err = Error::NotInWhitelist("rm".to_string());
        assert_eq!(err.to_string(), "command not in whitelist: rm");
        assert!(err.is_policy_violation());
    }

    #[test]
    fn test_path_message_quotes_path() {
        let err = Error::PathDenied("some-file".to_string());
        assert_eq!(err.to_string(), "cannot open path: \"some-file\"");
    }

    #[test]
    fn test_internal_is_distinct() {
        let err = Error::internal("unexpected arithmetic node");
        assert!(err.is_internal());
        assert!(!Error::Arithmetic("division by zero".into()).is_internal());
    }
}
