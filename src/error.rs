//! Shared error-code contract.
//!
//! DESIGN
//! ======
//! Every error enum in the crate carries a grepable code and a retryable
//! flag. The relay puts both into its JSON error replies so clients can
//! branch on codes instead of parsing messages.

use serde::Serialize;

/// Grepable error code and retryable flag for structured error replies.
pub trait ErrorCode: std::fmt::Display {
    fn error_code(&self) -> &'static str;

    fn retryable(&self) -> bool {
        false
    }
}

/// Serializable view of a coded error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorBody {
    pub code: &'static str,
    pub message: String,
    pub retryable: bool,
}

impl ErrorBody {
    #[must_use]
    pub fn from_error(err: &(impl ErrorCode + ?Sized)) -> Self {
        Self { code: err.error_code(), message: err.to_string(), retryable: err.retryable() }
    }
}

#[cfg(test)]
#[path = "error_test.rs"]
mod tests;
