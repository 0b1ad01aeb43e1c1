//! Business-facing errors.

use thiserror::Error;

/// Result type used by business handlers.
pub type DomainResult<T> = Result<T, DomainError>;

/// Failures a handler reports about the message it was given.
///
/// Transport problems are not expressed here; the broker and bus error
/// types carry those.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The message content is not acceptable.
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// Something the handler depends on is missing right now; a redelivery
    /// may succeed.
    #[error("unavailable: {0}")]
    Unavailable(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_name_the_failure() {
        assert_eq!(
            DomainError::unavailable("bar closed").to_string(),
            "unavailable: bar closed"
        );
        assert_eq!(
            DomainError::validation("empty room").to_string(),
            "validation failed: empty room"
        );
    }
}
