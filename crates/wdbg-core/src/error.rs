//! Domain-specific error types following panic-free policy.

use thiserror::Error;

/// Errors that can occur in domain operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// The target string could not be turned into a dump path or attach descriptor
    #[error("Invalid target '{input}': {reason}")]
    InvalidTarget { input: String, reason: String },
}

impl DomainError {
    /// Creates an invalid target error.
    pub fn invalid_target(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTarget {
            input: input.into(),
            reason: reason.into(),
        }
    }
}

/// Result type for domain operations.
pub type DomainResult<T> = Result<T, DomainError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_domain_error_display() {
        let err = DomainError::invalid_target("attach:abc", "pid is not a number");
        assert_eq!(
            err.to_string(),
            "Invalid target 'attach:abc': pid is not a number"
        );
    }
}
