use thiserror::Error;

/// A malformed envelope. Rejected at send time and never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("missing required field '{0}'")]
    MissingField(&'static str),

    #[error("invalid priority: '{0}'")]
    InvalidPriority(String),

    #[error("retry count {retry_count} exceeds retry budget {max_retries}")]
    RetryBudgetExceeded { retry_count: u32, max_retries: u32 },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error_display() {
        let err = ValidationError::MissingField("source");
        assert_eq!(err.to_string(), "missing required field 'source'");
    }

    #[test]
    fn test_retry_budget_error_display() {
        let err = ValidationError::RetryBudgetExceeded {
            retry_count: 5,
            max_retries: 3,
        };
        assert!(err.to_string().contains('5'));
        assert!(err.to_string().contains('3'));
    }
}
