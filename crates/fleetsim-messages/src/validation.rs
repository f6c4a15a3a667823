//! Structural validation helpers for message payloads

use thiserror::Error;

/// A payload field violated a structural rule
#[derive(Error, Debug, Clone, PartialEq)]
#[error("validation failed for {field}: {message}")]
pub struct ValidationError {
    /// Offending field, in wire spelling
    pub field: String,
    /// What rule was violated
    pub message: String,
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Required string must be non-empty
pub fn non_empty(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        Err(ValidationError::new(field, "must not be empty"))
    } else {
        Ok(())
    }
}

/// Meter readings and counters must be non-negative
pub fn non_negative(field: &str, value: i64) -> Result<(), ValidationError> {
    if value < 0 {
        Err(ValidationError::new(field, "must not be negative"))
    } else {
        Ok(())
    }
}
