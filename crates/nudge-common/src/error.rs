//! Errors shared by the store ports.

use thiserror::Error;

/// A required field was empty or out of range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field} {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: &'static str,
}

impl ValidationError {
    pub fn required(field: &'static str) -> Self {
        Self {
            field,
            reason: "is required",
        }
    }

    pub fn positive(field: &'static str) -> Self {
        Self {
            field,
            reason: "must be greater than zero",
        }
    }
}

/// Errors from `MentionStore` and `TenantStore` implementations.
///
/// `NotFound` is a normal outcome for stale callbacks and must stay
/// distinguishable from `Backend`, which callers are expected to retry.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid record: {0}")]
    Invalid(#[from] ValidationError),

    #[error("record not found")]
    NotFound,

    #[error("store backend error: {0}")]
    Backend(#[source] anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_error_names_field() {
        let err = ValidationError::required("channel_id");
        assert_eq!(err.to_string(), "channel_id is required");
    }

    #[test]
    fn store_error_converts_from_validation_error() {
        let err: StoreError = ValidationError::positive("created_at").into();
        match &err {
            StoreError::Invalid(v) => assert_eq!(v.field, "created_at"),
            _ => panic!("Expected Invalid"),
        }
        assert!(!err.is_not_found());
    }

    #[test]
    fn not_found_is_distinct_from_backend() {
        assert!(StoreError::NotFound.is_not_found());
        let backend = StoreError::Backend(anyhow::anyhow!("disk I/O error"));
        assert!(!backend.is_not_found());
        assert!(backend.to_string().contains("disk I/O error"));
    }
}
