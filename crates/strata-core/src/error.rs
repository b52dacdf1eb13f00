use thiserror::Error;

/// Top-level error type for Strata.
///
/// Every exposed store, traversal, and search operation returns either a
/// payload or one of these variants.
#[derive(Error, Debug)]
pub enum StrataError {
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("{entity} {canonical_id} is already deleted")]
    AlreadyDeleted {
        entity: &'static str,
        canonical_id: String,
    },

    #[error("{entity} {canonical_id} is not deleted")]
    NotDeleted {
        entity: &'static str,
        canonical_id: String,
    },

    #[error("Validation failed for type {type_name}: {}", .reasons.join("; "))]
    ValidationFailed {
        type_name: String,
        reasons: Vec<String>,
    },

    #[error("Multiplicity violation: relationship type {rel_type} allows one live edge per {side} ({endpoint})")]
    MultiplicityViolation {
        rel_type: String,
        side: &'static str,
        endpoint: String,
    },

    #[error("Tenant mismatch: {0}")]
    TenantMismatch(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Visibility policy drift: {0}")]
    PolicyDrift(String),

    #[error("Integrity error: {0}")]
    Integrity(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl StrataError {
    pub fn validation(type_name: &str, reason: impl Into<String>) -> Self {
        Self::ValidationFailed {
            type_name: type_name.to_string(),
            reasons: vec![reason.into()],
        }
    }

    /// Whether a caller may retry the operation with backoff.
    ///
    /// Only storage unavailability is transient; `NotFound` and friends are
    /// answers, not failures.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable(_))
    }
}

impl From<config::ConfigError> for StrataError {
    fn from(e: config::ConfigError) -> Self {
        Self::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, StrataError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_storage_unavailable_is_retryable() {
        assert!(StrataError::StorageUnavailable("lock timeout".into()).is_retryable());
        assert!(!StrataError::NotFound {
            entity: "object",
            id: "x".into()
        }
        .is_retryable());
        assert!(!StrataError::TenantMismatch("x".into()).is_retryable());
    }

    #[test]
    fn validation_message_joins_reasons() {
        let err = StrataError::ValidationFailed {
            type_name: "Requirement".into(),
            reasons: vec!["missing title".into(), "priority must be string".into()],
        };
        assert_eq!(
            err.to_string(),
            "Validation failed for type Requirement: missing title; priority must be string"
        );
    }
}
