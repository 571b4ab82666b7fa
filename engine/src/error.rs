//! Error types for the sync engine.

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};
use thiserror::Error;

/// All possible errors from the sync engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Remote rejections (never retried)
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("{resource} not found: {id}")]
    NotFound { resource: String, id: String },

    // Retried with backoff, then surfaced
    #[error("rate limited after {attempts} attempts")]
    RateLimited { attempts: u32 },

    #[error("transient failure after {attempts} attempts: {message}")]
    Transient { message: String, attempts: u32 },

    // Identity resolution
    #[error("ambiguous match: {count} {resource} records satisfy criterion '{criterion}'")]
    AmbiguousMatch {
        resource: String,
        criterion: String,
        count: usize,
    },

    // Local faults
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("invalid mapping: {0}")]
    InvalidMapping(String),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Whether the client may retry the request that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RateLimited { .. } | Error::Transient { .. })
    }

    /// Whether every subsequent call would fail the same way, so a batch
    /// should stop instead of continuing with the next record.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::Auth(_))
    }

    /// Stable machine-readable name of the error class.
    pub fn category(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::Auth(_) => "auth_error",
            Error::NotFound { .. } => "not_found",
            Error::RateLimited { .. } => "rate_limited",
            Error::Transient { .. } => "transient_error",
            Error::AmbiguousMatch { .. } => "ambiguous_match",
            Error::MalformedResponse(_) => "malformed_response",
            Error::InvalidMapping(_) => "invalid_mapping",
            Error::InvalidConfig(_) => "invalid_config",
        }
    }
}

/// Reports carry errors as `{ "kind": ..., "message": ... }`.
impl Serialize for Error {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut state = serializer.serialize_struct("Error", 2)?;
        state.serialize_field("kind", self.category())?;
        state.serialize_field("message", &self.to_string())?;
        state.end()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::NotFound {
            resource: "enduser".into(),
            id: "abc".into(),
        };
        assert_eq!(err.to_string(), "enduser not found: abc");

        let err = Error::AmbiguousMatch {
            resource: "endusers".into(),
            criterion: "external id".into(),
            count: 2,
        };
        assert_eq!(
            err.to_string(),
            "ambiguous match: 2 endusers records satisfy criterion 'external id'"
        );

        let err = Error::RateLimited { attempts: 4 };
        assert_eq!(err.to_string(), "rate limited after 4 attempts");
    }

    #[test]
    fn retryable_and_fatal_classes() {
        assert!(Error::RateLimited { attempts: 1 }.is_retryable());
        assert!(Error::Transient {
            message: "reset".into(),
            attempts: 1
        }
        .is_retryable());
        assert!(!Error::Validation("missing fname".into()).is_retryable());
        assert!(!Error::Auth("bad key".into()).is_retryable());

        assert!(Error::Auth("bad key".into()).is_fatal());
        assert!(!Error::NotFound {
            resource: "enduser".into(),
            id: "1".into()
        }
        .is_fatal());
    }

    #[test]
    fn serializes_kind_and_message() {
        let err = Error::Validation("email is required".into());
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json["kind"], "validation_error");
        assert_eq!(json["message"], "validation failed: email is required");
    }
}
