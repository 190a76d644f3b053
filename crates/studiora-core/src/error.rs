//! Error types for studiora.

use thiserror::Error;

/// Result type alias using studiora's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for studiora operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Rate limit exceeded; the caller should retry after the given delay
    #[error("Admission rejected: retry after {retry_after_secs}s")]
    AdmissionRejected { retry_after_secs: u64 },

    /// Attempted cross-tenant access or a broken tenant binding; never retried
    #[error("Tenant violation: {0}")]
    TenantViolation(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(uuid::Uuid),

    /// Transient handler failure (provider/storage hiccup, eligible for retry)
    #[error("Transient failure: {0}")]
    Transient(String),

    /// Permanent handler failure (validation or malformed input)
    #[error("Permanent failure: {0}")]
    Permanent(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Whether a retry of the failing operation may plausibly succeed.
    ///
    /// Drives the queue's requeue-vs-dead decision together with the
    /// per-queue attempt budget. Permanent failures still consume budget;
    /// this flag only describes the expectation, not the policy.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Transient(_) | Error::Request(_) | Error::Database(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_error_display_admission_rejected() {
        let err = Error::AdmissionRejected {
            retry_after_secs: 60,
        };
        assert_eq!(err.to_string(), "Admission rejected: retry after 60s");
    }

    #[test]
    fn test_error_display_tenant_violation() {
        let err = Error::TenantViolation("nested tenant binding".to_string());
        assert_eq!(err.to_string(), "Tenant violation: nested tenant binding");
    }

    #[test]
    fn test_error_display_job_not_found() {
        let id = Uuid::nil();
        let err = Error::JobNotFound(id);
        assert_eq!(err.to_string(), format!("Job not found: {}", id));
    }

    #[test]
    fn test_error_display_transient() {
        let err = Error::Transient("provider timeout".to_string());
        assert_eq!(err.to_string(), "Transient failure: provider timeout");
    }

    #[test]
    fn test_error_display_permanent() {
        let err = Error::Permanent("missing payload field".to_string());
        assert_eq!(err.to_string(), "Permanent failure: missing payload field");
    }

    #[test]
    fn test_is_transient_classification() {
        assert!(Error::Transient("x".into()).is_transient());
        assert!(Error::Request("x".into()).is_transient());
        assert!(!Error::Permanent("x".into()).is_transient());
        assert!(!Error::TenantViolation("x".into()).is_transient());
        assert!(!Error::AdmissionRejected {
            retry_after_secs: 1
        }
        .is_transient());
    }

    #[test]
    fn test_from_serde_json_error() {
        let json_err = serde_json::from_str::<i32>("not a number");
        let err: Error = json_err.unwrap_err().into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }

    #[test]
    fn test_result_type_ok() {
        fn get_result() -> Result<i32> {
            Ok(42)
        }
        assert_eq!(get_result().unwrap(), 42);
    }
}
