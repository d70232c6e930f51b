use std::fmt;

use thiserror::Error;

/// A single field-level problem found while validating a configuration
/// document or a data source before it is sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ValidationErrors(pub Vec<FieldError>);

impl ValidationErrors {
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|e| e.field.as_str())
    }

    /// Returns `Ok(())` when no errors were collected.
    pub fn into_result(self) -> Result<(), ApiError> {
        if self.0.is_empty() {
            Ok(())
        } else {
            Err(ApiError::Validation(self))
        }
    }
}

impl From<Vec<FieldError>> for ValidationErrors {
    fn from(errors: Vec<FieldError>) -> Self {
        Self(errors)
    }
}

impl fmt::Display for ValidationErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let joined = self
            .0
            .iter()
            .map(|e| e.to_string())
            .collect::<Vec<_>>()
            .join("; ");
        f.write_str(&joined)
    }
}

#[derive(Debug, Error)]
pub enum ApiError {
    /// Config or data-source shape violation, caught before submission.
    #[error("validation failed: {0}")]
    Validation(ValidationErrors),

    /// The session could not be recovered; the caller has been signed out.
    #[error("session expired, please sign in again")]
    AuthExpired,

    #[error("request timed out")]
    NetworkTimeout,

    /// The backend answered with a non-success status.
    #[error("{}", .detail.as_deref().unwrap_or("the server rejected the request"))]
    Remote { status: u16, detail: Option<String> },

    /// An operation referenced a cache entry that does not exist (any more).
    #[error("{0}")]
    Consistency(String),

    #[error("network error: {0}")]
    Transport(String),

    #[error("unexpected response from server: {0}")]
    Decode(String),

    /// A local source file could not be read.
    #[error("failed to read file: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Fills in a human-readable message for remote failures that came back
    /// without a structured `detail`.
    pub fn or_fallback(self, fallback: &str) -> Self {
        match self {
            ApiError::Remote { status, detail: None } => ApiError::Remote {
                status,
                detail: Some(fallback.to_string()),
            },
            other => other,
        }
    }

    pub fn is_auth_expired(&self) -> bool {
        matches!(self, ApiError::AuthExpired)
    }

    pub fn validation_errors(&self) -> Option<&ValidationErrors> {
        match self {
            ApiError::Validation(errors) => Some(errors),
            _ => None,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
