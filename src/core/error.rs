use chrono::{DateTime, Utc};
use thiserror::Error;

/// Errors produced by the fiscal document engine.
///
/// Variants follow the failure taxonomy of the lifecycle: precondition
/// violations, validation failures, transient Authority errors and
/// certificate/signature errors are all distinguishable at the call site.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FiscalError {
    /// The document is in the wrong state, belongs to another tenant, or a
    /// prerequisite artifact is missing.
    #[error("precondition failed: {0}")]
    Precondition(String),

    /// A referenced entity does not exist for this tenant.
    #[error("not found: {0}")]
    NotFound(String),

    /// One or more business validation rules failed.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Another command modified the document first.
    #[error("concurrent modification: {0}")]
    Conflict(String),

    /// Sequence allocation or legal number error.
    #[error("numbering error: {0}")]
    Numbering(String),

    /// XML generation or parsing error.
    #[error("XML error: {0}")]
    Xml(String),

    /// Certificate bundle missing, unreadable, or without a private key.
    #[error("certificate error: {0}")]
    Certificate(String),

    /// The signing certificate is no longer valid.
    #[error("certificate expired at {0}")]
    CertificateExpired(DateTime<Utc>),

    /// Signature creation or verification failed.
    #[error("signature error: {0}")]
    Signature(String),

    /// Artifact or repository I/O failure.
    #[error("storage error: {0}")]
    Storage(String),

    /// The Authority could not be reached or answered unintelligibly.
    #[error("authority unavailable: {0}")]
    Authority(String),

    /// Invalid configuration.
    #[error("configuration error: {0}")]
    Config(String),
}

impl FiscalError {
    /// Whether re-issuing the same command may succeed without any change
    /// on the caller's side.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Authority(_) | Self::Conflict(_))
    }

    /// Whether the failure is a rejected precondition (wrong state, missing
    /// artifact, foreign tenant).
    pub fn is_precondition(&self) -> bool {
        matches!(self, Self::Precondition(_) | Self::NotFound(_))
    }
}

/// A single validation error with field path and message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    /// Dot-separated path to the invalid field (e.g. "items[2].quantity").
    pub field: String,
    /// Human-readable error description.
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl ValidationError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Collapse a list of validation errors into one [`FiscalError::Validation`].
pub fn into_validation_error(errors: &[ValidationError]) -> FiscalError {
    let msg = errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ");
    FiscalError::Validation(msg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(FiscalError::Authority("timeout".into()).is_transient());
        assert!(FiscalError::Conflict("version".into()).is_transient());
        assert!(!FiscalError::Precondition("status".into()).is_transient());
        assert!(!FiscalError::Certificate("no key".into()).is_transient());
    }

    #[test]
    fn validation_errors_are_joined() {
        let err = into_validation_error(&[
            ValidationError::new("items", "at least one item is required"),
            ValidationError::new("buyer.identification", "must not be empty"),
        ]);
        assert_eq!(
            err.to_string(),
            "validation failed: items: at least one item is required; buyer.identification: must not be empty"
        );
    }
}
