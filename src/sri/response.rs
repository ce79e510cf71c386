use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::FiscalError;

/// Severity of an Authority message (`tipo`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MessageKind {
    /// `ERROR`
    Error,
    /// `ADVERTENCIA`
    Warning,
    /// `INFORMATIVO`
    Informative,
}

impl MessageKind {
    pub fn from_sri(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "ADVERTENCIA" => Self::Warning,
            "INFORMATIVO" => Self::Informative,
            _ => Self::Error,
        }
    }
}

/// One structured message returned by the Authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorityMessage {
    /// `identificador`, e.g. `"43"`.
    pub code: String,
    pub message: String,
    pub additional_info: Option<String>,
    pub kind: MessageKind,
}

impl fmt::Display for AuthorityMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)?;
        if let Some(info) = &self.additional_info {
            write!(f, " ({info})")?;
        }
        Ok(())
    }
}

/// Outcome of the reception operation (`validarComprobante`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReceptionResponse {
    /// `RECIBIDA`: accepted for asynchronous processing.
    Received,
    /// `DEVUELTA`: returned with validation messages.
    Returned(Vec<AuthorityMessage>),
}

/// A final authorization granted by the Authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authorization {
    pub number: String,
    pub authorized_at: DateTime<Utc>,
    /// The authorized document as echoed back by the Authority, if present.
    pub document: Option<String>,
    /// Informative messages attached to the authorization.
    pub messages: Vec<AuthorityMessage>,
}

/// Outcome of the authorization query (`autorizacionComprobante`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationResponse {
    /// `EN PROCESAMIENTO`, or no authorization recorded yet.
    Processing,
    /// `AUTORIZADO`.
    Authorized(Authorization),
    /// `NO AUTORIZADO` with the reasons.
    NotAuthorized(Vec<AuthorityMessage>),
}

/// Typed failure of a call to the Authority. Always transient: the document
/// is left untouched and the command may be re-issued.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum SubmissionFailure {
    /// Connection refused, DNS failure, TLS error.
    #[error("transport error: {0}")]
    Transport(String),
    /// No answer within the configured timeout.
    #[error("request timed out")]
    Timeout,
    /// The endpoint answered with a non-success HTTP status.
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },
    /// The body is not a recognizable SOAP response.
    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl From<SubmissionFailure> for FiscalError {
    fn from(failure: SubmissionFailure) -> Self {
        FiscalError::Authority(failure.to_string())
    }
}
