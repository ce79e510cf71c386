use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{DocumentId, TenantId};
use crate::sri::AuthorityMessage;

/// Reception codes the Authority uses when a document is already registered
/// or still being processed. Re-checking authorization resolves them.
pub const RETRYABLE_RECEPTION_CODES: &[&str] = &["43", "45", "70"];

/// Ledger entry identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ErrorLogId(pub Uuid);

impl fmt::Display for ErrorLogId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Remote operation that produced a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SriOperation {
    Submit,
    CheckAuthorization,
}

impl SriOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::CheckAuthorization => "check_authorization",
        }
    }
}

/// Entry to append; the ledger assigns id and timestamp.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewErrorLogEntry {
    pub tenant: TenantId,
    pub document: DocumentId,
    pub operation: SriOperation,
    pub code: String,
    pub message: String,
    pub additional_info: Option<String>,
    pub retryable: bool,
}

impl NewErrorLogEntry {
    /// Entry for one Authority message. Reception messages with a code in
    /// [`RETRYABLE_RECEPTION_CODES`] are retryable; authorization rejections
    /// never are.
    pub fn from_message(
        tenant: TenantId,
        document: DocumentId,
        operation: SriOperation,
        message: &AuthorityMessage,
    ) -> Self {
        let retryable = operation == SriOperation::Submit
            && RETRYABLE_RECEPTION_CODES.contains(&message.code.as_str());
        Self {
            tenant,
            document,
            operation,
            code: message.code.clone(),
            message: message.message.clone(),
            additional_info: message.additional_info.clone(),
            retryable,
        }
    }
}

/// A recorded Authority failure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    pub id: ErrorLogId,
    pub tenant: TenantId,
    pub document: DocumentId,
    pub operation: SriOperation,
    pub code: String,
    pub message: String,
    pub additional_info: Option<String>,
    pub retryable: bool,
    /// Outcome of a later retry, once one happened.
    pub retry_succeeded: Option<bool>,
    pub recorded_at: DateTime<Utc>,
}

impl ErrorLogEntry {
    pub fn record(entry: NewErrorLogEntry, recorded_at: DateTime<Utc>) -> Self {
        Self {
            id: ErrorLogId(Uuid::new_v4()),
            tenant: entry.tenant,
            document: entry.document,
            operation: entry.operation,
            code: entry.code,
            message: entry.message,
            additional_info: entry.additional_info,
            retryable: entry.retryable,
            retry_succeeded: None,
            recorded_at,
        }
    }

    /// Retryable and not yet resolved by a later attempt.
    pub fn is_open(&self) -> bool {
        self.retryable && self.retry_succeeded.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sri::MessageKind;

    fn message(code: &str) -> AuthorityMessage {
        AuthorityMessage {
            code: code.into(),
            message: "x".into(),
            additional_info: None,
            kind: MessageKind::Error,
        }
    }

    #[test]
    fn retryable_only_for_known_reception_codes() {
        let (t, d) = (TenantId::new(), DocumentId::new());
        assert!(NewErrorLogEntry::from_message(t, d, SriOperation::Submit, &message("43")).retryable);
        assert!(!NewErrorLogEntry::from_message(t, d, SriOperation::Submit, &message("35")).retryable);
        assert!(
            !NewErrorLogEntry::from_message(t, d, SriOperation::CheckAuthorization, &message("43"))
                .retryable
        );
    }

    #[test]
    fn new_entries_are_open_until_resolved() {
        let mut entry = ErrorLogEntry::record(
            NewErrorLogEntry::from_message(
                TenantId::new(),
                DocumentId::new(),
                SriOperation::Submit,
                &message("70"),
            ),
            Utc::now(),
        );
        assert!(entry.is_open());
        entry.retry_succeeded = Some(true);
        assert!(!entry.is_open());
    }
}
