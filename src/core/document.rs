use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::access_key::AccessKey;
use super::codes::{DocumentType, Environment, IdentificationType, PaymentMethod, TaxRate};
use super::error::FiscalError;
use super::establishment::{EmissionPointId, EstablishmentId, LegalNumber, TenantId};
use super::tax::{DocumentTotals, LineTotals, document_totals};

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }
    };
}

uuid_id!(
    /// Internal document identifier.
    DocumentId
);
uuid_id!(
    /// Customer identifier in the tenant's customer directory.
    CustomerId
);
uuid_id!(
    /// Product identifier in the tenant's catalog.
    ProductId
);

/// Lifecycle status of a fiscal document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentStatus {
    Draft,
    PendingSignature,
    PendingAuthorization,
    Authorized,
    Rejected,
    Cancelled,
}

impl DocumentStatus {
    /// `Authorized`, `Rejected` and `Cancelled` accept no further transitions
    /// except `Authorized -> Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Authorized | Self::Rejected | Self::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Draft => "draft",
            Self::PendingSignature => "pending_signature",
            Self::PendingAuthorization => "pending_authorization",
            Self::Authorized => "authorized",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Link from a credit note to the authorized invoice it modifies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreditNoteDetails {
    pub original_invoice: DocumentId,
    pub original_number: LegalNumber,
    pub original_issue_date: NaiveDate,
    /// Legal reason (`motivo`).
    pub reason: String,
    /// Whether goods were physically returned.
    pub physical_return: bool,
}

/// Kind-specific part of a fiscal document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentKind {
    Invoice,
    CreditNote(CreditNoteDetails),
}

impl DocumentKind {
    pub fn document_type(&self) -> DocumentType {
        match self {
            Self::Invoice => DocumentType::Invoice,
            Self::CreditNote(_) => DocumentType::CreditNote,
        }
    }

    pub fn credit_note(&self) -> Option<&CreditNoteDetails> {
        match self {
            Self::Invoice => None,
            Self::CreditNote(details) => Some(details),
        }
    }
}

/// Buyer data copied onto the document at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Buyer {
    pub customer_id: CustomerId,
    pub identification_type: IdentificationType,
    pub identification: String,
    pub name: String,
    pub address: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
}

/// A document line with its computed amounts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub product_id: Option<ProductId>,
    /// Main product code (`codigoPrincipal`).
    pub code: String,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub tax_rate: TaxRate,
    pub totals: LineTotals,
}

/// Free-form `campoAdicional` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalField {
    pub name: String,
    pub value: String,
}

/// Validated business content of a new document, before numbering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftDocument {
    pub kind: DocumentKind,
    pub issue_date: NaiveDate,
    pub buyer: Buyer,
    pub items: Vec<LineItem>,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
    pub additional_info: Vec<AdditionalField>,
}

/// Authority-side facts about a document. Only the XML generation and
/// authorization commands write these.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SriState {
    pub access_key: Option<AccessKey>,
    pub authorization_number: Option<String>,
    pub authorized_at: Option<DateTime<Utc>>,
}

/// Paths of the persisted artifacts, relative to the artifact store root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentArtifacts {
    pub xml: Option<PathBuf>,
    pub signed_xml: Option<PathBuf>,
    pub authorized_xml: Option<PathBuf>,
    pub printable: Option<PathBuf>,
}

/// An invoice or credit note together with its lifecycle state.
///
/// Business fields are fixed at creation (items may be replaced while the
/// document is a draft). Status, access key, authorization data and artifact
/// paths only change through the transition methods used by the lifecycle
/// commands.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FiscalDocument {
    id: DocumentId,
    tenant: TenantId,
    kind: DocumentKind,
    number: LegalNumber,
    establishment: EstablishmentId,
    emission_point: EmissionPointId,
    environment: Environment,
    issue_date: NaiveDate,
    buyer: Buyer,
    items: Vec<LineItem>,
    totals: DocumentTotals,
    payment_method: PaymentMethod,
    notes: Option<String>,
    additional_info: Vec<AdditionalField>,
    status: DocumentStatus,
    sri: SriState,
    artifacts: DocumentArtifacts,
    deleted_at: Option<DateTime<Utc>>,
    version: u64,
}

impl FiscalDocument {
    /// Create a numbered draft.
    pub fn new_draft(
        tenant: TenantId,
        establishment: EstablishmentId,
        emission_point: EmissionPointId,
        number: LegalNumber,
        environment: Environment,
        draft: DraftDocument,
    ) -> Self {
        let totals = document_totals(&draft.items);
        Self {
            id: DocumentId::new(),
            tenant,
            kind: draft.kind,
            number,
            establishment,
            emission_point,
            environment,
            issue_date: draft.issue_date,
            buyer: draft.buyer,
            items: draft.items,
            totals,
            payment_method: draft.payment_method,
            notes: draft.notes,
            additional_info: draft.additional_info,
            status: DocumentStatus::Draft,
            sri: SriState::default(),
            artifacts: DocumentArtifacts::default(),
            deleted_at: None,
            version: 0,
        }
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn tenant(&self) -> TenantId {
        self.tenant
    }

    pub fn kind(&self) -> &DocumentKind {
        &self.kind
    }

    pub fn document_type(&self) -> DocumentType {
        self.kind.document_type()
    }

    pub fn number(&self) -> LegalNumber {
        self.number
    }

    pub fn establishment(&self) -> EstablishmentId {
        self.establishment
    }

    pub fn emission_point(&self) -> EmissionPointId {
        self.emission_point
    }

    pub fn environment(&self) -> Environment {
        self.environment
    }

    pub fn issue_date(&self) -> NaiveDate {
        self.issue_date
    }

    pub fn buyer(&self) -> &Buyer {
        &self.buyer
    }

    pub fn items(&self) -> &[LineItem] {
        &self.items
    }

    pub fn totals(&self) -> &DocumentTotals {
        &self.totals
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    pub fn notes(&self) -> Option<&str> {
        self.notes.as_deref()
    }

    pub fn additional_info(&self) -> &[AdditionalField] {
        &self.additional_info
    }

    pub fn status(&self) -> DocumentStatus {
        self.status
    }

    pub fn sri(&self) -> &SriState {
        &self.sri
    }

    pub fn access_key(&self) -> Option<&AccessKey> {
        self.sri.access_key.as_ref()
    }

    pub fn artifacts(&self) -> &DocumentArtifacts {
        &self.artifacts
    }

    pub fn deleted_at(&self) -> Option<DateTime<Utc>> {
        self.deleted_at
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Optimistic-concurrency version, advanced by the repository on every
    /// successful write.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Set by repositories after a successful compare-and-set write.
    pub fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    pub fn is_editable(&self) -> bool {
        self.status == DocumentStatus::Draft && self.deleted_at.is_none()
    }

    pub(crate) fn ensure_editable(&self) -> Result<(), FiscalError> {
        if self.is_deleted() {
            return Err(FiscalError::Precondition(format!(
                "document {} is deleted",
                self.id
            )));
        }
        self.expect_status(DocumentStatus::Draft)
    }

    pub(crate) fn expect_status(&self, expected: DocumentStatus) -> Result<(), FiscalError> {
        if self.status != expected {
            return Err(FiscalError::Precondition(format!(
                "document {} is {}, expected {}",
                self.id, self.status, expected
            )));
        }
        Ok(())
    }

    /// Replace all lines and recompute totals. Draft only.
    pub(crate) fn replace_items(&mut self, items: Vec<LineItem>) -> Result<(), FiscalError> {
        self.ensure_editable()?;
        self.totals = document_totals(&items);
        self.items = items;
        Ok(())
    }

    /// `Draft -> PendingSignature`, storing the derived access key.
    pub(crate) fn record_xml(
        &mut self,
        access_key: AccessKey,
        xml_path: PathBuf,
    ) -> Result<(), FiscalError> {
        self.ensure_editable()?;
        self.sri.access_key = Some(access_key);
        self.artifacts.xml = Some(xml_path);
        self.status = DocumentStatus::PendingSignature;
        Ok(())
    }

    /// `PendingSignature -> PendingAuthorization`.
    pub(crate) fn record_signature(&mut self, signed_path: PathBuf) -> Result<(), FiscalError> {
        self.expect_status(DocumentStatus::PendingSignature)?;
        self.artifacts.signed_xml = Some(signed_path);
        self.status = DocumentStatus::PendingAuthorization;
        Ok(())
    }

    /// `PendingAuthorization -> Authorized`.
    pub(crate) fn record_authorization(
        &mut self,
        number: String,
        authorized_at: DateTime<Utc>,
        authorized_xml: Option<PathBuf>,
        printable: PathBuf,
    ) -> Result<(), FiscalError> {
        self.expect_status(DocumentStatus::PendingAuthorization)?;
        self.sri.authorization_number = Some(number);
        self.sri.authorized_at = Some(authorized_at);
        self.artifacts.authorized_xml = authorized_xml;
        self.artifacts.printable = Some(printable);
        self.status = DocumentStatus::Authorized;
        Ok(())
    }

    /// `PendingAuthorization -> Rejected`.
    pub(crate) fn record_rejection(&mut self) -> Result<(), FiscalError> {
        self.expect_status(DocumentStatus::PendingAuthorization)?;
        self.status = DocumentStatus::Rejected;
        Ok(())
    }

    /// `Authorized -> Cancelled`.
    pub(crate) fn cancel(&mut self) -> Result<(), FiscalError> {
        self.expect_status(DocumentStatus::Authorized)?;
        self.status = DocumentStatus::Cancelled;
        Ok(())
    }

    /// Soft-delete a draft.
    pub(crate) fn soft_delete(&mut self, at: DateTime<Utc>) -> Result<(), FiscalError> {
        self.ensure_editable()?;
        self.deleted_at = Some(at);
        Ok(())
    }

    /// Signed XML path, required before submission.
    pub(crate) fn signed_xml_path(&self) -> Result<&Path, FiscalError> {
        self.artifacts.signed_xml.as_deref().ok_or_else(|| {
            FiscalError::Precondition(format!("document {} has no signed XML", self.id))
        })
    }

    pub(crate) fn require_access_key(&self) -> Result<&AccessKey, FiscalError> {
        self.sri.access_key.as_ref().ok_or_else(|| {
            FiscalError::Precondition(format!("document {} has no access key", self.id))
        })
    }
}
