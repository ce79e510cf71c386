use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::core::{
    AdditionalField, CreditNoteDetails, CustomerId, DocumentId, DocumentStatus, DocumentType,
    DraftBuilder, DraftDocument, EmissionPointContext, EmissionPointId, FiscalDocument,
    FiscalError, IssuerProfile, LegalNumber, LineItem, LineItemBuilder, PaymentMethod, ProductId,
    SequenceAllocator, TenantId, ValidationError, document_totals, into_validation_error,
    validate_items,
};
use crate::signing::{SigningCredentials, sign_xml, verify_xml};
use crate::sri::{AuthorityMessage, AuthorizationResponse, ReceptionResponse, SubmissionFailure};
use crate::xml::build_xml;

use super::artifacts::ArtifactPaths;
use super::ledger::{ErrorLogEntry, NewErrorLogEntry, SriOperation};
use super::ports::{
    ArtifactStore, AuthorityGateway, AuthorityProfiles, CustomerDirectory, DocumentRepository,
    ErrorLedger, ProductCatalog,
};

/// One requested line: a catalog product and a quantity, optionally with a
/// negotiated unit price.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRequest {
    pub product: ProductId,
    pub quantity: Decimal,
    pub unit_price: Option<Decimal>,
}

impl ItemRequest {
    pub fn new(product: ProductId, quantity: Decimal) -> Self {
        Self {
            product,
            quantity,
            unit_price: None,
        }
    }

    pub fn unit_price(mut self, price: Decimal) -> Self {
        self.unit_price = Some(price);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateInvoice {
    pub emission_point: EmissionPointId,
    pub customer: CustomerId,
    pub issue_date: NaiveDate,
    pub items: Vec<ItemRequest>,
    pub payment_method: PaymentMethod,
    pub notes: Option<String>,
    pub additional_info: Vec<AdditionalField>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreateCreditNote {
    pub emission_point: EmissionPointId,
    pub original_invoice: DocumentId,
    /// Must be the customer of the original invoice.
    pub customer: CustomerId,
    pub issue_date: NaiveDate,
    pub reason: String,
    pub physical_return: bool,
    pub items: Vec<ItemRequest>,
    pub notes: Option<String>,
    pub additional_info: Vec<AdditionalField>,
}

/// Result of a submission. Only `Received` means the Authority has the
/// document; none of the variants changes the document's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    Received,
    /// Returned (`DEVUELTA`); the messages are in the error ledger.
    Returned(Vec<AuthorityMessage>),
    /// The Authority could not be reached or answered unintelligibly.
    Unavailable(SubmissionFailure),
}

/// Result of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationOutcome {
    /// Still being processed; nothing changed.
    Processing,
    Authorized {
        number: String,
        authorized_at: DateTime<Utc>,
    },
    /// Permanently rejected; the document is now `Rejected`.
    Rejected(Vec<AuthorityMessage>),
    /// Transient failure; nothing changed.
    Unavailable(SubmissionFailure),
}

/// The collaborators a [`FiscalService`] works with.
#[derive(Clone)]
pub struct Collaborators {
    pub documents: Arc<dyn DocumentRepository>,
    pub ledger: Arc<dyn ErrorLedger>,
    pub artifacts: Arc<dyn ArtifactStore>,
    pub products: Arc<dyn ProductCatalog>,
    pub customers: Arc<dyn CustomerDirectory>,
    pub profiles: Arc<dyn AuthorityProfiles>,
    pub gateway: Arc<dyn AuthorityGateway>,
}

/// Lifecycle commands for invoices and credit notes.
///
/// Every command checks tenant ownership and the document's current status
/// before acting, and persists the result with a version compare-and-set.
/// Nothing is retried implicitly.
pub struct FiscalService {
    ports: Collaborators,
    sequences: Arc<SequenceAllocator>,
    clock: fn() -> DateTime<Utc>,
}

impl FiscalService {
    pub fn new(ports: Collaborators, sequences: Arc<SequenceAllocator>) -> Self {
        Self {
            ports,
            sequences,
            clock: Utc::now,
        }
    }

    /// Replace the wall clock used for certificate expiry, signing time and
    /// deletion timestamps.
    pub fn with_clock(mut self, clock: fn() -> DateTime<Utc>) -> Self {
        self.clock = clock;
        self
    }

    pub fn sequences(&self) -> &SequenceAllocator {
        &self.sequences
    }

    /// Create an invoice in `Draft`, numbered on `request.emission_point`.
    ///
    /// The sequential is allocated before the lines are resolved; a later
    /// validation failure leaves that number unused.
    #[tracing::instrument(skip_all, fields(tenant = %tenant))]
    pub async fn create_invoice(
        &self,
        tenant: TenantId,
        request: CreateInvoice,
    ) -> Result<FiscalDocument, FiscalError> {
        let issuer = self.issuer(tenant).await?;
        let ctx = self.sequences.resolve(tenant, request.emission_point)?;
        let buyer = self
            .ports
            .customers
            .customer(tenant, request.customer)
            .await?
            .ok_or_else(|| FiscalError::NotFound(format!("customer {}", request.customer)))?;
        let number = self.allocate_number(&ctx, DocumentType::Invoice)?;

        let draft = async {
            let items = self.resolve_items(tenant, &request.items).await?;
            with_extras(
                DraftBuilder::invoice(request.issue_date)
                    .buyer(buyer)
                    .items(items)
                    .payment_method(request.payment_method),
                request.notes,
                request.additional_info,
            )
            .build()
        }
        .await;

        let document = self
            .store_draft(tenant, &ctx, number, &issuer, draft)
            .await?;
        info!(document = %document.id(), number = %document.number(), "invoice created");
        Ok(document)
    }

    /// Create a credit note against an authorized invoice of the same
    /// customer. Its total cannot exceed the invoice total.
    #[tracing::instrument(skip_all, fields(tenant = %tenant, original = %request.original_invoice))]
    pub async fn create_credit_note(
        &self,
        tenant: TenantId,
        request: CreateCreditNote,
    ) -> Result<FiscalDocument, FiscalError> {
        let original = self.load(tenant, request.original_invoice).await?;
        if original.document_type() != DocumentType::Invoice {
            return Err(FiscalError::Precondition(format!(
                "document {} is not an invoice",
                original.id()
            )));
        }
        original.expect_status(DocumentStatus::Authorized)?;
        if original.buyer().customer_id != request.customer {
            return Err(FiscalError::Validation(format!(
                "customer: credit note customer {} differs from invoice customer {}",
                request.customer,
                original.buyer().customer_id
            )));
        }

        let issuer = self.issuer(tenant).await?;
        let ctx = self.sequences.resolve(tenant, request.emission_point)?;
        let number = self.allocate_number(&ctx, DocumentType::CreditNote)?;

        let draft = async {
            let items = self.resolve_items(tenant, &request.items).await?;
            check_credit_limit(&items, &original)?;
            let details = CreditNoteDetails {
                original_invoice: original.id(),
                original_number: original.number(),
                original_issue_date: original.issue_date(),
                reason: request.reason,
                physical_return: request.physical_return,
            };
            with_extras(
                DraftBuilder::credit_note(request.issue_date, details)
                    .buyer(original.buyer().clone())
                    .items(items)
                    .payment_method(original.payment_method()),
                request.notes,
                request.additional_info,
            )
            .build()
        }
        .await;

        let document = self
            .store_draft(tenant, &ctx, number, &issuer, draft)
            .await?;
        info!(document = %document.id(), number = %document.number(), "credit note created");
        Ok(document)
    }

    /// Replace all lines of a draft and recompute its totals.
    #[tracing::instrument(skip_all, fields(tenant = %tenant, document = %id))]
    pub async fn replace_items(
        &self,
        tenant: TenantId,
        id: DocumentId,
        requests: Vec<ItemRequest>,
    ) -> Result<FiscalDocument, FiscalError> {
        let mut document = self.load(tenant, id).await?;
        document.ensure_editable()?;

        let items = self.resolve_items(tenant, &requests).await?;
        let mut errors = validate_items(&items);
        if items.is_empty() {
            errors.push(ValidationError::new("items", "at least one item is required"));
        }
        if !errors.is_empty() {
            return Err(into_validation_error(&errors));
        }
        if let Some(details) = document.kind().credit_note() {
            let original = self.load(tenant, details.original_invoice).await?;
            check_credit_limit(&items, &original)?;
        }

        document.replace_items(items)?;
        let document = self.ports.documents.update(document).await?;
        info!(total = %document.totals().total, "items replaced");
        Ok(document)
    }

    /// Build the Authority XML, derive and store the access key, and move the
    /// document to `PendingSignature`.
    #[tracing::instrument(skip_all, fields(tenant = %tenant, document = %id))]
    pub async fn generate_xml(
        &self,
        tenant: TenantId,
        id: DocumentId,
    ) -> Result<FiscalDocument, FiscalError> {
        let mut document = self.load(tenant, id).await?;
        document.ensure_editable()?;
        let issuer = self.issuer(tenant).await?;
        let ctx = self.sequences.resolve(tenant, document.emission_point())?;

        let built = build_xml(&document, &issuer, &ctx.establishment, &ctx.emission_point)?;
        let paths = ArtifactPaths::new(
            tenant,
            document.document_type(),
            document.issue_date(),
            &built.access_key,
        );
        self.ports
            .artifacts
            .put(&paths.xml, built.xml.as_bytes())
            .await?;

        let access_key = built.access_key.as_str().to_string();
        document.record_xml(built.access_key, paths.xml)?;
        let document = self.ports.documents.update(document).await?;
        info!(access_key = %access_key, state = %document.status(), "XML generated");
        Ok(document)
    }

    /// Sign the generated XML with the tenant's certificate and move the
    /// document to `PendingAuthorization`.
    #[tracing::instrument(skip_all, fields(tenant = %tenant, document = %id))]
    pub async fn sign(&self, tenant: TenantId, id: DocumentId) -> Result<FiscalDocument, FiscalError> {
        let mut document = self.load(tenant, id).await?;
        document.expect_status(DocumentStatus::PendingSignature)?;
        let access_key = document.require_access_key()?.clone();
        let xml_path = document.artifacts().xml.clone().ok_or_else(|| {
            FiscalError::Precondition(format!("document {id} has no generated XML"))
        })?;

        let bundle = self
            .ports
            .profiles
            .certificate(tenant)
            .await?
            .ok_or_else(|| {
                FiscalError::Certificate(format!("tenant {tenant} has no signing certificate"))
            })?;
        let credentials = SigningCredentials::from_bundle(&bundle)?;
        let now = (self.clock)();
        credentials.ensure_valid_at(now)?;

        let xml = self.ports.artifacts.get(&xml_path).await?;
        let xml = String::from_utf8(xml)
            .map_err(|e| FiscalError::Xml(format!("stored XML is not UTF-8: {e}")))?;
        let signed = tokio::task::spawn_blocking(move || sign_xml(&xml, &credentials, now))
            .await
            .map_err(|e| FiscalError::Signature(format!("signing task failed: {e}")))??;

        let paths = ArtifactPaths::new(
            tenant,
            document.document_type(),
            document.issue_date(),
            &access_key,
        );
        self.ports
            .artifacts
            .put(&paths.signed_xml, signed.as_bytes())
            .await?;
        document.record_signature(paths.signed_xml)?;
        let document = self.ports.documents.update(document).await?;
        info!(access_key = access_key.as_str(), state = %document.status(), "XML signed");
        Ok(document)
    }

    /// Re-verify the stored signed XML of a document.
    #[tracing::instrument(skip_all, fields(tenant = %tenant, document = %id))]
    pub async fn validate_signature(
        &self,
        tenant: TenantId,
        id: DocumentId,
    ) -> Result<bool, FiscalError> {
        let document = self.load(tenant, id).await?;
        let signed = self.ports.artifacts.get(document.signed_xml_path()?).await?;
        let signed = String::from_utf8_lossy(&signed);
        Ok(match verify_xml(&signed) {
            Ok(()) => true,
            Err(e) => {
                warn!(document = %id, error = %e, "stored signature does not verify");
                false
            }
        })
    }

    /// Send the signed XML to the reception service. The document's status
    /// is never changed; returned messages go to the error ledger.
    #[tracing::instrument(skip_all, fields(tenant = %tenant, document = %id))]
    pub async fn submit(&self, tenant: TenantId, id: DocumentId) -> Result<SubmitOutcome, FiscalError> {
        let document = self.load(tenant, id).await?;
        document.expect_status(DocumentStatus::PendingAuthorization)?;
        let signed = self.ports.artifacts.get(document.signed_xml_path()?).await?;

        match self.ports.gateway.submit(&signed).await {
            Ok(ReceptionResponse::Received) => {
                self.close_open_entries(id, true).await?;
                info!("document received");
                Ok(SubmitOutcome::Received)
            }
            Ok(ReceptionResponse::Returned(messages)) => {
                self.close_open_entries(id, false).await?;
                for message in &messages {
                    self.ports
                        .ledger
                        .append(NewErrorLogEntry::from_message(
                            tenant,
                            id,
                            SriOperation::Submit,
                            message,
                        ))
                        .await?;
                }
                warn!(messages = messages.len(), "document returned");
                Ok(SubmitOutcome::Returned(messages))
            }
            Err(failure) => {
                warn!(error = %failure, "Authority unavailable on submit");
                Ok(SubmitOutcome::Unavailable(failure))
            }
        }
    }

    /// Ask the Authority for its verdict. `AUTORIZADO` authorizes the
    /// document, `NO AUTORIZADO` rejects it and logs every message; anything
    /// else leaves the document untouched.
    ///
    /// Checking an already authorized document returns the stored
    /// authorization without calling the Authority.
    #[tracing::instrument(skip_all, fields(tenant = %tenant, document = %id))]
    pub async fn check_authorization(
        &self,
        tenant: TenantId,
        id: DocumentId,
    ) -> Result<AuthorizationOutcome, FiscalError> {
        let mut document = self.load(tenant, id).await?;
        if document.status() == DocumentStatus::Authorized {
            let sri = document.sri();
            if let (Some(number), Some(authorized_at)) =
                (sri.authorization_number.clone(), sri.authorized_at)
            {
                return Ok(AuthorizationOutcome::Authorized {
                    number,
                    authorized_at,
                });
            }
        }
        document.expect_status(DocumentStatus::PendingAuthorization)?;
        let access_key = document.require_access_key()?.clone();

        match self.ports.gateway.check_authorization(&access_key).await {
            Ok(AuthorizationResponse::Processing) => {
                info!("authorization still in process");
                Ok(AuthorizationOutcome::Processing)
            }
            Ok(AuthorizationResponse::Authorized(authorization)) => {
                let paths = ArtifactPaths::new(
                    tenant,
                    document.document_type(),
                    document.issue_date(),
                    &access_key,
                );
                let authorized_xml = match &authorization.document {
                    Some(xml) => {
                        self.ports
                            .artifacts
                            .put(&paths.authorized_xml, xml.as_bytes())
                            .await?;
                        Some(paths.authorized_xml)
                    }
                    None => None,
                };
                document.record_authorization(
                    authorization.number.clone(),
                    authorization.authorized_at,
                    authorized_xml,
                    paths.printable,
                )?;
                self.ports.documents.update(document).await?;
                self.close_open_entries(id, true).await?;
                info!(number = %authorization.number, "document authorized");
                Ok(AuthorizationOutcome::Authorized {
                    number: authorization.number,
                    authorized_at: authorization.authorized_at,
                })
            }
            Ok(AuthorizationResponse::NotAuthorized(messages)) => {
                document.record_rejection()?;
                self.ports.documents.update(document).await?;
                for message in &messages {
                    self.ports
                        .ledger
                        .append(NewErrorLogEntry::from_message(
                            tenant,
                            id,
                            SriOperation::CheckAuthorization,
                            message,
                        ))
                        .await?;
                }
                warn!(messages = messages.len(), "document rejected");
                Ok(AuthorizationOutcome::Rejected(messages))
            }
            Err(failure) => {
                warn!(error = %failure, "Authority unavailable on authorization check");
                Ok(AuthorizationOutcome::Unavailable(failure))
            }
        }
    }

    /// Soft-delete a draft.
    #[tracing::instrument(skip_all, fields(tenant = %tenant, document = %id))]
    pub async fn delete(&self, tenant: TenantId, id: DocumentId) -> Result<FiscalDocument, FiscalError> {
        let mut document = self.load(tenant, id).await?;
        document.soft_delete((self.clock)())?;
        let document = self.ports.documents.update(document).await?;
        info!("draft deleted");
        Ok(document)
    }

    /// Record that an authorized document was annulled on the Authority's
    /// portal.
    #[tracing::instrument(skip_all, fields(tenant = %tenant, document = %id))]
    pub async fn cancel(&self, tenant: TenantId, id: DocumentId) -> Result<FiscalDocument, FiscalError> {
        let mut document = self.load(tenant, id).await?;
        document.cancel()?;
        let document = self.ports.documents.update(document).await?;
        info!("document cancelled");
        Ok(document)
    }

    /// The next sequential `document_type` would get on `point`, without
    /// consuming it.
    pub fn current_sequential(
        &self,
        tenant: TenantId,
        point: EmissionPointId,
        document_type: DocumentType,
    ) -> Result<u32, FiscalError> {
        self.sequences.resolve(tenant, point)?;
        self.sequences.current(point, document_type)
    }

    pub async fn document(
        &self,
        tenant: TenantId,
        id: DocumentId,
    ) -> Result<FiscalDocument, FiscalError> {
        self.load(tenant, id).await
    }

    /// Error ledger entries of a document, oldest first.
    pub async fn error_log(
        &self,
        tenant: TenantId,
        id: DocumentId,
    ) -> Result<Vec<ErrorLogEntry>, FiscalError> {
        self.load(tenant, id).await?;
        self.ports.ledger.entries_for(id).await
    }

    async fn load(&self, tenant: TenantId, id: DocumentId) -> Result<FiscalDocument, FiscalError> {
        self.ports
            .documents
            .get(tenant, id)
            .await?
            .ok_or_else(|| FiscalError::NotFound(format!("document {id}")))
    }

    async fn issuer(&self, tenant: TenantId) -> Result<IssuerProfile, FiscalError> {
        self.ports.profiles.issuer(tenant).await?.ok_or_else(|| {
            FiscalError::Precondition(format!("tenant {tenant} has no Authority profile"))
        })
    }

    fn allocate_number(
        &self,
        ctx: &EmissionPointContext,
        document_type: DocumentType,
    ) -> Result<LegalNumber, FiscalError> {
        let sequential = self.sequences.allocate(ctx.emission_point.id, document_type)?;
        LegalNumber::new(ctx.establishment.code, ctx.emission_point.code, sequential)
    }

    async fn resolve_items(
        &self,
        tenant: TenantId,
        requests: &[ItemRequest],
    ) -> Result<Vec<LineItem>, FiscalError> {
        let mut items = Vec::with_capacity(requests.len());
        let mut errors = Vec::new();
        for (i, request) in requests.iter().enumerate() {
            match self.ports.products.product(tenant, request.product).await? {
                Some(product) => items.push(
                    LineItemBuilder::new(
                        product.code,
                        product.description,
                        request.quantity,
                        request.unit_price.unwrap_or(product.unit_price),
                    )
                    .product(product.id)
                    .tax_rate(product.tax_rate)
                    .build(),
                ),
                None => errors.push(ValidationError::new(
                    format!("items[{i}].product"),
                    format!("unknown product {}", request.product),
                )),
            }
        }
        if errors.is_empty() {
            Ok(items)
        } else {
            Err(into_validation_error(&errors))
        }
    }

    async fn store_draft(
        &self,
        tenant: TenantId,
        ctx: &EmissionPointContext,
        number: LegalNumber,
        issuer: &IssuerProfile,
        draft: Result<DraftDocument, FiscalError>,
    ) -> Result<FiscalDocument, FiscalError> {
        let draft = draft.inspect_err(|e| {
            warn!(%number, error = %e, "draft rejected, sequential left unused");
        })?;
        let document = FiscalDocument::new_draft(
            tenant,
            ctx.establishment.id,
            ctx.emission_point.id,
            number,
            issuer.environment,
            draft,
        );
        self.ports.documents.insert(document).await
    }

    /// Settle retryable submit entries that are still open.
    async fn close_open_entries(&self, id: DocumentId, succeeded: bool) -> Result<(), FiscalError> {
        for entry in self.ports.ledger.entries_for(id).await? {
            if entry.operation == SriOperation::Submit && entry.is_open() {
                self.ports
                    .ledger
                    .record_retry_outcome(entry.id, succeeded)
                    .await?;
            }
        }
        Ok(())
    }
}

fn with_extras(
    mut builder: DraftBuilder,
    notes: Option<String>,
    additional_info: Vec<AdditionalField>,
) -> DraftBuilder {
    if let Some(notes) = notes {
        builder = builder.notes(notes);
    }
    for field in additional_info {
        builder = builder.additional_field(field.name, field.value);
    }
    builder
}

fn check_credit_limit(items: &[LineItem], original: &FiscalDocument) -> Result<(), FiscalError> {
    let total = document_totals(items).total;
    if total > original.totals().total {
        return Err(FiscalError::Validation(format!(
            "items: credit note total {total} exceeds invoice total {}",
            original.totals().total
        )));
    }
    Ok(())
}
