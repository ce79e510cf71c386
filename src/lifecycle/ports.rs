//! Boundaries to the collaborators the lifecycle depends on.
//!
//! Storage, catalog and Authority access are async traits so adapters can sit
//! on a database, an object store or the network. In-memory adapters live in
//! [`super::memory`].

use std::path::Path;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::core::{
    AccessKey, Buyer, CertificateBundle, CustomerId, DocumentId, FiscalDocument, FiscalError,
    IssuerProfile, ProductId, TaxRate, TenantId,
};
use crate::sri::{AuthorizationResponse, ReceptionResponse, SriClient, SubmissionFailure};

use super::ledger::{ErrorLogEntry, ErrorLogId, NewErrorLogEntry};

/// Persistence of fiscal documents with optimistic concurrency.
#[async_trait]
pub trait DocumentRepository: Send + Sync {
    /// Store a new document. Fails with `Conflict` if the id exists.
    async fn insert(&self, document: FiscalDocument) -> Result<FiscalDocument, FiscalError>;

    /// Load a document of `tenant`. Documents of other tenants are invisible.
    async fn get(
        &self,
        tenant: TenantId,
        id: DocumentId,
    ) -> Result<Option<FiscalDocument>, FiscalError>;

    /// Replace a stored document if its stored version still equals
    /// `document.version()`; returns the document with the bumped version.
    /// A stale version is a `Conflict`.
    async fn update(&self, document: FiscalDocument) -> Result<FiscalDocument, FiscalError>;
}

/// Append-only record of Authority-side failures.
#[async_trait]
pub trait ErrorLedger: Send + Sync {
    async fn append(&self, entry: NewErrorLogEntry) -> Result<ErrorLogEntry, FiscalError>;

    /// The only in-place change: the outcome of a later retry.
    async fn record_retry_outcome(
        &self,
        entry: ErrorLogId,
        succeeded: bool,
    ) -> Result<(), FiscalError>;

    /// Entries of one document in append order.
    async fn entries_for(&self, document: DocumentId) -> Result<Vec<ErrorLogEntry>, FiscalError>;
}

/// Blob storage for XML and printable artifacts. Paths are relative.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn put(&self, path: &Path, bytes: &[u8]) -> Result<(), FiscalError>;

    /// Missing artifacts are a `Precondition` failure.
    async fn get(&self, path: &Path) -> Result<Vec<u8>, FiscalError>;
}

/// Catalog entry used to price a document line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub code: String,
    pub description: String,
    pub unit_price: Decimal,
    pub tax_rate: TaxRate,
}

#[async_trait]
pub trait ProductCatalog: Send + Sync {
    async fn product(
        &self,
        tenant: TenantId,
        id: ProductId,
    ) -> Result<Option<Product>, FiscalError>;
}

#[async_trait]
pub trait CustomerDirectory: Send + Sync {
    async fn customer(
        &self,
        tenant: TenantId,
        id: CustomerId,
    ) -> Result<Option<Buyer>, FiscalError>;
}

/// Per-tenant Authority registration and signing certificate.
#[async_trait]
pub trait AuthorityProfiles: Send + Sync {
    async fn issuer(&self, tenant: TenantId) -> Result<Option<IssuerProfile>, FiscalError>;

    async fn certificate(&self, tenant: TenantId)
    -> Result<Option<CertificateBundle>, FiscalError>;
}

/// The Authority's two remote operations.
#[async_trait]
pub trait AuthorityGateway: Send + Sync {
    async fn submit(&self, signed_xml: &[u8]) -> Result<ReceptionResponse, SubmissionFailure>;

    async fn check_authorization(
        &self,
        access_key: &AccessKey,
    ) -> Result<AuthorizationResponse, SubmissionFailure>;
}

#[async_trait]
impl AuthorityGateway for SriClient {
    async fn submit(&self, signed_xml: &[u8]) -> Result<ReceptionResponse, SubmissionFailure> {
        SriClient::submit(self, signed_xml).await
    }

    async fn check_authorization(
        &self,
        access_key: &AccessKey,
    ) -> Result<AuthorizationResponse, SubmissionFailure> {
        SriClient::check_authorization(self, access_key).await
    }
}
