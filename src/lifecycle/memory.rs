//! In-memory adapters for every storage and directory port. Used by tests
//! and by embedders that keep state elsewhere.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::core::{
    Buyer, CertificateBundle, CustomerId, DocumentId, FiscalDocument, FiscalError,
    IssuerProfile, ProductId, TenantId,
};

use super::ledger::{ErrorLogEntry, ErrorLogId, NewErrorLogEntry};
use super::ports::{
    ArtifactStore, AuthorityProfiles, CustomerDirectory, DocumentRepository, ErrorLedger,
    Product, ProductCatalog,
};

#[derive(Debug, Default)]
pub struct InMemoryDocuments {
    rows: RwLock<HashMap<DocumentId, FiscalDocument>>,
}

impl InMemoryDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }
}

#[async_trait]
impl DocumentRepository for InMemoryDocuments {
    async fn insert(&self, mut document: FiscalDocument) -> Result<FiscalDocument, FiscalError> {
        let mut rows = self.rows.write();
        if rows.contains_key(&document.id()) {
            return Err(FiscalError::Conflict(format!(
                "document {} already exists",
                document.id()
            )));
        }
        document.set_version(1);
        rows.insert(document.id(), document.clone());
        Ok(document)
    }

    async fn get(
        &self,
        tenant: TenantId,
        id: DocumentId,
    ) -> Result<Option<FiscalDocument>, FiscalError> {
        Ok(self
            .rows
            .read()
            .get(&id)
            .filter(|d| d.tenant() == tenant)
            .cloned())
    }

    async fn update(&self, mut document: FiscalDocument) -> Result<FiscalDocument, FiscalError> {
        let mut rows = self.rows.write();
        let stored = rows
            .get(&document.id())
            .filter(|d| d.tenant() == document.tenant())
            .ok_or_else(|| FiscalError::NotFound(format!("document {}", document.id())))?;
        if stored.version() != document.version() {
            return Err(FiscalError::Conflict(format!(
                "document {} changed (version {} != {})",
                document.id(),
                stored.version(),
                document.version()
            )));
        }
        document.set_version(document.version() + 1);
        rows.insert(document.id(), document.clone());
        Ok(document)
    }
}

#[derive(Debug, Default)]
pub struct InMemoryErrorLedger {
    entries: RwLock<Vec<ErrorLogEntry>>,
}

impl InMemoryErrorLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// All entries in append order.
    pub fn all(&self) -> Vec<ErrorLogEntry> {
        self.entries.read().clone()
    }
}

#[async_trait]
impl ErrorLedger for InMemoryErrorLedger {
    async fn append(&self, entry: NewErrorLogEntry) -> Result<ErrorLogEntry, FiscalError> {
        let entry = ErrorLogEntry::record(entry, Utc::now());
        self.entries.write().push(entry.clone());
        Ok(entry)
    }

    async fn record_retry_outcome(
        &self,
        entry: ErrorLogId,
        succeeded: bool,
    ) -> Result<(), FiscalError> {
        let mut entries = self.entries.write();
        let row = entries
            .iter_mut()
            .find(|e| e.id == entry)
            .ok_or_else(|| FiscalError::NotFound(format!("error log entry {entry}")))?;
        row.retry_succeeded = Some(succeeded);
        Ok(())
    }

    async fn entries_for(&self, document: DocumentId) -> Result<Vec<ErrorLogEntry>, FiscalError> {
        Ok(self
            .entries
            .read()
            .iter()
            .filter(|e| e.document == document)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Default)]
pub struct InMemoryArtifacts {
    blobs: RwLock<HashMap<PathBuf, Vec<u8>>>,
}

impl InMemoryArtifacts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.blobs.read().contains_key(path)
    }
}

#[async_trait]
impl ArtifactStore for InMemoryArtifacts {
    async fn put(&self, path: &Path, bytes: &[u8]) -> Result<(), FiscalError> {
        self.blobs.write().insert(path.to_path_buf(), bytes.to_vec());
        Ok(())
    }

    async fn get(&self, path: &Path) -> Result<Vec<u8>, FiscalError> {
        self.blobs.read().get(path).cloned().ok_or_else(|| {
            FiscalError::Precondition(format!("artifact {} does not exist", path.display()))
        })
    }
}

/// Products, customers and Authority profiles keyed by tenant.
#[derive(Debug, Default)]
pub struct InMemoryDirectory {
    products: RwLock<HashMap<(TenantId, ProductId), Product>>,
    customers: RwLock<HashMap<(TenantId, CustomerId), Buyer>>,
    issuers: RwLock<HashMap<TenantId, IssuerProfile>>,
    certificates: RwLock<HashMap<TenantId, CertificateBundle>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_product(&self, tenant: TenantId, product: Product) {
        self.products.write().insert((tenant, product.id), product);
    }

    pub fn add_customer(&self, tenant: TenantId, buyer: Buyer) {
        self.customers
            .write()
            .insert((tenant, buyer.customer_id), buyer);
    }

    pub fn set_issuer(&self, tenant: TenantId, profile: IssuerProfile) {
        self.issuers.write().insert(tenant, profile);
    }

    pub fn set_certificate(&self, tenant: TenantId, bundle: CertificateBundle) {
        self.certificates.write().insert(tenant, bundle);
    }
}

#[async_trait]
impl ProductCatalog for InMemoryDirectory {
    async fn product(
        &self,
        tenant: TenantId,
        id: ProductId,
    ) -> Result<Option<Product>, FiscalError> {
        Ok(self.products.read().get(&(tenant, id)).cloned())
    }
}

#[async_trait]
impl CustomerDirectory for InMemoryDirectory {
    async fn customer(
        &self,
        tenant: TenantId,
        id: CustomerId,
    ) -> Result<Option<Buyer>, FiscalError> {
        Ok(self.customers.read().get(&(tenant, id)).cloned())
    }
}

#[async_trait]
impl AuthorityProfiles for InMemoryDirectory {
    async fn issuer(&self, tenant: TenantId) -> Result<Option<IssuerProfile>, FiscalError> {
        Ok(self.issuers.read().get(&tenant).cloned())
    }

    async fn certificate(
        &self,
        tenant: TenantId,
    ) -> Result<Option<CertificateBundle>, FiscalError> {
        Ok(self.certificates.read().get(&tenant).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{
        DraftBuilder, EmissionPointCode, EmissionPointId, Environment, EstablishmentCode,
        EstablishmentId, IdentificationType, LegalNumber, LineItemBuilder,
    };
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn document(tenant: TenantId) -> FiscalDocument {
        let draft = DraftBuilder::invoice(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
            .buyer(Buyer {
                customer_id: CustomerId::new(),
                identification_type: IdentificationType::FinalConsumer,
                identification: "9999999999999".into(),
                name: "CONSUMIDOR FINAL".into(),
                address: None,
                email: None,
                phone: None,
            })
            .add_item(LineItemBuilder::new("A", "Item", dec!(1), dec!(10)).build())
            .build()
            .unwrap();
        FiscalDocument::new_draft(
            tenant,
            EstablishmentId(0),
            EmissionPointId(0),
            LegalNumber::new(
                EstablishmentCode::new(1).unwrap(),
                EmissionPointCode::new(1).unwrap(),
                1,
            )
            .unwrap(),
            Environment::Test,
            draft,
        )
    }

    #[tokio::test]
    async fn stale_updates_conflict() {
        let repo = InMemoryDocuments::new();
        let tenant = TenantId::new();
        let stored = repo.insert(document(tenant)).await.unwrap();
        assert_eq!(stored.version(), 1);

        let first = repo.update(stored.clone()).await.unwrap();
        assert_eq!(first.version(), 2);
        let err = repo.update(stored).await.unwrap_err();
        assert!(matches!(err, FiscalError::Conflict(_)));
    }

    #[tokio::test]
    async fn other_tenants_cannot_see_documents() {
        let repo = InMemoryDocuments::new();
        let tenant = TenantId::new();
        let stored = repo.insert(document(tenant)).await.unwrap();
        assert!(repo.get(TenantId::new(), stored.id()).await.unwrap().is_none());
        assert!(repo.get(tenant, stored.id()).await.unwrap().is_some());
    }
}
