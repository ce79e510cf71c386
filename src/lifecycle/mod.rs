//! Document lifecycle: the commands that move an invoice or credit note from
//! `Draft` to `Authorized`, and the ports they rely on.
//!
//! ```text
//! Draft --generate_xml--> PendingSignature --sign--> PendingAuthorization
//! PendingAuthorization --submit--> PendingAuthorization
//! PendingAuthorization --check_authorization--> Authorized | Rejected | unchanged
//! Authorized --cancel--> Cancelled
//! Draft --delete--> soft-deleted
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use comprobantes::lifecycle::*;
//!
//! let service = FiscalService::new(collaborators, Arc::new(allocator));
//! let invoice = service.create_invoice(tenant, request).await?;
//! service.generate_xml(tenant, invoice.id()).await?;
//! service.sign(tenant, invoice.id()).await?;
//! service.submit(tenant, invoice.id()).await?;
//! match service.check_authorization(tenant, invoice.id()).await? {
//!     AuthorizationOutcome::Authorized { number, .. } => println!("authorized: {number}"),
//!     other => println!("{other:?}"),
//! }
//! ```

mod artifacts;
mod ledger;
pub mod memory;
mod ports;
mod service;

pub use artifacts::{ArtifactPaths, FsArtifactStore};
pub use ledger::{
    ErrorLogEntry, ErrorLogId, NewErrorLogEntry, RETRYABLE_RECEPTION_CODES, SriOperation,
};
pub use ports::{
    ArtifactStore, AuthorityGateway, AuthorityProfiles, CustomerDirectory, DocumentRepository,
    ErrorLedger, Product, ProductCatalog,
};
pub use service::{
    AuthorizationOutcome, Collaborators, CreateCreditNote, CreateInvoice, FiscalService,
    ItemRequest, SubmitOutcome,
};
