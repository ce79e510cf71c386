//! Core fiscal document types, access key codec, tax arithmetic and
//! sequential numbering.
//!
//! Everything here is pure and synchronous; I/O lives in the `xml`,
//! `signing`, `sri` and `lifecycle` modules.

mod access_key;
mod builder;
pub mod codes;
mod document;
mod error;
mod establishment;
mod issuer;
mod sequence;
mod tax;

pub use access_key::*;
pub use builder::*;
pub use codes::{
    DocumentType, EmissionType, Environment, IdentificationType, PaymentMethod, TaxRate,
    validate_ruc,
};
pub use document::*;
pub use error::*;
pub use establishment::*;
pub use issuer::*;
pub use sequence::*;
pub use tax::*;
