//! # comprobantes
//!
//! Electronic fiscal document engine for Ecuador's SRI: legal numbering,
//! access keys, schema-exact XML, XAdES-BES signing, SOAP submission and
//! authorization, and the document lifecycle that gates them.
//!
//! All monetary values use [`rust_decimal::Decimal`] and are rounded half to
//! even at every aggregation step.
//!
//! ## Quick Start
//!
//! ```rust
//! use chrono::NaiveDate;
//! use comprobantes::core::*;
//!
//! let key = AccessKey::generate(&AccessKeyFields::new(
//!     NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
//!     DocumentType::Invoice,
//!     "0912345678001",
//!     Environment::Test,
//!     EstablishmentCode::new(1).unwrap(),
//!     EmissionPointCode::new(1).unwrap(),
//!     42,
//! ))
//! .unwrap();
//!
//! assert_eq!(key.as_str().len(), 49);
//! assert!(AccessKey::validate(key.as_str()));
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Description |
//! |---------|-------------|
//! | `core` | Value types, access key codec, tax arithmetic, sequence allocator |
//! | `xml` | Invoice / credit note XML generation and parsing |
//! | `signing` | PKCS#12 loading, XAdES-BES enveloped signatures |
//! | `sri` | SOAP reception and authorization client |
//! | `lifecycle` (default) | Document state machine, ports, artifact store, error ledger |
//! | `all` | Everything |

#[cfg(feature = "core")]
pub mod core;

#[cfg(feature = "xml")]
pub mod xml;

#[cfg(feature = "signing")]
pub mod signing;

#[cfg(feature = "sri")]
pub mod sri;

#[cfg(feature = "lifecycle")]
pub mod lifecycle;

// Re-export core types at crate root for convenience
#[cfg(feature = "core")]
pub use crate::core::*;
