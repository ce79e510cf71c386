//! Authority XML for invoices (`factura`) and credit notes (`notaCredito`).
//!
//! ```no_run
//! use comprobantes::core::*;
//! use comprobantes::xml;
//!
//! # fn run(doc: &FiscalDocument, issuer: &IssuerProfile, ctx: &EmissionPointContext) -> Result<(), FiscalError> {
//! let built = xml::build_xml(doc, issuer, &ctx.establishment, &ctx.emission_point)?;
//! let parsed = xml::parse_xml(&built.xml)?;
//! assert_eq!(parsed.access_key, built.access_key);
//! # Ok(())
//! # }
//! ```

mod build;
mod parse;
pub(crate) mod writer;

pub use build::{BuiltXml, build_xml};
pub use parse::{ModifiedDocument, ParsedDocument, ParsedLine, ParsedTax, parse_xml};
pub use writer::{format_money, format_quantity, sanitize_text};

/// Value of the root `id` attribute; the signature references `#comprobante`.
pub const ROOT_ID: &str = "comprobante";

/// Schema version of `factura` (allows 6 decimals in quantities and prices).
pub const INVOICE_VERSION: &str = "1.1.0";

/// Schema version of `notaCredito`.
pub const CREDIT_NOTE_VERSION: &str = "1.1.0";

/// Date format of `fechaEmision` and related elements.
pub const DATE_FORMAT: &str = "%d/%m/%Y";
