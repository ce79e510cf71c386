//! XAdES-BES enveloped signatures for Authority documents.
//!
//! Credentials come from a password-protected PKCS#12 bundle. The signature
//! covers the root element (`#comprobante`), the signed properties and the
//! key info, all canonicalized with inclusive C14N 1.0.
//!
//! ```no_run
//! use comprobantes::signing;
//!
//! let bundle = std::fs::read("firma.p12").unwrap();
//! let signed = signing::sign_file("factura.xml".as_ref(), &bundle, "secret").unwrap();
//! assert!(signing::validate_signature_file(&signed));
//! ```

mod c14n;
mod certificate;
mod verify;
mod xades;

use std::fs;
use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::core::FiscalError;

pub use c14n::{Apex, canonicalize};
pub use certificate::SigningCredentials;
pub use verify::{is_valid_signature, verify_xml};
pub use xades::{
    C14N_ALGORITHM, DSIG_NS, ENVELOPED_ALGORITHM, RSA_SHA1_ALGORITHM, SHA1_ALGORITHM,
    SIGNATURE_ELEMENT, XADES_NS, sign_xml,
};

/// Sibling path of a signed file: `factura.xml` becomes `factura-signed.xml`.
pub fn signed_path_for(xml_path: &Path) -> PathBuf {
    let stem = xml_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match xml_path.extension() {
        Some(ext) => format!("{stem}-signed.{}", ext.to_string_lossy()),
        None => format!("{stem}-signed"),
    };
    xml_path.with_file_name(name)
}

/// Sign the XML file at `xml_path` with the PKCS#12 bundle and write the
/// result next to it (see [`signed_path_for`]).
///
/// Certificate expiry is not checked here; callers decide whether an expired
/// certificate may still be used.
pub fn sign_file(
    xml_path: &Path,
    certificate_bytes: &[u8],
    certificate_password: &str,
) -> Result<PathBuf, FiscalError> {
    let creds = SigningCredentials::from_pkcs12(certificate_bytes, certificate_password)?;
    let xml = fs::read_to_string(xml_path)
        .map_err(|e| FiscalError::Storage(format!("cannot read {}: {e}", xml_path.display())))?;

    let signed = sign_xml(&xml, &creds, Utc::now())?;

    let target = signed_path_for(xml_path);
    fs::write(&target, signed)
        .map_err(|e| FiscalError::Storage(format!("cannot write {}: {e}", target.display())))?;
    tracing::debug!(path = %target.display(), "signed XML written");
    Ok(target)
}

/// Re-verify the signature embedded in a signed file. Unreadable files and
/// unsigned documents are reported as invalid.
pub fn validate_signature_file(signed_xml_path: &Path) -> bool {
    match fs::read_to_string(signed_xml_path) {
        Ok(xml) => match verify_xml(&xml) {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(path = %signed_xml_path.display(), error = %e, "signature rejected");
                false
            }
        },
        Err(e) => {
            tracing::warn!(path = %signed_xml_path.display(), error = %e, "cannot read signed XML");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_sibling_path() {
        assert_eq!(
            signed_path_for(Path::new("/a/b/0103.xml")),
            PathBuf::from("/a/b/0103-signed.xml")
        );
        assert_eq!(signed_path_for(Path::new("doc")), PathBuf::from("doc-signed"));
    }
}
