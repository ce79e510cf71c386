use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use quick_xml::Reader;
use quick_xml::events::Event;
use rsa::pkcs1v15::{Signature, VerifyingKey};
use rsa::signature::Verifier;
use sha1::Sha1;

use crate::core::FiscalError;
use crate::xml::ROOT_ID;

use super::c14n::{Apex, canonicalize};
use super::certificate::public_key_from_der;
use super::xades::{
    C14N_ALGORITHM, ENVELOPED_ALGORITHM, RSA_SHA1_ALGORITHM, SHA1_ALGORITHM, SIGNATURE_ELEMENT,
    sha1_base64,
};

#[derive(Debug, Default)]
struct ParsedReference {
    uri: String,
    enveloped: bool,
    digest_method: String,
    digest_value: String,
}

#[derive(Debug, Default)]
struct ParsedSignature {
    canonicalization: String,
    signature_method: String,
    references: Vec<ParsedReference>,
    signature_value: String,
    certificate: String,
}

fn attr(e: &quick_xml::events::BytesStart<'_>, name: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.as_ref() == name)
        .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
}

fn parse_signature(xml: &str) -> Result<ParsedSignature, FiscalError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    reader.config_mut().expand_empty_elements = true;

    let mut sig = ParsedSignature::default();
    let mut path: Vec<String> = Vec::new();
    let mut seen = false;

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                let in_signed_info = path.iter().any(|p| p == "ds:SignedInfo");
                match name.as_str() {
                    SIGNATURE_ELEMENT if !seen => seen = true,
                    "ds:CanonicalizationMethod" if in_signed_info => {
                        sig.canonicalization = attr(e, b"Algorithm").unwrap_or_default();
                    }
                    "ds:SignatureMethod" if in_signed_info => {
                        sig.signature_method = attr(e, b"Algorithm").unwrap_or_default();
                    }
                    "ds:Reference" if in_signed_info => {
                        sig.references.push(ParsedReference {
                            uri: attr(e, b"URI").unwrap_or_default(),
                            ..ParsedReference::default()
                        });
                    }
                    "ds:Transform" if in_signed_info => {
                        if let Some(r) = sig.references.last_mut() {
                            if attr(e, b"Algorithm").as_deref() == Some(ENVELOPED_ALGORITHM) {
                                r.enveloped = true;
                            }
                        }
                    }
                    "ds:DigestMethod" if in_signed_info => {
                        if let Some(r) = sig.references.last_mut() {
                            r.digest_method = attr(e, b"Algorithm").unwrap_or_default();
                        }
                    }
                    _ => {}
                }
                path.push(name);
            }
            Ok(Event::Text(ref e)) => {
                let leaf = path.last().map(String::as_str).unwrap_or("");
                let in_signed_info = path.iter().any(|p| p == "ds:SignedInfo");
                let text = e
                    .unescape()
                    .map_err(|e| FiscalError::Xml(format!("XML parse error: {e}")))?;
                match leaf {
                    "ds:DigestValue" if in_signed_info => {
                        if let Some(r) = sig.references.last_mut() {
                            r.digest_value = text.into_owned();
                        }
                    }
                    "ds:SignatureValue" => sig.signature_value = text.into_owned(),
                    "ds:X509Certificate" if sig.certificate.is_empty() => {
                        sig.certificate = text.into_owned();
                    }
                    _ => {}
                }
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(FiscalError::Xml(format!("XML parse error: {e}"))),
            _ => {}
        }
    }

    if !seen {
        return Err(FiscalError::Signature("document is not signed".into()));
    }
    Ok(sig)
}

fn decode_base64(value: &str, what: &str) -> Result<Vec<u8>, FiscalError> {
    let compact: String = value.chars().filter(|c| !c.is_whitespace()).collect();
    STANDARD
        .decode(compact)
        .map_err(|e| FiscalError::Signature(format!("invalid base64 in {what}: {e}")))
}

/// Verify the enveloped signature of a signed document: every reference
/// digest and the RSA-SHA1 signature over the canonical `SignedInfo`, using
/// the embedded certificate.
pub fn verify_xml(xml: &str) -> Result<(), FiscalError> {
    let sig = parse_signature(xml)?;

    if sig.canonicalization != C14N_ALGORITHM {
        return Err(FiscalError::Signature(format!(
            "unsupported canonicalization {:?}",
            sig.canonicalization
        )));
    }
    if sig.signature_method != RSA_SHA1_ALGORITHM {
        return Err(FiscalError::Signature(format!(
            "unsupported signature method {:?}",
            sig.signature_method
        )));
    }
    if sig.references.is_empty() {
        return Err(FiscalError::Signature("signature has no references".into()));
    }
    let root_uri = format!("#{ROOT_ID}");
    let root_references = sig
        .references
        .iter()
        .filter(|r| r.uri == root_uri && r.enveloped)
        .count();
    if root_references != 1 {
        return Err(FiscalError::Signature(format!(
            "signature must carry exactly one enveloped reference to {root_uri:?}, found {root_references}"
        )));
    }

    for reference in &sig.references {
        if reference.digest_method != SHA1_ALGORITHM {
            return Err(FiscalError::Signature(format!(
                "unsupported digest method {:?}",
                reference.digest_method
            )));
        }
        let id = reference.uri.strip_prefix('#').ok_or_else(|| {
            FiscalError::Signature(format!("unsupported reference URI {:?}", reference.uri))
        })?;
        let exclude = reference.enveloped.then_some(SIGNATURE_ELEMENT);
        let canonical = canonicalize(xml, Apex::Id(id), exclude)?;
        if sha1_base64(canonical.as_bytes()) != reference.digest_value.trim() {
            return Err(FiscalError::Signature(format!(
                "digest mismatch for reference {:?}",
                reference.uri
            )));
        }
    }

    let cert_der = decode_base64(&sig.certificate, "X509Certificate")?;
    let public_key = public_key_from_der(&cert_der)?;
    let signature_bytes = decode_base64(&sig.signature_value, "SignatureValue")?;
    let signature = Signature::try_from(signature_bytes.as_slice())
        .map_err(|e| FiscalError::Signature(format!("malformed signature value: {e}")))?;

    let signed_info = canonicalize(xml, Apex::Element("ds:SignedInfo"), None)?;
    VerifyingKey::<Sha1>::new(public_key)
        .verify(signed_info.as_bytes(), &signature)
        .map_err(|_| FiscalError::Signature("signature value does not verify".into()))
}

/// `true` when [`verify_xml`] succeeds.
pub fn is_valid_signature(xml: &str) -> bool {
    verify_xml(xml).is_ok()
}
