//! XAdES-BES enveloped signatures (RSA-SHA1, inclusive C14N) as accepted by
//! the Authority.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, FixedOffset, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;
use rsa::pkcs1v15::SigningKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::traits::PublicKeyParts;
use sha1::{Digest, Sha1};
use uuid::Uuid;

use crate::core::FiscalError;
use crate::xml::ROOT_ID;
use crate::xml::writer::XmlWriter;

use super::c14n::{Apex, canonicalize};
use super::certificate::SigningCredentials;

pub const DSIG_NS: &str = "http://www.w3.org/2000/09/xmldsig#";
pub const XADES_NS: &str = "http://uri.etsi.org/01903/v1.3.2#";
pub const C14N_ALGORITHM: &str = "http://www.w3.org/TR/2001/REC-xml-c14n-20010315";
pub const RSA_SHA1_ALGORITHM: &str = "http://www.w3.org/2000/09/xmldsig#rsa-sha1";
pub const SHA1_ALGORITHM: &str = "http://www.w3.org/2000/09/xmldsig#sha1";
pub const ENVELOPED_ALGORITHM: &str = "http://www.w3.org/2000/09/xmldsig#enveloped-signature";
const SIGNED_PROPERTIES_TYPE: &str = "http://uri.etsi.org/01903#SignedProperties";

/// Qualified name of the signature element.
pub const SIGNATURE_ELEMENT: &str = "ds:Signature";

/// Ecuador mainland offset used for `SigningTime`.
const SIGNING_TIME_OFFSET_SECS: i32 = -5 * 3600;

/// Base64 SHA-1 digest.
pub(crate) fn sha1_base64(data: &[u8]) -> String {
    STANDARD.encode(Sha1::digest(data))
}

struct SignatureIds {
    signature: String,
    signed_info: String,
    signed_properties: String,
    signed_properties_ref: String,
    certificate: String,
    document_ref: String,
    signature_value: String,
    object: String,
}

impl SignatureIds {
    fn new(n: u32) -> Self {
        let signature = format!("Signature{n}");
        Self {
            signed_info: format!("Signature-SignedInfo{n}"),
            signed_properties: format!("{signature}-SignedProperties{n}"),
            signed_properties_ref: format!("SignedPropertiesID{n}"),
            certificate: format!("Certificate{n}"),
            document_ref: format!("Reference-ID-{n}"),
            signature_value: format!("SignatureValue{n}"),
            object: format!("{signature}-Object{n}"),
            signature,
        }
    }
}

#[derive(Default)]
struct Digests {
    signed_properties: String,
    key_info: String,
    document: String,
}

struct Template<'a> {
    ids: SignatureIds,
    creds: &'a SigningCredentials,
    signing_time: String,
    certificate_b64: String,
    certificate_digest: String,
    modulus: String,
    exponent: String,
}

impl Template<'_> {
    fn render(&self, digests: &Digests, signature_value: &str) -> Result<String, FiscalError> {
        let ids = &self.ids;
        let digest_method = [("Algorithm", SHA1_ALGORITHM)];
        let mut w = XmlWriter::fragment();

        w.start_element_with_attrs(
            "ds:Signature",
            &[
                ("xmlns:ds", DSIG_NS),
                ("xmlns:etsi", XADES_NS),
                ("Id", ids.signature.as_str()),
            ],
        )?;

        w.start_element_with_attrs("ds:SignedInfo", &[("Id", ids.signed_info.as_str())])?;
        w.empty_element_with_attrs("ds:CanonicalizationMethod", &[("Algorithm", C14N_ALGORITHM)])?;
        w.empty_element_with_attrs("ds:SignatureMethod", &[("Algorithm", RSA_SHA1_ALGORITHM)])?;

        let props_uri = format!("#{}", ids.signed_properties);
        w.start_element_with_attrs(
            "ds:Reference",
            &[
                ("Id", ids.signed_properties_ref.as_str()),
                ("Type", SIGNED_PROPERTIES_TYPE),
                ("URI", props_uri.as_str()),
            ],
        )?;
        w.empty_element_with_attrs("ds:DigestMethod", &digest_method)?;
        w.text_element("ds:DigestValue", &digests.signed_properties)?;
        w.end_element("ds:Reference")?;

        let cert_uri = format!("#{}", ids.certificate);
        w.start_element_with_attrs("ds:Reference", &[("URI", cert_uri.as_str())])?;
        w.empty_element_with_attrs("ds:DigestMethod", &digest_method)?;
        w.text_element("ds:DigestValue", &digests.key_info)?;
        w.end_element("ds:Reference")?;

        let doc_uri = format!("#{ROOT_ID}");
        w.start_element_with_attrs(
            "ds:Reference",
            &[("Id", ids.document_ref.as_str()), ("URI", doc_uri.as_str())],
        )?;
        w.start_element("ds:Transforms")?;
        w.empty_element_with_attrs("ds:Transform", &[("Algorithm", ENVELOPED_ALGORITHM)])?;
        w.end_element("ds:Transforms")?;
        w.empty_element_with_attrs("ds:DigestMethod", &digest_method)?;
        w.text_element("ds:DigestValue", &digests.document)?;
        w.end_element("ds:Reference")?;
        w.end_element("ds:SignedInfo")?;

        w.text_element_with_attrs(
            "ds:SignatureValue",
            signature_value,
            &[("Id", ids.signature_value.as_str())],
        )?;

        w.start_element_with_attrs("ds:KeyInfo", &[("Id", ids.certificate.as_str())])?;
        w.start_element("ds:X509Data")?;
        w.text_element("ds:X509Certificate", &self.certificate_b64)?;
        w.end_element("ds:X509Data")?;
        w.start_element("ds:KeyValue")?;
        w.start_element("ds:RSAKeyValue")?;
        w.text_element("ds:Modulus", &self.modulus)?;
        w.text_element("ds:Exponent", &self.exponent)?;
        w.end_element("ds:RSAKeyValue")?;
        w.end_element("ds:KeyValue")?;
        w.end_element("ds:KeyInfo")?;

        let target = format!("#{}", ids.signature);
        let object_ref = format!("#{}", ids.document_ref);
        w.start_element_with_attrs("ds:Object", &[("Id", ids.object.as_str())])?;
        w.start_element_with_attrs("etsi:QualifyingProperties", &[("Target", target.as_str())])?;
        w.start_element_with_attrs(
            "etsi:SignedProperties",
            &[("Id", ids.signed_properties.as_str())],
        )?;
        w.start_element("etsi:SignedSignatureProperties")?;
        w.text_element("etsi:SigningTime", &self.signing_time)?;
        w.start_element("etsi:SigningCertificate")?;
        w.start_element("etsi:Cert")?;
        w.start_element("etsi:CertDigest")?;
        w.empty_element_with_attrs("ds:DigestMethod", &digest_method)?;
        w.text_element("ds:DigestValue", &self.certificate_digest)?;
        w.end_element("etsi:CertDigest")?;
        w.start_element("etsi:IssuerSerial")?;
        w.text_element("ds:X509IssuerName", self.creds.issuer_name())?;
        w.text_element("ds:X509SerialNumber", self.creds.serial_number())?;
        w.end_element("etsi:IssuerSerial")?;
        w.end_element("etsi:Cert")?;
        w.end_element("etsi:SigningCertificate")?;
        w.end_element("etsi:SignedSignatureProperties")?;
        w.start_element("etsi:SignedDataObjectProperties")?;
        w.start_element_with_attrs(
            "etsi:DataObjectFormat",
            &[("ObjectReference", object_ref.as_str())],
        )?;
        w.text_element("etsi:Description", "contenido comprobante")?;
        w.text_element("etsi:MimeType", "text/xml")?;
        w.end_element("etsi:DataObjectFormat")?;
        w.end_element("etsi:SignedDataObjectProperties")?;
        w.end_element("etsi:SignedProperties")?;
        w.end_element("etsi:QualifyingProperties")?;
        w.end_element("ds:Object")?;

        w.end_element("ds:Signature")?;
        w.into_string()
    }
}

/// Byte offset of the root element's closing tag, where the enveloped
/// signature is inserted.
fn root_close_offset(xml: &str) -> Result<usize, FiscalError> {
    let mut reader = Reader::from_str(xml);
    let mut depth = 0usize;
    loop {
        let before = usize::try_from(reader.buffer_position())
            .map_err(|_| FiscalError::Xml("document too large".into()))?;
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                if depth == 0 && e.name().as_ref() == SIGNATURE_ELEMENT.as_bytes() {
                    return Err(FiscalError::Signature("document root is a signature".into()));
                }
                if depth == 1 && e.name().as_ref() == SIGNATURE_ELEMENT.as_bytes() {
                    return Err(FiscalError::Signature("document is already signed".into()));
                }
                depth += 1;
            }
            Ok(Event::End(_)) => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Ok(before);
                }
            }
            Ok(Event::Eof) => return Err(FiscalError::Xml("document has no root element".into())),
            Err(e) => return Err(FiscalError::Xml(format!("XML parse error: {e}"))),
            _ => {}
        }
    }
}

fn assemble(xml: &str, offset: usize, signature: &str) -> String {
    let mut out = String::with_capacity(xml.len() + signature.len());
    out.push_str(&xml[..offset]);
    out.push_str(signature);
    out.push_str(&xml[offset..]);
    out
}

/// Sign `xml` with an enveloped XAdES-BES signature over the root element
/// (`id="comprobante"`), appended as the root's last child.
pub fn sign_xml(
    xml: &str,
    creds: &SigningCredentials,
    signing_time: DateTime<Utc>,
) -> Result<String, FiscalError> {
    let offset = root_close_offset(xml)?;
    let canonical_doc = canonicalize(xml, Apex::Id(ROOT_ID), None)?;

    let tz = FixedOffset::east_opt(SIGNING_TIME_OFFSET_SECS)
        .ok_or_else(|| FiscalError::Signature("invalid signing time offset".into()))?;
    let n = (Uuid::new_v4().as_u128() % 1_000_000) as u32;
    let public_key = creds.public_key();
    let template = Template {
        ids: SignatureIds::new(n),
        creds,
        signing_time: signing_time
            .with_timezone(&tz)
            .format("%Y-%m-%dT%H:%M:%S%:z")
            .to_string(),
        certificate_b64: STANDARD.encode(creds.certificate_der()),
        certificate_digest: sha1_base64(creds.certificate_der()),
        modulus: STANDARD.encode(public_key.n().to_bytes_be()),
        exponent: STANDARD.encode(public_key.e().to_bytes_be()),
    };

    let mut digests = Digests {
        document: sha1_base64(canonical_doc.as_bytes()),
        ..Digests::default()
    };

    // Signed properties and key info do not depend on the SignedInfo
    // digests, so one pass with placeholders is enough to digest them.
    let draft = assemble(xml, offset, &template.render(&digests, "")?);
    digests.signed_properties = sha1_base64(
        canonicalize(&draft, Apex::Id(&template.ids.signed_properties), None)?.as_bytes(),
    );
    digests.key_info =
        sha1_base64(canonicalize(&draft, Apex::Id(&template.ids.certificate), None)?.as_bytes());

    let with_digests = assemble(xml, offset, &template.render(&digests, "")?);
    let signed_info = canonicalize(&with_digests, Apex::Id(&template.ids.signed_info), None)?;
    let signing_key = SigningKey::<Sha1>::new(creds.private_key().clone());
    let signature = signing_key
        .try_sign(signed_info.as_bytes())
        .map_err(|e| FiscalError::Signature(format!("RSA signing failed: {e}")))?;
    let signature_value = STANDARD.encode(signature.to_bytes());

    Ok(assemble(
        xml,
        offset,
        &template.render(&digests, &signature_value)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_offset_points_at_root_end_tag() {
        let xml = "<?xml version=\"1.0\"?>\n<factura id=\"comprobante\"><a></a>\n</factura>\n";
        let offset = root_close_offset(xml).unwrap();
        assert!(xml[offset..].starts_with("</factura>"));
    }

    #[test]
    fn already_signed_documents_are_rejected() {
        let xml = "<factura id=\"comprobante\"><ds:Signature xmlns:ds=\"urn:x\"></ds:Signature></factura>";
        assert!(matches!(
            root_close_offset(xml),
            Err(FiscalError::Signature(_))
        ));
    }

    #[test]
    fn digest_is_base64_sha1() {
        assert_eq!(sha1_base64(b"abc"), "qZk+NkcGgWq6PiVxeFDCbJzQ2J0=");
    }
}
