#![cfg(feature = "signing")]

use std::path::PathBuf;

use chrono::{Duration, Utc};
use comprobantes::core::FiscalError;
use comprobantes::signing::{
    SigningCredentials, is_valid_signature, sign_file, sign_xml, signed_path_for,
    validate_signature_file, verify_xml,
};

const PASSWORD: &str = "fixture-pass";

fn fixture(name: &str) -> Vec<u8> {
    let path: PathBuf = [env!("CARGO_MANIFEST_DIR"), "tests", "fixtures", name]
        .iter()
        .collect();
    std::fs::read(path).unwrap()
}

fn credentials() -> SigningCredentials {
    SigningCredentials::from_pkcs12(&fixture("signer.p12"), PASSWORD).unwrap()
}

const INVOICE: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<factura id="comprobante" version="1.1.0">
  <infoTributaria>
    <ambiente>1</ambiente>
    <razonSocial>Distribuidora del Pacifico S.A.</razonSocial>
    <ruc>0912345678001</ruc>
  </infoTributaria>
  <infoFactura>
    <fechaEmision>01/03/2024</fechaEmision>
    <razonSocialComprador>Lopez &amp; Hijos</razonSocialComprador>
    <importeTotal>230.00</importeTotal>
  </infoFactura>
  <infoAdicional>
    <campoAdicional nombre="Email">mf@example.ec</campoAdicional>
  </infoAdicional>
</factura>
"#;

#[test]
fn signed_document_verifies() {
    let creds = credentials();
    let signed = sign_xml(INVOICE, &creds, Utc::now()).unwrap();

    assert!(signed.contains("<ds:Signature"));
    assert!(signed.contains("<etsi:SigningTime>"));
    assert!(signed.contains("<ds:X509Certificate>"));
    assert!(signed.find("</ds:Signature>").unwrap() < signed.rfind("</factura>").unwrap());

    verify_xml(&signed).unwrap();
    assert!(is_valid_signature(&signed));
}

#[test]
fn tampering_breaks_the_signature() {
    let signed = sign_xml(INVOICE, &credentials(), Utc::now()).unwrap();

    let amount = signed.replace(
        "<importeTotal>230.00</importeTotal>",
        "<importeTotal>23.00</importeTotal>",
    );
    assert!(matches!(verify_xml(&amount), Err(FiscalError::Signature(_))));

    let start = signed.find("<ds:SignatureValue").unwrap();
    let value_start = start + signed[start..].find('>').unwrap() + 1;
    let mut bytes = signed.clone().into_bytes();
    bytes[value_start] = if bytes[value_start] == b'A' { b'B' } else { b'A' };
    let forged = String::from_utf8(bytes).unwrap();
    assert!(!is_valid_signature(&forged));
}

#[test]
fn unsigned_and_double_signed_documents() {
    assert!(!is_valid_signature(INVOICE));

    let creds = credentials();
    let signed = sign_xml(INVOICE, &creds, Utc::now()).unwrap();
    assert!(matches!(
        sign_xml(&signed, &creds, Utc::now()),
        Err(FiscalError::Signature(_))
    ));
}

#[test]
fn root_without_comprobante_id_cannot_be_signed() {
    let xml = "<factura version=\"1.1.0\"><a>1</a></factura>";
    assert!(sign_xml(xml, &credentials(), Utc::now()).is_err());
}

#[test]
fn bundle_errors_are_certificate_errors() {
    let bytes = fixture("signer.p12");
    assert!(matches!(
        SigningCredentials::from_pkcs12(&bytes, "wrong"),
        Err(FiscalError::Certificate(_))
    ));
    assert!(matches!(
        SigningCredentials::from_pkcs12(&fixture("cert-only.p12"), PASSWORD),
        Err(FiscalError::Certificate(_))
    ));
    assert!(matches!(
        SigningCredentials::from_pkcs12(b"not a bundle", PASSWORD),
        Err(FiscalError::Certificate(_))
    ));
}

#[test]
fn certificate_metadata_and_expiry() {
    let creds = credentials();
    assert!(!creds.subject().is_empty());
    assert!(!creds.issuer_name().is_empty());
    assert!(creds.serial_number().bytes().all(|b| b.is_ascii_digit()));

    assert!(creds.ensure_valid_at(Utc::now()).is_ok());
    let after = creds.not_after() + Duration::seconds(1);
    assert!(matches!(
        creds.ensure_valid_at(after),
        Err(FiscalError::CertificateExpired(at)) if at == creds.not_after()
    ));
}

#[test]
fn file_signing_writes_a_signed_sibling() {
    let dir = tempfile::tempdir().unwrap();
    let xml_path = dir.path().join("0103202401.xml");
    std::fs::write(&xml_path, INVOICE).unwrap();

    let signed = sign_file(&xml_path, &fixture("signer.p12"), PASSWORD).unwrap();
    assert_eq!(signed, signed_path_for(&xml_path));
    assert_eq!(signed.file_name().unwrap(), "0103202401-signed.xml");
    assert!(validate_signature_file(&signed));

    // The unsigned original and a missing file are both invalid.
    assert!(!validate_signature_file(&xml_path));
    assert!(!validate_signature_file(&dir.path().join("missing.xml")));
}

#[test]
fn file_signing_reports_missing_input() {
    let dir = tempfile::tempdir().unwrap();
    let err = sign_file(
        &dir.path().join("nope.xml"),
        &fixture("signer.p12"),
        PASSWORD,
    )
    .unwrap_err();
    assert!(matches!(err, FiscalError::Storage(_)));
}
