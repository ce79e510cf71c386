use std::fmt;

use chrono::{DateTime, Utc};
use p12_keystore::KeyStore;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey};
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use x509_cert::Certificate;
use x509_cert::der::{Decode, Encode};

use crate::core::{CertificateBundle, FiscalError};

/// Private key and certificate loaded from a PKCS#12 bundle.
#[derive(Clone)]
pub struct SigningCredentials {
    key: RsaPrivateKey,
    public_key: RsaPublicKey,
    certificate_der: Vec<u8>,
    subject: String,
    issuer_name: String,
    serial_number: String,
    not_after: DateTime<Utc>,
}

impl SigningCredentials {
    /// Open a password-protected PKCS#12 bundle and extract the first
    /// private key together with its end-entity certificate.
    pub fn from_pkcs12(bytes: &[u8], password: &str) -> Result<Self, FiscalError> {
        let store = KeyStore::from_pkcs12(bytes, password)
            .map_err(|e| FiscalError::Certificate(format!("cannot open PKCS#12 bundle: {e}")))?;
        let (alias, chain) = store.private_key_chain().ok_or_else(|| {
            FiscalError::Certificate("bundle does not contain a private key".into())
        })?;
        let cert = chain.chain().first().ok_or_else(|| {
            FiscalError::Certificate(format!("private key {alias:?} has no certificate"))
        })?;

        let key = RsaPrivateKey::from_pkcs8_der(chain.key())
            .map_err(|e| FiscalError::Certificate(format!("unsupported private key: {e}")))?;

        let certificate_der = cert.as_der().to_vec();
        let parsed = Certificate::from_der(&certificate_der)
            .map_err(|e| FiscalError::Certificate(format!("invalid certificate: {e}")))?;
        let tbs = &parsed.tbs_certificate;

        let spki = tbs
            .subject_public_key_info
            .to_der()
            .map_err(|e| FiscalError::Certificate(format!("invalid public key: {e}")))?;
        let public_key = RsaPublicKey::from_public_key_der(&spki)
            .map_err(|e| FiscalError::Certificate(format!("certificate key is not RSA: {e}")))?;
        if RsaPublicKey::from(&key) != public_key {
            return Err(FiscalError::Certificate(
                "private key does not match certificate".into(),
            ));
        }

        let not_after_secs = i64::try_from(tbs.validity.not_after.to_unix_duration().as_secs())
            .map_err(|_| FiscalError::Certificate("certificate expiry out of range".into()))?;
        let not_after = DateTime::from_timestamp(not_after_secs, 0)
            .ok_or_else(|| FiscalError::Certificate("certificate expiry out of range".into()))?;

        Ok(Self {
            key,
            public_key,
            subject: tbs.subject.to_string(),
            issuer_name: tbs.issuer.to_string(),
            serial_number: BigUint::from_bytes_be(tbs.serial_number.as_bytes()).to_string(),
            not_after,
            certificate_der,
        })
    }

    pub fn from_bundle(bundle: &CertificateBundle) -> Result<Self, FiscalError> {
        Self::from_pkcs12(&bundle.bytes, &bundle.password)
    }

    /// Fail with [`FiscalError::CertificateExpired`] unless `now < not_after`.
    pub fn ensure_valid_at(&self, now: DateTime<Utc>) -> Result<(), FiscalError> {
        if now < self.not_after {
            Ok(())
        } else {
            Err(FiscalError::CertificateExpired(self.not_after))
        }
    }

    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Issuer distinguished name (RFC 4514), as written in `X509IssuerName`.
    pub fn issuer_name(&self) -> &str {
        &self.issuer_name
    }

    /// Serial number in decimal, as written in `X509SerialNumber`.
    pub fn serial_number(&self) -> &str {
        &self.serial_number
    }

    pub fn certificate_der(&self) -> &[u8] {
        &self.certificate_der
    }

    pub fn public_key(&self) -> &RsaPublicKey {
        &self.public_key
    }

    pub(crate) fn private_key(&self) -> &RsaPrivateKey {
        &self.key
    }
}

impl fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("subject", &self.subject)
            .field("issuer_name", &self.issuer_name)
            .field("serial_number", &self.serial_number)
            .field("not_after", &self.not_after)
            .finish_non_exhaustive()
    }
}

/// Parse the public key of a DER certificate.
pub(crate) fn public_key_from_der(der: &[u8]) -> Result<RsaPublicKey, FiscalError> {
    let cert = Certificate::from_der(der)
        .map_err(|e| FiscalError::Signature(format!("invalid embedded certificate: {e}")))?;
    let spki = cert
        .tbs_certificate
        .subject_public_key_info
        .to_der()
        .map_err(|e| FiscalError::Signature(format!("invalid embedded public key: {e}")))?;
    RsaPublicKey::from_public_key_der(&spki)
        .map_err(|e| FiscalError::Signature(format!("embedded key is not RSA: {e}")))
}
