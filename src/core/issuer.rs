use std::fmt;

use serde::{Deserialize, Serialize};

use super::codes::{Environment, validate_ruc};
use super::error::{FiscalError, ValidationError, into_validation_error};

/// A tenant's registration with the Authority, printed in `infoTributaria`
/// and `infoFactura`/`infoNotaCredito`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuerProfile {
    pub ruc: String,
    /// `razonSocial`.
    pub legal_name: String,
    /// `nombreComercial`.
    pub trade_name: Option<String>,
    /// `dirMatriz`.
    pub head_office_address: String,
    /// Special-taxpayer resolution number (`contribuyenteEspecial`).
    pub special_taxpayer: Option<String>,
    /// `obligadoContabilidad`.
    pub keeps_accounting: bool,
    /// RIMPE regime legend (`contribuyenteRimpe`).
    pub rimpe_regime: Option<String>,
    pub environment: Environment,
}

impl IssuerProfile {
    pub fn new(
        ruc: impl Into<String>,
        legal_name: impl Into<String>,
        head_office_address: impl Into<String>,
        environment: Environment,
    ) -> Self {
        Self {
            ruc: ruc.into(),
            legal_name: legal_name.into(),
            trade_name: None,
            head_office_address: head_office_address.into(),
            special_taxpayer: None,
            keeps_accounting: false,
            rimpe_regime: None,
            environment,
        }
    }

    pub fn trade_name(mut self, name: impl Into<String>) -> Self {
        self.trade_name = Some(name.into());
        self
    }

    pub fn special_taxpayer(mut self, resolution: impl Into<String>) -> Self {
        self.special_taxpayer = Some(resolution.into());
        self
    }

    pub fn keeps_accounting(mut self, keeps: bool) -> Self {
        self.keeps_accounting = keeps;
        self
    }

    pub fn rimpe_regime(mut self, legend: impl Into<String>) -> Self {
        self.rimpe_regime = Some(legend.into());
        self
    }

    /// Check the fields the Authority requires on every document.
    pub fn validate(&self) -> Result<(), FiscalError> {
        let mut errors = Vec::new();
        if let Err(e) = validate_ruc(&self.ruc) {
            errors.push(ValidationError::new("issuer.ruc", e.to_string()));
        }
        if self.legal_name.trim().is_empty() {
            errors.push(ValidationError::new("issuer.legal_name", "must not be empty"));
        }
        if self.head_office_address.trim().is_empty() {
            errors.push(ValidationError::new(
                "issuer.head_office_address",
                "must not be empty",
            ));
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(into_validation_error(&errors))
        }
    }
}

/// A password-protected PKCS#12 bundle holding the signing key and certificate.
#[derive(Clone)]
pub struct CertificateBundle {
    pub bytes: Vec<u8>,
    pub password: String,
}

impl fmt::Debug for CertificateBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CertificateBundle")
            .field("bytes", &format_args!("{} bytes", self.bytes.len()))
            .field("password", &"***")
            .finish()
    }
}
