use std::fmt;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use super::codes::{DocumentType, EmissionType, Environment, validate_ruc};
use super::error::FiscalError;
use super::establishment::{EmissionPointCode, EstablishmentCode, MAX_SEQUENTIAL};

/// Length of an access key (`claveAcceso`), check digit included.
pub const ACCESS_KEY_LEN: usize = 49;

const NUMERIC_CODE_MODULUS: u32 = 100_000_000;

/// The 49-digit access key identifying an electronic document.
///
/// Layout (fixed width, zero padded):
///
/// | Field | Width |
/// |-------|-------|
/// | issue date `ddMMyyyy` | 8 |
/// | document type | 2 |
/// | issuer RUC | 13 |
/// | environment | 1 |
/// | establishment | 3 |
/// | emission point | 3 |
/// | sequential | 9 |
/// | numeric code | 8 |
/// | emission type | 1 |
/// | modulo-11 check digit | 1 |
///
/// Keys are derived, never freely assigned: the only constructors are
/// [`AccessKey::generate`] and [`AccessKey::parse`], which checks structure
/// and checksum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct AccessKey(String);

/// Inputs for [`AccessKey::generate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessKeyFields {
    pub issue_date: NaiveDate,
    pub document_type: DocumentType,
    pub ruc: String,
    pub environment: Environment,
    pub establishment: EstablishmentCode,
    pub emission_point: EmissionPointCode,
    pub sequential: u32,
    pub emission_type: EmissionType,
    /// 8-digit numeric block. Derived from the sequential when `None`.
    pub numeric_code: Option<u32>,
}

impl AccessKeyFields {
    pub fn new(
        issue_date: NaiveDate,
        document_type: DocumentType,
        ruc: impl Into<String>,
        environment: Environment,
        establishment: EstablishmentCode,
        emission_point: EmissionPointCode,
        sequential: u32,
    ) -> Self {
        Self {
            issue_date,
            document_type,
            ruc: ruc.into(),
            environment,
            establishment,
            emission_point,
            sequential,
            emission_type: EmissionType::Normal,
            numeric_code: None,
        }
    }

    pub fn emission_type(mut self, emission_type: EmissionType) -> Self {
        self.emission_type = emission_type;
        self
    }

    pub fn numeric_code(mut self, code: u32) -> Self {
        self.numeric_code = Some(code);
        self
    }
}

/// Every field recovered from a valid access key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessKeyParts {
    pub issue_date: NaiveDate,
    pub document_type: DocumentType,
    pub ruc: String,
    pub environment: Environment,
    pub establishment: EstablishmentCode,
    pub emission_point: EmissionPointCode,
    pub sequential: u32,
    pub numeric_code: u32,
    pub emission_type: EmissionType,
    pub check_digit: u8,
}

impl AccessKey {
    /// Derive the access key for a document.
    pub fn generate(fields: &AccessKeyFields) -> Result<Self, FiscalError> {
        validate_ruc(&fields.ruc)?;
        if fields.sequential == 0 || fields.sequential > MAX_SEQUENTIAL {
            return Err(FiscalError::Numbering(format!(
                "sequential {} out of range 1..={MAX_SEQUENTIAL}",
                fields.sequential
            )));
        }
        let numeric_code = fields
            .numeric_code
            .unwrap_or(fields.sequential % NUMERIC_CODE_MODULUS);
        if numeric_code >= NUMERIC_CODE_MODULUS {
            return Err(FiscalError::Validation(format!(
                "numeric code {numeric_code} exceeds 8 digits"
            )));
        }

        let year = fields.issue_date.year();
        if !(1..=9999).contains(&year) {
            return Err(FiscalError::Validation(format!(
                "issue date year {year} does not fit the 4-digit date block"
            )));
        }

        let mut digits = String::with_capacity(ACCESS_KEY_LEN);
        digits.push_str(&fields.issue_date.format("%d%m%Y").to_string());
        digits.push_str(fields.document_type.code());
        digits.push_str(&fields.ruc);
        digits.push_str(fields.environment.code());
        digits.push_str(&fields.establishment.to_string());
        digits.push_str(&fields.emission_point.to_string());
        digits.push_str(&format!("{:09}", fields.sequential));
        digits.push_str(&format!("{numeric_code:08}"));
        digits.push_str(fields.emission_type.code());
        if digits.len() != ACCESS_KEY_LEN - 1 || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FiscalError::Validation(format!(
                "access key fields do not form 48 digits: {digits}"
            )));
        }

        let check = mod11_check_digit(&digits);
        digits.push(char::from(b'0' + check));
        Ok(Self(digits))
    }

    /// Parse a candidate key, checking length, digits and checksum.
    pub fn parse(candidate: &str) -> Result<Self, FiscalError> {
        if candidate.len() != ACCESS_KEY_LEN {
            return Err(FiscalError::Validation(format!(
                "access key must have {ACCESS_KEY_LEN} digits, got {}",
                candidate.len()
            )));
        }
        if !candidate.bytes().all(|b| b.is_ascii_digit()) {
            return Err(FiscalError::Validation(
                "access key must be numeric".into(),
            ));
        }
        let (body, check) = candidate.split_at(ACCESS_KEY_LEN - 1);
        let expected = mod11_check_digit(body);
        if check.as_bytes()[0] - b'0' != expected {
            return Err(FiscalError::Validation(format!(
                "access key check digit mismatch: expected {expected}, found {check}"
            )));
        }
        Ok(Self(candidate.to_string()))
    }

    /// Structural validity: 49 numeric characters with a matching check digit.
    ///
    /// A single changed digit is not always caught: modulo 11 maps residues
    /// 10 and 1 to the same check digit, so roughly 1 in 11 corruptions pass.
    pub fn validate(candidate: &str) -> bool {
        Self::parse(candidate).is_ok()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Decompose the key into its fields.
    pub fn parts(&self) -> Result<AccessKeyParts, FiscalError> {
        let s = self.0.as_str();
        let field = move |start: usize, len: usize| &s[start..start + len];
        let number = move |start: usize, len: usize| -> Result<u32, FiscalError> {
            field(start, len)
                .parse()
                .map_err(|_| FiscalError::Validation(format!("invalid digits in access key {s}")))
        };

        let issue_date = NaiveDate::parse_from_str(field(0, 8), "%d%m%Y").map_err(|e| {
            FiscalError::Validation(format!("access key issue date is invalid: {e}"))
        })?;
        let document_type = DocumentType::from_code(field(8, 2)).ok_or_else(|| {
            FiscalError::Validation(format!("unknown document type {}", field(8, 2)))
        })?;
        let environment = Environment::from_code(field(23, 1)).ok_or_else(|| {
            FiscalError::Validation(format!("unknown environment {}", field(23, 1)))
        })?;
        let emission_type = EmissionType::from_code(field(47, 1)).ok_or_else(|| {
            FiscalError::Validation(format!("unknown emission type {}", field(47, 1)))
        })?;

        Ok(AccessKeyParts {
            issue_date,
            document_type,
            ruc: field(10, 13).to_string(),
            environment,
            establishment: field(24, 3).parse()?,
            emission_point: field(27, 3).parse()?,
            sequential: number(30, 9)?,
            numeric_code: number(39, 8)?,
            emission_type,
            check_digit: s.as_bytes()[48] - b'0',
        })
    }
}

impl fmt::Display for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for AccessKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for AccessKey {
    type Error = FiscalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<AccessKey> for String {
    fn from(key: AccessKey) -> Self {
        key.0
    }
}

/// Modulo-11 check digit with weights 2..=7 cycling from the rightmost digit.
///
/// Residue 0 yields 0, residue 1 yields 1, anything else `11 - residue`.
/// Non-digit characters are ignored; callers pass numeric strings.
pub fn mod11_check_digit(digits: &str) -> u8 {
    let sum: u32 = digits
        .bytes()
        .rev()
        .filter(u8::is_ascii_digit)
        .enumerate()
        .map(|(i, b)| u32::from(b - b'0') * (2 + (i as u32 % 6)))
        .sum();
    match sum % 11 {
        0 => 0,
        1 => 1,
        r => (11 - r) as u8,
    }
}
