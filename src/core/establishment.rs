use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::FiscalError;

/// Largest sequential that fits the 9-digit field of a legal number.
pub const MAX_SEQUENTIAL: u32 = 999_999_999;

/// Tenant (issuing company) identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TenantId(pub Uuid);

impl TenantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TenantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Index of an establishment row in the sequence allocator's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EstablishmentId(pub usize);

/// Index of an emission point row in the sequence allocator's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmissionPointId(pub usize);

macro_rules! three_digit_code {
    ($(#[$meta:meta])* $name:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(u16);

        impl $name {
            /// Accepts `1..=999`; `000` is not a valid code.
            pub fn new(value: u16) -> Result<Self, FiscalError> {
                if value == 0 || value > 999 {
                    return Err(FiscalError::Validation(format!(
                        concat!($what, " code must be between 001 and 999, got {}"),
                        value
                    )));
                }
                Ok(Self(value))
            }

            pub fn value(&self) -> u16 {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:03}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = FiscalError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if s.len() != 3 || !s.bytes().all(|b| b.is_ascii_digit()) {
                    return Err(FiscalError::Validation(format!(
                        concat!($what, " code must be 3 digits, got {:?}"),
                        s
                    )));
                }
                let value: u16 = s
                    .parse()
                    .map_err(|_| FiscalError::Validation(format!("invalid code {s:?}")))?;
                Self::new(value)
            }
        }

        impl TryFrom<String> for $name {
            type Error = FiscalError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                value.parse()
            }
        }

        impl From<$name> for String {
            fn from(code: $name) -> Self {
                code.to_string()
            }
        }
    };
}

three_digit_code!(
    /// Establishment code (`estab`), `001`–`999`.
    EstablishmentCode,
    "establishment"
);

three_digit_code!(
    /// Emission point code (`ptoEmi`), `001`–`999`.
    EmissionPointCode,
    "emission point"
);

/// Legal document number `EEE-PPP-SSSSSSSSS`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct LegalNumber {
    pub establishment: EstablishmentCode,
    pub emission_point: EmissionPointCode,
    pub sequential: u32,
}

impl LegalNumber {
    pub fn new(
        establishment: EstablishmentCode,
        emission_point: EmissionPointCode,
        sequential: u32,
    ) -> Result<Self, FiscalError> {
        if sequential == 0 || sequential > MAX_SEQUENTIAL {
            return Err(FiscalError::Numbering(format!(
                "sequential {sequential} out of range 1..={MAX_SEQUENTIAL}"
            )));
        }
        Ok(Self {
            establishment,
            emission_point,
            sequential,
        })
    }

    /// The 9-digit zero-padded sequential (`secuencial`).
    pub fn sequential_code(&self) -> String {
        format!("{:09}", self.sequential)
    }
}

impl fmt::Display for LegalNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}-{}-{:09}",
            self.establishment, self.emission_point, self.sequential
        )
    }
}

impl FromStr for LegalNumber {
    type Err = FiscalError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.split('-').collect();
        if parts.len() != 3 || parts[2].len() != 9 || !parts[2].bytes().all(|b| b.is_ascii_digit())
        {
            return Err(FiscalError::Numbering(format!(
                "legal number must look like EEE-PPP-SSSSSSSSS, got {s:?}"
            )));
        }
        let sequential: u32 = parts[2]
            .parse()
            .map_err(|_| FiscalError::Numbering(format!("invalid sequential in {s:?}")))?;
        Self::new(parts[0].parse()?, parts[1].parse()?, sequential)
    }
}

impl TryFrom<String> for LegalNumber {
    type Error = FiscalError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<LegalNumber> for String {
    fn from(number: LegalNumber) -> Self {
        number.to_string()
    }
}

/// Physical establishment of a tenant; owns one or more emission points.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Establishment {
    pub id: EstablishmentId,
    pub tenant: TenantId,
    pub code: EstablishmentCode,
    /// Address printed as `dirEstablecimiento`.
    pub address: String,
}

/// Emission point (cash register, web shop, ...) inside an establishment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmissionPoint {
    pub id: EmissionPointId,
    pub establishment: EstablishmentId,
    pub code: EmissionPointCode,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn legal_number_format() {
        let n = LegalNumber::new(
            EstablishmentCode::new(1).unwrap(),
            EmissionPointCode::new(12).unwrap(),
            42,
        )
        .unwrap();
        assert_eq!(n.to_string(), "001-012-000000042");
        assert_eq!(n.sequential_code(), "000000042");
    }

    #[test]
    fn legal_number_parse() {
        let n: LegalNumber = "002-001-000001234".parse().unwrap();
        assert_eq!(n.establishment.value(), 2);
        assert_eq!(n.emission_point.value(), 1);
        assert_eq!(n.sequential, 1234);
    }

    #[test]
    fn legal_number_rejects_malformed() {
        assert!("001-001-12345".parse::<LegalNumber>().is_err());
        assert!("001001000000001".parse::<LegalNumber>().is_err());
        assert!("000-001-000000001".parse::<LegalNumber>().is_err());
        assert!("001-001-000000000".parse::<LegalNumber>().is_err());
        assert!("01-001-000000001".parse::<LegalNumber>().is_err());
    }

    #[test]
    fn establishment_code_range() {
        assert!(EstablishmentCode::new(0).is_err());
        assert!(EstablishmentCode::new(1000).is_err());
        assert_eq!(EstablishmentCode::new(999).unwrap().to_string(), "999");
        assert!("0a1".parse::<EstablishmentCode>().is_err());
    }
}
