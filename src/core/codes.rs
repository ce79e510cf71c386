//! Code tables published by the Authority (SRI) for electronic documents.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::error::FiscalError;

/// Tax code for IVA (value-added tax) in `codigo` elements.
pub const TAX_CODE_IVA: &str = "2";

/// Identification used for the anonymous final consumer.
pub const FINAL_CONSUMER_ID: &str = "9999999999999";

/// Environment the document is emitted in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// 1: Test (pruebas).
    Test,
    /// 2: Production.
    Production,
}

impl Environment {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Test => "1",
            Self::Production => "2",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "1" => Some(Self::Test),
            "2" => Some(Self::Production),
            _ => None,
        }
    }
}

/// Emission type. Only normal (online) emission exists today.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum EmissionType {
    /// 1: Normal emission.
    #[default]
    Normal,
}

impl EmissionType {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Normal => "1",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "1" => Some(Self::Normal),
            _ => None,
        }
    }
}

/// Document-type codes (`codDoc`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DocumentType {
    /// 01: Invoice (factura).
    Invoice,
    /// 04: Credit note (nota de crédito).
    CreditNote,
    /// 05: Debit note (nota de débito).
    DebitNote,
    /// 07: Withholding receipt (comprobante de retención).
    Retention,
}

impl DocumentType {
    /// All document types that own a counter on an emission point.
    pub const ALL: [DocumentType; 4] = [
        Self::Invoice,
        Self::CreditNote,
        Self::DebitNote,
        Self::Retention,
    ];

    pub fn code(&self) -> &'static str {
        match self {
            Self::Invoice => "01",
            Self::CreditNote => "04",
            Self::DebitNote => "05",
            Self::Retention => "07",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "01" => Some(Self::Invoice),
            "04" => Some(Self::CreditNote),
            "05" => Some(Self::DebitNote),
            "07" => Some(Self::Retention),
            _ => None,
        }
    }

    /// Slot of this type's counter inside an emission point row.
    pub(crate) fn counter_slot(&self) -> usize {
        match self {
            Self::Invoice => 0,
            Self::CreditNote => 1,
            Self::DebitNote => 2,
            Self::Retention => 3,
        }
    }
}

/// Buyer identification type (`tipoIdentificacionComprador`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IdentificationType {
    /// 04: RUC (taxpayer registry number).
    Ruc,
    /// 05: Cédula (national id card).
    Cedula,
    /// 06: Passport.
    Passport,
    /// 07: Final consumer.
    FinalConsumer,
    /// 08: Foreign identification.
    ForeignId,
}

impl IdentificationType {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Ruc => "04",
            Self::Cedula => "05",
            Self::Passport => "06",
            Self::FinalConsumer => "07",
            Self::ForeignId => "08",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "04" => Some(Self::Ruc),
            "05" => Some(Self::Cedula),
            "06" => Some(Self::Passport),
            "07" => Some(Self::FinalConsumer),
            "08" => Some(Self::ForeignId),
            _ => None,
        }
    }
}

/// Payment method codes (`formaPago`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    /// 01: Without use of the financial system (cash).
    Cash,
    /// 15: Debt compensation.
    DebtCompensation,
    /// 16: Debit card.
    DebitCard,
    /// 17: Electronic money.
    ElectronicMoney,
    /// 18: Prepaid card.
    PrepaidCard,
    /// 19: Credit card.
    CreditCard,
    /// 20: Other, with use of the financial system (transfers).
    FinancialSystem,
    /// 21: Endorsement of titles.
    TitleEndorsement,
}

impl PaymentMethod {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Cash => "01",
            Self::DebtCompensation => "15",
            Self::DebitCard => "16",
            Self::ElectronicMoney => "17",
            Self::PrepaidCard => "18",
            Self::CreditCard => "19",
            Self::FinancialSystem => "20",
            Self::TitleEndorsement => "21",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "01" => Some(Self::Cash),
            "15" => Some(Self::DebtCompensation),
            "16" => Some(Self::DebitCard),
            "17" => Some(Self::ElectronicMoney),
            "18" => Some(Self::PrepaidCard),
            "19" => Some(Self::CreditCard),
            "20" => Some(Self::FinancialSystem),
            "21" => Some(Self::TitleEndorsement),
            _ => None,
        }
    }
}

/// IVA percentage codes (`codigoPorcentaje`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaxRate {
    /// 0: 0%.
    Zero,
    /// 2: 12%.
    Twelve,
    /// 3: 14%.
    Fourteen,
    /// 4: 15%.
    Fifteen,
    /// 5: 5%.
    Five,
    /// 6: Not subject to IVA.
    NotSubject,
    /// 7: Exempt from IVA.
    Exempt,
    /// 8: Differentiated IVA (8%).
    Differentiated,
    /// 10: 13%.
    Thirteen,
}

impl TaxRate {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Zero => "0",
            Self::Twelve => "2",
            Self::Fourteen => "3",
            Self::Fifteen => "4",
            Self::Five => "5",
            Self::NotSubject => "6",
            Self::Exempt => "7",
            Self::Differentiated => "8",
            Self::Thirteen => "10",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "0" => Some(Self::Zero),
            "2" => Some(Self::Twelve),
            "3" => Some(Self::Fourteen),
            "4" => Some(Self::Fifteen),
            "5" => Some(Self::Five),
            "6" => Some(Self::NotSubject),
            "7" => Some(Self::Exempt),
            "8" => Some(Self::Differentiated),
            "10" => Some(Self::Thirteen),
            _ => None,
        }
    }

    /// Rate as a percentage, as written in the `tarifa` element.
    pub fn percentage(&self) -> Decimal {
        match self {
            Self::Zero | Self::NotSubject | Self::Exempt => Decimal::ZERO,
            Self::Twelve => Decimal::new(12, 0),
            Self::Fourteen => Decimal::new(14, 0),
            Self::Fifteen => Decimal::new(15, 0),
            Self::Five => Decimal::new(5, 0),
            Self::Differentiated => Decimal::new(8, 0),
            Self::Thirteen => Decimal::new(13, 0),
        }
    }

    /// Rate as a fraction (15% -> 0.15), the form used by the tax arithmetic.
    pub fn fraction(&self) -> Decimal {
        self.percentage() / Decimal::ONE_HUNDRED
    }
}

/// Validate a RUC: 13 digits, ending in the `001` establishment suffix.
pub fn validate_ruc(ruc: &str) -> Result<(), FiscalError> {
    if ruc.len() != 13 || !ruc.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FiscalError::Validation(format!(
            "RUC must be 13 digits, got {ruc:?}"
        )));
    }
    if !ruc.ends_with("001") {
        return Err(FiscalError::Validation(format!(
            "RUC {ruc} must end in 001"
        )));
    }
    Ok(())
}
