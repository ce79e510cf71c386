use chrono::NaiveDate;
use rust_decimal::Decimal;

use super::codes::{FINAL_CONSUMER_ID, IdentificationType, PaymentMethod, TaxRate};
use super::document::{
    AdditionalField, Buyer, CreditNoteDetails, DocumentKind, DraftDocument, LineItem, ProductId,
};
use super::error::{FiscalError, ValidationError, into_validation_error};
use super::tax::line_totals;

const MAX_ITEMS: usize = 10_000;
const MAX_ADDITIONAL_FIELDS: usize = 15;
const MAX_DESCRIPTION_LEN: usize = 300;

/// Builder for the business content of an invoice or credit note.
///
/// ```
/// use comprobantes::core::*;
/// use rust_decimal_macros::dec;
/// use chrono::NaiveDate;
///
/// let draft = DraftBuilder::invoice(NaiveDate::from_ymd_opt(2024, 3, 1).unwrap())
///     .buyer(Buyer {
///         customer_id: CustomerId::new(),
///         identification_type: IdentificationType::Cedula,
///         identification: "0912345678".into(),
///         name: "Juan Perez".into(),
///         address: None,
///         email: Some("juan@example.com".into()),
///         phone: None,
///     })
///     .add_item(LineItemBuilder::new("SRV-1", "Consultoria", dec!(2), dec!(100.00))
///         .tax_rate(TaxRate::Fifteen)
///         .build())
///     .payment_method(PaymentMethod::FinancialSystem)
///     .build()
///     .unwrap();
/// assert_eq!(draft.items[0].totals.total, dec!(230.00));
/// ```
pub struct DraftBuilder {
    kind: DocumentKind,
    issue_date: NaiveDate,
    buyer: Option<Buyer>,
    items: Vec<LineItem>,
    payment_method: PaymentMethod,
    notes: Option<String>,
    additional_info: Vec<AdditionalField>,
}

impl DraftBuilder {
    pub fn invoice(issue_date: NaiveDate) -> Self {
        Self::new(DocumentKind::Invoice, issue_date)
    }

    pub fn credit_note(issue_date: NaiveDate, details: CreditNoteDetails) -> Self {
        Self::new(DocumentKind::CreditNote(details), issue_date)
    }

    fn new(kind: DocumentKind, issue_date: NaiveDate) -> Self {
        Self {
            kind,
            issue_date,
            buyer: None,
            items: Vec::new(),
            payment_method: PaymentMethod::FinancialSystem,
            notes: None,
            additional_info: Vec::new(),
        }
    }

    pub fn buyer(mut self, buyer: Buyer) -> Self {
        self.buyer = Some(buyer);
        self
    }

    pub fn add_item(mut self, item: LineItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn items(mut self, items: Vec<LineItem>) -> Self {
        self.items = items;
        self
    }

    pub fn payment_method(mut self, method: PaymentMethod) -> Self {
        self.payment_method = method;
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }

    pub fn additional_field(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.additional_info.push(AdditionalField {
            name: name.into(),
            value: value.into(),
        });
        self
    }

    /// Validate and build. Returns all validation errors, not just the first.
    pub fn build(self) -> Result<DraftDocument, FiscalError> {
        let mut errors = Vec::new();

        match &self.buyer {
            None => errors.push(ValidationError::new("buyer", "buyer is required")),
            Some(buyer) => validate_buyer(buyer, &mut errors),
        }

        if self.items.is_empty() {
            errors.push(ValidationError::new("items", "at least one item is required"));
        }
        if self.items.len() > MAX_ITEMS {
            errors.push(ValidationError::new(
                "items",
                format!("cannot have more than {MAX_ITEMS} items"),
            ));
        }
        errors.extend(validate_items(&self.items));

        if self.additional_info.len() > MAX_ADDITIONAL_FIELDS {
            errors.push(ValidationError::new(
                "additional_info",
                format!("cannot have more than {MAX_ADDITIONAL_FIELDS} fields"),
            ));
        }
        for (i, field) in self.additional_info.iter().enumerate() {
            if field.name.trim().is_empty() {
                errors.push(ValidationError::new(
                    format!("additional_info[{i}].name"),
                    "must not be empty",
                ));
            }
        }

        if let DocumentKind::CreditNote(details) = &self.kind {
            if details.reason.trim().is_empty() {
                errors.push(ValidationError::new("reason", "credit note reason is required"));
            }
            if details.original_issue_date > self.issue_date {
                errors.push(ValidationError::new(
                    "original_issue_date",
                    "original invoice cannot be issued after the credit note",
                ));
            }
        }

        if !errors.is_empty() {
            return Err(into_validation_error(&errors));
        }

        let buyer = self
            .buyer
            .ok_or_else(|| FiscalError::Validation("buyer: buyer is required".into()))?;

        Ok(DraftDocument {
            kind: self.kind,
            issue_date: self.issue_date,
            buyer,
            items: self.items,
            payment_method: self.payment_method,
            notes: self.notes.filter(|n| !n.trim().is_empty()),
            additional_info: self.additional_info,
        })
    }
}

fn validate_buyer(buyer: &Buyer, errors: &mut Vec<ValidationError>) {
    if buyer.name.trim().is_empty() {
        errors.push(ValidationError::new("buyer.name", "must not be empty"));
    }
    let id = buyer.identification.as_str();
    if id.trim().is_empty() {
        errors.push(ValidationError::new("buyer.identification", "must not be empty"));
        return;
    }
    let digits = id.bytes().all(|b| b.is_ascii_digit());
    match buyer.identification_type {
        IdentificationType::Ruc if id.len() != 13 || !digits => errors.push(
            ValidationError::new("buyer.identification", "RUC must be 13 digits"),
        ),
        IdentificationType::Cedula if id.len() != 10 || !digits => errors.push(
            ValidationError::new("buyer.identification", "cedula must be 10 digits"),
        ),
        IdentificationType::FinalConsumer if id != FINAL_CONSUMER_ID => {
            errors.push(ValidationError::new(
                "buyer.identification",
                format!("final consumer identification must be {FINAL_CONSUMER_ID}"),
            ))
        }
        _ => {}
    }
}

/// Per-line checks shared by draft creation and item replacement.
pub fn validate_items(items: &[LineItem]) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    for (i, item) in items.iter().enumerate() {
        if item.code.trim().is_empty() {
            errors.push(ValidationError::new(format!("items[{i}].code"), "must not be empty"));
        }
        if item.description.trim().is_empty() {
            errors.push(ValidationError::new(
                format!("items[{i}].description"),
                "must not be empty",
            ));
        }
        if item.description.chars().count() > MAX_DESCRIPTION_LEN {
            errors.push(ValidationError::new(
                format!("items[{i}].description"),
                format!("cannot exceed {MAX_DESCRIPTION_LEN} characters"),
            ));
        }
        if item.quantity <= Decimal::ZERO {
            errors.push(ValidationError::new(
                format!("items[{i}].quantity"),
                "must be positive",
            ));
        }
        if item.unit_price < Decimal::ZERO {
            errors.push(ValidationError::new(
                format!("items[{i}].unit_price"),
                "must not be negative",
            ));
        }
    }
    errors
}

/// Builder for [`LineItem`]; amounts are computed on [`build`](Self::build).
pub struct LineItemBuilder {
    product_id: Option<ProductId>,
    code: String,
    description: String,
    quantity: Decimal,
    unit_price: Decimal,
    tax_rate: TaxRate,
}

impl LineItemBuilder {
    pub fn new(
        code: impl Into<String>,
        description: impl Into<String>,
        quantity: Decimal,
        unit_price: Decimal,
    ) -> Self {
        Self {
            product_id: None,
            code: code.into(),
            description: description.into(),
            quantity,
            unit_price,
            tax_rate: TaxRate::Fifteen,
        }
    }

    pub fn product(mut self, id: ProductId) -> Self {
        self.product_id = Some(id);
        self
    }

    pub fn tax_rate(mut self, rate: TaxRate) -> Self {
        self.tax_rate = rate;
        self
    }

    pub fn build(self) -> LineItem {
        LineItem {
            product_id: self.product_id,
            totals: line_totals(self.quantity, self.unit_price, self.tax_rate.fraction()),
            code: self.code,
            description: self.description,
            quantity: self.quantity,
            unit_price: self.unit_price,
            tax_rate: self.tax_rate,
        }
    }
}
