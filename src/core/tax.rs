use std::collections::BTreeMap;

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use super::codes::TaxRate;
use super::document::LineItem;

/// Round a monetary amount to 2 decimals, half to even.
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointNearestEven)
}

/// Per-line amounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineTotals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

/// `subtotal = round(q * p)`, `tax = round(subtotal * rate)`,
/// `total = round(subtotal + tax)`. `tax_rate` is a fraction (0.15 for 15%).
pub fn line_totals(quantity: Decimal, unit_price: Decimal, tax_rate: Decimal) -> LineTotals {
    let subtotal = round_money(quantity * unit_price);
    let tax = round_money(subtotal * tax_rate);
    LineTotals {
        subtotal,
        tax,
        total: round_money(subtotal + tax),
    }
}

/// Aggregated amounts for one IVA rate (`totalImpuesto`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaxBreakdown {
    pub rate: TaxRate,
    /// `baseImponible`.
    pub taxable_amount: Decimal,
    /// `valor`.
    pub tax_amount: Decimal,
}

/// Document totals plus the per-rate breakdown.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTotals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
    /// Ordered by numeric rate code (`0`, `2`, ... `10`); one entry per
    /// distinct rate.
    pub breakdown: Vec<TaxBreakdown>,
}

impl DocumentTotals {
    pub fn zero() -> Self {
        Self {
            subtotal: Decimal::ZERO,
            tax: Decimal::ZERO,
            total: Decimal::ZERO,
            breakdown: Vec::new(),
        }
    }

    pub fn as_line_totals(&self) -> LineTotals {
        LineTotals {
            subtotal: self.subtotal,
            tax: self.tax,
            total: self.total,
        }
    }
}

/// Sum line subtotals and taxes independently, round each sum, then round
/// their combination. The breakdown groups the same per-line amounts by rate.
pub fn document_totals(items: &[LineItem]) -> DocumentTotals {
    let subtotal = round_money(items.iter().map(|l| l.totals.subtotal).sum());
    let tax = round_money(items.iter().map(|l| l.totals.tax).sum());

    let mut groups: BTreeMap<(u8, TaxRate), (Decimal, Decimal)> = BTreeMap::new();
    for line in items {
        let entry = groups
            .entry((numeric_code(line.tax_rate), line.tax_rate))
            .or_insert((Decimal::ZERO, Decimal::ZERO));
        entry.0 += line.totals.subtotal;
        entry.1 += line.totals.tax;
    }

    let breakdown = groups
        .into_iter()
        .map(|((_, rate), (base, value))| TaxBreakdown {
            rate,
            taxable_amount: round_money(base),
            tax_amount: round_money(value),
        })
        .collect();

    DocumentTotals {
        subtotal,
        tax,
        total: round_money(subtotal + tax),
        breakdown,
    }
}

fn numeric_code(rate: TaxRate) -> u8 {
    rate.code().parse().unwrap_or(u8::MAX)
}
