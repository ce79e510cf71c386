//! Property-based tests for the access key codec and tax arithmetic.
//!
//! Run with: `cargo test --test proptest_tests`

#![cfg(feature = "core")]

use chrono::NaiveDate;
use comprobantes::core::*;
use proptest::prelude::*;
use rust_decimal::Decimal;

fn arb_date() -> impl Strategy<Value = NaiveDate> {
    (2000i32..2100, 1u32..=12, 1u32..=28)
        .prop_map(|(y, m, d)| NaiveDate::from_ymd_opt(y, m, d).unwrap())
}

fn arb_document_type() -> impl Strategy<Value = DocumentType> {
    prop::sample::select(DocumentType::ALL.to_vec())
}

fn arb_ruc() -> impl Strategy<Value = String> {
    "[0-9]{10}".prop_map(|prefix| format!("{prefix}001"))
}

fn arb_fields() -> impl Strategy<Value = AccessKeyFields> {
    (
        arb_date(),
        arb_document_type(),
        arb_ruc(),
        prop::bool::ANY,
        1u16..=999,
        1u16..=999,
        1u32..=999_999_999,
    )
        .prop_map(|(date, doc_type, ruc, production, est, point, seq)| {
            AccessKeyFields::new(
                date,
                doc_type,
                ruc,
                if production {
                    Environment::Production
                } else {
                    Environment::Test
                },
                EstablishmentCode::new(est).unwrap(),
                EmissionPointCode::new(point).unwrap(),
                seq,
            )
        })
}

/// Money-like decimal with up to `scale` decimals.
fn arb_decimal(max: i64, scale: u32) -> impl Strategy<Value = Decimal> {
    (0i64..max).prop_map(move |units| Decimal::new(units, scale))
}

proptest! {
    #[test]
    fn generated_keys_validate(fields in arb_fields()) {
        let key = AccessKey::generate(&fields).unwrap();
        let s = key.as_str();
        prop_assert_eq!(s.len(), 49);
        prop_assert!(s.bytes().all(|b| b.is_ascii_digit()));
        prop_assert_eq!(s.as_bytes()[48] - b'0', mod11_check_digit(&s[..48]));
        prop_assert!(AccessKey::validate(s));
    }

    #[test]
    fn parts_recover_the_fields(fields in arb_fields()) {
        let key = AccessKey::generate(&fields).unwrap();
        let parts = key.parts().unwrap();
        prop_assert_eq!(parts.issue_date, fields.issue_date);
        prop_assert_eq!(parts.document_type, fields.document_type);
        prop_assert_eq!(&parts.ruc, &fields.ruc);
        prop_assert_eq!(parts.environment, fields.environment);
        prop_assert_eq!(parts.establishment, fields.establishment);
        prop_assert_eq!(parts.emission_point, fields.emission_point);
        prop_assert_eq!(parts.sequential, fields.sequential);
        prop_assert_eq!(parts.numeric_code, fields.sequential % 100_000_000);
    }

    /// A changed body digit always moves the modulo-11 residue; it goes
    /// unnoticed only when old and new residues are 1 and 10, which share
    /// check digit 1.
    #[test]
    fn single_digit_changes_are_caught_unless_check_digit_is_one(
        fields in arb_fields(),
        position in 0usize..48,
        bump in 1u8..=9,
    ) {
        let key = AccessKey::generate(&fields).unwrap();
        let mut bytes = key.as_str().as_bytes().to_vec();
        bytes[position] = b'0' + (bytes[position] - b'0' + bump) % 10;
        let flipped = String::from_utf8(bytes).unwrap();
        let check = key.as_str().as_bytes()[48] - b'0';
        if check != 1 {
            prop_assert!(!AccessKey::validate(&flipped));
        }
    }

    #[test]
    fn changed_check_digit_is_always_caught(fields in arb_fields(), bump in 1u8..=9) {
        let key = AccessKey::generate(&fields).unwrap();
        let mut bytes = key.as_str().as_bytes().to_vec();
        bytes[48] = b'0' + (bytes[48] - b'0' + bump) % 10;
        prop_assert!(!AccessKey::validate(&String::from_utf8(bytes).unwrap()));
    }

    #[test]
    fn arbitrary_strings_never_panic(s in "\\PC{0,60}") {
        let _ = AccessKey::validate(&s);
    }

    #[test]
    fn line_totals_are_rounded_and_consistent(
        quantity in arb_decimal(1_000_000_000, 6),
        price in arb_decimal(100_000_000, 6),
        rate in prop::sample::select(vec![TaxRate::Zero, TaxRate::Five, TaxRate::Twelve, TaxRate::Fifteen]),
    ) {
        let t = line_totals(quantity, price, rate.fraction());
        prop_assert!(t.subtotal.scale() <= 2);
        prop_assert!(t.tax.scale() <= 2);
        prop_assert_eq!(t.total, t.subtotal + t.tax);
        prop_assert_eq!(t.subtotal, round_money(quantity * price));
    }

    #[test]
    fn document_totals_equal_sum_of_breakdown(
        lines in prop::collection::vec(
            (arb_decimal(100_000, 2), arb_decimal(1_000_000, 2), prop::bool::ANY),
            1..20,
        ),
    ) {
        let items: Vec<LineItem> = lines
            .into_iter()
            .enumerate()
            .map(|(i, (q, p, zero))| {
                LineItemBuilder::new(format!("P{i}"), "Item", q + Decimal::ONE, p)
                    .tax_rate(if zero { TaxRate::Zero } else { TaxRate::Fifteen })
                    .build()
            })
            .collect();
        let totals = document_totals(&items);
        let base: Decimal = totals.breakdown.iter().map(|b| b.taxable_amount).sum();
        let tax: Decimal = totals.breakdown.iter().map(|b| b.tax_amount).sum();
        prop_assert_eq!(base, totals.subtotal);
        prop_assert_eq!(tax, totals.tax);
        prop_assert_eq!(totals.total, totals.subtotal + totals.tax);
    }
}
