#![cfg(feature = "xml")]

use chrono::NaiveDate;
use comprobantes::core::*;
use comprobantes::xml::{build_xml, parse_xml};
use rust_decimal_macros::dec;

fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

struct Fixture {
    tenant: TenantId,
    context: EmissionPointContext,
    issuer: IssuerProfile,
    allocator: SequenceAllocator,
    point: EmissionPointId,
}

fn fixture() -> Fixture {
    let allocator = SequenceAllocator::new();
    let tenant = TenantId::new();
    let est = allocator
        .add_establishment(tenant, EstablishmentCode::new(1).unwrap(), "Av. 9 de Octubre 100")
        .unwrap();
    let point = allocator
        .add_emission_point(tenant, est, EmissionPointCode::new(1).unwrap())
        .unwrap();
    Fixture {
        tenant,
        context: allocator.resolve(tenant, point).unwrap(),
        issuer: IssuerProfile::new(
            "0912345678001",
            "Distribuidora del Pacifico S.A.",
            "Guayaquil, Av. 9 de Octubre 100",
            Environment::Test,
        ),
        allocator,
        point,
    }
}

fn buyer() -> Buyer {
    Buyer {
        customer_id: CustomerId::new(),
        identification_type: IdentificationType::Cedula,
        identification: "0923456789".into(),
        name: "Maria Fernanda Lopez & Hijos".into(),
        address: None,
        email: Some("mf@example.ec".into()),
        phone: None,
    }
}

fn document(fx: &Fixture, draft: DraftDocument) -> FiscalDocument {
    let sequential = fx
        .allocator
        .allocate(fx.point, draft.kind.document_type())
        .unwrap();
    FiscalDocument::new_draft(
        fx.tenant,
        fx.context.establishment.id,
        fx.context.emission_point.id,
        LegalNumber::new(
            fx.context.establishment.code,
            fx.context.emission_point.code,
            sequential,
        )
        .unwrap(),
        Environment::Test,
        draft,
    )
}

fn invoice(fx: &Fixture) -> FiscalDocument {
    let draft = DraftBuilder::invoice(date(2024, 3, 1))
        .buyer(buyer())
        .add_item(LineItemBuilder::new("SRV-01", "Mantenimiento", dec!(2), dec!(100.00)).build())
        .add_item(
            LineItemBuilder::new("LIB-02", "Libro <tecnico>", dec!(1.5), dec!(12.345678))
                .tax_rate(TaxRate::Zero)
                .build(),
        )
        .additional_field("Email", "mf@example.ec")
        .build()
        .unwrap();
    document(fx, draft)
}

#[test]
fn invoice_round_trip() {
    let fx = fixture();
    let doc = invoice(&fx);
    let built = build_xml(
        &doc,
        &fx.issuer,
        &fx.context.establishment,
        &fx.context.emission_point,
    )
    .unwrap();

    assert!(built.xml.starts_with("<?xml"));
    assert!(built.xml.contains(r#"<factura id="comprobante" version="1.1.0">"#));
    assert!(built.xml.contains("Libro &lt;tecnico&gt;"));

    let parsed = parse_xml(&built.xml).unwrap();
    assert_eq!(parsed.document_type, DocumentType::Invoice);
    assert_eq!(parsed.access_key, built.access_key);
    assert_eq!(parsed.number, doc.number());
    assert_eq!(parsed.issue_date, date(2024, 3, 1));
    assert_eq!(parsed.ruc, "0912345678001");
    assert_eq!(parsed.buyer_identification, "0923456789");
    assert_eq!(parsed.buyer_name, "Maria Fernanda Lopez & Hijos");
    assert_eq!(parsed.lines.len(), 2);
    assert_eq!(parsed.lines[1].description, "Libro <tecnico>");
    assert_eq!(parsed.lines[1].quantity, dec!(1.5));
    assert_eq!(parsed.lines[1].unit_price, dec!(12.345678));
    assert_eq!(parsed.subtotal, doc.totals().subtotal);
    assert_eq!(parsed.total, doc.totals().total);
    assert_eq!(parsed.taxes.len(), 2);
    assert_eq!(parsed.additional_info.len(), 1);
    assert_eq!(parsed.additional_info[0].name, "Email");
    assert_eq!(parsed.additional_info[0].value, "mf@example.ec");
    assert!(parsed.modified_document.is_none());

    let parts = built.access_key.parts().unwrap();
    assert_eq!(parts.sequential, doc.number().sequential);
    assert_eq!(parts.ruc, fx.issuer.ruc);
}

#[test]
fn credit_note_references_the_original() {
    let fx = fixture();
    let original = invoice(&fx);
    let details = CreditNoteDetails {
        original_invoice: original.id(),
        original_number: original.number(),
        original_issue_date: original.issue_date(),
        reason: "Devolucion parcial".into(),
        physical_return: true,
    };
    let draft = DraftBuilder::credit_note(date(2024, 3, 10), details)
        .buyer(original.buyer().clone())
        .add_item(LineItemBuilder::new("SRV-01", "Mantenimiento", dec!(1), dec!(100.00)).build())
        .build()
        .unwrap();
    let note = document(&fx, draft);
    assert_eq!(note.number().sequential, 1);

    let built = build_xml(
        &note,
        &fx.issuer,
        &fx.context.establishment,
        &fx.context.emission_point,
    )
    .unwrap();
    assert!(built.xml.contains("<notaCredito"));
    assert!(built.xml.contains("<codDocModificado>01</codDocModificado>"));

    let parsed = parse_xml(&built.xml).unwrap();
    assert_eq!(parsed.document_type, DocumentType::CreditNote);
    let modified = parsed.modified_document.unwrap();
    assert_eq!(modified.document_type, DocumentType::Invoice);
    assert_eq!(modified.number, original.number());
    assert_eq!(modified.issue_date, date(2024, 3, 1));
    assert_eq!(modified.reason, "Devolucion parcial");
    assert_eq!(parsed.total, dec!(115.00));
}

#[test]
fn caller_fields_replace_standard_additional_fields() {
    let fx = fixture();
    let draft = DraftBuilder::invoice(date(2024, 3, 1))
        .buyer(buyer())
        .add_item(LineItemBuilder::new("SRV-01", "Mantenimiento", dec!(1), dec!(10.00)).build())
        .additional_field("Email", "facturas@example.ec")
        .additional_field("Vendedor", "Carlos")
        .build()
        .unwrap();
    let doc = document(&fx, draft);
    let built = build_xml(
        &doc,
        &fx.issuer,
        &fx.context.establishment,
        &fx.context.emission_point,
    )
    .unwrap();

    assert_eq!(built.xml.matches(r#"nombre="Email""#).count(), 1);
    let parsed = parse_xml(&built.xml).unwrap();
    let names: Vec<&str> = parsed.additional_info.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["Email", "Vendedor"]);
    assert_eq!(parsed.additional_info[0].value, "facturas@example.ec");
}

#[test]
fn empty_elements_are_never_self_closing() {
    let fx = fixture();
    let built = build_xml(
        &invoice(&fx),
        &fx.issuer,
        &fx.context.establishment,
        &fx.context.emission_point,
    )
    .unwrap();
    assert!(!built.xml.contains("/>"));
}

#[test]
fn optional_issuer_fields_are_omitted() {
    let fx = fixture();
    let doc = invoice(&fx);
    let built = build_xml(
        &doc,
        &fx.issuer,
        &fx.context.establishment,
        &fx.context.emission_point,
    )
    .unwrap();
    assert!(!built.xml.contains("nombreComercial"));
    assert!(!built.xml.contains("contribuyenteEspecial"));
    assert!(!built.xml.contains("contribuyenteRimpe"));
    assert!(!built.xml.contains("direccionComprador"));

    let issuer = fx
        .issuer
        .clone()
        .trade_name("Dipasa")
        .special_taxpayer("12345")
        .rimpe_regime("CONTRIBUYENTE REGIMEN RIMPE");
    let built = build_xml(
        &doc,
        &issuer,
        &fx.context.establishment,
        &fx.context.emission_point,
    )
    .unwrap();
    assert!(built.xml.contains("<nombreComercial>Dipasa</nombreComercial>"));
    assert!(built.xml.contains("<contribuyenteEspecial>12345</contribuyenteEspecial>"));
}

#[test]
fn wrong_emission_point_is_refused() {
    let fx = fixture();
    let doc = invoice(&fx);
    let est = fx.context.establishment.id;
    let other = fx
        .allocator
        .add_emission_point(fx.tenant, est, EmissionPointCode::new(9).unwrap())
        .unwrap();
    let ctx = fx.allocator.resolve(fx.tenant, other).unwrap();
    let err = build_xml(&doc, &fx.issuer, &ctx.establishment, &ctx.emission_point).unwrap_err();
    assert!(matches!(err, FiscalError::Precondition(_)));
}

#[test]
fn malformed_input_is_an_xml_error() {
    assert!(matches!(parse_xml("<factura><infoTributaria>"), Err(FiscalError::Xml(_))));
    assert!(parse_xml("<retencion id=\"comprobante\"></retencion>").is_err());
}
