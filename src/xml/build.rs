use crate::core::codes::TAX_CODE_IVA;
use crate::core::{
    AccessKey, AccessKeyFields, CreditNoteDetails, DocumentKind, DocumentTotals, EmissionPoint,
    Establishment, FiscalDocument, FiscalError, IssuerProfile, LineItem,
};

use super::writer::XmlWriter;
use super::{CREDIT_NOTE_VERSION, DATE_FORMAT, INVOICE_VERSION, ROOT_ID};

/// Generated XML and the access key embedded in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltXml {
    pub xml: String,
    pub access_key: AccessKey,
}

/// Serialize a document into the Authority's XML (`factura` or
/// `notaCredito`), deriving its access key.
///
/// The establishment and emission point must be the ones the document was
/// numbered on.
pub fn build_xml(
    document: &FiscalDocument,
    issuer: &IssuerProfile,
    establishment: &Establishment,
    emission_point: &EmissionPoint,
) -> Result<BuiltXml, FiscalError> {
    issuer.validate()?;
    let number = document.number();
    if establishment.id != document.establishment()
        || emission_point.id != document.emission_point()
        || establishment.code != number.establishment
        || emission_point.code != number.emission_point
    {
        return Err(FiscalError::Precondition(format!(
            "document {} was not numbered on {}-{}",
            number, establishment.code, emission_point.code
        )));
    }

    let access_key = AccessKey::generate(&AccessKeyFields::new(
        document.issue_date(),
        document.document_type(),
        issuer.ruc.as_str(),
        document.environment(),
        number.establishment,
        number.emission_point,
        number.sequential,
    ))?;

    let mut w = XmlWriter::new()?;
    match document.kind() {
        DocumentKind::Invoice => {
            w.start_element_with_attrs("factura", &[("id", ROOT_ID), ("version", INVOICE_VERSION)])?;
            write_info_tributaria(&mut w, document, issuer, &access_key)?;
            write_info_factura(&mut w, document, issuer, establishment)?;
            write_details(&mut w, document.items(), "codigoPrincipal")?;
            write_additional_info(&mut w, document)?;
            w.end_element("factura")?;
        }
        DocumentKind::CreditNote(details) => {
            w.start_element_with_attrs(
                "notaCredito",
                &[("id", ROOT_ID), ("version", CREDIT_NOTE_VERSION)],
            )?;
            write_info_tributaria(&mut w, document, issuer, &access_key)?;
            write_info_nota_credito(&mut w, document, details, issuer, establishment)?;
            write_details(&mut w, document.items(), "codigoInterno")?;
            write_additional_info(&mut w, document)?;
            w.end_element("notaCredito")?;
        }
    }

    Ok(BuiltXml {
        xml: w.into_string()?,
        access_key,
    })
}

fn yes_no(flag: bool) -> &'static str {
    if flag { "SI" } else { "NO" }
}

fn write_info_tributaria(
    w: &mut XmlWriter,
    document: &FiscalDocument,
    issuer: &IssuerProfile,
    access_key: &AccessKey,
) -> Result<(), FiscalError> {
    let number = document.number();
    w.start_element("infoTributaria")?;
    w.text_element("ambiente", document.environment().code())?;
    w.text_element("tipoEmision", access_key.parts()?.emission_type.code())?;
    w.text_element("razonSocial", &issuer.legal_name)?;
    w.optional_text_element("nombreComercial", issuer.trade_name.as_deref())?;
    w.text_element("ruc", &issuer.ruc)?;
    w.text_element("claveAcceso", access_key.as_str())?;
    w.text_element("codDoc", document.document_type().code())?;
    w.text_element("estab", &number.establishment.to_string())?;
    w.text_element("ptoEmi", &number.emission_point.to_string())?;
    w.text_element("secuencial", &number.sequential_code())?;
    w.text_element("dirMatriz", &issuer.head_office_address)?;
    w.optional_text_element("contribuyenteRimpe", issuer.rimpe_regime.as_deref())?;
    w.end_element("infoTributaria")?;
    Ok(())
}

fn write_buyer(w: &mut XmlWriter, document: &FiscalDocument) -> Result<(), FiscalError> {
    let buyer = document.buyer();
    w.text_element(
        "tipoIdentificacionComprador",
        buyer.identification_type.code(),
    )?;
    w.text_element("razonSocialComprador", &buyer.name)?;
    w.text_element("identificacionComprador", &buyer.identification)?;
    Ok(())
}

fn write_total_con_impuestos(
    w: &mut XmlWriter,
    totals: &DocumentTotals,
) -> Result<(), FiscalError> {
    w.start_element("totalConImpuestos")?;
    for group in &totals.breakdown {
        w.start_element("totalImpuesto")?;
        w.text_element("codigo", TAX_CODE_IVA)?;
        w.text_element("codigoPorcentaje", group.rate.code())?;
        w.money_element("baseImponible", group.taxable_amount)?;
        w.money_element("valor", group.tax_amount)?;
        w.end_element("totalImpuesto")?;
    }
    w.end_element("totalConImpuestos")?;
    Ok(())
}

fn write_info_factura(
    w: &mut XmlWriter,
    document: &FiscalDocument,
    issuer: &IssuerProfile,
    establishment: &Establishment,
) -> Result<(), FiscalError> {
    let totals = document.totals();
    w.start_element("infoFactura")?;
    w.text_element(
        "fechaEmision",
        &document.issue_date().format(DATE_FORMAT).to_string(),
    )?;
    w.optional_text_element("dirEstablecimiento", Some(establishment.address.as_str()))?;
    w.optional_text_element("contribuyenteEspecial", issuer.special_taxpayer.as_deref())?;
    w.text_element("obligadoContabilidad", yes_no(issuer.keeps_accounting))?;
    write_buyer(w, document)?;
    w.optional_text_element("direccionComprador", document.buyer().address.as_deref())?;
    w.money_element("totalSinImpuestos", totals.subtotal)?;
    w.money_element("totalDescuento", rust_decimal::Decimal::ZERO)?;
    write_total_con_impuestos(w, totals)?;
    w.money_element("propina", rust_decimal::Decimal::ZERO)?;
    w.money_element("importeTotal", totals.total)?;
    w.text_element("moneda", "DOLAR")?;
    w.start_element("pagos")?;
    w.start_element("pago")?;
    w.text_element("formaPago", document.payment_method().code())?;
    w.money_element("total", totals.total)?;
    w.end_element("pago")?;
    w.end_element("pagos")?;
    w.end_element("infoFactura")?;
    Ok(())
}

fn write_info_nota_credito(
    w: &mut XmlWriter,
    document: &FiscalDocument,
    details: &CreditNoteDetails,
    issuer: &IssuerProfile,
    establishment: &Establishment,
) -> Result<(), FiscalError> {
    let totals = document.totals();
    w.start_element("infoNotaCredito")?;
    w.text_element(
        "fechaEmision",
        &document.issue_date().format(DATE_FORMAT).to_string(),
    )?;
    w.optional_text_element("dirEstablecimiento", Some(establishment.address.as_str()))?;
    write_buyer(w, document)?;
    w.optional_text_element("contribuyenteEspecial", issuer.special_taxpayer.as_deref())?;
    w.text_element("obligadoContabilidad", yes_no(issuer.keeps_accounting))?;
    // A credit note always modifies an invoice.
    w.text_element("codDocModificado", crate::core::DocumentType::Invoice.code())?;
    w.text_element("numDocModificado", &details.original_number.to_string())?;
    w.text_element(
        "fechaEmisionDocSustento",
        &details.original_issue_date.format(DATE_FORMAT).to_string(),
    )?;
    w.money_element("totalSinImpuestos", totals.subtotal)?;
    w.money_element("valorModificacion", totals.total)?;
    w.text_element("moneda", "DOLAR")?;
    write_total_con_impuestos(w, totals)?;
    w.text_element("motivo", &details.reason)?;
    w.end_element("infoNotaCredito")?;
    Ok(())
}

fn write_details(w: &mut XmlWriter, items: &[LineItem], code_tag: &str) -> Result<(), FiscalError> {
    w.start_element("detalles")?;
    for item in items {
        w.start_element("detalle")?;
        w.text_element(code_tag, &item.code)?;
        w.text_element("descripcion", &item.description)?;
        w.quantity_element("cantidad", item.quantity)?;
        w.quantity_element("precioUnitario", item.unit_price)?;
        w.money_element("descuento", rust_decimal::Decimal::ZERO)?;
        w.money_element("precioTotalSinImpuesto", item.totals.subtotal)?;
        w.start_element("impuestos")?;
        w.start_element("impuesto")?;
        w.text_element("codigo", TAX_CODE_IVA)?;
        w.text_element("codigoPorcentaje", item.tax_rate.code())?;
        w.text_element("tarifa", &item.tax_rate.percentage().normalize().to_string())?;
        w.money_element("baseImponible", item.totals.subtotal)?;
        w.money_element("valor", item.totals.tax)?;
        w.end_element("impuesto")?;
        w.end_element("impuestos")?;
        w.end_element("detalle")?;
    }
    w.end_element("detalles")?;
    Ok(())
}

fn write_additional_info(w: &mut XmlWriter, document: &FiscalDocument) -> Result<(), FiscalError> {
    let buyer = document.buyer();
    let mut fields: Vec<(&str, &str)> = Vec::new();
    let standard = [
        ("Email", buyer.email.as_deref()),
        ("Telefono", buyer.phone.as_deref()),
        ("Observaciones", document.notes()),
    ];
    for (name, value) in standard {
        if let Some(v) = value.filter(|v| !v.trim().is_empty()) {
            fields.push((name, v));
        }
    }
    // Caller fields replace a standard field of the same name.
    for field in document.additional_info() {
        if field.value.trim().is_empty() {
            continue;
        }
        let entry = (field.name.as_str(), field.value.as_str());
        match fields.iter_mut().find(|(name, _)| *name == entry.0) {
            Some(existing) => *existing = entry,
            None => fields.push(entry),
        }
    }
    if fields.is_empty() {
        return Ok(());
    }

    w.start_element("infoAdicional")?;
    for (name, value) in fields {
        let name = super::writer::sanitize_text(name);
        w.text_element_with_attrs("campoAdicional", value, &[("nombre", name.as_str())])?;
    }
    w.end_element("infoAdicional")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::*;
    use chrono::NaiveDate;
    use rust_decimal_macros::dec;

    fn issuer() -> IssuerProfile {
        IssuerProfile::new(
            "0912345678001",
            "EMPRESA & ASOCIADOS S.A.",
            "Av. 9 de Octubre 100",
            Environment::Test,
        )
        .keeps_accounting(true)
    }

    fn setup(kind: Option<CreditNoteDetails>) -> (FiscalDocument, Establishment, EmissionPoint) {
        let alloc = SequenceAllocator::new();
        let tenant = TenantId::new();
        let est = alloc
            .add_establishment(tenant, EstablishmentCode::new(1).unwrap(), "Sucursal Centro")
            .unwrap();
        let point = alloc
            .add_emission_point(tenant, est, EmissionPointCode::new(2).unwrap())
            .unwrap();
        let ctx = alloc.resolve(tenant, point).unwrap();
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).unwrap();
        let builder = match kind {
            None => DraftBuilder::invoice(date),
            Some(details) => DraftBuilder::credit_note(date, details),
        };
        let draft = builder
            .buyer(Buyer {
                customer_id: CustomerId::new(),
                identification_type: IdentificationType::Cedula,
                identification: "0912345678".into(),
                name: "Juan Perez".into(),
                address: None,
                email: Some("juan@example.com".into()),
                phone: Some("".into()),
            })
            .add_item(LineItemBuilder::new("P1", "Servicio", dec!(2), dec!(100.00)).build())
            .add_item(
                LineItemBuilder::new("P2", "Libro", dec!(1), dec!(12.5))
                    .tax_rate(TaxRate::Zero)
                    .build(),
            )
            .build()
            .unwrap();
        let number = LegalNumber::new(ctx.establishment.code, ctx.emission_point.code, 42).unwrap();
        let doc = FiscalDocument::new_draft(tenant, est, point, number, Environment::Test, draft);
        (doc, ctx.establishment, ctx.emission_point)
    }

    #[test]
    fn invoice_structure() {
        let (doc, est, point) = setup(None);
        let built = build_xml(&doc, &issuer(), &est, &point).unwrap();
        let xml = &built.xml;
        assert!(xml.contains("<factura id=\"comprobante\" version=\"1.1.0\">"));
        assert!(xml.contains(&format!("<claveAcceso>{}</claveAcceso>", built.access_key)));
        assert!(xml.contains("<estab>001</estab>"));
        assert!(xml.contains("<ptoEmi>002</ptoEmi>"));
        assert!(xml.contains("<secuencial>000000042</secuencial>"));
        assert!(xml.contains("<fechaEmision>01/03/2024</fechaEmision>"));
        assert!(xml.contains("<razonSocial>EMPRESA &amp; ASOCIADOS S.A.</razonSocial>"));
        assert!(xml.contains("<cantidad>2.000000</cantidad>"));
        assert!(xml.contains("<precioUnitario>12.500000</precioUnitario>"));
        assert!(xml.contains("<totalSinImpuestos>212.50</totalSinImpuestos>"));
        assert!(xml.contains("<importeTotal>242.50</importeTotal>"));
        assert!(xml.contains("<obligadoContabilidad>SI</obligadoContabilidad>"));
        assert_eq!(xml.matches("<totalImpuesto>").count(), 2);
        assert!(xml.contains("<campoAdicional nombre=\"Email\">juan@example.com</campoAdicional>"));
        assert!(!xml.contains("Telefono"));
        assert!(!xml.contains("contribuyenteEspecial"));
        assert!(!xml.contains("nombreComercial"));
        assert!(!xml.contains("/>"));
    }

    #[test]
    fn credit_note_references_original() {
        let details = CreditNoteDetails {
            original_invoice: DocumentId::new(),
            original_number: "001-002-000000007".parse().unwrap(),
            original_issue_date: NaiveDate::from_ymd_opt(2024, 2, 15).unwrap(),
            reason: "Devolucion".into(),
            physical_return: true,
        };
        let (doc, est, point) = setup(Some(details));
        let built = build_xml(&doc, &issuer(), &est, &point).unwrap();
        let xml = &built.xml;
        assert!(xml.contains("<notaCredito id=\"comprobante\" version=\"1.1.0\">"));
        assert!(xml.contains("<codDoc>04</codDoc>"));
        assert!(xml.contains("<codDocModificado>01</codDocModificado>"));
        assert!(xml.contains("<numDocModificado>001-002-000000007</numDocModificado>"));
        assert!(xml.contains("<fechaEmisionDocSustento>15/02/2024</fechaEmisionDocSustento>"));
        assert!(xml.contains("<valorModificacion>242.50</valorModificacion>"));
        assert!(xml.contains("<motivo>Devolucion</motivo>"));
        assert!(xml.contains("<codigoInterno>P1</codigoInterno>"));
        assert_eq!(built.access_key.parts().unwrap().document_type, DocumentType::CreditNote);
    }

    #[test]
    fn rejects_foreign_emission_point() {
        let (doc, est, mut point) = setup(None);
        point.code = EmissionPointCode::new(9).unwrap();
        assert!(matches!(
            build_xml(&doc, &issuer(), &est, &point),
            Err(FiscalError::Precondition(_))
        ));
    }

    #[test]
    fn invalid_issuer_ruc() {
        let (doc, est, point) = setup(None);
        let mut bad = issuer();
        bad.ruc = "0912345678".into();
        assert!(matches!(
            build_xml(&doc, &bad, &est, &point),
            Err(FiscalError::Validation(_))
        ));
    }
}
