use std::str::FromStr;

use chrono::NaiveDate;
use quick_xml::Reader;
use quick_xml::events::Event;
use rust_decimal::Decimal;

use crate::core::{
    AccessKey, AdditionalField, DocumentType, Environment, FiscalError, LegalNumber, TaxRate,
};

use super::DATE_FORMAT;

/// A line recovered from `detalles`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedLine {
    pub code: String,
    pub description: String,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub subtotal: Decimal,
    pub tax_rate: TaxRate,
    pub tax: Decimal,
}

/// A `totalImpuesto` aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParsedTax {
    pub rate: TaxRate,
    pub taxable_amount: Decimal,
    pub tax_amount: Decimal,
}

/// Reference to the invoice a credit note modifies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModifiedDocument {
    pub document_type: DocumentType,
    pub number: LegalNumber,
    pub issue_date: NaiveDate,
    pub reason: String,
}

/// Fields read back from an invoice or credit note XML (signed or not).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedDocument {
    pub document_type: DocumentType,
    pub version: String,
    pub environment: Environment,
    pub ruc: String,
    pub legal_name: String,
    pub access_key: AccessKey,
    pub number: LegalNumber,
    pub issue_date: NaiveDate,
    pub buyer_identification: String,
    pub buyer_name: String,
    pub subtotal: Decimal,
    /// `importeTotal` for invoices, `valorModificacion` for credit notes.
    pub total: Decimal,
    pub taxes: Vec<ParsedTax>,
    pub lines: Vec<ParsedLine>,
    pub modified_document: Option<ModifiedDocument>,
    pub additional_info: Vec<AdditionalField>,
}

/// Parse an invoice (`factura`) or credit note (`notaCredito`).
///
/// Anything inside an embedded `ds:Signature` is ignored.
pub fn parse_xml(xml: &str) -> Result<ParsedDocument, FiscalError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);
    reader.config_mut().expand_empty_elements = true;

    let mut doc = Parsed::default();
    let mut path: Vec<String> = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(ref e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                if path.is_empty() {
                    doc.root = Some(name.clone());
                    for attr in e.attributes().flatten() {
                        if attr.key.as_ref() == b"version" {
                            doc.version = attr.unescape_value().ok().map(|v| v.into_owned());
                        }
                    }
                }
                match name.as_str() {
                    "detalle" => doc.current_line = Some(RawLine::default()),
                    "totalImpuesto" => doc.current_tax = Some(RawTax::default()),
                    "campoAdicional" => {
                        let nombre = e
                            .attributes()
                            .flatten()
                            .find(|a| a.key.as_ref() == b"nombre")
                            .and_then(|a| a.unescape_value().ok().map(|v| v.into_owned()))
                            .unwrap_or_default();
                        doc.additional_info.push(AdditionalField {
                            name: nombre,
                            value: String::new(),
                        });
                    }
                    _ => {}
                }
                path.push(name);
            }
            Ok(Event::Text(ref e)) => {
                if path.iter().any(|p| p == "ds:Signature") {
                    continue;
                }
                let text = e
                    .unescape()
                    .map_err(|e| FiscalError::Xml(format!("XML parse error: {e}")))?;
                if !text.is_empty() {
                    doc.handle_text(&path, &text);
                }
            }
            Ok(Event::End(_)) => {
                let ended = path.pop().unwrap_or_default();
                match ended.as_str() {
                    "detalle" => {
                        if let Some(line) = doc.current_line.take() {
                            doc.lines.push(line);
                        }
                    }
                    "totalImpuesto" => {
                        if let Some(tax) = doc.current_tax.take() {
                            doc.taxes.push(tax);
                        }
                    }
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(FiscalError::Xml(format!("XML parse error: {e}")));
            }
            _ => {}
        }
    }

    doc.into_document()
}

#[derive(Default)]
struct RawLine {
    code: Option<String>,
    description: Option<String>,
    quantity: Option<String>,
    unit_price: Option<String>,
    subtotal: Option<String>,
    rate_code: Option<String>,
    tax: Option<String>,
}

#[derive(Default)]
struct RawTax {
    rate_code: Option<String>,
    base: Option<String>,
    value: Option<String>,
}

#[derive(Default)]
struct Parsed {
    root: Option<String>,
    version: Option<String>,
    environment: Option<String>,
    ruc: Option<String>,
    legal_name: Option<String>,
    access_key: Option<String>,
    doc_code: Option<String>,
    establishment: Option<String>,
    emission_point: Option<String>,
    sequential: Option<String>,
    issue_date: Option<String>,
    buyer_identification: Option<String>,
    buyer_name: Option<String>,
    subtotal: Option<String>,
    total: Option<String>,
    modified_code: Option<String>,
    modified_number: Option<String>,
    modified_date: Option<String>,
    reason: Option<String>,
    taxes: Vec<RawTax>,
    current_tax: Option<RawTax>,
    lines: Vec<RawLine>,
    current_line: Option<RawLine>,
    additional_info: Vec<AdditionalField>,
}

impl Parsed {
    fn handle_text(&mut self, path: &[String], text: &str) {
        let leaf = path.last().map(|s| s.as_str()).unwrap_or("");
        let parent = if path.len() >= 2 {
            path[path.len() - 2].as_str()
        } else {
            ""
        };
        let value = Some(text.to_string());

        if let Some(line) = self.current_line.as_mut() {
            match (parent, leaf) {
                ("detalle", "codigoPrincipal" | "codigoInterno") => line.code = value,
                ("detalle", "descripcion") => line.description = value,
                ("detalle", "cantidad") => line.quantity = value,
                ("detalle", "precioUnitario") => line.unit_price = value,
                ("detalle", "precioTotalSinImpuesto") => line.subtotal = value,
                ("impuesto", "codigoPorcentaje") => line.rate_code = value,
                ("impuesto", "valor") => line.tax = value,
                _ => {}
            }
            return;
        }

        if let Some(tax) = self.current_tax.as_mut() {
            match leaf {
                "codigoPorcentaje" => tax.rate_code = value,
                "baseImponible" => tax.base = value,
                "valor" => tax.value = value,
                _ => {}
            }
            return;
        }

        match (parent, leaf) {
            ("infoTributaria", "ambiente") => self.environment = value,
            ("infoTributaria", "razonSocial") => self.legal_name = value,
            ("infoTributaria", "ruc") => self.ruc = value,
            ("infoTributaria", "claveAcceso") => self.access_key = value,
            ("infoTributaria", "codDoc") => self.doc_code = value,
            ("infoTributaria", "estab") => self.establishment = value,
            ("infoTributaria", "ptoEmi") => self.emission_point = value,
            ("infoTributaria", "secuencial") => self.sequential = value,
            (_, "fechaEmision") => self.issue_date = value,
            (_, "identificacionComprador") => self.buyer_identification = value,
            (_, "razonSocialComprador") => self.buyer_name = value,
            (_, "totalSinImpuestos") => self.subtotal = value,
            ("infoFactura", "importeTotal") | ("infoNotaCredito", "valorModificacion") => {
                self.total = value
            }
            (_, "codDocModificado") => self.modified_code = value,
            (_, "numDocModificado") => self.modified_number = value,
            (_, "fechaEmisionDocSustento") => self.modified_date = value,
            (_, "motivo") => self.reason = value,
            ("infoAdicional", "campoAdicional") => {
                if let Some(field) = self.additional_info.last_mut() {
                    field.value = text.to_string();
                }
            }
            _ => {}
        }
    }

    fn into_document(self) -> Result<ParsedDocument, FiscalError> {
        match self.root.as_deref() {
            Some("factura") | Some("notaCredito") => {}
            Some(other) => {
                return Err(FiscalError::Xml(format!(
                    "unsupported document root <{other}>"
                )));
            }
            None => return Err(FiscalError::Xml("empty document".into())),
        }

        let document_type = required(self.doc_code, "codDoc").and_then(|c| {
            DocumentType::from_code(&c)
                .ok_or_else(|| FiscalError::Xml(format!("unknown codDoc {c:?}")))
        })?;
        let environment = required(self.environment, "ambiente").and_then(|c| {
            Environment::from_code(&c)
                .ok_or_else(|| FiscalError::Xml(format!("unknown ambiente {c:?}")))
        })?;
        let access_key = AccessKey::parse(&required(self.access_key, "claveAcceso")?)?;
        let number: LegalNumber = format!(
            "{}-{}-{}",
            required(self.establishment, "estab")?,
            required(self.emission_point, "ptoEmi")?,
            required(self.sequential, "secuencial")?
        )
        .parse()?;

        let modified_document = match self.modified_number {
            Some(num) => Some(ModifiedDocument {
                document_type: required(self.modified_code, "codDocModificado").and_then(|c| {
                    DocumentType::from_code(&c)
                        .ok_or_else(|| FiscalError::Xml(format!("unknown codDocModificado {c:?}")))
                })?,
                number: num.parse()?,
                issue_date: date(&required(self.modified_date, "fechaEmisionDocSustento")?)?,
                reason: self.reason.unwrap_or_default(),
            }),
            None => None,
        };

        let taxes = self
            .taxes
            .into_iter()
            .map(|t| {
                Ok(ParsedTax {
                    rate: rate(&required(t.rate_code, "codigoPorcentaje")?)?,
                    taxable_amount: decimal(&required(t.base, "baseImponible")?)?,
                    tax_amount: decimal(&required(t.value, "valor")?)?,
                })
            })
            .collect::<Result<Vec<_>, FiscalError>>()?;

        let lines = self
            .lines
            .into_iter()
            .map(|l| {
                Ok(ParsedLine {
                    code: l.code.unwrap_or_default(),
                    description: l.description.unwrap_or_default(),
                    quantity: decimal(&required(l.quantity, "cantidad")?)?,
                    unit_price: decimal(&required(l.unit_price, "precioUnitario")?)?,
                    subtotal: decimal(&required(l.subtotal, "precioTotalSinImpuesto")?)?,
                    tax_rate: rate(&required(l.rate_code, "codigoPorcentaje")?)?,
                    tax: decimal(&required(l.tax, "valor")?)?,
                })
            })
            .collect::<Result<Vec<_>, FiscalError>>()?;

        Ok(ParsedDocument {
            document_type,
            version: self.version.unwrap_or_default(),
            environment,
            ruc: required(self.ruc, "ruc")?,
            legal_name: self.legal_name.unwrap_or_default(),
            access_key,
            number,
            issue_date: date(&required(self.issue_date, "fechaEmision")?)?,
            buyer_identification: self.buyer_identification.unwrap_or_default(),
            buyer_name: self.buyer_name.unwrap_or_default(),
            subtotal: decimal(&required(self.subtotal, "totalSinImpuestos")?)?,
            total: decimal(&required(self.total, "importeTotal")?)?,
            taxes,
            lines,
            modified_document,
            additional_info: self.additional_info,
        })
    }
}

fn required(value: Option<String>, element: &str) -> Result<String, FiscalError> {
    value.ok_or_else(|| FiscalError::Xml(format!("missing <{element}>")))
}

fn decimal(s: &str) -> Result<Decimal, FiscalError> {
    Decimal::from_str(s).map_err(|_| FiscalError::Xml(format!("invalid decimal: {s}")))
}

fn date(s: &str) -> Result<NaiveDate, FiscalError> {
    NaiveDate::parse_from_str(s, DATE_FORMAT)
        .map_err(|_| FiscalError::Xml(format!("invalid date: {s}")))
}

fn rate(code: &str) -> Result<TaxRate, FiscalError> {
    TaxRate::from_code(code).ok_or_else(|| FiscalError::Xml(format!("unknown IVA code {code:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_other_roots() {
        let err = parse_xml("<comprobanteRetencion></comprobanteRetencion>").unwrap_err();
        assert!(err.to_string().contains("comprobanteRetencion"));
    }

    #[test]
    fn reports_missing_elements() {
        let err = parse_xml("<factura><infoTributaria></infoTributaria></factura>").unwrap_err();
        assert!(matches!(err, FiscalError::Xml(_)));
    }

    #[test]
    fn malformed_xml_is_an_error() {
        assert!(parse_xml("<factura><a></b></factura>").is_err());
        assert!(parse_xml("").is_err());
    }
}
