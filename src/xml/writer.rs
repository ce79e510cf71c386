use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use rust_decimal::{Decimal, RoundingStrategy};
use std::io::Cursor;

use crate::core::FiscalError;

fn xml_io(e: std::io::Error) -> FiscalError {
    FiscalError::Xml(format!("XML write error: {e}"))
}

/// Thin wrapper over the quick-xml writer with the element helpers the
/// Authority's schemas need. Empty elements are always written as
/// `<tag></tag>`, never self-closed.
pub struct XmlWriter {
    writer: Writer<Cursor<Vec<u8>>>,
}

impl XmlWriter {
    pub fn new() -> Result<Self, FiscalError> {
        Self::with_indent(2)
    }

    /// `indent == 0` writes everything on one line.
    pub fn with_indent(indent: usize) -> Result<Self, FiscalError> {
        let mut writer = if indent == 0 {
            Writer::new(Cursor::new(Vec::new()))
        } else {
            Writer::new_with_indent(Cursor::new(Vec::new()), b' ', indent)
        };
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))
            .map_err(xml_io)?;
        Ok(Self { writer })
    }

    /// Writer for an XML fragment: no declaration, no indentation.
    pub fn fragment() -> Self {
        Self {
            writer: Writer::new(Cursor::new(Vec::new())),
        }
    }

    pub fn into_string(self) -> Result<String, FiscalError> {
        let buf = self.writer.into_inner().into_inner();
        String::from_utf8(buf).map_err(|e| FiscalError::Xml(format!("XML UTF-8 error: {e}")))
    }

    pub fn start_element(&mut self, name: &str) -> Result<&mut Self, FiscalError> {
        self.writer
            .write_event(Event::Start(BytesStart::new(name)))
            .map_err(xml_io)?;
        Ok(self)
    }

    pub fn start_element_with_attrs(
        &mut self,
        name: &str,
        attrs: &[(&str, &str)],
    ) -> Result<&mut Self, FiscalError> {
        let mut elem = BytesStart::new(name);
        for (k, v) in attrs {
            elem.push_attribute((*k, *v));
        }
        self.writer
            .write_event(Event::Start(elem))
            .map_err(xml_io)?;
        Ok(self)
    }

    pub fn end_element(&mut self, name: &str) -> Result<&mut Self, FiscalError> {
        self.writer
            .write_event(Event::End(BytesEnd::new(name)))
            .map_err(xml_io)?;
        Ok(self)
    }

    /// `<name attrs></name>`, written with an explicit end tag.
    pub fn empty_element_with_attrs(
        &mut self,
        name: &str,
        attrs: &[(&str, &str)],
    ) -> Result<&mut Self, FiscalError> {
        self.start_element_with_attrs(name, attrs)?;
        self.end_element(name)
    }

    /// `<name>text</name>`; the text is normalized with [`sanitize_text`].
    pub fn text_element(&mut self, name: &str, text: &str) -> Result<&mut Self, FiscalError> {
        self.text_element_with_attrs(name, text, &[])
    }

    pub fn text_element_with_attrs(
        &mut self,
        name: &str,
        text: &str,
        attrs: &[(&str, &str)],
    ) -> Result<&mut Self, FiscalError> {
        let text = sanitize_text(text);
        self.start_element_with_attrs(name, attrs)?;
        self.writer
            .write_event(Event::Text(BytesText::new(&text)))
            .map_err(xml_io)?;
        self.end_element(name)
    }

    /// Write the element only when `text` has visible content.
    pub fn optional_text_element(
        &mut self,
        name: &str,
        text: Option<&str>,
    ) -> Result<&mut Self, FiscalError> {
        match text {
            Some(t) if !t.trim().is_empty() => self.text_element(name, t),
            _ => Ok(self),
        }
    }

    /// Monetary amount with 2 decimals.
    pub fn money_element(&mut self, name: &str, amount: Decimal) -> Result<&mut Self, FiscalError> {
        self.text_element(name, &format_money(amount))
    }

    /// Quantity or unit price with 6 decimals.
    pub fn quantity_element(&mut self, name: &str, qty: Decimal) -> Result<&mut Self, FiscalError> {
        self.text_element(name, &format_quantity(qty))
    }
}

fn format_fixed(d: Decimal, dp: u32) -> String {
    let mut rounded = d.round_dp_with_strategy(dp, RoundingStrategy::MidpointNearestEven);
    rounded.rescale(dp);
    rounded.to_string()
}

/// Format a monetary amount with exactly 2 decimal places.
pub fn format_money(d: Decimal) -> String {
    format_fixed(d, 2)
}

/// Format a quantity or unit price with exactly 6 decimal places.
pub fn format_quantity(d: Decimal) -> String {
    format_fixed(d, 6)
}

/// Normalize free text for the Authority: drop control characters, replace
/// typographic quotes, dashes and non-breaking spaces with ASCII, collapse
/// runs of whitespace and trim.
pub fn sanitize_text(s: &str) -> String {
    let mut mapped = String::with_capacity(s.len());
    for ch in s.chars() {
        match ch {
            '\x00'..='\x08' | '\x0B' | '\x0C' | '\x0E'..='\x1F' | '\x7F' | '\u{00AD}' => {}
            '\u{2018}' | '\u{2019}' | '\u{201A}' | '\u{201B}' => mapped.push('\''),
            '\u{201C}' | '\u{201D}' | '\u{201E}' | '\u{201F}' => mapped.push('"'),
            '\u{2013}' | '\u{2014}' | '\u{2015}' => mapped.push('-'),
            '\u{2026}' => mapped.push_str("..."),
            '\u{00A0}' => mapped.push(' '),
            _ => mapped.push(ch),
        }
    }

    let mut out = String::with_capacity(mapped.len());
    let mut prev_space = false;
    for ch in mapped.trim().chars() {
        if ch.is_whitespace() {
            if !prev_space {
                out.push(' ');
            }
            prev_space = true;
        } else {
            out.push(ch);
            prev_space = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn format_cases() {
        assert_eq!(format_money(dec!(100)), "100.00");
        assert_eq!(format_money(dec!(49.9)), "49.90");
        assert_eq!(format_money(dec!(0.125)), "0.12");
        assert_eq!(format_quantity(dec!(2)), "2.000000");
        assert_eq!(format_quantity(dec!(1.2345675)), "1.234568");
    }

    #[test]
    fn sanitize() {
        assert_eq!(sanitize_text("  Caf\u{e9}\u{2014}bar \u{201C}x\u{201D}\t\n y "), "Caf\u{e9}-bar \"x\" y");
        assert_eq!(sanitize_text("a\u{0007}b\u{00A0}c"), "ab c");
    }

    #[test]
    fn no_self_closing_tags() {
        let mut w = XmlWriter::new().unwrap();
        w.start_element("root").unwrap();
        w.text_element("empty", "").unwrap();
        w.optional_text_element("skipped", Some("   ")).unwrap();
        w.text_element_with_attrs("campo", "a & b", &[("nombre", "x")]).unwrap();
        w.end_element("root").unwrap();
        let xml = w.into_string().unwrap();
        assert!(xml.contains("<empty></empty>"));
        assert!(!xml.contains("skipped"));
        assert!(xml.contains("<campo nombre=\"x\">a &amp; b</campo>"));
        assert!(!xml.contains("/>"));
    }
}
