//! Inclusive XML canonicalization (C14N 1.0, without comments) of a single
//! element subtree, with optional removal of an enveloped signature.

use std::borrow::Cow;
use std::collections::BTreeMap;

use quick_xml::Reader;
use quick_xml::escape::unescape;
use quick_xml::events::{BytesStart, Event};

use crate::core::FiscalError;

const XML_NS: &str = "http://www.w3.org/XML/1998/namespace";

/// Which element to canonicalize.
#[derive(Debug, Clone, Copy)]
pub enum Apex<'a> {
    /// First element whose `Id` or `id` attribute equals the value.
    Id(&'a str),
    /// First element with this qualified name (e.g. `ds:SignedInfo`).
    Element(&'a str),
}

/// Canonicalize the subtree rooted at `apex`.
///
/// Elements named `exclude` inside the subtree are dropped together with
/// their content (the enveloped-signature transform).
pub fn canonicalize(xml: &str, apex: Apex<'_>, exclude: Option<&str>) -> Result<String, FiscalError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().expand_empty_elements = true;

    // Namespace declarations per open element, in document order.
    let mut declared: Vec<Vec<(String, String)>> = Vec::new();
    // Namespace context already rendered by each open output element.
    let mut rendered: Vec<BTreeMap<String, String>> = Vec::new();
    let mut names: Vec<String> = Vec::new();

    let mut out = String::new();
    let mut capture_depth: Option<usize> = None;
    let mut skip_depth: Option<usize> = None;
    let mut found = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| FiscalError::Xml(format!("XML parse error: {e}")))?;
        match event {
            Event::Start(ref e) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).into_owned();
                declared.push(namespace_declarations(e)?);
                names.push(name.clone());
                let depth = names.len();

                if skip_depth.is_some() {
                    continue;
                }
                if capture_depth.is_none() && !found && matches_apex(e, &name, apex)? {
                    capture_depth = Some(depth);
                    found = true;
                    rendered.clear();
                }
                if capture_depth.is_none() {
                    continue;
                }
                if exclude == Some(name.as_str()) && capture_depth != Some(depth) {
                    skip_depth = Some(depth);
                    continue;
                }
                write_start(&mut out, e, &name, &declared, &mut rendered)?;
            }
            Event::End(_) => {
                let depth = names.len();
                let name = names.pop().unwrap_or_default();
                declared.pop();

                if let Some(skip) = skip_depth {
                    if skip == depth {
                        skip_depth = None;
                    }
                    continue;
                }
                if let Some(capture) = capture_depth {
                    out.push_str("</");
                    out.push_str(&name);
                    out.push('>');
                    rendered.pop();
                    if capture == depth {
                        capture_depth = None;
                        break;
                    }
                }
            }
            Event::Text(ref e) if capture_depth.is_some() && skip_depth.is_none() => {
                let raw = reader
                    .decoder()
                    .decode(e)
                    .map_err(|e| FiscalError::Xml(format!("XML decode error: {e}")))?;
                // Line ends are normalized before references are expanded.
                let normalized = normalize_line_ends(&raw);
                let text = unescape(&normalized)
                    .map_err(|e| FiscalError::Xml(format!("XML parse error: {e}")))?;
                escape_text(&mut out, &text);
            }
            Event::CData(ref e) if capture_depth.is_some() && skip_depth.is_none() => {
                let text = e
                    .decode()
                    .map_err(|e| FiscalError::Xml(format!("XML decode error: {e}")))?;
                escape_text(&mut out, &normalize_line_ends(&text));
            }
            Event::PI(ref e) if capture_depth.is_some() && skip_depth.is_none() => {
                out.push_str("<?");
                out.push_str(&String::from_utf8_lossy(e));
                out.push_str("?>");
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !found {
        return Err(FiscalError::Signature(match apex {
            Apex::Id(id) => format!("no element with Id {id:?}"),
            Apex::Element(name) => format!("no <{name}> element"),
        }));
    }
    if capture_depth.is_some() {
        return Err(FiscalError::Xml("unterminated element in signed subtree".into()));
    }
    Ok(out)
}

fn matches_apex(e: &BytesStart<'_>, name: &str, apex: Apex<'_>) -> Result<bool, FiscalError> {
    match apex {
        Apex::Element(target) => Ok(name == target),
        Apex::Id(target) => {
            for attr in e.attributes() {
                let attr = attr.map_err(|e| FiscalError::Xml(format!("bad attribute: {e}")))?;
                let key = attr.key.as_ref();
                if (key == b"Id" || key == b"id")
                    && attr
                        .unescape_value()
                        .map_err(|e| FiscalError::Xml(format!("bad attribute: {e}")))?
                        == target
                {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

/// `(prefix, uri)` pairs declared on this element; the default namespace has
/// an empty prefix.
fn namespace_declarations(e: &BytesStart<'_>) -> Result<Vec<(String, String)>, FiscalError> {
    let mut decls = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| FiscalError::Xml(format!("bad attribute: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        let prefix = if key == "xmlns" {
            String::new()
        } else if let Some(p) = key.strip_prefix("xmlns:") {
            p.to_string()
        } else {
            continue;
        };
        let uri = attr
            .unescape_value()
            .map_err(|e| FiscalError::Xml(format!("bad attribute: {e}")))?
            .into_owned();
        decls.push((prefix, uri));
    }
    Ok(decls)
}

fn in_scope(declared: &[Vec<(String, String)>]) -> BTreeMap<String, String> {
    let mut scope = BTreeMap::new();
    for decls in declared {
        for (prefix, uri) in decls {
            scope.insert(prefix.clone(), uri.clone());
        }
    }
    scope
}

fn write_start(
    out: &mut String,
    e: &BytesStart<'_>,
    name: &str,
    declared: &[Vec<(String, String)>],
    rendered: &mut Vec<BTreeMap<String, String>>,
) -> Result<(), FiscalError> {
    let scope = in_scope(declared);
    let parent = rendered.last().cloned().unwrap_or_default();

    out.push('<');
    out.push_str(name);

    // BTreeMap iteration puts the default namespace (empty prefix) first,
    // then prefixes in lexical order.
    for (prefix, uri) in &scope {
        let parent_uri = parent.get(prefix).map(String::as_str).unwrap_or("");
        if prefix.is_empty() {
            if uri != parent_uri {
                out.push_str(" xmlns=\"");
                escape_attr(out, uri);
                out.push('"');
            }
        } else if !uri.is_empty() && parent.get(prefix) != Some(uri) {
            out.push_str(" xmlns:");
            out.push_str(prefix);
            out.push_str("=\"");
            escape_attr(out, uri);
            out.push('"');
        }
    }

    let mut attrs: Vec<(String, String, String, String)> = Vec::new();
    for attr in e.attributes() {
        let attr = attr.map_err(|e| FiscalError::Xml(format!("bad attribute: {e}")))?;
        let key = String::from_utf8_lossy(attr.key.as_ref()).into_owned();
        if key == "xmlns" || key.starts_with("xmlns:") {
            continue;
        }
        let value = attr
            .unescape_value()
            .map_err(|e| FiscalError::Xml(format!("bad attribute: {e}")))?
            .into_owned();
        let (ns_uri, local) = match key.split_once(':') {
            Some(("xml", local)) => (XML_NS.to_string(), local.to_string()),
            Some((prefix, local)) => (
                scope.get(prefix).cloned().ok_or_else(|| {
                    FiscalError::Xml(format!("undeclared namespace prefix {prefix:?}"))
                })?,
                local.to_string(),
            ),
            None => (String::new(), key.clone()),
        };
        attrs.push((ns_uri, local, key, value));
    }
    attrs.sort_by(|a, b| (&a.0, &a.1).cmp(&(&b.0, &b.1)));
    for (_, _, key, value) in attrs {
        out.push(' ');
        out.push_str(&key);
        out.push_str("=\"");
        escape_attr(out, &value);
        out.push('"');
    }
    out.push('>');

    rendered.push(scope);
    Ok(())
}

/// XML end-of-line handling: `\r\n` and a lone `\r` both become `\n`.
fn normalize_line_ends(text: &str) -> Cow<'_, str> {
    if text.contains('\r') {
        Cow::Owned(text.replace("\r\n", "\n").replace('\r', "\n"))
    } else {
        Cow::Borrowed(text)
    }
}

fn escape_text(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

fn escape_attr(out: &mut String, value: &str) {
    for c in value.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '"' => out.push_str("&quot;"),
            '\t' => out.push_str("&#x9;"),
            '\n' => out.push_str("&#xA;"),
            '\r' => out.push_str("&#xD;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expands_empty_elements_and_sorts_attributes() {
        let xml = r#"<?xml version="1.0"?><root b="2" a="1"><e/></root>"#;
        let c = canonicalize(xml, Apex::Element("root"), None).unwrap();
        assert_eq!(c, r#"<root a="1" b="2"><e></e></root>"#);
    }

    #[test]
    fn subset_inherits_ancestor_namespaces() {
        let xml = r#"<a:root xmlns:a="urn:a" xmlns:b="urn:b"><b:child Id="x"><b:leaf>t</b:leaf></b:child></a:root>"#;
        let c = canonicalize(xml, Apex::Id("x"), None).unwrap();
        assert_eq!(
            c,
            r#"<b:child xmlns:a="urn:a" xmlns:b="urn:b" Id="x"><b:leaf>t</b:leaf></b:child>"#
        );
    }

    #[test]
    fn redundant_declarations_are_dropped() {
        let xml = r#"<r xmlns:p="urn:p"><p:c xmlns:p="urn:p"></p:c></r>"#;
        let c = canonicalize(xml, Apex::Element("r"), None).unwrap();
        assert_eq!(c, r#"<r xmlns:p="urn:p"><p:c></p:c></r>"#);
    }

    #[test]
    fn escapes_text_and_attributes() {
        let xml = "<r v=\"a&amp;&quot;&#9;\">x &amp; &lt;y&gt; &#x41;\"'</r>";
        let c = canonicalize(xml, Apex::Element("r"), None).unwrap();
        assert_eq!(c, "<r v=\"a&amp;&quot;&#x9;\">x &amp; &lt;y&gt; A\"'</r>");
    }

    #[test]
    fn carriage_returns() {
        let xml = "<r>a\r\nb\rc&#xD;d<![CDATA[e\r\nf]]></r>";
        let c = canonicalize(xml, Apex::Element("r"), None).unwrap();
        assert_eq!(c, "<r>a\nb\nc&#xD;de\nf</r>");
    }

    #[test]
    fn enveloped_signature_is_removed() {
        let xml = r#"<factura id="comprobante">
  <a>1</a>
<ds:Signature xmlns:ds="urn:ds"><ds:x>y</ds:x></ds:Signature></factura>"#;
        let c = canonicalize(xml, Apex::Id("comprobante"), Some("ds:Signature")).unwrap();
        assert_eq!(c, "<factura id=\"comprobante\">\n  <a>1</a>\n</factura>");
    }

    #[test]
    fn cdata_and_comments() {
        let xml = "<r><!-- c --><![CDATA[<x>]]></r>";
        let c = canonicalize(xml, Apex::Element("r"), None).unwrap();
        assert_eq!(c, "<r>&lt;x&gt;</r>");
    }

    #[test]
    fn missing_apex_is_an_error() {
        assert!(canonicalize("<r></r>", Apex::Id("nope"), None).is_err());
    }
}
