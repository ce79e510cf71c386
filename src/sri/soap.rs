//! SOAP envelopes for the reception and authorization services, and the
//! classification of their responses.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, FixedOffset, NaiveDateTime, Utc};
use quick_xml::Reader;
use quick_xml::events::Event;

use crate::core::{AccessKey, FiscalError};
use crate::xml::writer::XmlWriter;

use super::response::{
    Authorization, AuthorizationResponse, AuthorityMessage, MessageKind, ReceptionResponse,
    SubmissionFailure,
};

pub const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
pub const RECEPTION_NS: &str = "http://ec.gob.sri.ws.recepcion";
pub const AUTHORIZATION_NS: &str = "http://ec.gob.sri.ws.autorizacion";

/// Offset applied to authorization dates that carry no zone.
const AUTHORITY_OFFSET_SECS: i32 = -5 * 3600;

fn envelope(
    service_ns: &str,
    operation: &str,
    body: impl FnOnce(&mut XmlWriter) -> Result<(), FiscalError>,
) -> Result<String, FiscalError> {
    let mut w = XmlWriter::with_indent(0)?;
    w.start_element_with_attrs(
        "soapenv:Envelope",
        &[("xmlns:soapenv", SOAP_ENV_NS), ("xmlns:ec", service_ns)],
    )?;
    w.text_element("soapenv:Header", "")?;
    w.start_element("soapenv:Body")?;
    w.start_element(operation)?;
    body(&mut w)?;
    w.end_element(operation)?;
    w.end_element("soapenv:Body")?;
    w.end_element("soapenv:Envelope")?;
    w.into_string()
}

/// `validarComprobante` request carrying the signed XML as base64.
pub fn reception_request(signed_xml: &[u8]) -> Result<String, FiscalError> {
    let payload = STANDARD.encode(signed_xml);
    envelope(RECEPTION_NS, "ec:validarComprobante", |w| {
        w.text_element("xml", &payload)?;
        Ok(())
    })
}

/// `autorizacionComprobante` request for one access key.
pub fn authorization_request(access_key: &AccessKey) -> Result<String, FiscalError> {
    envelope(AUTHORIZATION_NS, "ec:autorizacionComprobante", |w| {
        w.text_element("claveAccesoComprobante", access_key.as_str())?;
        Ok(())
    })
}

fn local_name(qname: &[u8]) -> String {
    let name = String::from_utf8_lossy(qname);
    match name.rsplit_once(':') {
        Some((_, local)) => local.to_string(),
        None => name.into_owned(),
    }
}

#[derive(Default)]
struct MessageDraft {
    code: String,
    message: String,
    additional_info: String,
    kind: String,
}

impl MessageDraft {
    fn finish(self) -> AuthorityMessage {
        let info = self.additional_info.trim();
        AuthorityMessage {
            code: self.code.trim().to_string(),
            message: self.message.trim().to_string(),
            additional_info: (!info.is_empty()).then(|| info.to_string()),
            kind: MessageKind::from_sri(&self.kind),
        }
    }
}

#[derive(Default)]
struct AuthorizationDraft {
    state: String,
    number: String,
    date: String,
    document: String,
    messages: Vec<AuthorityMessage>,
}

/// Everything the two responses can carry, collected in one pass.
#[derive(Default)]
struct Collected {
    fault: Option<String>,
    reception_state: Option<String>,
    messages: Vec<AuthorityMessage>,
    authorizations: Vec<AuthorizationDraft>,
    saw_authorization_response: bool,
}

fn collect(body: &str) -> Result<Collected, SubmissionFailure> {
    let mut reader = Reader::from_str(body);
    reader.config_mut().expand_empty_elements = true;

    let mut out = Collected::default();
    let mut path: Vec<String> = Vec::new();
    let mut message: Option<MessageDraft> = None;
    let mut authorization: Option<AuthorizationDraft> = None;
    let mut saw_envelope = false;

    loop {
        let event = reader
            .read_event()
            .map_err(|e| SubmissionFailure::MalformedResponse(format!("XML parse error: {e}")))?;
        match event {
            Event::Start(ref e) => {
                let name = local_name(e.name().as_ref());
                let parent = path.last().map(String::as_str);
                match name.as_str() {
                    "Envelope" => saw_envelope = true,
                    "RespuestaAutorizacionComprobante" => out.saw_authorization_response = true,
                    "autorizacion" if parent == Some("autorizaciones") => {
                        authorization = Some(AuthorizationDraft::default());
                    }
                    "mensaje" if parent == Some("mensajes") => {
                        message = Some(MessageDraft::default());
                    }
                    _ => {}
                }
                path.push(name);
            }
            Event::End(_) => {
                let name = path.pop().unwrap_or_default();
                let parent = path.last().map(String::as_str);
                match name.as_str() {
                    "mensaje" if parent == Some("mensajes") => {
                        if let Some(draft) = message.take() {
                            let finished = draft.finish();
                            match authorization.as_mut() {
                                Some(a) => a.messages.push(finished),
                                None => out.messages.push(finished),
                            }
                        }
                    }
                    "autorizacion" if parent == Some("autorizaciones") => {
                        if let Some(draft) = authorization.take() {
                            out.authorizations.push(draft);
                        }
                    }
                    _ => {}
                }
            }
            Event::Text(ref e) => {
                let text = e.unescape().map_err(|e| {
                    SubmissionFailure::MalformedResponse(format!("XML parse error: {e}"))
                })?;
                append_text(&path, &text, &mut out, message.as_mut(), authorization.as_mut());
            }
            Event::CData(ref e) => {
                let text = e.decode().map_err(|e| {
                    SubmissionFailure::MalformedResponse(format!("XML decode error: {e}"))
                })?;
                append_text(&path, &text, &mut out, message.as_mut(), authorization.as_mut());
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_envelope {
        return Err(SubmissionFailure::MalformedResponse("not a SOAP envelope".into()));
    }
    Ok(out)
}

fn append_text(
    path: &[String],
    text: &str,
    out: &mut Collected,
    message: Option<&mut MessageDraft>,
    authorization: Option<&mut AuthorizationDraft>,
) {
    let leaf = path.last().map(String::as_str).unwrap_or("");
    let parent = path.len().checked_sub(2).map(|i| path[i].as_str());

    if let Some(m) = message {
        match (parent, leaf) {
            (Some("mensaje"), "identificador") => m.code.push_str(text),
            (Some("mensaje"), "mensaje") => m.message.push_str(text),
            (Some("mensaje"), "informacionAdicional") => m.additional_info.push_str(text),
            (Some("mensaje"), "tipo") => m.kind.push_str(text),
            _ => {}
        }
        return;
    }

    if let Some(a) = authorization {
        if parent == Some("autorizacion") {
            match leaf {
                "estado" => a.state.push_str(text),
                "numeroAutorizacion" => a.number.push_str(text),
                "fechaAutorizacion" => a.date.push_str(text),
                "comprobante" => a.document.push_str(text),
                _ => {}
            }
        }
        return;
    }

    match (parent, leaf) {
        (Some("RespuestaRecepcionComprobante"), "estado") => {
            out.reception_state.get_or_insert_with(String::new).push_str(text);
        }
        (Some("Fault"), "faultstring") => {
            out.fault.get_or_insert_with(String::new).push_str(text);
        }
        _ => {}
    }
}

/// Classify the body of a `validarComprobante` response.
pub fn parse_reception_response(body: &str) -> Result<ReceptionResponse, SubmissionFailure> {
    let collected = collect(body)?;
    if let Some(fault) = collected.fault {
        return Err(SubmissionFailure::MalformedResponse(format!(
            "SOAP fault: {}",
            fault.trim()
        )));
    }
    let state = collected.reception_state.ok_or_else(|| {
        SubmissionFailure::MalformedResponse("reception response without estado".into())
    })?;
    match state.trim() {
        "RECIBIDA" => Ok(ReceptionResponse::Received),
        "DEVUELTA" => Ok(ReceptionResponse::Returned(collected.messages)),
        other => Err(SubmissionFailure::MalformedResponse(format!(
            "unknown reception state {other:?}"
        ))),
    }
}

/// Classify the body of an `autorizacionComprobante` response.
///
/// When the Authority lists several authorization attempts, a granted one
/// wins; otherwise the first listed attempt decides.
pub fn parse_authorization_response(
    body: &str,
) -> Result<AuthorizationResponse, SubmissionFailure> {
    let collected = collect(body)?;
    if let Some(fault) = collected.fault {
        return Err(SubmissionFailure::MalformedResponse(format!(
            "SOAP fault: {}",
            fault.trim()
        )));
    }
    if !collected.saw_authorization_response {
        return Err(SubmissionFailure::MalformedResponse(
            "missing RespuestaAutorizacionComprobante".into(),
        ));
    }

    let mut attempts = collected.authorizations;
    let chosen = match attempts.iter().position(|a| a.state.trim() == "AUTORIZADO") {
        Some(i) => attempts.swap_remove(i),
        None if attempts.is_empty() => return Ok(AuthorizationResponse::Processing),
        None => attempts.swap_remove(0),
    };

    match chosen.state.trim() {
        "AUTORIZADO" => {
            let authorized_at = parse_authorization_date(&chosen.date)?;
            let number = chosen.number.trim().to_string();
            if number.is_empty() {
                return Err(SubmissionFailure::MalformedResponse(
                    "authorized without numeroAutorizacion".into(),
                ));
            }
            let document = chosen.document.trim();
            Ok(AuthorizationResponse::Authorized(Authorization {
                number,
                authorized_at,
                document: (!document.is_empty()).then(|| document.to_string()),
                messages: chosen.messages,
            }))
        }
        "NO AUTORIZADO" => Ok(AuthorizationResponse::NotAuthorized(chosen.messages)),
        "EN PROCESAMIENTO" | "EN PROCESO" | "PROCESAMIENTO" => {
            Ok(AuthorizationResponse::Processing)
        }
        other => Err(SubmissionFailure::MalformedResponse(format!(
            "unknown authorization state {other:?}"
        ))),
    }
}

/// Parse `fechaAutorizacion`: RFC 3339, or `dd/MM/yyyy HH:mm:ss` in the
/// Authority's local time.
pub fn parse_authorization_date(value: &str) -> Result<DateTime<Utc>, SubmissionFailure> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(dt.with_timezone(&Utc));
    }
    let local = NaiveDateTime::parse_from_str(value, "%d/%m/%Y %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f"))
        .map_err(|_| {
            SubmissionFailure::MalformedResponse(format!("unrecognized date {value:?}"))
        })?;
    let offset = FixedOffset::east_opt(AUTHORITY_OFFSET_SECS)
        .ok_or_else(|| SubmissionFailure::MalformedResponse("invalid offset".into()))?;
    local
        .and_local_timezone(offset)
        .single()
        .map(|dt| dt.with_timezone(&Utc))
        .ok_or_else(|| SubmissionFailure::MalformedResponse(format!("ambiguous date {value:?}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const RETURNED: &str = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body><ns2:validarComprobanteResponse xmlns:ns2="http://ec.gob.sri.ws.recepcion"><RespuestaRecepcionComprobante><estado>DEVUELTA</estado><comprobantes><comprobante><claveAcceso>0103</claveAcceso><mensajes><mensaje><identificador>43</identificador><mensaje>CLAVE ACCESO REGISTRADA</mensaje><informacionAdicional>La clave ya fue registrada</informacionAdicional><tipo>ERROR</tipo></mensaje></mensajes></comprobante></comprobantes></RespuestaRecepcionComprobante></ns2:validarComprobanteResponse></soap:Body></soap:Envelope>"#;

    #[test]
    fn reception_envelope_carries_base64_payload() {
        let env = reception_request(b"<factura/>").unwrap();
        assert!(env.contains("<ec:validarComprobante>"));
        assert!(env.contains("<xml>PGZhY3R1cmEvPg==</xml>"));
        assert!(env.contains("xmlns:ec=\"http://ec.gob.sri.ws.recepcion\""));
    }

    #[test]
    fn returned_reception_messages() {
        let ReceptionResponse::Returned(msgs) = parse_reception_response(RETURNED).unwrap() else {
            panic!("expected DEVUELTA");
        };
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0].code, "43");
        assert_eq!(msgs[0].message, "CLAVE ACCESO REGISTRADA");
        assert_eq!(msgs[0].additional_info.as_deref(), Some("La clave ya fue registrada"));
        assert_eq!(msgs[0].kind, MessageKind::Error);
    }

    #[test]
    fn received_and_garbage() {
        let ok = RETURNED.replace("DEVUELTA", "RECIBIDA");
        assert_eq!(parse_reception_response(&ok).unwrap(), ReceptionResponse::Received);
        assert!(matches!(
            parse_reception_response("<html>502</html>"),
            Err(SubmissionFailure::MalformedResponse(_))
        ));
    }

    #[test]
    fn authorization_dates() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 15, 15, 30).unwrap();
        assert_eq!(parse_authorization_date("2024-03-01T10:15:30-05:00").unwrap(), expected);
        assert_eq!(parse_authorization_date("01/03/2024 10:15:30").unwrap(), expected);
        assert!(parse_authorization_date("yesterday").is_err());
    }

    #[test]
    fn empty_authorizations_mean_processing() {
        let body = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body><ns2:autorizacionComprobanteResponse xmlns:ns2="http://ec.gob.sri.ws.autorizacion"><RespuestaAutorizacionComprobante><claveAccesoConsultada>0103</claveAccesoConsultada><numeroComprobantes>0</numeroComprobantes><autorizaciones/></RespuestaAutorizacionComprobante></ns2:autorizacionComprobanteResponse></soap:Body></soap:Envelope>"#;
        assert_eq!(
            parse_authorization_response(body).unwrap(),
            AuthorizationResponse::Processing
        );
    }

    #[test]
    fn soap_fault_is_malformed() {
        let body = r#"<soap:Envelope xmlns:soap="http://schemas.xmlsoap.org/soap/envelope/"><soap:Body><soap:Fault><faultcode>soap:Server</faultcode><faultstring>Internal error</faultstring></soap:Fault></soap:Body></soap:Envelope>"#;
        let err = parse_authorization_response(body).unwrap_err();
        assert_eq!(
            err,
            SubmissionFailure::MalformedResponse("SOAP fault: Internal error".into())
        );
    }
}
