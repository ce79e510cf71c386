use reqwest::header::CONTENT_TYPE;

use crate::core::{AccessKey, FiscalError};

use super::config::SriConfig;
use super::response::{AuthorizationResponse, ReceptionResponse, SubmissionFailure};
use super::soap;

/// Longest response body kept in an HTTP failure.
const MAX_ERROR_BODY: usize = 512;

/// HTTP client for the Authority's reception and authorization services.
///
/// Each call is a single request; nothing is retried here. Failures are
/// returned as [`SubmissionFailure`] and never as raw transport errors.
#[derive(Debug, Clone)]
pub struct SriClient {
    http: reqwest::Client,
    reception_url: String,
    authorization_url: String,
}

impl SriClient {
    pub fn new(config: &SriConfig) -> Result<Self, FiscalError> {
        let http = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.request_timeout())
            .build()
            .map_err(|e| FiscalError::Config(format!("cannot build HTTP client: {e}")))?;
        Ok(Self {
            http,
            reception_url: config.reception_url(),
            authorization_url: config.authorization_url(),
        })
    }

    /// Send a signed document to the reception service.
    pub async fn submit(&self, signed_xml: &[u8]) -> Result<ReceptionResponse, SubmissionFailure> {
        let envelope = soap::reception_request(signed_xml)
            .map_err(|e| SubmissionFailure::Transport(format!("cannot build request: {e}")))?;
        let body = self.post(&self.reception_url, envelope).await?;
        let response = soap::parse_reception_response(&body)?;
        match &response {
            ReceptionResponse::Received => tracing::info!("document received by the Authority"),
            ReceptionResponse::Returned(messages) => tracing::warn!(
                messages = messages.len(),
                "document returned by the Authority"
            ),
        }
        Ok(response)
    }

    /// Ask for the authorization verdict of a previously submitted document.
    pub async fn check_authorization(
        &self,
        access_key: &AccessKey,
    ) -> Result<AuthorizationResponse, SubmissionFailure> {
        let envelope = soap::authorization_request(access_key)
            .map_err(|e| SubmissionFailure::Transport(format!("cannot build request: {e}")))?;
        let body = self.post(&self.authorization_url, envelope).await?;
        let response = soap::parse_authorization_response(&body)?;
        tracing::info!(
            access_key = access_key.as_str(),
            state = match &response {
                AuthorizationResponse::Processing => "EN PROCESAMIENTO",
                AuthorizationResponse::Authorized(_) => "AUTORIZADO",
                AuthorizationResponse::NotAuthorized(_) => "NO AUTORIZADO",
            },
            "authorization checked"
        );
        Ok(response)
    }

    async fn post(&self, url: &str, envelope: String) -> Result<String, SubmissionFailure> {
        tracing::debug!(url, bytes = envelope.len(), "posting SOAP request");
        let resp = self
            .http
            .post(url)
            .header(CONTENT_TYPE, "text/xml; charset=utf-8")
            .header("SOAPAction", "")
            .body(envelope)
            .send()
            .await
            .map_err(classify)?;

        let status = resp.status();
        let body = resp.text().await.map_err(classify)?;

        if !status.is_success() {
            // SOAP faults arrive as HTTP 500 with a readable body.
            if let Err(SubmissionFailure::MalformedResponse(fault)) =
                soap::parse_reception_response(&body)
            {
                if fault.starts_with("SOAP fault") {
                    return Err(SubmissionFailure::MalformedResponse(fault));
                }
            }
            let mut body = body;
            if body.len() > MAX_ERROR_BODY {
                let mut cut = MAX_ERROR_BODY;
                while !body.is_char_boundary(cut) {
                    cut -= 1;
                }
                body.truncate(cut);
            }
            tracing::warn!(url, status = status.as_u16(), "Authority answered with an error status");
            return Err(SubmissionFailure::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }
}

fn classify(e: reqwest::Error) -> SubmissionFailure {
    if e.is_timeout() {
        SubmissionFailure::Timeout
    } else {
        SubmissionFailure::Transport(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Environment;

    #[test]
    fn client_uses_configured_endpoints() {
        let config = SriConfig {
            environment: Environment::Production,
            reception_url: Some("http://127.0.0.1:9/recepcion".into()),
            ..SriConfig::default()
        };
        let client = SriClient::new(&config).unwrap();
        assert_eq!(client.reception_url, "http://127.0.0.1:9/recepcion");
        assert!(client.authorization_url.starts_with("https://cel.sri.gob.ec/"));
    }
}
