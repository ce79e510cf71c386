//! Client for the Authority's offline web services: reception
//! (`validarComprobante`) and authorization (`autorizacionComprobante`).
//!
//! # Example
//!
//! ```ignore
//! use comprobantes::sri::*;
//!
//! let client = SriClient::new(&SriConfig::from_file("sri.toml".as_ref())?)?;
//! match client.submit(&signed_xml).await {
//!     Ok(ReceptionResponse::Received) => {}
//!     Ok(ReceptionResponse::Returned(messages)) => eprintln!("{messages:?}"),
//!     Err(failure) => eprintln!("try again later: {failure}"),
//! }
//! ```

mod client;
mod config;
mod response;
mod soap;

pub use client::SriClient;
pub use config::SriConfig;
pub use response::{
    Authorization, AuthorizationResponse, AuthorityMessage, MessageKind, ReceptionResponse,
    SubmissionFailure,
};
pub use soap::{
    AUTHORIZATION_NS, RECEPTION_NS, SOAP_ENV_NS, authorization_request,
    parse_authorization_date, parse_authorization_response, parse_reception_response,
    reception_request,
};
