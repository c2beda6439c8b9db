//! Error types for the SOAP gateway

use crate::fault;
use axum::response::{IntoResponse, Response};
use http::{header, StatusCode};
use soapgate_core::error::error_chain;
use soapgate_core::{SoapFault, XmlError};
use thiserror::Error;
use tracing::error;

/// Errors that end a request before it reaches the backend; backend errors
/// become faults through [`fault::soap_error`] so the header encoder sees them
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("find SOAP body: {0}")]
    FindBody(#[source] XmlError),

    #[error("decode {type_name}: {message}")]
    Decode { type_name: String, message: String },

    #[error("no input type for action {0:?}")]
    NotFound(String),

    #[error("request body larger than {0} bytes")]
    BodyTooLarge(usize),

    #[error("read request body: {0}")]
    ReadBody(String),
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;

impl GatewayError {
    /// HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self {
            GatewayError::FindBody(_)
            | GatewayError::Decode { .. }
            | GatewayError::NotFound(_)
            | GatewayError::ReadBody(_) => StatusCode::BAD_REQUEST,
            GatewayError::BodyTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
        }
    }

    /// Whether the client gets a SOAP fault rather than a plain text message
    pub fn is_fault(&self) -> bool {
        matches!(self, GatewayError::Decode { .. })
    }

    pub fn to_soap_fault(&self) -> SoapFault {
        SoapFault::new(self.status_code(), self.to_string()).with_detail(error_chain(self))
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        error!("Gateway error: {}", self);
        let status = self.status_code();
        if self.is_fault() {
            return fault::fault_response(status, &self.to_soap_fault(), None, None);
        }
        (
            status,
            [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
            self.to_string(),
        )
            .into_response()
    }
}
