//! Mapping of errors to SOAP faults and HTTP statuses.

use crate::backend::{BackendError, EncodeHeaderFn, RpcCode};
use axum::body::Body;
use axum::response::{IntoResponse, Response};
use http::{header, StatusCode};
use soapgate_core::envelope::{BODY_START, CONTENT_TYPE, ENVELOPE_END, ENVELOPE_START, HEADER_END, HEADER_START};
use soapgate_core::error::{error_chain, is_standard_fault_code};
use soapgate_core::SoapFault;
use tracing::warn;

/// Backend message treated as an authentication failure
const BAD_CREDENTIALS: &str = "bad username or password";

/// HTTP status for a backend error
pub fn status_for(err: &BackendError) -> StatusCode {
    match err {
        BackendError::Http { status, .. } => {
            StatusCode::from_u16(*status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
        }
        BackendError::Cancelled => StatusCode::FAILED_DEPENDENCY,
        BackendError::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        BackendError::Status { code, message } => match code {
            RpcCode::Cancelled => StatusCode::FAILED_DEPENDENCY,
            RpcCode::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            RpcCode::PermissionDenied | RpcCode::Unauthenticated => StatusCode::UNAUTHORIZED,
            RpcCode::Unknown if message == BAD_CREDENTIALS => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        },
        BackendError::Fault { .. } | BackendError::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// SOAP fault for a backend error
pub fn classify(err: &BackendError) -> SoapFault {
    let status = status_for(err);
    let fault = match err {
        BackendError::Fault { code, string } if is_standard_fault_code(code) => {
            SoapFault::new(status, string.clone()).with_code(code.clone())
        }
        _ => SoapFault::new(status, err.to_string()),
    };
    fault.with_detail(error_chain(err))
}

/// Append `fault` to `out`: the bare `Fault` element with `inner_only`, a
/// whole envelope otherwise.
pub fn encode_soap_fault(out: &mut Vec<u8>, fault: &SoapFault, inner_only: bool) {
    if inner_only {
        fault.write_xml(out);
        return;
    }
    write_fault_document(out, fault, None, None);
}

/// Run a header encoder between the envelope's header tags. A failing
/// encoder leaves an empty header block.
pub fn write_header_block(out: &mut Vec<u8>, encode: EncodeHeaderFn, err: Option<&BackendError>) {
    let start = out.len();
    out.extend_from_slice(HEADER_START.as_bytes());
    if let Err(e) = encode(out, err) {
        warn!("encode SOAP header: {}", e);
        out.truncate(start);
        out.extend_from_slice(HEADER_START.as_bytes());
    }
    out.extend_from_slice(HEADER_END.as_bytes());
}

/// A complete envelope with `fault` as its body
pub fn write_fault_document(
    out: &mut Vec<u8>,
    fault: &SoapFault,
    encode_header: Option<EncodeHeaderFn>,
    err: Option<&BackendError>,
) {
    out.extend_from_slice(ENVELOPE_START.as_bytes());
    if let Some(encode) = encode_header {
        write_header_block(out, encode, err);
    }
    out.extend_from_slice(BODY_START.as_bytes());
    fault.write_xml(out);
    out.extend_from_slice(ENVELOPE_END.as_bytes());
}

/// A fault response sent with `status`
pub fn fault_response(
    status: StatusCode,
    fault: &SoapFault,
    encode_header: Option<EncodeHeaderFn>,
    err: Option<&BackendError>,
) -> Response {
    let mut out = Vec::with_capacity(512);
    write_fault_document(&mut out, fault, encode_header, err);
    (status, [(header::CONTENT_TYPE, CONTENT_TYPE)], Body::from(out)).into_response()
}

/// Respond to a failed backend call
pub fn soap_error(err: &BackendError, encode_header: Option<EncodeHeaderFn>) -> Response {
    let fault = classify(err);
    fault_response(fault.status_code(), &fault, encode_header, Some(err))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BoxError;
    use std::io;

    #[test]
    fn test_status_mapping() {
        assert_eq!(status_for(&BackendError::http(404, "gone")), StatusCode::NOT_FOUND);
        assert_eq!(status_for(&BackendError::http(1000, "bogus")), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(status_for(&BackendError::Cancelled), StatusCode::FAILED_DEPENDENCY);
        assert_eq!(status_for(&BackendError::DeadlineExceeded), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            status_for(&BackendError::status(RpcCode::PermissionDenied, "no")),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(&BackendError::status(RpcCode::Unknown, "bad username or password")),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_for(&BackendError::status(RpcCode::Unknown, "something else")),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_for(&BackendError::other(io::Error::new(io::ErrorKind::Other, "disk"))),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_standard_fault_code_is_kept() {
        let fault = classify(&BackendError::fault("ns:Client", "bad input"));
        assert_eq!(fault.code, "ns:Client");
        assert_eq!(fault.string, "bad input");
        assert_eq!(fault.status, 500);

        let fault = classify(&BackendError::fault("ns:Custom", "odd"));
        assert_eq!(fault.code, "SOAP-ENV:Server");
    }

    #[test]
    fn test_synthesized_fault_code() {
        assert_eq!(classify(&BackendError::http(400, "x")).code, "SOAP-ENV:Client");
        assert_eq!(classify(&BackendError::http(503, "x")).code, "SOAP-ENV:Server");
    }

    #[test]
    fn test_detail_has_cause_chain() {
        #[derive(Debug, thiserror::Error)]
        #[error("lookup failed")]
        struct Outer(#[source] io::Error);

        let err = BackendError::other(Outer(io::Error::new(io::ErrorKind::Other, "connection reset")));
        let fault = classify(&err);
        assert_eq!(fault.string, "lookup failed");
        assert_eq!(fault.detail.as_deref(), Some("lookup failed: connection reset"));
    }

    #[test]
    fn test_fault_document() {
        let fault = classify(&BackendError::status(RpcCode::Internal, "boom"));
        let mut out = Vec::new();
        let header: EncodeHeaderFn = Box::new(|out: &mut Vec<u8>, err: Option<&BackendError>| -> Result<(), BoxError> {
            let text = format!("<Failed>{}</Failed>", err.is_some());
            out.extend_from_slice(text.as_bytes());
            Ok(())
        });
        let err = BackendError::status(RpcCode::Internal, "boom");
        write_fault_document(&mut out, &fault, Some(header), Some(&err));
        let doc = String::from_utf8(out).unwrap();
        assert!(doc.starts_with(ENVELOPE_START));
        assert!(doc.contains("<SOAP-ENV:Header><Failed>true</Failed></SOAP-ENV:Header>"));
        assert!(doc.contains("<faultstring>boom</faultstring>"));
        assert!(doc.ends_with(ENVELOPE_END));
    }

    #[test]
    fn test_failing_header_encoder() {
        let mut out = Vec::new();
        let header: EncodeHeaderFn = Box::new(|out: &mut Vec<u8>, _: Option<&BackendError>| -> Result<(), BoxError> {
            out.extend_from_slice(b"<partial");
            Err("no session".into())
        });
        write_header_block(&mut out, header, None);
        assert_eq!(String::from_utf8(out).unwrap(), format!("{}{}", HEADER_START, HEADER_END));
    }

    #[test]
    fn test_inner_only() {
        let fault = classify(&BackendError::Cancelled);
        let mut out = Vec::new();
        encode_soap_fault(&mut out, &fault, true);
        let xml = String::from_utf8(out).unwrap();
        assert!(xml.trim_start().starts_with("<SOAP-ENV:Fault>"));
        assert!(!xml.contains("Envelope"));
    }
}
