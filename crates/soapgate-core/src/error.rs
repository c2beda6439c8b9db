//! Error types and the SOAP Fault model.

use crate::envelope::ENV_PREFIX;
use http::StatusCode;
use quick_xml::escape::escape;
use std::fmt;

/// Errors raised while scanning XML
#[derive(Debug, thiserror::Error)]
pub enum XmlError {
    #[error("XML syntax error: {0}")]
    Syntax(#[from] quick_xml::Error),

    #[error("SOAP body not found")]
    BodyNotFound,

    #[error("no element inside {0}")]
    NoElement(String),

    #[error("invalid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Standard SOAP 1.1 fault code suffixes
const STANDARD_FAULT_CODES: [&str; 4] = ["VersionMismatch", "MustUnderstand", "Client", "Server"];

/// Whether `code` belongs to the SOAP 1.1 fault-code vocabulary.
pub fn is_standard_fault_code(code: &str) -> bool {
    STANDARD_FAULT_CODES.iter().any(|suffix| code.ends_with(suffix))
}

/// SOAP 1.1 Fault payload together with the HTTP status it is sent with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapFault {
    /// HTTP status code
    pub status: u16,

    /// `faultcode`, e.g. `SOAP-ENV:Server`
    pub code: String,

    /// `faultstring`, the error message
    pub string: String,

    /// Full formatted error placed under `detail/ExceptionDetail`
    pub detail: Option<String>,
}

impl SoapFault {
    /// Create a fault for the given status; the fault code is `Client` below
    /// 500 and `Server` otherwise.
    pub fn new(status: StatusCode, string: impl Into<String>) -> Self {
        let side = if status.as_u16() < 500 { "Client" } else { "Server" };
        Self {
            status: status.as_u16(),
            code: format!("{}:{}", ENV_PREFIX, side),
            string: string.into(),
            detail: None,
        }
    }

    /// Replace the fault code
    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = code.into();
        self
    }

    /// Set the detail field
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// HTTP status, falling back to 500 for out-of-range values
    pub fn status_code(&self) -> StatusCode {
        StatusCode::from_u16(self.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }

    /// Append the `<SOAP-ENV:Fault>` element to `out`
    pub fn write_xml(&self, out: &mut Vec<u8>) {
        let detail = self.detail.as_deref().unwrap_or(&self.string);
        out.extend_from_slice(b"\n<");
        out.extend_from_slice(ENV_PREFIX.as_bytes());
        out.extend_from_slice(b":Fault>\n<faultcode>");
        out.extend_from_slice(escape(self.code.as_str()).as_bytes());
        out.extend_from_slice(b"</faultcode>\n<faultstring>");
        out.extend_from_slice(escape(self.string.as_str()).as_bytes());
        out.extend_from_slice(b"</faultstring>\n<detail><ExceptionDetail>");
        out.extend_from_slice(escape(detail).as_bytes());
        out.extend_from_slice(b"</ExceptionDetail></detail>\n</");
        out.extend_from_slice(ENV_PREFIX.as_bytes());
        out.extend_from_slice(b":Fault>\n");
    }

    /// The `<SOAP-ENV:Fault>` element as a string
    pub fn to_xml(&self) -> String {
        let mut out = Vec::with_capacity(256);
        self.write_xml(&mut out);
        String::from_utf8_lossy(&out).into_owned()
    }
}

impl fmt::Display for SoapFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.status, self.code, self.string)
    }
}

/// Format an error together with its `source()` chain, outermost first.
pub fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut text = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        let cause_text = cause.to_string();
        if !text.ends_with(&cause_text) {
            text.push_str(": ");
            text.push_str(&cause_text);
        }
        source = cause.source();
    }
    text
}
