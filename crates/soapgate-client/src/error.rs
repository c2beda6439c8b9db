//! Client error type

use http::StatusCode;
use soapgate_core::XmlError;

/// Errors of an outbound SOAP call
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Connection-level failure; the only kind of error that is retried
    #[error("transport error: {0}")]
    Transport(String),

    /// The peer answered with an HTTP error status
    #[error("{status}: {body}")]
    Status { status: StatusCode, body: String },

    #[error("read response: {0}")]
    ReadBody(String),

    #[error("response larger than {0} bytes")]
    ResponseTooLarge(usize),

    #[error("decompress response: {0}")]
    Decompress(#[source] std::io::Error),

    #[error("find SOAP body: {0}")]
    FindBody(#[source] XmlError),

    #[error("decode response: {0}")]
    Decode(#[from] quick_xml::DeError),

    #[error("deadline exceeded")]
    DeadlineExceeded,
}

impl ClientError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Transport(_))
    }

    /// HTTP status returned by the peer, if it answered with an error status
    pub fn status_code(&self) -> Option<StatusCode> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type ClientResult<T> = Result<T, ClientError>;
