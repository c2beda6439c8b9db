//! The RPC backend the gateway forwards calls to, and the optional hooks that
//! customize header, input and output handling.

use crate::message::{BoxMessage, DynMessage};
use base64::Engine;
use futures_util::Stream;
use http::HeaderMap;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Response messages of one call; `None` ends the stream
pub type MessageStream = Pin<Box<dyn Stream<Item = Result<BoxMessage, BackendError>> + Send>>;

/// RPC status codes, numbered as in gRPC
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RpcCode {
    Ok = 0,
    Cancelled = 1,
    Unknown = 2,
    InvalidArgument = 3,
    DeadlineExceeded = 4,
    NotFound = 5,
    AlreadyExists = 6,
    PermissionDenied = 7,
    ResourceExhausted = 8,
    FailedPrecondition = 9,
    Aborted = 10,
    OutOfRange = 11,
    Unimplemented = 12,
    Internal = 13,
    Unavailable = 14,
    DataLoss = 15,
    Unauthenticated = 16,
}

impl RpcCode {
    /// Unrecognized codes map to `Unknown`
    pub fn from_i32(code: i32) -> Self {
        match code {
            0 => RpcCode::Ok,
            1 => RpcCode::Cancelled,
            3 => RpcCode::InvalidArgument,
            4 => RpcCode::DeadlineExceeded,
            5 => RpcCode::NotFound,
            6 => RpcCode::AlreadyExists,
            7 => RpcCode::PermissionDenied,
            8 => RpcCode::ResourceExhausted,
            9 => RpcCode::FailedPrecondition,
            10 => RpcCode::Aborted,
            11 => RpcCode::OutOfRange,
            12 => RpcCode::Unimplemented,
            13 => RpcCode::Internal,
            14 => RpcCode::Unavailable,
            15 => RpcCode::DataLoss,
            16 => RpcCode::Unauthenticated,
            _ => RpcCode::Unknown,
        }
    }

    pub fn as_i32(self) -> i32 {
        self as i32
    }
}

/// Errors of a backend call or of its response stream
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("{message}")]
    Status { code: RpcCode, message: String },

    /// An error that already knows its HTTP status
    #[error("{message}")]
    Http { status: u16, message: String },

    /// An error that already is a SOAP fault
    #[error("{string}")]
    Fault { code: String, string: String },

    #[error("call cancelled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error(transparent)]
    Other(#[from] BoxError),
}

impl BackendError {
    pub fn status(code: RpcCode, message: impl Into<String>) -> Self {
        BackendError::Status { code, message: message.into() }
    }

    pub fn http(status: u16, message: impl Into<String>) -> Self {
        BackendError::Http { status, message: message.into() }
    }

    pub fn fault(code: impl Into<String>, string: impl Into<String>) -> Self {
        BackendError::Fault { code: code.into(), string: string.into() }
    }

    pub fn other(err: impl Into<BoxError>) -> Self {
        BackendError::Other(err.into())
    }

    /// RPC status code, when the error carries one
    pub fn code(&self) -> Option<RpcCode> {
        match self {
            BackendError::Status { code, .. } => Some(*code),
            BackendError::Cancelled => Some(RpcCode::Cancelled),
            BackendError::DeadlineExceeded => Some(RpcCode::DeadlineExceeded),
            _ => None,
        }
    }
}

/// HTTP Basic credentials of the inbound request
#[derive(Clone, PartialEq, Eq)]
pub struct BasicAuth {
    pub username: String,
    pub password: String,
}

impl BasicAuth {
    /// Parse the `Authorization: Basic ...` header, if present and well formed
    pub fn from_headers(headers: &HeaderMap) -> Option<Self> {
        let value = headers.get(http::header::AUTHORIZATION)?.to_str().ok()?;
        let encoded = value.strip_prefix("Basic ")?;
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(encoded.trim())
            .ok()?;
        let decoded = String::from_utf8(decoded).ok()?;
        let (username, password) = decoded.split_once(':')?;
        Some(Self {
            username: username.to_string(),
            password: password.to_string(),
        })
    }
}

impl fmt::Debug for BasicAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BasicAuth")
            .field("username", &self.username)
            .field("password", &"***")
            .finish()
    }
}

/// Per-call context handed to the backend
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    /// Normalized action
    pub action: String,
    /// `SOAPAction` header as received, without quotes
    pub soap_action: String,
    pub auth: Option<BasicAuth>,
    pub deadline: Option<Instant>,
    /// Values extracted from the SOAP header
    pub metadata: HashMap<String, String>,
}

/// The RPC service behind the gateway
pub trait Backend: Send + Sync + 'static {
    /// A fresh input value for `action`, `None` if the action is unknown
    fn input(&self, action: &str) -> Option<BoxMessage>;

    /// Invoke `action`. The returned stream is pulled lazily; dropping it
    /// cancels the call.
    fn call(
        &self,
        action: &str,
        ctx: CallContext,
        input: BoxMessage,
    ) -> impl Future<Output = Result<MessageStream, BackendError>> + Send;
}

/// Writes the response's SOAP header content; receives the first error of the
/// response stream, if any.
pub type EncodeHeaderFn =
    Box<dyn FnOnce(&mut Vec<u8>, Option<&BackendError>) -> Result<(), BoxError> + Send + Sync>;

/// Decodes the inbound SOAP header
pub trait HeaderDecoder: Send + Sync + 'static {
    /// `header` is the content of the SOAP `Header` element. The returned
    /// closure is run when the response header block is written.
    fn decode_header(&self, header: &str, ctx: &mut CallContext) -> Result<EncodeHeaderFn, BoxError>;
}

/// Replaces the standard XML decoding of input elements
pub trait InputDecoder: Send + Sync + 'static {
    fn decode_input(&self, action: &str, element: &str, input: &mut dyn DynMessage) -> Result<(), BoxError>;
}

/// Replaces the standard XML encoding of output messages
pub trait OutputEncoder: Send + Sync + 'static {
    fn encode_output(&self, out: &mut Vec<u8>, action: &str, message: &dyn DynMessage) -> Result<(), BoxError>;
}
