//! SOAP gateway for typed RPC backends.
//!
//! This crate accepts SOAP/XML requests over HTTP and forwards them to a
//! [`Backend`]:
//! - WSDL served on GET, per-action annotations read from it
//! - Request decoding in standard, raw XML and custom hook modes
//! - Streaming response encoding that merges the repeated fields of
//!   multi-message responses through compressed spill files
//! - SOAP Fault responses with HTTP statuses derived from backend errors

pub mod annotation;
pub mod backend;
pub mod config;
pub mod decode;
pub mod encode;
pub mod error;
pub mod fault;
pub mod gateway;
pub mod message;
pub mod spill;

pub use annotation::{Annotation, Annotations};
pub use backend::{
    Backend, BackendError, BasicAuth, BoxError, CallContext, EncodeHeaderFn, HeaderDecoder, InputDecoder,
    MessageStream, OutputEncoder, RpcCode,
};
pub use config::GatewayConfig;
pub use decode::{trim_input, RequestDecoder, RequestInfo};
pub use encode::{OutputStrategy, Prefetched, ResponseEncoder};
pub use error::{GatewayError, GatewayResult};
pub use gateway::{SoapGateway, SoapGatewayBuilder};
pub use message::{BoxMessage, DynMessage, FieldDescriptor, FieldRole, SoapMessage};
