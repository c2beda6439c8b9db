//! Outbound SOAP client for the soapgate gateway.
//!
//! This crate provides:
//! - Envelope building around a caller-supplied header and body
//! - Retries with bounded exponential backoff for transport failures
//! - Size-capped, transparently decompressed response reading
//! - Decoding of the SOAP body payload into serde types

pub mod client;
pub mod error;
pub mod retry;

pub use client::{body_payload, decode_body, ClientConfig, HttpProtocol, SoapCall, SoapClient, SoapClientBuilder};
pub use error::{ClientError, ClientResult};
pub use retry::RetryPolicy;
