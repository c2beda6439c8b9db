//! Core types and utilities for the soapgate SOAP gateway.
//!
//! This crate provides the foundation shared by the gateway and the client:
//! - SOAP envelope constants and the SOAP Fault model
//! - XML token helpers (locating the SOAP body/header, element spans)
//! - Empty-tag filtering for legacy SOAP peers
//! - Encoding of generic value trees as XML elements
//! - A reusable byte buffer pool

pub mod duration;
pub mod envelope;
pub mod error;
pub mod filter;
pub mod gzb64;
pub mod pool;
pub mod value;
pub mod xml;

pub use error::{SoapFault, XmlError};
pub use filter::filter_empty_tags;
pub use gzb64::ungzb64;
pub use pool::{BufferPool, PooledBuffer};
pub use xml::{find_body, find_header, find_soap_body, find_start, next_start, split_outer, StartTag};
