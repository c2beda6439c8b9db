//! Gateway configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Gateway settings; every field has a default, so a partial TOML table is
/// enough.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Service path; GET returns the WSDL, other methods are SOAP calls
    pub path: String,
    /// Largest accepted request body in bytes
    pub max_body_size: usize,
    /// Deadline for a backend call, including its response stream
    #[serde(with = "soapgate_core::duration::millis")]
    pub call_timeout: Duration,
    /// Directory for spill files; the system temp dir when unset
    pub spill_dir: Option<PathBuf>,
    /// zstd level of spill files
    pub spill_compression_level: i32,
    /// Merge repeated fields of multi-message responses
    pub merge: bool,
    /// Service addresses written into the WSDL's last `port`
    pub locations: Vec<String>,
    /// Capacity of the encode buffer pool
    pub pooled_buffers: usize,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            path: "/".to_string(),
            max_body_size: 1 << 20,
            call_timeout: Duration::from_secs(60),
            spill_dir: None,
            spill_compression_level: 3,
            merge: true,
            locations: Vec::new(),
            pooled_buffers: 64,
        }
    }
}
