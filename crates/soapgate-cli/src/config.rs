//! Configuration file of the binary

use anyhow::{Context, Result};
use serde::Deserialize;
use soapgate_client::ClientConfig;
use soapgate_server::GatewayConfig;
use std::path::Path;
use tracing::debug;

/// Contents of the `--config` TOML file; missing tables keep their defaults
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub gateway: GatewayConfig,
    pub client: ClientConfig,
}

impl FileConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            debug!("no config file, using defaults");
            return Ok(Self::default());
        };
        let text = std::fs::read_to_string(path).with_context(|| format!("read config {}", path.display()))?;
        let config = Self::parse(&text).with_context(|| format!("parse config {}", path.display()))?;
        debug!(path = %path.display(), ?config, "loaded config");
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;

    #[test]
    fn test_parse_tables() {
        let config = FileConfig::parse(
            r#"
            [gateway]
            path = "/soap"
            call_timeout = 5000
            locations = ["http://gw:8080/soap"]

            [client]
            max_response_size = 1024

            [client.retry]
            max_attempts = 4
            "#,
        )
        .unwrap();
        assert_eq!(config.gateway.path, "/soap");
        assert_eq!(config.gateway.call_timeout, Duration::from_secs(5));
        assert_eq!(config.gateway.locations, vec!["http://gw:8080/soap".to_string()]);
        assert_eq!(config.client.max_response_size, 1024);
        assert_eq!(config.client.retry.max_attempts, Some(4));
    }

    #[test]
    fn test_missing_tables_default() {
        let config = FileConfig::parse("").unwrap();
        assert_eq!(config.gateway.path, "/");
        assert_eq!(config.client.max_response_size, 16 << 20);
    }

    #[test]
    fn test_load_file() {
        assert!(FileConfig::load(None).is_ok());

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[gateway]\nmerge = false").unwrap();
        let config = FileConfig::load(Some(file.path())).unwrap();
        assert!(!config.gateway.merge);

        let err = FileConfig::load(Some(Path::new("/nonexistent/soapgate.toml"))).unwrap_err();
        assert!(format!("{:#}", err).contains("read config"));
    }
}
