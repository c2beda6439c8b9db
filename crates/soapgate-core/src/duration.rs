//! Serde helpers for [`Duration`] fields in configuration files.
//!
//! Durations are written as integer milliseconds, e.g. `call_timeout = 60000`.

use serde::{Deserialize, Deserializer, Serializer};
use std::time::Duration;

pub mod millis {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// Same as [`millis`] for optional fields
pub mod option_millis {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&(d.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Timeouts {
        #[serde(with = "super::millis")]
        call: Duration,
        #[serde(with = "super::option_millis", default)]
        idle: Option<Duration>,
    }

    #[test]
    fn test_millis_from_toml() {
        let t: Timeouts = toml::from_str("call = 1500").unwrap();
        assert_eq!(t.call, Duration::from_millis(1500));
        assert_eq!(t.idle, None);

        let t: Timeouts = toml::from_str("call = 1\nidle = 250").unwrap();
        assert_eq!(t.idle, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_millis_serialize() {
        let t = Timeouts { call: Duration::from_secs(2), idle: None };
        assert_eq!(toml::to_string(&t).unwrap().trim(), "call = 2000");
    }
}
