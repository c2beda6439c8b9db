//! Decoding of gzip-compressed, base64-encoded strings.
//!
//! Generated services embed their WSDL in this form.

use base64::Engine;
use flate2::read::GzDecoder;
use std::io::{self, Read};

/// Decode a base64 string and gunzip the result.
///
/// Whitespace in the input (line-wrapped base64) is ignored.
pub fn ungzb64(s: &str) -> io::Result<String> {
    let compact: String = s.chars().filter(|c| !c.is_whitespace()).collect();
    let compressed = base64::engine::general_purpose::STANDARD
        .decode(compact)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    let mut out = String::new();
    GzDecoder::new(&compressed[..]).read_to_string(&mut out)?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    #[test]
    fn test_ungzb64() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(b"<definitions/>").unwrap();
        let encoded = base64::engine::general_purpose::STANDARD.encode(enc.finish().unwrap());
        let wrapped = format!("{}\n{}", &encoded[..10], &encoded[10..]);

        assert_eq!(ungzb64(&wrapped).unwrap(), "<definitions/>");
    }

    #[test]
    fn test_ungzb64_rejects_garbage() {
        assert!(ungzb64("not base64!").is_err());
    }
}
