//! Body framing shared by the agent and the server: gzip and signatures.
//!
//! The signature is `hex(sha256(body ‖ key))` over the uncompressed body,
//! carried in the `HashSHA256` header.

use crate::error::{MetricaError, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use sha2::{Digest, Sha256};
use std::io::{Read, Write};

/// Signature header. Header names are case-insensitive; this is the
/// normalized form.
pub const HASH_HEADER: &str = "hashsha256";

/// Lowercase hex SHA-256 of `body` followed by `key`.
pub fn sign(body: &[u8], key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body);
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Check `signature` against the body; `SignatureMismatch` otherwise.
pub fn verify(body: &[u8], key: &str, signature: &str) -> Result<()> {
    if sign(body, key).eq_ignore_ascii_case(signature.trim()) {
        Ok(())
    } else {
        Err(MetricaError::SignatureMismatch)
    }
}

pub fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).map_err(MetricaError::internal)?;
    encoder.finish().map_err(MetricaError::internal)
}

pub fn gunzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut decoded = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut decoded)
        .map_err(|e| MetricaError::Decompression(e.to_string()))?;
    Ok(decoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_is_sha256_of_body_then_key() {
        // sha256("abc")
        assert_eq!(
            sign(b"ab", "c"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_verify() {
        let body = br#"[{"id":"a","type":"gauge","value":1}]"#;
        let signature = sign(body, "secret");
        assert!(verify(body, "secret", &signature).is_ok());
        assert!(verify(body, "secret", &signature.to_uppercase()).is_ok());
        assert!(matches!(verify(body, "other", &signature), Err(MetricaError::SignatureMismatch)));
    }

    #[test]
    fn test_gzip_and_back() {
        let body = b"[]".repeat(100);
        let compressed = gzip(&body).unwrap();
        assert_ne!(compressed, body);
        assert_eq!(gunzip(&compressed).unwrap(), body);
    }

    #[test]
    fn test_gunzip_rejects_garbage() {
        assert!(matches!(gunzip(b"definitely not gzip"), Err(MetricaError::Decompression(_))));
    }
}
