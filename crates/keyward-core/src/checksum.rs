use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use md5::{Digest, Md5};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChecksumError {
    #[error("digest header is not valid base64: {0}")]
    Decode(#[source] base64::DecodeError),
    #[error("digest header is empty")]
    Empty,
}

/// Digest the distribution service declared for an artifact.
///
/// The `Content-MD5` header carries base64 of the lowercase hex MD5 text, so
/// the decoded bytes are compared as-is against the hex rendering of the
/// computed digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpectedDigest(Vec<u8>);

impl ExpectedDigest {
    /// Decode a base64 digest header value.
    ///
    /// # Errors
    /// Returns an error when the value is empty or not valid base64.
    pub fn from_header(value: &str) -> Result<Self, ChecksumError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(ChecksumError::Empty);
        }
        let decoded = STANDARD.decode(value).map_err(ChecksumError::Decode)?;
        if decoded.is_empty() {
            return Err(ChecksumError::Empty);
        }
        Ok(Self(decoded))
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn matches(&self, actual_hex: &str) -> bool {
        self.0 == actual_hex.as_bytes()
    }
}

impl std::fmt::Display for ExpectedDigest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.0))
    }
}

/// Running MD5 over a byte stream.
#[derive(Default)]
pub struct DigestAccumulator {
    hasher: Md5,
    bytes: u64,
}

impl DigestAccumulator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.bytes += chunk.len() as u64;
    }

    #[must_use]
    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    /// Lowercase hex digest of everything fed so far.
    #[must_use]
    pub fn finalize_hex(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

#[must_use]
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", Md5::digest(data))
}

/// Encode a hex digest the way the distribution service sends it.
#[must_use]
pub fn encode_header(hex_digest: &str) -> String {
    STANDARD.encode(hex_digest.as_bytes())
}
