// ABOUTME: Content digest newtype in `algorithm:hex` form, as used by registries.
// ABOUTME: Validated on parse; hashing helpers live here so callers never touch sha2.

use serde::{Deserialize, Serialize};
use sha2::{Digest as _, Sha256};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ParseDigestError {
    #[error("digest must be of the form algorithm:hex, got {0:?}")]
    MissingSeparator(String),

    #[error("unsupported digest algorithm: {0}")]
    UnsupportedAlgorithm(String),

    #[error("digest hex has wrong length for {algorithm}: {len}")]
    WrongLength { algorithm: String, len: usize },

    #[error("digest contains non-hex character: {0:?}")]
    InvalidChar(char),
}

/// A content digest, e.g. `sha256:e3b0c4...`.
///
/// Only lowercase hex is accepted; digests are compared byte for byte all
/// over the archive, so normalization happens once at the parse boundary.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Digest {
    algorithm: String,
    encoded: String,
}

impl Digest {
    /// Hash `data` with SHA-256.
    pub fn sha256_of(data: &[u8]) -> Self {
        Self {
            algorithm: "sha256".to_string(),
            encoded: hex::encode(Sha256::digest(data)),
        }
    }

    pub fn algorithm(&self) -> &str {
        &self.algorithm
    }

    /// The hex-encoded digest value without the algorithm prefix.
    pub fn encoded(&self) -> &str {
        &self.encoded
    }
}

impl FromStr for Digest {
    type Err = ParseDigestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((algorithm, encoded)) = s.split_once(':') else {
            return Err(ParseDigestError::MissingSeparator(s.to_string()));
        };
        let expected_len = match algorithm {
            "sha256" => 64,
            "sha512" => 128,
            other => {
                return Err(ParseDigestError::UnsupportedAlgorithm(other.to_string()));
            }
        };
        if encoded.len() != expected_len {
            return Err(ParseDigestError::WrongLength {
                algorithm: algorithm.to_string(),
                len: encoded.len(),
            });
        }
        if let Some(c) = encoded
            .chars()
            .find(|c| !c.is_ascii_hexdigit() || c.is_ascii_uppercase())
        {
            return Err(ParseDigestError::InvalidChar(c));
        }
        Ok(Self {
            algorithm: algorithm.to_string(),
            encoded: encoded.to_string(),
        })
    }
}

impl TryFrom<String> for Digest {
    type Error = ParseDigestError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Digest> for String {
    fn from(digest: Digest) -> Self {
        digest.to_string()
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.encoded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sha256_known_vector() {
        let digest = Digest::sha256_of(b"hello world");
        assert_eq!(digest.algorithm(), "sha256");
        assert_eq!(
            digest.encoded(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn parse_round_trips() {
        let s = "sha256:b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9";
        let digest: Digest = s.parse().unwrap();
        assert_eq!(digest.to_string(), s);
    }

    #[test]
    fn rejects_malformed() {
        assert!("nocolon".parse::<Digest>().is_err());
        assert!("md5:abcd".parse::<Digest>().is_err());
        assert!("sha256:abc".parse::<Digest>().is_err());
        let upper = format!("sha256:{}", "A".repeat(64));
        assert!(upper.parse::<Digest>().is_err());
        let bad = format!("sha256:{}", "g".repeat(64));
        assert!(bad.parse::<Digest>().is_err());
    }

    #[test]
    fn serde_uses_string_form() {
        let digest = Digest::sha256_of(b"x");
        let json = serde_json::to_string(&digest).unwrap();
        let back: Digest = serde_json::from_str(&json).unwrap();
        assert_eq!(back, digest);
        assert!(serde_json::from_str::<Digest>("\"sha256:zz\"").is_err());
    }
}
