// cached-purifier/src/key.rs
//! Content-addressed cache key derivation.
//!
//! A key is `prefix || hex(digest(material))`. The material is the raw input
//! text, optionally preceded by the fingerprint of the rule set that produced
//! the cached output, so outputs of different rule sets never share a key.
//!
//! License: MIT OR APACHE 2.0

use sha2::{Digest, Sha224, Sha256, Sha384, Sha512, Sha512_224, Sha512_256};
use std::fmt;
use std::str::FromStr;

use crate::errors::PurifierError;

/// Digest functions selectable by name in `PurifierOptions::hash_algorithm`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashAlgorithm {
    Sha224,
    Sha256,
    Sha384,
    Sha512,
    Sha512_224,
    Sha512_256,
}

impl HashAlgorithm {
    pub fn name(&self) -> &'static str {
        match self {
            HashAlgorithm::Sha224 => "sha224",
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha384 => "sha384",
            HashAlgorithm::Sha512 => "sha512",
            HashAlgorithm::Sha512_224 => "sha512/224",
            HashAlgorithm::Sha512_256 => "sha512/256",
        }
    }

    /// Hex digest over the concatenation of `parts`.
    pub fn hex_digest(&self, parts: &[&[u8]]) -> String {
        match self {
            HashAlgorithm::Sha224 => hex_digest::<Sha224>(parts),
            HashAlgorithm::Sha256 => hex_digest::<Sha256>(parts),
            HashAlgorithm::Sha384 => hex_digest::<Sha384>(parts),
            HashAlgorithm::Sha512 => hex_digest::<Sha512>(parts),
            HashAlgorithm::Sha512_224 => hex_digest::<Sha512_224>(parts),
            HashAlgorithm::Sha512_256 => hex_digest::<Sha512_256>(parts),
        }
    }
}

fn hex_digest<D: Digest>(parts: &[&[u8]]) -> String {
    let mut hasher = D::new();
    for &part in parts {
        hasher.update(part);
    }
    hex::encode(hasher.finalize())
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for HashAlgorithm {
    type Err = PurifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace(['-', '_'], "/");
        match normalized.as_str() {
            "sha224" => Ok(HashAlgorithm::Sha224),
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha384" => Ok(HashAlgorithm::Sha384),
            "sha512" => Ok(HashAlgorithm::Sha512),
            "sha512/224" => Ok(HashAlgorithm::Sha512_224),
            "sha512/256" => Ok(HashAlgorithm::Sha512_256),
            _ => Err(PurifierError::config(format!(
                "Unsupported hash algorithm '{}'. Expected one of: sha224, sha256, sha384, sha512, sha512/224, sha512/256.",
                s
            ))),
        }
    }
}

/// Builds cache keys under a fixed namespace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyDeriver {
    prefix: String,
    algorithm: HashAlgorithm,
}

impl KeyDeriver {
    pub fn new(prefix: impl Into<String>, algorithm: HashAlgorithm) -> Self {
        Self { prefix: prefix.into(), algorithm }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Derives the key for `input`.
    ///
    /// With `fingerprint == None` the key depends on the input text alone.
    /// Otherwise the fingerprint and a NUL separator are hashed ahead of the
    /// input.
    pub fn derive(&self, input: &str, fingerprint: Option<&str>) -> String {
        let digest = match fingerprint {
            None => self.algorithm.hex_digest(&[input.as_bytes()]),
            Some(fp) => self.algorithm.hex_digest(&[fp.as_bytes(), b"\0".as_slice(), input.as_bytes()]),
        };
        let mut key = String::with_capacity(self.prefix.len() + digest.len());
        key.push_str(&self.prefix);
        key.push_str(&digest);
        key
    }
}
