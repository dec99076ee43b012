//! Content hashing.

use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use sha2::{Digest, Sha512};

use crate::capsule::section::Tag;
use crate::error::Error;

pub const SHA512_LEN: usize = 64;
pub const FINGERPRINT_LEN: usize = 4;

/// Hash algorithms an image may carry. Each maps to one section tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Sha512,
}

impl HashAlgorithm {
    pub fn tag(self) -> Tag {
        match self {
            HashAlgorithm::Sha512 => Tag::Sha512,
        }
    }

    /// The algorithm implied by a hash section tag, if any.
    pub fn from_tag(tag: Tag) -> Option<Self> {
        match tag {
            Tag::Sha512 => Some(HashAlgorithm::Sha512),
            _ => None,
        }
    }

    pub fn digest_len(self) -> usize {
        match self {
            HashAlgorithm::Sha512 => SHA512_LEN,
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }
}

impl FromStr for HashAlgorithm {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha512" => Ok(HashAlgorithm::Sha512),
            _ => Err(Error::UnknownHash(s.to_string())),
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Sha512 => f.write_str("sha512"),
        }
    }
}

/// Short key identifier: the first four bytes of sha512(public key).
pub fn fingerprint(public_key: &[u8]) -> [u8; FINGERPRINT_LEN] {
    let digest = Sha512::digest(public_key);
    let mut fp = [0u8; FINGERPRINT_LEN];
    fp.copy_from_slice(&digest[..FINGERPRINT_LEN]);
    fp
}

/// Byte comparison whose running time does not depend on where inputs differ.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
