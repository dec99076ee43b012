//! Image verification: the container carrier, the in-place ELF carrier, and
//! a loader-style helper that hands out firmware only from valid images.

pub mod capsule;
pub mod elf;
pub mod loader;

use std::fmt;

pub use capsule::{verify, ContainerImage};
pub use elf::{sign_elf, verify_elf, ElfImage, SIGNATURE_SECTION};
pub use loader::load_verified_firmware;

/// Outcome of one verification attempt. Every kind other than `Valid` is
/// terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyResult {
    Valid,
    NoSignaturePresent,
    HashMismatch,
    SignatureInvalid,
    Malformed(String),
}

impl VerifyResult {
    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyResult::Valid)
    }
}

impl fmt::Display for VerifyResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyResult::Valid => f.write_str("ok"),
            VerifyResult::NoSignaturePresent => f.write_str("no signature present"),
            VerifyResult::HashMismatch => f.write_str("hash mismatch"),
            VerifyResult::SignatureInvalid => f.write_str("signature verification failed"),
            VerifyResult::Malformed(why) => write!(f, "malformed image: {}", why),
        }
    }
}
