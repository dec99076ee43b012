//! Ed25519 signing over content digests, and key-file decoding.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use zeroize::Zeroizing;

use crate::error::{Error, Result};
use crate::log::logger::{log_debug, log_warn};

pub const PK_LEN: usize = 32;
pub const SK_LEN: usize = 32;
pub const SIG_LEN: usize = 64;
const KEYPAIR_LEN: usize = SK_LEN + PK_LEN;

/// Signing capability: digest in, signature out.
pub trait DigestSigner {
    fn sign_digest(&self, digest: &[u8]) -> [u8; SIG_LEN];
    fn public_key(&self) -> [u8; PK_LEN];
}

impl DigestSigner for SigningKey {
    fn sign_digest(&self, digest: &[u8]) -> [u8; SIG_LEN] {
        self.sign(digest).to_bytes()
    }

    fn public_key(&self) -> [u8; PK_LEN] {
        self.verifying_key().to_bytes()
    }
}

/// Check `signature` over `digest`. Wrong-sized or all-zero signatures are
/// rejected without touching the curve.
pub fn verify_digest(public_key: &VerifyingKey, digest: &[u8], signature: &[u8]) -> bool {
    let Ok(sig_bytes) = <[u8; SIG_LEN]>::try_from(signature) else {
        log_warn("crypto", "signature has wrong length");
        return false;
    };
    if sig_bytes.iter().all(|&b| b == 0) {
        log_warn("crypto", "signature is all zeros");
        return false;
    }
    let sig = Signature::from_bytes(&sig_bytes);
    match public_key.verify(digest, &sig) {
        Ok(()) => {
            log_debug("crypto", "signature verified");
            true
        }
        Err(_) => {
            log_warn("crypto", "signature verification failed");
            false
        }
    }
}

pub fn public_key_of(key: &SigningKey) -> VerifyingKey {
    key.verifying_key()
}

/// Decode a private key file: raw 32-byte seed, raw 64-byte seed||public
/// keypair, or either of those as hex or base64 text.
pub fn signing_key_from_bytes(data: &[u8]) -> Result<SigningKey> {
    let raw = decode_key_material(data)?;
    match raw.len() {
        SK_LEN => {
            let mut seed = Zeroizing::new([0u8; SK_LEN]);
            seed.copy_from_slice(&raw);
            Ok(SigningKey::from_bytes(&seed))
        }
        KEYPAIR_LEN => {
            let mut pair = Zeroizing::new([0u8; KEYPAIR_LEN]);
            pair.copy_from_slice(&raw);
            SigningKey::from_keypair_bytes(&pair)
                .map_err(|_| Error::InvalidKey("public half does not match secret seed"))
        }
        _ => Err(Error::InvalidKey("private key must be 32 or 64 bytes")),
    }
}

/// Decode a public key file: raw 32 bytes, or hex/base64 text.
pub fn verifying_key_from_bytes(data: &[u8]) -> Result<VerifyingKey> {
    let raw = decode_key_material(data)?;
    let bytes = <[u8; PK_LEN]>::try_from(raw.as_slice())
        .map_err(|_| Error::InvalidKey("public key must be 32 bytes"))?;
    VerifyingKey::from_bytes(&bytes).map_err(|_| Error::InvalidKey("not a valid ed25519 point"))
}

fn decode_key_material(data: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
    if let Some(decoded) = decode_text(data) {
        return Ok(decoded);
    }
    match data.len() {
        PK_LEN | KEYPAIR_LEN => Ok(Zeroizing::new(data.to_vec())),
        _ => Err(Error::InvalidKey("unrecognised key encoding")),
    }
}

fn decode_text(data: &[u8]) -> Option<Zeroizing<Vec<u8>>> {
    let text = std::str::from_utf8(data).ok()?.trim();
    if text.is_empty() {
        return None;
    }
    let decoded = if text.len() % 2 == 0 && text.bytes().all(|b| b.is_ascii_hexdigit()) {
        hex::decode(text).ok()?
    } else {
        STANDARD.decode(text).ok()?
    };
    let decoded = Zeroizing::new(decoded);
    matches!(decoded.len(), PK_LEN | KEYPAIR_LEN).then_some(decoded)
}
