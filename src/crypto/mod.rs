pub mod auth;
pub mod hash;
pub mod sig;

pub use auth::{authenticate, seal, verify_carrier, Carrier, Evidence, Seal};
pub use hash::{fingerprint, HashAlgorithm};
pub use sig::{public_key_of, signing_key_from_bytes, verifying_key_from_bytes, DigestSigner};
