//! Hash/sign/verify contract shared by every authentication carrier.
//!
//! A carrier decides where the authenticated bytes live (a container's
//! `verified` section, an ELF file with its signature slot cleared) and
//! where the hash and signature are stored. Everything cryptographic goes
//! through [`seal`] and [`verify_carrier`].

use std::borrow::Cow;

use ed25519_dalek::VerifyingKey;

use crate::capsule::section::{SectionList, Tag};
use crate::crypto::hash::{ct_eq, fingerprint, HashAlgorithm, FINGERPRINT_LEN};
use crate::crypto::sig::{verify_digest, DigestSigner, SIG_LEN};
use crate::error::{Error, Result};
use crate::log::logger::{log_debug, log_info, log_warn};
use crate::verify::VerifyResult;

/// Authentication data computed over one covered region.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seal {
    pub algorithm: HashAlgorithm,
    pub digest: Vec<u8>,
    pub signature: Option<[u8; SIG_LEN]>,
    pub fingerprint: Option<[u8; FINGERPRINT_LEN]>,
}

/// Hash `covered` and, with a signer, sign the digest and fingerprint the key.
pub fn seal(covered: &[u8], algorithm: HashAlgorithm, signer: Option<&dyn DigestSigner>) -> Seal {
    let digest = algorithm.digest(covered);
    let (signature, fp) = match signer {
        Some(signer) => (
            Some(signer.sign_digest(&digest)),
            Some(fingerprint(&signer.public_key())),
        ),
        None => (None, None),
    };
    Seal {
        algorithm,
        digest,
        signature,
        fingerprint: fp,
    }
}

/// Build the payload of the `verification` section for an encoded
/// `verified` section (header included).
///
/// Without a hash algorithm the region is empty, and asking for a
/// signature is an error.
pub fn authenticate(
    verified_section: &[u8],
    hash: Option<HashAlgorithm>,
    signer: Option<&dyn DigestSigner>,
) -> Result<Vec<u8>> {
    let Some(algorithm) = hash else {
        if signer.is_some() {
            return Err(Error::HashRequiredForSigning);
        }
        log_debug("auth", "no hash requested, verification region left empty");
        return Ok(Vec::new());
    };

    let seal = seal(verified_section, algorithm, signer);
    let mut region = SectionList::new();
    region.push(algorithm.tag(), seal.digest)?;
    if let Some(signature) = seal.signature {
        region.push(Tag::Ed25519, signature.to_vec())?;
    }
    if let Some(fp) = seal.fingerprint {
        log_info("auth", &format!("signed, key fingerprint {}", hex::encode(fp)));
        region.push(Tag::Fingerprint, fp.to_vec())?;
    }
    Ok(region.to_bytes())
}

/// Authentication data found inside a carrier.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Evidence<'a> {
    /// Algorithm the digest must be recomputed with; `None` means the
    /// carrier holds no authentication data at all.
    pub algorithm: Option<HashAlgorithm>,
    /// Stored digest, for carriers that embed one.
    pub digest: Option<&'a [u8]>,
    pub signature: Option<&'a [u8]>,
    pub fingerprint: Option<&'a [u8]>,
}

/// Where the authenticated bytes and their evidence live.
pub trait Carrier {
    /// Exactly the bytes bound by the digest.
    fn covered(&self) -> Cow<'_, [u8]>;

    fn evidence(&self) -> Evidence<'_>;
}

/// Recompute and check a carrier's digest and signature.
///
/// A digest mismatch is reported before any signature work. A hashed but
/// unsigned carrier is `NoSignaturePresent`, never `Valid`.
pub fn verify_carrier<C: Carrier + ?Sized>(carrier: &C, public_key: &VerifyingKey) -> VerifyResult {
    let evidence = carrier.evidence();
    let Some(algorithm) = evidence.algorithm else {
        log_warn("auth", "no hash present");
        return VerifyResult::NoSignaturePresent;
    };

    let digest = algorithm.digest(&carrier.covered());
    if let Some(embedded) = evidence.digest {
        if !ct_eq(embedded, &digest) {
            log_warn("auth", &format!("{} digest mismatch", algorithm));
            return VerifyResult::HashMismatch;
        }
        log_debug("auth", "digest matches");
    }

    let Some(signature) = evidence.signature else {
        log_warn("auth", "no signature present");
        return VerifyResult::NoSignaturePresent;
    };

    if let Some(fp) = evidence.fingerprint {
        if !ct_eq(fp, &fingerprint(public_key.as_bytes())) {
            log_warn("auth", "key fingerprint does not match the supplied public key");
            return VerifyResult::SignatureInvalid;
        }
    }

    if verify_digest(public_key, &digest, signature) {
        VerifyResult::Valid
    } else {
        VerifyResult::SignatureInvalid
    }
}
