//! Container carrier: the digest covers the encoded `verified` section, and
//! the evidence lives in the `verification` section behind it.

use std::borrow::Cow;

use ed25519_dalek::VerifyingKey;

use crate::capsule::section::{decode, decode_all_at, decode_at, Tag, HEADER_LEN};
use crate::crypto::auth::{verify_carrier, Carrier, Evidence};
use crate::crypto::hash::{HashAlgorithm, FINGERPRINT_LEN};
use crate::crypto::sig::SIG_LEN;
use crate::error::{Error, Result};
use crate::log::logger::{log_debug, log_info, log_warn};
use crate::verify::VerifyResult;

/// A structurally checked image, borrowing from the input buffer.
#[derive(Debug, Clone)]
pub struct ContainerImage<'a> {
    verified: &'a [u8],
    version: Option<&'a [u8]>,
    compatibility: Vec<&'a [u8]>,
    firmware: &'a [u8],
    evidence: Evidence<'a>,
}

fn malformed(msg: impl Into<String>) -> Error {
    Error::Malformed(msg.into())
}

fn set_once<'a>(slot: &mut Option<&'a [u8]>, value: &'a [u8], tag: Tag, len: usize) -> Result<()> {
    if slot.is_some() {
        return Err(malformed(format!("duplicate {} section", tag)));
    }
    if value.len() != len {
        return Err(malformed(format!(
            "{} section is {} bytes, expected {}",
            tag,
            value.len(),
            len
        )));
    }
    *slot = Some(value);
    Ok(())
}

impl<'a> ContainerImage<'a> {
    /// Check the two-section layout and both regions' inner structure.
    pub fn parse(image: &'a [u8]) -> Result<Self> {
        let (verified, rest) = decode(image)?;
        if verified.tag != Tag::Verified {
            return Err(malformed(format!("first section is {}, expected verified", verified.tag)));
        }
        let verified_bytes = &image[..verified.encoded_len()];

        let (verification, rest) = decode_at(rest, verified_bytes.len())?;
        if verification.tag != Tag::Verification {
            return Err(malformed(format!(
                "second section is {}, expected verification",
                verification.tag
            )));
        }
        if !rest.is_empty() {
            return Err(malformed(format!("{} trailing bytes after verification section", rest.len())));
        }

        let mut version = None;
        let mut compatibility = Vec::new();
        let mut firmware = None;
        let mut padding = false;
        for section in decode_all_at(verified.payload, HEADER_LEN)? {
            match section.tag {
                Tag::Version if version.is_none() => version = Some(section.payload),
                Tag::Compatibility => compatibility.push(section.payload),
                Tag::Firmware if firmware.is_none() => firmware = Some(section.payload),
                Tag::Dummy if !padding => padding = true,
                Tag::Version | Tag::Firmware | Tag::Dummy => {
                    return Err(malformed(format!("duplicate {} section", section.tag)));
                }
                other => {
                    return Err(malformed(format!("unexpected {} section in verified region", other)));
                }
            }
        }
        let firmware = firmware.ok_or_else(|| malformed("verified region has no firmware section"))?;

        let mut evidence = Evidence::default();
        for section in decode_all_at(verification.payload, verified_bytes.len() + HEADER_LEN)? {
            match section.tag {
                Tag::Sha512 => {
                    let algorithm = HashAlgorithm::Sha512;
                    set_once(&mut evidence.digest, section.payload, section.tag, algorithm.digest_len())?;
                    evidence.algorithm = Some(algorithm);
                }
                Tag::Ed25519 => set_once(&mut evidence.signature, section.payload, section.tag, SIG_LEN)?,
                Tag::Fingerprint => {
                    set_once(&mut evidence.fingerprint, section.payload, section.tag, FINGERPRINT_LEN)?
                }
                Tag::Unknown(raw) => {
                    log_warn("verify", &format!("ignoring unknown verification section {:#010x}", raw));
                }
                other => {
                    return Err(malformed(format!("unexpected {} section in verification region", other)));
                }
            }
        }

        log_debug(
            "verify",
            &format!(
                "parsed image: verified {} bytes, firmware {} bytes",
                verified_bytes.len(),
                firmware.len()
            ),
        );
        Ok(Self {
            verified: verified_bytes,
            version,
            compatibility,
            firmware,
            evidence,
        })
    }

    /// The encoded `verified` section, header included.
    pub fn verified_section(&self) -> &'a [u8] {
        self.verified
    }

    pub fn version(&self) -> Option<&'a [u8]> {
        self.version
    }

    pub fn compatibility(&self) -> &[&'a [u8]] {
        &self.compatibility
    }

    pub fn firmware(&self) -> &'a [u8] {
        self.firmware
    }

    pub fn fingerprint(&self) -> Option<&'a [u8]> {
        self.evidence.fingerprint
    }

    pub fn is_signed(&self) -> bool {
        self.evidence.signature.is_some()
    }
}

impl Carrier for ContainerImage<'_> {
    fn covered(&self) -> Cow<'_, [u8]> {
        Cow::Borrowed(self.verified)
    }

    fn evidence(&self) -> Evidence<'_> {
        self.evidence
    }
}

/// Verify an image against `public_key`.
pub fn verify(image: &[u8], public_key: &VerifyingKey) -> VerifyResult {
    let container = match ContainerImage::parse(image) {
        Ok(c) => c,
        Err(e) => {
            log_warn("verify", &e.to_string());
            return VerifyResult::Malformed(e.to_string());
        }
    };
    let result = verify_carrier(&container, public_key);
    if result.is_valid() {
        log_info("verify", "image signature verified");
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capsule::section::{encode, SectionList};
    use crate::capsule::ImageBuilder;
    use ed25519_dalek::SigningKey;

    fn key(seed: u8) -> SigningKey {
        SigningKey::from_bytes(&[seed; 32])
    }

    fn signed(key: &SigningKey) -> Vec<u8> {
        ImageBuilder::new(&[0x11; 40])
            .version("0.3")
            .compatibility(["dev-board"].iter().copied())
            .target_offset(0x100)
            .hash(Some(HashAlgorithm::Sha512))
            .signer(key)
            .build()
            .unwrap()
    }

    fn image_with_verification(region: &SectionList<'_>) -> Vec<u8> {
        let mut verified = SectionList::new();
        verified.push(Tag::Firmware, &b"fw"[..]).unwrap();
        let mut image = verified.wrap(Tag::Verified).unwrap();
        image.extend(region.wrap(Tag::Verification).unwrap());
        image
    }

    #[test]
    fn parse_exposes_metadata() {
        let k = key(1);
        let image = signed(&k);
        let c = ContainerImage::parse(&image).unwrap();
        assert_eq!(c.version(), Some(&b"0.3"[..]));
        assert_eq!(c.compatibility(), &[&b"dev-board"[..]]);
        assert_eq!(c.firmware(), &[0x11u8; 40]);
        assert_eq!(c.verified_section().len(), 0x100);
        assert!(c.is_signed());
        assert_eq!(verify(&image, &k.verifying_key()), VerifyResult::Valid);
    }

    #[test]
    fn nested_errors_report_file_offsets() {
        let mut image = encode(Tag::Verified, &[0u8; 3]).unwrap();
        image.extend(encode(Tag::Verification, &[]).unwrap());
        assert!(matches!(
            ContainerImage::parse(&image),
            Err(Error::TruncatedHeader { offset: 8, available: 3 })
        ));

        // 18-byte verified section, then the verification header.
        let mut image = encode(Tag::Verified, &encode(Tag::Firmware, b"fw").unwrap()).unwrap();
        image.extend(encode(Tag::Verification, &[0u8; 3]).unwrap());
        assert!(matches!(
            ContainerImage::parse(&image),
            Err(Error::TruncatedHeader { offset: 26, available: 3 })
        ));

        let mut image = encode(Tag::Verified, &encode(Tag::Firmware, b"fw").unwrap()).unwrap();
        image.extend_from_slice(&Tag::Verification.raw().to_be_bytes());
        image.extend_from_slice(&100u32.to_be_bytes());
        assert!(matches!(
            ContainerImage::parse(&image),
            Err(Error::TruncatedPayload { offset: 18, declared: 100, available: 0, .. })
        ));
    }

    #[test]
    fn wrong_order_is_malformed() {
        let mut image = encode(Tag::Verification, &[]).unwrap();
        image.extend(encode(Tag::Verified, &encode(Tag::Firmware, b"x").unwrap()).unwrap());
        assert!(matches!(
            verify(&image, &key(1).verifying_key()),
            VerifyResult::Malformed(_)
        ));
    }

    #[test]
    fn trailing_bytes_are_malformed() {
        let k = key(2);
        let mut image = signed(&k);
        image.push(0);
        assert!(matches!(verify(&image, &k.verifying_key()), VerifyResult::Malformed(_)));
    }

    #[test]
    fn unhashed_image_has_no_signature() {
        let image = ImageBuilder::new(b"fw").target_offset(64).build().unwrap();
        assert_eq!(
            verify(&image, &key(3).verifying_key()),
            VerifyResult::NoSignaturePresent
        );
    }

    #[test]
    fn hashed_unsigned_image_has_no_signature() {
        let image = ImageBuilder::new(b"fw")
            .target_offset(64)
            .hash(Some(HashAlgorithm::Sha512))
            .build()
            .unwrap();
        assert_eq!(
            verify(&image, &key(3).verifying_key()),
            VerifyResult::NoSignaturePresent
        );
    }

    #[test]
    fn corrupted_unsigned_image_reports_hash_mismatch() {
        let mut image = ImageBuilder::new(b"firmware")
            .target_offset(64)
            .hash(Some(HashAlgorithm::Sha512))
            .build()
            .unwrap();
        image[20] ^= 0x01;
        assert_eq!(verify(&image, &key(3).verifying_key()), VerifyResult::HashMismatch);
    }

    #[test]
    fn duplicate_hash_is_malformed() {
        let digest = [0u8; 64];
        let mut region = SectionList::new();
        region.push(Tag::Sha512, &digest[..]).unwrap();
        region.push(Tag::Sha512, &digest[..]).unwrap();
        let image = image_with_verification(&region);
        assert!(matches!(
            ContainerImage::parse(&image),
            Err(Error::Malformed(msg)) if msg.contains("duplicate")
        ));
    }

    #[test]
    fn short_signature_is_malformed() {
        let digest = [0u8; 64];
        let mut region = SectionList::new();
        region.push(Tag::Sha512, &digest[..]).unwrap();
        region.push(Tag::Ed25519, &[1u8; 10][..]).unwrap();
        let image = image_with_verification(&region);
        assert!(matches!(ContainerImage::parse(&image), Err(Error::Malformed(_))));
    }

    #[test]
    fn unknown_verification_sections_are_skipped() {
        let k = key(4);
        let image = signed(&k);
        // Re-wrap the verification region with an extra unknown section appended.
        let c = ContainerImage::parse(&image).unwrap();
        let verified = c.verified_section().to_vec();
        let (verification, _) = decode(&image[verified.len()..]).unwrap();
        let mut payload = verification.payload.to_vec();
        payload.extend(encode(Tag::Unknown(0x1234_5678), b"future").unwrap());
        let mut rebuilt = verified;
        rebuilt.extend(encode(Tag::Verification, &payload).unwrap());
        assert_eq!(verify(&rebuilt, &k.verifying_key()), VerifyResult::Valid);
    }

    #[test]
    fn missing_firmware_is_malformed() {
        let mut verified = SectionList::new();
        verified.push(Tag::Version, &b"1"[..]).unwrap();
        let mut image = verified.wrap(Tag::Verified).unwrap();
        image.extend(encode(Tag::Verification, &[]).unwrap());
        assert!(matches!(ContainerImage::parse(&image), Err(Error::Malformed(_))));
    }
}
