//! Firmware hand-out for loaders: the payload is returned only from an image
//! that verified as `Valid`.

use ed25519_dalek::VerifyingKey;

use crate::crypto::auth::verify_carrier;
use crate::log::logger::{log_error, log_info};
use crate::verify::capsule::ContainerImage;
use crate::verify::VerifyResult;

/// Verify `image` and borrow its firmware payload, or return the failure.
pub fn load_verified_firmware<'a>(
    image: &'a [u8],
    public_key: &VerifyingKey,
) -> Result<&'a [u8], VerifyResult> {
    let container = ContainerImage::parse(image).map_err(|e| {
        log_error("loader", "Image format is INVALID. Load aborted.");
        VerifyResult::Malformed(e.to_string())
    })?;

    match verify_carrier(&container, public_key) {
        VerifyResult::Valid => {
            log_info("loader", "Image status: Valid, extracting firmware");
            Ok(container.firmware())
        }
        status => {
            let reason = match status {
                VerifyResult::NoSignaturePresent => "Image is not signed. Load aborted.",
                VerifyResult::HashMismatch => "Image integrity check FAILED. Load aborted.",
                VerifyResult::SignatureInvalid => "Image signature is INVALID. Load aborted.",
                _ => "Image rejected. Load aborted.",
            };
            log_error("loader", reason);
            Err(status)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capsule::ImageBuilder;
    use crate::crypto::hash::HashAlgorithm;
    use ed25519_dalek::SigningKey;

    #[test]
    fn firmware_only_from_valid_images() {
        let key = SigningKey::from_bytes(&[21; 32]);
        let other = SigningKey::from_bytes(&[22; 32]);
        let fw = b"\x00\x20\x00\x20 vector table".to_vec();
        let image = ImageBuilder::new(&fw)
            .target_offset(0x80)
            .hash(Some(HashAlgorithm::Sha512))
            .signer(&key)
            .build()
            .unwrap();

        assert_eq!(load_verified_firmware(&image, &key.verifying_key()), Ok(&fw[..]));
        assert_eq!(
            load_verified_firmware(&image, &other.verifying_key()),
            Err(VerifyResult::SignatureInvalid)
        );
        assert!(matches!(
            load_verified_firmware(&image[..10], &key.verifying_key()),
            Err(VerifyResult::Malformed(_))
        ));
    }
}
