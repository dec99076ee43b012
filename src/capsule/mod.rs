//! uBLoad firmware image ("capsule") construction.
//!
//! An image is two top-level sections: `verified` (metadata, firmware and
//! padding) followed by `verification` (hash, signature, key fingerprint).
//! The digest covers the encoded `verified` section including its header.

pub mod describe;
pub mod metadata;
pub mod section;

pub use describe::{describe, Node, Tree};
pub use metadata::{assemble, Layout, PAD_BYTE};
pub use section::{decode, decode_all, encode, Section, SectionList, Tag};

use crate::config::DEFAULT_OFFSET;
use crate::crypto::auth::authenticate;
use crate::crypto::hash::HashAlgorithm;
use crate::crypto::sig::DigestSigner;
use crate::error::Result;
use crate::log::logger::{log_debug, log_info};

/// Builds one image from borrowed inputs. Nothing is written anywhere; a
/// failed build leaves no output.
#[derive(Clone)]
pub struct ImageBuilder<'a> {
    firmware: &'a [u8],
    version: Option<&'a str>,
    compatibility: Vec<&'a str>,
    target_offset: u64,
    layout: Layout,
    hash: Option<HashAlgorithm>,
    signer: Option<&'a dyn DigestSigner>,
}

impl<'a> ImageBuilder<'a> {
    pub fn new(firmware: &'a [u8]) -> Self {
        Self {
            firmware,
            version: None,
            compatibility: Vec::new(),
            target_offset: DEFAULT_OFFSET,
            layout: Layout::default(),
            hash: None,
            signer: None,
        }
    }

    pub fn version(mut self, version: &'a str) -> Self {
        self.version = Some(version);
        self
    }

    /// Append hardware compatibility strings; order is preserved and hashed.
    pub fn compatibility<I, S>(mut self, entries: I) -> Self
    where
        I: IntoIterator<Item = &'a S>,
        S: AsRef<str> + ?Sized + 'a,
    {
        self.compatibility
            .extend(entries.into_iter().map(|s| s.as_ref()));
        self
    }

    pub fn target_offset(mut self, offset: u64) -> Self {
        self.target_offset = offset;
        self
    }

    pub fn layout(mut self, layout: Layout) -> Self {
        self.layout = layout;
        self
    }

    /// Add an integrity hash. Without one the verification region is empty.
    pub fn hash(mut self, hash: Option<HashAlgorithm>) -> Self {
        self.hash = hash;
        self
    }

    pub fn signer(mut self, signer: &'a dyn DigestSigner) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn build(&self) -> Result<Vec<u8>> {
        let region = assemble(
            self.version,
            &self.compatibility,
            self.firmware,
            self.target_offset,
            self.layout,
        )?;
        let verified = region.wrap(Tag::Verified)?;
        log_debug(
            "capsule",
            &format!("verified section {} bytes, {} inner sections", verified.len(), region.len()),
        );

        let verification = authenticate(&verified, self.hash, self.signer)?;
        let mut image = verified;
        image.extend_from_slice(&encode(Tag::Verification, &verification)?);

        log_info(
            "capsule",
            &format!(
                "image built: {} bytes, firmware {} bytes, {}{}",
                image.len(),
                self.firmware.len(),
                self.hash.map_or("unhashed".to_string(), |h| h.to_string()),
                if self.signer.is_some() { ", signed" } else { "" }
            ),
        );
        Ok(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use ed25519_dalek::SigningKey;

    #[test]
    fn image_is_verified_then_verification() {
        let image = ImageBuilder::new(b"firmware").target_offset(64).build().unwrap();
        let top = decode_all(&image).unwrap();
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].tag, Tag::Verified);
        assert_eq!(top[0].encoded_len(), 64);
        assert_eq!(top[1].tag, Tag::Verification);
        assert!(top[1].payload.is_empty());
    }

    #[test]
    fn builder_rejects_signing_without_hash() {
        let key = SigningKey::from_bytes(&[9; 32]);
        let err = ImageBuilder::new(b"fw").signer(&key).build().unwrap_err();
        assert!(matches!(err, Error::HashRequiredForSigning));
    }

    #[test]
    fn compatibility_accepts_strings_and_strs() {
        let owned = vec!["a".to_string(), "b".to_string()];
        let image = ImageBuilder::new(b"fw")
            .compatibility(&owned)
            .compatibility(["c"].iter().copied())
            .build()
            .unwrap();
        let top = decode_all(&image).unwrap();
        let compat: Vec<&[u8]> = top[0]
            .children()
            .unwrap()
            .iter()
            .filter(|s| s.tag == Tag::Compatibility)
            .map(|s| s.payload)
            .collect();
        assert_eq!(compat, vec![&b"a"[..], &b"b"[..], &b"c"[..]]);
    }
}
