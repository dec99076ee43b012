//! Tagged, length-prefixed sections.
//!
//! Wire layout of one section: `tag` (u32 BE) | `length` (u32 BE) | payload.
//! A payload may itself be a sequence of sections; decoding it as such is
//! always an explicit second call.

use std::borrow::Cow;
use std::fmt;

use zerocopy::byteorder::{BigEndian, U32};
use zerocopy::{AsBytes, FromBytes, LayoutVerified, Unaligned};

use crate::error::{Error, Result};

/// Size of the tag + length header.
pub const HEADER_LEN: usize = 8;

#[derive(FromBytes, AsBytes, Unaligned)]
#[repr(C)]
struct RawHeader {
    tag: U32<BigEndian>,
    len: U32<BigEndian>,
}

/// Section tag registry. Values are fixed by deployed bootloaders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    Verification,
    Verified,
    Dummy,
    Firmware,
    Sha512,
    Ed25519,
    Fingerprint,
    Version,
    Compatibility,
    /// Anything outside the registry. Kept so structural walks survive newer tags.
    Unknown(u32),
}

const REGISTRY: [(Tag, u32, &str); 9] = [
    (Tag::Verification, 0x6ef4_4bc0, "verification"),
    (Tag::Verified, 0x1eda_84bc, "verified"),
    (Tag::Dummy, 0xba50_911a, "dummy"),
    (Tag::Firmware, 0x40b8_0c0f, "firmware"),
    (Tag::Sha512, 0xb6eb_9721, "sha512 hash"),
    (Tag::Ed25519, 0x9d6b_1a99, "ed25519 signature"),
    (Tag::Fingerprint, 0x5bf0_aa39, "pubkey fingerprint"),
    (Tag::Version, 0x44ed_31be, "firmware version"),
    (Tag::Compatibility, 0x3a1e_112b, "hardware compatibility"),
];

impl Tag {
    pub fn from_raw(raw: u32) -> Self {
        REGISTRY
            .iter()
            .find(|(_, value, _)| *value == raw)
            .map(|(tag, _, _)| *tag)
            .unwrap_or(Tag::Unknown(raw))
    }

    pub fn raw(self) -> u32 {
        match self {
            Tag::Unknown(raw) => raw,
            known => REGISTRY
                .iter()
                .find(|(tag, _, _)| *tag == known)
                .map(|(_, value, _)| *value)
                .unwrap_or_default(),
        }
    }

    pub fn name(self) -> &'static str {
        REGISTRY
            .iter()
            .find(|(tag, _, _)| *tag == self)
            .map(|(_, _, name)| *name)
            .unwrap_or("unknown")
    }

    /// Tags whose payload is a sequence of sections.
    pub fn is_container(self) -> bool {
        matches!(self, Tag::Verified | Tag::Verification)
    }
}

impl From<u32> for Tag {
    fn from(raw: u32) -> Self {
        Tag::from_raw(raw)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tag::Unknown(raw) => write!(f, "unknown ({:#010x})", raw),
            known => f.write_str(known.name()),
        }
    }
}

/// A decoded section borrowing its payload from the input buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section<'a> {
    pub tag: Tag,
    pub payload: &'a [u8],
}

impl<'a> Section<'a> {
    pub fn encoded_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    /// Decode this section's payload as nested sections.
    pub fn children(&self) -> Result<Vec<Section<'a>>> {
        decode_all(self.payload)
    }
}

fn payload_len(len: usize) -> Result<u32> {
    u32::try_from(len).map_err(|_| Error::SectionTooLarge { len })
}

fn write_section(out: &mut Vec<u8>, tag: Tag, payload: &[u8], len: u32) {
    let header = RawHeader {
        tag: U32::new(tag.raw()),
        len: U32::new(len),
    };
    out.extend_from_slice(header.as_bytes());
    out.extend_from_slice(payload);
}

/// Encode a single section.
pub fn encode(tag: Tag, payload: &[u8]) -> Result<Vec<u8>> {
    let len = payload_len(payload.len())?;
    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    write_section(&mut out, tag, payload, len);
    Ok(out)
}

/// Decode one section from the front of `bytes`, returning it and the rest.
pub fn decode(bytes: &[u8]) -> Result<(Section<'_>, &[u8])> {
    decode_at(bytes, 0)
}

/// Like [`decode`], with errors reporting `offset` as the section's position
/// in the enclosing file.
pub fn decode_at(bytes: &[u8], offset: usize) -> Result<(Section<'_>, &[u8])> {
    let (header, rest) = LayoutVerified::<_, RawHeader>::new_unaligned_from_prefix(bytes)
        .ok_or(Error::TruncatedHeader {
            offset,
            available: bytes.len(),
        })?;
    let tag = header.tag.get();
    let declared = header.len.get();
    let len = declared as usize;
    if rest.len() < len {
        return Err(Error::TruncatedPayload {
            offset,
            tag,
            declared,
            available: rest.len(),
        });
    }
    let (payload, remainder) = rest.split_at(len);
    Ok((
        Section {
            tag: Tag::from_raw(tag),
            payload,
        },
        remainder,
    ))
}

/// Decode a flat run of sibling sections that must consume `bytes` exactly.
pub fn decode_all(bytes: &[u8]) -> Result<Vec<Section<'_>>> {
    decode_all_at(bytes, 0)
}

/// [`decode_all`] for a run that starts `base` bytes into the file.
pub fn decode_all_at(bytes: &[u8], base: usize) -> Result<Vec<Section<'_>>> {
    Sections::at(bytes, base)
        .map(|item| item.map(|(_, section)| section))
        .collect()
}

/// Iterator over sibling sections, yielding `(relative offset, section)`.
/// Stops after the first error.
pub struct Sections<'a> {
    rest: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> Sections<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self::at(bytes, 0)
    }

    /// Offsets are counted from `base` instead of zero.
    pub fn at(bytes: &'a [u8], base: usize) -> Self {
        Self {
            rest: bytes,
            offset: base,
            failed: false,
        }
    }
}

impl<'a> Iterator for Sections<'a> {
    type Item = Result<(usize, Section<'a>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.rest.is_empty() {
            return None;
        }
        match decode_at(self.rest, self.offset) {
            Ok((section, rest)) => {
                let at = self.offset;
                self.offset += section.encoded_len();
                self.rest = rest;
                Some(Ok((at, section)))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Ordered, append-only list of sections, serialised once.
#[derive(Debug, Default, Clone)]
pub struct SectionList<'a> {
    entries: Vec<(Tag, Cow<'a, [u8]>, u32)>,
}

impl<'a> SectionList<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tag: Tag, payload: impl Into<Cow<'a, [u8]>>) -> Result<&mut Self> {
        let payload = payload.into();
        let len = payload_len(payload.len())?;
        self.entries.push((tag, payload, len));
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tags(&self) -> impl Iterator<Item = Tag> + '_ {
        self.entries.iter().map(|(tag, _, _)| *tag)
    }

    /// Serialised size of all entries, headers included.
    pub fn encoded_len(&self) -> u64 {
        self.entries
            .iter()
            .map(|(_, payload, _)| (HEADER_LEN + payload.len()) as u64)
            .sum()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len() as usize);
        self.write_into(&mut out);
        out
    }

    /// Serialise the list as the payload of an enclosing `tag` section.
    pub fn wrap(&self, tag: Tag) -> Result<Vec<u8>> {
        let inner = self.encoded_len();
        let len = u32::try_from(inner).map_err(|_| Error::SectionTooLarge {
            len: inner as usize,
        })?;
        let mut out = Vec::with_capacity(HEADER_LEN + inner as usize);
        write_section(&mut out, tag, &[], len);
        self.write_into(&mut out);
        Ok(out)
    }

    fn write_into(&self, out: &mut Vec<u8>) {
        for (tag, payload, len) in &self.entries {
            write_section(out, *tag, payload, *len);
        }
    }
}
