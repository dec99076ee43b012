//! Verified-region assembly: metadata, firmware and padding sized to an
//! exact offset.

use serde::Deserialize;

use crate::capsule::section::{SectionList, Tag, HEADER_LEN};
use crate::error::{Error, Result};
use crate::log::logger::log_debug;

/// Filler byte of the `dummy` section. It is hashed, so it must match
/// deployed images bit for bit.
pub const PAD_BYTE: u8 = b' ';

const HDR: u64 = HEADER_LEN as u64;

/// Where the target offset is measured to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Layout {
    /// The whole `verified` section (header included) is `target_offset`
    /// bytes; padding follows the firmware section.
    #[default]
    Region,
    /// Padding sits between the metadata and the firmware section so the
    /// firmware payload itself starts at `target_offset`.
    FirmwareEntry,
}

impl std::str::FromStr for Layout {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "region" => Ok(Layout::Region),
            "firmware-entry" => Ok(Layout::FirmwareEntry),
            other => Err(Error::Malformed(format!("unknown layout '{}'", other))),
        }
    }
}

/// Payload length of the `dummy` section needed to grow `content` bytes to
/// exactly `target`, or `None` when they already match.
fn padding_len(content: u64, target: u64) -> Result<Option<u64>> {
    if content > target {
        return Err(Error::MetadataTooLarge {
            required: content,
            target_offset: target,
        });
    }
    if content == target {
        return Ok(None);
    }
    // The dummy section's own header must fit too.
    if target - content < HDR {
        return Err(Error::MetadataTooLarge {
            required: content + HDR,
            target_offset: target,
        });
    }
    Ok(Some(target - content - HDR))
}

fn too_large(len: u64) -> Error {
    Error::SectionTooLarge {
        len: usize::try_from(len).unwrap_or(usize::MAX),
    }
}

fn push_padding(list: &mut SectionList<'_>, len: u64) -> Result<()> {
    if len > u64::from(u32::MAX) {
        return Err(too_large(len));
    }
    let len = usize::try_from(len).map_err(|_| too_large(len))?;
    log_debug("metadata", &format!("padding with {} filler bytes", len));
    list.push(Tag::Dummy, vec![PAD_BYTE; len])?;
    Ok(())
}

/// Assemble the inner sections of the `verified` region.
///
/// Sizes count the 8-byte header of the enclosing `verified` section, which
/// the caller adds when wrapping the returned list.
pub fn assemble<'a, S: AsRef<str>>(
    version: Option<&'a str>,
    compatibility: &'a [S],
    firmware: &'a [u8],
    target_offset: u64,
    layout: Layout,
) -> Result<SectionList<'a>> {
    // The verified section's own length field is 32 bits.
    let region_payload = target_offset.saturating_sub(HDR);
    if region_payload > u64::from(u32::MAX) {
        return Err(too_large(region_payload));
    }

    let mut list = SectionList::new();
    if let Some(version) = version {
        list.push(Tag::Version, version.as_bytes())?;
    }
    for entry in compatibility {
        list.push(Tag::Compatibility, entry.as_ref().as_bytes())?;
    }

    match layout {
        Layout::Region => {
            list.push(Tag::Firmware, firmware)?;
            let content = HDR + list.encoded_len();
            if let Some(pad) = padding_len(content, target_offset)? {
                push_padding(&mut list, pad)?;
            }
        }
        Layout::FirmwareEntry => {
            let content = HDR + list.encoded_len() + HDR;
            if let Some(pad) = padding_len(content, target_offset)? {
                push_padding(&mut list, pad)?;
            }
            list.push(Tag::Firmware, firmware)?;
        }
    }
    Ok(list)
}
