//! In-place ELF carrier.
//!
//! The linked executable reserves a 64-byte section (`.sign.ed25519` by
//! default). The digest is taken over the whole file with that slot zeroed,
//! and the signature is written into the slot. No sections are added or
//! removed; a missing or misshaped slot is an error.

use std::borrow::Cow;
use std::ops::Range;

use ed25519_dalek::VerifyingKey;
use xmas_elf::header::Class;
use xmas_elf::sections::ShType;
use xmas_elf::ElfFile;

use crate::crypto::auth::{seal, verify_carrier, Carrier, Evidence};
use crate::crypto::hash::HashAlgorithm;
use crate::crypto::sig::{DigestSigner, SIG_LEN};
use crate::error::{Error, Result};
use crate::log::logger::{log_debug, log_info, log_warn};
use crate::verify::VerifyResult;

pub const SIGNATURE_SECTION: &str = ".sign.ed25519";

const ALGORITHM: HashAlgorithm = HashAlgorithm::Sha512;

fn file_range(data: &[u8], offset: u64, len: u64) -> Option<Range<usize>> {
    let start = usize::try_from(offset).ok()?;
    let end = start.checked_add(usize::try_from(len).ok()?)?;
    (end <= data.len()).then_some(start..end)
}

/// Bounds-check the section header table and the section name table.
/// `xmas-elf` slices both without checking.
fn check_section_table(elf: &ElfFile<'_>, data: &[u8]) -> Result<()> {
    let pt2 = &elf.header.pt2;
    let entry_size = match elf.header.pt1.class() {
        Class::SixtyFour => 64,
        Class::ThirtyTwo => 40,
        _ => return Err(Error::ElfSlot("unsupported ELF class".to_string())),
    };
    if pt2.sh_entry_size() != entry_size {
        return Err(Error::ElfSlot(format!(
            "section header entries are {} bytes, expected {}",
            pt2.sh_entry_size(),
            entry_size
        )));
    }
    let count = pt2.sh_count();
    let table_len = u64::from(count) * u64::from(entry_size);
    if file_range(data, pt2.sh_offset(), table_len).is_none() {
        return Err(Error::ElfSlot("section header table lies outside the file".to_string()));
    }
    if pt2.sh_str_index() >= count {
        return Err(Error::ElfSlot("section name table index out of range".to_string()));
    }

    let strtab = elf
        .section_header(pt2.sh_str_index())
        .map_err(|e| Error::ElfSlot(format!("section name table: {}", e)))?;
    let names = file_range(data, strtab.offset(), strtab.size())
        .filter(|_| !matches!(strtab.get_type(), Ok(ShType::NoBits)))
        .map(|range| &data[range])
        .ok_or_else(|| Error::ElfSlot("section name table lies outside the file".to_string()))?;
    // Every name must start inside the table, and the table must end in NUL.
    if names.last() != Some(&0) {
        return Err(Error::ElfSlot("section name table is not NUL-terminated".to_string()));
    }
    if elf.section_iter().any(|sh| sh.name() as usize >= names.len()) {
        return Err(Error::ElfSlot("section name offset out of range".to_string()));
    }
    Ok(())
}

/// File range of the signature slot.
fn locate_slot(data: &[u8], section: &str) -> Result<Range<usize>> {
    let elf = ElfFile::new(data).map_err(|e| Error::ElfSlot(format!("not an ELF file: {}", e)))?;
    check_section_table(&elf, data)?;
    let header = elf
        .find_section_by_name(section)
        .ok_or_else(|| Error::ElfSlot(format!("section {} not found", section)))?;
    if matches!(header.get_type(), Ok(ShType::NoBits)) {
        return Err(Error::ElfSlot(format!("section {} has no file contents", section)));
    }
    if header.size() != SIG_LEN as u64 {
        return Err(Error::ElfSlot(format!(
            "section {} is {} bytes, expected {}",
            section,
            header.size(),
            SIG_LEN
        )));
    }
    let slot = file_range(data, header.offset(), SIG_LEN as u64)
        .ok_or_else(|| Error::ElfSlot(format!("section {} lies outside the file", section)))?;
    log_debug(
        "elf",
        &format!("signature slot {} at {:#x}..{:#x}", section, slot.start, slot.end),
    );
    Ok(slot)
}

/// A parsed ELF file with a located signature slot.
#[derive(Debug, Clone)]
pub struct ElfImage<'a> {
    data: &'a [u8],
    slot: Range<usize>,
}

impl<'a> ElfImage<'a> {
    pub fn parse(data: &'a [u8], section: &str) -> Result<Self> {
        let slot = locate_slot(data, section)?;
        Ok(Self { data, slot })
    }

    pub fn slot(&self) -> &'a [u8] {
        &self.data[self.slot.clone()]
    }

    fn is_unsigned(&self) -> bool {
        self.slot().iter().all(|&b| b == 0)
    }
}

impl Carrier for ElfImage<'_> {
    fn covered(&self) -> Cow<'_, [u8]> {
        let mut cleared = self.data.to_vec();
        cleared[self.slot.clone()].fill(0);
        Cow::Owned(cleared)
    }

    fn evidence(&self) -> Evidence<'_> {
        Evidence {
            algorithm: Some(ALGORITHM),
            digest: None,
            signature: (!self.is_unsigned()).then(|| self.slot()),
            fingerprint: None,
        }
    }
}

/// Sign `data` and return a copy with the signature in its slot. An
/// already-signed file is re-signed.
pub fn sign_elf(data: &[u8], signer: &dyn DigestSigner, section: &str) -> Result<Vec<u8>> {
    let image = ElfImage::parse(data, section)?;
    let mut out = image.covered().into_owned();
    let sealed = seal(&out, ALGORITHM, Some(signer));
    let signature = sealed
        .signature
        .ok_or_else(|| Error::ElfSlot("signer produced no signature".to_string()))?;
    out[image.slot.clone()].copy_from_slice(&signature);
    log_info("elf", &format!("hm = {}", hex::encode(&sealed.digest)));
    log_info("elf", &format!("sm = {}", hex::encode(signature)));
    Ok(out)
}

pub fn verify_elf(data: &[u8], public_key: &VerifyingKey, section: &str) -> VerifyResult {
    match ElfImage::parse(data, section) {
        Ok(image) => verify_carrier(&image, public_key),
        Err(e) => {
            log_warn("elf", &e.to_string());
            VerifyResult::Malformed(e.to_string())
        }
    }
}

#[cfg(test)]
pub(crate) mod fixture {
    /// Minimal little-endian ELF64 with `.text`, the named slot and `.shstrtab`.
    pub fn minimal_elf(slot_name: &str, slot: &[u8]) -> Vec<u8> {
        let text: &[u8] = b"\x00\xbf\x70\x47firmware code";
        let mut shstr = vec![0u8];
        let text_name = shstr.len();
        shstr.extend_from_slice(b".text\0");
        let slot_name_off = shstr.len();
        shstr.extend_from_slice(slot_name.as_bytes());
        shstr.push(0);
        let shstr_name = shstr.len();
        shstr.extend_from_slice(b".shstrtab\0");

        let text_off = 64;
        let slot_off = text_off + text.len();
        let shstr_off = slot_off + slot.len();
        let shoff = (shstr_off + shstr.len() + 7) & !7;

        let mut out = Vec::new();
        out.extend_from_slice(b"\x7fELF");
        out.extend_from_slice(&[2, 1, 1, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        out.extend_from_slice(&2u16.to_le_bytes()); // ET_EXEC
        out.extend_from_slice(&0x28u16.to_le_bytes()); // EM_ARM
        out.extend_from_slice(&1u32.to_le_bytes());
        out.extend_from_slice(&0x0800_8400u64.to_le_bytes());
        out.extend_from_slice(&0u64.to_le_bytes());
        out.extend_from_slice(&(shoff as u64).to_le_bytes());
        out.extend_from_slice(&0u32.to_le_bytes());
        out.extend_from_slice(&64u16.to_le_bytes());
        out.extend_from_slice(&56u16.to_le_bytes());
        out.extend_from_slice(&0u16.to_le_bytes());
        out.extend_from_slice(&64u16.to_le_bytes());
        out.extend_from_slice(&4u16.to_le_bytes());
        out.extend_from_slice(&3u16.to_le_bytes());
        assert_eq!(out.len(), 64);

        out.extend_from_slice(text);
        out.extend_from_slice(slot);
        out.extend_from_slice(&shstr);
        out.resize(shoff, 0);

        let sh = |out: &mut Vec<u8>, name: usize, ty: u32, off: usize, size: usize| {
            out.extend_from_slice(&(name as u32).to_le_bytes());
            out.extend_from_slice(&ty.to_le_bytes());
            out.extend_from_slice(&0u64.to_le_bytes());
            out.extend_from_slice(&0u64.to_le_bytes());
            out.extend_from_slice(&(off as u64).to_le_bytes());
            out.extend_from_slice(&(size as u64).to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&0u32.to_le_bytes());
            out.extend_from_slice(&1u64.to_le_bytes());
            out.extend_from_slice(&0u64.to_le_bytes());
        };
        sh(&mut out, 0, 0, 0, 0);
        sh(&mut out, text_name, 1, text_off, text.len());
        sh(&mut out, slot_name_off, 1, slot_off, slot.len());
        sh(&mut out, shstr_name, 3, shstr_off, shstr.len());
        out
    }
}
