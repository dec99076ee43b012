//! Error taxonomy for image construction, parsing and key handling.
//!
//! Verification outcomes are not errors; see [`crate::verify::VerifyResult`].

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Fewer than 8 bytes left where a section header was expected.
    #[error("truncated section header at offset {offset:#x}: {available} of 8 bytes available")]
    TruncatedHeader { offset: usize, available: usize },

    /// The header declares more payload than the buffer holds.
    #[error(
        "truncated payload of section {tag:#010x} at offset {offset:#x}: \
         declared {declared} bytes, {available} available"
    )]
    TruncatedPayload {
        offset: usize,
        tag: u32,
        declared: u32,
        available: usize,
    },

    #[error("section payload of {len} bytes does not fit a 32-bit length field")]
    SectionTooLarge { len: usize },

    /// Metadata does not fit in front of the firmware's vector table.
    #[error("firmware metadata too big: needs {required} bytes, target offset is {target_offset:#x}")]
    MetadataTooLarge { required: u64, target_offset: u64 },

    #[error("malformed image: {0}")]
    Malformed(String),

    #[error("firmware check hash required for signing")]
    HashRequiredForSigning,

    #[error("unknown hash type '{0}' (supported: sha512)")]
    UnknownHash(String),

    #[error("invalid key material: {0}")]
    InvalidKey(&'static str),

    #[error("ELF signature slot: {0}")]
    ElfSlot(String),

    #[error("invalid number '{0}'")]
    InvalidNumber(String),

    #[error("config {path}: {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
