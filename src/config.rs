//! Image build configuration.
//!
//! Values come from `ImageConfig::default()`, optionally overridden by a TOML
//! file, then by command-line flags. Addresses and offsets accept either
//! integers or `0x`-prefixed hex strings:
//!
//! ```toml
//! base = "0x08008000"
//! offset = "0x400"
//! check = true
//! hash = "sha512"
//! version = "1.2.0"
//! compatibility = ["board-x", "board-y"]
//! layout = "firmware-entry"
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Deserializer};

use crate::capsule::metadata::Layout;
use crate::crypto::hash::HashAlgorithm;
use crate::error::{Error, Result};
use crate::log::logger::log_debug;

/// Flash address the image is loaded at.
pub const DEFAULT_BASE: u64 = 0x0800_8000;
/// Offset of the vector table inside the image.
pub const DEFAULT_OFFSET: u64 = 0x400;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ImageConfig {
    #[serde(deserialize_with = "de_number")]
    pub base: u64,
    #[serde(deserialize_with = "de_number")]
    pub offset: u64,
    /// Add an integrity hash to the verification region.
    pub check: bool,
    pub hash: HashAlgorithm,
    pub version: Option<String>,
    pub compatibility: Vec<String>,
    pub layout: Layout,
}

impl Default for ImageConfig {
    fn default() -> Self {
        Self {
            base: DEFAULT_BASE,
            offset: DEFAULT_OFFSET,
            check: false,
            hash: HashAlgorithm::default(),
            version: None,
            compatibility: Vec::new(),
            layout: Layout::default(),
        }
    }
}

impl ImageConfig {
    pub fn from_toml(text: &str, origin: &Path) -> Result<Self> {
        toml::from_str(text).map_err(|source| Error::Config {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config = Self::from_toml(&text, path)?;
        log_debug("config", &format!("loaded {}", path.display()));
        Ok(config)
    }

    /// Hash selection as seen by the builder: `None` unless checking is on.
    pub fn effective_hash(&self) -> Option<HashAlgorithm> {
        self.check.then_some(self.hash)
    }
}

/// Parse `0x`-prefixed hex or plain decimal.
pub fn parse_number(text: &str) -> Result<u64> {
    let t = text.trim();
    let parsed = match t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(&hex.replace('_', ""), 16),
        None => t.replace('_', "").parse::<u64>(),
    };
    parsed.map_err(|_| Error::InvalidNumber(text.to_string()))
}

fn de_number<'de, D: Deserializer<'de>>(deserializer: D) -> core::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Int(u64),
        Text(String),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Int(n) => Ok(n),
        Raw::Text(s) => parse_number(&s).map_err(serde::de::Error::custom),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_stock_layout() {
        let c = ImageConfig::default();
        assert_eq!(c.base, 0x0800_8000);
        assert_eq!(c.offset, 0x400);
        assert_eq!(c.effective_hash(), None);
    }

    #[test]
    fn toml_accepts_hex_and_integers() {
        let text = r#"
            base = "0x08010000"
            offset = 2048
            check = true
            version = "1.2.0"
            compatibility = ["board-x", "board-y"]
            layout = "firmware-entry"
        "#;
        let c = ImageConfig::from_toml(text, Path::new("t.toml")).unwrap();
        assert_eq!(c.base, 0x0801_0000);
        assert_eq!(c.offset, 2048);
        assert_eq!(c.effective_hash(), Some(HashAlgorithm::Sha512));
        assert_eq!(c.compatibility, vec!["board-x", "board-y"]);
        assert_eq!(c.layout, Layout::FirmwareEntry);
    }

    #[test]
    fn unknown_keys_and_bad_numbers_fail() {
        assert!(matches!(
            ImageConfig::from_toml("frobnicate = 1", Path::new("t.toml")),
            Err(Error::Config { .. })
        ));
        assert!(ImageConfig::from_toml("offset = \"0xZZ\"", Path::new("t.toml")).is_err());
    }

    #[test]
    fn parse_number_forms() {
        assert_eq!(parse_number("0x400").unwrap(), 1024);
        assert_eq!(parse_number("0X0800_8000").unwrap(), 0x0800_8000);
        assert_eq!(parse_number("1024").unwrap(), 1024);
        assert!(matches!(parse_number("0x"), Err(Error::InvalidNumber(_))));
        assert!(parse_number("ten").is_err());
    }

    #[test]
    fn load_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        assert!(matches!(ImageConfig::load(&path), Err(Error::Io { .. })));
    }
}
