//! uBLoad firmware trust-container: a recursive tagged-section envelope
//! around a raw firmware binary, with the builder, describer and verifier
//! that produce and consume it.

pub mod capsule;
pub mod config;
pub mod crypto;
pub mod error;
pub mod fsio;
pub mod log;
pub mod verify;

pub use capsule::{describe, ImageBuilder, Layout, Tag, Tree};
pub use config::ImageConfig;
pub use crypto::{DigestSigner, HashAlgorithm};
pub use error::{Error, Result};
pub use verify::{verify, VerifyResult};
