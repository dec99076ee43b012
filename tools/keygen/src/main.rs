//! ubload-keygen: generate Ed25519 firmware signing keys and a keys.json
//! manifest with container fingerprints.

use std::{fs, path::Path, path::PathBuf};

use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use clap::Parser;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use serde::Serialize;
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use ubload_image::crypto::fingerprint;
use ubload_image::fsio::{set_mode, write_atomic};

const KEYID_CONTEXT: &str = "UBLOAD:KEYID:ED25519:v1";

#[derive(Parser, Debug)]
#[command(name = "ubload-keygen", about = "Generate Ed25519 firmware signing keys and keys.json")]
struct Args {
    /// Number of keypairs to produce
    #[arg(short, long, default_value_t = 1)]
    count: usize,

    /// Output directory to write keys (created if missing)
    #[arg(short, long, value_name = "DIR", default_value = "keys")]
    out_dir: PathBuf,

    /// Key file format: raw (binary), hex, base64
    #[arg(long, value_name = "fmt", default_value = "hex")]
    format: String,

    /// Manifest file name, relative to the output directory
    #[arg(long, value_name = "PATH", default_value = "keys.json")]
    manifest: PathBuf,

    /// Prefix for key ids
    #[arg(long, default_value = "fw")]
    id_prefix: String,

    /// Make secret files world-readable (unsafe; for CI/test only)
    #[arg(long, action = clap::ArgAction::SetTrue)]
    insecure_world_readable: bool,

    /// Do not write secret files; write only public keys and the manifest
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub_only: bool,

    /// Operator identifier (hashed into the manifest for provenance)
    #[arg(long, value_name = "STR")]
    operator: Option<String>,

    /// Allow writing secret files
    #[arg(long, action = clap::ArgAction::SetTrue)]
    allow_write_secrets: bool,
}

#[derive(Serialize, Debug)]
struct KeyEntry {
    id: String,
    pubkey_hex: String,
    /// First four bytes of sha512(pk), as carried in signed images.
    fingerprint: String,
    pubkey_sha256: String,
    keyid_blake3: String,
}

#[derive(Serialize)]
struct Manifest {
    tool: String,
    tool_version: String,
    created_at_utc: String,
    operator_hash: Option<String>,
    keys: Vec<KeyEntry>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Safety guard: writing secret files requires explicit allow flag unless pub_only
    if !args.pub_only && !args.allow_write_secrets {
        eprintln!("Secret files will NOT be written unless --allow-write-secrets is provided. Use --pub-only to write only public keys.");
        std::process::exit(2);
    }

    let keys = generate(&args)?;
    let manifest = Manifest {
        tool: "ubload-keygen".to_string(),
        tool_version: env!("CARGO_PKG_VERSION").to_string(),
        created_at_utc: Utc::now().to_rfc3339(),
        operator_hash: args.operator.as_ref().map(|op| sha256_hex(op.as_bytes())),
        keys,
    };
    let path = manifest_path(&args);
    write_atomic(&path, &serde_json::to_vec_pretty(&manifest)?)?;
    println!("Wrote manifest -> {}", path.display());

    println!("Generated {} keypairs in {}", manifest.keys.len(), args.out_dir.display());
    println!("Reminder: protect secret key files and do NOT commit them to source control.");
    Ok(())
}

fn manifest_path(args: &Args) -> PathBuf {
    if args.manifest.is_relative() {
        args.out_dir.join(&args.manifest)
    } else {
        args.manifest.clone()
    }
}

fn generate(args: &Args) -> Result<Vec<KeyEntry>> {
    if args.count == 0 {
        bail!("count must be >= 1");
    }
    let fmt = args.format.to_lowercase();
    if !["raw", "hex", "base64"].contains(&fmt.as_str()) {
        bail!("unsupported format: {} (supported: raw, hex, base64)", fmt);
    }
    fs::create_dir_all(&args.out_dir).with_context(|| format!("creating {}", args.out_dir.display()))?;

    let mut entries = Vec::with_capacity(args.count);
    for i in 1..=args.count {
        let key = SigningKey::generate(&mut OsRng);
        let id = format!("{}{}", args.id_prefix, i);
        let entry = write_key(&args.out_dir, &id, &key, &fmt, args)?;
        println!(
            "{}: wrote pub {} -> {}",
            id,
            fmt,
            args.out_dir.join(format!("{}.pub{}", id, extension(&fmt))).display()
        );
        entries.push(entry);
    }
    Ok(entries)
}

/// File name suffix for a key format; raw files carry none.
fn extension(fmt: &str) -> &'static str {
    match fmt {
        "hex" => ".hex",
        "base64" => ".b64",
        _ => "",
    }
}

fn encode_key(fmt: &str, bytes: &[u8]) -> Zeroizing<Vec<u8>> {
    Zeroizing::new(match fmt {
        "hex" => hex::encode(bytes).into_bytes(),
        "base64" => STANDARD.encode(bytes).into_bytes(),
        _ => bytes.to_vec(),
    })
}

fn write_key(dir: &Path, id: &str, key: &SigningKey, fmt: &str, args: &Args) -> Result<KeyEntry> {
    let pub_bytes = key.verifying_key().to_bytes();
    let ext = extension(fmt);

    write_atomic(&dir.join(format!("{}.pub{}", id, ext)), &encode_key(fmt, &pub_bytes))?;

    if !args.pub_only {
        let mode = if args.insecure_world_readable { 0o644 } else { 0o600 };
        let secret = Zeroizing::new(key.to_bytes());
        let path = dir.join(format!("{}.key{}", id, ext));
        write_atomic(&path, &encode_key(fmt, secret.as_slice()))?;
        set_mode(&path, mode)?;
    }

    Ok(KeyEntry {
        id: id.to_string(),
        pubkey_hex: hex::encode(pub_bytes),
        fingerprint: hex::encode(fingerprint(&pub_bytes)),
        pubkey_sha256: sha256_hex(&pub_bytes),
        keyid_blake3: hex::encode(derive_keyid(&pub_bytes)),
    })
}

fn derive_keyid(pubkey: &[u8; 32]) -> [u8; 32] {
    let mut h = blake3::Hasher::new_derive_key(KEYID_CONTEXT);
    h.update(pubkey);
    *h.finalize().as_bytes()
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
