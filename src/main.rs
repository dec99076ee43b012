//! ubload-image: build, inspect and verify uBLoad firmware images, and sign
//! ELF executables in place.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use clap::{Args, Parser, Subcommand};
use ed25519_dalek::{SigningKey, VerifyingKey};
use zeroize::Zeroizing;

use ubload_image::config::{parse_number, ImageConfig};
use ubload_image::crypto::sig::{public_key_of, signing_key_from_bytes, verifying_key_from_bytes};
use ubload_image::log::logger::{log_debug, log_info};
use ubload_image::log::{init_logger, LogLevel};
use ubload_image::verify::{sign_elf, verify_elf, SIGNATURE_SECTION};
use ubload_image::{describe, fsio, verify, HashAlgorithm, ImageBuilder, Layout};

#[derive(Parser, Debug)]
#[command(name = "ubload-image", version, about = "uBLoad firmware image creator and verifier")]
struct Cli {
    /// More log output on stderr (repeatable)
    #[arg(long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Only log errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Build a firmware image from a raw binary
    Build(BuildArgs),

    /// Verify an image's hash and signature
    Verify {
        /// Image file
        #[arg(short, long, value_name = "fwfile")]
        input: PathBuf,

        #[command(flatten)]
        key: KeyArgs,
    },

    /// Print the section tree of an image
    Describe {
        /// Image file
        #[arg(short, long, value_name = "fwfile")]
        input: PathBuf,

        /// Load address the offsets are printed against
        #[arg(short, long, value_name = "hex")]
        base: Option<String>,
    },

    /// Sign an ELF executable in its reserved signature section
    ElfSign {
        /// ELF file to sign
        #[arg(short, long, value_name = "elf")]
        input: PathBuf,

        /// Signing private key
        #[arg(long, value_name = "KEY")]
        sk: PathBuf,

        /// Output file (defaults to signing in place)
        #[arg(short, long, value_name = "elf")]
        output: Option<PathBuf>,

        /// Name of the reserved 64-byte section
        #[arg(long, default_value = SIGNATURE_SECTION)]
        section: String,
    },

    /// Verify the signature embedded in an ELF executable.
    ///
    /// The digest is sha512 over the file with the slot zeroed. Files signed
    /// by the older blake2s-based elfsign script do not verify; re-sign them
    /// with `elf-sign`.
    ElfVerify {
        /// ELF file to verify
        #[arg(short, long, value_name = "elf")]
        input: PathBuf,

        #[command(flatten)]
        key: KeyArgs,

        /// Name of the reserved 64-byte section
        #[arg(long, default_value = SIGNATURE_SECTION)]
        section: String,
    },

    /// Save the public key of a private key (base64)
    Pubkey {
        /// Signing private key
        #[arg(long, value_name = "KEY")]
        sk: PathBuf,

        /// Output file
        #[arg(short, long, value_name = "PATH")]
        output: PathBuf,
    },
}

#[derive(Args, Debug)]
struct BuildArgs {
    /// Input binary file
    #[arg(short, long, value_name = "binfile")]
    input: PathBuf,

    /// Output uBLoad firmware image file
    #[arg(short, long, value_name = "fwfile")]
    output: PathBuf,

    /// Sign the firmware image using specified private key
    #[arg(short, long, value_name = "KEY")]
    sign: Option<PathBuf>,

    /// Add firmware hash for integrity checking
    #[arg(short, long)]
    check: bool,

    /// Hash type for signing/integrity checking
    #[arg(long, value_name = "HASH")]
    hash_type: Option<String>,

    /// Firmware base address for loading
    #[arg(short, long, value_name = "hex")]
    base: Option<String>,

    /// Offset of the vector table inside the image
    #[arg(long, value_name = "hex")]
    offset: Option<String>,

    /// Version of the firmware image
    #[arg(short = 'v', long = "version", value_name = "V")]
    fw_version: Option<String>,

    /// Hardware compatibility string (repeatable)
    #[arg(long, value_name = "C")]
    compatibility: Vec<String>,

    /// What the offset measures to: region or firmware-entry
    #[arg(long, value_name = "LAYOUT")]
    layout: Option<String>,

    /// TOML file with defaults for the options above
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

#[derive(Args, Debug)]
#[group(required = true, multiple = false)]
struct KeyArgs {
    /// Public key for verification
    #[arg(long, value_name = "KEY")]
    pk: Option<PathBuf>,

    /// Private key to derive the public key from
    #[arg(long, value_name = "KEY")]
    sk: Option<PathBuf>,
}

fn load_signing_key(path: &Path) -> Result<SigningKey> {
    let data = Zeroizing::new(
        fsio::read(path).with_context(|| format!("Cannot read key file '{}'", path.display()))?,
    );
    signing_key_from_bytes(&data).with_context(|| format!("key file '{}'", path.display()))
}

impl KeyArgs {
    fn public_key(&self) -> Result<VerifyingKey> {
        if let Some(sk) = &self.sk {
            return Ok(public_key_of(&load_signing_key(sk)?));
        }
        let pk = self.pk.as_deref().context("a public or private key is required")?;
        let data = fsio::read(pk).with_context(|| format!("Cannot read key file '{}'", pk.display()))?;
        verifying_key_from_bytes(&data).with_context(|| format!("key file '{}'", pk.display()))
    }
}

fn resolve_config(args: &BuildArgs) -> Result<ImageConfig> {
    let mut config = match &args.config {
        Some(path) => ImageConfig::load(path)?,
        None => ImageConfig::default(),
    };
    if let Some(base) = &args.base {
        config.base = parse_number(base)?;
    }
    if let Some(offset) = &args.offset {
        config.offset = parse_number(offset)?;
    }
    if args.check {
        config.check = true;
    }
    if let Some(hash) = &args.hash_type {
        config.hash = hash.parse::<HashAlgorithm>()?;
    }
    if let Some(version) = &args.fw_version {
        config.version = Some(version.clone());
    }
    if !args.compatibility.is_empty() {
        config.compatibility = args.compatibility.clone();
    }
    if let Some(layout) = &args.layout {
        config.layout = layout.parse::<Layout>()?;
    }
    log_debug("cli", &format!("effective config: {:?}", config));
    Ok(config)
}

fn run_build(args: &BuildArgs) -> Result<bool> {
    let config = resolve_config(args)?;
    let firmware = fsio::read(&args.input)
        .with_context(|| format!("Cannot read input file '{}'", args.input.display()))?;
    let key = args.sign.as_deref().map(load_signing_key).transpose()?;

    let mut builder = ImageBuilder::new(&firmware)
        .compatibility(&config.compatibility)
        .target_offset(config.offset)
        .layout(config.layout)
        .hash(config.effective_hash());
    if let Some(version) = config.version.as_deref() {
        builder = builder.version(version);
    }
    if let Some(key) = key.as_ref() {
        builder = builder.signer(key);
    }
    let image = builder.build()?;

    print!("{}", describe(&image, config.base));

    fsio::write_atomic(&args.output, &image)
        .with_context(|| format!("Cannot write output firmware file '{}'", args.output.display()))?;
    log_info("cli", &format!("wrote {}", args.output.display()));
    Ok(true)
}

fn run(cmd: &Cmd) -> Result<bool> {
    match cmd {
        Cmd::Build(args) => run_build(args),
        Cmd::Verify { input, key } => {
            let public_key = key.public_key()?;
            let image = fsio::read(input)?;
            let result = verify(&image, &public_key);
            println!("{}", result);
            Ok(result.is_valid())
        }
        Cmd::Describe { input, base } => {
            let base = match base {
                Some(b) => parse_number(b)?,
                None => ubload_image::config::DEFAULT_BASE,
            };
            let image = fsio::read(input)?;
            print!("{}", describe(&image, base));
            Ok(true)
        }
        Cmd::ElfSign {
            input,
            sk,
            output,
            section,
        } => {
            let key = load_signing_key(sk)?;
            let elf = fsio::read(input)?;
            let signed = sign_elf(&elf, &key, section)?;
            let out = output.as_deref().unwrap_or(input);
            fsio::write_atomic(out, &signed)
                .with_context(|| format!("Cannot write signed ELF '{}'", out.display()))?;
            Ok(true)
        }
        Cmd::ElfVerify {
            input,
            key,
            section,
        } => {
            let public_key = key.public_key()?;
            let elf = fsio::read(input)?;
            let result = verify_elf(&elf, &public_key, section);
            println!("{}", result);
            Ok(result.is_valid())
        }
        Cmd::Pubkey { sk, output } => {
            let key = load_signing_key(sk)?;
            let encoded = STANDARD.encode(public_key_of(&key).to_bytes());
            fsio::write_atomic(output, encoded.as_bytes())?;
            Ok(true)
        }
    }
}

/// 0 on success, 1 when an image or ELF does not verify, 2 on any error.
fn exit_status(cli: &Cli) -> u8 {
    match run(&cli.cmd) {
        Ok(true) => 0,
        Ok(false) => 1,
        Err(e) => {
            eprintln!("error: {:#}", e);
            2
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logger(LogLevel::from_verbosity(cli.verbose, cli.quiet));
    ExitCode::from(exit_status(&cli))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{tempdir, TempDir};

    fn cli(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("ubload-image").chain(args.iter().copied())).unwrap()
    }

    fn path_str(dir: &TempDir, name: &str) -> String {
        dir.path().join(name).to_str().unwrap().to_string()
    }

    /// Firmware file plus hex private keys `a.key` and `b.key`.
    fn workspace() -> TempDir {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("app.bin"), [0x5au8; 100]).unwrap();
        fs::write(dir.path().join("a.key"), hex::encode([7u8; 32])).unwrap();
        fs::write(dir.path().join("b.key"), hex::encode([8u8; 32])).unwrap();
        dir
    }

    fn build_signed(dir: &TempDir) -> String {
        let (bin, out, key) = (path_str(dir, "app.bin"), path_str(dir, "app.fw"), path_str(dir, "a.key"));
        let status = exit_status(&cli(&[
            "build", "-i", &bin, "-o", &out, "--check", "-s", &key, "-v", "1.0.0",
            "--compatibility", "board-x",
        ]));
        assert_eq!(status, 0);
        out
    }

    #[test]
    fn verify_exit_codes() {
        let dir = workspace();
        let image = build_signed(&dir);
        let (a, b) = (path_str(&dir, "a.key"), path_str(&dir, "b.key"));

        assert_eq!(exit_status(&cli(&["verify", "-i", &image, "--sk", &a])), 0);
        assert_eq!(exit_status(&cli(&["verify", "-i", &image, "--sk", &b])), 1);

        let mut bytes = fs::read(&image).unwrap();
        bytes[0x40] ^= 1;
        let tampered = path_str(&dir, "tampered.fw");
        fs::write(&tampered, &bytes).unwrap();
        assert_eq!(exit_status(&cli(&["verify", "-i", &tampered, "--sk", &a])), 1);

        let missing = path_str(&dir, "absent.fw");
        assert_eq!(exit_status(&cli(&["verify", "-i", &missing, "--sk", &a])), 2);
    }

    #[test]
    fn pubkey_file_verifies() {
        let dir = workspace();
        let image = build_signed(&dir);
        let (a, pk) = (path_str(&dir, "a.key"), path_str(&dir, "a.pub"));
        assert_eq!(exit_status(&cli(&["pubkey", "--sk", &a, "-o", &pk])), 0);
        assert_eq!(exit_status(&cli(&["verify", "-i", &image, "--pk", &pk])), 0);
    }

    #[test]
    fn failed_build_writes_nothing() {
        let dir = workspace();
        let (bin, out, key) = (path_str(&dir, "app.bin"), path_str(&dir, "app.fw"), path_str(&dir, "a.key"));

        // Signing needs --check.
        assert_eq!(exit_status(&cli(&["build", "-i", &bin, "-o", &out, "-s", &key])), 2);
        assert!(!dir.path().join("app.fw").exists());

        // 100-byte firmware cannot fit before a 0x40 offset.
        assert_eq!(
            exit_status(&cli(&["build", "-i", &bin, "-o", &out, "--offset", "0x40"])),
            2
        );
        assert!(!dir.path().join("app.fw").exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 3);
    }

    #[test]
    fn flags_override_config_file() {
        let dir = workspace();
        let config = path_str(&dir, "image.toml");
        fs::write(
            &config,
            "offset = \"0x200\"\nversion = \"from-file\"\ncompatibility = [\"board-a\"]\n",
        )
        .unwrap();
        let parsed = cli(&[
            "build", "-i", "x", "-o", "y", "--config", &config, "--offset", "0x100", "--check",
        ]);
        let Cmd::Build(args) = &parsed.cmd else {
            panic!("expected build");
        };
        let resolved = resolve_config(args).unwrap();
        assert_eq!(resolved.offset, 0x100);
        assert_eq!(resolved.version.as_deref(), Some("from-file"));
        assert_eq!(resolved.compatibility, vec!["board-a"]);
        assert_eq!(resolved.effective_hash(), Some(HashAlgorithm::Sha512));
    }
}
