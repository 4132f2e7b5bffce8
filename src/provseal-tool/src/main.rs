//! provseal-tool - operator CLI for image provenance.
//!
//! ## Usage
//!
//! ```bash
//! # Create a signing key
//! provseal-tool keygen --output signing.json --algorithm ed25519
//!
//! # Seal an image and record the proof
//! provseal-tool sign \
//!     --image photo.jpg \
//!     --key signing.json \
//!     --store ./proofs \
//!     --meta creator=Jane --meta title="Harbour at dusk" \
//!     --output photo.sealed.jpg
//!
//! # Recover the binding (and resolve it against a store)
//! provseal-tool extract --image photo.sealed.jpg --store ./proofs --pretty
//!
//! # List segments / chunks
//! provseal-tool inspect --image photo.sealed.jpg
//! ```

mod wiring;

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use provseal_core::extract::MetadataExtractor;
use provseal_core::formats::{FormatRegistry, ImageContainer};
use provseal_core::service::proof_id_from_uri;
use provseal_core::{ImageFormat, LookupResult, SealConfig};
use provseal_crypto::SignatureAlgorithm;
use provseal_keyring::KeyFile;

const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Image provenance sealing and recovery.
#[derive(Parser)]
#[command(name = "provseal-tool")]
#[command(version = VERSION)]
#[command(about = "Seal, recover and inspect image provenance")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a signing key file
    Keygen {
        /// Where to write the key file
        #[arg(short, long)]
        output: PathBuf,

        /// ed25519 or ecdsa-p256
        #[arg(short, long, default_value = "ed25519")]
        algorithm: SignatureAlgorithm,

        /// Certificate subject
        #[arg(long, default_value = "provseal signing key")]
        subject: String,

        /// Validity in days
        #[arg(long, default_value_t = 365)]
        days: i64,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Sign an image, embed the binding and record the proof
    Sign {
        /// Image to sign (JPEG, PNG or WEBP)
        #[arg(short, long)]
        image: PathBuf,

        /// Key file
        #[arg(short, long)]
        key: PathBuf,

        /// Proof store directory
        #[arg(short, long)]
        store: PathBuf,

        /// Where to write the signed image
        #[arg(short, long)]
        output: PathBuf,

        /// Assertion as KEY=VALUE (repeatable)
        #[arg(short, long = "meta", value_parser = parse_assertion)]
        meta: Vec<(String, String)>,

        /// JSON config overrides
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// Recover the binding from an image
    Extract {
        /// Image to read
        #[arg(short, long)]
        image: PathBuf,

        /// Proof store directory to resolve the reference against
        #[arg(short, long)]
        store: Option<PathBuf>,

        /// JSON config overrides
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// List the segments or chunks of an image
    Inspect {
        /// Image to read
        #[arg(short, long)]
        image: PathBuf,
    },
}

fn parse_assertion(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got {raw:?}"))?;
    if key.is_empty() {
        return Err("assertion key is empty".to_string());
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries JSON.
    let level = if cli.verbose {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Keygen {
            output,
            algorithm,
            subject,
            days,
            force,
        } => {
            if output.exists() && !force {
                bail!("{} exists; pass --force to overwrite", output.display());
            }
            let key = KeyFile::generate(algorithm, subject, chrono::Duration::days(days))?;
            let fingerprint = key.to_material()?.certificate().fingerprint.clone();
            key.save(&output).await?;

            eprintln!("Key written to {}", output.display());
            eprintln!("  Algorithm: {}", algorithm);
            eprintln!("  Valid until: {}", key.not_after);
            println!("{}", fingerprint);
        },

        Commands::Sign {
            image,
            key,
            store,
            output,
            meta,
            config,
        } => {
            let config = wiring::load_config(config.as_deref())?;
            let bytes = tokio::fs::read(&image)
                .await
                .with_context(|| format!("reading {}", image.display()))?;

            let store = wiring::open_store(&store, &config).await?;
            let service = wiring::service(key, store, config).await?;
            let signed = service.sign_and_embed(&bytes, meta).await?;

            tokio::fs::write(&output, &signed.signed_bytes)
                .await
                .with_context(|| format!("writing {}", output.display()))?;

            if signed.strategy.is_degraded() {
                eprintln!("warning: container embedding failed, descriptive metadata only");
            }
            let summary = serde_json::json!({
                "proof_uri": signed.proof_uri,
                "proof_id": signed.proof_id,
                "manifest_hash": signed.manifest_hash,
                "format": signed.format,
                "strategy": signed.strategy,
                "was_new": signed.was_new,
                "size_delta": signed.signed_bytes.len() as i64 - bytes.len() as i64,
                "output": output.display().to_string(),
            });
            println!("{}", serde_json::to_string_pretty(&summary)?);
        },

        Commands::Extract {
            image,
            store,
            config,
            pretty,
        } => {
            let config = wiring::load_config(config.as_deref())?;
            let bytes = tokio::fs::read(&image)
                .await
                .with_context(|| format!("reading {}", image.display()))?;

            let extraction = MetadataExtractor::new(&config).extract(&bytes)?;
            let record = match (store, extraction.proof_uri.as_deref().and_then(proof_id_from_uri)) {
                (Some(dir), Some(proof_id)) => {
                    let store = wiring::open_store(&dir, &config).await?;
                    store.get_by_proof_id(&proof_id).await?
                },
                _ => None,
            };

            let result = LookupResult { extraction, record };
            let json = if pretty {
                serde_json::to_string_pretty(&result)?
            } else {
                serde_json::to_string(&result)?
            };
            println!("{}", json);
        },

        Commands::Inspect { image } => {
            let bytes = tokio::fs::read(&image)
                .await
                .with_context(|| format!("reading {}", image.display()))?;
            let format = ImageFormat::detect(&bytes);
            let registry = FormatRegistry::new(SealConfig::default().jpeg_segment_payload);
            let Some(container) = registry.container_for(format) else {
                bail!("{}: unsupported image format", image.display());
            };
            let segments = container.list_segments(&bytes);

            println!("{} ({}, {} bytes):", image.display(), format, bytes.len());
            println!("{:<12} {:>10} {:>10} {:>9} {:>5}", "Segment", "Offset", "Length", "provseal", "CRC");
            println!("{}", "-".repeat(50));
            for segment in &segments {
                let crc = match segment.crc_valid {
                    Some(true) => "ok",
                    Some(false) => "BAD",
                    None => "-",
                };
                println!(
                    "{:<12} 0x{:08x} {:>10} {:>9} {:>5}",
                    segment.label,
                    segment.offset,
                    segment.len,
                    if segment.provseal { "yes" } else { "" },
                    crc
                );
            }
            let covered: usize = segments.iter().map(|s| s.len).sum();
            if covered < bytes.len() {
                println!("\n{} trailing bytes not walked", bytes.len() - covered);
            }
            println!("\nTotal: {} segments", segments.len());
        },
    }

    Ok(())
}
