//! Asset Bundle CLI
//!
//! Inspect, unpack and edit packed asset bundles

use anyhow::{bail, Context};
use asset_bundle::packed::{stored_checksum, Header, HEADER_SIZE};
use asset_bundle::{
    calc_bundle_checksum, is_bundle_corrupted, refresh_bundle_checksum, AssetAttributes,
    AssetBundle, BundleConfig, ImportOptions, OpenMode, PackedBundle,
};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "asset-bundle")]
#[command(about = "Inspect and edit packed asset bundles")]
struct Args {
    /// Path to the bundle file
    #[arg(short = 'b', long)]
    bundle: PathBuf,

    /// TOML file with bundle settings
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List stored assets
    List {
        /// Only paths starting with this prefix (case-insensitive)
        #[arg(short, long)]
        prefix: Option<String>,

        /// Print descriptors as JSON
        #[arg(long)]
        json: bool,
    },
    /// Unpack every asset into a directory
    Extract {
        out_dir: PathBuf,

        #[arg(short, long)]
        prefix: Option<String>,
    },
    /// Import a file, creating the bundle if needed
    Import {
        source: PathBuf,

        /// Path inside the bundle
        dest: String,

        /// Bytes reserved after the payload for in-place growth
        #[arg(short, long, default_value = "0")]
        reserve: u32,

        #[arg(long, conflicts_with = "lzma")]
        deflate: bool,

        #[arg(long)]
        lzma: bool,
    },
    /// Delete an asset; space is reclaimed when the bundle is closed
    Delete { path: String },
    /// Check the checksum, header and every payload
    Verify,
    /// Recompute and store the header checksum
    RefreshChecksum,
    /// Print header fields and space usage
    Info,
}

#[derive(Serialize)]
struct Listing<'a> {
    path: &'a str,
    #[serde(flatten)]
    descriptor: &'a asset_bundle::AssetDescriptor,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();
    let config = match &args.config {
        Some(path) => BundleConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => BundleConfig::default(),
    };

    match args.command {
        Command::List { prefix, json } => list(&args.bundle, config, prefix.as_deref(), json),
        Command::Extract { out_dir, prefix } => {
            extract(&args.bundle, config, &out_dir, prefix.as_deref())
        }
        Command::Import {
            source,
            dest,
            reserve,
            deflate,
            lzma,
        } => {
            let mut attributes = AssetAttributes::NONE;
            if deflate {
                attributes |= AssetAttributes::ZIPPED_DEFLATE;
            }
            if lzma {
                attributes |= AssetAttributes::ZIPPED_LZMA;
            }
            let extension = source
                .extension()
                .map(|e| format!(".{}", e.to_string_lossy()))
                .unwrap_or_default();
            let options = ImportOptions::new()
                .reserve(reserve)
                .attributes(attributes)
                .source_extension(extension);

            let mut bundle = open(&args.bundle, OpenMode::Writable, config)?;
            bundle
                .import_file_from_path(&source, &dest, &options)
                .with_context(|| format!("importing {}", source.display()))?;
            bundle.close()?;
            info!("Imported {} as {}", source.display(), dest);
            Ok(())
        }
        Command::Delete { path } => {
            if !args.bundle.exists() {
                bail!("bundle {} does not exist", args.bundle.display());
            }
            let mut bundle = open(&args.bundle, OpenMode::Writable, config)?;
            bundle.delete_file(&path)?;
            bundle.close()?;
            info!("Deleted {}", path);
            Ok(())
        }
        Command::Verify => verify(&args.bundle, config),
        Command::RefreshChecksum => {
            refresh_bundle_checksum(&args.bundle)?;
            println!("{:#010x}", calc_bundle_checksum(&args.bundle)?);
            Ok(())
        }
        Command::Info => print_info(&args.bundle, config),
    }
}

fn open(path: &Path, mode: OpenMode, config: BundleConfig) -> anyhow::Result<PackedBundle> {
    if mode == OpenMode::ReadOnly && !path.exists() {
        bail!("bundle {} does not exist", path.display());
    }
    PackedBundle::open_with_config(path, mode, config)
        .with_context(|| format!("opening bundle {}", path.display()))
}

fn list(path: &Path, config: BundleConfig, prefix: Option<&str>, json: bool) -> anyhow::Result<()> {
    let bundle = open(path, OpenMode::ReadOnly, config)?;
    let names: Vec<String> = bundle.enumerate_files(prefix).collect();

    if json {
        let mut listing = Vec::with_capacity(names.len());
        for name in &names {
            listing.push(Listing {
                path: name,
                descriptor: bundle.descriptor(name)?,
            });
        }
        println!("{}", serde_json::to_string_pretty(&listing)?);
    } else {
        for name in &names {
            let d = bundle.descriptor(name)?;
            println!(
                "{:>10} {:>10}  {}  {}",
                d.length,
                d.allocated_size,
                d.modification_time.format("%Y-%m-%d %H:%M:%S"),
                name
            );
        }
    }
    Ok(())
}

fn extract(
    path: &Path,
    config: BundleConfig,
    out_dir: &Path,
    prefix: Option<&str>,
) -> anyhow::Result<()> {
    let bundle = open(path, OpenMode::ReadOnly, config)?;
    let mut count = 0usize;
    for name in bundle.enumerate_files(prefix) {
        let relative = Path::new(name.trim_start_matches('/'));
        if !relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            warn!("Skipping {}: path leaves the output directory", name);
            continue;
        }
        let target = out_dir.join(relative);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        let data = bundle
            .read_file(&name)
            .with_context(|| format!("reading {}", name))?;
        fs::write(&target, data).with_context(|| format!("writing {}", target.display()))?;
        count += 1;
    }
    info!("Extracted {} assets to {}", count, out_dir.display());
    Ok(())
}

fn verify(path: &Path, config: BundleConfig) -> anyhow::Result<()> {
    if is_bundle_corrupted(path)? {
        bail!("bundle {} failed the checksum check", path.display());
    }
    let bundle = open(path, OpenMode::ReadOnly, config)?;
    let names: Vec<String> = bundle.enumerate_files(None).collect();
    let mut sink = Vec::new();
    for name in &names {
        sink.clear();
        bundle
            .open_file(name)?
            .read_to_end(&mut sink)
            .with_context(|| format!("decoding {}", name))?;
    }
    println!("OK: {} assets", names.len());
    Ok(())
}

fn print_info(path: &Path, config: BundleConfig) -> anyhow::Result<()> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    if bytes.len() < HEADER_SIZE {
        bail!("bundle {} is {} bytes, shorter than the header", path.display(), bytes.len());
    }
    let mut raw = [0u8; HEADER_SIZE];
    raw.copy_from_slice(&bytes[..HEADER_SIZE]);
    let header = Header::from_bytes(&raw);

    let bundle = open(path, OpenMode::ReadOnly, config)?;
    let names: Vec<String> = bundle.enumerate_files(None).collect();
    let (mut stored, mut allocated, mut compressed) = (0u64, 0u64, 0usize);
    for name in &names {
        let d = bundle.descriptor(name)?;
        stored += d.length as u64;
        allocated += d.allocated_size as u64;
        if d.attributes.is_zipped() {
            compressed += 1;
        }
    }

    println!("signature:      {:#06x}", header.signature);
    println!("format version: {}", header.format_version);
    println!("index offset:   {}", header.index_offset);
    println!(
        "checksum:       {:#010x} (computed {:#010x})",
        stored_checksum(path)?.unwrap_or_default(),
        calc_bundle_checksum(path)?
    );
    println!("file size:      {}", bytes.len());
    println!("assets:         {} ({} compressed)", names.len(), compressed);
    println!("payload bytes:  {}", stored);
    println!("reserved slack: {}", allocated - stored);
    Ok(())
}
