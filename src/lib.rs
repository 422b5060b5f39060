//! # Asset Bundle - Packed Game Asset Container
//!
//! `asset-bundle` stores many named assets in a single binary file with:
//!
//! - **Random-access reads** through bounded, seekable streams
//! - **In-place updates** when a re-imported asset still fits its reserved span
//! - **Lazy deletion** with compaction when the bundle is closed
//! - **Transparent compression** (raw deflate or LZMA per asset)
//! - **Integrity checking** via a checksum stored in the header
//! - **Overlays** composing several bundles, first match wins
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use asset_bundle::{AssetBundle, ImportOptions, OpenMode, PackedBundle, Result};
//!
//! # fn main() -> Result<()> {
//! let mut bundle = PackedBundle::open("assets.bundle", OpenMode::Writable)?;
//!
//! // Reserve headroom so later, larger versions can be rewritten in place
//! bundle.import_file(
//!     "img/logo.png",
//!     &mut &b"...png bytes..."[..],
//!     &ImportOptions::new().reserve(1024),
//! )?;
//!
//! let bytes = bundle.read_file("IMG\\logo.png")?;
//! for path in bundle.enumerate_files(Some("img/")) {
//!     println!("{}", path);
//! }
//!
//! // Compacts, writes the index and refreshes the checksum
//! bundle.close()?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Overlays
//!
//! ```rust,no_run
//! use asset_bundle::{
//!     AggregateBundle, AssetBundle, OpenMode, PackedBundle, Result, UnpackedBundle,
//! };
//!
//! # fn main() -> Result<()> {
//! let overlay = AggregateBundle::new();
//! overlay.attach(Box::new(UnpackedBundle::new("mods")?));
//! overlay.attach(Box::new(PackedBundle::open("data.bundle", OpenMode::ReadOnly)?));
//!
//! // Loose files in mods/ shadow the packed ones
//! let shader = overlay.read_file("shaders/water.fx")?;
//! # Ok(())
//! # }
//! ```

pub mod aggregate;
pub mod attributes;
pub mod bundle;
pub mod compression;
pub mod config;
pub mod context;
pub mod error;
pub mod packed;
pub mod path;
pub mod unpacked;

pub use aggregate::{AggregateBundle, LayerId};
pub use attributes::AssetAttributes;
pub use bundle::{AssetBundle, ImportOptions};
pub use config::{BundleConfig, BUNDLE_FORMAT_VERSION};
pub use error::{BundleError, Result};
pub use packed::{
    calc_bundle_checksum, is_bundle_corrupted, refresh_bundle_checksum, AssetDescriptor,
    AssetStream, OpenMode, PackedBundle,
};
pub use unpacked::UnpackedBundle;
