//! Bundle engine configuration
//!
//! Tunables for the packed bundle engine. Loaded from TOML or built in code;
//! every field has a default so a partial file is enough:
//!
//! ```toml
//! max_idle_handles = 4
//! verify_checksum_on_open = true
//! ```

use crate::error::{BundleError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// On-disk format version written by this build and expected on open
pub const BUNDLE_FORMAT_VERSION: i32 = 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BundleConfig {
    /// Format version required in the header
    pub format_version: i32,

    /// Pooled read handles kept open after release
    pub max_idle_handles: usize,

    /// Buffer size used when compaction shifts data
    pub block_copy_size: usize,

    /// Deflate level for `ZippedDeflate` imports (0-9)
    pub deflate_level: u32,

    /// Recompute the checksum on open and fail on mismatch
    pub verify_checksum_on_open: bool,
}

impl Default for BundleConfig {
    fn default() -> Self {
        BundleConfig {
            format_version: BUNDLE_FORMAT_VERSION,
            max_idle_handles: 8,
            block_copy_size: 4096,
            deflate_level: 6,
            verify_checksum_on_open: false,
        }
    }
}

impl BundleConfig {
    /// Parse a config from TOML text
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: BundleConfig =
            toml::from_str(text).map_err(|e| BundleError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Serialize to TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| BundleError::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_copy_size == 0 {
            return Err(BundleError::Config(
                "block_copy_size must be greater than zero".to_string(),
            ));
        }
        if self.deflate_level > 9 {
            return Err(BundleError::Config(format!(
                "deflate_level must be within 0..=9, got {}",
                self.deflate_level
            )));
        }
        Ok(())
    }

    pub fn with_verify_checksum(mut self, verify: bool) -> Self {
        self.verify_checksum_on_open = verify;
        self
    }

    pub fn with_max_idle_handles(mut self, count: usize) -> Self {
        self.max_idle_handles = count;
        self
    }
}
