use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Per-asset flags stored in the bundle index
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct AssetAttributes: u32 {
        /// Payload is raw-deflate compressed
        const ZIPPED_DEFLATE = 1 << 0;
        /// Texture with non power-of-two dimensions
        const NON_POWER_OF_2_TEXTURE = 1 << 1;
        /// Payload is LZMA compressed
        const ZIPPED_LZMA = 1 << 2;
        const ZIPPED = Self::ZIPPED_DEFLATE.bits() | Self::ZIPPED_LZMA.bits();
    }
}

impl AssetAttributes {
    pub const NONE: AssetAttributes = AssetAttributes::empty();

    pub fn is_zipped(self) -> bool {
        self.intersects(AssetAttributes::ZIPPED)
    }

    /// On-disk representation
    pub fn to_i32(self) -> i32 {
        self.bits() as i32
    }

    /// Unknown bits are kept so they survive a rewrite
    pub fn from_i32(value: i32) -> Self {
        AssetAttributes::from_bits_retain(value as u32)
    }
}
