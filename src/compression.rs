//! Transparent compression for asset payloads
//!
//! Assets imported with a `Zipped*` attribute are compressed in memory before
//! they are written; the compressed length is what the index stores.
//! Reads pick the decoder from the same attribute bits:
//!
//! - `ZIPPED_DEFLATE`: raw deflate (no zlib/gzip framing), streamed
//! - `ZIPPED_LZMA`: `.lzma` container, decoded into memory on open
//!
//! If both bits are set, deflate wins on both paths.

use crate::attributes::AssetAttributes;
use crate::error::{BundleError, Result};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{BufReader, Cursor, Read};

/// Codec selected by an asset's attributes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionMethod {
    None,
    Deflate,
    Lzma,
}

impl CompressionMethod {
    pub fn from_attributes(attributes: AssetAttributes) -> Self {
        if attributes.contains(AssetAttributes::ZIPPED_DEFLATE) {
            CompressionMethod::Deflate
        } else if attributes.contains(AssetAttributes::ZIPPED_LZMA) {
            CompressionMethod::Lzma
        } else {
            CompressionMethod::None
        }
    }
}

/// Read the whole input and compress it with the given method
pub fn compress<R: Read + ?Sized>(
    input: &mut R,
    method: CompressionMethod,
    deflate_level: u32,
) -> Result<Vec<u8>> {
    match method {
        CompressionMethod::None => {
            let mut data = Vec::new();
            input.read_to_end(&mut data)?;
            Ok(data)
        }
        CompressionMethod::Deflate => {
            let mut encoder = DeflateEncoder::new(Vec::new(), Compression::new(deflate_level));
            std::io::copy(input, &mut encoder)?;
            encoder
                .finish()
                .map_err(|e| BundleError::Compression(format!("Deflate compression failed: {}", e)))
        }
        CompressionMethod::Lzma => {
            let mut reader = BufReader::new(input);
            let mut compressed = Vec::new();
            lzma_rs::lzma_compress(&mut reader, &mut compressed)
                .map_err(|e| BundleError::Compression(format!("LZMA compression failed: {}", e)))?;
            Ok(compressed)
        }
    }
}

/// Wrap a raw payload reader in the decoder matching `attributes`
pub fn decoder<R>(raw: R, attributes: AssetAttributes) -> Result<Box<dyn Read + Send>>
where
    R: Read + Send + 'static,
{
    match CompressionMethod::from_attributes(attributes) {
        CompressionMethod::None => Ok(Box::new(raw)),
        CompressionMethod::Deflate => Ok(Box::new(DeflateDecoder::new(raw))),
        CompressionMethod::Lzma => {
            let mut reader = BufReader::new(raw);
            let mut decompressed = Vec::new();
            lzma_rs::lzma_decompress(&mut reader, &mut decompressed).map_err(|e| {
                BundleError::Compression(format!("LZMA decompression failed: {}", e))
            })?;
            Ok(Box::new(Cursor::new(decompressed)))
        }
    }
}

/// Convenience for in-memory payloads
pub fn decompress(data: &[u8], attributes: AssetAttributes) -> Result<Vec<u8>> {
    let mut reader = decoder(Cursor::new(data.to_vec()), attributes)?;
    let mut out = Vec::new();
    reader
        .read_to_end(&mut out)
        .map_err(|e| BundleError::Compression(format!("Decompression failed: {}", e)))?;
    Ok(out)
}
