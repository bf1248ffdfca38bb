//! Binary container format for chunk payloads at rest.
//!
//! The SWCK (Strata World ChunK) format wraps an opaque payload in a small
//! versioned header and LZ4-compresses the body for disk storage.
//!
//! ## Binary Layout
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 4 | Magic bytes `[0x53, 0x57, 0x43, 0x4B]` ("SWCK") |
//! | 4 | 1 | Format version (`u8`, currently 1) |
//! | 5 | 1 | Flags (`u8`, bit 0 = payload is generated) |
//! | 6 | N | LZ4 block with prepended uncompressed size |

use lz4_flex::block::DecompressError;
use lz4_flex::{compress_prepend_size, decompress_size_prepended};

use crate::payload::ChunkPayload;

/// Magic bytes identifying the SWCK format.
const MAGIC: [u8; 4] = [0x53, 0x57, 0x43, 0x4B];

/// Current format version.
const FORMAT_VERSION: u8 = 1;

/// Flag bit: the payload carries real generated content.
const FLAG_GENERATED: u8 = 0b0000_0001;

/// All flag bits this version understands.
const KNOWN_FLAGS: u8 = FLAG_GENERATED;

/// Errors that can occur while decoding an SWCK container.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The data does not start with the expected magic bytes.
    #[error("invalid magic bytes")]
    InvalidMagic,
    /// The format version is not supported by this build.
    #[error("unsupported format version: {0}")]
    UnsupportedVersion(u8),
    /// The flag byte carries bits this version does not understand.
    #[error("unknown flag bits: {0:#010b}")]
    UnknownFlags(u8),
    /// The data is shorter than expected.
    #[error("data truncated: expected at least {expected} bytes, got {actual}")]
    Truncated {
        /// Minimum expected byte count.
        expected: usize,
        /// Actual byte count received.
        actual: usize,
    },
    /// The compressed body failed to decompress.
    #[error("LZ4 decompression failed: {0}")]
    Decompress(#[from] DecompressError),
}

/// Encodes a payload into an SWCK container.
pub fn encode_payload(payload: &ChunkPayload) -> Vec<u8> {
    let body = compress_prepend_size(payload.bytes());

    let mut buf = Vec::with_capacity(6 + body.len());
    buf.extend_from_slice(&MAGIC);
    buf.push(FORMAT_VERSION);
    buf.push(if payload.is_generated() {
        FLAG_GENERATED
    } else {
        0
    });
    buf.extend_from_slice(&body);
    buf
}

/// Decodes a payload from an SWCK container.
///
/// Returns an error if the data is corrupted, has an unrecognized version,
/// or is truncated.
pub fn decode_payload(data: &[u8]) -> Result<ChunkPayload, CodecError> {
    if data.len() < 4 {
        return Err(CodecError::InvalidMagic);
    }
    if data[0..4] != MAGIC {
        return Err(CodecError::InvalidMagic);
    }

    if data.len() < 6 {
        return Err(CodecError::Truncated {
            expected: 6,
            actual: data.len(),
        });
    }
    let version = data[4];
    if version != FORMAT_VERSION {
        return Err(CodecError::UnsupportedVersion(version));
    }

    let flags = data[5];
    if flags & !KNOWN_FLAGS != 0 {
        return Err(CodecError::UnknownFlags(flags));
    }

    let bytes = decompress_size_prepended(&data[6..])?;

    if flags & FLAG_GENERATED != 0 {
        Ok(ChunkPayload::new(bytes))
    } else {
        Ok(ChunkPayload::placeholder())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
