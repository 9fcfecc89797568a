//! Binary frame codec for the store file.
//!
//! Every log entry is written as one frame:
//! - JSON for the payload (same serde attributes as the in-memory types)
//! - optional deflate-family compression
//! - length-prefixed framing, the prefix guarded by its own CRC32
//! - optional CRC32 over the stored payload
//!
//! The flags byte records both choices, so a file written under one
//! [`CompressionProfile`] stays readable under any other.
//!
//! The prefix checksum is what tells a torn write from corruption: a frame
//! whose prefix verifies but whose body runs past the end of the file was
//! cut short, while a damaged length never gets as far as being trusted.

use std::io::{Error as IoError, ErrorKind, Read, Result as IoResult, Write};

use crc32fast::Hasher;
use flate2::read::{DeflateDecoder, GzDecoder, ZlibDecoder};
use flate2::write::{DeflateEncoder, GzEncoder, ZlibEncoder};
use flate2::Compression;
use serde::{de::DeserializeOwned, Serialize};

use crate::config::{CompressionAlgorithm, CompressionProfile};

/// Current codec version.
const CODEC_VERSION: u8 = 1;

/// Magic bytes identifying a store file.
pub const MAGIC: [u8; 4] = *b"DPLS";

/// Length of the file header (magic + version).
pub const HEADER_LEN: u64 = 5;

const FLAG_CHECKSUM: u8 = 0b1000_0000;
const CODEC_MASK: u8 = 0b0000_0011;

/// `[version][flags][length]`, covered by the prefix CRC.
const PREFIX_LEN: usize = 6;

/// Upper bound on a single stored payload. Migrations rewrite whole
/// composition histories in one frame, so this is generous.
const MAX_FRAME_SIZE: usize = 1024 * 1024 * 1024;

/// Serializes a value into one frame.
///
/// Format:
/// ```text
/// [version: 1][flags: 1][length: 4 LE][prefix crc32: 4 LE][payload: N][crc32: 4 LE, if flagged]
/// ```
pub fn encode<T: Serialize>(value: &T, profile: &CompressionProfile) -> IoResult<Vec<u8>> {
    let json = serde_json::to_vec(value)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("serialization failed: {e}")))?;
    let payload = compress(&json, profile)?;

    if payload.len() > MAX_FRAME_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidInput,
            format!("frame size {} exceeds maximum {MAX_FRAME_SIZE}", payload.len()),
        ));
    }
    #[allow(clippy::cast_possible_truncation)]
    let len = payload.len() as u32;

    let mut flags = profile.algorithm.flag_bits();
    if profile.checksum {
        flags |= FLAG_CHECKSUM;
    }

    let mut prefix = [0u8; PREFIX_LEN];
    prefix[0] = CODEC_VERSION;
    prefix[1] = flags;
    prefix[2..].copy_from_slice(&len.to_le_bytes());

    let mut out = Vec::with_capacity(PREFIX_LEN + 4 + payload.len() + 4);
    out.extend_from_slice(&prefix);
    out.extend_from_slice(&crc32(&prefix).to_le_bytes());
    out.extend_from_slice(&payload);
    if profile.checksum {
        out.extend_from_slice(&crc32(&payload).to_le_bytes());
    }

    Ok(out)
}

/// Deserializes one frame, verifying its checksum when present.
///
/// # Errors
/// - `ErrorKind::UnexpectedEof` if the frame is cut short (torn write)
/// - `ErrorKind::InvalidData` on checksum failure, unknown version or flags,
///   oversized length, or a payload that does not decode
pub fn decode<T: DeserializeOwned>(reader: &mut impl Read) -> IoResult<T> {
    let mut prefix = [0u8; PREFIX_LEN];
    reader.read_exact(&mut prefix)?;
    let mut prefix_crc = [0u8; 4];
    reader.read_exact(&mut prefix_crc)?;

    let stored_prefix_crc = u32::from_le_bytes(prefix_crc);
    let computed_prefix_crc = crc32(&prefix);
    if stored_prefix_crc != computed_prefix_crc {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!(
                "frame prefix CRC mismatch: stored={stored_prefix_crc:08x}, computed={computed_prefix_crc:08x}"
            ),
        ));
    }

    let [version, flags, l0, l1, l2, l3] = prefix;

    if version != CODEC_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("unsupported codec version: {version} (expected {CODEC_VERSION})"),
        ));
    }
    if flags & !(FLAG_CHECKSUM | CODEC_MASK) != 0 {
        return Err(IoError::new(ErrorKind::InvalidData, format!("unknown frame flags: {flags:08b}")));
    }
    let algorithm = CompressionAlgorithm::from_flag_bits(flags & CODEC_MASK)
        .ok_or_else(|| IoError::new(ErrorKind::InvalidData, "unknown frame codec"))?;

    let len = u32::from_le_bytes([l0, l1, l2, l3]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("frame size {len} exceeds maximum {MAX_FRAME_SIZE}"),
        ));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;

    if flags & FLAG_CHECKSUM != 0 {
        let mut crc_bytes = [0u8; 4];
        reader.read_exact(&mut crc_bytes)?;
        let stored_crc = u32::from_le_bytes(crc_bytes);

        let computed_crc = crc32(&payload);

        if stored_crc != computed_crc {
            return Err(IoError::new(
                ErrorKind::InvalidData,
                format!("CRC mismatch: stored={stored_crc:08x}, computed={computed_crc:08x} (data corrupted)"),
            ));
        }
    }

    let json = decompress(&payload, algorithm)?;
    serde_json::from_slice(&json)
        .map_err(|e| IoError::new(ErrorKind::InvalidData, format!("deserialization failed: {e}")))
}

fn crc32(bytes: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(bytes);
    hasher.finalize()
}

fn compress(data: &[u8], profile: &CompressionProfile) -> IoResult<Vec<u8>> {
    let level = Compression::new(profile.level);
    match profile.algorithm {
        CompressionAlgorithm::None => Ok(data.to_vec()),
        CompressionAlgorithm::Zlib => {
            let mut enc = ZlibEncoder::new(Vec::with_capacity(data.len() / 2), level);
            enc.write_all(data)?;
            enc.finish()
        }
        CompressionAlgorithm::Deflate => {
            let mut enc = DeflateEncoder::new(Vec::with_capacity(data.len() / 2), level);
            enc.write_all(data)?;
            enc.finish()
        }
        CompressionAlgorithm::Gzip => {
            let mut enc = GzEncoder::new(Vec::with_capacity(data.len() / 2), level);
            enc.write_all(data)?;
            enc.finish()
        }
    }
}

fn decompress(payload: &[u8], algorithm: CompressionAlgorithm) -> IoResult<Vec<u8>> {
    let mut out = Vec::with_capacity(payload.len() * 4);
    let result = match algorithm {
        CompressionAlgorithm::None => return Ok(payload.to_vec()),
        CompressionAlgorithm::Zlib => ZlibDecoder::new(payload).read_to_end(&mut out),
        CompressionAlgorithm::Deflate => DeflateDecoder::new(payload).read_to_end(&mut out),
        CompressionAlgorithm::Gzip => GzDecoder::new(payload).read_to_end(&mut out),
    };
    // A payload that passed (or skipped) the CRC but fails to inflate is
    // corruption, not a short read.
    result.map_err(|e| IoError::new(ErrorKind::InvalidData, format!("decompression failed: {e}")))?;
    Ok(out)
}

/// Write the file header (magic + version).
pub fn write_header(writer: &mut impl Write) -> IoResult<()> {
    writer.write_all(&MAGIC)?;
    writer.write_all(&[CODEC_VERSION])?;
    Ok(())
}

/// Read and validate the file header.
pub fn read_header(reader: &mut impl Read) -> IoResult<u8> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;

    if magic != MAGIC {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("invalid magic bytes: expected {MAGIC:?}, got {magic:?}"),
        ));
    }

    let mut version = [0u8; 1];
    reader.read_exact(&mut version)?;
    if version[0] != CODEC_VERSION {
        return Err(IoError::new(
            ErrorKind::InvalidData,
            format!("unsupported store version: {} (expected {CODEC_VERSION})", version[0]),
        ));
    }

    Ok(version[0])
}
