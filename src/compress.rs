//! zstd wrapper that never grows the payload
//!
//! There is no "compressed" flag on the wire: if compression did not shrink
//! the data it is stored raw, and the reader tells the two apart by comparing
//! the stored length with the expected original length.
//!
//! Frames always carry their content size. The header sizes come from the
//! carrier and cannot be trusted, so the frame is checked against them before
//! any output buffer is allocated.

use crate::error::{Result, StegoError};

pub const DEFAULT_LEVEL: i32 = 19;

// A 128 KiB RLE block costs at least 4 bytes of frame.
const MAX_EXPANSION: u64 = 128 * 1024 / 4;

/// Compress `bytes`, or return them unchanged unless the result is strictly smaller.
pub fn compress(bytes: &[u8], level: i32) -> Result<Vec<u8>> {
    let packed =
        zstd::bulk::compress(bytes, level).map_err(|e| StegoError::Compression(format!("zstd compress: {e}")))?;
    if packed.len() < bytes.len() {
        Ok(packed)
    } else {
        Ok(bytes.to_vec())
    }
}

/// Undo [`compress`]; `expected` is the original length.
pub fn decompress(bytes: &[u8], expected: usize) -> Result<Vec<u8>> {
    if bytes.len() == expected {
        return Ok(bytes.to_vec());
    }
    let declared = zstd::zstd_safe::get_frame_content_size(bytes)
        .map_err(|_| StegoError::Compression("payload is not a zstd frame".into()))?
        .ok_or_else(|| StegoError::Compression("zstd frame without content size".into()))?;
    if declared > bytes.len() as u64 * MAX_EXPANSION {
        return Err(StegoError::Compression(format!(
            "frame of {} bytes claims {} bytes of content",
            bytes.len(),
            declared
        )));
    }
    if declared != expected as u64 {
        return Err(StegoError::Compression(format!(
            "frame holds {} bytes, header lists {}",
            declared, expected
        )));
    }
    let raw = zstd::bulk::decompress(bytes, expected)
        .map_err(|e| StegoError::Compression(format!("zstd decompress: {e}")))?;
    if raw.len() != expected {
        return Err(StegoError::Compression(format!(
            "inflated to {} bytes, expected {}",
            raw.len(),
            expected
        )));
    }
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{rngs::StdRng, RngCore, SeedableRng};

    #[test]
    fn test_compressible_data_shrinks() {
        let text = b"the quick brown fox jumps over the lazy dog ".repeat(50);
        let packed = compress(&text, DEFAULT_LEVEL).unwrap();
        assert!(packed.len() < text.len());
        assert_eq!(decompress(&packed, text.len()).unwrap(), text);
    }

    #[test]
    fn test_incompressible_data_stored_raw() {
        let mut noise = vec![0u8; 512];
        StdRng::seed_from_u64(1).fill_bytes(&mut noise);
        let packed = compress(&noise, DEFAULT_LEVEL).unwrap();
        assert_eq!(packed, noise);
        assert_eq!(decompress(&packed, noise.len()).unwrap(), noise);
    }

    #[test]
    fn test_empty_input() {
        assert!(compress(&[], 3).unwrap().is_empty());
        assert!(decompress(&[], 0).unwrap().is_empty());
    }

    #[test]
    fn test_garbage_reports_error() {
        assert!(matches!(decompress(&[1, 2, 3], 100), Err(StegoError::Compression(_))));
    }

    #[test]
    fn test_highly_compressible_data_within_expansion_limit() {
        let zeros = vec![0u8; 4 << 20];
        let packed = compress(&zeros, DEFAULT_LEVEL).unwrap();
        assert!((zeros.len() as u64) <= packed.len() as u64 * MAX_EXPANSION);
        assert_eq!(decompress(&packed, zeros.len()).unwrap(), zeros);
    }

    #[test]
    fn test_size_mismatch_rejected_before_inflating() {
        let text = b"abcabcabc".repeat(100);
        let packed = compress(&text, 3).unwrap();
        assert!(matches!(decompress(&packed, text.len() + 1), Err(StegoError::Compression(_))));
        assert!(matches!(decompress(&packed, usize::MAX), Err(StegoError::Compression(_))));
    }
}
