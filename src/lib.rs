//! # bitveil
//!
//! LSB steganography for raster images and PCM audio, with a multi-threaded
//! bit-channel codec.
//!
//! ## Quick Start
//!
//! ```no_run
//! use bitveil::{media, HiddenFile, Stego, StegoConfig, Depth};
//! use std::path::Path;
//!
//! # fn main() -> anyhow::Result<()> {
//! // Load carrier image
//! let carrier = media::load_image(Path::new("cover.png"))?;
//!
//! // Hide two bits per channel, encrypted with a password
//! let config = StegoConfig { depth: Depth::new(2)?, ..StegoConfig::default() };
//! let stego = Stego::with_config(config).with_password("hunter2");
//! stego.embed(&carrier, &[HiddenFile::new("notes.txt", b"meet at noon".to_vec())])?;
//!
//! // Extract (the depth is read back from the carrier)
//! let files = stego.extract(&carrier)?;
//! assert_eq!(files[0].data, b"meet at noon");
//!
//! // Save the result (lossless formats only)
//! media::save_image(carrier, Path::new("stego.png"))?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **Closed-form cursor arithmetic**: every job knows its end position up front
//! - **Parallel codec**: fixed worker pool, boundary-unit locking only
//! - **Multi-file envelope**: names and sizes travel with the payload
//! - **zstd + AES-256-GCM**: optional password, header sizes bound as AAD
//!
//! ## Modules
//!
//! - `bits`: fixed-width MSB-first bit vectors
//! - `carrier`: bit-addressable view over pixels and PCM bytes
//! - `cursor`: bit-cursor arithmetic
//! - `locks`: boundary lock registry and backoff
//! - `pool` / `scheduler`: worker pool and job partitioning
//! - `envelope`: header layout
//! - `compress` / `crypto`: payload transforms
//! - `media`: image and WAV I/O
//! - `steganography`: session API

pub mod bits;
pub mod carrier;
pub mod compress;
pub mod crypto;
pub mod cursor;
pub mod envelope;
pub mod error;
pub mod locks;
pub mod media;
pub mod pool;
pub mod scheduler;
pub mod steganography;

// Re-export main types for convenience
pub use carrier::{AudioCarrier, Carrier, Depth, ImageCarrier, UnitCoord};
pub use cursor::{Cursor, Geometry};
pub use envelope::{Envelope, FileEntry};
pub use error::{Result, StegoError};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use steganography::{EmbedReport, HiddenFile, Stego, StegoConfig};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Engine that encrypts with `password` on embed and decrypts on extract
///
/// # Examples
///
/// ```no_run
/// let stego = bitveil::with_password("my-secret-password");
/// assert!(stego.is_encrypted());
/// ```
pub fn with_password(password: &str) -> Stego {
    Stego::new().with_password(password)
}

/// Calculate the largest single file, in bytes, a carrier can hold at `depth`
///
/// # Examples
///
/// ```no_run
/// use bitveil::{media, Depth};
/// use std::path::Path;
/// # fn main() -> anyhow::Result<()> {
/// let carrier = media::load_image(Path::new("photo.png"))?;
/// let capacity = bitveil::calculate_capacity(&carrier, Depth::new(1)?, false);
/// println!("Image can hold {} bytes", capacity);
/// # Ok(())
/// # }
/// ```
pub fn calculate_capacity(carrier: &dyn Carrier, depth: Depth, encrypted: bool) -> u64 {
    Stego::calculate_capacity(carrier, depth, encrypted)
}

#[cfg(test)]
mod integration_tests {
    use super::*;
    use rand::{rngs::StdRng, Rng, RngCore, SeedableRng};

    fn gradient(width: u32, height: u32, channels: usize) -> ImageCarrier {
        let mut data = Vec::with_capacity(width as usize * height as usize * channels);
        for y in 0..height {
            for x in 0..width {
                for c in 0..channels {
                    data.push((x as usize * 7 + y as usize * 3 + c * 50) as u8);
                }
            }
        }
        ImageCarrier::new(width, height, channels, data).unwrap()
    }

    fn config(depth: u8, workers: usize, job_bits: u64) -> StegoConfig {
        StegoConfig {
            depth: Depth::new(depth).unwrap(),
            scheduler: SchedulerConfig { workers, job_bits },
            compression_level: Some(3),
        }
    }

    #[test]
    fn test_full_embed_extract_cycle() {
        let mut rng = StdRng::seed_from_u64(2024);
        for &channels in &[3usize, 4] {
            for depth in 1..=8u8 {
                for &len in &[0usize, 1, 17, 500] {
                    let carrier = gradient(48, 40, channels);
                    let mut data = vec![0u8; len];
                    rng.fill_bytes(&mut data);
                    let files = vec![HiddenFile::new("payload.bin", data)];
                    let stego = Stego::with_config(config(depth, 3, 0));
                    stego.embed(&carrier, &files).unwrap();
                    assert_eq!(stego.extract(&carrier).unwrap(), files, "M={} K={} len={}", channels, depth, len);
                }
            }
        }
    }

    #[test]
    fn test_worker_count_does_not_change_output() {
        let files = vec![
            HiddenFile::new("a.txt", b"lorem ipsum dolor sit amet ".repeat(30)),
            HiddenFile::new("b.bin", (0..=255u8).collect::<Vec<_>>()),
        ];
        let single = gradient(64, 64, 4);
        Stego::with_config(config(3, 1, 0)).embed(&single, &files).unwrap();
        let parallel = gradient(64, 64, 4);
        Stego::with_config(config(3, 8, 29)).embed(&parallel, &files).unwrap();
        assert_eq!(single.into_raw(), parallel.into_raw());
    }

    #[test]
    fn test_single_bit_jobs_roundtrip() {
        let mut rng = StdRng::seed_from_u64(77);
        for depth in [1u8, 2, 5, 8] {
            let carrier = gradient(24, 24, 3);
            let mut data = vec![0u8; 120];
            rng.fill_bytes(&mut data);
            let files = vec![HiddenFile::new("stress", data)];
            Stego::with_config(config(depth, 8, 1)).embed(&carrier, &files).unwrap();
            // extraction with a different job layout must agree
            let extracted = Stego::with_config(config(depth, 2, rng.gen_range(1..64))).extract(&carrier).unwrap();
            assert_eq!(extracted, files);
        }
    }

    #[test]
    fn test_audio_carrier_roundtrip_skips_left_bytes() {
        let mut rng = StdRng::seed_from_u64(9);
        for depth in 1..=8u8 {
            let mut pcm = vec![0u8; 8000];
            rng.fill_bytes(&mut pcm);
            let carrier = AudioCarrier::new(pcm.clone(), 2, 22_050, 16);
            let files = vec![HiddenFile::new("clip.txt", b"left channel stays intact".to_vec())];
            let stego = Stego::with_config(config(depth, 4, 0)).with_password("pw");
            stego.embed(&carrier, &files).unwrap();
            assert_eq!(stego.extract(&carrier).unwrap(), files);
            let stego_pcm = carrier.into_raw();
            assert!(stego_pcm.iter().step_by(2).eq(pcm.iter().step_by(2)));
        }
    }

    #[test]
    fn test_capacity_error_leaves_carrier_intact() {
        let carrier = gradient(8, 8, 3);
        let before = carrier.snapshot();
        let mut data = vec![0u8; 400];
        StdRng::seed_from_u64(1).fill_bytes(&mut data);
        let err = Stego::with_config(config(2, 2, 0))
            .embed(&carrier, &[HiddenFile::new("big", data)])
            .unwrap_err();
        assert!(matches!(err, StegoError::CapacityExceeded { .. }));
        assert_eq!(carrier.into_raw(), before);
    }

    #[test]
    fn test_capacity_calculation() {
        let carrier = gradient(100, 100, 3);
        let plain = calculate_capacity(&carrier, Depth::MIN, false);
        let sealed = calculate_capacity(&carrier, Depth::MIN, true);
        assert!(plain > 3700 && plain < 3750);
        assert_eq!(plain - sealed, 8 + crypto::OVERHEAD as u64);
        assert!(calculate_capacity(&gradient(2, 2, 3), Depth::MIN, false) == 0);
    }
}
