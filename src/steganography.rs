//! Session layer: files in, carrier bits out (and back)
//!
//! Embedding concatenates the files, compresses, optionally encrypts, writes
//! the envelope serially and hands the blob to the scheduler. Extraction runs
//! the same steps in reverse.

use crate::carrier::{Carrier, Depth};
use crate::compress::{self, DEFAULT_LEVEL};
use crate::crypto::{self, OVERHEAD};
use crate::cursor::Cursor;
use crate::envelope::{Envelope, FileEntry};
use crate::error::{Result, StegoError};
use crate::scheduler::{Scheduler, SchedulerConfig};
use tracing::{debug, info};
use zeroize::Zeroizing;

/// A named file hidden in (or recovered from) a carrier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HiddenFile {
    pub name: String,
    pub data: Vec<u8>,
}

impl HiddenFile {
    pub fn new(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self { name: name.into(), data: data.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StegoConfig {
    /// LSB depth used for everything after the depth nibble
    pub depth: Depth,
    pub scheduler: SchedulerConfig,
    /// zstd level; `None` stores the files uncompressed
    pub compression_level: Option<i32>,
}

impl Default for StegoConfig {
    fn default() -> Self {
        Self {
            depth: Depth::MIN,
            scheduler: SchedulerConfig::default(),
            compression_level: Some(DEFAULT_LEVEL),
        }
    }
}

/// Outcome of a successful embed
#[derive(Debug, Clone)]
pub struct EmbedReport {
    pub envelope: Envelope,
    pub required_bits: u64,
    pub capacity_bits: u64,
    /// Cursor after the last payload bit
    pub end: Cursor,
}

/// Main steganography engine
pub struct Stego {
    config: StegoConfig,
    password: Option<Zeroizing<String>>,
}

impl Default for Stego {
    fn default() -> Self {
        Self::new()
    }
}

impl Stego {
    /// Plain (unencrypted) engine with default settings
    pub fn new() -> Self {
        Self::with_config(StegoConfig::default())
    }

    pub fn with_config(config: StegoConfig) -> Self {
        Self { config, password: None }
    }

    /// Encrypt on embed and decrypt on extract with `password`
    pub fn with_password(mut self, password: &str) -> Self {
        self.password = Some(Zeroizing::new(password.to_string()));
        self
    }

    pub fn config(&self) -> &StegoConfig {
        &self.config
    }

    pub fn is_encrypted(&self) -> bool {
        self.password.is_some()
    }

    fn scheduler(&self) -> Scheduler {
        Scheduler::new(self.config.scheduler)
    }

    /// Hide `files` in `carrier`.
    ///
    /// The capacity check runs before the first write: on
    /// [`StegoError::CapacityExceeded`] the carrier is left untouched.
    pub fn embed(&self, carrier: &dyn Carrier, files: &[HiddenFile]) -> Result<EmbedReport> {
        if files.is_empty() {
            return Err(StegoError::InvalidInput("nothing to embed".into()));
        }
        let mut entries = Vec::with_capacity(files.len());
        let mut concatenated = Vec::new();
        for file in files {
            let size = u32::try_from(file.data.len())
                .map_err(|_| StegoError::InvalidInput(format!("{} is larger than 4 GiB", file.name)))?;
            if u32::try_from(file.name.len()).is_err() {
                return Err(StegoError::InvalidInput("file name too long".into()));
            }
            entries.push(FileEntry { name: file.name.clone(), size });
            concatenated.extend_from_slice(&file.data);
        }
        let original_len = concatenated.len() as u64;

        let compressed = match self.config.compression_level {
            Some(level) => compress::compress(&concatenated, level)?,
            None => concatenated,
        };
        debug!(original = original_len, compressed = compressed.len(), "payload prepared");

        let (blob, salt) = match &self.password {
            Some(password) => {
                let aad = crypto::associated_data(compressed.len() as u64, original_len);
                let (salt, blob) = crypto::encrypt(&compressed, &aad, password)?;
                (blob, Some(salt))
            }
            None => (compressed, None),
        };
        let blob_len = u32::try_from(blob.len())
            .map_err(|_| StegoError::InvalidInput("payload larger than 4 GiB".into()))?;

        let envelope = Envelope { depth: self.config.depth, files: entries, blob_len, salt };
        let required_bits = envelope.required_bits(carrier.channels());
        let capacity_bits = carrier.capacity_bits(self.config.depth);
        envelope.check_capacity(carrier)?;

        let start = envelope.write(carrier)?;
        let end = self.scheduler().encode(carrier, self.config.depth, start, &blob)?;
        info!(
            files = envelope.files.len(),
            blob = blob_len,
            depth = %self.config.depth,
            used = required_bits,
            capacity = capacity_bits,
            "payload embedded"
        );
        Ok(EmbedReport { envelope, required_bits, capacity_bits, end })
    }

    /// Recover the files hidden in `carrier`.
    pub fn extract(&self, carrier: &dyn Carrier) -> Result<Vec<HiddenFile>> {
        let (envelope, start) = Envelope::read(carrier, self.password.is_some())?;
        let blob = self
            .scheduler()
            .decode(carrier, envelope.depth, start, envelope.blob_len as usize)?;
        let original_len = envelope.total_size();

        let compressed = match (&self.password, &envelope.salt) {
            (Some(password), Some(salt)) => {
                let compressed_len = blob.len().checked_sub(OVERHEAD).ok_or(StegoError::CryptoFailure)?;
                let aad = crypto::associated_data(compressed_len as u64, original_len);
                crypto::decrypt(&blob, salt, &aad, password)?
            }
            _ => blob,
        };
        let raw = compress::decompress(&compressed, original_len as usize)?;

        let mut files = Vec::with_capacity(envelope.files.len());
        let mut offset = 0usize;
        for entry in envelope.files {
            let end = offset + entry.size as usize;
            files.push(HiddenFile { name: entry.name, data: raw[offset..end].to_vec() });
            offset = end;
        }
        info!(files = files.len(), bytes = original_len, depth = %envelope.depth, "payload extracted");
        Ok(files)
    }

    /// Largest single unnamed file (in bytes, before compression) that fits at `depth`.
    pub fn calculate_capacity(carrier: &dyn Carrier, depth: Depth, encrypted: bool) -> u64 {
        let envelope = Envelope {
            depth,
            files: vec![FileEntry { name: String::new(), size: 0 }],
            blob_len: 0,
            salt: encrypted.then_some([0u8; crate::envelope::SALT_LEN]),
        };
        let overhead = if encrypted { OVERHEAD as u64 } else { 0 };
        let available = carrier.capacity_bits(depth);
        let base = envelope.required_bits(carrier.channels());
        (available.saturating_sub(base) / 8).saturating_sub(overhead)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::{AudioCarrier, ImageCarrier};
    use rand::{rngs::StdRng, RngCore, SeedableRng};

    fn noise(len: usize, seed: u64) -> Vec<u8> {
        let mut bytes = vec![0u8; len];
        StdRng::seed_from_u64(seed).fill_bytes(&mut bytes);
        bytes
    }

    fn config(depth: u8, workers: usize) -> StegoConfig {
        StegoConfig {
            depth: Depth::new(depth).unwrap(),
            scheduler: SchedulerConfig::with_workers(workers),
            compression_level: Some(3),
        }
    }

    #[test]
    fn test_concrete_argb_scenario() {
        let carrier = ImageCarrier::from_rgba(10, 10, noise(400, 1)).unwrap();
        let stego = Stego::with_config(config(2, 4));
        let file = HiddenFile::new("x", vec![0xA5, 0x00, 0xFF]);
        stego.embed(&carrier, &[file.clone()]).unwrap();

        let (envelope, _) = Envelope::read(&carrier, false).unwrap();
        assert_eq!(envelope.depth.get(), 2);
        assert_eq!(envelope.files, vec![FileEntry { name: "x".into(), size: 3 }]);
        assert_eq!(stego.extract(&carrier).unwrap(), vec![file]);
    }

    #[test]
    fn test_multi_file_encrypted_roundtrip() {
        let carrier = ImageCarrier::from_rgb(64, 64, noise(64 * 64 * 3, 2)).unwrap();
        let files = vec![
            HiddenFile::new("readme.md", b"# hello\n".repeat(40)),
            HiddenFile::new("empty", Vec::new()),
            HiddenFile::new("noise.bin", noise(700, 3)),
        ];
        let stego = Stego::with_config(config(3, 0)).with_password("correct horse");
        let report = stego.embed(&carrier, &files).unwrap();
        assert!(report.envelope.salt.is_some());
        assert!(report.required_bits <= report.capacity_bits);

        assert_eq!(stego.extract(&carrier).unwrap(), files);

        let wrong = Stego::with_config(config(3, 0)).with_password("battery staple");
        assert!(matches!(wrong.extract(&carrier), Err(StegoError::CryptoFailure)));
    }

    #[test]
    fn test_empty_file_roundtrip() {
        for depth in 1..=8 {
            let carrier = ImageCarrier::from_rgb(16, 16, noise(768, depth as u64)).unwrap();
            let stego = Stego::with_config(config(depth, 2));
            let files = vec![HiddenFile::new("void", Vec::new())];
            stego.embed(&carrier, &files).unwrap();
            assert_eq!(stego.extract(&carrier).unwrap(), files);
        }
    }

    #[test]
    fn test_exact_capacity_fits_and_one_more_bit_fails() {
        let plain = StegoConfig { compression_level: None, ..config(1, 2) };
        let files = vec![HiddenFile::new("", vec![1, 2, 3])];
        // nibble 4 + header 128 + blob 24 = 156 bits, one per audio unit at K=1
        let exact = AudioCarrier::new(noise(312, 4), 1, 8000, 16);
        let report = Stego::with_config(plain).embed(&exact, &files).unwrap();
        assert_eq!(report.required_bits, 156);
        assert_eq!(report.required_bits, report.capacity_bits);
        assert_eq!(Stego::with_config(plain).extract(&exact).unwrap(), files);

        let cover = noise(310, 4);
        let short = AudioCarrier::new(cover.clone(), 1, 8000, 16);
        let err = Stego::with_config(plain).embed(&short, &files).unwrap_err();
        assert!(matches!(err, StegoError::CapacityExceeded { required: 156, available: 155 }));
        assert_eq!(short.into_raw(), cover);
    }

    #[test]
    fn test_calculate_capacity_is_exact() {
        let plain = StegoConfig { compression_level: None, ..config(2, 1) };
        let carrier = ImageCarrier::from_rgb(20, 20, noise(1200, 5)).unwrap();
        let max = Stego::calculate_capacity(&carrier, plain.depth, false) as usize;
        let fits = vec![HiddenFile::new("", noise(max, 6))];
        Stego::with_config(plain).embed(&carrier, &fits).unwrap();
        let too_big = vec![HiddenFile::new("", noise(max + 1, 6))];
        assert!(Stego::with_config(plain).embed(&carrier, &too_big).is_err());
    }

    #[test]
    fn test_forged_file_sizes_fail_without_allocating() {
        let carrier = ImageCarrier::from_rgb(64, 64, noise(64 * 64 * 3, 7)).unwrap();
        let forged = Envelope {
            depth: Depth::MAX,
            files: (0..64).map(|i| FileEntry { name: format!("f{}", i), size: u32::MAX }).collect(),
            blob_len: 16,
            salt: None,
        };
        forged.write(&carrier).unwrap();
        assert!(matches!(Stego::new().extract(&carrier), Err(StegoError::Compression(_))));
    }

    #[test]
    fn test_rejects_empty_file_list() {
        let carrier = ImageCarrier::from_rgb(4, 4, vec![0; 48]).unwrap();
        assert!(matches!(Stego::new().embed(&carrier, &[]), Err(StegoError::InvalidInput(_))));
    }
}
