//! Envelope: the fixed-layout header written ahead of the payload
//!
//! Wire layout, every integer MSB-first:
//!
//! | field                     | bits         | depth       |
//! |---------------------------|--------------|-------------|
//! | LSB depth `K`             | 4            | always 1    |
//! | file count                | 32           | `K`         |
//! | per file: name length     | 32           | `K`         |
//! | per file: name bytes      | 8 × length   | `K`         |
//! | per file: original size   | 32           | `K`         |
//! | blob size                 | 32           | `K`         |
//! | salt (encrypted only)     | 64           | `K`         |
//! | blob                      | 8 × size     | `K`         |
//!
//! The header is tiny, so it is read and written serially one bit at a time
//! straight through the [`Carrier`]. Only the blob goes through the scheduler.

use crate::bits::{bytes_to_bits, bits_to_bytes, from_bits, to_bits};
use crate::carrier::{Carrier, Depth};
use crate::cursor::{Cursor, Geometry};
use crate::error::{Result, StegoError};
use tracing::debug;

pub const DEPTH_BITS: usize = 4;
pub const COUNT_BITS: usize = 32;
pub const NAME_LEN_BITS: usize = 32;
pub const SIZE_BITS: usize = 32;
pub const BLOB_LEN_BITS: usize = 32;
pub const SALT_LEN: usize = 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub name: String,
    /// Size of the file before compression
    pub size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    pub depth: Depth,
    pub files: Vec<FileEntry>,
    /// Size of the stored blob (compressed, and IV/tag-wrapped when encrypted)
    pub blob_len: u32,
    pub salt: Option<[u8; SALT_LEN]>,
}

impl Envelope {
    /// Header bits after the depth nibble
    pub fn header_bits(&self) -> u64 {
        let files: u64 = self
            .files
            .iter()
            .map(|f| (NAME_LEN_BITS + SIZE_BITS) as u64 + f.name.len() as u64 * 8)
            .sum();
        let salt = if self.salt.is_some() { SALT_LEN as u64 * 8 } else { 0 };
        COUNT_BITS as u64 + files + BLOB_LEN_BITS as u64 + salt
    }

    pub fn payload_bits(&self) -> u64 {
        self.blob_len as u64 * 8
    }

    /// Sum of the original file sizes
    pub fn total_size(&self) -> u64 {
        self.files.iter().map(|f| f.size as u64).sum()
    }

    /// Carrier bit positions spanned at depth `K` by header and blob.
    ///
    /// Upper LSBs of the units consumed by the depth nibble are never used,
    /// so they are counted as spent.
    pub fn required_bits(&self, channels: usize) -> u64 {
        let session = Geometry::new(channels, self.depth);
        let start = session.rebase(nibble_end(channels));
        session.linear(session.advance(start, self.header_bits() + self.payload_bits()))
    }

    /// Fail with [`StegoError::CapacityExceeded`] unless everything fits.
    pub fn check_capacity(&self, carrier: &dyn Carrier) -> Result<()> {
        let required = self.required_bits(carrier.channels());
        let available = carrier.capacity_bits(self.depth);
        if required > available {
            return Err(StegoError::CapacityExceeded { required, available });
        }
        Ok(())
    }

    /// Write the header; returns the cursor where the blob starts.
    ///
    /// Capacity is checked first, so nothing is written on failure.
    pub fn write(&self, carrier: &dyn Carrier) -> Result<Cursor> {
        self.check_capacity(carrier)?;
        if self.files.is_empty() {
            return Err(StegoError::InvalidInput("envelope needs at least one file".into()));
        }

        let mut writer = SerialCursor::new(carrier, Depth::MIN, Cursor::ORIGIN);
        writer.write(&to_bits(self.depth.get() as u64, DEPTH_BITS))?;
        writer.rebase(self.depth);

        writer.write(&to_bits(self.files.len() as u64, COUNT_BITS))?;
        for file in &self.files {
            writer.write(&to_bits(file.name.len() as u64, NAME_LEN_BITS))?;
            writer.write(&bytes_to_bits(file.name.as_bytes()))?;
            writer.write(&to_bits(file.size as u64, SIZE_BITS))?;
        }
        writer.write(&to_bits(self.blob_len as u64, BLOB_LEN_BITS))?;
        if let Some(salt) = &self.salt {
            writer.write(&bytes_to_bits(salt))?;
        }
        debug!(depth = %self.depth, files = self.files.len(), blob = self.blob_len, end = %writer.cursor, "envelope written");
        Ok(writer.cursor)
    }

    /// Read a header; `encrypted` says whether a salt follows the blob size.
    ///
    /// Returns the envelope and the cursor where the blob starts.
    pub fn read(carrier: &dyn Carrier, encrypted: bool) -> Result<(Envelope, Cursor)> {
        let mut reader = SerialCursor::new(carrier, Depth::MIN, Cursor::ORIGIN);
        let nibble = from_bits(&reader.read(DEPTH_BITS)?) as u8;
        let depth = Depth::new(nibble)
            .map_err(|_| StegoError::MalformedEnvelope(format!("depth nibble {} outside 1..=8", nibble)))?;
        reader.rebase(depth);

        let count = reader.read_u32(COUNT_BITS)?;
        if count == 0 {
            return Err(StegoError::MalformedEnvelope("file count is zero".into()));
        }
        let mut files = Vec::new();
        for _ in 0..count {
            let name_len = reader.read_u32(NAME_LEN_BITS)? as u64;
            if name_len * 8 > reader.remaining() {
                return Err(StegoError::MalformedEnvelope(format!(
                    "file name of {} bytes exceeds the carrier",
                    name_len
                )));
            }
            let name = bits_to_bytes(&reader.read(name_len as usize * 8)?);
            let name = String::from_utf8(name)
                .map_err(|_| StegoError::MalformedEnvelope("file name is not UTF-8".into()))?;
            let size = reader.read_u32(SIZE_BITS)?;
            files.push(FileEntry { name, size });
        }
        let blob_len = reader.read_u32(BLOB_LEN_BITS)?;
        let salt = if encrypted {
            let mut salt = [0u8; SALT_LEN];
            salt.copy_from_slice(&bits_to_bytes(&reader.read(SALT_LEN * 8)?));
            Some(salt)
        } else {
            None
        };
        if blob_len as u64 * 8 > reader.remaining() {
            return Err(StegoError::MalformedEnvelope(format!(
                "blob of {} bytes exceeds the carrier",
                blob_len
            )));
        }

        let envelope = Envelope { depth, files, blob_len, salt };
        if usize::try_from(envelope.total_size()).is_err() {
            return Err(StegoError::MalformedEnvelope(format!(
                "file sizes add up to {} bytes",
                envelope.total_size()
            )));
        }
        debug!(depth = %depth, files = envelope.files.len(), blob = blob_len, start = %reader.cursor, "envelope read");
        Ok((envelope, reader.cursor))
    }
}

/// Where the K=1 depth nibble ends on a carrier with `channels` channels.
pub fn nibble_end(channels: usize) -> Cursor {
    Geometry::new(channels, Depth::MIN).advance(Cursor::ORIGIN, DEPTH_BITS as u64)
}

/// Bit-at-a-time access to the carrier for header fields.
struct SerialCursor<'a> {
    carrier: &'a dyn Carrier,
    geometry: Geometry,
    cursor: Cursor,
}

impl<'a> SerialCursor<'a> {
    fn new(carrier: &'a dyn Carrier, depth: Depth, cursor: Cursor) -> Self {
        Self { carrier, geometry: carrier.geometry(depth), cursor }
    }

    fn rebase(&mut self, depth: Depth) {
        self.geometry = self.carrier.geometry(depth);
        self.cursor = self.geometry.rebase(self.cursor);
    }

    /// Bits left between the cursor and the end of the carrier
    fn remaining(&self) -> u64 {
        let limit = self.geometry.unit_capacity() * self.carrier.units();
        limit.saturating_sub(self.geometry.linear(self.cursor))
    }

    fn ensure(&self, bits: u64) -> Result<()> {
        if bits > self.remaining() {
            return Err(StegoError::MalformedEnvelope(format!(
                "header field of {} bits runs past the end of the carrier at {}",
                bits, self.cursor
            )));
        }
        Ok(())
    }

    fn write(&mut self, bits: &[u8]) -> Result<()> {
        self.ensure(bits.len() as u64)?;
        for &bit in bits {
            let Cursor { unit, channel, lsb } = self.cursor;
            self.carrier.write_channel_bits(unit, channel, 1 << lsb, (bit & 1) << lsb);
            self.cursor = self.geometry.step(self.cursor);
        }
        Ok(())
    }

    fn read(&mut self, count: usize) -> Result<Vec<u8>> {
        self.ensure(count as u64)?;
        let mut bits = Vec::with_capacity(count);
        for _ in 0..count {
            let Cursor { unit, channel, lsb } = self.cursor;
            bits.push((self.carrier.read_channel(unit, channel) >> lsb) & 1);
            self.cursor = self.geometry.step(self.cursor);
        }
        Ok(bits)
    }

    fn read_u32(&mut self, width: usize) -> Result<u32> {
        Ok(from_bits(&self.read(width)?) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::carrier::{AudioCarrier, ImageCarrier};

    fn envelope(depth: u8, salt: Option<[u8; SALT_LEN]>) -> Envelope {
        Envelope {
            depth: Depth::new(depth).unwrap(),
            files: vec![
                FileEntry { name: "notes.txt".into(), size: 1234 },
                FileEntry { name: "ключ.bin".into(), size: 0 },
            ],
            blob_len: 77,
            salt,
        }
    }

    #[test]
    fn test_write_then_read() {
        for depth in 1..=8 {
            let carrier = ImageCarrier::from_rgba(20, 20, vec![0x5A; 1600]).unwrap();
            let env = envelope(depth, Some(*b"saltsalt"));
            let end = env.write(&carrier).unwrap();
            let (read, start) = Envelope::read(&carrier, true).unwrap();
            assert_eq!(read, env);
            assert_eq!(start, end);
        }
    }

    #[test]
    fn test_depth_nibble_uses_one_lsb() {
        let carrier = ImageCarrier::from_rgb(8, 8, vec![0; 192]).unwrap();
        let env = Envelope {
            depth: Depth::new(8).unwrap(),
            files: vec![FileEntry { name: String::new(), size: 0 }],
            blob_len: 0,
            salt: None,
        };
        let end = env.write(&carrier).unwrap();
        let raw = carrier.into_raw();
        // 8 = 0b1000: first channel gets 1, next three get 0, at bit 0 only
        assert_eq!(&raw[..4], &[1, 0, 0, 0]);
        assert_eq!(nibble_end(3), Cursor::new(1, 1, 0));
        assert_eq!(
            Geometry::new(3, Depth::new(8).unwrap()).linear(end),
            env.required_bits(3)
        );
    }

    #[test]
    fn test_required_bits_counts_every_field() {
        let env = envelope(1, None);
        let header = 32 + (32 + 9 * 8 + 32) + (32 + "ключ.bin".len() as u64 * 8 + 32) + 32;
        assert_eq!(env.header_bits(), header);
        // at K=1 the nibble costs exactly 4 positions
        assert_eq!(env.required_bits(4), 4 + header + 77 * 8);
        let salted = envelope(1, Some([0; SALT_LEN]));
        assert_eq!(salted.header_bits(), header + 64);
    }

    #[test]
    fn test_capacity_failure_leaves_carrier_untouched() {
        let cover = vec![0xC3u8; 10 * 10 * 3];
        let carrier = ImageCarrier::from_rgb(10, 10, cover.clone()).unwrap();
        let env = envelope(1, None);
        let err = env.write(&carrier).unwrap_err();
        assert!(matches!(err, StegoError::CapacityExceeded { .. }));
        assert_eq!(carrier.into_raw(), cover);
    }

    #[test]
    fn test_rejects_garbage_headers() {
        // depth nibble 0
        let blank = ImageCarrier::from_rgb(10, 10, vec![0; 300]).unwrap();
        assert!(matches!(Envelope::read(&blank, false), Err(StegoError::MalformedEnvelope(_))));

        // depth nibble 0b0001 followed by an all-ones file count and name length
        let mut bytes = vec![0xFF; 300];
        bytes[..3].fill(0);
        let noisy = ImageCarrier::from_rgb(10, 10, bytes).unwrap();
        assert!(matches!(Envelope::read(&noisy, false), Err(StegoError::MalformedEnvelope(_))));

        let tiny = AudioCarrier::new(vec![0xFF; 4], 1, 8000, 8);
        assert!(Envelope::read(&tiny, false).is_err());
    }
}
