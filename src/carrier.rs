//! Carrier model: a uniform bit-addressable view over pixels or PCM bytes
//!
//! A carrier is split into *units* (a pixel, or one PCM byte) each exposing
//! one or more 8-bit *channels*. Only the low `K` bits of a channel are ever
//! touched, where `K` is the session's [`Depth`].
//!
//! The backing buffer is a slice of atomic bytes owned by the carrier. Workers
//! only receive `&Carrier`, and the scheduler guarantees that two jobs can only
//! meet on a single boundary unit, which they access under
//! [`BoundaryLocks`](crate::locks::BoundaryLocks). Byte updates are therefore a
//! plain load followed by a store; nothing here is a compare-and-swap loop.

use crate::cursor::Geometry;
use crate::error::{Result, StegoError};
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

/// LSB depth: how many low-order bits of each channel carry payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Depth(u8);

impl Depth {
    pub const MIN: Depth = Depth(1);
    pub const MAX: Depth = Depth(8);

    pub fn new(bits: u8) -> Result<Self> {
        if (1..=8).contains(&bits) {
            Ok(Self(bits))
        } else {
            Err(StegoError::InvalidDepth(bits))
        }
    }

    pub fn get(self) -> u8 {
        self.0
    }

    /// Mask selecting the low `K` bits of a channel byte
    pub fn mask(self) -> u8 {
        (((1u16) << self.0) - 1) as u8
    }
}

impl Default for Depth {
    fn default() -> Self {
        Depth::MIN
    }
}

impl TryFrom<u8> for Depth {
    type Error = StegoError;

    fn try_from(bits: u8) -> Result<Self> {
        Depth::new(bits)
    }
}

impl fmt::Display for Depth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "K={}", self.0)
    }
}

/// Where a unit lives in its medium
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitCoord {
    Pixel { x: u32, y: u32 },
    Sample { byte: u64 },
}

/// Bit-addressable storage shared by the workers of one session.
pub trait Carrier: Sync {
    /// Number of addressable units.
    fn units(&self) -> u64;

    /// Channels per unit (`M`).
    fn channels(&self) -> usize;

    /// Map a unit index back to its position in the medium.
    fn locate(&self, unit: u64) -> UnitCoord;

    /// Full 8-bit value of one channel.
    ///
    /// # Panics
    /// Panics if `unit` or `channel` is out of range.
    fn read_channel(&self, unit: u64, channel: u32) -> u8;

    /// Replace the bits selected by `mask` in one channel with those of `bits`.
    ///
    /// # Panics
    /// Panics if `unit` or `channel` is out of range.
    fn write_channel_bits(&self, unit: u64, channel: u32, mask: u8, bits: u8);

    fn capacity_bits(&self, depth: Depth) -> u64 {
        self.units() * self.channels() as u64 * depth.get() as u64
    }

    fn geometry(&self, depth: Depth) -> Geometry {
        Geometry::new(self.channels(), depth)
    }

    /// The low `K` bits of one channel.
    fn read_lsbs(&self, unit: u64, channel: u32, depth: Depth) -> u8 {
        self.read_channel(unit, channel) & depth.mask()
    }

    /// Overwrite the low `K` bits of one channel.
    fn write_lsbs(&self, unit: u64, channel: u32, depth: Depth, value: u8) {
        self.write_channel_bits(unit, channel, depth.mask(), value);
    }
}

struct SharedBytes(Box<[AtomicU8]>);

impl SharedBytes {
    fn from_vec(bytes: Vec<u8>) -> Self {
        Self(bytes.into_iter().map(AtomicU8::new).collect())
    }

    fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    fn load(&self, index: usize) -> u8 {
        self.0[index].load(Ordering::Acquire)
    }

    #[inline]
    fn store_bits(&self, index: usize, mask: u8, bits: u8) {
        let slot = &self.0[index];
        let current = slot.load(Ordering::Acquire);
        slot.store((current & !mask) | (bits & mask), Ordering::Release);
    }

    fn snapshot(&self) -> Vec<u8> {
        self.0.iter().map(|b| b.load(Ordering::Acquire)).collect()
    }

    fn into_vec(self) -> Vec<u8> {
        self.0.into_vec().into_iter().map(AtomicU8::into_inner).collect()
    }
}

impl fmt::Debug for SharedBytes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedBytes({} bytes)", self.len())
    }
}

/// Channel order per pixel layout; channel 0 is red (RGB) or alpha (ARGB).
const RGB_ORDER: [usize; 3] = [0, 1, 2];
const ARGB_FROM_RGBA: [usize; 4] = [3, 0, 1, 2];

/// A raster image in row-major order, RGB8 or RGBA8 bytes.
#[derive(Debug)]
pub struct ImageCarrier {
    width: u32,
    height: u32,
    channels: usize,
    data: SharedBytes,
}

impl ImageCarrier {
    /// Wrap a raw interleaved pixel buffer.
    ///
    /// `channels` must be 3 (RGB bytes) or 4 (RGBA bytes).
    pub fn new(width: u32, height: u32, channels: usize, data: Vec<u8>) -> Result<Self> {
        if channels != 3 && channels != 4 {
            return Err(StegoError::UnsupportedCarrierFormat(format!(
                "{} channels per pixel (expected 3 or 4)",
                channels
            )));
        }
        let expected = width as usize * height as usize * channels;
        if data.len() != expected {
            return Err(StegoError::UnsupportedCarrierFormat(format!(
                "pixel buffer holds {} bytes, {}x{}x{} needs {}",
                data.len(),
                width,
                height,
                channels,
                expected
            )));
        }
        Ok(Self { width, height, channels, data: SharedBytes::from_vec(data) })
    }

    pub fn from_rgb(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::new(width, height, 3, data)
    }

    pub fn from_rgba(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        Self::new(width, height, 4, data)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn has_alpha(&self) -> bool {
        self.channels == 4
    }

    /// Copy of the current pixel bytes.
    pub fn snapshot(&self) -> Vec<u8> {
        self.data.snapshot()
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data.into_vec()
    }

    #[inline]
    fn byte_index(&self, unit: u64, channel: u32) -> usize {
        assert!(unit < self.units(), "pixel {} outside {}x{} image", unit, self.width, self.height);
        let order: &[usize] = if self.channels == 4 { &ARGB_FROM_RGBA } else { &RGB_ORDER };
        unit as usize * self.channels + order[channel as usize]
    }
}

impl Carrier for ImageCarrier {
    fn units(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    fn channels(&self) -> usize {
        self.channels
    }

    fn locate(&self, unit: u64) -> UnitCoord {
        UnitCoord::Pixel {
            x: (unit % self.width as u64) as u32,
            y: (unit / self.width as u64) as u32,
        }
    }

    fn read_channel(&self, unit: u64, channel: u32) -> u8 {
        self.data.load(self.byte_index(unit, channel))
    }

    fn write_channel_bits(&self, unit: u64, channel: u32, mask: u8, bits: u8) {
        self.data.store_bits(self.byte_index(unit, channel), mask, bits);
    }
}

/// Interleaved PCM bytes; only the odd ("right channel") bytes carry payload.
#[derive(Debug)]
pub struct AudioCarrier {
    data: SharedBytes,
    channels: u16,
    sample_rate: u32,
    bits_per_sample: u16,
}

impl AudioCarrier {
    pub fn new(data: Vec<u8>, channels: u16, sample_rate: u32, bits_per_sample: u16) -> Self {
        Self { data: SharedBytes::from_vec(data), channels, sample_rate, bits_per_sample }
    }

    pub fn pcm_channels(&self) -> u16 {
        self.channels
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn bits_per_sample(&self) -> u16 {
        self.bits_per_sample
    }

    pub fn snapshot(&self) -> Vec<u8> {
        self.data.snapshot()
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data.into_vec()
    }

    #[inline]
    fn byte_index(&self, unit: u64, channel: u32) -> usize {
        assert!(channel == 0, "audio units have a single channel, got {}", channel);
        assert!(unit < self.units(), "sample {} outside {} PCM bytes", unit, self.data.len());
        2 * unit as usize + 1
    }
}

impl Carrier for AudioCarrier {
    fn units(&self) -> u64 {
        (self.data.len() / 2) as u64
    }

    fn channels(&self) -> usize {
        1
    }

    fn locate(&self, unit: u64) -> UnitCoord {
        UnitCoord::Sample { byte: 2 * unit + 1 }
    }

    fn read_channel(&self, unit: u64, channel: u32) -> u8 {
        self.data.load(self.byte_index(unit, channel))
    }

    fn write_channel_bits(&self, unit: u64, channel: u32, mask: u8, bits: u8) {
        self.data.store_bits(self.byte_index(unit, channel), mask, bits);
    }
}
