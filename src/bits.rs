//! Fixed-width bit vectors
//!
//! Every integer field that travels through a carrier is laid out most
//! significant bit first. A "bit vector" here is a `Vec<u8>` whose elements
//! are exactly 0 or 1.

/// Convert the low `width` bits of `value` to an MSB-first bit vector.
///
/// # Panics
/// Panics if `width > 64`.
pub fn to_bits(value: u64, width: usize) -> Vec<u8> {
    assert!(width <= 64, "bit width {} exceeds 64", width);
    (0..width).rev().map(|i| ((value >> i) & 1) as u8).collect()
}

/// Inverse of [`to_bits`]
pub fn from_bits(bits: &[u8]) -> u64 {
    debug_assert!(bits.len() <= 64);
    bits.iter().fold(0u64, |acc, &bit| (acc << 1) | (bit & 1) as u64)
}

/// Two's complement form of `value` at the given width.
pub fn to_bits_signed(value: i64, width: usize) -> Vec<u8> {
    to_bits(value as u64, width)
}

/// Read a two's complement bit vector, sign-extending from its top bit.
pub fn from_bits_signed(bits: &[u8]) -> i64 {
    let width = bits.len();
    if width == 0 {
        return 0;
    }
    let raw = from_bits(bits);
    if width < 64 && bits[0] == 1 {
        (raw | (u64::MAX << width)) as i64
    } else {
        raw as i64
    }
}

/// Unpack bytes into an MSB-first bit vector
pub fn bytes_to_bits(data: &[u8]) -> Vec<u8> {
    let mut bits = Vec::with_capacity(data.len() * 8);
    for &byte in data {
        for i in (0..8).rev() {
            bits.push((byte >> i) & 1);
        }
    }
    bits
}

/// Pack an MSB-first bit vector into bytes; a trailing partial byte is zero-padded.
pub fn bits_to_bytes(bits: &[u8]) -> Vec<u8> {
    let mut out = vec![0u8; (bits.len() + 7) / 8];
    for (i, &bit) in bits.iter().enumerate() {
        out[i / 8] |= (bit & 1) << (7 - (i % 8));
    }
    out
}

/// The `index`-th bit of a packed byte string, MSB first.
#[inline]
pub fn packed_bit(bytes: &[u8], index: u64) -> u8 {
    (bytes[(index / 8) as usize] >> (7 - (index % 8))) & 1
}
