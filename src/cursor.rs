//! Bit-cursor arithmetic
//!
//! A cursor addresses one bit of the carrier: `(unit, channel, lsb)`. Inside a
//! unit the bits are ordered channel-fastest, so the intra-unit offset is
//! `lsb * channels + channel`. Existing media depend on this ordering.
//!
//! [`Geometry::advance`] is the closed form the scheduler uses to hand out
//! the next job before the current one finishes. [`Geometry::step`] moves a
//! single bit and is what the serial envelope reader/writer uses.

use crate::carrier::Depth;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Cursor {
    pub unit: u64,
    pub channel: u32,
    pub lsb: u32,
}

impl Cursor {
    pub const ORIGIN: Cursor = Cursor { unit: 0, channel: 0, lsb: 0 };

    pub const fn new(unit: u64, channel: u32, lsb: u32) -> Self {
        Self { unit, channel, lsb }
    }

    /// True when the cursor sits on the first bit of a unit.
    pub fn is_unit_aligned(&self) -> bool {
        self.channel == 0 && self.lsb == 0
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(unit {}, ch {}, lsb {})", self.unit, self.channel, self.lsb)
    }
}

/// Shape of the bit-address space: channels per unit and LSB depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    channels: u32,
    depth: Depth,
}

impl Geometry {
    /// # Panics
    /// Panics if `channels` is zero.
    pub fn new(channels: usize, depth: Depth) -> Self {
        assert!(channels > 0, "carrier must expose at least one channel");
        Self { channels: channels as u32, depth }
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn depth(&self) -> Depth {
        self.depth
    }

    /// Bits per unit (`K * M`)
    pub fn unit_capacity(&self) -> u64 {
        self.depth.get() as u64 * self.channels as u64
    }

    /// Intra-unit bit offset of `cursor`.
    pub fn offset(&self, cursor: Cursor) -> u64 {
        debug_assert!(cursor.channel < self.channels);
        debug_assert!(cursor.lsb < self.depth.get() as u32);
        cursor.lsb as u64 * self.channels as u64 + cursor.channel as u64
    }

    /// Cursor at a given unit and intra-unit offset.
    pub fn at_offset(&self, unit: u64, offset: u64) -> Cursor {
        debug_assert!(offset < self.unit_capacity());
        Cursor {
            unit,
            channel: (offset % self.channels as u64) as u32,
            lsb: (offset / self.channels as u64) as u32,
        }
    }

    /// Absolute bit address of `cursor` at this depth.
    pub fn linear(&self, cursor: Cursor) -> u64 {
        cursor.unit * self.unit_capacity() + self.offset(cursor)
    }

    /// Move `bits` positions forward from `start` without walking them.
    pub fn advance(&self, start: Cursor, bits: u64) -> Cursor {
        if bits == 0 {
            return start;
        }
        let cap = self.unit_capacity();
        let total = self.offset(start) + bits;
        self.at_offset(start.unit + total / cap, total % cap)
    }

    /// Move exactly one bit forward: channel first, then lsb, then unit.
    pub fn step(&self, cursor: Cursor) -> Cursor {
        let mut next = cursor;
        next.channel += 1;
        if next.channel == self.channels {
            next.channel = 0;
            next.lsb += 1;
            if next.lsb == self.depth.get() as u32 {
                next.lsb = 0;
                next.unit += 1;
            }
        }
        next
    }

    /// Carry a cursor produced at another depth over to this one.
    ///
    /// The channel and lsb coordinates are kept as-is; this is how the
    /// envelope switches from the K=1 depth nibble to the session depth.
    pub fn rebase(&self, cursor: Cursor) -> Cursor {
        assert!(
            cursor.lsb < self.depth.get() as u32 && cursor.channel < self.channels,
            "cursor {} not addressable at depth {}",
            cursor,
            self.depth
        );
        cursor
    }
}
