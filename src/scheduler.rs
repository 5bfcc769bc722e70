//! Bulk payload transfer over a worker pool
//!
//! The scheduler cuts a payload bit-stream into jobs. Each job's end cursor is
//! computed in closed form with [`Geometry::advance`], so the next job can be
//! handed out while earlier ones are still running. Job sizes are rounded so
//! jobs start and end on unit boundaries whenever the configured size allows
//! it; otherwise neighbouring jobs share one unit, which both of them access
//! under [`BoundaryLocks`].

use crate::bits::packed_bit;
use crate::carrier::{Carrier, Depth};
use crate::cursor::{Cursor, Geometry};
use crate::error::Result;
use crate::locks::BoundaryLocks;
use crate::pool;
use std::sync::atomic::{AtomicU8, Ordering};
use tracing::{debug, trace};

/// Jobs handed to each worker when the job size is automatic
const JOBS_PER_WORKER: u64 = 4;
/// Smallest automatic job, in units
const MIN_JOB_UNITS: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SchedulerConfig {
    /// Worker threads; 0 uses the available hardware parallelism.
    pub workers: usize,
    /// Payload bits per job; 0 sizes jobs from the payload and worker count.
    pub job_bits: u64,
}

impl SchedulerConfig {
    pub fn with_workers(workers: usize) -> Self {
        Self { workers, ..Self::default() }
    }

    pub fn resolved_workers(&self) -> usize {
        if self.workers > 0 {
            return self.workers;
        }
        std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
    }
}

/// One contiguous slice of the payload bit-stream
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Job {
    /// First carrier bit written or read by this job
    pub start: Cursor,
    /// Index of the job's first bit within the payload bit-stream
    pub first_bit: u64,
    pub bits: u64,
}

/// Packed output shared by decode workers.
///
/// Bits are OR-ed into their final position, so two jobs that split a byte
/// each contribute their own bits and nothing is lost or duplicated.
struct BitSink {
    bytes: Box<[AtomicU8]>,
}

impl BitSink {
    fn new(len: usize) -> Self {
        Self { bytes: (0..len).map(|_| AtomicU8::new(0)).collect() }
    }

    #[inline]
    fn put(&self, index: u64, bit: u8) {
        if bit != 0 {
            self.bytes[(index / 8) as usize].fetch_or(0x80 >> (index % 8), Ordering::Relaxed);
        }
    }

    fn into_vec(self) -> Vec<u8> {
        self.bytes.into_vec().into_iter().map(AtomicU8::into_inner).collect()
    }
}

enum Direction<'a> {
    Encode(&'a [u8]),
    Decode(&'a BitSink),
}

/// Everything a worker needs to execute jobs of one bulk transfer
struct Transfer<'a> {
    carrier: &'a dyn Carrier,
    geometry: Geometry,
    locks: &'a BoundaryLocks,
    direction: Direction<'a>,
}

impl Transfer<'_> {
    /// Walk the job unit by unit, claiming only its first and last unit.
    fn run(&self, worker: usize, job: Job) {
        trace!(worker, start = %job.start, bits = job.bits, "job");
        if job.bits == 0 {
            return;
        }
        let cap = self.geometry.unit_capacity();
        let mut unit = job.start.unit;
        let mut offset = self.geometry.offset(job.start);
        let mut stream = job.first_bit;
        let mut remaining = job.bits;

        while remaining > 0 {
            let span = (cap - offset).min(remaining);
            let boundary = unit == job.start.unit || offset + remaining <= cap;
            let _claim = boundary.then(|| self.locks.claim(unit));
            match self.direction {
                Direction::Encode(payload) => self.encode_unit(payload, unit, offset, span, stream),
                Direction::Decode(sink) => self.decode_unit(sink, unit, offset, span, stream),
            }
            stream += span;
            remaining -= span;
            offset = 0;
            unit += 1;
        }
    }

    fn encode_unit(&self, payload: &[u8], unit: u64, offset: u64, span: u64, stream: u64) {
        let channels = self.geometry.channels() as u64;
        let depth = self.geometry.depth().get() as u64;
        let end = offset + span;
        for channel in 0..channels {
            let mut mask = 0u8;
            let mut value = 0u8;
            for lsb in 0..depth {
                let o = lsb * channels + channel;
                if o < offset || o >= end {
                    continue;
                }
                mask |= 1 << lsb;
                value |= packed_bit(payload, stream + (o - offset)) << lsb;
            }
            if mask != 0 {
                self.carrier.write_channel_bits(unit, channel as u32, mask, value);
            }
        }
    }

    fn decode_unit(&self, sink: &BitSink, unit: u64, offset: u64, span: u64, stream: u64) {
        let channels = self.geometry.channels() as u64;
        let mut values = [0u8; 8];
        for channel in 0..channels.min(8) {
            values[channel as usize] = self.carrier.read_channel(unit, channel as u32);
        }
        for o in offset..offset + span {
            let value = values[(o % channels) as usize];
            sink.put(stream + (o - offset), (value >> (o / channels)) & 1);
        }
    }
}

/// Splits bulk transfers into jobs and runs them on a worker pool
#[derive(Debug, Clone, Default)]
pub struct Scheduler {
    config: SchedulerConfig,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Write `payload` MSB-first starting at `start`; returns the cursor after the last bit.
    ///
    /// # Panics
    /// Panics if the payload runs past the end of the carrier; callers check
    /// capacity before any write.
    pub fn encode(&self, carrier: &dyn Carrier, depth: Depth, start: Cursor, payload: &[u8]) -> Result<Cursor> {
        let geometry = carrier.geometry(depth);
        let total = payload.len() as u64 * 8;
        let end = self.check_bounds(carrier, geometry, start, total);
        let workers = self.config.resolved_workers();
        let locks = BoundaryLocks::new(workers);
        let transfer = Transfer { carrier, geometry, locks: &locks, direction: Direction::Encode(payload) };
        debug!(bytes = payload.len(), workers, %start, %end, "encoding payload");
        self.dispatch(&transfer, workers, start, total)?;
        Ok(end)
    }

    /// Read `len` bytes MSB-first starting at `start`.
    ///
    /// # Panics
    /// Panics if the read runs past the end of the carrier.
    pub fn decode(&self, carrier: &dyn Carrier, depth: Depth, start: Cursor, len: usize) -> Result<Vec<u8>> {
        let geometry = carrier.geometry(depth);
        let total = len as u64 * 8;
        let end = self.check_bounds(carrier, geometry, start, total);
        let workers = self.config.resolved_workers();
        let locks = BoundaryLocks::new(workers);
        let sink = BitSink::new(len);
        let transfer = Transfer { carrier, geometry, locks: &locks, direction: Direction::Decode(&sink) };
        debug!(bytes = len, workers, %start, %end, "decoding payload");
        self.dispatch(&transfer, workers, start, total)?;
        Ok(sink.into_vec())
    }

    fn check_bounds(&self, carrier: &dyn Carrier, geometry: Geometry, start: Cursor, total: u64) -> Cursor {
        let end = geometry.advance(start, total);
        let limit = geometry.unit_capacity() * carrier.units();
        assert!(
            geometry.linear(end) <= limit,
            "transfer of {} bits from {} ends past the carrier ({} addressable bits)",
            total,
            start,
            limit
        );
        end
    }

    fn dispatch(&self, transfer: &Transfer<'_>, workers: usize, start: Cursor, total: u64) -> Result<()> {
        if total == 0 {
            return Ok(());
        }
        let geometry = transfer.geometry;
        let target = self.job_target(geometry, workers, total);
        pool::run(
            workers,
            |worker, job| transfer.run(worker, job),
            |dispatcher| {
                let mut cursor = start;
                let mut done = 0u64;
                while done < total {
                    debug_assert!(done == 0 || target < geometry.unit_capacity() || cursor.is_unit_aligned());
                    let bits = Self::chunk_bits(geometry, cursor, target, total - done);
                    let job = Job { start: cursor, first_bit: done, bits };
                    cursor = geometry.advance(cursor, bits);
                    done += bits;
                    dispatcher.submit(job);
                }
                debug!(jobs = dispatcher.submitted(), workers = dispatcher.workers(), "jobs dispatched");
            },
        )?;
        Ok(())
    }

    fn job_target(&self, geometry: Geometry, workers: usize, total: u64) -> u64 {
        if self.config.job_bits > 0 {
            return self.config.job_bits;
        }
        let per_job = total.div_ceil(workers as u64 * JOBS_PER_WORKER);
        per_job.max(MIN_JOB_UNITS * geometry.unit_capacity())
    }

    /// Size of the next job: a whole number of units when `target` spans at
    /// least one unit, so the job ends on a unit boundary.
    fn chunk_bits(geometry: Geometry, cursor: Cursor, target: u64, remaining: u64) -> u64 {
        let cap = geometry.unit_capacity();
        let bits = if target >= cap {
            (target / cap) * cap - geometry.offset(cursor)
        } else {
            target
        };
        bits.max(1).min(remaining)
    }
}
