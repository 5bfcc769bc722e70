//! Fixed pool of scoped worker threads with single-slot mailboxes
//!
//! Every worker is either Idle or Active and owns exactly one in-flight job.
//! The submitting thread looks for an Idle worker, flips it to Active, drops
//! the job in its mailbox and unparks it. When every worker is busy the
//! submitter backs off and polls again. A job is never moved to another worker
//! once accepted.
//!
//! Workers are spawned inside [`std::thread::scope`], so they can borrow the
//! session's carrier and can never outlive it.

use crate::locks::Backoff;
use std::panic;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};
use std::thread::{self, ScopedJoinHandle};
use tracing::debug;

const IDLE: u8 = 0;
const ACTIVE: u8 = 1;

#[derive(Debug)]
struct WorkerSlot<J> {
    state: AtomicU8,
    mailbox: Mutex<Option<J>>,
}

impl<J> WorkerSlot<J> {
    fn new() -> Self {
        Self { state: AtomicU8::new(IDLE), mailbox: Mutex::new(None) }
    }

    fn take(&self) -> Option<J> {
        self.mailbox.lock().unwrap_or_else(PoisonError::into_inner).take()
    }

    fn put(&self, job: J) {
        let previous = self.mailbox.lock().unwrap_or_else(PoisonError::into_inner).replace(job);
        assert!(previous.is_none(), "worker mailbox already held a job");
    }

    fn is_idle(&self) -> bool {
        self.state.load(Ordering::Acquire) == IDLE
    }
}

fn worker_loop<J, H>(id: usize, slot: &WorkerSlot<J>, stop: &AtomicBool, handler: &H)
where
    H: Fn(usize, J) + Sync,
{
    debug!(worker = id, "worker started");
    loop {
        match slot.take() {
            Some(job) => {
                handler(id, job);
                slot.state.store(IDLE, Ordering::Release);
            }
            None if stop.load(Ordering::Acquire) => break,
            None => thread::park(),
        }
    }
    debug!(worker = id, "worker stopped");
}

/// Hands jobs to idle workers of a running pool.
pub struct Dispatcher<'scope, J> {
    slots: &'scope [WorkerSlot<J>],
    handles: Vec<ScopedJoinHandle<'scope, ()>>,
    stop: &'scope AtomicBool,
    next: usize,
    submitted: u64,
}

impl<'scope, J: Send> Dispatcher<'scope, J> {
    pub fn workers(&self) -> usize {
        self.handles.len()
    }

    pub fn submitted(&self) -> u64 {
        self.submitted
    }

    /// Give `job` to the next idle worker, waiting for one if all are busy.
    pub fn submit(&mut self, job: J) {
        let count = self.handles.len();
        assert!(count > 0, "pool has no workers");
        let mut backoff = Backoff::new();
        loop {
            for i in 0..count {
                let id = (self.next + i) % count;
                let slot = &self.slots[id];
                if slot
                    .state
                    .compare_exchange(IDLE, ACTIVE, Ordering::AcqRel, Ordering::Acquire)
                    .is_ok()
                {
                    slot.put(job);
                    self.handles[id].thread().unpark();
                    self.next = (id + 1) % count;
                    self.submitted += 1;
                    return;
                }
            }
            self.check_alive();
            backoff.snooze();
        }
    }

    /// Block until every worker is Idle.
    pub fn drain(&self) {
        let mut backoff = Backoff::new();
        while !self.slots[..self.handles.len()].iter().all(WorkerSlot::is_idle) {
            self.check_alive();
            backoff.snooze();
        }
    }

    /// Drain, signal the workers to exit and join them.
    pub fn stop(mut self) {
        self.drain();
        self.signal_stop();
        for handle in std::mem::take(&mut self.handles) {
            if let Err(payload) = handle.join() {
                panic::resume_unwind(payload);
            }
        }
        debug!(jobs = self.submitted, "worker pool stopped");
    }

    fn signal_stop(&self) {
        self.stop.store(true, Ordering::Release);
        for handle in &self.handles {
            handle.thread().unpark();
        }
    }

    // A worker that panicked never returns to Idle.
    fn check_alive(&self) {
        if let Some(id) = self.handles.iter().position(|h| h.is_finished()) {
            panic!("worker {} exited while the pool was running", id);
        }
    }
}

impl<J> Drop for Dispatcher<'_, J> {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        for handle in &self.handles {
            handle.thread().unpark();
        }
    }
}

/// Run `feed` against a pool of `workers` threads executing `handler`.
///
/// The pool is stopped (drained and joined) when `feed` returns.
pub fn run<J, H, F, R>(workers: usize, handler: H, feed: F) -> std::io::Result<R>
where
    J: Send,
    H: Fn(usize, J) + Sync,
    F: FnOnce(&mut Dispatcher<'_, J>) -> R,
{
    let workers = workers.max(1);
    let slots: Vec<WorkerSlot<J>> = (0..workers).map(|_| WorkerSlot::new()).collect();
    let stop = AtomicBool::new(false);

    thread::scope(|scope| {
        let mut dispatcher = Dispatcher {
            slots: &slots,
            handles: Vec::with_capacity(workers),
            stop: &stop,
            next: 0,
            submitted: 0,
        };
        for (id, slot) in slots.iter().enumerate() {
            let handler = &handler;
            let stop = &stop;
            let handle = thread::Builder::new()
                .name(format!("bitveil-worker-{}", id))
                .spawn_scoped(scope, move || worker_loop(id, slot, stop, handler))?;
            dispatcher.handles.push(handle);
        }
        debug!(workers, "worker pool started");

        let result = feed(&mut dispatcher);
        dispatcher.stop();
        Ok(result)
    })
}
