//! Priority queue of delayed/periodic callbacks, ordered by absolute due time.
//!
//! Grounded on the reactor's need (§4.6) for a monotonic scheduler; uses
//! `tokio::time::Instant` as the monotonic clock, consistent with the
//! teacher's tokio-based concurrency stack.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::time::Duration;
use tokio::time::Instant;

/// A boxed, `Send` callback invoked with no arguments when a scheduler
/// entry fires.
pub type SchedulerFn = Box<dyn FnMut() + Send>;

struct Entry {
    due: Instant,
    seq: u64,
    period: Option<Duration>,
    func: SchedulerFn,
}

impl Entry {
    fn key(&self) -> (Instant, u64) {
        (self.due, self.seq)
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}
impl Eq for Entry {}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap is a max-heap; reverse so the earliest due time (and
        // then earliest insertion order, for tie-breaking) pops first.
        other.key().cmp(&self.key())
    }
}

/// The scheduler itself. Not `Sync` on its own; the reactor guards it with
/// its mutex (§5).
#[derive(Default)]
pub struct Scheduler {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            next_seq: 0,
        }
    }

    fn push(&mut self, due: Instant, period: Option<Duration>, func: SchedulerFn) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry {
            due,
            seq,
            period,
            func,
        });
    }

    /// One-shot at `now + delay`.
    pub fn execute_after(&mut self, delay: Duration, func: SchedulerFn) {
        self.push(Instant::now() + delay, None, func);
    }

    /// One-shot at an absolute instant.
    pub fn execute_at(&mut self, when: Instant, func: SchedulerFn) {
        self.push(when, None, func);
    }

    /// Periodic, firing every `period` starting at `now + period`. Rejects
    /// non-positive periods.
    pub fn execute_every(&mut self, period: Duration, func: SchedulerFn) -> Result<(), &'static str> {
        if period.is_zero() {
            return Err("periodic scheduler entries must have period > 0");
        }
        self.push(Instant::now() + period, Some(period), func);
        Ok(())
    }

    /// The due time of the earliest pending entry, if any.
    pub fn next_due(&self) -> Option<Instant> {
        self.heap.peek().map(|e| e.due)
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    /// Fire every entry with due <= now, in due-time (then insertion) order;
    /// periodic entries are fixed-rate rescheduled (next due = prior due +
    /// period, never drifted by how long `func` took to run).
    pub fn run_pending(&mut self) {
        let now = Instant::now();
        while let Some(top) = self.heap.peek() {
            if top.due > now {
                break;
            }
            let mut entry = self.heap.pop().expect("peeked Some above");
            (entry.func)();
            if let Some(period) = entry.period {
                let next_due = entry.due + period;
                self.push(next_due, Some(period), entry.func);
            }
        }
    }
}
