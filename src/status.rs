use std::hint;
use std::sync::atomic::{AtomicU64, Ordering};

// All set-wide bookkeeping lives in a single atomic word, so the writer's
// fast path is one RMW and a reader snapshots every flag with one load.
//
// Layout (bit 63 is the MSB):
//
//   | 63         | 62     | 61     | 60         | 59           | 58       | 32..=57  | 0..=31 |
//   | is_running | locked | sealed | is_scaling | writable_idx | has_zero | reserved | cnt    |
//
// `locked` is the writer spin lock. `writable_idx` selects which half of
// the cycle accepts inserts. `has_zero` tracks the key 0 out-of-band since
// a zero slot means empty. `cnt` is the live-key count; it is wide enough
// for the maximum capacity and callers only decrement a positive count, so
// the borrow of a decrement never leaves the low word.
pub(crate) struct Status(AtomicU64);

const RUNNING: u64 = 1 << 63;
const LOCKED: u64 = 1 << 62;
const SEALED: u64 = 1 << 61;
const SCALING: u64 = 1 << 60;
const WRITABLE: u64 = 1 << 59;
const HAS_ZERO: u64 = 1 << 58;
const CNT_MASK: u64 = (1 << 32) - 1;

impl Status {
    /// A freshly created set: running, with `cycle[0]` writable.
    pub(crate) fn new() -> Status {
        Status(AtomicU64::new(RUNNING))
    }

    pub(crate) fn is_running(&self) -> bool {
        self.0.load(Ordering::Acquire) & RUNNING != 0
    }

    /// Clears the running bit. Returns `false` if the set was already closed.
    pub(crate) fn close(&self) -> bool {
        self.0.fetch_and(!RUNNING, Ordering::AcqRel) & RUNNING != 0
    }

    /// Attempts to take the writer lock. No fairness.
    pub(crate) fn try_lock(&self) -> bool {
        let status = self.0.load(Ordering::Relaxed);
        if status & LOCKED != 0 {
            return false;
        }
        self.0
            .compare_exchange(status, status | LOCKED, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Spins until the writer lock is held.
    ///
    /// The lock is never held across unbounded work, so a plain pause-retry
    /// loop is enough; there is no queueing.
    pub(crate) fn lock(&self) {
        while !self.try_lock() {
            hint::spin_loop();
        }
    }

    /// Releases the writer lock. The caller must hold it.
    pub(crate) fn unlock(&self) {
        self.0.fetch_and(!LOCKED, Ordering::Release);
    }

    /// Disables writes permanently after a failed migration.
    pub(crate) fn seal(&self) {
        self.0.fetch_or(SEALED, Ordering::AcqRel);
    }

    pub(crate) fn is_sealed(&self) -> bool {
        self.0.load(Ordering::Acquire) & SEALED != 0
    }

    /// Marks a migration as in progress.
    pub(crate) fn scale(&self) {
        self.0.fetch_or(SCALING, Ordering::AcqRel);
    }

    /// Marks the migration as finished.
    pub(crate) fn unscale(&self) {
        self.0.fetch_and(!SCALING, Ordering::AcqRel);
    }

    pub(crate) fn is_scaling(&self) -> bool {
        self.0.load(Ordering::Acquire) & SCALING != 0
    }

    pub(crate) fn writable_idx(&self) -> usize {
        ((self.0.load(Ordering::Acquire) & WRITABLE) != 0) as usize
    }

    pub(crate) fn set_writable(&self, idx: usize) {
        if idx == 0 {
            self.0.fetch_and(!WRITABLE, Ordering::AcqRel);
        } else {
            self.0.fetch_or(WRITABLE, Ordering::AcqRel);
        }
    }

    pub(crate) fn has_zero(&self) -> bool {
        self.0.load(Ordering::Acquire) & HAS_ZERO != 0
    }

    /// Records the key 0 as present. Returns `false` if it already was,
    /// so the caller adjusts the counter exactly once.
    pub(crate) fn add_zero(&self) -> bool {
        self.0.fetch_or(HAS_ZERO, Ordering::AcqRel) & HAS_ZERO == 0
    }

    /// Records the key 0 as absent. Returns `false` if it already was.
    pub(crate) fn del_zero(&self) -> bool {
        self.0.fetch_and(!HAS_ZERO, Ordering::AcqRel) & HAS_ZERO != 0
    }

    pub(crate) fn add_cnt(&self) {
        self.0.fetch_add(1, Ordering::AcqRel);
    }

    /// Decrements the live-key count. The count must be positive.
    pub(crate) fn del_cnt(&self) {
        self.0.fetch_add(!0, Ordering::AcqRel);
    }

    pub(crate) fn cnt(&self) -> u32 {
        (self.0.load(Ordering::Acquire) & CNT_MASK) as u32
    }
}
