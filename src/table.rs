use std::sync::atomic::{AtomicU64, Ordering};

use crate::hash::hash;

/// The hopscotch neighborhood size.
///
/// Every key lives within this many slots of the position it hashes to,
/// which bounds a lookup to one short scan. 64 keeps the scan cheap while
/// making an unresolvable neighborhood vanishingly rare even at high load.
pub(crate) const NEIGHBORHOOD: usize = 64;

/// The maximum origin capacity a set will grow to (256 MiB of slots).
pub(crate) const MAX_CAP: usize = 1 << 25;

/// The smallest origin capacity a set starts with.
pub(crate) const MIN_CAP: usize = 2;

/// Returns the slot count backing a table of origin capacity `cap`.
///
/// Tables larger than one neighborhood carry `NEIGHBORHOOD - 1` extra tail
/// slots. Home positions stay below the tail, so a key hashing to the top
/// of the table still has a full neighborhood ahead of it without
/// wrapping, and the tail slots act as overflow only.
pub(crate) fn slot_count(cap: usize) -> usize {
    if cap <= NEIGHBORHOOD {
        cap
    } else {
        cap + NEIGHBORHOOD - 1
    }
}

/// Inverse of [`slot_count`]: the capacity reported to callers.
fn origin_cap(slots: usize) -> usize {
    if slots <= NEIGHBORHOOD {
        slots
    } else {
        slots + 1 - NEIGHBORHOOD
    }
}

// The placement mask for a table of `slots` slots. Origin capacities are
// powers of two, so `slots - NEIGHBORHOOD` is exactly `origin - 1`.
fn placement_mask(slots: usize) -> u32 {
    if slots <= NEIGHBORHOOD {
        (slots - 1) as u32
    } else {
        (slots - NEIGHBORHOOD) as u32
    }
}

/// The outcome of a raw table insert.
pub(crate) enum Insert {
    /// The key was written to a free slot.
    Inserted,
    /// The key was already present; nothing was written.
    Existed,
    /// No free slot could be moved into the key's neighborhood.
    Full,
}

/// A single open-addressed array of key slots.
///
/// A slot holds either a key or zero, meaning empty; the key 0 is tracked
/// by the set, not the table. Slots are only ever written while the set's
/// writer lock is held, but they are read concurrently, so every slot
/// access is atomic: release stores against acquire loads.
///
/// A table never moves or grows in place. Growing allocates a fresh table
/// and drains this one, so a reader holding a reference may keep scanning
/// it safely for as long as the reference lives.
pub(crate) struct Table {
    slots: Box<[AtomicU64]>,
    mask: u32,
}

impl Table {
    /// Allocates an empty table with `slots` slots (see [`slot_count`]).
    pub(crate) fn new(slots: usize) -> Table {
        Table {
            mask: placement_mask(slots),
            slots: (0..slots).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    /// The number of slots, including the overflow tail.
    pub(crate) fn len(&self) -> usize {
        self.slots.len()
    }

    /// The capacity reported to callers, without the overflow tail.
    pub(crate) fn origin_cap(&self) -> usize {
        origin_cap(self.slots.len())
    }

    /// The home position of `key` in the table at cycle index `idx`.
    #[inline]
    fn home(&self, idx: usize, key: u64) -> usize {
        (hash(idx, key) & self.mask) as usize
    }

    // The scan width starting at `slot`: a full neighborhood, clamped at
    // the end of the table.
    #[inline]
    fn window(&self, slot: usize) -> usize {
        NEIGHBORHOOD.min(self.slots.len() - slot)
    }

    /// Reads the slot at `i`.
    #[inline]
    pub(crate) fn load(&self, i: usize) -> u64 {
        self.slots[i].load(Ordering::Acquire)
    }

    /// Empties the slot at `i`.
    pub(crate) fn clear(&self, i: usize) {
        self.slots[i].store(0, Ordering::Release);
    }

    /// Returns whether `key` is present. Wait-free: a bounded scan of the
    /// key's neighborhood.
    #[inline]
    pub(crate) fn contains(&self, idx: usize, key: u64) -> bool {
        let slot = self.home(idx, key);
        for i in slot..slot + self.window(slot) {
            if self.slots[i].load(Ordering::Acquire) == key {
                return true;
            }
        }
        false
    }

    /// Returns the slot currently holding `key`, if any.
    pub(crate) fn position(&self, idx: usize, key: u64) -> Option<usize> {
        let slot = self.home(idx, key);
        for i in slot..slot + self.window(slot) {
            if self.slots[i].load(Ordering::Acquire) == key {
                return Some(i);
            }
        }
        None
    }

    /// Inserts `key` into the table at cycle index `idx`.
    ///
    /// The caller must hold the set's writer lock; concurrent readers are
    /// fine. The slow path walks a free slot backwards into the key's
    /// neighborhood, displacing keys whose own neighborhood still covers
    /// the free slot.
    pub(crate) fn insert(&self, idx: usize, key: u64) -> Insert {
        let slot = self.home(idx, key);

        // Check for the key and remember the closest hole in one pass.
        let mut off = NEIGHBORHOOD;
        for i in 0..self.window(slot) {
            let k = self.slots[slot + i].load(Ordering::Acquire);
            if k == key {
                return Insert::Existed;
            }
            if k == 0 && i < off {
                off = i;
            }
        }

        if off < NEIGHBORHOOD {
            self.slots[slot + off].store(key, Ordering::Release);
            return Insert::Inserted;
        }

        // The neighborhood is packed. Probe for a hole past it and pull it
        // back one displacement at a time until it lands within reach.
        let mut from = slot + NEIGHBORHOOD;
        loop {
            let hole = match self.pull_back(idx, from) {
                Some(hole) => hole,
                None => return Insert::Full,
            };
            if hole - slot < NEIGHBORHOOD {
                self.slots[hole].store(key, Ordering::Release);
                return Insert::Inserted;
            }
            from = hole;
        }
    }

    // Finds the first hole at or after `from` and moves it one hop closer
    // to the probing key's home. Returns the new hole position.
    //
    // The displaced key is written to the old hole before its own slot is
    // cleared, so a reader scanning either neighborhood sees the key in at
    // least one of the two slots at every instant.
    fn pull_back(&self, idx: usize, from: usize) -> Option<usize> {
        let len = self.slots.len();
        for i in from..len {
            if self.slots[i].load(Ordering::Acquire) != 0 {
                continue;
            }
            // Search from the farthest candidate so the hole moves as far
            // back as a single displacement allows.
            for j in i.saturating_sub(NEIGHBORHOOD - 1)..i {
                let k = self.slots[j].load(Ordering::Acquire);
                if i - self.home(idx, k) < NEIGHBORHOOD {
                    self.slots[i].store(k, Ordering::Release);
                    self.slots[j].store(0, Ordering::Release);
                    return Some(j);
                }
            }
            // No key near the hole can legally move into it.
            return None;
        }
        None
    }
}
