use std::fmt;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;
use std::{ptr, thread};

use seize::{reclaim, Collector, Guard, Linked};

use crate::status::Status;
use crate::table::{slot_count, Insert, Table, MAX_CAP, MIN_CAP};

/// A concurrent set of `u64` keys.
///
/// Lookups are wait-free and scale across any number of reader threads.
/// Mutation is single-writer by contract: `add` and `remove` must be
/// issued by one thread at a time (the same thread for both). Keys are
/// stored inline in open-addressed tables, so memory stays at a few bytes
/// per key with no per-key allocation.
///
/// When the current table cannot admit a key, the set publishes a table
/// of twice the capacity and a background thread drains the old one while
/// readers and the writer continue. Readers still holding a reference to
/// a drained table are protected by deferred reclamation; the memory is
/// freed only once the last reference is gone.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
///
/// let set = Arc::new(hopset::Set::new(1024));
///
/// set.add(7).unwrap();
///
/// let reader = set.clone();
/// std::thread::spawn(move || {
///     assert!(reader.contains(7));
/// })
/// .join()
/// .unwrap();
/// ```
pub struct Set {
    inner: Arc<Inner>,
}

/// The reason an [`add`](Set::add) was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddError {
    /// The set has been closed.
    Closed,
    /// A previous migration failed; the set refuses writes but still
    /// serves reads. Recreate the set to recover.
    Sealed,
    /// Growing further would exceed the maximum capacity.
    Full,
    /// Keys are being added faster than the background migration drains
    /// the old table. Back off and retry.
    TooFast,
}

impl fmt::Display for AddError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddError::Closed => f.write_str("set is closed"),
            AddError::Sealed => f.write_str("set is sealed after a failed migration"),
            AddError::Full => f.write_str("set is at maximum capacity"),
            AddError::TooFast => f.write_str("add outpaced table migration"),
        }
    }
}

impl std::error::Error for AddError {}

// State shared with the background migrator thread.
struct Inner {
    // Flags, the writer lock, and the live-key count in one atomic word.
    status: Status,

    // The two-table cycle. At steady state one entry is live; during a
    // migration the writable table's sibling is the one being drained.
    cycle: [AtomicPtr<Linked<Table>>; 2],

    // Defers table reclamation past the last reader.
    collector: Collector,
}

impl Set {
    /// Creates a set that holds roughly `capacity` keys before growing.
    ///
    /// The capacity is rounded up to a power of two and clamped to
    /// `[2, 1 << 25]`. The set grows by doubling as needed; it never
    /// shrinks.
    ///
    /// # Examples
    ///
    /// ```
    /// let set = hopset::Set::new(1024);
    /// assert_eq!(set.usage(), (1024, 0));
    /// ```
    pub fn new(capacity: usize) -> Set {
        let capacity = capacity.clamp(MIN_CAP, MAX_CAP).next_power_of_two();
        let collector = Collector::new();
        let table = collector.link_boxed(Table::new(slot_count(capacity)));

        Set {
            inner: Arc::new(Inner {
                status: Status::new(),
                cycle: [AtomicPtr::new(table), AtomicPtr::new(ptr::null_mut())],
                collector,
            }),
        }
    }

    /// Adds `key` to the set.
    ///
    /// Adding a key that is already present succeeds without changing the
    /// set. Only one thread may add or remove at a time.
    ///
    /// # Errors
    ///
    /// - [`AddError::Closed`]: the set was closed.
    /// - [`AddError::Sealed`]: a migration failed; writes are disabled.
    /// - [`AddError::Full`]: the set is at maximum capacity.
    /// - [`AddError::TooFast`]: a migration is still draining the old
    ///   table; back off and retry.
    ///
    /// # Examples
    ///
    /// ```
    /// let set = hopset::Set::new(16);
    /// set.add(42).unwrap();
    /// set.add(42).unwrap();
    /// assert_eq!(set.usage(), (16, 1));
    /// ```
    pub fn add(&self, key: u64) -> Result<(), AddError> {
        let inner = &*self.inner;

        if !inner.status.is_running() {
            return Err(AddError::Closed);
        }

        inner.status.lock();
        let result = self.add_locked(key);
        inner.status.unlock();
        result
    }

    fn add_locked(&self, key: u64) -> Result<(), AddError> {
        let inner = &*self.inner;

        if inner.status.is_sealed() {
            return Err(AddError::Sealed);
        }

        // The zero key cannot live in a slot, zero meaning empty; it is a
        // flag in the status word instead.
        if key == 0 {
            if inner.status.add_zero() {
                inner.status.add_cnt();
            }
            return Ok(());
        }

        let guard = inner.collector.enter();
        let idx = inner.status.writable_idx();
        let table = inner.table(idx, &guard).ok_or(AddError::Closed)?;

        match table.insert(idx, key) {
            Insert::Inserted => {
                inner.status.add_cnt();
                Ok(())
            }
            Insert::Existed => Ok(()),
            Insert::Full => self.grow_insert(idx, table, key),
        }
    }

    // The writable table could not admit `key`: publish a doubled table,
    // insert there, and hand the old table to a background migrator.
    // Called with the writer lock held.
    fn grow_insert(&self, idx: usize, table: &Table, key: u64) -> Result<(), AddError> {
        let inner = &*self.inner;

        if inner.status.is_scaling() {
            // The previous migration has not drained its table yet, so
            // there is nowhere to grow into. The caller is inserting
            // faster than one table can be traversed.
            return Err(AddError::TooFast);
        }

        let origin = table.origin_cap();
        if origin * 2 > MAX_CAP {
            return Err(AddError::Full);
        }

        log::debug!("growing from {origin} to {} keys", origin * 2);

        let next = idx ^ 1;
        let grown = inner.collector.link_boxed(Table::new(slot_count(origin * 2)));
        inner.cycle[next].store(grown, Ordering::Release);
        inner.status.set_writable(next);
        inner.status.scale();

        // A fresh table at twice the capacity always has room for one key.
        //
        // Safety: `grown` was allocated above and cannot have been retired
        // while the writer lock is held.
        let inserted = unsafe { &*grown }.insert(next, key);
        debug_assert!(matches!(inserted, Insert::Inserted));
        inner.status.add_cnt();

        let migrator = Arc::clone(&self.inner);
        thread::spawn(move || migrator.migrate(idx));

        Ok(())
    }

    /// Returns whether `key` is in the set.
    ///
    /// Wait-free: a bounded scan per table, never blocked by the writer
    /// or by an in-flight migration.
    ///
    /// # Examples
    ///
    /// ```
    /// let set = hopset::Set::new(16);
    /// set.add(1).unwrap();
    /// assert!(set.contains(1));
    /// assert!(!set.contains(2));
    /// ```
    #[inline]
    pub fn contains(&self, key: u64) -> bool {
        let inner = &*self.inner;

        if key == 0 {
            return inner.status.has_zero();
        }

        let guard = inner.collector.enter();
        let widx = inner.status.writable_idx();

        // The writable index may flip between these two loads; that is
        // benign because both tables are inspected whenever both exist.
        for idx in [widx, widx ^ 1] {
            if let Some(table) = inner.table(idx, &guard) {
                if table.contains(idx, key) {
                    return true;
                }
            }
        }
        false
    }

    /// Removes `key` from the set.
    ///
    /// A no-op if the key is absent or the set is closed. Removal is part
    /// of the single-writer contract: it must come from the same thread
    /// that adds.
    ///
    /// # Examples
    ///
    /// ```
    /// let set = hopset::Set::new(16);
    /// set.add(3).unwrap();
    /// set.remove(3);
    /// assert!(!set.contains(3));
    /// ```
    pub fn remove(&self, key: u64) {
        let inner = &*self.inner;

        if !inner.status.is_running() {
            return;
        }

        inner.status.lock();
        inner.remove_locked(key);
        inner.status.unlock();
    }

    /// Calls `f` for each key in the set until `f` returns `false`.
    ///
    /// The enumeration is best-effort: without concurrent mutation every
    /// key is visited exactly once, but keys added or removed while the
    /// enumeration runs may be visited once or not at all.
    ///
    /// # Examples
    ///
    /// ```
    /// let set = hopset::Set::new(16);
    /// set.add(1).unwrap();
    /// set.add(2).unwrap();
    ///
    /// let mut keys = Vec::new();
    /// set.range(|key| {
    ///     keys.push(key);
    ///     true
    /// });
    /// keys.sort_unstable();
    /// assert_eq!(keys, [1, 2]);
    /// ```
    pub fn range(&self, mut f: impl FnMut(u64) -> bool) {
        let inner = &*self.inner;
        let guard = inner.collector.enter();

        let widx = inner.status.writable_idx();
        let writable = inner.table(widx, &guard);
        let draining = inner.table(widx ^ 1, &guard);

        if let Some(table) = writable {
            // Reverse order: an in-flight displacement moves a key toward
            // higher slots, so walking down avoids visiting it twice.
            for i in (0..table.len()).rev() {
                let key = table.load(i);
                if key == 0 {
                    continue;
                }
                if !f(key) {
                    return;
                }
            }
        }

        if let Some(table) = draining {
            for i in (0..table.len()).rev() {
                let key = table.load(i);
                if key == 0 {
                    continue;
                }
                // Skip keys the migration already copied forward.
                if writable.is_some_and(|wt| wt.contains(widx, key)) {
                    continue;
                }
                if !f(key) {
                    return;
                }
            }
        }

        if inner.status.has_zero() {
            f(0);
        }
    }

    /// Returns `(capacity, len)`: how many keys the current table holds
    /// before growing, and the live-key count.
    ///
    /// The count is exact under quiescence and a close estimate while
    /// mutations are in flight.
    pub fn usage(&self) -> (usize, usize) {
        let inner = &*self.inner;
        let guard = inner.collector.enter();

        let capacity = inner
            .table(inner.status.writable_idx(), &guard)
            .map(Table::origin_cap)
            .unwrap_or(0);
        (capacity, inner.status.cnt() as usize)
    }

    /// Returns the number of keys in the set.
    pub fn len(&self) -> usize {
        self.inner.status.cnt() as usize
    }

    /// Returns whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes the set and releases its tables.
    ///
    /// In-flight lookups finish safely against the tables they already
    /// snapshotted; a running migration notices and exits. Subsequent
    /// adds return [`AddError::Closed`]. Dropping the set closes it too.
    pub fn close(&self) {
        self.inner.close();
    }
}

impl fmt::Debug for Set {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (capacity, len) = self.usage();
        f.debug_struct("Set")
            .field("capacity", &capacity)
            .field("len", &len)
            .finish()
    }
}

impl Inner {
    /// Loads the table at `idx`, keeping it protected for the lifetime of
    /// `guard`.
    fn table<'g>(&self, idx: usize, guard: &'g impl Guard) -> Option<&'g Table> {
        let ptr = guard.protect(&self.cycle[idx], Ordering::Acquire);

        // Safety: a non-null cycle pointer is a live table allocation; it
        // is only freed through the collector, after every guard that
        // could have observed it has been dropped.
        unsafe { ptr.as_ref() }.map(|linked| &linked.value)
    }

    fn remove_locked(&self, key: u64) {
        if key == 0 {
            if self.status.del_zero() {
                self.status.del_cnt();
            }
            return;
        }

        let guard = self.collector.enter();
        let widx = self.status.writable_idx();
        for idx in [widx, widx ^ 1] {
            if let Some(table) = self.table(idx, &guard) {
                if let Some(pos) = table.position(idx, key) {
                    table.clear(pos);
                    self.status.del_cnt();
                    return;
                }
            }
        }
    }

    // Drains the table at `src_idx` into its sibling, one slot per lock
    // acquisition, so foreground adds wait for at most one insert's worth
    // of work.
    fn migrate(self: Arc<Self>, src_idx: usize) {
        let guard = self.collector.enter();
        let src = match self.table(src_idx, &guard) {
            Some(table) => table,
            None => return,
        };
        let dst_idx = src_idx ^ 1;
        let len = src.len();

        let mut moved = 0;
        for i in 0..len {
            if !self.status.is_running() {
                return;
            }

            // Yield periodically so the writer is not starved of the lock.
            if moved >= 10 {
                moved = 0;
                thread::yield_now();
            }

            self.status.lock();

            let key = src.load(i);
            if key != 0 {
                let dst = match self.table(dst_idx, &guard) {
                    Some(table) => table,
                    None => {
                        // Closed underneath us.
                        self.status.unlock();
                        return;
                    }
                };
                match dst.insert(dst_idx, key) {
                    Insert::Inserted => {}
                    // A racing add already placed this key in the new
                    // table and counted it a second time.
                    Insert::Existed => self.status.del_cnt(),
                    Insert::Full => {
                        // Even the doubled table cannot take the key, so
                        // the set cannot be made whole. Stop accepting
                        // writes; reads stay correct.
                        self.status.seal();
                        self.status.unlock();
                        log::error!("migration target is full, sealing the set");
                        return;
                    }
                }
                moved += 1;
            }

            if i == len - 1 {
                let old = self.cycle[src_idx].swap(ptr::null_mut(), Ordering::AcqRel);
                if !old.is_null() {
                    // Safety: the pointer was just unlinked from the
                    // cycle, so no new reference to it can be taken.
                    unsafe { self.collector.retire(old, reclaim::boxed::<Linked<Table>>) };
                }
                self.status.unscale();
                log::debug!("table migration complete");
            }

            self.status.unlock();
        }
    }

    fn close(&self) {
        if !self.status.close() {
            return;
        }
        for slot in &self.cycle {
            let old = slot.swap(ptr::null_mut(), Ordering::AcqRel);
            if !old.is_null() {
                // Safety: unlinked above; late readers still hold guards
                // and the collector waits them out.
                unsafe { self.collector.retire(old, reclaim::boxed::<Linked<Table>>) };
            }
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sealed_refuses_adds() {
        let set = Set::new(16);
        set.add(1).unwrap();
        set.inner.status.seal();
        assert_eq!(set.add(2), Err(AddError::Sealed));
        // Reads keep working on a sealed set.
        assert!(set.contains(1));
        assert!(!set.contains(2));
    }

    #[test]
    fn closed_refuses_adds() {
        let set = Set::new(16);
        set.close();
        assert_eq!(set.add(1), Err(AddError::Closed));
        // Closing twice is fine.
        set.close();
    }

    // Pretend a migration is stuck: with the scaling flag held, a full
    // table cannot grow and the writer sees backpressure instead.
    #[test]
    fn saturated_add_reports_too_fast() {
        let set = Set::new(1024);
        set.inner.status.scale();

        let mut added = Vec::new();
        let refused = loop {
            let key = added.len() as u64 + 1;
            match set.add(key) {
                Ok(()) => added.push(key),
                Err(err) => break err,
            }
        };

        assert_eq!(refused, AddError::TooFast);
        // Displacement keeps a table usable well past half load.
        assert!(added.len() > 512, "saturated after only {}", added.len());
        for &key in &added {
            assert!(set.contains(key), "{key} lost before saturation");
        }
        assert_eq!(set.len(), added.len());
    }

    #[test]
    fn grow_publishes_sibling_table() {
        let set = Set::new(2);
        let mut key = 1u64;
        // Force a few grows. A table this small offers no displacement
        // slack, so let each migration finish before pushing further.
        while set.usage().0 < 8 {
            if set.inner.status.is_scaling() {
                thread::yield_now();
                continue;
            }
            match set.add(key) {
                Ok(()) => key += 1,
                Err(err) => panic!("{err}"),
            }
        }
        for k in 1..key {
            assert!(set.contains(k), "{k} lost across grow");
        }
    }
}
