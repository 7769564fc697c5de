//! A concurrent set of `u64` keys built for read-heavy workloads.
//!
//! [`Set`] keeps keys inline in a single array of atomic slots, found by a
//! bounded hopscotch scan, so a lookup is a handful of loads with no
//! locking, hashing of buckets, or pointer chasing. Reads are wait-free;
//! writes come from a single thread and take a cheap spin lock. When a
//! table fills up, a doubled table is published alongside it and a
//! background thread migrates keys over while readers and the writer keep
//! going.
//!
//! # Usage
//!
//! ```
//! use hopset::Set;
//!
//! let set = Set::new(1024);
//!
//! set.add(1).unwrap();
//! set.add(2).unwrap();
//! assert!(set.contains(1));
//!
//! set.remove(1);
//! assert!(!set.contains(1));
//! assert_eq!(set.len(), 1);
//! ```
//!
//! # Contract
//!
//! Any number of threads may call [`Set::contains`] and [`Set::range`]
//! concurrently with the writer. [`Set::add`] and [`Set::remove`] must be
//! serialized onto one thread; the internal bookkeeping assumes a single
//! writer and is not correct for several.
//!
//! The key `0` is fully supported; it is tracked in a flag rather than a
//! slot.

mod hash;
mod set;
mod status;
mod table;

pub use set::{AddError, Set};
