use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Barrier;
use std::thread;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use hopset::{AddError, Set};

const READERS: usize = 4;

fn add_backoff(set: &Set, key: u64) {
    let capacity = set.usage().0;
    loop {
        match set.add(key) {
            Ok(()) => break,
            Err(AddError::TooFast) => thread::sleep(Duration::from_millis(1)),
            Err(err) => panic!("add({key}): {err}"),
        }
    }
    if set.usage().0 != capacity {
        // Let the migration this add spawned get ahead of the burst.
        thread::sleep(Duration::from_millis(2));
    }
}

// Readers hammer a stable prefix of keys while the writer pushes the set
// through several grows, removing half of what it adds along the way.
//
// The stable keys must be observable at every instant, including while a
// migration is draining the table they sit in. Keys with the high bit set
// are never added, so lookups for them must always miss.
#[test]
fn lookups_during_writes_and_grows() {
    const STABLE: u64 = 512;
    const CHURN: u64 = 20_000;

    let set = Set::new(1024);
    for key in 1..=STABLE {
        set.add(key).unwrap();
    }

    let done = AtomicBool::new(false);
    let barrier = Barrier::new(READERS + 1);

    let set = &set;
    let done = &done;
    let barrier = &barrier;

    thread::scope(|s| {
        for seed in 0..READERS {
            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(seed as u64);
                barrier.wait();
                while !done.load(Ordering::Relaxed) {
                    let key = rng.gen_range(1..=STABLE);
                    assert!(set.contains(key), "stable key {key} went missing");

                    let absent = rng.gen::<u64>() | (1 << 63);
                    assert!(!set.contains(absent), "phantom key {absent}");
                }
            });
        }

        barrier.wait();
        let mut removed = Vec::new();
        let mut kept = Vec::new();
        for i in 0..CHURN {
            let key = STABLE + 1 + i;
            add_backoff(set, key);
            if i % 2 == 0 {
                // Removing a key the same step it was added keeps the
                // removal confined to the table it landed in.
                set.remove(key);
                removed.push(key);
            } else {
                kept.push(key);
            }
        }
        done.store(true, Ordering::Relaxed);

        for &key in &kept {
            assert!(set.contains(key), "kept key {key} missing");
        }
        for &key in &removed {
            assert!(!set.contains(key), "removed key {key} still present");
        }
    });

    let (capacity, len) = set.usage();
    assert!(capacity >= 8192, "expected several grows, capacity {capacity}");
    assert_eq!(len as u64, STABLE + CHURN / 2);
}

// Enumerate while a migration is draining the old table. A snapshot may
// briefly miss keys that are mid-copy, but it must never invent keys, and
// once the drain finishes it must report exactly the live set.
#[test]
fn range_during_migration() {
    const KEYS: u64 = 1500;

    let set = Set::new(1024);
    for key in 1..=KEYS {
        add_backoff(&set, key);
    }

    let expected: BTreeSet<u64> = (1..=KEYS).collect();
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let mut seen = BTreeSet::new();
        set.range(|key| {
            assert!((1..=KEYS).contains(&key), "foreign key {key}");
            assert!(seen.insert(key), "key {key} visited twice");
            true
        });

        if seen == expected {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "migration never settled; last snapshot had {} keys",
            seen.len()
        );
        thread::sleep(Duration::from_millis(1));
    }
}

// Close the set right after a grow so the migrator finds it shut down
// mid-drain. Readers that raced the close must finish cleanly.
#[test]
fn close_during_migration() {
    for round in 0..8 {
        let set = Set::new(512);
        let before = set.usage().0;

        let mut key = 1u64;
        while set.usage().0 == before {
            match set.add(key) {
                Ok(()) => key += 1,
                Err(AddError::TooFast) => thread::yield_now(),
                Err(err) => panic!("round {round}: {err}"),
            }
        }

        // A migration is now in flight (or just finished); tear down.
        set.close();
        assert_eq!(set.add(key), Err(AddError::Closed));
        assert!(!set.contains(1));
    }
}

// A writer and many readers racing over the same small window of keys,
// with the writer flipping keys in and out. Readers assert nothing about
// the contended keys; the point is that every lookup completes and the
// writer's final picture is exact.
#[test]
fn churn_small_window() {
    const WINDOW: u64 = 256;

    let set = Set::new(2 * WINDOW as usize);
    let done = AtomicBool::new(false);
    let barrier = Barrier::new(READERS + 1);

    let set = &set;
    let done = &done;
    let barrier = &barrier;

    thread::scope(|s| {
        for seed in 0..READERS {
            s.spawn(move || {
                let mut rng = StdRng::seed_from_u64(0xc0ffee + seed as u64);
                barrier.wait();
                let mut hits = 0u64;
                while !done.load(Ordering::Relaxed) {
                    if set.contains(rng.gen_range(0..WINDOW)) {
                        hits += 1;
                    }
                }
                // Keep the loop from being optimized away.
                assert!(hits < u64::MAX);
            });
        }

        barrier.wait();
        let mut rng = StdRng::seed_from_u64(42);
        let mut live = BTreeSet::new();
        for _ in 0..50_000 {
            let key = rng.gen_range(0..WINDOW);
            if live.contains(&key) {
                set.remove(key);
                live.remove(&key);
            } else {
                match set.add(key) {
                    Ok(()) => {
                        live.insert(key);
                    }
                    Err(AddError::TooFast) => thread::sleep(Duration::from_millis(1)),
                    Err(err) => panic!("{err}"),
                }
            }
        }
        done.store(true, Ordering::Relaxed);

        for key in 0..WINDOW {
            assert_eq!(
                set.contains(key),
                live.contains(&key),
                "writer and set disagree on {key}"
            );
        }
        assert_eq!(set.len(), live.len());
    });
}
