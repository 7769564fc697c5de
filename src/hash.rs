// Keyed 64 -> 32 bit hashing, one function per table.
//
// The two tables must hash independently: a key that collides heavily in
// one table is then unlikely to collide in the other, which is what makes
// draining a full table into its sibling reliable. The table index is fed
// in as the seed of a Murmur3-style mix over the two halves of the key.

/// Hashes `key` for the table at `idx`.
#[inline]
pub(crate) fn hash(idx: usize, key: u64) -> u32 {
    hash32(key, idx as u32)
}

#[inline]
fn hash32(key: u64, seed: u32) -> u32 {
    let lo = key as u32;
    let hi = (key >> 32) as u32;

    let a = 8u32.wrapping_add(lo);
    let b = 40u32.wrapping_add(hi);
    let c = 9u32.wrapping_add(hi);
    let d = 40u32.wrapping_add(seed);

    fmix(seed ^ mur(c, mur(b, mur(a, d))))
}

// Magic numbers for 32-bit hashing, from Murmur3.
const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

// Murmur3 helper for folding one 32-bit value into the state.
#[inline]
fn mur(mut a: u32, mut h: u32) -> u32 {
    a = a.wrapping_mul(C1);
    a = a.rotate_right(17);
    a = a.wrapping_mul(C2);
    h ^= a;
    h = h.rotate_right(19);
    h.wrapping_mul(5).wrapping_add(0xe654_6b64)
}

// The Murmur3 32-bit finalizer.
#[inline]
fn fmix(mut h: u32) -> u32 {
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}
