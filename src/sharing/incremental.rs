//! Multiplicative secret sharing over the key channel.
//!
//! A key `query` is shared as a chain of `(x, y)` pairs. Feeding each share
//! into `build_tally` from last to first produces a tally that
//! `reconstruct` can later unwind, one share at a time, back to `query`.

use rand::Rng;

use crate::types::{IncrementalShare, Key, INCREMENTAL_PRIME};

/// Extended Euclidean algorithm: returns (x, y) such that a*x + b*y = gcd(a, b).
fn gcd_extended(a: u32, b: u32) -> (i64, i64) {
    if a == 0 {
        return (0, 1);
    }
    let (x1, y1) = gcd_extended(b % a, a);
    let x = y1 - (b / a) as i64 * x1;
    (x, x1)
}

/// Multiplicative inverse of `a` modulo `m`.
fn mod_inverse(a: u32, m: u32) -> u32 {
    let (x, _) = gcd_extended(a, m);
    (((x % m as i64) + m as i64) % m as i64) as u32
}

/// Draws `n` random shares ahead of knowing the value they will share.
pub fn pre_shares<R: Rng + ?Sized>(rng: &mut R, n: usize) -> Vec<IncrementalShare> {
    (0..n)
        .map(|_| {
            let x = rng.gen_range(0..INCREMENTAL_PRIME);
            let y = rng.gen_range(0..INCREMENTAL_PRIME - 1) + 1;
            IncrementalShare { x, y }
        })
        .collect()
}

/// Folds `query` through `shares` (last to first) into a single tally that
/// `reconstruct` can later unwind share-by-share, in the same order the
/// shares were handed out, back to `query`.
pub fn build_tally(query: Key, shares: &[IncrementalShare]) -> Key {
    let mut t: u64 = query as u64;
    for share in shares.iter().rev() {
        t = t + if t < share.x as u64 { INCREMENTAL_PRIME as u64 } else { 0 } - share.x as u64;
        t = (t * mod_inverse(share.y, INCREMENTAL_PRIME) as u64) % INCREMENTAL_PRIME as u64;
    }
    t as Key
}

/// Applies one share to `tally`, producing the tally the next holder sees.
pub fn reconstruct(tally: Key, share: &IncrementalShare) -> Key {
    ((tally as u64 * share.y as u64 + share.x as u64) % INCREMENTAL_PRIME as u64) as Key
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn round_trip_through_chain() {
        let mut rng = StdRng::seed_from_u64(7);
        let query: Key = 123_456;
        let shares = pre_shares(&mut rng, 5);
        let tally = build_tally(query, &shares);

        let mut t = tally;
        for share in &shares {
            t = reconstruct(t, share);
        }
        assert_eq!(t, query);
    }

    #[test]
    fn empty_chain_is_identity() {
        let tally = build_tally(42, &[]);
        assert_eq!(tally, 42);
    }

    #[test]
    fn mod_inverse_is_correct() {
        for a in 1..50u32 {
            let inv = mod_inverse(a, INCREMENTAL_PRIME);
            let prod = (a as u64 * inv as u64) % INCREMENTAL_PRIME as u64;
            assert_eq!(prod, 1);
        }
    }
}
