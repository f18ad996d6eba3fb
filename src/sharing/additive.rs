//! Additive (XOR) secret sharing over the value channel.

use rand::RngCore;

use crate::types::{Preshare, Response, PRESHARE_SIZE};

fn xor_into(tally: &[u8], share: &[u8], dst: &mut [u8]) {
    for i in 0..dst.len() {
        dst[i] = tally[i] ^ share[i];
    }
}

/// Creates `n` shares of zero: the first `n - 1` are random, the last is
/// their running XOR so all `n` shares XOR back to zero.
pub fn zero_shares<R: RngCore + ?Sized>(rng: &mut R, n: usize) -> Vec<Preshare> {
    assert!(n >= 1);
    let mut shares = Vec::with_capacity(n);
    let mut acc = [0u8; PRESHARE_SIZE];
    for _ in 0..n - 1 {
        let mut share = [0u8; PRESHARE_SIZE];
        rng.fill_bytes(&mut share);
        let mut next_acc = [0u8; PRESHARE_SIZE];
        xor_into(&acc, &share, &mut next_acc);
        acc = next_acc;
        shares.push(share);
    }
    shares.push(acc);
    shares
}

/// XORs `share` into `tally`, producing the next tally in the chain.
pub fn additive_reconstruct(tally: Response, share: &Preshare) -> Response {
    let tally_bytes = tally.to_bytes();
    let mut out = [0u8; PRESHARE_SIZE];
    xor_into(&tally_bytes, share, &mut out);
    Response::from_bytes(&out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn shares_of_zero_xor_to_zero() {
        let mut rng = StdRng::seed_from_u64(3);
        let shares = zero_shares(&mut rng, 4);
        let mut acc = [0u8; PRESHARE_SIZE];
        for share in &shares {
            let mut next = [0u8; PRESHARE_SIZE];
            xor_into(&acc, share, &mut next);
            acc = next;
        }
        assert_eq!(acc, [0u8; PRESHARE_SIZE]);
    }

    #[test]
    fn round_trip_through_chain() {
        let mut rng = StdRng::seed_from_u64(9);
        let shares = zero_shares(&mut rng, 3);
        let original = Response { value: 77, sig: [5u8; 48] };

        let mut tally = original;
        for share in &shares {
            tally = additive_reconstruct(tally, share);
        }
        assert_eq!(tally, original);
    }
}
