//! Single-server Fisher-Yates shuffle with an explicit inverse map.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::types::Index;

/// Shuffles a batch of `local_count` items according to a shared seed,
/// giving both a forward map (original slot -> shuffled slot) and its
/// exact inverse.
pub struct LocalShuffler {
    local_seed: u64,
    forward_map: Option<Vec<Index>>,
    backward_map: Option<Vec<Index>>,
}

impl LocalShuffler {
    pub fn new(local_seed: u64) -> Self {
        LocalShuffler {
            local_seed,
            forward_map: None,
            backward_map: None,
        }
    }

    pub fn initialize(&mut self, local_count: Index) {
        let mut rng = StdRng::seed_from_u64(self.local_seed);
        let n = local_count as usize;

        let mut forward: Vec<Index> = (0..local_count).collect();
        fisher_yates(&mut rng, &mut forward);

        let mut backward = vec![0 as Index; n];
        for (i, &target) in forward.iter().enumerate() {
            backward[target as usize] = i as Index;
        }

        self.forward_map = Some(forward);
        self.backward_map = Some(backward);
    }

    pub fn shuffle(&self, idx: Index) -> Index {
        self.forward_map.as_ref().expect("not initialized")[idx as usize]
    }

    pub fn deshuffle(&self, idx: Index) -> Index {
        self.backward_map.as_ref().expect("not initialized")[idx as usize]
    }

    pub fn finish_forward(&mut self) {
        self.forward_map = None;
    }

    pub fn finish_backward(&mut self) {
        self.backward_map = None;
    }
}

/// In-place Fisher-Yates shuffle, identical structure to the original's
/// `util::shuffle` (descending swap of the tail into a uniformly chosen
/// prefix slot).
pub fn fisher_yates<R: Rng + ?Sized, T>(rng: &mut R, arr: &mut [T]) {
    let n = arr.len();
    for i in (1..n).rev() {
        let p = rng.gen_range(0..=i);
        arr.swap(i, p);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_and_backward_are_inverses() {
        let mut shuffler = LocalShuffler::new(42);
        shuffler.initialize(50);
        for i in 0..50 {
            let shuffled = shuffler.shuffle(i);
            assert_eq!(shuffler.deshuffle(shuffled), i);
        }
    }

    #[test]
    fn forward_map_is_a_permutation() {
        let mut shuffler = LocalShuffler::new(7);
        shuffler.initialize(30);
        let mut seen = vec![false; 30];
        for i in 0..30 {
            let target = shuffler.shuffle(i) as usize;
            assert!(!seen[target]);
            seen[target] = true;
        }
    }

    #[test]
    fn same_seed_gives_same_permutation() {
        let mut a = LocalShuffler::new(5);
        let mut b = LocalShuffler::new(5);
        a.initialize(20);
        b.initialize(20);
        for i in 0..20 {
            assert_eq!(a.shuffle(i), b.shuffle(i));
        }
    }
}
