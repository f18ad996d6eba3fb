//! Cross-server shuffle: one global Fisher-Yates permutation over every
//! server's slots, sliced so each server only learns the routing for the
//! messages that pass through it.

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::shuffle::local::fisher_yates;
use crate::types::{Index, ServerId};

pub struct ParallelShuffler {
    shared_seed: u64,
    server_id: ServerId,
    server_count: ServerId,
    slice_size: Index,

    forward_map: Option<Vec<ServerId>>,
    backward_map: Option<Vec<Vec<Index>>>,

    forward_idx: Index,
    backward_idx: Vec<Index>,

    from_count: Vec<Index>,
    prefixsum_from_count: Vec<Index>,
    to_count: Vec<Index>,
    to_noise_count: Vec<Index>,
}

impl ParallelShuffler {
    pub fn new(server_id: ServerId, server_count: ServerId, shared_seed: u64) -> Self {
        ParallelShuffler {
            shared_seed,
            server_id,
            server_count,
            slice_size: 0,
            forward_map: None,
            backward_map: None,
            forward_idx: 0,
            backward_idx: Vec::new(),
            from_count: Vec::new(),
            prefixsum_from_count: Vec::new(),
            to_count: Vec::new(),
            to_noise_count: Vec::new(),
        }
    }

    /// `server_counts[i]` is how many local slots server `i` contributes.
    /// `noise_count` is how many of *this* server's own slots (the first
    /// `noise_count` of them) are noise queries rather than real ones.
    pub fn initialize(&mut self, server_counts: &[Index], noise_count: Index) {
        self.forward_idx = 0;
        let server_count = self.server_count as usize;
        let total_count: Index = server_counts.iter().sum();

        let per_server = total_count / self.server_count as Index;
        self.slice_size = if self.server_id == self.server_count - 1 {
            total_count - (self.server_count as Index - 1) * per_server
        } else {
            per_server
        };

        self.backward_idx = vec![0; server_count];
        self.from_count = vec![0; server_count];
        self.prefixsum_from_count = vec![0; server_count];
        self.to_count = vec![0; server_count];
        self.to_noise_count = vec![0; server_count];

        let mut map: Vec<ServerId> = vec![0; total_count as usize];
        for sid in 0..self.server_count {
            let start = sid as Index * per_server;
            let end = if sid == self.server_count - 1 {
                total_count
            } else {
                start + per_server
            };
            for i in start..end {
                map[i as usize] = sid;
            }
        }

        let mut rng = StdRng::seed_from_u64(self.shared_seed);
        fisher_yates(&mut rng, &mut map);

        let mut forward_map = vec![0 as ServerId; server_counts[self.server_id as usize] as usize];

        let mut source: ServerId = 0;
        let mut start_idx: Index = 0;
        for idx in 0..total_count {
            while idx - start_idx >= server_counts[source as usize] {
                start_idx += server_counts[source as usize];
                source += 1;
            }

            let target = map[idx as usize];
            if target == self.server_id {
                self.from_count[source as usize] += 1;
            }
            if source == self.server_id {
                if idx - start_idx < noise_count {
                    self.to_noise_count[target as usize] += 1;
                }
                self.to_count[target as usize] += 1;
                forward_map[(idx - start_idx) as usize] = target;
            }
        }

        let mut backward_map: Vec<Vec<Index>> = self
            .to_count
            .iter()
            .map(|&count| vec![0 as Index; count as usize])
            .collect();
        let mut fill_cursor = vec![0 as Index; server_count];

        for i in 0..server_counts[self.server_id as usize] {
            let target = forward_map[i as usize];
            let slot = fill_cursor[target as usize];
            backward_map[target as usize][slot as usize] = i;
            fill_cursor[target as usize] += 1;
        }

        for sid in 0..server_count - 1 {
            self.prefixsum_from_count[sid + 1] =
                self.prefixsum_from_count[sid] + self.from_count[sid];
        }

        self.forward_map = Some(forward_map);
        self.backward_map = Some(backward_map);
    }

    pub fn shuffle_one(&mut self) -> ServerId {
        let target = self.forward_map.as_ref().expect("not initialized")[self.forward_idx as usize];
        self.forward_idx += 1;
        target
    }

    pub fn deshuffle_one(&mut self, server: ServerId) -> Index {
        let idx = self.backward_idx[server as usize];
        self.backward_idx[server as usize] += 1;
        self.backward_map.as_ref().expect("not initialized")[server as usize][idx as usize]
    }

    pub fn count_to_server(&self, server: ServerId) -> Index {
        self.to_count[server as usize]
    }

    pub fn count_noise_to_server(&self, server: ServerId) -> Index {
        self.to_noise_count[server as usize]
    }

    pub fn count_from_server(&self, server: ServerId) -> Index {
        self.from_count[server as usize]
    }

    pub fn prefix_sum_count_from_server(&self, server: ServerId) -> Index {
        self.prefixsum_from_count[server as usize]
    }

    /// Which server produced the item that lands at global arrival index
    /// `idx` at this server (linear scan: `server_count` is always small).
    pub fn find_source_of(&self, idx: Index) -> ServerId {
        for id in 1..self.server_count {
            if self.prefixsum_from_count[id as usize] > idx {
                return id - 1;
            }
        }
        self.server_count - 1
    }

    pub fn get_server_slice_size(&self) -> Index {
        self.slice_size
    }

    pub fn finish_forward(&mut self) {
        self.forward_map = None;
    }

    pub fn finish_backward(&mut self) {
        self.backward_map = None;
        self.backward_idx.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_and_backward_agree_on_routing() {
        let server_counts = vec![4, 3, 5];
        let noise_count = 1;
        let mut shufflers: Vec<ParallelShuffler> = (0..3)
            .map(|sid| ParallelShuffler::new(sid as ServerId, 3, 99))
            .collect();
        for s in shufflers.iter_mut() {
            s.initialize(&server_counts, noise_count);
        }

        // Every server's to_count into target t must equal target's
        // from_count from that server.
        for src in 0..3u8 {
            for dst in 0..3u8 {
                assert_eq!(
                    shufflers[src as usize].count_to_server(dst),
                    shufflers[dst as usize].count_from_server(src)
                );
            }
        }

        // Slices partition the total.
        let total: Index = shufflers.iter().map(|s| s.get_server_slice_size()).sum();
        assert_eq!(total, server_counts.iter().sum::<Index>());
    }

    #[test]
    fn find_source_of_matches_prefix_sums() {
        let server_counts = vec![2, 2];
        let mut s = ParallelShuffler::new(0, 2, 5);
        s.initialize(&server_counts, 0);
        let total_from: Index = s.from_count.iter().sum();
        for idx in 0..total_from {
            let source = s.find_source_of(idx);
            assert!(idx >= s.prefixsum_from_count[source as usize]);
        }
    }
}
