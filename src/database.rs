//! The backend's key-value store.
//!
//! Rows are synthetic: row `i` holds value `2*i` and a signature slot
//! filled with `i % 128`, matching `original_source/DPPIR/types/database.cc`
//! so cross-implementation fixtures agree on expected lookups.

use rand::Rng;

use crate::types::{Key, Response, SIG_SIZE};

pub struct Database {
    rows: Vec<Response>,
}

impl Database {
    pub fn new(rows: Key) -> Self {
        let data = (0..rows)
            .map(|i| Response {
                value: 2 * i,
                sig: [(i % 128) as u8; SIG_SIZE],
            })
            .collect();
        Database { rows: data }
    }

    pub fn random_row<R: Rng + ?Sized>(&self, rng: &mut R) -> Key {
        rng.gen_range(0..self.size())
    }

    pub fn lookup(&self, key: Key) -> Response {
        self.rows[key as usize]
    }

    pub fn size(&self) -> Key {
        self.rows.len() as Key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_follow_the_fixed_convention() {
        let db = Database::new(10);
        assert_eq!(db.size(), 10);
        for i in 0..10 {
            let row = db.lookup(i);
            assert_eq!(row.value, 2 * i);
            assert_eq!(row.sig, [(i % 128) as u8; SIG_SIZE]);
        }
    }

    #[test]
    fn random_row_is_in_bounds() {
        let db = Database::new(5);
        let mut rng = rand::thread_rng();
        for _ in 0..100 {
            assert!(db.random_row(&mut rng) < db.size());
        }
    }
}
