//! Differential-privacy noise sampling.
//!
//! Noise is drawn from a doubled, clamped Laplace distribution: mass below
//! zero is folded back in so every sample is a non-negative count, and mass
//! above `2 * cutoff` is clamped so every sample fits the index range the
//! caller reserved for it.

use rand::Rng;

use crate::types::{Key, Sample, ServerId};

fn laplace<R: Rng + ?Sized>(rng: &mut R, mean: f64, span: f64) -> f64 {
    let sign = if rng.gen_range(0.0..1.0) < 0.5 { -1.0 } else { 1.0 };
    let u: f64 = rng.gen_range(0.0..1.0);
    mean - sign * span * (1.0 - 2.0 * (u - 0.5).abs()).ln()
}

/// The value `x` such that `Prob[Laplace(mean, span) <= x] = prob`.
fn inv_cdf(mean: f64, span: f64, prob: f64) -> f64 {
    let sign = if prob > 0.5 { -1.0 } else { 1.0 };
    mean - sign * span * (1.0 - 2.0 * (prob - 0.5).abs()).ln()
}

/// A configured Laplace noise source for one `(epsilon, delta)` budget.
///
/// `epsilon == 0.0 || delta == 0.0` selects debug mode: every sample is
/// zero, used by scenarios that want to exercise the protocol without
/// differential-privacy overhead (spec S6).
#[derive(Debug, Clone, Copy)]
pub struct NoiseDistribution {
    debug: bool,
    span: f64,
    cutoff: f64,
}

impl NoiseDistribution {
    pub fn new(epsilon: f64, delta: f64) -> Self {
        if epsilon == 0.0 || delta == 0.0 {
            return NoiseDistribution {
                debug: true,
                span: 0.0,
                cutoff: 0.0,
            };
        }
        let span = 2.0 / epsilon;
        let cutoff = inv_cdf(0.0, span, delta / 2.0);
        let max = (2.0 * cutoff).floor();
        assert!(
            max == max as Sample as f64,
            "noise domain does not fit in a 32-bit sample: max = {max}"
        );
        NoiseDistribution {
            debug: false,
            span,
            cutoff,
        }
    }

    /// The expected noise count: used wherever the protocol wants the mean
    /// amount of noise rather than resampling per row (matching the
    /// original's default, non-`DPPIR_SAMPLE` build).
    pub fn sample(&self) -> Sample {
        if self.debug {
            0
        } else {
            self.cutoff.floor() as Sample
        }
    }

    /// Draws one real noise count from the clamped Laplace distribution.
    pub fn sample_real<R: Rng + ?Sized>(&self, rng: &mut R) -> Sample {
        if self.debug {
            return 0;
        }
        let u = laplace(rng, 0.0, self.span);
        let u = (self.cutoff + self.cutoff.min(u)).max(0.0);
        u.floor() as Sample
    }

    pub fn is_debug(&self) -> bool {
        self.debug
    }
}

/// Splits the database's key range into contiguous chunks, one per server;
/// the last server absorbs any remainder from integer division.
pub fn find_range(server_id: ServerId, servers_count: ServerId, db_size: Key) -> (Key, Key) {
    assert!(db_size >= servers_count as Key);
    let range_size = (db_size as f64 / servers_count as f64).ceil() as Key;
    let range_start = server_id as Key * range_size;
    let range_end = if server_id == servers_count - 1 {
        db_size
    } else {
        range_start + range_size
    };
    (range_start, range_end)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn debug_mode_never_adds_noise() {
        let dist = NoiseDistribution::new(0.0, 1e-6);
        assert!(dist.is_debug());
        assert_eq!(dist.sample(), 0);
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(dist.sample_real(&mut rng), 0);
    }

    #[test]
    fn real_noise_is_bounded_and_nonnegative() {
        let dist = NoiseDistribution::new(1.0, 1e-6);
        let mut rng = StdRng::seed_from_u64(11);
        for _ in 0..1000 {
            let s = dist.sample_real(&mut rng);
            assert!((s as f64) <= 2.0 * dist.cutoff + 1.0);
        }
    }

    #[test]
    fn find_range_covers_whole_database_once() {
        let db_size = 100;
        let servers = 3;
        let mut covered = Vec::new();
        for server_id in 0..servers {
            let (start, end) = find_range(server_id, servers, db_size);
            covered.push((start, end));
        }
        assert_eq!(covered[0].0, 0);
        assert_eq!(covered.last().unwrap().1, db_size);
        for w in covered.windows(2) {
            assert_eq!(w[0].1, w[1].0);
        }
    }
}
