//! Deterministic random number generation for sample networks.
//!
//! RULE: sample generation never touches a platform RNG. Every draw comes
//! from a `SampleRng` derived from one master seed, so the same seed always
//! yields the same network.
//!
//! Each aspect of a generated record draws from its own stream, seeded from
//! (master_seed XOR stream_index). Adding draws to one stream never shifts
//! the values another stream produces.

use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;

pub struct SampleRng {
    pub stream: RngStream,
    inner: Pcg64Mcg,
}

impl SampleRng {
    pub fn new(master_seed: u64, stream: RngStream) -> Self {
        let derived_seed = master_seed ^ ((stream as u64).wrapping_mul(0x9e37_79b9_7f4a_7c15));
        Self {
            stream,
            inner: Pcg64Mcg::seed_from_u64(derived_seed),
        }
    }

    /// Roll a float in [0.0, 1.0).
    pub fn next_f64(&mut self) -> f64 {
        use rand::RngCore;
        let bits = self.inner.next_u64();
        (bits >> 11) as f64 * (1.0 / (1u64 << 53) as f64)
    }

    /// Roll a u64 in [0, n).
    pub fn next_u64_below(&mut self, n: u64) -> u64 {
        use rand::RngCore;
        assert!(n > 0, "n must be > 0");
        self.inner.next_u64() % n
    }

    /// Bernoulli trial: returns true with probability p.
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64() < p
    }

    /// Simplified Pareto draw; most values sit near `x_min`, a few are large.
    pub fn pareto(&mut self, x_min: f64, alpha: f64) -> f64 {
        let u = self.next_f64().max(1e-10);
        x_min * u.powf(-1.0 / alpha)
    }

    /// Index into `weights`, chosen proportionally. Weights need not sum to 1.
    pub fn weighted_index(&mut self, weights: &[f64]) -> usize {
        let total: f64 = weights.iter().sum();
        let mut roll = self.next_f64() * total;
        for (i, w) in weights.iter().enumerate() {
            if roll < *w {
                return i;
            }
            roll -= w;
        }
        weights.len().saturating_sub(1)
    }

    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> &'a T {
        &items[self.next_u64_below(items.len() as u64) as usize]
    }
}

/// Stable stream assignments.
/// NEVER reorder or remove entries; only append.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u64)]
pub enum RngStream {
    Topology   = 0,
    Status     = 1,
    Clients    = 2,
    Attributes = 3,
}
