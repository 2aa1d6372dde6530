// Minimal PRNG (no external crates).
//
// This is NOT cryptographically secure.
// It drives mutation noise, regrowth sampling and recovery sampling; seeding it
// makes a whole evolution run reproducible.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Prng {
    state: u64,
}

impl Prng {
    pub fn new(seed: u64) -> Self {
        // Avoid a zero state.
        let seed = if seed == 0 { 0x9E3779B97F4A7C15 } else { seed };
        Self { state: seed }
    }

    pub fn state(&self) -> u64 {
        self.state
    }

    /// Derive an independent stream (e.g. one per parallel worker).
    pub fn fork(&mut self) -> Self {
        Self::new(self.next_u64() ^ 0xD1B54A32D192ED03)
    }

    #[inline]
    pub fn next_u64(&mut self) -> u64 {
        // xorshift64*
        let mut x = self.state;
        x ^= x >> 12;
        x ^= x << 25;
        x ^= x >> 27;
        self.state = x;
        x.wrapping_mul(0x2545F4914F6CDD1D)
    }

    #[inline]
    pub fn next_u32(&mut self) -> u32 {
        (self.next_u64() >> 32) as u32
    }

    /// Uniform in [0,1) with 53 bits of precision.
    #[inline]
    pub fn next_f64_01(&mut self) -> f64 {
        (self.next_u64() >> 11) as f64 / (1u64 << 53) as f64
    }

    #[inline]
    pub fn gen_range_f64(&mut self, low: f64, high: f64) -> f64 {
        low + (high - low) * self.next_f64_01()
    }

    /// Uniform in [-amplitude, amplitude).
    #[inline]
    pub fn symmetric(&mut self, amplitude: f64) -> f64 {
        self.gen_range_f64(-amplitude, amplitude)
    }

    #[inline]
    pub fn chance(&mut self, p: f64) -> bool {
        self.next_f64_01() < p
    }

    /// Standard normal draw (Box-Muller, one branch discarded).
    pub fn gaussian(&mut self) -> f64 {
        let u1 = self.next_f64_01().max(f64::MIN_POSITIVE);
        let u2 = self.next_f64_01();
        (-2.0 * u1.ln()).sqrt() * (core::f64::consts::TAU * u2).cos()
    }

    #[inline]
    pub fn gen_range_usize(&mut self, low: usize, high: usize) -> usize {
        if high <= low {
            return low;
        }
        let span = (high - low) as u64;
        low + (self.next_u64() % span) as usize
    }

    /// Two distinct indices in `0..n`, or `None` when `n < 2`.
    pub fn distinct_pair(&mut self, n: usize) -> Option<(usize, usize)> {
        if n < 2 {
            return None;
        }
        let a = self.gen_range_usize(0, n);
        let mut b = self.gen_range_usize(0, n - 1);
        if b >= a {
            b += 1;
        }
        Some((a, b))
    }

    /// Fill `out` with up to `k` distinct values drawn from `pool` (partial Fisher-Yates).
    /// `pool` is reordered in place.
    pub fn sample_into(&mut self, pool: &mut [usize], k: usize, out: &mut Vec<usize>) {
        out.clear();
        let k = k.min(pool.len());
        for i in 0..k {
            let j = self.gen_range_usize(i, pool.len());
            pool.swap(i, j);
            out.push(pool[i]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_seed_same_stream() {
        let mut a = Prng::new(7);
        let mut b = Prng::new(7);
        for _ in 0..32 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn distinct_pair_never_repeats_an_index() {
        let mut rng = Prng::new(3);
        for _ in 0..500 {
            let (a, b) = rng.distinct_pair(5).unwrap();
            assert_ne!(a, b);
            assert!(a < 5 && b < 5);
        }
        assert!(rng.distinct_pair(1).is_none());
    }

    #[test]
    fn sample_into_draws_unique_members() {
        let mut rng = Prng::new(11);
        let mut pool: Vec<usize> = (0..20).collect();
        let mut out = Vec::new();
        rng.sample_into(&mut pool, 6, &mut out);
        assert_eq!(out.len(), 6);
        let mut sorted = out.clone();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), 6);

        rng.sample_into(&mut pool, 100, &mut out);
        assert_eq!(out.len(), 20);
    }

    #[test]
    fn unit_interval_bounds() {
        let mut rng = Prng::new(99);
        for _ in 0..1000 {
            let x = rng.next_f64_01();
            assert!((0.0..1.0).contains(&x));
            let s = rng.symmetric(0.1);
            assert!((-0.1..0.1).contains(&s));
        }
    }
}
