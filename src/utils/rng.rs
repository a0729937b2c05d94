//! Seeded random source for parameter initialization and sample shuffling
//!
//! [`FillRandom`] is the only contract layers see; [`SimpleRng`] is the
//! xorshift64 generator the crate ships with. Any other generator can be
//! plugged into layer constructors by implementing the trait.

use std::time::{SystemTime, UNIX_EPOCH};

/// Source of i.i.d. samples used to fill parameter buffers.
///
/// Randomness enters a network only here, at construction time.
pub trait FillRandom {
    /// Fill `buffer` with samples from U[low, high).
    fn fill_uniform(&mut self, buffer: &mut [f32], low: f32, high: f32);

    /// Fill `buffer` with samples from N(mean, stddev²).
    fn fill_normal(&mut self, buffer: &mut [f32], mean: f32, stddev: f32);
}

/// xorshift64 state; a zero state would stay zero forever.
const FALLBACK_STATE: u64 = 0x9e37_79b9_7f4a_7c15;

/// Deterministic xorshift64 generator.
///
/// The same seed always yields the same stream, so initial weights and
/// shuffle orders are reproducible across runs.
#[derive(Debug, Clone)]
pub struct SimpleRng {
    state: u64,
}

impl SimpleRng {
    pub fn new(seed: u64) -> Self {
        Self {
            state: if seed == 0 { FALLBACK_STATE } else { seed },
        }
    }

    /// Seed from the wall clock, for runs that should differ.
    pub fn from_time() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0);
        Self::new(nanos)
    }

    pub fn next_u32(&mut self) -> u32 {
        self.state ^= self.state << 13;
        self.state ^= self.state >> 7;
        self.state ^= self.state << 17;
        (self.state >> 32) as u32
    }

    /// Uniform in [0, 1).
    pub fn next_f32(&mut self) -> f32 {
        // 24 mantissa bits keep the result strictly below 1.0
        (self.next_u32() >> 8) as f32 / (1u32 << 24) as f32
    }

    pub fn gen_range_f32(&mut self, low: f32, high: f32) -> f32 {
        low + (high - low) * self.next_f32()
    }

    /// Integer in [0, upper); 0 when `upper` is 0.
    pub fn gen_usize(&mut self, upper: usize) -> usize {
        match upper {
            0 => 0,
            n => self.next_u32() as usize % n,
        }
    }

    /// Standard normal sample (Box-Muller, cosine branch).
    pub fn next_gaussian(&mut self) -> f32 {
        // 1 - u keeps the log argument in (0, 1]
        let u1 = 1.0 - self.next_f32();
        let u2 = self.next_f32();
        (-2.0 * u1.ln()).sqrt() * (std::f32::consts::TAU * u2).cos()
    }

    /// Fisher-Yates shuffle in place.
    pub fn shuffle<T>(&mut self, data: &mut [T]) {
        for i in (1..data.len()).rev() {
            let j = self.gen_usize(i + 1);
            data.swap(i, j);
        }
    }
}

impl FillRandom for SimpleRng {
    fn fill_uniform(&mut self, buffer: &mut [f32], low: f32, high: f32) {
        buffer
            .iter_mut()
            .for_each(|v| *v = self.gen_range_f32(low, high));
    }

    fn fill_normal(&mut self, buffer: &mut [f32], mean: f32, stddev: f32) {
        buffer
            .iter_mut()
            .for_each(|v| *v = mean + stddev * self.next_gaussian());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_seed_same_stream() {
        let mut a = SimpleRng::new(7);
        let mut b = a.clone();
        let first: Vec<u32> = (0..64).map(|_| a.next_u32()).collect();
        let second: Vec<u32> = (0..64).map(|_| b.next_u32()).collect();
        assert_eq!(first, second);
        assert_ne!(SimpleRng::new(8).next_u32(), first[0]);
    }

    #[test]
    fn test_zero_seed_is_not_stuck() {
        let mut rng = SimpleRng::new(0);
        let draws: Vec<u32> = (0..8).map(|_| rng.next_u32()).collect();
        assert!(draws.iter().any(|&d| d != 0));
    }

    #[test]
    fn test_unit_interval() {
        let mut rng = SimpleRng::new(12345);
        assert!((0..2000).map(|_| rng.next_f32()).all(|v| (0.0..1.0).contains(&v)));
    }

    #[test]
    fn test_fill_uniform_bias_range() {
        let mut rng = SimpleRng::new(67890);
        let mut buf = vec![0.0f32; 1000];
        rng.fill_uniform(&mut buf, 0.0001, 0.001);
        assert!(buf.iter().all(|v| (0.0001..0.001).contains(v)));
    }

    #[test]
    fn test_fill_normal_moments() {
        let mut rng = SimpleRng::new(2024);
        let mut buf = vec![0.0f32; 20_000];
        rng.fill_normal(&mut buf, 1.0, 0.5);

        let n = buf.len() as f32;
        let mean = buf.iter().sum::<f32>() / n;
        let var = buf.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;

        assert!((mean - 1.0).abs() < 0.02, "mean {}", mean);
        assert!((var.sqrt() - 0.5).abs() < 0.02, "stddev {}", var.sqrt());
        assert!(buf.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_gen_usize_bounds() {
        let mut rng = SimpleRng::new(22222);
        assert_eq!(rng.gen_usize(0), 0);
        assert!((0..500).all(|_| rng.gen_usize(3) < 3));
    }

    #[test]
    fn test_shuffle_is_permutation() {
        let mut rng = SimpleRng::new(33333);
        let mut data: Vec<usize> = (0..10).collect();
        rng.shuffle(&mut data);

        let mut sorted = data.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..10).collect::<Vec<_>>());
        assert_ne!(data, sorted);

        let mut single = [5u8];
        rng.shuffle(&mut single);
        assert_eq!(single, [5]);
    }
}
