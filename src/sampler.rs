//! Token sampler (component G, spec §4.G): greedy / temperature /
//! top-k sampling over one step's logits, backed by a deterministic
//! xorshift128+ RNG seeded via SplitMix64 expansion of the session's
//! 64-bit seed. Given identical seed, logits, and sampling mode, the
//! emitted token sequence is bit-identical across runs on the same
//! binary — no dependency on `rand` is introduced, matching the
//! teacher's own choice to hand-roll a deterministic generator for
//! sampling rather than pull one in.

use crate::config::SamplingMode;
use crate::error::GenError;
use std::cmp::Ordering;

/// A 128-bit xorshift+ generator, seeded from a single `u64` by
/// running it through two rounds of SplitMix64 so the two halves of
/// the internal state don't start correlated.
pub struct Rng {
    state: [u64; 2],
}

impl Rng {
    pub fn from_seed(seed: u64) -> Self {
        let mut sm = seed;
        let s0 = split_mix64(&mut sm);
        let s1 = split_mix64(&mut sm);
        // xorshift128+ is undefined for an all-zero state.
        let state = if s0 == 0 && s1 == 0 { [1, 0] } else { [s0, s1] };
        Self { state }
    }

    pub fn next_u64(&mut self) -> u64 {
        let mut s1 = self.state[0];
        let s0 = self.state[1];
        let result = s0.wrapping_add(s1);
        self.state[0] = s0;
        s1 ^= s1 << 23;
        s1 ^= s1 >> 17;
        s1 ^= s0 ^ (s0 >> 26);
        self.state[1] = s1;
        result
    }

    /// Uniform float in `[0, 1)`.
    pub fn next_f32(&mut self) -> f32 {
        // Top 24 bits give a float with no rounding ambiguity.
        ((self.next_u64() >> 40) as f32) / (1u64 << 24) as f32
    }
}

fn split_mix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E3779B97F4A7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58476D1CE4E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D049BB133111EB);
    z ^ (z >> 31)
}

fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate().skip(1) {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Softmax over `logits`, numerically stabilized by max-subtraction.
fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_val = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let mut probs: Vec<f32> = logits.iter().map(|&x| (x - max_val).exp()).collect();
    let sum: f32 = probs.iter().sum();
    if sum > 0.0 {
        for p in &mut probs {
            *p /= sum;
        }
    }
    probs
}

/// Draw one index from `probs` via inverse-CDF over probabilities
/// taken in descending order, matching spec §4.G's "sorted
/// probabilities" sampling rule.
fn sample_by_inverse_cdf(indices: &[usize], probs: &[f32], rng: &mut Rng) -> usize {
    let mut order: Vec<usize> = (0..indices.len()).collect();
    order.sort_by(|&a, &b| probs[b].partial_cmp(&probs[a]).unwrap_or(Ordering::Equal));

    let u = rng.next_f32();
    let mut cumsum = 0.0f32;
    for &o in &order {
        cumsum += probs[o];
        if u < cumsum {
            return indices[o];
        }
    }
    indices[*order.last().unwrap()]
}

/// Sample one token index from a step's logits according to `mode`.
pub fn sample(logits: &[f32], mode: SamplingMode, rng: &mut Rng) -> Result<usize, GenError> {
    if logits.is_empty() {
        return Err(GenError::Other("cannot sample from empty logits".into()));
    }

    match mode {
        SamplingMode::Greedy => Ok(argmax(logits)),
        SamplingMode::Temperature { tau } => {
            if tau <= 1e-6 {
                return Ok(argmax(logits));
            }
            let scaled: Vec<f32> = logits.iter().map(|&x| x / tau).collect();
            let probs = softmax(&scaled);
            let indices: Vec<usize> = (0..logits.len()).collect();
            Ok(sample_by_inverse_cdf(&indices, &probs, rng))
        }
        SamplingMode::TopK { k, tau: temperature } => {
            if k == 0 {
                return Err(GenError::Other("top-k sampling requires k > 0".into()));
            }
            if temperature <= 1e-6 {
                return Ok(argmax(logits));
            }
            let scaled: Vec<f32> = logits.iter().map(|&x| x / temperature).collect();

            let mut order: Vec<usize> = (0..scaled.len()).collect();
            order.sort_by(|&a, &b| scaled[b].partial_cmp(&scaled[a]).unwrap_or(Ordering::Equal));
            let k = k.min(order.len());
            let top_indices = &order[..k];

            let top_logits: Vec<f32> = top_indices.iter().map(|&i| scaled[i]).collect();
            let probs = softmax(&top_logits);
            let local: Vec<usize> = (0..k).collect();
            let chosen_local = sample_by_inverse_cdf(&local, &probs, rng);
            Ok(top_indices[chosen_local])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rng_is_deterministic_for_a_given_seed() {
        let mut a = Rng::from_seed(42);
        let mut b = Rng::from_seed(42);
        for _ in 0..8 {
            assert_eq!(a.next_u64(), b.next_u64());
        }
    }

    #[test]
    fn rng_differs_across_seeds() {
        let mut a = Rng::from_seed(1);
        let mut b = Rng::from_seed(2);
        assert_ne!(a.next_u64(), b.next_u64());
    }

    #[test]
    fn next_f32_stays_in_unit_interval() {
        let mut rng = Rng::from_seed(7);
        for _ in 0..1000 {
            let v = rng.next_f32();
            assert!((0.0..1.0).contains(&v));
        }
    }

    #[test]
    fn greedy_picks_the_highest_logit() {
        let logits = vec![0.1, 0.5, 0.3, 0.8, 0.2];
        let mut rng = Rng::from_seed(1);
        let token = sample(&logits, SamplingMode::Greedy, &mut rng).unwrap();
        assert_eq!(token, 3);
    }

    #[test]
    fn greedy_on_empty_logits_errors() {
        let mut rng = Rng::from_seed(1);
        assert!(sample(&[], SamplingMode::Greedy, &mut rng).is_err());
    }

    #[test]
    fn temperature_sampling_is_deterministic_given_the_same_seed() {
        let logits = vec![1.0, 2.0, 3.0];
        let t1 = sample(&logits, SamplingMode::Temperature { tau: 1.0 }, &mut Rng::from_seed(42)).unwrap();
        let t2 = sample(&logits, SamplingMode::Temperature { tau: 1.0 }, &mut Rng::from_seed(42)).unwrap();
        assert_eq!(t1, t2);
    }

    #[test]
    fn temperature_near_zero_reduces_to_greedy() {
        let logits = vec![0.1, 0.9, 0.2];
        let mut rng = Rng::from_seed(99);
        let token = sample(&logits, SamplingMode::Temperature { tau: 0.0 }, &mut rng).unwrap();
        assert_eq!(token, 1);
    }

    #[test]
    fn top_k_only_returns_tokens_within_the_k_highest_logits() {
        let logits = vec![0.1, 0.5, 0.3, 0.8, 0.2];
        let mut rng = Rng::from_seed(7);
        for _ in 0..50 {
            let token = sample(&logits, SamplingMode::TopK { k: 2, tau: 1.0 }, &mut rng).unwrap();
            assert!(token == 3 || token == 1, "token {token} outside top-2");
        }
    }

    #[test]
    fn top_k_zero_is_rejected() {
        let logits = vec![0.1, 0.5, 0.3];
        let mut rng = Rng::from_seed(1);
        assert!(sample(&logits, SamplingMode::TopK { k: 0, tau: 1.0 }, &mut rng).is_err());
    }

    #[test]
    fn top_k_larger_than_vocab_still_succeeds() {
        let logits = vec![0.1, 0.5, 0.3];
        let mut rng = Rng::from_seed(1);
        let result = sample(&logits, SamplingMode::TopK { k: 100, tau: 1.0 }, &mut rng);
        assert!(result.is_ok());
    }

    #[test]
    fn softmax_sums_to_one_and_is_monotonic() {
        let probs = softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        assert!(probs[2] > probs[1]);
        assert!(probs[1] > probs[0]);
    }
}
