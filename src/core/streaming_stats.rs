//! Streaming diagnostics over a bounded window of recent decision vectors.
//!
//! Per dimension: mean/variance (Welford) and third/fourth central moments (Pébay's
//! one-pass update). Per vector: softmax normalized entropy. Across the window:
//! decision stability (share of consecutive steps whose arg-max did not change).

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum StatsMode {
    /// Mean, variance, skew, kurtosis, entropy, stability.
    #[default]
    Full,
    /// Skips the third and fourth moments.
    Reduced,
    /// Subsystem off: nothing is recorded.
    Minimal,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StatsConfig {
    pub mode: StatsMode,
    /// Requested window length (most recent decision vectors kept).
    pub window: usize,
    pub min_capacity: usize,
    pub max_capacity: usize,
    /// Inputs fed to the fittest genome each generation to sample decisions.
    pub probe_inputs: Vec<Vec<f64>>,
}

impl Default for StatsConfig {
    fn default() -> Self {
        Self {
            mode: StatsMode::Full,
            window: 64,
            min_capacity: 16,
            max_capacity: 4096,
            probe_inputs: Vec::new(),
        }
    }
}

impl StatsConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.min_capacity == 0 {
            return Err("min_capacity must be >= 1");
        }
        if self.max_capacity < self.min_capacity {
            return Err("max_capacity must be >= min_capacity");
        }
        Ok(())
    }
}

/// Running central moments for one dimension.
#[derive(Debug, Clone, Copy, Default)]
struct Moments {
    n: u64,
    mean: f64,
    m2: f64,
    m3: f64,
    m4: f64,
}

impl Moments {
    #[inline]
    fn push_welford(&mut self, x: f64) {
        self.n += 1;
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        self.m2 += delta * (x - self.mean);
    }

    #[inline]
    fn push_pebay(&mut self, x: f64) {
        let n1 = self.n as f64;
        self.n += 1;
        let n = self.n as f64;
        let delta = x - self.mean;
        let delta_n = delta / n;
        let delta_n2 = delta_n * delta_n;
        let term1 = delta * delta_n * n1;
        self.mean += delta_n;
        self.m4 += term1 * delta_n2 * (n * n - 3.0 * n + 3.0) + 6.0 * delta_n2 * self.m2
            - 4.0 * delta_n * self.m3;
        self.m3 += term1 * delta_n * (n - 2.0) - 3.0 * delta_n * self.m2;
        self.m2 += term1;
    }

    fn variance(&self) -> f64 {
        if self.n == 0 {
            0.0
        } else {
            (self.m2 / self.n as f64).max(0.0)
        }
    }

    fn skewness(&self) -> f64 {
        if self.m2 <= f64::EPSILON {
            return 0.0;
        }
        (self.n as f64).sqrt() * self.m3 / self.m2.powf(1.5)
    }

    /// Excess kurtosis.
    fn kurtosis(&self) -> f64 {
        if self.m2 <= f64::EPSILON {
            return 0.0;
        }
        self.n as f64 * self.m4 / (self.m2 * self.m2) - 3.0
    }
}

/// Fixed-capacity ring of equal-length vectors. Capacity is always a power of two.
#[derive(Debug, Clone)]
pub struct DecisionRing {
    data: Vec<f64>,
    dims: usize,
    capacity: usize,
    head: usize,
    len: usize,
}

impl DecisionRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            data: Vec::new(),
            dims: 0,
            capacity: capacity.max(1).next_power_of_two(),
            head: 0,
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub fn clear(&mut self) {
        self.head = 0;
        self.len = 0;
    }

    /// Append a vector; the oldest entry is dropped when full. A change of
    /// dimensionality restarts the ring.
    pub fn push(&mut self, v: &[f64]) {
        if v.is_empty() {
            return;
        }
        if v.len() != self.dims {
            self.dims = v.len();
            self.data = vec![0.0; self.dims * self.capacity];
            self.clear();
        }
        let slot = (self.head + self.len) & (self.capacity - 1);
        let at = slot * self.dims;
        self.data[at..at + self.dims].copy_from_slice(v);
        if self.len < self.capacity {
            self.len += 1;
        } else {
            self.head = (self.head + 1) & (self.capacity - 1);
        }
    }

    /// Oldest-first iteration.
    pub fn iter(&self) -> impl Iterator<Item = &[f64]> + '_ {
        (0..self.len).map(move |i| {
            let slot = (self.head + i) & (self.capacity - 1);
            &self.data[slot * self.dims..(slot + 1) * self.dims]
        })
    }

    /// Change capacity (rounded up to a power of two), keeping the most recent entries.
    pub fn resize(&mut self, capacity: usize) {
        let capacity = capacity.max(1).next_power_of_two();
        if capacity == self.capacity {
            return;
        }
        let keep = self.len.min(capacity);
        let skip = self.len - keep;
        let mut data = vec![0.0; self.dims * capacity];
        for (i, v) in self.iter().skip(skip).enumerate() {
            data[i * self.dims..(i + 1) * self.dims].copy_from_slice(v);
        }
        self.data = data;
        self.capacity = capacity;
        self.head = 0;
        self.len = keep;
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EntropyStats {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct DecisionStats {
    pub window: usize,
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub skew: Option<Vec<f64>>,
    #[cfg_attr(feature = "serde", serde(skip_serializing_if = "Option::is_none"))]
    pub kurtosis: Option<Vec<f64>>,
    pub entropy: EntropyStats,
    pub stability: f64,
}

/// Normalized softmax entropy of `logits` in `[0, 1]`. `probs` is scratch.
pub fn softmax_entropy(logits: &[f64], probs: &mut Vec<f64>) -> f64 {
    let k = logits.len();
    if k < 2 {
        return 0.0;
    }
    let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    probs.clear();
    let mut sum = 0.0;
    for &x in logits {
        let e = if max.is_finite() { (x - max).exp() } else { 1.0 };
        let e = if e.is_finite() { e } else { 0.0 };
        probs.push(e);
        sum += e;
    }
    if sum <= 0.0 {
        return 1.0;
    }
    let mut h = 0.0;
    for &e in probs.iter() {
        let p = e / sum;
        if p > 0.0 {
            h -= p * p.ln();
        }
    }
    (h / (k as f64).ln()).clamp(0.0, 1.0)
}

#[inline]
fn argmax(v: &[f64]) -> usize {
    let mut best = 0;
    for (i, &x) in v.iter().enumerate() {
        if x > v[best] {
            best = i;
        }
    }
    best
}

#[derive(Debug, Clone)]
pub struct StreamingStatistics {
    mode: StatsMode,
    min_capacity: usize,
    max_capacity: usize,
    ring: DecisionRing,
    moments: Vec<Moments>,
    probs: Vec<f64>,
}

impl StreamingStatistics {
    pub fn new(cfg: &StatsConfig) -> Self {
        let min_capacity = cfg.min_capacity.max(1).next_power_of_two();
        let max_capacity = cfg.max_capacity.max(min_capacity).next_power_of_two();
        let initial = cfg.window.clamp(min_capacity, max_capacity);
        Self {
            mode: cfg.mode,
            min_capacity,
            max_capacity,
            ring: DecisionRing::new(initial),
            moments: Vec::new(),
            probs: Vec::new(),
        }
    }

    pub fn mode(&self) -> StatsMode {
        self.mode
    }

    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    pub fn record(&mut self, decision: &[f64]) {
        if self.mode == StatsMode::Minimal {
            return;
        }
        self.ring.push(decision);
    }

    /// Adapt ring capacity to a window demand. Grows immediately; shrinks by halving
    /// only once demand has dropped to a quarter of the current capacity.
    pub fn request_window(&mut self, demand: usize) {
        let want = demand
            .max(1)
            .next_power_of_two()
            .clamp(self.min_capacity, self.max_capacity);
        let cap = self.ring.capacity();
        if want > cap {
            self.ring.resize(want);
        } else if want * 4 <= cap {
            self.ring.resize((cap / 2).max(self.min_capacity));
        }
    }

    /// One pass over the current window. `None` in minimal mode or when empty.
    pub fn summarize(&mut self) -> Option<DecisionStats> {
        if self.mode == StatsMode::Minimal || self.ring.is_empty() {
            return None;
        }
        let dims = self.ring.dims();
        self.moments.clear();
        self.moments.resize(dims, Moments::default());

        let full = self.mode == StatsMode::Full;
        let mut entropy = Moments::default();
        let mut e_min = f64::INFINITY;
        let mut e_max = f64::NEG_INFINITY;
        let mut stable = 0usize;
        let mut prev_arg: Option<usize> = None;

        for v in self.ring.iter() {
            for (m, &x) in self.moments.iter_mut().zip(v) {
                if full {
                    m.push_pebay(x);
                } else {
                    m.push_welford(x);
                }
            }
            let h = softmax_entropy(v, &mut self.probs);
            entropy.push_welford(h);
            e_min = e_min.min(h);
            e_max = e_max.max(h);

            let arg = argmax(v);
            if prev_arg == Some(arg) {
                stable += 1;
            }
            prev_arg = Some(arg);
        }

        let n = self.ring.len();
        let pairs = n.saturating_sub(1);
        Some(DecisionStats {
            window: n,
            means: self.moments.iter().map(|m| m.mean).collect(),
            stds: self.moments.iter().map(|m| m.variance().sqrt()).collect(),
            skew: full.then(|| self.moments.iter().map(Moments::skewness).collect()),
            kurtosis: full.then(|| self.moments.iter().map(Moments::kurtosis).collect()),
            entropy: EntropyStats {
                mean: entropy.mean,
                std: entropy.variance().sqrt(),
                min: e_min,
                max: e_max,
            },
            stability: if pairs == 0 {
                0.0
            } else {
                stable as f64 / pairs as f64
            },
        })
    }
}
