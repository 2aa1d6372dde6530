//! Anti-collapse recovery: escalate mutation pressure and re-randomize the output
//! layer of a sampled slice of the non-elite population.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::genome::Genome;
use crate::prng::Prng;

/// Mutation pressure knobs shared with the genetic core.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MutationPressure {
    pub rate: f64,
    pub amount: f64,
    pub novelty_blend: f64,
}

impl Default for MutationPressure {
    fn default() -> Self {
        Self {
            rate: 0.3,
            amount: 1.0,
            novelty_blend: 0.0,
        }
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RecoveryConfig {
    pub rate_factor: f64,
    pub rate_cap: f64,
    pub amount_factor: f64,
    pub amount_cap: f64,
    pub novelty_factor: f64,
    pub novelty_cap: f64,
    /// Escalation starts from at least this value so a zero knob can still grow.
    pub escalation_floor: f64,

    /// Share of the non-elite population to reinitialize.
    pub sample_fraction: f64,
    /// Hard bound on genomes touched per recovery.
    pub sample_capacity: usize,

    pub bias_amplitude: f64,
    pub weight_amplitude: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            rate_factor: 1.5,
            rate_cap: 0.95,
            amount_factor: 1.5,
            amount_cap: 4.0,
            novelty_factor: 1.5,
            novelty_cap: 0.6,
            escalation_floor: 0.05,
            sample_fraction: 0.3,
            sample_capacity: 64,
            bias_amplitude: 0.1,
            weight_amplitude: 0.2,
        }
    }
}

impl RecoveryConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.rate_factor < 1.0 || self.amount_factor < 1.0 || self.novelty_factor < 1.0 {
            return Err("escalation factors must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.sample_fraction) {
            return Err("sample_fraction must be in [0, 1]");
        }
        if self.sample_capacity == 0 {
            return Err("sample_capacity must be >= 1");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub sampled: usize,
    pub reinitialized: usize,
}

#[derive(Debug, Clone)]
pub struct AntiCollapseRecovery {
    cfg: RecoveryConfig,
    pool: Vec<usize>,
    sample: Vec<usize>,
    fired: u32,
}

impl AntiCollapseRecovery {
    pub fn new(cfg: RecoveryConfig) -> Self {
        let cap = cfg.sample_capacity.max(1);
        Self {
            cfg,
            pool: Vec::with_capacity(cap * 4),
            sample: Vec::with_capacity(cap),
            fired: 0,
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.cfg
    }

    pub fn times_fired(&self) -> u32 {
        self.fired
    }

    /// Population indices touched by the last recovery.
    pub fn touched(&self) -> &[usize] {
        &self.sample
    }

    pub fn escalate(&self, p: &mut MutationPressure) {
        let floor = self.cfg.escalation_floor;
        p.rate = (p.rate.max(floor) * self.cfg.rate_factor).min(self.cfg.rate_cap);
        p.amount = (p.amount.max(floor) * self.cfg.amount_factor).min(self.cfg.amount_cap);
        p.novelty_blend =
            (p.novelty_blend.max(floor) * self.cfg.novelty_factor).min(self.cfg.novelty_cap);
    }

    /// Fire recovery. `ranked` is the population ordered best-first; its first
    /// `elitism` entries are never touched.
    pub fn apply(
        &mut self,
        population: &mut [Genome],
        ranked: &[usize],
        elitism: usize,
        pressure: &mut MutationPressure,
        rng: &mut Prng,
    ) -> RecoveryReport {
        self.fired = self.fired.saturating_add(1);
        self.escalate(pressure);

        self.pool.clear();
        self.pool
            .extend(ranked.iter().skip(elitism).copied().filter(|&i| i < population.len()));

        let want = ((self.pool.len() as f64 * self.cfg.sample_fraction).floor() as usize)
            .min(self.cfg.sample_capacity);
        rng.sample_into(&mut self.pool, want, &mut self.sample);

        let mut report = RecoveryReport {
            sampled: self.sample.len(),
            reinitialized: 0,
        };
        for &idx in &self.sample {
            let genome = &mut population[idx];
            if let Err(e) = genome.validate() {
                tracing::debug!(genome = genome.id, error = %e, "skipping malformed genome in recovery");
                continue;
            }
            reinit_outputs(genome, self.cfg.bias_amplitude, self.cfg.weight_amplitude, rng);
            report.reinitialized += 1;
        }

        tracing::info!(
            sampled = report.sampled,
            reinitialized = report.reinitialized,
            rate = pressure.rate,
            amount = pressure.amount,
            novelty = pressure.novelty_blend,
            "species collapse recovery"
        );
        report
    }
}

/// Small symmetric re-randomization of output biases and every connection into an output.
pub fn reinit_outputs(genome: &mut Genome, bias_amplitude: f64, weight_amplitude: f64, rng: &mut Prng) {
    for i in 0..genome.nodes.len() {
        if genome.is_output(i) {
            genome.nodes[i].bias = rng.symmetric(bias_amplitude);
        }
    }
    for ci in 0..genome.connections.len() {
        let to = genome.connections[ci].to;
        if genome.is_output(to) {
            genome.connections[ci].weight = rng.symmetric(weight_amplitude);
        }
    }
    genome.score = None;
}
