//! Structural plasticity: scheduled pruning, sparsity-targeted pruning and
//! constrained regrowth.
//!
//! All sparsity math is relative to a [`SparsityBaseline`] frozen the first time a
//! pruning mode touches a genome. Scheduled and evolutionary pruning keep separate
//! baselines.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::genome::{Connection, Genome};
use crate::order_stats::sort_desc;
use crate::prng::Prng;

/// Upper bound applied to any requested sparsity target so at least one connection survives.
pub const MAX_TARGET_SPARSITY: f64 = 0.999;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PruneMethod {
    /// Remove the smallest `|w|` first.
    #[default]
    Magnitude,
    /// Remove the smallest `|w| * gradient proxy` first.
    Snip,
}

/// Connection count captured once, at first use. Never recomputed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SparsityBaseline {
    count: Option<usize>,
}

impl SparsityBaseline {
    /// Freeze `count` if nothing was captured yet; returns the frozen value.
    pub fn capture(&mut self, count: usize) -> usize {
        *self.count.get_or_insert(count)
    }

    pub fn get(&self) -> Option<usize> {
        self.count
    }
}

/// Per-genome plasticity bookkeeping. Travels with the genome through cloning so
/// offspring keep ramping against the same baselines as their parents.
#[derive(Debug, Clone, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PlasticityState {
    pub scheduled: SparsityBaseline,
    pub evolutionary: SparsityBaseline,
    pub schedule: Option<PruningSchedule>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct PruningSchedule {
    pub start: u64,
    pub end: u64,
    pub frequency: u64,
    /// Final sparsity reached at `end`; ramped linearly from `start`.
    pub target_sparsity: f64,
    pub method: PruneMethod,
    /// Fraction of removed edges to attempt to regrow.
    pub regrow_fraction: f64,
    /// Attempts allowed per requested regrown edge.
    pub regrow_attempt_multiplier: usize,
    /// Idempotence marker: the last iteration this schedule acted on.
    pub last_prune_iter: Option<u64>,
}

impl Default for PruningSchedule {
    fn default() -> Self {
        Self {
            start: 0,
            end: 100,
            frequency: 10,
            target_sparsity: 0.5,
            method: PruneMethod::Magnitude,
            regrow_fraction: 0.0,
            regrow_attempt_multiplier: 10,
            last_prune_iter: None,
        }
    }
}

impl PruningSchedule {
    /// Create a schedule, clamping soft ranges: `frequency >= 1`, `end >= start`,
    /// `target_sparsity` in `[0, 1]`.
    pub fn new(start: u64, end: u64, frequency: u64, target_sparsity: f64) -> Self {
        Self {
            start,
            end: end.max(start),
            frequency: frequency.max(1),
            target_sparsity: clamp_unit(target_sparsity),
            ..Default::default()
        }
    }

    pub fn with_method(mut self, method: PruneMethod) -> Self {
        self.method = method;
        self
    }

    pub fn with_regrow(mut self, fraction: f64) -> Self {
        self.regrow_fraction = clamp_unit(fraction);
        self
    }

    pub fn with_regrow_attempt_multiplier(mut self, multiplier: usize) -> Self {
        self.regrow_attempt_multiplier = multiplier.max(1);
        self
    }

    pub fn validate(&self) -> Result<(), &'static str> {
        if self.end < self.start {
            return Err("end must be >= start");
        }
        if self.frequency == 0 {
            return Err("frequency must be >= 1");
        }
        if !(0.0..=1.0).contains(&self.target_sparsity) {
            return Err("target_sparsity must be in [0, 1]");
        }
        if !(0.0..=1.0).contains(&self.regrow_fraction) {
            return Err("regrow_fraction must be in [0, 1]");
        }
        Ok(())
    }

    /// Linearly ramped target at `iteration`.
    pub fn target_at(&self, iteration: u64) -> f64 {
        let span = self.end.saturating_sub(self.start);
        let progress = if span == 0 {
            1.0
        } else {
            iteration.saturating_sub(self.start) as f64 / span as f64
        };
        self.target_sparsity * progress.clamp(0.0, 1.0)
    }
}

fn clamp_unit(x: f64) -> f64 {
    if x.is_nan() {
        0.0
    } else {
        x.clamp(0.0, 1.0)
    }
}

/// Removal priority of a connection; lower is removed first.
pub fn saliency(c: &Connection, method: PruneMethod) -> f64 {
    let magnitude = c.weight.abs();
    match method {
        PruneMethod::Magnitude => magnitude,
        PruneMethod::Snip => {
            let proxy = if c.total_delta_weight != 0.0 {
                c.total_delta_weight.abs()
            } else if c.previous_delta_weight != 0.0 {
                c.previous_delta_weight.abs()
            } else {
                return magnitude;
            };
            magnitude * proxy
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub removed: usize,
    pub regrown: usize,
}

impl PruneReport {
    pub fn changed(&self) -> bool {
        self.removed > 0 || self.regrown > 0
    }
}

/// Pruning/regrowth engine with its own scratch buffers.
#[derive(Debug, Clone)]
pub struct PlasticityEngine {
    /// Regrown edges get weights drawn from `[-amplitude, amplitude)`.
    pub regrow_weight_amplitude: f64,

    keys: Vec<f64>,
    order: Vec<usize>,
    stack: Vec<(usize, usize)>,
    doomed: Vec<usize>,
}

impl Default for PlasticityEngine {
    fn default() -> Self {
        Self::new(0.1)
    }
}

impl PlasticityEngine {
    pub fn new(regrow_weight_amplitude: f64) -> Self {
        Self {
            regrow_weight_amplitude: regrow_weight_amplitude.abs(),
            keys: Vec::new(),
            order: Vec::new(),
            stack: Vec::new(),
            doomed: Vec::new(),
        }
    }

    /// Connection indices ordered by removal priority (ascending saliency).
    /// Disabled connections are ranked first.
    pub fn rank(&mut self, connections: &[Connection], method: PruneMethod) -> &[usize] {
        self.keys.clear();
        // Descending sort on negated saliency == ascending saliency.
        self.keys.extend(connections.iter().map(|c| {
            if c.enabled {
                -saliency(c, method)
            } else {
                f64::INFINITY
            }
        }));
        sort_desc(&self.keys, &mut self.order, &mut self.stack);
        &self.order
    }

    /// Remove up to `count` connections in rank order. At least one enabled
    /// connection survives if any existed.
    fn remove_lowest(&mut self, genome: &mut Genome, count: usize, method: PruneMethod) -> usize {
        // Disabled edges rank first, so the last survivor is enabled whenever one exists.
        let count = if genome.enabled_count() > 0 {
            count.min(genome.connections.len() - 1)
        } else {
            count
        };
        if count == 0 {
            return 0;
        }
        self.rank(&genome.connections, method);
        self.doomed.clear();
        self.doomed.extend(self.order.iter().take(count).copied());
        genome.remove_connections(&mut self.doomed)
    }

    /// Like [`Self::remove_lowest`] but only enabled connections are candidates.
    fn remove_lowest_enabled(&mut self, genome: &mut Genome, count: usize, method: PruneMethod) -> usize {
        if count == 0 {
            return 0;
        }
        self.rank(&genome.connections, method);
        let connections = &genome.connections;
        self.doomed.clear();
        self.doomed.extend(
            self.order
                .iter()
                .copied()
                .filter(|&i| connections[i].enabled)
                .take(count),
        );
        genome.remove_connections(&mut self.doomed)
    }

    /// One step of a pruning schedule at `iteration`.
    ///
    /// Silently does nothing outside `[start, end]`, off-cadence, when this iteration was
    /// already handled, or when no scheduled baseline was captured for the genome.
    pub fn scheduled_prune(
        &mut self,
        genome: &mut Genome,
        schedule: &mut PruningSchedule,
        iteration: u64,
        rng: &mut Prng,
    ) -> PruneReport {
        let mut report = PruneReport::default();
        if iteration < schedule.start || iteration > schedule.end {
            return report;
        }
        if schedule.last_prune_iter == Some(iteration) {
            return report;
        }
        if (iteration - schedule.start) % schedule.frequency.max(1) != 0 {
            return report;
        }
        let Some(baseline) = genome.plasticity.scheduled.get() else {
            return report;
        };

        let target_now = schedule.target_at(iteration);
        let desired = desired_count(baseline, target_now);
        let current = genome.connections.len();
        if current <= desired {
            schedule.last_prune_iter = Some(iteration);
            return report;
        }

        report.removed = self.remove_lowest(genome, current - desired, schedule.method);

        if schedule.regrow_fraction > 0.0 {
            let wanted = (report.removed as f64 * schedule.regrow_fraction).floor() as usize;
            let budget = wanted.saturating_mul(schedule.regrow_attempt_multiplier);
            report.regrown = self.regrow(genome, wanted, budget, rng);
        }

        schedule.last_prune_iter = Some(iteration);
        genome.mark_dirty();
        report
    }

    /// Prune down to `target_sparsity` of the evolutionary baseline (captured lazily here).
    /// No regrowth. Repeating the call at the same target is a no-op.
    pub fn sparsity_target_prune(
        &mut self,
        genome: &mut Genome,
        target_sparsity: f64,
        method: PruneMethod,
    ) -> usize {
        if target_sparsity.is_nan() || target_sparsity <= 0.0 {
            return 0;
        }
        let target = target_sparsity.min(MAX_TARGET_SPARSITY);
        let current = genome.connections.len();
        let baseline = genome.plasticity.evolutionary.capture(current);
        let desired = desired_count(baseline, target);
        if current <= desired {
            return 0;
        }
        let removed = self.remove_lowest(genome, current - desired, method);
        genome.mark_dirty();
        removed
    }

    /// Remove `floor(enabled * fraction)` enabled connections, keeping at least one enabled.
    pub fn prune_fraction(&mut self, genome: &mut Genome, fraction: f64, method: PruneMethod) -> usize {
        let enabled = genome.enabled_count();
        if enabled <= 1 || fraction.is_nan() || fraction <= 0.0 {
            return 0;
        }
        let wanted = (enabled as f64 * fraction.min(1.0)).floor() as usize;
        self.remove_lowest_enabled(genome, wanted.min(enabled - 1), method)
    }

    /// Try to add `count` new edges within `budget` random draws.
    pub fn regrow(&mut self, genome: &mut Genome, count: usize, budget: usize, rng: &mut Prng) -> usize {
        let mut added = 0;
        let mut attempts = 0;
        while added < count && attempts < budget {
            attempts += 1;
            let Some((from, to)) = rng.distinct_pair(genome.nodes.len()) else {
                break;
            };
            // check_edge rejects self-loops, duplicates, input targets and back-edges.
            if genome.check_edge(from, to).is_err() {
                continue;
            }
            let weight = rng.symmetric(self.regrow_weight_amplitude);
            if genome.connect(from, to, weight).is_ok() {
                added += 1;
            }
        }
        added
    }
}

fn desired_count(baseline: usize, target: f64) -> usize {
    ((baseline as f64 * (1.0 - target)).floor() as usize).max(1)
}

/// Fraction of the baseline currently removed, in `[0, 1)`.
///
/// Uses the scheduled baseline when one exists, otherwise the evolutionary one.
/// Returns 0 before any capture and when the genome has grown past its baseline.
pub fn current_sparsity(genome: &Genome) -> f64 {
    let baseline = genome
        .plasticity
        .scheduled
        .get()
        .or_else(|| genome.plasticity.evolutionary.get());
    match baseline {
        Some(b) if b > 0 => (1.0 - genome.connections.len() as f64 / b as f64).max(0.0),
        _ => 0.0,
    }
}
