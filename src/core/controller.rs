//! The generation loop.
//!
//! One generation, in order:
//! 1. evolve (genetic core)
//! 2. optional Baldwinian/Lamarckian refinement of the top genomes
//! 3. plateau bookkeeping on the generation's best score
//! 4. structural plasticity: scheduled, evolutionary and simplify-phase pruning
//! 5. re-score every genome the plasticity pass changed
//! 6. decision probes and streaming statistics
//! 7. species-collapse detection and recovery
//! 8. population growth
//! 9. telemetry, checkpoint, stop conditions
//!
//! Everything runs synchronously on the caller's thread. With the `parallel`
//! feature only fitness evaluation fans out, and workers touch nothing but the
//! genome they score.

use hashbrown::HashSet;
#[cfg(feature = "parallel")]
use rayon::prelude::*;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::checkpoint::{CheckpointConfig, CheckpointWriter};
use crate::collaborators::{CancelToken, FitnessEvaluator, GeneticCore, Sample, StopReason, TrainOptions, Trainer, Yielder};
use crate::genome::Genome;
use crate::order_stats::RankBuffers;
use crate::plasticity::{current_sparsity, PlasticityEngine, PruneMethod, PruningSchedule, MAX_TARGET_SPARSITY};
use crate::prng::Prng;
use crate::recovery::{AntiCollapseRecovery, RecoveryConfig};
use crate::sizer::{DynamicPopulationSizer, SizerConfig};
use crate::stagnation::{PhaseStep, StagnationConfig, StagnationMonitor};
use crate::streaming_stats::{DecisionStats, StatsConfig, StatsMode, StreamingStatistics};
use crate::telemetry::{distinct_species, Diversity, TelemetryLog, TelemetrySnapshot};

/// Population-wide sparsity targeting against each genome's evolutionary baseline.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct EvolutionPruning {
    pub start_generation: u64,
    pub interval: u64,
    pub target_sparsity: f64,
    /// Generations to ramp from zero to `target_sparsity`; 0 applies the full target at once.
    pub ramp_generations: u64,
    pub method: PruneMethod,
}

impl Default for EvolutionPruning {
    fn default() -> Self {
        Self {
            start_generation: 10,
            interval: 5,
            target_sparsity: 0.5,
            ramp_generations: 50,
            method: PruneMethod::Magnitude,
        }
    }
}

impl EvolutionPruning {
    /// Effective target at `generation`, or `None` when this generation is off-cadence.
    pub fn target_at(&self, generation: u64) -> Option<f64> {
        if generation < self.start_generation {
            return None;
        }
        let since = generation - self.start_generation;
        if since % self.interval.max(1) != 0 {
            return None;
        }
        let ramp = if self.ramp_generations == 0 {
            1.0
        } else {
            ((since + 1) as f64 / self.ramp_generations as f64).min(1.0)
        };
        Some(self.target_sparsity.clamp(0.0, MAX_TARGET_SPARSITY) * ramp)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum RefinementMode {
    /// Train a copy; only the resulting score is kept.
    #[default]
    Baldwinian,
    /// Train in place; offspring inherit the trained weights.
    Lamarckian,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct RefinementConfig {
    pub mode: RefinementMode,
    pub top_k: usize,
    pub options: TrainOptions,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            mode: RefinementMode::Baldwinian,
            top_k: 3,
            options: TrainOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StopConditions {
    pub max_generations: Option<u64>,
    pub target_fitness: Option<f64>,
    /// Generations without improvement before giving up; 0 disables.
    pub stagnation_limit: u32,
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct ControllerConfig {
    pub seed: u64,
    pub pruning: Option<PruningSchedule>,
    pub evolution_pruning: Option<EvolutionPruning>,
    pub regrow_weight_amplitude: f64,
    pub stagnation: StagnationConfig,
    pub recovery: RecoveryConfig,
    pub sizer: SizerConfig,
    pub stats: StatsConfig,
    pub refinement: Option<RefinementConfig>,
    pub checkpoint: CheckpointConfig,
    pub stop: StopConditions,
    /// Call the host's yield hook every this many generations.
    pub yield_every: u64,
    /// Telemetry records kept in memory.
    pub telemetry_len: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            seed: 0x5eed,
            pruning: None,
            evolution_pruning: None,
            regrow_weight_amplitude: 0.1,
            stagnation: StagnationConfig::default(),
            recovery: RecoveryConfig::default(),
            sizer: SizerConfig::default(),
            stats: StatsConfig::default(),
            refinement: None,
            checkpoint: CheckpointConfig::default(),
            stop: StopConditions {
                max_generations: Some(1000),
                ..Default::default()
            },
            yield_every: 1,
            telemetry_len: 256,
        }
    }
}

impl ControllerConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        if let Some(s) = &self.pruning {
            s.validate()?;
        }
        if let Some(p) = &self.evolution_pruning {
            if !(0.0..=1.0).contains(&p.target_sparsity) {
                return Err("evolution_pruning.target_sparsity must be in [0, 1]");
            }
        }
        self.stagnation.validate()?;
        self.recovery.validate()?;
        self.sizer.validate()?;
        self.stats.validate()?;
        if self.telemetry_len == 0 {
            return Err("telemetry_len must be >= 1");
        }
        Ok(())
    }
}

/// Per-run scratch. One owner; never handed to evaluation workers.
#[derive(Debug, Default)]
pub struct Scratch {
    pub ranks: RankBuffers,
    /// Genomes whose score is stale this generation.
    pub dirty: Vec<bool>,
    /// Genomes that passed validation this generation.
    pub valid: Vec<bool>,
    pub species: HashSet<u32>,
    pub picked: Vec<usize>,
}

impl Scratch {
    fn reset_masks(&mut self, n: usize) {
        self.dirty.clear();
        self.dirty.resize(n, false);
        self.valid.clear();
        self.valid.resize(n, true);
    }
}

/// Summary of one generation.
#[derive(Debug, Clone, Default)]
pub struct GenerationReport {
    pub generation: u64,
    pub best_fitness: Option<f64>,
    pub improved: bool,
    pub phase: Option<PhaseStep>,
    pub pruned: usize,
    pub regrown: usize,
    pub recovered: bool,
    pub added: usize,
    pub stop: Option<StopReason>,
}

#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub reason: StopReason,
    pub generations: u64,
    pub best_fitness: Option<f64>,
    pub best: Option<Genome>,
}

pub struct GenerationController<C, E> {
    core: C,
    evaluator: E,
    trainer: Option<Box<dyn Trainer + Send>>,
    dataset: Vec<Sample>,

    cfg: ControllerConfig,
    engine: PlasticityEngine,
    stats: StreamingStatistics,
    monitor: StagnationMonitor,
    recovery: AntiCollapseRecovery,
    sizer: DynamicPopulationSizer,
    checkpoints: CheckpointWriter,
    telemetry: TelemetryLog,
    scratch: Scratch,
    rng: Prng,
    cancel: CancelToken,

    generation: u64,
    best_fitness: Option<f64>,
    best: Option<Genome>,
    last_decision: Option<DecisionStats>,
}

impl<C: GeneticCore, E: FitnessEvaluator> GenerationController<C, E> {
    pub fn new(core: C, evaluator: E, cfg: ControllerConfig) -> Self {
        let stats = StreamingStatistics::new(&cfg.stats);
        Self {
            core,
            evaluator,
            trainer: None,
            dataset: Vec::new(),
            engine: PlasticityEngine::new(cfg.regrow_weight_amplitude),
            stats,
            monitor: StagnationMonitor::new(cfg.stagnation.clone()),
            recovery: AntiCollapseRecovery::new(cfg.recovery.clone()),
            sizer: DynamicPopulationSizer::new(cfg.sizer.clone()),
            checkpoints: CheckpointWriter::new(cfg.checkpoint.clone()),
            telemetry: TelemetryLog::new(cfg.telemetry_len),
            scratch: Scratch::default(),
            rng: Prng::new(cfg.seed),
            cancel: CancelToken::new(),
            generation: 0,
            best_fitness: None,
            best: None,
            last_decision: None,
            cfg,
        }
    }

    pub fn with_trainer(mut self, trainer: Box<dyn Trainer + Send>, dataset: Vec<Sample>) -> Self {
        self.trainer = Some(trainer);
        self.dataset = dataset;
        self
    }

    pub fn with_cancel_token(mut self, token: CancelToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.cfg
    }

    pub fn core(&self) -> &C {
        &self.core
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn best_fitness(&self) -> Option<f64> {
        self.best_fitness
    }

    pub fn monitor(&self) -> &StagnationMonitor {
        &self.monitor
    }

    pub fn telemetry(&self) -> &TelemetryLog {
        &self.telemetry
    }

    pub fn stats(&self) -> &StreamingStatistics {
        &self.stats
    }

    /// Push a decision vector observed by the host.
    pub fn record_decision(&mut self, decision: &[f64]) {
        self.stats.record(decision);
    }

    /// Run generations until a stop condition or the cancel token fires.
    pub fn run(&mut self, yielder: &mut impl Yielder) -> RunOutcome {
        let every = self.cfg.yield_every.max(1);
        let reason = loop {
            if let Some(r) = self.cancel.state() {
                break r;
            }
            let report = self.run_generation();
            if let Some(stop) = report.stop {
                break stop;
            }
            if self.generation % every == 0 {
                yielder.yield_now();
            }
        };
        tracing::info!(
            reason = %reason,
            generations = self.generation,
            best = ?self.best_fitness,
            "run finished"
        );
        RunOutcome {
            reason,
            generations: self.generation,
            best_fitness: self.best_fitness,
            best: self.best.clone(),
        }
    }

    pub fn run_generation(&mut self) -> GenerationReport {
        self.generation += 1;
        let generation = self.generation;
        let mut report = GenerationReport {
            generation,
            ..Default::default()
        };

        if self.core.evolve().is_none() {
            tracing::warn!(generation, "genetic core produced no fittest genome");
            report.stop = Some(StopReason::Aborted);
            return report;
        }
        self.validate_population();
        self.refine();

        let gen_best = self.track_best();
        report.best_fitness = gen_best;
        report.improved = match gen_best {
            Some(f) => self.monitor.observe_fitness(f),
            None => false,
        };
        let phase = self.monitor.step_phase();
        report.phase = Some(phase);

        let (pruned, regrown) = self.plasticity_pass(generation, phase);
        report.pruned = pruned;
        report.regrown = regrown;
        self.rescore_dirty();

        self.sample_decisions();

        report.recovered = self.check_collapse();
        report.added = self.maybe_expand(generation);
        self.rescore_dirty();

        self.record_telemetry(gen_best);
        self.maybe_checkpoint();

        report.stop = self.stop_reason();
        tracing::debug!(
            generation,
            best = ?gen_best,
            pruned,
            regrown,
            simplify = phase.is_simplify(),
            "generation complete"
        );
        report
    }

    fn validate_population(&mut self) {
        let pop = self.core.population_mut();
        self.scratch.reset_masks(pop.len());
        for (i, g) in pop.iter_mut().enumerate() {
            if let Err(e) = g.validate() {
                tracing::debug!(genome = g.id, error = %e, "malformed genome excluded this generation");
                self.scratch.valid[i] = false;
                g.score = None;
            }
        }
    }

    fn refine(&mut self) {
        let Some(refine) = self.cfg.refinement.as_ref() else {
            return;
        };
        let Some(trainer) = self.trainer.as_mut() else {
            return;
        };
        if self.dataset.is_empty() || refine.top_k == 0 {
            return;
        }

        let pop = self.core.population_mut();
        let ranked = self.scratch.ranks.rank_genomes(pop);
        self.scratch.picked.clear();
        self.scratch.picked.extend(
            ranked
                .iter()
                .copied()
                .filter(|&i| self.scratch.valid[i])
                .take(refine.top_k),
        );

        for &i in &self.scratch.picked {
            match refine.mode {
                RefinementMode::Lamarckian => {
                    match trainer.train(&mut pop[i], &self.dataset, &refine.options) {
                        Ok(_) => self.scratch.dirty[i] = true,
                        Err(e) => tracing::debug!(genome = pop[i].id, error = %e, "refinement failed"),
                    }
                }
                RefinementMode::Baldwinian => {
                    let mut copy = pop[i].clone();
                    match trainer.train(&mut copy, &self.dataset, &refine.options) {
                        Ok(_) => pop[i].score = Some(self.evaluator.evaluate(&mut copy)),
                        Err(e) => tracing::debug!(genome = pop[i].id, error = %e, "refinement failed"),
                    }
                }
            }
        }
        rescore(pop, &self.scratch.dirty, &self.evaluator);
        self.scratch.dirty.iter_mut().for_each(|d| *d = false);
    }

    /// Best score this generation; updates the run-wide best genome.
    fn track_best(&mut self) -> Option<f64> {
        let pop = self.core.population();
        let ranked = self.scratch.ranks.rank_genomes(pop);
        let top = *ranked.first()?;
        let best = pop[top].score.filter(|s| !s.is_nan())?;
        if self.best_fitness.map_or(true, |b| best > b) {
            self.best_fitness = Some(best);
            self.best = Some(pop[top].clone());
        }
        Some(best)
    }

    fn plasticity_pass(&mut self, generation: u64, phase: PhaseStep) -> (usize, usize) {
        let evo_target = self
            .cfg
            .evolution_pruning
            .as_ref()
            .and_then(|p| p.target_at(generation).map(|t| (t, p.method)));
        let simplify = phase.is_simplify().then(|| {
            let s = self.monitor.config();
            (s.simplify_prune_fraction, s.simplify_method)
        });

        let (mut pruned, mut regrown) = (0, 0);
        let pop = self.core.population_mut();
        for (i, g) in pop.iter_mut().enumerate() {
            if !self.scratch.valid[i] {
                continue;
            }
            let mut changed = false;

            if let Some(template) = self.cfg.pruning.as_ref() {
                if g.plasticity.schedule.is_none() {
                    g.plasticity.schedule = Some(template.clone());
                    g.plasticity.scheduled.capture(g.connections.len());
                }
                if let Some(mut schedule) = g.plasticity.schedule.take() {
                    let r = self.engine.scheduled_prune(g, &mut schedule, generation, &mut self.rng);
                    g.plasticity.schedule = Some(schedule);
                    pruned += r.removed;
                    regrown += r.regrown;
                    changed |= r.changed();
                }
            }

            if let Some((target, method)) = evo_target {
                let removed = self.engine.sparsity_target_prune(g, target, method);
                pruned += removed;
                changed |= removed > 0;
            }

            if let Some((fraction, method)) = simplify {
                let removed = self.engine.prune_fraction(g, fraction, method);
                pruned += removed;
                changed |= removed > 0;
            }

            if changed {
                self.scratch.dirty[i] = true;
            }
        }
        (pruned, regrown)
    }

    fn rescore_dirty(&mut self) {
        let pop = self.core.population_mut();
        if self.scratch.dirty.len() < pop.len() {
            self.scratch.dirty.resize(pop.len(), true);
            self.scratch.valid.resize(pop.len(), true);
        }
        rescore(pop, &self.scratch.dirty, &self.evaluator);
        self.scratch.dirty.iter_mut().for_each(|d| *d = false);
    }

    fn sample_decisions(&mut self) {
        if self.stats.mode() == StatsMode::Minimal {
            self.last_decision = None;
            return;
        }
        let probes = &self.cfg.stats.probe_inputs;
        self.stats.request_window(self.cfg.stats.window.max(probes.len()));
        if !probes.is_empty() {
            let pop = self.core.population_mut();
            let ranked = self.scratch.ranks.rank_genomes(pop);
            if let Some(&top) = ranked.iter().find(|&&i| self.scratch.valid[i]) {
                for input in probes {
                    let out = pop[top].activate(input);
                    self.stats.record(&out);
                }
            }
        }
        self.last_decision = self.stats.summarize();
    }

    fn check_collapse(&mut self) -> bool {
        let count = distinct_species(self.core.population(), &mut self.scratch.species);
        let step = self.monitor.observe_species(count);
        if !step.trigger {
            return false;
        }

        let mut pressure = self.core.options().pressure;
        let elitism = self.core.options().elitism;
        let pop = self.core.population_mut();
        let ranked = self.scratch.ranks.rank_genomes(pop);
        self.recovery
            .apply(pop, ranked, elitism, &mut pressure, &mut self.rng);
        for &i in self.recovery.touched() {
            self.scratch.dirty[i] = true;
        }
        self.core.options_mut().pressure = pressure;
        true
    }

    fn maybe_expand(&mut self, generation: u64) -> usize {
        let size = self.core.population().len();
        if !self.sizer.should_expand(generation, self.monitor.plateau_ratio(), size) {
            return 0;
        }
        let catalog = self.core.options().mutation.clone();
        let amount = self.core.options().pressure.amount;
        let pop = self.core.population_mut();
        let added = self
            .sizer
            .expand(pop, &mut self.scratch.ranks, &catalog, amount, &mut self.rng);
        let new_len = pop.len();
        self.core.options_mut().popsize = new_len;
        added
    }

    fn record_telemetry(&mut self, gen_best: Option<f64>) {
        let pop = self.core.population();
        let mean_sparsity = if pop.is_empty() {
            0.0
        } else {
            pop.iter().map(current_sparsity).sum::<f64>() / pop.len() as f64
        };
        let state = self.monitor.state();
        self.telemetry.push(TelemetrySnapshot {
            generation: self.generation,
            best_fitness: gen_best,
            population_size: pop.len(),
            species_count: self.scratch.species.len(),
            diversity: Diversity::measure(pop),
            mean_sparsity,
            mutation_rate: self.core.options().pressure.rate,
            simplify_mode: state.simplify_mode,
            plateau_counter: state.plateau_counter,
            collapse_streak: state.collapse_streak,
            decision: self.last_decision.clone(),
        });
    }

    #[cfg(feature = "serde")]
    /// Snapshots carry the run-wide best fitness, not this generation's.
    fn maybe_checkpoint(&mut self) {
        use crate::checkpoint::{unix_now, Checkpoint, TopEntry};

        if !self.checkpoints.due(self.generation) {
            return;
        }
        let top_k = self.checkpoints.config().top_k;
        let tail = self.checkpoints.config().telemetry_tail;
        let pop = self.core.population();
        let ranked = self.scratch.ranks.rank_genomes(pop);
        let top = ranked
            .iter()
            .take(top_k)
            .map(|&i| TopEntry::new(i, &pop[i]))
            .collect();
        let cp = Checkpoint {
            generation: self.generation,
            best_fitness: self.best_fitness,
            simplify_mode: self.monitor.state().simplify_mode,
            plateau_counter: self.monitor.state().plateau_counter,
            timestamp: unix_now(),
            telemetry_tail: self.telemetry.tail(tail),
            top,
        };
        self.checkpoints.write(&cp);
    }

    #[cfg(not(feature = "serde"))]
    fn maybe_checkpoint(&mut self) {}

    fn stop_reason(&self) -> Option<StopReason> {
        let stop = &self.cfg.stop;
        if let (Some(target), Some(best)) = (stop.target_fitness, self.best_fitness) {
            if best >= target {
                return Some(StopReason::Solved);
            }
        }
        if stop.stagnation_limit > 0 && self.monitor.state().since_improvement >= stop.stagnation_limit {
            return Some(StopReason::Stagnation);
        }
        if stop.max_generations.is_some_and(|max| self.generation >= max) {
            return Some(StopReason::MaxGenerations);
        }
        None
    }

    pub fn into_core(self) -> C {
        self.core
    }
}

/// Evaluate every genome flagged in `dirty`.
fn rescore<E: FitnessEvaluator>(pop: &mut [Genome], dirty: &[bool], evaluator: &E) {
    #[cfg(feature = "parallel")]
    pop.par_iter_mut()
        .zip(dirty.par_iter())
        .filter(|&(_, &d)| d)
        .for_each(|(g, _)| g.score = Some(evaluator.evaluate(g)));

    #[cfg(not(feature = "parallel"))]
    pop.iter_mut()
        .zip(dirty)
        .filter(|&(_, &d)| d)
        .for_each(|(g, _)| g.score = Some(evaluator.evaluate(g)));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{CoreOptions, NoYield, TrainError, TrainReport};
    use crate::genome::Connection;

    /// Keeps its population as-is; optional species override.
    struct MockCore {
        pop: Vec<Genome>,
        opts: CoreOptions,
        species: Option<u32>,
        fail_after: Option<u64>,
        evolved: u64,
    }

    impl MockCore {
        fn new(n: usize, rng: &mut Prng) -> Self {
            let pop = (0..n)
                .map(|i| {
                    let mut g = Genome::dense(i as u64, 4, 2, 1.0, rng);
                    g.score = Some(i as f64);
                    g
                })
                .collect();
            Self {
                pop,
                opts: CoreOptions {
                    popsize: n,
                    elitism: 1,
                    ..Default::default()
                },
                species: None,
                fail_after: None,
                evolved: 0,
            }
        }
    }

    impl GeneticCore for MockCore {
        fn evolve(&mut self) -> Option<Genome> {
            self.evolved += 1;
            if self.fail_after.is_some_and(|n| self.evolved > n) {
                return None;
            }
            for g in &mut self.pop {
                g.species = self.species;
            }
            self.pop.iter().max_by(|a, b| a.score.partial_cmp(&b.score).unwrap()).cloned()
        }

        fn population(&self) -> &[Genome] {
            &self.pop
        }

        fn population_mut(&mut self) -> &mut Vec<Genome> {
            &mut self.pop
        }

        fn options(&self) -> &CoreOptions {
            &self.opts
        }

        fn options_mut(&mut self) -> &mut CoreOptions {
            &mut self.opts
        }
    }

    fn by_weight(g: &mut Genome) -> f64 {
        g.connections.iter().map(|c| c.weight.abs()).sum()
    }

    fn quiet() -> ControllerConfig {
        ControllerConfig {
            sizer: SizerConfig {
                enabled: false,
                ..Default::default()
            },
            stagnation: StagnationConfig {
                simplify_enabled: false,
                ..Default::default()
            },
            ..Default::default()
        }
    }

    #[cfg(feature = "serde")]
    #[test]
    fn checkpoint_reports_the_run_best_after_a_regression() {
        use crate::checkpoint::{Checkpoint, CheckpointConfig};

        let dir = std::env::temp_dir().join(format!("evoplast-ctl-ckpt-{}", std::process::id()));
        let mut rng = Prng::new(4);
        let core = MockCore::new(5, &mut rng);
        let mut ctl = GenerationController::new(
            core,
            by_weight,
            ControllerConfig {
                checkpoint: CheckpointConfig {
                    dir: Some(dir.clone()),
                    every: 1,
                    ..Default::default()
                },
                ..quiet()
            },
        );
        assert_eq!(ctl.run_generation().best_fitness, Some(4.0));
        for g in &mut ctl.core.pop {
            g.score = g.score.map(|s| s - 100.0);
        }
        assert_eq!(ctl.run_generation().best_fitness, Some(-96.0));

        let latest = Checkpoint::load(dir.join("latest.json")).unwrap();
        assert_eq!(latest.generation, 2);
        assert_eq!(latest.best_fitness, Some(4.0));
        assert_eq!(latest.top[0].score, Some(-96.0));
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn stops_at_max_generations() {
        let mut rng = Prng::new(1);
        let core = MockCore::new(6, &mut rng);
        let mut ctl = GenerationController::new(
            core,
            by_weight,
            ControllerConfig {
                stop: StopConditions {
                    max_generations: Some(7),
                    ..Default::default()
                },
                ..quiet()
            },
        );
        let mut yields = 0;
        let outcome = ctl.run(&mut || yields += 1);
        assert_eq!(outcome.reason, StopReason::MaxGenerations);
        assert_eq!(outcome.generations, 7);
        assert_eq!(yields, 6);
        assert_eq!(ctl.telemetry().len(), 7);
        assert!(outcome.best.is_some());
    }

    #[test]
    fn cancel_is_observed_at_the_boundary() {
        let mut rng = Prng::new(2);
        let ctl_core = MockCore::new(4, &mut rng);
        let token = CancelToken::new();
        let mut ctl = GenerationController::new(ctl_core, by_weight, quiet()).with_cancel_token(token.clone());
        let mut yielder = || token.cancel();
        let outcome = ctl.run(&mut yielder);
        assert_eq!(outcome.reason, StopReason::Cancelled);
        assert_eq!(outcome.generations, 1);
    }

    #[test]
    fn missing_fittest_aborts() {
        let mut rng = Prng::new(3);
        let mut core = MockCore::new(4, &mut rng);
        core.fail_after = Some(2);
        let mut ctl = GenerationController::new(core, by_weight, quiet());
        let outcome = ctl.run(&mut NoYield);
        assert_eq!(outcome.reason, StopReason::Aborted);
        assert_eq!(outcome.generations, 3);
    }

    #[test]
    fn solved_when_target_reached() {
        let mut rng = Prng::new(4);
        let core = MockCore::new(4, &mut rng);
        let mut ctl = GenerationController::new(
            core,
            by_weight,
            ControllerConfig {
                stop: StopConditions {
                    target_fitness: Some(2.0),
                    max_generations: Some(50),
                    ..Default::default()
                },
                ..quiet()
            },
        );
        assert_eq!(ctl.run(&mut NoYield).reason, StopReason::Solved);
        assert_eq!(ctl.generation(), 1);
    }

    #[test]
    fn stagnation_stop_survives_simplify_reset() {
        let mut rng = Prng::new(5);
        let core = MockCore::new(4, &mut rng);
        let mut ctl = GenerationController::new(
            core,
            |_: &mut Genome| 1.0,
            ControllerConfig {
                stagnation: StagnationConfig {
                    plateau_generations: 2,
                    simplify_duration: 1,
                    ..Default::default()
                },
                sizer: SizerConfig {
                    enabled: false,
                    ..Default::default()
                },
                stop: StopConditions {
                    stagnation_limit: 5,
                    max_generations: Some(100),
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let outcome = ctl.run(&mut NoYield);
        assert_eq!(outcome.reason, StopReason::Stagnation);
        assert_eq!(outcome.generations, 6);
    }

    #[test]
    fn scheduled_pruning_rescores_touched_genomes() {
        let mut rng = Prng::new(6);
        let core = MockCore::new(3, &mut rng);
        let mut ctl = GenerationController::new(
            core,
            |g: &mut Genome| g.connections.len() as f64,
            ControllerConfig {
                pruning: Some(PruningSchedule::new(1, 1, 1, 0.5)),
                stop: StopConditions {
                    max_generations: Some(1),
                    ..Default::default()
                },
                ..quiet()
            },
        );
        let report = ctl.run_generation();
        assert_eq!(report.pruned, 3 * 4);
        for g in ctl.core().population() {
            assert_eq!(g.connections.len(), 4);
            assert_eq!(g.score, Some(4.0));
            assert!((current_sparsity(g) - 0.5).abs() < 1e-12);
        }
        let snap = ctl.telemetry().last().unwrap();
        assert!((snap.mean_sparsity - 0.5).abs() < 1e-12);
    }

    #[test]
    fn evolution_pruning_ramp() {
        let p = EvolutionPruning {
            start_generation: 10,
            interval: 5,
            target_sparsity: 0.6,
            ramp_generations: 20,
            method: PruneMethod::Magnitude,
        };
        assert_eq!(p.target_at(9), None);
        assert!((p.target_at(10).unwrap() - 0.03).abs() < 1e-12);
        assert_eq!(p.target_at(12), None);
        assert!((p.target_at(30).unwrap() - 0.6).abs() < 1e-12);

        let now = EvolutionPruning {
            ramp_generations: 0,
            ..p
        };
        assert_eq!(now.target_at(10), Some(0.6));
    }

    #[test]
    fn simplify_phase_prunes_every_genome() {
        let mut rng = Prng::new(7);
        let core = MockCore::new(3, &mut rng);
        let mut ctl = GenerationController::new(
            core,
            |_: &mut Genome| 0.0,
            ControllerConfig {
                stagnation: StagnationConfig {
                    plateau_generations: 1,
                    simplify_duration: 3,
                    simplify_prune_fraction: 0.25,
                    ..Default::default()
                },
                sizer: SizerConfig {
                    enabled: false,
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        // Generation 1 records the first best; generation 2 plateaus and enters simplify.
        assert!(!ctl.run_generation().phase.unwrap().is_simplify());
        let r = ctl.run_generation();
        assert!(r.phase.unwrap().is_simplify());
        assert_eq!(r.pruned, 3 * 2);
        for g in ctl.core().population() {
            assert_eq!(g.enabled_count(), 6);
        }
    }

    #[test]
    fn collapse_triggers_recovery_once_and_escalates_pressure() {
        let mut rng = Prng::new(8);
        let mut core = MockCore::new(10, &mut rng);
        core.species = Some(1);
        let rate0 = core.opts.pressure.rate;
        let mut ctl = GenerationController::new(
            core,
            by_weight,
            ControllerConfig {
                stagnation: StagnationConfig {
                    species_history_len: 2,
                    collapse_trigger_streak: 2,
                    simplify_enabled: false,
                    ..Default::default()
                },
                sizer: SizerConfig {
                    enabled: false,
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        let recovered: Vec<bool> = (0..5).map(|_| ctl.run_generation().recovered).collect();
        assert_eq!(recovered, vec![false, false, true, false, false]);
        assert!(ctl.core().options().pressure.rate > rate0);
    }

    #[test]
    fn sizer_grows_population_and_scores_children() {
        let mut rng = Prng::new(9);
        let core = MockCore::new(10, &mut rng);
        let mut ctl = GenerationController::new(
            core,
            by_weight,
            ControllerConfig {
                sizer: SizerConfig {
                    interval: 2,
                    slack_threshold: 0.0,
                    max_popsize: 12,
                    expand_factor: 0.1,
                    ..Default::default()
                },
                stagnation: StagnationConfig {
                    simplify_enabled: false,
                    ..Default::default()
                },
                ..Default::default()
            },
        );
        assert_eq!(ctl.run_generation().added, 0);
        assert_eq!(ctl.run_generation().added, 1);
        let pop = ctl.core().population();
        assert_eq!(pop.len(), 11);
        assert!(pop[10].score.is_some());
        assert_eq!(ctl.core().options().popsize, 11);
    }

    #[test]
    fn malformed_genome_does_not_abort_generation() {
        let mut rng = Prng::new(10);
        let mut core = MockCore::new(3, &mut rng);
        core.pop[1].connections.push(Connection::new(0, 99, 1.0));
        let mut ctl = GenerationController::new(
            core,
            by_weight,
            ControllerConfig {
                pruning: Some(PruningSchedule::new(1, 1, 1, 0.5)),
                ..quiet()
            },
        );
        let r = ctl.run_generation();
        assert!(r.stop.is_none());
        assert_eq!(ctl.core().population()[1].connections.len(), 9);
        assert_eq!(ctl.core().population()[0].connections.len(), 4);
    }

    struct Nudge;

    impl Trainer for Nudge {
        fn train(&mut self, genome: &mut Genome, data: &[Sample], _: &TrainOptions) -> Result<TrainReport, TrainError> {
            if data.is_empty() {
                return Err(TrainError::EmptyDataset);
            }
            for c in &mut genome.connections {
                c.weight += 1.0;
            }
            Ok(TrainReport {
                error: 0.0,
                grad_norm: None,
            })
        }
    }

    fn refine_run(mode: RefinementMode) -> (Vec<Option<f64>>, Vec<f64>) {
        let mut rng = Prng::new(11);
        let core = MockCore::new(3, &mut rng);
        let before: Vec<f64> = core.pop.iter().map(|g| g.connections[0].weight).collect();
        let mut ctl = GenerationController::new(
            core,
            |g: &mut Genome| g.connections[0].weight,
            ControllerConfig {
                refinement: Some(RefinementConfig {
                    mode,
                    top_k: 1,
                    ..Default::default()
                }),
                ..quiet()
            },
        )
        .with_trainer(Box::new(Nudge), vec![Sample::new(vec![0.0; 4], vec![0.0; 2])]);
        ctl.run_generation();
        let pop = ctl.core().population();
        let deltas = pop
            .iter()
            .zip(&before)
            .map(|(g, b)| g.connections[0].weight - b)
            .collect();
        (pop.iter().map(|g| g.score).collect(), deltas)
    }

    #[test]
    fn baldwinian_keeps_weights_lamarckian_inherits_them() {
        let (scores, deltas) = refine_run(RefinementMode::Baldwinian);
        assert!(deltas.iter().all(|d| *d == 0.0));
        // The top genome (index 2) carries the trained copy's score.
        assert_eq!(scores[0], Some(0.0));
        assert!(scores[2].is_some());

        let (_, deltas) = refine_run(RefinementMode::Lamarckian);
        assert_eq!(&deltas[..2], &[0.0, 0.0]);
        assert!((deltas[2] - 1.0).abs() < 1e-12);
    }
}
