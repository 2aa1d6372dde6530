//! Plateau counting, simplify-phase scheduling and species-collapse detection.
//!
//! Two independent machines share this monitor:
//! - fitness: `Normal -> (plateau counting) -> Simplify(duration) -> Normal`
//! - species: `Watch -> Collapsed(streak) -> Recovered`; recovery fires on the
//!   generation the streak reaches the trigger, once per streak.

use std::collections::VecDeque;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::plasticity::PruneMethod;

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct StagnationConfig {
    /// Fitness must beat the previous best by more than this to count as improvement.
    pub improvement_threshold: f64,
    pub plateau_generations: u32,

    pub simplify_enabled: bool,
    pub simplify_duration: u32,
    /// Fraction of each genome's enabled connections pruned per simplify generation.
    pub simplify_prune_fraction: f64,
    pub simplify_method: PruneMethod,

    /// Length of the distinct-species history window.
    pub species_history_len: usize,
    /// Consecutive collapsed generations before recovery fires.
    pub collapse_trigger_streak: u32,
}

impl Default for StagnationConfig {
    fn default() -> Self {
        Self {
            improvement_threshold: 1e-9,
            plateau_generations: 20,
            simplify_enabled: true,
            simplify_duration: 10,
            simplify_prune_fraction: 0.05,
            simplify_method: PruneMethod::Magnitude,
            species_history_len: 10,
            collapse_trigger_streak: 5,
        }
    }
}

impl StagnationConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.plateau_generations == 0 {
            return Err("plateau_generations must be >= 1");
        }
        if !self.improvement_threshold.is_finite() || self.improvement_threshold < 0.0 {
            return Err("improvement_threshold must be finite and >= 0");
        }
        if !(0.0..=1.0).contains(&self.simplify_prune_fraction) {
            return Err("simplify_prune_fraction must be in [0, 1]");
        }
        if self.species_history_len == 0 {
            return Err("species_history_len must be >= 1");
        }
        if self.collapse_trigger_streak == 0 {
            return Err("collapse_trigger_streak must be >= 1");
        }
        Ok(())
    }

    /// Clamp soft ranges in place.
    pub fn clamped(mut self) -> Self {
        self.plateau_generations = self.plateau_generations.max(1);
        self.simplify_duration = self.simplify_duration.max(1);
        self.simplify_prune_fraction = if self.simplify_prune_fraction.is_nan() {
            0.0
        } else {
            self.simplify_prune_fraction.clamp(0.0, 1.0)
        };
        self.species_history_len = self.species_history_len.max(1);
        self.collapse_trigger_streak = self.collapse_trigger_streak.max(1);
        if !self.improvement_threshold.is_finite() || self.improvement_threshold < 0.0 {
            self.improvement_threshold = 0.0;
        }
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct StagnationState {
    pub plateau_counter: u32,
    /// Generations since the last improvement; unlike the plateau counter this is
    /// never reset by entering a simplify phase.
    pub since_improvement: u32,
    pub last_best_fitness: Option<f64>,
    pub simplify_mode: bool,
    pub simplify_remaining: u32,
    pub collapse_streak: u32,
    pub species_history: VecDeque<usize>,
}

/// What the fitness machine decided for the current generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseStep {
    Normal,
    /// Prune this generation. `entered` on the first simplify generation, `exiting` on the last.
    Simplify { entered: bool, exiting: bool },
}

impl PhaseStep {
    pub fn is_simplify(&self) -> bool {
        matches!(self, PhaseStep::Simplify { .. })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollapseStep {
    pub collapsed: bool,
    pub streak: u32,
    /// True exactly on the generation the streak reaches the trigger.
    pub trigger: bool,
}

#[derive(Debug, Clone)]
pub struct StagnationMonitor {
    cfg: StagnationConfig,
    state: StagnationState,
}

impl StagnationMonitor {
    pub fn new(cfg: StagnationConfig) -> Self {
        let cfg = cfg.clamped();
        let state = StagnationState {
            species_history: VecDeque::with_capacity(cfg.species_history_len),
            ..Default::default()
        };
        Self { cfg, state }
    }

    pub fn config(&self) -> &StagnationConfig {
        &self.cfg
    }

    pub fn state(&self) -> &StagnationState {
        &self.state
    }

    /// Plateau pressure in `[0, inf)`: `plateau_counter / plateau_generations`.
    pub fn plateau_ratio(&self) -> f64 {
        self.state.plateau_counter as f64 / self.cfg.plateau_generations as f64
    }

    /// Record this generation's best fitness. Returns whether it counted as improvement.
    pub fn observe_fitness(&mut self, fitness: f64) -> bool {
        let improved = match self.state.last_best_fitness {
            _ if fitness.is_nan() => false,
            None => true,
            Some(best) => fitness > best + self.cfg.improvement_threshold,
        };
        if improved {
            self.state.plateau_counter = 0;
            self.state.since_improvement = 0;
            self.state.last_best_fitness = Some(fitness);
        } else {
            self.state.plateau_counter = self.state.plateau_counter.saturating_add(1);
            self.state.since_improvement = self.state.since_improvement.saturating_add(1);
        }
        improved
    }

    /// Advance the simplify machine by one generation.
    pub fn step_phase(&mut self) -> PhaseStep {
        let mut entered = false;
        if !self.state.simplify_mode
            && self.cfg.simplify_enabled
            && self.state.plateau_counter >= self.cfg.plateau_generations
        {
            self.state.simplify_mode = true;
            self.state.simplify_remaining = self.cfg.simplify_duration;
            self.state.plateau_counter = 0;
            entered = true;
            tracing::info!(
                duration = self.cfg.simplify_duration,
                "plateau reached; entering simplify phase"
            );
        }

        if !self.state.simplify_mode {
            return PhaseStep::Normal;
        }

        self.state.simplify_remaining = self.state.simplify_remaining.saturating_sub(1);
        let exiting = self.state.simplify_remaining == 0;
        if exiting {
            self.state.simplify_mode = false;
            tracing::info!("simplify phase complete");
        }
        PhaseStep::Simplify { entered, exiting }
    }

    /// Record this generation's distinct species count.
    pub fn observe_species(&mut self, distinct: usize) -> CollapseStep {
        let cap = self.cfg.species_history_len;
        while self.state.species_history.len() >= cap {
            self.state.species_history.pop_front();
        }
        self.state.species_history.push_back(distinct);

        let collapsed = self.is_collapsed();
        if collapsed {
            self.state.collapse_streak = self.state.collapse_streak.saturating_add(1);
        } else {
            self.state.collapse_streak = 0;
        }
        CollapseStep {
            collapsed,
            streak: self.state.collapse_streak,
            trigger: collapsed && self.state.collapse_streak == self.cfg.collapse_trigger_streak,
        }
    }

    /// Full history window and every entry equals one.
    pub fn is_collapsed(&self) -> bool {
        let h = &self.state.species_history;
        h.len() == self.cfg.species_history_len && h.iter().all(|&c| c == 1)
    }
}
