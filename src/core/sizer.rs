//! Plateau-driven population growth.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::genome::{Genome, MutationOp};
use crate::order_stats::RankBuffers;
use crate::prng::Prng;

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct SizerConfig {
    pub enabled: bool,
    /// Generations between expansion checks.
    pub interval: u64,
    /// Minimum `plateau_counter / plateau_generations` before growth is considered.
    pub slack_threshold: f64,
    pub max_popsize: usize,
    pub expand_factor: f64,
    /// Top share of the ranked population used as parents.
    pub parent_fraction: f64,
}

impl Default for SizerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval: 10,
            slack_threshold: 0.5,
            max_popsize: 256,
            expand_factor: 0.1,
            parent_fraction: 0.25,
        }
    }
}

impl SizerConfig {
    pub fn validate(&self) -> Result<(), &'static str> {
        if self.interval == 0 {
            return Err("interval must be >= 1");
        }
        if !self.expand_factor.is_finite() || self.expand_factor < 0.0 {
            return Err("expand_factor must be finite and >= 0");
        }
        if self.parent_fraction.is_nan() || self.parent_fraction <= 0.0 || self.parent_fraction > 1.0 {
            return Err("parent_fraction must be in (0, 1]");
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DynamicPopulationSizer {
    cfg: SizerConfig,
    pool: Vec<usize>,
    op_pool: Vec<usize>,
    picked: Vec<usize>,
}

impl DynamicPopulationSizer {
    pub fn new(mut cfg: SizerConfig) -> Self {
        cfg.interval = cfg.interval.max(1);
        if cfg.parent_fraction.is_nan() || cfg.parent_fraction <= 0.0 {
            cfg.parent_fraction = 0.25;
        }
        cfg.parent_fraction = cfg.parent_fraction.min(1.0);
        if !cfg.expand_factor.is_finite() || cfg.expand_factor < 0.0 {
            cfg.expand_factor = 0.0;
        }
        Self {
            cfg,
            pool: Vec::new(),
            op_pool: Vec::with_capacity(MutationOp::ALL.len()),
            picked: Vec::with_capacity(2),
        }
    }

    pub fn config(&self) -> &SizerConfig {
        &self.cfg
    }

    pub fn should_expand(&self, generation: u64, plateau_ratio: f64, size: usize) -> bool {
        self.cfg.enabled
            && generation > 0
            && generation % self.cfg.interval == 0
            && plateau_ratio >= self.cfg.slack_threshold
            && size < self.cfg.max_popsize
    }

    /// Number of children an expansion would add to a population of `size`.
    pub fn target_add(&self, size: usize) -> usize {
        let room = self.cfg.max_popsize.saturating_sub(size);
        if room == 0 {
            return 0;
        }
        let want = (size as f64 * self.cfg.expand_factor).floor() as usize;
        want.clamp(1, room)
    }

    /// Append mutated clones of top-ranked parents. Returns how many were added;
    /// new genomes occupy the tail of `population` and carry no score.
    pub fn expand(
        &mut self,
        population: &mut Vec<Genome>,
        ranks: &mut RankBuffers,
        catalog: &[MutationOp],
        amount: f64,
        rng: &mut Prng,
    ) -> usize {
        if population.is_empty() {
            return 0;
        }
        let add = self.target_add(population.len());
        if add == 0 {
            return 0;
        }
        let catalog = if catalog.is_empty() { &MutationOp::ALL[..] } else { catalog };

        let ranked = ranks.rank_genomes(population);
        let parents = ((population.len() as f64 * self.cfg.parent_fraction).floor() as usize)
            .clamp(1, population.len());
        self.pool.clear();
        self.pool.extend_from_slice(&ranked[..parents]);

        let mut next_id = population.iter().map(|g| g.id).max().unwrap_or(0) + 1;
        population.reserve(add);
        for _ in 0..add {
            let parent = self.pool[rng.gen_range_usize(0, self.pool.len())];
            let mut child = population[parent].clone_with_id(next_id);
            next_id += 1;

            let n_ops = if catalog.len() >= 2 && rng.chance(0.5) { 2 } else { 1 };
            self.op_pool.clear();
            self.op_pool.extend(0..catalog.len());
            rng.sample_into(&mut self.op_pool, n_ops, &mut self.picked);
            for &op in &self.picked {
                child.mutate(catalog[op], amount, rng);
            }
            population.push(child);
        }

        tracing::info!(added = add, size = population.len(), "population expanded");
        add
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scored_population(n: usize, rng: &mut Prng) -> Vec<Genome> {
        (0..n)
            .map(|i| {
                let mut g = Genome::dense(i as u64 * 3, 2, 1, 1.0, rng);
                g.score = Some(i as f64);
                g
            })
            .collect()
    }

    #[test]
    fn trigger_needs_interval_slack_and_room() {
        let s = DynamicPopulationSizer::new(SizerConfig {
            interval: 5,
            slack_threshold: 0.5,
            max_popsize: 10,
            ..Default::default()
        });
        assert!(s.should_expand(10, 0.5, 8));
        assert!(!s.should_expand(11, 0.9, 8));
        assert!(!s.should_expand(10, 0.4, 8));
        assert!(!s.should_expand(10, 0.9, 10));
        assert!(!s.should_expand(0, 0.9, 1));
    }

    #[test]
    fn target_add_is_clamped() {
        let s = DynamicPopulationSizer::new(SizerConfig {
            max_popsize: 50,
            expand_factor: 0.1,
            ..Default::default()
        });
        assert_eq!(s.target_add(5), 1);
        assert_eq!(s.target_add(40), 4);
        assert_eq!(s.target_add(49), 1);
        assert_eq!(s.target_add(50), 0);

        let s = DynamicPopulationSizer::new(SizerConfig {
            max_popsize: 50,
            expand_factor: 2.0,
            ..Default::default()
        });
        assert_eq!(s.target_add(30), 20);
    }

    #[test]
    fn children_descend_from_top_parents_with_fresh_ids() {
        let mut rng = Prng::new(12);
        let mut pop = scored_population(20, &mut rng);
        let mut s = DynamicPopulationSizer::new(SizerConfig {
            max_popsize: 30,
            expand_factor: 0.5,
            parent_fraction: 0.2,
            ..Default::default()
        });
        let mut ranks = RankBuffers::default();
        let added = s.expand(&mut pop, &mut ranks, &[MutationOp::ModWeight, MutationOp::ModBias], 0.5, &mut rng);
        assert_eq!(added, 10);
        assert_eq!(pop.len(), 30);

        let top_ids: Vec<u64> = pop[16..20].iter().map(|g| g.id).collect();
        let mut ids: Vec<u64> = pop.iter().map(|g| g.id).collect();
        for child in &pop[20..] {
            assert!(child.score.is_none());
            assert_eq!(child.lineage.parents.len(), 1);
            assert!(top_ids.contains(&child.lineage.parents[0]));
            assert!(child.validate().is_ok());
        }
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), 30);
    }

    #[test]
    fn empty_population_is_left_alone() {
        let mut rng = Prng::new(1);
        let mut pop = Vec::new();
        let mut s = DynamicPopulationSizer::new(SizerConfig::default());
        let mut ranks = RankBuffers::default();
        assert_eq!(s.expand(&mut pop, &mut ranks, &[], 1.0, &mut rng), 0);
    }
}
