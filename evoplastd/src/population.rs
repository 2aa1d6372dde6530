//! Reference genetic core: tournament selection, elitism, catalog mutation and
//! compatibility-distance speciation.

use evoplast::collaborators::{CoreOptions, FitnessEvaluator, GeneticCore};
use evoplast::genome::{Genome, MutationOp};
use evoplast::order_stats::RankBuffers;
use evoplast::prng::Prng;
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PopulationConfig {
    pub inputs: usize,
    pub outputs: usize,
    pub init_amplitude: f64,
    pub tournament_size: usize,
    pub compatibility_threshold: f64,
    pub options: CoreOptions,
}

impl Default for PopulationConfig {
    fn default() -> Self {
        Self {
            inputs: 2,
            outputs: 1,
            init_amplitude: 1.0,
            tournament_size: 3,
            compatibility_threshold: 1.5,
            options: CoreOptions::default(),
        }
    }
}

/// Structural plus weight distance between two genomes, keyed on `(from, to)` edges.
pub fn compatibility(a: &Genome, b: &Genome) -> f64 {
    let edges: HashMap<(usize, usize), f64> = a
        .connections
        .iter()
        .filter(|c| c.enabled)
        .map(|c| ((c.from, c.to), c.weight))
        .collect();
    let mut shared = 0usize;
    let mut weight_diff = 0.0;
    let mut b_enabled = 0usize;
    for c in b.connections.iter().filter(|c| c.enabled) {
        b_enabled += 1;
        if let Some(w) = edges.get(&(c.from, c.to)) {
            shared += 1;
            weight_diff += (w - c.weight).abs();
        }
    }
    let disjoint = (edges.len() - shared) + (b_enabled - shared);
    let norm = edges.len().max(b_enabled).max(1) as f64;
    let mean_w = if shared == 0 { 0.0 } else { weight_diff / shared as f64 };
    let node_diff = a.nodes.len().abs_diff(b.nodes.len()) as f64;
    disjoint as f64 / norm + 0.4 * mean_w + 0.1 * node_diff
}

pub struct ReferenceCore<E> {
    cfg: PopulationConfig,
    evaluator: E,
    population: Vec<Genome>,
    representatives: Vec<(u32, Genome)>,
    next_species: u32,
    next_id: u64,
    rng: Prng,
    ranks: RankBuffers,
}

impl<E: FitnessEvaluator> ReferenceCore<E> {
    pub fn new(cfg: PopulationConfig, evaluator: E, seed: u64) -> Self {
        let mut rng = Prng::new(seed);
        let size = cfg.options.popsize.max(1);
        let population = (0..size as u64)
            .map(|id| Genome::dense(id, cfg.inputs, cfg.outputs, cfg.init_amplitude, &mut rng))
            .collect();
        Self {
            cfg,
            evaluator,
            population,
            representatives: Vec::new(),
            next_species: 0,
            next_id: size as u64,
            rng,
            ranks: RankBuffers::default(),
        }
    }

    pub fn species_count(&self) -> usize {
        self.representatives.len()
    }

    fn score_missing(&mut self) {
        for g in &mut self.population {
            if g.score.is_none() {
                g.score = Some(self.evaluator.evaluate(g));
            }
        }
    }

    fn speciate(&mut self) {
        let threshold = self.cfg.compatibility_threshold;
        let mut next_reps: Vec<(u32, Genome)> = Vec::new();
        for g in &mut self.population {
            let found = self
                .representatives
                .iter()
                .chain(next_reps.iter())
                .find(|(_, rep)| compatibility(rep, g) < threshold)
                .map(|(id, _)| *id);
            let id = match found {
                Some(id) => id,
                None => {
                    let id = self.next_species;
                    self.next_species += 1;
                    id
                }
            };
            g.species = Some(id);
            if !next_reps.iter().any(|(s, _)| *s == id) {
                next_reps.push((id, g.clone()));
            }
        }
        self.representatives = next_reps;
    }

    fn tournament(&mut self) -> usize {
        let n = self.population.len();
        let mut best = self.rng.gen_range_usize(0, n);
        for _ in 1..self.cfg.tournament_size.max(1) {
            let c = self.rng.gen_range_usize(0, n);
            let key = |i: usize| self.population[i].score.filter(|s| !s.is_nan()).unwrap_or(f64::NEG_INFINITY);
            if key(c) > key(best) {
                best = c;
            }
        }
        best
    }

    fn offspring(&mut self, parent: usize, opts: &CoreOptions) -> Genome {
        let mut child = self.population[parent].clone_with_id(self.next_id);
        self.next_id += 1;
        let catalog: &[MutationOp] = if opts.mutation.is_empty() {
            &MutationOp::ALL
        } else {
            &opts.mutation
        };
        if self.rng.chance(opts.pressure.rate) {
            let op = catalog[self.rng.gen_range_usize(0, catalog.len())];
            child.mutate(op, opts.pressure.amount, &mut self.rng);
        }
        if self.rng.chance(opts.pressure.novelty_blend) {
            let op = if self.rng.chance(0.5) { MutationOp::AddNode } else { MutationOp::AddConnection };
            child.mutate(op, opts.pressure.amount, &mut self.rng);
        }
        child
    }
}

impl<E: FitnessEvaluator> GeneticCore for ReferenceCore<E> {
    fn evolve(&mut self) -> Option<Genome> {
        if self.population.is_empty() {
            return None;
        }
        self.score_missing();

        let opts = self.cfg.options.clone();
        let target = opts.popsize.max(self.population.len()).max(1);
        let elites: Vec<usize> = self
            .ranks
            .rank_genomes(&self.population)
            .iter()
            .copied()
            .take(opts.elitism.min(target))
            .collect();

        let mut next: Vec<Genome> = elites.iter().map(|&i| self.population[i].clone()).collect();
        while next.len() < target {
            let parent = self.tournament();
            let child = self.offspring(parent, &opts);
            next.push(child);
        }
        self.population = next;
        self.score_missing();
        self.speciate();

        let top = *self.ranks.rank_genomes(&self.population).first()?;
        Some(self.population[top].clone())
    }

    fn population(&self) -> &[Genome] {
        &self.population
    }

    fn population_mut(&mut self) -> &mut Vec<Genome> {
        &mut self.population
    }

    fn options(&self) -> &CoreOptions {
        &self.cfg.options
    }

    fn options_mut(&mut self) -> &mut CoreOptions {
        &mut self.cfg.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn by_size(g: &mut Genome) -> f64 {
        g.enabled_count() as f64
    }

    fn core(popsize: usize) -> ReferenceCore<fn(&mut Genome) -> f64> {
        let cfg = PopulationConfig {
            options: CoreOptions {
                popsize,
                elitism: 2,
                ..Default::default()
            },
            ..Default::default()
        };
        ReferenceCore::new(cfg, by_size as fn(&mut Genome) -> f64, 11)
    }

    #[test]
    fn evolve_keeps_size_scores_everyone_and_assigns_species() {
        let mut c = core(12);
        let best = c.evolve().expect("non-empty population");
        assert_eq!(c.population().len(), 12);
        assert!(c.population().iter().all(|g| g.score.is_some() && g.species.is_some()));
        let max = c.population().iter().filter_map(|g| g.score).fold(f64::MIN, f64::max);
        assert_eq!(best.score, Some(max));
        assert!(c.species_count() >= 1);
    }

    #[test]
    fn elitism_never_loses_the_best_score() {
        let mut c = core(8);
        let mut best = f64::MIN;
        for _ in 0..10 {
            let top = c.evolve().and_then(|g| g.score).unwrap();
            assert!(top >= best);
            best = top;
        }
    }

    #[test]
    fn identical_genomes_are_compatible() {
        let mut rng = Prng::new(3);
        let a = Genome::dense(0, 3, 2, 1.0, &mut rng);
        let b = a.clone_with_id(1);
        assert_eq!(compatibility(&a, &b), 0.0);
        let empty = Genome::new(2, 3, 2);
        assert!(compatibility(&a, &empty) >= 1.0);
    }
}
