//! XOR task: dataset, fitness and a perturbation hill-climbing trainer.

use evoplast::collaborators::{FitnessEvaluator, Sample, TrainError, TrainOptions, TrainReport, Trainer};
use evoplast::genome::Genome;
use evoplast::prng::Prng;

pub fn dataset() -> Vec<Sample> {
    vec![
        Sample::new(vec![0.0, 0.0], vec![0.0]),
        Sample::new(vec![0.0, 1.0], vec![1.0]),
        Sample::new(vec![1.0, 0.0], vec![1.0]),
        Sample::new(vec![1.0, 1.0], vec![0.0]),
    ]
}

/// Mean cost of `genome` over `data` under `opts.cost`.
fn mean_cost(genome: &mut Genome, data: &[Sample], opts: &TrainOptions) -> f64 {
    let total: f64 = data
        .iter()
        .map(|s| {
            let out = genome.activate(&s.input);
            opts.cost.eval(&s.output, &out)
        })
        .sum();
    total / data.len().max(1) as f64
}

/// Negative mean squared error minus a small per-connection penalty.
#[derive(Debug, Clone)]
pub struct XorFitness {
    data: Vec<Sample>,
    pub complexity_penalty: f64,
}

impl Default for XorFitness {
    fn default() -> Self {
        Self {
            data: dataset(),
            complexity_penalty: 1e-3,
        }
    }
}

impl FitnessEvaluator for XorFitness {
    fn evaluate(&self, genome: &mut Genome) -> f64 {
        let mse = mean_cost(genome, &self.data, &TrainOptions::default());
        -mse - self.complexity_penalty * genome.enabled_count() as f64
    }
}

/// Random weight perturbation; keeps a step only when it lowers the cost.
#[derive(Debug, Clone)]
pub struct PerturbationTrainer {
    rng: Prng,
}

impl PerturbationTrainer {
    pub fn new(seed: u64) -> Self {
        Self { rng: Prng::new(seed) }
    }
}

impl Trainer for PerturbationTrainer {
    fn train(
        &mut self,
        genome: &mut Genome,
        data: &[Sample],
        opts: &TrainOptions,
    ) -> Result<TrainReport, TrainError> {
        let first = data.first().ok_or(TrainError::EmptyDataset)?;
        if first.input.len() != genome.input_count() {
            return Err(TrainError::Shape {
                expected: genome.input_count(),
                got: first.input.len(),
            });
        }
        genome.validate()?;
        if genome.connections.is_empty() {
            return Ok(TrainReport {
                error: mean_cost(genome, data, opts),
                grad_norm: None,
            });
        }

        let mut best = mean_cost(genome, data, opts);
        let mut velocity = vec![0.0; genome.connections.len()];
        for _ in 0..opts.iterations {
            if best <= opts.error {
                break;
            }
            let before: Vec<f64> = genome.connections.iter().map(|c| c.weight).collect();
            for (c, v) in genome.connections.iter_mut().zip(velocity.iter_mut()) {
                *v = opts.momentum * *v + self.rng.symmetric(opts.rate);
                c.weight += *v;
            }
            let cost = mean_cost(genome, data, opts);
            if !cost.is_finite() {
                return Err(TrainError::Diverged);
            }
            if cost < best {
                best = cost;
                for (c, w0) in genome.connections.iter_mut().zip(&before) {
                    c.total_delta_weight += c.weight - w0;
                    c.previous_delta_weight = c.weight - w0;
                }
            } else {
                for (c, w0) in genome.connections.iter_mut().zip(&before) {
                    c.weight = *w0;
                }
                velocity.iter_mut().for_each(|v| *v = 0.0);
            }
        }
        Ok(TrainReport {
            error: best,
            grad_norm: None,
        })
    }
}
