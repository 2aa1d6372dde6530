//! Capabilities the generation loop consumes but does not implement: the genetic
//! core, the local trainer, the fitness function and the host's yield hook.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::genome::{Genome, GenomeError, MutationOp};
use crate::recovery::MutationPressure;

/// Knobs the controller reads from (and, for pressure and size, writes back to) the genetic core.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CoreOptions {
    pub popsize: usize,
    pub elitism: usize,
    pub pressure: MutationPressure,
    /// Operator catalog offspring mutations are drawn from.
    pub mutation: Vec<MutationOp>,
}

impl Default for CoreOptions {
    fn default() -> Self {
        Self {
            popsize: 50,
            elitism: 2,
            pressure: MutationPressure::default(),
            mutation: MutationOp::ALL.to_vec(),
        }
    }
}

/// Selection, reproduction and speciation.
pub trait GeneticCore {
    /// Produce the next generation in place. Returns the fittest genome, or `None`
    /// when the core cannot continue.
    fn evolve(&mut self) -> Option<Genome>;

    fn population(&self) -> &[Genome];

    fn population_mut(&mut self) -> &mut Vec<Genome>;

    fn options(&self) -> &CoreOptions;

    fn options_mut(&mut self) -> &mut CoreOptions;
}

/// Scores a genome; higher is better. Takes `&mut` so activation can cache its plan.
pub trait FitnessEvaluator: Sync {
    fn evaluate(&self, genome: &mut Genome) -> f64;
}

impl<F> FitnessEvaluator for F
where
    F: Fn(&mut Genome) -> f64 + Sync,
{
    fn evaluate(&self, genome: &mut Genome) -> f64 {
        self(genome)
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Sample {
    pub input: Vec<f64>,
    pub output: Vec<f64>,
}

impl Sample {
    pub fn new(input: Vec<f64>, output: Vec<f64>) -> Self {
        Self { input, output }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum Cost {
    #[default]
    Mse,
    CrossEntropy,
}

impl Cost {
    pub fn eval(self, target: &[f64], output: &[f64]) -> f64 {
        let n = target.len().min(output.len());
        if n == 0 {
            return 0.0;
        }
        let sum: f64 = match self {
            Cost::Mse => target.iter().zip(output).map(|(t, o)| (t - o).powi(2)).sum(),
            Cost::CrossEntropy => target
                .iter()
                .zip(output)
                .map(|(t, o)| {
                    let o = o.clamp(1e-15, 1.0 - 1e-15);
                    -(t * o.ln() + (1.0 - t) * (1.0 - o).ln())
                })
                .sum(),
        };
        sum / n as f64
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TrainOptions {
    pub iterations: usize,
    /// Stop early once the mean cost drops below this.
    pub error: f64,
    pub rate: f64,
    pub momentum: f64,
    pub batch_size: usize,
    pub allow_recurrent: bool,
    pub cost: Cost,
}

impl Default for TrainOptions {
    fn default() -> Self {
        Self {
            iterations: 10,
            error: 1e-3,
            rate: 0.1,
            momentum: 0.0,
            batch_size: 1,
            allow_recurrent: false,
            cost: Cost::Mse,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainReport {
    pub error: f64,
    pub grad_norm: Option<f64>,
}

#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error("empty dataset")]
    EmptyDataset,
    #[error("sample shape mismatch: expected {expected} values, got {got}")]
    Shape { expected: usize, got: usize },
    #[error("training diverged")]
    Diverged,
    #[error(transparent)]
    Genome(#[from] GenomeError),
}

/// Local (non-evolutionary) weight training.
pub trait Trainer {
    fn train(
        &mut self,
        genome: &mut Genome,
        data: &[Sample],
        opts: &TrainOptions,
    ) -> Result<TrainReport, TrainError>;
}

/// Host-provided suspension point between generations.
pub trait Yielder {
    fn yield_now(&mut self);
}

impl<F: FnMut()> Yielder for F {
    fn yield_now(&mut self) {
        self()
    }
}

/// Never yields.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoYield;

impl Yielder for NoYield {
    fn yield_now(&mut self) {}
}

/// Why a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "snake_case"))]
pub enum StopReason {
    Cancelled,
    Aborted,
    Solved,
    Stagnation,
    MaxGenerations,
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StopReason::Cancelled => "cancelled",
            StopReason::Aborted => "aborted",
            StopReason::Solved => "solved",
            StopReason::Stagnation => "stagnation",
            StopReason::MaxGenerations => "maxGenerations",
        };
        f.write_str(s)
    }
}

const RUNNING: u8 = 0;
const CANCELLED: u8 = 1;
const ABORTED: u8 = 2;

/// Cooperative stop flag, polled once per generation boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicU8>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let _ = self
            .0
            .compare_exchange(RUNNING, CANCELLED, Ordering::AcqRel, Ordering::Acquire);
    }

    /// Abort wins over a pending cancel.
    pub fn abort(&self) {
        self.0.store(ABORTED, Ordering::Release);
    }

    pub fn state(&self) -> Option<StopReason> {
        match self.0.load(Ordering::Acquire) {
            CANCELLED => Some(StopReason::Cancelled),
            ABORTED => Some(StopReason::Aborted),
            _ => None,
        }
    }
}
