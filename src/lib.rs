//! # evoplast
//!
//! Evolutionary training control loop with structural plasticity.
//!
//! A [`controller::GenerationController`] drives an external genetic core one
//! generation at a time and layers on top of it: scheduled and sparsity-targeted
//! pruning with constrained regrowth, streaming decision statistics, plateau
//! detection with a bounded simplify phase, species-collapse recovery and
//! plateau-driven population growth.
//!
//! ## Quick Start
//!
//! ```
//! use evoplast::prelude::*;
//!
//! struct Fixed(Vec<Genome>, CoreOptions);
//!
//! impl GeneticCore for Fixed {
//!     fn evolve(&mut self) -> Option<Genome> { self.0.first().cloned() }
//!     fn population(&self) -> &[Genome] { &self.0 }
//!     fn population_mut(&mut self) -> &mut Vec<Genome> { &mut self.0 }
//!     fn options(&self) -> &CoreOptions { &self.1 }
//!     fn options_mut(&mut self) -> &mut CoreOptions { &mut self.1 }
//! }
//!
//! let mut rng = Prng::new(7);
//! let pop = (0..8).map(|i| Genome::dense(i, 2, 1, 1.0, &mut rng)).collect();
//! let cfg = ControllerConfig {
//!     pruning: Some(PruningSchedule::new(1, 20, 5, 0.5)),
//!     stop: StopConditions { max_generations: Some(20), ..Default::default() },
//!     ..Default::default()
//! };
//! let fitness = |g: &mut Genome| -g.activate(&[1.0, 0.0])[0];
//! let mut ctl = GenerationController::new(Fixed(pop, CoreOptions::default()), fitness, cfg);
//! let outcome = ctl.run(&mut NoYield);
//! assert_eq!(outcome.reason, StopReason::MaxGenerations);
//! ```
//!
//! ## Feature Flags
//!
//! - `serde` (default): serialization, checkpoints and the CSV exporter
//! - `parallel`: fitness evaluation across threads via rayon
//!
//! ## Modules
//!
//! - [`genome`]: genomes, connections, activation and mutation operators
//! - [`plasticity`]: pruning schedules, saliency ranking and regrowth
//! - [`streaming_stats`]: online moments and entropy over recent decisions
//! - [`stagnation`]: plateau, simplify and species-collapse state machines
//! - [`controller`]: the generation loop

#[path = "core/prng.rs"]
pub mod prng;

#[path = "core/genome.rs"]
pub mod genome;

#[path = "core/order_stats.rs"]
pub mod order_stats;

#[path = "core/plasticity.rs"]
pub mod plasticity;

#[path = "core/streaming_stats.rs"]
pub mod streaming_stats;

#[path = "core/stagnation.rs"]
pub mod stagnation;

#[path = "core/recovery.rs"]
pub mod recovery;

#[path = "core/sizer.rs"]
pub mod sizer;

#[path = "core/telemetry.rs"]
pub mod telemetry;

#[path = "core/checkpoint.rs"]
pub mod checkpoint;

#[path = "core/collaborators.rs"]
pub mod collaborators;

#[path = "core/controller.rs"]
pub mod controller;

/// Prelude module for convenient imports.
///
/// ```
/// use evoplast::prelude::*;
/// ```
pub mod prelude {
    pub use crate::checkpoint::{Checkpoint, CheckpointConfig, CheckpointWriter};
    pub use crate::collaborators::{
        CancelToken, CoreOptions, Cost, FitnessEvaluator, GeneticCore, NoYield, Sample, StopReason,
        TrainError, TrainOptions, TrainReport, Trainer, Yielder,
    };
    pub use crate::controller::{
        ControllerConfig, EvolutionPruning, GenerationController, GenerationReport, RefinementConfig,
        RefinementMode, RunOutcome, StopConditions,
    };
    pub use crate::genome::{Activation, Connection, Genome, GenomeError, MutationOp, Node, NodeRole};
    pub use crate::plasticity::{current_sparsity, PlasticityEngine, PruneMethod, PruningSchedule};
    pub use crate::prng::Prng;
    pub use crate::recovery::{MutationPressure, RecoveryConfig};
    pub use crate::sizer::SizerConfig;
    pub use crate::stagnation::StagnationConfig;
    pub use crate::streaming_stats::{DecisionStats, StatsConfig, StatsMode};
    pub use crate::telemetry::TelemetrySnapshot;
}
