//! Evoplast Daemon - background evolutionary training run
//!
//! Loads (or creates) a run configuration, evolves a population on the XOR task
//! under structural plasticity, checkpoints periodically and exports telemetry
//! when the run ends. Ctrl-C stops the run at the next generation boundary.
//!
//! Storage locations:
//! - Linux: ~/.local/share/evoplast/
//! - Windows: %APPDATA%\evoplast\
//! - MacOS: ~/Library/Application Support/evoplast/

use std::fs;

use evoplast::checkpoint::Checkpoint;
use evoplast::controller::{ControllerConfig, EvolutionPruning, GenerationController, RefinementConfig};
use evoplast::telemetry::{self, TelemetrySnapshot};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

mod paths;
mod population;
mod xor;

use paths::AppPaths;
use population::{PopulationConfig, ReferenceCore};
use xor::{PerturbationTrainer, XorFitness};

#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("could not determine data directory")]
    NoDataDir,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Config(&'static str),
    #[error("training task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
struct DaemonConfig {
    population: PopulationConfig,
    controller: ControllerConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        let mut controller = ControllerConfig::default();
        controller.stats.probe_inputs = xor::dataset().into_iter().map(|s| s.input).collect();
        controller.stop.target_fitness = Some(-0.02);
        controller.refinement = Some(RefinementConfig::default());
        controller.evolution_pruning = Some(EvolutionPruning {
            target_sparsity: 0.3,
            ..Default::default()
        });
        Self {
            population: PopulationConfig::default(),
            controller,
        }
    }
}

impl DaemonConfig {
    /// Read `config.json`, writing the defaults first when it does not exist.
    fn load_or_init(paths: &AppPaths) -> Result<Self, DaemonError> {
        let path = paths.config_file();
        if !path.exists() {
            let cfg = Self::default();
            fs::write(&path, serde_json::to_string_pretty(&cfg)?)?;
            info!("Wrote default config to {:?}", path);
            return Ok(cfg);
        }
        let cfg: Self = serde_json::from_slice(&fs::read(&path)?)?;
        Ok(cfg)
    }
}

fn report_previous_run(paths: &AppPaths) {
    let latest = paths.latest_checkpoint();
    if !latest.exists() {
        return;
    }
    match Checkpoint::load(&latest) {
        Ok(cp) => info!(
            generation = cp.generation,
            best = ?cp.best_fitness,
            "previous run checkpoint found"
        ),
        Err(e) => warn!("Could not read {:?}: {}", latest, e),
    }
}

#[tokio::main]
async fn main() -> Result<(), DaemonError> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let paths = AppPaths::new()?;
    info!("Data directory: {:?}", paths.data_dir());

    let mut cfg = DaemonConfig::load_or_init(&paths)?;
    if cfg.controller.checkpoint.dir.is_none() {
        cfg.controller.checkpoint.dir = Some(paths.checkpoint_dir());
    }
    cfg.controller.validate().map_err(DaemonError::Config)?;
    report_previous_run(&paths);

    let seed = cfg.controller.seed;
    let core = ReferenceCore::new(cfg.population.clone(), XorFitness::default(), seed);
    let controller = GenerationController::new(core, XorFitness::default(), cfg.controller.clone())
        .with_trainer(Box::new(PerturbationTrainer::new(seed ^ 0x9e37)), xor::dataset());
    let token = controller.cancel_token();

    {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("Ctrl-C: stopping after the current generation");
                token.cancel();
            }
        });
    }

    let run = tokio::task::spawn_blocking(move || {
        let mut controller = controller;
        let outcome = controller.run(&mut std::thread::yield_now);
        let records: Vec<TelemetrySnapshot> = controller.telemetry().iter().cloned().collect();
        (outcome, records)
    });
    let (outcome, records) = run.await?;

    info!(
        reason = %outcome.reason,
        generations = outcome.generations,
        best = ?outcome.best_fitness,
        "run complete"
    );
    if let Some(best) = &outcome.best {
        info!(
            nodes = best.nodes.len(),
            connections = best.enabled_count(),
            "best genome"
        );
    }

    match telemetry::to_csv(&records) {
        Ok(csv) => {
            let path = paths.telemetry_file();
            if let Err(e) = fs::write(&path, csv) {
                error!("Failed to write {:?}: {}", path, e);
            } else {
                info!("Telemetry written to {:?}", path);
            }
        }
        Err(e) => error!("Telemetry export failed: {}", e),
    }

    Ok(())
}
