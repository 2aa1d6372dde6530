//! Periodic best-effort run snapshots.
//!
//! Layout under `dir`: `checkpoint-<generation>.json` per write plus `latest.json`
//! mirroring the most recent one.

use std::path::PathBuf;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::genome::Genome;
use crate::telemetry::TelemetrySnapshot;

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct CheckpointConfig {
    /// No checkpoints are written when unset.
    pub dir: Option<PathBuf>,
    pub every: u64,
    pub top_k: usize,
    pub telemetry_tail: usize,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            dir: None,
            every: 25,
            top_k: 3,
            telemetry_tail: 32,
        }
    }
}

#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct TopEntry {
    pub idx: usize,
    pub score: Option<f64>,
    pub node_count: usize,
    pub connection_count: usize,
    #[cfg_attr(feature = "serde", serde(rename = "serializedGenome"))]
    pub genome: Genome,
}

impl TopEntry {
    pub fn new(idx: usize, genome: &Genome) -> Self {
        Self {
            idx,
            score: genome.score,
            node_count: genome.nodes.len(),
            connection_count: genome.connection_count(),
            genome: genome.clone(),
        }
    }
}

/// On-disk keys are camelCase (`bestFitness`, `telemetryTail`, ...).
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "camelCase"))]
pub struct Checkpoint {
    pub generation: u64,
    pub best_fitness: Option<f64>,
    pub simplify_mode: bool,
    pub plateau_counter: u32,
    /// Seconds since the Unix epoch.
    pub timestamp: u64,
    pub telemetry_tail: Vec<TelemetrySnapshot>,
    pub top: Vec<TopEntry>,
}

pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[derive(Debug, thiserror::Error)]
pub enum CheckpointError {
    #[error("checkpoint io: {0}")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "serde")]
    #[error("checkpoint json: {0}")]
    Json(#[from] serde_json::Error),
}

#[cfg(feature = "serde")]
impl Checkpoint {
    pub fn load(path: impl AsRef<std::path::Path>) -> Result<Self, CheckpointError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

#[derive(Debug, Clone)]
pub struct CheckpointWriter {
    cfg: CheckpointConfig,
}

impl CheckpointWriter {
    pub fn new(cfg: CheckpointConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.cfg
    }

    pub fn due(&self, generation: u64) -> bool {
        self.cfg.dir.is_some() && self.cfg.every > 0 && generation > 0 && generation % self.cfg.every == 0
    }

    /// Write `cp`; failures are logged and swallowed. Returns the per-generation path on success.
    #[cfg(feature = "serde")]
    pub fn write(&self, cp: &Checkpoint) -> Option<PathBuf> {
        match self.try_write(cp) {
            Ok(path) => {
                tracing::debug!(path = %path.display(), "checkpoint written");
                Some(path)
            }
            Err(e) => {
                tracing::warn!(generation = cp.generation, error = %e, "checkpoint write failed");
                None
            }
        }
    }

    #[cfg(feature = "serde")]
    fn try_write(&self, cp: &Checkpoint) -> Result<PathBuf, CheckpointError> {
        let Some(dir) = self.cfg.dir.as_ref() else {
            return Err(std::io::Error::new(std::io::ErrorKind::NotFound, "no checkpoint dir").into());
        };
        std::fs::create_dir_all(dir)?;
        let json = serde_json::to_vec_pretty(cp)?;
        let path = dir.join(format!("checkpoint-{}.json", cp.generation));
        std::fs::write(&path, &json)?;
        std::fs::write(dir.join("latest.json"), &json)?;
        Ok(path)
    }
}

#[cfg(all(test, feature = "serde"))]
mod tests {
    use super::*;
    use crate::prng::Prng;

    fn tmp_dir(tag: &str) -> PathBuf {
        std::env::temp_dir().join(format!("evoplast-ckpt-{tag}-{}", std::process::id()))
    }

    fn sample(generation: u64) -> Checkpoint {
        let mut rng = Prng::new(5);
        let mut g = Genome::dense(9, 2, 1, 1.0, &mut rng);
        g.score = Some(0.75);
        Checkpoint {
            generation,
            best_fitness: Some(0.75),
            simplify_mode: true,
            plateau_counter: 4,
            timestamp: unix_now(),
            telemetry_tail: vec![TelemetrySnapshot {
                generation,
                ..Default::default()
            }],
            top: vec![TopEntry::new(0, &g)],
        }
    }

    #[test]
    fn cadence() {
        let w = CheckpointWriter::new(CheckpointConfig {
            dir: Some(tmp_dir("cadence")),
            every: 5,
            ..Default::default()
        });
        assert!(!w.due(0));
        assert!(!w.due(3));
        assert!(w.due(10));
        assert!(!CheckpointWriter::new(CheckpointConfig::default()).due(25));
    }

    #[test]
    fn write_then_load() {
        let dir = tmp_dir("roundtrip");
        let w = CheckpointWriter::new(CheckpointConfig {
            dir: Some(dir.clone()),
            ..Default::default()
        });
        let path = w.write(&sample(50)).expect("write succeeds");
        let back = Checkpoint::load(&path).unwrap();
        assert_eq!(back.generation, 50);
        assert_eq!(back.top.len(), 1);
        assert_eq!(back.top[0].connection_count, 2);
        assert_eq!(back.top[0].genome.id, 9);
        assert!(back.simplify_mode);

        let latest = Checkpoint::load(dir.join("latest.json")).unwrap();
        assert_eq!(latest.generation, 50);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn json_keys_are_camel_case() {
        let json = serde_json::to_value(sample(7)).unwrap();
        for key in ["generation", "bestFitness", "simplifyMode", "plateauCounter", "timestamp", "telemetryTail", "top"] {
            assert!(json.get(key).is_some(), "missing {key}");
        }
        let top = &json["top"][0];
        for key in ["idx", "score", "nodeCount", "connectionCount", "serializedGenome"] {
            assert!(top.get(key).is_some(), "missing top.{key}");
        }
        assert!(json.get("best_fitness").is_none());
    }

    #[test]
    fn unwritable_dir_is_swallowed() {
        let file = tmp_dir("blocker");
        std::fs::write(&file, b"x").unwrap();
        let w = CheckpointWriter::new(CheckpointConfig {
            dir: Some(file.join("nested")),
            ..Default::default()
        });
        assert!(w.write(&sample(1)).is_none());
        let _ = std::fs::remove_file(file);
    }
}
