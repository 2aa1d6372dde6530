//! Cross-platform application paths

use std::fs;
use std::path::{Path, PathBuf};

use crate::DaemonError;

#[derive(Debug, Clone)]
pub struct AppPaths {
    data_dir: PathBuf,
}

impl AppPaths {
    pub fn new() -> Result<Self, DaemonError> {
        let base = dirs::data_dir().ok_or(DaemonError::NoDataDir)?;
        Self::at(base.join("evoplast"))
    }

    /// Use an explicit root instead of the platform data directory.
    pub fn at(data_dir: PathBuf) -> Result<Self, DaemonError> {
        fs::create_dir_all(&data_dir)?;
        Ok(Self { data_dir })
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn config_file(&self) -> PathBuf {
        self.data_dir.join("config.json")
    }

    pub fn checkpoint_dir(&self) -> PathBuf {
        self.data_dir.join("checkpoints")
    }

    pub fn latest_checkpoint(&self) -> PathBuf {
        self.checkpoint_dir().join("latest.json")
    }

    pub fn telemetry_file(&self) -> PathBuf {
        self.data_dir.join("telemetry.csv")
    }
}
