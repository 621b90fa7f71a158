// ============================================================
// Layer 2 - ListCheckpointsUseCase
// ============================================================
use anyhow::{Context, Result};
use serde::Serialize;
use std::path::PathBuf;

use crate::infra::checkpoint::{CheckpointStore, CheckpointSummary};

pub struct ListCheckpointsUseCase {
    checkpoint_dir: String,
}

impl ListCheckpointsUseCase {
    pub fn new(checkpoint_dir: impl Into<String>) -> Self {
        Self { checkpoint_dir: checkpoint_dir.into() }
    }

    /// Every readable checkpoint, newest first.
    pub fn execute(&self) -> Result<Vec<ListedCheckpoint>> {
        let store = CheckpointStore::new(&self.checkpoint_dir);
        let checkpoints = store
            .list()
            .with_context(|| format!("Cannot list checkpoint directory '{}'", self.checkpoint_dir))?;
        Ok(checkpoints
            .into_iter()
            .map(|summary| ListedCheckpoint { path: store.path_of(&summary.name), summary })
            .collect())
    }
}

/// A listing row with the bundle's location on disk.
#[derive(Debug, Serialize)]
pub struct ListedCheckpoint {
    #[serde(flatten)]
    pub summary: CheckpointSummary,
    pub path:    PathBuf,
}
