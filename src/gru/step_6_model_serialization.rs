// External imports
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use chrono::Utc;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

// Internal imports
use super::step_3_gru_model_arch::{GruClassifier, ModelConfig};
use crate::constants::CHECKPOINT_INDEX_FILE;
use crate::error::{TrainError, TrainResult};

type Recorder = BinFileRecorder<FullPrecisionSettings>;

/// # Checkpoint Metadata
///
/// Written next to every parameter snapshot so a checkpoint can be matched with
/// the architecture and the training step that produced it.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ModelMetadata {
    /// Crate version that wrote the checkpoint
    pub version: String,

    /// Unix timestamp when the checkpoint was saved
    pub timestamp: i64,

    /// Training step the parameters belong to
    pub step: usize,

    /// Architecture needed to rebuild the model
    pub model: ModelConfig,

    /// Human-readable description of the model
    pub description: String,
}

impl ModelMetadata {
    pub fn new(model: ModelConfig, step: usize) -> Self {
        Self {
            version: crate::build_info::PKG_VERSION.to_string(),
            timestamp: Utc::now().timestamp(),
            step,
            model,
            description: format!("{} intrusion detection classifier", model.head.name()),
        }
    }
}

/// Steps that currently have a snapshot on disk, oldest first
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
struct CheckpointIndex {
    model_name: String,
    steps: Vec<usize>,
}

/// Saves and restores classifier parameters keyed by training step.
///
/// Layout of the checkpoint directory:
///
/// ```text
/// {model_name}-{step}.bin        parameters
/// {model_name}-{step}.meta.json  metadata
/// checkpoint.json                retained steps, newest last
/// ```
///
/// At most `max_to_keep` snapshots are retained; older ones are deleted on save.
pub struct CheckpointManager {
    dir: PathBuf,
    model_name: String,
    max_to_keep: usize,
}

impl CheckpointManager {
    /// Opens (and creates if needed) a checkpoint directory
    pub fn new(dir: impl Into<PathBuf>, model_name: &str, max_to_keep: usize) -> TrainResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| TrainError::io(&dir, e))?;

        Ok(Self {
            dir,
            model_name: model_name.to_string(),
            max_to_keep: max_to_keep.max(1),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Base path (without extension) of the snapshot for `step`
    pub fn checkpoint_path(&self, step: usize) -> PathBuf {
        self.dir.join(format!("{}-{}", self.model_name, step))
    }

    /// Writes a snapshot of `model` tagged by `step`
    pub fn save<B: Backend>(&self, model: &GruClassifier<B>, step: usize) -> TrainResult<PathBuf> {
        let path = self.checkpoint_path(step);

        model
            .clone()
            .save_file::<Recorder, _>(path.clone(), &Recorder::new())?;

        let metadata = ModelMetadata::new(model.config(), step);
        let metadata_path = path.with_extension("meta.json");
        let metadata_json = serde_json::to_string_pretty(&metadata).map_err(|source| TrainError::Json {
            what: "checkpoint metadata",
            source,
        })?;
        fs::write(&metadata_path, metadata_json).map_err(|e| TrainError::io(&metadata_path, e))?;

        let mut index = self.read_index()?;
        index.model_name = self.model_name.clone();
        index.steps.retain(|&s| s != step);
        index.steps.push(step);
        index.steps.sort_unstable();

        while index.steps.len() > self.max_to_keep {
            let oldest = index.steps.remove(0);
            self.remove_snapshot(oldest)?;
        }
        self.write_index(&index)?;

        debug!("Saved checkpoint: {} at step {}", path.display(), step);
        Ok(path)
    }

    /// Restores the newest snapshot into `model`
    ///
    /// `model` only provides the architecture; its parameters are replaced.
    /// Returns `None` when the directory has no snapshot yet.
    pub fn load_latest<B: Backend>(
        &self,
        model: GruClassifier<B>,
        device: &B::Device,
    ) -> TrainResult<Option<(GruClassifier<B>, usize)>> {
        let step = match self.latest_step()? {
            Some(step) => step,
            None => return Ok(None),
        };

        let path = self.checkpoint_path(step);
        info!("Restoring checkpoint {} (step {})", path.display(), step);
        let model = model.load_file::<Recorder, _>(path, &Recorder::new(), device)?;

        Ok(Some((model, step)))
    }

    /// Metadata of the snapshot at `step`
    pub fn metadata(&self, step: usize) -> TrainResult<ModelMetadata> {
        let path = self.checkpoint_path(step).with_extension("meta.json");
        let json = fs::read_to_string(&path).map_err(|e| TrainError::io(&path, e))?;
        serde_json::from_str(&json).map_err(|source| TrainError::Json {
            what: "checkpoint metadata",
            source,
        })
    }

    /// Step of the newest retained snapshot
    pub fn latest_step(&self) -> TrainResult<Option<usize>> {
        Ok(self.read_index()?.steps.last().copied())
    }

    /// Steps of all retained snapshots, oldest first
    pub fn retained_steps(&self) -> TrainResult<Vec<usize>> {
        Ok(self.read_index()?.steps)
    }

    fn index_path(&self) -> PathBuf {
        self.dir.join(CHECKPOINT_INDEX_FILE)
    }

    fn read_index(&self) -> TrainResult<CheckpointIndex> {
        let path = self.index_path();
        match fs::read_to_string(&path) {
            Ok(json) => serde_json::from_str(&json).map_err(|source| TrainError::Json {
                what: "checkpoint index",
                source,
            }),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(CheckpointIndex::default()),
            Err(e) => Err(TrainError::io(&path, e)),
        }
    }

    fn write_index(&self, index: &CheckpointIndex) -> TrainResult<()> {
        let path = self.index_path();
        let json = serde_json::to_string_pretty(index).map_err(|source| TrainError::Json {
            what: "checkpoint index",
            source,
        })?;
        fs::write(&path, json).map_err(|e| TrainError::io(&path, e))
    }

    fn remove_snapshot(&self, step: usize) -> TrainResult<()> {
        let base = self.checkpoint_path(step);
        for path in [base.with_extension("bin"), base.with_extension("meta.json")] {
            match fs::remove_file(&path) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => return Err(TrainError::io(&path, e)),
            }
        }
        debug!("Removed checkpoint for step {}", step);
        Ok(())
    }
}
