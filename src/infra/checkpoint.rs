// ============================================================
// Layer 6 - Checkpoint Store
// ============================================================
// One directory per named checkpoint:
//
//   checkpoints/
//     best/                                  ← overwritten on improvement
//       model.mpk                            ← network weights
//       optimizer.mpk                        ← AdamW moment buffers
//       checkpoint.json                      ← manifest (see below)
//     latest/                                ← overwritten every archive
//     emergency_model_20240611_093012_e7/    ← immutable archive
//     metrics.csv
//
// Writes go to a hidden staging directory first and are renamed
// into place, so a reader sees either the previous bundle or the
// complete new one. Hidden entries are never listed. The one
// exception on load: if a save was interrupted after the old bundle
// was retired to `.<name>.old-<stamp>` but before the new one took
// its place, the newest retired bundle is loaded instead.
//
// Loading checks the weight shapes against the manifest's model
// config; a mismatch is reported as corrupt, not left to panic in
// the first forward pass.
//
// Weights use NamedMpkFileRecorder with full precision settings:
// a reload reproduces the saved model's outputs bit for bit.

use std::{
    fs,
    path::{Path, PathBuf},
};

use burn::{
    module::{ModuleVisitor, ParamId},
    optim::Optimizer,
    prelude::*,
    record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder},
    tensor::backend::AutodiffBackend,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::data::scaler::FeatureScaler;
use crate::domain::error::ForecastError;
use crate::domain::observation::{EmergencyType, FeatureVector};
use crate::ml::early_stopping::EarlyStoppingState;
use crate::ml::model::{EmergencyPredictor, EmergencyPredictorConfig};
use crate::ml::precision::GradScalerState;
use crate::ml::scheduler::PlateauState;

pub const BEST: &str   = "best";
pub const LATEST: &str = "latest";

/// Bumped whenever the manifest layout changes incompatibly.
pub const FORMAT_VERSION: u32 = 1;

const MODEL_FILE: &str     = "model";
const OPTIMIZER_FILE: &str = "optimizer";
const MANIFEST_FILE: &str  = "checkpoint.json";

type BundleRecorder = NamedMpkFileRecorder<FullPrecisionSettings>;

/// Everything in a bundle that is not a tensor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointManifest {
    pub format_version:  u32,
    pub epoch:           usize,
    /// Validation loss of `epoch`.
    pub loss:            f64,
    pub timestamp:       DateTime<Utc>,
    pub model:           EmergencyPredictorConfig,
    pub sequence_length: usize,
    /// Output ordering of the type probabilities.
    pub emergency_types: Vec<EmergencyType>,
    pub scaler:          FeatureScaler,
    pub scheduler:       Option<PlateauState>,
    pub early_stopping:  Option<EarlyStoppingState>,
    pub grad_scaler:     Option<GradScalerState>,
    /// Last `sequence_length` unscaled feature rows seen in training.
    pub recent_context:  Vec<FeatureVector>,
}

impl CheckpointManifest {
    fn check(&self, name: &str) -> Result<(), ForecastError> {
        if self.format_version != FORMAT_VERSION {
            return Err(ForecastError::corrupt(
                name,
                format!("format version {} (expected {FORMAT_VERSION})", self.format_version),
            ));
        }
        if self.emergency_types != EmergencyType::ALL {
            return Err(ForecastError::corrupt(
                name,
                format!("type ordering {:?} does not match this build", self.emergency_types),
            ));
        }
        if self.sequence_length == 0 {
            return Err(ForecastError::corrupt(name, "sequence_length is 0"));
        }
        self.model.validate().map_err(|e| ForecastError::corrupt(name, e))
    }
}

/// A loaded bundle: manifest plus weights already placed in a network.
#[derive(Debug)]
pub struct Checkpoint<B: Backend> {
    pub name:     String,
    pub path:     PathBuf,
    pub manifest: CheckpointManifest,
    pub model:    EmergencyPredictor<B>,
}

/// One row of `list()`.
#[derive(Debug, Clone, Serialize)]
pub struct CheckpointSummary {
    pub name:      String,
    pub epoch:     usize,
    pub loss:      f64,
    pub timestamp: DateTime<Utc>,
}

pub struct CheckpointStore {
    dir:      PathBuf,
    recorder: BundleRecorder,
}

impl CheckpointStore {
    /// Open a checkpoint directory. Nothing is created until the
    /// first save, so read-only commands leave the filesystem alone.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), recorder: BundleRecorder::new() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_of(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Atomically write bundle `name`, replacing any previous one.
    pub fn save<B, O>(
        &self,
        name:     &str,
        model:    &EmergencyPredictor<B>,
        optim:    &O,
        manifest: &CheckpointManifest,
    ) -> Result<PathBuf, ForecastError>
    where
        B: AutodiffBackend,
        O: Optimizer<EmergencyPredictor<B>, B>,
    {
        check_name(name)?;
        let stamp   = Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let staging = self.dir.join(format!(".{name}.staging-{stamp}"));
        fs::create_dir_all(&staging)?;

        let written = self.write_bundle(&staging, model, optim, manifest);
        if let Err(e) = written {
            let _ = fs::remove_dir_all(&staging);
            return Err(e);
        }

        let target = self.path_of(name);
        let retired = self.dir.join(format!(".{name}.old-{stamp}"));
        let replaced = target.exists();
        if replaced {
            fs::rename(&target, &retired)?;
        }
        fs::rename(&staging, &target)?;
        if replaced {
            fs::remove_dir_all(&retired)?;
        }

        tracing::debug!("Saved checkpoint '{}' (epoch {})", name, manifest.epoch);
        Ok(target)
    }

    fn write_bundle<B, O>(
        &self,
        bundle:   &Path,
        model:    &EmergencyPredictor<B>,
        optim:    &O,
        manifest: &CheckpointManifest,
    ) -> Result<(), ForecastError>
    where
        B: AutodiffBackend,
        O: Optimizer<EmergencyPredictor<B>, B>,
    {
        model
            .clone()
            .save_file(bundle.join(MODEL_FILE), &self.recorder)
            .map_err(std::io::Error::other)?;
        Recorder::<B>::record(&self.recorder, optim.to_record(), bundle.join(OPTIMIZER_FILE))
            .map_err(std::io::Error::other)?;

        let json = serde_json::to_string_pretty(manifest).map_err(std::io::Error::other)?;
        fs::write(bundle.join(MANIFEST_FILE), json)?;
        Ok(())
    }

    /// Write the timestamped archive entry for `manifest.epoch` and
    /// overwrite "latest". Returns the archive path.
    pub fn archive<B, O>(
        &self,
        model:    &EmergencyPredictor<B>,
        optim:    &O,
        manifest: &CheckpointManifest,
    ) -> Result<PathBuf, ForecastError>
    where
        B: AutodiffBackend,
        O: Optimizer<EmergencyPredictor<B>, B>,
    {
        let base = format!(
            "emergency_model_{}_e{}",
            manifest.timestamp.format("%Y%m%d_%H%M%S"),
            manifest.epoch
        );
        // Archive entries are never overwritten.
        let mut name = base.clone();
        let mut n = 1;
        while self.path_of(&name).exists() {
            name = format!("{base}_{n}");
            n += 1;
        }

        let path = self.save(&name, model, optim, manifest)?;
        self.save(LATEST, model, optim, manifest)?;
        tracing::info!("Archived checkpoint '{}'", name);
        Ok(path)
    }

    /// Directory holding bundle `name`, falling back to the newest
    /// retired copy left by an interrupted save.
    fn resolve(&self, name: &str) -> Result<Option<PathBuf>, ForecastError> {
        check_name(name)?;
        let bundle = self.path_of(name);
        if bundle.is_dir() {
            return Ok(Some(bundle));
        }

        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let prefix = format!(".{name}.old-");
        let mut newest: Option<(i64, PathBuf)> = None;
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            let Some(stamp) = file_name.strip_prefix(&prefix).and_then(|s| s.parse::<i64>().ok()) else {
                continue;
            };
            if newest.as_ref().map_or(true, |(seen, _)| stamp > *seen) {
                newest = Some((stamp, entry.path()));
            }
        }

        if let Some((_, path)) = &newest {
            tracing::warn!("Checkpoint '{}' missing after an interrupted save; using '{}'", name, path.display());
        }
        Ok(newest.map(|(_, path)| path))
    }

    /// Read and verify only the manifest of bundle `name`.
    pub fn manifest(&self, name: &str) -> Result<Option<CheckpointManifest>, ForecastError> {
        let Some(bundle) = self.resolve(name)? else {
            return Ok(None);
        };
        self.read_manifest(name, &bundle).map(Some)
    }

    fn read_manifest(&self, name: &str, bundle: &Path) -> Result<CheckpointManifest, ForecastError> {
        let raw = fs::read_to_string(bundle.join(MANIFEST_FILE))
            .map_err(|e| ForecastError::corrupt(name, format!("manifest unreadable: {e}")))?;
        let manifest: CheckpointManifest = serde_json::from_str(&raw)
            .map_err(|e| ForecastError::corrupt(name, format!("manifest does not parse: {e}")))?;
        manifest.check(name)?;
        Ok(manifest)
    }

    /// Load bundle `name` into a freshly built network on `device`.
    ///
    /// `Ok(None)` when no such bundle exists; a bundle with a missing
    /// or unreadable component, or weights that do not fit the
    /// manifest's model config, is `CheckpointCorrupt`.
    pub fn load<B: Backend>(
        &self,
        name:   &str,
        device: &B::Device,
    ) -> Result<Option<Checkpoint<B>>, ForecastError> {
        let Some(bundle) = self.resolve(name)? else {
            return Ok(None);
        };
        let manifest = self.read_manifest(name, &bundle)?;
        for file in [MODEL_FILE, OPTIMIZER_FILE] {
            if !bundle.join(file).with_extension("mpk").is_file() {
                return Err(ForecastError::corrupt(name, format!("{file}.mpk is missing")));
            }
        }

        let fresh    = manifest.model.init::<B>(device);
        let expected = param_shapes(&fresh);
        let model = fresh
            .load_file(bundle.join(MODEL_FILE), &self.recorder, device)
            .map_err(|e| ForecastError::corrupt(name, format!("weights do not load: {e}")))?;

        let found = param_shapes(&model);
        if let Some(i) = (0..expected.len().max(found.len())).find(|&i| expected.get(i) != found.get(i)) {
            return Err(ForecastError::corrupt(
                name,
                format!(
                    "parameter {i} has shape {:?}, model config expects {:?}",
                    found.get(i),
                    expected.get(i)
                ),
            ));
        }

        tracing::info!("Loaded checkpoint '{}' (epoch {}, loss {:.4})", name, manifest.epoch, manifest.loss);
        Ok(Some(Checkpoint { name: name.to_string(), path: bundle, manifest, model }))
    }

    /// Restore optimizer state saved in bundle `name` into `optim`.
    pub fn load_optimizer<B, O>(
        &self,
        name:   &str,
        optim:  O,
        device: &B::Device,
    ) -> Result<O, ForecastError>
    where
        B: AutodiffBackend,
        O: Optimizer<EmergencyPredictor<B>, B>,
    {
        let bundle = self
            .resolve(name)?
            .ok_or_else(|| ForecastError::CheckpointAbsent(name.to_string()))?;
        let path = bundle.join(OPTIMIZER_FILE);
        let record = Recorder::<B>::load(&self.recorder, path, device)
            .map_err(|e| ForecastError::corrupt(name, format!("optimizer state does not load: {e}")))?;
        Ok(optim.load_record(record))
    }

    /// Every readable bundle, newest first.
    pub fn list(&self) -> Result<Vec<CheckpointSummary>, ForecastError> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name  = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with('.') || !entry.file_type()?.is_dir() {
                continue;
            }
            match self.manifest(&name) {
                Ok(Some(m)) => found.push(CheckpointSummary {
                    name,
                    epoch:     m.epoch,
                    loss:      m.loss,
                    timestamp: m.timestamp,
                }),
                Ok(None) => {}
                Err(e) => tracing::warn!("Skipping '{}': {}", name, e),
            }
        }
        found.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.name.cmp(&b.name)));
        Ok(found)
    }
}

/// Dims of every float parameter, in visiting order.
fn param_shapes<B: Backend>(model: &EmergencyPredictor<B>) -> Vec<Vec<usize>> {
    let mut shapes = ParamShapes(Vec::new());
    model.visit(&mut shapes);
    shapes.0
}

struct ParamShapes(Vec<Vec<usize>>);

impl<B: Backend> ModuleVisitor<B> for ParamShapes {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        self.0.push(tensor.dims().to_vec());
    }
}

fn check_name(name: &str) -> Result<(), ForecastError> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\']);
    if valid {
        Ok(())
    } else {
        Err(ForecastError::InvalidConfig(format!("'{name}' is not a valid checkpoint name")))
    }
}
