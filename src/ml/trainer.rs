// ============================================================
// Layer 5 - Training Loop
// ============================================================
// Train + validation loop using Burn's DataLoader and AdamW.
//
// Per epoch:
//   1. every training batch: forward, BCE loss, scaled backward,
//      unscale, AdamW step (skipped on gradient overflow)
//   2. validation on model.valid() - the inner backend, so no
//      autodiff graph and dropout is inactive
//   3. plateau scheduler and early stopping see the val loss
//   4. improvement → "best" checkpoint
//      every checkpoint_interval epochs and at the end
//      → timestamped archive + "latest"
//
// A batch whose loss is NaN/inf is dropped from the running mean
// with a warning. More than `max_bad_batches` in a row, an epoch
// with no finite batch at all, a non-finite validation loss or a
// failed checkpoint/metrics write fails the run; the error names
// the last checkpoint that was written successfully.
//
// AdamW (decoupled weight decay):
//   m = β1*m + (1-β1)*g
//   v = β2*v + (1-β2)*g²
//   θ = θ - lr * (m / (√v + ε) + wd * θ)

use std::path::PathBuf;

use burn::{
    data::dataloader::{DataLoader, DataLoaderBuilder},
    module::AutodiffModule,
    optim::{AdamWConfig, GradientsParams, Optimizer},
    prelude::*,
    tensor::{backend::AutodiffBackend, ElementConversion},
};
use chrono::Utc;

use crate::application::train_use_case::TrainConfig;
use crate::data::{
    batcher::{WindowBatch, WindowBatcher},
    dataset::{WindowDataset, WindowSample},
    scaler::FeatureScaler,
};
use crate::domain::error::ForecastError;
use crate::domain::history::{EpochLoss, StopReason, TrainingHistory};
use crate::domain::observation::{EmergencyType, FeatureVector};
use crate::infra::checkpoint::{CheckpointManifest, CheckpointStore, BEST, FORMAT_VERSION};
use crate::infra::metrics::MetricsLogger;
use crate::ml::early_stopping::{EarlyStopping, EpochVerdict};
use crate::ml::model::EmergencyPredictor;
use crate::ml::precision::GradScaler;
use crate::ml::scheduler::PlateauScheduler;

/// Windows and preprocessing state for one run.
pub struct TrainingData {
    pub train:           Vec<WindowSample>,
    pub valid:           Vec<WindowSample>,
    pub scaler:          FeatureScaler,
    pub sequence_length: usize,
    pub recent_context:  Vec<FeatureVector>,
}

/// What a finished run hands back.
pub struct TrainingOutcome<B: AutodiffBackend> {
    pub history: TrainingHistory,
    /// Weights of the best epoch on the inference backend.
    pub model:   EmergencyPredictor<B::InnerBackend>,
    /// Epoch `model` comes from.
    pub epoch:   Option<usize>,
}

pub fn run_training<B: AutodiffBackend>(
    cfg:    &TrainConfig,
    data:   TrainingData,
    store:  &CheckpointStore,
    device: &B::Device,
) -> Result<TrainingOutcome<B>, ForecastError> {
    let mut model_cfg = cfg.model_config();
    model_cfg.validate()?;

    let mut model: EmergencyPredictor<B> = model_cfg.init(device);
    let mut optim = AdamWConfig::new()
        .with_weight_decay(cfg.weight_decay as f32)
        .init::<B, EmergencyPredictor<B>>();

    let mut scheduler = PlateauScheduler::new(
        cfg.learning_rate,
        cfg.scheduler_factor,
        cfg.scheduler_patience,
        cfg.min_learning_rate,
    );
    let mut early       = EarlyStopping::new(cfg.early_stopping_patience, cfg.max_epochs);
    let mut grad_scaler = GradScaler::new(cfg.precision);
    let mut start_epoch = 1;
    let mut last_checkpoint: Option<PathBuf> = None;

    // ── Resume ────────────────────────────────────────────────────────────────
    if let Some(name) = &cfg.resume_from {
        let checkpoint = store
            .load::<B>(name, device)?
            .ok_or_else(|| ForecastError::CheckpointAbsent(name.clone()))?;
        let manifest = checkpoint.manifest;
        last_checkpoint = Some(checkpoint.path);
        if manifest.sequence_length != data.sequence_length {
            return Err(ForecastError::InvalidConfig(format!(
                "checkpoint '{name}' was trained with sequence_length {}, not {}",
                manifest.sequence_length, data.sequence_length
            )));
        }

        model     = checkpoint.model;
        model_cfg = manifest.model;
        optim     = store.load_optimizer::<B, _>(name, optim, device)?;
        if let Some(state) = manifest.scheduler {
            scheduler.restore(state);
        }
        if let Some(state) = manifest.early_stopping {
            early.restore(state);
        }
        if let Some(state) = &manifest.grad_scaler {
            grad_scaler.restore(state);
        }
        start_epoch = manifest.epoch + 1;
        tracing::info!("Resuming from '{}' at epoch {}", name, start_epoch);
    }

    tracing::info!(
        "Model ready: {} BiLSTM layers, hidden={}, {} train / {} validation windows, precision={:?}, loss_scaling={}",
        model_cfg.num_layers,
        model_cfg.d_hidden,
        data.train.len(),
        data.valid.len(),
        cfg.precision,
        grad_scaler.is_enabled()
    );

    // ── Data loaders ──────────────────────────────────────────────────────────
    let train_loader = DataLoaderBuilder::new(WindowBatcher::<B>::new(device.clone()))
        .batch_size(cfg.batch_size)
        .shuffle(cfg.seed)
        .build(WindowDataset::new(data.train));

    // Validation on the inner backend: no autodiff overhead
    let valid_loader = DataLoaderBuilder::new(WindowBatcher::<B::InnerBackend>::new(device.clone()))
        .batch_size(cfg.batch_size)
        .build(WindowDataset::new(data.valid));

    let metrics = MetricsLogger::new(store.dir())?;
    tracing::info!("Metrics log: {}", metrics.csv_path().display());
    let snapshot = |epoch: usize,
                    loss: f64,
                    scheduler: &PlateauScheduler,
                    early: &EarlyStopping,
                    grad_scaler: &GradScaler| CheckpointManifest {
        format_version:  FORMAT_VERSION,
        epoch,
        loss,
        timestamp:       Utc::now(),
        model:           model_cfg.clone(),
        sequence_length: data.sequence_length,
        emergency_types: EmergencyType::ALL.to_vec(),
        scaler:          data.scaler.clone(),
        scheduler:       Some(scheduler.state().clone()),
        early_stopping:  Some(early.state().clone()),
        grad_scaler:     Some(grad_scaler.state()),
        recent_context:  data.recent_context.clone(),
    };

    let mut epochs          = Vec::new();
    let mut stop_reason     = StopReason::Exhausted;
    let mut best_model      = None;
    let mut consecutive_bad = 0usize;

    // ── Epoch loop ────────────────────────────────────────────────────────────
    for epoch in start_epoch..=cfg.max_epochs {
        let lr = scheduler.learning_rate();
        let failed = |reason: String, last: &Option<PathBuf>| ForecastError::TrainingFailed {
            epoch,
            reason,
            last_checkpoint: last.clone(),
        };
        let write_failed = |what: &str, err: ForecastError, last: &Option<PathBuf>| {
            tracing::error!("Epoch {}: {} failed: {}", epoch, what, err);
            failed(format!("{what} failed: {err}"), last)
        };

        // ── Training phase ────────────────────────────────────────────────────
        let mut loss_sum = 0.0f64;
        let mut finite   = 0usize;
        let mut skipped  = 0usize;

        for batch in train_loader.iter() {
            let (loss, _) = model.forward_loss(batch.features, batch.targets);
            let loss_val: f64 = loss.clone().into_scalar().elem::<f64>();

            if !loss_val.is_finite() {
                skipped         += 1;
                consecutive_bad += 1;
                tracing::warn!("Epoch {}: non-finite batch loss ({}), batch skipped", epoch, loss_val);
                if consecutive_bad > cfg.max_bad_batches {
                    return Err(failed(
                        format!("{consecutive_bad} consecutive non-finite batch losses"),
                        &last_checkpoint,
                    ));
                }
                continue;
            }
            consecutive_bad = 0;
            loss_sum += loss_val;
            finite   += 1;

            // Backward on the scaled loss, then restore true gradients
            let grads     = grad_scaler.scale_loss(loss).backward();
            let mut grads = GradientsParams::from_grads(grads, &model);
            let clean     = grad_scaler.unscale::<B, _>(&model, &mut grads);
            if clean {
                model = optim.step(lr, model, grads);
            } else {
                tracing::debug!("Epoch {}: non-finite gradients at scale {}, step skipped", epoch, grad_scaler.scale());
            }
            grad_scaler.update(!clean);
        }

        if finite == 0 {
            return Err(failed("no batch produced a finite loss".to_string(), &last_checkpoint));
        }
        let train_loss = loss_sum / finite as f64;

        // ── Validation phase ──────────────────────────────────────────────────
        let model_valid = model.valid();
        let val_loss    = evaluate(&model_valid, &*valid_loader);
        if !val_loss.is_finite() {
            return Err(failed(format!("validation loss is {val_loss}"), &last_checkpoint));
        }

        scheduler.step(val_loss);
        let verdict = early.observe(epoch, val_loss);

        tracing::info!(
            "Epoch {:>3}/{} | train_loss={:.4} | val_loss={:.4} | lr={:.2e}{}",
            epoch,
            cfg.max_epochs,
            train_loss,
            val_loss,
            lr,
            match verdict {
                EpochVerdict::Improved => " *".to_string(),
                EpochVerdict::Stalled { stall } => format!(" (stall {stall}/{})", cfg.early_stopping_patience),
                EpochVerdict::Stop(_) => String::new(),
            },
        );

        // ── Checkpoints ───────────────────────────────────────────────────────
        let manifest = snapshot(epoch, val_loss, &scheduler, &early, &grad_scaler);
        if verdict == EpochVerdict::Improved {
            let path = store
                .save(BEST, &model, &optim, &manifest)
                .map_err(|e| write_failed("saving 'best'", e, &last_checkpoint))?;
            last_checkpoint = Some(path);
            best_model = Some((model_valid, epoch));
        }

        let stop = match verdict {
            EpochVerdict::Stop(reason) => Some(reason),
            _ if early.is_last_epoch(epoch) => Some(StopReason::Exhausted),
            _ => None,
        };

        if epoch % cfg.checkpoint_interval == 0 || stop.is_some() {
            let path = store
                .archive(&model, &optim, &manifest)
                .map_err(|e| write_failed("archiving", e, &last_checkpoint))?;
            last_checkpoint = Some(path);
        }

        let row = EpochLoss { epoch, train_loss, val_loss, learning_rate: lr, skipped_batches: skipped };
        metrics
            .log(&row)
            .map_err(|e| write_failed("writing metrics", e, &last_checkpoint))?;
        epochs.push(row);

        if let Some(reason) = stop {
            stop_reason = reason;
            break;
        }
    }

    let state = early.state().clone();
    tracing::info!(
        "Training finished ({:?}); best val_loss={:.4} at epoch {:?}",
        stop_reason,
        state.best_loss,
        state.best_epoch
    );

    // A resumed run may never beat the best it started from.
    let (model, epoch) = match best_model {
        Some((model, epoch)) => (model, Some(epoch)),
        None => match store.load::<B::InnerBackend>(BEST, device)? {
            Some(best) => {
                let epoch = best.manifest.epoch;
                (best.model, Some(epoch))
            }
            None => (model.valid(), epochs.last().map(|e: &EpochLoss| e.epoch)),
        },
    };

    Ok(TrainingOutcome {
        history: TrainingHistory {
            epochs,
            stop_reason,
            best_epoch:    state.best_epoch,
            best_val_loss: state.best_loss,
        },
        model,
        epoch,
    })
}

/// Mean validation loss over batches, forward only.
fn evaluate<B: Backend>(
    model:  &EmergencyPredictor<B>,
    loader: &dyn DataLoader<WindowBatch<B>>,
) -> f64 {
    let mut sum     = 0.0f64;
    let mut batches = 0usize;
    for batch in loader.iter() {
        let (loss, _) = model.forward_loss(batch.features, batch.targets);
        sum     += loss.into_scalar().elem::<f64>();
        batches += 1;
    }
    if batches > 0 { sum / batches as f64 } else { f64::NAN }
}
