// ============================================================
// Layer 1 - CLI Commands and Arguments
// ============================================================
// Three subcommands: `train`, `predict`, `checkpoints`.
//
// clap's derive macros generate --help, error messages for
// missing args and string → number conversion.

use clap::{Args, Subcommand};

use crate::application::train_use_case::TrainConfig;
use crate::domain::prediction::PredictionRequest;
use crate::ml::precision::Precision;
use crate::ml::DeviceKind;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train the forecaster on an observation CSV
    Train(TrainArgs),

    /// Predict type and severity from live conditions
    Predict(PredictArgs),

    /// List saved checkpoints, newest first
    Checkpoints(CheckpointsArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// CSV with timestamp,emergency_type,severity,location_lat,
    /// location_long,weather_temp,weather_humidity,weather_wind_speed
    #[arg(long)]
    pub data: String,

    /// Directory for checkpoints and metrics.csv
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    /// Observations per input window
    #[arg(long, default_value_t = 30)]
    pub sequence_length: usize,

    /// Upper bound on training epochs
    #[arg(long, default_value_t = 50)]
    pub epochs: usize,

    #[arg(long, default_value_t = 32)]
    pub batch_size: usize,

    /// Initial AdamW learning rate
    #[arg(long, default_value_t = 1e-3)]
    pub learning_rate: f64,

    #[arg(long, default_value_t = 0.01)]
    pub weight_decay: f64,

    /// Hidden width H of each LSTM direction; attention runs at 2H
    #[arg(long, default_value_t = 128)]
    pub hidden_dim: usize,

    /// Stacked bidirectional LSTM layers
    #[arg(long, default_value_t = 2)]
    pub num_layers: usize,

    /// Attention heads; 2 * hidden_dim must be divisible by this
    #[arg(long, default_value_t = 4)]
    pub num_heads: usize,

    #[arg(long, default_value_t = 0.2)]
    pub dropout: f64,

    /// Learning rate multiplier on a validation plateau
    #[arg(long, default_value_t = 0.5)]
    pub scheduler_factor: f64,

    /// Epochs without improvement before the learning rate drops
    #[arg(long, default_value_t = 5)]
    pub scheduler_patience: usize,

    #[arg(long, default_value_t = 0.0)]
    pub min_learning_rate: f64,

    /// Epochs without improvement before training stops
    #[arg(long, default_value_t = 10)]
    pub early_stopping_patience: usize,

    /// Share of windows held out for validation
    #[arg(long, default_value_t = 0.2)]
    pub validation_fraction: f64,

    /// Seed for the train/validation split and batch shuffling
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Archive a timestamped checkpoint every N epochs
    #[arg(long, default_value_t = 1)]
    pub checkpoint_interval: usize,

    /// Consecutive non-finite batch losses tolerated
    #[arg(long, default_value_t = 10)]
    pub max_bad_batches: usize,

    /// full or mixed
    #[arg(long, default_value = "mixed")]
    pub precision: Precision,

    /// cpu or gpu (gpu needs the "wgpu" feature)
    #[arg(long, default_value = "cpu")]
    pub device: DeviceKind,

    /// Continue from this checkpoint (e.g. "latest")
    #[arg(long)]
    pub resume_from: Option<String>,
}

/// Convert CLI TrainArgs into the application-layer TrainConfig.
/// The application layer never sees clap types.
impl From<TrainArgs> for TrainConfig {
    fn from(a: TrainArgs) -> Self {
        TrainConfig {
            checkpoint_dir:          a.checkpoint_dir,
            sequence_length:         a.sequence_length,
            max_epochs:              a.epochs,
            batch_size:              a.batch_size,
            learning_rate:           a.learning_rate,
            weight_decay:            a.weight_decay,
            hidden_dim:              a.hidden_dim,
            num_layers:              a.num_layers,
            num_heads:               a.num_heads,
            dropout:                 a.dropout,
            scheduler_factor:        a.scheduler_factor,
            scheduler_patience:      a.scheduler_patience,
            min_learning_rate:       a.min_learning_rate,
            early_stopping_patience: a.early_stopping_patience,
            validation_fraction:     a.validation_fraction,
            seed:                    a.seed,
            checkpoint_interval:     a.checkpoint_interval,
            max_bad_batches:         a.max_bad_batches,
            precision:               a.precision,
            device:                  a.device,
            resume_from:             a.resume_from,
        }
    }
}

#[derive(Args, Debug)]
pub struct PredictArgs {
    #[arg(long, allow_hyphen_values = true)]
    pub lat: f32,

    #[arg(long, allow_hyphen_values = true)]
    pub long: f32,

    /// Temperature in °F
    #[arg(long, allow_hyphen_values = true)]
    pub temp: f32,

    /// Relative humidity in %
    #[arg(long)]
    pub humidity: f32,

    /// Wind speed in mph
    #[arg(long)]
    pub wind_speed: f32,

    /// Checkpoint to load
    #[arg(long, default_value = "best")]
    pub checkpoint: String,

    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,

    #[arg(long, default_value = "cpu")]
    pub device: DeviceKind,

    /// Observation CSV whose most recent rows form the input window,
    /// instead of the context stored with the checkpoint
    #[arg(long)]
    pub recent: Option<String>,
}

impl PredictArgs {
    pub fn request(&self) -> PredictionRequest {
        PredictionRequest {
            location_lat:       self.lat,
            location_long:      self.long,
            weather_temp:       self.temp,
            weather_humidity:   self.humidity,
            weather_wind_speed: self.wind_speed,
        }
    }
}

#[derive(Args, Debug)]
pub struct CheckpointsArgs {
    #[arg(long, default_value = "checkpoints")]
    pub checkpoint_dir: String,
}
