// ============================================================
// Layer 1 - CLI / Presentation Layer
// ============================================================
// Parses arguments with clap and hands off to Layer 2.
//
//   1. `train`       - fit on a CSV, print the loss history
//   2. `predict`     - load a checkpoint, print the response
//                      (--recent <csv> windows a table instead)
//   3. `checkpoints` - list saved checkpoints
//
// Everything printed is JSON so it can be piped into other tools.

pub mod commands;

use anyhow::Result;
use clap::Parser;
use commands::{CheckpointsArgs, Commands, PredictArgs, TrainArgs};

use crate::domain::error::ForecastError;

#[derive(Parser, Debug)]
#[command(
    name = "emergency-forecaster",
    version = "0.1.0",
    about = "Forecast emergency type and severity from weather and location history."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Dispatch to the matching use case. The CLI only routes.
    pub fn run(self) -> Result<()> {
        match self.command {
            Commands::Train(args)       => run_train(args),
            Commands::Predict(args)     => run_predict(args),
            Commands::Checkpoints(args) => run_checkpoints(args),
        }
    }
}

fn run_train(args: TrainArgs) -> Result<()> {
    use crate::application::train_use_case::TrainUseCase;

    tracing::info!("Starting training on: {}", args.data);
    let data     = args.data.clone();
    let use_case = TrainUseCase::new(args.into(), data);
    let history  = use_case.execute()?;
    tracing::info!(
        "Stopped after epoch {:?} ({:?})",
        history.last_epoch(),
        history.stop_reason
    );

    println!("{}", serde_json::to_string_pretty(&history)?);
    Ok(())
}

fn run_predict(args: PredictArgs) -> Result<()> {
    use crate::application::predict_use_case::PredictUseCase;

    let use_case = PredictUseCase::new(&args.checkpoint_dir, &args.checkpoint, args.device)
        .with_recent(args.recent.clone());
    match use_case.execute(args.request()) {
        Ok(response) => {
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        // Known conditions become a structured body instead of a trace.
        Err(err) => match err.downcast_ref::<ForecastError>() {
            Some(cause) => {
                tracing::debug!("{err:#}");
                println!("{}", serde_json::to_string_pretty(&cause.to_body())?);
                std::process::exit(1);
            }
            None => Err(err),
        },
    }
}

fn run_checkpoints(args: CheckpointsArgs) -> Result<()> {
    use crate::application::checkpoints_use_case::ListCheckpointsUseCase;

    let checkpoints = ListCheckpointsUseCase::new(args.checkpoint_dir).execute()?;
    println!("{}", serde_json::to_string_pretty(&checkpoints)?);
    Ok(())
}
