//! Runs PET/CT lesion segmentation on the case under the input directory.
//!
//! Every option can also be given through the environment variable named in
//! its help text, so the binary runs without arguments inside a container.
//!
//! # Usage
//!
//! ```bash
//! autopet-infer \
//!     --input /input/ \
//!     --output /output/images/automated-petct-lesion-segmentation/ \
//!     --weights /opt/algorithm/weights/ \
//!     --device cuda:0
//! ```

use autopet_infer::core::config::onnx::OrtExecutionProvider;
use autopet_infer::core::init_tracing;
use autopet_infer::pipeline::{PipelineConfig, PipelineDriver, Strategy};
use clap::Parser;
use std::error::Error;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

/// Command-line arguments. Options left unset keep the value from the
/// configuration file, or the built-in default.
#[derive(Parser, Debug)]
#[command(name = "autopet-infer")]
#[command(about = "Sliding-window ensemble inference for PET/CT lesion segmentation")]
struct Args {
    /// Root holding images/ct/ and images/pet/ [default: /input/]
    #[arg(long = "input", env = "INPUT_PATH")]
    input_dir: Option<PathBuf>,

    /// Directory receiving the mask
    /// [default: /output/images/automated-petct-lesion-segmentation/]
    #[arg(long = "output", env = "OUTPUT_PATH")]
    output_dir: Option<PathBuf>,

    /// Path of the strategy JSON artifact [default: /output/data-centric-model.json]
    #[arg(long = "datacentric-output", env = "DATA_CENTRIC_OUTPUT_PATH")]
    datacentric_path: Option<PathBuf>,

    /// Directory holding *.onnx checkpoints [default: /opt/algorithm/weights/]
    #[arg(long = "weights", env = "WEIGHTS_PATH")]
    weights_dir: Option<PathBuf>,

    /// Directory receiving NIfTI copies of the inputs and the prediction
    #[arg(long = "intermediate", env = "INTERMEDIATE_PATH")]
    intermediate_dir: Option<PathBuf>,

    /// JSON file with inference settings
    #[arg(long = "config", env = "PIPELINE_CONFIG")]
    config: Option<PathBuf>,

    /// Processing strategy reported in the artifact: data-centric or baseline
    #[arg(long, env = "STRATEGY")]
    strategy: Option<Strategy>,

    /// Test-time augmentation budget in seconds [default: 220]
    #[arg(long = "max-tta-time", env = "MAX_TTA_TIME")]
    max_tta_time: Option<f64>,

    /// Device to run on: cpu, cuda or cuda:N
    #[arg(long, env = "DEVICE")]
    device: Option<String>,
}

impl Args {
    fn into_config(self) -> Result<PipelineConfig, Box<dyn Error>> {
        let mut config = match &self.config {
            Some(path) => PipelineConfig::from_json_file(path)?,
            None => PipelineConfig::default(),
        };

        if let Some(dir) = self.input_dir {
            config = config.with_input_dir(dir);
        }
        if let Some(dir) = self.output_dir {
            config = config.with_output_dir(dir);
        }
        if let Some(path) = self.datacentric_path {
            config = config.with_datacentric_path(path);
        }
        if let Some(dir) = self.weights_dir {
            config = config.with_weights_dir(dir);
        }
        if self.intermediate_dir.is_some() {
            config = config.with_intermediate_dir(self.intermediate_dir);
        }
        if let Some(strategy) = self.strategy {
            config = config.with_strategy(strategy);
        }
        if let Some(secs) = self.max_tta_time {
            config.tta.max_time_secs = secs;
        }
        if let Some(device) = self.device {
            let providers = OrtExecutionProvider::from_device(&device)?;
            config.model.ort_session.execution_providers = Some(providers);
        }
        Ok(config)
    }
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            return ExitCode::FAILURE;
        }
    };
    info!(
        "Strategy {}, TTA budget {:.0} s, weights {}",
        config.strategy,
        config.tta.max_time_secs,
        config.weights_dir.display()
    );

    let mut driver = PipelineDriver::new(config);
    match driver.run() {
        Ok(outcome) => {
            info!(
                "Wrote {} and {}",
                outcome.mask_path.display(),
                outcome.datacentric_path.display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Segmentation failed: {}", e);
            let mut source = e.source();
            while let Some(cause) = source {
                error!("  caused by: {}", cause);
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}
