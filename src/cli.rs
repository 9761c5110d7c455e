use std::path::{Path, PathBuf};
use std::process::ExitCode;

use burn::tensor::backend::AutodiffBackend;
use clap::{Args, Parser, Subcommand};

use crate::config::{LossConfig, ModelType, PadType, RunConfig, StylizeConfig, TrainingConfig};
use crate::logging::install_logger;
use crate::stylize::stylize;
use crate::training::{prepare_directories, train};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Frame Difference-Based temporal loss experiments for video style transfer"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Fine-tune a stylization network with the temporal losses
    Train(TrainArgs),
    /// Stylize frames and assemble videos
    #[command(alias = "stylize")]
    Eval(EvalArgs),
}

#[derive(Args, Debug)]
pub struct TrainArgs {
    /// Weight of the pixel FDB loss
    #[arg(long, default_value_t = 50.0)]
    pub time_strength1: f64,
    /// Weight of the feature FDB loss
    #[arg(long, default_value_t = 950.0)]
    pub time_strength2: f64,
    #[arg(long, default_value_t = 1.0)]
    pub content_weight: f64,
    #[arg(long, default_value_t = 10.0)]
    pub style_weight: f64,
    /// Root of the training videos, one subdirectory per video
    #[arg(long, default_value = "data/DAVIS/train/JPEGImages/480p/")]
    pub dataset: String,
    /// Directory of the pretrained checkpoint to start from
    #[arg(long, default_value = "exprs/NetStyle1/")]
    pub init_model_dir: String,
    /// Directory of the VGG16 weights
    #[arg(long, default_value = "pretrained/")]
    pub vgg_model_dir: String,
    #[arg(long, default_value = "exprs/DiffStyle1")]
    pub save_model_dir: String,
    #[arg(long, default_value = "data/styles/starry_night.jpg")]
    pub style_image: String,
    /// sfn | rnn
    #[arg(long, default_value = "sfn")]
    pub model_type: ModelType,
    /// interpolate-detach | reflect-start | none | reflect | replicate | zero
    #[arg(long, default_value = "interpolate-detach")]
    pub pad_type: PadType,
    #[arg(long, default_value_t = 1)]
    pub epochs: usize,
    /// Number of frames saved in the inspection images
    #[arg(long, default_value_t = 2)]
    pub batch_size: usize,
    /// Distance between two sampled frames
    #[arg(long, default_value_t = 1)]
    pub interval: usize,
    #[arg(long, default_value_t = 400)]
    pub image_size: usize,
    #[arg(long, default_value_t = 400)]
    pub style_size: usize,
    #[arg(long, default_value_t = 1234)]
    pub seed: u64,
    #[arg(long, default_value_t = 1e-4)]
    pub lr: f64,
    /// Load the optical flow of every training pair from `--flow-dir`
    #[arg(long)]
    pub use_flow: bool,
    /// Root of the `.flo` files, one subdirectory per video
    #[arg(long)]
    pub flow_dir: Option<String>,
    /// Log file, `<save-model-dir>/experiment.log` by default
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl TrainArgs {
    pub fn to_config(&self) -> TrainingConfig {
        let loss = LossConfig::new()
            .with_content_weight(self.content_weight)
            .with_style_weight(self.style_weight)
            .with_pixel_fdb_weight(self.time_strength1)
            .with_feature_fdb_weight(self.time_strength2);

        TrainingConfig::new(
            loss,
            self.dataset.clone(),
            self.init_model_dir.clone(),
            self.vgg_model_dir.clone(),
            self.save_model_dir.clone(),
            self.style_image.clone(),
        )
        .with_model_type(self.model_type)
        .with_pad_type(self.pad_type)
        .with_epochs(self.epochs)
        .with_batch_size(self.batch_size)
        .with_interval(self.interval)
        .with_image_size(self.image_size)
        .with_style_size(self.style_size)
        .with_seed(self.seed)
        .with_lr(self.lr)
        .with_use_flow(self.use_flow)
        .with_flow_dir(self.flow_dir.clone())
    }
}

#[derive(Args, Debug)]
pub struct EvalArgs {
    /// sfn | rnn
    #[arg(long, default_value = "sfn")]
    pub model_type: ModelType,
    /// A padding strategy, or a comma separated list to evaluate every experiment of
    /// `<model-dir>/<pad-type>/`
    #[arg(long, default_value = "interpolate-detach", value_parser = parse_pad_types)]
    pub pad_type: String,
    #[arg(long, default_value = "data/test")]
    pub input_dir: String,
    #[arg(long, default_value = "data/testout")]
    pub output_dir: String,
    #[arg(long, default_value = "exprs/CombStyle1/")]
    pub model_dir: String,
    #[arg(long, default_value = "sfn_comb_starrynight")]
    pub model_name: String,
    /// 0 to only assemble videos from existing frames
    #[arg(long, default_value_t = 1)]
    pub compute: u8,
    /// Size of the shorter side of the stylized frames
    #[arg(long, default_value_t = 256)]
    pub image_size: usize,
    #[arg(long, default_value = "download")]
    pub download_dir: String,
    #[arg(long)]
    pub log_file: Option<PathBuf>,
}

impl EvalArgs {
    pub fn to_config(&self) -> StylizeConfig {
        StylizeConfig::new(
            self.input_dir.clone(),
            self.output_dir.clone(),
            self.model_dir.clone(),
            self.model_name.clone(),
        )
        .with_pad_type(self.pad_type.clone())
        .with_model_type(self.model_type)
        .with_compute(self.compute != 0)
        .with_image_size(self.image_size)
        .with_download_dir(self.download_dir.clone())
    }
}

fn parse_pad_types(s: &str) -> Result<String, String> {
    PadType::parse_list(s).map(|_| s.to_string())
}

/// Runs a parsed command line on the given device.
pub fn run<B: AutodiffBackend>(cli: Cli, device: B::Device) -> ExitCode {
    let result = match cli.command {
        Commands::Train(args) => {
            let config = args.to_config();
            if let Err(err) = prepare_directories(&config) {
                install_logger(None);
                log::error!("{err}");
                return ExitCode::FAILURE;
            }

            let log_file = args
                .log_file
                .unwrap_or_else(|| Path::new(&config.save_model_dir).join("experiment.log"));
            install_logger(Some(&log_file));

            train::<B>(&config, RunConfig::new(config.seed, device)).map(|_| ())
        }
        Commands::Eval(args) => {
            install_logger(args.log_file.as_deref());
            stylize::<B::InnerBackend>(&args.to_config(), &device)
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            ExitCode::FAILURE
        }
    }
}
