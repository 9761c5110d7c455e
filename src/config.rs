use std::fmt;
use std::str::FromStr;

use burn::prelude::*;
use serde::{Deserialize, Serialize};

/// Stylization network variant.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum ModelType {
    /// Single-frame network.
    Sfn,
    /// Recurrent network fed with the previous stylized frame as extra input channels.
    Rnn,
}

impl ModelType {
    /// Number of adjacent frames per training sample.
    pub fn seq_size(&self) -> usize {
        match self {
            Self::Sfn => 2,
            Self::Rnn => 4,
        }
    }

    /// Name used on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sfn => "sfn",
            Self::Rnn => "rnn",
        }
    }
}

impl fmt::Display for ModelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ModelType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sfn" => Ok(Self::Sfn),
            "rnn" => Ok(Self::Rnn),
            other => Err(format!("unknown model type `{other}` (expected sfn | rnn)")),
        }
    }
}

/// Border handling of the stylization network's convolutions.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum PadType {
    /// Edge-replicated border taken from a detached copy of the input.
    InterpolateDetach,
    /// Reflection on the first layer, zeros everywhere else.
    ReflectStart,
    /// No padding; every convolution shrinks its input.
    #[serde(rename = "none")]
    Unpadded,
    /// Reflection padding.
    Reflect,
    /// Edge replication.
    Replicate,
    /// Zero padding.
    Zero,
}

impl PadType {
    /// Name used on the command line and in experiment directories.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InterpolateDetach => "interpolate-detach",
            Self::ReflectStart => "reflect-start",
            Self::Unpadded => "none",
            Self::Reflect => "reflect",
            Self::Replicate => "replicate",
            Self::Zero => "zero",
        }
    }

    /// Parses a comma separated list of padding strategies.
    pub fn parse_list(s: &str) -> Result<Vec<Self>, String> {
        s.split(',').map(|item| item.trim().parse()).collect()
    }
}

impl fmt::Display for PadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PadType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "interpolate-detach" => Ok(Self::InterpolateDetach),
            "reflect-start" => Ok(Self::ReflectStart),
            "none" => Ok(Self::Unpadded),
            "reflect" => Ok(Self::Reflect),
            "replicate" => Ok(Self::Replicate),
            "zero" => Ok(Self::Zero),
            other => Err(format!(
                "unknown pad type `{other}` (expected interpolate-detach | reflect-start | none | \
                 reflect | replicate | zero)"
            )),
        }
    }
}

/// Weights of the four loss terms.
#[derive(Config, Debug)]
pub struct LossConfig {
    /// Content loss weight.
    #[config(default = 1.0)]
    pub content_weight: f64,
    /// Style loss weight.
    #[config(default = 10.0)]
    pub style_weight: f64,
    /// Pixel FDB loss weight.
    #[config(default = 50.0)]
    pub pixel_fdb_weight: f64,
    /// Feature FDB loss weight.
    #[config(default = 950.0)]
    pub feature_fdb_weight: f64,
}

/// Everything needed to run one training experiment.
#[derive(Config, Debug)]
pub struct TrainingConfig {
    pub loss: LossConfig,
    /// Root of the training videos, one subdirectory of frames per video.
    pub dataset: String,
    /// Directory holding the checkpoint the training starts from.
    pub init_model_dir: String,
    /// Directory holding the pretrained VGG16 weights.
    pub vgg_model_dir: String,
    /// Directory receiving checkpoints and inspection images.
    pub save_model_dir: String,
    /// Style reference image.
    pub style_image: String,
    #[config(default = "ModelType::Sfn")]
    pub model_type: ModelType,
    #[config(default = "PadType::InterpolateDetach")]
    pub pad_type: PadType,
    #[config(default = 1)]
    pub epochs: usize,
    #[config(default = 2)]
    pub batch_size: usize,
    /// Distance between two sampled frames.
    #[config(default = 1)]
    pub interval: usize,
    #[config(default = 400)]
    pub image_size: usize,
    #[config(default = 400)]
    pub style_size: usize,
    #[config(default = 1234)]
    pub seed: u64,
    #[config(default = 1e-4)]
    pub lr: f64,
    /// Load the optical flow between adjacent training frames.
    #[config(default = false)]
    pub use_flow: bool,
    /// Root of the `.flo` files, one subdirectory per video.
    #[config(default = "None")]
    pub flow_dir: Option<String>,
}

/// Settings of a stylization run.
#[derive(Config, Debug)]
pub struct StylizeConfig {
    /// Frames to stylize: `video/*.jpg` subdirectories, or images directly in the directory.
    pub input_dir: String,
    /// Root of the stylized frames, mirroring `input_dir`.
    pub output_dir: String,
    /// Checkpoint directory, or the root of `<pad_type>/<experiment>` directories when several
    /// padding strategies are given.
    pub model_dir: String,
    /// Name inserted in output paths and video names.
    pub model_name: String,
    /// One padding strategy, or a comma separated list for multi-model mode.
    #[config(default = "String::from(\"interpolate-detach\")")]
    pub pad_type: String,
    #[config(default = "ModelType::Sfn")]
    pub model_type: ModelType,
    /// Whether to generate frames, or only assemble videos from existing ones.
    #[config(default = true)]
    pub compute: bool,
    /// Frames are resized so that their shorter side has this size.
    #[config(default = 256)]
    pub image_size: usize,
    /// Flat directory receiving a copy of every assembled video.
    #[config(default = "String::from(\"download\")")]
    pub download_dir: String,
}

impl StylizeConfig {
    /// Whether several padding strategies, hence several models, are requested.
    pub fn is_multi_model(&self) -> bool {
        self.pad_type.contains(',')
    }
}

/// Seed and device of a run, passed explicitly to initialization.
#[derive(Debug, Clone)]
pub struct RunConfig<B: Backend> {
    pub seed: u64,
    pub device: B::Device,
}

impl<B: Backend> RunConfig<B> {
    pub fn new(seed: u64, device: B::Device) -> Self {
        Self { seed, device }
    }

    /// Seeds the backend random generator.
    pub fn init(&self) {
        B::seed(&self.device, self.seed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pad_type_names_round_trip() {
        for pad in [
            PadType::InterpolateDetach,
            PadType::ReflectStart,
            PadType::Unpadded,
            PadType::Reflect,
            PadType::Replicate,
            PadType::Zero,
        ] {
            assert_eq!(pad.as_str().parse::<PadType>().unwrap(), pad);
        }
        assert!("mirror".parse::<PadType>().is_err());
    }

    #[test]
    fn pad_type_list() {
        let pads = PadType::parse_list("reflect, zero,none").unwrap();

        assert_eq!(pads, vec![PadType::Reflect, PadType::Zero, PadType::Unpadded]);
        assert!(PadType::parse_list("reflect,bogus").is_err());
    }

    #[test]
    fn model_type_sequence_sizes() {
        assert_eq!("sfn".parse::<ModelType>().unwrap().seq_size(), 2);
        assert_eq!("rnn".parse::<ModelType>().unwrap().seq_size(), 4);
        assert!("cnn".parse::<ModelType>().is_err());
    }

    #[test]
    fn multi_model_mode_detection() {
        let config = StylizeConfig::new(
            "in".into(),
            "out".into(),
            "models".into(),
            "name".into(),
        );
        assert!(!config.is_multi_model());
        assert!(config.with_pad_type("reflect,zero".into()).is_multi_model());
    }

    #[test]
    fn training_config_defaults() {
        let config = TrainingConfig::new(
            LossConfig::new(),
            "data".into(),
            "init".into(),
            "vgg".into(),
            "save".into(),
            "style.jpg".into(),
        );

        assert_eq!(config.model_type, ModelType::Sfn);
        assert_eq!(config.pad_type, PadType::InterpolateDetach);
        assert_eq!(config.epochs, 1);
        assert_eq!(config.seed, 1234);
        assert_eq!(config.loss.pixel_fdb_weight, 50.0);
        assert_eq!(config.loss.feature_fdb_weight, 950.0);
        assert!(!config.use_flow);
        assert!(config.flow_dir.is_none());
    }

    #[test]
    fn training_config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let config = TrainingConfig::new(
            LossConfig::new().with_style_weight(1e5),
            "data".into(),
            "init".into(),
            "vgg".into(),
            "save".into(),
            "style.jpg".into(),
        )
        .with_pad_type(PadType::Unpadded)
        .with_use_flow(true)
        .with_flow_dir(Some("flow".into()));

        config.save(&path).unwrap();
        let loaded = TrainingConfig::load(&path).unwrap();

        assert_eq!(loaded.pad_type, PadType::Unpadded);
        assert_eq!(loaded.loss.style_weight, 1e5);
        assert!(loaded.use_flow);
        assert_eq!(loaded.flow_dir.as_deref(), Some("flow"));
    }

    #[test]
    fn run_config_seeds_its_device() {
        type B = burn::backend::NdArray<f32>;
        let run = RunConfig::<B>::new(7, Default::default());

        run.init();
        let sample = Tensor::<B, 1>::random([4], burn::tensor::Distribution::Default, &run.device);

        assert_eq!(run.seed, 7);
        assert_eq!(sample.dims(), [4]);
    }
}
