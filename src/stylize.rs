use std::path::{Path, PathBuf};

use burn::prelude::*;
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};

use crate::checkpoint::{latest_checkpoint, load_record};
use crate::config::{ModelType, PadType, StylizeConfig};
use crate::data::FrameFolder;
use crate::error::{Error, Result};
use crate::imaging::save_bgr_image;
use crate::model::{TransformerNet, TransformerNetConfig};
use crate::tensor_ops::{rgb_to_bgr, MultipleOfFour};
use crate::video::assemble_videos;

/// Maps input frames to the files receiving their stylized version.
///
/// `<input_dir>/<video>/<frame>` becomes `<output_dir>/<video>/<model_name>/<frame>`.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    input_dir: PathBuf,
    output_dir: PathBuf,
    model_name: String,
}

impl OutputLayout {
    pub fn new(
        input_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        model_name: impl Into<String>,
    ) -> Self {
        Self {
            input_dir: input_dir.into(),
            output_dir: output_dir.into(),
            model_name: model_name.into(),
        }
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    /// Directory receiving the stylized version of `sample`.
    pub fn frame_dir(&self, sample: &Path) -> Result<PathBuf> {
        let relative = sample
            .parent()
            .and_then(|parent| parent.strip_prefix(&self.input_dir).ok())
            .ok_or_else(|| Error::InvalidPath(sample.to_path_buf()))?;

        Ok(self.output_dir.join(relative).join(&self.model_name))
    }

    /// File receiving the stylized version of `sample`.
    pub fn frame_path(&self, sample: &Path) -> Result<PathBuf> {
        let name = sample
            .file_name()
            .ok_or_else(|| Error::InvalidPath(sample.to_path_buf()))?;

        Ok(self.frame_dir(sample)?.join(name))
    }
}

/// A checkpoint to run over the input frames.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelJob {
    pub checkpoint: PathBuf,
    pub model_name: String,
    pub model_type: ModelType,
    pub pad_type: PadType,
}

impl ModelJob {
    /// Builds the network and loads the checkpoint into it.
    pub fn load<B: Backend>(&self, device: &B::Device) -> Result<TransformerNet<B>> {
        let model = TransformerNetConfig::for_model(self.model_type, self.pad_type).init::<B>(device);
        let record = load_record::<B, TransformerNet<B>>(&self.checkpoint, device)?;

        Ok(model.load_record(record))
    }
}

/// Digit following `Style` in a checkpoint path, as in `exprs/reflect/DiffStyle3/epoch_1.model`.
pub fn style_index(path: &Path) -> Option<u32> {
    let path = path.to_string_lossy();
    let start = path.find("Style")? + "Style".len();

    path[start..].chars().next()?.to_digit(10)
}

/// Finds the latest checkpoint of every experiment under `<model_dir>/<pad_type>/`.
///
/// Experiments without checkpoint or without a style index in their path are skipped.
pub fn discover_models(model_dir: &Path, pad_types: &[PadType]) -> Result<Vec<ModelJob>> {
    let mut jobs = Vec::new();

    for &pad_type in pad_types {
        let pad_dir = model_dir.join(pad_type.as_str());
        let mut experiments = Vec::new();
        for entry in std::fs::read_dir(&pad_dir).map_err(|err| Error::io(&pad_dir, err))? {
            let path = entry.map_err(|err| Error::io(&pad_dir, err))?.path();
            if path.is_dir() {
                experiments.push(path);
            }
        }
        experiments.sort();

        for experiment in experiments {
            let Some(checkpoint) = latest_checkpoint(&experiment) else {
                log::info!("No checkpoint in {}, skipping", experiment.display());
                continue;
            };
            let Some(index) = style_index(&checkpoint) else {
                log::warn!(
                    "No style index in {}, skipping",
                    checkpoint.display()
                );
                continue;
            };

            let model_name = format!("sfn_diff_{pad_type}_{index}");
            log::info!("=> Record model file {} - {model_name}", checkpoint.display());
            jobs.push(ModelJob {
                checkpoint,
                model_name,
                model_type: ModelType::Sfn,
                pad_type,
            });
        }
    }

    Ok(jobs)
}

/// Stylizes every frame of `folder` and writes the results following `layout`.
///
/// Frames are resized so that their shorter side is `size`, reflect-padded to a multiple of
/// four, and the padding is cropped from the result. Unpadded networks return a smaller
/// frame, which is resized back to the input size. The recurrent network is conditioned on
/// the previous stylized frame of the same output directory.
pub fn process_frames<B: Backend>(
    model: &TransformerNet<B>,
    folder: &FrameFolder,
    size: Option<usize>,
    layout: &OutputLayout,
    device: &B::Device,
) -> Result<()> {
    let mut current_dir: Option<PathBuf> = None;
    let mut previous: Option<Tensor<B, 4>> = None;

    for (index, sample) in folder.samples().iter().enumerate() {
        let out_path = layout.frame_path(sample)?;
        let out_dir = layout.frame_dir(sample)?;
        if current_dir.as_ref() != Some(&out_dir) {
            std::fs::create_dir_all(&out_dir).map_err(|err| Error::io(&out_dir, err))?;
            current_dir = Some(out_dir);
            previous = None;
        }

        let x = rgb_to_bgr(folder.load::<B>(index, size, device)?);
        let [_, _, height, width] = x.dims();
        let fixup = MultipleOfFour::of(height, width);

        let y = model.forward_step(fixup.pad(x), previous.take());
        if model.is_recurrent() {
            previous = Some(y.clone());
        }
        let y = restore_size(fixup.crop(y), height, width);

        log::info!("=> Write output image to {}", out_path.display());
        let [_, channels, height, width] = y.dims();
        save_bgr_image(y.reshape([channels, height, width]), &out_path)?;
    }

    Ok(())
}

fn restore_size<B: Backend>(y: Tensor<B, 4>, height: usize, width: usize) -> Tensor<B, 4> {
    let [_, _, h, w] = y.dims();
    if (h, w) == (height, width) {
        return y;
    }
    log::debug!("Resize a {h}x{w} result to {height}x{width}");

    interpolate(
        y,
        [height, width],
        InterpolateOptions::new(InterpolateMode::Bilinear),
    )
}

/// Runs one or several trained networks over the input frames, then assembles the videos.
pub fn stylize<B: Backend>(config: &StylizeConfig, device: &B::Device) -> Result<()> {
    let jobs = if config.is_multi_model() {
        let pad_types = PadType::parse_list(&config.pad_type).map_err(Error::InvalidArgument)?;
        let jobs = discover_models(Path::new(&config.model_dir), &pad_types)?;
        if jobs.is_empty() {
            log::warn!("No model found under {}", config.model_dir);
        }
        jobs
    } else {
        let checkpoint = latest_checkpoint(&config.model_dir)
            .ok_or_else(|| Error::CheckpointNotFound(PathBuf::from(&config.model_dir)))?;
        vec![ModelJob {
            checkpoint,
            model_name: config.model_name.clone(),
            model_type: config.model_type,
            pad_type: config.pad_type.parse().map_err(Error::InvalidArgument)?,
        }]
    };

    let folder = FrameFolder::open(&config.input_dir)?;
    let download_dir = Path::new(&config.download_dir);

    for job in jobs {
        let layout = OutputLayout::new(&config.input_dir, &config.output_dir, job.model_name.as_str());
        if config.compute {
            let model = job.load::<B>(device)?;
            log::info!("=> Load from model file {}", job.checkpoint.display());
            process_frames(&model, &folder, Some(config.image_size), &layout, device)?;
        }
        assemble_videos(folder.samples(), &layout, download_dir)?;
    }

    Ok(())
}
