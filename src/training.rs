use std::path::{Path, PathBuf};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use crate::checkpoint::{checkpoint_file_name, latest_checkpoint, load_record, save_model};
use crate::config::{ModelType, RunConfig, TrainingConfig};
use crate::data::{FrameSequenceBatcher, FrameSequenceConfig, FrameSequenceDataset};
use crate::error::{Error, Result};
use crate::imaging::{load_resized, save_bgr_image};
use crate::loss::{LossComposer, LossValues, StyleTargets};
use crate::model::{TransformerNet, TransformerNetConfig, Vgg16};
use crate::tensor_ops::{center_crop, rgb_to_bgr, subtract_imagenet_mean};

/// Batches between two inspection image dumps.
const INSPECTION_INTERVAL: usize = 100;

/// Creates the directories a training run writes to.
pub fn prepare_directories(config: &TrainingConfig) -> Result<()> {
    for dir in [&config.vgg_model_dir, &config.save_model_dir] {
        std::fs::create_dir_all(dir).map_err(|err| Error::io(dir, err))?;
    }

    Ok(())
}

/// Output of one optimization step.
pub struct StepOutput<B: Backend> {
    pub losses: LossValues,
    /// BGR input frames.
    pub input: Tensor<B, 4>,
    /// Stylized frames, before mean subtraction.
    pub output: Tensor<B, 4>,
}

/// Optimizes a stylization network against fixed style targets.
pub struct StyleTrainer<B: AutodiffBackend> {
    model: TransformerNet<B>,
    optim: OptimizerAdaptor<Adam, TransformerNet<B>, B>,
    vgg: Vgg16<B>,
    style: StyleTargets<B>,
    composer: LossComposer,
    lr: f64,
}

impl<B: AutodiffBackend> StyleTrainer<B> {
    pub fn new(
        model: TransformerNet<B>,
        vgg: Vgg16<B>,
        style: StyleTargets<B>,
        composer: LossComposer,
        lr: f64,
    ) -> Self {
        Self {
            model,
            optim: AdamConfig::new().init(),
            vgg,
            style,
            composer,
            lr,
        }
    }

    pub fn model(&self) -> &TransformerNet<B> {
        &self.model
    }

    /// Runs one forward/backward pass over a BGR frame sequence and updates the network.
    pub fn step(&mut self, x: Tensor<B, 4>) -> StepOutput<B> {
        let model = self.model.clone();
        let y = model.forward(x.clone());

        let [_, _, height, width] = y.dims();
        let xc = center_crop(x.clone().detach(), height, width);

        let y_norm = subtract_imagenet_mean(y.clone());
        let xc = subtract_imagenet_mean(xc);

        let features_y = self.vgg.forward(y_norm.clone());
        let features_xc = self.vgg.forward(xc.clone());

        let loss = self
            .composer
            .forward(y_norm, xc, &features_y, &features_xc, &self.style);
        let losses = loss.values();

        let grads = loss.total.backward();
        let grads = GradientsParams::from_grads(grads, &model);
        self.model = self.optim.step(self.lr, model, grads);

        StepOutput {
            losses,
            input: x,
            output: y,
        }
    }
}

/// Mean of the loss terms since the last report.
#[derive(Debug, Default)]
struct RunningLosses {
    sum: LossValues,
    iters: usize,
}

impl RunningLosses {
    fn update(&mut self, losses: LossValues) {
        self.sum += losses;
        self.iters += 1;
    }

    /// Returns the mean and starts over.
    fn take(&mut self) -> LossValues {
        let mean = self.sum / self.iters.max(1) as f64;
        *self = Self::default();
        mean
    }
}

/// Fine-tunes a pretrained stylization network with the temporal losses.
///
/// Returns the path of the last checkpoint saved.
pub fn train<B: AutodiffBackend>(config: &TrainingConfig, run: RunConfig<B>) -> Result<PathBuf> {
    let device = run.device.clone();
    let save_dir = PathBuf::from(&config.save_model_dir);

    let config_path = save_dir.join("config.json");
    config
        .save(&config_path)
        .map_err(|err| Error::io(&config_path, err))?;
    run.init();

    let mut dataset = FrameSequenceDataset::new(
        &config.dataset,
        FrameSequenceConfig::new(config.model_type.seq_size())
            .with_interval(config.interval)
            .with_image_size(config.image_size)
            .with_use_flow(config.use_flow)
            .with_flow_dir(config.flow_dir.clone())
            .with_seed(run.seed),
    )?;
    let batcher = FrameSequenceBatcher;

    let init_path = latest_checkpoint(&config.init_model_dir)
        .ok_or_else(|| Error::CheckpointNotFound(PathBuf::from(&config.init_model_dir)))?;
    let model = TransformerNetConfig::for_model(ModelType::Sfn, config.pad_type).init::<B>(&device);
    let record = load_record::<B, TransformerNet<B>>(&init_path, &device)?;
    let mut model = model.load_record(record);
    if config.model_type == ModelType::Rnn {
        model = model.widen_input(&device);
    }

    let vgg = Vgg16::<B>::load(Path::new(&config.vgg_model_dir), &device)?;
    let style = load_style(config, &vgg, &save_dir, &device)?;
    log::info!("=> Pixel FDB loss weight: {:?}", config.loss.pixel_fdb_weight);
    log::info!("=> Feature FDB loss weight: {:?}", config.loss.feature_fdb_weight);

    let mut trainer = StyleTrainer::new(model, vgg, style, LossComposer::new(&config.loss), config.lr);
    let mut running = RunningLosses::default();
    let mut checkpoint = None;
    let num_batches = dataset.len();

    for epoch in 0..config.epochs {
        dataset.reset();

        for batch_id in 0..num_batches {
            let item = dataset.load(batch_id)?;
            let batch = batcher.batch(vec![item], &device);
            let x = rgb_to_bgr(batch.frames);

            let step = trainer.step(x);

            if (batch_id + 1) % INSPECTION_INTERVAL == 0 {
                save_inspection(&step, (batch_id + 1) / INSPECTION_INTERVAL, config.batch_size, &save_dir)?;
            }

            running.update(step.losses);
            let mean = running.take();
            log::info!(
                "Epoch {}:\t[{}/{}]\tcontent: {:.6}\tstyle: {:.6}\tpixel fdb: {:.6}\tfeature fdb: {:.6}\ttotal: {:.6}",
                epoch + 1,
                batch_id + 1,
                num_batches,
                mean.content,
                mean.style,
                mean.pixel_fdb,
                mean.feature_fdb,
                mean.total(),
            );
        }

        let path = save_dir.join(checkpoint_file_name(
            epoch,
            config.loss.content_weight,
            config.loss.style_weight,
        ));
        save_model(trainer.model(), &path)?;
        checkpoint = Some(path);
    }

    let checkpoint = checkpoint.ok_or_else(|| {
        Error::InvalidArgument("training requires at least one epoch".to_string())
    })?;
    log::info!("Done, trained model saved at {}", checkpoint.display());

    Ok(checkpoint)
}

/// Loads the style image, saves it for inspection and computes its Gram targets.
fn load_style<B: Backend>(
    config: &TrainingConfig,
    vgg: &Vgg16<B>,
    save_dir: &Path,
    device: &B::Device,
) -> Result<StyleTargets<B>> {
    let style = load_resized::<B>(Path::new(&config.style_image), Some(config.style_size), device)?;
    let style = rgb_to_bgr(style.unsqueeze::<4>());
    log::info!("=> Style image size: {:?}", style.dims());

    let [_, channels, height, width] = style.dims();
    save_bgr_image(
        style.clone().reshape([channels, height, width]),
        &save_dir.join("train_style.jpg"),
    )?;

    Ok(StyleTargets::from_features(
        vgg.forward(subtract_imagenet_mean(style)),
    ))
}

/// Saves the first frames of a step's output (`out_XX_YY.png`) and input (`in_XX-YY.png`).
fn save_inspection<B: Backend>(
    step: &StepOutput<B>,
    index: usize,
    batch_size: usize,
    save_dir: &Path,
) -> Result<()> {
    let [frames, _, _, _] = step.output.dims();

    for i in 0..batch_size.min(frames) {
        save_bgr_image(
            frame(&step.output, i),
            &save_dir.join(format!("out_{index:02}_{i:02}.png")),
        )?;
        save_bgr_image(
            frame(&step.input, i),
            &save_dir.join(format!("in_{index:02}-{i:02}.png")),
        )?;
    }

    Ok(())
}

fn frame<B: Backend>(batch: &Tensor<B, 4>, index: usize) -> Tensor<B, 3> {
    let [_, channels, height, width] = batch.dims();
    batch
        .clone()
        .narrow(0, index, 1)
        .reshape([channels, height, width])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LossConfig, PadType};
    use burn::backend::{Autodiff, NdArray};
    use burn::tensor::Distribution;

    type TestBackend = Autodiff<NdArray<f32>>;

    #[test]
    fn running_losses_reset_after_take() {
        let mut running = RunningLosses::default();
        running.update(LossValues {
            content: 2.0,
            ..Default::default()
        });
        running.update(LossValues {
            content: 4.0,
            ..Default::default()
        });

        assert_eq!(running.take().content, 3.0);
        assert_eq!(running.iters, 0);
        assert_eq!(running.take(), LossValues::default());
    }

    #[test]
    fn step_updates_network() {
        let device = Default::default();
        let model: TransformerNet<TestBackend> =
            TransformerNetConfig::new(PadType::Reflect).init(&device);
        let vgg = Vgg16::<TestBackend>::new(&device).no_grad();
        let style_image =
            Tensor::<TestBackend, 4>::random([1, 3, 16, 16], Distribution::Uniform(0.0, 255.0), &device);
        let style = StyleTargets::from_features(vgg.forward(subtract_imagenet_mean(style_image)));
        let probe = Tensor::<TestBackend, 4>::ones([1, 3, 8, 8], &device).mul_scalar(50.0);
        let before = model.forward(probe.clone()).into_data();

        let mut trainer =
            StyleTrainer::new(model, vgg, style, LossComposer::new(&LossConfig::new()), 1e-2);
        let x = Tensor::<TestBackend, 4>::random([2, 3, 16, 16], Distribution::Uniform(0.0, 255.0), &device);
        let step = trainer.step(x);

        assert_eq!(step.output.dims(), [2, 3, 16, 16]);
        assert!(step.losses.total().is_finite());
        let after = trainer.model().forward(probe).into_data();
        assert_ne!(before, after);
    }

    #[test]
    fn inspection_file_names() {
        let dir = tempfile::tempdir().unwrap();
        let device = Default::default();
        let batch = Tensor::<NdArray<f32>, 4>::ones([2, 3, 4, 4], &device).mul_scalar(100.0);
        let step = StepOutput {
            losses: LossValues::default(),
            input: batch.clone(),
            output: batch,
        };

        save_inspection(&step, 3, 4, dir.path()).unwrap();

        for name in ["out_03_00.png", "out_03_01.png", "in_03-00.png", "in_03-01.png"] {
            assert!(dir.path().join(name).is_file(), "{name}");
        }
        assert!(!dir.path().join("out_03_02.png").exists());
    }

    #[test]
    fn missing_initial_checkpoint_is_fatal() {
        let root = tempfile::tempdir().unwrap();
        let video = root.path().join("data/bear");
        std::fs::create_dir_all(&video).unwrap();
        for i in 0..2 {
            image::RgbImage::new(8, 8)
                .save(video.join(format!("{i:05}.jpg")))
                .unwrap();
        }
        let path = |name: &str| root.path().join(name).to_string_lossy().into_owned();
        let config = TrainingConfig::new(
            LossConfig::new(),
            path("data"),
            path("init"),
            path("vgg"),
            path("save"),
            path("style.jpg"),
        )
        .with_image_size(8);
        prepare_directories(&config).unwrap();

        let err = train(&config, RunConfig::<TestBackend>::new(1, Default::default())).unwrap_err();

        assert!(matches!(err, Error::CheckpointNotFound(_)));
        assert!(root.path().join("save/config.json").is_file());
    }
}
