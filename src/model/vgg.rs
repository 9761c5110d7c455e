use std::path::Path;

use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::PaddingConfig2d;
use burn::prelude::*;
use burn::record::{FullPrecisionSettings, NamedMpkFileRecorder, Recorder};
use burn::tensor::activation::relu;
use burn_import::pytorch::PyTorchFileRecorder;

use crate::error::{Error, Result};

/// Number of feature maps returned by [Vgg16::forward].
pub const NUM_FEATURE_LAYERS: usize = 4;

/// VGG16 feature extractor.
///
/// Extracts features from 4 layers:
/// - relu1_2: 64 channels
/// - relu2_2: 128 channels, 1/2 resolution
/// - relu3_3: 256 channels, 1/4 resolution
/// - relu4_3: 512 channels, 1/8 resolution
///
/// Field names follow the PyTorch state dict of the pretrained weights (`conv1_1.weight`, ...),
/// so no key remapping is needed when importing them.
#[derive(Module, Debug)]
pub struct Vgg16<B: Backend> {
    // Block 1
    conv1_1: Conv2d<B>,
    conv1_2: Conv2d<B>,
    // Block 2
    conv2_1: Conv2d<B>,
    conv2_2: Conv2d<B>,
    // Block 3
    conv3_1: Conv2d<B>,
    conv3_2: Conv2d<B>,
    conv3_3: Conv2d<B>,
    // Block 4
    conv4_1: Conv2d<B>,
    conv4_2: Conv2d<B>,
    conv4_3: Conv2d<B>,
    pool: MaxPool2d,
}

impl<B: Backend> Vgg16<B> {
    /// Create a VGG16 feature extractor with random weights.
    pub fn new(device: &B::Device) -> Self {
        let conv = |channels_in, channels_out| {
            Conv2dConfig::new([channels_in, channels_out], [3, 3])
                .with_padding(PaddingConfig2d::Same)
                .with_bias(true)
                .init(device)
        };

        Self {
            conv1_1: conv(3, 64),
            conv1_2: conv(64, 64),
            conv2_1: conv(64, 128),
            conv2_2: conv(128, 128),
            conv3_1: conv(128, 256),
            conv3_2: conv(256, 256),
            conv3_3: conv(256, 256),
            conv4_1: conv(256, 512),
            conv4_2: conv(512, 512),
            conv4_3: conv(512, 512),
            pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
        }
    }

    /// Loads the pretrained weights from `dir`.
    ///
    /// `vgg16.mpk` (Burn named MessagePack) is preferred over `vgg16.weight` (PyTorch state
    /// dict). The returned module tracks no gradient.
    pub fn load(dir: &Path, device: &B::Device) -> Result<Self> {
        let mpk = dir.join("vgg16.mpk");
        let pytorch = dir.join("vgg16.weight");

        let record: Vgg16Record<B> = if mpk.exists() {
            log::info!("=> Load VGG16 weights from {}", mpk.display());
            NamedMpkFileRecorder::<FullPrecisionSettings>::new().load(mpk, device)?
        } else if pytorch.exists() {
            log::info!("=> Load VGG16 weights from {}", pytorch.display());
            PyTorchFileRecorder::<FullPrecisionSettings>::default().load(pytorch.into(), device)?
        } else {
            return Err(Error::VggWeightsNotFound(dir.to_path_buf()));
        };

        Ok(Self::new(device).load_record(record).no_grad())
    }

    /// Extract the feature pyramid of a mean-subtracted BGR batch.
    ///
    /// # Shapes
    ///
    /// - x: `[batch, 3, height, width]`
    /// - output: 4 tensors `[batch, channels, height / 2^i, width / 2^i]`
    pub fn forward(&self, x: Tensor<B, 4>) -> Vec<Tensor<B, 4>> {
        let mut features = Vec::with_capacity(NUM_FEATURE_LAYERS);

        let x = relu(self.conv1_1.forward(x));
        let x = relu(self.conv1_2.forward(x));
        features.push(x.clone());
        let x = self.pool.forward(x);

        let x = relu(self.conv2_1.forward(x));
        let x = relu(self.conv2_2.forward(x));
        features.push(x.clone());
        let x = self.pool.forward(x);

        let x = relu(self.conv3_1.forward(x));
        let x = relu(self.conv3_2.forward(x));
        let x = relu(self.conv3_3.forward(x));
        features.push(x.clone());
        let x = self.pool.forward(x);

        let x = relu(self.conv4_1.forward(x));
        let x = relu(self.conv4_2.forward(x));
        let x = relu(self.conv4_3.forward(x));
        features.push(x);

        features
    }
}
