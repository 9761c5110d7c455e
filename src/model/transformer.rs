use burn::module::Ignored;
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{InstanceNorm, InstanceNormConfig, PaddingConfig2d};
use burn::prelude::*;
use burn::tensor::activation::relu;
use burn::tensor::module::interpolate;
use burn::tensor::ops::{InterpolateMode, InterpolateOptions};

use super::padding::BorderMode;
use crate::config::{ModelType, PadType};
use crate::tensor_ops::center_crop;

const NUM_RESIDUALS: usize = 5;

/// Configuration to create a [stylization network](TransformerNet).
#[derive(Config, Debug)]
pub struct TransformerNetConfig {
    /// Border handling of every convolution.
    pub pad_type: PadType,
    /// Feed the previous stylized frame as three extra input channels.
    #[config(default = false)]
    pub recurrent: bool,
}

impl TransformerNetConfig {
    /// Configuration of the given network variant.
    pub fn for_model(model_type: ModelType, pad_type: PadType) -> Self {
        Self::new(pad_type).with_recurrent(model_type == ModelType::Rnn)
    }

    /// Initializes a network with random weights.
    pub fn init<B: Backend>(&self, device: &B::Device) -> TransformerNet<B> {
        let pad = self.pad_type;
        let border = BorderMode::for_layer(pad, false);
        let in_channels = if self.recurrent { 6 } else { 3 };

        TransformerNet {
            conv1: ConvLayer::new(in_channels, 32, 9, 1, 1, BorderMode::for_layer(pad, true), device),
            in1: InstanceNormConfig::new(32).init(device),
            conv2: ConvLayer::new(32, 64, 3, 2, 1, border, device),
            in2: InstanceNormConfig::new(64).init(device),
            conv3: ConvLayer::new(64, 128, 3, 2, 1, border, device),
            in3: InstanceNormConfig::new(128).init(device),
            residuals: (0..NUM_RESIDUALS)
                .map(|_| ResidualBlock::new(128, border, device))
                .collect(),
            deconv1: ConvLayer::new(128, 64, 3, 1, 2, border, device),
            in4: InstanceNormConfig::new(64).init(device),
            deconv2: ConvLayer::new(64, 32, 3, 1, 2, border, device),
            in5: InstanceNormConfig::new(32).init(device),
            deconv3: ConvLayer::new(32, 3, 9, 1, 1, border, device),
            pad_type: Ignored(pad),
            recurrent: self.recurrent,
        }
    }
}

/// Feed-forward image transformation network: three downsampling convolutions, residual
/// blocks, two nearest-upsampling convolutions and an output convolution.
///
/// Input and output are BGR frame batches on the `[0, 255]` scale.
#[derive(Module, Debug)]
pub struct TransformerNet<B: Backend> {
    pub(crate) conv1: ConvLayer<B>,
    in1: InstanceNorm<B>,
    conv2: ConvLayer<B>,
    in2: InstanceNorm<B>,
    conv3: ConvLayer<B>,
    in3: InstanceNorm<B>,
    residuals: Vec<ResidualBlock<B>>,
    deconv1: ConvLayer<B>,
    in4: InstanceNorm<B>,
    deconv2: ConvLayer<B>,
    in5: InstanceNorm<B>,
    deconv3: ConvLayer<B>,
    pad_type: Ignored<PadType>,
    recurrent: bool,
}

impl<B: Backend> TransformerNet<B> {
    /// Whether the network expects the previous stylized frame as extra input.
    pub fn is_recurrent(&self) -> bool {
        self.recurrent
    }

    /// Replaces the first convolution with a freshly initialized one taking six input channels,
    /// keeping every other parameter, and switches the network to recurrent mode.
    pub fn widen_input(mut self, device: &B::Device) -> Self {
        let border = BorderMode::for_layer(self.pad_type.0, true);
        self.conv1 = ConvLayer::new(6, 32, 9, 1, 1, border, device);
        self.recurrent = true;
        self
    }

    /// Stylizes a sequence of frames.
    ///
    /// The recurrent variant walks the batch in order, conditioning every frame on the
    /// stylized previous one.
    ///
    /// # Shapes
    ///
    /// - frames: `[seq, 3, height, width]`
    /// - output: `[seq, 3, height', width']`
    pub fn forward(&self, frames: Tensor<B, 4>) -> Tensor<B, 4> {
        if !self.recurrent {
            return self.transform(frames);
        }

        let [seq, _, _, _] = frames.dims();
        let mut outputs = Vec::with_capacity(seq);
        let mut previous = None;
        for i in 0..seq {
            let output = self.forward_step(frames.clone().narrow(0, i, 1), previous);
            previous = Some(output.clone());
            outputs.push(output);
        }

        Tensor::cat(outputs, 0)
    }

    /// Stylizes one frame. `previous` is the stylized previous frame of the same video; it is
    /// ignored by the single-frame variant and defaults to the frame itself at the start of a
    /// video.
    pub fn forward_step(&self, frame: Tensor<B, 4>, previous: Option<Tensor<B, 4>>) -> Tensor<B, 4> {
        if !self.recurrent {
            return self.transform(frame);
        }

        let [_, _, height, width] = frame.dims();
        let previous = match previous {
            Some(previous) => {
                let [_, _, h, w] = previous.dims();
                if (h, w) == (height, width) {
                    previous
                } else {
                    interpolate(
                        previous,
                        [height, width],
                        InterpolateOptions::new(InterpolateMode::Nearest),
                    )
                }
            }
            None => frame.clone(),
        };

        self.transform(Tensor::cat(vec![frame, previous], 1))
    }

    fn transform(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.in1.forward(self.conv1.forward(x)));
        let x = relu(self.in2.forward(self.conv2.forward(x)));
        let mut x = relu(self.in3.forward(self.conv3.forward(x)));
        for block in self.residuals.iter() {
            x = block.forward(x);
        }
        let x = relu(self.in4.forward(self.deconv1.forward(x)));
        let x = relu(self.in5.forward(self.deconv2.forward(x)));

        self.deconv3.forward(x)
    }
}

/// Convolution preceded by an optional nearest upsampling and a border fill of `kernel / 2`.
#[derive(Module, Debug)]
pub struct ConvLayer<B: Backend> {
    conv: Conv2d<B>,
    border: Ignored<BorderMode>,
    padding: usize,
    upsample: usize,
}

impl<B: Backend> ConvLayer<B> {
    fn new(
        channels_in: usize,
        channels_out: usize,
        kernel_size: usize,
        stride: usize,
        upsample: usize,
        border: BorderMode,
        device: &B::Device,
    ) -> Self {
        let conv = Conv2dConfig::new([channels_in, channels_out], [kernel_size, kernel_size])
            .with_stride([stride, stride])
            .with_padding(PaddingConfig2d::Valid)
            .init(device);

        Self {
            conv,
            border: Ignored(border),
            padding: kernel_size / 2,
            upsample,
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = if self.upsample > 1 {
            let [_, _, height, width] = x.dims();
            interpolate(
                x,
                [height * self.upsample, width * self.upsample],
                InterpolateOptions::new(InterpolateMode::Nearest),
            )
        } else {
            x
        };

        self.conv.forward(self.border.apply(x, self.padding))
    }
}

/// Two 3x3 convolutions with instance normalization and a skip connection.
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    conv1: ConvLayer<B>,
    in1: InstanceNorm<B>,
    conv2: ConvLayer<B>,
    in2: InstanceNorm<B>,
}

impl<B: Backend> ResidualBlock<B> {
    fn new(channels: usize, border: BorderMode, device: &B::Device) -> Self {
        Self {
            conv1: ConvLayer::new(channels, channels, 3, 1, 1, border, device),
            in1: InstanceNormConfig::new(channels).init(device),
            conv2: ConvLayer::new(channels, channels, 3, 1, 1, border, device),
            in2: InstanceNormConfig::new(channels).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let residual = x.clone();
        let out = relu(self.in1.forward(self.conv1.forward(x)));
        let out = self.in2.forward(self.conv2.forward(out));

        // Unpadded convolutions shrink the branch.
        let [_, _, height, width] = out.dims();
        out + center_crop(residual, height, width)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn padded_network_preserves_size() {
        let device = Default::default();
        for pad in [
            PadType::InterpolateDetach,
            PadType::ReflectStart,
            PadType::Reflect,
            PadType::Replicate,
            PadType::Zero,
        ] {
            let net: TransformerNet<TestBackend> = TransformerNetConfig::new(pad).init(&device);
            let x = Tensor::<TestBackend, 4>::ones([2, 3, 16, 16], &device);

            assert_eq!(net.forward(x).dims(), [2, 3, 16, 16], "{pad}");
        }
    }

    #[test]
    fn unpadded_network_shrinks_output() {
        let device = Default::default();
        let net: TransformerNet<TestBackend> =
            TransformerNetConfig::new(PadType::Unpadded).init(&device);
        let x = Tensor::<TestBackend, 4>::ones([1, 3, 128, 128], &device);

        let [_, channels, height, width] = net.forward(x).dims();

        assert_eq!(channels, 3);
        assert!(height < 128 && width < 128);
    }

    #[test]
    fn recurrent_network_walks_sequence() {
        let device = Default::default();
        let net: TransformerNet<TestBackend> =
            TransformerNetConfig::for_model(ModelType::Rnn, PadType::Reflect).init(&device);
        let x = Tensor::<TestBackend, 4>::ones([4, 3, 8, 8], &device);

        assert!(net.is_recurrent());
        assert_eq!(net.forward(x).dims(), [4, 3, 8, 8]);
    }

    #[test]
    fn widen_input_keeps_other_layers() {
        let device = Default::default();
        let net: TransformerNet<TestBackend> =
            TransformerNetConfig::new(PadType::Reflect).init(&device);
        let before = net.deconv3.conv.weight.val().into_data();

        let net = net.widen_input(&device);

        assert!(net.is_recurrent());
        assert_eq!(net.conv1.conv.weight.dims(), [32, 6, 9, 9]);
        net.deconv3
            .conv
            .weight
            .val()
            .into_data()
            .assert_eq(&before, true);
    }
}
