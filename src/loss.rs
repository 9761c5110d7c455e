//! Loss composer: content, style and the two Frame Difference-Based temporal terms.
//!
//! The FDB terms compare the frame-to-frame change of the stylized sequence with the change
//! already present in the input sequence, so genuine motion is not penalized, only flicker
//! introduced by the network.

use burn::nn::loss::{HuberLoss, HuberLossConfig, MseLoss, Reduction};
use burn::prelude::*;

use crate::config::LossConfig;
use crate::tensor_ops::gram_matrix;

/// Index of the feature layer (relu3_3) used by the content and feature FDB terms.
pub const CONTENT_LAYER: usize = 2;

/// Gram matrices of the style reference, one `[1, channels, channels]` tensor per layer.
#[derive(Debug, Clone)]
pub struct StyleTargets<B: Backend> {
    grams: Vec<Tensor<B, 3>>,
}

impl<B: Backend> StyleTargets<B> {
    /// Computes the targets from the feature pyramid of the style image.
    pub fn from_features(features: Vec<Tensor<B, 4>>) -> Self {
        let grams = features
            .into_iter()
            .map(|layer| gram_matrix(layer).detach())
            .collect();

        Self { grams }
    }

    pub fn grams(&self) -> &[Tensor<B, 3>] {
        &self.grams
    }
}

/// The weighted loss terms of one training step.
#[derive(Debug, Clone)]
pub struct FdbLossOutput<B: Backend> {
    pub content: Tensor<B, 1>,
    pub style: Tensor<B, 1>,
    pub pixel_fdb: Tensor<B, 1>,
    pub feature_fdb: Tensor<B, 1>,
    /// Sum of the four terms; the tensor to differentiate.
    pub total: Tensor<B, 1>,
}

impl<B: Backend> FdbLossOutput<B> {
    /// Reads the terms back as plain numbers.
    pub fn values(&self) -> LossValues {
        let read = |t: &Tensor<B, 1>| t.clone().into_scalar().elem::<f64>();

        LossValues {
            content: read(&self.content),
            style: read(&self.style),
            pixel_fdb: read(&self.pixel_fdb),
            feature_fdb: read(&self.feature_fdb),
        }
    }
}

/// Scalar values of the loss terms.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LossValues {
    pub content: f64,
    pub style: f64,
    pub pixel_fdb: f64,
    pub feature_fdb: f64,
}

impl LossValues {
    pub fn total(&self) -> f64 {
        self.content + self.style + self.pixel_fdb + self.feature_fdb
    }
}

impl core::ops::AddAssign for LossValues {
    fn add_assign(&mut self, rhs: Self) {
        self.content += rhs.content;
        self.style += rhs.style;
        self.pixel_fdb += rhs.pixel_fdb;
        self.feature_fdb += rhs.feature_fdb;
    }
}

impl core::ops::Div<f64> for LossValues {
    type Output = Self;

    fn div(self, rhs: f64) -> Self {
        Self {
            content: self.content / rhs,
            style: self.style / rhs,
            pixel_fdb: self.pixel_fdb / rhs,
            feature_fdb: self.feature_fdb / rhs,
        }
    }
}

/// Combines the four weighted loss terms.
#[derive(Debug, Clone)]
pub struct LossComposer {
    content_weight: f64,
    style_weight: f64,
    pixel_fdb_weight: f64,
    feature_fdb_weight: f64,
    mse: MseLoss,
    huber: HuberLoss,
}

impl LossComposer {
    pub fn new(config: &LossConfig) -> Self {
        Self {
            content_weight: config.content_weight,
            style_weight: config.style_weight,
            pixel_fdb_weight: config.pixel_fdb_weight,
            feature_fdb_weight: config.feature_fdb_weight,
            mse: MseLoss::new(),
            // Huber with delta 1 is smooth-L1 with beta 1.
            huber: HuberLossConfig::new(1.0).init(),
        }
    }

    /// Computes every term from one network output and the two feature pyramids.
    ///
    /// `output` and `input` are the mean-subtracted stylized batch and the center-cropped,
    /// mean-subtracted input batch; the pyramids are their VGG features.
    pub fn forward<B: Backend>(
        &self,
        output: Tensor<B, 4>,
        input: Tensor<B, 4>,
        features_output: &[Tensor<B, 4>],
        features_input: &[Tensor<B, 4>],
        style: &StyleTargets<B>,
    ) -> FdbLossOutput<B> {
        let content = self.content_loss(features_output, features_input);
        let style = self.style_loss(features_output, style);
        let pixel_fdb = self.pixel_fdb_loss(output, input);
        let feature_fdb = self.feature_fdb_loss(features_output, features_input);
        let total = content.clone() + style.clone() + pixel_fdb.clone() + feature_fdb.clone();

        FdbLossOutput {
            content,
            style,
            pixel_fdb,
            feature_fdb,
            total,
        }
    }

    /// Weighted MSE between the content layer of the output and of the (detached) input.
    pub fn content_loss<B: Backend>(
        &self,
        features_output: &[Tensor<B, 4>],
        features_input: &[Tensor<B, 4>],
    ) -> Tensor<B, 1> {
        let target = features_input[CONTENT_LAYER].clone().detach();

        self.mse
            .forward(features_output[CONTENT_LAYER].clone(), target, Reduction::Mean)
            .mul_scalar(self.content_weight)
    }

    /// Weighted Gram-matrix MSE, computed sample by sample against the single style target,
    /// averaged over the batch and summed over the layers.
    pub fn style_loss<B: Backend>(
        &self,
        features_output: &[Tensor<B, 4>],
        style: &StyleTargets<B>,
    ) -> Tensor<B, 1> {
        let device = features_output[0].device();
        let mut loss = Tensor::<B, 1>::zeros([1], &device);

        for (layer, target) in features_output.iter().zip(style.grams()) {
            let gram = gram_matrix(layer.clone());
            let [batch, _, _] = gram.dims();

            let mut layer_loss = Tensor::<B, 1>::zeros([1], &device);
            for n in 0..batch {
                let sample = gram.clone().narrow(0, n, 1);
                layer_loss = layer_loss
                    + self
                        .mse
                        .forward(sample, target.clone(), Reduction::Mean)
                        .mul_scalar(self.style_weight);
            }
            loss = loss + layer_loss.div_scalar(batch as f64);
        }

        loss
    }

    /// Weighted MSE between the temporal differences of the output and of the input frames.
    pub fn pixel_fdb_loss<B: Backend>(
        &self,
        output: Tensor<B, 4>,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 1> {
        let device = output.device();
        match (temporal_difference(output), temporal_difference(input)) {
            (Some(output), Some(input)) => self
                .mse
                .forward(output, input, Reduction::Mean)
                .mul_scalar(self.pixel_fdb_weight),
            _ => Tensor::zeros([1], &device),
        }
    }

    /// Weighted smooth-L1 distance between the temporal differences of the content layer.
    pub fn feature_fdb_loss<B: Backend>(
        &self,
        features_output: &[Tensor<B, 4>],
        features_input: &[Tensor<B, 4>],
    ) -> Tensor<B, 1> {
        let output = features_output[CONTENT_LAYER].clone();
        let input = features_input[CONTENT_LAYER].clone();
        let device = output.device();

        match (temporal_difference(output), temporal_difference(input)) {
            (Some(output), Some(input)) => self
                .huber
                .forward(output, input, Reduction::Mean)
                .mul_scalar(self.feature_fdb_weight),
            _ => Tensor::zeros([1], &device),
        }
    }
}

/// `x[1:] - x[:-1]` along the frame axis; `None` for a single frame.
pub fn temporal_difference<B: Backend>(x: Tensor<B, 4>) -> Option<Tensor<B, 4>> {
    let [frames, _, _, _] = x.dims();
    if frames < 2 {
        return None;
    }

    Some(x.clone().narrow(0, 1, frames - 1) - x.narrow(0, 0, frames - 1))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Vgg16;
    use crate::tensor_ops::{center_crop, subtract_imagenet_mean};
    use burn::backend::NdArray;
    use burn::tensor::{Distribution, Tolerance, TensorData};

    type TestBackend = NdArray<f32>;
    type TT<const D: usize> = Tensor<TestBackend, D>;

    fn scalar(t: TT<1>) -> f32 {
        t.into_scalar()
    }

    fn composer() -> LossComposer {
        LossComposer::new(&LossConfig::new())
    }

    fn pyramid(batch: usize, device: &<TestBackend as Backend>::Device) -> Vec<TT<4>> {
        (0..4)
            .map(|i| TT::<4>::random([batch, 2 + i, 4, 4], Distribution::Default, device))
            .collect()
    }

    #[test]
    fn fdb_terms_vanish_when_differences_match() {
        let device = Default::default();
        // Whole numbers keep the offset exact in f32.
        let input =
            TT::<4>::random([3, 3, 8, 8], Distribution::Uniform(0.0, 255.0), &device).round();
        // A constant offset keeps the frame-to-frame differences unchanged.
        let output = input.clone().add_scalar(5.0);
        let features: Vec<_> = pyramid(3, &device)
            .into_iter()
            .map(|f| f.mul_scalar(16.0).round())
            .collect();
        let shifted: Vec<_> = features.iter().map(|f| f.clone().add_scalar(1.0)).collect();

        let composer = composer();

        assert_eq!(scalar(composer.pixel_fdb_loss(output, input)), 0.0);
        assert_eq!(scalar(composer.feature_fdb_loss(&shifted, &features)), 0.0);
    }

    #[test]
    fn pixel_fdb_penalizes_extra_flicker() {
        let device = Default::default();
        let input = TT::<4>::zeros([2, 1, 1, 1], &device);
        let output = TT::<4>::from_floats([[[[0.0]]], [[[2.0]]]], &device);

        let loss = LossComposer::new(&LossConfig::new().with_pixel_fdb_weight(1.0))
            .pixel_fdb_loss(output, input);

        assert_eq!(scalar(loss), 4.0);
    }

    #[test]
    fn feature_fdb_uses_smooth_l1() {
        let device = Default::default();
        let zeros = TT::<4>::zeros([2, 1, 1, 2], &device);
        // Differences 0.5 (quadratic branch) and 3.0 (linear branch).
        let moving = TT::<4>::from_floats([[[[0.0, 0.0]]], [[[0.5, 3.0]]]], &device);
        let input = vec![zeros.clone(), zeros.clone(), zeros.clone(), zeros];
        let output = vec![moving.clone(), moving.clone(), moving.clone(), moving];

        let loss = LossComposer::new(&LossConfig::new().with_feature_fdb_weight(1.0))
            .feature_fdb_loss(&output, &input);

        // (0.5 * 0.25 + (3.0 - 0.5)) / 2
        let expected = TensorData::from([1.3125f32]);
        loss.into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::default());
    }

    #[test]
    fn fdb_terms_stay_near_zero_for_fractional_offsets() {
        let device = Default::default();
        let input = TT::<4>::random([3, 3, 8, 8], Distribution::Default, &device);
        let output = input.clone().add_scalar(5.0);
        let features = pyramid(3, &device);
        let shifted: Vec<_> = features.iter().map(|f| f.clone().add_scalar(1.0)).collect();

        let composer = composer();

        assert!(scalar(composer.pixel_fdb_loss(output, input)) < 1e-6);
        assert!(scalar(composer.feature_fdb_loss(&shifted, &features)) < 1e-4);
    }

    #[test]
    fn single_frame_has_no_temporal_terms() {
        let device = Default::default();
        let x = TT::<4>::ones([1, 3, 4, 4], &device);

        assert!(temporal_difference(x.clone()).is_none());
        assert_eq!(scalar(composer().pixel_fdb_loss(x.clone(), x.mul_scalar(3.0))), 0.0);
    }

    #[test]
    fn style_loss_is_mean_of_per_sample_terms() {
        let device = Default::default();
        let sample_a = TT::<4>::random([1, 2, 3, 3], Distribution::Default, &device);
        let sample_b = TT::<4>::random([1, 2, 3, 3], Distribution::Default, &device);
        let style = TT::<4>::random([1, 2, 3, 3], Distribution::Default, &device);
        let targets = StyleTargets::from_features(vec![style]);
        let composer = LossComposer::new(&LossConfig::new().with_style_weight(1.0));

        let batch = TT::cat(vec![sample_a.clone(), sample_b.clone()], 0);
        let loss = scalar(composer.style_loss(&[batch], &targets));
        let loss_a = scalar(composer.style_loss(&[sample_a], &targets));
        let loss_b = scalar(composer.style_loss(&[sample_b], &targets));

        assert!((loss - (loss_a + loss_b) / 2.0).abs() < 1e-5);
    }

    #[test]
    fn style_loss_is_zero_against_own_statistics() {
        let device = Default::default();
        let features = pyramid(1, &device);
        let targets = StyleTargets::from_features(features.clone());

        assert_eq!(scalar(composer().style_loss(&features, &targets)), 0.0);
    }

    #[test]
    fn identical_frames_through_identity_network() {
        let device = Default::default();
        let vgg = Vgg16::<TestBackend>::new(&device);
        let frame = TT::<4>::random([1, 3, 16, 16], Distribution::Uniform(0.0, 255.0), &device);
        let x = TT::cat(vec![frame.clone(), frame], 0);
        let style_image = TT::<4>::random([1, 3, 16, 16], Distribution::Uniform(0.0, 255.0), &device);
        let style = StyleTargets::from_features(vgg.forward(subtract_imagenet_mean(style_image)));

        // Identity network.
        let y = x.clone();
        let xc = center_crop(x, 16, 16);
        let y = subtract_imagenet_mean(y);
        let xc = subtract_imagenet_mean(xc);
        let features_y = vgg.forward(y.clone());
        let features_xc = vgg.forward(xc.clone());

        let output = composer().forward(y, xc, &features_y, &features_xc, &style);
        let values = output.values();

        assert_eq!(values.pixel_fdb, 0.0);
        assert!(values.feature_fdb.abs() < 1e-6);
        assert!((values.total() - (values.content + values.style)).abs() < 1e-9);
        let total = output.total.into_scalar() as f64;
        assert!((total - (values.content + values.style)).abs() <= 1e-3 * total.abs().max(1.0));
    }

    #[test]
    fn running_values_average() {
        let mut sum = LossValues::default();
        sum += LossValues {
            content: 1.0,
            style: 2.0,
            pixel_fdb: 3.0,
            feature_fdb: 4.0,
        };
        sum += LossValues {
            content: 3.0,
            style: 2.0,
            pixel_fdb: 1.0,
            feature_fdb: 0.0,
        };

        let mean = sum / 2.0;

        assert_eq!(mean.content, 2.0);
        assert_eq!(mean.total(), 8.0);
    }
}
