//! Tensor helpers shared by the loss composer, the networks and the drivers.
//!
//! All frame batches are `[batch, channels, height, width]` with pixel values in `[0, 255]`.

use burn::prelude::*;

/// ImageNet channel means in BGR order, on the `[0, 255]` scale.
pub const IMAGENET_MEAN_BGR: [f32; 3] = [103.939, 116.779, 123.680];

/// Gram matrix of a feature batch.
///
/// # Shapes
///
/// - features: `[batch, channels, height, width]`
/// - output: `[batch, channels, channels]`, equal to `F · Fᵀ / (channels · height · width)`
///   where `F` is the `[batch, channels, height · width]` view of the features.
pub fn gram_matrix<B: Backend>(features: Tensor<B, 4>) -> Tensor<B, 3> {
    let [batch, channels, height, width] = features.dims();
    let features = features.reshape([batch, channels, height * width]);
    let features_t = features.clone().swap_dims(1, 2);

    features
        .matmul(features_t)
        .div_scalar((channels * height * width) as f32)
}

/// Crops the two trailing dimensions to `height × width` around the center.
///
/// When the size delta is odd, the extra row (or column) is removed from the bottom (or right).
pub fn center_crop<B: Backend>(x: Tensor<B, 4>, height: usize, width: usize) -> Tensor<B, 4> {
    let [batch, channels, h, w] = x.dims();
    if h == height && w == width {
        return x;
    }
    assert!(
        height <= h && width <= w,
        "Cannot center-crop a {h}x{w} tensor to {height}x{width}"
    );

    let top = (h - height) / 2;
    let left = (w - width) / 2;
    x.slice([
        0..batch,
        0..channels,
        top..top + height,
        left..left + width,
    ])
}

/// Reverses the order of the channel axis, turning RGB into BGR.
pub fn rgb_to_bgr<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let channel_dim = D - 3;
    let channels = x.dims()[channel_dim];
    let parts = (0..channels)
        .rev()
        .map(|c| x.clone().narrow(channel_dim, c, 1))
        .collect();

    Tensor::cat(parts, channel_dim)
}

/// Reverses the order of the channel axis, turning BGR into RGB.
pub fn bgr_to_rgb<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    rgb_to_bgr(x)
}

/// Subtracts the ImageNet mean from a BGR batch.
pub fn subtract_imagenet_mean<B: Backend>(batch: Tensor<B, 4>) -> Tensor<B, 4> {
    let mean = Tensor::<B, 1>::from_floats(IMAGENET_MEAN_BGR, &batch.device()).reshape([1, 3, 1, 1]);
    batch - mean
}

/// Reflection padding of the two trailing dimensions, edge values excluded.
///
/// `padding` is `(left, right, top, bottom)`; every amount must be smaller than the padded
/// dimension.
pub fn pad_reflect<B: Backend>(
    x: Tensor<B, 4>,
    padding: (usize, usize, usize, usize),
) -> Tensor<B, 4> {
    pad_border(x, padding, Border::Reflect)
}

/// Replicates the edge values into the padding.
pub fn pad_replicate<B: Backend>(
    x: Tensor<B, 4>,
    padding: (usize, usize, usize, usize),
) -> Tensor<B, 4> {
    pad_border(x, padding, Border::Edge)
}

/// Replicates the edge values into the padding from a detached copy of the input, so no
/// gradient flows back through the border.
pub fn pad_replicate_detached<B: Backend>(
    x: Tensor<B, 4>,
    padding: (usize, usize, usize, usize),
) -> Tensor<B, 4> {
    let (left, _, top, _) = padding;
    let [batch, channels, height, width] = x.dims();
    let border = pad_replicate(x.clone().detach(), padding);

    border.slice_assign(
        [
            0..batch,
            0..channels,
            top..top + height,
            left..left + width,
        ],
        x,
    )
}

/// Zero padding.
pub fn pad_zero<B: Backend>(x: Tensor<B, 4>, padding: (usize, usize, usize, usize)) -> Tensor<B, 4> {
    x.pad(padding, 0.0)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Border {
    Reflect,
    Edge,
}

// The constant `Tensor::pad` has no reflect or edge mode here, so both are built from slices.
fn pad_border<B: Backend>(
    x: Tensor<B, 4>,
    padding: (usize, usize, usize, usize),
    border: Border,
) -> Tensor<B, 4> {
    let (left, right, top, bottom) = padding;
    let mut result = x;

    if top > 0 || bottom > 0 {
        result = pad_dim(result, 2, top, bottom, border);
    }
    if left > 0 || right > 0 {
        result = pad_dim(result, 3, left, right, border);
    }

    result
}

fn pad_dim<B: Backend>(
    x: Tensor<B, 4>,
    dim: usize,
    before: usize,
    after: usize,
    border: Border,
) -> Tensor<B, 4> {
    let size = x.dims()[dim];
    if border == Border::Reflect {
        assert!(
            before < size && after < size,
            "Reflect padding ({before}, {after}) must be less than dimension size ({size})"
        );
    }

    let mut parts = Vec::with_capacity(before + after + 1);
    match border {
        Border::Reflect => {
            parts.extend((1..=before).rev().map(|i| x.clone().narrow(dim, i, 1)));
        }
        Border::Edge => {
            parts.extend((0..before).map(|_| x.clone().narrow(dim, 0, 1)));
        }
    }
    parts.push(x.clone());
    match border {
        Border::Reflect => {
            parts.extend((1..=after).map(|i| x.clone().narrow(dim, size - 1 - i, 1)));
        }
        Border::Edge => {
            parts.extend((0..after).map(|_| x.clone().narrow(dim, size - 1, 1)));
        }
    }

    Tensor::cat(parts, dim)
}

/// Padding that brings a frame to spatial dimensions divisible by four.
///
/// The needed delta of each dimension is split as `floor(delta / 2)` before and the rest after.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MultipleOfFour {
    /// Rows added on top.
    pub top: usize,
    /// Rows added at the bottom.
    pub bottom: usize,
    /// Columns added on the left.
    pub left: usize,
    /// Columns added on the right.
    pub right: usize,
}

impl MultipleOfFour {
    /// Computes the padding needed for a `height × width` frame.
    pub fn of(height: usize, width: usize) -> Self {
        let diff_h = (4 - height % 4) % 4;
        let diff_w = (4 - width % 4) % 4;
        let top = diff_h / 2;
        let left = diff_w / 2;

        Self {
            top,
            bottom: diff_h - top,
            left,
            right: diff_w - left,
        }
    }

    /// Whether the frame is already divisible by four in both dimensions.
    pub fn is_noop(&self) -> bool {
        self.top == 0 && self.bottom == 0 && self.left == 0 && self.right == 0
    }

    /// Reflect-pads the batch.
    pub fn pad<B: Backend>(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        if self.is_noop() {
            return x;
        }
        pad_reflect(x, (self.left, self.right, self.top, self.bottom))
    }

    /// Removes exactly the padding added by [pad](Self::pad) from a result batch.
    pub fn crop<B: Backend>(&self, y: Tensor<B, 4>) -> Tensor<B, 4> {
        if self.is_noop() {
            return y;
        }
        let [batch, channels, height, width] = y.dims();
        y.slice([
            0..batch,
            0..channels,
            self.top..height - self.bottom,
            self.left..width - self.right,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::tensor::{Tolerance, TensorData};

    type TestBackend = NdArray<f32>;

    fn arange(dims: [usize; 4]) -> Tensor<TestBackend, 4> {
        let n: usize = dims.iter().product();
        let values: Vec<f32> = (0..n).map(|v| v as f32).collect();
        Tensor::from_data(TensorData::new(values, dims), &Default::default())
    }

    #[test]
    fn gram_matrix_matches_definition() {
        let device = Default::default();
        // One sample, two channels, 1x2 spatial.
        let features = Tensor::<TestBackend, 4>::from_floats([[[[1.0, 2.0]], [[3.0, 4.0]]]], &device);

        let gram = gram_matrix(features);

        // F = [[1, 2], [3, 4]], F·Fᵀ = [[5, 11], [11, 25]], divided by 2·1·2.
        let expected = TensorData::from([[[1.25f32, 2.75], [2.75, 6.25]]]);
        gram.into_data()
            .assert_approx_eq::<f32>(&expected, Tolerance::default());
    }

    #[test]
    fn gram_matrix_is_symmetric_per_sample() {
        let features = arange([3, 4, 5, 6]).div_scalar(100.0);

        let gram = gram_matrix(features);

        assert_eq!(gram.dims(), [3, 4, 4]);
        let transposed = gram.clone().swap_dims(1, 2);
        gram.into_data()
            .assert_approx_eq::<f32>(&transposed.into_data(), Tolerance::default());
    }

    #[test]
    fn center_crop_is_noop_for_same_size() {
        let x = arange([1, 3, 4, 5]);

        let cropped = center_crop(x.clone(), 4, 5);

        cropped.into_data().assert_eq(&x.into_data(), true);
    }

    #[test]
    fn center_crop_returns_requested_size() {
        let x = arange([2, 3, 8, 9]);

        let cropped = center_crop(x, 4, 6);

        assert_eq!(cropped.dims(), [2, 3, 4, 6]);
    }

    #[test]
    fn center_crop_odd_delta_keeps_low_offset() {
        // 1x1x5x1 column [0, 1, 2, 3, 4], cropped to 2 rows: delta 3, offset 1.
        let x = arange([1, 1, 5, 1]);

        let cropped = center_crop(x, 2, 1);

        let expected = TensorData::from([[[[1.0f32], [2.0]]]]);
        cropped.into_data().assert_eq(&expected, false);
    }

    #[test]
    #[should_panic]
    fn center_crop_rejects_larger_target() {
        let x = arange([1, 1, 2, 2]);
        let _ = center_crop(x, 3, 2);
    }

    #[test]
    fn channel_swap_reverses_channels() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::from_floats([[[[1.0]], [[2.0]], [[3.0]]]], &device);

        let bgr = rgb_to_bgr(x.clone());

        let expected = TensorData::from([[[[3.0f32]], [[2.0]], [[1.0]]]]);
        bgr.clone().into_data().assert_eq(&expected, false);
        bgr_to_rgb(bgr).into_data().assert_eq(&x.into_data(), false);
    }

    #[test]
    fn subtract_mean_is_per_channel() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::full([1, 3, 2, 2], 200.0, &device);

        let centered = subtract_imagenet_mean(x);

        let values = centered.into_data().to_vec::<f32>().unwrap();
        assert!((values[0] - (200.0 - 103.939)).abs() < 1e-3);
        assert!((values[4] - (200.0 - 116.779)).abs() < 1e-3);
        assert!((values[8] - (200.0 - 123.680)).abs() < 1e-3);
    }

    #[test]
    fn reflect_padding_excludes_edge() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::from_floats([[[[1.0, 2.0, 3.0, 4.0]]]], &device);

        let padded = pad_reflect(x, (2, 1, 0, 0));

        let expected = TensorData::from([[[[3.0f32, 2.0, 1.0, 2.0, 3.0, 4.0, 3.0]]]]);
        padded.into_data().assert_eq(&expected, false);
    }

    #[test]
    fn replicate_and_zero_padding() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::from_floats([[[[1.0, 2.0]]]], &device);

        let replicated = pad_replicate(x.clone(), (1, 2, 0, 0));
        let zeroed = pad_zero(x, (1, 0, 1, 0));

        replicated
            .into_data()
            .assert_eq(&TensorData::from([[[[1.0f32, 1.0, 2.0, 2.0, 2.0]]]]), false);
        zeroed.into_data().assert_eq(
            &TensorData::from([[[[0.0f32, 0.0, 0.0], [0.0, 1.0, 2.0]]]]),
            false,
        );
    }

    #[test]
    fn multiple_of_four_splits_floor_ceil() {
        let fix = MultipleOfFour::of(255, 254);

        assert_eq!(fix.top, 0);
        assert_eq!(fix.bottom, 1);
        assert_eq!(fix.left, 1);
        assert_eq!(fix.right, 1);
        assert!(MultipleOfFour::of(256, 8).is_noop());

        let fix = MultipleOfFour::of(253, 256);
        assert_eq!((fix.top, fix.bottom), (1, 2));
    }

    #[test]
    fn multiple_of_four_round_trip_restores_dims() {
        for (h, w) in [(10, 13), (7, 9), (12, 15), (16, 16)] {
            let x = arange([1, 3, h, w]);
            let fix = MultipleOfFour::of(h, w);

            let padded = fix.pad(x.clone());
            let [_, _, ph, pw] = padded.dims();
            assert_eq!(ph % 4, 0);
            assert_eq!(pw % 4, 0);

            let restored = fix.crop(padded);
            restored.into_data().assert_eq(&x.into_data(), false);
        }
    }

    #[test]
    fn zero_padding_on_every_side() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::from_floats([[[[1.0, 2.0]]]], &device);

        let padded = pad_zero(x, (1, 2, 1, 1));

        let expected = TensorData::from([[[
            [0.0f32, 0.0, 0.0, 0.0, 0.0],
            [0.0, 1.0, 2.0, 0.0, 0.0],
            [0.0, 0.0, 0.0, 0.0, 0.0],
        ]]]);
        padded.into_data().assert_eq(&expected, false);
    }

    #[test]
    fn detached_replicate_matches_replicate_values() {
        let x = arange([2, 3, 3, 5]);
        let padding = (2, 1, 1, 3);

        let detached = pad_replicate_detached(x.clone(), padding);
        let attached = pad_replicate(x, padding);

        assert_eq!(detached.dims(), [2, 3, 7, 8]);
        detached.into_data().assert_eq(&attached.into_data(), false);
    }
}
