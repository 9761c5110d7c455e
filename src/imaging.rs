use std::path::Path;

use burn::prelude::*;
use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, RgbImage};

use crate::error::{Error, Result};
use crate::tensor_ops::bgr_to_rgb;

/// Opens an image and resizes it so that its shorter side equals `size`, keeping the
/// aspect ratio. `None` keeps the original size.
pub fn open_resized(path: &Path, size: Option<usize>) -> Result<DynamicImage> {
    let image = image::open(path).map_err(|err| Error::image(path, err))?;

    Ok(match size {
        Some(size) => resize_shorter_side(image, size as u32),
        None => image,
    })
}

fn resize_shorter_side(image: DynamicImage, size: u32) -> DynamicImage {
    let (width, height) = (image.width(), image.height());
    let scale = |longer: u32, shorter: u32| {
        ((size as f64 / shorter as f64 * longer as f64).round() as u32).max(size)
    };
    let (new_width, new_height) = if height < width {
        (scale(width, height), size)
    } else {
        (size, scale(height, width))
    };

    image.resize_exact(new_width, new_height, FilterType::Lanczos3)
}

/// Raw RGB pixels of an image, ready to be turned into a tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct RgbFrame {
    /// Interleaved `[height, width, 3]` pixels.
    pub pixels: Vec<u8>,
    /// Height in pixels.
    pub height: usize,
    /// Width in pixels.
    pub width: usize,
}

impl RgbFrame {
    /// Converts the frame into a `[3, height, width]` float tensor on the `[0, 255]` scale.
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 3> {
        let data = TensorData::new(self.pixels.clone(), Shape::new([self.height, self.width, 3]))
            .convert::<B::FloatElem>();

        Tensor::<B, 3>::from_data(data, device).permute([2, 0, 1])
    }
}

impl From<DynamicImage> for RgbFrame {
    fn from(image: DynamicImage) -> Self {
        let rgb = image.into_rgb8();
        let (width, height) = rgb.dimensions();

        Self {
            pixels: rgb.into_raw(),
            height: height as usize,
            width: width as usize,
        }
    }
}

/// Loads an RGB image as a `[3, height, width]` tensor, shorter side resized to `size`.
pub fn load_resized<B: Backend>(
    path: &Path,
    size: Option<usize>,
    device: &B::Device,
) -> Result<Tensor<B, 3>> {
    Ok(RgbFrame::from(open_resized(path, size)?).to_tensor(device))
}

/// Loads a frame whose shorter side is resized to `size`, then center-cropped to a square.
pub fn load_square(path: &Path, size: usize) -> Result<RgbFrame> {
    let image = open_resized(path, Some(size))?;
    let size = size as u32;
    let x = image.width().saturating_sub(size) / 2;
    let y = image.height().saturating_sub(size) / 2;

    Ok(RgbFrame::from(image.crop_imm(x, y, size, size)))
}

/// Maps a tensor to the `[0, 255]` pixel range.
///
/// Tensors with a maximum below 2 are assumed normalized: to `[-1, 1]` when the minimum is
/// below -0.5, to `[0, 1]` otherwise. Anything else is already on the pixel scale.
pub fn rescale_to_pixel_range<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Tensor<B, D> {
    let max = tensor.clone().max().into_scalar().elem::<f32>();
    if max >= 2.0 {
        return tensor;
    }

    let min = tensor.clone().min().into_scalar().elem::<f32>();
    if min < -0.5 {
        tensor.mul_scalar(127.5).add_scalar(127.5)
    } else {
        tensor.mul_scalar(255.0)
    }
}

/// Saves a `[channels, height, width]` tensor as an image, after mapping it to the pixel
/// range with [rescale_to_pixel_range]. One channel is written as grayscale, three as RGB.
/// The format follows the file extension.
pub fn save_image<B: Backend>(tensor: Tensor<B, 3>, path: &Path) -> Result<()> {
    write_pixels(rescale_to_pixel_range(tensor), path)
}

/// Saves a `[3, height, width]` BGR tensor on the `[0, 255]` scale as an RGB image.
///
/// Values are clamped, never rescaled: a dark frame stays dark.
pub fn save_bgr_image<B: Backend>(tensor: Tensor<B, 3>, path: &Path) -> Result<()> {
    write_pixels(bgr_to_rgb(tensor), path)
}

fn write_pixels<B: Backend>(tensor: Tensor<B, 3>, path: &Path) -> Result<()> {
    let [channels, height, width] = tensor.dims();
    let pixels: Vec<u8> = tensor
        .clamp(0.0, 255.0)
        .permute([1, 2, 0])
        .into_data()
        .iter::<f32>()
        .map(|value| value as u8)
        .collect();

    let (width, height) = (width as u32, height as u32);
    let saved = match channels {
        1 => GrayImage::from_raw(width, height, pixels).map(|img| img.save(path)),
        3 => RgbImage::from_raw(width, height, pixels).map(|img| img.save(path)),
        _ => panic!("Cannot save a tensor with {channels} channels as an image"),
    };

    match saved {
        Some(result) => result.map_err(|err| Error::image(path, err)),
        None => Err(Error::InvalidPath(path.to_path_buf())),
    }
}
