//! Reader for `.flo` optical flow files (Middlebury format, as written by DeepFlow).

use std::path::Path;

use burn::prelude::*;

use crate::error::{Error, Result};

const FLO_TAG: f32 = 202021.25;
const HEADER_LEN: usize = 12;

/// Dense optical flow field.
#[derive(Debug, Clone, PartialEq)]
pub struct FlowField {
    /// Width in pixels.
    pub width: usize,
    /// Height in pixels.
    pub height: usize,
    /// Interleaved `[height, width, 2]` displacements `(u, v)`.
    pub data: Vec<f32>,
}

impl FlowField {
    /// Parses the content of a `.flo` file.
    pub fn parse(bytes: &[u8]) -> std::result::Result<Self, String> {
        if bytes.len() < HEADER_LEN {
            return Err(format!("{} bytes is shorter than the header", bytes.len()));
        }
        let word = |i: usize| [bytes[i], bytes[i + 1], bytes[i + 2], bytes[i + 3]];

        let tag = f32::from_le_bytes(word(0));
        if tag != FLO_TAG {
            return Err(format!("bad tag {tag}"));
        }
        let width = i32::from_le_bytes(word(4));
        let height = i32::from_le_bytes(word(8));
        if width <= 0 || height <= 0 {
            return Err(format!("bad dimensions {width}x{height}"));
        }
        let (width, height) = (width as usize, height as usize);

        let expected = width * height * 2;
        let data: Vec<f32> = bytes[HEADER_LEN..]
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        if data.len() < expected {
            return Err(format!(
                "expected {expected} values for {width}x{height}, found {}",
                data.len()
            ));
        }

        Ok(Self {
            width,
            height,
            data: data[..expected].to_vec(),
        })
    }

    /// Converts the field into a `[2, height, width]` tensor.
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 3> {
        let data = TensorData::new(self.data.clone(), [self.height, self.width, 2]);
        Tensor::<B, 3>::from_data(data.convert::<B::FloatElem>(), device).permute([2, 0, 1])
    }
}

/// Reads a `.flo` file.
pub fn read_flo(path: &Path) -> Result<FlowField> {
    let bytes = std::fs::read(path).map_err(|err| Error::io(path, err))?;

    FlowField::parse(&bytes).map_err(|reason| Error::InvalidFlow {
        path: path.to_path_buf(),
        reason,
    })
}
