use std::path::{Path, PathBuf};

use burn::module::Module;
use burn::prelude::*;
use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
use globwalk::GlobWalkerBuilder;

use crate::error::{Error, Result};

/// Glob matching the checkpoints of a model directory.
pub const CHECKPOINT_PATTERN: &str = "epoch*.model";

/// File name of the checkpoint saved at the end of `epoch`.
pub fn checkpoint_file_name(epoch: usize, content_weight: f64, style_weight: f64) -> String {
    format!(
        "epoch_{epoch}_{}_{}.model",
        float_repr(content_weight),
        float_repr(style_weight)
    )
}

/// Shortest round-trip form of `value`, with a signed two-digit exponent (`1e-05`, `1e+16`).
fn float_repr(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }

    let repr = format!("{value:?}");
    match repr.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(digits) => ('-', digits),
                None => ('+', exponent),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => repr,
    }
}

/// The lexicographically greatest checkpoint in `dir`, if any.
pub fn latest_checkpoint(dir: impl AsRef<Path>) -> Option<PathBuf> {
    let dir = dir.as_ref();
    let walker = match GlobWalkerBuilder::from_patterns(dir, &[CHECKPOINT_PATTERN])
        .max_depth(1)
        .build()
    {
        Ok(walker) => walker,
        Err(err) => {
            log::warn!("Cannot search checkpoints in {}: {err}", dir.display());
            return None;
        }
    };

    walker
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().to_path_buf())
        .max()
}

/// Serializes the record of `model` into `path`.
pub fn save_model<B: Backend, M: Module<B>>(model: &M, path: &Path) -> Result<()> {
    let bytes = BinBytesRecorder::<FullPrecisionSettings>::default()
        .record(model.clone().into_record(), ())?;

    std::fs::write(path, bytes).map_err(|err| Error::io(path, err))?;
    log::info!("Model saved to {}", path.display());

    Ok(())
}

/// Reads a record written by [save_model].
pub fn load_record<B: Backend, M: Module<B>>(path: &Path, device: &B::Device) -> Result<M::Record> {
    let bytes = std::fs::read(path).map_err(|err| Error::io(path, err))?;
    let record = BinBytesRecorder::<FullPrecisionSettings>::default().load(bytes, device)?;
    log::info!("=> Load model from {}", path.display());

    Ok(record)
}
