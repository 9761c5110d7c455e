use std::path::PathBuf;

use burn::record::RecorderError;
use thiserror::Error;

/// Result alias used across the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while training or stylizing.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O operation error.
    #[error("I/O error on `{path}`: {source}")]
    Io {
        /// Path involved in the failed operation.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },

    /// Image decoding or encoding error.
    #[error("image error on `{path}`: {source}")]
    Image {
        /// Path of the image.
        path: PathBuf,
        /// Underlying error.
        source: image::ImageError,
    },

    /// Model record could not be serialized or deserialized.
    #[error("record error: {0:?}")]
    Record(RecorderError),

    /// No `epoch*.model` file in the given directory.
    #[error("no checkpoint matching `epoch*.model` in `{0}`")]
    CheckpointNotFound(PathBuf),

    /// Pretrained VGG16 weights are missing.
    #[error("VGG16 weights not found in `{0}` (expected `vgg16.weight` or `vgg16.mpk`)")]
    VggWeightsNotFound(PathBuf),

    /// The dataset root holds no usable sample.
    #[error("no usable frames under `{0}`")]
    EmptyDataset(PathBuf),

    /// Malformed optical flow file.
    #[error("invalid flow file `{path}`: {reason}")]
    InvalidFlow {
        /// Path of the flow file.
        path: PathBuf,
        /// What was wrong.
        reason: String,
    },

    /// A command line or configuration value is invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A path could not be interpreted.
    #[error("invalid path `{0}`")]
    InvalidPath(PathBuf),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn image(path: impl Into<PathBuf>, source: image::ImageError) -> Self {
        Self::Image {
            path: path.into(),
            source,
        }
    }
}

impl From<RecorderError> for Error {
    fn from(err: RecorderError) -> Self {
        Self::Record(err)
    }
}
