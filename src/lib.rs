//! Video style transfer with Frame Difference-Based (FDB) temporal losses.
//!
//! A pretrained feed-forward stylization network is fine-tuned so that the frame-to-frame
//! change of its output follows the change of its input, then run over video frames.

pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod data;
pub mod error;
pub mod flow;
pub mod imaging;
pub mod logging;
pub mod loss;
pub mod model;
pub mod stylize;
pub mod tensor_ops;
pub mod training;
pub mod video;

pub use error::{Error, Result};
