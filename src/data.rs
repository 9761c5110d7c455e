//! Training samples of adjacent video frames, and the frame folders read at inference.

use std::path::{Path, PathBuf};

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use globwalk::{DirEntry, GlobWalkerBuilder};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

// The `Config` derive needs the two-parameter `Result` in scope.
use crate::error::{self, Error};
use crate::flow::{read_flo, FlowField};
use crate::imaging::{load_resized, load_square, RgbFrame};

/// Image extensions recognized as video frames.
pub const SUPPORTED_FILES: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Configuration of a [FrameSequenceDataset].
#[derive(Config, Debug)]
pub struct FrameSequenceConfig {
    /// Frames per sample.
    pub seq_size: usize,
    /// Distance, in frames, between two frames of a sample.
    #[config(default = 1)]
    pub interval: usize,
    /// Side of the square crops.
    #[config(default = 400)]
    pub image_size: usize,
    /// Load the optical flow between adjacent frames.
    #[config(default = false)]
    pub use_flow: bool,
    /// Root of the `.flo` files, mirroring the video directories.
    #[config(default = "None")]
    pub flow_dir: Option<String>,
    /// Seed of the sample order.
    #[config(default = 1234)]
    pub seed: u64,
}

/// One training sample.
#[derive(Debug, Clone)]
pub struct FrameSequenceItem {
    /// `seq_size` frames in temporal order.
    pub frames: Vec<RgbFrame>,
    /// Flow from every frame to the next one, when available.
    pub flows: Option<Vec<FlowField>>,
    /// Per-pair flow confidence. Never produced.
    pub confidences: Option<Vec<FlowField>>,
}

#[derive(Debug, Clone)]
struct Video {
    name: String,
    frames: Vec<PathBuf>,
}

/// Sequences of temporally adjacent frames taken from a directory of videos.
///
/// Every immediate subdirectory of the root is a video whose frames sort by file name.
#[derive(Debug)]
pub struct FrameSequenceDataset {
    videos: Vec<Video>,
    /// `(video, first frame)` of every sample.
    samples: Vec<(usize, usize)>,
    order: Vec<usize>,
    config: FrameSequenceConfig,
    rng: StdRng,
}

impl FrameSequenceDataset {
    pub fn new(root: impl AsRef<Path>, config: FrameSequenceConfig) -> error::Result<Self> {
        let root = root.as_ref();
        let mut videos = Vec::new();

        for dir in subdirectories(root)? {
            let frames = image_files(&dir, false)?;
            let name = dir
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| Error::InvalidPath(dir.clone()))?;
            videos.push(Video { name, frames });
        }

        let samples = enumerate_samples(&videos, config.seq_size, config.interval);
        if samples.is_empty() {
            return Err(Error::EmptyDataset(root.to_path_buf()));
        }
        log::info!(
            "Found {} samples in {} videos under {}",
            samples.len(),
            videos.len(),
            root.display()
        );

        let mut dataset = Self {
            order: (0..samples.len()).collect(),
            videos,
            samples,
            rng: StdRng::seed_from_u64(config.seed),
            config,
        };
        dataset.reset();

        Ok(dataset)
    }

    /// Reshuffles the sample order.
    pub fn reset(&mut self) {
        self.order.shuffle(&mut self.rng);
    }

    /// Loads the sample at `index` of the current order.
    ///
    /// This is the fallible entry point: unreadable frames or flow files are returned as
    /// errors. [Dataset::get] only logs them.
    pub fn load(&self, index: usize) -> error::Result<FrameSequenceItem> {
        let (video, start) = self.samples[self.order[index]];
        let video = &self.videos[video];
        let paths: Vec<&PathBuf> = (0..self.config.seq_size)
            .map(|i| &video.frames[start + i * self.config.interval])
            .collect();

        let frames = paths
            .iter()
            .map(|path| load_square(path, self.config.image_size))
            .collect::<error::Result<Vec<_>>>()?;

        let flows = match (&self.config.flow_dir, self.config.use_flow) {
            (Some(flow_dir), true) => load_flows(Path::new(flow_dir), &video.name, &paths)?,
            _ => None,
        };

        Ok(FrameSequenceItem {
            frames,
            flows,
            confidences: None,
        })
    }
}

impl Dataset<FrameSequenceItem> for FrameSequenceDataset {
    /// Logs load errors and returns `None`; use [FrameSequenceDataset::load] to see them.
    fn get(&self, index: usize) -> Option<FrameSequenceItem> {
        if index >= self.len() {
            return None;
        }

        match self.load(index) {
            Ok(item) => Some(item),
            Err(err) => {
                log::error!("Failed to load sample {index}: {err}");
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

fn enumerate_samples(videos: &[Video], seq_size: usize, interval: usize) -> Vec<(usize, usize)> {
    let span = seq_size.saturating_sub(1) * interval;

    videos
        .iter()
        .enumerate()
        .flat_map(|(v, video)| {
            let count = video.frames.len().saturating_sub(span);
            (0..count).map(move |start| (v, start))
        })
        .collect()
}

/// Flow of every adjacent pair, or `None` as soon as one file is missing.
fn load_flows(
    flow_dir: &Path,
    video: &str,
    frames: &[&PathBuf],
) -> error::Result<Option<Vec<FlowField>>> {
    let mut flows = Vec::with_capacity(frames.len().saturating_sub(1));

    for frame in frames.iter().take(frames.len().saturating_sub(1)) {
        let stem = frame
            .file_stem()
            .ok_or_else(|| Error::InvalidPath(frame.to_path_buf()))?;
        let path = flow_dir
            .join(video)
            .join(format!("{}.flo", stem.to_string_lossy()));
        if !path.is_file() {
            log::debug!("No flow file at {}", path.display());
            return Ok(None);
        }
        flows.push(read_flo(&path)?);
    }

    Ok(Some(flows))
}

/// A batch of frame sequences.
#[derive(Debug, Clone)]
pub struct FrameSequence<B: Backend> {
    /// `[frames, 3, size, size]` RGB frames on the `[0, 255]` scale.
    pub frames: Tensor<B, 4>,
    /// `[pairs, 2, size, size]`.
    pub flows: Option<Tensor<B, 4>>,
    pub confidences: Option<Tensor<B, 4>>,
}

/// Concatenates the frames of every item along the batch axis.
#[derive(Clone, Debug, Default)]
pub struct FrameSequenceBatcher;

impl<B: Backend> Batcher<B, FrameSequenceItem, FrameSequence<B>> for FrameSequenceBatcher {
    fn batch(&self, items: Vec<FrameSequenceItem>, device: &B::Device) -> FrameSequence<B> {
        let frames = items
            .iter()
            .flat_map(|item| item.frames.iter())
            .map(|frame| frame.to_tensor::<B>(device))
            .collect();

        let stack = |fields: Option<Vec<&FlowField>>| {
            fields
                .filter(|fields| !fields.is_empty())
                .map(|fields| {
                    Tensor::stack::<4>(
                        fields.iter().map(|field| field.to_tensor::<B>(device)).collect(),
                        0,
                    )
                })
        };
        let flows = stack(
            items
                .iter()
                .map(|item| item.flows.as_ref())
                .collect::<Option<Vec<_>>>()
                .map(|flows| flows.into_iter().flatten().collect()),
        );
        let confidences = stack(
            items
                .iter()
                .map(|item| item.confidences.as_ref())
                .collect::<Option<Vec<_>>>()
                .map(|confidences| confidences.into_iter().flatten().collect()),
        );

        FrameSequence {
            frames: Tensor::stack(frames, 0),
            flows,
            confidences,
        }
    }
}

/// How the frames of an inference directory are laid out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameLayout {
    /// One video per subdirectory.
    Nested,
    /// Images directly in the directory.
    Flat,
}

/// The frames to stylize, sorted by path.
#[derive(Debug, Clone)]
pub struct FrameFolder {
    root: PathBuf,
    layout: FrameLayout,
    samples: Vec<PathBuf>,
}

impl FrameFolder {
    pub fn open(dir: impl AsRef<Path>) -> error::Result<Self> {
        let root = dir.as_ref().to_path_buf();

        let nested = image_files(&root, true)?;
        let (layout, samples) = if nested.is_empty() {
            (FrameLayout::Flat, image_files(&root, false)?)
        } else {
            (FrameLayout::Nested, nested)
        };

        if samples.is_empty() {
            return Err(Error::EmptyDataset(root));
        }
        log::info!(
            "Found {} frames ({layout:?} layout) under {}",
            samples.len(),
            root.display()
        );

        Ok(Self {
            root,
            layout,
            samples,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn layout(&self) -> &FrameLayout {
        &self.layout
    }

    pub fn samples(&self) -> &[PathBuf] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Loads a frame as a `[1, 3, height, width]` RGB batch, shorter side resized to `size`.
    pub fn load<B: Backend>(
        &self,
        index: usize,
        size: Option<usize>,
        device: &B::Device,
    ) -> error::Result<Tensor<B, 4>> {
        Ok(load_resized::<B>(&self.samples[index], size, device)?.unsqueeze())
    }
}

/// Immediate subdirectories of `dir`, sorted.
fn subdirectories(dir: &Path) -> error::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|err| Error::io(dir, err))? {
        let path = entry.map_err(|err| Error::io(dir, err))?.path();
        if path.is_dir() {
            dirs.push(path);
        }
    }
    dirs.sort();

    Ok(dirs)
}

/// Images directly in `dir`, or one level below it when `nested`, sorted by path.
fn image_files(dir: &Path, nested: bool) -> error::Result<Vec<PathBuf>> {
    let extensions = SUPPORTED_FILES.join(",");
    let (pattern, depth) = if nested {
        (format!("*/*.{{{extensions}}}"), 2)
    } else {
        (format!("*.{{{extensions}}}"), 1)
    };

    let walker = GlobWalkerBuilder::from_patterns(dir, &[pattern])
        .max_depth(depth)
        .case_insensitive(true)
        .follow_links(true)
        .sort_by(|p1: &DirEntry, p2: &DirEntry| p1.path().cmp(p2.path()))
        .build()
        .map_err(|err| Error::InvalidArgument(format!("cannot walk {}: {err}", dir.display())))?;

    Ok(walker
        .filter_map(std::result::Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.path().to_path_buf())
        .collect())
}
