//! Assembles stylized frames into videos with the `ffmpeg` binary.

use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, Result};
use crate::stylize::OutputLayout;

/// Frame name patterns tried in order; at most one matches a directory.
pub const FRAME_PATTERNS: [&str; 2] = ["frame_%04d.png", "%05d.jpg"];

/// Name of the video written next to the frames.
pub const VIDEO_FILE_NAME: &str = "stylized.mp4";

/// An `ffmpeg` invocation encoding an image sequence into an H.264 video.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncoderCommand {
    pub input_pattern: PathBuf,
    pub output: PathBuf,
}

impl EncoderCommand {
    pub fn new(input_pattern: impl Into<PathBuf>, output: impl Into<PathBuf>) -> Self {
        Self {
            input_pattern: input_pattern.into(),
            output: output.into(),
        }
    }

    /// Arguments passed to `ffmpeg`.
    pub fn args(&self) -> Vec<String> {
        let mut args: Vec<String> = ["-y", "-f", "image2", "-i"]
            .into_iter()
            .map(String::from)
            .collect();
        args.push(self.input_pattern.to_string_lossy().into_owned());
        args.extend(
            [
                "-vcodec",
                "libx264",
                "-pix_fmt",
                "yuv420p",
                "-b:v",
                "16000k",
                "-vf",
                "scale=trunc(iw/2)*2:trunc(ih/2)*2",
            ]
            .into_iter()
            .map(String::from),
        );
        args.push(self.output.to_string_lossy().into_owned());
        args
    }

    /// Runs the encoder; failures are logged and reported as `false`.
    pub fn run(&self) -> bool {
        let args = self.args();
        log::info!("ffmpeg {}", args.join(" "));

        match Command::new("ffmpeg").args(&args).status() {
            Ok(status) if status.success() => true,
            Ok(status) => {
                log::warn!(
                    "ffmpeg exited with {status} for {}",
                    self.input_pattern.display()
                );
                false
            }
            Err(err) => {
                log::warn!("Cannot run ffmpeg: {err}");
                false
            }
        }
    }
}

/// A directory of stylized frames and the name of the video it came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoDir {
    pub frames_dir: PathBuf,
    pub video_name: String,
}

/// Output directories of `samples`, in order of first appearance among consecutive runs.
pub fn video_dirs(samples: &[PathBuf], layout: &OutputLayout) -> Result<Vec<VideoDir>> {
    let mut dirs: Vec<VideoDir> = Vec::new();

    for sample in samples {
        let frames_dir = layout.frame_dir(sample)?;
        if dirs.last().map(|dir| &dir.frames_dir) == Some(&frames_dir) {
            continue;
        }
        let video_name = sample
            .parent()
            .and_then(Path::file_name)
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidPath(sample.clone()))?;

        dirs.push(VideoDir {
            frames_dir,
            video_name,
        });
    }

    Ok(dirs)
}

/// Encodes every output directory into `stylized.mp4` and copies the video to
/// `<download_dir>/<video>_<model>.mp4`.
pub fn assemble_videos(samples: &[PathBuf], layout: &OutputLayout, download_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(download_dir).map_err(|err| Error::io(download_dir, err))?;

    for dir in video_dirs(samples, layout)? {
        let video = dir.frames_dir.join(VIDEO_FILE_NAME);
        for pattern in FRAME_PATTERNS {
            EncoderCommand::new(dir.frames_dir.join(pattern), &video).run();
        }

        let target = download_dir.join(format!("{}_{}.mp4", dir.video_name, layout.model_name()));
        log::info!("Copy {} to {}", video.display(), target.display());
        if let Err(err) = std::fs::copy(&video, &target) {
            log::warn!("Cannot copy {} to {}: {err}", video.display(), target.display());
        }
    }

    Ok(())
}
