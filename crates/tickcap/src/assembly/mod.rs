use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use image::RgbaImage;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::capture::frame_path;

mod ffmpeg;

pub use ffmpeg::{FfmpegEncoder, FFMPEG_BINARY_ENV_VAR};

pub const ENCODER_THREAD_NAME: &str = "tickcap-encoder";
pub const ANIMATION_FILE_EXTENSION: &str = "mp4";

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("video encoder {encoder} is not available: {reason}")]
    EncodingUnavailable { encoder: String, reason: String },
    #[error("video encoding failed: {message}")]
    EncodingFailed { message: String },
    #[error("frame {frame_index} is missing or unreadable at {path}: {reason}")]
    MissingFrame {
        frame_index: u64,
        path: PathBuf,
        reason: String,
    },
    #[error("failed to create animation directory {path}: {source}")]
    CreateOutputDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to start encoder worker: {0}")]
    SpawnWorker(#[source] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeSettings {
    pub fps: u32,
    pub width: u32,
    pub height: u32,
    pub output: PathBuf,
}

pub trait VideoEncoder: Send + Sync {
    fn name(&self) -> &str;

    fn locate(&self) -> Result<(), AssemblyError>;

    fn encode(
        &self,
        settings: &EncodeSettings,
        frames: &mut dyn Iterator<Item = RgbaImage>,
    ) -> Result<u64, AssemblyError>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncodeReport {
    pub output: PathBuf,
    pub frames_encoded: u64,
    pub missing_frames: Vec<u64>,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    pub elapsed: Duration,
}

#[derive(Debug)]
pub struct EncodeJob {
    handle: JoinHandle<()>,
}

impl EncodeJob {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    pub fn join(self) -> bool {
        self.handle.join().is_ok()
    }
}

#[derive(Clone)]
pub struct AnimationAssembler {
    frames_dir: PathBuf,
    output_dir: PathBuf,
    fps: u32,
    encoder: Arc<dyn VideoEncoder>,
}

impl AnimationAssembler {
    pub fn new(
        frames_dir: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        fps: u32,
        encoder: Arc<dyn VideoEncoder>,
    ) -> Self {
        Self {
            frames_dir: frames_dir.into(),
            output_dir: output_dir.into(),
            fps: fps.max(1),
            encoder,
        }
    }

    pub fn frames_dir(&self) -> &Path {
        &self.frames_dir
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Starts encoding frames `0..frame_count` and returns immediately.
    /// `on_done` runs exactly once on the worker thread. Frame files are left
    /// in place either way.
    pub fn encode<F>(&self, frame_count: u64, on_done: F) -> Result<EncodeJob, AssemblyError>
    where
        F: FnOnce(Result<EncodeReport, AssemblyError>) + Send + 'static,
    {
        let assembler = self.clone();
        let handle = thread::Builder::new()
            .name(ENCODER_THREAD_NAME.to_string())
            .spawn(move || {
                let result = assembler.encode_blocking(frame_count);
                match &result {
                    Ok(report) => info!(
                        output = %report.output.display(),
                        frames_encoded = report.frames_encoded,
                        missing_frames = report.missing_frames.len(),
                        elapsed_ms = report.elapsed.as_millis() as u64,
                        "encode_finished"
                    ),
                    Err(error) => error!(error = %error, "encode_failed"),
                }
                on_done(result);
            })
            .map_err(AssemblyError::SpawnWorker)?;
        info!(
            frame_count,
            fps = self.fps,
            encoder = self.encoder.name(),
            "encode_started"
        );
        Ok(EncodeJob { handle })
    }

    pub fn encode_blocking(&self, frame_count: u64) -> Result<EncodeReport, AssemblyError> {
        let started = Instant::now();
        self.encoder.locate()?;

        let mut sequence = FrameSequence::open(&self.frames_dir, frame_count)?;
        fs::create_dir_all(&self.output_dir).map_err(|source| AssemblyError::CreateOutputDir {
            path: self.output_dir.clone(),
            source,
        })?;
        let settings = EncodeSettings {
            fps: self.fps,
            width: sequence.width,
            height: sequence.height,
            output: unique_output_path(&self.output_dir, unix_millis()),
        };
        debug!(
            output = %settings.output.display(),
            width = settings.width,
            height = settings.height,
            "encode_settings"
        );

        let frames_encoded = self.encoder.encode(&settings, &mut sequence)?;
        if frames_encoded == 0 {
            return Err(AssemblyError::EncodingFailed {
                message: "encoder wrote no frames".to_string(),
            });
        }

        Ok(EncodeReport {
            output: settings.output,
            frames_encoded,
            missing_frames: sequence.missing,
            width: settings.width,
            height: settings.height,
            fps: self.fps,
            elapsed: started.elapsed(),
        })
    }
}

/// Frames `0..frame_count` in order, skipping holes.
///
/// The first readable frame fixes the video dimensions; frames that are
/// missing, undecodable or of another size are logged and skipped.
struct FrameSequence {
    frames_dir: PathBuf,
    next_index: u64,
    frame_count: u64,
    width: u32,
    height: u32,
    first: Option<RgbaImage>,
    missing: Vec<u64>,
}

impl FrameSequence {
    fn open(frames_dir: &Path, frame_count: u64) -> Result<Self, AssemblyError> {
        let mut missing = Vec::new();
        for frame_index in 0..frame_count {
            match load_frame(frames_dir, frame_index) {
                Ok(image) => {
                    return Ok(Self {
                        frames_dir: frames_dir.to_path_buf(),
                        next_index: frame_index + 1,
                        frame_count,
                        width: image.width(),
                        height: image.height(),
                        first: Some(image),
                        missing,
                    });
                }
                Err(error) => {
                    warn!(error = %error, "frame_skipped");
                    missing.push(frame_index);
                }
            }
        }
        Err(AssemblyError::EncodingFailed {
            message: format!(
                "no readable frames among {frame_count} in {}",
                frames_dir.display()
            ),
        })
    }
}

impl Iterator for FrameSequence {
    type Item = RgbaImage;

    fn next(&mut self) -> Option<RgbaImage> {
        if let Some(first) = self.first.take() {
            return Some(first);
        }
        while self.next_index < self.frame_count {
            let frame_index = self.next_index;
            self.next_index += 1;
            match load_frame(&self.frames_dir, frame_index) {
                Ok(image) if image.dimensions() == (self.width, self.height) => {
                    return Some(image);
                }
                Ok(image) => {
                    let error = AssemblyError::MissingFrame {
                        frame_index,
                        path: frame_path(&self.frames_dir, frame_index),
                        reason: format!(
                            "size {}x{} does not match {}x{}",
                            image.width(),
                            image.height(),
                            self.width,
                            self.height
                        ),
                    };
                    warn!(error = %error, "frame_skipped");
                    self.missing.push(frame_index);
                }
                Err(error) => {
                    warn!(error = %error, "frame_skipped");
                    self.missing.push(frame_index);
                }
            }
        }
        None
    }
}

fn load_frame(frames_dir: &Path, frame_index: u64) -> Result<RgbaImage, AssemblyError> {
    let path = frame_path(frames_dir, frame_index);
    if !path.is_file() {
        return Err(AssemblyError::MissingFrame {
            frame_index,
            path,
            reason: "file not found".to_string(),
        });
    }
    match image::open(&path) {
        Ok(image) => Ok(image.into_rgba8()),
        Err(error) => Err(AssemblyError::MissingFrame {
            frame_index,
            path,
            reason: error.to_string(),
        }),
    }
}

pub fn unique_output_path(output_dir: &Path, millis: u128) -> PathBuf {
    let base = output_dir.join(format!("animation_{millis}.{ANIMATION_FILE_EXTENSION}"));
    if !base.exists() {
        return base;
    }
    let mut suffix = 1u32;
    loop {
        let candidate = output_dir.join(format!(
            "animation_{millis}_{suffix}.{ANIMATION_FILE_EXTENSION}"
        ));
        if !candidate.exists() {
            return candidate;
        }
        suffix += 1;
    }
}

fn unix_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis())
        .unwrap_or(0)
}
