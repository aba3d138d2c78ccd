use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

pub mod assembly;
pub mod capture;
pub mod sim;
pub mod track;

#[cfg(test)]
mod testing;

pub use assembly::{
    AnimationAssembler, AssemblyError, EncodeJob, EncodeReport, EncodeSettings, FfmpegEncoder,
    VideoEncoder,
};
pub use capture::{
    AreaDescriptor, CaptureConfig, CaptureError, CapturePhase, CaptureProgress, CaptureSummary,
    ExportCompletion, ExportedFrame, FrameCaptureLoop, FrameRenderer, FrameRequest,
    ProgressHandle, RenderError,
};
pub use sim::{
    BlockKind, BlockSample, EntityId, EntitySample, OutputFrame, Simulation, TickStepCoordinator,
    TickTiming, TimingError, WorldView,
};
pub use track::{
    interpolation, AnimationKind, BlockTracker, EntityTracker, Facing, GridPos, InterpolationScope,
    MobileState, ObjectState, ProgressOverride, ProgressOverrideGuard, ProgressSlot, Region, Vec3,
};

pub const EXPORT_ROOT_ENV_VAR: &str = "TICKCAP_EXPORT_ROOT";
const DEFAULT_EXPORT_DIR: &str = "tickcap";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturePaths {
    pub root: PathBuf,
    pub staging_dir: PathBuf,
    pub frames_dir: PathBuf,
    pub animations_dir: PathBuf,
}

#[derive(Debug, Error)]
pub enum PathsError {
    #[error("failed to read environment variable {var}: {source}")]
    EnvVar {
        var: &'static str,
        #[source]
        source: env::VarError,
    },
    #[error("failed to resolve current directory: {0}")]
    CurrentDir(#[source] std::io::Error),
    #[error("{var} is set but empty")]
    EmptyEnvRoot { var: &'static str },
    #[error("failed to create export directory at {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub fn resolve_capture_paths() -> Result<CapturePaths, PathsError> {
    let root = resolve_export_root()?;
    capture_paths_at(&root)
}

pub fn capture_paths_at(root: &Path) -> Result<CapturePaths, PathsError> {
    let paths = CapturePaths {
        root: root.to_path_buf(),
        staging_dir: root.join("staging"),
        frames_dir: root.join("frames"),
        animations_dir: root.join("animations"),
    };
    for dir in [
        &paths.root,
        &paths.staging_dir,
        &paths.frames_dir,
        &paths.animations_dir,
    ] {
        fs::create_dir_all(dir).map_err(|source| PathsError::CreateDir {
            path: dir.clone(),
            source,
        })?;
    }
    Ok(CapturePaths {
        root: normalize_path(&paths.root),
        ..paths
    })
}

fn resolve_export_root() -> Result<PathBuf, PathsError> {
    match env::var(EXPORT_ROOT_ENV_VAR) {
        Ok(value) if value.trim().is_empty() => Err(PathsError::EmptyEnvRoot {
            var: EXPORT_ROOT_ENV_VAR,
        }),
        Ok(value) => Ok(PathBuf::from(value)),
        Err(env::VarError::NotPresent) => {
            let cwd = env::current_dir().map_err(PathsError::CurrentDir)?;
            Ok(cwd.join(DEFAULT_EXPORT_DIR))
        }
        Err(source) => Err(PathsError::EnvVar {
            var: EXPORT_ROOT_ENV_VAR,
            source,
        }),
    }
}

fn normalize_path(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
