use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

pub const FRAME_FILE_EXTENSION: &str = "png";
pub const SESSION_MANIFEST_FILE: &str = "capture.manifest.json";
pub(crate) const SESSION_MANIFEST_FORMAT_VERSION: u16 = 1;

#[derive(Debug, Error)]
pub enum FrameFileError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to list directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to remove {path}: {source}")]
    RemoveFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to move frame {from} to {to}: {source}")]
    Rename {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("invalid session manifest {path}: {message}")]
    InvalidManifest { path: PathBuf, message: String },
}

pub fn frame_file_name(frame_index: u64) -> String {
    format!("frame_{frame_index:05}.{FRAME_FILE_EXTENSION}")
}

pub fn frame_path(frames_dir: &Path, frame_index: u64) -> PathBuf {
    frames_dir.join(frame_file_name(frame_index))
}

pub fn clear_frame_dir(frames_dir: &Path) -> Result<usize, FrameFileError> {
    fs::create_dir_all(frames_dir).map_err(|source| FrameFileError::CreateDir {
        path: frames_dir.to_path_buf(),
        source,
    })?;

    let entries = fs::read_dir(frames_dir).map_err(|source| FrameFileError::ReadDir {
        path: frames_dir.to_path_buf(),
        source,
    })?;

    let mut removed = 0;
    for entry in entries {
        let entry = entry.map_err(|source| FrameFileError::ReadDir {
            path: frames_dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        fs::remove_file(&path).map_err(|source| FrameFileError::RemoveFile {
            path: path.clone(),
            source,
        })?;
        removed += 1;
    }

    if removed > 0 {
        info!(dir = %frames_dir.display(), removed, "frame_dir_cleared");
    }
    Ok(removed)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct PendingRename {
    from: PathBuf,
    to: PathBuf,
}

#[derive(Debug)]
pub struct RenameBatch {
    frames_dir: PathBuf,
    batch_size: usize,
    pending: Vec<PendingRename>,
    flushes: u64,
    moved: u64,
}

impl RenameBatch {
    pub fn new(frames_dir: impl Into<PathBuf>, batch_size: usize) -> Self {
        Self {
            frames_dir: frames_dir.into(),
            batch_size: batch_size.max(1),
            pending: Vec::new(),
            flushes: 0,
            moved: 0,
        }
    }

    pub fn frames_dir(&self) -> &Path {
        &self.frames_dir
    }

    pub fn push(&mut self, exported: PathBuf, frame_index: u64) -> bool {
        self.pending.push(PendingRename {
            from: exported,
            to: frame_path(&self.frames_dir, frame_index),
        });
        self.pending.len() >= self.batch_size
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn flushes(&self) -> u64 {
        self.flushes
    }

    pub fn moved(&self) -> u64 {
        self.moved
    }

    /// Moves every queued frame. A failed move is logged and skipped; the
    /// first failure is returned after the rest of the batch was attempted.
    pub fn flush(&mut self) -> Result<usize, FrameFileError> {
        if self.pending.is_empty() {
            return Ok(0);
        }
        self.flushes = self.flushes.saturating_add(1);

        let mut moved = 0;
        let mut first_error = None;
        for rename in self.pending.drain(..) {
            match move_file(&rename.from, &rename.to) {
                Ok(()) => moved += 1,
                Err(source) => {
                    warn!(
                        from = %rename.from.display(),
                        to = %rename.to.display(),
                        error = %source,
                        "frame_rename_failed"
                    );
                    first_error.get_or_insert(FrameFileError::Rename {
                        from: rename.from,
                        to: rename.to,
                        source,
                    });
                }
            }
        }
        self.moved = self.moved.saturating_add(moved as u64);
        debug!(moved, flushes = self.flushes, "frame_renames_flushed");

        match first_error {
            Some(error) => Err(error),
            None => Ok(moved),
        }
    }
}

fn move_file(from: &Path, to: &Path) -> io::Result<()> {
    if !from.is_file() {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            format!("staged export {} is missing", from.display()),
        ));
    }
    if fs::rename(from, to).is_ok() {
        return Ok(());
    }
    match fs::remove_file(to) {
        Ok(()) => {}
        Err(error) if error.kind() == io::ErrorKind::NotFound => {}
        Err(error) => return Err(error),
    }
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        // Staging directories may live on another filesystem.
        Err(_) => {
            fs::copy(from, to)?;
            fs::remove_file(from)
        }
    }
}

pub(crate) fn write_bytes_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = temp_path_for(path);
    fs::write(&tmp_path, bytes)?;
    if let Err(error) = move_file(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(error);
    }
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .unwrap_or("capture.tmp");
    let tmp_name = format!("{file_name}.tmp");
    match path.parent() {
        Some(parent) => parent.join(tmp_name),
        None => PathBuf::from(tmp_name),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionManifest {
    pub format_version: u16,
    pub fps: u32,
    pub tick_period_seconds: f64,
    pub total_frames: u64,
    pub frames_produced: u64,
    pub frames_lost: u64,
    pub completed: bool,
}

#[derive(Debug, Clone)]
pub enum ManifestReadState {
    Missing,
    Unreadable,
    Present(SessionManifest),
}

pub fn session_manifest_path(frames_dir: &Path) -> PathBuf {
    frames_dir.join(SESSION_MANIFEST_FILE)
}

pub fn write_session_manifest(
    frames_dir: &Path,
    manifest: &SessionManifest,
) -> Result<PathBuf, FrameFileError> {
    let path = session_manifest_path(frames_dir);
    let text = serde_json::to_string_pretty(manifest).map_err(|error| {
        FrameFileError::InvalidManifest {
            path: path.clone(),
            message: format!("failed to encode manifest json: {error}"),
        }
    })?;
    write_bytes_atomic(&path, text.as_bytes()).map_err(|source| FrameFileError::Write {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

pub fn read_session_manifest(frames_dir: &Path) -> Result<ManifestReadState, FrameFileError> {
    let path = session_manifest_path(frames_dir);
    if !path.exists() {
        return Ok(ManifestReadState::Missing);
    }

    let raw = fs::read_to_string(&path).map_err(|source| FrameFileError::Read {
        path: path.clone(),
        source,
    })?;
    match serde_json::from_str::<SessionManifest>(&raw) {
        Ok(manifest) if manifest.format_version == SESSION_MANIFEST_FORMAT_VERSION => {
            Ok(ManifestReadState::Present(manifest))
        }
        Ok(manifest) => {
            warn!(
                path = %path.display(),
                format_version = manifest.format_version,
                "session_manifest_version_mismatch"
            );
            Ok(ManifestReadState::Unreadable)
        }
        Err(_) => Ok(ManifestReadState::Unreadable),
    }
}
