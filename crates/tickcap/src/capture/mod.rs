mod frame_files;
mod frame_loop;
mod progress;
mod render;

pub use frame_files::{
    clear_frame_dir, frame_file_name, frame_path, read_session_manifest, session_manifest_path,
    write_session_manifest, FrameFileError, ManifestReadState, RenameBatch, SessionManifest,
    FRAME_FILE_EXTENSION, SESSION_MANIFEST_FILE,
};
pub use frame_loop::{
    CaptureConfig, CaptureError, CaptureSummary, CompletionCallback, EncodeCallback,
    FrameCaptureLoop, DEFAULT_DURATION_SECONDS, DEFAULT_FPS, DEFAULT_RENAME_BATCH_SIZE,
    DEFAULT_TRIM_INTERVAL_FRAMES,
};
pub use progress::{CapturePhase, CaptureProgress, ProgressHandle};
pub use render::{
    AreaDescriptor, ExportCompletion, ExportedFrame, FrameRenderer, FrameRequest, RenderError,
};
