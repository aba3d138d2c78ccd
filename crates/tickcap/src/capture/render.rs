use std::fmt;
use std::io;
use std::path::PathBuf;
use std::sync::mpsc::Sender;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use super::frame_loop::LoopEvent;
use crate::sim::OutputFrame;
use crate::track::{ProgressOverride, Region};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AreaDescriptor {
    pub scale: f64,
    pub rotation_degrees: f64,
    pub slant_degrees: f64,
}

impl Default for AreaDescriptor {
    fn default() -> Self {
        Self {
            scale: 100.0,
            rotation_degrees: 0.0,
            slant_degrees: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameRequest {
    pub region: Region,
    pub area: AreaDescriptor,
    pub frame: OutputFrame,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportedFrame {
    pub path: PathBuf,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("render target is not available")]
    TargetUnavailable,
    #[error("failed to render frame {frame_index}: {message}")]
    Render { frame_index: u64, message: String },
    #[error("failed to prepare export path {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to export frame to {path}: {source}")]
    Export {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("export of frame {frame_index} was abandoned without a result")]
    CompletionDropped { frame_index: u64 },
}

/// One-shot completion for a frame request. Consumed by [`complete`]; if it is
/// dropped unused, the frame is reported as failed.
///
/// [`complete`]: ExportCompletion::complete
pub struct ExportCompletion {
    frame_index: u64,
    events: Option<Sender<LoopEvent>>,
}

impl ExportCompletion {
    pub(crate) fn new(frame_index: u64, events: Sender<LoopEvent>) -> Self {
        Self {
            frame_index,
            events: Some(events),
        }
    }

    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn complete(mut self, result: Result<ExportedFrame, RenderError>) {
        self.deliver(result);
    }

    fn deliver(&mut self, result: Result<ExportedFrame, RenderError>) {
        let Some(events) = self.events.take() else {
            return;
        };
        let event = LoopEvent::FrameExported {
            frame_index: self.frame_index,
            result,
        };
        if events.send(event).is_err() {
            debug!(frame_index = self.frame_index, "frame_export_after_loop_dropped");
        }
    }
}

impl Drop for ExportCompletion {
    fn drop(&mut self) {
        if self.events.is_some() {
            let frame_index = self.frame_index;
            self.deliver(Err(RenderError::CompletionDropped { frame_index }));
        }
    }
}

impl fmt::Debug for ExportCompletion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExportCompletion")
            .field("frame_index", &self.frame_index)
            .field("pending", &self.events.is_some())
            .finish()
    }
}

pub trait FrameRenderer: ProgressOverride {
    fn request_frame(&mut self, request: FrameRequest, completion: ExportCompletion);

    fn is_render_target_open(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use std::sync::mpsc;

    use super::*;

    #[test]
    fn dropped_completion_reports_failure_once() {
        let (tx, rx) = mpsc::channel();
        drop(ExportCompletion::new(4, tx));

        match rx.try_recv().expect("event") {
            LoopEvent::FrameExported {
                frame_index,
                result: Err(RenderError::CompletionDropped { .. }),
            } => assert_eq!(frame_index, 4),
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn completed_export_is_delivered_once() {
        let (tx, rx) = mpsc::channel();
        ExportCompletion::new(1, tx).complete(Ok(ExportedFrame {
            path: PathBuf::from("staging/one.png"),
        }));

        assert!(matches!(
            rx.try_recv().expect("event"),
            LoopEvent::FrameExported {
                frame_index: 1,
                result: Ok(_)
            }
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn completion_after_receiver_dropped_is_silent() {
        let (tx, rx) = mpsc::channel();
        drop(rx);
        ExportCompletion::new(2, tx).complete(Err(RenderError::TargetUnavailable));
    }
}
