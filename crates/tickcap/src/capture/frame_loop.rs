use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::frame_files::{
    clear_frame_dir, write_session_manifest, FrameFileError, RenameBatch, SessionManifest,
    SESSION_MANIFEST_FORMAT_VERSION,
};
use super::progress::{CapturePhase, ProgressHandle};
use super::render::{
    AreaDescriptor, ExportCompletion, ExportedFrame, FrameRenderer, FrameRequest, RenderError,
};
use crate::assembly::{AnimationAssembler, AssemblyError, EncodeJob, EncodeReport};
use crate::sim::{
    OutputFrame, Simulation, StepCompletion, TickStepCoordinator, TickTiming, TimingError,
    DEFAULT_TICK_PERIOD_SECONDS,
};
use crate::track::{
    BlockTracker, EntityTracker, InterpolationScope, MobileObjects, ProgressOverrideGuard, Region,
};

pub const DEFAULT_FPS: u32 = 60;
pub const DEFAULT_DURATION_SECONDS: f64 = 5.0;
pub const DEFAULT_RENAME_BATCH_SIZE: usize = 20;
pub const DEFAULT_TRIM_INTERVAL_FRAMES: u64 = 200;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub fps: u32,
    pub duration_seconds: f64,
    pub tick_period_seconds: f64,
    pub rename_batch_size: usize,
    pub trim_interval_frames: u64,
    pub area: AreaDescriptor,
    pub encode_on_completion: bool,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            fps: DEFAULT_FPS,
            duration_seconds: DEFAULT_DURATION_SECONDS,
            tick_period_seconds: DEFAULT_TICK_PERIOD_SECONDS,
            rename_batch_size: DEFAULT_RENAME_BATCH_SIZE,
            trim_interval_frames: DEFAULT_TRIM_INTERVAL_FRAMES,
            area: AreaDescriptor::default(),
            encode_on_completion: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("invalid capture timing: {0}")]
    Timing(#[from] TimingError),
    #[error("simulation cannot be paused and stepped")]
    SimulationNotSteppable,
    #[error(transparent)]
    FrameFiles(#[from] FrameFileError),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CaptureSummary {
    pub frames_produced: u64,
    pub frames_lost: u64,
    pub total_frames: u64,
    pub completed: bool,
    pub frames_dir: PathBuf,
    pub encode_started: bool,
}

pub type CompletionCallback = Box<dyn FnOnce(CaptureSummary) + Send + 'static>;
pub type EncodeCallback = Box<dyn FnOnce(Result<EncodeReport, AssemblyError>) + Send + 'static>;

#[derive(Debug)]
pub(crate) enum LoopEvent {
    StepCompleted(StepCompletion),
    FrameExported {
        frame_index: u64,
        result: Result<ExportedFrame, RenderError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Idle,
    Initializing,
    Ready { next_frame: u64 },
    Rendering { frame_index: u64 },
    AwaitingTick { frame_index: u64, advance_to: u64 },
    Draining,
    Stopped,
}

impl LoopState {
    fn phase(self) -> CapturePhase {
        match self {
            LoopState::Idle => CapturePhase::Idle,
            LoopState::Initializing => CapturePhase::Initializing,
            LoopState::Ready { .. } | LoopState::Rendering { .. } => CapturePhase::Rendering,
            LoopState::AwaitingTick { .. } => CapturePhase::AwaitingTick,
            LoopState::Draining => CapturePhase::Draining,
            LoopState::Stopped => CapturePhase::Stopped,
        }
    }
}

struct Encoding {
    assembler: AnimationAssembler,
    on_done: EncodeCallback,
}

pub struct FrameCaptureLoop {
    config: CaptureConfig,
    timing: TickTiming,
    region: Region,
    frames_dir: PathBuf,
    state: LoopState,
    coordinator: TickStepCoordinator,
    blocks: BlockTracker,
    entities: EntityTracker,
    simulation: Option<Box<dyn Simulation>>,
    renderer: Option<Box<dyn FrameRenderer>>,
    on_complete: Option<CompletionCallback>,
    encoding: Option<Encoding>,
    encode_job: Option<EncodeJob>,
    events_tx: Sender<LoopEvent>,
    events_rx: Receiver<LoopEvent>,
    renames: RenameBatch,
    scope: Option<InterpolationScope>,
    current_tick: u64,
    advanced_for_frame: Option<u64>,
    frames_exported: u64,
    frames_lost: u64,
    progress: ProgressHandle,
}

impl FrameCaptureLoop {
    pub fn new(
        config: CaptureConfig,
        region: Region,
        frames_dir: impl Into<PathBuf>,
    ) -> Result<Self, CaptureError> {
        let timing = TickTiming::new(
            config.fps,
            config.duration_seconds,
            config.tick_period_seconds,
        )?;
        let config = CaptureConfig {
            rename_batch_size: normalize_non_zero_usize(
                config.rename_batch_size,
                DEFAULT_RENAME_BATCH_SIZE,
            ),
            trim_interval_frames: normalize_non_zero_u64(
                config.trim_interval_frames,
                DEFAULT_TRIM_INTERVAL_FRAMES,
            ),
            ..config
        };
        let frames_dir = frames_dir.into();
        let (events_tx, events_rx) = mpsc::channel();

        Ok(Self {
            renames: RenameBatch::new(&frames_dir, config.rename_batch_size),
            config,
            timing,
            region,
            frames_dir,
            state: LoopState::Idle,
            coordinator: TickStepCoordinator::new(),
            blocks: BlockTracker::default(),
            entities: EntityTracker::new(MobileObjects::default()),
            simulation: None,
            renderer: None,
            on_complete: None,
            encoding: None,
            encode_job: None,
            events_tx,
            events_rx,
            scope: None,
            current_tick: 0,
            advanced_for_frame: None,
            frames_exported: 0,
            frames_lost: 0,
            progress: ProgressHandle::default(),
        })
    }

    pub fn with_assembler<F>(mut self, assembler: AnimationAssembler, on_done: F) -> Self
    where
        F: FnOnce(Result<EncodeReport, AssemblyError>) + Send + 'static,
    {
        self.encoding = Some(Encoding {
            assembler,
            on_done: Box::new(on_done),
        });
        self
    }

    pub fn coordinator(&self) -> &TickStepCoordinator {
        &self.coordinator
    }

    pub fn block_tracker(&self) -> &BlockTracker {
        &self.blocks
    }

    pub fn entity_tracker(&self) -> &EntityTracker {
        &self.entities
    }

    pub fn progress(&self) -> ProgressHandle {
        self.progress.clone()
    }

    pub fn timing(&self) -> &TickTiming {
        &self.timing
    }

    pub fn config(&self) -> &CaptureConfig {
        &self.config
    }

    pub fn frames_dir(&self) -> &Path {
        &self.frames_dir
    }

    pub fn is_running(&self) -> bool {
        !matches!(self.state, LoopState::Idle | LoopState::Stopped)
    }

    pub fn rename_flushes(&self) -> u64 {
        self.renames.flushes()
    }

    pub fn take_encode_job(&mut self) -> Option<EncodeJob> {
        self.encode_job.take()
    }

    pub fn start<F>(
        &mut self,
        simulation: Box<dyn Simulation>,
        renderer: Box<dyn FrameRenderer>,
        on_complete: F,
    ) -> Result<(), CaptureError>
    where
        F: FnOnce(CaptureSummary) + Send + 'static,
    {
        if self.state != LoopState::Idle {
            warn!(phase = ?self.state.phase(), "capture_already_started");
            return Ok(());
        }
        if !simulation.is_steppable() {
            return Err(CaptureError::SimulationNotSteppable);
        }
        clear_frame_dir(&self.frames_dir)?;

        self.blocks.start(self.region, &*simulation);
        self.entities.start(self.region, &*simulation);
        self.simulation = Some(simulation);
        self.renderer = Some(renderer);
        self.on_complete = Some(Box::new(on_complete));

        info!(
            fps = self.timing.fps(),
            duration_seconds = self.timing.duration_seconds(),
            tick_period_seconds = self.timing.tick_period_seconds(),
            total_frames = self.timing.total_frames(),
            total_ticks = self.timing.total_ticks(),
            frames_dir = %self.frames_dir.display(),
            "capture_started"
        );

        self.blocks.prepare_advance();
        self.entities.prepare_advance();
        self.set_state(LoopState::Initializing);
        self.request_one_step();
        Ok(())
    }

    /// Consumes finished steps and exports and starts the next operation.
    /// Returns whether the session is still running.
    pub fn pump(&mut self) -> bool {
        self.drain_events();

        match self.state {
            LoopState::Ready { next_frame } => self.advance(next_frame),
            LoopState::Draining => self.poll_drain(),
            _ => {}
        }
        self.is_running()
    }

    /// Stops the session. Buffered frames are still moved into place. A
    /// session that already exported every frame finishes as completed.
    pub fn stop(&mut self) {
        if !self.is_running() {
            warn!(phase = ?self.state.phase(), "capture_not_running");
            return;
        }
        self.drain_events();
        let all_frames_exported = self.state == LoopState::Draining;
        info!(
            frame_index = self.next_frame_index(),
            all_frames_exported,
            "capture_stop_requested"
        );
        self.finish(all_frames_exported);
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.handle_event(event);
        }
    }

    fn handle_event(&mut self, event: LoopEvent) {
        match (event, self.state) {
            (LoopEvent::StepCompleted(completion), LoopState::Initializing) => {
                self.capture_after_step();
                self.current_tick = 0;
                debug!(
                    completed_steps = completion.completed_steps,
                    "capture_initialized"
                );
                self.set_state(LoopState::Ready { next_frame: 0 });
            }
            (
                LoopEvent::StepCompleted(_),
                LoopState::AwaitingTick {
                    frame_index,
                    advance_to,
                },
            ) => {
                self.capture_after_step();
                self.current_tick = advance_to;
                debug!(current_tick = advance_to, frame_index, "tick_advanced");
                self.set_state(LoopState::Ready {
                    next_frame: frame_index,
                });
            }
            (
                LoopEvent::FrameExported {
                    frame_index,
                    result,
                },
                LoopState::Rendering { frame_index: active },
            ) if frame_index == active => self.on_frame_exported(frame_index, result),
            (LoopEvent::StepCompleted(completion), state) => {
                debug!(
                    requested_steps = completion.requested_steps,
                    state = ?state,
                    "step_completion_ignored"
                );
            }
            (LoopEvent::FrameExported { frame_index, .. }, state) => {
                debug!(frame_index, state = ?state, "frame_export_ignored");
            }
        }
    }

    fn advance(&mut self, frame_index: u64) {
        let frame = self.timing.frame(frame_index);
        let ticks_behind = frame.target_tick.saturating_sub(self.current_tick);
        self.progress.update(|progress| {
            progress.frame_index = frame_index;
            progress.ticks_behind = ticks_behind;
        });

        if ticks_behind > 0 && self.advanced_for_frame != Some(frame_index) {
            if ticks_behind > 1 {
                warn!(
                    frame_index,
                    target_tick = frame.target_tick,
                    current_tick = self.current_tick,
                    ticks_behind,
                    "capture_falling_behind"
                );
            }
            self.request_advance(frame_index, self.current_tick + 1);
            return;
        }
        self.render_frame(frame);
    }

    fn request_advance(&mut self, frame_index: u64, advance_to: u64) {
        let steppable = self
            .simulation
            .as_ref()
            .is_some_and(|simulation| simulation.is_steppable());
        if !steppable {
            error!(frame_index, advance_to, "simulation_not_steppable");
            self.finish(false);
            return;
        }

        self.blocks.prepare_advance();
        self.entities.prepare_advance();
        self.advanced_for_frame = Some(frame_index);
        self.set_state(LoopState::AwaitingTick {
            frame_index,
            advance_to,
        });
        self.request_one_step();
    }

    fn request_one_step(&mut self) {
        let Some(simulation) = self.simulation.as_mut() else {
            return;
        };
        let events = self.events_tx.clone();
        self.coordinator
            .request_step(simulation.as_mut(), 1, move |completion| {
                let _ = events.send(LoopEvent::StepCompleted(completion));
            });
    }

    fn capture_after_step(&mut self) {
        if let Some(simulation) = self.simulation.as_ref() {
            self.blocks.capture_after(&**simulation);
            self.entities.capture_after(&**simulation);
        }
    }

    fn render_frame(&mut self, frame: OutputFrame) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };

        self.scope = Some(InterpolationScope::activate(
            frame.sub_tick_delta,
            &self.blocks,
            &self.entities,
        ));
        self.state = LoopState::Rendering {
            frame_index: frame.frame_index,
        };
        debug!(
            frame_index = frame.frame_index,
            tick = self.current_tick,
            delta = frame.sub_tick_delta,
            "frame_requested"
        );

        let request = FrameRequest {
            region: self.region,
            area: self.config.area,
            frame,
        };
        let completion = ExportCompletion::new(frame.frame_index, self.events_tx.clone());
        let mut renderer = ProgressOverrideGuard::apply(renderer.as_mut(), frame.sub_tick_delta);
        renderer.request_frame(request, completion);
    }

    fn on_frame_exported(&mut self, frame_index: u64, result: Result<ExportedFrame, RenderError>) {
        self.scope = None;
        match result {
            Ok(exported) => {
                self.frames_exported += 1;
                debug!(frame_index, path = %exported.path.display(), "frame_exported");
                if self.renames.push(exported.path, frame_index) {
                    self.flush_renames();
                }
            }
            Err(error) => {
                self.frames_lost += 1;
                warn!(frame_index, error = %error, "frame_export_failed");
            }
        }

        let next_frame = frame_index + 1;
        self.advanced_for_frame = None;
        self.progress.update(|progress| {
            progress.frame_index = next_frame;
            progress.frames_exported = self.frames_exported;
            progress.frames_lost = self.frames_lost;
        });

        if next_frame % self.config.trim_interval_frames == 0 {
            self.blocks.trim(false);
            self.entities.trim(false);
        }

        if next_frame >= self.timing.total_frames() {
            self.flush_renames();
            info!(
                frames_produced = self.frames_exported,
                frames_lost = self.frames_lost,
                "capture_frames_complete"
            );
            self.set_state(LoopState::Draining);
        } else {
            self.set_state(LoopState::Ready { next_frame });
        }
    }

    fn poll_drain(&mut self) {
        let target_open = self
            .renderer
            .as_ref()
            .is_some_and(|renderer| renderer.is_render_target_open());
        if target_open {
            debug!("render_target_still_open");
            return;
        }
        self.finish(true);
    }

    fn finish(&mut self, completed: bool) {
        self.scope = None;
        self.flush_renames();
        self.blocks.stop();
        self.entities.stop();
        self.blocks.trim(true);
        self.entities.trim(true);
        self.coordinator.cancel();
        self.set_state(LoopState::Stopped);

        self.write_manifest(completed);
        let encode_started = completed && self.start_encoding();

        let summary = CaptureSummary {
            frames_produced: self.frames_exported,
            frames_lost: self.frames_lost,
            total_frames: self.timing.total_frames(),
            completed,
            frames_dir: self.frames_dir.clone(),
            encode_started,
        };
        info!(
            frames_produced = summary.frames_produced,
            frames_lost = summary.frames_lost,
            completed,
            encode_started,
            "capture_stopped"
        );
        if let Some(on_complete) = self.on_complete.take() {
            on_complete(summary);
        }

        self.simulation = None;
        self.renderer = None;
    }

    fn start_encoding(&mut self) -> bool {
        if !self.config.encode_on_completion || self.frames_exported == 0 {
            return false;
        }
        let Some(Encoding { assembler, on_done }) = self.encoding.take() else {
            return false;
        };
        let frame_count = self.timing.total_frames();
        match assembler.encode(frame_count, on_done) {
            Ok(job) => {
                self.encode_job = Some(job);
                true
            }
            Err(error) => {
                error!(error = %error, "encode_not_started");
                false
            }
        }
    }

    fn write_manifest(&self, completed: bool) {
        let manifest = SessionManifest {
            format_version: SESSION_MANIFEST_FORMAT_VERSION,
            fps: self.timing.fps(),
            tick_period_seconds: self.timing.tick_period_seconds(),
            total_frames: self.timing.total_frames(),
            frames_produced: self.frames_exported,
            frames_lost: self.frames_lost,
            completed,
        };
        if let Err(error) = write_session_manifest(&self.frames_dir, &manifest) {
            warn!(error = %error, "session_manifest_write_failed");
        }
    }

    fn flush_renames(&mut self) {
        if let Err(error) = self.renames.flush() {
            warn!(error = %error, "frame_rename_batch_failed");
        }
    }

    fn set_state(&mut self, state: LoopState) {
        self.state = state;
        let current_tick = self.current_tick;
        let total_frames = self.timing.total_frames();
        let total_ticks = self.timing.total_ticks();
        self.progress.update(|progress| {
            progress.phase = state.phase();
            progress.current_tick = current_tick;
            progress.total_frames = total_frames;
            progress.total_ticks = total_ticks;
        });
    }

    fn next_frame_index(&self) -> u64 {
        match self.state {
            LoopState::Ready { next_frame } => next_frame,
            LoopState::Rendering { frame_index } | LoopState::AwaitingTick { frame_index, .. } => {
                frame_index
            }
            LoopState::Draining => self.timing.total_frames(),
            LoopState::Idle | LoopState::Initializing | LoopState::Stopped => 0,
        }
    }
}

impl Drop for FrameCaptureLoop {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("capture_dropped_while_running");
            self.finish(false);
        }
    }
}

fn normalize_non_zero_usize(value: usize, fallback: usize) -> usize {
    if value == 0 {
        fallback
    } else {
        value
    }
}

fn normalize_non_zero_u64(value: u64, fallback: u64) -> u64 {
    if value == 0 {
        fallback
    } else {
        value
    }
}
