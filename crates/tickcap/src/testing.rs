//! Fake collaborators shared by the unit tests.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use image::{Rgba, RgbaImage};

use crate::assembly::{AssemblyError, EncodeSettings, VideoEncoder};
use crate::capture::{
    frame_path, ExportCompletion, ExportedFrame, FrameRenderer, FrameRequest, RenderError,
};
use crate::sim::{
    BlockKind, BlockSample, EntityId, EntitySample, Simulation, TickStepCoordinator, WorldView,
};
use crate::track::{interpolation, GridPos, ProgressOverride, ProgressSlot, Region, Vec3};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

pub(crate) fn write_test_frame(frames_dir: &Path, frame_index: u64, width: u32, height: u32) {
    fs::create_dir_all(frames_dir).expect("frames dir");
    RgbaImage::from_pixel(width, height, Rgba([frame_index as u8, 0, 0, 255]))
        .save(frame_path(frames_dir, frame_index))
        .expect("save test frame");
}

pub(crate) const TRACKED_ENTITY: EntityId = EntityId(1);

#[derive(Debug, Default, Clone)]
pub(crate) struct GridWorld {
    blocks: HashMap<GridPos, BlockSample>,
    entities: BTreeMap<EntityId, EntitySample>,
}

impl GridWorld {
    pub(crate) fn set(&mut self, pos: GridPos, kind: BlockKind) {
        self.blocks.insert(pos, BlockSample::stationary(kind));
    }

    pub(crate) fn set_moving(&mut self, pos: GridPos, kind: BlockKind, progress: f32) {
        self.blocks.insert(
            pos,
            BlockSample {
                kind,
                motion_progress: Some(progress),
            },
        );
    }

    pub(crate) fn sample(&self, pos: GridPos) -> BlockSample {
        *self.blocks.get(&pos).expect("block at position")
    }

    pub(crate) fn put_entity(&mut self, id: EntityId, position: Vec3) {
        self.entities.insert(
            id,
            EntitySample {
                id,
                position,
                velocity: Vec3::ZERO,
            },
        );
    }
}

impl WorldView for GridWorld {
    fn block_at(&self, pos: GridPos) -> Option<BlockSample> {
        self.blocks.get(&pos).copied()
    }

    fn entities_within(&self, region: &Region) -> Vec<EntitySample> {
        self.entities
            .values()
            .filter(|entity| region.contains(entity.position))
            .copied()
            .collect()
    }
}

#[derive(Debug, Default)]
pub(crate) struct SimLog {
    pub(crate) step_requests: u32,
    pub(crate) steps_taken: u64,
}

pub(crate) type StepScript = Box<dyn FnMut(&mut GridWorld, u64) + Send>;

pub(crate) struct ScriptedSimulation {
    pub(crate) world: GridWorld,
    coordinator: TickStepCoordinator,
    log: Arc<Mutex<SimLog>>,
    steppable: bool,
    completes_synchronously: bool,
    script: Option<StepScript>,
}

impl ScriptedSimulation {
    pub(crate) fn new(coordinator: TickStepCoordinator) -> Self {
        Self {
            world: GridWorld::default(),
            coordinator,
            log: Arc::new(Mutex::new(SimLog::default())),
            steppable: true,
            completes_synchronously: true,
            script: None,
        }
    }

    pub(crate) fn not_steppable(mut self) -> Self {
        self.steppable = false;
        self
    }

    pub(crate) fn deferred(mut self) -> Self {
        self.completes_synchronously = false;
        self
    }

    pub(crate) fn with_script(mut self, script: StepScript) -> Self {
        self.script = Some(script);
        self
    }

    pub(crate) fn log(&self) -> Arc<Mutex<SimLog>> {
        Arc::clone(&self.log)
    }
}

impl WorldView for ScriptedSimulation {
    fn block_at(&self, pos: GridPos) -> Option<BlockSample> {
        self.world.block_at(pos)
    }

    fn entities_within(&self, region: &Region) -> Vec<EntitySample> {
        self.world.entities_within(region)
    }
}

impl Simulation for ScriptedSimulation {
    fn is_steppable(&self) -> bool {
        self.steppable
    }

    fn request_step(&mut self, steps: u32) {
        let first_tick = {
            let mut log = lock(&self.log);
            log.step_requests += 1;
            let first_tick = log.steps_taken;
            log.steps_taken += u64::from(steps);
            first_tick
        };
        if let Some(script) = self.script.as_mut() {
            for tick in first_tick..first_tick + u64::from(steps) {
                script(&mut self.world, tick);
            }
        }
        if self.completes_synchronously {
            self.coordinator.notify_step_completed(steps);
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct RenderRecord {
    pub(crate) frame_index: u64,
    pub(crate) target_tick: u64,
    pub(crate) delta: f32,
    pub(crate) interpolation_active: bool,
    pub(crate) context_delta: f32,
    pub(crate) slot_progress: Option<f32>,
    pub(crate) origin_offset: Vec3,
    pub(crate) entity_position: Option<Vec3>,
}

#[derive(Default)]
pub(crate) struct RenderLog {
    pub(crate) records: Vec<RenderRecord>,
    pub(crate) pending: Vec<ExportCompletion>,
    pub(crate) target_open_polls: u32,
}

impl RenderLog {
    pub(crate) fn deltas(&self) -> Vec<f32> {
        self.records.iter().map(|record| record.delta).collect()
    }
}

pub(crate) struct RecordingRenderer {
    staging_dir: PathBuf,
    log: Arc<Mutex<RenderLog>>,
    deferred: bool,
    failing_frames: Vec<u64>,
    slot: Option<ProgressSlot>,
}

impl RecordingRenderer {
    pub(crate) fn new(staging_dir: impl Into<PathBuf>) -> Self {
        Self {
            staging_dir: staging_dir.into(),
            log: Arc::new(Mutex::new(RenderLog::default())),
            deferred: false,
            failing_frames: Vec::new(),
            slot: None,
        }
    }

    pub(crate) fn deferred(mut self) -> Self {
        self.deferred = true;
        self
    }

    pub(crate) fn failing(mut self, frames: &[u64]) -> Self {
        self.failing_frames = frames.to_vec();
        self
    }

    pub(crate) fn holding_target_for(self, polls: u32) -> Self {
        lock(&self.log).target_open_polls = polls;
        self
    }

    pub(crate) fn with_progress_slot(mut self, slot: ProgressSlot) -> Self {
        self.slot = Some(slot);
        self
    }

    pub(crate) fn log(&self) -> Arc<Mutex<RenderLog>> {
        Arc::clone(&self.log)
    }

    fn export(&self, frame_index: u64) -> Result<ExportedFrame, RenderError> {
        fs::create_dir_all(&self.staging_dir).map_err(|source| RenderError::Io {
            path: self.staging_dir.clone(),
            source,
        })?;
        let path = self.staging_dir.join(format!("export_{frame_index}.png"));
        RgbaImage::from_pixel(2, 2, Rgba([0, 0, frame_index as u8, 255]))
            .save(&path)
            .map_err(|source| RenderError::Export {
                path: path.clone(),
                source,
            })?;
        Ok(ExportedFrame { path })
    }
}

impl ProgressOverride for RecordingRenderer {
    fn progress_slots(&self) -> Vec<ProgressSlot> {
        self.slot.into_iter().collect()
    }

    fn set_progress(&mut self, id: GridPos, progress: f32) {
        if let Some(slot) = self.slot.as_mut().filter(|slot| slot.id == id) {
            slot.progress = progress;
        }
    }
}

impl FrameRenderer for RecordingRenderer {
    fn request_frame(&mut self, request: FrameRequest, completion: ExportCompletion) {
        let frame_index = request.frame.frame_index;
        lock(&self.log).records.push(RenderRecord {
            frame_index,
            target_tick: request.frame.target_tick,
            delta: request.frame.sub_tick_delta,
            interpolation_active: interpolation::is_active(),
            context_delta: interpolation::current_delta(),
            slot_progress: self.slot.map(|slot| slot.progress),
            origin_offset: interpolation::offset_for(GridPos::new(0, 0, 0)),
            entity_position: interpolation::entity_position(TRACKED_ENTITY),
        });

        if self.failing_frames.contains(&frame_index) {
            completion.complete(Err(RenderError::Render {
                frame_index,
                message: "scripted failure".to_string(),
            }));
            return;
        }
        let result = self.export(frame_index);
        if self.deferred && result.is_ok() {
            lock(&self.log).pending.push(completion);
            return;
        }
        completion.complete(result);
    }

    fn is_render_target_open(&self) -> bool {
        let mut log = lock(&self.log);
        if log.target_open_polls > 0 {
            log.target_open_polls -= 1;
            return true;
        }
        false
    }
}

pub(crate) fn complete_pending(log: &Arc<Mutex<RenderLog>>, staging_dir: &Path) {
    let pending: Vec<ExportCompletion> = lock(log).pending.drain(..).collect();
    for completion in pending {
        let path = staging_dir.join(format!("export_{}.png", completion.frame_index()));
        completion.complete(Ok(ExportedFrame { path }));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FakeEncoderMode {
    Working,
    Unavailable,
    Failing,
}

#[derive(Debug, Clone)]
pub(crate) struct FakeEncoder {
    mode: FakeEncoderMode,
    frames_seen: Arc<Mutex<u64>>,
}

impl Default for FakeEncoder {
    fn default() -> Self {
        Self {
            mode: FakeEncoderMode::Working,
            frames_seen: Arc::new(Mutex::new(0)),
        }
    }
}

impl FakeEncoder {
    pub(crate) fn unavailable() -> Self {
        Self {
            mode: FakeEncoderMode::Unavailable,
            ..Self::default()
        }
    }

    pub(crate) fn failing() -> Self {
        Self {
            mode: FakeEncoderMode::Failing,
            ..Self::default()
        }
    }

    pub(crate) fn frames_seen(&self) -> u64 {
        *lock(&self.frames_seen)
    }
}

impl VideoEncoder for FakeEncoder {
    fn name(&self) -> &str {
        "fake"
    }

    fn locate(&self) -> Result<(), AssemblyError> {
        match self.mode {
            FakeEncoderMode::Unavailable => Err(AssemblyError::EncodingUnavailable {
                encoder: "fake".to_string(),
                reason: "disabled".to_string(),
            }),
            _ => Ok(()),
        }
    }

    fn encode(
        &self,
        settings: &EncodeSettings,
        frames: &mut dyn Iterator<Item = RgbaImage>,
    ) -> Result<u64, AssemblyError> {
        if self.mode == FakeEncoderMode::Failing {
            return Err(AssemblyError::EncodingFailed {
                message: "scripted failure".to_string(),
            });
        }
        let mut written = 0;
        for frame in frames {
            assert_eq!(frame.dimensions(), (settings.width, settings.height));
            written += 1;
        }
        *lock(&self.frames_seen) += written;
        fs::write(&settings.output, b"video").map_err(|error| AssemblyError::EncodingFailed {
            message: error.to_string(),
        })?;
        Ok(written)
    }
}
