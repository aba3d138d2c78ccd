use std::collections::HashSet;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tickcap::{
    AnimationKind, BlockKind, BlockSample, BlockTracker, EntitySample, Facing, GridPos,
    ObjectState, ProgressSlot, Region, Simulation, TickStepCoordinator, WorldView,
};
use tracing::{debug, trace};

use super::scenario::{PistonSpec, Scenario};

const PISTON_CYCLE_TICKS: u64 = 8;
const MID_TICK_TIME: f32 = 0.5;
const MID_TICK_SHARE: f32 = 0.25;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct DemoPiston {
    pub(crate) spec: PistonSpec,
    pub(crate) progress: f32,
    pub(crate) last_progress: f32,
}

impl DemoPiston {
    fn new(spec: PistonSpec) -> Self {
        let progress = cycle_progress(spec.start_tick, 0);
        Self {
            spec,
            progress,
            last_progress: progress,
        }
    }

    pub(crate) fn block_cell(&self) -> Option<GridPos> {
        self.spec
            .pushes_block
            .then(|| self.spec.position.offset(self.spec.facing))
    }

    fn kind(&self) -> BlockKind {
        BlockKind::Piston {
            facing: self.spec.facing,
            sticky: self.spec.sticky,
            extended: self.progress > 0.0,
        }
    }

    fn moving_block(&self) -> BlockKind {
        BlockKind::MovingBlock {
            facing: self.spec.facing,
            sticky: self.spec.sticky,
        }
    }
}

pub(crate) fn cycle_progress(start_tick: u64, tick: u64) -> f32 {
    if tick < start_tick {
        return 0.0;
    }
    match (tick - start_tick) % PISTON_CYCLE_TICKS {
        0 => 0.5,
        1..=3 => 1.0,
        4 => 0.5,
        _ => 0.0,
    }
}

#[derive(Debug, Default)]
pub(crate) struct SceneState {
    pub(crate) tick: u64,
    pub(crate) solid: HashSet<GridPos>,
    pub(crate) pistons: Vec<DemoPiston>,
}

impl SceneState {
    fn from_scenario(scenario: &Scenario) -> Self {
        Self {
            tick: 0,
            solid: scenario.solid.iter().copied().collect(),
            pistons: scenario.pistons.iter().copied().map(DemoPiston::new).collect(),
        }
    }

    pub(crate) fn block_at(&self, pos: GridPos) -> BlockSample {
        for piston in &self.pistons {
            if piston.spec.position == pos {
                return BlockSample {
                    kind: piston.kind(),
                    motion_progress: Some(piston.progress),
                };
            }
            if piston.block_cell() == Some(pos) {
                return BlockSample {
                    kind: piston.moving_block(),
                    motion_progress: Some(piston.progress),
                };
            }
        }
        if self.solid.contains(&pos) {
            return BlockSample::stationary(BlockKind::Solid);
        }
        BlockSample::stationary(BlockKind::Air)
    }
}

#[derive(Debug, Clone, Default)]
pub(crate) struct SharedScene {
    inner: Arc<RwLock<SceneState>>,
}

impl SharedScene {
    pub(crate) fn new(scenario: &Scenario) -> Self {
        Self {
            inner: Arc::new(RwLock::new(SceneState::from_scenario(scenario))),
        }
    }

    pub(crate) fn read(&self) -> RwLockReadGuard<'_, SceneState> {
        self.inner
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn write(&self) -> RwLockWriteGuard<'_, SceneState> {
        self.inner
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn progress_slots(&self) -> Vec<ProgressSlot> {
        self.read()
            .pistons
            .iter()
            .map(|piston| ProgressSlot {
                id: piston.spec.position,
                progress: piston.progress,
                last_progress: piston.last_progress,
            })
            .collect()
    }

    pub(crate) fn set_progress(&self, id: GridPos, progress: f32) {
        let mut scene = self.write();
        if let Some(piston) = scene
            .pistons
            .iter_mut()
            .find(|piston| piston.spec.position == id)
        {
            piston.progress = progress;
        }
    }
}

pub(crate) struct DemoWorld {
    scene: SharedScene,
    coordinator: TickStepCoordinator,
    hooks: Option<BlockTracker>,
}

impl DemoWorld {
    pub(crate) fn new(scene: SharedScene, coordinator: TickStepCoordinator) -> Self {
        Self {
            scene,
            coordinator,
            hooks: None,
        }
    }

    pub(crate) fn with_hooks(mut self, tracker: BlockTracker) -> Self {
        self.hooks = Some(tracker);
        self
    }

    fn step_once(&mut self) {
        let mut scene = self.scene.write();
        let tick = scene.tick + 1;
        for piston in &mut scene.pistons {
            piston.last_progress = piston.progress;
            piston.progress = cycle_progress(piston.spec.start_tick, tick);
        }
        scene.tick = tick;
        let pistons = scene.pistons.clone();
        drop(scene);

        if let Some(hooks) = &self.hooks {
            for piston in pistons.iter().filter(|p| p.progress != p.last_progress) {
                record_mid_tick(hooks, piston);
            }
        }
        trace!(tick, "demo_world_stepped");
    }
}

fn record_mid_tick(hooks: &BlockTracker, piston: &DemoPiston) {
    let progress =
        piston.last_progress + (piston.progress - piston.last_progress) * MID_TICK_SHARE;
    let spec = piston.spec;
    hooks.record(
        spec.position,
        ObjectState::moving(
            spec.position,
            AnimationKind::Piston,
            spec.facing,
            progress,
            spec.sticky,
        ),
        MID_TICK_TIME,
    );
    if let Some(cell) = piston.block_cell() {
        hooks.record(
            cell,
            ObjectState::moving(
                cell,
                AnimationKind::MovingBlock,
                spec.facing,
                progress,
                spec.sticky,
            ),
            MID_TICK_TIME,
        );
    }
}

impl WorldView for DemoWorld {
    fn block_at(&self, pos: GridPos) -> Option<BlockSample> {
        Some(self.scene.read().block_at(pos))
    }

    fn entities_within(&self, _region: &Region) -> Vec<EntitySample> {
        Vec::new()
    }
}

impl Simulation for DemoWorld {
    fn is_steppable(&self) -> bool {
        true
    }

    fn request_step(&mut self, steps: u32) {
        for _ in 0..steps {
            self.step_once();
        }
        debug!(steps, tick = self.scene.read().tick, "demo_world_step_finished");
        self.coordinator.notify_step_completed(steps);
    }
}

pub(crate) fn piston_facing(scene: &SceneState, pos: GridPos) -> Option<Facing> {
    scene
        .pistons
        .iter()
        .find(|piston| piston.spec.position == pos)
        .map(|piston| piston.spec.facing)
}
