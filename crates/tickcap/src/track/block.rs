use serde::{Deserialize, Serialize};
use tracing::debug;

use super::geometry::{lerp_f32, Facing, GridPos, Region, Vec3};
use super::tracker::{TrackerHandle, TrackingStrategy};
use crate::sim::{BlockKind, BlockSample, WorldView};

// Amount a block pushed directly by a piston lags its head, so the two
// never overlap while moving.
const PUSHED_BLOCK_LAG: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnimationKind {
    None,
    Piston,
    MovingBlock,
    Door,
    Trapdoor,
    FenceGate,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObjectState {
    pub id: GridPos,
    pub kind: AnimationKind,
    pub progress: f32,
    pub offset: Vec3,
    pub sticky: bool,
}

impl ObjectState {
    pub fn stationary(id: GridPos) -> Self {
        Self {
            id,
            kind: AnimationKind::None,
            progress: 0.0,
            offset: Vec3::ZERO,
            sticky: false,
        }
    }

    pub fn moving(
        id: GridPos,
        kind: AnimationKind,
        facing: Facing,
        progress: f32,
        sticky: bool,
    ) -> Self {
        let progress = progress.clamp(0.0, 1.0);
        Self {
            id,
            kind,
            progress,
            offset: facing.scaled(f64::from(progress)),
            sticky,
        }
    }

    pub fn openable(id: GridPos, kind: AnimationKind, open: bool) -> Self {
        Self {
            id,
            kind,
            progress: if open { 1.0 } else { 0.0 },
            offset: Vec3::ZERO,
            sticky: false,
        }
    }

    pub fn is_animated(&self) -> bool {
        self.kind != AnimationKind::None
    }

    pub fn interpolate(&self, to: &ObjectState, delta: f32) -> ObjectState {
        ObjectState {
            id: to.id,
            kind: to.kind,
            progress: lerp_f32(self.progress, to.progress, delta),
            offset: self.offset.lerp(to.offset, f64::from(delta)),
            sticky: to.sticky,
        }
    }
}

pub fn object_state_from_sample<W: WorldView + ?Sized>(
    world: &W,
    pos: GridPos,
    sample: &BlockSample,
) -> ObjectState {
    match sample.kind {
        BlockKind::Piston { facing, sticky, .. } | BlockKind::PistonHead { facing, sticky } => {
            let progress = sample
                .motion_progress
                .or_else(|| neighbour_progress(world, pos.offset(facing)))
                .unwrap_or(0.0);
            ObjectState::moving(pos, AnimationKind::Piston, facing, progress, sticky)
        }
        BlockKind::MovingBlock { facing, sticky } => {
            let base_progress = neighbour_progress(world, pos.offset(facing.opposite()));
            let mut progress = sample.motion_progress.or(base_progress).unwrap_or(0.0);
            if base_progress.is_some() && progress > 0.0 && progress < 1.0 {
                progress = (progress - PUSHED_BLOCK_LAG).max(0.0);
            }
            ObjectState::moving(pos, AnimationKind::MovingBlock, facing, progress, sticky)
        }
        BlockKind::Door { open } => ObjectState::openable(pos, AnimationKind::Door, open),
        BlockKind::Trapdoor { open } => ObjectState::openable(pos, AnimationKind::Trapdoor, open),
        BlockKind::FenceGate { open } => ObjectState::openable(pos, AnimationKind::FenceGate, open),
        BlockKind::Air | BlockKind::Solid => ObjectState::stationary(pos),
    }
}

fn neighbour_progress<W: WorldView + ?Sized>(world: &W, pos: GridPos) -> Option<f32> {
    let sample = world.block_at(pos)?;
    match sample.kind {
        BlockKind::Piston { .. } | BlockKind::PistonHead { .. } => sample.motion_progress,
        _ => None,
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct FixedCells;

impl TrackingStrategy for FixedCells {
    type Key = GridPos;
    type Value = ObjectState;

    const RECORDS_SUB_TICKS: bool = true;

    fn name(&self) -> &'static str {
        "fixed_cells"
    }

    fn sample<W: WorldView + ?Sized>(
        &self,
        region: &Region,
        world: &W,
    ) -> Vec<(GridPos, ObjectState)> {
        let states: Vec<_> = region
            .cells()
            .filter_map(|pos| {
                let sample = world.block_at(pos)?;
                Some((pos, object_state_from_sample(world, pos, &sample)))
            })
            .collect();
        debug!(
            cells = states.len(),
            animated = states.iter().filter(|(_, state)| state.is_animated()).count(),
            "fixed_cells_sampled"
        );
        states
    }

    fn retains(&self, region: &Region, key: &GridPos, _value: &ObjectState) -> bool {
        region.contains_cell(*key)
    }

    fn interpolate(from: &ObjectState, to: &ObjectState, delta: f32) -> ObjectState {
        from.interpolate(to, delta)
    }
}

pub type BlockTracker = TrackerHandle<FixedCells>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::GridWorld;

    fn piston(facing: Facing) -> BlockKind {
        BlockKind::Piston {
            facing,
            sticky: false,
            extended: true,
        }
    }

    #[test]
    fn piston_offset_follows_facing_and_progress() {
        let pos = GridPos::new(0, 0, 0);
        let mut world = GridWorld::default();
        world.set_moving(pos, piston(Facing::East), 0.5);

        let state = object_state_from_sample(&world, pos, &world.sample(pos));
        assert_eq!(state.kind, AnimationKind::Piston);
        assert_eq!(state.offset, Vec3::new(0.5, 0.0, 0.0));
        assert_eq!(state.progress, 0.5);
    }

    #[test]
    fn block_pushed_by_piston_lags_while_moving() {
        let base = GridPos::new(0, 0, 0);
        let pushed = base.offset(Facing::East);
        let mut world = GridWorld::default();
        world.set_moving(base, piston(Facing::East), 0.5);
        world.set_moving(
            pushed,
            BlockKind::MovingBlock {
                facing: Facing::East,
                sticky: false,
            },
            0.5,
        );

        let state = object_state_from_sample(&world, pushed, &world.sample(pushed));
        assert_eq!(state.kind, AnimationKind::MovingBlock);
        assert!((state.progress - 0.49).abs() < 1e-6);
    }

    #[test]
    fn settled_pushed_block_keeps_full_progress() {
        let base = GridPos::new(0, 0, 0);
        let pushed = base.offset(Facing::Up);
        let mut world = GridWorld::default();
        world.set_moving(base, piston(Facing::Up), 1.0);
        world.set_moving(
            pushed,
            BlockKind::MovingBlock {
                facing: Facing::Up,
                sticky: true,
            },
            1.0,
        );

        let state = object_state_from_sample(&world, pushed, &world.sample(pushed));
        assert_eq!(state.progress, 1.0);
        assert_eq!(state.offset, Vec3::new(0.0, 1.0, 0.0));
        assert!(state.sticky);
    }

    #[test]
    fn openables_report_full_progress_when_open() {
        let pos = GridPos::new(2, 0, 0);
        let mut world = GridWorld::default();
        world.set(pos, BlockKind::Door { open: true });

        let state = object_state_from_sample(&world, pos, &world.sample(pos));
        assert_eq!(state.kind, AnimationKind::Door);
        assert_eq!(state.progress, 1.0);
        assert!(state.offset.is_zero());
    }

    #[test]
    fn interpolation_blends_numbers_and_takes_discrete_fields_from_target() {
        let pos = GridPos::new(0, 0, 0);
        let from = ObjectState::moving(pos, AnimationKind::Piston, Facing::North, 0.0, false);
        let to = ObjectState::moving(pos, AnimationKind::MovingBlock, Facing::North, 1.0, true);

        let mid = from.interpolate(&to, 0.25);
        assert_eq!(mid.kind, AnimationKind::MovingBlock);
        assert!(mid.sticky);
        assert!((mid.progress - 0.25).abs() < 1e-6);
        assert!((mid.offset.z + 0.25).abs() < 1e-9);
    }

    #[test]
    fn sampling_skips_cells_the_world_does_not_report() {
        let mut world = GridWorld::default();
        world.set(GridPos::new(1, 1, 1), BlockKind::Solid);
        let region = Region::from_corners(GridPos::new(0, 0, 0), GridPos::new(2, 2, 2));

        let states = FixedCells.sample(&region, &world);
        assert_eq!(states.len(), 1);
        assert_eq!(states[0].0, GridPos::new(1, 1, 1));
    }
}
