use serde::{Deserialize, Serialize};

use crate::track::{Facing, GridPos, Region, Vec3};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BlockKind {
    Air,
    Solid,
    Piston {
        facing: Facing,
        sticky: bool,
        extended: bool,
    },
    PistonHead {
        facing: Facing,
        sticky: bool,
    },
    MovingBlock {
        facing: Facing,
        sticky: bool,
    },
    Door {
        open: bool,
    },
    Trapdoor {
        open: bool,
    },
    FenceGate {
        open: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockSample {
    pub kind: BlockKind,
    pub motion_progress: Option<f32>,
}

impl BlockSample {
    pub fn stationary(kind: BlockKind) -> Self {
        Self {
            kind,
            motion_progress: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EntitySample {
    pub id: EntityId,
    pub position: Vec3,
    pub velocity: Vec3,
}

pub trait WorldView {
    fn block_at(&self, pos: GridPos) -> Option<BlockSample>;

    fn entities_within(&self, region: &Region) -> Vec<EntitySample>;
}

/// The externally stepped simulation.
///
/// `request_step` only *asks* for steps; completion is reported back through
/// [`crate::TickStepCoordinator::notify_step_completed`], possibly from another
/// thread and possibly before `request_step` returns.
pub trait Simulation: WorldView {
    fn is_steppable(&self) -> bool;

    fn request_step(&mut self, steps: u32);
}
