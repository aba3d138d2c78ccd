mod block;
mod entity;
mod geometry;
pub mod interpolation;
mod tracker;

pub use block::{object_state_from_sample, AnimationKind, BlockTracker, FixedCells, ObjectState};
pub use entity::{EntityTracker, MobileObjects, MobileState, DEFAULT_ENTITY_BUFFER};
pub use geometry::{Facing, GridPos, Region, Vec3};
pub use interpolation::{InterpolationScope, ProgressOverride, ProgressOverrideGuard, ProgressSlot};
pub use tracker::{
    StateTracker, SubTickSnapshot, TrackerHandle, TrackingStrategy, SUB_TICK_EPSILON,
};
