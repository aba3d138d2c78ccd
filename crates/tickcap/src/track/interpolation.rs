use std::cell::RefCell;
use std::collections::HashMap;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};

use tracing::{debug, warn};

use super::block::BlockTracker;
use super::entity::EntityTracker;
use super::geometry::{GridPos, Vec3};
use super::tracker::SUB_TICK_EPSILON;
use crate::sim::EntityId;

#[derive(Default)]
struct InterpolationContext {
    active: bool,
    delta: f32,
    offsets: HashMap<GridPos, Vec3>,
    entity_positions: HashMap<EntityId, Vec3>,
}

impl InterpolationContext {
    fn clear(&mut self) {
        self.active = false;
        self.delta = 0.0;
        self.offsets.clear();
        self.entity_positions.clear();
    }
}

thread_local! {
    static CONTEXT: RefCell<InterpolationContext> = RefCell::new(InterpolationContext::default());
}

/// Keeps the calling thread's interpolation context active for one frame
/// attempt and clears it when dropped.
///
/// The scope is tied to the thread that created it.
#[must_use = "the interpolation context is cleared as soon as the scope is dropped"]
pub struct InterpolationScope {
    delta: f32,
    _thread_bound: PhantomData<*const ()>,
}

impl InterpolationScope {
    pub fn activate(delta: f32, blocks: &BlockTracker, entities: &EntityTracker) -> Self {
        let delta = delta.clamp(0.0, 1.0);

        let mut offsets = HashMap::new();
        {
            let tracker = blocks.read();
            for id in tracker.tracked_ids() {
                if let Some(state) = tracker.interpolated(&id, delta) {
                    if !state.offset.is_zero() {
                        offsets.insert(id, state.offset);
                    }
                }
            }
        }

        let mut entity_positions = HashMap::new();
        {
            let tracker = entities.read();
            for id in tracker.tracked_ids() {
                if let Some(state) = tracker.interpolated(&id, delta) {
                    entity_positions.insert(id, state.position);
                }
            }
        }

        CONTEXT.with(|context| {
            let mut context = context.borrow_mut();
            if context.active {
                warn!(
                    previous_delta = context.delta,
                    delta, "interpolation_context_reactivated"
                );
            }
            debug!(
                delta,
                displaced = offsets.len(),
                entities = entity_positions.len(),
                "interpolation_context_activated"
            );
            context.active = true;
            context.delta = delta;
            context.offsets = offsets;
            context.entity_positions = entity_positions;
        });

        Self {
            delta,
            _thread_bound: PhantomData,
        }
    }

    pub fn delta(&self) -> f32 {
        self.delta
    }

    pub fn deactivate(self) {}
}

impl Drop for InterpolationScope {
    fn drop(&mut self) {
        CONTEXT.with(|context| context.borrow_mut().clear());
    }
}

pub fn is_active() -> bool {
    CONTEXT.with(|context| context.borrow().active)
}

pub fn current_delta() -> f32 {
    CONTEXT.with(|context| context.borrow().delta)
}

pub fn offset_for(id: GridPos) -> Vec3 {
    CONTEXT.with(|context| {
        let context = context.borrow();
        if !context.active {
            return Vec3::ZERO;
        }
        context.offsets.get(&id).copied().unwrap_or(Vec3::ZERO)
    })
}

pub fn transform(raw_position: Vec3) -> Vec3 {
    if !is_active() {
        return raw_position;
    }
    raw_position.add(offset_for(GridPos::floor_of(raw_position)))
}

pub fn entity_position(id: EntityId) -> Option<Vec3> {
    CONTEXT.with(|context| {
        let context = context.borrow();
        if !context.active {
            return None;
        }
        context.entity_positions.get(&id).copied()
    })
}

pub fn entity_render_offset(id: EntityId, default_position: Vec3) -> Vec3 {
    entity_position(id).map_or(Vec3::ZERO, |position| position.sub(default_position))
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProgressSlot {
    pub id: GridPos,
    pub progress: f32,
    pub last_progress: f32,
}

pub trait ProgressOverride {
    fn progress_slots(&self) -> Vec<ProgressSlot> {
        Vec::new()
    }

    fn set_progress(&mut self, _id: GridPos, _progress: f32) {}
}

/// Overrides every animating slot with its value at `delta` and restores the
/// saved values when dropped, including during unwinding.
pub struct ProgressOverrideGuard<'a, T: ProgressOverride + ?Sized> {
    target: &'a mut T,
    saved: Vec<(GridPos, f32)>,
}

impl<'a, T: ProgressOverride + ?Sized> ProgressOverrideGuard<'a, T> {
    pub fn apply(target: &'a mut T, delta: f32) -> Self {
        let delta = delta.clamp(0.0, 1.0);
        let mut saved = Vec::new();
        for slot in target.progress_slots() {
            let span = slot.progress - slot.last_progress;
            if span.abs() < SUB_TICK_EPSILON {
                continue;
            }
            let value = (slot.last_progress + span * delta).clamp(0.0, 1.0);
            saved.push((slot.id, slot.progress));
            target.set_progress(slot.id, value);
        }
        if !saved.is_empty() {
            debug!(delta, overridden = saved.len(), "progress_override_applied");
        }
        Self { target, saved }
    }

    pub fn overridden(&self) -> usize {
        self.saved.len()
    }
}

impl<T: ProgressOverride + ?Sized> Deref for ProgressOverrideGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.target
    }
}

impl<T: ProgressOverride + ?Sized> DerefMut for ProgressOverrideGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        self.target
    }
}

impl<T: ProgressOverride + ?Sized> Drop for ProgressOverrideGuard<'_, T> {
    fn drop(&mut self) {
        for (id, progress) in self.saved.drain(..).rev() {
            self.target.set_progress(id, progress);
        }
    }
}
