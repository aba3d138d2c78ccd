use super::geometry::{Region, Vec3};
use super::tracker::{TrackerHandle, TrackingStrategy};
use crate::sim::{EntityId, EntitySample, WorldView};

pub const DEFAULT_ENTITY_BUFFER: f64 = 5.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MobileState {
    pub position: Vec3,
    pub velocity: Vec3,
}

impl From<&EntitySample> for MobileState {
    fn from(sample: &EntitySample) -> Self {
        Self {
            position: sample.position,
            velocity: sample.velocity,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct MobileObjects {
    buffer: f64,
}

impl MobileObjects {
    pub fn with_buffer(buffer: f64) -> Self {
        Self {
            buffer: if buffer.is_finite() && buffer >= 0.0 {
                buffer
            } else {
                DEFAULT_ENTITY_BUFFER
            },
        }
    }

    pub fn buffer(&self) -> f64 {
        self.buffer
    }
}

impl Default for MobileObjects {
    fn default() -> Self {
        Self::with_buffer(DEFAULT_ENTITY_BUFFER)
    }
}

impl TrackingStrategy for MobileObjects {
    type Key = EntityId;
    type Value = MobileState;

    const RECORDS_SUB_TICKS: bool = false;

    fn name(&self) -> &'static str {
        "mobile_objects"
    }

    fn sample<W: WorldView + ?Sized>(
        &self,
        region: &Region,
        world: &W,
    ) -> Vec<(EntityId, MobileState)> {
        world
            .entities_within(&region.expand(self.buffer))
            .iter()
            .map(|sample| (sample.id, MobileState::from(sample)))
            .collect()
    }

    fn retains(&self, region: &Region, _key: &EntityId, value: &MobileState) -> bool {
        region.expand(self.buffer).contains(value.position)
    }

    fn interpolate(from: &MobileState, to: &MobileState, delta: f32) -> MobileState {
        let delta = f64::from(delta);
        MobileState {
            position: from.position.lerp(to.position, delta),
            velocity: from.velocity.lerp(to.velocity, delta),
        }
    }
}

pub type EntityTracker = TrackerHandle<MobileObjects>;
