use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tracing::{debug, info, warn};

use super::geometry::Region;
use crate::sim::WorldView;

pub const SUB_TICK_EPSILON: f32 = 1e-4;

static TRACKER_LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

fn warn_tracker_lock_poison_once(operation: &'static str) {
    if TRACKER_LOCK_POISON_WARNED
        .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
    {
        warn!(operation, "tracker lock poisoned; recovered inner value");
    }
}

pub trait TrackingStrategy: Send + Sync + 'static {
    type Key: Copy + Eq + Hash + Debug + Send + Sync + 'static;
    type Value: Clone + PartialEq + Debug + Send + Sync + 'static;

    const RECORDS_SUB_TICKS: bool;

    fn name(&self) -> &'static str;

    fn sample<W: WorldView + ?Sized>(
        &self,
        region: &Region,
        world: &W,
    ) -> Vec<(Self::Key, Self::Value)>;

    fn retains(&self, region: &Region, key: &Self::Key, value: &Self::Value) -> bool;

    fn interpolate(from: &Self::Value, to: &Self::Value, delta: f32) -> Self::Value;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubTickSnapshot<V> {
    pub value: V,
    pub sub_tick_time: f32,
}

pub struct StateTracker<S: TrackingStrategy> {
    strategy: S,
    region: Option<Region>,
    active: bool,
    current: HashMap<S::Key, Vec<SubTickSnapshot<S::Value>>>,
    previous: HashMap<S::Key, S::Value>,
}

impl<S: TrackingStrategy> StateTracker<S> {
    pub fn new(strategy: S) -> Self {
        Self {
            strategy,
            region: None,
            active: false,
            current: HashMap::new(),
            previous: HashMap::new(),
        }
    }

    pub fn start<W: WorldView + ?Sized>(&mut self, region: Region, world: &W) {
        self.clear_state();
        self.region = Some(region);
        self.active = true;
        self.capture_baseline(world);
        info!(
            tracker = self.strategy.name(),
            region = ?region,
            tracked = self.current.len(),
            "tracking_started"
        );
    }

    pub fn stop(&mut self) {
        self.active = false;
        self.region = None;
        self.clear_state();
        info!(tracker = self.strategy.name(), "tracking_stopped");
    }

    /// Finalizes the ending tick: the last snapshot of every object becomes its
    /// previous-tick state and the per-tick lists start over. Call before
    /// requesting a step.
    pub fn prepare_advance(&mut self) {
        if !self.active {
            return;
        }
        self.previous.clear();
        for (key, snapshots) in self.current.drain() {
            if let Some(last) = snapshots.into_iter().last() {
                self.previous.insert(key, last.value);
            }
        }
        debug!(
            tracker = self.strategy.name(),
            finalized = self.previous.len(),
            "tracker_prepared_advance"
        );
    }

    pub fn capture_after<W: WorldView + ?Sized>(&mut self, world: &W) {
        if !self.active {
            return;
        }
        self.capture_baseline(world);
        debug!(
            tracker = self.strategy.name(),
            tracked = self.current.len(),
            "tracker_captured_after_tick"
        );
    }

    /// Records a mid-tick state from an instrumentation hook.
    ///
    /// Returns whether a snapshot was stored. A snapshot is stored when its time
    /// is later than the last one or its value differs from the last one.
    pub fn record(&mut self, key: S::Key, value: S::Value, sub_tick_time: f32) -> bool {
        if !self.active {
            return false;
        }
        let Some(region) = self.region else {
            return false;
        };
        if !self.strategy.retains(&region, &key, &value) {
            return false;
        }

        if !S::RECORDS_SUB_TICKS {
            self.current.insert(
                key,
                vec![SubTickSnapshot {
                    value,
                    sub_tick_time: 1.0,
                }],
            );
            return true;
        }

        let sub_tick_time = sub_tick_time.clamp(0.0, 1.0);
        let snapshots = self.current.entry(key).or_default();
        match snapshots.last() {
            None => snapshots.push(SubTickSnapshot {
                value,
                sub_tick_time,
            }),
            Some(last) if sub_tick_time > last.sub_tick_time => snapshots.push(SubTickSnapshot {
                value,
                sub_tick_time,
            }),
            Some(last) if last.value != value => {
                // Keep the list ascending when a hook reports an earlier time.
                let index = snapshots.partition_point(|s| s.sub_tick_time <= sub_tick_time);
                snapshots.insert(
                    index,
                    SubTickSnapshot {
                        value,
                        sub_tick_time,
                    },
                );
            }
            Some(_) => return false,
        }
        true
    }

    pub fn interpolated(&self, key: &S::Key, delta: f32) -> Option<S::Value> {
        if !self.active {
            return None;
        }
        let delta = delta.clamp(0.0, 1.0);
        let previous = self.previous.get(key);
        let snapshots = match self.current.get(key) {
            Some(snapshots) if !snapshots.is_empty() => snapshots,
            _ => return previous.cloned(),
        };

        let after_index = snapshots.iter().position(|s| s.sub_tick_time >= delta);
        let scan_end = after_index.map_or(snapshots.len(), |index| index + 1);
        let before = snapshots[..scan_end]
            .iter()
            .rev()
            .find(|s| s.sub_tick_time <= delta);
        let after = match after_index {
            Some(index) => &snapshots[index],
            None => &snapshots[snapshots.len() - 1],
        };

        let (before_value, before_time) = match before {
            Some(snapshot) => (&snapshot.value, snapshot.sub_tick_time),
            None => match previous {
                Some(value) => (value, 0.0),
                None => return Some(after.value.clone()),
            },
        };

        let span = (after.sub_tick_time - before_time).max(SUB_TICK_EPSILON);
        let local = ((delta - before_time) / span).clamp(0.0, 1.0);
        if local <= 0.0 {
            return Some(before_value.clone());
        }
        Some(S::interpolate(before_value, &after.value, local))
    }

    pub fn trim(&mut self, aggressive: bool) {
        let before = self.snapshot_count();
        for snapshots in self.current.values_mut() {
            if snapshots.len() > 1 {
                let last = snapshots.swap_remove(snapshots.len() - 1);
                snapshots.clear();
                snapshots.push(last);
            }
        }
        if aggressive || !self.active {
            self.previous.clear();
        }
        debug!(
            tracker = self.strategy.name(),
            aggressive,
            snapshots_before = before,
            snapshots_after = self.snapshot_count(),
            "tracker_trimmed"
        );
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn region(&self) -> Option<Region> {
        self.region
    }

    pub fn strategy(&self) -> &S {
        &self.strategy
    }

    pub fn tracked_ids(&self) -> Vec<S::Key> {
        self.current.keys().copied().collect()
    }

    pub fn is_tracked(&self, key: &S::Key) -> bool {
        self.active && self.current.contains_key(key)
    }

    pub fn previous_state(&self, key: &S::Key) -> Option<&S::Value> {
        self.previous.get(key)
    }

    pub fn sub_tick_snapshots(&self, key: &S::Key) -> &[SubTickSnapshot<S::Value>] {
        self.current.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn snapshot_count(&self) -> usize {
        self.current.values().map(Vec::len).sum()
    }

    pub fn previous_count(&self) -> usize {
        self.previous.len()
    }

    fn capture_baseline<W: WorldView + ?Sized>(&mut self, world: &W) {
        let Some(region) = self.region else {
            return;
        };
        let samples = self.strategy.sample(&region, world);
        let sampled: HashSet<S::Key> = samples.iter().map(|(key, _)| *key).collect();
        self.current.retain(|key, _| sampled.contains(key));

        for (key, value) in samples {
            let baseline = SubTickSnapshot {
                value,
                sub_tick_time: 1.0,
            };
            let snapshots = self.current.entry(key).or_default();
            match snapshots.last_mut() {
                Some(last) if last.sub_tick_time >= 1.0 => *last = baseline,
                _ => snapshots.push(baseline),
            }
        }
    }

    fn clear_state(&mut self) {
        self.current.clear();
        self.previous.clear();
    }
}

pub struct TrackerHandle<S: TrackingStrategy> {
    inner: Arc<RwLock<StateTracker<S>>>,
}

impl<S: TrackingStrategy> Clone for TrackerHandle<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: TrackingStrategy + Default> Default for TrackerHandle<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

impl<S: TrackingStrategy> TrackerHandle<S> {
    pub fn new(strategy: S) -> Self {
        Self {
            inner: Arc::new(RwLock::new(StateTracker::new(strategy))),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, StateTracker<S>> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn_tracker_lock_poison_once("read");
                poisoned.into_inner()
            }
        }
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, StateTracker<S>> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn_tracker_lock_poison_once("write");
                poisoned.into_inner()
            }
        }
    }

    pub fn start<W: WorldView + ?Sized>(&self, region: Region, world: &W) {
        self.write().start(region, world);
    }

    pub fn stop(&self) {
        self.write().stop();
    }

    pub fn prepare_advance(&self) {
        self.write().prepare_advance();
    }

    pub fn capture_after<W: WorldView + ?Sized>(&self, world: &W) {
        self.write().capture_after(world);
    }

    pub fn record(&self, key: S::Key, value: S::Value, sub_tick_time: f32) -> bool {
        self.write().record(key, value, sub_tick_time)
    }

    pub fn interpolated(&self, key: &S::Key, delta: f32) -> Option<S::Value> {
        self.read().interpolated(key, delta)
    }

    pub fn trim(&self, aggressive: bool) {
        self.write().trim(aggressive);
    }

    pub fn is_active(&self) -> bool {
        self.read().is_active()
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::sim::{BlockSample, EntitySample};
    use crate::track::geometry::GridPos;

    #[derive(Default)]
    struct ScalarCells;

    impl TrackingStrategy for ScalarCells {
        type Key = GridPos;
        type Value = (f32, u8);

        const RECORDS_SUB_TICKS: bool = true;

        fn name(&self) -> &'static str {
            "scalar"
        }

        fn sample<W: WorldView + ?Sized>(
            &self,
            region: &Region,
            world: &W,
        ) -> Vec<(GridPos, (f32, u8))> {
            region
                .cells()
                .filter_map(|pos| {
                    world
                        .block_at(pos)
                        .map(|sample| (pos, (sample.motion_progress.unwrap_or(0.0), 0)))
                })
                .collect()
        }

        fn retains(&self, region: &Region, key: &GridPos, _value: &(f32, u8)) -> bool {
            region.contains_cell(*key)
        }

        fn interpolate(from: &(f32, u8), to: &(f32, u8), delta: f32) -> (f32, u8) {
            (from.0 + (to.0 - from.0) * delta, to.1)
        }
    }

    #[derive(Default)]
    struct ScalarWorld {
        values: HashMap<GridPos, f32>,
    }

    impl WorldView for ScalarWorld {
        fn block_at(&self, pos: GridPos) -> Option<BlockSample> {
            self.values.get(&pos).map(|value| BlockSample {
                kind: crate::sim::BlockKind::Solid,
                motion_progress: Some(*value),
            })
        }

        fn entities_within(&self, _region: &Region) -> Vec<EntitySample> {
            Vec::new()
        }
    }

    const CELL: GridPos = GridPos::new(0, 0, 0);

    fn one_cell_region() -> Region {
        Region::from_corners(CELL, CELL)
    }

    fn tracker_after_tick(from: f32, to: f32) -> (StateTracker<ScalarCells>, ScalarWorld) {
        let mut world = ScalarWorld::default();
        world.values.insert(CELL, from);
        let mut tracker = StateTracker::new(ScalarCells);
        tracker.start(one_cell_region(), &world);
        tracker.prepare_advance();
        world.values.insert(CELL, to);
        tracker.capture_after(&world);
        (tracker, world)
    }

    #[test]
    fn delta_zero_returns_previous_and_delta_one_returns_latest() {
        let (tracker, _world) = tracker_after_tick(0.0, 1.0);

        assert_eq!(tracker.interpolated(&CELL, 0.0), Some((0.0, 0)));
        assert_eq!(tracker.interpolated(&CELL, 1.0), Some((1.0, 0)));
        assert_eq!(tracker.previous_state(&CELL), Some(&(0.0, 0)));
    }

    #[test]
    fn interpolation_is_linear_between_previous_and_baseline() {
        let (tracker, _world) = tracker_after_tick(2.0, 6.0);
        for step in 0..=10 {
            let delta = step as f32 / 10.0;
            let (value, _) = tracker.interpolated(&CELL, delta).expect("tracked");
            assert!((value - (2.0 + 4.0 * delta)).abs() < 1e-5);
        }
    }

    #[test]
    fn sub_tick_records_split_the_tick_into_segments() {
        let mut world = ScalarWorld::default();
        world.values.insert(CELL, 0.0);
        let mut tracker = StateTracker::new(ScalarCells);
        tracker.start(one_cell_region(), &world);
        tracker.prepare_advance();

        assert!(tracker.record(CELL, (0.0, 1), 0.0));
        assert!(tracker.record(CELL, (0.8, 1), 0.5));
        world.values.insert(CELL, 1.0);
        tracker.capture_after(&world);

        let (at_quarter, kind) = tracker.interpolated(&CELL, 0.25).expect("tracked");
        assert!((at_quarter - 0.4).abs() < 1e-5);
        assert_eq!(kind, 1);
        let (at_three_quarters, _) = tracker.interpolated(&CELL, 0.75).expect("tracked");
        assert!((at_three_quarters - 0.9).abs() < 1e-5);
        assert_eq!(tracker.sub_tick_snapshots(&CELL).len(), 3);
    }

    #[test]
    fn record_deduplicates_identical_snapshot_at_same_time() {
        let (mut tracker, _world) = tracker_after_tick(0.0, 1.0);
        tracker.prepare_advance();

        assert!(tracker.record(CELL, (0.5, 0), 0.5));
        assert!(!tracker.record(CELL, (0.5, 0), 0.5));
        assert!(!tracker.record(CELL, (0.5, 0), 0.25));
        assert!(tracker.record(CELL, (0.5, 0), 0.75));
        assert!(tracker.record(CELL, (0.6, 0), 0.75));
        assert_eq!(tracker.sub_tick_snapshots(&CELL).len(), 3);
    }

    #[test]
    fn earlier_record_with_new_value_keeps_list_ascending() {
        let (mut tracker, _world) = tracker_after_tick(0.0, 1.0);
        tracker.prepare_advance();

        tracker.record(CELL, (0.9, 0), 0.9);
        tracker.record(CELL, (0.1, 0), 0.1);

        let times: Vec<f32> = tracker
            .sub_tick_snapshots(&CELL)
            .iter()
            .map(|s| s.sub_tick_time)
            .collect();
        assert_eq!(times, vec![0.1, 0.9]);
    }

    #[test]
    fn records_outside_region_or_while_inactive_are_ignored() {
        let mut tracker = StateTracker::new(ScalarCells);
        assert!(!tracker.record(CELL, (1.0, 0), 0.5));

        let world = ScalarWorld::default();
        tracker.start(one_cell_region(), &world);
        assert!(!tracker.record(GridPos::new(4, 0, 0), (1.0, 0), 0.5));
        assert!(tracker.record(CELL, (1.0, 0), 0.5));
    }

    #[test]
    fn trim_keeps_latest_snapshot_and_previous_unless_aggressive() {
        let mut world = ScalarWorld::default();
        world.values.insert(CELL, 0.0);
        let mut tracker = StateTracker::new(ScalarCells);
        tracker.start(one_cell_region(), &world);
        tracker.prepare_advance();
        tracker.record(CELL, (0.2, 0), 0.2);
        tracker.record(CELL, (0.4, 0), 0.4);
        world.values.insert(CELL, 0.7);
        tracker.capture_after(&world);

        tracker.trim(false);
        assert_eq!(
            tracker.sub_tick_snapshots(&CELL),
            &[SubTickSnapshot {
                value: (0.7, 0),
                sub_tick_time: 1.0
            }]
        );
        assert_eq!(tracker.previous_count(), 1);

        tracker.trim(true);
        assert_eq!(tracker.previous_count(), 0);
        assert_eq!(tracker.snapshot_count(), 1);
    }

    #[test]
    fn missing_previous_falls_back_to_after_value() {
        let world = ScalarWorld::default();
        let mut tracker = StateTracker::new(ScalarCells);
        tracker.start(one_cell_region(), &world);
        tracker.record(CELL, (0.6, 3), 0.5);

        assert_eq!(tracker.interpolated(&CELL, 0.1), Some((0.6, 3)));
    }

    #[test]
    fn objects_that_disappear_leave_tracking_after_one_tick() {
        let (mut tracker, mut world) = tracker_after_tick(0.0, 1.0);
        world.values.clear();
        tracker.prepare_advance();
        tracker.capture_after(&world);
        assert!(!tracker.is_tracked(&CELL));
        assert_eq!(tracker.interpolated(&CELL, 0.5), Some((1.0, 0)));

        tracker.prepare_advance();
        assert_eq!(tracker.interpolated(&CELL, 0.5), None);
    }

    #[test]
    fn stop_clears_everything() {
        let (mut tracker, _world) = tracker_after_tick(0.0, 1.0);
        tracker.stop();
        assert!(!tracker.is_active());
        assert!(tracker.region().is_none());
        assert_eq!(tracker.snapshot_count(), 0);
        assert_eq!(tracker.previous_count(), 0);
        assert_eq!(tracker.interpolated(&CELL, 0.5), None);
    }

    #[test]
    fn handle_accepts_records_from_other_threads() {
        let mut world = ScalarWorld::default();
        world.values.insert(CELL, 0.0);
        let handle = TrackerHandle::new(ScalarCells);
        handle.start(one_cell_region(), &world);
        handle.prepare_advance();

        thread::scope(|scope| {
            for step in 1..=4u8 {
                let hook = handle.clone();
                scope.spawn(move || {
                    hook.record(CELL, (step as f32 / 4.0, step), step as f32 / 4.0);
                });
            }
        });

        let times: Vec<f32> = handle
            .read()
            .sub_tick_snapshots(&CELL)
            .iter()
            .map(|s| s.sub_tick_time)
            .collect();
        let mut sorted = times.clone();
        sorted.sort_by(|a, b| a.total_cmp(b));
        assert_eq!(times, sorted);
        assert!(!times.is_empty());
    }
}
