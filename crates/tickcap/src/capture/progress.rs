use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::warn;

static PROGRESS_LOCK_POISON_WARNED: AtomicBool = AtomicBool::new(false);

fn warn_progress_lock_poison_once(operation: &'static str) {
    if PROGRESS_LOCK_POISON_WARNED
        .compare_exchange(false, true, Ordering::Relaxed, Ordering::Relaxed)
        .is_ok()
    {
        warn!(operation, "progress lock poisoned; recovered inner value");
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CapturePhase {
    #[default]
    Idle,
    Initializing,
    Rendering,
    AwaitingTick,
    Draining,
    Stopped,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CaptureProgress {
    pub phase: CapturePhase,
    pub frame_index: u64,
    pub total_frames: u64,
    pub current_tick: u64,
    pub total_ticks: u64,
    pub ticks_behind: u64,
    pub frames_exported: u64,
    pub frames_lost: u64,
}

impl CaptureProgress {
    pub fn fraction_complete(&self) -> f32 {
        if self.total_frames == 0 {
            return 0.0;
        }
        (self.frame_index as f32 / self.total_frames as f32).clamp(0.0, 1.0)
    }
}

#[derive(Clone, Debug)]
pub struct ProgressHandle {
    snapshot: Arc<RwLock<CaptureProgress>>,
}

impl Default for ProgressHandle {
    fn default() -> Self {
        Self {
            snapshot: Arc::new(RwLock::new(CaptureProgress::default())),
        }
    }
}

impl ProgressHandle {
    pub fn snapshot(&self) -> CaptureProgress {
        match self.snapshot.read() {
            Ok(guard) => *guard,
            Err(poisoned) => {
                warn_progress_lock_poison_once("read");
                *poisoned.into_inner()
            }
        }
    }

    pub(crate) fn update(&self, apply: impl FnOnce(&mut CaptureProgress)) {
        match self.snapshot.write() {
            Ok(mut guard) => apply(&mut guard),
            Err(poisoned) => {
                warn_progress_lock_poison_once("write");
                let mut guard = poisoned.into_inner();
                apply(&mut guard);
            }
        }
    }
}
