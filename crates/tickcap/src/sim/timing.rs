use thiserror::Error;

pub const DEFAULT_TICK_PERIOD_SECONDS: f64 = 0.05;
pub const MIN_FPS: u32 = 1;
pub const MAX_FPS: u32 = 1000;

// Quotients this close to an integer are treated as landing on it, so frame
// times such as `0.15 / 0.05` resolve to tick 3 instead of tick 2 at 0.9999.
const TICK_SNAP_EPSILON: f64 = 1e-9;

#[derive(Debug, Error, PartialEq)]
pub enum TimingError {
    #[error("fps must be between {MIN_FPS} and {MAX_FPS}, got {0}")]
    InvalidFps(u32),
    #[error("duration must be a positive finite number of seconds, got {0}")]
    InvalidDuration(f64),
    #[error("tick period must be a positive finite number of seconds, got {0}")]
    InvalidTickPeriod(f64),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OutputFrame {
    pub frame_index: u64,
    pub output_time: f64,
    pub target_tick: u64,
    pub sub_tick_delta: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TickTiming {
    fps: u32,
    duration_seconds: f64,
    tick_period_seconds: f64,
}

impl TickTiming {
    pub fn new(
        fps: u32,
        duration_seconds: f64,
        tick_period_seconds: f64,
    ) -> Result<Self, TimingError> {
        if !(MIN_FPS..=MAX_FPS).contains(&fps) {
            return Err(TimingError::InvalidFps(fps));
        }
        if !duration_seconds.is_finite() || duration_seconds <= 0.0 {
            return Err(TimingError::InvalidDuration(duration_seconds));
        }
        if !tick_period_seconds.is_finite() || tick_period_seconds <= 0.0 {
            return Err(TimingError::InvalidTickPeriod(tick_period_seconds));
        }
        Ok(Self {
            fps,
            duration_seconds,
            tick_period_seconds,
        })
    }

    pub fn fps(&self) -> u32 {
        self.fps
    }

    pub fn duration_seconds(&self) -> f64 {
        self.duration_seconds
    }

    pub fn tick_period_seconds(&self) -> f64 {
        self.tick_period_seconds
    }

    pub fn frame_interval_seconds(&self) -> f64 {
        1.0 / self.fps as f64
    }

    pub fn total_frames(&self) -> u64 {
        total_frames(self.duration_seconds, self.fps)
    }

    pub fn total_ticks(&self) -> u64 {
        total_ticks(self.duration_seconds, self.tick_period_seconds)
    }

    pub fn frame(&self, frame_index: u64) -> OutputFrame {
        let output_time = frame_index as f64 / self.fps as f64;
        let position = tick_position(output_time, self.tick_period_seconds);
        OutputFrame {
            frame_index,
            output_time,
            target_tick: position.floor() as u64,
            sub_tick_delta: position.fract() as f32,
        }
    }
}

pub fn total_frames(duration_seconds: f64, fps: u32) -> u64 {
    (duration_seconds * fps as f64).round().max(0.0) as u64
}

pub fn total_ticks(duration_seconds: f64, tick_period_seconds: f64) -> u64 {
    tick_position(duration_seconds, tick_period_seconds)
        .ceil()
        .max(0.0) as u64
}

pub fn tick_at_time(time_seconds: f64, tick_period_seconds: f64) -> u64 {
    tick_position(time_seconds, tick_period_seconds)
        .floor()
        .max(0.0) as u64
}

pub fn tick_delta(time_seconds: f64, tick_period_seconds: f64) -> f32 {
    tick_position(time_seconds, tick_period_seconds).fract() as f32
}

fn tick_position(time_seconds: f64, tick_period_seconds: f64) -> f64 {
    let raw = time_seconds / tick_period_seconds;
    let nearest = raw.round();
    if (raw - nearest).abs() < TICK_SNAP_EPSILON {
        nearest
    } else {
        raw
    }
}
