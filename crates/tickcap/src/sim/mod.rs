mod stepping;
mod timing;
mod world;

pub use stepping::{StepCompletion, StepWaiter, TickStepCoordinator};
pub use timing::{
    tick_at_time, tick_delta, total_frames, total_ticks, OutputFrame, TickTiming, TimingError,
    DEFAULT_TICK_PERIOD_SECONDS, MAX_FPS, MIN_FPS,
};
pub use world::{BlockKind, BlockSample, EntityId, EntitySample, Simulation, WorldView};
