mod bootstrap;
mod loop_runner;
mod renderer;
mod scenario;
mod world;

pub(crate) use bootstrap::build_app;
pub(crate) use loop_runner::run;
