use std::env;
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tickcap::{resolve_capture_paths, CapturePaths, FfmpegEncoder, PathsError, VideoEncoder};
use tracing::info;
use tracing_subscriber::EnvFilter;

use super::scenario::{Scenario, ScenarioError, SCENARIO_ENV_VAR};

const ENCODE_COMMAND: &str = "encode";

#[derive(Debug, Error)]
pub(crate) enum BootstrapError {
    #[error("usage: tickcap_demo [scenario.json | encode]: {0}")]
    Usage(String),
    #[error(transparent)]
    Paths(#[from] PathsError),
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Command {
    Capture { scenario: Option<PathBuf> },
    Encode,
}

pub(crate) struct AppWiring {
    pub(crate) command: Command,
    pub(crate) scenario: Scenario,
    pub(crate) paths: CapturePaths,
    pub(crate) encoder: Arc<dyn VideoEncoder>,
}

pub(crate) fn build_app() -> Result<AppWiring, BootstrapError> {
    init_tracing();
    info!("=== tickcap demo ===");

    let command = parse_command(env::args().skip(1), env::var(SCENARIO_ENV_VAR).ok())?;
    let paths = resolve_capture_paths()?;
    let scenario = match &command {
        Command::Capture {
            scenario: Some(path),
        } => Scenario::load(path)?,
        _ => Scenario::default(),
    };
    let encoder = FfmpegEncoder::from_env();
    info!(
        command = ?command,
        export_root = %paths.root.display(),
        encoder = %encoder.binary().display(),
        "demo_configured"
    );

    Ok(AppWiring {
        command,
        scenario,
        paths,
        encoder: Arc::new(encoder),
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_names(true)
        .compact()
        .init();
}

pub(crate) fn parse_command(
    mut args: impl Iterator<Item = String>,
    env_scenario: Option<String>,
) -> Result<Command, BootstrapError> {
    let first = args.next();
    if let Some(extra) = args.next() {
        return Err(BootstrapError::Usage(format!("unexpected argument '{extra}'")));
    }
    match first.as_deref() {
        Some(ENCODE_COMMAND) => Ok(Command::Encode),
        Some(path) if path.trim().is_empty() => {
            Err(BootstrapError::Usage("empty scenario path".to_string()))
        }
        Some(path) => Ok(Command::Capture {
            scenario: Some(PathBuf::from(path)),
        }),
        None => Ok(Command::Capture {
            scenario: env_scenario
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from),
        }),
    }
}
