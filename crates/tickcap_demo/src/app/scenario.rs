use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tickcap::{AreaDescriptor, CaptureConfig, Facing, GridPos, Region};

pub(crate) const SCENARIO_ENV_VAR: &str = "TICKCAP_SCENARIO";

const DEFAULT_DURATION_SECONDS: f64 = 2.0;
const DEFAULT_SCALE: f64 = 24.0;

#[derive(Debug, Error)]
pub(crate) enum ScenarioError {
    #[error("failed to read scenario '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse scenario '{path}' at {field}: {source}")]
    Parse {
        path: PathBuf,
        field: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid scenario at {field}: {message}")]
    Invalid { field: String, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct PistonSpec {
    pub(crate) position: GridPos,
    pub(crate) facing: Facing,
    #[serde(default)]
    pub(crate) sticky: bool,
    #[serde(default)]
    pub(crate) pushes_block: bool,
    #[serde(default)]
    pub(crate) start_tick: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub(crate) struct Scenario {
    pub(crate) corner_a: GridPos,
    pub(crate) corner_b: GridPos,
    pub(crate) solid: Vec<GridPos>,
    pub(crate) pistons: Vec<PistonSpec>,
    pub(crate) capture: CaptureConfig,
}

impl Default for Scenario {
    fn default() -> Self {
        let piston = |z: i32, start_tick: u64, pushes_block: bool| PistonSpec {
            position: GridPos::new(0, 0, z),
            facing: Facing::East,
            sticky: z % 2 == 0,
            pushes_block,
            start_tick,
        };
        Self {
            corner_a: GridPos::new(0, 0, 0),
            corner_b: GridPos::new(5, 0, 2),
            solid: vec![GridPos::new(5, 0, 0), GridPos::new(5, 0, 1), GridPos::new(5, 0, 2)],
            pistons: vec![piston(0, 0, true), piston(1, 2, false), piston(2, 4, true)],
            capture: CaptureConfig {
                duration_seconds: DEFAULT_DURATION_SECONDS,
                area: AreaDescriptor {
                    scale: DEFAULT_SCALE,
                    ..AreaDescriptor::default()
                },
                ..CaptureConfig::default()
            },
        }
    }
}

impl Scenario {
    pub(crate) fn region(&self) -> Region {
        Region::from_corners(self.corner_a, self.corner_b)
    }

    pub(crate) fn load(path: &Path) -> Result<Self, ScenarioError> {
        let raw = fs::read_to_string(path).map_err(|source| ScenarioError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let scenario = Self::parse(path, &raw)?;
        scenario.validate()?;
        Ok(scenario)
    }

    fn parse(path: &Path, raw: &str) -> Result<Self, ScenarioError> {
        let mut deserializer = serde_json::Deserializer::from_str(raw);
        serde_path_to_error::deserialize::<_, Scenario>(&mut deserializer).map_err(|error| {
            let field = error.path().to_string();
            ScenarioError::Parse {
                path: path.to_path_buf(),
                field: if field.is_empty() {
                    ".".to_string()
                } else {
                    field
                },
                source: error.into_inner(),
            }
        })
    }

    fn validate(&self) -> Result<(), ScenarioError> {
        let region = self.region();
        for (index, piston) in self.pistons.iter().enumerate() {
            if !region.contains_cell(piston.position) {
                return Err(invalid(
                    format!("pistons[{index}].position"),
                    format!("{:?} is outside the capture region", piston.position),
                ));
            }
            if piston.pushes_block && self.solid.contains(&piston.position.offset(piston.facing)) {
                return Err(invalid(
                    format!("pistons[{index}].pushes_block"),
                    "the cell in front of the piston is solid",
                ));
            }
        }
        if !self.capture.duration_seconds.is_finite() || self.capture.duration_seconds <= 0.0 {
            return Err(invalid(
                "capture.duration_seconds",
                format!("expected a positive number, got {}", self.capture.duration_seconds),
            ));
        }
        if !(self.capture.area.scale.is_finite() && self.capture.area.scale >= 1.0) {
            return Err(invalid(
                "capture.area.scale",
                format!("expected at least 1, got {}", self.capture.area.scale),
            ));
        }
        Ok(())
    }
}

fn invalid(field: impl Into<String>, message: impl Into<String>) -> ScenarioError {
    ScenarioError::Invalid {
        field: field.into(),
        message: message.into(),
    }
}
