//! Threshold resolution.
//!
//! Three sources feed one [`ThresholdSet`], lowest priority first:
//!
//! 1. built-in defaults ([`ThresholdSet::default`])
//! 2. the `[tool.ai-gate]` section of `pyproject.toml`
//! 3. CLI flags
//!
//! ```toml
//! [tool.ai-gate]
//! threshold = 75
//!
//! [tool.ai-gate.complexity]
//! excellent = 4
//! acceptable = 8
//! poor = 16
//!
//! [tool.ai-gate.coverage]
//! excellent = 95
//!
//! [tool.ai-gate.antipatterns]
//! poor = 4
//! ```

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer};
use thiserror::Error;
use tracing::{debug, warn};

pub const CONFIG_FILE_NAME: &str = "pyproject.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    LowerIsBetter,
    HigherIsBetter,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdTriple {
    pub excellent: f64,
    pub acceptable: f64,
    pub poor: f64,
    pub orientation: Orientation,
}

impl ThresholdTriple {
    pub const fn lower_is_better(excellent: f64, acceptable: f64, poor: f64) -> Self {
        Self {
            excellent,
            acceptable,
            poor,
            orientation: Orientation::LowerIsBetter,
        }
    }

    pub const fn higher_is_better(excellent: f64, acceptable: f64, poor: f64) -> Self {
        Self {
            excellent,
            acceptable,
            poor,
            orientation: Orientation::HigherIsBetter,
        }
    }

    /// Strictly ordered in the direction of the orientation.
    pub fn is_ordered(&self) -> bool {
        match self.orientation {
            Orientation::LowerIsBetter => {
                self.excellent < self.acceptable && self.acceptable < self.poor
            }
            Orientation::HigherIsBetter => {
                self.excellent > self.acceptable && self.acceptable > self.poor
            }
        }
    }

    fn apply(&mut self, overrides: &TripleOverride) {
        if let Some(value) = overrides.excellent {
            self.excellent = value;
        }
        if let Some(value) = overrides.acceptable {
            self.acceptable = value;
        }
        if let Some(value) = overrides.poor {
            self.poor = value;
        }
    }
}

impl fmt::Display for ThresholdTriple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.excellent, self.acceptable, self.poor)
    }
}

/// Effective thresholds for one gate invocation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ThresholdSet {
    /// Average cyclomatic complexity. Default 5/10/20, lower is better.
    pub complexity: ThresholdTriple,
    /// Branch+line coverage percent. Default 90/70/40, higher is better.
    pub coverage: ThresholdTriple,
    /// Findings per 100 source lines. Default 0/2/5, lower is better.
    pub antipatterns: ThresholdTriple,
    /// Minimum total score to pass. Default 70.
    pub threshold: u32,
}

impl Default for ThresholdSet {
    fn default() -> Self {
        Self {
            complexity: ThresholdTriple::lower_is_better(5.0, 10.0, 20.0),
            coverage: ThresholdTriple::higher_is_better(90.0, 70.0, 40.0),
            antipatterns: ThresholdTriple::lower_is_better(0.0, 2.0, 5.0),
            threshold: 70,
        }
    }
}

impl ThresholdSet {
    pub fn apply(mut self, overrides: &ThresholdOverrides) -> Self {
        if let Some(threshold) = overrides.threshold {
            self.threshold = threshold;
        }
        self.complexity.apply(&overrides.complexity);
        self.coverage.apply(&overrides.coverage);
        self.antipatterns.apply(&overrides.antipatterns);
        self
    }

    pub fn validate(&self) -> Result<(), ThresholdError> {
        for (signal, triple) in [
            ("complexity", &self.complexity),
            ("coverage", &self.coverage),
            ("antipatterns", &self.antipatterns),
        ] {
            if !triple.is_ordered() {
                return Err(ThresholdError::Misordered {
                    signal,
                    triple: *triple,
                    expected: match triple.orientation {
                        Orientation::LowerIsBetter => "excellent < acceptable < poor",
                        Orientation::HigherIsBetter => "excellent > acceptable > poor",
                    },
                });
            }
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum ThresholdError {
    #[error("{signal} thresholds {triple} are invalid: expected {expected}")]
    Misordered {
        signal: &'static str,
        triple: ThresholdTriple,
        expected: &'static str,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
pub struct TripleOverride {
    #[serde(default, deserialize_with = "lenient_number")]
    pub excellent: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub acceptable: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub poor: Option<f64>,
}

/// Sparse set of threshold values from one source.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ThresholdOverrides {
    pub threshold: Option<u32>,
    pub complexity: TripleOverride,
    pub coverage: TripleOverride,
    pub antipatterns: TripleOverride,
}

#[derive(Debug, Default, Deserialize)]
struct PyProject {
    #[serde(default)]
    tool: ToolTable,
}

#[derive(Debug, Default, Deserialize)]
struct ToolTable {
    #[serde(rename = "ai-gate")]
    ai_gate: Option<GateSection>,
}

#[derive(Debug, Default, Deserialize)]
struct GateSection {
    #[serde(default, deserialize_with = "lenient_number")]
    threshold: Option<f64>,
    #[serde(default)]
    complexity: TripleOverride,
    #[serde(default)]
    coverage: TripleOverride,
    #[serde(default)]
    antipatterns: TripleOverride,
}

/// A number or numeric string. Any other value drops only that key.
fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(value) = Option::<toml::Value>::deserialize(deserializer)? else {
        return Ok(None);
    };
    let number = match &value {
        toml::Value::Integer(n) => Some(*n as f64),
        toml::Value::Float(f) => Some(*f),
        toml::Value::String(text) => text.trim().parse::<f64>().ok(),
        _ => None,
    };
    match number {
        Some(n) if n.is_finite() => Ok(Some(n)),
        _ => {
            warn!(value = %value, "ignoring non-numeric gate threshold");
            Ok(None)
        }
    }
}

impl From<GateSection> for ThresholdOverrides {
    fn from(section: GateSection) -> Self {
        Self {
            threshold: section.threshold.map(|t| t.max(0.0) as u32),
            complexity: section.complexity,
            coverage: section.coverage,
            antipatterns: section.antipatterns,
        }
    }
}

/// Read `[tool.ai-gate]` overrides. Missing, unreadable or malformed files
/// yield no overrides.
pub fn load_config_overrides(config_path: Option<&Path>) -> ThresholdOverrides {
    let path: PathBuf = match config_path {
        Some(path) => path.to_path_buf(),
        None => match std::env::current_dir() {
            Ok(cwd) => cwd.join(CONFIG_FILE_NAME),
            Err(_) => return ThresholdOverrides::default(),
        },
    };

    let content = match std::fs::read_to_string(&path) {
        Ok(content) => content,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "no gate config loaded");
            return ThresholdOverrides::default();
        }
    };

    parse_config_overrides(&content).unwrap_or_else(|err| {
        warn!(path = %path.display(), error = %err, "ignoring malformed gate config");
        ThresholdOverrides::default()
    })
}

fn parse_config_overrides(content: &str) -> Result<ThresholdOverrides, toml::de::Error> {
    let project: PyProject = toml::from_str(content)?;
    Ok(project
        .tool
        .ai_gate
        .map(ThresholdOverrides::from)
        .unwrap_or_default())
}

/// Merge defaults, the config file and CLI flags, then validate the result.
pub fn resolve(
    cli: &ThresholdOverrides,
    config_path: Option<&Path>,
) -> Result<ThresholdSet, ThresholdError> {
    let from_config = load_config_overrides(config_path);
    let thresholds = ThresholdSet::default().apply(&from_config).apply(cli);
    thresholds.validate()?;
    debug!(
        complexity = %thresholds.complexity,
        coverage = %thresholds.coverage,
        antipatterns = %thresholds.antipatterns,
        threshold = thresholds.threshold,
        "resolved thresholds"
    );
    Ok(thresholds)
}
