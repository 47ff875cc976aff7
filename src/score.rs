use serde::Serialize;

use crate::signals::Signal;
use crate::thresholds::{Orientation, ThresholdSet, ThresholdTriple};

pub const COMPLEXITY_POINTS: f64 = 40.0;
pub const COVERAGE_POINTS: f64 = 35.0;
pub const ANTIPATTERN_POINTS: f64 = 25.0;

/// Piecewise-linear credit for `value` against a threshold triple.
///
/// Full credit at or beyond `excellent`, half at `acceptable`, nothing at or
/// beyond `poor`, linear in between. Lower-is-better triples are negated and
/// scored with the same higher-is-better rules. A zero-width interval is
/// treated as a step up to the interval's upper bound.
pub fn interpolate(value: f64, triple: &ThresholdTriple, max_points: f64) -> f64 {
    let (value, excellent, acceptable, poor) = match triple.orientation {
        Orientation::HigherIsBetter => (value, triple.excellent, triple.acceptable, triple.poor),
        Orientation::LowerIsBetter => (-value, -triple.excellent, -triple.acceptable, -triple.poor),
    };

    if value >= excellent {
        return max_points;
    }
    if value >= acceptable {
        let width = excellent - acceptable;
        if width <= 0.0 {
            return max_points;
        }
        return max_points * 0.5 + max_points * 0.5 * (value - acceptable) / width;
    }
    if value >= poor {
        let width = acceptable - poor;
        if width <= 0.0 {
            return max_points * 0.5;
        }
        return max_points * 0.5 * (value - poor) / width;
    }
    0.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreBreakdown {
    pub complexity_score: f64,
    pub coverage_score: f64,
    pub antipattern_score: f64,
    pub complexity_detail: String,
    pub coverage_detail: String,
    pub antipattern_detail: String,
    pub warnings: Vec<String>,
    pub languages: Vec<String>,
}

impl ScoreBreakdown {
    pub fn total(&self) -> f64 {
        self.complexity_score + self.coverage_score + self.antipattern_score
    }

    pub fn passed(&self, threshold: u32) -> bool {
        self.total() >= f64::from(threshold)
    }
}

pub struct Signals {
    pub complexity: Signal,
    pub coverage: Signal,
    pub antipatterns: Signal,
}

pub fn aggregate(
    signals: &Signals,
    thresholds: &ThresholdSet,
    languages: Vec<String>,
) -> ScoreBreakdown {
    let mut warnings = Vec::new();
    warnings.extend_from_slice(signals.complexity.warnings());
    warnings.extend_from_slice(signals.antipatterns.warnings());

    ScoreBreakdown {
        complexity_score: interpolate(
            signals.complexity.value(),
            &thresholds.complexity,
            COMPLEXITY_POINTS,
        ),
        coverage_score: interpolate(
            signals.coverage.value(),
            &thresholds.coverage,
            COVERAGE_POINTS,
        ),
        antipattern_score: interpolate(
            signals.antipatterns.value(),
            &thresholds.antipatterns,
            ANTIPATTERN_POINTS,
        ),
        complexity_detail: signals.complexity.detail().to_string(),
        coverage_detail: signals.coverage.detail().to_string(),
        antipattern_detail: signals.antipatterns.detail().to_string(),
        warnings,
        languages,
    }
}

/// Split a comma-separated `--languages` value, dropping empty entries.
pub fn parse_languages(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|lang| !lang.is_empty())
        .map(str::to_string)
        .collect()
}
