pub mod antipatterns;
pub mod complexity;
pub mod coverage;

/// Result of one signal extractor.
///
/// A degraded signal still feeds `0.0` into scoring, but the reason is kept
/// so a report can tell "not measured" apart from "measured as zero".
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Measured {
        value: f64,
        detail: String,
        warnings: Vec<String>,
    },
    Degraded {
        reason: String,
        warnings: Vec<String>,
    },
}

impl Signal {
    pub fn measured(value: f64, detail: impl Into<String>) -> Self {
        Signal::Measured {
            value,
            detail: detail.into(),
            warnings: Vec::new(),
        }
    }

    pub fn degraded(reason: impl Into<String>) -> Self {
        Signal::Degraded {
            reason: reason.into(),
            warnings: Vec::new(),
        }
    }

    pub fn with_warnings(mut self, extra: Vec<String>) -> Self {
        match &mut self {
            Signal::Measured { warnings, .. } | Signal::Degraded { warnings, .. } => {
                warnings.extend(extra)
            }
        }
        self
    }

    pub fn value(&self) -> f64 {
        match self {
            Signal::Measured { value, .. } => *value,
            Signal::Degraded { .. } => 0.0,
        }
    }

    pub fn detail(&self) -> &str {
        match self {
            Signal::Measured { detail, .. } => detail,
            Signal::Degraded { reason, .. } => reason,
        }
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            Signal::Measured { warnings, .. } | Signal::Degraded { warnings, .. } => warnings,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Signal::Degraded { .. })
    }
}
