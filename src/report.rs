use std::fmt::Write;

use serde::Serialize;

use crate::score::ScoreBreakdown;

/// shields.io endpoint badge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Badge {
    pub schema_version: u8,
    pub label: String,
    pub message: String,
    pub color: BadgeColor,
    pub named_logo: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BadgeColor {
    BrightGreen,
    Green,
    Yellow,
    Red,
}

impl BadgeColor {
    /// Tier by absolute score, independent of the gate threshold.
    pub fn for_score(score: f64) -> Self {
        if score >= 90.0 {
            BadgeColor::BrightGreen
        } else if score >= 70.0 {
            BadgeColor::Green
        } else if score >= 50.0 {
            BadgeColor::Yellow
        } else {
            BadgeColor::Red
        }
    }
}

pub fn render_badge(score: f64, threshold: u32) -> Badge {
    let glyph = if score >= f64::from(threshold) { '✓' } else { '✗' };
    Badge {
        schema_version: 1,
        label: "AI Gate".to_string(),
        message: format!("{score:.0}/100 {glyph}"),
        color: BadgeColor::for_score(score),
        named_logo: "github-actions".to_string(),
    }
}

pub fn render(breakdown: &ScoreBreakdown, threshold: u32) -> String {
    let total = breakdown.total();
    let passed = breakdown.passed(threshold);
    let (icon, status) = if passed {
        ("✅", "PASSED")
    } else {
        ("❌", "BLOCKED")
    };
    let languages = if breakdown.languages.is_empty() {
        "Python".to_string()
    } else {
        breakdown.languages.join(", ").to_uppercase()
    };

    let mut output = String::new();
    let _ = writeln!(output, "## {icon} AI Code Quality Gate — {status}");
    let _ = writeln!(output);
    let _ = writeln!(output, "**Languages analysed:** {languages}");
    let _ = writeln!(output);
    let _ = writeln!(output, "| Signal | Score | Detail |");
    let _ = writeln!(output, "|--------|------:|--------|");
    let _ = writeln!(
        output,
        "| Complexity (40 pts) | {:.1} | {} |",
        breakdown.complexity_score, breakdown.complexity_detail
    );
    let _ = writeln!(
        output,
        "| Coverage (35 pts)   | {:.1} | {} |",
        breakdown.coverage_score, breakdown.coverage_detail
    );
    let _ = writeln!(
        output,
        "| Anti-patterns (25 pts) | {:.1} | {} |",
        breakdown.antipattern_score, breakdown.antipattern_detail
    );
    let _ = writeln!(
        output,
        "| **Total** | **{total:.1} / 100** | Threshold: {threshold} |"
    );
    let _ = writeln!(output);

    if !breakdown.warnings.is_empty() {
        let _ = writeln!(output, "### Findings");
        let _ = writeln!(output);
        for warning in &breakdown.warnings {
            let _ = writeln!(output, "- {warning}");
        }
        let _ = writeln!(output);
    }

    if !passed {
        let _ = writeln!(
            output,
            "> **Merge blocked.** Resolve the findings above and re-push to re-run the gate."
        );
        let _ = writeln!(output);
    }

    output
}
