use std::path::Path;

use serde_json::Value;

use crate::signals::Signal;

/// Read a coverage.py JSON report and return its total percentage.
pub fn measure_coverage(path: &Path) -> Signal {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(_) => return Signal::degraded("coverage.json not found — run `coverage json` first"),
    };

    match percent_covered(&content) {
        Ok(pct) => Signal::measured(pct, format!("branch+line coverage: **{pct:.1}%**")),
        Err(cause) => Signal::degraded(format!("Could not parse coverage.json: {cause}")),
    }
}

fn percent_covered(content: &str) -> Result<f64, String> {
    let data: Value = serde_json::from_str(content).map_err(|e| e.to_string())?;
    let totals = data
        .get("totals")
        .ok_or_else(|| "missing 'totals' object".to_string())?;
    let raw = totals
        .get("percent_covered")
        .or_else(|| totals.get("percent_covered_display"))
        .ok_or_else(|| "missing 'percent_covered'".to_string())?;

    match raw {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| format!("invalid percentage {n}")),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("invalid percentage {s:?}")),
        other => Err(format!("invalid percentage {other}")),
    }
}
