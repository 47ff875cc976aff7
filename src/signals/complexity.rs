use std::path::Path;
use std::time::Duration;

use tracing::{debug, warn};

use crate::js_complexity::JsComplexitySummary;
use crate::process::{head_chars, Invocation, ToolRun, ToolRunner};
use crate::signals::Signal;

pub const LIZARD_TIMEOUT: Duration = Duration::from_secs(120);

// lizard --csv columns: nloc, ccn, token, param, length, location, file,
// function, long_name, start, end
const CCN_COLUMN: usize = 1;
const LOCATION_COLUMN: usize = 5;
const FUNCTION_COLUMN: usize = 7;

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionComplexity {
    pub name: String,
    pub complexity: f64,
}

pub fn lizard_invocation(target: &Path, timeout: Duration) -> Invocation {
    Invocation::new(
        "lizard",
        [
            target.display().to_string(),
            "--csv".to_string(),
            "-l".to_string(),
            "python".to_string(),
        ],
        timeout,
    )
}

/// Parse lizard's CSV report, skipping rows without a numeric CCN.
pub fn parse_lizard_csv(stdout: &str) -> Vec<FunctionComplexity> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(stdout.as_bytes());

    let mut functions = Vec::new();
    for record in reader.records() {
        let Ok(record) = record else {
            continue;
        };
        if record.len() < 3 {
            continue;
        }
        let Some(complexity) = record
            .get(CCN_COLUMN)
            .and_then(|field| field.parse::<f64>().ok())
        else {
            continue;
        };
        let name = [FUNCTION_COLUMN, LOCATION_COLUMN]
            .iter()
            .filter_map(|&column| record.get(column))
            .find(|field| !field.is_empty())
            .unwrap_or("unknown")
            .to_string();
        functions.push(FunctionComplexity { name, complexity });
    }
    functions
}

/// Average cyclomatic complexity for the Python tree, blended with a
/// pre-computed JS/TS summary when one is supplied.
pub async fn measure_complexity<R: ToolRunner + ?Sized>(
    runner: &R,
    src: &Path,
    js_summary: Option<&Path>,
    poor: f64,
) -> Signal {
    let python = measure_python_complexity(runner, src, poor).await;
    let js = js_summary.and_then(load_js_complexity);

    match js {
        Some(Signal::Measured {
            value: js_avg,
            detail: js_detail,
            ..
        }) if js_avg > 0.0 => {
            if python.value() > 0.0 {
                let blended = (python.value() + js_avg) / 2.0;
                debug!(python = python.value(), js = js_avg, blended, "blending complexity");
                Signal::measured(
                    blended,
                    format!("Python: {} | JS/TS: {js_detail}", python.detail()),
                )
                .with_warnings(python.warnings().to_vec())
            } else {
                Signal::measured(js_avg, js_detail)
            }
        }
        _ => python,
    }
}

async fn measure_python_complexity<R: ToolRunner + ?Sized>(
    runner: &R,
    src: &Path,
    poor: f64,
) -> Signal {
    let invocation = lizard_invocation(src, LIZARD_TIMEOUT);
    let (exit_code, stdout, stderr) = match runner.run(&invocation).await {
        ToolRun::Completed {
            exit_code,
            stdout,
            stderr,
        } => (exit_code, stdout, stderr),
        ToolRun::NotInstalled => {
            warn!("lizard not found on PATH");
            return Signal::degraded("lizard not installed — skipped").with_warnings(vec![
                "lizard not found; install via `pip install lizard`".to_string(),
            ]);
        }
        ToolRun::TimedOut(limit) => {
            warn!(timeout_secs = limit.as_secs(), "lizard timed out");
            return Signal::degraded(format!("lizard timed out after {}s", limit.as_secs()))
                .with_warnings(vec!["lizard analysis timed out".to_string()]);
        }
        ToolRun::SpawnFailed(err) => {
            return Signal::degraded(format!("lizard error: {}", head_chars(&err, 200)));
        }
    };

    if !matches!(exit_code, Some(0) | Some(1)) {
        return Signal::degraded(format!("lizard error: {}", head_chars(&stderr, 200)));
    }
    if stdout.trim().is_empty() {
        return Signal::degraded("No Python files analysed");
    }

    let functions = parse_lizard_csv(&stdout);
    if functions.is_empty() {
        return Signal::degraded("No functions found by lizard");
    }

    let count = functions.len();
    let avg = functions.iter().map(|f| f.complexity).sum::<f64>() / count as f64;
    let worst = functions
        .iter()
        .map(|f| f.complexity)
        .fold(f64::MIN, f64::max);

    let warnings = functions
        .iter()
        .filter(|f| f.complexity > poor)
        .map(|f| {
            format!(
                "Very high complexity ({:.0}) in `{}` — consider splitting",
                f.complexity, f.name
            )
        })
        .collect();

    Signal::measured(
        avg,
        format!(
            "avg cyclomatic complexity: **{avg:.1}** (worst: {worst:.0} across {count} functions)"
        ),
    )
    .with_warnings(warnings)
}

/// Load a summary written by `ai-gate js-complexity`. Missing or unreadable
/// files count as no JS/TS signal at all.
pub fn load_js_complexity(path: &Path) -> Option<Signal> {
    let content = std::fs::read_to_string(path).ok()?;
    let summary: JsComplexitySummary = match serde_json::from_str(&content) {
        Ok(summary) => summary,
        Err(err) => {
            debug!(path = %path.display(), error = %err, "ignoring malformed JS/TS summary");
            return None;
        }
    };

    if let Some(error) = summary.error.as_deref().filter(|e| !e.is_empty()) {
        return Some(Signal::degraded(format!("JS/TS analysis: {error}")));
    }

    Some(Signal::measured(
        summary.avg_complexity,
        format!(
            "JS/TS avg complexity: **{:.1}** (worst: {:.0} across {} functions)",
            summary.avg_complexity, summary.worst_complexity, summary.function_count
        ),
    ))
}
