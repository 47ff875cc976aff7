use std::path::Path;

use serde::Deserialize;
use tracing::debug;
use walkdir::{DirEntry, WalkDir};

use crate::process::head_chars;
use crate::signals::Signal;

/// Top-level directories that would inflate the LOC denominator.
pub const LOC_EXCLUDE_DIRS: &[&str] = &[
    "tests",
    "test",
    "scripts",
    "fuzz",
    ".venv",
    "venv",
    "node_modules",
    "__pycache__",
];

const MAX_LISTED_FINDINGS: usize = 10;
const MAX_MESSAGE_CHARS: usize = 120;

#[derive(Debug, Default, Deserialize)]
struct SemgrepReport {
    #[serde(default)]
    results: Vec<Finding>,
}

#[derive(Debug, Default, Deserialize)]
struct Finding {
    path: Option<String>,
    check_id: Option<String>,
    #[serde(default)]
    start: Position,
    #[serde(default)]
    extra: Extra,
}

#[derive(Debug, Default, Deserialize)]
struct Position {
    line: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct Extra {
    message: Option<String>,
}

impl Finding {
    fn warning(&self) -> String {
        let path = self.path.as_deref().unwrap_or("?");
        let line = self
            .start
            .line
            .map(|l| l.to_string())
            .unwrap_or_else(|| "?".to_string());
        let message = self
            .extra
            .message
            .as_deref()
            .or(self.check_id.as_deref())
            .unwrap_or("unknown")
            .replace('\n', " ");
        format!("`{path}:{line}` — {}", head_chars(&message, MAX_MESSAGE_CHARS))
    }
}

/// Semgrep findings per 100 source lines.
pub fn measure_antipatterns(semgrep_json: &Path, src: &Path) -> Signal {
    let content = match std::fs::read_to_string(semgrep_json) {
        Ok(content) => content,
        Err(_) => return Signal::degraded("semgrep-results.json not found — semgrep not run"),
    };
    let report: SemgrepReport = match serde_json::from_str(&content) {
        Ok(report) => report,
        Err(err) => return Signal::degraded(format!("Could not parse semgrep results: {err}")),
    };

    let finding_count = report.results.len();
    let loc = count_loc(src);
    let density = finding_count as f64 / loc as f64 * 100.0;
    debug!(finding_count, loc, density, "anti-pattern density");

    let mut warnings: Vec<String> = report
        .results
        .iter()
        .take(MAX_LISTED_FINDINGS)
        .map(Finding::warning)
        .collect();
    if finding_count > MAX_LISTED_FINDINGS {
        warnings.push(format!(
            "...and {} more findings (see semgrep-results.json)",
            finding_count - MAX_LISTED_FINDINGS
        ));
    }

    Signal::measured(
        density,
        format!(
            "**{finding_count}** anti-pattern findings ({density:.2} per 100 LOC, ~{loc} source lines)"
        ),
    )
    .with_warnings(warnings)
}

/// Non-blank, non-comment Python lines under `src`, floored at 1.
pub fn count_loc(src: &Path) -> usize {
    let root = src.canonicalize().unwrap_or_else(|_| src.to_path_buf());
    let total: usize = WalkDir::new(&root)
        .into_iter()
        .filter_entry(|entry| !is_excluded_top_level(entry))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().extension().is_some_and(|ext| ext == "py"))
        .filter_map(|entry| std::fs::read(entry.path()).ok())
        .map(|bytes| {
            String::from_utf8_lossy(&bytes)
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .count()
        })
        .sum();
    total.max(1)
}

fn is_excluded_top_level(entry: &DirEntry) -> bool {
    entry.depth() == 1
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| LOC_EXCLUDE_DIRS.contains(&name))
}
