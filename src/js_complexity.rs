//! JS/TS cyclomatic complexity via `escomplex`.
//!
//! Produces the summary consumed by `score --js-complexity`:
//!
//! ```json
//! {
//!   "avg_complexity": 3.25,
//!   "worst_complexity": 14.0,
//!   "function_count": 40,
//!   "high_complexity_functions": [{"name": "reducer", "complexity": 14.0, "file": "src/store.ts"}],
//!   "error": null
//! }
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use walkdir::{DirEntry, WalkDir};

use crate::process::{head_chars, Invocation, ToolRun, ToolRunner};

pub const ESCOMPLEX_TIMEOUT: Duration = Duration::from_secs(120);

const JS_EXCLUDE_DIRS: &[&str] = &[
    "node_modules",
    ".venv",
    "venv",
    "dist",
    "build",
    ".next",
    "coverage",
    "__pycache__",
    ".git",
];

const JS_EXTENSIONS: &[&str] = &["js", "jsx", "ts", "tsx", "mjs", "cjs"];

const HIGH_COMPLEXITY: f64 = 10.0;
const MAX_LISTED_FUNCTIONS: usize = 20;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JsComplexitySummary {
    pub avg_complexity: f64,
    pub worst_complexity: f64,
    pub function_count: usize,
    pub high_complexity_functions: Vec<HotFunction>,
    pub error: Option<String>,
}

impl JsComplexitySummary {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            error: Some(error.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HotFunction {
    pub name: String,
    pub complexity: f64,
    pub file: String,
}

#[derive(Debug, Default, Deserialize)]
struct EscomplexOutput {
    #[serde(default)]
    reports: Vec<EscomplexReport>,
}

#[derive(Debug, Default, Deserialize)]
struct EscomplexReport {
    path: Option<String>,
    #[serde(default)]
    functions: Vec<EscomplexFunction>,
}

#[derive(Debug, Default, Deserialize)]
struct EscomplexFunction {
    name: Option<String>,
    cyclomatic: Option<f64>,
}

/// JS/TS sources under `src`, skipping build output and dependency dirs.
pub fn find_js_files(src: &Path) -> Vec<PathBuf> {
    let root = src.canonicalize().unwrap_or_else(|_| src.to_path_buf());
    let mut files: Vec<PathBuf> = WalkDir::new(&root)
        .into_iter()
        .filter_entry(|entry| !is_excluded_top_level(entry))
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| {
            entry
                .path()
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| JS_EXTENSIONS.contains(&ext))
        })
        .map(DirEntry::into_path)
        .collect();
    files.sort();
    files
}

fn is_excluded_top_level(entry: &DirEntry) -> bool {
    entry.depth() == 1
        && entry
            .file_name()
            .to_str()
            .is_some_and(|name| JS_EXCLUDE_DIRS.contains(&name))
}

pub async fn analyse<R: ToolRunner + ?Sized>(runner: &R, src: &Path) -> JsComplexitySummary {
    let files = find_js_files(src);
    if files.is_empty() {
        return JsComplexitySummary::failed("No JS/TS files found");
    }

    let mut args = vec!["--format".to_string(), "json".to_string()];
    args.extend(files.iter().map(|f| f.display().to_string()));
    let invocation = Invocation::new("escomplex", args, ESCOMPLEX_TIMEOUT);

    let stdout = match runner.run(&invocation).await {
        ToolRun::Completed {
            exit_code: Some(0) | Some(1),
            stdout,
            ..
        } => stdout,
        ToolRun::Completed { stderr, .. } => {
            return JsComplexitySummary::failed(format!(
                "escomplex error: {}",
                head_chars(&stderr, 200)
            ));
        }
        ToolRun::NotInstalled => {
            return JsComplexitySummary::failed(
                "escomplex-cli not installed — run: npm install -g escomplex-cli",
            );
        }
        ToolRun::TimedOut(limit) => {
            return JsComplexitySummary::failed(format!(
                "escomplex timed out after {}s",
                limit.as_secs()
            ));
        }
        ToolRun::SpawnFailed(err) => {
            return JsComplexitySummary::failed(format!(
                "escomplex error: {}",
                head_chars(&err, 200)
            ));
        }
    };

    let output: EscomplexOutput = match serde_json::from_str(&stdout) {
        Ok(output) => output,
        Err(err) => {
            return JsComplexitySummary::failed(format!(
                "Could not parse escomplex output: {err}"
            ));
        }
    };

    summarize(&output)
}

fn summarize(output: &EscomplexOutput) -> JsComplexitySummary {
    let mut complexities = Vec::new();
    let mut hot = Vec::new();

    for report in &output.reports {
        let file = report.path.as_deref().unwrap_or("unknown");
        for function in &report.functions {
            let cc = function.cyclomatic.unwrap_or(1.0);
            complexities.push(cc);
            if cc > HIGH_COMPLEXITY {
                hot.push(HotFunction {
                    name: function
                        .name
                        .clone()
                        .unwrap_or_else(|| "<anonymous>".to_string()),
                    complexity: cc,
                    file: file.to_string(),
                });
            }
        }
    }

    if complexities.is_empty() {
        return JsComplexitySummary::failed("No functions found in JS/TS files");
    }

    hot.sort_by(|a, b| b.complexity.total_cmp(&a.complexity));
    hot.truncate(MAX_LISTED_FUNCTIONS);

    let avg = complexities.iter().sum::<f64>() / complexities.len() as f64;
    let worst = complexities.iter().copied().fold(f64::MIN, f64::max);

    JsComplexitySummary {
        avg_complexity: round2(avg),
        worst_complexity: round2(worst),
        function_count: complexities.len(),
        high_complexity_functions: hot,
        error: None,
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::ScriptedRunner;
    use tempfile::TempDir;

    fn js_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        for rel in [
            "src/app.ts",
            "src/view.jsx",
            "lib/util.mjs",
            "node_modules/dep/index.js",
            "dist/bundle.js",
            "src/readme.md",
        ] {
            let path = dir.path().join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, "export {}\n").unwrap();
        }
        dir
    }

    #[test]
    fn finds_sources_and_skips_noise_dirs() {
        let dir = js_tree();
        let files = find_js_files(dir.path());
        let names: Vec<String> = files
            .iter()
            .map(|f| f.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["util.mjs", "app.ts", "view.jsx"]);
    }

    #[tokio::test]
    async fn no_files_short_circuits_without_running_escomplex() {
        let dir = TempDir::new().unwrap();
        let runner = ScriptedRunner::default();
        let summary = analyse(&runner, dir.path()).await;
        assert_eq!(summary.error.as_deref(), Some("No JS/TS files found"));
        assert!(runner.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn summarizes_escomplex_reports() {
        let dir = js_tree();
        let stdout = r#"{"reports": [
            {"path": "src/app.ts", "functions": [
                {"name": "reducer", "cyclomatic": 14},
                {"name": "render", "cyclomatic": 2},
                {"cyclomatic": 11}
            ]},
            {"path": "src/view.jsx", "functions": [{"name": "View"}]}
        ]}"#;
        let runner = ScriptedRunner::new(vec![ScriptedRunner::completed(stdout)]);
        let summary = analyse(&runner, dir.path()).await;

        assert_eq!(summary.error, None);
        assert_eq!(summary.function_count, 4);
        assert_eq!(summary.avg_complexity, 7.0);
        assert_eq!(summary.worst_complexity, 14.0);
        assert_eq!(summary.high_complexity_functions.len(), 2);
        assert_eq!(summary.high_complexity_functions[0].name, "reducer");
        assert_eq!(summary.high_complexity_functions[1].name, "<anonymous>");

        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen[0].program, "escomplex");
        assert_eq!(&seen[0].args[..2], ["--format", "json"]);
        assert_eq!(seen[0].args.len(), 5);
    }

    #[tokio::test]
    async fn tool_failures_become_error_strings() {
        let dir = js_tree();
        let runner = ScriptedRunner::new(vec![
            ToolRun::NotInstalled,
            ToolRun::TimedOut(ESCOMPLEX_TIMEOUT),
            ScriptedRunner::completed("not json"),
            ScriptedRunner::completed(r#"{"reports": []}"#),
        ]);

        let missing = analyse(&runner, dir.path()).await;
        assert!(missing.error.unwrap().contains("npm install -g escomplex-cli"));
        let timed_out = analyse(&runner, dir.path()).await;
        assert_eq!(timed_out.error.as_deref(), Some("escomplex timed out after 120s"));
        let garbled = analyse(&runner, dir.path()).await;
        assert!(garbled.error.unwrap().starts_with("Could not parse escomplex output"));
        let empty = analyse(&runner, dir.path()).await;
        assert_eq!(empty.error.as_deref(), Some("No functions found in JS/TS files"));
    }

    #[test]
    fn summary_deserializes_with_missing_fields() {
        let summary: JsComplexitySummary =
            serde_json::from_str(r#"{"avg_complexity": 2.5}"#).unwrap();
        assert_eq!(summary.avg_complexity, 2.5);
        assert_eq!(summary.function_count, 0);
        assert!(summary.error.is_none());
    }
}
