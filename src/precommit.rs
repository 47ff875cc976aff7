use std::path::Path;
use std::time::Duration;

use tracing::warn;

use crate::process::{ToolRun, ToolRunner};
use crate::signals::complexity::{lizard_invocation, parse_lizard_csv};

pub const PER_FILE_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookOutcome {
    /// Commit may proceed; warnings are informational.
    Allowed { warnings: Vec<String> },
    Blocked {
        warnings: Vec<String>,
        violations: Vec<String>,
    },
    /// lizard is missing; never block on a missing tool.
    ToolMissing,
}

impl HookOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            HookOutcome::Blocked { .. } => 1,
            HookOutcome::Allowed { .. } | HookOutcome::ToolMissing => 0,
        }
    }
}

pub async fn check_files<R: ToolRunner + ?Sized>(
    runner: &R,
    paths: &[String],
    max_complexity: u32,
    warn_complexity: u32,
) -> HookOutcome {
    let mut violations = Vec::new();
    let mut warnings = Vec::new();

    for path in paths {
        let stdout = match runner
            .run(&lizard_invocation(Path::new(path), PER_FILE_TIMEOUT))
            .await
        {
            ToolRun::Completed { stdout, .. } => stdout,
            ToolRun::NotInstalled => return HookOutcome::ToolMissing,
            ToolRun::TimedOut(_) => {
                warn!(%path, "lizard timed out, skipping file");
                continue;
            }
            ToolRun::SpawnFailed(err) => {
                warn!(%path, error = %err, "lizard failed to start, skipping file");
                continue;
            }
        };

        for function in parse_lizard_csv(&stdout) {
            let cc = function.complexity;
            if cc >= f64::from(max_complexity) {
                violations.push(format!(
                    "  {path}: `{}` complexity={cc:.0} (max={max_complexity})",
                    function.name
                ));
            } else if cc >= f64::from(warn_complexity) {
                warnings.push(format!(
                    "  {path}: `{}` complexity={cc:.0} (warn at {warn_complexity})",
                    function.name
                ));
            }
        }
    }

    if violations.is_empty() {
        HookOutcome::Allowed { warnings }
    } else {
        HookOutcome::Blocked {
            warnings,
            violations,
        }
    }
}

/// Console text for the hook result.
pub fn render(outcome: &HookOutcome, max_complexity: u32) -> String {
    let mut lines = Vec::new();
    let (warnings, violations): (&[String], &[String]) = match outcome {
        HookOutcome::ToolMissing => {
            return "[complexity] ERROR: lizard not found. Install it with: pip install lizard"
                .to_string();
        }
        HookOutcome::Allowed { warnings } => (warnings.as_slice(), [].as_slice()),
        HookOutcome::Blocked {
            warnings,
            violations,
        } => (warnings.as_slice(), violations.as_slice()),
    };

    if !warnings.is_empty() {
        lines.push("[complexity] Warnings (commit not blocked):".to_string());
        lines.extend(warnings.iter().cloned());
    }
    if !violations.is_empty() {
        lines.push(format!(
            "[complexity] BLOCKED — {} function(s) exceed the complexity limit ({max_complexity}):",
            violations.len()
        ));
        lines.extend(violations.iter().cloned());
        lines.push(String::new());
        lines.push("Refactor these functions then re-commit. To suppress a specific".to_string());
        lines.push("function temporarily, add `# noqa: complexity` on its def line.".to_string());
    }
    lines.join("\n")
}
