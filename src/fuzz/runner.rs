use std::fmt::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{info, warn};

use crate::process::{tail_chars, Invocation, ToolRun, ToolRunner};

/// Wall-clock allowance on top of LibFuzzer's own `-max_total_time`.
pub const WALL_CLOCK_HEADROOM: Duration = Duration::from_secs(15);

const OUTPUT_TAIL_CHARS: usize = 2000;
const CRASH_PREFIX_HEX_CHARS: usize = 100;
const CRASH_MARKER: &str = "LibFuzzer: crash";

#[derive(Debug, Clone)]
pub struct FuzzSettings {
    pub python: String,
    pub timeout: Duration,
    pub corpus_dir: PathBuf,
    pub artifacts_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarnessOutcome {
    pub harness: String,
    pub crashed: bool,
    pub crash_input: Option<String>,
    pub output: String,
    pub timed_out: bool,
    /// The interpreter could not be launched, so nothing was fuzzed.
    pub failed_to_start: bool,
}

impl HarnessOutcome {
    fn new(harness: &str) -> Self {
        Self {
            harness: harness.to_string(),
            crashed: false,
            crash_input: None,
            output: String::new(),
            timed_out: false,
            failed_to_start: false,
        }
    }
}

/// Harness paths from a list file; blank lines and `#` comments are skipped.
pub fn parse_harness_list(content: &str) -> Vec<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect()
}

pub async fn run_harness<R: ToolRunner + ?Sized>(
    runner: &R,
    harness: &str,
    settings: &FuzzSettings,
) -> std::io::Result<HarnessOutcome> {
    let mut outcome = HarnessOutcome::new(harness);

    // Each harness gets its own corpus so seeds are never shared.
    let stem = Path::new(harness)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| harness.to_string());
    let corpus = settings.corpus_dir.join(stem);
    std::fs::create_dir_all(&corpus)?;
    std::fs::create_dir_all(&settings.artifacts_dir)?;

    let wall_clock = settings.timeout + WALL_CLOCK_HEADROOM;
    let invocation = Invocation::new(
        settings.python.clone(),
        [
            harness.to_string(),
            corpus.display().to_string(),
            format!("-max_total_time={}", settings.timeout.as_secs()),
            "-print_final_stats=1".to_string(),
            format!("-artifact_prefix={}/", settings.artifacts_dir.display()),
        ],
        wall_clock,
    );

    match runner.run(&invocation).await {
        ToolRun::Completed {
            exit_code,
            stdout,
            stderr,
        } => {
            let combined = format!("{stdout}{stderr}");
            outcome.output = tail_chars(&combined, OUTPUT_TAIL_CHARS).to_string();
            if exit_code != Some(0) && outcome.output.contains(CRASH_MARKER) {
                outcome.crashed = true;
                outcome.crash_input = first_crash_prefix(&settings.artifacts_dir);
            }
        }
        ToolRun::TimedOut(limit) => {
            outcome.timed_out = true;
            outcome.output = format!("Harness exceeded {}s wall-clock limit", limit.as_secs());
        }
        ToolRun::NotInstalled => {
            warn!(python = %settings.python, "python interpreter not found");
            outcome.failed_to_start = true;
            outcome.output = format!("{} not found", settings.python);
        }
        ToolRun::SpawnFailed(err) => {
            warn!(%harness, error = %err, "harness failed to start");
            outcome.failed_to_start = true;
            outcome.output = err;
        }
    }

    Ok(outcome)
}

fn first_crash_prefix(artifacts_dir: &Path) -> Option<String> {
    let mut crashes: Vec<PathBuf> = std::fs::read_dir(artifacts_dir)
        .ok()?
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .filter(|path| {
            path.file_name()
                .and_then(|name| name.to_str())
                .is_some_and(|name| name.starts_with("crash-"))
        })
        .collect();
    crashes.sort();

    let bytes = std::fs::read(crashes.first()?).ok()?;
    let hex: String = bytes
        .iter()
        .take(CRASH_PREFIX_HEX_CHARS / 2)
        .map(|b| format!("{b:02x}"))
        .collect();
    Some(hex)
}

pub async fn run_all<R: ToolRunner + ?Sized>(
    runner: &R,
    harnesses: &[String],
    settings: &FuzzSettings,
) -> std::io::Result<Vec<HarnessOutcome>> {
    let mut outcomes = Vec::with_capacity(harnesses.len());
    for harness in harnesses {
        info!(%harness, timeout_secs = settings.timeout.as_secs(), "fuzzing");
        outcomes.push(run_harness(runner, harness, settings).await?);
    }
    Ok(outcomes)
}

pub fn build_report(outcomes: &[HarnessOutcome], timeout: Duration) -> String {
    let crashes = outcomes.iter().filter(|o| o.crashed).count();
    let timeouts = outcomes.iter().filter(|o| o.timed_out).count();
    let not_run = outcomes.iter().filter(|o| o.failed_to_start).count();

    let mut output = String::new();
    let _ = writeln!(output, "## Fuzz Testing Report");
    let _ = writeln!(output);
    let _ = writeln!(
        output,
        "Ran **{}** harness(es) × {}s each.",
        outcomes.len(),
        timeout.as_secs()
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "| Harness | Result | Notes |");
    let _ = writeln!(output, "|---------|--------|-------|");

    for outcome in outcomes {
        let (status, note) = if outcome.crashed {
            let note = match &outcome.crash_input {
                Some(prefix) => format!("Input prefix: `{prefix}`"),
                None => "Artifact saved to fuzz-artifacts/".to_string(),
            };
            ("CRASH", note)
        } else if outcome.failed_to_start {
            ("Error", format!("Failed to start: {}", outcome.output.replace('\n', " ")))
        } else if outcome.timed_out {
            ("Timeout", "Wall-clock exceeded".to_string())
        } else {
            ("Clean", "No crash within time budget".to_string())
        };
        let _ = writeln!(output, "| `{}` | {status} | {note} |", outcome.harness);
    }
    let _ = writeln!(output);

    if crashes > 0 {
        let _ = write!(
            output,
            "> **{crashes} crash(es) found.** Reproduce locally: `python <harness> fuzz-corpus/ fuzz-artifacts/<crash-file>`"
        );
    } else if not_run > 0 {
        let _ = write!(
            output,
            "> **{not_run} harness(es) failed to start.** Check the `--python` interpreter; nothing was fuzzed for them."
        );
    } else if timeouts > 0 {
        let _ = write!(
            output,
            "> {timeouts} harness(es) timed out — increase `--timeout` for deeper coverage."
        );
    } else {
        let _ = write!(output, "> No crashes found within the time budget.");
    }

    output
}

pub fn any_crash(outcomes: &[HarnessOutcome]) -> bool {
    outcomes.iter().any(|o| o.crashed)
}

/// Result of running every harness named in a targets list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FuzzRun {
    MissingTargets(PathBuf),
    NoTargets,
    Ran(Vec<HarnessOutcome>),
}

impl FuzzRun {
    /// Content of the crash flag file; absent when the targets list is missing.
    pub fn crash_flag(&self) -> Option<&'static str> {
        match self {
            FuzzRun::MissingTargets(_) => None,
            FuzzRun::NoTargets => Some("0"),
            FuzzRun::Ran(outcomes) if any_crash(outcomes) => Some("1"),
            FuzzRun::Ran(_) => Some("0"),
        }
    }

    pub fn exit_code(&self, fail_on_crash: bool) -> u8 {
        match self {
            FuzzRun::MissingTargets(_) => 1,
            FuzzRun::NoTargets => 0,
            FuzzRun::Ran(outcomes) => u8::from(fail_on_crash && any_crash(outcomes)),
        }
    }
}

pub async fn run_from_list<R: ToolRunner + ?Sized>(
    runner: &R,
    targets: &Path,
    settings: &FuzzSettings,
) -> std::io::Result<FuzzRun> {
    let Ok(listing) = std::fs::read_to_string(targets) else {
        return Ok(FuzzRun::MissingTargets(targets.to_path_buf()));
    };
    let harnesses = parse_harness_list(&listing);
    if harnesses.is_empty() {
        return Ok(FuzzRun::NoTargets);
    }
    Ok(FuzzRun::Ran(run_all(runner, &harnesses, settings).await?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::testing::ScriptedRunner;
    use tempfile::TempDir;

    fn settings(dir: &TempDir) -> FuzzSettings {
        FuzzSettings {
            python: "python3".to_string(),
            timeout: Duration::from_secs(30),
            corpus_dir: dir.path().join("corpus"),
            artifacts_dir: dir.path().join("artifacts"),
        }
    }

    #[test]
    fn harness_list_skips_comments_and_blanks() {
        let list = "# generated\nfuzz/fuzz_a.py\n\n  fuzz/fuzz_b.py  \n";
        assert_eq!(parse_harness_list(list), vec!["fuzz/fuzz_a.py", "fuzz/fuzz_b.py"]);
    }

    #[tokio::test]
    async fn clean_run_builds_libfuzzer_invocation() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        let runner = ScriptedRunner::new(vec![ScriptedRunner::completed("Done 1000 runs")]);

        let outcome = run_harness(&runner, "fuzz/fuzz_parser.py", &settings)
            .await
            .unwrap();
        assert!(!outcome.crashed);
        assert!(!outcome.timed_out);
        assert!(dir.path().join("corpus/fuzz_parser").is_dir());

        let seen = runner.seen.lock().unwrap();
        assert_eq!(seen[0].program, "python3");
        assert_eq!(seen[0].timeout, Duration::from_secs(45));
        assert_eq!(seen[0].args[0], "fuzz/fuzz_parser.py");
        assert_eq!(seen[0].args[2], "-max_total_time=30");
        assert!(seen[0].args[4].starts_with("-artifact_prefix="));
        assert!(seen[0].args[4].ends_with("artifacts/"));
    }

    #[tokio::test]
    async fn crash_reads_first_artifact_prefix() {
        let dir = TempDir::new().unwrap();
        let settings = settings(&dir);
        std::fs::create_dir_all(&settings.artifacts_dir).unwrap();
        std::fs::write(settings.artifacts_dir.join("crash-bbbb"), [0xffu8; 4]).unwrap();
        std::fs::write(settings.artifacts_dir.join("crash-aaaa"), vec![0xabu8; 80]).unwrap();

        let runner = ScriptedRunner::new(vec![ToolRun::Completed {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: "==1== ERROR: LibFuzzer: crash detected".to_string(),
        }]);
        let outcome = run_harness(&runner, "fuzz/fuzz_x.py", &settings).await.unwrap();

        assert!(outcome.crashed);
        let prefix = outcome.crash_input.unwrap();
        assert_eq!(prefix.len(), 100);
        assert!(prefix.chars().all(|c| c == 'a' || c == 'b'));
    }

    #[tokio::test]
    async fn marker_without_failure_exit_is_not_a_crash() {
        let dir = TempDir::new().unwrap();
        let runner = ScriptedRunner::new(vec![ScriptedRunner::completed("LibFuzzer: crash")]);
        let outcome = run_harness(&runner, "fuzz/fuzz_x.py", &settings(&dir)).await.unwrap();
        assert!(!outcome.crashed);
    }

    #[tokio::test]
    async fn output_is_trimmed_to_tail() {
        let dir = TempDir::new().unwrap();
        let noisy = format!("{}END", "x".repeat(5000));
        let runner = ScriptedRunner::new(vec![ScriptedRunner::completed(&noisy)]);
        let outcome = run_harness(&runner, "fuzz/fuzz_x.py", &settings(&dir)).await.unwrap();
        assert_eq!(outcome.output.chars().count(), 2000);
        assert!(outcome.output.ends_with("END"));
    }

    #[tokio::test]
    async fn timeout_is_reported_with_wall_clock_limit() {
        let dir = TempDir::new().unwrap();
        let runner = ScriptedRunner::new(vec![ToolRun::TimedOut(Duration::from_secs(45))]);
        let outcome = run_harness(&runner, "fuzz/fuzz_x.py", &settings(&dir)).await.unwrap();
        assert!(outcome.timed_out);
        assert_eq!(outcome.output, "Harness exceeded 45s wall-clock limit");
    }

    #[test]
    fn report_summarizes_crashes_first() {
        let mut crashed = HarnessOutcome::new("fuzz/a.py");
        crashed.crashed = true;
        crashed.crash_input = Some("deadbeef".to_string());
        let mut slow = HarnessOutcome::new("fuzz/b.py");
        slow.timed_out = true;
        let clean = HarnessOutcome::new("fuzz/c.py");

        let outcomes = vec![crashed, slow, clean];
        let report = build_report(&outcomes, Duration::from_secs(30));
        assert!(report.contains("Ran **3** harness(es) × 30s each."));
        assert!(report.contains("| `fuzz/a.py` | CRASH | Input prefix: `deadbeef` |"));
        assert!(report.contains("| `fuzz/b.py` | Timeout | Wall-clock exceeded |"));
        assert!(report.contains("| `fuzz/c.py` | Clean |"));
        assert!(report.contains("**1 crash(es) found.**"));
        assert!(any_crash(&outcomes));
    }

    #[test]
    fn report_mentions_timeouts_or_clean_runs() {
        let mut slow = HarnessOutcome::new("fuzz/b.py");
        slow.timed_out = true;
        let report = build_report(&[slow], Duration::from_secs(10));
        assert!(report.ends_with("increase `--timeout` for deeper coverage."));

        let clean = build_report(&[HarnessOutcome::new("fuzz/c.py")], Duration::from_secs(10));
        assert!(clean.ends_with("> No crashes found within the time budget."));
    }

    #[tokio::test]
    async fn unlaunchable_interpreter_is_reported_as_error() {
        let dir = TempDir::new().unwrap();
        let runner = ScriptedRunner::new(vec![
            ToolRun::NotInstalled,
            ToolRun::SpawnFailed("permission denied".to_string()),
        ]);
        let harnesses = vec!["fuzz/a.py".to_string(), "fuzz/b.py".to_string()];
        let outcomes = run_all(&runner, &harnesses, &settings(&dir)).await.unwrap();

        assert!(outcomes.iter().all(|o| o.failed_to_start && !o.crashed));
        let report = build_report(&outcomes, Duration::from_secs(30));
        assert!(!report.contains("| Clean |"));
        assert!(report.contains("| `fuzz/a.py` | Error | Failed to start: python3 not found |"));
        assert!(report.contains("| `fuzz/b.py` | Error | Failed to start: permission denied |"));
        assert!(report.contains("**2 harness(es) failed to start.**"));
        assert!(!report.contains("No crashes found"));
    }

    #[tokio::test]
    async fn missing_targets_list_fails_without_flag() {
        let dir = TempDir::new().unwrap();
        let runner = ScriptedRunner::default();
        let run = run_from_list(&runner, &dir.path().join("active.txt"), &settings(&dir))
            .await
            .unwrap();
        assert!(matches!(run, FuzzRun::MissingTargets(_)));
        assert_eq!(run.exit_code(false), 1);
        assert_eq!(run.crash_flag(), None);
        assert!(runner.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn empty_targets_list_writes_clean_flag() {
        let dir = TempDir::new().unwrap();
        let list = dir.path().join("active.txt");
        std::fs::write(&list, "# nothing changed\n\n").unwrap();

        let run = run_from_list(&ScriptedRunner::default(), &list, &settings(&dir))
            .await
            .unwrap();
        assert_eq!(run, FuzzRun::NoTargets);
        assert_eq!(run.crash_flag(), Some("0"));
        assert_eq!(run.exit_code(true), 0);
    }

    #[tokio::test]
    async fn crash_sets_flag_and_fails_only_when_requested() {
        let dir = TempDir::new().unwrap();
        let list = dir.path().join("active.txt");
        std::fs::write(&list, "fuzz/fuzz_x.py\n").unwrap();
        let runner = ScriptedRunner::new(vec![ToolRun::Completed {
            exit_code: Some(77),
            stdout: String::new(),
            stderr: "ERROR: LibFuzzer: crash".to_string(),
        }]);

        let run = run_from_list(&runner, &list, &settings(&dir)).await.unwrap();
        assert_eq!(run.crash_flag(), Some("1"));
        assert_eq!(run.exit_code(false), 0);
        assert_eq!(run.exit_code(true), 1);
    }
}
