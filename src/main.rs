use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod fuzz;
mod js_complexity;
mod notify;
mod precommit;
mod process;
mod report;
mod score;
mod signals;
mod store;
mod thresholds;

use crate::fuzz::runner::{FuzzRun, FuzzSettings};
use crate::notify::{GateResult, WebhookKind};
use crate::process::SubprocessRunner;
use crate::score::ScoreBreakdown;
use crate::store::{HistoryStore, NewRun, RunStats, ScoreRun};
use crate::thresholds::{ThresholdOverrides, TripleOverride};

#[derive(Parser)]
#[command(name = "ai-gate")]
#[command(about = "CI quality gate: complexity, coverage and anti-pattern scoring", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score the project and write the gate report
    Score(ScoreArgs),
    /// Record or query score history
    History {
        #[command(subcommand)]
        command: HistoryCommand,
    },
    /// Measure JS/TS complexity with escomplex
    JsComplexity {
        #[arg(long, default_value = ".")]
        src: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Per-function complexity check for staged Python files
    Precommit {
        #[arg(long, default_value_t = 15)]
        max_complexity: u32,
        #[arg(long, default_value_t = 10)]
        warn_complexity: u32,
        files: Vec<String>,
    },
    /// Fuzz harness selection and execution
    Fuzz {
        #[command(subcommand)]
        command: FuzzCommand,
    },
    /// Post the gate result to a webhook
    Notify(NotifyArgs),
}

#[derive(Args)]
struct ScoreArgs {
    #[arg(long, default_value = "coverage.json")]
    coverage: PathBuf,
    #[arg(long, default_value = "semgrep-results.json")]
    semgrep: PathBuf,
    #[arg(long, default_value = ".")]
    src: PathBuf,
    #[arg(long)]
    threshold: Option<u32>,
    /// Markdown report destination
    #[arg(long)]
    output: Option<PathBuf>,
    /// Raw total score destination
    #[arg(long)]
    score_output: Option<PathBuf>,
    /// shields.io endpoint JSON destination
    #[arg(long)]
    badge_output: Option<PathBuf>,
    #[arg(long)]
    fail_on_threshold: bool,
    /// pyproject.toml holding `[tool.ai-gate]`
    #[arg(long)]
    config: Option<PathBuf>,
    /// Summary written by `ai-gate js-complexity`
    #[arg(long)]
    js_complexity: Option<PathBuf>,
    #[arg(long, default_value = "python")]
    languages: String,
    #[arg(long)]
    complexity_excellent: Option<f64>,
    #[arg(long)]
    complexity_acceptable: Option<f64>,
    #[arg(long)]
    complexity_poor: Option<f64>,
    #[arg(long)]
    coverage_excellent: Option<f64>,
    #[arg(long)]
    coverage_acceptable: Option<f64>,
    #[arg(long)]
    coverage_poor: Option<f64>,
    #[arg(long)]
    antipattern_excellent: Option<f64>,
    #[arg(long)]
    antipattern_acceptable: Option<f64>,
    #[arg(long)]
    antipattern_poor: Option<f64>,
    /// Also record this run in the history database
    #[arg(long)]
    history_db: Option<PathBuf>,
    #[arg(long, requires = "history_db")]
    repo: Option<String>,
    #[arg(long, default_value = "")]
    branch: String,
    #[arg(long)]
    pr: Option<i64>,
    #[arg(long, default_value = "")]
    sha: String,
}

impl ScoreArgs {
    fn overrides(&self) -> ThresholdOverrides {
        ThresholdOverrides {
            threshold: self.threshold,
            complexity: TripleOverride {
                excellent: self.complexity_excellent,
                acceptable: self.complexity_acceptable,
                poor: self.complexity_poor,
            },
            coverage: TripleOverride {
                excellent: self.coverage_excellent,
                acceptable: self.coverage_acceptable,
                poor: self.coverage_poor,
            },
            antipatterns: TripleOverride {
                excellent: self.antipattern_excellent,
                acceptable: self.antipattern_acceptable,
                poor: self.antipattern_poor,
            },
        }
    }
}

#[derive(Subcommand)]
enum HistoryCommand {
    /// Append one gate run
    Record {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        score: f64,
        #[arg(long)]
        repo: String,
        #[arg(long, default_value = "")]
        branch: String,
        #[arg(long)]
        pr: Option<i64>,
        #[arg(long, default_value = "")]
        sha: String,
        #[arg(long, default_value_t = 70.0)]
        threshold: f64,
        #[arg(long)]
        complexity_score: Option<f64>,
        #[arg(long)]
        coverage_score: Option<f64>,
        #[arg(long)]
        antipattern_score: Option<f64>,
    },
    /// Read trend, latest run, or aggregate stats
    Query {
        #[arg(long)]
        db: PathBuf,
        #[arg(long)]
        repo: String,
        #[arg(long = "type", value_enum, default_value_t = QueryKind::Latest)]
        kind: QueryKind,
        #[arg(long)]
        branch: Option<String>,
        #[arg(long, default_value_t = 30)]
        limit: i64,
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum QueryKind {
    Trend,
    Latest,
    Stats,
}

#[derive(Clone, Copy, ValueEnum)]
enum OutputFormat {
    Json,
    Text,
}

#[derive(Subcommand)]
enum FuzzCommand {
    /// Select harnesses for the changed files
    Detect {
        /// Newline-separated changed file paths
        #[arg(long)]
        changed: String,
        #[arg(long)]
        targets: PathBuf,
        #[arg(long)]
        output: PathBuf,
    },
    /// Run the listed harnesses
    Run {
        #[arg(long)]
        targets: PathBuf,
        /// Seconds per harness
        #[arg(long, default_value_t = 30)]
        timeout: u64,
        #[arg(long, default_value = "fuzz-corpus")]
        corpus_dir: PathBuf,
        #[arg(long, default_value = "fuzz-artifacts")]
        artifacts_dir: PathBuf,
        #[arg(long, default_value = "python3")]
        python: String,
        #[arg(long)]
        output: Option<PathBuf>,
        /// Crash flag destination (`1` or `0`)
        #[arg(long)]
        score_output: Option<PathBuf>,
        #[arg(long)]
        fail_on_crash: bool,
    },
}

#[derive(Args)]
struct NotifyArgs {
    #[arg(long)]
    webhook: String,
    #[arg(long = "type", value_enum, default_value_t = WebhookKind::Slack)]
    kind: WebhookKind,
    #[arg(long)]
    score: f64,
    #[arg(long, default_value_t = 70.0)]
    threshold: f64,
    #[arg(long, default_value = "unknown/repo")]
    repo: String,
    #[arg(long)]
    pr: Option<u64>,
    #[arg(long)]
    pr_url: Option<String>,
    #[arg(long)]
    only_on_failure: bool,
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Commands::Score(args) => run_score(args).await,
        Commands::History { command } => run_history(command).await,
        Commands::JsComplexity { src, output } => {
            let summary = js_complexity::analyse(&SubprocessRunner, &src).await;
            write_json(&output, &summary)?;
            match &summary.error {
                Some(error) => {
                    warn!(%error, "js/ts complexity unavailable");
                    eprintln!("[js-complexity] Warning: {error}");
                }
                None => println!(
                    "[js-complexity] avg={:.1} worst={:.0} functions={}",
                    summary.avg_complexity, summary.worst_complexity, summary.function_count
                ),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Precommit {
            max_complexity,
            warn_complexity,
            files,
        } => {
            let outcome = precommit::check_files(
                &SubprocessRunner,
                &files,
                max_complexity,
                warn_complexity,
            )
            .await;
            let text = precommit::render(&outcome, max_complexity);
            if !text.is_empty() {
                println!("{text}");
            }
            Ok(ExitCode::from(outcome.exit_code()))
        }
        Commands::Fuzz { command } => run_fuzz(command).await,
        Commands::Notify(args) => {
            run_notify(args).await;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn run_score(args: ScoreArgs) -> anyhow::Result<ExitCode> {
    let thresholds = thresholds::resolve(&args.overrides(), args.config.as_deref())
        .context("invalid gate thresholds")?;

    let signals = score::Signals {
        complexity: signals::complexity::measure_complexity(
            &SubprocessRunner,
            &args.src,
            args.js_complexity.as_deref(),
            thresholds.complexity.poor,
        )
        .await,
        coverage: signals::coverage::measure_coverage(&args.coverage),
        antipatterns: signals::antipatterns::measure_antipatterns(&args.semgrep, &args.src),
    };
    for (name, signal) in [
        ("complexity", &signals.complexity),
        ("coverage", &signals.coverage),
        ("antipatterns", &signals.antipatterns),
    ] {
        if signal.is_degraded() {
            warn!(signal = name, reason = signal.detail(), "signal degraded, scoring as 0");
        }
    }
    let breakdown = score::aggregate(
        &signals,
        &thresholds,
        score::parse_languages(&args.languages),
    );
    let total = breakdown.total();
    let report = report::render(&breakdown, thresholds.threshold);

    if let Some(path) = &args.output {
        std::fs::write(path, &report)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        println!("Score report written to {}", path.display());
    }
    if let Some(path) = &args.score_output {
        std::fs::write(path, format!("{total:.2}"))
            .with_context(|| format!("failed to write score to {}", path.display()))?;
    }
    if let Some(path) = &args.badge_output {
        write_json(path, &report::render_badge(total, thresholds.threshold))?;
        println!("Badge JSON written to {}", path.display());
    }

    if let (Some(db), Some(repo)) = (&args.history_db, &args.repo) {
        let run = NewRun {
            branch: args.branch.clone(),
            pr: args.pr,
            sha: args.sha.clone(),
            threshold: f64::from(thresholds.threshold),
            complexity_score: Some(breakdown.complexity_score),
            coverage_score: Some(breakdown.coverage_score),
            antipattern_score: Some(breakdown.antipattern_score),
            ..NewRun::new(repo.clone(), total)
        };
        let store = HistoryStore::new(db);
        let id = store
            .record(&run)
            .await
            .context("failed to record score history")?;
        info!(run_id = id, db = %store.path().display(), "score recorded");
    } else if args.history_db.is_some() {
        warn!("--history-db given without --repo, run not recorded");
    }

    println!("{report}");

    Ok(ExitCode::from(gate_exit_code(
        &breakdown,
        thresholds.threshold,
        args.fail_on_threshold,
    )))
}

/// `1` only when the caller asked to fail and the score is below threshold.
fn gate_exit_code(breakdown: &ScoreBreakdown, threshold: u32, fail_on_threshold: bool) -> u8 {
    u8::from(fail_on_threshold && !breakdown.passed(threshold))
}

async fn run_history(command: HistoryCommand) -> anyhow::Result<ExitCode> {
    match command {
        HistoryCommand::Record {
            db,
            score,
            repo,
            branch,
            pr,
            sha,
            threshold,
            complexity_score,
            coverage_score,
            antipattern_score,
        } => {
            let run = NewRun {
                branch,
                pr,
                sha,
                threshold,
                complexity_score,
                coverage_score,
                antipattern_score,
                ..NewRun::new(repo, score)
            };
            let id = HistoryStore::new(&db)
                .record(&run)
                .await
                .context("failed to record score")?;
            println!("Score {score:.1} recorded (run #{id})");
        }
        HistoryCommand::Query {
            db,
            repo,
            kind,
            branch,
            limit,
            format,
        } => {
            let store = HistoryStore::new(&db);
            let text = match kind {
                QueryKind::Trend => {
                    let runs = store.query_trend(&repo, limit).await?;
                    render_trend(&runs, format)?
                }
                QueryKind::Latest => {
                    let latest = store.query_latest(&repo, branch.as_deref()).await?;
                    render_latest(latest.as_ref(), format)?
                }
                QueryKind::Stats => {
                    let stats = store.query_stats(&repo).await?;
                    render_stats(stats.as_ref(), format)?
                }
            };
            if !text.is_empty() {
                println!("{text}");
            }
        }
    }
    Ok(ExitCode::SUCCESS)
}

fn render_trend(runs: &[ScoreRun], format: OutputFormat) -> anyhow::Result<String> {
    Ok(match format {
        OutputFormat::Json => serde_json::to_string_pretty(runs)?,
        OutputFormat::Text => runs
            .iter()
            .map(|run| {
                let status = if run.passed { "PASS" } else { "FAIL" };
                format!(
                    "{}  {status}  {:.1}  {}",
                    run.recorded_at.format("%Y-%m-%d"),
                    run.score,
                    run.branch
                )
            })
            .collect::<Vec<_>>()
            .join("\n"),
    })
}

fn render_latest(latest: Option<&ScoreRun>, format: OutputFormat) -> anyhow::Result<String> {
    match (format, latest) {
        (OutputFormat::Json, _) => Ok(serde_json::to_string_pretty(&latest)?),
        (OutputFormat::Text, Some(run)) => fields_text(run),
        (OutputFormat::Text, None) => Ok("No data found.".to_string()),
    }
}

/// An empty repo renders as `{}` in JSON and as nothing in text.
fn render_stats(stats: Option<&RunStats>, format: OutputFormat) -> anyhow::Result<String> {
    match (format, stats) {
        (OutputFormat::Json, Some(stats)) => Ok(serde_json::to_string_pretty(stats)?),
        (OutputFormat::Json, None) => Ok("{}".to_string()),
        (OutputFormat::Text, Some(stats)) => fields_text(stats),
        (OutputFormat::Text, None) => Ok(String::new()),
    }
}

/// `key: value` lines in field declaration order.
fn fields_text<T: Serialize>(record: &T) -> anyhow::Result<String> {
    let serde_json::Value::Object(fields) = serde_json::to_value(record)? else {
        anyhow::bail!("history record did not serialize to an object");
    };
    Ok(fields
        .into_iter()
        .map(|(key, value)| match value {
            serde_json::Value::String(text) => format!("{key}: {text}"),
            other => format!("{key}: {other}"),
        })
        .collect::<Vec<_>>()
        .join("\n"))
}

async fn run_fuzz(command: FuzzCommand) -> anyhow::Result<ExitCode> {
    match command {
        FuzzCommand::Detect {
            changed,
            targets,
            output,
        } => {
            let mappings = fuzz::targets::load_targets(&targets);
            let active = fuzz::targets::detect(
                &fuzz::targets::parse_changed(&changed),
                &mappings,
                Path::new("."),
            );
            let mut listing = active.join("\n");
            if !active.is_empty() {
                listing.push('\n');
            }
            std::fs::write(&output, listing)
                .with_context(|| format!("failed to write {}", output.display()))?;

            let names = if active.is_empty() {
                "none".to_string()
            } else {
                active.join(", ")
            };
            println!("Active fuzz targets ({}): {names}", active.len());
            Ok(ExitCode::SUCCESS)
        }
        FuzzCommand::Run {
            targets,
            timeout,
            corpus_dir,
            artifacts_dir,
            python,
            output,
            score_output,
            fail_on_crash,
        } => {
            let settings = FuzzSettings {
                python,
                timeout: Duration::from_secs(timeout),
                corpus_dir,
                artifacts_dir,
            };
            let run = fuzz::runner::run_from_list(&SubprocessRunner, &targets, &settings)
                .await
                .context("failed to prepare fuzz directories")?;

            match &run {
                FuzzRun::MissingTargets(path) => {
                    println!("Targets file not found: {}", path.display());
                }
                FuzzRun::NoTargets => println!("No fuzz targets to run."),
                FuzzRun::Ran(outcomes) => {
                    let report = fuzz::runner::build_report(outcomes, settings.timeout);
                    if let Some(path) = &output {
                        std::fs::write(path, &report)
                            .with_context(|| format!("failed to write {}", path.display()))?;
                        println!("Fuzz report written to {}", path.display());
                    }
                    println!("{report}");
                }
            }
            if let (Some(path), Some(flag)) = (&score_output, run.crash_flag()) {
                std::fs::write(path, flag)
                    .with_context(|| format!("failed to write {}", path.display()))?;
            }
            Ok(ExitCode::from(run.exit_code(fail_on_crash)))
        }
    }
}

async fn run_notify(args: NotifyArgs) {
    let result = GateResult {
        repo: args.repo,
        score: args.score,
        threshold: args.threshold,
        pr: args.pr,
        pr_url: args.pr_url,
    };

    if !notify::should_send(&result, args.only_on_failure) {
        println!("[notify] Score passed threshold, skipping notification (--only-on-failure set)");
        return;
    }

    let payload = notify::build_payload(args.kind, &result);
    if notify::send_webhook(&args.webhook, &payload).await {
        println!("[notify] Notification delivered to webhook");
    } else {
        eprintln!("[notify] Notification failed, continuing (non-fatal)");
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))?;
    info!(path = %path.display(), "wrote json");
    Ok(())
}
