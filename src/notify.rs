use std::time::Duration;

use clap::ValueEnum;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{info, warn};

const USER_AGENT: &str = "ai-code-gate/1.0";
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

const PASS_COLOR: &str = "#2eb886";
const FAIL_COLOR: &str = "#e01e5a";

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum WebhookKind {
    Slack,
    Generic,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("webhook request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("webhook rejected with HTTP {0}")]
    Rejected(reqwest::StatusCode),
}

/// One gate result as seen by a notification target.
#[derive(Debug, Clone)]
pub struct GateResult {
    pub repo: String,
    pub score: f64,
    pub threshold: f64,
    pub pr: Option<u64>,
    pub pr_url: Option<String>,
}

impl GateResult {
    pub fn passed(&self) -> bool {
        self.score >= self.threshold
    }

    fn run_label(&self) -> String {
        match (self.pr, self.pr_url.as_deref()) {
            (Some(pr), Some(url)) if !url.is_empty() => format!("<{url}|PR #{pr}>"),
            (Some(pr), _) => format!("PR #{pr}"),
            (None, _) => "push".to_string(),
        }
    }
}

/// `--only-on-failure` suppresses notifications for passing runs.
pub fn should_send(result: &GateResult, only_on_failure: bool) -> bool {
    !(only_on_failure && result.passed())
}

pub fn build_slack_payload(result: &GateResult) -> Value {
    let passed = result.passed();
    let (emoji, status, color) = if passed {
        (":white_check_mark:", "PASSED", PASS_COLOR)
    } else {
        (":x:", "BLOCKED", FAIL_COLOR)
    };

    let text = format!(
        "{emoji} *AI Code Gate — {status}*\n*Repo:* `{}` | *Run:* {}\n*Score:* `{:.1} / 100` (threshold: {:.0})",
        result.repo,
        result.run_label(),
        result.score,
        result.threshold,
    );

    json!({
        "attachments": [{
            "color": color,
            "blocks": [{
                "type": "section",
                "text": {"type": "mrkdwn", "text": text},
            }],
        }],
    })
}

pub fn build_generic_payload(result: &GateResult) -> Value {
    json!({
        "event": "ai_gate_result",
        "repo": result.repo,
        "pr": result.pr,
        "pr_url": result.pr_url,
        "score": result.score,
        "threshold": result.threshold,
        "passed": result.passed(),
    })
}

pub fn build_payload(kind: WebhookKind, result: &GateResult) -> Value {
    match kind {
        WebhookKind::Slack => build_slack_payload(result),
        WebhookKind::Generic => build_generic_payload(result),
    }
}

async fn post(url: &str, payload: &Value) -> Result<reqwest::StatusCode, NotifyError> {
    let client = reqwest::Client::builder()
        .timeout(WEBHOOK_TIMEOUT)
        .user_agent(USER_AGENT)
        .build()?;
    let status = client.post(url).json(payload).send().await?.status();
    if status.as_u16() >= 400 {
        return Err(NotifyError::Rejected(status));
    }
    Ok(status)
}

/// Delivery is best effort: failures are logged and reported as `false`.
pub async fn send_webhook(url: &str, payload: &Value) -> bool {
    match post(url, payload).await {
        Ok(status) => {
            info!(status = status.as_u16(), "webhook delivered");
            true
        }
        Err(err) => {
            warn!(error = %err, "webhook delivery failed");
            false
        }
    }
}
