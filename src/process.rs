use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

/// Outcome of one external tool invocation.
#[derive(Debug, Clone)]
pub enum ToolRun {
    Completed {
        exit_code: Option<i32>,
        stdout: String,
        stderr: String,
    },
    NotInstalled,
    TimedOut(Duration),
    SpawnFailed(String),
}

#[derive(Debug, Clone)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub timeout: Duration,
    pub current_dir: Option<PathBuf>,
}

impl Invocation {
    pub fn new<I, S>(program: impl Into<String>, args: I, timeout: Duration) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
            timeout,
            current_dir: None,
        }
    }
}

/// Narrow seam in front of every external analyzer and harness.
#[async_trait]
pub trait ToolRunner: Send + Sync {
    async fn run(&self, invocation: &Invocation) -> ToolRun;
}

/// Spawns real child processes; the child is killed if its timeout elapses.
#[derive(Debug, Default, Clone, Copy)]
pub struct SubprocessRunner;

#[async_trait]
impl ToolRunner for SubprocessRunner {
    async fn run(&self, invocation: &Invocation) -> ToolRun {
        let mut cmd = tokio::process::Command::new(&invocation.program);
        cmd.args(&invocation.args).kill_on_drop(true);
        if let Some(dir) = &invocation.current_dir {
            cmd.current_dir(dir);
        }

        debug!(
            program = %invocation.program,
            args = ?invocation.args,
            timeout_secs = invocation.timeout.as_secs(),
            "spawning tool"
        );

        match tokio::time::timeout(invocation.timeout, cmd.output()).await {
            Err(_) => ToolRun::TimedOut(invocation.timeout),
            Ok(Err(err)) if err.kind() == std::io::ErrorKind::NotFound => ToolRun::NotInstalled,
            Ok(Err(err)) => ToolRun::SpawnFailed(err.to_string()),
            Ok(Ok(output)) => ToolRun::Completed {
                exit_code: output.status.code(),
                stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            },
        }
    }
}

/// First `max` characters of `text`, on a character boundary.
pub fn head_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Last `max` characters of `text`, on a character boundary.
pub fn tail_chars(text: &str, max: usize) -> &str {
    let count = text.chars().count();
    if count <= max {
        return text;
    }
    match text.char_indices().nth(count - max) {
        Some((idx, _)) => &text[idx..],
        None => text,
    }
}
