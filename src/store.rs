use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteConnection, SqliteRow};
use sqlx::{Connection, Row};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("history database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("history schema migration failed: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("could not prepare history directory: {0}")]
    Io(#[from] std::io::Error),
}

/// A gate run about to be recorded.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRun {
    pub repo: String,
    pub branch: String,
    pub pr: Option<i64>,
    pub sha: String,
    pub score: f64,
    pub threshold: f64,
    pub complexity_score: Option<f64>,
    pub coverage_score: Option<f64>,
    pub antipattern_score: Option<f64>,
}

impl NewRun {
    pub fn new(repo: impl Into<String>, score: f64) -> Self {
        Self {
            repo: repo.into(),
            branch: String::new(),
            pr: None,
            sha: String::new(),
            score,
            threshold: 70.0,
            complexity_score: None,
            coverage_score: None,
            antipattern_score: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScoreRun {
    pub id: i64,
    pub recorded_at: DateTime<Utc>,
    pub repo: String,
    pub branch: String,
    pub pr: Option<i64>,
    pub sha: String,
    pub score: f64,
    pub passed: bool,
    pub threshold: f64,
    pub complexity_score: Option<f64>,
    pub coverage_score: Option<f64>,
    pub antipattern_score: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunStats {
    pub total_runs: i64,
    pub avg_score: f64,
    pub best_score: f64,
    pub worst_score: f64,
    pub passed_runs: i64,
    pub blocked_runs: i64,
    pub pass_rate: f64,
}

/// Append-only SQLite history of gate runs.
///
/// Every operation opens its own connection, applies pending migrations and
/// closes the connection before returning.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn connect(&self) -> Result<SqliteConnection, StoreError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(true);
        let mut conn = SqliteConnection::connect_with(&options).await?;
        sqlx::migrate!("./migrations").run(&mut conn).await?;
        Ok(conn)
    }

    pub async fn record(&self, run: &NewRun) -> Result<i64, StoreError> {
        let mut conn = self.connect().await?;
        let passed = run.score >= run.threshold;

        let result = sqlx::query(
            r#"
            INSERT INTO score_runs
                (recorded_at, repo, branch, pr, sha, score, passed, threshold,
                 complexity_score, coverage_score, antipattern_score)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
        )
        .bind(Utc::now())
        .bind(&run.repo)
        .bind(&run.branch)
        .bind(run.pr)
        .bind(&run.sha)
        .bind(run.score)
        .bind(passed)
        .bind(run.threshold)
        .bind(run.complexity_score)
        .bind(run.coverage_score)
        .bind(run.antipattern_score)
        .execute(&mut conn)
        .await?;

        let id = result.last_insert_rowid();
        conn.close().await?;
        debug!(id, repo = %run.repo, score = run.score, passed, "recorded gate run");
        Ok(id)
    }

    /// Last `limit` runs for `repo`, oldest first.
    pub async fn query_trend(&self, repo: &str, limit: i64) -> Result<Vec<ScoreRun>, StoreError> {
        let mut conn = self.connect().await?;
        let rows = sqlx::query(
            r#"
            SELECT * FROM score_runs
            WHERE repo = ?1
            ORDER BY recorded_at DESC, id DESC
            LIMIT ?2
            "#,
        )
        .bind(repo)
        .bind(limit)
        .fetch_all(&mut conn)
        .await?;
        conn.close().await?;

        let mut runs = rows
            .iter()
            .map(run_from_row)
            .collect::<Result<Vec<_>, _>>()?;
        runs.reverse();
        Ok(runs)
    }

    /// Most recent run, restricted to an exact branch match when one is given.
    pub async fn query_latest(
        &self,
        repo: &str,
        branch: Option<&str>,
    ) -> Result<Option<ScoreRun>, StoreError> {
        let mut conn = self.connect().await?;
        let row = match branch.filter(|b| !b.is_empty()) {
            Some(branch) => {
                sqlx::query(
                    r#"
                    SELECT * FROM score_runs
                    WHERE repo = ?1 AND branch = ?2
                    ORDER BY recorded_at DESC, id DESC
                    LIMIT 1
                    "#,
                )
                .bind(repo)
                .bind(branch)
                .fetch_optional(&mut conn)
                .await?
            }
            None => {
                sqlx::query(
                    r#"
                    SELECT * FROM score_runs
                    WHERE repo = ?1
                    ORDER BY recorded_at DESC, id DESC
                    LIMIT 1
                    "#,
                )
                .bind(repo)
                .fetch_optional(&mut conn)
                .await?
            }
        };
        conn.close().await?;

        Ok(row.as_ref().map(run_from_row).transpose()?)
    }

    /// Aggregate statistics, or `None` when the repo has no runs.
    pub async fn query_stats(&self, repo: &str) -> Result<Option<RunStats>, StoreError> {
        let mut conn = self.connect().await?;
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*)    AS total_runs,
                AVG(score)  AS avg_score,
                MAX(score)  AS best_score,
                MIN(score)  AS worst_score,
                SUM(passed) AS passed_runs
            FROM score_runs
            WHERE repo = ?1
            "#,
        )
        .bind(repo)
        .fetch_one(&mut conn)
        .await?;
        conn.close().await?;

        let total_runs: i64 = row.try_get("total_runs")?;
        if total_runs == 0 {
            return Ok(None);
        }
        let passed_runs = row.try_get::<Option<i64>, _>("passed_runs")?.unwrap_or(0);
        let pass_rate = (passed_runs as f64 / total_runs as f64 * 100.0 * 10.0).round() / 10.0;

        Ok(Some(RunStats {
            total_runs,
            avg_score: row.try_get::<Option<f64>, _>("avg_score")?.unwrap_or(0.0),
            best_score: row.try_get::<Option<f64>, _>("best_score")?.unwrap_or(0.0),
            worst_score: row.try_get::<Option<f64>, _>("worst_score")?.unwrap_or(0.0),
            passed_runs,
            blocked_runs: total_runs - passed_runs,
            pass_rate,
        }))
    }
}

fn run_from_row(row: &SqliteRow) -> Result<ScoreRun, sqlx::Error> {
    Ok(ScoreRun {
        id: row.try_get("id")?,
        recorded_at: row.try_get("recorded_at")?,
        repo: row.try_get("repo")?,
        branch: row.try_get("branch")?,
        pr: row.try_get("pr")?,
        sha: row.try_get("sha")?,
        score: row.try_get("score")?,
        passed: row.try_get("passed")?,
        threshold: row.try_get("threshold")?,
        complexity_score: row.try_get("complexity_score")?,
        coverage_score: row.try_get("coverage_score")?,
        antipattern_score: row.try_get("antipattern_score")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> HistoryStore {
        HistoryStore::new(dir.path().join("nested").join("scores.db"))
    }

    fn run(repo: &str, score: f64) -> NewRun {
        NewRun::new(repo, score)
    }

    #[tokio::test]
    async fn record_returns_increasing_ids() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let first = store.record(&run("org/repo", 60.0)).await.unwrap();
        let second = store.record(&run("org/repo", 80.0)).await.unwrap();
        assert!(first > 0);
        assert!(second > first);
        assert!(store.path().exists());
    }

    #[tokio::test]
    async fn passed_flag_follows_threshold() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        store.record(&run("org/pass", 70.0)).await.unwrap();
        store.record(&run("org/fail", 69.9)).await.unwrap();

        let pass = store.query_latest("org/pass", None).await.unwrap().unwrap();
        let fail = store.query_latest("org/fail", None).await.unwrap().unwrap();
        assert!(pass.passed);
        assert!(!fail.passed);
    }

    #[tokio::test]
    async fn trend_is_oldest_first_and_limited() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        for score in [60.0, 70.0, 80.0] {
            store.record(&run("org/repo", score)).await.unwrap();
        }
        store.record(&run("org/other", 10.0)).await.unwrap();

        let trend = store.query_trend("org/repo", 30).await.unwrap();
        let scores: Vec<f64> = trend.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![60.0, 70.0, 80.0]);

        let recent = store.query_trend("org/repo", 2).await.unwrap();
        let scores: Vec<f64> = recent.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![70.0, 80.0]);
    }

    #[tokio::test]
    async fn empty_repo_has_no_trend_latest_or_stats() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        assert!(store.query_trend("org/none", 30).await.unwrap().is_empty());
        assert!(store.query_latest("org/none", None).await.unwrap().is_none());
        assert!(store.query_stats("org/none").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn latest_filters_by_exact_branch() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let main = NewRun {
            branch: "main".to_string(),
            ..run("org/repo", 75.0)
        };
        let feature = NewRun {
            branch: "feature/ai".to_string(),
            ..run("org/repo", 55.0)
        };
        store.record(&main).await.unwrap();
        store.record(&feature).await.unwrap();

        let latest = store.query_latest("org/repo", None).await.unwrap().unwrap();
        assert_eq!(latest.branch, "feature/ai");

        let on_main = store
            .query_latest("org/repo", Some("main"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(on_main.score, 75.0);

        assert!(store
            .query_latest("org/repo", Some("feature"))
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn recorded_run_round_trips_through_latest() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let new_run = NewRun {
            repo: "org/repo".to_string(),
            branch: "feat/x".to_string(),
            pr: Some(42),
            sha: "abc1234".to_string(),
            score: 82.375,
            threshold: 75.0,
            complexity_score: Some(36.5),
            coverage_score: Some(21.875),
            antipattern_score: Some(24.0),
        };
        let id = store.record(&new_run).await.unwrap();
        let latest = store.query_latest("org/repo", None).await.unwrap().unwrap();

        assert_eq!(latest.id, id);
        assert_eq!(latest.branch, new_run.branch);
        assert_eq!(latest.pr, Some(42));
        assert_eq!(latest.sha, new_run.sha);
        assert_eq!(latest.score, new_run.score);
        assert_eq!(latest.threshold, new_run.threshold);
        assert_eq!(latest.complexity_score, new_run.complexity_score);
        assert_eq!(latest.coverage_score, new_run.coverage_score);
        assert_eq!(latest.antipattern_score, new_run.antipattern_score);
        assert!(latest.passed);
    }

    #[tokio::test]
    async fn stats_aggregate_scores_and_pass_rate() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        for score in [60.0, 70.0, 80.0] {
            store.record(&run("org/repo", score)).await.unwrap();
        }

        let stats = store.query_stats("org/repo").await.unwrap().unwrap();
        assert_eq!(stats.total_runs, 3);
        assert_eq!(stats.passed_runs, 2);
        assert_eq!(stats.blocked_runs, 1);
        assert!((stats.avg_score - 70.0).abs() < 1e-9);
        assert_eq!(stats.best_score, 80.0);
        assert_eq!(stats.worst_score, 60.0);
        assert_eq!(stats.pass_rate, 66.7);
    }

    #[tokio::test]
    async fn reopening_an_existing_database_keeps_history() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("scores.db");
        HistoryStore::new(&path)
            .record(&run("org/repo", 90.0))
            .await
            .unwrap();
        let reopened = HistoryStore::new(&path);
        let trend = reopened.query_trend("org/repo", 10).await.unwrap();
        assert_eq!(trend.len(), 1);
    }
}
