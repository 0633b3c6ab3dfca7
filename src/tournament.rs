use crate::agent::{build_agent, Agent, AgentSpec};
use crate::driver::{run_match, MatchConfig};
use crate::error::SchedulerError;
use crate::event::GameLog;
use crate::registry::{build_engine, GameKind};
use crate::types::GameResult;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;

/// One scheduled match: which game, which agents in which seats, and any
/// fixed role table or config overrides.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct MatchSpec {
    pub match_id: String,
    #[serde(default)]
    pub game: Option<GameKind>,
    /// Agent references, one per seat (model names for provider agents).
    pub players: Vec<String>,
    #[serde(default)]
    pub role_assignment: Option<Value>,
    #[serde(default)]
    pub config: Option<Value>,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct TournamentConfig {
    /// Default game for matches that do not name one.
    #[serde(default)]
    pub game: Option<GameKind>,
    pub matches: Vec<MatchSpec>,
    #[serde(default = "default_concurrency")]
    pub max_concurrent_games: usize,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub agent: AgentSpec,
    #[serde(default = "default_max_steps")]
    pub max_steps: usize,
    #[serde(default = "default_agent_timeout")]
    pub agent_timeout_secs: u64,
}

fn default_concurrency() -> usize {
    3
}

fn default_max_steps() -> usize {
    2000
}

fn default_agent_timeout() -> u64 {
    120
}

impl TournamentConfig {
    pub fn from_file(path: &Path) -> Result<Self, SchedulerError> {
        let text = std::fs::read_to_string(path)?;
        let config: TournamentConfig = serde_json::from_str(&text)?;
        if config.matches.is_empty() {
            return Err(SchedulerError::Config("schedule lists no matches".into()));
        }
        for spec in &config.matches {
            if spec.game.or(config.game).is_none() {
                return Err(SchedulerError::Config(format!(
                    "match '{}' names no game and the schedule has no default",
                    spec.match_id
                )));
            }
        }
        Ok(config)
    }
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct MatchRecord {
    pub match_id: String,
    pub game: GameKind,
    pub success: bool,
    #[serde(default)]
    pub result: Option<GameResult>,
    #[serde(default)]
    pub error: Option<String>,
}

/// The aggregate written at the end of a tournament.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct TournamentReport {
    pub config_snapshot: Value,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_matches: usize,
    pub successful_matches: usize,
    pub failed_matches: usize,
    pub matches: Vec<MatchRecord>,
}

impl TournamentReport {
    pub fn success_ratio(&self) -> f64 {
        if self.total_matches == 0 {
            return 0.0;
        }
        self.successful_matches as f64 / self.total_matches as f64
    }
}

/// Single-writer, human-readable progress log with periodic status snapshots
/// of running and waiting matches.
pub struct ProgressTracker {
    file: Mutex<File>,
    total: usize,
    running: DashMap<String, DateTime<Utc>>,
    waiting: DashMap<String, ()>,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

impl ProgressTracker {
    pub fn new(
        output_dir: &Path,
        total: usize,
        max_concurrent: usize,
        match_ids: &[String],
    ) -> Result<Self, SchedulerError> {
        std::fs::create_dir_all(output_dir)?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(output_dir.join("tournament_progress.log"))?;
        writeln!(file, "Tournament Progress Log")?;
        writeln!(file, "{}", "=".repeat(72))?;
        writeln!(file, "Total matches: {total}")?;
        writeln!(file, "Max concurrent: {max_concurrent}")?;
        writeln!(file, "Started: {}", Utc::now().to_rfc3339())?;
        writeln!(file, "{}", "=".repeat(72))?;
        let waiting = DashMap::new();
        for id in match_ids {
            waiting.insert(id.clone(), ());
        }
        Ok(Self {
            file: Mutex::new(file),
            total,
            running: DashMap::new(),
            waiting,
            completed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
        })
    }

    fn write_line(&self, line: &str) {
        log::info!("{line}");
        if let Ok(mut file) = self.file.lock() {
            let _ = writeln!(file, "[{}] {line}", Utc::now().format("%H:%M:%S"));
        }
    }

    pub fn start_match(&self, match_id: &str) {
        self.waiting.remove(match_id);
        self.running.insert(match_id.to_string(), Utc::now());
        self.write_line(&format!("STARTED: {match_id}"));
    }

    pub fn complete_match(&self, match_id: &str, winner: Option<&str>) {
        let elapsed = self.elapsed(match_id);
        self.completed.fetch_add(1, Ordering::SeqCst);
        self.write_line(&format!(
            "COMPLETED: {match_id} - winner: {} ({elapsed:.1}s)",
            winner.unwrap_or("draw")
        ));
    }

    pub fn fail_match(&self, match_id: &str, error: &str) {
        let elapsed = self.elapsed(match_id);
        self.failed.fetch_add(1, Ordering::SeqCst);
        self.write_line(&format!("FAILED: {match_id} - {error} ({elapsed:.1}s)"));
    }

    fn elapsed(&self, match_id: &str) -> f64 {
        self.running
            .remove(match_id)
            .map(|(_, started)| (Utc::now() - started).num_milliseconds() as f64 / 1000.0)
            .unwrap_or(0.0)
    }

    /// One status line naming the matches in flight and those still queued.
    pub fn snapshot(&self) {
        let completed = self.completed.load(Ordering::SeqCst);
        let failed = self.failed.load(Ordering::SeqCst);
        let running: Vec<String> = self.running.iter().map(|e| e.key().clone()).collect();
        let waiting: Vec<String> = self.waiting.iter().map(|e| e.key().clone()).collect();
        self.write_line(&format!(
            "STATUS: {completed} completed, {failed} failed, {} running {running:?}, {} waiting {waiting:?} of {}",
            running.len(),
            waiting.len(),
            self.total,
        ));
    }
}

/// Runs every scheduled match under the concurrency cap and writes the
/// per-match logs, the progress log, and the aggregate report.
pub async fn run_tournament(
    config: TournamentConfig,
    output_dir: &Path,
) -> Result<TournamentReport, SchedulerError> {
    let start_time = Utc::now();
    std::fs::create_dir_all(output_dir)?;
    let config_snapshot = serde_json::to_value(&config)?;

    let match_ids: Vec<String> = config.matches.iter().map(|m| m.match_id.clone()).collect();
    let tracker = Arc::new(ProgressTracker::new(
        output_dir,
        config.matches.len(),
        config.max_concurrent_games,
        &match_ids,
    )?);
    let semaphore = Arc::new(Semaphore::new(config.max_concurrent_games.max(1)));

    let snapshot_task = {
        let tracker = Arc::clone(&tracker);
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(Duration::from_secs(30)).await;
                tracker.snapshot();
            }
        })
    };

    let base_seed = config.seed.unwrap_or(0);
    let match_config = MatchConfig {
        max_steps: config.max_steps,
        agent_timeout: Duration::from_secs(config.agent_timeout_secs),
    };

    let mut handles = Vec::new();
    for (index, spec) in config.matches.iter().cloned().enumerate() {
        let semaphore = Arc::clone(&semaphore);
        let tracker = Arc::clone(&tracker);
        let agent_spec = config.agent.clone();
        let default_game = config.game;
        let match_config = match_config.clone();
        let output_dir: PathBuf = output_dir.to_path_buf();
        let seed = base_seed.wrapping_add(index as u64);

        handles.push(tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await;
            tracker.start_match(&spec.match_id);
            // Engines, agents and loggers are all per-match; a failure here
            // only fails this match.
            let record = run_scheduled_match(
                &spec,
                default_game,
                &agent_spec,
                seed,
                &match_config,
                &output_dir,
            )
            .await;
            match &record {
                Ok(result) => tracker.complete_match(&spec.match_id, result.winner.as_deref()),
                Err(err) => tracker.fail_match(&spec.match_id, &err.to_string()),
            }
            let game = spec.game.or(default_game).unwrap_or(GameKind::SecretHitler);
            match record {
                Ok(result) => MatchRecord {
                    match_id: spec.match_id.clone(),
                    game,
                    success: true,
                    result: Some(result),
                    error: None,
                },
                Err(err) => MatchRecord {
                    match_id: spec.match_id.clone(),
                    game,
                    success: false,
                    result: None,
                    error: Some(err.to_string()),
                },
            }
        }));
    }

    let mut matches = Vec::new();
    for handle in handles {
        match handle.await {
            Ok(record) => matches.push(record),
            Err(err) => {
                return Err(SchedulerError::Config(format!("match task panicked: {err}")))
            }
        }
    }
    snapshot_task.abort();
    tracker.snapshot();

    let successful_matches = matches.iter().filter(|m| m.success).count();
    let report = TournamentReport {
        config_snapshot,
        start_time,
        end_time: Utc::now(),
        total_matches: matches.len(),
        successful_matches,
        failed_matches: matches.len() - successful_matches,
        matches,
    };
    let report_path = output_dir.join("tournament_report.json");
    std::fs::write(&report_path, serde_json::to_string_pretty(&report)?)?;
    log::info!(
        "tournament finished: {}/{} matches succeeded ({:.0}%), report at {}",
        report.successful_matches,
        report.total_matches,
        report.success_ratio() * 100.0,
        report_path.display()
    );
    Ok(report)
}

async fn run_scheduled_match(
    spec: &MatchSpec,
    default_game: Option<GameKind>,
    agent_spec: &AgentSpec,
    seed: u64,
    match_config: &MatchConfig,
    output_dir: &Path,
) -> Result<GameResult, SchedulerError> {
    let game = spec
        .game
        .or(default_game)
        .ok_or_else(|| SchedulerError::Config(format!("match '{}' has no game", spec.match_id)))?;
    let log = GameLog::with_sink(spec.match_id.clone(), output_dir)?;
    let mut engine = build_engine(
        game,
        spec.players.len(),
        seed,
        spec.role_assignment.as_ref(),
        spec.config.as_ref(),
        log,
    )?;
    let mut agents: Vec<Box<dyn Agent>> = Vec::new();
    for (player, reference) in spec.players.iter().enumerate() {
        let spec_for_seat = AgentSpec {
            model: Some(reference.clone()),
            ..agent_spec.clone()
        };
        agents.push(build_agent(&spec_for_seat, player, reference, seed)?);
    }
    let mut result = run_match(
        &spec.match_id,
        engine.as_mut(),
        &mut agents,
        match_config,
        None,
    )
    .await;
    result
        .metadata
        .insert("game".to_string(), Value::String(game.name().to_string()));
    result.metadata.insert("seed".to_string(), Value::from(seed));
    Ok(result)
}

#[cfg(test)]
mod test {
    use super::*;

    fn schedule(n_matches: usize) -> TournamentConfig {
        TournamentConfig {
            game: Some(GameKind::SecretHitler),
            matches: (0..n_matches)
                .map(|i| MatchSpec {
                    match_id: format!("sh_{i}"),
                    game: None,
                    players: (0..5).map(|p| format!("random_{p}")).collect(),
                    role_assignment: None,
                    config: None,
                })
                .collect(),
            max_concurrent_games: 2,
            seed: Some(42),
            agent: AgentSpec::default(),
            max_steps: 2000,
            agent_timeout_secs: 10,
        }
    }

    #[tokio::test]
    async fn tournament_runs_matches_and_writes_the_report() {
        let dir = tempfile::tempdir().unwrap();
        let report = run_tournament(schedule(3), dir.path()).await.unwrap();
        assert_eq!(report.total_matches, 3);
        assert_eq!(report.successful_matches, 3);
        assert!(report.success_ratio() > 0.99);
        assert!(dir.path().join("tournament_report.json").exists());
        assert!(dir.path().join("tournament_progress.log").exists());
        // One JSONL event log per match.
        for i in 0..3 {
            assert!(dir.path().join(format!("sh_{i}.jsonl")).exists());
        }
    }

    #[tokio::test]
    async fn failed_match_does_not_abort_the_tournament() {
        let mut config = schedule(2);
        // Second match has an illegal player count for Secret Hitler.
        config.matches[1].players = vec!["a".into(), "b".into()];
        let dir = tempfile::tempdir().unwrap();
        let report = run_tournament(config, dir.path()).await.unwrap();
        assert_eq!(report.total_matches, 2);
        assert_eq!(report.successful_matches, 1);
        assert_eq!(report.failed_matches, 1);
        assert!(!report.matches[1].success);
        assert!(report.matches[1].error.is_some());
    }

    #[test]
    fn config_requires_a_game_somewhere() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(
            &path,
            serde_json::json!({
                "matches": [{ "match_id": "m0", "players": ["a", "b", "c", "d", "e"] }]
            })
            .to_string(),
        )
        .unwrap();
        assert!(matches!(
            TournamentConfig::from_file(&path),
            Err(SchedulerError::Config(_))
        ));
    }
}
