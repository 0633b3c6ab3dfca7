use anyhow::Context;
use clap::{Parser, Subcommand};
use deduction_bench::agent::{build_agent, Agent, AgentSpec};
use deduction_bench::driver::{run_match, MatchConfig};
use deduction_bench::event::GameLog;
use deduction_bench::registry::{build_engine, GameKind};
use deduction_bench::tournament::{run_tournament, TournamentConfig, TournamentReport};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "deduction-bench", about = "Benchmark harness for social deduction games")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Play a single match of one game.
    Play {
        /// Game to play (secret_hitler, avalon, werewolf, spyfall, among_us, sheriff).
        #[arg(long)]
        game: GameKind,
        /// Number of players at the table.
        #[arg(long)]
        players: usize,
        /// Agent kind for every seat (random, or a provider kind).
        #[arg(long, default_value = "random")]
        agent: String,
        /// Provider model identifier, recorded into match metadata.
        #[arg(long)]
        model: Option<String>,
        #[arg(long, default_value_t = 0.7)]
        temperature: f64,
        #[arg(long, default_value_t = 0)]
        seed: u64,
        /// Directory for the per-match JSONL event log.
        #[arg(long)]
        output_dir: Option<PathBuf>,
        #[arg(long, default_value_t = 2000)]
        max_steps: usize,
        /// Per-agent-call timeout in seconds.
        #[arg(long, default_value_t = 120)]
        agent_timeout: u64,
    },
    /// Run a tournament from a schedule file.
    Tournament {
        /// JSON tournament configuration.
        #[arg(long)]
        config: PathBuf,
        #[arg(long, default_value = "tournament_output")]
        output_dir: PathBuf,
        /// Override the schedule's concurrency cap.
        #[arg(long)]
        max_concurrent: Option<usize>,
    },
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    env_logger::try_init().ok();

    let cli = Cli::parse();
    let outcome = match cli.command {
        Command::Play {
            game,
            players,
            agent,
            model,
            temperature,
            seed,
            output_dir,
            max_steps,
            agent_timeout,
        } => {
            let spec = AgentSpec {
                kind: agent,
                model,
                temperature,
            };
            let config = MatchConfig {
                max_steps,
                agent_timeout: Duration::from_secs(agent_timeout),
            };
            play(game, players, spec, seed, output_dir, config)
                .await
                .map(|_| 0)
        }
        Command::Tournament {
            config,
            output_dir,
            max_concurrent,
        } => tournament(config, output_dir, max_concurrent)
            .await
            .map(|report| if report.failed_matches > 0 { 2 } else { 0 }),
    };
    match outcome {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            log::error!("{err:#}");
            std::process::exit(1);
        }
    }
}

async fn play(
    game: GameKind,
    players: usize,
    spec: AgentSpec,
    seed: u64,
    output_dir: Option<PathBuf>,
    config: MatchConfig,
) -> anyhow::Result<()> {
    let match_id = format!("{game}_{seed}");
    let log = match &output_dir {
        Some(dir) => GameLog::with_sink(match_id.clone(), dir)
            .with_context(|| format!("could not open the event log in {}", dir.display()))?,
        None => GameLog::new(match_id.clone()),
    };

    let mut engine = build_engine(game, players, seed, None, None, log)
        .with_context(|| format!("could not build the {game} engine"))?;

    // Missing credentials and unknown agent kinds are fatal before play.
    let mut agents: Vec<Box<dyn Agent>> = Vec::with_capacity(players);
    for player in 0..players {
        let agent = build_agent(&spec, player, &format!("agent_{player}"), seed)
            .with_context(|| format!("could not build agent {player}"))?;
        agents.push(agent);
    }

    let result = run_match(&match_id, engine.as_mut(), &mut agents, &config, None).await;
    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

async fn tournament(
    config_path: PathBuf,
    output_dir: PathBuf,
    max_concurrent: Option<usize>,
) -> anyhow::Result<TournamentReport> {
    let mut config = TournamentConfig::from_file(&config_path)
        .with_context(|| format!("could not load {}", config_path.display()))?;
    if let Some(cap) = max_concurrent {
        config.max_concurrent_games = cap;
    }
    // Fail fast if the configured agent kind needs credentials we don't have.
    if let Some(var) = config.agent.required_credential() {
        if std::env::var(var).is_err() {
            anyhow::bail!(
                "agent kind '{}' requires the {var} environment variable",
                config.agent.kind
            );
        }
    }
    let report = run_tournament(config, &output_dir).await?;
    println!(
        "tournament complete: {}/{} matches succeeded",
        report.successful_matches, report.total_matches
    );
    Ok(report)
}
