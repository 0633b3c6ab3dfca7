//! A benchmark harness for hidden-information, multi-party deduction games.
//!
//! Six rules-faithful engines (Secret Hitler, Avalon, Werewolf, Spyfall,
//! Among Us, Sheriff of Nottingham) share one execution substrate: a generic
//! match driver that queries per-player observations, collects actions from
//! externally-sourced agents in parallel, and steps the engine as a single
//! atomic batch; and a tournament scheduler that runs many matches under a
//! concurrency cap. Hidden state is enforced by observation filtering, and
//! every match produces an append-only event log sufficient to reconstruct
//! and score it.

pub mod agent;
pub mod among_us;
pub mod avalon;
pub mod ballots;
pub mod driver;
pub mod engine;
pub mod error;
pub mod event;
pub mod registry;
pub mod secret_hitler;
pub mod sheriff;
pub mod spyfall;
pub mod tournament;
pub mod types;
pub mod werewolf;

pub use agent::{Agent, AgentSpec};
pub use driver::{cancellation, run_match, CancelHandle, MatchConfig};
pub use engine::{Engine, Observations, StepOutcome};
pub use error::{AgentError, GameError, SchedulerError};
pub use event::{Event, EventKind, GameLog};
pub use registry::{build_engine, game_spec, GameKind};
pub use tournament::{run_tournament, TournamentConfig, TournamentReport};
pub use types::{Action, ActionKind, GameResult, Observation, Outcome, PlayerId};
