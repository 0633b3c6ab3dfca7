use crate::event::GameLog;
use crate::types::{Action, Observation, PlayerId};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Per-player observations for one step.
pub type Observations = BTreeMap<PlayerId, Observation>;

/// What one `step` produced.
pub struct StepOutcome {
    pub observations: Observations,
    pub rewards: BTreeMap<PlayerId, f64>,
    pub done: bool,
    pub info: Map<String, Value>,
}

impl StepOutcome {
    pub fn new(observations: Observations, done: bool) -> Self {
        Self {
            observations,
            rewards: BTreeMap::new(),
            done,
            info: Map::new(),
        }
    }
}

/// The capability set shared by all six game engines.
///
/// Engines are single-threaded, cooperative state machines: `observations` and
/// `step` are atomic with respect to each other, all non-determinism flows
/// through the per-match RNG, and rule rejections are recorded as events
/// rather than surfaced as errors. Engine states stay distinct value types
/// behind this interface.
pub trait Engine: Send {
    /// Starts (or restarts) the match and returns the initial observations.
    fn reset(&mut self) -> Observations;

    /// Recomputes every player's view of the current state.
    fn observations(&self) -> Observations;

    /// Applies one batch of actions. The batch is treated as simultaneous;
    /// the engine applies it in its own deterministic order regardless of
    /// arrival order.
    fn step(&mut self, actions: BTreeMap<PlayerId, Action>) -> StepOutcome;

    /// True once the terminal phase is reached; further steps do not change
    /// state.
    fn terminal(&self) -> bool;

    /// Winning team or player label, if the game has been decided.
    fn winner(&self) -> Option<String>;

    fn win_reason(&self) -> Option<String>;

    /// Invoked by the driver when the per-match safety bound is exceeded, so
    /// the engine can freeze itself and write a final event.
    fn force_terminate(&mut self);

    /// The engine's substitute action for an actor whose agent failed.
    /// Engines return `Some` for every player currently marked to act, which
    /// bounds every phase under adversarial agent behavior.
    fn fallback_action(&self, player: PlayerId) -> Option<Action>;

    fn log(&self) -> &GameLog;

    fn log_mut(&mut self) -> &mut GameLog;

    fn round(&self) -> usize;

    /// Per-player statistics for the match result (scores, role, survival).
    fn player_stats(&self) -> BTreeMap<PlayerId, Value> {
        BTreeMap::new()
    }
}
