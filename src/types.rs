use crate::error::GameError;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// A player's position at the table; stable within a match, dense in `[0, N)`.
pub type PlayerId = usize;

/// The closed set of action kinds across all six games.
///
/// Which kinds are legal, and the schema of [Action::data], depend on the
/// engine and its current phase; engines parse the payload into typed values
/// and reject anything malformed without changing state.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Speak,
    Vote,
    Nominate,
    Accuse,
    Ask,
    Answer,
    ProposeTeam,
    Bid,
    Protect,
    Investigate,
    Eliminate,
    Discard,
    Enact,
    Veto,
    GuessLocation,
    Move,
    Vent,
    Kill,
    Report,
    Emergency,
    CompleteTask,
    Market,
    LoadBag,
    Declare,
    Offer,
    BribeResponse,
    Inspect,
    Skip,
}

/// A player action: common envelope plus a free-form payload whose schema
/// depends on the action kind and the engine's current phase.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Action {
    pub player: PlayerId,
    pub kind: ActionKind,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Action {
    pub fn new(player: PlayerId, kind: ActionKind) -> Self {
        Self {
            player,
            kind,
            data: Map::new(),
            metadata: Map::new(),
        }
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// Builds an action from one of the machine-readable `options` objects an
    /// engine advertises in an actor's observation.
    pub fn from_option(player: PlayerId, option: &Value) -> Result<Self, GameError> {
        let obj = option
            .as_object()
            .ok_or_else(|| GameError::MalformedAction("option is not an object".into()))?;
        let kind_str = obj
            .get("kind")
            .and_then(Value::as_str)
            .ok_or_else(|| GameError::MalformedAction("option has no kind".into()))?;
        let kind: ActionKind = serde_json::from_value(Value::String(kind_str.to_string()))
            .map_err(|_| GameError::MalformedAction(format!("unknown action kind {kind_str}")))?;
        let mut data = obj.clone();
        data.remove("kind");
        Ok(Self {
            player,
            kind,
            data,
            metadata: Map::new(),
        })
    }

    /// The `target` payload field as a player index.
    pub fn target(&self) -> Result<PlayerId, GameError> {
        self.id_field("target")
    }

    pub fn id_field(&self, key: &str) -> Result<PlayerId, GameError> {
        self.data
            .get(key)
            .and_then(Value::as_u64)
            .map(|v| v as PlayerId)
            .ok_or_else(|| GameError::MalformedAction(format!("missing or invalid '{key}'")))
    }

    pub fn id_list(&self, key: &str) -> Result<Vec<PlayerId>, GameError> {
        let arr = self
            .data
            .get(key)
            .and_then(Value::as_array)
            .ok_or_else(|| GameError::MalformedAction(format!("missing or invalid '{key}'")))?;
        arr.iter()
            .map(|v| {
                v.as_u64()
                    .map(|v| v as PlayerId)
                    .ok_or_else(|| GameError::MalformedAction(format!("non-integer entry in '{key}'")))
            })
            .collect()
    }

    pub fn str_field(&self, key: &str) -> Result<&str, GameError> {
        self.data
            .get(key)
            .and_then(Value::as_str)
            .ok_or_else(|| GameError::MalformedAction(format!("missing or invalid '{key}'")))
    }

    pub fn int_field(&self, key: &str) -> Result<i64, GameError> {
        self.data
            .get(key)
            .and_then(Value::as_i64)
            .ok_or_else(|| GameError::MalformedAction(format!("missing or invalid '{key}'")))
    }

    pub fn bool_field(&self, key: &str) -> Result<bool, GameError> {
        self.data
            .get(key)
            .and_then(Value::as_bool)
            .ok_or_else(|| GameError::MalformedAction(format!("missing or invalid '{key}'")))
    }
}

/// How widely the information in an observation is shared.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObsKind {
    Public,
    Private,
    Team,
    RoleSpecific,
}

/// Whether the observed player must submit an action this step.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ObsMode {
    Act,
    Observe,
}

/// What a single player sees of the game state at one step.
///
/// `instruction` is a human-readable directive; `data` carries the
/// machine-readable payload, including (for actors) an `options` array of
/// candidate actions that baseline agents can pick from directly.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Observation {
    pub player: PlayerId,
    pub obs_kind: ObsKind,
    pub phase: String,
    pub mode: ObsMode,
    pub instruction: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

impl Observation {
    pub fn act(player: PlayerId, phase: impl Into<String>, instruction: impl Into<String>) -> Self {
        Self {
            player,
            obs_kind: ObsKind::Private,
            phase: phase.into(),
            mode: ObsMode::Act,
            instruction: instruction.into(),
            data: Map::new(),
        }
    }

    pub fn observe(
        player: PlayerId,
        phase: impl Into<String>,
        instruction: impl Into<String>,
    ) -> Self {
        Self {
            player,
            obs_kind: ObsKind::Public,
            phase: phase.into(),
            mode: ObsMode::Observe,
            instruction: instruction.into(),
            data: Map::new(),
        }
    }

    pub fn kind(mut self, kind: ObsKind) -> Self {
        self.obs_kind = kind;
        self
    }

    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.data.insert(key.to_string(), value.into());
        self
    }

    /// Attaches the machine-readable candidate actions for an actor.
    pub fn options(mut self, options: Vec<Value>) -> Self {
        self.data.insert("options".to_string(), Value::Array(options));
        self
    }

    pub fn to_act(&self) -> bool {
        self.mode == ObsMode::Act
    }
}

/// How a match concluded, per the driver contract: a finished game, the
/// safety-bound timeout, or cooperative cancellation.
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Completed,
    Timeout,
    Cancelled,
}

/// Frozen result of a single match.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct GameResult {
    pub match_id: String,
    pub outcome: Outcome,
    /// Winning team or player label; `None` on a draw, timeout without a
    /// forced winner, or cancellation.
    pub winner: Option<String>,
    pub win_reason: String,
    pub rounds: usize,
    pub duration_seconds: f64,
    #[serde(default)]
    pub player_stats: BTreeMap<PlayerId, Value>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// Convenience for building an `options` entry.
pub fn option(kind: &str) -> Map<String, Value> {
    let mut m = Map::new();
    m.insert("kind".to_string(), Value::String(kind.to_string()));
    m
}

/// Convenience for building an `options` entry with a single field.
pub fn option_with(kind: &str, key: &str, value: impl Into<Value>) -> Value {
    let mut m = option(kind);
    m.insert(key.to_string(), value.into());
    Value::Object(m)
}
