use thiserror::Error;

/// The result of attempting an invalid operation on a game engine.
///
/// Rule rejections never cross the `step` boundary as failures; engines record
/// them as `Error` events and leave their state unchanged.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GameError {
    #[error("this action cannot be performed during this phase of the game")]
    InvalidAction,
    #[error("invalid player index")]
    InvalidPlayerIndex,
    #[error("this player cannot be chosen for this action")]
    InvalidPlayerChoice,
    #[error("a dead player cannot act")]
    DeadPlayer,
    #[error("this player is not marked to act this step")]
    NotToAct,
    #[error("this player has already acted in this sub-phase")]
    AlreadyActed,
    #[error("malformed action payload: {0}")]
    MalformedAction(String),
    #[error("{0}")]
    RuleViolation(String),
}

impl GameError {
    /// Stable machine-readable code used in `Error` events and for throttling.
    pub fn code(&self) -> &'static str {
        match self {
            GameError::InvalidAction => "INVALID_ACTION",
            GameError::InvalidPlayerIndex => "INVALID_PLAYER_INDEX",
            GameError::InvalidPlayerChoice => "INVALID_PLAYER_CHOICE",
            GameError::DeadPlayer => "DEAD_PLAYER",
            GameError::NotToAct => "NOT_TO_ACT",
            GameError::AlreadyActed => "ALREADY_ACTED",
            GameError::MalformedAction(_) => "MALFORMED_ACTION",
            GameError::RuleViolation(_) => "RULE_VIOLATION",
        }
    }

    pub fn rule(detail: impl Into<String>) -> Self {
        GameError::RuleViolation(detail.into())
    }
}

/// Failure of a single agent invocation. Isolated by the match driver; never
/// propagated to the tournament scheduler.
#[derive(Error, Debug)]
pub enum AgentError {
    #[error("agent call timed out")]
    Timeout,
    #[error("agent produced no action")]
    NoAction,
    #[error("agent failed: {0}")]
    Failed(String),
}

/// Failure outside any specific match. Fatal for the scheduler; matches already
/// in flight are unaffected.
#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("unknown game: {0}")]
    UnknownGame(String),
    #[error("{game} requires {min}-{max} players, got {got}")]
    PlayerCount {
        game: String,
        min: usize,
        max: usize,
        got: usize,
    },
    #[error("agent kind '{kind}' requires the {var} environment variable")]
    MissingCredentials { kind: String, var: String },
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}
