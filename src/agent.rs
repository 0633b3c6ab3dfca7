use crate::error::{AgentError, SchedulerError};
use crate::types::{Action, ActionKind, Observation, PlayerId};
use async_trait::async_trait;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;

/// The single capability the core requires of a decision-maker: given an
/// observation, produce an action. May suspend arbitrarily long and may fail;
/// the match driver isolates both.
#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &str;

    async fn act(&mut self, observation: &Observation) -> Result<Action, AgentError>;

    /// Advisory notification of game events (role assignment, eliminations,
    /// public statements). Ignoring notifications must not alter engine
    /// behavior.
    fn notify(&mut self, _kind: &str, _data: &Value) {}
}

/// How the CLI and tournament schedule describe an agent to construct.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct AgentSpec {
    /// Agent kind: `random`, or a provider-backed kind such as `openrouter`
    /// (recognized only for credential validation; the provider client itself
    /// lives outside this crate).
    #[serde(default = "default_agent_kind")]
    pub kind: String,
    /// Provider model identifier, recorded into match metadata.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f64,
}

fn default_agent_kind() -> String {
    "random".to_string()
}

fn default_temperature() -> f64 {
    0.7
}

impl Default for AgentSpec {
    fn default() -> Self {
        Self {
            kind: default_agent_kind(),
            model: None,
            temperature: default_temperature(),
        }
    }
}

impl AgentSpec {
    /// The environment variable a provider-backed kind requires, if any.
    pub fn required_credential(&self) -> Option<&'static str> {
        match self.kind.as_str() {
            "openrouter" => Some("OPENROUTER_API_KEY"),
            _ => None,
        }
    }
}

/// Builds an agent for one seat. Provider-backed kinds fail fast when their
/// credentials are absent; wiring an actual LLM client in is the caller's
/// concern, behind this same seam.
pub fn build_agent(
    spec: &AgentSpec,
    player: PlayerId,
    name: &str,
    seed: u64,
) -> Result<Box<dyn Agent>, SchedulerError> {
    if let Some(var) = spec.required_credential() {
        if std::env::var(var).is_err() {
            return Err(SchedulerError::MissingCredentials {
                kind: spec.kind.clone(),
                var: var.to_string(),
            });
        }
    }
    match spec.kind.as_str() {
        "random" => Ok(Box::new(RandomAgent::new(name, seed.wrapping_add(player as u64)))),
        other => Err(SchedulerError::Config(format!(
            "no in-process implementation for agent kind '{other}'"
        ))),
    }
}

/// Baseline agent: picks uniformly among the candidate actions the engine
/// advertises in the observation's `options` array, filling in a canned
/// statement where the chosen kind needs free text.
pub struct RandomAgent {
    name: String,
    rng: rand_chacha::ChaCha8Rng,
}

impl RandomAgent {
    pub fn new(name: impl Into<String>, seed: u64) -> Self {
        Self {
            name: name.into(),
            rng: rand_chacha::ChaCha8Rng::seed_from_u64(seed),
        }
    }
}

#[async_trait]
impl Agent for RandomAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn act(&mut self, observation: &Observation) -> Result<Action, AgentError> {
        let options = observation
            .data
            .get("options")
            .and_then(Value::as_array)
            .filter(|opts| !opts.is_empty())
            .ok_or(AgentError::NoAction)?;
        let pick = &options[self.rng.gen_range(0..options.len())];
        let mut action = Action::from_option(observation.player, pick)
            .map_err(|err| AgentError::Failed(err.to_string()))?;
        match action.kind {
            ActionKind::Speak if !action.data.contains_key("statement") => {
                action = action.with("statement", "I have nothing to add.");
            }
            ActionKind::Ask if !action.data.contains_key("question") => {
                action = action.with("question", "What do you think of this place?");
            }
            ActionKind::Answer if !action.data.contains_key("answer") => {
                action = action.with("answer", "It is about what you would expect.");
            }
            _ => {}
        }
        Ok(action)
    }
}

/// Test and demo agent: pops a pre-programmed queue of actions, failing once
/// the script is exhausted.
pub struct ScriptedAgent {
    name: String,
    script: VecDeque<Action>,
}

impl ScriptedAgent {
    pub fn new(name: impl Into<String>, script: Vec<Action>) -> Self {
        Self {
            name: name.into(),
            script: script.into(),
        }
    }
}

#[async_trait]
impl Agent for ScriptedAgent {
    fn name(&self) -> &str {
        &self.name
    }

    async fn act(&mut self, _observation: &Observation) -> Result<Action, AgentError> {
        self.script.pop_front().ok_or(AgentError::NoAction)
    }
}
