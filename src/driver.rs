use crate::agent::Agent;
use crate::engine::Engine;
use crate::error::AgentError;
use crate::event::EventKind;
use crate::types::{Action, GameResult, Outcome, PlayerId};
use futures_util::future::join_all;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Per-match driver limits.
#[derive(Clone, Debug)]
pub struct MatchConfig {
    /// Safety bound on driver iterations; exceeding it closes the match with a
    /// timeout outcome.
    pub max_steps: usize,
    /// Upper bound on a single agent call.
    pub agent_timeout: Duration,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            max_steps: 2000,
            agent_timeout: Duration::from_secs(120),
        }
    }
}

/// Fires the cooperative cancel signal for one match.
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

pub type CancelSignal = watch::Receiver<bool>;

/// Creates a linked cancel handle/signal pair.
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), rx)
}

/// Advances any engine to completion with a uniform loop: query observations,
/// invoke the agents of all actors in parallel, hand the settled batch to the
/// engine as one atomic step, repeat until terminal, cancelled, or out of
/// steps.
pub async fn run_match(
    match_id: &str,
    engine: &mut dyn Engine,
    agents: &mut [Box<dyn Agent>],
    config: &MatchConfig,
    mut cancel: Option<CancelSignal>,
) -> GameResult {
    let start = Instant::now();
    let mut observations = engine.reset();
    let mut notified = notify_agents(engine, agents, 0);
    let mut steps = 0usize;

    let outcome = loop {
        if engine.terminal() {
            break Outcome::Completed;
        }
        if steps >= config.max_steps {
            log::warn!("[{match_id}] exceeded {} steps, forcing termination", config.max_steps);
            engine.force_terminate();
            break Outcome::Timeout;
        }
        if cancel.as_ref().map(|c| *c.borrow()).unwrap_or(false) {
            break Outcome::Cancelled;
        }

        let batch = match collect_actions(engine, agents, &observations, config, cancel.as_mut()).await {
            Some(batch) => batch,
            None => break Outcome::Cancelled,
        };

        steps += 1;
        let step = engine.step(batch);
        observations = step.observations;
        notified = notify_agents(engine, agents, notified);
        if step.done {
            break Outcome::Completed;
        }
    };

    if outcome == Outcome::Cancelled {
        engine.log_mut().push(
            EventKind::Info,
            serde_json::json!({ "cancelled": true, "steps": steps }),
        );
    }

    let mut metadata = Map::new();
    metadata.insert("steps".to_string(), Value::from(steps));
    metadata.insert(
        "agents".to_string(),
        Value::Array(agents.iter().map(|a| Value::String(a.name().to_string())).collect()),
    );

    let (winner, win_reason) = match outcome {
        Outcome::Completed => (
            engine.winner(),
            engine.win_reason().unwrap_or_else(|| "unknown".to_string()),
        ),
        Outcome::Timeout => (engine.winner(), "match exceeded the step bound".to_string()),
        Outcome::Cancelled => (None, "match was cancelled".to_string()),
    };

    GameResult {
        match_id: match_id.to_string(),
        outcome,
        winner,
        win_reason,
        rounds: engine.round(),
        duration_seconds: start.elapsed().as_secs_f64(),
        player_stats: engine.player_stats(),
        metadata,
    }
}

/// Invokes every actor's agent concurrently and settles the batch. Individual
/// failures are isolated: an `Error` event is recorded for that player and the
/// engine's fallback (if any) stands in. Returns `None` if the cancel signal
/// fired while calls were outstanding.
async fn collect_actions(
    engine: &mut dyn Engine,
    agents: &mut [Box<dyn Agent>],
    observations: &crate::engine::Observations,
    config: &MatchConfig,
    cancel: Option<&mut CancelSignal>,
) -> Option<BTreeMap<PlayerId, Action>> {
    let timeout = config.agent_timeout;
    let calls = agents
        .iter_mut()
        .enumerate()
        .filter_map(|(player, agent)| {
            let obs = observations.get(&player).filter(|o| o.to_act())?;
            Some(async move {
                let result = match tokio::time::timeout(timeout, agent.act(obs)).await {
                    Ok(result) => result,
                    Err(_) => Err(AgentError::Timeout),
                };
                (player, result)
            })
        })
        .collect::<Vec<_>>();

    let settled = match cancel {
        Some(cancel) => {
            tokio::select! {
                settled = join_all(calls) => settled,
                // Dropping the join aborts every outstanding agent call.
                _ = cancel.changed() => return None,
            }
        }
        None => join_all(calls).await,
    };

    let mut batch = BTreeMap::new();
    for (player, result) in settled {
        match result {
            Ok(mut action) => {
                // The envelope's player field is authoritative per seat.
                action.player = player;
                batch.insert(player, action);
            }
            Err(err) => {
                log::debug!("agent {player} failed: {err}");
                engine
                    .log_mut()
                    .error(Some(player), "AGENT_FAILURE", &err.to_string());
                if let Some(fallback) = engine.fallback_action(player) {
                    batch.insert(player, fallback);
                }
            }
        }
    }
    Some(batch)
}

/// Forwards events appended since the last step to the agents: public events
/// to everyone, private events to the scoped player only. Purely advisory.
fn notify_agents(engine: &dyn Engine, agents: &mut [Box<dyn Agent>], seen: usize) -> usize {
    let events = engine.log().entries();
    for event in &events[seen.min(events.len())..] {
        let kind = format!("{:?}", event.kind);
        if event.private {
            if let Some(player) = event.player {
                if let Some(agent) = agents.get_mut(player) {
                    agent.notify(&kind, &event.data);
                }
            }
        } else {
            for agent in agents.iter_mut() {
                agent.notify(&kind, &event.data);
            }
        }
    }
    events.len()
}
