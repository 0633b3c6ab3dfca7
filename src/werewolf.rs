//! Werewolf engine: night eliminations, day bidding, debate and lynch votes.

use crate::ballots::Ballots;
use crate::engine::{Engine, Observations, StepOutcome};
use crate::error::GameError;
use crate::event::{EventKind, GameLog};
use crate::types::{option_with, Action, ActionKind, ObsKind, Observation, PlayerId};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

mod test;

const MAX_RETRIES: usize = 3;

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct WerewolfConfig {
    pub n_players: usize,
    #[serde(default)]
    pub seed: u64,
    /// Werewolf count; defaults to a quarter of the table, at least one.
    #[serde(default)]
    pub n_werewolves: Option<usize>,
    #[serde(default = "default_true")]
    pub include_seer: bool,
    #[serde(default = "default_true")]
    pub include_doctor: bool,
    /// Debate statements per day before voting.
    #[serde(default = "default_debate_turns")]
    pub max_debate_turns: usize,
    /// Round cap; reaching it ends the match in a draw.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    /// Whether a lynch needs a strict majority, not just a plurality.
    #[serde(default = "default_true")]
    pub require_majority: bool,
    #[serde(default)]
    pub role_assignment: Option<RoleAssignment>,
}

fn default_true() -> bool {
    true
}

fn default_debate_turns() -> usize {
    10
}

fn default_max_rounds() -> usize {
    50
}

impl Default for WerewolfConfig {
    fn default() -> Self {
        Self {
            n_players: 7,
            seed: 0,
            n_werewolves: None,
            include_seer: true,
            include_doctor: true,
            max_debate_turns: default_debate_turns(),
            max_rounds: default_max_rounds(),
            require_majority: true,
            role_assignment: None,
        }
    }
}

/// Fixed seating from the tournament schedule. Special roles are dealt to the
/// first villager seats.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct RoleAssignment {
    pub villagers: Vec<PlayerId>,
    pub werewolves: Vec<PlayerId>,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Villager,
    Werewolf,
    Seer,
    Doctor,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    Village,
    Werewolves,
}

impl Role {
    pub fn team(self) -> Team {
        match self {
            Role::Werewolf => Team::Werewolves,
            _ => Team::Village,
        }
    }
}

/// A day-vote ballot: a target, or the abstain token (no elimination).
#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
enum DayBallot {
    Target(PlayerId),
    Abstain,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
enum GameState {
    /// Wolves pick the night's victim; the first submitted target stands.
    NightWerewolf { choices: Vec<(PlayerId, PlayerId)> },
    NightDoctor,
    NightSeer,
    DayBidding { bids: Ballots<i64> },
    DayDebate { speaker: PlayerId },
    DayVoting { votes: Ballots<DayBallot> },
    GameOver,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
struct WwPlayer {
    role: Role,
    alive: bool,
}

pub struct Werewolf {
    cfg: WerewolfConfig,
    players: Vec<WwPlayer>,
    round: usize,
    /// Statements made this day.
    debate_turns: usize,
    /// The last debate speaker, barred from the next bidding round.
    previous_speaker: Option<PlayerId>,
    night_target: Option<PlayerId>,
    night_protect: Option<PlayerId>,
    state: GameState,
    retries: BTreeMap<PlayerId, usize>,
    winner: Option<Team>,
    win_reason: Option<String>,
    draw: bool,
    rng: rand_chacha::ChaCha8Rng,
    log: GameLog,
}

impl Werewolf {
    pub fn new(cfg: WerewolfConfig, log: GameLog) -> Result<Self, GameError> {
        if !(3..=20).contains(&cfg.n_players) {
            return Err(GameError::rule(format!(
                "Werewolf requires 3-20 players, got {}",
                cfg.n_players
            )));
        }
        let n_werewolves = cfg.n_werewolves.unwrap_or_else(|| (cfg.n_players / 4).max(1));
        if n_werewolves >= cfg.n_players {
            return Err(GameError::rule("too many werewolves"));
        }
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(cfg.seed);
        let roles = assign_roles(&cfg, n_werewolves, &mut rng)?;
        let players = roles
            .into_iter()
            .map(|role| WwPlayer { role, alive: true })
            .collect();
        Ok(Self {
            cfg,
            players,
            round: 1,
            debate_turns: 0,
            previous_speaker: None,
            night_target: None,
            night_protect: None,
            state: GameState::NightWerewolf { choices: Vec::new() },
            retries: BTreeMap::new(),
            winner: None,
            win_reason: None,
            draw: false,
            rng,
            log,
        })
    }

    fn n(&self) -> usize {
        self.players.len()
    }

    fn alive_ids(&self) -> Vec<PlayerId> {
        (0..self.n()).filter(|p| self.players[*p].alive).collect()
    }

    fn living(&self, pred: impl Fn(Role) -> bool) -> Vec<PlayerId> {
        (0..self.n())
            .filter(|p| self.players[*p].alive && pred(self.players[*p].role))
            .collect()
    }

    fn living_role(&self, role: Role) -> Option<PlayerId> {
        self.living(|r| r == role).into_iter().next()
    }

    fn phase_name(&self) -> &'static str {
        match self.state {
            GameState::NightWerewolf { .. } => "night_werewolf",
            GameState::NightDoctor => "night_doctor",
            GameState::NightSeer => "night_seer",
            GameState::DayBidding { .. } => "day_bidding",
            GameState::DayDebate { .. } => "day_debate",
            GameState::DayVoting { .. } => "day_voting",
            GameState::GameOver => "game_over",
        }
    }

    fn set_state(&mut self, state: GameState) {
        let from = self.phase_name();
        self.state = state;
        self.retries.clear();
        self.log.push(
            EventKind::PhaseChange,
            json!({ "from": from, "to": self.phase_name() }),
        );
    }

    fn current_actors(&self) -> Vec<PlayerId> {
        match &self.state {
            GameState::NightWerewolf { choices } => self
                .living(|r| r == Role::Werewolf)
                .into_iter()
                .filter(|w| !choices.iter().any(|(chooser, _)| chooser == w))
                .collect(),
            GameState::NightDoctor => self.living_role(Role::Doctor).into_iter().collect(),
            GameState::NightSeer => self.living_role(Role::Seer).into_iter().collect(),
            GameState::DayBidding { bids } => bids.pending(),
            GameState::DayDebate { speaker } => vec![*speaker],
            GameState::DayVoting { votes } => votes.pending(),
            GameState::GameOver => vec![],
        }
    }

    fn apply(&mut self, action: &Action) -> Result<(), GameError> {
        let player = action.player;
        if player >= self.n() {
            return Err(GameError::InvalidPlayerIndex);
        }
        if !self.players[player].alive {
            return Err(GameError::DeadPlayer);
        }
        if !self.current_actors().contains(&player) {
            return Err(GameError::NotToAct);
        }
        match &self.state {
            GameState::NightWerewolf { .. } => self.apply_wolf_choice(player, action),
            GameState::NightDoctor => self.apply_protect(player, action),
            GameState::NightSeer => self.apply_investigate(player, action),
            GameState::DayBidding { .. } => self.apply_bid(player, action),
            GameState::DayDebate { .. } => self.apply_debate(player, action),
            GameState::DayVoting { .. } => self.apply_day_vote(player, action),
            GameState::GameOver => Err(GameError::InvalidAction),
        }
    }

    fn apply_wolf_choice(&mut self, player: PlayerId, action: &Action) -> Result<(), GameError> {
        if action.kind != ActionKind::Eliminate {
            return Err(GameError::InvalidAction);
        }
        let target = action.target()?;
        if target >= self.n()
            || !self.players[target].alive
            || self.players[target].role == Role::Werewolf
        {
            return Err(GameError::InvalidPlayerChoice);
        }
        let all_chosen = {
            let GameState::NightWerewolf { choices } = &mut self.state else {
                return Err(GameError::InvalidAction);
            };
            choices.push((player, target));
            let chosen = choices.len();
            chosen >= self.living(|r| r == Role::Werewolf).len()
        };
        if all_chosen {
            // The first submitted target stands; late wolves are outvoted by
            // arrival order.
            let GameState::NightWerewolf { choices } = &self.state else {
                unreachable!()
            };
            self.night_target = choices.first().map(|(_, t)| *t);
            self.after_wolf_phase();
        }
        Ok(())
    }

    fn after_wolf_phase(&mut self) {
        if self.cfg.include_doctor && self.living_role(Role::Doctor).is_some() {
            self.set_state(GameState::NightDoctor);
        } else if self.cfg.include_seer && self.living_role(Role::Seer).is_some() {
            self.set_state(GameState::NightSeer);
        } else {
            self.resolve_night();
        }
    }

    fn apply_protect(&mut self, player: PlayerId, action: &Action) -> Result<(), GameError> {
        if action.kind != ActionKind::Protect {
            return Err(GameError::InvalidAction);
        }
        let target = action.target()?;
        if target >= self.n() || !self.players[target].alive {
            return Err(GameError::InvalidPlayerChoice);
        }
        self.night_protect = Some(target);
        self.log.push_private(
            player,
            EventKind::PlayerAction,
            json!({ "action": "protect", "target": target }),
        );
        if self.cfg.include_seer && self.living_role(Role::Seer).is_some() {
            self.set_state(GameState::NightSeer);
        } else {
            self.resolve_night();
        }
        Ok(())
    }

    fn apply_investigate(&mut self, player: PlayerId, action: &Action) -> Result<(), GameError> {
        if action.kind != ActionKind::Investigate {
            return Err(GameError::InvalidAction);
        }
        let target = action.target()?;
        if target >= self.n() || !self.players[target].alive || target == player {
            return Err(GameError::InvalidPlayerChoice);
        }
        // The seer's result is a private observation only.
        self.log.push_private(
            player,
            EventKind::InvestigationResult,
            json!({ "target": target, "role": self.players[target].role }),
        );
        self.resolve_night();
        Ok(())
    }

    fn resolve_night(&mut self) {
        let target = self.night_target.take();
        let protect = self.night_protect.take();
        match target {
            Some(victim) if Some(victim) != protect => {
                self.players[victim].alive = false;
                // The announcement names the victim; the role stays hidden.
                self.log.push(
                    EventKind::PlayerEliminated,
                    json!({ "player": victim, "cause": "werewolf_attack" }),
                );
            }
            Some(victim) => {
                self.log.push(
                    EventKind::Info,
                    json!({ "night": "The doctor saved the werewolves' target.", "saved": victim }),
                );
            }
            None => {
                self.log
                    .push(EventKind::Info, json!({ "night": "No one was attacked." }));
            }
        }
        if self.check_game_over() {
            return;
        }
        self.start_bidding();
    }

    fn start_bidding(&mut self) {
        let excluded = self.previous_speaker;
        let alive: Vec<bool> = self.players.iter().map(|p| p.alive).collect();
        let bids = Ballots::new(self.n(), |p| alive[p] && Some(p) != excluded);
        if bids.total_eligible() == 0 {
            // Everyone but the previous speaker is gone; skip straight to voting.
            self.start_day_voting();
            return;
        }
        self.set_state(GameState::DayBidding { bids });
    }

    fn apply_bid(&mut self, player: PlayerId, action: &Action) -> Result<(), GameError> {
        if action.kind != ActionKind::Bid {
            return Err(GameError::InvalidAction);
        }
        let bid = action.int_field("bid")?;
        if !(0..=4).contains(&bid) {
            return Err(GameError::rule("bid must be between 0 and 4"));
        }
        let GameState::DayBidding { bids } = &mut self.state else {
            return Err(GameError::InvalidAction);
        };
        bids.cast(player, bid)?;
        self.log
            .push_private(player, EventKind::PlayerAction, json!({ "action": "bid", "bid": bid }));
        let GameState::DayBidding { bids } = &self.state else {
            unreachable!()
        };
        if bids.complete() {
            self.resolve_bidding();
        }
        Ok(())
    }

    fn resolve_bidding(&mut self) {
        let GameState::DayBidding { bids } = &self.state else {
            return;
        };
        let top = bids.iter().map(|(_, b)| *b).max().unwrap_or(0);
        let top_bidders: Vec<PlayerId> =
            bids.iter().filter(|(_, b)| **b == top).map(|(p, _)| p).collect();
        // Ties break by uniform choice on the match RNG.
        let speaker = top_bidders[self.rng.gen_range(0..top_bidders.len())];
        self.log.push(
            EventKind::Info,
            json!({ "bid_winner": speaker, "top_bid": top, "tied": top_bidders.len() > 1 }),
        );
        self.set_state(GameState::DayDebate { speaker });
    }

    fn apply_debate(&mut self, player: PlayerId, action: &Action) -> Result<(), GameError> {
        if action.kind != ActionKind::Speak {
            return Err(GameError::InvalidAction);
        }
        let statement = action.str_field("statement")?.to_string();
        self.log.push_player(
            player,
            EventKind::Discussion,
            json!({ "statement": statement, "round": self.round }),
        );
        self.debate_turns += 1;
        self.previous_speaker = Some(player);
        if self.debate_turns >= self.cfg.max_debate_turns {
            self.start_day_voting();
        } else {
            self.start_bidding();
        }
        Ok(())
    }

    fn start_day_voting(&mut self) {
        let alive: Vec<bool> = self.players.iter().map(|p| p.alive).collect();
        let votes = Ballots::new(self.n(), |p| alive[p]);
        self.set_state(GameState::DayVoting { votes });
    }

    fn apply_day_vote(&mut self, player: PlayerId, action: &Action) -> Result<(), GameError> {
        let ballot = match action.kind {
            ActionKind::Vote => {
                let target = action.target()?;
                if target >= self.n() || !self.players[target].alive || target == player {
                    return Err(GameError::InvalidPlayerChoice);
                }
                DayBallot::Target(target)
            }
            ActionKind::Skip => DayBallot::Abstain,
            _ => return Err(GameError::InvalidAction),
        };
        let GameState::DayVoting { votes } = &mut self.state else {
            return Err(GameError::InvalidAction);
        };
        votes.cast(player, ballot)?;
        // Day votes are open.
        self.log.push_player(
            player,
            EventKind::VoteCast,
            json!({
                "vote": match ballot {
                    DayBallot::Target(t) => Value::from(t),
                    DayBallot::Abstain => Value::Null,
                },
            }),
        );
        let GameState::DayVoting { votes } = &self.state else {
            unreachable!()
        };
        if votes.complete() {
            self.resolve_day_vote();
        }
        Ok(())
    }

    fn resolve_day_vote(&mut self) {
        let GameState::DayVoting { votes } = &self.state else {
            return;
        };
        let n_alive = votes.total_eligible();
        let mut counts: BTreeMap<Option<PlayerId>, usize> = BTreeMap::new();
        for (_, ballot) in votes.iter() {
            let key = match ballot {
                DayBallot::Target(t) => Some(*t),
                DayBallot::Abstain => None,
            };
            *counts.entry(key).or_insert(0) += 1;
        }
        let max_votes = counts.values().copied().max().unwrap_or(0);
        let leaders: Vec<Option<PlayerId>> = counts
            .iter()
            .filter(|(_, c)| **c == max_votes)
            .map(|(k, _)| *k)
            .collect();
        let eliminated = match leaders.as_slice() {
            [Some(target)] => {
                let majority_met = !self.cfg.require_majority || max_votes > n_alive / 2;
                majority_met.then_some(*target)
            }
            _ => None,
        };
        self.log.push(
            EventKind::ElectionResult,
            json!({
                "eliminated": eliminated,
                "votes_for_leader": max_votes,
                "tie": leaders.len() > 1,
            }),
        );
        if let Some(target) = eliminated {
            self.players[target].alive = false;
            self.log.push(
                EventKind::PlayerEliminated,
                json!({ "player": target, "cause": "day_vote" }),
            );
        }
        if self.check_game_over() {
            return;
        }
        self.round += 1;
        self.log.set_round(self.round);
        if self.round > self.cfg.max_rounds {
            self.draw = true;
            self.win_reason = Some("Maximum rounds reached (draw)".to_string());
            self.log.push(
                EventKind::GameEnd,
                json!({ "winner": "draw", "reason": "Maximum rounds reached (draw)" }),
            );
            self.set_state(GameState::GameOver);
            return;
        }
        self.debate_turns = 0;
        self.previous_speaker = None;
        self.log
            .push(EventKind::RoundStart, json!({ "round": self.round }));
        self.set_state(GameState::NightWerewolf { choices: Vec::new() });
    }

    fn check_game_over(&mut self) -> bool {
        let wolves = self.living(|r| r == Role::Werewolf).len();
        let villagers = self.living(|r| r != Role::Werewolf).len();
        if wolves == 0 {
            self.finish(Team::Village, "All werewolves eliminated");
            return true;
        }
        if wolves > villagers {
            self.finish(Team::Werewolves, "Werewolves outnumber the village");
            return true;
        }
        false
    }

    fn finish(&mut self, winner: Team, reason: &str) {
        self.winner = Some(winner);
        self.win_reason = Some(reason.to_string());
        self.log.push(
            EventKind::GameEnd,
            json!({
                "winner": match winner {
                    Team::Village => "village",
                    Team::Werewolves => "werewolves",
                },
                "reason": reason,
            }),
        );
        self.set_state(GameState::GameOver);
    }

    fn obs_for(&self, player: PlayerId) -> Observation {
        let acting = self.current_actors().contains(&player);
        let phase = self.phase_name();
        let (instruction, options) = if acting {
            self.actor_prompt(player)
        } else if !self.players[player].alive && !self.terminal() {
            ("You are dead. You can only observe.".to_string(), vec![])
        } else {
            (format!("Waiting for the {phase} phase to resolve."), vec![])
        };
        let mut obs = if acting {
            Observation::act(player, phase, instruction)
        } else {
            Observation::observe(player, phase, instruction)
        };
        obs = obs.kind(if self.players[player].role == Role::Werewolf {
            ObsKind::Team
        } else {
            ObsKind::Private
        });
        obs = obs
            .with("round", self.round)
            .with("alive_players", self.alive_ids())
            .with("is_alive", self.players[player].alive)
            .with(
                "your_role",
                serde_json::to_value(self.players[player].role).unwrap_or(Value::Null),
            );
        if self.players[player].role == Role::Werewolf {
            obs = obs.with("werewolves", self.living(|r| r == Role::Werewolf));
        }
        if !options.is_empty() {
            obs = obs.options(options);
        }
        obs
    }

    fn actor_prompt(&self, player: PlayerId) -> (String, Vec<Value>) {
        match &self.state {
            GameState::NightWerewolf { .. } => (
                "Night falls. Choose a victim.".to_string(),
                self.alive_ids()
                    .into_iter()
                    .filter(|p| self.players[*p].role != Role::Werewolf)
                    .map(|p| option_with("eliminate", "target", p))
                    .collect(),
            ),
            GameState::NightDoctor => (
                "Choose a player to protect tonight (you may protect yourself).".to_string(),
                self.alive_ids()
                    .into_iter()
                    .map(|p| option_with("protect", "target", p))
                    .collect(),
            ),
            GameState::NightSeer => (
                "Choose a player to investigate; you will learn their role.".to_string(),
                self.alive_ids()
                    .into_iter()
                    .filter(|p| *p != player)
                    .map(|p| option_with("investigate", "target", p))
                    .collect(),
            ),
            GameState::DayBidding { .. } => (
                "Bid for the floor (0-4); the highest bidder speaks next.".to_string(),
                (0..=4).map(|b| option_with("bid", "bid", b)).collect(),
            ),
            GameState::DayDebate { .. } => (
                "You hold the floor. Make your statement.".to_string(),
                vec![json!({ "kind": "speak" })],
            ),
            GameState::DayVoting { .. } => {
                let mut options: Vec<Value> = self
                    .alive_ids()
                    .into_iter()
                    .filter(|p| *p != player)
                    .map(|p| option_with("vote", "target", p))
                    .collect();
                options.push(json!({ "kind": "skip" }));
                (
                    "Vote to eliminate a player, or skip for no elimination.".to_string(),
                    options,
                )
            }
            GameState::GameOver => (String::new(), vec![]),
        }
    }
}

fn assign_roles(
    cfg: &WerewolfConfig,
    n_werewolves: usize,
    rng: &mut impl Rng,
) -> Result<Vec<Role>, GameError> {
    let n = cfg.n_players;
    let mut special = Vec::new();
    if cfg.include_seer {
        special.push(Role::Seer);
    }
    if cfg.include_doctor {
        special.push(Role::Doctor);
    }
    if n_werewolves + special.len() >= n {
        return Err(GameError::rule(
            "not enough players for the configured werewolves and special roles",
        ));
    }

    if let Some(table) = &cfg.role_assignment {
        let mut roles = vec![Role::Villager; n];
        for &w in &table.werewolves {
            if w >= n {
                return Err(GameError::InvalidPlayerIndex);
            }
            roles[w] = Role::Werewolf;
        }
        for (seat, role) in table.villagers.iter().zip(special) {
            if *seat >= n {
                return Err(GameError::InvalidPlayerIndex);
            }
            roles[*seat] = role;
        }
        return Ok(roles);
    }

    let mut roles: Vec<Role> = std::iter::repeat(Role::Werewolf)
        .take(n_werewolves)
        .chain(special)
        .collect();
    while roles.len() < n {
        roles.push(Role::Villager);
    }
    roles.shuffle(rng);
    Ok(roles)
}

impl Engine for Werewolf {
    fn reset(&mut self) -> Observations {
        self.log.push(
            EventKind::GameStart,
            json!({
                "game": "werewolf",
                "n_players": self.cfg.n_players,
                "n_werewolves": self.living(|r| r == Role::Werewolf).len(),
                "seed": self.cfg.seed,
            }),
        );
        self.log.set_round(1);
        self.log.push(EventKind::RoundStart, json!({ "round": 1 }));
        for p in 0..self.n() {
            let mut data = Map::new();
            data.insert(
                "role_assignment".to_string(),
                serde_json::to_value(self.players[p].role).unwrap_or(Value::Null),
            );
            if self.players[p].role == Role::Werewolf {
                data.insert(
                    "werewolves".to_string(),
                    serde_json::to_value(self.living(|r| r == Role::Werewolf))
                        .unwrap_or(Value::Null),
                );
            }
            self.log.push_private(p, EventKind::Info, Value::Object(data));
        }
        self.observations()
    }

    fn observations(&self) -> Observations {
        (0..self.n()).map(|p| (p, self.obs_for(p))).collect()
    }

    fn step(&mut self, actions: BTreeMap<PlayerId, Action>) -> StepOutcome {
        for (player, action) in actions {
            if self.terminal() {
                break;
            }
            if let Err(err) = self.apply(&action) {
                // Extra wolf targets after the night resolves are stale batch
                // entries, not agent mistakes.
                if err == GameError::NotToAct
                    && action.kind == ActionKind::Eliminate
                    && self.players.get(player).map(|p| p.role) == Some(Role::Werewolf)
                    && !matches!(self.state, GameState::NightWerewolf { .. })
                {
                    continue;
                }
                self.log.error(Some(player), err.code(), &err.to_string());
                let retries = self.retries.entry(player).or_insert(0);
                *retries += 1;
                if *retries >= MAX_RETRIES {
                    if let Some(fallback) = self.fallback_action(player) {
                        self.retries.remove(&player);
                        if let Err(err) = self.apply(&fallback) {
                            self.log
                                .warn_invariant(&format!("fallback rejected: {err}"), "skipped actor");
                        }
                    }
                }
            }
        }
        let done = self.terminal();
        let mut outcome = StepOutcome::new(self.observations(), done);
        if done {
            if let Some(winner) = self.winner {
                for p in 0..self.n() {
                    let won = self.players[p].role.team() == winner;
                    outcome.rewards.insert(p, if won { 1.0 } else { 0.0 });
                }
            }
        }
        outcome
    }

    fn terminal(&self) -> bool {
        matches!(self.state, GameState::GameOver)
    }

    fn winner(&self) -> Option<String> {
        self.winner.map(|w| {
            match w {
                Team::Village => "village",
                Team::Werewolves => "werewolves",
            }
            .to_string()
        })
    }

    fn win_reason(&self) -> Option<String> {
        self.win_reason.clone()
    }

    fn force_terminate(&mut self) {
        if !self.terminal() {
            self.draw = true;
            self.win_reason = Some("match exceeded the step bound".to_string());
            self.log.push(
                EventKind::GameEnd,
                json!({ "winner": "draw", "reason": "timeout" }),
            );
            self.set_state(GameState::GameOver);
        }
    }

    fn fallback_action(&self, player: PlayerId) -> Option<Action> {
        if !self.current_actors().contains(&player) {
            return None;
        }
        let action = match &self.state {
            GameState::NightWerewolf { .. } => {
                let target = self
                    .alive_ids()
                    .into_iter()
                    .find(|p| self.players[*p].role != Role::Werewolf)?;
                Action::new(player, ActionKind::Eliminate).with("target", target)
            }
            GameState::NightDoctor => Action::new(player, ActionKind::Protect).with("target", player),
            GameState::NightSeer => {
                let target = self.alive_ids().into_iter().find(|p| *p != player)?;
                Action::new(player, ActionKind::Investigate).with("target", target)
            }
            GameState::DayBidding { .. } => Action::new(player, ActionKind::Bid).with("bid", 0),
            GameState::DayDebate { .. } => {
                Action::new(player, ActionKind::Speak).with("statement", "(remains silent)")
            }
            GameState::DayVoting { .. } => Action::new(player, ActionKind::Skip),
            GameState::GameOver => return None,
        };
        Some(action)
    }

    fn log(&self) -> &GameLog {
        &self.log
    }

    fn log_mut(&mut self) -> &mut GameLog {
        &mut self.log
    }

    fn round(&self) -> usize {
        self.round
    }

    fn player_stats(&self) -> BTreeMap<PlayerId, Value> {
        (0..self.n())
            .map(|p| {
                let won = self
                    .winner
                    .map(|w| self.players[p].role.team() == w)
                    .unwrap_or(false);
                (
                    p,
                    json!({
                        "role": self.players[p].role,
                        "team": self.players[p].role.team(),
                        "alive": self.players[p].alive,
                        "won": won,
                        "draw": self.draw,
                    }),
                )
            })
            .collect()
    }
}
