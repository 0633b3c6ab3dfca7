//! Avalon engine: quest teams, hidden loyalties, assassination endgame.

use crate::ballots::Ballots;
use crate::engine::{Engine, Observations, StepOutcome};
use crate::error::GameError;
use crate::event::{EventKind, GameLog};
use crate::types::{option_with, Action, ActionKind, ObsKind, Observation, PlayerId};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::{BTreeMap, HashSet};

mod test;

const MAX_RETRIES: usize = 3;

/// Consecutive rejected proposals that hand the game to evil.
const MAX_REJECTIONS: usize = 5;

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct AvalonConfig {
    pub n_players: usize,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub include_percival: bool,
    #[serde(default)]
    pub include_morgana: bool,
    #[serde(default)]
    pub include_mordred: bool,
    #[serde(default)]
    pub include_oberon: bool,
    #[serde(default)]
    pub role_assignment: Option<RoleAssignment>,
}

impl Default for AvalonConfig {
    fn default() -> Self {
        Self {
            n_players: 5,
            seed: 0,
            include_percival: false,
            include_morgana: false,
            include_mordred: false,
            include_oberon: false,
            role_assignment: None,
        }
    }
}

/// Fixed team table from the tournament schedule; special roles are dealt to
/// the listed seats in order (Merlin to the first good seat, the Assassin to
/// the first evil seat).
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct RoleAssignment {
    pub good: Vec<PlayerId>,
    pub evil: Vec<PlayerId>,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Merlin,
    Percival,
    Servant,
    Assassin,
    Morgana,
    Mordred,
    Oberon,
    Minion,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Team {
    Good,
    Evil,
}

impl Role {
    pub fn team(self) -> Team {
        match self {
            Role::Merlin | Role::Percival | Role::Servant => Team::Good,
            Role::Assassin | Role::Morgana | Role::Mordred | Role::Oberon | Role::Minion => {
                Team::Evil
            }
        }
    }
}

/// `(good, evil)` player counts by table size.
fn team_composition(n_players: usize) -> (usize, usize) {
    match n_players {
        5 => (3, 2),
        6 => (4, 2),
        7 => (4, 3),
        8 => (5, 3),
        9 => (6, 3),
        _ => (6, 4),
    }
}

/// Quest team size for quest index `quest` (0-based).
fn quest_size(n_players: usize, quest: usize) -> usize {
    const SIZES: [[usize; 5]; 6] = [
        [2, 3, 2, 3, 3], // 5 players
        [2, 3, 4, 3, 4], // 6
        [2, 3, 3, 4, 4], // 7
        [3, 4, 4, 5, 5], // 8
        [3, 4, 4, 5, 5], // 9
        [3, 4, 4, 5, 5], // 10
    ];
    SIZES[n_players.clamp(5, 10) - 5][quest.min(4)]
}

/// Fail ballots needed to sink quest index `quest`: two only for the fourth
/// quest at seven or more players.
fn fails_needed(n_players: usize, quest: usize) -> usize {
    if quest == 3 && n_players >= 7 {
        2
    } else {
        1
    }
}

#[derive(Clone, Serialize, Deserialize, Debug)]
struct QuestRecord {
    quest: usize,
    team: Vec<PlayerId>,
    fails: usize,
    succeeded: bool,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
enum GameState {
    TeamSelection,
    TeamDiscussion { order: Vec<PlayerId>, next: usize },
    TeamVoting { votes: Ballots<bool> },
    QuestVoting { ballots: Ballots<bool> },
    Assassination,
    GameOver,
}

pub struct Avalon {
    cfg: AvalonConfig,
    roles: Vec<Role>,
    leader: PlayerId,
    /// Current quest, 0-based.
    quest: usize,
    /// Global proposal counter across the whole match.
    proposal_idx: usize,
    /// Proposal counter within the current quest.
    round_idx: usize,
    consecutive_rejections: usize,
    current_team: Vec<PlayerId>,
    quest_results: Vec<QuestRecord>,
    discussion: Vec<(PlayerId, String)>,
    /// Normalized statements already made this quest/round, for dedup.
    seen_statements: HashSet<(PlayerId, String)>,
    state: GameState,
    retries: BTreeMap<PlayerId, usize>,
    winner: Option<Team>,
    win_reason: Option<String>,
    rng: rand_chacha::ChaCha8Rng,
    log: GameLog,
}

impl Avalon {
    pub fn new(cfg: AvalonConfig, log: GameLog) -> Result<Self, GameError> {
        if !(5..=10).contains(&cfg.n_players) {
            return Err(GameError::rule(format!(
                "Avalon requires 5-10 players, got {}",
                cfg.n_players
            )));
        }
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(cfg.seed);
        let roles = assign_roles(&cfg, &mut rng)?;
        Ok(Self {
            cfg,
            roles,
            leader: 0,
            quest: 0,
            proposal_idx: 0,
            round_idx: 0,
            consecutive_rejections: 0,
            current_team: Vec::new(),
            quest_results: Vec::new(),
            discussion: Vec::new(),
            seen_statements: HashSet::new(),
            state: GameState::TeamSelection,
            retries: BTreeMap::new(),
            winner: None,
            win_reason: None,
            rng,
            log,
        })
    }

    fn n(&self) -> usize {
        self.roles.len()
    }

    fn phase_name(&self) -> &'static str {
        match self.state {
            GameState::TeamSelection => "team_selection",
            GameState::TeamDiscussion { .. } => "team_discussion",
            GameState::TeamVoting { .. } => "team_voting",
            GameState::QuestVoting { .. } => "quest_voting",
            GameState::Assassination => "assassination",
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

    fn assassin(&self) -> PlayerId {
        self.roles
            .iter()
            .position(|r| *r == Role::Assassin)
            .or_else(|| self.roles.iter().position(|r| r.team() == Team::Evil))
            .unwrap_or(0)
    }

    fn merlin(&self) -> Option<PlayerId> {
        self.roles.iter().position(|r| *r == Role::Merlin)
    }

    /// What this player knows about others at deal time, per the fixed
    /// visibility table.
    fn role_knowledge(&self, player: PlayerId) -> Map<String, Value> {
        let mut data = Map::new();
        let ids = |pred: &dyn Fn(Role) -> bool| -> Vec<Value> {
            self.roles
                .iter()
                .enumerate()
                .filter(|(p, r)| *p != player && pred(**r))
                .map(|(p, _)| Value::from(p))
                .collect()
        };
        match self.roles[player] {
            // Merlin sees all evil except Mordred.
            Role::Merlin => {
                data.insert(
                    "known_evil".to_string(),
                    Value::Array(ids(&|r| r.team() == Team::Evil && r != Role::Mordred)),
                );
            }
            // Percival sees Merlin and Morgana without distinction.
            Role::Percival => {
                data.insert(
                    "merlin_candidates".to_string(),
                    Value::Array(ids(&|r| r == Role::Merlin || r == Role::Morgana)),
                );
            }
            // Evil (except Oberon) see each other; Oberon sees no one.
            r if r.team() == Team::Evil && r != Role::Oberon => {
                data.insert(
                    "evil_team".to_string(),
                    Value::Array(ids(&|r| r.team() == Team::Evil && r != Role::Oberon)),
                );
            }
            _ => {}
        }
        data
    }

    fn current_actors(&self) -> Vec<PlayerId> {
        match &self.state {
            GameState::TeamSelection => vec![self.leader],
            GameState::TeamDiscussion { order, next } => {
                order.get(*next).map(|p| vec![*p]).unwrap_or_default()
            }
            GameState::TeamVoting { votes } => votes.pending(),
            GameState::QuestVoting { ballots } => ballots.pending(),
            GameState::Assassination => vec![self.assassin()],
            GameState::GameOver => vec![],
        }
    }

    fn apply(&mut self, action: &Action) -> Result<(), GameError> {
        let player = action.player;
        if player >= self.n() {
            return Err(GameError::InvalidPlayerIndex);
        }
        if !self.current_actors().contains(&player) {
            return Err(GameError::NotToAct);
        }
        match &self.state {
            GameState::TeamSelection => self.apply_proposal(player, action),
            GameState::TeamDiscussion { .. } => self.apply_discussion(player, action),
            GameState::TeamVoting { .. } => self.apply_team_vote(player, action),
            GameState::QuestVoting { .. } => self.apply_quest_vote(player, action),
            GameState::Assassination => self.apply_assassination(player, action),
            GameState::GameOver => Err(GameError::InvalidAction),
        }
    }

    fn apply_proposal(&mut self, player: PlayerId, action: &Action) -> Result<(), GameError> {
        if action.kind != ActionKind::ProposeTeam {
            return Err(GameError::InvalidAction);
        }
        let team = action.id_list("team")?;
        let needed = quest_size(self.n(), self.quest);
        if team.len() != needed {
            return Err(GameError::rule(format!(
                "quest {} needs a team of {needed}",
                self.quest + 1
            )));
        }
        let mut distinct: Vec<PlayerId> = team.clone();
        distinct.sort_unstable();
        distinct.dedup();
        if distinct.len() != team.len() {
            return Err(GameError::rule("team contains duplicate players"));
        }
        if team.iter().any(|p| *p >= self.n()) {
            return Err(GameError::InvalidPlayerChoice);
        }
        self.round_idx = self.consecutive_rejections;
        self.proposal_idx += 1;
        self.current_team = team.clone();
        self.log.push_player(
            player,
            EventKind::PlayerAction,
            json!({
                "action": "propose_team",
                "team": team,
                "quest": self.quest + 1,
                "proposal_idx": self.proposal_idx,
                "round_idx": self.round_idx,
            }),
        );
        self.discussion.clear();
        self.seen_statements.clear();
        // Leader speaks first, then the rest in seat order.
        let mut order = vec![self.leader];
        order.extend((0..self.n()).filter(|p| *p != self.leader));
        self.set_state(GameState::TeamDiscussion { order, next: 0 });
        Ok(())
    }

    fn apply_discussion(&mut self, player: PlayerId, action: &Action) -> Result<(), GameError> {
        match action.kind {
            ActionKind::Speak => {
                let statement = action.str_field("statement")?.to_string();
                let normalized = statement.trim().to_lowercase();
                // A repeat of the same statement by the same player in this
                // quest/round is dropped; the turn is still consumed.
                if self.seen_statements.insert((player, normalized)) {
                    self.discussion.push((player, statement.clone()));
                    self.log.push_player(
                        player,
                        EventKind::Discussion,
                        json!({
                            "statement": statement,
                            "quest": self.quest + 1,
                            "round_idx": self.round_idx,
                        }),
                    );
                }
            }
            ActionKind::Skip => {}
            _ => return Err(GameError::InvalidAction),
        }
        let GameState::TeamDiscussion { order, next } = &mut self.state else {
            unreachable!()
        };
        *next += 1;
        if *next >= order.len() {
            let votes = Ballots::new(self.n(), |_| true);
            self.set_state(GameState::TeamVoting { votes });
        }
        Ok(())
    }

    fn apply_team_vote(&mut self, player: PlayerId, action: &Action) -> Result<(), GameError> {
        if action.kind != ActionKind::Vote {
            return Err(GameError::InvalidAction);
        }
        let approve = match action.str_field("vote")? {
            "approve" => true,
            "reject" => false,
            other => {
                return Err(GameError::MalformedAction(format!(
                    "vote must be 'approve' or 'reject', got '{other}'"
                )))
            }
        };
        let GameState::TeamVoting { votes } = &mut self.state else {
            return Err(GameError::InvalidAction);
        };
        votes.cast(player, approve)?;
        self.log.push_private(
            player,
            EventKind::VoteCast,
            json!({ "vote": if approve { "approve" } else { "reject" } }),
        );
        let GameState::TeamVoting { votes } = &self.state else {
            unreachable!()
        };
        if votes.complete() {
            self.resolve_team_vote();
        }
        Ok(())
    }

    fn resolve_team_vote(&mut self) {
        let GameState::TeamVoting { votes } = &self.state else {
            return;
        };
        let approve = votes.count(|v| *v);
        let reject = votes.count(|v| !*v);
        let ballot_map: Map<String, Value> = votes
            .iter()
            .map(|(p, v)| {
                (
                    p.to_string(),
                    Value::from(if *v { "approve" } else { "reject" }),
                )
            })
            .collect();
        let passed = approve > reject;
        self.log.push(
            EventKind::ElectionResult,
            json!({
                "passed": passed,
                "approve": approve,
                "reject": reject,
                "team": self.current_team,
                "proposal_idx": self.proposal_idx,
                "votes": ballot_map,
            }),
        );
        if passed {
            self.consecutive_rejections = 0;
            let team = self.current_team.clone();
            let ballots = Ballots::new(self.n(), |p| team.contains(&p));
            self.set_state(GameState::QuestVoting { ballots });
        } else {
            self.consecutive_rejections += 1;
            if self.consecutive_rejections >= MAX_REJECTIONS {
                self.finish(Team::Evil, "5 consecutive team rejections");
                return;
            }
            self.leader = (self.leader + 1) % self.n();
            self.set_state(GameState::TeamSelection);
        }
    }

    fn apply_quest_vote(&mut self, player: PlayerId, action: &Action) -> Result<(), GameError> {
        if action.kind != ActionKind::Vote {
            return Err(GameError::InvalidAction);
        }
        let success = match action.str_field("vote")? {
            "success" => true,
            "fail" => false,
            other => {
                return Err(GameError::MalformedAction(format!(
                    "vote must be 'success' or 'fail', got '{other}'"
                )))
            }
        };
        // Good players have no sabotage option.
        if !success && self.roles[player].team() == Team::Good {
            return Err(GameError::rule("good players must vote success"));
        }
        let GameState::QuestVoting { ballots } = &mut self.state else {
            return Err(GameError::InvalidAction);
        };
        ballots.cast(player, success)?;
        self.log.push_private(
            player,
            EventKind::VoteCast,
            json!({ "vote": if success { "success" } else { "fail" } }),
        );
        let GameState::QuestVoting { ballots } = &self.state else {
            unreachable!()
        };
        if ballots.complete() {
            self.resolve_quest();
        }
        Ok(())
    }

    fn resolve_quest(&mut self) {
        let GameState::QuestVoting { ballots } = &self.state else {
            return;
        };
        let fails = ballots.count(|v| !*v);
        let needed = fails_needed(self.n(), self.quest);
        let succeeded = fails < needed;
        let record = QuestRecord {
            quest: self.quest,
            team: self.current_team.clone(),
            fails,
            succeeded,
        };
        // Quest ballots are anonymized: the public record carries counts only.
        self.log.push(
            EventKind::QuestResult,
            json!({
                "quest": self.quest + 1,
                "team": record.team,
                "fails": fails,
                "fails_needed": needed,
                "succeeded": succeeded,
            }),
        );
        self.quest_results.push(record);

        let successes = self.quest_results.iter().filter(|q| q.succeeded).count();
        let failures = self.quest_results.len() - successes;
        if successes >= 3 {
            self.set_state(GameState::Assassination);
            return;
        }
        if failures >= 3 {
            self.finish(Team::Evil, "Three quests failed");
            return;
        }
        self.quest += 1;
        self.log.set_round(self.quest + 1);
        self.log
            .push(EventKind::RoundStart, json!({ "quest": self.quest + 1 }));
        self.consecutive_rejections = 0;
        self.leader = (self.leader + 1) % self.n();
        self.current_team.clear();
        self.set_state(GameState::TeamSelection);
    }

    fn apply_assassination(&mut self, player: PlayerId, action: &Action) -> Result<(), GameError> {
        if action.kind != ActionKind::Eliminate {
            return Err(GameError::InvalidAction);
        }
        let target = action.target()?;
        if target >= self.n() || self.roles[target].team() != Team::Good {
            return Err(GameError::InvalidPlayerChoice);
        }
        self.log.push_player(
            player,
            EventKind::PlayerAction,
            json!({ "action": "assassinate", "target": target }),
        );
        if Some(target) == self.merlin() {
            self.finish(Team::Evil, "Assassin killed Merlin");
        } else {
            self.finish(Team::Good, "Three quests succeeded and Merlin survived");
        }
        Ok(())
    }

    fn finish(&mut self, winner: Team, reason: &str) {
        self.winner = Some(winner);
        self.win_reason = Some(reason.to_string());
        self.log.push(
            EventKind::GameEnd,
            json!({
                "winner": match winner {
                    Team::Good => "good",
                    Team::Evil => "evil",
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
        } else {
            (
                format!("Waiting for the {phase} phase to resolve."),
                vec![],
            )
        };
        let mut obs = if acting {
            Observation::act(player, phase, instruction)
        } else {
            Observation::observe(player, phase, instruction)
        };
        obs = obs.kind(if self.roles[player].team() == Team::Evil {
            ObsKind::Team
        } else {
            ObsKind::Private
        });
        obs = obs
            .with("quest", self.quest + 1)
            .with("leader", self.leader)
            .with("proposal_idx", self.proposal_idx)
            .with("round_idx", self.round_idx)
            .with("consecutive_rejections", self.consecutive_rejections)
            .with(
                "quest_size",
                quest_size(self.n(), self.quest),
            )
            .with("fails_needed", fails_needed(self.n(), self.quest))
            .with("your_role", serde_json::to_value(self.roles[player]).unwrap_or(Value::Null))
            .with(
                "your_team",
                serde_json::to_value(self.roles[player].team()).unwrap_or(Value::Null),
            )
            .with(
                "quest_results",
                Value::Array(
                    self.quest_results
                        .iter()
                        .map(|q| {
                            json!({
                                "quest": q.quest + 1,
                                "team": q.team,
                                "fails": q.fails,
                                "succeeded": q.succeeded,
                            })
                        })
                        .collect(),
                ),
            );
        if !self.current_team.is_empty() {
            obs = obs.with("current_team", self.current_team.clone());
        }
        if !self.discussion.is_empty() {
            obs = obs.with(
                "discussion",
                Value::Array(
                    self.discussion
                        .iter()
                        .map(|(p, s)| json!({ "player": p, "statement": s }))
                        .collect(),
                ),
            );
        }
        for (key, value) in self.role_knowledge(player) {
            obs.data.insert(key, value);
        }
        if !options.is_empty() {
            obs = obs.options(options);
        }
        obs
    }

    fn actor_prompt(&self, player: PlayerId) -> (String, Vec<Value>) {
        match &self.state {
            GameState::TeamSelection => {
                let size = quest_size(self.n(), self.quest);
                // Advertise a handful of candidate teams; free-form proposals
                // through the same action kind remain legal.
                let mut options = Vec::new();
                let others: Vec<PlayerId> = (0..self.n()).filter(|p| *p != self.leader).collect();
                for start in 0..others.len() {
                    let mut team = vec![self.leader];
                    team.extend(others.iter().cycle().skip(start).take(size - 1));
                    team.sort_unstable();
                    team.dedup();
                    if team.len() == size {
                        options.push(json!({ "kind": "propose_team", "team": team }));
                    }
                }
                (
                    format!("You lead quest {}. Propose a team of {size}.", self.quest + 1),
                    options,
                )
            }
            GameState::TeamDiscussion { .. } => (
                "Discuss the proposed team, or stay silent.".to_string(),
                vec![json!({ "kind": "speak" }), json!({ "kind": "skip" })],
            ),
            GameState::TeamVoting { .. } => (
                format!("Vote on the proposed team {:?}.", self.current_team),
                vec![
                    json!({ "kind": "vote", "vote": "approve" }),
                    json!({ "kind": "vote", "vote": "reject" }),
                ],
            ),
            GameState::QuestVoting { .. } => {
                let mut options = vec![json!({ "kind": "vote", "vote": "success" })];
                if self.roles[player].team() == Team::Evil {
                    options.push(json!({ "kind": "vote", "vote": "fail" }));
                }
                ("Cast your quest ballot.".to_string(), options)
            }
            GameState::Assassination => (
                "Three quests succeeded. Choose a good player to assassinate; if you find Merlin, evil wins.".to_string(),
                (0..self.n())
                    .filter(|p| self.roles[*p].team() == Team::Good)
                    .map(|p| option_with("eliminate", "target", p))
                    .collect(),
            ),
            GameState::GameOver => (String::new(), vec![]),
        }
    }
}

fn assign_roles(cfg: &AvalonConfig, rng: &mut impl rand::Rng) -> Result<Vec<Role>, GameError> {
    let n = cfg.n_players;
    let (num_good, num_evil) = team_composition(n);

    let mut good_roles = vec![Role::Merlin];
    if cfg.include_percival {
        good_roles.push(Role::Percival);
    }
    while good_roles.len() < num_good {
        good_roles.push(Role::Servant);
    }
    let mut evil_roles = vec![Role::Assassin];
    if cfg.include_morgana && evil_roles.len() < num_evil {
        evil_roles.push(Role::Morgana);
    }
    if cfg.include_mordred && evil_roles.len() < num_evil {
        evil_roles.push(Role::Mordred);
    }
    if cfg.include_oberon && evil_roles.len() < num_evil {
        evil_roles.push(Role::Oberon);
    }
    while evil_roles.len() < num_evil {
        evil_roles.push(Role::Minion);
    }

    if let Some(table) = &cfg.role_assignment {
        if table.good.len() != num_good || table.evil.len() != num_evil {
            return Err(GameError::rule(format!(
                "role assignment must list {num_good} good and {num_evil} evil seats"
            )));
        }
        let mut roles = vec![Role::Servant; n];
        for (seat, role) in table.good.iter().zip(good_roles) {
            if *seat >= n {
                return Err(GameError::InvalidPlayerIndex);
            }
            roles[*seat] = role;
        }
        for (seat, role) in table.evil.iter().zip(evil_roles) {
            if *seat >= n {
                return Err(GameError::InvalidPlayerIndex);
            }
            roles[*seat] = role;
        }
        return Ok(roles);
    }

    let mut roles: Vec<Role> = good_roles.into_iter().chain(evil_roles).collect();
    roles.shuffle(rng);
    Ok(roles)
}

impl Engine for Avalon {
    fn reset(&mut self) -> Observations {
        self.log.push(
            EventKind::GameStart,
            json!({
                "game": "avalon",
                "n_players": self.cfg.n_players,
                "seed": self.cfg.seed,
            }),
        );
        self.log.set_round(1);
        self.log.push(EventKind::RoundStart, json!({ "quest": 1 }));
        for p in 0..self.n() {
            let mut data = Map::new();
            data.insert(
                "role_assignment".to_string(),
                serde_json::to_value(self.roles[p]).unwrap_or(Value::Null),
            );
            for (key, value) in self.role_knowledge(p) {
                data.insert(key, value);
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
                    let won = self.roles[p].team() == winner;
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
                Team::Good => "good",
                Team::Evil => "evil",
            }
            .to_string()
        })
    }

    fn win_reason(&self) -> Option<String> {
        self.win_reason.clone()
    }

    fn force_terminate(&mut self) {
        if !self.terminal() {
            self.win_reason = Some("match exceeded the step bound".to_string());
            self.log.push(
                EventKind::GameEnd,
                json!({ "winner": Value::Null, "reason": "timeout" }),
            );
            self.set_state(GameState::GameOver);
        }
    }

    fn fallback_action(&self, player: PlayerId) -> Option<Action> {
        if !self.current_actors().contains(&player) {
            return None;
        }
        let action = match &self.state {
            GameState::TeamSelection => {
                let size = quest_size(self.n(), self.quest);
                let mut team = vec![self.leader];
                team.extend((0..self.n()).filter(|p| *p != self.leader).take(size - 1));
                Action::new(player, ActionKind::ProposeTeam).with(
                    "team",
                    Value::Array(team.into_iter().map(Value::from).collect()),
                )
            }
            GameState::TeamDiscussion { .. } => Action::new(player, ActionKind::Skip),
            GameState::TeamVoting { .. } => {
                Action::new(player, ActionKind::Vote).with("vote", "approve")
            }
            GameState::QuestVoting { .. } => {
                Action::new(player, ActionKind::Vote).with("vote", "success")
            }
            GameState::Assassination => {
                let target = (0..self.n()).find(|p| self.roles[*p].team() == Team::Good)?;
                Action::new(player, ActionKind::Eliminate).with("target", target)
            }
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
        self.quest + 1
    }

    fn player_stats(&self) -> BTreeMap<PlayerId, Value> {
        (0..self.n())
            .map(|p| {
                let won = self
                    .winner
                    .map(|w| self.roles[p].team() == w)
                    .unwrap_or(false);
                (
                    p,
                    json!({
                        "role": self.roles[p],
                        "team": self.roles[p].team(),
                        "won": won,
                    }),
                )
            })
            .collect()
    }
}
