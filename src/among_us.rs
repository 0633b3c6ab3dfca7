//! Among Us engine: spatial task play, kills, meetings and ejection votes.

use crate::ballots::Ballots;
use crate::engine::{Engine, Observations, StepOutcome};
use crate::error::GameError;
use crate::event::{EventKind, GameLog};
use crate::types::{option_with, Action, ActionKind, ObsKind, Observation, PlayerId};
use map::{ShipMap, SPAWN_ROOM};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};

pub mod map;
mod test;

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct AmongUsConfig {
    pub n_players: usize,
    #[serde(default)]
    pub seed: u64,
    #[serde(default = "default_impostors")]
    pub n_impostors: usize,
    #[serde(default = "default_tasks_per_player")]
    pub tasks_per_player: usize,
    /// Task-step cap; reaching it forces an impostor win.
    #[serde(default = "default_task_rounds")]
    pub max_task_rounds: usize,
    /// Rounds of statements per meeting.
    #[serde(default = "default_discussion_rounds")]
    pub max_discussion_rounds: usize,
    /// Task steps an impostor must wait between kills.
    #[serde(default = "default_kill_cooldown")]
    pub kill_cooldown: usize,
    /// Outer steps without statements before a discussion advances.
    #[serde(default = "default_idle_limit")]
    pub discussion_idle_limit: usize,
    /// Outer steps without ballots before non-voters auto-skip.
    #[serde(default = "default_idle_limit")]
    pub voting_idle_limit: usize,
    #[serde(default)]
    pub role_assignment: Option<RoleAssignment>,
}

fn default_impostors() -> usize {
    2
}

fn default_tasks_per_player() -> usize {
    3
}

fn default_task_rounds() -> usize {
    20
}

fn default_discussion_rounds() -> usize {
    3
}

fn default_kill_cooldown() -> usize {
    2
}

fn default_idle_limit() -> usize {
    3
}

impl Default for AmongUsConfig {
    fn default() -> Self {
        Self {
            n_players: 7,
            seed: 0,
            n_impostors: default_impostors(),
            tasks_per_player: default_tasks_per_player(),
            max_task_rounds: default_task_rounds(),
            max_discussion_rounds: default_discussion_rounds(),
            kill_cooldown: default_kill_cooldown(),
            discussion_idle_limit: default_idle_limit(),
            voting_idle_limit: default_idle_limit(),
            role_assignment: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct RoleAssignment {
    pub impostors: Vec<PlayerId>,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Crewmate,
    Impostor,
}

#[derive(Clone, Serialize, Debug)]
struct TaskAssignment {
    name: &'static str,
    room: &'static str,
    done: bool,
}

#[derive(Clone, Serialize, Debug)]
struct AuPlayer {
    role: Role,
    alive: bool,
    /// Dead and removed by vote, as opposed to a reportable corpse.
    ejected: bool,
    /// Current room; `None` once off the map (ejected, or a corpse cleared
    /// after a meeting).
    location: Option<&'static str>,
    tasks: Vec<TaskAssignment>,
    has_called_emergency: bool,
    kill_cooldown: usize,
}

impl AuPlayer {
    /// A reportable body: dead, not ejected, still in a room.
    fn is_corpse(&self) -> bool {
        !self.alive && !self.ejected && self.location.is_some()
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum MeetingBallot {
    Target(PlayerId),
    SkipVote,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
enum GameState {
    Task,
    Discussion {
        round_no: usize,
        spoken: HashSet<PlayerId>,
        idle_steps: usize,
    },
    Voting {
        votes: Ballots<MeetingBallot>,
        idle_steps: usize,
    },
    GameEnd,
}

pub struct AmongUs {
    cfg: AmongUsConfig,
    ship: ShipMap,
    players: Vec<AuPlayer>,
    round: usize,
    state: GameState,
    winner: Option<&'static str>,
    win_reason: Option<String>,
    rng: rand_chacha::ChaCha8Rng,
    log: GameLog,
}

impl AmongUs {
    pub fn new(cfg: AmongUsConfig, log: GameLog) -> Result<Self, GameError> {
        if !(4..=15).contains(&cfg.n_players) {
            return Err(GameError::rule(format!(
                "Among Us requires 4-15 players, got {}",
                cfg.n_players
            )));
        }
        if cfg.n_impostors == 0 || cfg.n_impostors * 2 >= cfg.n_players {
            return Err(GameError::rule(
                "impostors must number at least one and fewer than half the crew",
            ));
        }
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(cfg.seed);
        let ship = ShipMap::new();

        let mut roles = vec![Role::Crewmate; cfg.n_players];
        match &cfg.role_assignment {
            Some(table) => {
                for &i in &table.impostors {
                    if i >= cfg.n_players {
                        return Err(GameError::InvalidPlayerIndex);
                    }
                    roles[i] = Role::Impostor;
                }
            }
            None => {
                let mut order: Vec<usize> = (0..cfg.n_players).collect();
                order.shuffle(&mut rng);
                for &i in order.iter().take(cfg.n_impostors) {
                    roles[i] = Role::Impostor;
                }
            }
        }

        let task_pool = ship.all_tasks();
        let players = roles
            .into_iter()
            .map(|role| {
                let mut tasks = Vec::new();
                for _ in 0..cfg.tasks_per_player {
                    let (name, room) = task_pool[rng.gen_range(0..task_pool.len())];
                    tasks.push(TaskAssignment {
                        name,
                        room,
                        done: false,
                    });
                }
                AuPlayer {
                    role,
                    alive: true,
                    ejected: false,
                    location: Some(SPAWN_ROOM),
                    tasks,
                    has_called_emergency: false,
                    kill_cooldown: cfg.kill_cooldown,
                }
            })
            .collect();
        Ok(Self {
            cfg,
            ship,
            players,
            round: 0,
            state: GameState::Task,
            winner: None,
            win_reason: None,
            rng,
            log,
        })
    }

    fn n(&self) -> usize {
        self.players.len()
    }

    fn living(&self, pred: impl Fn(Role) -> bool) -> Vec<PlayerId> {
        (0..self.n())
            .filter(|p| self.players[*p].alive && pred(self.players[*p].role))
            .collect()
    }

    fn phase_name(&self) -> &'static str {
        match self.state {
            GameState::Task => "task",
            GameState::Discussion { .. } => "discussion",
            GameState::Voting { .. } => "voting",
            GameState::GameEnd => "game_end",
        }
    }

    fn set_state(&mut self, state: GameState) {
        let from = self.phase_name();
        self.state = state;
        self.log.push(
            EventKind::PhaseChange,
            json!({ "from": from, "to": self.phase_name() }),
        );
    }

    /// Completed crew tasks over total crew tasks.
    fn task_ratio(&self) -> f64 {
        let mut done = 0usize;
        let mut total = 0usize;
        for player in self.players.iter().filter(|p| p.role == Role::Crewmate) {
            total += player.tasks.len();
            done += player.tasks.iter().filter(|t| t.done).count();
        }
        if total == 0 {
            1.0
        } else {
            done as f64 / total as f64
        }
    }

    fn check_win(&mut self) -> bool {
        let impostors = self.living(|r| r == Role::Impostor).len();
        let crew = self.living(|r| r == Role::Crewmate).len();
        if self.task_ratio() >= 1.0 {
            self.finish("crewmates", "All tasks completed");
            return true;
        }
        if impostors == 0 {
            self.finish("crewmates", "All impostors ejected");
            return true;
        }
        if impostors >= crew {
            self.finish("impostors", "Impostors equal or outnumber crewmates");
            return true;
        }
        false
    }

    fn finish(&mut self, winner: &'static str, reason: &str) {
        self.winner = Some(winner);
        self.win_reason = Some(reason.to_string());
        self.log.push(
            EventKind::GameEnd,
            json!({ "winner": winner, "reason": reason, "rounds": self.round }),
        );
        self.set_state(GameState::GameEnd);
    }

    fn current_actors(&self) -> Vec<PlayerId> {
        match &self.state {
            GameState::Task => self.living(|_| true),
            GameState::Discussion { spoken, .. } => self
                .living(|_| true)
                .into_iter()
                .filter(|p| !spoken.contains(p))
                .collect(),
            GameState::Voting { votes, .. } => votes.pending(),
            GameState::GameEnd => vec![],
        }
    }

    /// Applies one task-phase batch in the fixed resolution order: moves,
    /// vents, kills against post-move positions, body reports, emergency
    /// calls, then task completions. Kills that end the game suppress any
    /// meeting from the same step.
    fn process_task_step(&mut self, actions: BTreeMap<PlayerId, Action>) {
        self.round += 1;
        self.log.set_round(self.round);

        for p in self.living(|r| r == Role::Impostor) {
            self.players[p].kill_cooldown = self.players[p].kill_cooldown.saturating_sub(1);
        }

        let mut by_kind: BTreeMap<ActionKind, Vec<&Action>> = BTreeMap::new();
        for (player, action) in &actions {
            if *player >= self.n() {
                continue;
            }
            if !self.players[*player].alive {
                self.log
                    .error(Some(*player), GameError::DeadPlayer.code(), "dead players cannot act");
                continue;
            }
            by_kind.entry(action.kind).or_default().push(action);
        }
        // (1) Moves.
        for action in by_kind.remove(&ActionKind::Move).unwrap_or_default() {
            if let Err(err) = self.apply_move(action) {
                self.log.error(Some(action.player), err.code(), &err.to_string());
            }
        }
        // (2) Vents.
        for action in by_kind.remove(&ActionKind::Vent).unwrap_or_default() {
            if let Err(err) = self.apply_vent(action) {
                self.log.error(Some(action.player), err.code(), &err.to_string());
            }
        }
        // (3) Kills, against post-move positions.
        for action in by_kind.remove(&ActionKind::Kill).unwrap_or_default() {
            if let Err(err) = self.apply_kill(action) {
                self.log.error(Some(action.player), err.code(), &err.to_string());
            }
        }
        // The immediate win check; if the game ends on kills, no meeting is
        // triggered even if a report was also submitted.
        if self.check_win() {
            return;
        }

        // (4) Body reports. The first valid report triggers the meeting.
        let mut meeting: Option<(PlayerId, &'static str)> = None;
        let mut report_made = false;
        for action in by_kind.remove(&ActionKind::Report).unwrap_or_default() {
            if meeting.is_some() {
                continue;
            }
            match self.validate_report(action) {
                Ok(body) => {
                    report_made = true;
                    meeting = Some((action.player, "body_report"));
                    self.log.push_player(
                        action.player,
                        EventKind::PlayerAction,
                        json!({ "action": "report_body", "body": body }),
                    );
                }
                Err(err) => {
                    self.log.error(Some(action.player), err.code(), &err.to_string());
                }
            }
        }
        // (5) Emergency calls; a report in the same step takes precedence.
        for action in by_kind.remove(&ActionKind::Emergency).unwrap_or_default() {
            if report_made {
                self.log.error(
                    Some(action.player),
                    "BODY_REPORT_PRECEDENCE",
                    "body report takes precedence",
                );
                continue;
            }
            if meeting.is_some() {
                continue;
            }
            match self.validate_emergency(action.player) {
                Ok(()) => {
                    self.players[action.player].has_called_emergency = true;
                    meeting = Some((action.player, "emergency"));
                    self.log.push_player(
                        action.player,
                        EventKind::PlayerAction,
                        json!({ "action": "emergency_meeting" }),
                    );
                }
                Err(err) => {
                    self.log.error(Some(action.player), err.code(), &err.to_string());
                }
            }
        }
        // (6) Task completions.
        for action in by_kind.remove(&ActionKind::CompleteTask).unwrap_or_default() {
            if let Err(err) = self.apply_task(action) {
                self.log.error(Some(action.player), err.code(), &err.to_string());
            }
        }
        // Anything else in a task step is a waiting no-op or a phase error.
        for (kind, actions) in by_kind {
            if kind == ActionKind::Skip {
                continue;
            }
            for action in actions {
                self.log.error(
                    Some(action.player),
                    GameError::InvalidAction.code(),
                    &format!("{:?} is not a task-phase action", kind),
                );
            }
        }

        if self.check_win() {
            return;
        }
        if let Some((caller, cause)) = meeting {
            self.begin_meeting(caller, cause);
            return;
        }
        if self.round >= self.cfg.max_task_rounds {
            self.finish("impostors", "Round limit reached");
        }
    }

    fn apply_move(&mut self, action: &Action) -> Result<(), GameError> {
        let player = action.player;
        let to = action.str_field("room")?;
        let from = self.players[player]
            .location
            .ok_or_else(|| GameError::rule("player is off the map"))?;
        let to = self
            .ship
            .canonical(to)
            .ok_or_else(|| GameError::MalformedAction(format!("unknown room '{to}'")))?;
        if !self.ship.corridor_adjacent(from, to) {
            return Err(GameError::rule(format!("MOVE_NOT_ADJACENT: {from} -> {to}")));
        }
        self.players[player].location = Some(to);
        self.log.push_private(
            player,
            EventKind::PlayerAction,
            json!({ "action": "move", "from": from, "to": to }),
        );
        Ok(())
    }

    fn apply_vent(&mut self, action: &Action) -> Result<(), GameError> {
        let player = action.player;
        if self.players[player].role != Role::Impostor {
            return Err(GameError::rule("only impostors can use vents"));
        }
        let to = action.str_field("room")?;
        let from = self.players[player]
            .location
            .ok_or_else(|| GameError::rule("player is off the map"))?;
        let to = self
            .ship
            .canonical(to)
            .ok_or_else(|| GameError::MalformedAction(format!("unknown room '{to}'")))?;
        if !self.ship.vent_adjacent(from, to) {
            return Err(GameError::rule(format!("VENT_NOT_ADJACENT: {from} -> {to}")));
        }
        self.players[player].location = Some(to);
        self.log.push_private(
            player,
            EventKind::PlayerAction,
            json!({ "action": "vent", "from": from, "to": to }),
        );
        Ok(())
    }

    fn apply_kill(&mut self, action: &Action) -> Result<(), GameError> {
        let killer = action.player;
        let target = action.target()?;
        if self.players[killer].role != Role::Impostor {
            return Err(GameError::rule("only impostors can kill"));
        }
        if self.players[killer].kill_cooldown > 0 {
            return Err(GameError::rule("KILL_ON_COOLDOWN"));
        }
        if target >= self.n() || target == killer {
            return Err(GameError::InvalidPlayerChoice);
        }
        if !self.players[target].alive {
            return Err(GameError::rule("TARGET_NOT_ALIVE"));
        }
        let killer_room = self.players[killer].location;
        if killer_room.is_none() || killer_room != self.players[target].location {
            return Err(GameError::rule("TARGET_DIFFERENT_ROOM"));
        }
        // The victim becomes a corpse where they stand.
        self.players[target].alive = false;
        self.players[killer].kill_cooldown = self.cfg.kill_cooldown;
        self.log.push_private(
            killer,
            EventKind::PlayerAction,
            json!({ "action": "kill", "target": target, "room": killer_room }),
        );
        Ok(())
    }

    fn validate_report(&self, action: &Action) -> Result<PlayerId, GameError> {
        let reporter = action.player;
        let room = self.players[reporter]
            .location
            .ok_or_else(|| GameError::rule("player is off the map"))?;
        let body = (0..self.n()).find(|p| {
            self.players[*p].is_corpse() && self.players[*p].location == Some(room)
        });
        body.ok_or_else(|| GameError::rule("NO_BODY_TO_REPORT"))
    }

    fn validate_emergency(&self, caller: PlayerId) -> Result<(), GameError> {
        if self.players[caller].has_called_emergency {
            return Err(GameError::rule("EMERGENCY_ALREADY_USED"));
        }
        if self.players[caller].location != Some(SPAWN_ROOM) {
            return Err(GameError::rule("EMERGENCY_NOT_IN_CAFETERIA"));
        }
        Ok(())
    }

    fn apply_task(&mut self, action: &Action) -> Result<(), GameError> {
        let player = action.player;
        let name = action.str_field("task")?;
        let room = self.players[player]
            .location
            .ok_or_else(|| GameError::rule("player is off the map"))?;
        let task = self.players[player]
            .tasks
            .iter_mut()
            .find(|t| t.name == name && !t.done)
            .ok_or_else(|| GameError::rule("TASK_NOT_ASSIGNED"))?;
        if task.room != room {
            return Err(GameError::rule(format!(
                "TASK_WRONG_ROOM: {name} belongs in {}",
                task.room
            )));
        }
        task.done = true;
        // Impostors mime their fake tasks; only crew work moves the bar.
        self.log.push_private(
            player,
            EventKind::PlayerAction,
            json!({ "action": "complete_task", "task": name, "room": room }),
        );
        Ok(())
    }

    fn begin_meeting(&mut self, caller: PlayerId, cause: &str) {
        self.log.push(
            EventKind::Info,
            json!({ "meeting": cause, "caller": caller }),
        );
        self.set_state(GameState::Discussion {
            round_no: 1,
            spoken: HashSet::new(),
            idle_steps: 0,
        });
    }

    /// Meeting teardown: everyone back to the Cafeteria, kill cooldowns
    /// reset, corpses cleared from the map.
    fn end_meeting(&mut self) {
        for player in &mut self.players {
            if player.alive {
                player.location = Some(SPAWN_ROOM);
            } else if !player.ejected {
                player.location = None;
            }
            if player.role == Role::Impostor {
                player.kill_cooldown = self.cfg.kill_cooldown;
            }
        }
        self.set_state(GameState::Task);
    }

    fn process_meeting_step(&mut self, actions: BTreeMap<PlayerId, Action>) {
        let mut progressed = false;
        for (player, action) in actions {
            if self.terminal() {
                return;
            }
            if player >= self.n() || !self.players[player].alive {
                self.log
                    .error(Some(player), GameError::DeadPlayer.code(), "dead players cannot act");
                continue;
            }
            let result = match &self.state {
                GameState::Discussion { .. } => self.apply_statement(player, &action),
                GameState::Voting { .. } => self.apply_meeting_vote(player, &action),
                _ => Err(GameError::InvalidAction),
            };
            match result {
                Ok(()) => progressed = true,
                Err(err) => self.log.error(Some(player), err.code(), &err.to_string()),
            }
        }
        if self.terminal() {
            return;
        }
        let n_living = self.living(|_| true).len();
        // Soft timeouts: a silent table advances, an absent electorate skips.
        match &mut self.state {
            GameState::Discussion { round_no, spoken, idle_steps } => {
                if progressed {
                    *idle_steps = 0;
                } else {
                    *idle_steps += 1;
                }
                if spoken.len() >= n_living {
                    *round_no += 1;
                    spoken.clear();
                }
                let round_no = *round_no;
                let idle = *idle_steps;
                if round_no > self.cfg.max_discussion_rounds
                    || idle >= self.cfg.discussion_idle_limit
                {
                    self.start_voting();
                }
            }
            GameState::Voting { votes, idle_steps } => {
                if progressed {
                    *idle_steps = 0;
                } else {
                    *idle_steps += 1;
                }
                if *idle_steps >= self.cfg.voting_idle_limit {
                    for p in votes.pending() {
                        let _ = votes.cast(p, MeetingBallot::SkipVote);
                    }
                }
                if votes.complete() {
                    self.resolve_votes();
                }
            }
            _ => {}
        }
    }

    fn apply_statement(&mut self, player: PlayerId, action: &Action) -> Result<(), GameError> {
        let GameState::Discussion { spoken, .. } = &mut self.state else {
            return Err(GameError::InvalidAction);
        };
        match action.kind {
            ActionKind::Speak => {
                if spoken.contains(&player) {
                    return Err(GameError::AlreadyActed);
                }
                let statement = action.str_field("statement")?.to_string();
                spoken.insert(player);
                self.log.push_player(
                    player,
                    EventKind::Discussion,
                    json!({ "statement": statement }),
                );
                Ok(())
            }
            ActionKind::Skip => {
                if spoken.contains(&player) {
                    return Err(GameError::AlreadyActed);
                }
                spoken.insert(player);
                Ok(())
            }
            _ => Err(GameError::InvalidAction),
        }
    }

    fn start_voting(&mut self) {
        let alive: Vec<bool> = self.players.iter().map(|p| p.alive).collect();
        let votes = Ballots::new(self.n(), |p| alive[p]);
        self.set_state(GameState::Voting {
            votes,
            idle_steps: 0,
        });
    }

    fn apply_meeting_vote(&mut self, player: PlayerId, action: &Action) -> Result<(), GameError> {
        let ballot = match action.kind {
            ActionKind::Vote => {
                let target = action.target()?;
                if target >= self.n() || target == player {
                    return Err(GameError::InvalidPlayerChoice);
                }
                if !self.players[target].alive {
                    return Err(GameError::rule("TARGET_NOT_ALIVE"));
                }
                MeetingBallot::Target(target)
            }
            ActionKind::Skip => MeetingBallot::SkipVote,
            _ => return Err(GameError::InvalidAction),
        };
        let GameState::Voting { votes, .. } = &mut self.state else {
            return Err(GameError::InvalidAction);
        };
        votes.cast(player, ballot)?;
        self.log.push_private(
            player,
            EventKind::VoteCast,
            json!({
                "vote": match ballot {
                    MeetingBallot::Target(t) => Value::from(t),
                    MeetingBallot::SkipVote => Value::from("skip"),
                },
            }),
        );
        Ok(())
    }

    /// Strictly-most-votes is ejected; the skip token winning or any tie
    /// means no ejection.
    fn resolve_votes(&mut self) {
        let GameState::Voting { votes, .. } = &self.state else {
            return;
        };
        let mut counts: BTreeMap<MeetingBallot, usize> = BTreeMap::new();
        for (_, ballot) in votes.iter() {
            *counts.entry(*ballot).or_insert(0) += 1;
        }
        let max_votes = counts.values().copied().max().unwrap_or(0);
        let leaders: Vec<MeetingBallot> = counts
            .iter()
            .filter(|(_, c)| **c == max_votes)
            .map(|(b, _)| *b)
            .collect();
        let ejected = match leaders.as_slice() {
            [MeetingBallot::Target(t)] => Some(*t),
            _ => None,
        };
        self.log.push(
            EventKind::ElectionResult,
            json!({
                "ejected": ejected,
                "votes_for_leader": max_votes,
                "tie": leaders.len() > 1,
            }),
        );
        if let Some(target) = ejected {
            self.players[target].alive = false;
            self.players[target].ejected = true;
            self.players[target].location = None;
            self.log.push(
                EventKind::PlayerEliminated,
                json!({ "player": target, "cause": "ejected" }),
            );
        }
        if self.check_win() {
            return;
        }
        self.end_meeting();
    }

    fn obs_for(&self, player: PlayerId) -> Observation {
        let me = &self.players[player];
        let acting = self.current_actors().contains(&player);
        let phase = self.phase_name();
        let (instruction, options) = if acting {
            self.actor_prompt(player)
        } else if !me.alive && !self.terminal() {
            ("You are dead. You can only observe.".to_string(), vec![])
        } else {
            (format!("Waiting for the {phase} phase to resolve."), vec![])
        };
        let mut obs = if acting {
            Observation::act(player, phase, instruction)
        } else {
            Observation::observe(player, phase, instruction)
        };
        obs = obs.kind(if me.role == Role::Impostor {
            ObsKind::Team
        } else {
            ObsKind::Private
        });
        obs = obs
            .with("round", self.round)
            .with("is_alive", me.alive)
            .with(
                "your_role",
                serde_json::to_value(me.role).unwrap_or(Value::Null),
            )
            .with("task_bar", self.task_ratio())
            .with(
                "alive_players",
                self.living(|_| true),
            )
            .with(
                "your_tasks",
                Value::Array(
                    me.tasks
                        .iter()
                        .map(|t| json!({ "task": t.name, "room": t.room, "done": t.done }))
                        .collect(),
                ),
            );
        if let Some(room) = me.location {
            let others: Vec<PlayerId> = (0..self.n())
                .filter(|p| {
                    *p != player
                        && self.players[*p].alive
                        && self.players[*p].location == Some(room)
                })
                .collect();
            let bodies: Vec<PlayerId> = (0..self.n())
                .filter(|p| self.players[*p].is_corpse() && self.players[*p].location == Some(room))
                .collect();
            obs = obs
                .with("room", room)
                .with("players_here", others)
                .with("bodies_here", bodies)
                .with("adjacent_rooms", self.ship.adjacent_rooms(room));
            if me.role == Role::Impostor {
                obs = obs
                    .with("vent_rooms", self.ship.vent_rooms(room))
                    .with("kill_cooldown", me.kill_cooldown);
            }
        }
        if me.role == Role::Impostor {
            obs = obs.with(
                "impostors",
                (0..self.n())
                    .filter(|p| self.players[*p].role == Role::Impostor)
                    .collect::<Vec<_>>(),
            );
        }
        if !options.is_empty() {
            obs = obs.options(options);
        }
        obs
    }

    fn actor_prompt(&self, player: PlayerId) -> (String, Vec<Value>) {
        let me = &self.players[player];
        match &self.state {
            GameState::Task => {
                let mut options = vec![json!({ "kind": "skip" })];
                if let Some(room) = me.location {
                    for adj in self.ship.adjacent_rooms(room) {
                        options.push(option_with("move", "room", adj));
                    }
                    for task in me.tasks.iter().filter(|t| !t.done && t.room == room) {
                        options.push(option_with("complete_task", "task", task.name));
                    }
                    let has_body = (0..self.n()).any(|p| {
                        self.players[p].is_corpse() && self.players[p].location == Some(room)
                    });
                    if has_body {
                        options.push(json!({ "kind": "report" }));
                    }
                    if room == SPAWN_ROOM && !me.has_called_emergency {
                        options.push(json!({ "kind": "emergency" }));
                    }
                    if me.role == Role::Impostor {
                        for vent in self.ship.vent_rooms(room) {
                            options.push(option_with("vent", "room", vent));
                        }
                        if me.kill_cooldown == 0 {
                            for target in (0..self.n()).filter(|p| {
                                *p != player
                                    && self.players[*p].alive
                                    && self.players[*p].location == Some(room)
                            }) {
                                options.push(option_with("kill", "target", target));
                            }
                        }
                    }
                }
                (
                    "Task phase: move, do tasks, or act on what you find.".to_string(),
                    options,
                )
            }
            GameState::Discussion { .. } => (
                "Discussion: make one statement this round, or stay silent.".to_string(),
                vec![json!({ "kind": "speak" }), json!({ "kind": "skip" })],
            ),
            GameState::Voting { .. } => {
                let mut options: Vec<Value> = self
                    .living(|_| true)
                    .into_iter()
                    .filter(|p| *p != player)
                    .map(|p| option_with("vote", "target", p))
                    .collect();
                options.push(json!({ "kind": "skip" }));
                (
                    "Voting: name the impostor, or skip for no ejection.".to_string(),
                    options,
                )
            }
            GameState::GameEnd => (String::new(), vec![]),
        }
    }
}

impl Engine for AmongUs {
    fn reset(&mut self) -> Observations {
        self.log.push(
            EventKind::GameStart,
            json!({
                "game": "among_us",
                "n_players": self.cfg.n_players,
                "n_impostors": self.living(|r| r == Role::Impostor).len(),
                "seed": self.cfg.seed,
            }),
        );
        self.log.set_round(1);
        self.log.push(EventKind::RoundStart, json!({ "round": 1 }));
        for p in 0..self.n() {
            let mut data = serde_json::Map::new();
            data.insert(
                "role_assignment".to_string(),
                serde_json::to_value(self.players[p].role).unwrap_or(Value::Null),
            );
            if self.players[p].role == Role::Impostor {
                data.insert(
                    "impostors".to_string(),
                    serde_json::to_value(self.living(|r| r == Role::Impostor))
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
        if !self.terminal() {
            if matches!(self.state, GameState::Task) {
                self.process_task_step(actions);
            } else {
                self.process_meeting_step(actions);
            }
        }
        let done = self.terminal();
        let mut outcome = StepOutcome::new(self.observations(), done);
        outcome
            .info
            .insert("task_bar".to_string(), Value::from(self.task_ratio()));
        if done {
            if let Some(winner) = self.winner {
                for p in 0..self.n() {
                    let won = match winner {
                        "impostors" => self.players[p].role == Role::Impostor,
                        _ => self.players[p].role == Role::Crewmate,
                    };
                    outcome.rewards.insert(p, if won { 1.0 } else { 0.0 });
                }
            }
        }
        outcome
    }

    fn terminal(&self) -> bool {
        matches!(self.state, GameState::GameEnd)
    }

    fn winner(&self) -> Option<String> {
        self.winner.map(|w| w.to_string())
    }

    fn win_reason(&self) -> Option<String> {
        self.win_reason.clone()
    }

    fn force_terminate(&mut self) {
        if !self.terminal() {
            self.finish("impostors", "Round limit reached");
            self.win_reason = Some("match exceeded the step bound".to_string());
        }
    }

    fn fallback_action(&self, player: PlayerId) -> Option<Action> {
        if !self.current_actors().contains(&player) {
            return None;
        }
        Some(Action::new(player, ActionKind::Skip))
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
                let me = &self.players[p];
                let won = self
                    .winner
                    .map(|w| match w {
                        "impostors" => me.role == Role::Impostor,
                        _ => me.role == Role::Crewmate,
                    })
                    .unwrap_or(false);
                (
                    p,
                    json!({
                        "role": me.role,
                        "alive": me.alive,
                        "ejected": me.ejected,
                        "tasks_done": me.tasks.iter().filter(|t| t.done).count(),
                        "won": won,
                    }),
                )
            })
            .collect()
    }
}
