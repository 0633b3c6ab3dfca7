//! Secret Hitler engine: elections, legislative sessions, presidential powers.

use crate::ballots::Ballots;
use crate::engine::{Engine, Observations, StepOutcome};
use crate::error::GameError;
use crate::event::{EventKind, GameLog};
use crate::types::{option_with, Action, ActionKind, ObsKind, Observation, PlayerId};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

mod test;

/// Rejections tolerated from a required actor before the engine substitutes
/// its own fallback.
const MAX_RETRIES: usize = 3;

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct SecretHitlerConfig {
    pub n_players: usize,
    #[serde(default)]
    pub seed: u64,
    /// Fixed role table from the tournament schedule, if any.
    #[serde(default)]
    pub role_assignment: Option<RoleAssignment>,
}

impl Default for SecretHitlerConfig {
    fn default() -> Self {
        Self {
            n_players: 5,
            seed: 0,
            role_assignment: None,
        }
    }
}

/// Fixed role table: which seats are liberal, which fascist, and which of the
/// fascists is Hitler (defaults to the first listed fascist).
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct RoleAssignment {
    pub liberals: Vec<PlayerId>,
    pub fascists: Vec<PlayerId>,
    #[serde(default)]
    pub hitler: Option<PlayerId>,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Liberal,
    Fascist,
    Hitler,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Liberal,
    Fascist,
}

impl Role {
    pub fn party(self) -> Party {
        match self {
            Role::Liberal => Party::Liberal,
            Role::Fascist | Role::Hitler => Party::Fascist,
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Policy {
    Liberal,
    Fascist,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
struct ShPlayer {
    role: Role,
    alive: bool,
    investigated: bool,
    confirmed_not_hitler: bool,
}

/// Policy draw pile plus discard pile. The draw pile is reshuffled from the
/// discard whenever fewer than three cards remain, so draws never fail while
/// the game is live.
#[derive(Clone, Serialize, Deserialize, Debug)]
struct Deck {
    draw: Vec<Policy>,
    discard: Vec<Policy>,
}

impl Deck {
    fn new(rng: &mut impl rand::Rng) -> Self {
        let mut draw: Vec<Policy> = std::iter::repeat(Policy::Liberal)
            .take(6)
            .chain(std::iter::repeat(Policy::Fascist).take(11))
            .collect();
        draw.shuffle(rng);
        Self {
            draw,
            discard: Vec::new(),
        }
    }

    fn check_shuffle(&mut self, rng: &mut impl rand::Rng) {
        if self.draw.len() < 3 {
            self.draw.append(&mut self.discard);
            self.draw.shuffle(rng);
        }
    }

    fn draw_one(&mut self) -> Policy {
        self.draw.pop().unwrap()
    }

    fn draw_three(&mut self) -> [Policy; 3] {
        let mut cards = [self.draw_one(), self.draw_one(), self.draw_one()];
        cards.reverse();
        cards
    }

    fn peek_three(&self) -> [Policy; 3] {
        let n = self.draw.len();
        [self.draw[n - 1], self.draw[n - 2], self.draw[n - 3]]
    }

    fn count(&self) -> usize {
        self.draw.len()
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum PresidentialPower {
    InvestigateLoyalty,
    CallSpecialElection,
    PolicyPeek,
    Execution,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
enum VetoStatus {
    CannotVeto,
    CanVeto,
    VetoDenied,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug)]
enum LegislativeTurn {
    /// President must discard one of three cards.
    President { cards: [Policy; 3] },
    /// Chancellor must enact one of two cards, or propose a veto.
    Chancellor { cards: [Policy; 2], veto: VetoStatus },
    /// Veto proposed and discussed; president must accept or reject.
    VetoRequested { cards: [Policy; 2] },
}

/// Current phase, carrying its transient buffers. Buffers are created at
/// phase entry and never survive the transition out.
#[derive(Clone, Serialize, Deserialize, Debug)]
enum GameState {
    Nomination,
    Discussion { order: Vec<PlayerId>, next: usize },
    Voting { votes: Ballots<bool> },
    Legislative { turn: LegislativeTurn },
    VetoDiscussion { order: Vec<PlayerId>, next: usize, cards: [Policy; 2] },
    ExecutivePower { power: PresidentialPower },
    GameOver,
}

/// A game of Secret Hitler, reworked as a benchmark engine: actions arrive in
/// batches from the match driver and every transition is recorded in the
/// per-match event log.
pub struct SecretHitler {
    cfg: SecretHitlerConfig,
    players: Vec<ShPlayer>,
    deck: Deck,
    liberal_policies: usize,
    fascist_policies: usize,
    election_tracker: usize,
    president: PlayerId,
    chancellor_nominee: Option<PlayerId>,
    /// The sitting government during a legislative session and its powers.
    government: Option<(PlayerId, PlayerId)>,
    last_government: Option<(PlayerId, PlayerId)>,
    /// Set by a chaos enactment: term limits do not apply to the next election.
    term_limits_waived: bool,
    /// Where the presidency resumes after a special election round.
    special_election_return: Option<PlayerId>,
    next_president: Option<PlayerId>,
    discussion: Vec<(PlayerId, String)>,
    state: GameState,
    round: usize,
    retries: BTreeMap<PlayerId, usize>,
    winner: Option<Party>,
    win_reason: Option<String>,
    rng: rand_chacha::ChaCha8Rng,
    log: GameLog,
}

impl SecretHitler {
    pub fn new(cfg: SecretHitlerConfig, log: GameLog) -> Result<Self, GameError> {
        if !(5..=10).contains(&cfg.n_players) {
            return Err(GameError::rule(format!(
                "Secret Hitler requires 5-10 players, got {}",
                cfg.n_players
            )));
        }
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(cfg.seed);
        let roles = assign_roles(&cfg, &mut rng)?;
        let players = roles
            .into_iter()
            .map(|role| ShPlayer {
                role,
                alive: true,
                investigated: false,
                confirmed_not_hitler: false,
            })
            .collect();
        let deck = Deck::new(&mut rng);
        Ok(Self {
            cfg,
            players,
            deck,
            liberal_policies: 0,
            fascist_policies: 0,
            election_tracker: 0,
            president: 0,
            chancellor_nominee: None,
            government: None,
            last_government: None,
            term_limits_waived: false,
            special_election_return: None,
            next_president: None,
            discussion: Vec::new(),
            state: GameState::Nomination,
            round: 0,
            retries: BTreeMap::new(),
            winner: None,
            win_reason: None,
            rng,
            log,
        })
    }

    fn phase_name(&self) -> &'static str {
        match self.state {
            GameState::Nomination => "election_nomination",
            GameState::Discussion { .. } => "election_discussion",
            GameState::Voting { .. } => "election_voting",
            GameState::Legislative { .. } => "legislative_session",
            GameState::VetoDiscussion { .. } => "veto_discussion",
            GameState::ExecutivePower { .. } => "presidential_power",
            GameState::GameOver => "game_over",
        }
    }

    fn set_state(&mut self, state: GameState) {
        let from = self.phase_name();
        self.state = state;
        self.retries.clear();
        let to = self.phase_name();
        self.log
            .push(EventKind::PhaseChange, json!({ "from": from, "to": to }));
    }

    fn alive_ids(&self) -> Vec<PlayerId> {
        (0..self.players.len())
            .filter(|p| self.players[*p].alive)
            .collect()
    }

    fn num_alive(&self) -> usize {
        self.players.iter().filter(|p| p.alive).count()
    }

    fn next_alive(&self, from: PlayerId) -> PlayerId {
        (from + 1..self.players.len())
            .chain(0..=from)
            .find(|p| self.players[*p].alive)
            .unwrap_or(from)
    }

    fn hitler(&self) -> PlayerId {
        self.players
            .iter()
            .position(|p| p.role == Role::Hitler)
            .unwrap_or(0)
    }

    fn veto_unlocked(&self) -> bool {
        self.fascist_policies >= 5
    }

    /// Living players eligible for the chancellorship under term limits.
    fn eligible_chancellors(&self) -> Vec<PlayerId> {
        self.alive_ids()
            .into_iter()
            .filter(|&p| {
                if p == self.president {
                    return false;
                }
                if self.term_limits_waived {
                    return true;
                }
                if let Some((last_president, last_chancellor)) = self.last_government {
                    if p == last_chancellor {
                        return false;
                    }
                    if self.num_alive() > 5 && p == last_president {
                        return false;
                    }
                }
                true
            })
            .collect()
    }

    /// Speaking order for a discussion: shuffled per-discussion with the
    /// match RNG.
    fn discussion_order(&mut self) -> Vec<PlayerId> {
        let mut order = self.alive_ids();
        order.shuffle(&mut self.rng);
        order
    }

    fn start_round(&mut self) {
        self.round += 1;
        self.log.set_round(self.round);
        self.chancellor_nominee = None;
        self.government = None;
        self.discussion.clear();
        self.president = match self.next_president.take() {
            Some(p) => p,
            None => match self.special_election_return.take() {
                Some(ret) => self.next_alive(ret),
                None => self.next_alive(self.president),
            },
        };
        self.log.push(
            EventKind::RoundStart,
            json!({ "round": self.round, "president": self.president }),
        );
        if self.election_tracker >= 3 {
            self.chaos_enactment();
            if self.terminal() {
                return;
            }
        }
        self.set_state(GameState::Nomination);
    }

    /// Three failed elections: the top policy is enacted with no presidential
    /// power, the tracker resets and term limits are waived.
    fn chaos_enactment(&mut self) {
        self.deck.check_shuffle(&mut self.rng);
        let policy = self.deck.draw_one();
        self.election_tracker = 0;
        self.term_limits_waived = true;
        self.last_government = None;
        self.enact_policy(policy, true);
    }

    fn enact_policy(&mut self, policy: Policy, chaos: bool) {
        match policy {
            Policy::Liberal => self.liberal_policies += 1,
            Policy::Fascist => self.fascist_policies += 1,
        }
        self.log.push(
            EventKind::PolicyEnacted,
            json!({
                "policy": policy,
                "chaos": chaos,
                "liberal_total": self.liberal_policies,
                "fascist_total": self.fascist_policies,
            }),
        );
        self.deck.check_shuffle(&mut self.rng);
        if self.liberal_policies >= 5 {
            self.finish(Party::Liberal, "Liberals enacted five liberal policies");
        } else if self.fascist_policies >= 6 {
            self.finish(Party::Fascist, "Fascists enacted six fascist policies");
        }
    }

    fn finish(&mut self, winner: Party, reason: &str) {
        self.winner = Some(winner);
        self.win_reason = Some(reason.to_string());
        self.log.push(
            EventKind::GameEnd,
            json!({
                "winner": match winner {
                    Party::Liberal => "liberals",
                    Party::Fascist => "fascists",
                },
                "reason": reason,
            }),
        );
        self.set_state(GameState::GameOver);
    }

    /// The power the enacted fascist policy unlocks, from the fixed
    /// player-count table.
    fn power_for(&self, fascist_count: usize) -> Option<PresidentialPower> {
        use PresidentialPower::*;
        match self.players.len() {
            5 | 6 => match fascist_count {
                3 => Some(PolicyPeek),
                4 | 5 => Some(Execution),
                _ => None,
            },
            7 | 8 => match fascist_count {
                2 => Some(InvestigateLoyalty),
                3 => Some(CallSpecialElection),
                4 | 5 => Some(Execution),
                _ => None,
            },
            9 | 10 => match fascist_count {
                1 | 2 => Some(InvestigateLoyalty),
                3 => Some(CallSpecialElection),
                4 | 5 => Some(Execution),
                _ => None,
            },
            _ => None,
        }
    }

    fn current_actors(&self) -> Vec<PlayerId> {
        match &self.state {
            GameState::Nomination => vec![self.president],
            GameState::Discussion { order, next } | GameState::VetoDiscussion { order, next, .. } => {
                order.get(*next).map(|p| vec![*p]).unwrap_or_default()
            }
            GameState::Voting { votes } => votes.pending(),
            GameState::Legislative { turn } => match turn {
                LegislativeTurn::President { .. } | LegislativeTurn::VetoRequested { .. } => {
                    vec![self.president]
                }
                LegislativeTurn::Chancellor { .. } => self
                    .government
                    .map(|(_, chancellor)| vec![chancellor])
                    .unwrap_or_default(),
            },
            GameState::ExecutivePower { .. } => vec![self.president],
            GameState::GameOver => vec![],
        }
    }

    /// Validates and applies one action. Any `Err` leaves the state unchanged.
    fn apply(&mut self, action: &Action) -> Result<(), GameError> {
        let player = action.player;
        if player >= self.players.len() {
            return Err(GameError::InvalidPlayerIndex);
        }
        if !self.players[player].alive {
            return Err(GameError::DeadPlayer);
        }
        if !self.current_actors().contains(&player) {
            return Err(GameError::NotToAct);
        }

        match &self.state {
            GameState::Nomination => self.apply_nomination(player, action),
            GameState::Discussion { .. } => self.apply_discussion(player, action, false),
            GameState::VetoDiscussion { .. } => self.apply_discussion(player, action, true),
            GameState::Voting { .. } => self.apply_vote(player, action),
            GameState::Legislative { turn } => match *turn {
                LegislativeTurn::President { cards } => self.apply_president_discard(action, cards),
                LegislativeTurn::Chancellor { cards, veto } => {
                    self.apply_chancellor_turn(action, cards, veto)
                }
                LegislativeTurn::VetoRequested { cards } => self.apply_veto_response(action, cards),
            },
            GameState::ExecutivePower { power } => self.apply_power(*power, action),
            GameState::GameOver => Err(GameError::InvalidAction),
        }
    }

    fn apply_nomination(&mut self, player: PlayerId, action: &Action) -> Result<(), GameError> {
        if action.kind != ActionKind::Nominate {
            return Err(GameError::InvalidAction);
        }
        let target = action.target()?;
        if !self.eligible_chancellors().contains(&target) {
            return Err(GameError::InvalidPlayerChoice);
        }
        self.chancellor_nominee = Some(target);
        self.log.push_player(
            player,
            EventKind::PlayerNominate,
            json!({ "president": player, "nominee": target }),
        );
        let order = self.discussion_order();
        self.set_state(GameState::Discussion { order, next: 0 });
        Ok(())
    }

    fn apply_discussion(
        &mut self,
        player: PlayerId,
        action: &Action,
        veto: bool,
    ) -> Result<(), GameError> {
        match action.kind {
            ActionKind::Speak => {
                let statement = action.str_field("statement")?.to_string();
                self.discussion.push((player, statement.clone()));
                self.log.push_player(
                    player,
                    EventKind::Discussion,
                    json!({
                        "statement": statement,
                        "context": if veto { "veto_discussion" } else { "nomination_discussion" },
                    }),
                );
            }
            ActionKind::Skip => {}
            _ => return Err(GameError::InvalidAction),
        }
        match &mut self.state {
            GameState::Discussion { order, next } => {
                *next += 1;
                if *next >= order.len() {
                    let votes = Ballots::new(self.players.len(), |p| self.players[p].alive);
                    self.set_state(GameState::Voting { votes });
                }
            }
            GameState::VetoDiscussion { order, next, cards } => {
                *next += 1;
                if *next >= order.len() {
                    let cards = *cards;
                    self.set_state(GameState::Legislative {
                        turn: LegislativeTurn::VetoRequested { cards },
                    });
                }
            }
            _ => unreachable!(),
        }
        Ok(())
    }

    fn apply_vote(&mut self, player: PlayerId, action: &Action) -> Result<(), GameError> {
        if action.kind != ActionKind::Vote {
            return Err(GameError::InvalidAction);
        }
        let ja = match action.str_field("vote")? {
            "ja" => true,
            "nein" => false,
            other => {
                return Err(GameError::MalformedAction(format!(
                    "vote must be 'ja' or 'nein', got '{other}'"
                )))
            }
        };
        let GameState::Voting { votes } = &mut self.state else {
            return Err(GameError::InvalidAction);
        };
        votes.cast(player, ja)?;
        self.log.push_private(
            player,
            EventKind::VoteCast,
            json!({ "vote": if ja { "ja" } else { "nein" } }),
        );
        let GameState::Voting { votes } = &self.state else {
            unreachable!()
        };
        if votes.complete() {
            self.resolve_election();
        }
        Ok(())
    }

    fn resolve_election(&mut self) {
        let GameState::Voting { votes } = &self.state else {
            return;
        };
        let ja = votes.count(|v| *v);
        let nein = votes.count(|v| !*v);
        let ballot_map: Map<String, Value> = votes
            .iter()
            .map(|(p, v)| (p.to_string(), Value::from(if *v { "ja" } else { "nein" })))
            .collect();
        let passed = ja > nein;
        let nominee = self.chancellor_nominee.unwrap_or(self.president);
        self.log.push(
            EventKind::ElectionResult,
            json!({
                "passed": passed,
                "ja": ja,
                "nein": nein,
                "president": self.president,
                "chancellor": nominee,
                "votes": ballot_map,
            }),
        );

        if passed {
            // Electing Hitler chancellor after three fascist policies ends
            // the game at once.
            if self.fascist_policies >= 3 {
                if self.players[nominee].role == Role::Hitler {
                    self.finish(Party::Fascist, "Hitler was elected chancellor");
                    return;
                }
                self.players[nominee].confirmed_not_hitler = true;
            }
            self.election_tracker = 0;
            self.term_limits_waived = false;
            self.government = Some((self.president, nominee));
            self.last_government = Some((self.president, nominee));
            self.deck.check_shuffle(&mut self.rng);
            let cards = self.deck.draw_three();
            self.set_state(GameState::Legislative {
                turn: LegislativeTurn::President { cards },
            });
        } else {
            self.election_tracker += 1;
            self.start_round();
        }
    }

    fn apply_president_discard(
        &mut self,
        action: &Action,
        cards: [Policy; 3],
    ) -> Result<(), GameError> {
        if action.kind != ActionKind::Discard {
            return Err(GameError::InvalidAction);
        }
        let idx = action.int_field("index")? as usize;
        if idx > 2 {
            return Err(GameError::MalformedAction("card index out of range".into()));
        }
        let remaining = match idx {
            0 => [cards[1], cards[2]],
            1 => [cards[0], cards[2]],
            _ => [cards[0], cards[1]],
        };
        self.deck.discard.push(cards[idx]);
        self.log.push_private(
            self.president,
            EventKind::PlayerAction,
            json!({ "action": "discard_policy", "discarded": cards[idx] }),
        );
        let veto = if self.veto_unlocked() {
            VetoStatus::CanVeto
        } else {
            VetoStatus::CannotVeto
        };
        self.set_state(GameState::Legislative {
            turn: LegislativeTurn::Chancellor {
                cards: remaining,
                veto,
            },
        });
        Ok(())
    }

    fn apply_chancellor_turn(
        &mut self,
        action: &Action,
        cards: [Policy; 2],
        veto: VetoStatus,
    ) -> Result<(), GameError> {
        match action.kind {
            ActionKind::Enact => {
                let idx = action.int_field("index")? as usize;
                if idx > 1 {
                    return Err(GameError::MalformedAction("card index out of range".into()));
                }
                self.deck.discard.push(cards[1 - idx]);
                let policy = cards[idx];
                self.enact_policy(policy, false);
                if self.terminal() {
                    return Ok(());
                }
                if policy == Policy::Fascist {
                    if let Some(power) = self.power_for(self.fascist_policies) {
                        self.begin_power(power);
                        return Ok(());
                    }
                }
                self.start_round();
                Ok(())
            }
            ActionKind::Veto => {
                if veto != VetoStatus::CanVeto {
                    return Err(GameError::rule("veto is not available"));
                }
                let chancellor = self.government.map(|(_, c)| c).unwrap_or(action.player);
                self.log.push_player(
                    chancellor,
                    EventKind::VetoProposed,
                    json!({ "chancellor": chancellor, "president": self.president }),
                );
                let order = self.discussion_order();
                self.set_state(GameState::VetoDiscussion {
                    order,
                    next: 0,
                    cards,
                });
                Ok(())
            }
            _ => Err(GameError::InvalidAction),
        }
    }

    fn apply_veto_response(&mut self, action: &Action, cards: [Policy; 2]) -> Result<(), GameError> {
        if action.kind != ActionKind::Veto {
            return Err(GameError::InvalidAction);
        }
        let accept = action.bool_field("accept")?;
        self.log.push_player(
            self.president,
            EventKind::VetoResponse,
            json!({ "accepted": accept }),
        );
        if accept {
            self.deck.discard.extend(cards);
            self.deck.check_shuffle(&mut self.rng);
            self.election_tracker += 1;
            self.start_round();
        } else {
            self.set_state(GameState::Legislative {
                turn: LegislativeTurn::Chancellor {
                    cards,
                    veto: VetoStatus::VetoDenied,
                },
            });
        }
        Ok(())
    }

    fn begin_power(&mut self, power: PresidentialPower) {
        self.log.push(
            EventKind::PresidentialPower,
            json!({ "power": power, "president": self.president }),
        );
        if power == PresidentialPower::PolicyPeek {
            // No choice to make; resolve immediately.
            let cards = self.deck.peek_three();
            self.log.push_private(
                self.president,
                EventKind::PresidentialPower,
                json!({ "power": power, "cards": cards }),
            );
            self.start_round();
            return;
        }
        self.set_state(GameState::ExecutivePower { power });
    }

    fn power_targets(&self, power: PresidentialPower) -> Vec<PlayerId> {
        self.alive_ids()
            .into_iter()
            .filter(|&p| p != self.president)
            .filter(|&p| power != PresidentialPower::InvestigateLoyalty || !self.players[p].investigated)
            .collect()
    }

    fn apply_power(&mut self, power: PresidentialPower, action: &Action) -> Result<(), GameError> {
        let expected = match power {
            PresidentialPower::InvestigateLoyalty => ActionKind::Investigate,
            PresidentialPower::CallSpecialElection => ActionKind::Nominate,
            PresidentialPower::Execution => ActionKind::Eliminate,
            PresidentialPower::PolicyPeek => return Err(GameError::InvalidAction),
        };
        if action.kind != expected {
            return Err(GameError::InvalidAction);
        }
        let target = action.target()?;
        if !self.power_targets(power).contains(&target) {
            return Err(GameError::InvalidPlayerChoice);
        }
        match power {
            PresidentialPower::InvestigateLoyalty => {
                self.players[target].investigated = true;
                self.log.push(
                    EventKind::PresidentialPower,
                    json!({ "power": power, "target": target }),
                );
                self.log.push_private(
                    self.president,
                    EventKind::InvestigationResult,
                    json!({ "target": target, "party": self.players[target].role.party() }),
                );
                self.start_round();
            }
            PresidentialPower::CallSpecialElection => {
                self.log.push(
                    EventKind::PresidentialPower,
                    json!({ "power": power, "target": target }),
                );
                self.special_election_return = Some(self.president);
                self.next_president = Some(target);
                self.start_round();
            }
            PresidentialPower::Execution => {
                self.players[target].alive = false;
                self.log.push(
                    EventKind::PlayerEliminated,
                    json!({ "player": target, "cause": "execution" }),
                );
                if self.players[target].role == Role::Hitler {
                    self.finish(Party::Liberal, "Hitler was executed");
                } else {
                    self.start_round();
                }
            }
            PresidentialPower::PolicyPeek => {}
        }
        Ok(())
    }

    fn obs_for(&self, player: PlayerId) -> Observation {
        let me = &self.players[player];
        let actors = self.current_actors();
        let acting = actors.contains(&player);
        let phase = self.phase_name();

        let (instruction, options): (String, Vec<Value>) = if !acting {
            (self.spectator_instruction(player), vec![])
        } else {
            self.actor_prompt(player)
        };

        let mut obs = if acting {
            Observation::act(player, phase, instruction)
        } else {
            Observation::observe(player, phase, instruction)
        };
        obs = obs.kind(if me.role.party() == Party::Fascist {
            ObsKind::RoleSpecific
        } else {
            ObsKind::Private
        });

        obs = obs
            .with("round", self.round)
            .with("president", self.president)
            .with("liberal_policies", self.liberal_policies)
            .with("fascist_policies", self.fascist_policies)
            .with("election_tracker", self.election_tracker)
            .with("veto_unlocked", self.veto_unlocked())
            .with("draw_pile", self.deck.count())
            .with(
                "alive_players",
                Value::Array(self.alive_ids().iter().map(|p| Value::from(*p)).collect()),
            )
            .with(
                "confirmed_not_hitler",
                Value::Array(
                    (0..self.players.len())
                        .filter(|p| self.players[*p].confirmed_not_hitler)
                        .map(Value::from)
                        .collect(),
                ),
            )
            .with("your_role", serde_json::to_value(me.role).unwrap_or(Value::Null))
            .with("your_party", serde_json::to_value(me.role.party()).unwrap_or(Value::Null));
        if let Some(nominee) = self.chancellor_nominee {
            obs = obs.with("chancellor_nominee", nominee);
        }
        if let Some((p, c)) = self.last_government {
            obs = obs.with("last_government", json!({ "president": p, "chancellor": c }));
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
        // Fascists know each other and which of them is Hitler.
        if me.role.party() == Party::Fascist {
            let team: Vec<Value> = (0..self.players.len())
                .filter(|p| self.players[*p].role.party() == Party::Fascist)
                .map(Value::from)
                .collect();
            obs = obs.with("fascist_team", Value::Array(team));
            obs = obs.with("hitler", self.hitler());
        }
        // Legislative hands are visible only to their holder.
        if let GameState::Legislative { turn } = &self.state {
            match turn {
                LegislativeTurn::President { cards } if player == self.president => {
                    obs = obs.with("your_hand", serde_json::to_value(cards.to_vec()).unwrap_or(Value::Null));
                }
                LegislativeTurn::Chancellor { cards, .. } | LegislativeTurn::VetoRequested { cards } => {
                    if Some(player) == self.government.map(|(_, c)| c) {
                        obs = obs.with("your_hand", serde_json::to_value(cards.to_vec()).unwrap_or(Value::Null));
                    }
                }
                _ => {}
            }
        }
        if !options.is_empty() {
            obs = obs.options(options);
        }
        obs
    }

    fn spectator_instruction(&self, player: PlayerId) -> String {
        if !self.players[player].alive && !self.terminal() {
            return "You are dead. You can only observe.".to_string();
        }
        match &self.state {
            GameState::GameOver => format!(
                "Game over: {}",
                self.win_reason.clone().unwrap_or_default()
            ),
            _ => format!("Waiting for the {} phase to resolve.", self.phase_name()),
        }
    }

    fn actor_prompt(&self, player: PlayerId) -> (String, Vec<Value>) {
        match &self.state {
            GameState::Nomination => (
                "You are president. Nominate a chancellor.".to_string(),
                self.eligible_chancellors()
                    .iter()
                    .map(|t| option_with("nominate", "target", *t))
                    .collect(),
            ),
            GameState::Discussion { .. } => (
                format!(
                    "Discuss the nomination of player {} before voting, or stay silent.",
                    self.chancellor_nominee.unwrap_or(self.president)
                ),
                vec![
                    json!({ "kind": "speak" }),
                    json!({ "kind": "skip" }),
                ],
            ),
            GameState::VetoDiscussion { .. } => (
                "The chancellor proposed a veto. Discuss, or stay silent.".to_string(),
                vec![
                    json!({ "kind": "speak" }),
                    json!({ "kind": "skip" }),
                ],
            ),
            GameState::Voting { .. } => (
                format!(
                    "Vote on the government: president {}, chancellor {}.",
                    self.president,
                    self.chancellor_nominee.unwrap_or(self.president)
                ),
                vec![
                    json!({ "kind": "vote", "vote": "ja" }),
                    json!({ "kind": "vote", "vote": "nein" }),
                ],
            ),
            GameState::Legislative { turn } => match turn {
                LegislativeTurn::President { .. } => (
                    "Discard one of the three policies; the rest pass to the chancellor.".to_string(),
                    (0..3).map(|i| option_with("discard", "index", i)).collect(),
                ),
                LegislativeTurn::Chancellor { veto, .. } => {
                    let mut options: Vec<Value> =
                        (0..2).map(|i| option_with("enact", "index", i)).collect();
                    if *veto == VetoStatus::CanVeto {
                        options.push(json!({ "kind": "veto" }));
                    }
                    ("Enact one of the two policies, or propose a veto.".to_string(), options)
                }
                LegislativeTurn::VetoRequested { .. } => (
                    "The chancellor wishes to veto this agenda. Accept or reject.".to_string(),
                    vec![
                        json!({ "kind": "veto", "accept": true }),
                        json!({ "kind": "veto", "accept": false }),
                    ],
                ),
            },
            GameState::ExecutivePower { power } => {
                let (verb, kind) = match power {
                    PresidentialPower::InvestigateLoyalty => ("investigate", "investigate"),
                    PresidentialPower::CallSpecialElection => ("appoint as the next president", "nominate"),
                    PresidentialPower::Execution => ("execute", "eliminate"),
                    PresidentialPower::PolicyPeek => ("peek", "skip"),
                };
                (
                    format!("Use your presidential power: choose a player to {verb}."),
                    self.power_targets(*power)
                        .iter()
                        .map(|t| option_with(kind, "target", *t))
                        .collect(),
                )
            }
            GameState::GameOver => (String::new(), vec![]),
        }
    }
}

fn assign_roles(
    cfg: &SecretHitlerConfig,
    rng: &mut impl rand::Rng,
) -> Result<Vec<Role>, GameError> {
    let n = cfg.n_players;
    if let Some(table) = &cfg.role_assignment {
        let mut roles = vec![Role::Liberal; n];
        let hitler = table
            .hitler
            .or_else(|| table.fascists.first().copied())
            .ok_or_else(|| GameError::rule("role assignment lists no fascists"))?;
        for &f in &table.fascists {
            if f >= n {
                return Err(GameError::InvalidPlayerIndex);
            }
            roles[f] = Role::Fascist;
        }
        if hitler >= n {
            return Err(GameError::InvalidPlayerIndex);
        }
        roles[hitler] = Role::Hitler;
        return Ok(roles);
    }
    // 5-6 players: 1 fascist + Hitler; 7-8: 2 + Hitler; 9-10: 3 + Hitler.
    let num_fascists = (n - 1) / 2 - 1;
    let mut order: Vec<usize> = (0..n).collect();
    order.shuffle(rng);
    let mut roles = vec![Role::Liberal; n];
    roles[order[0]] = Role::Hitler;
    for &p in order.iter().skip(1).take(num_fascists) {
        roles[p] = Role::Fascist;
    }
    Ok(roles)
}

impl Engine for SecretHitler {
    fn reset(&mut self) -> Observations {
        self.log.push(
            EventKind::GameStart,
            json!({
                "game": "secret_hitler",
                "n_players": self.cfg.n_players,
                "seed": self.cfg.seed,
            }),
        );
        for (p, player) in self.players.iter().enumerate() {
            self.log.push_private(
                p,
                EventKind::Info,
                json!({ "role_assignment": player.role }),
            );
        }
        self.round = 0;
        self.next_president = Some(0);
        self.start_round();
        self.observations()
    }

    fn observations(&self) -> Observations {
        (0..self.players.len()).map(|p| (p, self.obs_for(p))).collect()
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
                for (p, player) in self.players.iter().enumerate() {
                    let won = player.role.party() == winner;
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
                Party::Liberal => "liberals",
                Party::Fascist => "fascists",
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
            GameState::Nomination => Action::new(player, ActionKind::Nominate)
                .with("target", *self.eligible_chancellors().first()?),
            GameState::Discussion { .. } | GameState::VetoDiscussion { .. } => {
                Action::new(player, ActionKind::Skip)
            }
            GameState::Voting { .. } => Action::new(player, ActionKind::Vote).with("vote", "nein"),
            GameState::Legislative { turn } => match turn {
                LegislativeTurn::President { .. } => {
                    Action::new(player, ActionKind::Discard).with("index", 0)
                }
                LegislativeTurn::Chancellor { .. } => {
                    Action::new(player, ActionKind::Enact).with("index", 0)
                }
                LegislativeTurn::VetoRequested { .. } => {
                    Action::new(player, ActionKind::Veto).with("accept", false)
                }
            },
            GameState::ExecutivePower { power } => {
                let target = *self.power_targets(*power).first()?;
                let kind = match power {
                    PresidentialPower::InvestigateLoyalty => ActionKind::Investigate,
                    PresidentialPower::CallSpecialElection => ActionKind::Nominate,
                    PresidentialPower::Execution => ActionKind::Eliminate,
                    PresidentialPower::PolicyPeek => return None,
                };
                Action::new(player, kind).with("target", target)
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
        self.round
    }

    fn player_stats(&self) -> BTreeMap<PlayerId, Value> {
        self.players
            .iter()
            .enumerate()
            .map(|(p, player)| {
                let won = self
                    .winner
                    .map(|w| player.role.party() == w)
                    .unwrap_or(false);
                (
                    p,
                    json!({
                        "role": player.role,
                        "party": player.role.party(),
                        "alive": player.alive,
                        "won": won,
                    }),
                )
            })
            .collect()
    }
}
