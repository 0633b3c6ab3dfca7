//! Spyfall engine: structured Q&A, one-shot accusations, the spy's gamble.

use crate::ballots::Ballots;
use crate::engine::{Engine, Observations, StepOutcome};
use crate::error::GameError;
use crate::event::{EventKind, GameLog};
use crate::types::{option_with, Action, ActionKind, ObsKind, Observation, PlayerId};
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};


const MAX_RETRIES: usize = 3;

/// The fixed location deck with the roles dealt at each location.
pub const LOCATIONS: &[(&str, [&str; 7])] = &[
    ("Lunar Base", ["Commander", "Engineer", "Pilot", "Scientist", "Medic", "Navigator", "Technician"]),
    ("Space Station", ["Captain", "Engineer", "Communications Officer", "Biologist", "Security Chief", "Maintenance Worker", "Diplomat"]),
    ("Alien Laboratory", ["Head Scientist", "Research Assistant", "Test Subject", "Xenobiologist", "Lab Technician", "Security Guard", "Janitor"]),
    ("Time Machine", ["Inventor", "Time Traveler", "Historian", "Mechanic", "Security Agent", "Tourist", "Accident Victim"]),
    ("Robot Factory", ["Lead Engineer", "Assembly Worker", "Quality Inspector", "Designer", "Maintenance Tech", "Security Officer", "Delivery Driver"]),
    ("Leonardo's Studio", ["Master Artist", "Apprentice", "Wealthy Patron", "Portrait Model", "Inventor", "Curious Visitor", "Art Restorer"]),
    ("The Shaolin Temple", ["Grand Master", "Young Monk", "Temple Cook", "Martial Arts Student", "Herbalist", "Temple Guardian", "Pilgrim"]),
    ("Roman Senate", ["Senator", "Emperor", "Consul", "Scribe", "Guard", "Citizen", "Foreign Ambassador"]),
    ("Medieval Castle", ["King", "Knight", "Court Jester", "Cook", "Blacksmith", "Servant", "Visiting Noble"]),
    ("Ancient Library", ["Head Librarian", "Scholar", "Scribe", "Book Collector", "Student", "Guard", "Cleaning Staff"]),
    ("Western Saloon", ["Bartender", "Gambler", "Piano Player", "Sheriff", "Outlaw", "Gold Prospector", "Saloon Girl"]),
    ("Pirate Ship", ["Captain", "First Mate", "Navigator", "Ship's Cook", "Gunner", "Cabin Boy", "Prisoner"]),
    ("Desert Oasis", ["Caravan Leader", "Desert Guide", "Merchant", "Traveler", "Water Bearer", "Nomad", "Lost Wanderer"]),
    ("Mountain Cabin", ["Hermit", "Hunter", "Park Ranger", "Hiker", "Survivalist", "Wildlife Photographer", "Lost Tourist"]),
    ("Submarine", ["Captain", "Sonar Operator", "Engineer", "Cook", "Torpedo Specialist", "Communications Officer", "Mechanic"]),
    ("Corporate Office", ["CEO", "Manager", "Accountant", "Secretary", "IT Specialist", "Security Guard", "Janitor"]),
    ("Shopping Mall", ["Store Manager", "Cashier", "Security Guard", "Shopper", "Food Court Worker", "Maintenance Person", "Lost Child"]),
    ("Airport", ["Pilot", "Flight Attendant", "Air Traffic Controller", "Security Officer", "Baggage Handler", "Passenger", "Customs Agent"]),
    ("Hospital", ["Doctor", "Nurse", "Surgeon", "Patient", "Receptionist", "Ambulance Driver", "Hospital Administrator"]),
    ("University Campus", ["Professor", "Student", "Dean", "Librarian", "Campus Security", "Maintenance Worker", "Visiting Lecturer"]),
    ("Movie Theater", ["Projectionist", "Ticket Taker", "Concession Worker", "Movie Director", "Actor", "Audience Member", "Janitor"]),
    ("Casino", ["Dealer", "Pit Boss", "Security Guard", "High Roller", "Cocktail Waitress", "Slot Machine Technician", "Comp Host"]),
    ("Sports Stadium", ["Coach", "Star Player", "Referee", "Sports Announcer", "Concession Worker", "Stadium Security", "Enthusiastic Fan"]),
    ("Beach Resort", ["Resort Manager", "Lifeguard", "Beach Volleyball Player", "Tourist", "Bartender", "Hotel Maid", "Surf Instructor"]),
    ("Art Gallery", ["Gallery Owner", "Curator", "Famous Artist", "Art Critic", "Security Guard", "Visitor", "Art Student"]),
    ("Wizard Tower", ["Archmage", "Apprentice Wizard", "Familiar", "Spellbook Collector", "Tower Guardian", "Magic Student", "Enchanted Servant"]),
    ("Dragon's Lair", ["Ancient Dragon", "Dragon Hunter", "Treasure Seeker", "Captured Knight", "Dragon Keeper", "Brave Rescuer", "Greedy Thief"]),
    ("Enchanted Forest", ["Forest Guardian", "Woodland Elf", "Lost Traveler", "Herbalist", "Magical Creature", "Fairy", "Nature Spirit"]),
    ("Crystal Cave", ["Crystal Miner", "Cave Explorer", "Geologist", "Crystal Collector", "Cave Guide", "Treasure Hunter", "Lost Spelunker"]),
    ("Magic Academy", ["Headmaster", "Magic Teacher", "Talented Student", "School Librarian", "Groundskeeper", "Visiting Dignitary", "New Recruit"]),
];

pub fn location_names() -> Vec<&'static str> {
    LOCATIONS.iter().map(|(name, _)| *name).collect()
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct SpyfallConfig {
    pub n_players: usize,
    #[serde(default)]
    pub seed: u64,
    /// Q&A turn budget; each question and each answer consumes one turn.
    #[serde(default = "default_max_turns")]
    pub max_turns: usize,
    /// The player who asks first.
    #[serde(default)]
    pub dealer_index: usize,
    #[serde(default)]
    pub role_assignment: Option<RoleAssignment>,
}

fn default_max_turns() -> usize {
    24
}

impl Default for SpyfallConfig {
    fn default() -> Self {
        Self {
            n_players: 5,
            seed: 0,
            max_turns: default_max_turns(),
            dealer_index: 0,
            role_assignment: None,
        }
    }
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct RoleAssignment {
    pub spy: PlayerId,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
struct QaPair {
    turn: usize,
    asker: PlayerId,
    answerer: PlayerId,
    question: String,
    answer: String,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
enum GameState {
    QandA,
    AccusationVote {
        accuser: PlayerId,
        suspect: PlayerId,
        votes: Ballots<bool>,
    },
    FinalVote {
        next_nominator: usize,
        suspect: Option<PlayerId>,
        votes: Option<Ballots<bool>>,
        tried: HashSet<PlayerId>,
    },
    /// The identified spy gets one shot at naming the location.
    SpyGuess,
    GameOver,
}

pub struct Spyfall {
    cfg: SpyfallConfig,
    location: String,
    spy: PlayerId,
    /// Role at the location for each non-spy seat.
    roles: Vec<Option<String>>,
    turn: usize,
    current_asker: PlayerId,
    /// The question on the floor: `(asker, answerer, question)`.
    pending_question: Option<(PlayerId, PlayerId, String)>,
    /// The previous asker, who cannot immediately be asked back.
    cannot_ask_back: Option<PlayerId>,
    accusation_used: Vec<bool>,
    spy_guess_used: bool,
    /// Once any accusation has been initiated the spy's voluntary guess is off.
    accusation_started: bool,
    qa_history: Vec<QaPair>,
    state: GameState,
    retries: BTreeMap<PlayerId, usize>,
    winner: Option<&'static str>,
    win_reason: Option<String>,
    scores: BTreeMap<PlayerId, i64>,
    rng: rand_chacha::ChaCha8Rng,
    log: GameLog,
}

impl Spyfall {
    pub fn new(cfg: SpyfallConfig, log: GameLog) -> Result<Self, GameError> {
        if !(3..=12).contains(&cfg.n_players) {
            return Err(GameError::rule(format!(
                "Spyfall requires 3-12 players, got {}",
                cfg.n_players
            )));
        }
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(cfg.seed);
        let (name, role_pool) = LOCATIONS[rng.gen_range(0..LOCATIONS.len())];
        let spy = match &cfg.role_assignment {
            Some(table) => {
                if table.spy >= cfg.n_players {
                    return Err(GameError::InvalidPlayerIndex);
                }
                table.spy
            }
            None => rng.gen_range(0..cfg.n_players),
        };
        let roles = (0..cfg.n_players)
            .map(|p| {
                (p != spy).then(|| role_pool[rng.gen_range(0..role_pool.len())].to_string())
            })
            .collect();
        let dealer = cfg.dealer_index.min(cfg.n_players - 1);
        Ok(Self {
            accusation_used: vec![false; cfg.n_players],
            cfg,
            location: name.to_string(),
            spy,
            roles,
            turn: 0,
            current_asker: dealer,
            pending_question: None,
            cannot_ask_back: None,
            spy_guess_used: false,
            accusation_started: false,
            qa_history: Vec::new(),
            state: GameState::QandA,
            retries: BTreeMap::new(),
            winner: None,
            win_reason: None,
            scores: BTreeMap::new(),
            rng,
            log,
        })
    }

    fn n(&self) -> usize {
        self.cfg.n_players
    }

    fn phase_name(&self) -> &'static str {
        match self.state {
            GameState::QandA => "qanda",
            GameState::AccusationVote { .. } => "accusation_vote",
            GameState::FinalVote { .. } => "final_vote",
            GameState::SpyGuess => "spy_guess",
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

    /// Whether this player may stop the clock with their one-shot ability
    /// (accusation for non-spies, location guess for the spy).
    fn one_shot_options(&self, player: PlayerId) -> Vec<Value> {
        let mut options = Vec::new();
        if player != self.spy && !self.accusation_used[player] {
            for suspect in (0..self.n()).filter(|s| *s != player) {
                options.push(option_with("accuse", "target", suspect));
            }
        }
        if player == self.spy && !self.spy_guess_used && !self.accusation_started {
            for (name, _) in LOCATIONS {
                options.push(option_with("guess_location", "location", *name));
            }
        }
        options
    }

    fn current_actors(&self) -> Vec<PlayerId> {
        match &self.state {
            GameState::QandA => match &self.pending_question {
                Some((_, answerer, _)) => vec![*answerer],
                None => vec![self.current_asker],
            },
            GameState::AccusationVote { votes, .. } => votes.pending(),
            GameState::FinalVote {
                next_nominator,
                suspect,
                votes,
                ..
            } => match (suspect, votes) {
                (Some(_), Some(votes)) => votes.pending(),
                _ => (0..self.n())
                    .nth(*next_nominator)
                    .map(|p| vec![p])
                    .unwrap_or_default(),
            },
            GameState::SpyGuess => vec![self.spy],
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
            GameState::QandA => self.apply_qanda(player, action),
            GameState::AccusationVote { .. } => self.apply_accusation_vote(player, action),
            GameState::FinalVote { .. } => self.apply_final_vote(player, action),
            GameState::SpyGuess => self.apply_spy_guess(player, action, true),
            GameState::GameOver => Err(GameError::InvalidAction),
        }
    }

    fn apply_qanda(&mut self, player: PlayerId, action: &Action) -> Result<(), GameError> {
        match action.kind {
            ActionKind::Ask => {
                if self.pending_question.is_some() {
                    return Err(GameError::InvalidAction);
                }
                let target = action.target()?;
                let question = action.str_field("question")?.to_string();
                if target >= self.n() || target == player {
                    return Err(GameError::InvalidPlayerChoice);
                }
                // No immediate ping-pong with whoever just asked you.
                if Some(target) == self.cannot_ask_back {
                    return Err(GameError::rule("cannot ask back the player who just asked you"));
                }
                self.turn += 1;
                self.log.push_player(
                    player,
                    EventKind::Discussion,
                    json!({ "qa": "question", "target": target, "question": question, "turn": self.turn }),
                );
                self.pending_question = Some((player, target, question));
                Ok(())
            }
            ActionKind::Answer => {
                let Some((asker, answerer, question)) = self.pending_question.take() else {
                    return Err(GameError::InvalidAction);
                };
                if player != answerer {
                    self.pending_question = Some((asker, answerer, question));
                    return Err(GameError::NotToAct);
                }
                let answer = action.str_field("answer")?.to_string();
                self.turn += 1;
                self.log.push_player(
                    player,
                    EventKind::Discussion,
                    json!({ "qa": "answer", "asker": asker, "answer": answer, "turn": self.turn }),
                );
                self.qa_history.push(QaPair {
                    turn: self.turn,
                    asker,
                    answerer,
                    question,
                    answer,
                });
                // The answerer takes the floor; the old asker is shielded.
                self.cannot_ask_back = Some(asker);
                self.current_asker = answerer;
                if self.turn >= self.cfg.max_turns {
                    self.begin_final_vote();
                }
                Ok(())
            }
            ActionKind::Accuse => self.apply_accuse(player, action),
            ActionKind::GuessLocation => self.apply_spy_guess(player, action, false),
            _ => Err(GameError::InvalidAction),
        }
    }

    fn apply_accuse(&mut self, player: PlayerId, action: &Action) -> Result<(), GameError> {
        if player == self.spy {
            return Err(GameError::rule("the spy cannot accuse"));
        }
        if self.accusation_used[player] {
            return Err(GameError::rule("accusation already used"));
        }
        let suspect = action.target()?;
        if suspect >= self.n() || suspect == player {
            return Err(GameError::InvalidPlayerChoice);
        }
        self.accusation_used[player] = true;
        self.accusation_started = true;
        self.log.push_player(
            player,
            EventKind::PlayerAction,
            json!({ "action": "accuse", "suspect": suspect }),
        );
        let votes = Ballots::new(self.n(), |p| p != suspect);
        self.set_state(GameState::AccusationVote {
            accuser: player,
            suspect,
            votes,
        });
        Ok(())
    }

    fn apply_accusation_vote(&mut self, player: PlayerId, action: &Action) -> Result<(), GameError> {
        if action.kind != ActionKind::Vote {
            return Err(GameError::InvalidAction);
        }
        let yes = action.bool_field("yes")?;
        let GameState::AccusationVote { votes, .. } = &mut self.state else {
            return Err(GameError::InvalidAction);
        };
        votes.cast(player, yes)?;
        self.log
            .push_private(player, EventKind::VoteCast, json!({ "vote": yes }));
        let GameState::AccusationVote { votes, suspect, accuser } = &self.state else {
            unreachable!()
        };
        if votes.complete() {
            let unanimous = votes.count(|v| !*v) == 0;
            let (suspect, accuser) = (*suspect, *accuser);
            self.log.push(
                EventKind::ElectionResult,
                json!({
                    "accusation": true,
                    "accuser": accuser,
                    "suspect": suspect,
                    "unanimous": unanimous,
                }),
            );
            if unanimous {
                if suspect == self.spy {
                    self.finish("non_spies", "Spy was identified", false);
                } else {
                    self.finish("spy", "An innocent player was accused", false);
                }
            } else if self.turn < self.cfg.max_turns {
                self.set_state(GameState::QandA);
            } else {
                self.begin_final_vote();
            }
        }
        Ok(())
    }

    fn begin_final_vote(&mut self) {
        self.accusation_started = true;
        self.set_state(GameState::FinalVote {
            next_nominator: 0,
            suspect: None,
            votes: None,
            tried: HashSet::new(),
        });
    }

    fn apply_final_vote(&mut self, player: PlayerId, action: &Action) -> Result<(), GameError> {
        let GameState::FinalVote { suspect, .. } = &self.state else {
            return Err(GameError::InvalidAction);
        };
        if suspect.is_none() {
            // Nomination turn.
            if action.kind != ActionKind::Nominate {
                return Err(GameError::InvalidAction);
            }
            let target = action.target()?;
            let GameState::FinalVote { suspect, votes, tried, .. } = &mut self.state else {
                unreachable!()
            };
            if target >= self.cfg.n_players || target == player || tried.contains(&target) {
                return Err(GameError::InvalidPlayerChoice);
            }
            tried.insert(target);
            *suspect = Some(target);
            *votes = Some(Ballots::new(self.cfg.n_players, |p| p != target));
            self.log.push_player(
                player,
                EventKind::PlayerNominate,
                json!({ "suspect": target }),
            );
            return Ok(());
        }

        if action.kind != ActionKind::Vote {
            return Err(GameError::InvalidAction);
        }
        let yes = action.bool_field("yes")?;
        let GameState::FinalVote { votes: Some(votes), .. } = &mut self.state else {
            return Err(GameError::InvalidAction);
        };
        votes.cast(player, yes)?;
        self.log
            .push_private(player, EventKind::VoteCast, json!({ "vote": yes }));
        let GameState::FinalVote { votes: Some(votes), suspect: Some(suspect), .. } = &self.state
        else {
            unreachable!()
        };
        if votes.complete() {
            let yes_count = votes.count(|v| *v);
            let majority = yes_count * 2 > votes.total_eligible();
            let suspect = *suspect;
            self.log.push(
                EventKind::ElectionResult,
                json!({ "final_vote": true, "suspect": suspect, "yes": yes_count, "passed": majority }),
            );
            if majority {
                if suspect == self.spy {
                    // The cornered spy still gets one shot at the location.
                    self.set_state(GameState::SpyGuess);
                } else {
                    self.finish("spy", "The group accused an innocent player", false);
                }
            } else {
                let GameState::FinalVote { suspect, votes, next_nominator, .. } = &mut self.state
                else {
                    unreachable!()
                };
                *suspect = None;
                *votes = None;
                *next_nominator += 1;
                if *next_nominator >= self.cfg.n_players {
                    self.finish("spy", "Spy was not identified", false);
                }
            }
        }
        Ok(())
    }

    fn apply_spy_guess(
        &mut self,
        player: PlayerId,
        action: &Action,
        identified: bool,
    ) -> Result<(), GameError> {
        if action.kind != ActionKind::GuessLocation {
            return Err(GameError::InvalidAction);
        }
        if player != self.spy {
            return Err(GameError::rule("only the spy can guess the location"));
        }
        if !identified {
            if self.spy_guess_used {
                return Err(GameError::rule("location guess already used"));
            }
            if self.accusation_started {
                return Err(GameError::rule(
                    "the guess is blocked once an accusation has been initiated",
                ));
            }
        }
        let guess = action.str_field("location")?.to_string();
        if !LOCATIONS.iter().any(|(name, _)| *name == guess) {
            return Err(GameError::MalformedAction(format!("unknown location '{guess}'")));
        }
        self.spy_guess_used = true;
        let correct = guess == self.location;
        self.log.push_player(
            player,
            EventKind::PlayerAction,
            json!({ "action": "guess_location", "guess": guess, "correct": correct }),
        );
        if correct {
            self.finish("spy", "Spy guessed location correctly", true);
        } else {
            self.finish("non_spies", "Spy guessed the wrong location", false);
        }
        Ok(())
    }

    /// Rulebook scoring: non-spies score 1 each for catching the spy; the spy
    /// scores 1 for running out the clock and 2 for naming the location.
    fn finish(&mut self, winner: &'static str, reason: &str, spy_guessed: bool) {
        self.winner = Some(winner);
        self.win_reason = Some(reason.to_string());
        for p in 0..self.n() {
            let score = if winner == "spy" {
                match (p == self.spy, spy_guessed) {
                    (true, true) => 2,
                    (true, false) => 1,
                    (false, _) => 0,
                }
            } else if p == self.spy {
                0
            } else {
                1
            };
            self.scores.insert(p, score);
        }
        self.log.push(
            EventKind::GameEnd,
            json!({
                "winner": winner,
                "reason": reason,
                "location": self.location,
                "spy": self.spy,
                "scores": self.scores.iter().map(|(p, s)| (p.to_string(), *s)).collect::<BTreeMap<_, _>>(),
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
            (format!("Waiting for the {phase} phase to resolve."), vec![])
        };
        let mut obs = if acting {
            Observation::act(player, phase, instruction)
        } else {
            Observation::observe(player, phase, instruction)
        };
        obs = obs.kind(ObsKind::Private);
        obs = obs
            .with("turn", self.turn)
            .with("max_turns", self.cfg.max_turns)
            .with("is_spy", player == self.spy)
            .with("current_asker", self.current_asker)
            .with(
                "qa_history",
                Value::Array(
                    self.qa_history
                        .iter()
                        .map(|qa| {
                            json!({
                                "turn": qa.turn,
                                "asker": qa.asker,
                                "answerer": qa.answerer,
                                "question": qa.question,
                                "answer": qa.answer,
                            })
                        })
                        .collect(),
                ),
            );
        // The spy sees neither location nor role; everyone else sees both.
        if player != self.spy {
            obs = obs.with("location", self.location.clone());
            if let Some(role) = &self.roles[player] {
                obs = obs.with("your_location_role", role.clone());
            }
        } else {
            obs = obs.with("known_locations", location_names());
        }
        if !options.is_empty() {
            obs = obs.options(options);
        }
        obs
    }

    fn actor_prompt(&self, player: PlayerId) -> (String, Vec<Value>) {
        match &self.state {
            GameState::QandA => {
                let mut options = Vec::new();
                match &self.pending_question {
                    Some((asker, _, question)) => {
                        options.push(json!({ "kind": "answer" }));
                        options.extend(self.one_shot_options(player));
                        (
                            format!("Player {asker} asked you: \"{question}\". Answer, or use your one-shot ability."),
                            options,
                        )
                    }
                    None => {
                        for target in (0..self.n()).filter(|t| {
                            *t != player && Some(*t) != self.cannot_ask_back
                        }) {
                            options.push(option_with("ask", "target", target));
                        }
                        options.extend(self.one_shot_options(player));
                        (
                            "You have the floor. Ask another player a question about the location."
                                .to_string(),
                            options,
                        )
                    }
                }
            }
            GameState::AccusationVote { accuser, suspect, .. } => (
                format!("Player {accuser} accuses player {suspect} of being the spy. Vote."),
                vec![
                    json!({ "kind": "vote", "yes": true }),
                    json!({ "kind": "vote", "yes": false }),
                ],
            ),
            GameState::FinalVote { suspect, tried, .. } => match suspect {
                None => (
                    "Time is up. Nominate a suspect for the final vote.".to_string(),
                    (0..self.n())
                        .filter(|t| *t != player && !tried.contains(t))
                        .map(|t| option_with("nominate", "target", t))
                        .collect(),
                ),
                Some(suspect) => (
                    format!("Final vote on player {suspect}. Are they the spy?"),
                    vec![
                        json!({ "kind": "vote", "yes": true }),
                        json!({ "kind": "vote", "yes": false }),
                    ],
                ),
            },
            GameState::SpyGuess => (
                "You have been identified. Name the location to steal the win.".to_string(),
                LOCATIONS
                    .iter()
                    .map(|(name, _)| option_with("guess_location", "location", *name))
                    .collect(),
            ),
            GameState::GameOver => (String::new(), vec![]),
        }
    }
}

impl Engine for Spyfall {
    fn reset(&mut self) -> Observations {
        self.log.push(
            EventKind::GameStart,
            json!({
                "game": "spyfall",
                "n_players": self.cfg.n_players,
                "seed": self.cfg.seed,
            }),
        );
        self.log.set_round(1);
        self.log.push_private(
            self.spy,
            EventKind::Info,
            json!({ "role_assignment": "spy" }),
        );
        for p in (0..self.n()).filter(|p| *p != self.spy) {
            self.log.push_private(
                p,
                EventKind::Info,
                json!({
                    "role_assignment": self.roles[p],
                    "location": self.location,
                }),
            );
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
            for (p, score) in &self.scores {
                outcome.rewards.insert(*p, *score as f64);
            }
        }
        outcome
    }

    fn terminal(&self) -> bool {
        matches!(self.state, GameState::GameOver)
    }

    fn winner(&self) -> Option<String> {
        self.winner.map(|w| w.to_string())
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
            GameState::QandA => match &self.pending_question {
                Some(_) => Action::new(player, ActionKind::Answer)
                    .with("answer", "I would rather not say."),
                None => {
                    let target = (0..self.n())
                        .find(|t| *t != player && Some(*t) != self.cannot_ask_back)?;
                    Action::new(player, ActionKind::Ask)
                        .with("target", target)
                        .with("question", "What brings you here today?")
                }
            },
            GameState::AccusationVote { .. } => {
                Action::new(player, ActionKind::Vote).with("yes", false)
            }
            GameState::FinalVote { suspect, tried, .. } => match suspect {
                None => {
                    let target = (0..self.n()).find(|t| *t != player && !tried.contains(t))?;
                    Action::new(player, ActionKind::Nominate).with("target", target)
                }
                Some(_) => Action::new(player, ActionKind::Vote).with("yes", false),
            },
            GameState::SpyGuess => Action::new(player, ActionKind::GuessLocation)
                .with("location", LOCATIONS[0].0),
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
        self.turn
    }

    fn player_stats(&self) -> BTreeMap<PlayerId, Value> {
        (0..self.n())
            .map(|p| {
                (
                    p,
                    json!({
                        "is_spy": p == self.spy,
                        "score": self.scores.get(&p).copied().unwrap_or(0),
                        "accusation_used": self.accusation_used[p],
                    }),
                )
            })
            .collect()
    }
}
