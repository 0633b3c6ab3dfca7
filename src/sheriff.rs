//! Sheriff of Nottingham engine: markets, smuggling, bribes and inspections.

use crate::engine::{Engine, Observations, StepOutcome};
use crate::error::GameError;
use crate::event::{EventKind, GameLog};
use crate::types::{Action, ActionKind, ObsKind, Observation, PlayerId};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};

mod test;

const MAX_RETRIES: usize = 3;

/// Face-up cards preserved on each discard pile when the deck is rebuilt.
const PILE_TOP_KEPT: usize = 5;

pub type CardId = usize;

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum LegalType {
    Apples,
    Cheese,
    Bread,
    Chicken,
}

impl LegalType {
    pub const ALL: [LegalType; 4] = [
        LegalType::Apples,
        LegalType::Cheese,
        LegalType::Bread,
        LegalType::Chicken,
    ];

    fn parse(s: &str) -> Option<Self> {
        match s {
            "apples" => Some(LegalType::Apples),
            "cheese" => Some(LegalType::Cheese),
            "bread" => Some(LegalType::Bread),
            "chicken" => Some(LegalType::Chicken),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            LegalType::Apples => "apples",
            LegalType::Cheese => "cheese",
            LegalType::Bread => "bread",
            LegalType::Chicken => "chicken",
        }
    }

    fn king_bonus(self) -> i64 {
        match self {
            LegalType::Apples => 20,
            LegalType::Cheese | LegalType::Bread => 15,
            LegalType::Chicken => 10,
        }
    }

    fn queen_bonus(self) -> i64 {
        match self {
            LegalType::Chicken => 5,
            _ => 10,
        }
    }
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CardKind {
    Legal,
    Contraband,
    Royal,
}

/// One card as printed: name, scoring value and inspection penalty. Royal
/// goods also carry what they count as for King/Queen tallies.
#[derive(Clone, Copy, Serialize, Debug)]
pub struct CardDef {
    pub name: &'static str,
    pub kind: CardKind,
    pub value: i64,
    pub penalty: i64,
    pub counts_as: Option<LegalType>,
    pub counts_as_n: usize,
}

/// The rulebook deck: legal goods, contraband, and (optionally) royal goods,
/// with the 4+-player royals removed at three players.
fn build_catalog(include_royal: bool, n_players: usize) -> Vec<CardDef> {
    let legal = |name, value, count| (name, CardKind::Legal, value, 2i64, None, 1usize, count, 3usize);
    let contraband =
        |name, value, penalty, count| (name, CardKind::Contraband, value, penalty, None, 1usize, count, 3usize);
    let royal = |name, value, penalty, counts_as, n, count, min_players| {
        (name, CardKind::Royal, value, penalty, Some(counts_as), n, count, min_players)
    };
    let mut specs: Vec<(&'static str, CardKind, i64, i64, Option<LegalType>, usize, usize, usize)> = vec![
        legal("apples", 2, 48),
        legal("cheese", 3, 36),
        legal("bread", 3, 36),
        legal("chicken", 4, 24),
        contraband("pepper", 4, 4, 20),
        contraband("mead", 7, 4, 18),
        contraband("silk", 8, 4, 16),
        contraband("crossbow", 9, 4, 6),
    ];
    if include_royal {
        specs.extend([
            royal("green_apples", 4, 3, LegalType::Apples, 2, 2, 3),
            royal("golden_apples", 6, 4, LegalType::Apples, 3, 2, 4),
            royal("gouda_cheese", 6, 4, LegalType::Cheese, 2, 2, 3),
            royal("bleu_cheese", 9, 5, LegalType::Cheese, 3, 1, 4),
            royal("rye_bread", 6, 4, LegalType::Bread, 2, 2, 3),
            royal("pumpernickel_bread", 9, 5, LegalType::Bread, 3, 1, 4),
            royal("royal_rooster", 8, 4, LegalType::Chicken, 2, 2, 3),
        ]);
    }
    let mut catalog = Vec::new();
    for (name, kind, value, penalty, counts_as, counts_as_n, count, min_players) in specs {
        if n_players < min_players {
            continue;
        }
        for _ in 0..count {
            catalog.push(CardDef {
                name,
                kind,
                value,
                penalty,
                counts_as,
                counts_as_n,
            });
        }
    }
    catalog
}

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct SheriffConfig {
    pub n_players: usize,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub include_royal: bool,
    #[serde(default = "default_hand_size")]
    pub hand_size: usize,
    #[serde(default = "default_bag_limit")]
    pub bag_limit: usize,
    /// Times each player serves as sheriff; defaults to 3 for three players
    /// and 2 otherwise.
    #[serde(default)]
    pub sheriff_rotations: Option<usize>,
    #[serde(default = "default_negotiation_rounds")]
    pub max_negotiation_rounds: usize,
}

fn default_hand_size() -> usize {
    6
}

fn default_bag_limit() -> usize {
    5
}

fn default_negotiation_rounds() -> usize {
    1
}

impl Default for SheriffConfig {
    fn default() -> Self {
        Self {
            n_players: 4,
            seed: 0,
            include_royal: false,
            hand_size: default_hand_size(),
            bag_limit: default_bag_limit(),
            sheriff_rotations: None,
            max_negotiation_rounds: default_negotiation_rounds(),
        }
    }
}

/// A bribe on the table: gold and goods for the sheriff's blind eye.
#[derive(Clone, Serialize, Deserialize, Debug, Default)]
struct Offer {
    gold: i64,
    /// Delivered to the sheriff immediately on acceptance.
    stand_goods: Vec<CardId>,
    /// Delivered to the sheriff only after a pass.
    bag_goods: Vec<CardId>,
    /// Non-binding, logged only.
    promises: Vec<String>,
}

impl Offer {
    fn is_empty(&self) -> bool {
        self.gold == 0 && self.stand_goods.is_empty() && self.bag_goods.is_empty()
    }
}

#[derive(Clone, Serialize, Deserialize, Debug)]
struct AcceptedBribe {
    merchant: PlayerId,
    gold: i64,
    bag_goods: Vec<CardId>,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
struct Merchant {
    gold: i64,
    hand: Vec<CardId>,
    stand: Vec<CardId>,
    bag: Vec<CardId>,
    declared: Option<(LegalType, usize)>,
    times_as_sheriff: usize,
}

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
enum Pile {
    Left,
    Right,
}

#[derive(Clone, Serialize, Deserialize, Debug)]
enum GameState {
    Market { queue: Vec<PlayerId>, next: usize },
    LoadBag { pending: Vec<PlayerId> },
    Declare { pending: Vec<PlayerId> },
    NegotiateOffers { round_no: usize, pending: Vec<PlayerId>, offers: BTreeMap<PlayerId, Offer> },
    NegotiateResponses { round_no: usize, pending: Vec<PlayerId>, offers: BTreeMap<PlayerId, Offer> },
    Inspect { queue: Vec<PlayerId>, next: usize },
    GameOver,
}

pub struct Sheriff {
    cfg: SheriffConfig,
    rotations: usize,
    /// The printed card pool; every zone refers into it by id.
    cards: Vec<CardDef>,
    deck: Vec<CardId>,
    discard_left: Vec<CardId>,
    discard_right: Vec<CardId>,
    players: Vec<Merchant>,
    sheriff: PlayerId,
    round: usize,
    accepted_bribes: Vec<AcceptedBribe>,
    /// Merchants already refunded this round; the refund is idempotent.
    refunded: HashSet<PlayerId>,
    state: GameState,
    retries: BTreeMap<PlayerId, usize>,
    winners: Vec<PlayerId>,
    win_reason: Option<String>,
    final_scores: BTreeMap<PlayerId, i64>,
    rng: rand_chacha::ChaCha8Rng,
    log: GameLog,
}

impl Sheriff {
    pub fn new(cfg: SheriffConfig, log: GameLog) -> Result<Self, GameError> {
        if !(3..=5).contains(&cfg.n_players) {
            return Err(GameError::rule(format!(
                "Sheriff requires 3-5 players, got {}",
                cfg.n_players
            )));
        }
        if cfg.bag_limit == 0 || cfg.bag_limit > 5 {
            return Err(GameError::rule("bag limit must be 1-5"));
        }
        let rotations = cfg
            .sheriff_rotations
            .unwrap_or(if cfg.n_players == 3 { 3 } else { 2 });
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(cfg.seed);
        let cards = build_catalog(cfg.include_royal, cfg.n_players);
        let mut deck: Vec<CardId> = (0..cards.len()).collect();
        deck.shuffle(&mut rng);

        let mut players: Vec<Merchant> = (0..cfg.n_players)
            .map(|_| Merchant {
                gold: 50,
                hand: Vec::new(),
                stand: Vec::new(),
                bag: Vec::new(),
                declared: None,
                times_as_sheriff: 0,
            })
            .collect();
        for merchant in &mut players {
            for _ in 0..cfg.hand_size {
                if let Some(card) = deck.pop() {
                    merchant.hand.push(card);
                }
            }
        }
        let queue: Vec<PlayerId> = (1..cfg.n_players).collect();
        Ok(Self {
            cfg,
            rotations,
            cards,
            deck,
            discard_left: Vec::new(),
            discard_right: Vec::new(),
            players,
            sheriff: 0,
            round: 1,
            accepted_bribes: Vec::new(),
            refunded: HashSet::new(),
            state: GameState::Market { queue, next: 0 },
            retries: BTreeMap::new(),
            winners: Vec::new(),
            win_reason: None,
            final_scores: BTreeMap::new(),
            rng,
            log,
        })
    }

    fn n(&self) -> usize {
        self.players.len()
    }

    fn merchants(&self) -> Vec<PlayerId> {
        (1..=self.n())
            .map(|i| (self.sheriff + i) % self.n())
            .filter(|p| *p != self.sheriff)
            .collect()
    }

    fn phase_name(&self) -> &'static str {
        match self.state {
            GameState::Market { .. } => "market",
            GameState::LoadBag { .. } => "load_bag",
            GameState::Declare { .. } => "declare",
            GameState::NegotiateOffers { .. } | GameState::NegotiateResponses { .. } => "negotiate",
            GameState::Inspect { .. } => "inspect",
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

    fn pile(&self, pile: Pile) -> &Vec<CardId> {
        match pile {
            Pile::Left => &self.discard_left,
            Pile::Right => &self.discard_right,
        }
    }

    fn pile_mut(&mut self, pile: Pile) -> &mut Vec<CardId> {
        match pile {
            Pile::Left => &mut self.discard_left,
            Pile::Right => &mut self.discard_right,
        }
    }

    /// Rebuilds the deck from the lower layers of both discard piles,
    /// preserving the visible top five of each.
    fn refill_deck(&mut self) {
        if !self.deck.is_empty() {
            return;
        }
        let mut lower = Vec::new();
        for pile in [Pile::Left, Pile::Right] {
            let pile = self.pile_mut(pile);
            let keep = pile.len().saturating_sub(PILE_TOP_KEPT);
            lower.extend(pile.drain(..keep));
        }
        if lower.is_empty() {
            return;
        }
        lower.shuffle(&mut self.rng);
        self.deck = lower;
    }

    fn draw_to_hand_size(&mut self, player: PlayerId) {
        while self.players[player].hand.len() < self.cfg.hand_size {
            self.refill_deck();
            match self.deck.pop() {
                Some(card) => self.players[player].hand.push(card),
                None => break,
            }
        }
    }

    fn current_actors(&self) -> Vec<PlayerId> {
        match &self.state {
            GameState::Market { queue, next } => {
                queue.get(*next).map(|p| vec![*p]).unwrap_or_default()
            }
            GameState::LoadBag { pending } | GameState::Declare { pending } => pending.clone(),
            GameState::NegotiateOffers { pending, .. } => pending.clone(),
            GameState::NegotiateResponses { .. } => vec![self.sheriff],
            GameState::Inspect { .. } => vec![self.sheriff],
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
            GameState::Market { .. } => self.apply_market(player, action),
            GameState::LoadBag { .. } => self.apply_load_bag(player, action),
            GameState::Declare { .. } => self.apply_declare(player, action),
            GameState::NegotiateOffers { .. } => self.apply_offer(player, action),
            GameState::NegotiateResponses { .. } => self.apply_bribe_response(player, action),
            GameState::Inspect { .. } => self.apply_inspection(player, action),
            GameState::GameOver => Err(GameError::InvalidAction),
        }
    }

    fn apply_market(&mut self, player: PlayerId, action: &Action) -> Result<(), GameError> {
        let (discards, draws) = match action.kind {
            ActionKind::Skip => (Vec::new(), Vec::new()),
            ActionKind::Market => {
                let discards = parse_discards(action)?;
                let draws = parse_draws(action)?;
                (discards, draws)
            }
            _ => return Err(GameError::InvalidAction),
        };
        // Validate discards against the hand before touching any zone.
        let mut seen = HashSet::new();
        for (card, _) in &discards {
            if !self.players[player].hand.contains(card) || !seen.insert(*card) {
                return Err(GameError::rule("discard of a card not in hand"));
            }
        }
        for (card, pile) in &discards {
            self.players[player].hand.retain(|c| c != card);
            self.pile_mut(*pile).push(*card);
        }
        let mut drawn = Vec::new();
        for source in draws {
            if self.players[player].hand.len() >= self.cfg.hand_size {
                break;
            }
            let card = match source.as_str() {
                "deck" => {
                    self.refill_deck();
                    self.deck.pop()
                }
                "left" => self.discard_left.pop(),
                "right" => self.discard_right.pop(),
                _ => None,
            };
            if let Some(card) = card {
                drawn.push(self.cards[card].name);
                self.players[player].hand.push(card);
            }
        }
        // Back to hand size from the deck regardless of what was requested.
        self.draw_to_hand_size(player);
        self.log.push_private(
            player,
            EventKind::PlayerAction,
            json!({ "action": "market", "discarded": discards.len(), "drawn": drawn }),
        );
        let GameState::Market { queue, next } = &mut self.state else {
            unreachable!()
        };
        *next += 1;
        if *next >= queue.len() {
            let pending = self.merchants();
            self.set_state(GameState::LoadBag { pending });
        }
        Ok(())
    }

    fn apply_load_bag(&mut self, player: PlayerId, action: &Action) -> Result<(), GameError> {
        let cards = match action.kind {
            ActionKind::LoadBag => action.id_list("cards")?,
            ActionKind::Skip => Vec::new(),
            _ => return Err(GameError::InvalidAction),
        };
        let cards = if cards.is_empty() {
            // An empty bag is not a legal play; one card is forced in.
            let forced = *self.players[player]
                .hand
                .first()
                .ok_or_else(|| GameError::rule("no cards in hand to load"))?;
            self.log
                .warn_invariant("merchant submitted an empty bag", "force-loaded one card");
            vec![forced]
        } else {
            if cards.len() > self.cfg.bag_limit {
                return Err(GameError::rule(format!(
                    "bag holds at most {} cards",
                    self.cfg.bag_limit
                )));
            }
            let mut seen = HashSet::new();
            for card in &cards {
                if !self.players[player].hand.contains(card) || !seen.insert(*card) {
                    return Err(GameError::rule("bag card not in hand"));
                }
            }
            cards
        };
        for card in &cards {
            self.players[player].hand.retain(|c| c != card);
        }
        self.players[player].bag = cards;
        self.log.push_private(
            player,
            EventKind::PlayerAction,
            json!({
                "action": "load_bag",
                "cards": self.players[player].bag.iter().map(|c| self.cards[*c].name).collect::<Vec<_>>(),
            }),
        );
        let GameState::LoadBag { pending } = &mut self.state else {
            unreachable!()
        };
        pending.retain(|p| *p != player);
        if pending.is_empty() {
            let pending = self.merchants();
            self.set_state(GameState::Declare { pending });
        }
        Ok(())
    }

    fn apply_declare(&mut self, player: PlayerId, action: &Action) -> Result<(), GameError> {
        if !matches!(action.kind, ActionKind::Declare | ActionKind::Skip) {
            return Err(GameError::InvalidAction);
        }
        let bag_size = self.players[player].bag.len();
        let declared = action
            .str_field("goods")
            .ok()
            .and_then(LegalType::parse)
            .zip(action.int_field("count").ok().map(|c| c as usize))
            .filter(|(_, count)| *count == bag_size);
        // An illegal declaration defaults to "all apples", count = bag size.
        let (goods, count) = match declared {
            Some(d) => d,
            None => {
                if action.kind == ActionKind::Declare {
                    self.log.error(
                        Some(player),
                        "INVALID_DECLARATION",
                        "declaration must name a legal good and match the bag size",
                    );
                }
                (LegalType::Apples, bag_size)
            }
        };
        self.players[player].declared = Some((goods, count));
        self.log.push_player(
            player,
            EventKind::PlayerAction,
            json!({ "action": "declare", "goods": goods.name(), "count": count }),
        );
        let GameState::Declare { pending } = &mut self.state else {
            unreachable!()
        };
        pending.retain(|p| *p != player);
        if pending.is_empty() {
            let pending = self.merchants();
            self.set_state(GameState::NegotiateOffers {
                round_no: 1,
                pending,
                offers: BTreeMap::new(),
            });
        }
        Ok(())
    }

    fn apply_offer(&mut self, player: PlayerId, action: &Action) -> Result<(), GameError> {
        let offer = match action.kind {
            ActionKind::Skip => Offer::default(),
            ActionKind::Offer => {
                let gold = action.int_field("gold").unwrap_or(0);
                let stand_goods = action.id_list("stand_goods").unwrap_or_default();
                let bag_goods = action.id_list("bag_goods").unwrap_or_default();
                let promises = action
                    .data
                    .get("promises")
                    .and_then(Value::as_array)
                    .map(|arr| {
                        arr.iter()
                            .filter_map(Value::as_str)
                            .map(str::to_string)
                            .collect()
                    })
                    .unwrap_or_default();
                if gold < 0 || gold > self.players[player].gold {
                    return Err(GameError::rule("offer exceeds available gold"));
                }
                if stand_goods.iter().any(|c| !self.players[player].stand.contains(c)) {
                    return Err(GameError::rule("offered stand good not on stand"));
                }
                if bag_goods.iter().any(|c| !self.players[player].bag.contains(c)) {
                    return Err(GameError::rule("offered bag good not in bag"));
                }
                Offer {
                    gold,
                    stand_goods,
                    bag_goods,
                    promises,
                }
            }
            _ => return Err(GameError::InvalidAction),
        };
        // The sheriff sees the offer; the table does not.
        self.log.push_private(
            self.sheriff,
            EventKind::PlayerAction,
            json!({
                "action": "bribe_offer",
                "merchant": player,
                "gold": offer.gold,
                "stand_goods": offer.stand_goods.iter().map(|c| self.cards[*c].name).collect::<Vec<_>>(),
                "bag_goods_count": offer.bag_goods.len(),
                "promises": offer.promises,
            }),
        );
        let GameState::NegotiateOffers { round_no, pending, offers } = &mut self.state else {
            unreachable!()
        };
        offers.insert(player, offer);
        pending.retain(|p| *p != player);
        if pending.is_empty() {
            let round_no = *round_no;
            let offers = std::mem::take(offers);
            let respond_to: Vec<PlayerId> = offers
                .iter()
                .filter(|(_, o)| !o.is_empty())
                .map(|(p, _)| *p)
                .collect();
            if respond_to.is_empty() {
                self.advance_negotiation(round_no, offers);
            } else {
                self.set_state(GameState::NegotiateResponses {
                    round_no,
                    pending: respond_to,
                    offers,
                });
            }
        }
        Ok(())
    }

    fn apply_bribe_response(&mut self, player: PlayerId, action: &Action) -> Result<(), GameError> {
        match action.kind {
            // The sheriff may end negotiation early; undecided offers default
            // to rejected.
            ActionKind::Skip => {
                let GameState::NegotiateResponses { round_no, pending, offers } = &mut self.state
                else {
                    unreachable!()
                };
                for merchant in std::mem::take(pending) {
                    self.log.push_private(
                        merchant,
                        EventKind::PlayerAction,
                        json!({ "action": "bribe_rejected", "merchant": merchant }),
                    );
                }
                let (round_no, offers) = (*round_no, std::mem::take(offers));
                self.advance_negotiation(round_no, offers);
                Ok(())
            }
            ActionKind::BribeResponse => {
                let merchant = action.id_field("merchant")?;
                let accept = action.bool_field("accept")?;
                let offer = {
                    let GameState::NegotiateResponses { pending, offers, .. } = &mut self.state
                    else {
                        unreachable!()
                    };
                    if !pending.contains(&merchant) {
                        return Err(GameError::InvalidPlayerChoice);
                    }
                    pending.retain(|p| *p != merchant);
                    offers.get(&merchant).cloned().unwrap_or_default()
                };
                if accept {
                    self.accept_bribe(merchant, &offer);
                } else {
                    self.log.push_private(
                        merchant,
                        EventKind::PlayerAction,
                        json!({ "action": "bribe_rejected", "merchant": merchant }),
                    );
                }
                let done = {
                    let GameState::NegotiateResponses { pending, .. } = &self.state else {
                        unreachable!()
                    };
                    pending.is_empty()
                };
                if done {
                    let GameState::NegotiateResponses { round_no, offers, .. } = &mut self.state
                    else {
                        unreachable!()
                    };
                    let (round_no, offers) = (*round_no, std::mem::take(offers));
                    self.advance_negotiation(round_no, offers);
                }
                Ok(())
            }
            _ => Err(GameError::InvalidAction),
        }
    }

    fn accept_bribe(&mut self, merchant: PlayerId, offer: &Offer) {
        // Gold and stand goods change hands now; bag goods only after a pass.
        self.players[merchant].gold -= offer.gold;
        self.players[self.sheriff].gold += offer.gold;
        for card in &offer.stand_goods {
            self.players[merchant].stand.retain(|c| c != card);
            self.players[self.sheriff].stand.push(*card);
        }
        self.accepted_bribes.push(AcceptedBribe {
            merchant,
            gold: offer.gold,
            bag_goods: offer.bag_goods.clone(),
        });
        self.log.push_private(
            merchant,
            EventKind::PlayerAction,
            json!({ "action": "bribe_accepted", "merchant": merchant, "gold": offer.gold }),
        );
        self.log.push_private(
            self.sheriff,
            EventKind::PlayerAction,
            json!({ "action": "bribe_accepted", "merchant": merchant, "gold": offer.gold }),
        );
    }

    fn advance_negotiation(&mut self, round_no: usize, _offers: BTreeMap<PlayerId, Offer>) {
        let bribed: HashSet<PlayerId> = self.accepted_bribes.iter().map(|b| b.merchant).collect();
        let remaining: Vec<PlayerId> = self
            .merchants()
            .into_iter()
            .filter(|m| !bribed.contains(m))
            .collect();
        if round_no < self.cfg.max_negotiation_rounds && !remaining.is_empty() {
            self.set_state(GameState::NegotiateOffers {
                round_no: round_no + 1,
                pending: remaining,
                offers: BTreeMap::new(),
            });
        } else {
            let queue = self.merchants();
            self.set_state(GameState::Inspect { queue, next: 0 });
        }
    }

    fn apply_inspection(&mut self, _player: PlayerId, action: &Action) -> Result<(), GameError> {
        if action.kind != ActionKind::Inspect {
            return Err(GameError::InvalidAction);
        }
        let merchant = action.id_field("merchant")?;
        let inspect = match action.str_field("choice")? {
            "inspect" => true,
            "pass" => false,
            other => {
                return Err(GameError::MalformedAction(format!(
                    "choice must be 'inspect' or 'pass', got '{other}'"
                )))
            }
        };
        let current = {
            let GameState::Inspect { queue, next } = &self.state else {
                unreachable!()
            };
            queue.get(*next).copied()
        };
        if current != Some(merchant) {
            return Err(GameError::rule("merchants are inspected in queue order"));
        }
        if inspect {
            self.inspect_merchant(merchant);
        } else {
            self.pass_merchant(merchant);
        }
        let GameState::Inspect { queue, next } = &mut self.state else {
            unreachable!()
        };
        *next += 1;
        if *next >= queue.len() {
            self.resolve_round();
        }
        Ok(())
    }

    fn bribe_from(&self, merchant: PlayerId) -> Option<&AcceptedBribe> {
        self.accepted_bribes.iter().find(|b| b.merchant == merchant)
    }

    fn pass_merchant(&mut self, merchant: PlayerId) {
        let bag = std::mem::take(&mut self.players[merchant].bag);
        let promised: Vec<CardId> = self
            .bribe_from(merchant)
            .map(|b| b.bag_goods.clone())
            .unwrap_or_default();
        let mut to_sheriff = Vec::new();
        for card in bag {
            if promised.contains(&card) {
                self.players[self.sheriff].stand.push(card);
                to_sheriff.push(card);
            } else {
                self.players[merchant].stand.push(card);
            }
        }
        self.players[merchant].declared = None;
        self.log.push(
            EventKind::PlayerAction,
            json!({ "action": "inspection", "merchant": merchant, "choice": "pass", "promised_goods": to_sheriff.len() }),
        );
    }

    fn inspect_merchant(&mut self, merchant: PlayerId) {
        // An accepted bribe is returned before the bag is opened; the refund
        // fires at most once per merchant per round.
        if let Some(gold) = self.bribe_from(merchant).map(|b| b.gold) {
            if self.refunded.insert(merchant) && gold > 0 {
                self.players[self.sheriff].gold -= gold;
                self.players[merchant].gold += gold;
                self.log.push(
                    EventKind::Info,
                    json!({ "bribe_refund": true, "sheriff": self.sheriff, "merchant": merchant, "gold": gold }),
                );
            }
        }
        let (declared, _count) = self.players[merchant]
            .declared
            .unwrap_or((LegalType::Apples, 0));
        let bag = std::mem::take(&mut self.players[merchant].bag);
        let truthful = bag
            .iter()
            .all(|c| self.cards[*c].kind == CardKind::Legal && LegalType::parse(self.cards[*c].name) == Some(declared));
        let mut confiscated = Vec::new();
        let mut delivered = Vec::new();
        let mut penalty = 0i64;
        if truthful {
            for card in bag {
                penalty += self.cards[card].penalty;
                self.players[merchant].stand.push(card);
                delivered.push(card);
            }
            // Wrongly opened bags cost the sheriff.
            self.players[self.sheriff].gold -= penalty;
            self.players[merchant].gold += penalty;
        } else {
            for card in bag {
                let matches = self.cards[card].kind == CardKind::Legal
                    && LegalType::parse(self.cards[card].name) == Some(declared);
                if matches {
                    self.players[merchant].stand.push(card);
                    delivered.push(card);
                } else {
                    penalty += self.cards[card].penalty;
                    confiscated.push(card);
                }
            }
            self.discard_left.extend(&confiscated);
            self.players[merchant].gold -= penalty;
            self.players[self.sheriff].gold += penalty;
        }
        self.players[merchant].declared = None;
        self.log.push(
            EventKind::PlayerAction,
            json!({
                "action": "inspection",
                "merchant": merchant,
                "choice": "inspect",
                "truthful": truthful,
                "confiscated": confiscated.iter().map(|c| self.cards[*c].name).collect::<Vec<_>>(),
                "delivered": delivered.len(),
                "penalty": penalty,
            }),
        );
    }

    fn resolve_round(&mut self) {
        self.players[self.sheriff].times_as_sheriff += 1;
        for player in 0..self.n() {
            self.draw_to_hand_size(player);
        }
        self.accepted_bribes.clear();
        self.refunded.clear();
        self.log
            .push(EventKind::RoundEnd, json!({ "round": self.round }));

        if self.players.iter().all(|p| p.times_as_sheriff >= self.rotations) {
            self.score_game();
            return;
        }
        self.sheriff = (self.sheriff + 1) % self.n();
        self.round += 1;
        self.log.set_round(self.round);
        self.log.push(
            EventKind::RoundStart,
            json!({ "round": self.round, "sheriff": self.sheriff }),
        );
        let queue = self.merchants();
        self.set_state(GameState::Market { queue, next: 0 });
    }

    /// Count of a legal type on a stand, with royal goods counting as their
    /// printed multiple.
    fn stand_count(&self, player: PlayerId, goods: LegalType) -> usize {
        self.players[player]
            .stand
            .iter()
            .map(|c| {
                let def = &self.cards[*c];
                match def.kind {
                    CardKind::Legal if LegalType::parse(def.name) == Some(goods) => 1,
                    CardKind::Royal if def.counts_as == Some(goods) => def.counts_as_n,
                    _ => 0,
                }
            })
            .sum()
    }

    /// King and Queen bonuses per good; exact ties award nothing at that rank,
    /// and a tied King also voids the Queen for that good.
    fn royal_bonuses(&self) -> BTreeMap<PlayerId, i64> {
        let mut bonuses: BTreeMap<PlayerId, i64> = (0..self.n()).map(|p| (p, 0)).collect();
        for goods in LegalType::ALL {
            let counts: Vec<usize> = (0..self.n()).map(|p| self.stand_count(p, goods)).collect();
            let top = counts.iter().copied().max().unwrap_or(0);
            if top == 0 {
                continue;
            }
            let kings: Vec<PlayerId> = (0..self.n()).filter(|p| counts[*p] == top).collect();
            if kings.len() != 1 {
                continue;
            }
            *bonuses.entry(kings[0]).or_default() += goods.king_bonus();
            let second = counts
                .iter()
                .copied()
                .filter(|c| *c < top)
                .max()
                .unwrap_or(0);
            if second == 0 {
                continue;
            }
            let queens: Vec<PlayerId> = (0..self.n()).filter(|p| counts[*p] == second).collect();
            if queens.len() == 1 {
                *bonuses.entry(queens[0]).or_default() += goods.queen_bonus();
            }
        }
        bonuses
    }

    fn score_game(&mut self) {
        let bonuses = self.royal_bonuses();
        let mut best = i64::MIN;
        for p in 0..self.n() {
            let stand_value: i64 = self.players[p].stand.iter().map(|c| self.cards[*c].value).sum();
            let total = self.players[p].gold + stand_value + bonuses[&p];
            self.final_scores.insert(p, total);
            best = best.max(total);
        }
        self.winners = (0..self.n())
            .filter(|p| self.final_scores[p] == best)
            .collect();
        self.win_reason = Some("Highest final score".to_string());
        self.log.push(
            EventKind::GameEnd,
            json!({
                "winner": self.winners.iter().map(|p| format!("player_{p}")).collect::<Vec<_>>().join(","),
                "reason": "Highest final score",
                "scores": self.final_scores.iter().map(|(p, s)| (p.to_string(), *s)).collect::<BTreeMap<_, _>>(),
                "bonuses": bonuses.iter().map(|(p, b)| (p.to_string(), *b)).collect::<BTreeMap<_, _>>(),
            }),
        );
        self.set_state(GameState::GameOver);
    }

    fn card_json(&self, card: CardId) -> Value {
        let def = &self.cards[card];
        json!({ "id": card, "name": def.name, "kind": def.kind, "value": def.value, "penalty": def.penalty })
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
            .with("round", self.round)
            .with("sheriff", self.sheriff)
            .with("your_gold", self.players[player].gold)
            .with("deck_size", self.deck.len())
            .with(
                "your_hand",
                Value::Array(self.players[player].hand.iter().map(|c| self.card_json(*c)).collect()),
            )
            .with(
                "your_stand",
                Value::Array(self.players[player].stand.iter().map(|c| self.card_json(*c)).collect()),
            )
            .with(
                "your_bag",
                Value::Array(self.players[player].bag.iter().map(|c| self.card_json(*c)).collect()),
            )
            .with(
                "discard_tops",
                json!({
                    "left": self.discard_left.iter().rev().take(PILE_TOP_KEPT).map(|c| self.cards[*c].name).collect::<Vec<_>>(),
                    "right": self.discard_right.iter().rev().take(PILE_TOP_KEPT).map(|c| self.cards[*c].name).collect::<Vec<_>>(),
                }),
            );
        // Other stands show face-up legal goods and a face-down count.
        let mut stands = serde_json::Map::new();
        for other in (0..self.n()).filter(|o| *o != player) {
            let visible: Vec<&str> = self.players[other]
                .stand
                .iter()
                .filter(|c| self.cards[**c].kind == CardKind::Legal)
                .map(|c| self.cards[*c].name)
                .collect();
            let hidden = self.players[other].stand.len() - visible.len();
            stands.insert(
                other.to_string(),
                json!({ "visible": visible, "face_down": hidden, "gold": self.players[other].gold }),
            );
        }
        obs = obs.with("other_stands", Value::Object(stands));
        let declarations: serde_json::Map<String, Value> = (0..self.n())
            .filter_map(|p| {
                self.players[p]
                    .declared
                    .map(|(goods, count)| {
                        (p.to_string(), json!({ "goods": goods.name(), "count": count }))
                    })
            })
            .collect();
        if !declarations.is_empty() {
            obs = obs.with("declarations", Value::Object(declarations));
        }
        if !options.is_empty() {
            obs = obs.options(options);
        }
        obs
    }

    fn actor_prompt(&self, player: PlayerId) -> (String, Vec<Value>) {
        match &self.state {
            GameState::Market { .. } => {
                let mut options = vec![json!({ "kind": "skip" })];
                for card in self.players[player].hand.iter().take(3) {
                    options.push(json!({
                        "kind": "market",
                        "discards": [{ "card": card, "pile": "left" }],
                        "draws": ["deck"],
                    }));
                }
                (
                    "Market: you may discard cards to either pile and draw back to hand size."
                        .to_string(),
                    options,
                )
            }
            GameState::LoadBag { .. } => {
                let hand = &self.players[player].hand;
                let mut options = Vec::new();
                for card in hand.iter().take(self.cfg.bag_limit) {
                    options.push(json!({ "kind": "load_bag", "cards": [card] }));
                }
                if hand.len() >= 2 {
                    options.push(json!({ "kind": "load_bag", "cards": hand[..2].to_vec() }));
                }
                (
                    format!("Load 1-{} cards from your hand into your bag.", self.cfg.bag_limit),
                    options,
                )
            }
            GameState::Declare { .. } => (
                "Declare the contents of your bag: one legal good type, count equal to the bag size."
                    .to_string(),
                LegalType::ALL
                    .iter()
                    .map(|goods| {
                        json!({
                            "kind": "declare",
                            "goods": goods.name(),
                            "count": self.players[player].bag.len(),
                        })
                    })
                    .collect(),
            ),
            GameState::NegotiateOffers { .. } => {
                let mut options = vec![json!({ "kind": "skip" })];
                for gold in [1, 3, 5] {
                    if gold <= self.players[player].gold {
                        options.push(json!({ "kind": "offer", "gold": gold }));
                    }
                }
                (
                    "Offer the sheriff a bribe (gold, goods, promises), or pass.".to_string(),
                    options,
                )
            }
            GameState::NegotiateResponses { pending, offers, .. } => {
                let mut options = vec![json!({ "kind": "skip" })];
                for merchant in pending {
                    let gold = offers.get(merchant).map(|o| o.gold).unwrap_or(0);
                    options.push(json!({ "kind": "bribe_response", "merchant": merchant, "accept": true, "gold": gold }));
                    options.push(json!({ "kind": "bribe_response", "merchant": merchant, "accept": false }));
                }
                (
                    "Respond to each merchant's offer, or end negotiation (undecided offers are rejected)."
                        .to_string(),
                    options,
                )
            }
            GameState::Inspect { queue, next } => {
                let merchant = queue.get(*next).copied().unwrap_or(0);
                let declared = self.players[merchant]
                    .declared
                    .map(|(g, c)| format!("{} {}", c, g.name()))
                    .unwrap_or_else(|| "nothing".to_string());
                (
                    format!("Merchant {merchant} declared {declared}. Inspect the bag or let it pass."),
                    vec![
                        json!({ "kind": "inspect", "merchant": merchant, "choice": "inspect" }),
                        json!({ "kind": "inspect", "merchant": merchant, "choice": "pass" }),
                    ],
                )
            }
            GameState::GameOver => (String::new(), vec![]),
        }
    }
}

fn parse_discards(action: &Action) -> Result<Vec<(CardId, Pile)>, GameError> {
    let Some(value) = action.data.get("discards") else {
        return Ok(Vec::new());
    };
    let arr = value
        .as_array()
        .ok_or_else(|| GameError::MalformedAction("'discards' must be an array".into()))?;
    arr.iter()
        .map(|entry| {
            let card = entry
                .get("card")
                .and_then(Value::as_u64)
                .ok_or_else(|| GameError::MalformedAction("discard entry missing 'card'".into()))?;
            let pile = match entry.get("pile").and_then(Value::as_str) {
                Some("right") => Pile::Right,
                _ => Pile::Left,
            };
            Ok((card as CardId, pile))
        })
        .collect()
}

fn parse_draws(action: &Action) -> Result<Vec<String>, GameError> {
    let Some(value) = action.data.get("draws") else {
        return Ok(Vec::new());
    };
    let arr = value
        .as_array()
        .ok_or_else(|| GameError::MalformedAction("'draws' must be an array".into()))?;
    Ok(arr
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect())
}

impl Engine for Sheriff {
    fn reset(&mut self) -> Observations {
        self.log.push(
            EventKind::GameStart,
            json!({
                "game": "sheriff",
                "n_players": self.cfg.n_players,
                "rotations": self.rotations,
                "seed": self.cfg.seed,
            }),
        );
        self.log.set_round(1);
        self.log.push(
            EventKind::RoundStart,
            json!({ "round": 1, "sheriff": self.sheriff }),
        );
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
            for (p, score) in &self.final_scores {
                outcome.rewards.insert(*p, *score as f64);
            }
        }
        outcome
    }

    fn terminal(&self) -> bool {
        matches!(self.state, GameState::GameOver)
    }

    fn winner(&self) -> Option<String> {
        if self.winners.is_empty() {
            None
        } else {
            Some(
                self.winners
                    .iter()
                    .map(|p| format!("player_{p}"))
                    .collect::<Vec<_>>()
                    .join(","),
            )
        }
    }

    fn win_reason(&self) -> Option<String> {
        self.win_reason.clone()
    }

    fn force_terminate(&mut self) {
        if !self.terminal() {
            // Freeze with scores as they stand.
            self.score_game();
            self.win_reason = Some("match exceeded the step bound".to_string());
        }
    }

    fn fallback_action(&self, player: PlayerId) -> Option<Action> {
        if !self.current_actors().contains(&player) {
            return None;
        }
        let action = match &self.state {
            GameState::Market { .. } => Action::new(player, ActionKind::Skip),
            GameState::LoadBag { .. } => {
                let card = *self.players[player].hand.first()?;
                Action::new(player, ActionKind::LoadBag)
                    .with("cards", Value::Array(vec![Value::from(card)]))
            }
            GameState::Declare { .. } => Action::new(player, ActionKind::Declare)
                .with("goods", "apples")
                .with("count", self.players[player].bag.len()),
            GameState::NegotiateOffers { .. } => Action::new(player, ActionKind::Skip),
            GameState::NegotiateResponses { .. } => Action::new(player, ActionKind::Skip),
            GameState::Inspect { queue, next } => {
                let merchant = queue.get(*next).copied()?;
                Action::new(player, ActionKind::Inspect)
                    .with("merchant", merchant)
                    .with("choice", "pass")
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
        (0..self.n())
            .map(|p| {
                (
                    p,
                    json!({
                        "gold": self.players[p].gold,
                        "stand_size": self.players[p].stand.len(),
                        "times_as_sheriff": self.players[p].times_as_sheriff,
                        "score": self.final_scores.get(&p).copied(),
                        "won": self.winners.contains(&p),
                    }),
                )
            })
            .collect()
    }
}
